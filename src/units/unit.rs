//! The `Unit` trait implemented by loadable components, and the factories
//! that build unit instances for a given version.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::descriptor::UnitDescriptor;
use super::error::HookError;
use crate::messaging::{DeliveryError, HandlerError, MessageBus, MessageEnvelope, Payload};
use crate::snapshot::InstanceData;
use crate::version::{MigrationValidator, Version};

/// What a hook or message handler sees of its instance.
///
/// Hooks receive the context mutably; changes to `data` made by the init,
/// suspend and resume hooks are kept as the instance's data.
#[derive(Clone)]
pub struct UnitContext {
    id: String,
    version: Version,
    pub data: InstanceData,
    bus: Arc<MessageBus>,
}

impl UnitContext {
    pub fn new(id: impl Into<String>, version: Version, data: InstanceData, bus: Arc<MessageBus>) -> Self {
        Self {
            id: id.into(),
            version,
            data,
            bus,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn config(&self, key: &str) -> Option<&Value> {
        self.data.config(key)
    }

    /// Send a message to another unit by identifier.
    pub async fn send(
        &self,
        destination: &str,
        kind: &str,
        payload: Payload,
    ) -> Result<Option<Payload>, DeliveryError> {
        self.bus
            .send(MessageEnvelope::new(self.id.as_str(), destination, kind).with_payload(payload))
            .await
    }
}

impl fmt::Debug for UnitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitContext")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("data", &self.data)
            .finish()
    }
}

/// A loadable component. One value of the implementing type is one instance
/// of one version of a unit.
#[async_trait]
pub trait Unit: Send + Sync {
    async fn init(&self, ctx: &mut UnitContext) -> Result<(), HookError>;

    async fn cleanup(&self, _ctx: &mut UnitContext) -> Result<(), HookError> {
        Ok(())
    }

    async fn suspend(&self, _ctx: &mut UnitContext) -> Result<(), HookError> {
        Ok(())
    }

    async fn resume(&self, _ctx: &mut UnitContext) -> Result<(), HookError> {
        Ok(())
    }

    /// Veto for unload (e.g. unsaved state).
    fn can_unload(&self) -> bool {
        true
    }

    /// Accept or reject data migrated for `version` before this instance
    /// goes live.
    fn validate(&self, _data: &InstanceData, _version: &Version) -> Result<(), String> {
        Ok(())
    }

    async fn handle_message(
        &self,
        _envelope: &MessageEnvelope,
        _ctx: &UnitContext,
    ) -> Result<Option<Payload>, HandlerError> {
        Ok(None)
    }
}

/// Uses a unit instance as the post-migration validator.
pub(crate) struct UnitValidator<'a>(pub(crate) &'a dyn Unit);

impl MigrationValidator for UnitValidator<'_> {
    fn validate(&self, data: &InstanceData, version: &Version) -> Result<(), String> {
        self.0.validate(data, version)
    }
}

/// Builds unit instances. Registered per identifier, or as the registry's
/// fallback for identifiers without their own factory.
pub trait UnitFactory: Send + Sync {
    fn create(&self, descriptor: &UnitDescriptor, version: &Version) -> Result<Arc<dyn Unit>, String>;
}

impl<F> UnitFactory for F
where
    F: Fn(&UnitDescriptor, &Version) -> Result<Arc<dyn Unit>, String> + Send + Sync,
{
    fn create(&self, descriptor: &UnitDescriptor, version: &Version) -> Result<Arc<dyn Unit>, String> {
        self(descriptor, version)
    }
}

/// A unit with no behavior of its own: accepts every migration and echoes
/// messages back with its identity attached.
#[derive(Debug, Clone)]
pub struct PassiveUnit {
    id: String,
    version: Version,
}

impl PassiveUnit {
    pub fn new(id: impl Into<String>, version: Version) -> Self {
        Self { id: id.into(), version }
    }
}

#[async_trait]
impl Unit for PassiveUnit {
    async fn init(&self, ctx: &mut UnitContext) -> Result<(), HookError> {
        ctx.data.set_state("initialized_version", json!(self.version.to_string()));
        Ok(())
    }

    async fn handle_message(
        &self,
        envelope: &MessageEnvelope,
        _ctx: &UnitContext,
    ) -> Result<Option<Payload>, HandlerError> {
        let mut reply = envelope.payload.clone();
        reply.insert("unit".into(), json!(self.id));
        reply.insert("version".into(), json!(self.version.to_string()));
        Ok(Some(reply))
    }
}

/// Builds a [`PassiveUnit`] for any descriptor and version.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassiveUnitFactory;

impl UnitFactory for PassiveUnitFactory {
    fn create(&self, descriptor: &UnitDescriptor, version: &Version) -> Result<Arc<dyn Unit>, String> {
        Ok(Arc::new(PassiveUnit::new(descriptor.id(), version.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passive_unit_echoes() {
        let descriptor = UnitDescriptor::new("echo", "Echo", Version::new(1, 0, 0));
        let unit = PassiveUnitFactory.create(&descriptor, &Version::new(1, 1, 0)).unwrap();
        let bus = Arc::new(MessageBus::default());
        let mut ctx = UnitContext::new("echo", Version::new(1, 1, 0), InstanceData::default(), bus);

        unit.init(&mut ctx).await.unwrap();
        assert_eq!(ctx.data.get_state("initialized_version"), Some(&json!("1.1.0")));

        let envelope = MessageEnvelope::new("a", "echo", "ping").with_entry("n", 1);
        let reply = unit.handle_message(&envelope, &ctx).await.unwrap().unwrap();
        assert_eq!(reply["version"], json!("1.1.0"));
        assert_eq!(reply["n"], json!(1));
    }

    #[test]
    fn test_closure_factory() {
        let factory = |descriptor: &UnitDescriptor, version: &Version| -> Result<Arc<dyn Unit>, String> {
            if version.is_prerelease() {
                return Err("no prereleases".into());
            }
            Ok(Arc::new(PassiveUnit::new(descriptor.id(), version.clone())))
        };
        let descriptor = UnitDescriptor::new("a", "A", Version::new(1, 0, 0));
        assert!(factory.create(&descriptor, &Version::new(1, 0, 0)).is_ok());
        let beta = Version::new(2, 0, 0).with_prerelease("beta").unwrap();
        assert!(factory.create(&descriptor, &beta).is_err());
    }
}
