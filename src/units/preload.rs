//! Staging of replacement instances for hot-swap.
//!
//! Builds the target version in isolation: instantiate, migrate a copy of the
//! live data, validate it, run the init hook. Nothing here touches the live
//! instance.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::descriptor::UnitDescriptor;
use super::error::HotSwapError;
use super::hook::run_hook;
use super::lifecycle::HookKind;
use super::registry::{LiveInstance, UnitRegistry};
use super::unit::UnitValidator;
use crate::snapshot::InstanceData;
use crate::version::{MigrationOutcome, Version};

/// Initialized replacement, ready to be committed.
pub(crate) struct PreloadedInstance {
    pub(crate) live: LiveInstance,
    pub(crate) outcome: MigrationOutcome,
    pub(crate) init_elapsed: Duration,
}

pub(crate) struct InstancePreloader {
    registry: Arc<UnitRegistry>,
}

impl InstancePreloader {
    pub(crate) fn new(registry: Arc<UnitRegistry>) -> Self {
        Self { registry }
    }

    /// Build `target` carrying `data` over from `from`.
    pub(crate) async fn preload(
        &self,
        descriptor: &UnitDescriptor,
        from: &Version,
        target: &Version,
        mut data: InstanceData,
    ) -> Result<PreloadedInstance, HotSwapError> {
        let id = descriptor.id();
        let unit = self.registry.instantiate(descriptor, target)?;

        let outcome = self.registry.versions().migrate(
            id,
            &mut data,
            &UnitValidator(unit.as_ref()),
            from,
            target,
        )?;
        debug!(unit = %id, %from, %target, path = ?outcome.path, "data migrated");

        let ctx = self.registry.context(id, target.clone(), data);
        let initialized = run_hook(
            Arc::clone(&unit),
            ctx,
            HookKind::Init,
            self.registry.config().hook_timeout,
        )
        .await?;

        Ok(PreloadedInstance {
            live: LiveInstance::new(target.clone(), unit, initialized.data),
            outcome,
            init_elapsed: initialized.elapsed,
        })
    }

    /// Discard a staged instance that will not be committed.
    pub(crate) async fn abort(&self, id: &str, preloaded: PreloadedInstance) {
        let live = preloaded.live;
        let ctx = self.registry.context(id, live.version.clone(), live.data);
        if let Err(err) = run_hook(live.unit, ctx, HookKind::Cleanup, self.registry.config().hook_timeout).await {
            warn!(unit = %id, error = %err, "cleanup of staged instance failed");
        }
    }
}
