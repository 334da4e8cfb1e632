//! Bounded execution of unit hooks.
//!
//! Each hook runs as its own task under a timeout. The task is aborted when
//! the timeout fires or when the calling future is dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::error::LifecycleError;
use super::lifecycle::HookKind;
use super::unit::{Unit, UnitContext};
use crate::snapshot::InstanceData;
use crate::telemetry;

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Data left by a successful hook, with how long it took.
#[derive(Debug)]
pub(crate) struct HookOutcome {
    pub(crate) elapsed: Duration,
    pub(crate) data: InstanceData,
}

pub(crate) async fn run_hook(
    unit: Arc<dyn Unit>,
    mut ctx: UnitContext,
    hook: HookKind,
    timeout: Duration,
) -> Result<HookOutcome, LifecycleError> {
    let id = ctx.id().to_string();
    let started = Instant::now();
    let mut task = AbortOnDrop(tokio::spawn(async move {
        let result = match hook {
            HookKind::Init => unit.init(&mut ctx).await,
            HookKind::Cleanup => unit.cleanup(&mut ctx).await,
            HookKind::Suspend => unit.suspend(&mut ctx).await,
            HookKind::Resume => unit.resume(&mut ctx).await,
        };
        result.map(|()| ctx.data)
    }));

    let outcome = match tokio::time::timeout(timeout, &mut task.0).await {
        Ok(Ok(Ok(data))) => Ok(HookOutcome {
            elapsed: started.elapsed(),
            data,
        }),
        Ok(Ok(Err(err))) => Err(LifecycleError::HookFailed {
            unit: id.clone(),
            hook,
            reason: err.to_string(),
        }),
        Ok(Err(join)) => Err(LifecycleError::HookFailed {
            unit: id.clone(),
            hook,
            reason: if join.is_panic() {
                "hook panicked".into()
            } else {
                "hook task cancelled".into()
            },
        }),
        Err(_) => Err(LifecycleError::Timeout {
            unit: id.clone(),
            hook,
            timeout_ms: timeout.as_millis() as u64,
        }),
    };

    telemetry::record_hook(hook.as_str(), started.elapsed(), outcome.is_ok());
    match &outcome {
        Ok(done) => debug!(unit = %id, %hook, elapsed_ms = done.elapsed.as_millis() as u64, "hook finished"),
        Err(err) => error!(unit = %id, %hook, error = %err, "hook failed"),
    }
    outcome
}
