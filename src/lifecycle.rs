use std::future::Future;
use std::sync::Mutex;

use async_lock::Mutex as AsyncMutex;

use crate::error::{internal_error, StoreError, StoreResult};

/// Initialization phases of one store instance. Transitions are strictly
/// monotonic: `Uninitialized → Initializing → Initialized`, with `Failed` as
/// the terminal phase when the initializer errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecyclePhase {
    Uninitialized,
    Initializing,
    Initialized,
    Failed,
}

/// One-shot initialization gate, decoupled from data flow.
///
/// The gate is an async mutex held across the initializer's await, so
/// concurrent callers queue up and then observe `Initialized` instead of
/// re-triggering the callback.
pub struct LifecycleController {
    phase: Mutex<LifecyclePhase>,
    failure: Mutex<Option<StoreError>>,
    gate: AsyncMutex<()>,
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleController {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(LifecyclePhase::Uninitialized),
            failure: Mutex::new(None),
            gate: AsyncMutex::new(()),
        }
    }

    /// Non-blocking phase observation.
    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.lock().unwrap()
    }

    fn set_phase(&self, phase: LifecyclePhase) {
        *self.phase.lock().unwrap() = phase;
    }

    /// Runs `init` exactly once per controller. Returns `Ok(true)` when this
    /// call performed the initialization, `Ok(false)` when a previous call
    /// already did. After a failed initialization every subsequent call
    /// returns the stored error.
    pub async fn ensure_initialized<F, Fut>(&self, init: F) -> StoreResult<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StoreResult<()>>,
    {
        let _guard = self.gate.lock().await;
        match self.phase() {
            LifecyclePhase::Initialized => return Ok(false),
            LifecyclePhase::Failed => {
                let failure = self.failure.lock().unwrap().clone();
                return Err(failure.unwrap_or_else(|| internal_error("store initialization previously failed")));
            }
            LifecyclePhase::Uninitialized | LifecyclePhase::Initializing => {}
        }

        self.set_phase(LifecyclePhase::Initializing);
        match init().await {
            Ok(()) => {
                self.set_phase(LifecyclePhase::Initialized);
                Ok(true)
            }
            Err(err) => {
                self.set_phase(LifecyclePhase::Failed);
                *self.failure.lock().unwrap() = Some(err.clone());
                Err(err)
            }
        }
    }
}
