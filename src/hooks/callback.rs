//! In-process callback hooks (spec §4.7, §9 "Hook callbacks").
//!
//! Callbacks run with a bounded worker pool (enforced by the dispatcher's
//! shared semaphore) and a per-call timeout; a stuck callback must never
//! block the emitter, and failures are logged and moved on rather than
//! propagated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::error::HookError;
use crate::models::HookRegistration;

use super::EventPayload;

/// A registered in-process callback. Boxed to allow arbitrary closures;
/// callers register these at boot alongside webhook/file_log hooks.
pub type Callback = Arc<dyn Fn(EventPayload) -> Result<(), String> + Send + Sync>;

/// Name -> callback function lookup. Populated at startup (spec §9 "Global
/// singletons": dependency construction happens once at boot in a known
/// order), read concurrently by the dispatcher.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: RwLock<HashMap<String, Callback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, name: impl Into<String>, callback: Callback) {
        self.callbacks.write().await.insert(name.into(), callback);
    }

    pub async fn get(&self, name: &str) -> Option<Callback> {
        self.callbacks.read().await.get(name).cloned()
    }
}

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Execute the callback referenced by `registration.target` (the callback
/// registry key), bounded by a timeout.
pub async fn deliver(
    registry: &CallbackRegistry,
    registration: &HookRegistration,
    payload: &EventPayload,
) -> Result<Option<String>, HookError> {
    let Some(callback) = registry.get(&registration.target).await else {
        return Err(HookError::NotRegistered(registration.target.clone()));
    };
    let payload = payload.clone();
    let result = tokio::time::timeout(
        CALLBACK_TIMEOUT,
        tokio::task::spawn_blocking(move || callback(payload)),
    )
    .await;

    match result {
        Ok(Ok(Ok(()))) => Ok(None),
        Ok(Ok(Err(e))) => Err(HookError::Delivery(e)),
        Ok(Err(join_err)) => Err(HookError::Delivery(format!("callback panicked: {join_err}"))),
        Err(_) => Err(HookError::Delivery("callback timed out".to_string())),
    }
}
