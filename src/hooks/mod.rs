//! Integration hook dispatcher (spec §4.7): asynchronous, retrying
//! delivery of archive-lifecycle events to webhooks, in-process callbacks,
//! and append-only logs.

pub mod callback;
pub mod file_log;
pub mod webhook;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::HookError;
use crate::models::{HookExecution, HookRegistration, HookType};
use crate::repository::{DieselDbContext, HookRepository};

use self::callback::CallbackRegistry;

/// Closed lifecycle event set (spec §4.7).
pub const EVENTS: &[&str] = &[
    "document_archived",
    "document_updated",
    "document_deleted",
    "document_retrieved",
    "batch_completed",
    "qc_approved",
    "qc_rejected",
    "version_created",
    "version_rolled_back",
];

/// Event payload schema (spec §6 "Event payload schema").
#[derive(Debug, Clone, Serialize)]
pub struct EventPayload {
    pub event: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub data: EventData,
    pub metadata: EventMetadata,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EventData {
    pub key: Option<String>,
    pub page_id: Option<String>,
    pub size: Option<u64>,
    pub version_id: Option<String>,
    pub batch_id: Option<String>,
    pub qc_status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EventMetadata {
    pub user: Option<String>,
    pub ip: Option<String>,
}

/// Live dispatcher statistics (spec §4.7 "Backpressure").
#[derive(Debug, Default)]
pub struct HookStats {
    pub events_fired: AtomicU64,
    pub hooks_executed: AtomicU64,
    pub hooks_failed: AtomicU64,
    total_execution_ms: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HookStatsSnapshot {
    pub events_fired: u64,
    pub hooks_executed: u64,
    pub hooks_failed: u64,
    pub avg_execution_time_ms: f64,
    pub success_rate: f64,
}

impl HookStats {
    fn snapshot(&self) -> HookStatsSnapshot {
        let executed = self.hooks_executed.load(Ordering::Relaxed);
        let failed = self.hooks_failed.load(Ordering::Relaxed);
        let total_ms = self.total_execution_ms.load(Ordering::Relaxed);
        HookStatsSnapshot {
            events_fired: self.events_fired.load(Ordering::Relaxed),
            hooks_executed: executed,
            hooks_failed: failed,
            avg_execution_time_ms: if executed > 0 { total_ms as f64 / executed as f64 } else { 0.0 },
            success_rate: if executed > 0 {
                (executed - failed) as f64 / executed as f64
            } else {
                1.0
            },
        }
    }
}

struct QueuedFire {
    payload: EventPayload,
}

/// Bounded worker pool that drains fired events and delivers them to every
/// matching registered hook. Matched hooks execute in parallel to each
/// other but serially per hook (FIFO per registration), implemented by
/// giving every hook name its own single-consumer sub-queue fed from the
/// shared dispatch loop.
pub struct HookDispatcher {
    tx: mpsc::Sender<QueuedFire>,
    stats: Arc<HookStats>,
    db: Arc<DieselDbContext>,
    callbacks: Arc<CallbackRegistry>,
}

impl HookDispatcher {
    /// Spawn the dispatcher's worker pool. `queue_size` bounds the fire
    /// channel (spec §6 `hooks.queue_size`); `workers` bounds concurrent
    /// hook deliveries across all registrations.
    pub fn spawn(db: Arc<DieselDbContext>, callbacks: Arc<CallbackRegistry>, queue_size: usize, workers: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let stats = Arc::new(HookStats::default());
        let dispatcher = Arc::new(Self {
            tx,
            stats: stats.clone(),
            db: db.clone(),
            callbacks: callbacks.clone(),
        });
        tokio::spawn(Self::run(rx, db, callbacks, stats, workers));
        dispatcher
    }

    async fn run(
        mut rx: mpsc::Receiver<QueuedFire>,
        db: Arc<DieselDbContext>,
        callbacks: Arc<CallbackRegistry>,
        stats: Arc<HookStats>,
        workers: usize,
    ) {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(workers.max(1)));
        // Per-hook-name serial queues, so delivery stays FIFO per registration
        // even though different hooks fire concurrently.
        let per_hook_locks: Arc<dashmap::DashMap<String, Arc<tokio::sync::Mutex<()>>>> = Arc::new(dashmap::DashMap::new());

        while let Some(fire) = rx.recv().await {
            let registrations = match HookRepository(&db).list().await {
                Ok(regs) => regs,
                Err(e) => {
                    tracing::error!(error = %e, "failed to load hook registrations");
                    continue;
                }
            };
            for registration in registrations {
                if !registration.event_filter.is_empty() && !registration.event_filter.contains(&fire.payload.event) {
                    continue;
                }
                let permit = semaphore.clone().acquire_owned().await.unwrap();
                let db = db.clone();
                let callbacks = callbacks.clone();
                let stats = stats.clone();
                let payload = fire.payload.clone();
                let lock = per_hook_locks
                    .entry(registration.name.clone())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                    .clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let _hook_guard = lock.lock().await; // serial per hook name
                    deliver_one(&db, &callbacks, &registration, &payload, &stats).await;
                });
            }
        }
    }

    /// Enqueue a payload and return immediately (spec §4.7 "Delivery").
    /// Blocks if the queue is full, per the configurable backpressure
    /// policy (spec §4.7 "Backpressure"); this dispatcher chooses "block"
    /// over "drop with a counter".
    pub async fn fire(&self, event: &str, data: EventData, metadata: EventMetadata) -> Result<(), HookError> {
        self.stats.events_fired.fetch_add(1, Ordering::Relaxed);
        let payload = EventPayload {
            event: event.to_string(),
            timestamp: Utc::now(),
            data,
            metadata,
        };
        self.tx
            .send(QueuedFire { payload })
            .await
            .map_err(|_| HookError::QueueFull)
    }

    pub fn stats(&self) -> HookStatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn register(&self, registration: HookRegistration) -> Result<(), HookError> {
        HookRepository(&self.db)
            .register(&registration)
            .await
            .map_err(|e| HookError::Delivery(e.to_string()))
    }
}

async fn deliver_one(
    db: &DieselDbContext,
    callbacks: &CallbackRegistry,
    registration: &HookRegistration,
    payload: &EventPayload,
    stats: &HookStats,
) {
    let start = Instant::now();
    let result = match registration.hook_type {
        HookType::Webhook => webhook::deliver(registration, payload).await,
        HookType::Callback => callback::deliver(callbacks, registration, payload).await,
        HookType::FileLog => file_log::deliver(registration, payload).await,
    };
    let elapsed_ms = start.elapsed().as_millis() as u64;
    stats.hooks_executed.fetch_add(1, Ordering::Relaxed);
    stats.total_execution_ms.fetch_add(elapsed_ms, Ordering::Relaxed);

    let (success, response_or_error) = match &result {
        Ok(resp) => (true, resp.clone()),
        Err(e) => {
            stats.hooks_failed.fetch_add(1, Ordering::Relaxed);
            (false, Some(e.to_string()))
        }
    };

    let execution = HookExecution {
        hook_name: registration.name.clone(),
        event: payload.event.clone(),
        object_key: payload.data.key.clone(),
        success,
        execution_time_ms: elapsed_ms,
        response_or_error,
        timestamp: Utc::now(),
    };
    if let Err(e) = HookRepository(db).record_execution(&execution).await {
        tracing::warn!(error = %e, hook = %registration.name, "failed to record hook execution");
    }
}

pub fn pii_metadata(user: Option<String>, ip: Option<String>) -> EventMetadata {
    EventMetadata { user, ip }
}

pub fn key_only(key: impl Into<String>) -> EventData {
    EventData {
        key: Some(key.into()),
        ..Default::default()
    }
}
