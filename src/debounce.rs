use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

use crate::types::{CapabilityChanges, CapabilityValue};
use crate::{Error, Result};

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(1000);

/// Receives one coalesced batch of capability edits for a device.
#[async_trait]
pub trait BatchHandler: Send + Sync + 'static {
    async fn handle_batch(&self, device_id: &str, changes: CapabilityChanges) -> Result<()>;
}

struct PendingBatch {
    generation: u64,
    changes: CapabilityChanges,
    waiters: Vec<oneshot::Sender<Result<()>>>,
}

/// Per-device coalescing buffer for locally originated capability writes.
///
/// The first edit for a device opens a window; every edit arriving before it
/// closes joins the same batch, later values overwriting earlier ones for the
/// same capability. Devices never share a batch.
pub struct Debouncer<H: BatchHandler> {
    window: Duration,
    handler: Arc<H>,
    pending: Arc<Mutex<HashMap<String, PendingBatch>>>,
    generations: Arc<AtomicU64>,
}

impl<H: BatchHandler> Clone for Debouncer<H> {
    fn clone(&self) -> Self {
        Self {
            window: self.window,
            handler: self.handler.clone(),
            pending: self.pending.clone(),
            generations: self.generations.clone(),
        }
    }
}

impl<H: BatchHandler> Debouncer<H> {
    pub fn new(window: Duration, handler: Arc<H>) -> Self {
        Self {
            window,
            handler,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Queue one edit. The returned handle resolves with the outcome of the batch it joined.
    pub fn push(
        &self,
        device_id: &str,
        capability: &str,
        value: impl Into<CapabilityValue>,
    ) -> PendingWrite {
        let (tx, rx) = oneshot::channel();
        let opened = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            match pending.get_mut(device_id) {
                Some(batch) => {
                    batch.changes.insert(capability.to_string(), value.into());
                    batch.waiters.push(tx);
                    None
                }
                None => {
                    let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                    let mut changes = CapabilityChanges::new();
                    changes.insert(capability.to_string(), value.into());
                    pending.insert(
                        device_id.to_string(),
                        PendingBatch {
                            generation,
                            changes,
                            waiters: vec![tx],
                        },
                    );
                    Some(generation)
                }
            }
        };

        if let Some(generation) = opened {
            let this = self.clone();
            let id = device_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(this.window).await;
                // Outcome is delivered to the waiters.
                let _ = this.dispatch(&id, Some(generation)).await;
            });
        }

        PendingWrite {
            device_id: device_id.to_string(),
            rx,
        }
    }

    /// Dispatch whatever is pending for `device_id` now instead of at window end.
    pub async fn flush(&self, device_id: &str) -> Result<()> {
        self.dispatch(device_id, None).await
    }

    pub fn has_pending(&self, device_id: &str) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(device_id)
    }

    async fn dispatch(&self, device_id: &str, generation: Option<u64>) -> Result<()> {
        let batch = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            match pending.get(device_id) {
                Some(b) if generation.is_none_or(|g| g == b.generation) => pending.remove(device_id),
                _ => None,
            }
        };
        let Some(batch) = batch else {
            return Ok(());
        };

        debug!(device_id, changes = ?batch.changes, "flushing coalesced capability changes");
        let result = self.handler.handle_batch(device_id, batch.changes).await;
        for waiter in batch.waiters {
            let _ = waiter.send(copy_outcome(device_id, &result));
        }
        result
    }
}

fn copy_outcome(device_id: &str, result: &Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(Error::Command { device_id, message }) => Err(Error::Command {
            device_id: device_id.clone(),
            message: message.clone(),
        }),
        Err(e) => Err(Error::Command {
            device_id: device_id.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Handle for one queued edit.
pub struct PendingWrite {
    device_id: String,
    rx: oneshot::Receiver<Result<()>>,
}

impl PendingWrite {
    pub async fn wait(self) -> Result<()> {
        let PendingWrite { device_id, rx } = self;
        rx.await.unwrap_or_else(|_| {
            Err(Error::Command {
                device_id,
                message: "listener dropped before the batch was sent".into(),
            })
        })
    }
}
