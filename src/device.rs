use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::debounce::BatchHandler;
use crate::discovery::RecordSink;
use crate::gateway::CommandGateway;
use crate::store::CapabilityStore;
use crate::translator::{CapabilitySet, CapabilityWrite, Translator};
use crate::types::{
    CapabilityChanges, CapabilitySnapshot, DataPoint, DeviceClass, DeviceRecord, DeviceSettings,
};
use crate::{Error, Result};

/// One cloud device bound to its hub-side capability store.
pub struct DeviceBinding<S: CapabilityStore> {
    device_id: String,
    translator: Mutex<Translator>,
    store: Arc<S>,
    gateway: CommandGateway,
}

impl<S: CapabilityStore> DeviceBinding<S> {
    /// Pick a translator for `record`, expose its capabilities in `store`
    /// and apply the record's current status.
    pub async fn new(
        record: &DeviceRecord,
        settings: &DeviceSettings,
        store: Arc<S>,
        gateway: CommandGateway,
    ) -> Result<Self> {
        let translator = Translator::for_device(record, settings)?;
        info!(device_id = %record.id, class = ?translator.class(), "binding device");
        let binding = Self {
            device_id: record.id.clone(),
            translator: Mutex::new(translator),
            store,
            gateway,
        };
        binding.apply_record(record).await?;
        Ok(binding)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn class(&self) -> DeviceClass {
        self.translator.lock().await.class()
    }

    pub async fn capabilities(&self) -> CapabilitySet {
        self.translator.lock().await.capabilities().clone()
    }

    /// Merge capabilities persisted by the hub from an earlier run.
    pub async fn restore_capabilities(&self, persisted: &CapabilitySet) -> Result<()> {
        let mut translator = self.translator.lock().await;
        translator.restore_capabilities(persisted);
        self.sync_capabilities(translator.capabilities()).await
    }

    /// Re-apply a full discovery record: reconfigure, then online state, then status.
    pub async fn apply_record(&self, record: &DeviceRecord) -> Result<()> {
        if record.id != self.device_id {
            return Err(Error::Config(format!(
                "record {} does not belong to device {}",
                record.id, self.device_id
            )));
        }
        {
            let mut translator = self.translator.lock().await;
            translator.configure(record);
            self.sync_capabilities(translator.capabilities()).await?;
        }
        self.set_online(record.online).await?;
        self.apply_status(&record.status).await
    }

    /// Apply a status array as reported by the cloud.
    pub async fn apply_status(&self, status: &[DataPoint]) -> Result<()> {
        let implies_online = self.translator.lock().await.implies_online();
        if implies_online && !status.is_empty() {
            self.set_online(true).await?;
        }

        let mut translator = self.translator.lock().await;
        let current = self.snapshot(translator.capabilities()).await;
        let writes = translator.apply_inbound(status, &current);
        self.sync_capabilities(translator.capabilities()).await?;
        drop(translator);
        self.write_all(writes).await
    }

    /// Record an online/offline report. Only transitions reach the store.
    pub async fn set_online(&self, online: bool) -> Result<()> {
        let mut translator = self.translator.lock().await;
        let current = self.snapshot(translator.capabilities()).await;
        let Some(transition) = translator.observe_online(online, &current) else {
            return Ok(());
        };
        drop(translator);

        info!(device_id = %self.device_id, online, "device availability changed");
        self.write_all(transition.writes).await?;
        self.store.set_available(transition.online).await
    }

    /// Reset the cumulative energy meter to `initial_kwh`, as when the
    /// `initial_meter_power` setting changes.
    pub async fn reset_meter(&self, initial_kwh: f64) -> Result<()> {
        let mut translator = self.translator.lock().await;
        let writes = translator.reset_meter(initial_kwh);
        self.sync_capabilities(translator.capabilities()).await?;
        drop(translator);
        self.write_all(writes).await
    }

    /// Translate and send a batch of local edits, then store them.
    pub async fn handle_changes(&self, changes: CapabilityChanges) -> Result<()> {
        let (commands, released) = {
            let mut translator = self.translator.lock().await;
            let current = self.snapshot(translator.capabilities()).await;
            let commands = translator.build_outbound(&changes, &current);
            (commands, translator.released_buttons(&changes))
        };
        if commands.is_empty() {
            debug!(device_id = %self.device_id, ?changes, "no commands for changes");
        } else {
            self.gateway.send(&self.device_id, &commands).await?;
        }

        for (capability, value) in changes {
            if self.store.has_capability(&capability).await {
                self.store.set_value(&capability, value).await?;
            }
        }
        if commands.is_empty() {
            return Ok(());
        }
        self.write_all(released).await
    }

    async fn snapshot(&self, capabilities: &CapabilitySet) -> CapabilitySnapshot {
        let mut snapshot = CapabilitySnapshot::new();
        for capability in capabilities.iter() {
            if let Some(value) = self.store.value(capability).await {
                snapshot.insert(capability.to_string(), value);
            }
        }
        snapshot
    }

    async fn sync_capabilities(&self, capabilities: &CapabilitySet) -> Result<()> {
        for capability in capabilities.iter() {
            if !self.store.has_capability(capability).await {
                debug!(device_id = %self.device_id, capability, "adding capability");
                self.store.add_capability(capability).await?;
            }
        }
        Ok(())
    }

    /// Writes are applied in order so the last value for a capability wins.
    /// A failed write is logged and does not stop the rest.
    async fn write_all(&self, writes: Vec<CapabilityWrite>) -> Result<()> {
        let mut first_error = None;
        for CapabilityWrite { capability, value } in writes {
            if let Err(e) = self.store.set_value(&capability, value).await {
                warn!(device_id = %self.device_id, %capability, error = %e, "capability write failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl<S: CapabilityStore> BatchHandler for DeviceBinding<S> {
    async fn handle_batch(&self, device_id: &str, changes: CapabilityChanges) -> Result<()> {
        if device_id != self.device_id {
            return Err(Error::Command {
                device_id: device_id.to_string(),
                message: format!("batch routed to binding for {}", self.device_id),
            });
        }
        self.handle_changes(changes).await
    }
}

#[async_trait]
impl<S: CapabilityStore> RecordSink for DeviceBinding<S> {
    async fn apply_discovered(&self, record: &DeviceRecord) -> Result<()> {
        self.apply_record(record).await
    }
}
