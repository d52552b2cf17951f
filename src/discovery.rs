use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::diff::status_events;
use crate::protocol::{
    missing_devices_error, parse_devices, response_code, response_message, NAMESPACE_DISCOVERY,
};
use crate::session::SessionManager;
use crate::types::{DeviceRecord, Event};
use crate::{Error, Result};

pub(crate) type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;

/// Something bound to one device that wants its record after each discovery.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn apply_discovered(&self, record: &DeviceRecord) -> Result<()>;
}

/// Last-known-good device list, refreshed from the cloud.
///
/// Discovery never fails towards its caller: on any error the previous list is
/// served unchanged.
pub struct DeviceDiscoveryCache {
    session: Arc<SessionManager>,
    devices: RwLock<Vec<DeviceRecord>>,
    refreshed_at: Mutex<Option<Instant>>,
    lookup_max_age: Option<Duration>,
    callbacks: Vec<EventCallback>,
    sinks: Mutex<HashMap<String, Weak<dyn RecordSink>>>,
}

impl DeviceDiscoveryCache {
    pub(crate) fn new(
        session: Arc<SessionManager>,
        callbacks: Vec<EventCallback>,
        lookup_max_age: Option<Duration>,
    ) -> Self {
        Self {
            session,
            devices: RwLock::new(Vec::new()),
            refreshed_at: Mutex::new(None),
            lookup_max_age,
            callbacks,
            sinks: Mutex::new(HashMap::new()),
        }
    }

    /// Route future records for `device_id` to `sink`, replacing any earlier
    /// registration. Dropped sinks are forgotten on the next discovery.
    pub fn register(&self, device_id: &str, sink: Weak<dyn RecordSink>) {
        self.sinks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(device_id.to_string(), sink);
    }

    pub async fn discover(&self) -> Vec<DeviceRecord> {
        let devices = match self.fetch().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "discovery failed, serving cached devices");
                return self.cached();
            }
        };

        let previous = {
            let mut cache = self.devices.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *cache, devices.clone())
        };
        *self.refreshed_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        debug!(count = devices.len(), "discovered devices");

        let mut events: Vec<Event> = devices
            .iter()
            .map(|device| Event::DeviceUpdated {
                device: device.clone(),
            })
            .collect();
        events.extend(status_events(&previous, &devices));
        for event in &events {
            for cb in &self.callbacks {
                cb(event);
            }
        }
        self.feed_sinks(&devices).await;
        devices
    }

    async fn feed_sinks(&self, devices: &[DeviceRecord]) {
        let targets: Vec<(Arc<dyn RecordSink>, &DeviceRecord)> = {
            let mut sinks = self.sinks.lock().unwrap_or_else(|e| e.into_inner());
            sinks.retain(|_, sink| sink.strong_count() > 0);
            devices
                .iter()
                .filter_map(|d| sinks.get(&d.id).and_then(Weak::upgrade).map(|s| (s, d)))
                .collect()
        };
        for (sink, record) in targets {
            if let Err(e) = sink.apply_discovered(record).await {
                warn!(device_id = %record.id, error = %e, "failed to apply discovered record");
            }
        }
    }

    /// Cache contents without touching the network.
    pub fn cached(&self) -> Vec<DeviceRecord> {
        self.devices.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn cached_by_id(&self, id: &str) -> Option<DeviceRecord> {
        self.devices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    pub async fn list_all(&self) -> Vec<DeviceRecord> {
        self.lookup_source().await
    }

    pub async fn list_by_type(&self, dev_type: &str) -> Vec<DeviceRecord> {
        self.lookup_source()
            .await
            .into_iter()
            .filter(|d| d.dev_type == dev_type)
            .collect()
    }

    pub async fn get_by_id(&self, id: &str) -> Option<DeviceRecord> {
        self.lookup_source().await.into_iter().find(|d| d.id == id)
    }

    /// Lookups refresh from the cloud unless a max age is configured and the cache is younger.
    async fn lookup_source(&self) -> Vec<DeviceRecord> {
        if let Some(max_age) = self.lookup_max_age {
            let fresh = self
                .refreshed_at
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_some_and(|at| at.elapsed() < max_age);
            if fresh {
                return self.cached();
            }
        }
        self.discover().await
    }

    async fn fetch(&self) -> Result<Vec<DeviceRecord>> {
        let body = self
            .session
            .request("Discovery", NAMESPACE_DISCOVERY, None, json!({}))
            .await
            .map_err(|e| Error::Discovery(e.to_string()))?;
        if let Some(code) = response_code(&body)
            && code != "SUCCESS"
        {
            return Err(Error::Discovery(response_message(&body)));
        }
        parse_devices(&body).ok_or_else(missing_devices_error)
    }
}
