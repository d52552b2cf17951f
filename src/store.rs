use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::types::{CapabilitySnapshot, CapabilityValue};
use crate::{Error, Result};

/// The hub-side capability store of one device.
#[async_trait]
pub trait CapabilityStore: Send + Sync + 'static {
    async fn value(&self, capability: &str) -> Option<CapabilityValue>;

    async fn set_value(&self, capability: &str, value: CapabilityValue) -> Result<()>;

    async fn has_capability(&self, capability: &str) -> bool;

    /// Adding a capability that already exists is a no-op.
    async fn add_capability(&self, capability: &str) -> Result<()>;

    async fn set_available(&self, available: bool) -> Result<()>;
}

#[derive(Default)]
struct MemoryState {
    capabilities: BTreeMap<String, Option<CapabilityValue>>,
    available: Option<bool>,
    writes: usize,
}

/// In-process store, useful for tests and headless bridges.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities<I, S>(capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::default();
        {
            let mut state = store.lock();
            for cap in capabilities {
                state.capabilities.insert(cap.into(), None);
            }
        }
        store
    }

    pub fn snapshot(&self) -> CapabilitySnapshot {
        self.lock()
            .capabilities
            .iter()
            .filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
            .collect()
    }

    pub fn capabilities(&self) -> Vec<String> {
        self.lock().capabilities.keys().cloned().collect()
    }

    pub fn get(&self, capability: &str) -> Option<CapabilityValue> {
        self.lock().capabilities.get(capability).cloned().flatten()
    }

    pub fn available(&self) -> Option<bool> {
        self.lock().available
    }

    /// Number of successful value writes so far.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CapabilityStore for MemoryStore {
    async fn value(&self, capability: &str) -> Option<CapabilityValue> {
        self.get(capability)
    }

    async fn set_value(&self, capability: &str, value: CapabilityValue) -> Result<()> {
        let mut state = self.lock();
        match state.capabilities.get_mut(capability) {
            Some(slot) => {
                *slot = Some(value);
                state.writes += 1;
                Ok(())
            }
            None => Err(Error::UnknownCapability(capability.to_string())),
        }
    }

    async fn has_capability(&self, capability: &str) -> bool {
        self.lock().capabilities.contains_key(capability)
    }

    async fn add_capability(&self, capability: &str) -> Result<()> {
        self.lock()
            .capabilities
            .entry(capability.to_string())
            .or_insert(None);
        Ok(())
    }

    async fn set_available(&self, available: bool) -> Result<()> {
        self.lock().available = Some(available);
        Ok(())
    }
}
