//! Per-class mapping between vendor data points and hub capabilities.
//!
//! A [`Translator`] is selected once per device from its discovery record and
//! then owns everything class specific: which capabilities exist, how inbound
//! status arrays become capability writes, and how a coalesced batch of local
//! edits becomes the smallest list of outbound commands.

mod charger;
mod dehumidifier;
mod feeder;
mod light;
mod socket;
mod thermostat;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{
    CapabilityChanges, CapabilitySnapshot, CapabilityValue, Command, DataPoint, DeviceClass,
    DeviceRecord, DeviceSettings,
};
use crate::{Error, Result};

pub use charger::Charger;
pub use dehumidifier::Dehumidifier;
pub use feeder::Feeder;
pub use light::Light;
pub use socket::Socket;
pub use thermostat::Thermostat;

pub const ALARM_OFFLINE: &str = "alarm_device_offline";

/// Capabilities a device exposes. Only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<String>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the capability was not present before.
    pub fn insert(&mut self, capability: impl Into<String>) -> bool {
        self.0.insert(capability.into())
    }

    pub fn contains(&self, capability: &str) -> bool {
        self.0.contains(capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> Extend<S> for CapabilitySet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for cap in iter {
            self.0.insert(cap.into());
        }
    }
}

impl<S: Into<String>> FromIterator<S> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

/// One value to write into the capability store.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityWrite {
    pub capability: String,
    pub value: CapabilityValue,
}

/// Result of an online/offline report that differs from the last known state.
#[derive(Debug, Clone, PartialEq)]
pub struct OnlineTransition {
    pub online: bool,
    pub writes: Vec<CapabilityWrite>,
}

/// Collects capability writes for one inbound status array.
pub(crate) struct Inbound<'a> {
    capabilities: &'a mut CapabilitySet,
    current: &'a CapabilitySnapshot,
    writes: Vec<CapabilityWrite>,
}

impl<'a> Inbound<'a> {
    fn new(capabilities: &'a mut CapabilitySet, current: &'a CapabilitySnapshot) -> Self {
        Self {
            capabilities,
            current,
            writes: Vec::new(),
        }
    }

    /// Write to a capability the device already exposes; dropped otherwise.
    pub(crate) fn set(&mut self, capability: &str, value: impl Into<CapabilityValue>) {
        if self.capabilities.contains(capability) {
            self.push(capability, value.into());
        } else {
            debug!(capability, "no such capability, skipping write");
        }
    }

    /// Write, adding the capability first if this is its first report.
    pub(crate) fn materialize(&mut self, capability: &str, value: impl Into<CapabilityValue>) {
        if self.capabilities.insert(capability) {
            debug!(capability, "capability added");
        }
        self.push(capability, value.into());
    }

    /// The value this batch last wrote, else the stored one.
    pub(crate) fn latest(&self, capability: &str) -> Option<&CapabilityValue> {
        self.writes
            .iter()
            .rev()
            .find(|w| w.capability == capability)
            .map(|w| &w.value)
            .or_else(|| self.current.get(capability))
    }

    pub(crate) fn has(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    fn push(&mut self, capability: &str, value: CapabilityValue) {
        self.writes.push(CapabilityWrite {
            capability: capability.to_string(),
            value,
        });
    }

    fn finish(self) -> Vec<CapabilityWrite> {
        self.writes
    }
}

/// Collects commands for one outbound batch, one per vendor code.
#[derive(Default)]
pub(crate) struct Outbound {
    commands: Vec<Command>,
}

impl Outbound {
    pub(crate) fn push(&mut self, command: Command) {
        match self.commands.iter_mut().find(|c| c.code == command.code) {
            Some(existing) => *existing = command,
            None => self.commands.push(command),
        }
    }

    fn finish(self) -> Vec<Command> {
        self.commands
    }
}

/// A changed value if the batch has one, else the stored value.
pub(crate) fn pick<'a>(
    changes: &'a CapabilityChanges,
    current: &'a CapabilitySnapshot,
    capability: &str,
) -> Option<&'a CapabilityValue> {
    changes.get(capability).or_else(|| current.get(capability))
}

#[derive(Debug, Clone)]
enum Variant {
    Socket(Socket),
    Light(Light),
    Thermostat(Thermostat),
    Dehumidifier(Dehumidifier),
    Feeder(Feeder),
    Charger(Charger),
}

/// Translator for one device, tagged by device class.
#[derive(Debug, Clone)]
pub struct Translator {
    device_id: String,
    variant: Variant,
    capabilities: CapabilitySet,
    last_online: Option<bool>,
}

impl Translator {
    /// Select a translator by category and configure it from `record`.
    pub fn for_device(record: &DeviceRecord, settings: &DeviceSettings) -> Result<Self> {
        let class = DeviceClass::detect(record).ok_or_else(|| Error::UnsupportedDevice {
            device_id: record.id.clone(),
            kind: if record.category.is_empty() {
                record.dev_type.clone()
            } else {
                record.category.clone()
            },
        })?;
        let scale = settings.scale.unwrap_or_else(|| class.default_scale());
        let variant = match class {
            DeviceClass::Socket => Variant::Socket(Socket::new(settings.initial_meter_power)),
            DeviceClass::Light => Variant::Light(Light::default()),
            DeviceClass::Thermostat => Variant::Thermostat(Thermostat::new(scale)),
            DeviceClass::Dehumidifier => Variant::Dehumidifier(Dehumidifier::default()),
            DeviceClass::Feeder => Variant::Feeder(Feeder::default()),
            DeviceClass::Charger => Variant::Charger(Charger),
        };
        let mut translator = Self {
            device_id: record.id.clone(),
            variant,
            capabilities: CapabilitySet::new(),
            last_online: None,
        };
        translator.configure(record);
        Ok(translator)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn class(&self) -> DeviceClass {
        match self.variant {
            Variant::Socket(_) => DeviceClass::Socket,
            Variant::Light(_) => DeviceClass::Light,
            Variant::Thermostat(_) => DeviceClass::Thermostat,
            Variant::Dehumidifier(_) => DeviceClass::Dehumidifier,
            Variant::Feeder(_) => DeviceClass::Feeder,
            Variant::Charger(_) => DeviceClass::Charger,
        }
    }

    /// Re-derive structural decisions (switch cardinality, ranges, DP codes)
    /// from a fresh discovery record. Never removes capabilities.
    pub fn configure(&mut self, record: &DeviceRecord) {
        let caps = &mut self.capabilities;
        match &mut self.variant {
            Variant::Socket(t) => t.configure(&record.status, caps),
            Variant::Light(t) => t.configure(&record.category, &record.status, caps),
            Variant::Thermostat(t) => t.configure(caps),
            Variant::Dehumidifier(t) => t.configure(caps),
            Variant::Feeder(t) => t.configure(caps),
            Variant::Charger(t) => t.configure(caps),
        }
        debug!(device_id = %self.device_id, capabilities = ?self.capabilities, "translator configured");
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Merge capabilities persisted from an earlier run.
    pub fn restore_capabilities(&mut self, persisted: &CapabilitySet) {
        self.capabilities.extend(persisted.iter());
    }

    /// Classes that treat every status report as proof of being online.
    pub fn implies_online(&self) -> bool {
        matches!(self.variant, Variant::Feeder(_) | Variant::Charger(_))
    }

    /// Map a status array to capability writes, in DP order.
    pub fn apply_inbound(
        &mut self,
        status: &[DataPoint],
        current: &CapabilitySnapshot,
    ) -> Vec<CapabilityWrite> {
        let mut inbound = Inbound::new(&mut self.capabilities, current);
        match &mut self.variant {
            Variant::Socket(t) => t.apply(status, &mut inbound),
            Variant::Light(t) => t.apply(status, &mut inbound),
            Variant::Thermostat(t) => t.apply(status, &mut inbound),
            Variant::Dehumidifier(t) => t.apply(status, &mut inbound),
            Variant::Feeder(t) => t.apply(status, &mut inbound),
            Variant::Charger(t) => t.apply(status, &mut inbound),
        }
        inbound.finish()
    }

    /// Turn a coalesced batch of edits into commands.
    pub fn build_outbound(
        &mut self,
        changes: &CapabilityChanges,
        current: &CapabilitySnapshot,
    ) -> Vec<Command> {
        let mut outbound = Outbound::default();
        match &mut self.variant {
            Variant::Socket(t) => t.build(changes, &mut outbound),
            Variant::Light(t) => t.build(changes, current, &mut outbound),
            Variant::Thermostat(t) => t.build(changes, &mut outbound),
            Variant::Dehumidifier(t) => t.build(changes, &mut outbound),
            Variant::Feeder(t) => t.build(changes, &mut outbound),
            Variant::Charger(t) => t.build(changes, &mut outbound),
        }
        outbound.finish()
    }

    /// Writes that release momentary buttons once `changes` were delivered.
    pub fn released_buttons(&self, changes: &CapabilityChanges) -> Vec<CapabilityWrite> {
        match &self.variant {
            Variant::Feeder(t) => t.released(changes),
            _ => Vec::new(),
        }
    }

    /// Record an online report. Returns `None` when nothing changed.
    ///
    /// The first report is compared against the stored offline alarm, so a
    /// restart does not re-announce a state the hub already shows.
    pub fn observe_online(
        &mut self,
        online: bool,
        current: &CapabilitySnapshot,
    ) -> Option<OnlineTransition> {
        let known = self.last_online.or_else(|| {
            current
                .get(ALARM_OFFLINE)
                .map(|offline| !offline.as_bool())
        });
        self.last_online = Some(online);
        if known == Some(online) {
            return None;
        }
        let mut writes = Vec::new();
        if self.capabilities.contains(ALARM_OFFLINE) {
            writes.push(CapabilityWrite {
                capability: ALARM_OFFLINE.to_string(),
                value: CapabilityValue::Bool(!online),
            });
        }
        Some(OnlineTransition { online, writes })
    }

    /// Writes that reset the cumulative energy meter to `initial_kwh`.
    ///
    /// Only sockets carry a meter; other classes return nothing.
    pub fn reset_meter(&mut self, initial_kwh: f64) -> Vec<CapabilityWrite> {
        match &mut self.variant {
            Variant::Socket(t) => {
                t.set_initial_meter(initial_kwh);
                self.capabilities.insert(socket::METER_POWER);
                vec![CapabilityWrite {
                    capability: socket::METER_POWER.to_string(),
                    value: CapabilityValue::Number(initial_kwh),
                }]
            }
            _ => Vec::new(),
        }
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::testing::*;
    use super::*;

    #[test]
    fn unknown_category_is_rejected() {
        let record = record("xyz", "vacuum", &[]);
        match Translator::for_device(&record, &DeviceSettings::default()) {
            Err(Error::UnsupportedDevice { device_id, kind }) => {
                assert_eq!(device_id, "dev-1");
                assert_eq!(kind, "xyz");
            }
            other => panic!("expected unsupported device, got {other:?}"),
        }
    }

    #[test]
    fn online_transitions_are_edge_triggered() {
        let record = record("cz", "switch", &[("switch", json!(true))]);
        let mut t = Translator::for_device(&record, &DeviceSettings::default()).unwrap();
        let empty = CapabilitySnapshot::new();

        let first = t.observe_online(false, &empty).unwrap();
        assert!(!first.online);
        assert_eq!(value_of(&first.writes, ALARM_OFFLINE), Some(&CapabilityValue::Bool(true)));
        assert!(t.observe_online(false, &empty).is_none());
        assert!(t.observe_online(true, &empty).is_some());
        assert!(t.observe_online(true, &empty).is_none());
    }

    #[test]
    fn first_online_report_matching_stored_alarm_is_quiet() {
        let record = record("cz", "switch", &[("switch", json!(true))]);
        let mut t = Translator::for_device(&record, &DeviceSettings::default()).unwrap();
        let mut current = CapabilitySnapshot::new();
        current.insert(ALARM_OFFLINE.into(), CapabilityValue::Bool(false));
        assert!(t.observe_online(true, &current).is_none());
    }

    #[test]
    fn classes_without_offline_alarm_only_report_availability() {
        let record = record("wk", "thermostat", &[]);
        let mut t = Translator::for_device(&record, &DeviceSettings::default()).unwrap();
        let transition = t.observe_online(false, &CapabilitySnapshot::new()).unwrap();
        assert!(transition.writes.is_empty());
    }

    #[test]
    fn capabilities_never_shrink_on_reconfigure() {
        let rich = record(
            "cz",
            "switch",
            &[("switch", json!(true)), ("cur_voltage", json!(2301))],
        );
        let mut t = Translator::for_device(&rich, &DeviceSettings::default()).unwrap();
        t.apply_inbound(&rich.status, &CapabilitySnapshot::new());
        assert!(t.capabilities().contains("measure_voltage"));

        let bare = record("cz", "switch", &[("switch", json!(true))]);
        t.configure(&bare);
        assert!(t.capabilities().contains("measure_voltage"));
    }

    #[test]
    fn restored_capabilities_are_merged() {
        let record = record("cz", "switch", &[("switch", json!(true))]);
        let mut t = Translator::for_device(&record, &DeviceSettings::default()).unwrap();
        let persisted: CapabilitySet = ["meter_power"].into_iter().collect();
        t.restore_capabilities(&persisted);
        assert!(t.capabilities().contains("meter_power"));
        assert!(t.capabilities().contains("onoff"));
    }

    #[test]
    fn outbound_keeps_one_command_per_code() {
        let mut outbound = Outbound::default();
        outbound.push(Command::new("switch", true));
        outbound.push(Command::new("temp_set", 200));
        outbound.push(Command::new("switch", false));
        let commands = outbound.finish();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0], Command::new("switch", false));
    }
}
