use super::{CapabilitySet, Inbound, Outbound};
use crate::convert::{dp_bool, dp_number, to_display, to_raw};
use crate::types::{CapabilityChanges, CapabilityValue, Command, DataPoint};

#[derive(Debug, Clone)]
pub struct Thermostat {
    scale: u32,
}

impl Thermostat {
    pub(crate) fn new(scale: u32) -> Self {
        Self { scale }
    }

    pub(crate) fn configure(&mut self, caps: &mut CapabilitySet) {
        caps.extend(["onoff", "target_temperature", "measure_temperature"]);
    }

    pub(crate) fn apply(&mut self, status: &[DataPoint], inbound: &mut Inbound<'_>) {
        for dp in status {
            match dp.code.as_str() {
                "switch" => inbound.set("onoff", dp_bool(&dp.value)),
                "temp_set" => {
                    if let Some(raw) = dp_number(&dp.value) {
                        inbound.set("target_temperature", to_display(raw, self.scale));
                    }
                }
                "temp_current" => {
                    if let Some(raw) = dp_number(&dp.value) {
                        inbound.set("measure_temperature", to_display(raw, self.scale));
                    }
                }
                "battery_percentage" => {
                    let pct = dp_number(&dp.value).unwrap_or(0.0);
                    inbound.materialize("measure_battery", pct);
                }
                "battery_state" => {
                    let level = match dp.value.as_str().map(str::to_ascii_lowercase).as_deref() {
                        Some("low") => 10.0,
                        Some("middle") => 50.0,
                        Some("high") => 100.0,
                        _ => 0.0,
                    };
                    inbound.materialize("measure_battery", level);
                }
                _ => {}
            }
        }
    }

    pub(crate) fn build(&self, changes: &CapabilityChanges, outbound: &mut Outbound) {
        if let Some(target) = changes
            .get("target_temperature")
            .and_then(CapabilityValue::as_f64)
        {
            outbound.push(Command::new("temp_set", to_raw(target, self.scale)));
        }
        if let Some(on) = changes.get("onoff") {
            outbound.push(Command::new("switch", on.as_bool()));
        }
    }
}
