use tracing::trace;

use super::{ALARM_OFFLINE, CapabilitySet, Inbound, Outbound};
use crate::convert::{dp_bool, dp_number};
use crate::types::{CapabilityChanges, Command, DataPoint};

/// Battery charger with a storage (maintenance) mode.
#[derive(Debug, Clone, Default)]
pub struct Charger;

impl Charger {
    pub(crate) fn configure(&mut self, caps: &mut CapabilitySet) {
        caps.extend([
            "measure_battery",
            "battery_charging",
            "measure_charge_current",
            "measure_charge_voltage",
            "storage_button",
            "measure_temperature",
            "onoff",
            ALARM_OFFLINE,
        ]);
    }

    pub(crate) fn apply(&mut self, status: &[DataPoint], inbound: &mut Inbound<'_>) {
        for dp in status {
            let number = || dp_number(&dp.value).unwrap_or(0.0);
            match dp.code.as_str() {
                "charge_switch" => inbound.set("onoff", dp_bool(&dp.value)),
                "battery_percentage" => inbound.set("measure_battery", number()),
                "charge_current" => {
                    let milliamps = number();
                    inbound.set("measure_charge_current", milliamps);
                    if inbound.has("battery_charging") {
                        inbound.set("battery_charging", milliamps > 0.0);
                    }
                }
                "charge_voltage" => inbound.set("measure_charge_voltage", number() / 1000.0),
                "temp_current" => {
                    // Zero means the sensor has no reading yet.
                    let celsius = number();
                    if celsius == 0.0 {
                        trace!("skipping zero temperature report");
                    } else {
                        inbound.set("measure_temperature", celsius);
                    }
                }
                "storage_switch" => inbound.set("storage_button", dp_bool(&dp.value)),
                _ => {}
            }
        }
    }

    pub(crate) fn build(&self, changes: &CapabilityChanges, outbound: &mut Outbound) {
        if let Some(on) = changes.get("onoff") {
            outbound.push(Command::new("charge_switch", on.as_bool()));
        }
        if let Some(storage) = changes.get("storage_button") {
            outbound.push(Command::new("storage_switch", storage.as_bool()));
        }
    }
}
