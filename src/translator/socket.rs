use tracing::{debug, trace};

use super::{ALARM_OFFLINE, CapabilitySet, Inbound, Outbound};
use crate::convert::{dp_bool, dp_number};
use crate::types::{CapabilityChanges, CapabilityValue, Command, DataPoint};

pub(crate) const METER_POWER: &str = "meter_power";

/// `switch`, `switch_<n>` or `switch_usb<n>`.
fn is_switch_code(code: &str) -> bool {
    if code == "switch" {
        return true;
    }
    let Some(rest) = code.strip_prefix("switch_") else {
        return false;
    };
    let digits = rest.strip_prefix("usb").unwrap_or(rest);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Smart plugs and power strips, optionally with power metering.
#[derive(Debug, Clone, Default)]
pub struct Socket {
    /// Switch-family codes seen at the last configuration, in report order.
    switch_codes: Vec<String>,
    initial_meter_kwh: f64,
    /// Set once the first cumulative-energy delta has been swallowed.
    meter_primed: bool,
}

impl Socket {
    pub(crate) fn new(initial_meter_kwh: f64) -> Self {
        Self {
            initial_meter_kwh,
            ..Default::default()
        }
    }

    pub(crate) fn configure(&mut self, status: &[DataPoint], caps: &mut CapabilitySet) {
        self.switch_codes = status
            .iter()
            .filter(|dp| is_switch_code(&dp.code))
            .map(|dp| dp.code.clone())
            .collect();
        self.switch_codes.dedup();

        caps.insert(ALARM_OFFLINE);
        if self.is_multi() {
            for code in &self.switch_codes {
                caps.insert(format!("onoff.{code}"));
            }
        } else if !self.switch_codes.is_empty() {
            caps.insert("onoff");
        }
        if status.iter().any(|dp| dp.code == "cur_power") {
            caps.insert("measure_power");
        }
    }

    fn is_multi(&self) -> bool {
        self.switch_codes.len() > 1
    }

    fn capability_for(&self, code: &str) -> Option<String> {
        if !self.switch_codes.iter().any(|c| c == code) {
            return None;
        }
        if self.is_multi() {
            Some(format!("onoff.{code}"))
        } else {
            Some("onoff".to_string())
        }
    }

    pub(crate) fn set_initial_meter(&mut self, kwh: f64) {
        self.initial_meter_kwh = kwh;
    }

    pub(crate) fn apply(&mut self, status: &[DataPoint], inbound: &mut Inbound<'_>) {
        for dp in status {
            if let Some(cap) = self.capability_for(&dp.code) {
                inbound.set(&cap, dp_bool(&dp.value));
                continue;
            }
            let Some(raw) = dp_number(&dp.value) else {
                trace!(code = %dp.code, "ignoring non-numeric socket data point");
                continue;
            };
            match dp.code.as_str() {
                "cur_power" => inbound.materialize("measure_power", raw / 10.0),
                "cur_voltage" => inbound.materialize("measure_voltage", raw / 10.0),
                "cur_current" => inbound.materialize("measure_current", raw / 1000.0),
                "add_ele" => self.accumulate(raw / 1000.0, inbound),
                _ => {}
            }
        }
    }

    /// Add an energy delta (kWh) to the running meter total.
    fn accumulate(&mut self, delta_kwh: f64, inbound: &mut Inbound<'_>) {
        if !self.meter_primed {
            self.meter_primed = true;
            debug!(delta_kwh, "ignoring first energy report after start");
            return;
        }
        if delta_kwh < 0.0 {
            debug!(delta_kwh, "ignoring negative energy delta");
            return;
        }
        let base = inbound
            .latest(METER_POWER)
            .and_then(CapabilityValue::as_f64)
            .unwrap_or(self.initial_meter_kwh);
        inbound.materialize(METER_POWER, base + delta_kwh);
    }

    pub(crate) fn build(&self, changes: &CapabilityChanges, outbound: &mut Outbound) {
        for (cap, value) in changes {
            let code = match cap.split_once('.') {
                Some(("onoff", code)) if self.is_multi() => code,
                None if cap == "onoff" && !self.is_multi() => match self.switch_codes.first() {
                    Some(code) => code.as_str(),
                    None => "switch",
                },
                _ => continue,
            };
            if self.switch_codes.iter().any(|c| c == code) || self.switch_codes.is_empty() {
                outbound.push(Command::new(code, value.as_bool()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::testing::*;
    use super::super::Translator;
    use crate::types::{CapabilitySnapshot, DeviceSettings};

    use super::*;

    fn socket(status: &[(&str, serde_json::Value)]) -> Translator {
        Translator::for_device(&record("cz", "switch", status), &DeviceSettings::default()).unwrap()
    }

    #[test]
    fn switch_family_codes() {
        assert!(is_switch_code("switch"));
        assert!(is_switch_code("switch_1"));
        assert!(is_switch_code("switch_usb2"));
        assert!(!is_switch_code("switch_led"));
        assert!(!is_switch_code("switch_"));
        assert!(!is_switch_code("child_lock"));
    }

    #[test]
    fn two_sub_switches_get_qualified_capabilities() {
        let status = [("switch_1", json!(true)), ("switch_2", json!(false))];
        let mut t = socket(&status);
        assert!(t.capabilities().contains("onoff.switch_1"));
        assert!(t.capabilities().contains("onoff.switch_2"));
        assert!(!t.capabilities().contains("onoff"));

        let writes = t.apply_inbound(&dps(&status), &CapabilitySnapshot::new());
        assert_eq!(value_of(&writes, "onoff.switch_1"), Some(&CapabilityValue::Bool(true)));
        assert_eq!(value_of(&writes, "onoff.switch_2"), Some(&CapabilityValue::Bool(false)));
        assert_eq!(value_of(&writes, "onoff"), None);
    }

    #[test]
    fn single_switch_gets_plain_onoff() {
        let status = [("switch_1", json!(true))];
        let mut t = socket(&status);
        assert!(t.capabilities().contains("onoff"));
        assert!(!t.capabilities().contains("onoff.switch_1"));

        let writes = t.apply_inbound(&dps(&status), &CapabilitySnapshot::new());
        assert_eq!(value_of(&writes, "onoff"), Some(&CapabilityValue::Bool(true)));

        let commands = t.build_outbound(
            &changes(&[("onoff", CapabilityValue::Bool(false))]),
            &CapabilitySnapshot::new(),
        );
        assert_eq!(commands, vec![Command::new("switch_1", false)]);
    }

    #[test]
    fn multi_switch_outbound_uses_sub_codes() {
        let status = [("switch_1", json!(true)), ("switch_2", json!(false))];
        let mut t = socket(&status);
        let commands = t.build_outbound(
            &changes(&[
                ("onoff.switch_2", CapabilityValue::Bool(true)),
                ("onoff.switch_9", CapabilityValue::Bool(true)),
                ("onoff", CapabilityValue::Bool(true)),
            ]),
            &CapabilitySnapshot::new(),
        );
        assert_eq!(commands, vec![Command::new("switch_2", true)]);
    }

    #[test]
    fn electrical_measurements_are_scaled_and_added_lazily() {
        let mut t = socket(&[("switch", json!(true))]);
        assert!(!t.capabilities().contains("measure_voltage"));
        let writes = t.apply_inbound(
            &dps(&[
                ("cur_power", json!(125)),
                ("cur_voltage", json!(2304)),
                ("cur_current", json!(540)),
            ]),
            &CapabilitySnapshot::new(),
        );
        assert_eq!(value_of(&writes, "measure_power"), Some(&CapabilityValue::Number(12.5)));
        assert_eq!(value_of(&writes, "measure_voltage"), Some(&CapabilityValue::Number(230.4)));
        assert_eq!(value_of(&writes, "measure_current"), Some(&CapabilityValue::Number(0.54)));
        assert!(t.capabilities().contains("measure_current"));
    }

    #[test]
    fn first_energy_delta_is_suppressed() {
        let mut t = socket(&[("switch", json!(true))]);
        let mut current = CapabilitySnapshot::new();

        let writes = t.apply_inbound(&dps(&[("add_ele", json!(500))]), &current);
        assert!(writes.is_empty());
        assert!(!t.capabilities().contains(METER_POWER));

        let writes = t.apply_inbound(&dps(&[("add_ele", json!(300))]), &current);
        let total = value_of(&writes, METER_POWER).and_then(CapabilityValue::as_f64).unwrap();
        assert!((total - 0.3).abs() < 1e-9);

        current.insert(METER_POWER.into(), CapabilityValue::Number(total));
        let writes = t.apply_inbound(&dps(&[("add_ele", json!(200))]), &current);
        let total = value_of(&writes, METER_POWER).and_then(CapabilityValue::as_f64).unwrap();
        assert!((total - 0.5).abs() < 1e-9);
    }

    #[test]
    fn reconfigure_does_not_rearm_meter_suppression() {
        let status = [("switch", json!(true))];
        let mut t = socket(&status);
        let current = CapabilitySnapshot::new();
        t.apply_inbound(&dps(&[("add_ele", json!(500))]), &current);
        t.configure(&record("cz", "switch", &status));
        let writes = t.apply_inbound(&dps(&[("add_ele", json!(100))]), &current);
        assert!(value_of(&writes, METER_POWER).is_some());
    }

    #[test]
    fn meter_starts_from_initial_setting_and_ignores_negative_deltas() {
        let settings = DeviceSettings {
            scale: None,
            initial_meter_power: 10.0,
        };
        let mut t =
            Translator::for_device(&record("cz", "switch", &[("switch", json!(true))]), &settings)
                .unwrap();
        let current = CapabilitySnapshot::new();
        t.apply_inbound(&dps(&[("add_ele", json!(1))]), &current);

        let writes = t.apply_inbound(&dps(&[("add_ele", json!(-50))]), &current);
        assert!(writes.is_empty());

        let writes = t.apply_inbound(&dps(&[("add_ele", json!(250))]), &current);
        assert_eq!(value_of(&writes, METER_POWER), Some(&CapabilityValue::Number(10.25)));
    }

    #[test]
    fn meter_reset_writes_the_new_baseline() {
        let mut t = socket(&[("switch", json!(true))]);
        let writes = t.reset_meter(42.0);
        assert_eq!(value_of(&writes, METER_POWER), Some(&CapabilityValue::Number(42.0)));
        assert!(t.capabilities().contains(METER_POWER));
    }
}
