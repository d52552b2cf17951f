use serde_json::Value;

use super::{CapabilitySet, Inbound, Outbound};
use crate::convert::{dp_bool, dp_number};
use crate::types::{CapabilityChanges, CapabilityValue, Command, DataPoint};

#[derive(Debug, Clone, Default)]
pub struct Dehumidifier {
    /// The device reports its humidity set point as a string enum.
    textual_set_point: bool,
}

impl Dehumidifier {
    pub(crate) fn configure(&mut self, caps: &mut CapabilitySet) {
        caps.extend(["onoff", "target_humidity"]);
    }

    pub(crate) fn apply(&mut self, status: &[DataPoint], inbound: &mut Inbound<'_>) {
        for dp in status {
            match dp.code.as_str() {
                "switch" => inbound.set("onoff", dp_bool(&dp.value)),
                "dehumidify_set_enum" => {
                    self.textual_set_point = dp.value.is_string();
                    if let Some(target) = dp_number(&dp.value) {
                        inbound.set("target_humidity", target);
                    }
                }
                _ => {}
            }
        }
    }

    pub(crate) fn build(&self, changes: &CapabilityChanges, outbound: &mut Outbound) {
        if let Some(target) = changes
            .get("target_humidity")
            .and_then(CapabilityValue::as_f64)
        {
            let whole = target.round() as i64;
            let value = if self.textual_set_point {
                Value::from(whole.to_string())
            } else {
                Value::from(whole)
            };
            outbound.push(Command::new("dehumidify_set_enum", value));
        }
        if let Some(on) = changes.get("onoff") {
            outbound.push(Command::new("switch", on.as_bool()));
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

    #[test]
    fn set_point_echoes_inbound_json_type() {
        let record = record("cs", "dehumidifier", &[("dehumidify_set_enum", json!("50"))]);
        let mut t = Translator::for_device(&record, &DeviceSettings::default()).unwrap();
        let writes = t.apply_inbound(&record.status, &CapabilitySnapshot::new());
        assert_eq!(value_of(&writes, "target_humidity"), Some(&CapabilityValue::Number(50.0)));

        let commands = t.build_outbound(
            &changes(&[("target_humidity", CapabilityValue::Number(45.0))]),
            &CapabilitySnapshot::new(),
        );
        assert_eq!(commands, vec![Command::new("dehumidify_set_enum", "45")]);

        t.apply_inbound(&dps(&[("dehumidify_set_enum", json!(60))]), &CapabilitySnapshot::new());
        let commands = t.build_outbound(
            &changes(&[
                ("target_humidity", CapabilityValue::Number(55.0)),
                ("onoff", CapabilityValue::Bool(true)),
            ]),
            &CapabilitySnapshot::new(),
        );
        assert_eq!(
            commands,
            vec![
                Command::new("dehumidify_set_enum", 55),
                Command::new("switch", true),
            ]
        );
    }
}
