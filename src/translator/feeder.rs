use chrono::Local;
use tracing::debug;

use super::{ALARM_OFFLINE, CapabilitySet, CapabilityWrite, Inbound, Outbound};
use crate::convert::dp_number;
use crate::types::{CapabilityChanges, CapabilityValue, Command, DataPoint};

const MAX_PORTIONS: u32 = 12;

/// Pet feeder. Feeding is triggered by the `feed_now` button with the
/// portion count last chosen through `manual_feed_action`.
#[derive(Debug, Clone)]
pub struct Feeder {
    portions: u32,
}

impl Default for Feeder {
    fn default() -> Self {
        Self { portions: 1 }
    }
}

fn portions_from(value: &CapabilityValue) -> u32 {
    match value.as_f64() {
        Some(n) if (1.0..=MAX_PORTIONS as f64).contains(&n) => n as u32,
        _ => 1,
    }
}

fn now_text() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

impl Feeder {
    pub(crate) fn configure(&mut self, caps: &mut CapabilitySet) {
        caps.extend([
            "feed_now",
            "feeding_state",
            "measure_feed_portions",
            "manual_feed_action",
            ALARM_OFFLINE,
            "text_last_feed_time",
            "alarm_feeding",
        ]);
    }

    pub(crate) fn apply(&mut self, status: &[DataPoint], inbound: &mut Inbound<'_>) {
        for dp in status {
            match dp.code.as_str() {
                "feed_state" => {
                    let state = match &dp.value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    let feeding = state == "feeding";
                    inbound.set("feeding_state", state);
                    inbound.set("alarm_feeding", feeding);
                    inbound.set("feed_now", feeding);
                    if feeding {
                        inbound.set("text_last_feed_time", now_text());
                    }
                }
                "feed_report" => {
                    let portions = dp_number(&dp.value).unwrap_or(0.0);
                    inbound.set("measure_feed_portions", portions);
                    inbound.set("text_last_feed_time", now_text());
                }
                _ => {}
            }
        }
    }

    pub(crate) fn build(&mut self, changes: &CapabilityChanges, outbound: &mut Outbound) {
        if let Some(value) = changes.get("manual_feed_action") {
            self.portions = portions_from(value);
            debug!(portions = self.portions, "feed portion selected");
        }
        if changes.get("feed_now").is_some_and(CapabilityValue::as_bool) {
            outbound.push(Command::new("manual_feed", self.portions));
        }
    }

    /// `feed_now` is a button: it drops back once the feed command went out.
    pub(crate) fn released(&self, changes: &CapabilityChanges) -> Vec<CapabilityWrite> {
        if changes.get("feed_now").is_some_and(CapabilityValue::as_bool) {
            vec![CapabilityWrite {
                capability: "feed_now".to_string(),
                value: CapabilityValue::Bool(false),
            }]
        } else {
            Vec::new()
        }
    }
}
