use tracing::warn;

use super::{CapabilitySet, Inbound, Outbound, pick};
use crate::convert::{
    dp_bool, dp_number, encode_hsv, hue_to_fraction, hue_to_raw, Hsv, RangeConfig,
};
use crate::types::{CapabilityChanges, CapabilitySnapshot, CapabilityValue, Command, DataPoint};

const SWITCH_CODES: [&str; 2] = ["switch_led", "switch_led_1"];
const BRIGHT_CODES: [&str; 3] = ["bright_value", "bright_value_v2", "bright_value_1"];
const TEMP_CODES: [&str; 2] = ["temp_value", "temp_value_v2"];
const COLOUR_CODES: [&str; 2] = ["colour_data", "colour_data_v2"];

/// Bulbs and strips with optional colour temperature and colour.
#[derive(Debug, Clone, Default)]
pub struct Light {
    ranges: RangeConfig,
    switch_code: Option<String>,
    bright_code: Option<String>,
    temp_code: Option<String>,
    colour_code: Option<String>,
    work_mode: Option<String>,
}

impl Light {
    pub(crate) fn configure(
        &mut self,
        category: &str,
        status: &[DataPoint],
        caps: &mut CapabilitySet,
    ) {
        self.ranges = RangeConfig::derive(category, status);
        for dp in status {
            self.remember_code(dp);
        }
        caps.insert("onoff");
        caps.insert("dim");
    }

    fn remember_code(&mut self, dp: &DataPoint) {
        let code = dp.code.as_str();
        let slot = if SWITCH_CODES.contains(&code) {
            &mut self.switch_code
        } else if BRIGHT_CODES.contains(&code) {
            &mut self.bright_code
        } else if TEMP_CODES.contains(&code) {
            &mut self.temp_code
        } else if COLOUR_CODES.contains(&code) {
            &mut self.colour_code
        } else if code == "work_mode" {
            self.work_mode = dp.value.as_str().map(str::to_string);
            return;
        } else {
            return;
        };
        *slot = Some(dp.code.clone());
    }

    /// White mode, or no mode reported at all.
    fn in_white_mode(&self) -> bool {
        self.work_mode
            .as_deref()
            .is_none_or(|m| m == "white" || m == "light_white")
    }

    pub(crate) fn apply(&mut self, status: &[DataPoint], inbound: &mut Inbound<'_>) {
        for dp in status {
            self.remember_code(dp);
            let code = dp.code.as_str();
            if SWITCH_CODES.contains(&code) {
                inbound.set("onoff", dp_bool(&dp.value));
            } else if BRIGHT_CODES.contains(&code) {
                if let Some(raw) = dp_number(&dp.value) {
                    inbound.set("dim", self.ranges.brightness.normalize(raw));
                }
            } else if TEMP_CODES.contains(&code) {
                if let Some(raw) = dp_number(&dp.value) {
                    let warmth = self.ranges.color_temp.normalize(raw);
                    inbound.materialize("light_temperature", 1.0 - warmth);
                }
            } else if COLOUR_CODES.contains(&code) {
                self.apply_colour(dp, inbound);
            }
        }
    }

    fn apply_colour(&self, dp: &DataPoint, inbound: &mut Inbound<'_>) {
        let Some(hsv) = Hsv::decode(&dp.value) else {
            warn!(code = %dp.code, value = %dp.value, "undecodable colour data");
            return;
        };
        // In white mode the bright DP owns the dim level. The colour DP still
        // carries the `v` left over from the last colour scene, so letting it
        // win here would snap dim back to that old level on every report.
        if !self.in_white_mode() || self.bright_code.is_none() {
            inbound.set("dim", self.ranges.brightness.normalize(hsv.v));
        }
        inbound.materialize("light_hue", hue_to_fraction(hsv.h));
        inbound.materialize("light_saturation", self.ranges.saturation.normalize(hsv.s));
        let mode = if self.in_white_mode() && self.bright_code.is_some() {
            "temperature"
        } else {
            "color"
        };
        inbound.materialize("light_mode", mode);
    }

    pub(crate) fn build(
        &self,
        changes: &CapabilityChanges,
        current: &CapabilitySnapshot,
        outbound: &mut Outbound,
    ) {
        if let Some(on) = changes.get("onoff") {
            let code = self.switch_code.as_deref().unwrap_or("switch_led");
            outbound.push(Command::new(code, on.as_bool()));
        }

        let mut colour = changes.contains_key("light_hue") || changes.contains_key("light_saturation");
        if let Some(dim) = changes.get("dim").and_then(CapabilityValue::as_f64) {
            match &self.bright_code {
                Some(code) if self.in_white_mode() => {
                    outbound.push(Command::new(
                        code.as_str(),
                        self.ranges.brightness.denormalize(dim),
                    ));
                }
                _ => colour = true,
            }
        }

        if let Some(temp) = changes
            .get("light_temperature")
            .and_then(CapabilityValue::as_f64)
        {
            let code = self.temp_code.as_deref().unwrap_or("temp_value");
            outbound.push(Command::new(code, self.ranges.color_temp.denormalize(1.0 - temp)));
        }

        if colour {
            outbound.push(self.colour_command(changes, current));
        }
    }

    /// Full colour triple, unchanged components taken from the store.
    fn colour_command(&self, changes: &CapabilityChanges, current: &CapabilitySnapshot) -> Command {
        let read = |cap: &str, fallback: f64| {
            pick(changes, current, cap)
                .and_then(CapabilityValue::as_f64)
                .unwrap_or(fallback)
        };
        let h = hue_to_raw(read("light_hue", 0.0));
        let s = self.ranges.saturation.denormalize(read("light_saturation", 1.0));
        let v = self.ranges.brightness.denormalize(read("dim", 1.0));
        let code = self.colour_code.as_deref().unwrap_or("colour_data");
        Command::new(code, encode_hsv(h, s, v))
    }
}
