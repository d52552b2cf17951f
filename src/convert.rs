//! Numeric conversions between vendor DP values and normalized capability values.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::DataPoint;

/// Raw hue domain of colour DPs.
pub const HUE_MAX: f64 = 359.0;

/// Scaled integer to physical unit: `raw / 10^scale`.
pub fn to_display(raw: f64, scale: u32) -> f64 {
    raw / 10f64.powi(scale as i32)
}

/// Physical unit to scaled integer: `round(display * 10^scale)`.
pub fn to_raw(display: f64, scale: u32) -> i64 {
    (display * 10f64.powi(scale as i32)).round() as i64
}

/// Numeric reading of a DP value. Numeric strings are accepted.
pub fn dp_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

pub fn dp_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub min: i64,
    pub max: i64,
}

impl Range {
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    fn span(&self) -> f64 {
        (self.max - self.min) as f64
    }

    /// Raw value to a 0..=1 fraction, in whole percent steps.
    ///
    /// The percentage is floored before dividing, so `denormalize(normalize(r))`
    /// may land up to one percent of the span below `r`.
    pub fn normalize(&self, raw: f64) -> f64 {
        if self.span() <= 0.0 {
            return 0.0;
        }
        let pct = ((raw - self.min as f64) * 100.0 / self.span()).floor();
        pct.clamp(0.0, 100.0) / 100.0
    }

    pub fn denormalize(&self, fraction: f64) -> i64 {
        (self.span() * fraction.clamp(0.0, 1.0) + self.min as f64).floor() as i64
    }
}

const LEGACY_BRIGHT: Range = Range::new(25, 255);
const LEGACY_LEVEL: Range = Range::new(0, 255);
const V2_BRIGHT: Range = Range::new(10, 1000);
const V2_LEVEL: Range = Range::new(0, 1000);

/// Raw DP ranges of one light, fixed for the lifetime of a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeConfig {
    pub brightness: Range,
    pub color_temp: Range,
    pub saturation: Range,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            brightness: V2_BRIGHT,
            color_temp: V2_LEVEL,
            saturation: V2_LEVEL,
        }
    }
}

impl RangeConfig {
    /// Pick presets from the category and the DP codes the device reports.
    ///
    /// Categories `dj` and `dc` use the 8-bit presets on their unversioned
    /// codes; `_v2` codes always use the 10..1000 presets.
    pub fn derive(category: &str, status: &[DataPoint]) -> Self {
        let legacy = matches!(category, "dj" | "dc");
        let mut config = Self::default();
        for dp in status {
            match dp.code.as_str() {
                "bright_value" => {
                    config.brightness = if legacy { LEGACY_BRIGHT } else { V2_BRIGHT };
                }
                "bright_value_1" | "bright_value_v2" => config.brightness = V2_BRIGHT,
                "temp_value" => {
                    config.color_temp = if legacy { LEGACY_LEVEL } else { V2_LEVEL };
                }
                "temp_value_v2" => config.color_temp = V2_LEVEL,
                "colour_data" => {
                    if legacy {
                        config.saturation = LEGACY_LEVEL;
                        config.brightness = LEGACY_BRIGHT;
                    } else {
                        config.saturation = V2_LEVEL;
                        config.brightness = V2_BRIGHT;
                    }
                }
                "colour_data_v2" => {
                    config.saturation = V2_LEVEL;
                    config.brightness = V2_BRIGHT;
                }
                _ => {}
            }
        }
        config
    }
}

/// Raw hue (0..=359) to a 0..=1 fraction in whole percent steps.
///
/// Lossy: 360 raw hues collapse onto 101 fractions, so a round trip through
/// `hue_to_raw` can move the hue by up to about 3.6 raw units.
pub fn hue_to_fraction(raw: f64) -> f64 {
    let pct = (raw / HUE_MAX * 100.0).floor();
    pct.clamp(0.0, 100.0) / 100.0
}

pub fn hue_to_raw(fraction: f64) -> i64 {
    (fraction.clamp(0.0, 1.0) * HUE_MAX).round() as i64
}

/// Colour payload carried by `colour_data` DPs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hsv {
    pub h: f64,
    pub s: f64,
    pub v: f64,
}

impl Hsv {
    /// What an empty colour DP stands for.
    pub const DEFAULT_WHITE: Hsv = Hsv {
        h: 100.0,
        s: 100.0,
        v: 100.0,
    };

    /// Decode a colour DP value: a JSON object, a JSON-encoded string, or `""`.
    pub fn decode(value: &Value) -> Option<Hsv> {
        match value {
            Value::String(s) if s.trim().is_empty() => Some(Self::DEFAULT_WHITE),
            Value::String(s) => serde_json::from_str::<Value>(s)
                .ok()
                .and_then(|v| Self::from_object(&v)),
            Value::Object(_) => Self::from_object(value),
            _ => None,
        }
    }

    fn from_object(value: &Value) -> Option<Hsv> {
        Some(Hsv {
            h: dp_number(value.get("h")?)?,
            s: dp_number(value.get("s")?)?,
            v: dp_number(value.get("v")?)?,
        })
    }
}

/// Outbound colour DP value with integer components.
pub fn encode_hsv(h: i64, s: i64, v: i64) -> Value {
    json!({ "h": h, "s": s, "v": v })
}
