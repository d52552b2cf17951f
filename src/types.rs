use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Cloud data-center zone. Decides which API host serves the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    #[default]
    Eu,
    Us,
    Cn,
}

impl Region {
    /// Region encoded in the first two characters of an access token.
    pub fn from_token(token: &str) -> Self {
        match token.get(..2) {
            Some("AY") => Region::Cn,
            Some("EU") => Region::Eu,
            _ => Region::Us,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Eu => "eu",
            Region::Us => "us",
            Region::Cn => "cn",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub country_code: String,
    pub biz_type: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        country_code: impl Into<String>,
        biz_type: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            country_code: country_code.into(),
            biz_type: biz_type.into(),
        }
    }

    /// Read `TUYA_USERNAME`, `TUYA_PASSWORD`, `TUYA_COUNTRY_CODE` and `TUYA_BIZ_TYPE`.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| Error::Config(format!("{name} is not set")))
        };
        let credentials = Self::new(
            var("TUYA_USERNAME")?,
            var("TUYA_PASSWORD")?,
            var("TUYA_COUNTRY_CODE")?,
            var("TUYA_BIZ_TYPE")?,
        );
        credentials.validate()?;
        Ok(credentials)
    }

    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("username", &self.username),
            ("password", &self.password),
            ("country code", &self.country_code),
            ("biz type", &self.biz_type),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(name, _)| name)
        .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!("missing {}", missing.join(", "))))
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("country_code", &self.country_code)
            .field("biz_type", &self.biz_type)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Authenticating,
    Authenticated,
    Error,
}

/// A vendor data point as reported by, or sent to, a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub code: String,
    #[serde(default)]
    pub value: Value,
}

impl DataPoint {
    pub fn new(code: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            code: code.into(),
            value: value.into(),
        }
    }
}

fn default_online() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "type")]
    pub dev_type: String,
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_online")]
    pub online: bool,
    #[serde(default)]
    pub status: Vec<DataPoint>,
}

impl DeviceRecord {
    pub fn data_point(&self, code: &str) -> Option<&DataPoint> {
        self.status.iter().find(|dp| dp.code == code)
    }
}

/// Device families with a dedicated translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Socket,
    Light,
    Thermostat,
    Dehumidifier,
    Feeder,
    Charger,
}

impl DeviceClass {
    /// Pick a class from the vendor category, falling back to the discovery type.
    pub fn detect(record: &DeviceRecord) -> Option<Self> {
        let by_category = match record.category.as_str() {
            "cz" | "pc" | "kg" | "tdq" => Some(DeviceClass::Socket),
            "dj" | "dc" | "dd" | "fwd" | "xdd" | "gyd" => Some(DeviceClass::Light),
            "wk" | "wkf" => Some(DeviceClass::Thermostat),
            "cs" => Some(DeviceClass::Dehumidifier),
            "cwwsq" => Some(DeviceClass::Feeder),
            _ => None,
        };
        by_category.or(match record.dev_type.as_str() {
            "switch" | "socket" | "outlet" => Some(DeviceClass::Socket),
            "light" => Some(DeviceClass::Light),
            "climate" | "thermostat" => Some(DeviceClass::Thermostat),
            "dehumidifier" => Some(DeviceClass::Dehumidifier),
            "feeder" => Some(DeviceClass::Feeder),
            "parksidecharger" => Some(DeviceClass::Charger),
            _ => None,
        })
    }

    /// Power-of-ten exponent applied to scaled integer DPs when the hub has none stored.
    pub fn default_scale(&self) -> u32 {
        match self {
            DeviceClass::Thermostat => 1,
            _ => 0,
        }
    }
}

/// Settings the hub persists alongside a device.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub scale: Option<u32>,
    #[serde(default)]
    pub initial_meter_power: f64,
}

/// Normalized hub-side value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CapabilityValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CapabilityValue::Number(n) => Some(*n),
            CapabilityValue::Text(s) => s.trim().parse().ok(),
            CapabilityValue::Bool(_) => None,
        }
    }

    /// Truthiness: numbers are true when non-zero.
    pub fn as_bool(&self) -> bool {
        match self {
            CapabilityValue::Bool(b) => *b,
            CapabilityValue::Number(n) => *n != 0.0,
            CapabilityValue::Text(s) => !s.is_empty(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CapabilityValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for CapabilityValue {
    fn from(b: bool) -> Self {
        CapabilityValue::Bool(b)
    }
}

impl From<f64> for CapabilityValue {
    fn from(n: f64) -> Self {
        CapabilityValue::Number(n)
    }
}

impl From<&str> for CapabilityValue {
    fn from(s: &str) -> Self {
        CapabilityValue::Text(s.to_string())
    }
}

impl From<String> for CapabilityValue {
    fn from(s: String) -> Self {
        CapabilityValue::Text(s)
    }
}

impl fmt::Display for CapabilityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityValue::Bool(b) => write!(f, "{b}"),
            CapabilityValue::Number(n) => write!(f, "{n}"),
            CapabilityValue::Text(s) => f.write_str(s),
        }
    }
}

/// Capability edits coalesced for one device, keyed by capability id.
pub type CapabilityChanges = BTreeMap<String, CapabilityValue>;

/// Current store values of a device's capabilities.
pub type CapabilitySnapshot = HashMap<String, CapabilityValue>;

/// A single outbound DP write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub code: String,
    pub value: Value,
}

impl Command {
    pub fn new(code: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            code: code.into(),
            value: value.into(),
        }
    }
}

/// Events emitted by the discovery cache.
#[derive(Debug, Clone)]
pub enum Event {
    DeviceUpdated { device: DeviceRecord },
    DataPointChanged { device_id: String, code: String, old: Option<Value>, new: Value },
    OnlineChanged { device_id: String, online: bool },
}
