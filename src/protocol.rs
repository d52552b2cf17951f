use serde_json::{json, Value};

use crate::types::{Command, Credentials, DeviceRecord, Region};
use crate::{Error, Result};

pub const AUTH_PATH: &str = "/auth.do";
pub const REFRESH_PATH: &str = "/access.do";
pub const SKILL_PATH: &str = "/skill";

pub const NAMESPACE_DISCOVERY: &str = "discovery";
pub const NAMESPACE_CONTROL: &str = "control";

const AUTH_FROM: &str = "tuya";
const CONTROL_OK: &str = "SUCCESS";
const REDACTED: &str = "***";

/// Prefix of the cloud's "already authenticated recently" rejection.
pub const AUTH_EXCEED_ONCE: &str = "you cannot auth exceed once";

pub fn regional_base_url(region: Region) -> String {
    format!("https://px1.tuya{region}.com/homeassistant")
}

pub fn auth_form(credentials: &Credentials) -> [(&'static str, &str); 5] {
    [
        ("userName", credentials.username.as_str()),
        ("password", credentials.password.as_str()),
        ("countryCode", credentials.country_code.as_str()),
        ("bizType", credentials.biz_type.as_str()),
        ("from", AUTH_FROM),
    ]
}

pub fn skill_message(
    name: &str,
    namespace: &str,
    access_token: &str,
    dev_id: Option<&str>,
    payload: Value,
) -> Value {
    let mut payload = match payload {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    payload.insert("accessToken".into(), Value::from(access_token));
    if namespace != NAMESPACE_DISCOVERY
        && let Some(id) = dev_id
    {
        payload.insert("devId".into(), Value::from(id));
    }
    json!({
        "header": {
            "name": name,
            "namespace": namespace,
            "payloadVersion": 1
        },
        "payload": payload
    })
}

pub fn control_payload(commands: &[Command]) -> Value {
    json!({ "commands": commands })
}

/// Token fields of a successful auth or refresh response.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_secs: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthReply {
    Granted(TokenGrant),
    Rejected(String),
}

pub fn parse_auth_response(body: &str) -> Result<AuthReply> {
    if body.trim().is_empty() {
        return Ok(AuthReply::Rejected("No data returned".into()));
    }
    let parsed: Value = serde_json::from_str(body)?;
    if parsed.get("responseStatus").and_then(|v| v.as_str()) == Some("error") {
        let msg = parsed
            .get("errorMsg")
            .and_then(|v| v.as_str())
            .unwrap_or("authentication failed");
        return Ok(AuthReply::Rejected(msg.to_string()));
    }
    let access_token = parsed.get("access_token").and_then(|v| v.as_str());
    let refresh_token = parsed.get("refresh_token").and_then(|v| v.as_str());
    match (access_token, refresh_token) {
        (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
            let expires_in_secs = parsed
                .get("expires_in")
                .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
                .unwrap_or(0);
            Ok(AuthReply::Granted(TokenGrant {
                access_token: access.to_string(),
                refresh_token: refresh.to_string(),
                expires_in_secs,
            }))
        }
        _ => Ok(AuthReply::Rejected("response carried no tokens".into())),
    }
}

/// `header.code` of a skill response, if present.
pub fn response_code(body: &Value) -> Option<&str> {
    body.pointer("/header/code").and_then(|v| v.as_str())
}

pub fn response_message(body: &Value) -> String {
    body.pointer("/header/msg")
        .and_then(|v| v.as_str())
        .or_else(|| response_code(body))
        .unwrap_or("unknown error")
        .to_string()
}

pub fn is_control_success(body: &Value) -> bool {
    response_code(body).is_none_or(|code| code == CONTROL_OK)
}

/// Devices listed in a discovery response. `None` when the payload has no list.
pub fn parse_devices(body: &Value) -> Option<Vec<DeviceRecord>> {
    let devices = body.pointer("/payload/devices")?.as_array()?;
    Some(
        devices
            .iter()
            .filter_map(|d| serde_json::from_value(d.clone()).ok())
            .collect(),
    )
}

/// Copy of a skill message with the access token masked, for logging.
pub fn redact(message: &Value) -> Value {
    let mut copy = message.clone();
    if let Some(token) = copy.pointer_mut("/payload/accessToken") {
        *token = Value::from(REDACTED);
    }
    copy
}

pub fn refresh_query(refresh_token: &str) -> [(&'static str, &str); 2] {
    [("grant_type", "refresh_token"), ("refresh_token", refresh_token)]
}

pub fn missing_devices_error() -> Error {
    Error::Discovery("response carried no device list".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_message_has_no_dev_id() {
        let msg = skill_message("Discovery", NAMESPACE_DISCOVERY, "EUtoken", Some("dev1"), json!({}));
        assert_eq!(msg["header"]["name"], "Discovery");
        assert_eq!(msg["header"]["namespace"], "discovery");
        assert_eq!(msg["header"]["payloadVersion"], 1);
        assert_eq!(msg["payload"]["accessToken"], "EUtoken");
        assert!(msg["payload"].get("devId").is_none());
    }

    #[test]
    fn control_message_structure() {
        let commands = [Command::new("switch_1", true), Command::new("temp_set", 220)];
        let msg = skill_message(
            "command",
            NAMESPACE_CONTROL,
            "EUtoken",
            Some("dev1"),
            control_payload(&commands),
        );
        assert_eq!(msg["payload"]["devId"], "dev1");
        assert_eq!(msg["payload"]["commands"][0]["code"], "switch_1");
        assert_eq!(msg["payload"]["commands"][1]["value"], 220);
    }

    #[test]
    fn regional_hosts() {
        assert_eq!(regional_base_url(Region::Eu), "https://px1.tuyaeu.com/homeassistant");
        assert_eq!(regional_base_url(Region::Us), "https://px1.tuyaus.com/homeassistant");
        assert_eq!(regional_base_url(Region::Cn), "https://px1.tuyacn.com/homeassistant");
    }

    #[test]
    fn parse_auth_granted() {
        let body = r#"{"access_token":"EUaaa","refresh_token":"EUbbb","expires_in":864000}"#;
        let reply = parse_auth_response(body).unwrap();
        assert_eq!(
            reply,
            AuthReply::Granted(TokenGrant {
                access_token: "EUaaa".into(),
                refresh_token: "EUbbb".into(),
                expires_in_secs: 864000,
            })
        );
    }

    #[test]
    fn parse_auth_error_status() {
        let body = r#"{"responseStatus":"error","errorMsg":"you cannot auth exceed once in 60 seconds"}"#;
        match parse_auth_response(body).unwrap() {
            AuthReply::Rejected(msg) => assert!(msg.starts_with(AUTH_EXCEED_ONCE)),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn parse_auth_empty_body() {
        assert_eq!(
            parse_auth_response("").unwrap(),
            AuthReply::Rejected("No data returned".into())
        );
    }

    #[test]
    fn parse_auth_garbage_is_json_error() {
        assert!(matches!(parse_auth_response("<html>"), Err(Error::Json(_))));
    }

    #[test]
    fn parse_devices_skips_malformed_entries() {
        let body = json!({
            "header": {"code": "SUCCESS"},
            "payload": {"devices": [
                {"id": "a", "dev_type": "switch", "status": [{"code": "switch_1", "value": true}]},
                {"name": "no id"}
            ]}
        });
        let devices = parse_devices(&body).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].status[0].code, "switch_1");
        assert!(parse_devices(&json!({"payload": {}})).is_none());
    }

    #[test]
    fn redact_masks_token() {
        let msg = skill_message("Discovery", NAMESPACE_DISCOVERY, "EUsecret", None, json!({}));
        let redacted = redact(&msg);
        assert_eq!(redacted["payload"]["accessToken"], "***");
        assert_eq!(msg["payload"]["accessToken"], "EUsecret");
    }

    #[test]
    fn control_success_codes() {
        assert!(is_control_success(&json!({"header": {"code": "SUCCESS"}})));
        assert!(is_control_success(&json!({})));
        assert!(!is_control_success(&json!({"header": {"code": "FrequentlyInvoke"}})));
    }
}
