use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::diff::diff_json;
use crate::types::Command;

pub enum MessageLogMode {
    Full,
    /// Discovery responses after the first are written as a list of changed paths.
    Diffed,
}

pub(crate) type SharedLogger = Arc<Mutex<MessageLogger>>;

pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_discovery: Option<Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous_discovery: None,
        })
    }

    pub fn shared(self) -> SharedLogger {
        Arc::new(Mutex::new(self))
    }

    /// Record an outgoing request and return its correlation id.
    pub fn log_request(&mut self, method: &str, path: &str, body: Option<&Value>) -> String {
        let id = Uuid::new_v4().to_string();
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "id": id,
            "method": method,
            "path": path,
            "body": body,
        });
        self.write_line(&entry);
        id
    }

    pub fn log_command(&mut self, device_id: &str, commands: &[Command]) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "device": device_id,
            "commands": commands,
        });
        self.write_line(&entry);
    }

    pub fn log_response(&mut self, id: &str, namespace: &str, status: u16, body: &Value) {
        let diffed = matches!(self.mode, MessageLogMode::Diffed) && namespace == "discovery";
        if !diffed {
            let entry = json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "resp",
                "id": id,
                "namespace": namespace,
                "status": status,
                "body": body,
            });
            self.write_line(&entry);
            return;
        }

        let entry = match self.previous_discovery.take() {
            None => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "resp",
                "id": id,
                "namespace": namespace,
                "status": status,
                "full": true,
                "body": body,
            }),
            Some(prev) => {
                let mut changes = Vec::new();
                diff_json(&prev, body, "", &mut changes);
                let change_entries: Vec<Value> = changes
                    .iter()
                    .map(|(path, old, new)| json!({ "path": path, "old": old, "new": new }))
                    .collect();
                json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "resp",
                    "id": id,
                    "namespace": namespace,
                    "status": status,
                    "changes": change_entries,
                })
            }
        };
        self.write_line(&entry);
        self.previous_discovery = Some(body.clone());
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}
