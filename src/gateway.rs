use std::sync::Arc;

use tracing::{debug, warn};

use crate::logger::SharedLogger;
use crate::protocol::{control_payload, is_control_success, response_message, NAMESPACE_CONTROL};
use crate::session::SessionManager;
use crate::types::Command;
use crate::{Error, Result};

/// Sends control commands for one device at a time. No retries.
#[derive(Clone)]
pub struct CommandGateway {
    session: Arc<SessionManager>,
    logger: Option<SharedLogger>,
}

impl CommandGateway {
    pub(crate) fn new(session: Arc<SessionManager>, logger: Option<SharedLogger>) -> Self {
        Self { session, logger }
    }

    /// Dispatch `commands` to `device_id` in one control request.
    pub async fn send(&self, device_id: &str, commands: &[Command]) -> Result<()> {
        if commands.is_empty() {
            return Ok(());
        }
        if let Some(logger) = &self.logger
            && let Ok(mut logger) = logger.lock()
        {
            logger.log_command(device_id, commands);
        }
        debug!(device_id, count = commands.len(), "sending commands");

        let outcome = match self
            .session
            .request(
                "command",
                NAMESPACE_CONTROL,
                Some(device_id),
                control_payload(commands),
            )
            .await
        {
            Ok(body) if is_control_success(&body) => Ok(()),
            Ok(body) => Err(Error::Command {
                device_id: device_id.to_string(),
                message: response_message(&body),
            }),
            Err(e @ (Error::Http(_) | Error::Json(_))) => Err(Error::Command {
                device_id: device_id.to_string(),
                message: e.to_string(),
            }),
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            warn!(device_id, commands = ?commands, error = %e, "command dispatch failed");
        }
        outcome
    }
}
