//! Machine-readable output protocol
//!
//! Every tool invocation made with `--machine-readable` ends with a single
//! JSON object on its last output line:
//!
//! ```json
//! {"status": "OK", "body": {"uuid": "..."}, "message": "", "code": 0, "exception_type": ""}
//! ```
//!
//! The body is kept as raw JSON; each command decodes it into its own type.

use crate::error::{CommandError, ProvisionError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Error code for "a VM with this name already exists"
pub const NAME_ALREADY_EXISTS: i64 = 18;

/// Error code for "VM not found"
pub const VM_NOT_FOUND: i64 = 3;

/// Result status of a tool invocation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(other)]
    Unknown,
}

/// The structured result printed on the tool's last output line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MachineReadableOutput {
    pub status: Status,

    /// Command-specific payload, decoded lazily
    #[serde(default)]
    pub body: serde_json::Value,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub code: i64,

    #[serde(default)]
    pub exception_type: String,
}

impl MachineReadableOutput {
    /// Parse a final output line
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|source| ProvisionError::ProtocolDecode {
            line: line.to_string(),
            source,
        })
    }

    /// Successful result carrying `body`
    pub fn ok(body: serde_json::Value) -> Self {
        Self {
            body,
            ..Self::default()
        }
    }

    /// Failed result carrying an error code
    pub fn error(code: i64, message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            body: serde_json::Value::Null,
            message: message.into(),
            code,
            exception_type: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Turn any non-OK status into a [`CommandError`]
    pub fn into_result(self) -> std::result::Result<Self, CommandError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(CommandError {
                message: self.message,
                code: self.code,
                exception_type: self.exception_type,
            })
        }
    }

    /// Decode the body into a command-specific response type.
    ///
    /// A missing or `null` body decodes as an empty object.
    pub fn decode_body<T: DeserializeOwned>(&self, command: &str) -> Result<T> {
        let body = if self.body.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            self.body.clone()
        };
        serde_json::from_value(body).map_err(|source| ProvisionError::ResponseDecode {
            command: command.to_string(),
            source,
        })
    }
}
