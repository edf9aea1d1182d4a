use anyhow::{anyhow, Context};
use http::StatusCode;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),
}

/// How the UI should treat a failed request
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Never reached the server or timed out, retrying may work
    Transient,

    /// The server refused the input, show it next to the field
    Validation,

    /// The target is gone or not ours anymore, retrying will not help
    Rejected,

    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network(_) => ErrorKind::Transient,
            Error::Validation { .. } | Error::NullByteInString(_) => ErrorKind::Validation,
            Error::NotFound(_) | Error::Conflict(_) | Error::PermissionDenied => {
                ErrorKind::Rejected
            }
            Error::Unknown(_) => ErrorKind::Other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Builds the error for a non-success response, preferring the body's description
    pub fn from_response(status: StatusCode, body: &[u8]) -> Error {
        match Error::parse(body) {
            Ok(err) => err,
            Err(parse_err) => {
                tracing::debug!(?parse_err, %status, "error body is not structured");
                let msg = String::from_utf8_lossy(body).into_owned();
                match status {
                    StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                        Error::Validation {
                            field: String::new(),
                            message: msg,
                        }
                    }
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::PermissionDenied,
                    StatusCode::NOT_FOUND | StatusCode::GONE => Error::NotFound(msg),
                    StatusCode::CONFLICT => Error::Conflict(msg),
                    StatusCode::REQUEST_TIMEOUT
                    | StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT => Error::Network(format!("{status}")),
                    _ => Error::Unknown(format!("{status}: {msg}")),
                }
            }
        }
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let message = || {
            String::from(
                data.get("message")
                    .and_then(|msg| msg.as_str())
                    .unwrap_or(""),
            )
        };
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(message()),
                "network" => Error::Network(message()),
                "permission-denied" => Error::PermissionDenied,
                "not-found" => Error::NotFound(message()),
                "conflict" => Error::Conflict(message()),
                "validation" => Error::Validation {
                    field: String::from(
                        data.get("field")
                            .and_then(|f| f.as_str())
                            .ok_or_else(|| anyhow!("validation error without a field"))?,
                    ),
                    message: message(),
                },
                "null-byte" => Error::NullByteInString(String::from(
                    data.get("string").and_then(|s| s.as_str()).ok_or_else(|| {
                        anyhow!("error is a null-byte-in-string without a string")
                    })?,
                )),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}
