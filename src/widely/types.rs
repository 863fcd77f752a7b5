//! Wire types for the Widely JSON-over-HTTPS protocol.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::auth::AuthTriple;

/// Request payload object.
pub type Payload = Map<String, Value>;

// ── Identifiers ──────────────────────────────────────────────────

/// Upstream identifier of a provisioned line. Widely accepts either a
/// number or a string and we send back whatever form we were given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EndpointId {
    Number(i64),
    Text(String),
}

impl EndpointId {
    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Text(s) if s.trim().is_empty())
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::Text(s) => Value::from(s.trim()),
        }
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for EndpointId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for EndpointId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for EndpointId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

// ── Envelope ─────────────────────────────────────────────────────

/// Outbound envelope. One per call, bound to a freshly minted auth triple.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteCall {
    pub auth: AuthTriple,
    pub func_name: String,
    pub data: Payload,
}

/// Upstream `error_code`. Numeric on most functions; a few send numeric
/// strings, and some send a symbolic code such as `"AUTH_FAILED"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Numeric(i64),
    Other(String),
}

impl ErrorCode {
    /// Only a code that normalises to exactly 200 means success.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Numeric(200))
    }
}

impl From<i64> for ErrorCode {
    fn from(value: i64) -> Self {
        Self::Numeric(value)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// Raw upstream response, returned unvalidated by the gateway.
///
/// Widely signals failure either with an `error_code` other than 200 or
/// with `status: "ERROR"`, depending on the function called.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteResult {
    #[serde(
        default,
        deserialize_with = "lenient_code",
        skip_serializing_if = "Option::is_none"
    )]
    pub error_code: Option<ErrorCode>,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Normalised view of a [`RemoteResult`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    Success(Option<Value>),
    Failure {
        code: Option<ErrorCode>,
        message: Option<String>,
    },
}

impl RemoteResult {
    /// Collapse both failure conventions into one tagged result.
    pub fn outcome(&self) -> RemoteOutcome {
        let bad_code = self.error_code.as_ref().is_some_and(|c| !c.is_ok());
        let error_status = self
            .status
            .as_deref()
            .is_some_and(|s| s.trim().eq_ignore_ascii_case("ERROR"));

        if bad_code || error_status {
            RemoteOutcome::Failure {
                code: self.error_code.clone(),
                message: self.message.clone(),
            }
        } else {
            RemoteOutcome::Success(self.data.clone())
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome(), RemoteOutcome::Success(_))
    }

    /// Take the `data` payload, `Null` when absent.
    pub fn into_data(self) -> Value {
        self.data.unwrap_or(Value::Null)
    }
}

/// Numbers and numeric strings become [`ErrorCode::Numeric`]; anything else
/// present is kept verbatim so it still reads as a failure.
fn lenient_code<'de, D>(deserializer: D) -> Result<Option<ErrorCode>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(match n.as_i64() {
            Some(i) => ErrorCode::Numeric(i),
            None => ErrorCode::Other(n.to_string()),
        }),
        Some(Value::String(s)) => Some(match s.trim().parse::<i64>() {
            Ok(i) => ErrorCode::Numeric(i),
            Err(_) => ErrorCode::Other(s),
        }),
        Some(other) => Some(ErrorCode::Other(other.to_string())),
    })
}

/// `message` and `status` are usually strings, but numbers and objects
/// show up too. Keep their text rather than rejecting the whole body.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
