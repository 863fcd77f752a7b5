//! Pre-call parameter checks and post-call response checks.
//!
//! Neither function returns data: they pass or fail with a typed
//! [`WidelyError`], so a failed upstream result can never be read as success.

use serde_json::Value;

use super::error::WidelyError;
use super::types::{RemoteOutcome, RemoteResult};

/// Blank means absent, JSON null, or a whitespace-only string.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Fail with [`WidelyError::Validation`] naming every blank parameter.
pub fn validate_required_params<'a, I>(params: I) -> Result<(), WidelyError>
where
    I: IntoIterator<Item = (&'a str, &'a Value)>,
{
    let missing: Vec<String> = params
        .into_iter()
        .filter(|(_, value)| is_blank(value))
        .map(|(name, _)| name.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(WidelyError::Validation { missing })
    }
}

/// Check an upstream result.
///
/// `error_code != 200` and `status == "ERROR"` are both failures. The error
/// message keeps the caller's context plus whatever code and text Widely
/// sent. With `check_data`, a success with null, non-object, or empty-array
/// `data` is [`WidelyError::NotFound`].
pub fn validate_widely_result(
    result: &RemoteResult,
    context: &str,
    check_data: bool,
) -> Result<(), WidelyError> {
    let data = match result.outcome() {
        RemoteOutcome::Failure { code, message } => {
            let mut msg = context.to_string();
            if let Some(code) = code {
                msg.push_str(&format!(" (error_code {code})"));
            }
            if let Some(text) = message.as_deref().filter(|m| !m.trim().is_empty()) {
                msg.push_str(": ");
                msg.push_str(text);
            }
            return Err(WidelyError::upstream(msg));
        }
        RemoteOutcome::Success(data) => data,
    };

    if !check_data {
        return Ok(());
    }

    match data {
        Some(Value::Array(items)) if items.is_empty() => {
            Err(WidelyError::NotFound(format!("{context}: no data returned")))
        }
        Some(Value::Array(_)) | Some(Value::Object(_)) => Ok(()),
        _ => Err(WidelyError::NotFound(format!("{context}: no data returned"))),
    }
}
