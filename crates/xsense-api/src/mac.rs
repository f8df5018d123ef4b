// Per-call request MAC for the vendor REST endpoint.
//
// The digest covers parameter values only (never keys), in insertion
// order, followed by the raw client-secret bytes.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};

use crate::crypto::md5_hex;
use crate::error::Error;

/// Placeholder MAC sent on unauthenticated calls (client-info lookup).
pub const UNAUTHENTICATED_MAC: &str = "abcdefg";

/// Compute the MD5 MAC over `params` and the decoded client secret.
pub fn compute_mac(params: &Map<String, Value>, secret: &[u8]) -> String {
    let mut data = flatten_values(params).into_bytes();
    data.extend_from_slice(secret);
    md5_hex(&data)
}

/// Concatenate parameter values the way the vendor's MAC expects.
///
/// Arrays whose first element is a string contribute each element,
/// other arrays and objects contribute compact JSON, scalars their
/// plain string form.
pub fn flatten_values(params: &Map<String, Value>) -> String {
    let mut out = String::new();
    for value in params.values() {
        match value {
            Value::Array(items) if matches!(items.first(), Some(Value::String(_))) => {
                for item in items {
                    out.push_str(&scalar_text(item));
                }
            }
            Value::Array(_) | Value::Object(_) => out.push_str(&value.to_string()),
            scalar => out.push_str(&scalar_text(scalar)),
        }
    }
    out
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Decode the base64 client secret returned by the client-info call.
///
/// The usable secret is the decoded bytes without the first four and
/// the last one.
pub fn decode_client_secret(encoded: &str) -> Result<Vec<u8>, Error> {
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Authentication {
            message: format!("client secret is not valid base64: {e}"),
        })?;
    if decoded.len() < 5 {
        return Err(Error::Authentication {
            message: format!("client secret too short ({} bytes)", decoded.len()),
        });
    }
    Ok(decoded[4..decoded.len() - 1].to_vec())
}
