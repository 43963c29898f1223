//! Envelope unwrapping and JSON extraction helpers.
//!
//! The backend wraps every successful payload as
//! `{"status":"success","data":"<json-encoded string>"}`, so `data` has to be
//! parsed a second time. Write endpoints answer with `{"result":"success"}`
//! instead. [`decode_envelope`] handles both and is the only way raw response
//! bodies become payloads.
//!
//! # Examples
//!
//! ```rust
//! use zentao::net::json;
//!
//! let body = br#"{"status":"success","data":"{\"products\":{\"1\":{\"id\":\"1\",\"name\":\"Web\"}}}"}"#;
//! let payload = json::decode_envelope(body).unwrap();
//!
//! let name = json::extract_path(&payload, "products.1.name").unwrap();
//! assert_eq!(name.as_str(), Some("Web"));
//! ```

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result, excerpt};

/// Unwraps a response envelope into its payload.
///
/// - `status: "success"` with a string `data` → `data` parsed again
/// - `status: "success"` with structured `data` → `data` as is
/// - `status: "success"` without `data` → `Value::Null`
/// - `result: "success"` → the whole object (write endpoints)
///
/// # Errors
///
/// [`Error::UpstreamData`] when the body is not JSON, `data` is not valid
/// JSON, or the envelope reports failure (with the backend's reason).
pub fn decode_envelope(body: &[u8]) -> Result<Value> {
    let envelope: Value = serde_json::from_slice(body).map_err(|e| {
        Error::upstream(format!("response is not JSON ({}): {}", e, excerpt(body)))
    })?;

    let outcome = envelope
        .get("status")
        .or_else(|| envelope.get("result"))
        .and_then(Value::as_str);

    match outcome {
        Some("success") => {}
        Some(other) => {
            return Err(Error::upstream(format!(
                "backend reported '{}': {}",
                other,
                failure_reason(&envelope)
            )));
        }
        None => {
            return Err(Error::upstream(format!(
                "missing status in envelope: {}",
                excerpt(body)
            )));
        }
    }

    if envelope.get("status").is_none() {
        return Ok(envelope);
    }

    match envelope.get("data") {
        Some(Value::String(encoded)) => serde_json::from_str(encoded).map_err(|e| {
            Error::upstream(format!(
                "envelope data is not valid JSON ({}): {}",
                e,
                excerpt(encoded.as_bytes())
            ))
        }),
        Some(other) => Ok(other.clone()),
        None => Ok(Value::Null),
    }
}

/// Best-effort human-readable reason from a failure envelope.
pub fn failure_reason(envelope: &Value) -> String {
    for key in ["reason", "message"] {
        match envelope.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return s.clone(),
            // Form validation errors come back as {"field": ["msg", ...]}.
            Some(value @ (Value::Object(_) | Value::Array(_))) => return value.to_string(),
            _ => {}
        }
    }
    "no reason given".to_string()
}

/// Extracts a value from nested JSON using dot notation.
///
/// ```rust
/// use zentao::net::json;
/// use serde_json::json;
///
/// let data = json!({"pager": {"recTotal": 250}});
/// assert_eq!(json::extract_path(&data, "pager.recTotal"), Some(json!(250)));
/// assert_eq!(json::extract_path(&data, "pager.pageID"), None);
/// ```
pub fn extract_path(json: &Value, path: &str) -> Option<Value> {
    let mut current = json;

    for key in path.split('.') {
        current = current.get(key)?;
    }

    Some(current.clone())
}

/// Extracts and deserializes a value from a nested JSON path.
///
/// # Errors
///
/// [`Error::UpstreamData`] if the path is missing or the value does not
/// deserialize into `T`.
pub fn extract_as<T>(json: &Value, path: &str) -> Result<T>
where
    T: DeserializeOwned,
{
    let value = extract_path(json, path)
        .filter(|v| !v.is_null())
        .ok_or_else(|| Error::upstream(format!("path not found in payload: {}", path)))?;
    serde_json::from_value(value)
        .map_err(|e| Error::upstream(format!("unexpected shape at '{}': {}", path, e)))
}

/// Extracts a record collection stored under `key`.
///
/// Listings send records either as an array or as an object keyed by record
/// id; both come back as a vector in server order. A missing or null key is
/// an empty collection.
///
/// # Errors
///
/// [`Error::UpstreamData`] if `key` holds something other than an array,
/// object or null.
pub fn extract_records(json: &Value, key: &str) -> Result<Vec<Value>> {
    match json.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(Value::Object(map)) => Ok(map.values().cloned().collect()),
        Some(other) => Err(Error::upstream(format!(
            "expected a record collection under '{}', got {}",
            key,
            excerpt(other.to_string().as_bytes())
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wrap(data: &Value) -> Vec<u8> {
        json!({"status": "success", "data": data.to_string()})
            .to_string()
            .into_bytes()
    }

    #[test]
    fn test_double_encoded_data() {
        let body = wrap(&json!({"bugs": [{"id": 1}]}));
        let payload = decode_envelope(&body).unwrap();
        assert_eq!(payload["bugs"][0]["id"], json!(1));
    }

    #[test]
    fn test_structured_data_is_accepted() {
        let body = br#"{"status":"success","data":{"id":3}}"#;
        assert_eq!(decode_envelope(body).unwrap(), json!({"id": 3}));
    }

    #[test]
    fn test_failure_envelope_carries_reason() {
        let body = br#"{"status":"failed","reason":"no privilege"}"#;
        let err = decode_envelope(body).unwrap_err();
        assert!(matches!(err, Error::UpstreamData(_)));
        assert!(err.to_string().contains("no privilege"));
    }

    #[test]
    fn test_result_envelope() {
        let body = br#"{"result":"success","message":"saved"}"#;
        assert_eq!(decode_envelope(body).unwrap()["message"], json!("saved"));

        let body = br#"{"result":"fail","message":{"resolution":["required"]}}"#;
        let err = decode_envelope(body).unwrap_err();
        assert!(err.to_string().contains("resolution"));
    }

    #[test]
    fn test_malformed_bodies() {
        assert!(matches!(
            decode_envelope(b"<html>oops</html>"),
            Err(Error::UpstreamData(_))
        ));
        assert!(matches!(
            decode_envelope(br#"{"status":"success","data":"{not json"}"#),
            Err(Error::UpstreamData(_))
        ));
        assert!(matches!(
            decode_envelope(br#"{"data":"{}"}"#),
            Err(Error::UpstreamData(_))
        ));
    }

    #[test]
    fn test_extract_records_keeps_server_order() {
        let payload = json!({"bugs": {"30": {"id": 30}, "4": {"id": 4}, "17": {"id": 17}}});
        let ids: Vec<Value> = extract_records(&payload, "bugs")
            .unwrap()
            .into_iter()
            .map(|r| r["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!(30), json!(4), json!(17)]);

        assert!(extract_records(&payload, "stories").unwrap().is_empty());
        assert!(extract_records(&json!({"bugs": 5}), "bugs").is_err());
    }

    #[test]
    fn test_extract_as() {
        let payload = json!({"story": {"id": "5"}, "empty": null});
        let id: String = extract_as(&payload, "story.id").unwrap();
        assert_eq!(id, "5");
        assert!(extract_as::<String>(&payload, "empty").is_err());
        assert!(extract_as::<u64>(&payload, "story.id").is_err());
    }
}
