//! Reply encoding for request parameters and decoding of RSC payloads into
//! [`Elements`].
//!
//! Strings starting with `$` are reserved for references. A literal leading
//! `$` is escaped as `$$`, `$T<n>` refers to a temporary reference and
//! `$undefined` stands for a missing value.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::{elements::Elements, error::RscError};

const TEMPORARY_PREFIX: &str = "$T";
const UNDEFINED: &str = "$undefined";

/// Values that cannot be serialized into a request but must round-trip
/// through the server, held for as long as a request may refer to them.
///
/// Clones share the same set.
#[derive(Clone, Debug, Default)]
pub struct TemporaryReferenceSet {
    values: Arc<Mutex<Vec<Value>>>,
}

impl TemporaryReferenceSet {
    /// Stores `value` and returns the marker to put in its place.
    pub fn register(&self, value: Value) -> Value {
        let mut values = self.values.lock();
        values.push(value);
        Value::String(format!("{TEMPORARY_PREFIX}{}", values.len() - 1))
    }

    fn index_of(marker: &str) -> Option<usize> {
        marker.strip_prefix(TEMPORARY_PREFIX)?.parse().ok()
    }

    fn get(&self, marker: &str) -> Option<Value> {
        let index = Self::index_of(marker)?;
        self.values.lock().get(index).cloned()
    }

    fn contains(&self, marker: &str) -> bool {
        Self::index_of(marker).is_some_and(|index| index < self.values.lock().len())
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both handles point to the same set.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}

fn encode_value(value: &Value, temporary_references: &TemporaryReferenceSet) -> Value {
    match value {
        Value::String(s) if s.starts_with('$') && !temporary_references.contains(s) => {
            Value::String(format!("${s}"))
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| encode_value(item, temporary_references))
                .collect(),
        ),
        Value::Object(object) => Value::Object(
            object
                .iter()
                .map(|(key, value)| (key.clone(), encode_value(value, temporary_references)))
                .collect(),
        ),
        value => value.clone(),
    }
}

/// Serializes `value` into a request body. Markers returned by
/// [`TemporaryReferenceSet::register`] are kept as references.
pub fn encode_reply(
    value: &Value,
    temporary_references: &TemporaryReferenceSet,
) -> Result<Bytes, RscError> {
    let encoded = encode_value(value, temporary_references);
    Ok(serde_json::to_vec(&encoded)?.into())
}

fn decode_value(value: Value, temporary_references: &TemporaryReferenceSet) -> Value {
    match value {
        Value::String(s) if s.starts_with("$$") => Value::String(s[1..].to_string()),
        Value::String(s) if s.starts_with(TEMPORARY_PREFIX) => {
            temporary_references.get(&s).unwrap_or(Value::String(s))
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| decode_value(item, temporary_references))
                .collect(),
        ),
        Value::Object(object) => Value::Object(
            object
                .into_iter()
                .map(|(key, value)| (key, decode_value(value, temporary_references)))
                .collect::<Map<_, _>>(),
        ),
        value => value,
    }
}

/// Decodes an RSC payload. The payload must be an object keyed by slot id;
/// `$undefined` values decode to missing elements.
pub fn decode_elements(
    body: &[u8],
    temporary_references: &TemporaryReferenceSet,
) -> Result<Elements, RscError> {
    let Value::Object(object) = serde_json::from_slice(body)? else {
        return Err(RscError::Decode(
            "RSC payload must be an object of elements".to_string(),
        ));
    };
    Ok(object
        .into_iter()
        .map(|(id, value)| {
            let element = match value {
                Value::String(s) if s == UNDEFINED => None,
                value => Some(decode_value(value, temporary_references)),
            };
            (id, element)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_reply_escapes_dollar_strings() {
        let temporary_references = TemporaryReferenceSet::default();
        let body = encode_reply(&json!(["$5", "plain", { "a": "$T0" }]), &temporary_references)
            .unwrap();
        assert_eq!(&body[..], br#"["$$5","plain",{"a":"$$T0"}]"#);
    }

    #[test]
    fn test_temporary_references_round_trip() {
        let temporary_references = TemporaryReferenceSet::default();
        let marker = temporary_references.register(json!({ "form": "state" }));
        let body = encode_reply(&json!([marker]), &temporary_references).unwrap();
        assert_eq!(&body[..], br#"["$T0"]"#);

        let elements =
            decode_elements(br#"{"_value":"$T0","a":"$$price"}"#, &temporary_references).unwrap();
        assert_eq!(elements.get("_value"), Some(&Some(json!({ "form": "state" }))));
        assert_eq!(elements.get("a"), Some(&Some(json!("$price"))));
    }

    #[test]
    fn test_undefined_elements() {
        let elements =
            decode_elements(br#"{"a":null,"b":"$undefined"}"#, &Default::default()).unwrap();
        assert_eq!(elements.get("a"), Some(&Some(Value::Null)));
        assert_eq!(elements.get("b"), Some(&None));
    }

    #[test]
    fn test_payload_must_be_an_object() {
        assert!(matches!(
            decode_elements(b"[1]", &Default::default()),
            Err(RscError::Decode(..))
        ));
        assert!(decode_elements(b"{", &Default::default()).is_err());
    }
}
