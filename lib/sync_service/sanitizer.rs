use serde_json::{Map, Value};

use crate::node_client::NameEntry;

/// Value the node reports for names held back by the chain's reservation list.
pub const RESERVED_TOKEN: &str = "RESERVED";
/// Key under which the expiry height is injected into every accepted value.
pub const EXPIRES_KEY: &str = "expires";
const RESERVED_VALUE: &str = r#"{"$reserved":true}"#;

/// A name whose value survived sanitization.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Name without its namespace prefix.
    pub name: String,
    pub raw_value: String,
    pub value: Map<String, Value>,
    pub expires_at_block: i64,
}

impl Record {
    /// Drops store-internal and reserved keys from the value.
    pub fn scrubbed(mut self) -> Self {
        scrub(&mut self.value);
        self
    }
}

/// Why a raw value was dropped. Rejections are expected on-chain noise, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Blank,
    /// None of `{`, `}`, `:` appear, so the value cannot be a JSON object.
    NotJsonLike,
    Malformed(String),
    NotAnObject,
}

/// Turns raw node entries into normalized records.
#[derive(Debug, Clone)]
pub struct RecordSanitizer {
    namespace: String,
}

impl RecordSanitizer {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn clean_entry(&self, entry: &NameEntry, block_height: i64) -> Result<Record, Rejection> {
        self.clean(&entry.name, &entry.value, entry.expires_in, block_height)
    }

    pub fn clean(
        &self,
        name: &str,
        raw_value: &str,
        expires_in: i64,
        block_height: i64,
    ) -> Result<Record, Rejection> {
        let name = strip_namespace(name, &self.namespace);
        let candidate = if raw_value == RESERVED_TOKEN {
            RESERVED_VALUE
        } else {
            raw_value
        };

        if candidate.trim().is_empty() {
            return Err(Rejection::Blank);
        }
        // Cheap pre-check; most garbage values on chain would otherwise flood the parse path.
        if !candidate.contains(|c: char| matches!(c, '{' | '}' | ':')) {
            return Err(Rejection::NotJsonLike);
        }

        let parsed: Value =
            serde_json::from_str(candidate).map_err(|err| Rejection::Malformed(err.to_string()))?;
        let Value::Object(mut value) = parsed else {
            return Err(Rejection::NotAnObject);
        };

        let expires_at_block = block_height.saturating_add(expires_in);
        value.insert(EXPIRES_KEY.to_string(), Value::from(expires_at_block));

        Ok(Record {
            name: name.to_string(),
            raw_value: raw_value.to_string(),
            value,
            expires_at_block,
        })
    }
}

/// Strips a leading `<namespace>/` from `name`, if present.
pub fn strip_namespace<'a>(name: &'a str, namespace: &str) -> &'a str {
    name.strip_prefix(namespace)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(name)
}

pub fn is_internal_key(key: &str) -> bool {
    key.starts_with('_') || key.starts_with('$')
}

/// Removes every top-level `_`/`$` key. Returns how many keys were removed.
pub fn scrub(value: &mut Map<String, Value>) -> usize {
    let before = value.len();
    value.retain(|key, _| !is_internal_key(key));
    before - value.len()
}
