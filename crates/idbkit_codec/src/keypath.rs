//! Key paths: locating keys inside structured values.

use crate::error::{CodecError, CodecResult};
use crate::key::{validate_key, Key};
use crate::value::Value;
use std::fmt;

/// A key path.
///
/// A string path is empty (the value itself) or a sequence of identifiers
/// joined by `.`. An array path is a non-empty list of string paths whose
/// results are gathered into an array key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPath {
    /// A single (possibly empty) dotted path.
    String(String),
    /// A list of dotted paths producing an array key.
    Array(Vec<String>),
}

impl KeyPath {
    /// Validate and build a single-string key path.
    ///
    /// # Errors
    ///
    /// Fails with [`CodecError::InvalidKeyPath`] if any segment is not an
    /// identifier.
    pub fn parse(path: &str) -> CodecResult<Self> {
        validate_string_path(path)?;
        Ok(KeyPath::String(path.to_string()))
    }

    /// Validate and build an array key path.
    ///
    /// # Errors
    ///
    /// Fails if the list is empty or any member is not a valid string path.
    pub fn parse_array<S: AsRef<str>>(paths: &[S]) -> CodecResult<Self> {
        if paths.is_empty() {
            return Err(CodecError::invalid_key_path("[]"));
        }
        for path in paths {
            validate_string_path(path.as_ref())?;
        }
        Ok(KeyPath::Array(
            paths.iter().map(|p| p.as_ref().to_string()).collect(),
        ))
    }

    /// Whether this is an array path.
    pub fn is_array(&self) -> bool {
        matches!(self, KeyPath::Array(_))
    }

    /// Whether this is the empty string path.
    pub fn is_empty_path(&self) -> bool {
        matches!(self, KeyPath::String(s) if s.is_empty())
    }

    /// Structured form of the path, as exposed by `keyPath` attributes.
    pub fn to_value(&self) -> Value {
        match self {
            KeyPath::String(s) => Value::String(s.clone()),
            KeyPath::Array(paths) => {
                Value::Array(paths.iter().map(|p| Value::String(p.clone())).collect())
            }
        }
    }

    /// Parse the structured form produced by [`KeyPath::to_value`].
    ///
    /// # Errors
    ///
    /// Fails if the value is neither a string nor an array of strings, or if
    /// the path is invalid.
    pub fn from_value(value: &Value) -> CodecResult<Self> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Array(items) => {
                let paths = items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| CodecError::invalid_key_path("non-string member"))
                    })
                    .collect::<CodecResult<Vec<_>>>()?;
                Self::parse_array(&paths)
            }
            _ => Err(CodecError::invalid_key_path("not a string or array")),
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPath::String(s) => write!(f, "{s:?}"),
            KeyPath::Array(paths) => write!(f, "{paths:?}"),
        }
    }
}

impl TryFrom<&str> for KeyPath {
    type Error = CodecError;

    fn try_from(path: &str) -> CodecResult<Self> {
        Self::parse(path)
    }
}

fn validate_string_path(path: &str) -> CodecResult<()> {
    if path.is_empty() {
        return Ok(());
    }
    if path.split('.').all(is_identifier) {
        Ok(())
    } else {
        Err(CodecError::invalid_key_path(path))
    }
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Evaluate a single dotted path against a value.
///
/// Segments read own properties of objects; `length` additionally resolves
/// on strings (UTF-16 length) and arrays. Returns `None` when any step is
/// missing.
fn evaluate_string_path(value: &Value, path: &str) -> Option<Value> {
    if path.is_empty() {
        return Some(value.clone());
    }
    let mut current = value;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let length = match current {
            Value::Object(_) => {
                current = current.get(segment)?;
                continue;
            }
            Value::String(s) if segment == "length" => s.encode_utf16().count(),
            Value::Array(items) if segment == "length" => items.len(),
            _ => return None,
        };
        // A length is a number, which has no further properties.
        return match segments.peek() {
            None => u32::try_from(length).ok().map(Value::from),
            Some(_) => None,
        };
    }
    Some(current.clone())
}

/// Evaluate a key path against a value, without key validation.
///
/// For array paths every member must resolve, otherwise `None`.
pub fn evaluate(value: &Value, path: &KeyPath) -> Option<Value> {
    match path {
        KeyPath::String(p) => evaluate_string_path(value, p),
        KeyPath::Array(paths) => paths
            .iter()
            .map(|p| evaluate_string_path(value, p))
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
    }
}

/// Extract the key identified by `path` from `value`.
///
/// Returns `Ok(None)` when the path does not resolve.
///
/// # Errors
///
/// Fails with [`CodecError::InvalidKey`] when the path resolves to something
/// that is not a valid key.
pub fn extract_key(value: &Value, path: &KeyPath) -> CodecResult<Option<Key>> {
    match evaluate(value, path) {
        Some(found) => validate_key(&found).map(Some),
        None => Ok(None),
    }
}

/// Compute the index keys contributed by `value`.
///
/// Without `multi_entry` this is the single key at `path`. With
/// `multi_entry` and an array result, each valid element contributes one key
/// (invalid ones are skipped, duplicates collapse). Returns `None` when the
/// value contributes no entry at all.
pub fn evaluate_index_keys(value: &Value, path: &KeyPath, multi_entry: bool) -> Option<Vec<Key>> {
    let found = evaluate(value, path)?;
    match found {
        Value::Array(items) if multi_entry => {
            let mut keys: Vec<Key> = items
                .iter()
                .filter_map(|item| validate_key(item).ok())
                .collect();
            keys.sort();
            keys.dedup();
            Some(keys)
        }
        other => validate_key(&other).ok().map(|key| vec![key]),
    }
}

/// Whether `key` could be injected into `value` at `path`.
///
/// True when every existing step before the last is an object (or missing,
/// so that an object can be created) and the root is an object.
pub fn can_inject_key(value: &Value, path: &str) -> bool {
    if path.is_empty() || !value.is_object() {
        return false;
    }
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = value;
    for segment in &segments[..segments.len() - 1] {
        match current.get(segment) {
            None | Some(Value::Undefined | Value::Null) => return true,
            Some(next @ Value::Object(_)) => current = next,
            Some(_) => return false,
        }
    }
    true
}

/// Write `key` into `value` at `path`, creating intermediate objects.
///
/// # Errors
///
/// Fails with [`CodecError::KeyInjection`] when a step along the path is a
/// non-object that cannot hold properties.
pub fn inject_key(value: &mut Value, path: &str, key: &Key) -> CodecResult<()> {
    if path.is_empty() {
        return Err(CodecError::key_injection(path, "empty path"));
    }
    if !value.is_object() {
        return Err(CodecError::key_injection(path, "value is not an object"));
    }
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| CodecError::key_injection(path, "empty path"))?;
    let mut current = value;
    for segment in parents {
        let needs_object = matches!(
            current.get(segment),
            None | Some(Value::Undefined | Value::Null)
        );
        if needs_object {
            current.insert(*segment, Value::Object(Vec::new()));
        }
        current = match current.get_mut(segment) {
            Some(next @ Value::Object(_)) => next,
            _ => {
                return Err(CodecError::key_injection(
                    path,
                    format!("'{segment}' is not an object"),
                ))
            }
        };
    }
    current.insert(*last, key.to_value());
    Ok(())
}
