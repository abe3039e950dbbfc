//! Property access mediation.
//!
//! Entities expose their attributes through the [`PropertyAccess`] trait
//! rather than ad hoc getters: an [`AccessPolicy`] (deny-lists and a rename
//! map) is consulted on every access, and writes are coerced to the runtime
//! type of the existing value with a fixed precedence ladder. Rejections set
//! the entity's last-error message and return a structured [`PolicyError`].

use crate::error::PolicyError;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Per-entity access policy.
///
/// Configured once at construction and immutable thereafter, except for the
/// deny-list extension calls intended for an entity's own constructor chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessPolicy {
    deny_read: HashSet<String>,
    deny_write: HashSet<String>,
    rename: HashMap<String, String>,
}

impl AccessPolicy {
    /// Create an empty policy (everything readable and writable).
    pub fn new() -> Self {
        Self::default()
    }

    /// Deny reads of the given fields.
    pub fn with_deny_read<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deny_read.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Deny writes of the given fields.
    pub fn with_deny_write<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deny_write.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Map an external field name to an internal one.
    pub fn with_rename(mut self, external: impl Into<String>, internal: impl Into<String>) -> Self {
        self.rename.insert(external.into(), internal.into());
        self
    }

    /// Extend the read deny-list. Intended for constructor chains.
    pub fn extend_deny_read(&mut self, field: impl Into<String>) {
        self.deny_read.insert(field.into());
    }

    /// Extend the write deny-list. Intended for constructor chains.
    pub fn extend_deny_write(&mut self, field: impl Into<String>) {
        self.deny_write.insert(field.into());
    }

    /// Resolve an external field name to its internal name.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.rename.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn is_read_denied(&self, internal: &str) -> bool {
        self.deny_read.contains(internal)
    }

    pub fn is_write_denied(&self, internal: &str) -> bool {
        self.deny_write.contains(internal)
    }
}

/// Human-readable JSON type name for error messages.
fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Coerce `incoming` to the runtime type of `existing`.
///
/// Precedence, checked in order:
/// 1. existing null accepts anything
/// 2. matching JSON type passes through
/// 3. existing array accepts a JSON-decodable string that parses to an array
/// 4. existing bool accepts truthy/falsy strings and numbers
/// 5. existing number accepts numeric strings, bools (0/1) and arrays
///    (empty = 0, non-empty = 1), cast to the existing numeric flavor
/// 6. anything else is a type mismatch
pub fn coerce(field: &str, existing: &Value, incoming: Value) -> Result<Value, PolicyError> {
    let mismatch = |incoming: &Value| PolicyError::TypeMismatch {
        field: field.to_string(),
        expected: type_name(existing).to_string(),
        got: type_name(incoming).to_string(),
    };

    match existing {
        Value::Null => Ok(incoming),
        Value::String(_) => match incoming {
            Value::String(_) => Ok(incoming),
            other => Err(mismatch(&other)),
        },
        Value::Object(_) => match incoming {
            Value::Object(_) => Ok(incoming),
            other => Err(mismatch(&other)),
        },
        Value::Array(_) => match incoming {
            Value::Array(_) => Ok(incoming),
            Value::String(s) => match serde_json::from_str::<Value>(&s) {
                Ok(parsed @ Value::Array(_)) => Ok(parsed),
                _ => Err(mismatch(&Value::String(s))),
            },
            other => Err(mismatch(&other)),
        },
        Value::Bool(_) => match incoming {
            Value::Bool(_) => Ok(incoming),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Value::Bool(true)),
                "0" | "false" | "no" | "off" | "" => Ok(Value::Bool(false)),
                _ => Err(mismatch(&Value::String(s))),
            },
            Value::Number(n) => Ok(Value::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(true))),
            other => Err(mismatch(&other)),
        },
        Value::Number(existing_n) => {
            let integral = existing_n.is_i64() || existing_n.is_u64();
            let as_number = |f: f64, incoming: &Value| -> Result<Value, PolicyError> {
                if integral {
                    Ok(Value::from(f as i64))
                } else {
                    serde_json::Number::from_f64(f)
                        .map(Value::Number)
                        .ok_or_else(|| mismatch(incoming))
                }
            };
            match incoming {
                Value::Number(_) if !integral => Ok(incoming),
                Value::Number(n) => {
                    let f = n.as_f64().ok_or_else(|| mismatch(&Value::Number(n.clone())))?;
                    as_number(f, &Value::Number(n))
                }
                Value::String(s) => match s.trim().parse::<f64>() {
                    Ok(f) => as_number(f, &Value::String(s)),
                    Err(_) => Err(mismatch(&Value::String(s))),
                },
                Value::Bool(b) => as_number(if b { 1.0 } else { 0.0 }, &Value::Bool(b)),
                Value::Array(items) => {
                    let f = if items.is_empty() { 0.0 } else { 1.0 };
                    as_number(f, &Value::Array(items))
                }
                other => Err(mismatch(&other)),
            }
        }
    }
}

/// Mediated attribute access.
///
/// Implementors supply the backing field map, the policy and last-error
/// storage; `get_field`/`set_field` are provided and apply rename,
/// deny-lists and write coercion uniformly.
pub trait PropertyAccess {
    /// The backing attribute map.
    fn fields(&self) -> &Map<String, Value>;

    /// Mutable access to the backing attribute map.
    fn fields_mut(&mut self) -> &mut Map<String, Value>;

    /// The access policy for this entity.
    fn policy(&self) -> &AccessPolicy;

    /// Record (or clear) the last mediation error.
    fn record_error(&mut self, message: Option<String>);

    /// The last mediation error, if any.
    fn last_error(&self) -> Option<&str>;

    /// Read an attribute through the policy.
    fn get_field(&mut self, name: &str) -> Result<Value, PolicyError> {
        let internal = self.policy().resolve(name).to_string();
        let result = if self.policy().is_read_denied(&internal) {
            Err(PolicyError::DeniedRead {
                field: name.to_string(),
            })
        } else {
            self.fields()
                .get(&internal)
                .cloned()
                .ok_or_else(|| PolicyError::UnknownField {
                    field: name.to_string(),
                })
        };
        match &result {
            Ok(_) => self.record_error(None),
            Err(e) => self.record_error(Some(e.to_string())),
        }
        result
    }

    /// Write an attribute through the policy, coercing to the existing type.
    ///
    /// A rejected write leaves the stored value unchanged.
    fn set_field(&mut self, name: &str, value: Value) -> Result<(), PolicyError> {
        let internal = self.policy().resolve(name).to_string();
        let result = (|| {
            if self.policy().is_write_denied(&internal) {
                return Err(PolicyError::DeniedWrite {
                    field: name.to_string(),
                });
            }
            let existing = self
                .fields()
                .get(&internal)
                .ok_or_else(|| PolicyError::UnknownField {
                    field: name.to_string(),
                })?;
            let coerced = coerce(name, existing, value)?;
            self.fields_mut().insert(internal.clone(), coerced);
            Ok(())
        })();
        match &result {
            Ok(()) => self.record_error(None),
            Err(e) => self.record_error(Some(e.to_string())),
        }
        result
    }
}
