//! Profile operation application.

use crate::error::{ProfileError, Result};
use crate::path::{self, ProfilePath};
use crate::value::{Scalar, Value};
use serde::{Deserialize, Serialize};

/// A mutation of profile data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ProfileOperation {
    /// Overwrite a scalar slot. Composites are rejected.
    Set { path: ProfilePath, value: Value },

    /// Insert a composite under `key` of a map, or push it onto a list.
    AddTable {
        path: ProfilePath,
        value: Value,
        key: Option<String>,
    },

    /// Add a number in place. An absent slot counts as zero.
    Increment { path: ProfilePath, delta: Value },

    /// Remove a key or list index. Absent slots are left alone.
    Delete { path: ProfilePath },
}

impl ProfileOperation {
    /// The path the caller addressed.
    pub fn path(&self) -> &ProfilePath {
        match self {
            ProfileOperation::Set { path, .. }
            | ProfileOperation::AddTable { path, .. }
            | ProfileOperation::Increment { path, .. }
            | ProfileOperation::Delete { path } => path,
        }
    }

    pub fn action(&self) -> ChangeAction {
        match self {
            ProfileOperation::Set { .. } => ChangeAction::Set,
            ProfileOperation::AddTable { .. } => ChangeAction::AddTable,
            ProfileOperation::Increment { .. } => ChangeAction::Increment,
            ProfileOperation::Delete { .. } => ChangeAction::Delete,
        }
    }
}

/// Which operation produced a change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Set,
    AddTable,
    Increment,
    Delete,
}

/// The effect of a successful operation, as replicated to subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileChange {
    pub action: ChangeAction,

    /// The slot that was written. For keyless `AddTable` this includes the
    /// index the value was appended at.
    pub path: ProfilePath,

    /// New value of the slot (None when removed).
    pub value: Option<Value>,
}

/// Apply an operation to profile data.
///
/// Either the operation succeeds completely or `data` is left untouched.
/// Returns `None` when the operation had no effect (deleting an absent slot).
pub fn apply_operation(data: &mut Value, operation: &ProfileOperation) -> Result<Option<ProfileChange>> {
    match operation {
        ProfileOperation::Set { path, value } => {
            if value.is_composite() {
                return Err(ProfileError::type_mismatch(
                    path.as_str(),
                    "scalar",
                    value.kind().to_string(),
                ));
            }

            let (parent, last) = path::resolve_parent_mut(data, path)?;
            if let Some(existing) = child_of(parent, last.key(), last.index()) {
                if existing.is_composite() {
                    return Err(ProfileError::type_mismatch(
                        path.as_str(),
                        "scalar slot",
                        existing.kind().to_string(),
                    ));
                }
                if !same_scalar_kind(existing, value) {
                    return Err(ProfileError::type_mismatch(
                        path.as_str(),
                        existing.kind().to_string(),
                        value.kind().to_string(),
                    ));
                }
            }

            write_slot(parent, path, last.key(), last.index(), value.clone())?;

            Ok(Some(ProfileChange {
                action: ChangeAction::Set,
                path: path.clone(),
                value: Some(value.clone()),
            }))
        }

        ProfileOperation::AddTable { path, value, key } => {
            if !value.is_composite() {
                return Err(ProfileError::type_mismatch(
                    path.as_str(),
                    "list or map",
                    value.kind().to_string(),
                ));
            }

            let target = path::resolve_mut(data, path)?;
            let written = match (target, key) {
                (Value::Map(entries), Some(key)) => {
                    let child = path.join(key)?;
                    entries.insert(key.clone(), value.clone());
                    child
                }
                (Value::List(items), None) => {
                    let child = path.join(&items.len().to_string())?;
                    items.push(value.clone());
                    child
                }
                (Value::Map(_), None) => {
                    return Err(ProfileError::invalid_path(
                        path.as_str(),
                        "a map needs a key to insert under",
                    ))
                }
                (Value::List(_), Some(key)) => {
                    return Err(ProfileError::invalid_path(
                        path.as_str(),
                        format!("cannot insert key '{}' into a list", key),
                    ))
                }
                (other, _) => {
                    return Err(ProfileError::invalid_path(
                        path.as_str(),
                        format!("target is a {}, not a list or map", other.kind()),
                    ))
                }
            };

            Ok(Some(ProfileChange {
                action: ChangeAction::AddTable,
                path: written,
                value: Some(value.clone()),
            }))
        }

        ProfileOperation::Increment { path, delta } => {
            if !delta.is_number() {
                return Err(ProfileError::type_mismatch(
                    path.as_str(),
                    "number",
                    delta.kind().to_string(),
                ));
            }

            let (parent, last) = path::resolve_parent_mut(data, path)?;
            let current = child_of(parent, last.key(), last.index())
                .cloned()
                .unwrap_or(Value::Scalar(Scalar::Int(0)));

            let updated = add_numbers(&current, delta).ok_or_else(|| match &current {
                Value::Scalar(Scalar::Int(_)) => {
                    ProfileError::InvalidOperation(format!("integer overflow at '{}'", path))
                }
                other => ProfileError::type_mismatch(path.as_str(), "number", other.kind().to_string()),
            })?;

            write_slot(parent, path, last.key(), last.index(), updated.clone())?;

            Ok(Some(ProfileChange {
                action: ChangeAction::Increment,
                path: path.clone(),
                value: Some(updated),
            }))
        }

        ProfileOperation::Delete { path } => {
            let (parent, last) = path::resolve_parent_mut(data, path)?;
            let removed = match parent {
                Value::Map(entries) => entries.remove(last.key()).is_some(),
                Value::List(items) => match last.index() {
                    Some(i) if i < items.len() => {
                        items.remove(i);
                        true
                    }
                    _ => false,
                },
                Value::Scalar(_) => false,
            };

            Ok(removed.then(|| ProfileChange {
                action: ChangeAction::Delete,
                path: path.clone(),
                value: None,
            }))
        }
    }
}

fn child_of<'a>(container: &'a Value, key: &str, index: Option<usize>) -> Option<&'a Value> {
    match container {
        Value::Map(entries) => entries.get(key),
        Value::List(items) => index.and_then(|i| items.get(i)),
        Value::Scalar(_) => None,
    }
}

/// Ints and floats are interchangeable; every other kind must match.
fn same_scalar_kind(existing: &Value, new: &Value) -> bool {
    existing.kind() == new.kind() || (existing.is_number() && new.is_number())
}

/// Write into a map key or a list slot. A list accepts its own length as an
/// append position.
fn write_slot(
    container: &mut Value,
    path: &ProfilePath,
    key: &str,
    index: Option<usize>,
    value: Value,
) -> Result<()> {
    match container {
        Value::Map(entries) => {
            entries.insert(key.to_string(), value);
            Ok(())
        }
        Value::List(items) => match index {
            Some(i) if i < items.len() => {
                items[i] = value;
                Ok(())
            }
            Some(i) if i == items.len() => {
                items.push(value);
                Ok(())
            }
            _ => Err(ProfileError::invalid_path(
                path.as_str(),
                format!("index '{}' out of range (len {})", key, items.len()),
            )),
        },
        Value::Scalar(_) => Err(ProfileError::invalid_path(path.as_str(), "parent is not composite")),
    }
}

/// Numeric addition. Integers stay integers unless a float is involved.
/// Returns None for non-numbers or integer overflow.
fn add_numbers(current: &Value, delta: &Value) -> Option<Value> {
    match (current, delta) {
        (Value::Scalar(Scalar::Int(a)), Value::Scalar(Scalar::Int(b))) => {
            a.checked_add(*b).map(Value::from)
        }
        _ => {
            let a = current.as_f64()?;
            let b = delta.as_f64()?;
            Some(Value::from(a + b))
        }
    }
}

/// Fill keys missing from `data` with the template's defaults.
///
/// Recurses into maps present on both sides. Existing values are never
/// overwritten, and lists are left as stored. Returns the number of keys
/// added.
pub fn reconcile(data: &mut Value, template: &Value) -> usize {
    let (Value::Map(entries), Value::Map(defaults)) = (data, template) else {
        return 0;
    };

    let mut added = 0;
    for (key, default) in defaults {
        match entries.get_mut(key) {
            Some(existing) => added += reconcile(existing, default),
            None => {
                entries.insert(key.clone(), default.clone());
                added += 1;
            }
        }
    }
    added
}
