//! Dotted paths into profile data.
//!
//! A path like `"stats.gold"` is parsed once into typed segments and then
//! resolved against a [`Value`] tree without re-splitting the string.
//!
//! - Against a map, a segment is a literal key (even when it is numeric).
//! - Against a list, a segment must be a 0-based decimal index.
//! - The empty string is the root path.

use crate::error::{ProfileError, Result};
use crate::value::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// One component of a [`ProfilePath`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Segment {
    key: String,
    index: Option<usize>,
}

impl Segment {
    fn parse(raw: &str) -> Self {
        let index = if raw.bytes().all(|b| b.is_ascii_digit()) {
            raw.parse().ok()
        } else {
            None
        };
        Self {
            key: raw.to_string(),
            index,
        }
    }

    /// The segment as a map key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The segment as a list index, if it is numeric.
    pub fn index(&self) -> Option<usize> {
        self.index
    }
}

/// A validated, pre-split path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct ProfilePath {
    raw: String,
    segments: Vec<Segment>,
}

impl ProfilePath {
    /// The root of a profile.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dotted path.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for part in raw.split('.') {
            if part.is_empty() {
                return Err(ProfileError::invalid_path(raw, "empty segment"));
            }
            segments.push(Segment::parse(part));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Path of a child entry under this path.
    pub fn join(&self, key: &str) -> Result<Self> {
        if key.is_empty() || key.contains('.') {
            return Err(ProfileError::invalid_path(
                key,
                "child key must be non-empty and contain no '.'",
            ));
        }
        let raw = if self.is_root() {
            key.to_string()
        } else {
            format!("{}.{}", self.raw, key)
        };
        let mut segments = self.segments.clone();
        segments.push(Segment::parse(key));
        Ok(Self { raw, segments })
    }

    /// Split into the parent segments and the terminal segment.
    pub fn split_last(&self) -> Option<(&Segment, &[Segment])> {
        self.segments.split_last()
    }
}

impl fmt::Display for ProfilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.raw)
        }
    }
}

impl FromStr for ProfilePath {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self> {
        ProfilePath::parse(s)
    }
}

impl Serialize for ProfilePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for ProfilePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ProfilePath::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Anything that can be turned into a validated [`ProfilePath`].
pub trait IntoProfilePath {
    fn into_profile_path(self) -> Result<ProfilePath>;
}

impl IntoProfilePath for ProfilePath {
    fn into_profile_path(self) -> Result<ProfilePath> {
        Ok(self)
    }
}

impl IntoProfilePath for &ProfilePath {
    fn into_profile_path(self) -> Result<ProfilePath> {
        Ok(self.clone())
    }
}

impl IntoProfilePath for &str {
    fn into_profile_path(self) -> Result<ProfilePath> {
        ProfilePath::parse(self)
    }
}

impl IntoProfilePath for String {
    fn into_profile_path(self) -> Result<ProfilePath> {
        ProfilePath::parse(&self)
    }
}

impl IntoProfilePath for &String {
    fn into_profile_path(self) -> Result<ProfilePath> {
        ProfilePath::parse(self)
    }
}

// --- Resolution ---

fn child<'a>(node: &'a Value, segment: &Segment, path: &ProfilePath) -> Result<Option<&'a Value>> {
    match node {
        Value::Map(entries) => Ok(entries.get(segment.key())),
        Value::List(items) => match segment.index() {
            Some(i) => Ok(items.get(i)),
            None => Err(ProfileError::invalid_path(
                path.as_str(),
                format!("'{}' is not a list index", segment.key()),
            )),
        },
        Value::Scalar(_) => Err(ProfileError::invalid_path(
            path.as_str(),
            format!("cannot descend into {} at '{}'", node.kind(), segment.key()),
        )),
    }
}

fn child_mut<'a>(node: &'a mut Value, segment: &Segment, path: &ProfilePath) -> Result<&'a mut Value> {
    let kind = node.kind();
    let found = match node {
        Value::Map(entries) => entries.get_mut(segment.key()),
        Value::List(items) => match segment.index() {
            Some(i) => items.get_mut(i),
            None => {
                return Err(ProfileError::invalid_path(
                    path.as_str(),
                    format!("'{}' is not a list index", segment.key()),
                ))
            }
        },
        Value::Scalar(_) => {
            return Err(ProfileError::invalid_path(
                path.as_str(),
                format!("cannot descend into {} at '{}'", kind, segment.key()),
            ))
        }
    };
    found.ok_or_else(|| {
        ProfileError::invalid_path(path.as_str(), format!("'{}' does not exist", segment.key()))
    })
}

/// Read the value at `path`.
///
/// Returns `Ok(None)` when only the terminal is absent; a missing or scalar
/// intermediate is an `InvalidPath` error.
pub fn get<'a>(root: &'a Value, path: &ProfilePath) -> Result<Option<&'a Value>> {
    let Some((last, parents)) = path.split_last() else {
        return Ok(Some(root));
    };

    let mut node = root;
    for segment in parents {
        node = child(node, segment, path)?.ok_or_else(|| {
            ProfileError::invalid_path(path.as_str(), format!("'{}' does not exist", segment.key()))
        })?;
    }
    child(node, last, path)
}

/// Resolve the existing node at `path` for mutation.
pub fn resolve_mut<'a>(root: &'a mut Value, path: &ProfilePath) -> Result<&'a mut Value> {
    let mut node = root;
    for segment in path.segments() {
        node = child_mut(node, segment, path)?;
    }
    Ok(node)
}

/// Resolve the container holding the terminal of `path`.
///
/// The returned container is guaranteed to be a list or a map; the terminal
/// itself may or may not exist. The root path has no terminal and is
/// rejected.
pub fn resolve_parent_mut<'a, 'p>(
    root: &'a mut Value,
    path: &'p ProfilePath,
) -> Result<(&'a mut Value, &'p Segment)> {
    let (last, parents) = path
        .split_last()
        .ok_or_else(|| ProfileError::invalid_path(path.as_str(), "path has no terminal key"))?;

    let mut node = root;
    for segment in parents {
        node = child_mut(node, segment, path)?;
    }

    if !node.is_composite() {
        return Err(ProfileError::invalid_path(
            path.as_str(),
            format!("parent of '{}' is a {}", last.key(), node.kind()),
        ));
    }
    if matches!(node, Value::List(_)) && last.index().is_none() {
        return Err(ProfileError::invalid_path(
            path.as_str(),
            format!("'{}' is not a list index", last.key()),
        ));
    }

    Ok((node, last))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        Value::from_json(json!({
            "stats": {"gold": 5},
            "items": [{"id": 1}, {"id": 2}],
            "10": "numeric key"
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_segments() {
        let path = ProfilePath::parse("items.1.id").unwrap();
        let segments = path.segments();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].index(), None);
        assert_eq!(segments[1].index(), Some(1));
        assert_eq!(segments[2].key(), "id");
    }

    #[test]
    fn test_parse_rejects_empty_segments() {
        for raw in ["a..b", ".a", "a.", "."] {
            assert!(
                matches!(ProfilePath::parse(raw), Err(ProfileError::InvalidPath { .. })),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_empty_string_is_root() {
        let path = ProfilePath::parse("").unwrap();
        assert!(path.is_root());
        let data = sample();
        assert_eq!(get(&data, &path).unwrap(), Some(&data));
    }

    #[test]
    fn test_get_nested() {
        let data = sample();
        let gold = get(&data, &"stats.gold".parse().unwrap()).unwrap();
        assert_eq!(gold, Some(&Value::from(5)));

        let id = get(&data, &"items.1.id".parse().unwrap()).unwrap();
        assert_eq!(id, Some(&Value::from(2)));
    }

    #[test]
    fn test_numeric_segment_is_a_key_on_maps() {
        let data = sample();
        let value = get(&data, &"10".parse().unwrap()).unwrap();
        assert_eq!(value.and_then(Value::as_str), Some("numeric key"));
    }

    #[test]
    fn test_get_missing_terminal_is_none() {
        let data = sample();
        assert_eq!(get(&data, &"stats.xp".parse().unwrap()).unwrap(), None);
        assert_eq!(get(&data, &"items.9".parse().unwrap()).unwrap(), None);
    }

    #[test]
    fn test_get_missing_intermediate_fails() {
        let data = sample();
        let result = get(&data, &"quests.active".parse().unwrap());
        assert!(matches!(result, Err(ProfileError::InvalidPath { .. })));
    }

    #[test]
    fn test_descending_into_scalar_fails() {
        let mut data = sample();
        let path: ProfilePath = "stats.gold.amount".parse().unwrap();
        assert!(matches!(get(&data, &path), Err(ProfileError::InvalidPath { .. })));
        assert!(matches!(
            resolve_parent_mut(&mut data, &path),
            Err(ProfileError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_list_requires_numeric_segment() {
        let mut data = sample();
        let path: ProfilePath = "items.first".parse().unwrap();
        assert!(matches!(
            resolve_parent_mut(&mut data, &path),
            Err(ProfileError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_resolve_parent_of_root_fails() {
        let mut data = sample();
        assert!(resolve_parent_mut(&mut data, &ProfilePath::root()).is_err());
    }

    #[test]
    fn test_join() {
        let path = ProfilePath::parse("inventory").unwrap();
        let child = path.join("sword").unwrap();
        assert_eq!(child.as_str(), "inventory.sword");
        assert_eq!(ProfilePath::root().join("gold").unwrap().as_str(), "gold");
        assert!(path.join("a.b").is_err());
    }
}
