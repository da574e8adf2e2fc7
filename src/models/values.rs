//! Values documents
//!
//! A chart's configuration payload is an arbitrary YAML/JSON tree. It is kept
//! as a closed recursive enum so merging is an exhaustive `match` rather than
//! a series of dynamic type checks.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest list index accepted by [`Values::set_path`].
pub const MAX_PATH_INDEX: usize = 65536;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Values {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<Values>),
    Map(BTreeMap<String, Values>),
}

impl Values {
    pub fn empty_map() -> Self {
        Values::Map(BTreeMap::new())
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Values::Map(_))
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Values>> {
        match self {
            Values::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Values::String(s) => Some(s),
            _ => None,
        }
    }

    /// Parse a YAML (or JSON) document. Non-string map keys are stringified.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let raw: serde_yaml::Value = serde_yaml::from_str(s)?;
        Ok(Values::from(raw))
    }

    /// Parse a document that must be a map. An empty document is an empty map.
    pub fn map_from_yaml_str(s: &str) -> Result<Self> {
        match Self::from_yaml_str(s)? {
            Values::Null => Ok(Self::empty_map()),
            v @ Values::Map(_) => Ok(v),
            other => Err(Error::values(format!(
                "values document must be a map, got {}",
                other.kind_name()
            ))),
        }
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Values::Null => serde_json::Value::Null,
            Values::Bool(b) => serde_json::Value::Bool(*b),
            Values::Number(n) => serde_json::Value::Number(n.clone()),
            Values::String(s) => serde_json::Value::String(s.clone()),
            Values::List(items) => {
                serde_json::Value::Array(items.iter().map(Values::to_json).collect())
            }
            Values::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Values::Null => "null",
            Values::Bool(_) => "bool",
            Values::Number(_) => "number",
            Values::String(_) => "string",
            Values::List(_) => "list",
            Values::Map(_) => "map",
        }
    }

    /// Deep-merge `src` into `self`.
    ///
    /// Keys present in both as maps are merged recursively. Any other value
    /// from `src` replaces what `self` holds at that key, including a map.
    /// When either side is not a map, `src` replaces `self` outright.
    pub fn merge(&mut self, src: Values) {
        match (self, src) {
            (Values::Map(dest), Values::Map(src)) => {
                for (key, value) in src {
                    match dest.get_mut(&key) {
                        Some(existing) if existing.is_map() && value.is_map() => {
                            existing.merge(value);
                        }
                        _ => {
                            dest.insert(key, value);
                        }
                    }
                }
            }
            (dest, src) => *dest = src,
        }
    }

    /// Assign one scalar at a dotted path such as `ingress.hosts[0].name`.
    ///
    /// Dots inside a key are escaped as `\.`. The raw text is typed the way a
    /// `--set` flag is: `true`/`false`, `null` and integers without a leading
    /// zero become typed scalars, everything else stays a string.
    pub fn set_path(&mut self, path: &str, raw: &str) -> Result<()> {
        let segments = parse_path(path)?;
        if !self.is_map() {
            *self = Self::empty_map();
        }
        set_segments(self, &segments, typed_scalar(raw.trim()));
        Ok(())
    }

    /// Look up a dotted path. Intended for inspection and tests.
    pub fn lookup(&self, path: &str) -> Option<&Values> {
        let segments = parse_path(path).ok()?;
        let mut cur = self;
        for seg in &segments {
            cur = match (seg, cur) {
                (Segment::Key(k), Values::Map(m)) => m.get(k)?,
                (Segment::Index(i), Values::List(l)) => l.get(*i)?,
                _ => return None,
            };
        }
        Some(cur)
    }
}

impl From<serde_yaml::Value> for Values {
    fn from(v: serde_yaml::Value) -> Self {
        match v {
            serde_yaml::Value::Null => Values::Null,
            serde_yaml::Value::Bool(b) => Values::Bool(b),
            serde_yaml::Value::Number(n) => number_from_yaml(&n),
            serde_yaml::Value::String(s) => Values::String(s),
            serde_yaml::Value::Sequence(items) => {
                Values::List(items.into_iter().map(Values::from).collect())
            }
            serde_yaml::Value::Mapping(m) => Values::Map(
                m.into_iter()
                    .map(|(k, v)| (yaml_key(k), Values::from(v)))
                    .collect(),
            ),
            serde_yaml::Value::Tagged(tagged) => Values::from(tagged.value),
        }
    }
}

impl From<serde_json::Value> for Values {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Values::Null,
            serde_json::Value::Bool(b) => Values::Bool(b),
            serde_json::Value::Number(n) => Values::Number(n),
            serde_json::Value::String(s) => Values::String(s),
            serde_json::Value::Array(items) => {
                Values::List(items.into_iter().map(Values::from).collect())
            }
            serde_json::Value::Object(m) => {
                Values::Map(m.into_iter().map(|(k, v)| (k, Values::from(v))).collect())
            }
        }
    }
}

impl fmt::Display for Values {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Values::Null => f.write_str("null"),
            Values::Bool(b) => write!(f, "{}", b),
            Values::Number(n) => write!(f, "{}", n),
            Values::String(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

fn number_from_yaml(n: &serde_yaml::Number) -> Values {
    if let Some(i) = n.as_i64() {
        Values::Number(i.into())
    } else if let Some(u) = n.as_u64() {
        Values::Number(u.into())
    } else {
        n.as_f64()
            .and_then(serde_json::Number::from_f64)
            .map(Values::Number)
            .unwrap_or(Values::Null)
    }
}

fn yaml_key(k: serde_yaml::Value) -> String {
    match k {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut key = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => key.push(escaped),
                None => key.push('\\'),
            },
            '.' => {
                if !key.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut key)));
                } else if !matches!(segments.last(), Some(Segment::Index(_))) {
                    return Err(Error::values(format!("empty key in path {:?}", path)));
                }
            }
            '[' => {
                if !key.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut key)));
                }
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) => digits.push(d),
                        None => {
                            return Err(Error::values(format!(
                                "unterminated index in path {:?}",
                                path
                            )));
                        }
                    }
                }
                let idx: usize = digits.trim().parse().map_err(|_| {
                    Error::values(format!("invalid index {:?} in path {:?}", digits, path))
                })?;
                if idx > MAX_PATH_INDEX {
                    return Err(Error::values(format!(
                        "index {} exceeds maximum {} in path {:?}",
                        idx, MAX_PATH_INDEX, path
                    )));
                }
                segments.push(Segment::Index(idx));
            }
            other => key.push(other),
        }
    }
    if !key.is_empty() {
        segments.push(Segment::Key(key));
    }
    if segments.is_empty() {
        return Err(Error::values("empty target path"));
    }
    if matches!(segments.first(), Some(Segment::Index(_))) {
        return Err(Error::values(format!(
            "path {:?} must start with a key",
            path
        )));
    }
    Ok(segments)
}

fn set_segments(node: &mut Values, segments: &[Segment], value: Values) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    match head {
        Segment::Key(k) => {
            if !node.is_map() {
                *node = Values::empty_map();
            }
            if let Values::Map(m) = node {
                let child = m.entry(k.clone()).or_insert(Values::Null);
                set_segments(child, rest, value);
            }
        }
        Segment::Index(i) => {
            if !matches!(node, Values::List(_)) {
                *node = Values::List(Vec::new());
            }
            if let Values::List(list) = node {
                if list.len() <= *i {
                    list.resize(*i + 1, Values::Null);
                }
                set_segments(&mut list[*i], rest, value);
            }
        }
    }
}

fn typed_scalar(raw: &str) -> Values {
    if raw.eq_ignore_ascii_case("true") {
        return Values::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Values::Bool(false);
    }
    if raw.eq_ignore_ascii_case("null") {
        return Values::Null;
    }
    if raw == "0" {
        return Values::Number(0.into());
    }
    if !raw.is_empty() && !raw.starts_with('0') {
        if let Ok(i) = raw.parse::<i64>() {
            return Values::Number(i.into());
        }
    }
    Values::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Values {
        Values::from_yaml_str(s).unwrap()
    }

    #[test]
    fn test_nested_maps_merge_and_siblings_survive() {
        let mut acc = yaml("a: {b: 1, c: 2}");
        acc.merge(yaml("a: {b: 9}"));
        assert_eq!(acc, yaml("a: {b: 9, c: 2}"));
    }

    #[test]
    fn test_scalar_overwrites_map_and_map_overwrites_scalar() {
        let mut acc = yaml("a: {b: 1}\nc: 3");
        acc.merge(yaml("a: flat\nc: {d: 4}"));
        assert_eq!(acc, yaml("a: flat\nc: {d: 4}"));
    }

    #[test]
    fn test_lists_are_replaced_not_concatenated() {
        let mut acc = yaml("hosts: [a, b]");
        acc.merge(yaml("hosts: [c]"));
        assert_eq!(acc, yaml("hosts: [c]"));
    }

    #[test]
    fn test_set_path_types_scalars() {
        let mut v = Values::empty_map();
        v.set_path("image.tag", "1.2.3").unwrap();
        v.set_path("replicas", "3").unwrap();
        v.set_path("debug", "true").unwrap();
        v.set_path("zip", "0123").unwrap();
        v.set_path("nothing", "null").unwrap();

        assert_eq!(v.lookup("image.tag"), Some(&Values::String("1.2.3".into())));
        assert_eq!(v.lookup("replicas"), Some(&Values::Number(3.into())));
        assert_eq!(v.lookup("debug"), Some(&Values::Bool(true)));
        assert_eq!(v.lookup("zip"), Some(&Values::String("0123".into())));
        assert_eq!(v.lookup("nothing"), Some(&Values::Null));
    }

    #[test]
    fn test_set_path_escaped_dots_and_indexes() {
        let mut v = Values::empty_map();
        v.set_path(r"annotations.example\.com/team", "web").unwrap();
        v.set_path("ingress.hosts[1].name", "b.example.com").unwrap();

        let annotations = v.lookup("annotations").and_then(Values::as_map).unwrap();
        assert_eq!(
            annotations.get("example.com/team"),
            Some(&Values::String("web".into()))
        );
        assert_eq!(v.lookup("ingress.hosts[0]"), Some(&Values::Null));
        assert_eq!(
            v.lookup("ingress.hosts[1].name"),
            Some(&Values::String("b.example.com".into()))
        );
    }

    #[test]
    fn test_set_path_rejects_bad_paths() {
        let mut v = Values::empty_map();
        assert!(v.set_path("", "x").is_err());
        assert!(v.set_path("a..b", "x").is_err());
        assert!(v.set_path("a[x]", "x").is_err());
        assert!(v.set_path("a[70000]", "x").is_err());
        assert!(v.set_path("[0]", "x").is_err());
    }

    #[test]
    fn test_yaml_round_trip_keeps_structure() {
        let original = yaml("service:\n  port: 8080\n  labels:\n    app: web\nenabled: true\n");
        let text = original.to_yaml_string().unwrap();
        assert_eq!(Values::from_yaml_str(&text).unwrap(), original);
    }

    #[test]
    fn test_non_string_keys_are_stringified() {
        let v = yaml("1: one\ntrue: yes");
        let m = v.as_map().unwrap();
        assert!(m.contains_key("1"));
        assert!(m.contains_key("true"));
    }

    #[test]
    fn test_map_from_yaml_rejects_lists_and_accepts_empty() {
        assert_eq!(Values::map_from_yaml_str("").unwrap(), Values::empty_map());
        assert!(Values::map_from_yaml_str("- a\n- b").is_err());
    }

    #[test]
    fn test_json_conversion() {
        let v = Values::from(serde_json::json!({"a": [1, "x", null], "b": {"c": false}}));
        assert_eq!(
            v.to_json(),
            serde_json::json!({"a": [1, "x", null], "b": {"c": false}})
        );
    }
}
