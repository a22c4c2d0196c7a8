//! Resource model
//!
//! A resource is a named quantity with one of three shapes: a scalar, a set
//! of disjoint inclusive integer ranges (ports), or a set of strings.
//! Resources of the same name combine by shape-specific addition and
//! subtraction. Subtracting more than is present is an error, never a
//! silent clamp.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Scalars are kept at millesimal precision so repeated add/subtract is exact.
const SCALAR_SCALE: f64 = 1000.0;

fn normalize_scalar(value: f64) -> f64 {
    (value * SCALAR_SCALE).round() / SCALAR_SCALE
}

/// Errors produced by resource arithmetic and parsing
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResourceError {
    #[error("Resource {name} is a {existing} but a {incoming} was supplied")]
    ShapeMismatch {
        name: String,
        existing: &'static str,
        incoming: &'static str,
    },

    #[error("Subtracting {name} would underflow")]
    Underflow { name: String },

    #[error("Failed to parse resources '{input}': {reason}")]
    Parse { input: String, reason: String },
}

/// Result type for resource operations
pub type ResourceResult<T> = std::result::Result<T, ResourceError>;

/// An inclusive integer interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Range {
    pub begin: u64,
    pub end: u64,
}

impl Range {
    pub fn new(begin: u64, end: u64) -> Self {
        Self {
            begin: begin.min(end),
            end: begin.max(end),
        }
    }

    fn covers(&self, other: &Range) -> bool {
        self.begin <= other.begin && other.end <= self.end
    }
}

/// A normalized set of disjoint, non-adjacent, sorted ranges
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RangeSet(Vec<Range>);

impl RangeSet {
    pub fn new(ranges: impl IntoIterator<Item = Range>) -> Self {
        let mut ranges: Vec<Range> = ranges.into_iter().collect();
        ranges.sort();

        let mut merged: Vec<Range> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if range.begin <= last.end.saturating_add(1) => {
                    last.end = last.end.max(range.end);
                }
                _ => merged.push(range),
            }
        }

        Self(merged)
    }

    pub fn from_pairs(pairs: &[(u64, u64)]) -> Self {
        Self::new(pairs.iter().map(|(b, e)| Range::new(*b, *e)))
    }

    pub fn ranges(&self) -> &[Range] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, other: &RangeSet) -> bool {
        // Both sides are merged, so each range of `other` must sit inside a single range here.
        other
            .0
            .iter()
            .all(|needle| self.0.iter().any(|hay| hay.covers(needle)))
    }

    pub fn union(&self, other: &RangeSet) -> RangeSet {
        RangeSet::new(self.0.iter().chain(other.0.iter()).copied())
    }

    pub fn difference(&self, other: &RangeSet) -> RangeSet {
        let mut result = Vec::new();

        for range in &self.0 {
            let mut cursor = Some(range.begin);

            for hole in other.0.iter().filter(|h| h.end >= range.begin && h.begin <= range.end) {
                let Some(start) = cursor else { break };
                if hole.begin > start {
                    result.push(Range::new(start, hole.begin - 1));
                }
                cursor = match hole.end.checked_add(1) {
                    Some(next) if next > start => Some(next),
                    Some(_) => Some(start),
                    None => None,
                };
            }

            if let Some(start) = cursor {
                if start <= range.end {
                    result.push(Range::new(start, range.end));
                }
            }
        }

        RangeSet::new(result)
    }
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|r| format!("{}-{}", r.begin, r.end))
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// The value of a single named resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Scalar(f64),
    Ranges(RangeSet),
    Set(BTreeSet<String>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "scalar",
            Value::Ranges(_) => "ranges",
            Value::Set(_) => "set",
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Value::Scalar(v) => normalize_scalar(*v) <= 0.0,
            Value::Ranges(r) => r.is_empty(),
            Value::Set(s) => s.is_empty(),
        }
    }

    /// Whether `other` fits inside this value. Different shapes never fit.
    pub fn contains(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => normalize_scalar(*b) <= normalize_scalar(*a),
            (Value::Ranges(a), Value::Ranges(b)) => a.contains(b),
            (Value::Set(a), Value::Set(b)) => b.is_subset(a),
            _ => false,
        }
    }

    fn add(&self, other: &Value) -> Option<Value> {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Some(Value::Scalar(normalize_scalar(a + b))),
            (Value::Ranges(a), Value::Ranges(b)) => Some(Value::Ranges(a.union(b))),
            (Value::Set(a), Value::Set(b)) => Some(Value::Set(a.union(b).cloned().collect())),
            _ => None,
        }
    }

    fn subtract(&self, other: &Value) -> Option<Value> {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Some(Value::Scalar(normalize_scalar(a - b))),
            (Value::Ranges(a), Value::Ranges(b)) => Some(Value::Ranges(a.difference(b))),
            (Value::Set(a), Value::Set(b)) => {
                Some(Value::Set(a.difference(b).cloned().collect()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(v) => write!(f, "{}", normalize_scalar(*v)),
            Value::Ranges(r) => write!(f, "{}", r),
            Value::Set(s) => {
                let items: Vec<&str> = s.iter().map(String::as_str).collect();
                write!(f, "{{{}}}", items.join(","))
            }
        }
    }
}

/// A resource vector: at most one value per resource name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resources {
    entries: BTreeMap<String, Value>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a scalar resource
    pub fn with_scalar(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name.into(), Value::Scalar(normalize_scalar(value)));
        self
    }

    /// Builder: add a range resource
    pub fn with_ranges(mut self, name: impl Into<String>, pairs: &[(u64, u64)]) -> Self {
        self.insert(name.into(), Value::Ranges(RangeSet::from_pairs(pairs)));
        self
    }

    /// Builder: add a set resource
    pub fn with_set<I, S>(mut self, name: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(
            name.into(),
            Value::Set(items.into_iter().map(Into::into).collect()),
        );
        self
    }

    fn insert(&mut self, name: String, value: Value) {
        if value.is_empty() {
            self.entries.remove(&name);
        } else {
            self.entries.insert(name, value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// Scalar quantity of `name`, zero when absent or not a scalar
    pub fn scalar(&self, name: &str) -> f64 {
        match self.entries.get(name) {
            Some(Value::Scalar(v)) => *v,
            _ => 0.0,
        }
    }

    pub fn cpus(&self) -> f64 {
        self.scalar("cpus")
    }

    pub fn mem(&self) -> f64 {
        self.scalar("mem")
    }

    /// Whether every resource in `other` fits inside this vector
    pub fn contains(&self, other: &Resources) -> bool {
        other.entries.iter().all(|(name, needed)| {
            self.entries
                .get(name)
                .map(|have| have.contains(needed))
                .unwrap_or(false)
        })
    }

    /// Add `other` into this vector
    pub fn merge(&mut self, other: &Resources) -> ResourceResult<()> {
        for (name, value) in &other.entries {
            let combined = match self.entries.get(name) {
                Some(existing) => {
                    existing
                        .add(value)
                        .ok_or_else(|| ResourceError::ShapeMismatch {
                            name: name.clone(),
                            existing: existing.kind(),
                            incoming: value.kind(),
                        })?
                }
                None => value.clone(),
            };
            self.insert(name.clone(), combined);
        }
        Ok(())
    }

    pub fn checked_add(&self, other: &Resources) -> ResourceResult<Resources> {
        let mut sum = self.clone();
        sum.merge(other)?;
        Ok(sum)
    }

    /// Subtract `other`; fails without modification if anything would underflow
    pub fn checked_sub(&self, other: &Resources) -> ResourceResult<Resources> {
        let mut result = self.clone();
        for (name, value) in &other.entries {
            let existing = self
                .entries
                .get(name)
                .ok_or_else(|| ResourceError::Underflow { name: name.clone() })?;
            if existing.kind() != value.kind() {
                return Err(ResourceError::ShapeMismatch {
                    name: name.clone(),
                    existing: existing.kind(),
                    incoming: value.kind(),
                });
            }
            if !existing.contains(value) {
                return Err(ResourceError::Underflow { name: name.clone() });
            }
            let remaining = existing
                .subtract(value)
                .ok_or_else(|| ResourceError::Underflow { name: name.clone() })?;
            result.insert(name.clone(), remaining);
        }
        Ok(result)
    }

    /// Copy without the named resources (used to hide system-reserved resources)
    pub fn without(&self, names: &[String]) -> Resources {
        Resources {
            entries: self
                .entries
                .iter()
                .filter(|(name, _)| !names.iter().any(|n| n == *name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }

    /// Parse the `name:value;name:value` notation, e.g.
    /// `cpus:2;mem:1024;ports:[31000-32000];zones:{a,b}`.
    pub fn parse(input: &str) -> ResourceResult<Resources> {
        let parse_err = |reason: String| ResourceError::Parse {
            input: input.to_string(),
            reason,
        };

        let mut resources = Resources::new();
        for token in input.split(';').map(str::trim).filter(|t| !t.is_empty()) {
            let (name, raw) = token
                .split_once(':')
                .ok_or_else(|| parse_err(format!("missing ':' in '{}'", token)))?;
            let name = name.trim();
            let raw = raw.trim();
            if name.is_empty() {
                return Err(parse_err("empty resource name".to_string()));
            }

            let value = if let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
                let mut ranges = Vec::new();
                for part in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                    let (b, e) = part
                        .split_once('-')
                        .ok_or_else(|| parse_err(format!("bad range '{}'", part)))?;
                    let begin: u64 = b
                        .trim()
                        .parse()
                        .map_err(|_| parse_err(format!("bad range bound '{}'", b)))?;
                    let end: u64 = e
                        .trim()
                        .parse()
                        .map_err(|_| parse_err(format!("bad range bound '{}'", e)))?;
                    if begin > end {
                        return Err(parse_err(format!("inverted range '{}'", part)));
                    }
                    ranges.push(Range::new(begin, end));
                }
                Value::Ranges(RangeSet::new(ranges))
            } else if let Some(inner) = raw.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
                Value::Set(
                    inner
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect(),
                )
            } else {
                let v: f64 = raw
                    .parse()
                    .map_err(|_| parse_err(format!("bad scalar '{}'", raw)))?;
                if !v.is_finite() || v < 0.0 {
                    return Err(parse_err(format!("scalar out of range '{}'", raw)));
                }
                Value::Scalar(normalize_scalar(v))
            };

            resources
                .merge(&Resources::new().with_value(name, value))
                .map_err(|e| parse_err(e.to_string()))?;
        }

        Ok(resources)
    }

    fn with_value(mut self, name: &str, value: Value) -> Self {
        self.insert(name.to_string(), value);
        self
    }
}

impl FromStr for Resources {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resources::parse(s)
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(name, value)| format!("{}:{}", name, value))
            .collect();
        write!(f, "{}", parts.join(";"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_all_shapes() {
        let r = Resources::parse("cpus:2;mem:1024;ports:[1-10, 20-30];zones:{a,b}").unwrap();
        assert_eq!(r.cpus(), 2.0);
        assert_eq!(r.mem(), 1024.0);
        assert_eq!(
            r.get("ports"),
            Some(&Value::Ranges(RangeSet::from_pairs(&[(1, 10), (20, 30)])))
        );
        assert!(matches!(r.get("zones"), Some(Value::Set(s)) if s.len() == 2));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Resources::parse("cpus").is_err());
        assert!(Resources::parse("cpus:-1").is_err());
        assert!(Resources::parse("ports:[10-1]").is_err());
        assert!(Resources::parse("cpus:2;cpus:[1-2]").is_err());
    }

    #[test]
    fn test_subtract_ranges_splits() {
        let total = Resources::parse("ports:[1-10, 20-30]").unwrap();
        let used = Resources::parse("ports:[5-8, 23-25]").unwrap();
        let left = total.checked_sub(&used).unwrap();
        assert_eq!(
            left,
            Resources::parse("ports:[1-4, 9-10, 20-22, 26-30]").unwrap()
        );
    }

    #[test]
    fn test_subtract_underflow_is_error() {
        let total = Resources::parse("cpus:1;mem:64").unwrap();
        let big = Resources::parse("cpus:2").unwrap();
        assert_eq!(
            total.checked_sub(&big),
            Err(ResourceError::Underflow {
                name: "cpus".to_string()
            })
        );

        let ports = Resources::parse("ports:[100-200]").unwrap();
        assert!(total.checked_sub(&ports).is_err());
    }

    #[test]
    fn test_subtract_to_zero_drops_entry() {
        let a = Resources::parse("cpus:1;mem:64").unwrap();
        let left = a.checked_sub(&Resources::parse("cpus:1").unwrap()).unwrap();
        assert!(left.get("cpus").is_none());
        assert_eq!(left.mem(), 64.0);
    }

    #[test]
    fn test_fractional_scalars_are_exact() {
        let mut r = Resources::parse("cpus:0.1").unwrap();
        for _ in 0..9 {
            r.merge(&Resources::parse("cpus:0.1").unwrap()).unwrap();
        }
        assert_eq!(r.cpus(), 1.0);
        let back = r.checked_sub(&Resources::parse("cpus:0.3").unwrap()).unwrap();
        assert_eq!(back.cpus(), 0.7);
    }

    #[test]
    fn test_without_filters_names() {
        let r = Resources::parse("cpus:2;ports:[31000-32000];ephemeral_ports:[30001-30999]")
            .unwrap();
        let visible = r.without(&["ephemeral_ports".to_string()]);
        assert_eq!(
            visible,
            Resources::parse("cpus:2;ports:[31000-32000]").unwrap()
        );
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        let r = Resources::parse("cpus:1.5;mem:512;ports:[1-2];roles:{x}").unwrap();
        assert_eq!(Resources::parse(&r.to_string()).unwrap(), r);
    }

    fn arb_resources() -> impl Strategy<Value = Resources> {
        (0u32..8, 0u32..4096, prop::collection::vec((0u64..200, 0u64..20), 0..4)).prop_map(
            |(cpus, mem, ports)| {
                let pairs: Vec<(u64, u64)> = ports.iter().map(|(b, len)| (*b, b + len)).collect();
                Resources::new()
                    .with_scalar("cpus", cpus as f64 / 2.0)
                    .with_scalar("mem", mem as f64)
                    .with_ranges("ports", &pairs)
            },
        )
    }

    proptest! {
        #[test]
        fn add_then_subtract_is_identity(a in arb_resources(), b in arb_resources()) {
            let sum = a.checked_add(&b).unwrap();
            prop_assert!(sum.contains(&a));
            prop_assert!(sum.contains(&b));
            // Ranges can overlap, so only the scalar parts are exactly recoverable.
            let back = sum.checked_sub(&b).unwrap();
            prop_assert_eq!(back.cpus(), a.cpus());
            prop_assert_eq!(back.mem(), a.mem());
        }

        #[test]
        fn subtract_never_exceeds_original(a in arb_resources(), b in arb_resources()) {
            if let Ok(rest) = a.checked_sub(&b) {
                prop_assert!(a.contains(&rest));
                prop_assert!(a.contains(&b));
            } else {
                prop_assert!(!a.contains(&b));
            }
        }
    }
}
