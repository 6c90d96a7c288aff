//! Core types shared by observers, binders and subjects.

use crate::error::{ObserveError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Unique identifier for an observer instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(pub u64);

impl fmt::Debug for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObserverId({})", self.0)
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token identifying one registration with a subject.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionToken(pub u64);

impl fmt::Debug for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

/// A dotted accessor path into a subject's property graph, e.g.
/// `"account.balance"`.
///
/// Each segment must be a non-empty identifier: ASCII letters, digits and
/// underscores, not starting with a digit.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct KeyPath {
    raw: String,
    segments: Vec<String>,
}

impl KeyPath {
    /// Parse and validate a key path.
    pub fn parse(raw: &str) -> Result<Self> {
        let segments: Vec<String> = raw.split('.').map(str::to_string).collect();
        if !segments.iter().all(|s| Self::valid_segment(s)) {
            return Err(ObserveError::InvalidKeyPath(raw.to_string()));
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    fn valid_segment(segment: &str) -> bool {
        let mut chars = segment.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True if `other` lies strictly beneath this path
    /// (`"a"` contains `"a.b"`, but not `"ab"`).
    pub fn contains(&self, other: &KeyPath) -> bool {
        other.segments.len() > self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// True if a write to one path changes the value seen at the other.
    pub fn overlaps(&self, other: &KeyPath) -> bool {
        self == other || self.contains(other) || other.contains(self)
    }
}

impl FromStr for KeyPath {
    type Err = ObserveError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Debug for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPath({})", self.raw)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// What kind of mutation produced a change event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// The whole value was replaced.
    Set,
    /// Elements were inserted into a collection.
    Insert,
    /// Elements were removed from a collection.
    Remove,
    /// Elements of a collection were replaced in place.
    Replace,
}

/// A notification describing a property mutation.
///
/// `old` and `new` are present only when the matching option was requested
/// at registration. For collection kinds they hold the affected elements
/// and `indexes` lists their positions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub old: Option<Value>,
    pub new: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexes: Option<Vec<usize>>,
    /// Sent before the mutation is applied (only with `prior`).
    #[serde(default)]
    pub is_prior: bool,
}

impl ChangeEvent {
    /// A plain `Set` event.
    pub fn set(old: Option<Value>, new: Option<Value>) -> Self {
        Self {
            kind: ChangeKind::Set,
            old,
            new,
            indexes: None,
            is_prior: false,
        }
    }

    /// The event delivered for the `initial` option: current value as new,
    /// no old value.
    pub fn initial(current: Value) -> Self {
        Self::set(None, Some(current))
    }
}

/// Options requested when registering an observation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservingOptions {
    /// Include the value before the change.
    pub old: bool,
    /// Include the value after the change.
    pub new: bool,
    /// Also send a notification before each change.
    pub prior: bool,
    /// Fire once with the current value when the observation starts.
    pub initial: bool,
}

impl ObservingOptions {
    pub const NONE: Self = Self {
        old: false,
        new: false,
        prior: false,
        initial: false,
    };

    pub const OLD_AND_NEW: Self = Self {
        old: true,
        new: true,
        prior: false,
        initial: false,
    };

    pub fn with_old(mut self) -> Self {
        self.old = true;
        self
    }

    pub fn with_new(mut self) -> Self {
        self.new = true;
        self
    }

    pub fn with_prior(mut self) -> Self {
        self.prior = true;
        self
    }

    pub fn with_initial(mut self) -> Self {
        self.initial = true;
        self
    }

    /// Options requested by either side.
    pub fn union(self, other: Self) -> Self {
        Self {
            old: self.old || other.old,
            new: self.new || other.new,
            prior: self.prior || other.prior,
            initial: self.initial || other.initial,
        }
    }
}
