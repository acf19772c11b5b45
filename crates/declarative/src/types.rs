//! Core types for declarative resource graphs

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// An attribute or setting value
///
/// There is no null: an attribute that has no value is simply not present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Get the value as a string slice, if it is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this value signals "not yet configured"
    ///
    /// Only blank strings count. A zero toggle is a real value.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::String(s) if s.trim().is_empty())
    }

    /// Render the value for string interpolation
    ///
    /// Strings are rendered raw, everything else as it would be displayed.
    pub fn render(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key} = {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

/// Attribute name → value mapping
pub type Attributes = BTreeMap<String, Value>;

/// Identity of a declaration: `type.name`
///
/// Also the key of the resource's record in a state snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    pub resource_type: String,
    pub name: String,
}

impl Address {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

impl FromStr for Address {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(ty), Some(name), None) if is_identifier(ty) && is_identifier(name) => {
                Ok(Self::new(ty, name))
            }
            _ => Err(ValidationError::InvalidAddress(s.to_string())),
        }
    }
}

impl TryFrom<String> for Address {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// Identifier rule for types, names, settings and attributes
pub(crate) fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// What the provider knows about one resource type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    /// Attributes that cannot change in place; a change forces replacement
    #[serde(default)]
    pub immutable: BTreeSet<String>,
    /// Provider-computed attributes that are secret (keys, passwords)
    #[serde(default)]
    pub sensitive_outputs: BTreeSet<String>,
}

impl ResourceSchema {
    pub fn with_immutable<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.immutable.extend(attributes.into_iter().map(Into::into));
        self
    }

    pub fn with_sensitive_outputs<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensitive_outputs
            .extend(attributes.into_iter().map(Into::into));
        self
    }
}

/// Planned operation for one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// No prior state: create it
    Create,
    /// Inputs differ, all differing attributes can change in place
    Update,
    /// An immutable attribute differs: destroy then recreate
    Replace,
    /// Provisioned but no longer declared (or counted out)
    Destroy,
    /// Declared state matches provisioned state
    NoOp,
}

impl Action {
    /// Whether this action changes anything
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }

    /// Plan symbol, as in `+ vpc_network.main`
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace => "-/+",
            Self::Destroy => "-",
            Self::NoOp => " ",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update in-place",
            Self::Replace => "replace",
            Self::Destroy => "destroy",
            Self::NoOp => "no-op",
        };
        f.write_str(s)
    }
}

/// Counts of planned or applied actions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub destroyed: usize,
    pub unchanged: usize,
}

impl ActionSummary {
    /// Total number of changes
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.destroyed
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }

    /// Count one action
    pub fn add(&mut self, action: Action) {
        match action {
            Action::Create => self.created += 1,
            Action::Update => self.updated += 1,
            Action::Replace => self.replaced += 1,
            Action::Destroy => self.destroyed += 1,
            Action::NoOp => self.unchanged += 1,
        }
    }
}

impl fmt::Display for ActionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to destroy",
            self.created, self.updated, self.replaced, self.destroyed
        )
    }
}
