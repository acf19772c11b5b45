//! Diff computation between desired and recorded attributes

use crate::expr::EvaluatedAttributes;
use crate::types::{Action, Attributes, ResourceSchema, Value};
use std::collections::BTreeSet;

/// Placeholder shown instead of a sensitive value
pub const REDACTED: &str = "(sensitive)";

/// Placeholder shown for a value resolved only during apply
pub const KNOWN_AFTER_APPLY: &str = "(known after apply)";

/// The planned side of one attribute change
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedValue {
    Known(Value),
    /// Depends on a provider output that does not exist yet
    Unknown,
    /// The attribute is no longer declared
    Removed,
}

/// A change to one attribute
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeChange {
    pub name: String,
    /// Recorded value, if any
    pub before: Option<Value>,
    pub after: PlannedValue,
    /// Never display or log either side
    pub sensitive: bool,
    /// The provider cannot change this attribute in place
    pub forces_replacement: bool,
}

impl AttributeChange {
    /// Printable old value, redacted when sensitive
    pub fn display_before(&self) -> Option<String> {
        self.before.as_ref().map(|v| {
            if self.sensitive {
                REDACTED.to_string()
            } else {
                v.to_string()
            }
        })
    }

    /// Printable new value, redacted when sensitive
    pub fn display_after(&self) -> Option<String> {
        match &self.after {
            PlannedValue::Removed => None,
            PlannedValue::Unknown => Some(KNOWN_AFTER_APPLY.to_string()),
            PlannedValue::Known(_) if self.sensitive => Some(REDACTED.to_string()),
            PlannedValue::Known(v) => Some(v.to_string()),
        }
    }
}

/// Compare desired attributes against the recorded inputs
///
/// With no record every desired attribute is reported as new. Otherwise
/// only differing attributes are reported; unknown values always differ.
/// `sensitive` flags attributes that are secret regardless of derivation.
pub fn compute_changes(
    desired: &EvaluatedAttributes,
    current: Option<&Attributes>,
    schema: &ResourceSchema,
    sensitive: &dyn Fn(&str) -> bool,
) -> Vec<AttributeChange> {
    let Some(current) = current else {
        return desired
            .iter()
            .map(|(name, evaluated)| AttributeChange {
                name: name.clone(),
                before: None,
                after: evaluated
                    .value
                    .clone()
                    .map_or(PlannedValue::Unknown, PlannedValue::Known),
                sensitive: evaluated.sensitive || sensitive(name),
                forces_replacement: false,
            })
            .collect();
    };

    let names: BTreeSet<&String> = desired.keys().chain(current.keys()).collect();
    let mut changes = Vec::new();
    for name in names {
        let before = current.get(name);
        let (after, derived_sensitive) = match desired.get(name) {
            Some(evaluated) => match &evaluated.value {
                Some(v) if before == Some(v) => continue,
                Some(v) => (PlannedValue::Known(v.clone()), evaluated.sensitive),
                None => (PlannedValue::Unknown, evaluated.sensitive),
            },
            None => (PlannedValue::Removed, false),
        };
        changes.push(AttributeChange {
            name: name.clone(),
            before: before.cloned(),
            after,
            sensitive: derived_sensitive || sensitive(name),
            forces_replacement: schema.immutable.contains(name.as_str()),
        });
    }
    changes
}

/// Classify a resource from its recorded existence and attribute changes
pub fn classify(exists: bool, changes: &[AttributeChange]) -> Action {
    if !exists {
        Action::Create
    } else if changes.is_empty() {
        Action::NoOp
    } else if changes.iter().any(|c| c.forces_replacement) {
        Action::Replace
    } else {
        Action::Update
    }
}
