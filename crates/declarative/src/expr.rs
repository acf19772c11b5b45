//! Attribute expressions
//!
//! An attribute is either a literal value or a string with `${...}`
//! interpolations. `${var.NAME}` reads a setting and `${TYPE.NAME.ATTR}`
//! reads another resource's attribute. A string that is exactly one
//! interpolation keeps the referenced value's type; anything else is
//! rendered into a string. `$${` writes a literal `${`.

use crate::error::ValidationError;
use crate::types::{Address, Value, is_identifier};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static INTERPOLATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\$\{|\$\{([^}]*)\}").expect("interpolation pattern is valid"));

/// Target of an interpolation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// `${var.NAME}`
    Setting(String),
    /// `${TYPE.NAME.ATTR}`
    Attribute { address: Address, attribute: String },
}

impl Reference {
    fn parse(inner: &str) -> Result<Self, String> {
        let parts: Vec<&str> = inner.trim().split('.').collect();
        match parts.as_slice() {
            ["var", name] if is_identifier(name) => Ok(Self::Setting((*name).to_string())),
            [ty, name, attribute]
                if is_identifier(ty) && is_identifier(name) && is_identifier(attribute) =>
            {
                Ok(Self::Attribute {
                    address: Address::new(*ty, *name),
                    attribute: (*attribute).to_string(),
                })
            }
            _ => Err(format!("unsupported reference '${{{}}}'", inner.trim())),
        }
    }
}

/// Piece of an interpolated string
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Reference(Reference),
}

/// A parsed attribute expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    Reference(Reference),
    Template(Vec<Segment>),
    List(Vec<Expression>),
    Map(BTreeMap<String, Expression>),
}

impl Expression {
    /// Parse a declared value into an expression
    pub fn parse(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(s) => parse_string(s),
            Value::List(items) => Ok(Self::List(
                items.iter().map(Self::parse).collect::<Result<_, _>>()?,
            )),
            Value::Map(entries) => Ok(Self::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Self::parse(v)?)))
                    .collect::<Result<_, String>>()?,
            )),
            other => Ok(Self::Literal(other.clone())),
        }
    }

    /// All references in source order
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Literal(_) => {}
            Self::Reference(r) => out.push(r),
            Self::Template(segments) => {
                for segment in segments {
                    if let Segment::Reference(r) = segment {
                        out.push(r);
                    }
                }
            }
            Self::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Self::Map(entries) => {
                for item in entries.values() {
                    item.collect_references(out);
                }
            }
        }
    }

    /// Evaluate against a scope
    pub fn evaluate(&self, scope: &dyn Scope) -> Result<Evaluated, EvalError> {
        match self {
            Self::Literal(v) => Ok(Evaluated::known(v.clone(), false)),
            Self::Reference(r) => resolve(r, scope),
            Self::Template(segments) => {
                let mut rendered = String::new();
                let mut known = true;
                let mut sensitive = false;
                for segment in segments {
                    match segment {
                        Segment::Text(text) => rendered.push_str(text),
                        Segment::Reference(r) => {
                            let part = resolve(r, scope)?;
                            sensitive |= part.sensitive;
                            match part.value {
                                Some(v) => rendered.push_str(&v.render()),
                                None => known = false,
                            }
                        }
                    }
                }
                Ok(Evaluated {
                    value: known.then_some(Value::String(rendered)),
                    sensitive,
                })
            }
            Self::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                let mut known = true;
                let mut sensitive = false;
                for item in items {
                    let evaluated = item.evaluate(scope)?;
                    sensitive |= evaluated.sensitive;
                    match evaluated.value {
                        Some(v) => values.push(v),
                        None => known = false,
                    }
                }
                Ok(Evaluated {
                    value: known.then_some(Value::List(values)),
                    sensitive,
                })
            }
            Self::Map(entries) => {
                let mut values = BTreeMap::new();
                let mut known = true;
                let mut sensitive = false;
                for (key, item) in entries {
                    let evaluated = item.evaluate(scope)?;
                    sensitive |= evaluated.sensitive;
                    match evaluated.value {
                        Some(v) => {
                            values.insert(key.clone(), v);
                        }
                        None => known = false,
                    }
                }
                Ok(Evaluated {
                    value: known.then_some(Value::Map(values)),
                    sensitive,
                })
            }
        }
    }
}

fn parse_string(s: &str) -> Result<Expression, String> {
    let unterminated = || format!("unterminated interpolation in '{s}'");
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut last = 0;
    for caps in INTERPOLATION.captures_iter(s) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let gap = &s[last..whole.start()];
        if gap.contains("${") {
            return Err(unterminated());
        }
        text.push_str(gap);
        last = whole.end();

        match caps.get(1) {
            // `$${` escape
            None => text.push_str("${"),
            Some(inner) => {
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(Segment::Reference(Reference::parse(inner.as_str())?));
            }
        }
    }
    let rest = &s[last..];
    if rest.contains("${") {
        return Err(unterminated());
    }
    text.push_str(rest);
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }

    match segments.as_slice() {
        [] => Ok(Expression::Literal(Value::String(String::new()))),
        [Segment::Text(text)] => Ok(Expression::Literal(Value::String(text.clone()))),
        [Segment::Reference(r)] => Ok(Expression::Reference(r.clone())),
        _ => Ok(Expression::Template(segments)),
    }
}

fn resolve(reference: &Reference, scope: &dyn Scope) -> Result<Evaluated, EvalError> {
    let lookup = match reference {
        Reference::Setting(name) => scope.setting(name),
        Reference::Attribute { address, attribute } => scope.attribute(address, attribute),
    };
    match lookup {
        Lookup::Known { value, sensitive } => Ok(Evaluated::known(value, sensitive)),
        Lookup::Unknown { sensitive } => Ok(Evaluated {
            value: None,
            sensitive,
        }),
        Lookup::Missing => Err(EvalError::Missing(reference.clone())),
    }
}

/// Result of evaluating an expression
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluated {
    /// `None` when the value is only known after apply
    pub value: Option<Value>,
    /// Derived from a secret
    pub sensitive: bool,
}

impl Evaluated {
    pub fn known(value: Value, sensitive: bool) -> Self {
        Self {
            value: Some(value),
            sensitive,
        }
    }

    pub fn is_known(&self) -> bool {
        self.value.is_some()
    }
}

/// Evaluated attribute mapping of one resource
pub type EvaluatedAttributes = BTreeMap<String, Evaluated>;

/// Answer of a scope lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Known { value: Value, sensitive: bool },
    /// Will be known after the producer is applied
    Unknown { sensitive: bool },
    Missing,
}

/// Where references are resolved
pub trait Scope {
    fn setting(&self, name: &str) -> Lookup;
    fn attribute(&self, address: &Address, attribute: &str) -> Lookup;
}

/// A reference that could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    Missing(Reference),
}

impl EvalError {
    /// Attach the referencing resource and attribute
    pub fn into_validation(self, from: &Address, attribute: &str) -> ValidationError {
        match self {
            Self::Missing(Reference::Setting(setting)) => ValidationError::UndefinedLocal {
                setting,
                address: from.clone(),
            },
            Self::Missing(Reference::Attribute {
                address,
                attribute: missing,
            }) => {
                log::debug!("{from}.{attribute} could not resolve {address}.{missing}");
                ValidationError::UnknownAttribute {
                    from: from.clone(),
                    to: address,
                    attribute: missing,
                }
            }
        }
    }
}
