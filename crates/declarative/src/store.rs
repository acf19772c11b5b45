//! Declaration store
//!
//! Holds the declared resources of one template together with the
//! configuration settings they read. Registration only checks names and
//! parses expressions; [`DeclarationStore::validate`] checks references,
//! counts and required settings.

use crate::error::ValidationError;
use crate::expr::{Expression, Lookup, Reference, Scope};
use crate::types::{Address, Attributes, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A user-authored description of one desired resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    /// Instantiation toggle; must evaluate to 0 or 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<Value>,
    /// Extra ordering edges, as `type.name` addresses
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Attribute names whose values are secret
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sensitive: Vec<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Declaration {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            count: None,
            depends_on: Vec::new(),
            sensitive: Vec::new(),
            attributes: Attributes::new(),
        }
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn count(mut self, count: impl Into<Value>) -> Self {
        self.count = Some(count.into());
        self
    }

    pub fn depends_on(mut self, address: impl Into<String>) -> Self {
        self.depends_on.push(address.into());
        self
    }

    pub fn sensitive(mut self, attribute: impl Into<String>) -> Self {
        self.sensitive.push(attribute.into());
        self
    }

    pub fn address(&self) -> Address {
        Address::new(&self.resource_type, &self.name)
    }
}

/// Flat mapping of named configuration settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: BTreeMap<String, Value>,
    sensitive: BTreeSet<String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Mark a setting as secret; anything derived from it is sensitive
    pub fn mark_sensitive(&mut self, name: impl Into<String>) {
        self.sensitive.insert(name.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        self.sensitive.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

impl Scope for Settings {
    fn setting(&self, name: &str) -> Lookup {
        match self.values.get(name) {
            Some(value) => Lookup::Known {
                value: value.clone(),
                sensitive: self.is_sensitive(name),
            },
            None => Lookup::Missing,
        }
    }

    fn attribute(&self, _address: &Address, _attribute: &str) -> Lookup {
        Lookup::Missing
    }
}

/// Why a declaration is treated as absent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inactive {
    /// Its own count evaluated to 0
    CountZero,
    /// It references a resource that is itself inactive
    DependsOn(Address),
}

impl std::fmt::Display for Inactive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CountZero => f.write_str("count is 0"),
            Self::DependsOn(address) => write!(f, "depends on disabled {address}"),
        }
    }
}

/// Result of validation: which declarations are counted out
#[derive(Debug, Clone, Default)]
pub struct Activity {
    inactive: BTreeMap<Address, Inactive>,
}

impl Activity {
    pub fn is_active(&self, address: &Address) -> bool {
        !self.inactive.contains_key(address)
    }

    pub fn reason(&self, address: &Address) -> Option<&Inactive> {
        self.inactive.get(address)
    }

    pub fn inactive(&self) -> impl Iterator<Item = (&Address, &Inactive)> {
        self.inactive.iter()
    }
}

#[derive(Debug)]
struct Entry {
    address: Address,
    declaration: Declaration,
    attributes: BTreeMap<String, Expression>,
    count: Option<Expression>,
    dependencies: Vec<Address>,
    sensitive: BTreeSet<String>,
}

impl Entry {
    fn compile(declaration: Declaration) -> Result<Self, ValidationError> {
        let address: Address = format!("{}.{}", declaration.resource_type, declaration.name)
            .parse()?;

        let mut attributes = BTreeMap::new();
        for (name, value) in &declaration.attributes {
            let expr = Expression::parse(value).map_err(|message| {
                ValidationError::InvalidExpression {
                    address: address.clone(),
                    attribute: name.clone(),
                    message,
                }
            })?;
            attributes.insert(name.clone(), expr);
        }

        let count = match &declaration.count {
            Some(value) => {
                let expr = Expression::parse(value).map_err(|message| {
                    ValidationError::InvalidExpression {
                        address: address.clone(),
                        attribute: "count".to_string(),
                        message,
                    }
                })?;
                if expr
                    .references()
                    .iter()
                    .any(|r| matches!(r, Reference::Attribute { .. }))
                {
                    return Err(ValidationError::InvalidExpression {
                        address,
                        attribute: "count".to_string(),
                        message: "count may only reference settings".to_string(),
                    });
                }
                Some(expr)
            }
            None => None,
        };

        let mut dependencies: Vec<Address> = Vec::new();
        for expr in attributes.values() {
            for reference in expr.references() {
                if let Reference::Attribute { address: target, .. } = reference
                    && !dependencies.contains(target)
                {
                    dependencies.push(target.clone());
                }
            }
        }
        for raw in &declaration.depends_on {
            let target: Address = raw.parse()?;
            if !dependencies.contains(&target) {
                dependencies.push(target);
            }
        }

        let sensitive = declaration.sensitive.iter().cloned().collect();

        Ok(Self {
            address,
            declaration,
            attributes,
            count,
            dependencies,
            sensitive,
        })
    }

    fn settings_referenced(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .values()
            .flat_map(Expression::references)
            .filter_map(|r| match r {
                Reference::Setting(name) => Some(name.as_str()),
                Reference::Attribute { .. } => None,
            })
    }
}

/// The set of declarations of one template
#[derive(Debug, Default)]
pub struct DeclarationStore {
    settings: Settings,
    entries: Vec<Entry>,
    index: HashMap<Address, usize>,
}

impl DeclarationStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a batch of declarations
    ///
    /// The batch is all-or-nothing: on error nothing is registered.
    pub fn register<I>(&mut self, batch: I) -> Result<(), ValidationError>
    where
        I: IntoIterator<Item = Declaration>,
    {
        let mut compiled = Vec::new();
        let mut seen = BTreeSet::new();
        for declaration in batch {
            let entry = Entry::compile(declaration)?;
            if self.index.contains_key(&entry.address) || !seen.insert(entry.address.clone()) {
                return Err(ValidationError::DuplicateName {
                    address: entry.address,
                });
            }
            compiled.push(entry);
        }

        for entry in compiled {
            log::trace!("registered {}", entry.address);
            self.index.insert(entry.address.clone(), self.entries.len());
            self.entries.push(entry);
        }
        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.index.contains_key(address)
    }

    /// Addresses in registration order
    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.entries.iter().map(|e| &e.address)
    }

    pub fn declaration(&self, address: &Address) -> Option<&Declaration> {
        self.entry(address).map(|e| &e.declaration)
    }

    /// Declarations this one references, in first-reference order
    pub fn dependencies(&self, address: &Address) -> &[Address] {
        self.entry(address)
            .map(|e| e.dependencies.as_slice())
            .unwrap_or(&[])
    }

    pub fn expressions(&self, address: &Address) -> Option<&BTreeMap<String, Expression>> {
        self.entry(address).map(|e| &e.attributes)
    }

    /// Whether the attribute was declared sensitive
    pub fn is_sensitive(&self, address: &Address, attribute: &str) -> bool {
        self.entry(address)
            .is_some_and(|e| e.sensitive.contains(attribute))
    }

    pub(crate) fn position(&self, address: &Address) -> Option<usize> {
        self.index.get(address).copied()
    }

    fn entry(&self, address: &Address) -> Option<&Entry> {
        self.index.get(address).map(|&i| &self.entries[i])
    }

    /// Validate references, counts and required settings
    ///
    /// Returns which declarations are counted out. Inactive declarations
    /// may leave their settings blank.
    pub fn validate(&self) -> Result<Activity, ValidationError> {
        for entry in &self.entries {
            for target in &entry.dependencies {
                if !self.contains(target) {
                    return Err(ValidationError::UnknownReference {
                        from: entry.address.clone(),
                        to: target.clone(),
                    });
                }
            }
            for setting in entry.settings_referenced() {
                if self.settings.get(setting).is_none() {
                    return Err(ValidationError::UndefinedLocal {
                        setting: setting.to_string(),
                        address: entry.address.clone(),
                    });
                }
            }
        }

        let mut inactive = BTreeMap::new();
        for entry in &self.entries {
            if let Some(expr) = &entry.count
                && self.evaluate_count(&entry.address, expr)? == 0
            {
                inactive.insert(entry.address.clone(), Inactive::CountZero);
            }
        }

        // Dependents without their own count follow their dependencies out.
        loop {
            let mut changed = false;
            for entry in &self.entries {
                if entry.count.is_some() || inactive.contains_key(&entry.address) {
                    continue;
                }
                if let Some(dep) = entry
                    .dependencies
                    .iter()
                    .find(|d| inactive.contains_key(*d))
                {
                    log::debug!("{} is inactive: depends on inactive {}", entry.address, dep);
                    inactive.insert(entry.address.clone(), Inactive::DependsOn(dep.clone()));
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        for entry in &self.entries {
            if entry.count.is_none() || inactive.contains_key(&entry.address) {
                continue;
            }
            if let Some(dep) = entry
                .dependencies
                .iter()
                .find(|d| inactive.contains_key(*d))
            {
                return Err(ValidationError::InactiveDependency {
                    address: entry.address.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        for entry in &self.entries {
            if inactive.contains_key(&entry.address) {
                continue;
            }
            for setting in entry.settings_referenced() {
                if self.settings.get(setting).is_some_and(Value::is_placeholder) {
                    return Err(ValidationError::UndefinedLocal {
                        setting: setting.to_string(),
                        address: entry.address.clone(),
                    });
                }
            }
        }

        Ok(Activity { inactive })
    }

    fn evaluate_count(&self, address: &Address, expr: &Expression) -> Result<i64, ValidationError> {
        let evaluated = expr
            .evaluate(&self.settings)
            .map_err(|e| e.into_validation(address, "count"))?;
        let invalid = |value: String| ValidationError::InvalidCount {
            address: address.clone(),
            value,
        };
        match evaluated.value {
            Some(Value::Integer(n @ (0 | 1))) => Ok(n),
            Some(Value::Bool(b)) => Ok(i64::from(b)),
            Some(Value::String(s)) => match s.trim() {
                "0" | "false" => Ok(0),
                "1" | "true" => Ok(1),
                _ => Err(invalid(format!("{s:?}"))),
            },
            Some(other) => Err(invalid(other.to_string())),
            None => Err(invalid("(unknown)".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::new()
            .with("folder_id", "b1g")
            .with("source_endpoint_id", "")
            .with("transfer_enabled", 0)
    }

    fn transfer_batch() -> Vec<Declaration> {
        vec![
            Declaration::new("vpc_network", "main").attribute("folder_id", "${var.folder_id}"),
            Declaration::new("datatransfer_endpoint", "target")
                .attribute("network_id", "${vpc_network.main.id}"),
            Declaration::new("datatransfer_transfer", "main")
                .count("${var.transfer_enabled}")
                .attribute("source_id", "${var.source_endpoint_id}")
                .attribute("target_id", "${datatransfer_endpoint.target.id}"),
        ]
    }

    #[test]
    fn test_duplicate_name() {
        let mut store = DeclarationStore::new(Settings::new());
        let err = store
            .register(vec![
                Declaration::new("s3_bucket", "raw"),
                Declaration::new("s3_bucket", "raw"),
            ])
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::DuplicateName {
                address: Address::new("s3_bucket", "raw")
            }
        );
        assert!(store.is_empty());

        store.register(vec![Declaration::new("s3_bucket", "raw")]).unwrap();
        assert!(store.register(vec![Declaration::new("s3_bucket", "raw")]).is_err());
        // Same name under a different type is fine
        store.register(vec![Declaration::new("vpc_network", "raw")]).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_dependencies_in_first_reference_order() {
        let mut store = DeclarationStore::new(settings());
        store
            .register(vec![
                Declaration::new("vpc_network", "main"),
                Declaration::new("vpc_subnet", "a")
                    .attribute("network_id", "${vpc_network.main.id}")
                    .attribute("name", "${vpc_network.main.name}-a")
                    .depends_on("vpc_network.main"),
            ])
            .unwrap();
        assert_eq!(
            store.dependencies(&Address::new("vpc_subnet", "a")),
            &[Address::new("vpc_network", "main")]
        );
    }

    #[test]
    fn test_unknown_reference() {
        let mut store = DeclarationStore::new(Settings::new());
        store
            .register(vec![
                Declaration::new("vpc_subnet", "a").attribute("network_id", "${vpc_network.nope.id}"),
            ])
            .unwrap();
        assert!(matches!(
            store.validate(),
            Err(ValidationError::UnknownReference { .. })
        ));
    }

    #[test]
    fn test_toggle_off_tolerates_blank_setting() {
        let mut store = DeclarationStore::new(settings());
        store.register(transfer_batch()).unwrap();
        let activity = store.validate().unwrap();
        let transfer = Address::new("datatransfer_transfer", "main");
        assert!(!activity.is_active(&transfer));
        assert_eq!(activity.reason(&transfer), Some(&Inactive::CountZero));
        assert!(activity.is_active(&Address::new("vpc_network", "main")));
    }

    #[test]
    fn test_toggle_on_requires_setting() {
        let mut store = DeclarationStore::new(settings().with("transfer_enabled", 1));
        store.register(transfer_batch()).unwrap();
        assert_eq!(
            store.validate().unwrap_err(),
            ValidationError::UndefinedLocal {
                setting: "source_endpoint_id".into(),
                address: Address::new("datatransfer_transfer", "main"),
            }
        );
    }

    #[test]
    fn test_missing_setting_fails_even_when_inactive() {
        let mut store = DeclarationStore::new(Settings::new().with("transfer_enabled", 0));
        store
            .register(vec![
                Declaration::new("datatransfer_transfer", "main")
                    .count("${var.transfer_enabled}")
                    .attribute("source_id", "${var.typo}"),
            ])
            .unwrap();
        assert!(matches!(
            store.validate(),
            Err(ValidationError::UndefinedLocal { .. })
        ));
    }

    #[test]
    fn test_inactive_cascades_to_implicit_dependents() {
        let mut store = DeclarationStore::new(settings());
        let mut batch = transfer_batch();
        batch.push(
            Declaration::new("monitoring_alert", "transfer_lag")
                .attribute("transfer_id", "${datatransfer_transfer.main.id}"),
        );
        store.register(batch).unwrap();
        let activity = store.validate().unwrap();
        assert_eq!(
            activity.reason(&Address::new("monitoring_alert", "transfer_lag")),
            Some(&Inactive::DependsOn(Address::new(
                "datatransfer_transfer",
                "main"
            )))
        );
    }

    #[test]
    fn test_explicitly_enabled_dependent_fails_fast() {
        let mut store = DeclarationStore::new(settings());
        let mut batch = transfer_batch();
        batch.push(
            Declaration::new("monitoring_alert", "transfer_lag")
                .count(1)
                .attribute("transfer_id", "${datatransfer_transfer.main.id}"),
        );
        store.register(batch).unwrap();
        assert_eq!(
            store.validate().unwrap_err(),
            ValidationError::InactiveDependency {
                address: Address::new("monitoring_alert", "transfer_lag"),
                dependency: Address::new("datatransfer_transfer", "main"),
            }
        );
    }

    #[test]
    fn test_invalid_count() {
        let mut store = DeclarationStore::new(Settings::new().with("n", 3));
        store
            .register(vec![Declaration::new("s3_bucket", "raw").count("${var.n}")])
            .unwrap();
        assert!(matches!(
            store.validate(),
            Err(ValidationError::InvalidCount { .. })
        ));

        let mut store = DeclarationStore::new(Settings::new());
        let err = store
            .register(vec![
                Declaration::new("s3_bucket", "raw").count("${vpc_network.main.id}"),
            ])
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidExpression { .. }));
    }

    #[test]
    fn test_string_and_bool_counts() {
        let mut store = DeclarationStore::new(Settings::new().with("on", "1").with("off", false));
        store
            .register(vec![
                Declaration::new("s3_bucket", "a").count("${var.on}"),
                Declaration::new("s3_bucket", "b").count("${var.off}"),
            ])
            .unwrap();
        let activity = store.validate().unwrap();
        assert!(activity.is_active(&Address::new("s3_bucket", "a")));
        assert!(!activity.is_active(&Address::new("s3_bucket", "b")));
    }

    #[test]
    fn test_declaration_from_toml() {
        let decl: Declaration = toml::from_str(
            r#"
            type = "mdb_postgresql_cluster"
            name = "main"
            sensitive = ["password"]

            [attributes]
            password = "${var.db_password}"
            network_id = "${vpc_network.main.id}"
            "#,
        )
        .unwrap();
        assert_eq!(decl.address(), Address::new("mdb_postgresql_cluster", "main"));
        assert_eq!(decl.sensitive, vec!["password".to_string()]);
        assert_eq!(decl.attributes.len(), 2);
    }
}
