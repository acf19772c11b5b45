//! Template loading
//!
//! A template is one TOML file holding settings, provider bindings and
//! resource declarations:
//!
//! ```toml
//! sensitive_settings = ["db_password"]
//!
//! [settings]
//! zone = "ru-central1-a"
//!
//! [providers.vpc_network]
//! command = ["./providers/yc.sh"]
//! immutable = ["zone"]
//!
//! [[resource]]
//! type = "vpc_network"
//! name = "main"
//! [resource.attributes]
//! zone = "${var.zone}"
//! ```

use crate::paths;
use crate::provider::ExecProvider;
use anyhow::{Context, Result, bail};
use declarative::{Declaration, DeclarationStore, ProviderRegistry, ResourceSchema, Settings, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Template {
    /// Settings whose values are secret
    #[serde(default)]
    pub sensitive_settings: Vec<String>,
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default, rename = "resource")]
    pub resources: Vec<Declaration>,
}

/// Binding of one resource type to an external command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub command: Vec<String>,
    /// Attributes that force replacement when changed
    #[serde(default)]
    pub immutable: BTreeSet<String>,
    /// Outputs that must never be shown
    #[serde(default)]
    pub sensitive_outputs: BTreeSet<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Template {
    /// Load a template from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read template {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid template {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let template: Self = toml::from_str(content)?;
        for (resource_type, provider) in &template.providers {
            if provider.command.is_empty() {
                bail!("provider '{resource_type}' has an empty command");
            }
        }
        Ok(template)
    }

    /// Effective settings
    ///
    /// Template values are overridden by `LANDFORM_VAR_<name>` environment
    /// variables, which are overridden by `--var name=value`.
    pub fn settings<I>(&self, vars: &[String], env: I) -> Result<Settings>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut settings = Settings::new();
        for (name, value) in &self.settings {
            settings.set(name.clone(), value.clone());
        }

        for (key, value) in env {
            if let Some(name) = key.strip_prefix(paths::ENV_VAR_PREFIX)
                && !name.is_empty()
            {
                log::debug!("Setting {name} from environment");
                settings.set(name, self.coerce(name, &value));
            }
        }

        for var in vars {
            let (name, raw) = parse_var(var)?;
            let value = self.coerce(&name, &raw);
            settings.set(name, value);
        }

        for name in &self.sensitive_settings {
            settings.mark_sensitive(name.clone());
        }
        Ok(settings)
    }

    /// Type an override after the template value it replaces
    ///
    /// Integer and boolean settings parse the override when they can.
    /// Everything else, including settings the template does not name,
    /// stays a string.
    fn coerce(&self, name: &str, raw: &str) -> Value {
        match self.settings.get(name) {
            Some(Value::Integer(_)) => raw.parse().map_or_else(|_| Value::from(raw), Value::Integer),
            Some(Value::Bool(_)) => raw.parse().map_or_else(|_| Value::from(raw), Value::Bool),
            _ => Value::from(raw),
        }
    }

    /// Declaration store holding every resource of the template
    pub fn store(&self, settings: Settings) -> Result<DeclarationStore> {
        let mut store = DeclarationStore::new(settings);
        store.register(self.resources.iter().cloned())?;
        Ok(store)
    }

    /// Provider registry with one exec provider per configured type
    ///
    /// Commands starting with `./` or `../` are resolved against `base_dir`.
    pub fn registry(&self, base_dir: &Path) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for (resource_type, config) in &self.providers {
            let mut command = config.command.clone();
            command[0] = resolve_program(&command[0], base_dir);

            let schema = ResourceSchema::default()
                .with_immutable(config.immutable.iter().cloned())
                .with_sensitive_outputs(config.sensitive_outputs.iter().cloned());
            let mut provider = ExecProvider::new(resource_type, command, schema);
            if let Some(secs) = config.timeout_secs {
                provider = provider.with_timeout(Duration::from_secs(secs));
            }
            registry.register(resource_type.clone(), Arc::new(provider));
        }
        registry
    }
}

fn resolve_program(program: &str, base_dir: &Path) -> String {
    if program.starts_with("./") || program.starts_with("../") {
        base_dir.join(program).to_string_lossy().into_owned()
    } else {
        paths::expand(program).to_string_lossy().into_owned()
    }
}

/// Parse a `name=value` override
pub fn parse_var(var: &str) -> Result<(String, String)> {
    let Some((name, value)) = var.split_once('=') else {
        bail!("invalid --var '{var}': expected NAME=VALUE");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("invalid --var '{var}': empty name");
    }
    Ok((name.to_string(), value.to_string()))
}
