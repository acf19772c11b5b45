//! Path resolution for templates and state files
//!
//! # Environment Variables
//!
//! - `LANDFORM_TEMPLATE` - Template to load (default `landform.toml`)
//! - `LANDFORM_STATE` - State file (default `landform.state.toml` next to the template)

use std::path::{Path, PathBuf};

/// Environment variable for the template path
pub const ENV_TEMPLATE: &str = "LANDFORM_TEMPLATE";

/// Environment variable for the state file path
pub const ENV_STATE: &str = "LANDFORM_STATE";

/// Prefix of environment variables that override settings
pub const ENV_VAR_PREFIX: &str = "LANDFORM_VAR_";

/// Template file used when none is given
pub const DEFAULT_TEMPLATE: &str = "landform.toml";

/// State file name used when none is given
pub const DEFAULT_STATE: &str = "landform.state.toml";

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Template path from the command line, or the default
pub fn template_path(arg: Option<&str>) -> PathBuf {
    let path = arg.map_or_else(|| PathBuf::from(DEFAULT_TEMPLATE), expand);
    log::debug!("Using template: {}", path.display());
    path
}

/// State path from the command line, or next to the template
pub fn state_path(arg: Option<&str>, template: &Path) -> PathBuf {
    let path = match arg {
        Some(p) => expand(p),
        None => template_dir(template).join(DEFAULT_STATE),
    };
    log::debug!("Using state file: {}", path.display());
    path
}

/// Directory relative paths in a template are resolved against
pub fn template_dir(template: &Path) -> PathBuf {
    match template.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template() {
        assert_eq!(template_path(None), PathBuf::from("landform.toml"));
    }

    #[test]
    fn test_state_next_to_template() {
        assert_eq!(
            state_path(None, Path::new("infra/analytics.toml")),
            PathBuf::from("infra/landform.state.toml")
        );
        assert_eq!(
            state_path(None, Path::new("landform.toml")),
            PathBuf::from("./landform.state.toml")
        );
    }

    #[test]
    fn test_explicit_state_wins() {
        assert_eq!(
            state_path(Some("/tmp/s.toml"), Path::new("infra/landform.toml")),
            PathBuf::from("/tmp/s.toml")
        );
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand("~/infra/landform.toml");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.ends_with("infra/landform.toml"));
    }
}
