//! Profiles sidecar: `.sisyphus/config.yaml`.
//!
//! Discovered by walking up from the case file. When a scenario omits
//! `config.environment`, the active profile's base URL and variables
//! are injected as the environment; top-level `variables` seed the
//! lowest layer of the variable pool.

use crate::error::{EngineError, ErrorCode};
use crate::model::{CaseModel, Environment};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CONFIG_DIR: &str = ".sisyphus";
pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
}

/// Parsed sidecar file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalProfiles {
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
    #[serde(default)]
    pub active_profile: Option<String>,
    /// Globally visible parameters, lowest variable-pool layer.
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
}

impl GlobalProfiles {
    /// Select the profile named by `override_name`, falling back to
    /// `active_profile`.
    pub fn active<'a>(&'a self, override_name: Option<&'a str>) -> Option<(&'a str, &'a Profile)> {
        let name = override_name.or(self.active_profile.as_deref())?;
        self.profiles.get(name).map(|p| (name, p))
    }

    /// Inject the active profile as the case environment when the
    /// scenario does not declare one.
    pub fn apply(&self, case: &mut CaseModel, override_name: Option<&str>) {
        if case.config.environment.is_some() {
            return;
        }
        if let Some((name, profile)) = self.active(override_name) {
            debug!("injecting profile '{name}' as environment");
            case.config.environment = Some(Environment {
                name: name.to_string(),
                base_url: profile.base_url.clone(),
                variables: profile.variables.clone(),
            });
        }
    }
}

/// Walk up from `start` looking for `.sisyphus/config.yaml`.
pub fn discover(start: &Path) -> Option<PathBuf> {
    let mut dir = if start.is_dir() {
        start.to_path_buf()
    } else {
        start.parent()?.to_path_buf()
    };
    loop {
        let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

pub fn load(path: &Path) -> Result<GlobalProfiles, EngineError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        EngineError::new(
            ErrorCode::FileNotFound,
            format!("failed to read {}: {e}", path.display()),
        )
    })?;
    serde_yaml::from_str(&raw).map_err(|e| {
        EngineError::new(
            ErrorCode::YamlParseError,
            format!("invalid profiles config {}: {e}", path.display()),
        )
    })
}

/// Convenience: discover and load the sidecar for a case file, if one
/// exists.
pub fn load_for_case(case_path: &Path) -> Result<Option<GlobalProfiles>, EngineError> {
    match discover(case_path) {
        Some(path) => {
            info!("using profiles config {}", path.display());
            load(&path).map(Some)
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SIDECAR: &str = r#"
profiles:
  dev:
    base_url: "http://dev.example.com"
    variables:
      api_key: "dev-key"
  prod:
    base_url: "https://api.example.com"
    variables:
      api_key: "prod-key"
active_profile: dev
variables:
  team: "qa"
"#;

    fn case_without_env() -> CaseModel {
        crate::loader::parse_case_str(
            r#"
config:
  name: "profile case"
teststeps:
  - name: "ping"
    keyword_type: request
    request: {url: /ping}
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_sidecar() {
        let cfg: GlobalProfiles = serde_yaml::from_str(SIDECAR).unwrap();
        assert_eq!(cfg.profiles.len(), 2);
        assert_eq!(cfg.active_profile.as_deref(), Some("dev"));
        assert_eq!(cfg.variables["team"], json!("qa"));
    }

    #[test]
    fn test_apply_injects_active_profile() {
        let cfg: GlobalProfiles = serde_yaml::from_str(SIDECAR).unwrap();
        let mut case = case_without_env();
        cfg.apply(&mut case, None);
        let env = case.config.environment.unwrap();
        assert_eq!(env.name, "dev");
        assert_eq!(env.base_url, "http://dev.example.com");
        assert_eq!(env.variables["api_key"], json!("dev-key"));
    }

    #[test]
    fn test_profile_override_wins() {
        let cfg: GlobalProfiles = serde_yaml::from_str(SIDECAR).unwrap();
        let mut case = case_without_env();
        cfg.apply(&mut case, Some("prod"));
        assert_eq!(
            case.config.environment.unwrap().base_url,
            "https://api.example.com"
        );
    }

    #[test]
    fn test_scenario_environment_is_not_overwritten() {
        let cfg: GlobalProfiles = serde_yaml::from_str(SIDECAR).unwrap();
        let mut case = case_without_env();
        case.config.environment = Some(crate::model::Environment {
            name: "explicit".to_string(),
            base_url: "http://explicit".to_string(),
            variables: BTreeMap::new(),
        });
        cfg.apply(&mut case, None);
        assert_eq!(case.config.environment.unwrap().name, "explicit");
    }

    #[test]
    fn test_discover_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("cases/auth");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(dir.path().join(CONFIG_DIR)).unwrap();
        std::fs::write(dir.path().join(CONFIG_DIR).join(CONFIG_FILE), SIDECAR).unwrap();
        let case_file = nested.join("login.yaml");
        std::fs::write(&case_file, "config: {name: x}").unwrap();

        let found = discover(&case_file).unwrap();
        assert!(found.ends_with(".sisyphus/config.yaml"));

        let none = discover(Path::new("/nonexistent/deep/path.yaml"));
        assert!(none.is_none());
    }
}
