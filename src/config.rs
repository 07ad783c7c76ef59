//! Harness configuration loaded from a TOML file.
//!
//! A configuration names the available validator backends; the CLI selects
//! one by name and hands its section to the registry.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// One validator backend section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Selection name, unique within a configuration.
    pub name: String,
    /// Registry kind constructing the backend (e.g. "commandline").
    pub kind: String,
    /// Product label recorded in the run report.
    pub label: String,
    /// Query binding the backend compiles schemas for.
    pub query_binding: String,
    /// Capability tags for testcase feature gating.
    pub features: Vec<String>,
    /// Ordered compiler stage stylesheets.
    pub compiler_stages: Vec<PathBuf>,
    /// Executable for the commandline backend.
    pub program: String,
    /// Argument templates; `{stylesheet}`, `{document}` and `{target}` are
    /// substituted per invocation.
    pub arguments: Vec<String>,
    /// Template appended once per stylesheet parameter, with `{name}` and
    /// `{value}` substituted (e.g. `"{name}={value}"`).
    pub parameter_argument: Option<String>,
    /// Bounded wait for one external stage.
    pub timeout_seconds: u64,
    /// Turn recoverable compiler-stage warnings into pipeline errors.
    pub fail_on_warning: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: String::new(),
            label: String::new(),
            query_binding: String::new(),
            features: Vec::new(),
            compiler_stages: Vec::new(),
            program: String::new(),
            arguments: Vec::new(),
            parameter_argument: None,
            timeout_seconds: 300,
            fail_on_warning: false,
        }
    }
}

/// Top-level harness configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub validators: Vec<ValidatorConfig>,
    /// Testcase ids excluded from every run.
    pub skip: Vec<String>,
}

impl HarnessConfig {
    pub async fn load(path: &Path) -> Result<Self, HarnessError> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, HarnessError> {
        let config: Self =
            toml::from_str(text).map_err(|e| HarnessError::Config(e.to_string()))?;
        for validator in &config.validators {
            if validator.name.is_empty() {
                return Err(HarnessError::Config(
                    "validator section without a name".to_string(),
                ));
            }
            if validator.kind.is_empty() {
                return Err(HarnessError::Config(format!(
                    "validator '{}' has no kind",
                    validator.name
                )));
            }
        }
        Ok(config)
    }

    pub fn validator(&self, name: &str) -> Option<&ValidatorConfig> {
        self.validators.iter().find(|v| v.name == name)
    }
}
