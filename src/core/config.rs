//! Test case configuration from YAML

use crate::core::{
    step::{Backoff, SkipCondition, Step},
    testcase::{SecretDefinition, SecretSource, TestCase},
    value::Value,
};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Top-level test case configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseConfig {
    /// Test case name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Skip the whole test case (flag or condition string)
    #[serde(default)]
    pub skip: Option<SkipCondition>,

    /// Regular variables; values may reference each other and secrets
    #[serde(default)]
    pub variables: HashMap<String, Value>,

    /// Secrets, resolved in order before regular variables
    #[serde(default)]
    pub secrets: Vec<SecretConfig>,

    /// Test steps
    pub steps: Vec<StepConfig>,

    /// Steps that always run after `steps`
    #[serde(default)]
    pub teardown: Vec<StepConfig>,
}

/// Secret definition: inline value or file reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretConfig {
    pub name: String,

    #[serde(default)]
    pub value: Option<String>,

    #[serde(default)]
    pub file: Option<String>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepConfig {
    /// Display name (defaults to the action or control operator)
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub action: Option<String>,

    #[serde(default)]
    pub args: Vec<Value>,

    #[serde(default)]
    pub options: HashMap<String, Value>,

    /// Variable to bind the output to
    #[serde(default)]
    pub result: Option<String>,

    #[serde(default)]
    pub skip: Option<SkipCondition>,

    #[serde(default, alias = "continueOnFailure")]
    pub continue_on_failure: bool,

    #[serde(default)]
    pub retry: Option<RetryConfig>,

    #[serde(default, alias = "expectError")]
    pub expect_error: Option<ExpectErrorConfig>,

    /// Per-attempt timeout
    #[serde(default)]
    pub timeout: Option<DurationConfig>,

    #[serde(default, rename = "if")]
    pub if_block: Option<ConditionalConfig>,

    #[serde(default, rename = "for")]
    pub for_block: Option<LoopConfig>,

    #[serde(default, rename = "while")]
    pub while_block: Option<LoopConfig>,
}

/// `if` block configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalConfig {
    pub condition: String,

    #[serde(default)]
    pub then: Vec<StepConfig>,

    #[serde(default, rename = "else")]
    pub else_steps: Vec<StepConfig>,
}

/// `for` / `while` block configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    pub condition: String,

    #[serde(default)]
    pub steps: Vec<StepConfig>,

    #[serde(default, alias = "maxIterations")]
    pub max_iterations: Option<u32>,
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default)]
    pub delay: Option<DurationConfig>,

    #[serde(default)]
    pub backoff: Backoff,

    #[serde(default, alias = "maxDelay")]
    pub max_delay: Option<DurationConfig>,

    #[serde(default)]
    pub jitter: bool,

    /// `timeout`, `connection`, `5xx`, `429`, or any error substring
    #[serde(default)]
    pub conditions: Vec<String>,
}

fn default_attempts() -> u32 {
    3
}

/// Duration as integer milliseconds or a human-readable string (`"500ms"`, `"2s"`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationConfig {
    Millis(u64),
    Text(String),
}

impl DurationConfig {
    pub fn to_duration(&self) -> Result<Duration> {
        match self {
            DurationConfig::Millis(ms) => Ok(Duration::from_millis(*ms)),
            DurationConfig::Text(text) => humantime::parse_duration(text.trim())
                .with_context(|| format!("Invalid duration: {}", text)),
        }
    }
}

/// Expected-error configuration: `true`/`false`, `"any"`, a substring, or a matcher map
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectErrorConfig {
    Flag(bool),
    Text(String),
    Detailed(ExpectErrorDetails),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpectErrorDetails {
    /// Set to `false` to assert the step succeeds
    #[serde(default)]
    pub should_error: Option<bool>,
    #[serde(default)]
    pub any: bool,
    #[serde(default)]
    pub contains: Option<String>,
    #[serde(default)]
    pub not_contains: Option<String>,
    #[serde(default)]
    pub exact: Option<String>,
    #[serde(default)]
    pub starts_with: Option<String>,
    #[serde(default)]
    pub ends_with: Option<String>,
    #[serde(default)]
    pub matches: Option<String>,
    #[serde(default)]
    pub not_matches: Option<String>,
}

impl TestCaseConfig {
    /// Load test case configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse test case configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TestCaseConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the test case configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("Test case name must not be empty");
        }

        let mut seen_secrets = std::collections::HashSet::new();
        for secret in &self.secrets {
            if !seen_secrets.insert(&secret.name) {
                bail!("Duplicate secret: {}", secret.name);
            }
            match (&secret.value, &secret.file) {
                (Some(_), Some(_)) => {
                    bail!("Secret '{}' must set either value or file, not both", secret.name)
                }
                (None, None) => bail!("Secret '{}' must set value or file", secret.name),
                _ => {}
            }
            if self.variables.contains_key(&secret.name) {
                bail!("Secret '{}' collides with a variable of the same name", secret.name);
            }
        }

        // Building the domain model runs the per-step checks
        self.to_test_case().map(|_| ())
    }

    /// Secrets in declaration order
    pub fn secret_definitions(&self) -> Vec<SecretDefinition> {
        self.secrets
            .iter()
            .map(|secret| SecretDefinition {
                name: secret.name.clone(),
                source: match (&secret.value, &secret.file) {
                    (_, Some(file)) => SecretSource::File(file.into()),
                    (Some(value), None) => SecretSource::Inline(value.clone()),
                    (None, None) => SecretSource::Inline(String::new()),
                },
            })
            .collect()
    }

    /// Convert config to a TestCase domain model
    pub fn to_test_case(&self) -> Result<TestCase> {
        Ok(TestCase {
            name: self.name.clone(),
            skip: self.skip.clone(),
            variables: self.variables.clone(),
            secrets: self.secret_definitions(),
            steps: Step::from_configs(&self.steps)
                .with_context(|| format!("Invalid steps in test case '{}'", self.name))?,
            teardown: Step::from_configs(&self.teardown)
                .with_context(|| format!("Invalid teardown in test case '{}'", self.name))?,
        })
    }
}
