//! Test case domain model

use crate::core::{
    step::{SkipCondition, Step},
    value::Value,
};
use std::collections::HashMap;
use std::path::PathBuf;

/// Where a secret's value comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    Inline(String),
    /// File contents, trailing newline stripped
    File(PathBuf),
}

/// A masked namespace entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretDefinition {
    pub name: String,
    pub source: SecretSource,
}

/// A runnable test case
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,

    /// Skip the whole test case
    pub skip: Option<SkipCondition>,

    /// Initial variables, resolved against each other and the secrets
    pub variables: HashMap<String, Value>,

    /// Secrets in resolution order
    pub secrets: Vec<SecretDefinition>,

    pub steps: Vec<Step>,

    /// Always runs after `steps`, whatever their outcome
    pub teardown: Vec<Step>,
}

impl TestCase {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            skip: None,
            variables: HashMap::new(),
            secrets: Vec::new(),
            steps,
            teardown: Vec::new(),
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.push(SecretDefinition {
            name: name.into(),
            source: SecretSource::Inline(value.into()),
        });
        self
    }

    pub fn with_teardown(mut self, teardown: Vec<Step>) -> Self {
        self.teardown = teardown;
        self
    }

    pub fn with_skip(mut self, skip: SkipCondition) -> Self {
        self.skip = Some(skip);
        self
    }
}
