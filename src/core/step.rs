//! Step domain model

use crate::core::{
    config::{ExpectErrorConfig, LoopConfig, RetryConfig, StepConfig},
    value::Value,
};
use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A single unit of work: an action call or a control block
#[derive(Debug, Clone)]
pub struct Step {
    /// Display label
    pub name: String,

    /// Opaque action identifier, ignored when `control` is set
    pub action: String,

    /// Arguments before substitution
    pub args: Vec<Value>,

    /// Named options before substitution
    pub options: HashMap<String, Value>,

    /// Variable the output is bound to when the step passes
    pub result: Option<String>,

    pub skip: Option<SkipCondition>,

    /// Record a failure without aborting the enclosing step list
    pub continue_on_failure: bool,

    pub retry: Option<RetryPolicy>,

    pub expect_error: Option<ExpectError>,

    /// Per-attempt action timeout
    pub timeout: Option<Duration>,

    /// At most one control block; the type makes `if`/`for`/`while` exclusive
    pub control: Option<ControlBlock>,
}

/// `if` / `for` / `while` wrapper around nested step lists
#[derive(Debug, Clone)]
pub enum ControlBlock {
    If(ConditionalBlock),
    For(LoopBlock),
    While(LoopBlock),
}

impl ControlBlock {
    /// Operator name passed to the `control` evaluator
    pub fn kind(&self) -> &'static str {
        match self {
            ControlBlock::If(_) => "if",
            ControlBlock::For(_) => "for",
            ControlBlock::While(_) => "while",
        }
    }

    pub fn condition(&self) -> &str {
        match self {
            ControlBlock::If(block) => &block.condition,
            ControlBlock::For(block) | ControlBlock::While(block) => &block.condition,
        }
    }

    /// Every nested step, across all branches
    pub fn nested_steps(&self) -> impl Iterator<Item = &Step> {
        let (first, second): (&[Step], &[Step]) = match self {
            ControlBlock::If(block) => (&block.then_steps, &block.else_steps),
            ControlBlock::For(block) | ControlBlock::While(block) => (&block.steps, &[]),
        };
        first.iter().chain(second.iter())
    }
}

#[derive(Debug, Clone)]
pub struct ConditionalBlock {
    pub condition: String,
    pub then_steps: Vec<Step>,
    pub else_steps: Vec<Step>,
}

#[derive(Debug, Clone)]
pub struct LoopBlock {
    /// Iteration count expression for `for`, boolean expression for `while`
    pub condition: String,
    pub steps: Vec<Step>,
    pub max_iterations: Option<u32>,
}

/// Skip field: absent, a literal flag, or a condition string substituted at run time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SkipCondition {
    Flag(bool),
    Expr(String),
}

/// Delay growth between retry attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    Fixed,
    Linear,
    Exponential,
}

/// What makes a failed attempt eligible for another try
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryCondition {
    /// Error text mentions a timeout
    Timeout,
    /// Error text mentions a connection problem
    Connection,
    /// Any status code in the class, e.g. `5xx` is `StatusClass(5)`
    StatusClass(u16),
    /// One specific status code, e.g. `429`
    StatusCode(u16),
    /// Literal substring of the error text
    ErrorContains(String),
}

impl RetryCondition {
    pub fn parse(raw: &str) -> Self {
        let lower = raw.trim().to_ascii_lowercase();
        match lower.as_str() {
            "timeout" => return RetryCondition::Timeout,
            "connection" => return RetryCondition::Connection,
            _ => {}
        }

        let bytes = lower.as_bytes();
        if bytes.len() == 3 {
            if bytes[0].is_ascii_digit() && &lower[1..] == "xx" {
                return RetryCondition::StatusClass((bytes[0] - b'0') as u16);
            }
            if let Ok(code) = lower.parse::<u16>() {
                if (100..600).contains(&code) {
                    return RetryCondition::StatusCode(code);
                }
            }
        }

        RetryCondition::ErrorContains(raw.trim().to_string())
    }
}

/// Retry policy attached to a step. Read-only; every invocation starts fresh.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, at least 1
    pub attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
    pub max_delay: Option<Duration>,
    /// Randomize each delay by up to ±10%
    pub jitter: bool,
    /// Empty means: retry on any error
    pub conditions: Vec<RetryCondition>,
}

impl RetryPolicy {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            delay: Duration::ZERO,
            backoff: Backoff::Fixed,
            max_delay: None,
            jitter: false,
            conditions: Vec::new(),
        }
    }

    fn from_config(config: &RetryConfig, step_name: &str) -> Result<Self> {
        if config.attempts == 0 {
            bail!("Step '{}' retry attempts must be at least 1", step_name);
        }

        Ok(Self {
            attempts: config.attempts,
            delay: config
                .delay
                .as_ref()
                .map(|d| d.to_duration())
                .transpose()
                .with_context(|| format!("Step '{}' has an invalid retry delay", step_name))?
                .unwrap_or(Duration::ZERO),
            backoff: config.backoff,
            max_delay: config
                .max_delay
                .as_ref()
                .map(|d| d.to_duration())
                .transpose()
                .with_context(|| format!("Step '{}' has an invalid retry max_delay", step_name))?,
            jitter: config.jitter,
            conditions: config.conditions.iter().map(|c| RetryCondition::parse(c)).collect(),
        })
    }
}

/// How an error message is checked against an expectation
#[derive(Debug, Clone)]
pub enum ErrorMatcher {
    Any,
    Contains(String),
    NotContains(String),
    Exact(String),
    StartsWith(String),
    EndsWith(String),
    Matches(Regex),
    NotMatches(Regex),
}

/// Expected-error matcher
#[derive(Debug, Clone)]
pub struct ExpectError {
    /// `true`: the step must fail; `false`: the step must succeed
    pub should_error: bool,
    /// All matchers must accept the error message
    pub matchers: Vec<ErrorMatcher>,
}

impl ExpectError {
    pub fn any() -> Self {
        Self {
            should_error: true,
            matchers: vec![ErrorMatcher::Any],
        }
    }

    fn from_config(config: &ExpectErrorConfig, step_name: &str) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).with_context(|| {
                format!("Step '{}' has an invalid expect_error regex: {}", step_name, pattern)
            })
        };

        let expectation = match config {
            ExpectErrorConfig::Flag(true) => Self::any(),
            ExpectErrorConfig::Flag(false) => Self {
                should_error: false,
                matchers: Vec::new(),
            },
            ExpectErrorConfig::Text(text) if text.eq_ignore_ascii_case("any") => Self::any(),
            ExpectErrorConfig::Text(text) => Self {
                should_error: true,
                matchers: vec![ErrorMatcher::Contains(text.clone())],
            },
            ExpectErrorConfig::Detailed(details) => {
                let mut matchers = Vec::new();
                if details.any {
                    matchers.push(ErrorMatcher::Any);
                }
                if let Some(s) = &details.contains {
                    matchers.push(ErrorMatcher::Contains(s.clone()));
                }
                if let Some(s) = &details.not_contains {
                    matchers.push(ErrorMatcher::NotContains(s.clone()));
                }
                if let Some(s) = &details.exact {
                    matchers.push(ErrorMatcher::Exact(s.clone()));
                }
                if let Some(s) = &details.starts_with {
                    matchers.push(ErrorMatcher::StartsWith(s.clone()));
                }
                if let Some(s) = &details.ends_with {
                    matchers.push(ErrorMatcher::EndsWith(s.clone()));
                }
                if let Some(s) = &details.matches {
                    matchers.push(ErrorMatcher::Matches(compile(s)?));
                }
                if let Some(s) = &details.not_matches {
                    matchers.push(ErrorMatcher::NotMatches(compile(s)?));
                }
                if matchers.is_empty() {
                    matchers.push(ErrorMatcher::Any);
                }
                Self {
                    should_error: details.should_error.unwrap_or(true),
                    matchers,
                }
            }
        };

        Ok(expectation)
    }
}

impl Step {
    /// Create a plain action step
    pub fn action(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
            args: Vec::new(),
            options: HashMap::new(),
            result: None,
            skip: None,
            continue_on_failure: false,
            retry: None,
            expect_error: None,
            timeout: None,
            control: None,
        }
    }

    /// Create a control-block step
    pub fn control(name: impl Into<String>, block: ControlBlock) -> Self {
        Self {
            control: Some(block),
            ..Self::action(name, "")
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn with_skip(mut self, skip: SkipCondition) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_expect_error(mut self, expect_error: ExpectError) -> Self {
        self.expect_error = Some(expect_error);
        self
    }

    pub fn continue_on_failure(mut self) -> Self {
        self.continue_on_failure = true;
        self
    }

    /// Label used in results: the action, or the control operator
    pub fn kind(&self) -> &str {
        match &self.control {
            Some(block) => block.kind(),
            None => &self.action,
        }
    }

    /// Create a step from a step config
    pub fn from_config(config: &StepConfig) -> Result<Self> {
        let blocks = [
            config.if_block.is_some(),
            config.for_block.is_some(),
            config.while_block.is_some(),
        ];
        let block_count = blocks.iter().filter(|set| **set).count();

        let action = config.action.clone().unwrap_or_default();
        let default_name = if config.if_block.is_some() {
            "if".to_string()
        } else if config.for_block.is_some() {
            "for".to_string()
        } else if config.while_block.is_some() {
            "while".to_string()
        } else {
            action.clone()
        };
        let name = config.name.clone().unwrap_or(default_name);

        if block_count > 1 {
            bail!("Step '{}' may set only one of if/for/while", name);
        }
        if block_count == 0 && action.trim().is_empty() {
            bail!("Step '{}' has no action", name);
        }

        let control = if let Some(block) = &config.if_block {
            Some(ControlBlock::If(ConditionalBlock {
                condition: block.condition.clone(),
                then_steps: Self::from_configs(&block.then)?,
                else_steps: Self::from_configs(&block.else_steps)?,
            }))
        } else if let Some(block) = &config.for_block {
            Some(ControlBlock::For(Self::loop_from_config(block)?))
        } else if let Some(block) = &config.while_block {
            Some(ControlBlock::While(Self::loop_from_config(block)?))
        } else {
            None
        };

        let timeout = config
            .timeout
            .as_ref()
            .map(|t| t.to_duration())
            .transpose()
            .with_context(|| format!("Step '{}' has an invalid timeout", name))?;

        Ok(Step {
            args: config.args.clone(),
            options: config.options.clone(),
            result: config.result.clone().filter(|r| !r.trim().is_empty()),
            skip: config.skip.clone(),
            continue_on_failure: config.continue_on_failure,
            retry: config
                .retry
                .as_ref()
                .map(|r| RetryPolicy::from_config(r, &name))
                .transpose()?,
            expect_error: config
                .expect_error
                .as_ref()
                .map(|e| ExpectError::from_config(e, &name))
                .transpose()?,
            timeout,
            control,
            action,
            name,
        })
    }

    /// Convert a list of step configs, preserving order
    pub fn from_configs(configs: &[StepConfig]) -> Result<Vec<Self>> {
        configs.iter().map(Self::from_config).collect()
    }

    fn loop_from_config(config: &LoopConfig) -> Result<LoopBlock> {
        Ok(LoopBlock {
            condition: config.condition.clone(),
            steps: Self::from_configs(&config.steps)?,
            max_iterations: config.max_iterations,
        })
    }
}
