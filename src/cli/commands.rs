//! CLI command definitions

use crate::execution::SchedulingStrategy;
use clap::Args;

/// Run one or more test cases
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to a test case YAML file (repeatable)
    #[arg(short = 'f', long = "file", required = true)]
    pub files: Vec<String>,

    /// Variable overrides (key=value)
    #[arg(long = "var", value_parser = parse_key_value)]
    pub variables: Vec<(String, String)>,

    /// Step scheduling strategy
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Sequential)]
    pub strategy: SchedulingStrategyArg,

    /// Concurrency bound for parallel-limited steps and parallel test cases
    #[arg(long, default_value_t = 4)]
    pub max_concurrency: usize,

    /// Stop after the first failed test case (sequential test runs only)
    #[arg(long)]
    pub fail_fast: bool,

    /// Run test cases concurrently
    #[arg(long)]
    pub parallel_tests: bool,

    /// Print the suite result as JSON instead of progress output
    #[arg(long)]
    pub json: bool,
}

impl RunCommand {
    pub fn scheduling_strategy(&self) -> SchedulingStrategy {
        match self.strategy {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => {
                SchedulingStrategy::LimitedParallel(self.max_concurrency.max(1))
            }
        }
    }
}

/// Validate test case files
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to a test case YAML file (repeatable)
    #[arg(short = 'f', long = "file", required = true)]
    pub files: Vec<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
