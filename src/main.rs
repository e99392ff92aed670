use anyhow::{Context, Result};
use stepflow::cli::commands::{RunCommand, ValidateCommand};
use stepflow::cli::output::*;
use stepflow::cli::{Cli, Command};
use stepflow::core::{config::TestCaseConfig, value::stringify, TestCase};
use stepflow::{
    BuiltinActions, EngineConfig, ExecutionEngine, ExecutionEvent, StepStatus, SuiteOptions,
    TestStatus, Value,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let success = match &cli.command {
        Command::Run(cmd) => run_tests(cmd, cli.verbose).await?,
        Command::Validate(cmd) => validate_tests(cmd)?,
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

fn load_test_case(file: &str, overrides: &[(String, String)]) -> Result<TestCase> {
    let config = TestCaseConfig::from_file(file)
        .with_context(|| format!("Failed to load test case {}", file))?;
    let mut test_case = config.to_test_case()?;
    for (key, value) in overrides {
        test_case
            .variables
            .insert(key.clone(), Value::String(value.clone()));
    }
    Ok(test_case)
}

async fn run_tests(cmd: &RunCommand, verbose: bool) -> Result<bool> {
    let mut test_cases = Vec::with_capacity(cmd.files.len());
    for file in &cmd.files {
        let test_case = load_test_case(file, &cmd.variables)?;
        if !cmd.json {
            println!(
                "{} Loaded test case: {} ({} steps)",
                INFO,
                style(&test_case.name).bold(),
                style(test_case.steps.len()).cyan()
            );
        }
        test_cases.push(test_case);
    }

    if !cmd.json {
        for (key, value) in &cmd.variables {
            println!(
                "{} Variable override: {} = {}",
                INFO,
                style(key).cyan(),
                style(value).dim()
            );
        }
    }

    let config = EngineConfig::default().with_strategy(cmd.scheduling_strategy());
    let mut engine = ExecutionEngine::new(BuiltinActions::new(), config);

    // Set up event handler for console output
    if !cmd.json {
        engine.add_event_handler(move |event| {
            if let Some(line) = format_execution_event(&event) {
                println!("{}", line);
            }
            if verbose {
                if let ExecutionEvent::StepFinished { result } = &event {
                    if result.status == StepStatus::Passed && !result.output.is_null() {
                        println!("{}", format_output(&stringify(&result.output), 5));
                    }
                }
            }
        });
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling remaining steps");
            interrupt.cancel();
        }
    });

    let options = SuiteOptions {
        parallel: cmd.parallel_tests,
        fail_fast: cmd.fail_fast,
        max_concurrency: cmd.max_concurrency,
    };

    if !cmd.json {
        println!();
    }
    let suite = engine.execute_suite(&cancel, &test_cases, options).await;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&suite)?);
    } else {
        println!("\n{}", format_suite_summary(&suite));
    }

    Ok(suite.status != TestStatus::Failed)
}

fn validate_tests(cmd: &ValidateCommand) -> Result<bool> {
    if cmd.json {
        let (report, all_valid) = validation_report(&cmd.files)?;
        println!("{}", report);
        return Ok(all_valid);
    }

    let mut all_valid = true;
    for file in &cmd.files {
        println!("{} Validating {}...", INFO, style(file).dim());

        match TestCaseConfig::from_file(file) {
            Ok(config) => {
                println!("{} Test case configuration is valid!", CHECK);
                println!("  Name: {}", style(&config.name).bold());
                if let Some(description) = &config.description {
                    println!("  Description: {}", style(description).dim());
                }
                println!("  Steps: {}", style(config.steps.len()).cyan());
                println!("  Teardown: {}", style(config.teardown.len()).cyan());
                println!("  Variables: {}", style(config.variables.len()).cyan());
                println!("  Secrets: {}", style(config.secrets.len()).cyan());
            }
            Err(e) => {
                println!("{} Validation failed:", CROSS);
                println!("  {}", style(format!("{:#}", e)).red());
                all_valid = false;
            }
        }
    }

    Ok(all_valid)
}

/// JSON array of the valid configs, secrets redacted; errors go to stderr
fn validation_report(files: &[String]) -> Result<(String, bool)> {
    let mut all_valid = true;
    let mut validated = Vec::new();

    for file in files {
        match TestCaseConfig::from_file(file) {
            Ok(config) => validated.push(redact_secrets(config)),
            Err(e) => {
                eprintln!("{} {}: {:#}", CROSS, file, e);
                all_valid = false;
            }
        }
    }

    Ok((serde_json::to_string_pretty(&validated)?, all_valid))
}

/// Replace inline secret values before a config is printed
fn redact_secrets(mut config: TestCaseConfig) -> TestCaseConfig {
    for secret in &mut config.secrets {
        if secret.value.is_some() {
            secret.value = Some("***".to_string());
        }
    }
    config
}
