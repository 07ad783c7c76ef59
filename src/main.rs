use anyhow::{bail, Context};
use tracing_subscriber::EnvFilter;

use schematron_testsuite::cli::Cli;
use schematron_testsuite::config::HarnessConfig;
use schematron_testsuite::loader::TestcaseLoader;
use schematron_testsuite::output::Output;
use schematron_testsuite::pipeline::ValidatorRegistry;
use schematron_testsuite::populate::Populator;
use schematron_testsuite::runner::{Driver, TestsuiteRunner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse_args();

    let config = HarnessConfig::load(&cli.config)
        .await
        .with_context(|| format!("unable to load configuration {}", cli.config.display()))?;
    let validator_config = config
        .validator(&cli.validator)
        .with_context(|| format!("no validator named '{}' in configuration", cli.validator))?;

    let registry = ValidatorRegistry::with_builtins();
    let validator = registry.create(validator_config)?;

    if !validator.is_available().await {
        bail!(
            "validator '{}' is not available in this environment",
            cli.validator
        );
    }

    let loader = TestcaseLoader::new();
    let (label, testcases) = if cli.testsuite.is_dir() {
        let label = cli
            .testsuite
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "testsuite".to_string());
        (label, loader.load_directory(&cli.testsuite).await?)
    } else {
        let suite = loader.load_testsuite(&cli.testsuite).await?;
        (suite.title().to_string(), suite.testcases().to_vec())
    };
    if testcases.is_empty() {
        bail!("no testcases found at {}", cli.testsuite.display());
    }

    let label = cli.label.clone().unwrap_or(label);

    let mut skip_ids = config.skip.clone();
    skip_ids.extend(cli.skip.iter().cloned());

    let populator = match &cli.sandbox_dir {
        Some(dir) => Populator::with_base_dir(dir),
        None => Populator::new(),
    };

    let runner = TestsuiteRunner::new(Driver::new(validator, populator))
        .with_skip_ids(skip_ids)
        .with_concurrency(cli.thread_count());

    let report = runner.run(&label, &testcases).await?;

    print!("{}", Output::new(cli.verbosity()).format_report(&report));

    if let Some(path) = &cli.report {
        tokio::fs::write(path, report.to_xml()?).await?;
    }
    if let Some(path) = &cli.json_report {
        tokio::fs::write(path, serde_json::to_vec_pretty(&report)?).await?;
    }

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
