// cartos_host/src/main.rs

use anyhow::Context;
use cartos_host::cli::Cli;
use cartos_host::config::HostConfig;
use cartos_host::registry::{MapperRegistry, PublisherRegistry};
use cartos_host::{list_artifacts, Host};
use clap::Parser;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_thread_names(true).init();

    // --- 1. Load the Scenario ---
    info!("Loading scenario from: {:?}", cli.scenario);
    let mut config = HostConfig::load(&cli.scenario)?;
    cli.apply(&mut config);
    let duration = Duration::try_from_secs_f64(config.host.duration_seconds)
        .with_context(|| format!("invalid duration {}", config.host.duration_seconds))?;
    let save_path = config.host.save_path.clone();

    // --- 2. Build and Run ---
    let mut host = Host::build(config, &MapperRegistry::with_builtins(), &PublisherRegistry::with_builtins())?;
    let report = host.run(duration)?;

    // --- 3. Summarize ---
    for source in &report.sources {
        info!(source = %source.name, published = source.published, "source summary");
    }
    for mapper in &report.mappers {
        info!(
            mapper = %mapper.name,
            processed = mapper.processed,
            skipped = mapper.skipped,
            published = mapper.published,
            discarded = mapper.discarded,
            "mapper summary"
        );
    }
    for topic in &report.topics {
        info!(topic = %topic.name, published = topic.published, buffered = topic.buffered, "topic summary");
    }
    for artifact in list_artifacts(&save_path) {
        info!("saved {}", artifact.display());
    }

    if let Some(path) = &cli.report {
        let contents = toml::to_string_pretty(&report).context("failed to serialize run report")?;
        std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}
