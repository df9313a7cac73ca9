mod cli;
mod config;
mod env;
mod watchers;

use clap::Parser;
use cli::{Cli, Commands};
use pgcdc_runner::Runner;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();
}

#[tokio::main]
async fn main() {
    // A re-exec'd worker-group child carries its assignment entirely in its
    // environment; check for that before touching argv at all (SPEC_FULL
    // §4.7, §9).
    if let Some((runner_config, group)) = Runner::internal_worker_invocation() {
        init_tracing();
        let runner = Runner::new(runner_config, watchers::default_registry());
        if let Err(e) = runner.run_worker_group(group).await {
            tracing::error!(error = %e, "worker group exited with error");
            std::process::exit(1);
        }
        return;
    }

    let cli = Cli::parse();

    if let Err(e) = env::load_env(cli.env.as_deref()) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }

    init_tracing();

    match cli.command {
        Commands::Start { config: config_path } => {
            let cli_config = match config::CliConfig::load(&config_path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!(error = %e, "failed to load configuration");
                    std::process::exit(1);
                }
            };

            let runner_config = cli_config.into_runner_config();
            let runner = Runner::new(runner_config, watchers::default_registry());

            if let Err(e) = runner.start().await {
                tracing::error!(error = %e, "runner exited with error");
                std::process::exit(1);
            }
        }
    }
}
