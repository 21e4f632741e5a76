use anyhow::Result;
use clap::{CommandFactory, Parser};

use natscat::{
    cli::Cli,
    config::Config,
    dispatch,
    error::ConfigError,
    transport::nats::NatsConnector,
};

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    // stdout carries payloads, so diagnostics always go to stderr.
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match Config::resolve(&cli) {
        Ok(config) => config,
        Err(err) => {
            if err == ConfigError::MissingSubject {
                eprintln!("{}", Cli::command().render_help());
            }
            return Err(err.into());
        }
    };
    init_tracing(config.verbose);

    dispatch::run_until_ctrl_c(
        &config,
        &NatsConnector,
        tokio::io::stdin(),
        tokio::io::stdout(),
    )
    .await?;

    Ok(())
}
