//! SQL Gateway - command line entry point.
//!
//! Exposes the gateway operations as subcommands. Results are printed to
//! stdout as JSON; logs go to stderr.

use serde::Serialize;
use sql_gateway::config::{Command, Config, TargetArgs};
use sql_gateway::models::ConnectionParams;
use sql_gateway::{EncryptedSecret, Gateway, GatewayResult};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Resolve the target's password, decrypting a stored blob if one was given.
fn resolve_params(gateway: &Gateway, target: &TargetArgs) -> GatewayResult<ConnectionParams> {
    let password = match (&target.password_blob, &target.password) {
        (Some(blob), _) => gateway.decrypt(&EncryptedSecret::new(blob.as_str()))?,
        (None, Some(password)) => password.clone(),
        (None, None) => String::new(),
    };
    Ok(target.to_params(password))
}

async fn run(gateway: &Gateway, command: &Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Encrypt { plaintext } => {
            println!("{}", gateway.encrypt(plaintext)?.as_str());
        }
        Command::Decrypt { blob } => {
            println!("{}", gateway.decrypt(&EncryptedSecret::new(blob.as_str()))?);
        }
        Command::Test(target) => {
            gateway.test_connection(&resolve_params(gateway, target)?).await?;
            println!("ok");
        }
        Command::Exec { target, sql } => {
            let result = gateway.execute(&resolve_params(gateway, target)?, sql).await?;
            print_json(&result)?;
        }
        Command::Tables(target) => {
            let tables = gateway.list_tables(&resolve_params(gateway, target)?).await?;
            print_json(&tables)?;
        }
        Command::Describe { target, table } => {
            let columns = gateway
                .describe_table(&resolve_params(gateway, target)?, table)
                .await?;
            print_json(&columns)?;
        }
        Command::Databases(target) => {
            let databases = gateway
                .list_databases(&resolve_params(gateway, target)?)
                .await?;
            print_json(&databases)?;
        }
        Command::Preview {
            target,
            table,
            limit,
        } => {
            let result = gateway
                .preview_table(&resolve_params(gateway, target)?, table, *limit)
                .await?;
            print_json(&result)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    init_tracing(&config);

    // A missing secret is fatal before any command runs
    let gateway = match Gateway::new(config.gateway_config()) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "Refusing to start");
            return Err(e.into());
        }
    };

    info!("Starting SQL gateway v{}", env!("CARGO_PKG_VERSION"));

    let result = run(&gateway, &config.command).await;

    if let Err(e) = gateway.close_all().await {
        error!(error = %e, "Pool shutdown incomplete");
    }

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}
