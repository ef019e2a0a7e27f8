mod cli;
mod commands;
mod engine;
mod error;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use engine::Engine;
use error::CliError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Login { token } => commands::login(token),
        Command::Logout => commands::logout(),
        Command::Whoami => commands::whoami(),
        Command::Deployments { command } => {
            let engine = Engine::bootstrap().await?;
            commands::deployments(&engine, cli.json, command).await
        }
        Command::Ec2 { command } => {
            let engine = Engine::bootstrap().await?;
            commands::ec2(&engine, command).await
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Unauthenticated) => 3,
        Some(CliError::Usage(_)) => 2,
        None => 1,
    }
}
