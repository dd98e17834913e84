use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    mangarchive::logging::init().context("init logging")?;

    let cli = mangarchive::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let config = mangarchive::config::Config::load(cli.config.as_deref()).context("load config")?;
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match cli.command {
        mangarchive::cli::Command::Download(args) => {
            mangarchive::commands::download(config, args, cancel)
                .await
                .context("download")?;
        }
        mangarchive::cli::Command::Batch(args) => {
            mangarchive::commands::batch(config, args, cancel)
                .await
                .context("batch")?;
        }
        mangarchive::cli::Command::Sites => {
            mangarchive::commands::sites(config).context("sites")?;
        }
        mangarchive::cli::Command::Key(args) => {
            mangarchive::commands::key(args).context("key")?;
        }
        mangarchive::cli::Command::Pack(args) => {
            mangarchive::commands::pack(args).context("pack")?;
        }
        mangarchive::cli::Command::Inspect(args) => {
            mangarchive::commands::inspect(args).context("inspect")?;
        }
    }

    Ok(())
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("interrupt received; finishing in-flight work");
                cancel.cancel();
            }
            Err(err) => tracing::warn!(?err, "failed to listen for interrupt"),
        }
    });
}
