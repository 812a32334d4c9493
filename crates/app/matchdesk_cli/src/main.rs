//! `matchdesk` command-line client.
//!
//! Drives the session controller the way the desktop console does: restore
//! on start, log in and out, refresh, and print what the rest of the app
//! would see.

// Import and re-export the `error` module
pub use self::error::{Error, Result};
mod error;

use std::time::Duration;

use clap::Parser;
use cli::{Cli, Commands};
use matchdesk_core::SessionController;
use matchdesk_core::session::events::spawn_event_logger;
use matchdesk_core::session::refresher::spawn_refresher;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

mod cli;
mod logging;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    if let Err(e) = run().await {
        log::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    logging::init()?;

    let args = Cli::parse();

    if let Commands::Version = args.command {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = args.session.to_config()?;
    let controller = SessionController::from_config(&config)?;

    match args.command {
        Commands::Login {
            email,
            password,
            tenant,
        } => {
            let user = controller
                .sign_in(&email, &password, tenant.as_deref())
                .await?;
            log::info!("Signed in as {} ({})", user.email, user.role);
            print_json(&controller.current())?;
        }
        Commands::Logout => {
            controller.sign_out().await;
            log::info!("Signed out");
        }
        Commands::Status => {
            let view = controller.initialize().await;
            print_json(&view)?;
        }
        Commands::Refresh => {
            controller.refresh_token().await?;
            log::info!("Access token refreshed");
        }
        Commands::Verify => match controller.verify_current_token().await {
            Ok(()) => print_json(&json!({ "valid": true }))?,
            Err(e) => {
                print_json(&json!({ "valid": false, "error": e.to_string() }))?;
                return Err(e.into());
            }
        },
        Commands::Debug => print_json(&controller.diagnostics()?)?,
        Commands::Watch => watch(controller, config.refresh_interval).await?,
        Commands::Version => {}
    }

    Ok(())
}

async fn watch(controller: SessionController, every: Option<Duration>) -> Result<()> {
    let logger = spawn_event_logger(controller.events());
    let view = controller.initialize().await;
    log::info!("Watching session (state: {:?}); Ctrl-C to stop", view.state);

    let cancel = CancellationToken::new();
    let refresher = every.map(|every| spawn_refresher(controller.clone(), every, cancel.clone()));

    tokio::signal::ctrl_c().await?;
    cancel.cancel();
    if let Some(refresher) = refresher {
        refresher
            .await
            .map_err(|e| Error::Custom(format!("refresher task failed: {e}")))?;
    }
    logger.abort();
    Ok(())
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
