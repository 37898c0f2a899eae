mod chat;
mod cli;
mod commands;
mod render;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::info;

use parley_api::{ApiClient, ApiError};
use parley_session::{SessionContext, SessionEvent, SqliteStore};

use crate::cli::Cli;

const LOGIN_HINT: &str = "You are not logged in or your session expired. Run `parley login` first.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let store = SqliteStore::open(&cli.store)?;
    let session = SessionContext::load(store)?;
    let api = ApiClient::new(&cli.api_url, session.clone())?;
    info!("Using API at {}", api.base_url());

    let mut events = session.subscribe();
    let outcome = tokio::select! {
        result = commands::run(cli.command, &api, &cli.ws_url) => result,
        _ = login_required(&mut events) => Err(ApiError::LoginRequired.into()),
    };

    match outcome {
        Err(e) if needs_login(&e) => {
            eprintln!("{}", LOGIN_HINT);
            std::process::exit(1);
        }
        other => other,
    }
}

/// Resolves once the session reports that a fresh login is needed.
async fn login_required(events: &mut broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::LoginRequired) => return,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

fn needs_login(e: &anyhow::Error) -> bool {
    e.downcast_ref::<ApiError>().is_some_and(ApiError::needs_login)
}
