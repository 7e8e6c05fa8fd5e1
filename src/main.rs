//! Draw-and-guess WebSocket server

use std::{process::ExitCode, sync::Arc};

use drawguess::{
    config::{self, ServerConfig},
    gateway::Gateway,
    registry::Registry,
    word_bank::{self, WordBank},
    ws,
};
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Error, Debug)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error("word list: {0}")]
    WordList(#[from] word_bank::Error),
    #[error("cannot serve: {0}")]
    Io(#[from] std::io::Error),
}

async fn run() -> Result<(), StartupError> {
    let config = ServerConfig::from_env()?;

    let bank = match config.read_word_list()? {
        Some(text) => WordBank::from_lines(&text)?,
        None => WordBank::default(),
    };
    info!(words = bank.len(), "word bank loaded");

    let registry = Registry::new(config.options, Arc::new(bank));
    let app = ws::router(Arc::new(Gateway::new(registry)));

    let listener = tokio::net::TcpListener::bind(config.address).await?;
    info!(address = %config.address, path = ws::PATH, "drawguess listening");
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drawguess=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server stopped");
            ExitCode::FAILURE
        }
    }
}
