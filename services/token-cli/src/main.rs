//! MangaDex token tool
//!
//! Operator front end for the credential lifecycle:
//! 1. Loads configuration and picks the token store back end
//! 2. `login` runs the password grant and stores the pair
//! 3. `status` reports what is stored for a caller
//! 4. `header` prints a ready-to-use Authorization header, refreshing if due

mod cli;
mod config;
mod store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use common::Secret;
use mangadex_auth::{OAuthCredentials, TokenStore};
use mangadex_oauth::OAuthClient;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs on stderr so stdout carries only command output
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    let config_path = cli.config;
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        api_host = %config.oauth.api_host,
        token_endpoint = %config.oauth.token_endpoint,
        backend = ?config.store.backend,
        encrypted = config.store.encrypted,
        "configuration loaded"
    );

    let store = store::open_store(&config.store).await?;

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;

    let client = Arc::new(
        OAuthClient::builder(config.default_credentials())
            .store(store.clone())
            .http_client(http)
            .token_endpoint(config.oauth.token_endpoint.clone())
            .timeout(Duration::from_secs(config.oauth.timeout_secs))
            .api_host(config.oauth.api_host.clone())
            .default_caller_key(config.oauth.default_caller_key.clone())
            .refresh_skew(Duration::from_secs(config.oauth.refresh_skew_secs))
            .refresh_mode(config.oauth.refresh_mode.into())
            .persist_policy(config.oauth.persist_policy.into())
            .build(),
    );

    match cli.command {
        Command::Login {
            caller_key,
            username,
            password,
        } => login(&client, &config, caller_key, &username, Secret::new(password)).await,
        Command::Status { caller_key } => status(store.as_ref(), &caller_key).await,
        Command::Header { caller_key } => header(&client, &caller_key).await,
    }
}

async fn login(
    client: &OAuthClient,
    config: &Config,
    caller_key: String,
    username: &str,
    password: Secret<String>,
) -> Result<()> {
    let defaults = config.default_credentials();
    let credentials = OAuthCredentials::new(caller_key, defaults.client_id, defaults.client_secret);

    let grant = client
        .login(username, password.expose(), &credentials)
        .await
        .context("login failed")?;

    println!(
        "logged in {} (expires_at={}, persisted={})",
        credentials.caller_key,
        grant.expires_at.to_rfc3339(),
        grant.persisted
    );
    Ok(())
}

async fn status(store: &dyn TokenStore, caller_key: &str) -> Result<()> {
    match store.load(caller_key).await {
        Ok(entry) => {
            let remaining = entry.expires_at - Utc::now();
            println!(
                "{caller_key}: live, expires_at={} ({}s left), client_credentials={}",
                entry.expires_at.to_rfc3339(),
                remaining.num_seconds(),
                if entry.credentials.is_some() {
                    "stored"
                } else {
                    "default"
                }
            );
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            println!("{caller_key}: no live tokens");
            Ok(())
        }
        Err(e) => Err(e).context("failed to read token store"),
    }
}

async fn header(client: &OAuthClient, caller_key: &str) -> Result<()> {
    let token = client
        .access_token(caller_key)
        .await
        .with_context(|| format!("no usable access token for {caller_key}"))?;
    println!("Authorization: Bearer {token}");
    Ok(())
}
