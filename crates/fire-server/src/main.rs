//! `fire-server` binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from `FIRE_*` environment variables.
//! 2. Initialise structured JSON logging.
//! 3. Install and preload the bundled native libraries (once per process).
//! 4. Validate the certificate material and write it out as PEM files.
//! 5. Install the crypto provider and build the TLS configuration.
//! 6. Build the Axum router and serve HTTPS until SIGINT / SIGTERM.

mod certs;
mod config;
mod native;
mod server;
mod telemetry;

#[cfg(test)]
mod test_pki;

use std::{future::Future, net::SocketAddr};

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::config::Config;
use crate::native::NativeLibraries;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(&cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = cfg.port,
        max_threads = cfg.max_threads,
        connection_timeout_ms = cfg.connection_timeout_ms,
        "fire-server starting"
    );

    // -----------------------------------------------------------------------
    // 3. Native libraries
    // -----------------------------------------------------------------------
    let native = native::ensure_loaded(&cfg.native());

    run(&cfg, native, server::listener::shutdown_signal()).await
}

/// Steps 4 to 6 of the startup sequence, then serve until `shutdown`.
///
/// The installed native copies are removed before returning, whether the
/// server stopped cleanly or startup failed.
async fn run<H, F>(cfg: &Config, native: &NativeLibraries<H>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let result = start_and_serve(cfg, native, shutdown).await;
    let removed = native.remove_installed();
    match &result {
        Ok(()) => info!(removed, "fire-server stopped"),
        Err(e) => error!(removed, error = %format!("{e:#}"), "fire-server exited with an error"),
    }
    result
}

async fn start_and_serve<H, F>(cfg: &Config, native: &NativeLibraries<H>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    // -----------------------------------------------------------------------
    // 4. Certificate material
    // -----------------------------------------------------------------------
    let files = certs::materialize(cfg).map_err(|e| {
        error!(error = %e, "certificate material unavailable");
        e
    })?;

    // -----------------------------------------------------------------------
    // 5. TLS
    // -----------------------------------------------------------------------
    let provider = server::tls::install_crypto_provider();
    info!(
        cipher_suites = provider.cipher_suites.len(),
        "rustls TLS provider (ring) ready"
    );
    let tls = server::tls::load_server_config(&files, cfg.client_auth, provider).with_context(
        || {
            format!(
                "failed to configure TLS ({} of {} native libraries loaded)",
                native.loaded_count(),
                native.attempts().len()
            )
        },
    )?;

    // -----------------------------------------------------------------------
    // 6. HTTPS server
    // -----------------------------------------------------------------------
    let router = server::router::build(cfg.max_threads);
    let addr: SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    let listener = server::listener::bind(addr, tls, cfg.connection_timeout()).await?;
    info!(addr = %listener.local_addr()?, client_auth = ?cfg.client_auth, "listening");

    listener.serve(router, shutdown).await
}
