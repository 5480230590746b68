//! FlightSurety Oracle Relay
//!
//! Registers the configured oracle accounts, then relays status verdicts for
//! every `OracleRequest` the app contract emits. A small HTTP API reports
//! liveness, the oracle pool and relay counters.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use flightsurety_oracles::app_state::AppState;
use flightsurety_oracles::config::{LedgerMode, RelayConfig};
use flightsurety_oracles::ledger::{JsonRpcLedger, LedgerClient, SimulatedLedger};
use flightsurety_oracles::routes;
use flightsurety_oracles::services::{
    ConsensusRelay, DepartureTimePolicy, OracleRegistry, RelayStats,
};

const RELAY_SUPERVISOR_MAX_BACKOFF_SECONDS: u64 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RelayConfig::from_env().context("invalid relay configuration")?;

    let ledger: Arc<dyn LedgerClient> = match config.ledger_mode {
        LedgerMode::Rpc => {
            let rpc = config.rpc_ledger_config()?;
            info!(rpc_url = %rpc.rpc_url, app = %rpc.app_address, "using JSON-RPC ledger");
            Arc::new(JsonRpcLedger::new(rpc))
        }
        LedgerMode::Simulated => {
            info!("using simulated ledger");
            let simulated = Arc::new(SimulatedLedger::new(
                config.account_offset + config.oracle_count,
            ));
            Arc::clone(&simulated).spawn_request_generator(config.simulated_request_interval);
            simulated
        }
    };

    // Registration must finish before the relay reads the registry.
    let mut registry = OracleRegistry::new();
    match registry
        .register_all(ledger.as_ref(), &config.registry_options())
        .await
    {
        Ok(failures) if !failures.is_empty() => {
            warn!(failed = failures.len(), "some oracles could not be registered");
        }
        Ok(_) => {}
        Err(err) => {
            error!(error = %err, "oracle registration aborted; continuing with the identities registered so far");
        }
    }
    let snapshot = registry.freeze();

    let stats = Arc::new(RelayStats::default());
    let mut relay = ConsensusRelay::new(
        Arc::clone(&ledger),
        snapshot.clone(),
        Arc::new(DepartureTimePolicy),
        config.relay_options(),
        Arc::clone(&stats),
    );

    // Run and supervise the relay; the registry and submission history
    // survive resubscription.
    tokio::spawn(async move {
        let mut restart_count: u32 = 0;
        loop {
            match relay.run().await {
                Ok(()) => warn!("oracle request stream ended; resubscribing"),
                Err(err) if err.is_transient() => {
                    error!(error = %err, "could not subscribe to oracle requests; retrying")
                }
                Err(err) => {
                    error!(error = %err, "oracle request subscription unavailable; relay stopped");
                    break;
                }
            }

            restart_count = restart_count.saturating_add(1);
            let backoff_seconds = (2u64.saturating_pow(restart_count.min(5)))
                .min(RELAY_SUPERVISOR_MAX_BACKOFF_SECONDS);
            warn!(restart_count, backoff_seconds, "relay restart backoff");
            sleep(Duration::from_secs(backoff_seconds)).await;
        }
    });

    let app = routes::app(AppState::new(snapshot, stats));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    info!("Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("could not bind {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
