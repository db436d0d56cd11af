//! Weathervane indexer binary.
//!
//! Wires the indexer up from environment variables: RPC endpoints, the
//! WebSocket URL, and the program ids of the oracle-feed and parimutuel
//! market programs. Runs until Ctrl-C.

use std::str::FromStr;
use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use weathervane::utils::logging;
use weathervane::{
    AdapterRegistry, EventDispatcher, EventPayload, IndexerConfigBuilder, IndexerError,
    MarketIndexer, OracleFeedAdapter, ParimutuelAdapter, Result, TelemetryConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let _telemetry = weathervane::init_telemetry(TelemetryConfig::default());

    let oracle_program = env_pubkey("ORACLE_PROGRAM_ID")?;
    let parimutuel_program = env_pubkey("PARIMUTUEL_PROGRAM_ID")?;

    let mut builder = IndexerConfigBuilder::from_env();
    if std::env::var("PROGRAM_IDS").is_err() {
        // Without an explicit list, index exactly the adapter programs.
        for id in [oracle_program, parimutuel_program].into_iter().flatten() {
            builder = builder.program_id(id.to_string());
        }
    }
    let config = builder.build()?;

    let registry = Arc::new(AdapterRegistry::new());
    if let Some(program_id) = oracle_program {
        registry.register(Arc::new(OracleFeedAdapter::new(program_id)));
    }
    if let Some(program_id) = parimutuel_program {
        registry.register(Arc::new(ParimutuelAdapter::new(program_id)));
    }
    if registry.is_empty() {
        tracing::warn!(
            "No adapters registered; set ORACLE_PROGRAM_ID and/or PARIMUTUEL_PROGRAM_ID. \
             Every indexed account will be dropped."
        );
    }

    let programs: Vec<String> = config.program_ids.iter().map(Pubkey::to_string).collect();
    logging::log_startup(
        &programs,
        config.primary_rpc_url(),
        &config.ws_url(),
        config.poll_interval_secs,
    );

    let dispatcher = Arc::new(EventDispatcher::new(config.replay));
    dispatcher.on_all_fn(|event| async move {
        match &event.payload {
            EventPayload::MarketUpdated(market) => logging::log_market(market, event.slot),
            EventPayload::SyncCompleted(summary) => {
                tracing::info!(
                    programs = summary.programs,
                    indexed = summary.accounts_indexed,
                    dropped = summary.accounts_dropped,
                    elapsed_ms = summary.elapsed_ms,
                    "Initial sync finished"
                );
            }
            EventPayload::SubscriptionLost(loss) => {
                tracing::error!(
                    program = %loss.program_id,
                    reason = %loss.reason,
                    "Live subscription lost"
                );
            }
        }
        Ok(())
    });

    let indexer = MarketIndexer::new(config, registry, dispatcher);
    indexer.start().await?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| IndexerError::InternalError(format!("signal handler failed: {e}")))?;
    tracing::info!("Shutdown signal received");
    indexer.stop().await;
    Ok(())
}

/// Reads an optional pubkey from the environment. Absence is fine,
/// an unparsable value is not.
fn env_pubkey(name: &str) -> Result<Option<Pubkey>> {
    match std::env::var(name) {
        Ok(value) => Ok(Some(Pubkey::from_str(value.trim())?)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(IndexerError::EnvVarError(e)),
    }
}
