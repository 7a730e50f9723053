//! Logging setup for binaries.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use walletledger_common::{LedgerError, Result};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level` when set. `json` switches the fmt layer to
/// one JSON object per line.
pub fn init(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| LedgerError::ConfigurationError(format!("invalid log level: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    installed.map_err(|e| LedgerError::ConfigurationError(format!("subscriber: {}", e)))
}
