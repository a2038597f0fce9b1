use std::path::PathBuf;

use crate::error::ConfigError;
use crate::schema::{DataType, Venue};

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Loaded from the environment at startup. A malformed value is
// a ConfigError and aborts the process; nothing here is
// re-read after boot.
//
// Recognized variables:
//
//   GATEWAY_ID              names the IPC directory, tags health
//   EXCHANGES               venue:enabled:t1,t2,… joined by ';'
//   SYMBOLS                 SYMBOL:v1,v2,… joined by ';'
//   AERON_DIR               transport directory override
//   HEALTH_CHECK_MS         health log period (default 5000)
//   RECONNECT_MAX_RETRIES   per-client retry budget (default 10)
//   METRICS_PORT            status endpoint port (default 9090)
//
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway_id: String,
    pub exchanges: Vec<ExchangeConfig>,
    pub symbols: Vec<SymbolBinding>,
    /// Backing directory for the shared-memory streams.
    pub aeron_dir: PathBuf,
    pub health_check_ms: u64,
    pub reconnect_max_retries: u32,
    pub metrics_port: u16,
}

/// One venue's enablement and subscribed data types.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub venue: Venue,
    pub enabled: bool,
    pub data_types: Vec<DataType>,
}

/// Binds one canonical symbol to a subset of venues.
#[derive(Debug, Clone)]
pub struct SymbolBinding {
    pub symbol: String,
    pub venues: Vec<Venue>,
}

const DEFAULT_GATEWAY_ID: &str = "gateway";
const DEFAULT_HEALTH_CHECK_MS: u64 = 5000;
const DEFAULT_RECONNECT_MAX_RETRIES: u32 = 10;
const DEFAULT_METRICS_PORT: u16 = 9090;

/// Longest accepted symbol; bound by the wire format's 1-byte
/// length-prefixed field.
const MAX_SYMBOL_CHARS: usize = 20;

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Config, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// The parsing core, with the environment injected so tests
    /// do not mutate process state.
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
        let gateway_id =
            get("GATEWAY_ID").unwrap_or_else(|| DEFAULT_GATEWAY_ID.to_string());
        if gateway_id.is_empty() {
            return Err(ConfigError::Invalid {
                var: "GATEWAY_ID",
                reason: "must not be empty".to_string(),
            });
        }

        let exchanges = parse_exchanges(&require(&get, "EXCHANGES")?)?;
        let symbols = parse_symbols(&require(&get, "SYMBOLS")?)?;

        let aeron_dir = match get("AERON_DIR") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => PathBuf::from(format!("/dev/shm/trading-gateway-{gateway_id}")),
        };

        Ok(Config {
            gateway_id,
            exchanges,
            symbols,
            aeron_dir,
            health_check_ms: parse_number(&get, "HEALTH_CHECK_MS", DEFAULT_HEALTH_CHECK_MS)?,
            reconnect_max_retries: parse_number(
                &get,
                "RECONNECT_MAX_RETRIES",
                DEFAULT_RECONNECT_MAX_RETRIES,
            )?,
            metrics_port: parse_number(&get, "METRICS_PORT", DEFAULT_METRICS_PORT)?,
        })
    }

    /// The canonical symbols bound to a venue, in declaration
    /// order.
    pub fn symbols_for(&self, venue: Venue) -> Vec<String> {
        self.symbols
            .iter()
            .filter(|binding| binding.venues.contains(&venue))
            .map(|binding| binding.symbol.clone())
            .collect()
    }
}

fn require(get: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<String, ConfigError> {
    match get(var) {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Invalid { var, reason: "missing".to_string() }),
    }
}

fn parse_number<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(var) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| {
            ConfigError::Invalid { var, reason: format!("`{raw}` is not a valid number") }
        }),
        _ => Ok(default),
    }
}

/// `venue:enabled:t1,t2,…` entries joined by `;`.
fn parse_exchanges(raw: &str) -> Result<Vec<ExchangeConfig>, ConfigError> {
    const VAR: &str = "EXCHANGES";
    let mut exchanges: Vec<ExchangeConfig> = Vec::new();

    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let mut parts = entry.splitn(3, ':');
        let (Some(name), Some(enabled), Some(types)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ConfigError::Invalid {
                var: VAR,
                reason: format!("`{entry}` is not venue:enabled:types"),
            });
        };

        let venue = Venue::from_name(name).ok_or_else(|| ConfigError::UnknownVenue {
            var: VAR,
            name: name.to_string(),
        })?;
        if exchanges.iter().any(|e| e.venue == venue) {
            return Err(ConfigError::Invalid {
                var: VAR,
                reason: format!("venue `{name}` listed twice"),
            });
        }

        let enabled = match enabled {
            "true" => true,
            "false" => false,
            other => {
                return Err(ConfigError::Invalid {
                    var: VAR,
                    reason: format!("`{other}` is not true/false"),
                });
            }
        };

        let mut data_types = Vec::new();
        for t in types.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let dt = DataType::from_config_name(t).ok_or_else(|| {
                ConfigError::UnknownDataType { var: VAR, name: t.to_string() }
            })?;
            if !data_types.contains(&dt) {
                data_types.push(dt);
            }
        }
        if enabled && data_types.is_empty() {
            return Err(ConfigError::Invalid {
                var: VAR,
                reason: format!("venue `{name}` enabled with no data types"),
            });
        }

        exchanges.push(ExchangeConfig { venue, enabled, data_types });
    }

    if exchanges.is_empty() {
        return Err(ConfigError::Invalid { var: VAR, reason: "no venues configured".to_string() });
    }
    Ok(exchanges)
}

/// `SYMBOL:v1,v2,…` entries joined by `;`. Symbols are stored
/// uppercase and must fit the wire format's length prefix.
fn parse_symbols(raw: &str) -> Result<Vec<SymbolBinding>, ConfigError> {
    const VAR: &str = "SYMBOLS";
    let mut bindings: Vec<SymbolBinding> = Vec::new();

    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (symbol, venues) = entry.split_once(':').ok_or_else(|| ConfigError::Invalid {
            var: VAR,
            reason: format!("`{entry}` is not SYMBOL:venues"),
        })?;

        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() || symbol.len() > MAX_SYMBOL_CHARS {
            return Err(ConfigError::Invalid {
                var: VAR,
                reason: format!("symbol `{symbol}` must be 1..={MAX_SYMBOL_CHARS} chars"),
            });
        }
        if bindings.iter().any(|b| b.symbol == symbol) {
            return Err(ConfigError::Invalid {
                var: VAR,
                reason: format!("symbol `{symbol}` listed twice"),
            });
        }

        let mut bound = Vec::new();
        for name in venues.split(',').map(str::trim).filter(|v| !v.is_empty()) {
            let venue = Venue::from_name(name).ok_or_else(|| ConfigError::UnknownVenue {
                var: VAR,
                name: name.to_string(),
            })?;
            if !bound.contains(&venue) {
                bound.push(venue);
            }
        }
        if bound.is_empty() {
            return Err(ConfigError::Invalid {
                var: VAR,
                reason: format!("symbol `{symbol}` bound to no venues"),
            });
        }

        bindings.push(SymbolBinding { symbol, venues: bound });
    }

    if bindings.is_empty() {
        return Err(ConfigError::Invalid { var: VAR, reason: "no symbols configured".to_string() });
    }
    Ok(bindings)
}
