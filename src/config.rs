use crate::domain::{KeyFormat, TronAddress};
use std::collections::HashMap;
use thiserror::Error;

const DEFAULT_EVENTS_BASE_URL: &str = "https://nile.trongrid.io";
/// Scale ceiling of the decimal arithmetic backend.
const MAX_DECIMALS: u32 = 28;
const DEFAULT_PRICE_SCALE: &str = "1000000";
const DEFAULT_TOKEN_DECIMALS: &str = "6";
const DEFAULT_PAGE_LIMIT: &str = "200";

/// Startup configuration, read once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// The trade contract whose events feed the ledger.
    pub contract: TronAddress,
    pub database_path: String,
    pub events_base_url: String,
    pub api_key: Option<String>,
    /// Divisor applied to chain-native price integers.
    pub price_scale: u64,
    /// Fallback decimal count for tokens without an override.
    pub token_decimals_default: u32,
    /// Per-token decimal overrides, keyed by canonical hex.
    pub token_decimals: HashMap<String, u32>,
    /// Rendering used for persisted token keys.
    pub key_format: KeyFormat,
    /// Events per fetched page.
    pub page_limit: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let contract_raw = env_map
            .get("CONTRACT_ADDRESS")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("CONTRACT_ADDRESS".to_string()))?;
        let contract = TronAddress::parse(&contract_raw).map_err(|e| {
            ConfigError::InvalidValue("CONTRACT_ADDRESS".to_string(), e.to_string())
        })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let events_base_url = env_map
            .get("EVENTS_BASE_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_EVENTS_BASE_URL.to_string());

        let api_key = env_map
            .get("TRON_API_KEY")
            .cloned()
            .filter(|s| !s.is_empty());

        let price_scale = env_map
            .get("PRICE_SCALE")
            .map(|s| s.as_str())
            .unwrap_or(DEFAULT_PRICE_SCALE)
            .parse::<u64>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "PRICE_SCALE".to_string(),
                    "must be a positive integer".to_string(),
                )
            })?;

        let token_decimals_default = env_map
            .get("TOKEN_DECIMALS_DEFAULT")
            .map(|s| s.as_str())
            .unwrap_or(DEFAULT_TOKEN_DECIMALS)
            .parse::<u32>()
            .ok()
            .filter(|v| *v <= MAX_DECIMALS)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "TOKEN_DECIMALS_DEFAULT".to_string(),
                    format!("must be an integer between 0 and {}", MAX_DECIMALS),
                )
            })?;

        let token_decimals = match env_map.get("TOKEN_DECIMALS_MAP") {
            Some(json) => parse_decimals_map(json)?,
            None => HashMap::new(),
        };

        let key_format = match env_map
            .get("TOKEN_KEY_FORMAT")
            .map(|s| s.as_str())
            .unwrap_or("hex")
        {
            "hex" => KeyFormat::Hex,
            "base58" => KeyFormat::Base58,
            other => {
                return Err(ConfigError::InvalidValue(
                    "TOKEN_KEY_FORMAT".to_string(),
                    format!("must be hex or base58, got {}", other),
                ))
            }
        };

        let page_limit = env_map
            .get("PAGE_LIMIT")
            .map(|s| s.as_str())
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .parse::<u32>()
            .ok()
            .filter(|v| (1..=200).contains(v))
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "PAGE_LIMIT".to_string(),
                    "must be an integer between 1 and 200".to_string(),
                )
            })?;

        Ok(Config {
            contract,
            database_path,
            events_base_url,
            api_key,
            price_scale,
            token_decimals_default,
            token_decimals,
            key_format,
            page_limit,
        })
    }
}

/// Parse the per-token decimals override map. Keys may arrive in either
/// address encoding; lookups happen by canonical hex.
fn parse_decimals_map(json: &str) -> Result<HashMap<String, u32>, ConfigError> {
    let raw: HashMap<String, u32> = serde_json::from_str(json).map_err(|e| {
        ConfigError::InvalidValue("TOKEN_DECIMALS_MAP".to_string(), e.to_string())
    })?;

    let mut canonical = HashMap::with_capacity(raw.len());
    for (addr, decimals) in raw {
        let token = TronAddress::parse(&addr).map_err(|e| {
            ConfigError::InvalidValue(
                "TOKEN_DECIMALS_MAP".to_string(),
                format!("bad token address {:?}: {}", addr, e),
            )
        })?;
        if decimals > MAX_DECIMALS {
            return Err(ConfigError::InvalidValue(
                "TOKEN_DECIMALS_MAP".to_string(),
                format!("decimals for {} exceed {}", addr, MAX_DECIMALS),
            ));
        }
        canonical.insert(token.to_hex(), decimals);
    }
    Ok(canonical)
}
