use std::collections::HashMap;

use serde::Deserialize;

/// Runtime settings for the widget core. Values layer as defaults, then an
/// optional `swapchat.toml` next to the process, then environment overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub backend_url: String,
    pub network_id: String,
    pub base_currency: String,
    pub explorer_tx_url: String,
    pub priority_fee: f64,
    pub order_poll_interval_secs: u64,
    pub database_url: String,
    /// Deposit address per spendable token; the generic token entry is the
    /// fallback for symbols without their own address.
    pub minter_addresses: HashMap<String, String>,
}

pub const GENERIC_MINTER_KEY: &str = "KRC20";

impl Default for Settings {
    fn default() -> Self {
        let mut minter_addresses = HashMap::new();
        minter_addresses.insert(
            "KAS".to_string(),
            "kaspa:qpgmt2dn8wcqf0436n0kueap7yx82n7raurlj6aqjc3t3wm9y5ssqtg9e4lsm".to_string(),
        );
        minter_addresses.insert(
            GENERIC_MINTER_KEY.to_string(),
            "kaspa:qz9cqmddjppjyth8rngevfs767m5nvm0480nlgs5ve8d6aegv4g9xzu2tgg0u".to_string(),
        );

        Self {
            backend_url: "https://api.safunet.com/v1/Prophet".into(),
            network_id: "mainnet".into(),
            base_currency: "KAS".into(),
            explorer_tx_url: "https://kas.fyi/transaction".into(),
            priority_fee: 0.00002,
            order_poll_interval_secs: 10,
            database_url: "sqlite://./data/orders.db".into(),
            minter_addresses,
        }
    }
}

impl Settings {
    pub fn minter_address_for(&self, symbol: &str) -> Option<&str> {
        self.minter_addresses
            .get(symbol)
            .or_else(|| self.minter_addresses.get(GENERIC_MINTER_KEY))
            .map(String::as_str)
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = std::fs::read_to_string("swapchat.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("backend_url") {
                settings.backend_url = v.clone();
            }
            if let Some(v) = file_cfg.get("network_id") {
                settings.network_id = v.clone();
            }
            if let Some(v) = file_cfg.get("base_currency") {
                settings.base_currency = v.clone();
            }
            if let Some(v) = file_cfg.get("explorer_tx_url") {
                settings.explorer_tx_url = v.clone();
            }
            if let Some(v) = file_cfg.get("database_url") {
                settings.database_url = v.clone();
            }
            if let Some(v) = file_cfg.get("order_poll_interval_secs") {
                if let Ok(parsed) = v.parse::<u64>() {
                    settings.order_poll_interval_secs = parsed;
                }
            }
        }
    }

    if let Ok(v) = std::env::var("SWAP__BACKEND_URL") {
        settings.backend_url = v;
    }
    if let Ok(v) = std::env::var("SWAP__NETWORK_ID") {
        settings.network_id = v;
    }
    if let Ok(v) = std::env::var("SWAP__BASE_CURRENCY") {
        settings.base_currency = v;
    }
    if let Ok(v) = std::env::var("SWAP__EXPLORER_TX_URL") {
        settings.explorer_tx_url = v;
    }
    if let Ok(v) = std::env::var("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("SWAP__DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("SWAP__ORDER_POLL_INTERVAL_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.order_poll_interval_secs = parsed;
        }
    }

    settings.database_url = normalize_database_url(&settings.database_url);
    settings
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}
