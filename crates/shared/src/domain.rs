use serde::{Deserialize, Serialize};

/// Position inside one swap/buy conversation. `None` is both the initial
/// value and the state after any reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SwapStep {
    #[default]
    None,
    FromToken,
    ToToken,
    Amount,
    Confirm,
    BuyToken,
    BuyAmount,
    BuyConfirm,
}

impl SwapStep {
    pub fn is_amount_entry(self) -> bool {
        matches!(self, SwapStep::Amount | SwapStep::BuyAmount)
    }

    pub fn is_confirmation(self) -> bool {
        matches!(self, SwapStep::Confirm | SwapStep::BuyConfirm)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub symbol: String,
    pub balance: String,
    pub decimals: u32,
}

/// Backend-computed projection for a candidate trade. Field names follow the
/// quoting backend's JSON vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub from_amount: String,
    pub to_amount: f64,
    pub exchange_rate: f64,
    pub fee: f64,
    pub slippage: String,
    pub chain_decimal: u32,
    pub price_impact: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapResult {
    pub success: bool,
    pub tx_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SwapResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            tx_hash: String::new(),
            order_id: None,
            error: Some(error.into()),
        }
    }
}

/// Status the backend reports while it cannot yet classify an order.
/// Never triggers user notifications.
pub const UNKNOWN_STATUS: &str = "unknown";

/// A terminal order status expects no further transitions.
pub fn is_terminal_status(status: &str) -> bool {
    matches!(status, "completed" | "failed" | "refunded")
}
