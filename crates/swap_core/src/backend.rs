use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use shared::domain::{PriceQuote, SwapResult, Token};

use crate::{config::Settings, session::WalletSession, TokenService};

const AVAILABILITY_REFRESH: Duration = Duration::from_secs(5 * 60);
const SOMPI_PER_UNIT: f64 = 100_000_000.0;

/// Browser-wallet boundary. Account discovery, balance fetching and signing
/// live behind this seam; the core only needs transfers and message
/// signatures.
#[async_trait]
pub trait WalletBridge: Send + Sync {
    /// Sends base-currency funds to `address`, returning the transaction id.
    async fn send_base_currency(
        &self,
        address: &str,
        amount_sompi: u64,
        priority_fee: f64,
    ) -> Result<String>;
    /// Transfers `amount_sompi` of a non-native token to `address`,
    /// returning the reveal transaction id.
    async fn transfer_token(
        &self,
        symbol: &str,
        amount_sompi: u64,
        address: &str,
        priority_fee: f64,
    ) -> Result<String>;
    async fn sign_message(&self, message: &str) -> Result<String>;
    async fn public_key(&self) -> Result<String>;
}

pub struct MissingWalletBridge;

#[async_trait]
impl WalletBridge for MissingWalletBridge {
    async fn send_base_currency(
        &self,
        _address: &str,
        _amount_sompi: u64,
        _priority_fee: f64,
    ) -> Result<String> {
        Err(anyhow!("wallet bridge unavailable"))
    }

    async fn transfer_token(
        &self,
        symbol: &str,
        _amount_sompi: u64,
        _address: &str,
        _priority_fee: f64,
    ) -> Result<String> {
        Err(anyhow!("wallet bridge unavailable for token {symbol}"))
    }

    async fn sign_message(&self, _message: &str) -> Result<String> {
        Err(anyhow!("wallet bridge unavailable for signing"))
    }

    async fn public_key(&self) -> Result<String> {
        Err(anyhow!("wallet bridge unavailable for public key"))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteRequest<'a> {
    from_token: &'a str,
    to_token: &'a str,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    quote: QuoteBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteBody {
    out_amount: f64,
    service_fee: f64,
    slippage: String,
    chain_decimal: u32,
    price_impact: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderStatusRequest<'a> {
    order_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct OrderStatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct AssetsResponse {
    assets: Vec<AssetEntry>,
}

#[derive(Debug, Deserialize)]
struct AssetEntry {
    symbol: String,
    decimals: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrepareOrderRequest<'a> {
    transaction_hash: &'a str,
    from_token: &'a str,
    to_token: &'a str,
    amount: String,
    from_address: &'a str,
    public_key: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrepareOrderResponse {
    status: String,
    #[serde(default)]
    message_hash: Option<String>,
    #[serde(default)]
    order_params: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitOrderRequest<'a> {
    order_params: serde_json::Value,
    from_address: &'a str,
    public_key: &'a str,
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitOrderResponse {
    order_id: String,
}

struct CachedAvailability {
    symbols: HashSet<String>,
    fetched_at: Instant,
}

/// `TokenService` backed by the remote quoting/order backend, with trade
/// submission composed from a wallet transfer plus the backend's
/// prepare/sign/submit order handshake.
pub struct BackendTokenService {
    http: Client,
    backend_url: String,
    session: Arc<WalletSession>,
    wallet: Arc<dyn WalletBridge>,
    base_currency: String,
    priority_fee: f64,
    minter_addresses: HashMap<String, String>,
    availability: tokio::sync::Mutex<Option<CachedAvailability>>,
}

impl BackendTokenService {
    pub fn new(
        settings: &Settings,
        session: Arc<WalletSession>,
        wallet: Arc<dyn WalletBridge>,
    ) -> Result<Self> {
        let url = Url::parse(&settings.backend_url)
            .with_context(|| format!("invalid backend url '{}'", settings.backend_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("backend url must be http(s): '{}'", settings.backend_url);
        }

        Ok(Self {
            http: Client::new(),
            backend_url: settings.backend_url.trim_end_matches('/').to_string(),
            session,
            wallet,
            base_currency: settings.base_currency.clone(),
            priority_fee: settings.priority_fee,
            minter_addresses: settings.minter_addresses.clone(),
            availability: tokio::sync::Mutex::new(None),
        })
    }

    fn minter_address_for(&self, symbol: &str) -> Option<&str> {
        self.minter_addresses
            .get(symbol)
            .or_else(|| self.minter_addresses.get(crate::config::GENERIC_MINTER_KEY))
            .map(String::as_str)
    }

    async fn fetch_assets(&self) -> Result<Vec<AssetEntry>> {
        let response: AssetsResponse = self
            .http
            .get(format!(
                "{}/assets/{}",
                self.backend_url, self.base_currency
            ))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.assets)
    }

    async fn available_symbols(&self) -> Result<HashSet<String>> {
        let mut guard = self.availability.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.fetched_at.elapsed() < AVAILABILITY_REFRESH {
                return Ok(cached.symbols.clone());
            }
        }

        let symbols: HashSet<String> = self
            .fetch_assets()
            .await?
            .into_iter()
            .map(|asset| asset.symbol.to_uppercase())
            .collect();
        *guard = Some(CachedAvailability {
            symbols: symbols.clone(),
            fetched_at: Instant::now(),
        });
        Ok(symbols)
    }

    /// Registers a confirmed wallet transfer with the backend:
    /// prepare-order, sign the returned message hash, submit the signed
    /// order. Returns the backend order id.
    async fn register_order(
        &self,
        tx_hash: &str,
        from_token: &str,
        to_token: &str,
        amount: f64,
        from_address: &str,
    ) -> Result<String> {
        let public_key = self
            .wallet
            .public_key()
            .await
            .context("cannot get public key")?;

        let prepared: PrepareOrderResponse = self
            .http
            .post(format!("{}/prepare-order", self.backend_url))
            .json(&PrepareOrderRequest {
                transaction_hash: tx_hash,
                from_token,
                to_token,
                amount: amount.to_string(),
                from_address,
                public_key: &public_key,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if prepared.status != "prepared" {
            bail!(prepared
                .error
                .unwrap_or_else(|| "Order preparation failed".to_string()));
        }
        let message_hash = prepared
            .message_hash
            .ok_or_else(|| anyhow!("prepare-order response missing message hash"))?;
        let order_params = prepared
            .order_params
            .ok_or_else(|| anyhow!("prepare-order response missing order params"))?;

        let signature = self
            .wallet
            .sign_message(&message_hash)
            .await
            .context("failed to sign order")?;

        let submitted: SubmitOrderResponse = self
            .http
            .post(format!("{}/submit-order", self.backend_url))
            .json(&SubmitOrderRequest {
                order_params,
                from_address,
                public_key: &public_key,
                signature,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(submitted.order_id)
    }
}

fn to_sompi(amount: f64) -> u64 {
    (amount * SOMPI_PER_UNIT).floor() as u64
}

#[async_trait]
impl TokenService for BackendTokenService {
    async fn get_tokens(&self) -> Result<Vec<Token>> {
        let assets = self.fetch_assets().await?;
        let mut tokens = vec![Token {
            symbol: self.base_currency.clone(),
            balance: "0".to_string(),
            decimals: 8,
        }];
        for asset in assets {
            if asset.symbol != self.base_currency {
                tokens.push(Token {
                    symbol: asset.symbol,
                    balance: "0".to_string(),
                    decimals: asset.decimals,
                });
            }
        }
        Ok(tokens)
    }

    async fn is_token_available(&self, symbol: &str) -> Result<bool> {
        let symbol = symbol.to_uppercase();
        if symbol == self.base_currency {
            return Ok(true);
        }
        Ok(self.available_symbols().await?.contains(&symbol))
    }

    async fn get_price_quote(
        &self,
        from_token: &str,
        to_token: &str,
        amount: f64,
    ) -> Result<PriceQuote> {
        let response: QuoteResponse = self
            .http
            .post(format!("{}/quote", self.backend_url))
            .json(&QuoteRequest {
                from_token,
                to_token,
                amount: amount.to_string(),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("failed to decode quote response")?;

        let scale = 10f64.powi(response.quote.chain_decimal as i32);
        let to_amount = response.quote.out_amount / scale;
        Ok(PriceQuote {
            from_amount: amount.to_string(),
            to_amount,
            exchange_rate: if amount > 0.0 { to_amount / amount } else { 0.0 },
            fee: response.quote.service_fee / scale,
            slippage: response.quote.slippage,
            chain_decimal: response.quote.chain_decimal,
            price_impact: response.quote.price_impact,
        })
    }

    async fn execute_swap(
        &self,
        from_token: &str,
        to_token: &str,
        amount: f64,
    ) -> Result<SwapResult> {
        let Some(account) = self.session.account().await else {
            return Ok(SwapResult::failure("No account connected"));
        };

        let Some(minter) = self.minter_address_for(from_token).map(str::to_string) else {
            return Ok(SwapResult::failure(format!(
                "no deposit address configured for {from_token}"
            )));
        };

        let sompi = to_sompi(amount);
        let transfer = if from_token.eq_ignore_ascii_case(&self.base_currency) {
            self.wallet
                .send_base_currency(&minter, sompi, self.priority_fee)
                .await
        } else {
            self.wallet
                .transfer_token(from_token, sompi, &minter, self.priority_fee)
                .await
        };

        let tx_hash = match transfer {
            Ok(tx_hash) => tx_hash,
            Err(err) => {
                warn!("wallet transfer rejected for {from_token}->{to_token}: {err:#}");
                return Ok(SwapResult::failure(format!("wallet transfer failed: {err}")));
            }
        };

        match self
            .register_order(&tx_hash, from_token, to_token, amount, &account)
            .await
        {
            Ok(order_id) => Ok(SwapResult {
                success: true,
                tx_hash,
                order_id: Some(order_id),
                error: None,
            }),
            Err(err) => {
                warn!("order registration failed for tx {tx_hash}: {err:#}");
                Ok(SwapResult::failure(err.to_string()))
            }
        }
    }

    async fn execute_buy(&self, to_token: &str, amount: f64) -> Result<SwapResult> {
        let base = self.base_currency.clone();
        self.execute_swap(&base, to_token, amount).await
    }

    async fn check_order_status(&self, order_id: &str) -> Result<String> {
        let response: OrderStatusResponse = self
            .http
            .post(format!("{}/order-status", self.backend_url))
            .json(&OrderStatusRequest { order_id })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.status)
    }
}
