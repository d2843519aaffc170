use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, warn};

use shared::{
    domain::{PriceQuote, SwapResult, SwapStep, Token},
    error::FlowError,
    protocol::{MessageButtons, MessageData, PendingOrder},
};
use storage::OrderStore;

pub mod backend;
pub mod config;
mod flow;
pub mod reconcile;
pub mod session;

pub use backend::{BackendTokenService, MissingWalletBridge, WalletBridge};
pub use config::{load_settings, Settings};
pub use flow::{FlowSnapshot, SwapFlowState};
pub use reconcile::OrderReconciliationEngine;
pub use session::WalletSession;

/// Quoting/order backend consumed by the core. Everything the flow needs
/// from the outside world goes through this seam so tests and partially
/// wired widgets can substitute it.
#[async_trait]
pub trait TokenService: Send + Sync {
    async fn get_tokens(&self) -> Result<Vec<Token>>;
    async fn is_token_available(&self, symbol: &str) -> Result<bool>;
    async fn get_price_quote(
        &self,
        from_token: &str,
        to_token: &str,
        amount: f64,
    ) -> Result<PriceQuote>;
    async fn execute_swap(
        &self,
        from_token: &str,
        to_token: &str,
        amount: f64,
    ) -> Result<SwapResult>;
    async fn execute_buy(&self, to_token: &str, amount: f64) -> Result<SwapResult>;
    async fn check_order_status(&self, order_id: &str) -> Result<String>;
}

/// Null collaborator: a widget wired without a real backend degrades to
/// error messages instead of panicking.
pub struct MissingTokenService;

#[async_trait]
impl TokenService for MissingTokenService {
    async fn get_tokens(&self) -> Result<Vec<Token>> {
        Err(anyhow!("token service unavailable"))
    }

    async fn is_token_available(&self, symbol: &str) -> Result<bool> {
        Err(anyhow!("token service unavailable for symbol {symbol}"))
    }

    async fn get_price_quote(
        &self,
        from_token: &str,
        to_token: &str,
        _amount: f64,
    ) -> Result<PriceQuote> {
        Err(anyhow!(
            "token service unavailable for quote {from_token}->{to_token}"
        ))
    }

    async fn execute_swap(
        &self,
        from_token: &str,
        to_token: &str,
        _amount: f64,
    ) -> Result<SwapResult> {
        Err(anyhow!(
            "token service unavailable for swap {from_token}->{to_token}"
        ))
    }

    async fn execute_buy(&self, to_token: &str, _amount: f64) -> Result<SwapResult> {
        Err(anyhow!("token service unavailable for buy {to_token}"))
    }

    async fn check_order_status(&self, order_id: &str) -> Result<String> {
        Err(anyhow!("token service unavailable for order {order_id}"))
    }
}

/// Event stream consumed by the presentation layer. Both variants carry a
/// ready-to-render bot message; `Error` lets the renderer style failures
/// differently.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Message(MessageData),
    Error(MessageData),
}

/// Drives one conversational swap/buy flow: command parsing, token and
/// amount validation, quote retrieval, confirmation and submission. Owns
/// the `SwapFlowState` exclusively; emits `ChatEvent`s for the renderer and
/// registers a `PendingOrder` on successful submission.
pub struct SwapFlowController {
    service: Arc<dyn TokenService>,
    store: OrderStore,
    session: Arc<WalletSession>,
    base_currency: String,
    explorer_tx_url: String,
    state: Mutex<SwapFlowState>,
    events: broadcast::Sender<ChatEvent>,
}

impl SwapFlowController {
    pub fn new(
        service: Arc<dyn TokenService>,
        store: OrderStore,
        session: Arc<WalletSession>,
        settings: &Settings,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            service,
            store,
            session,
            base_currency: settings.base_currency.clone(),
            explorer_tx_url: settings.explorer_tx_url.clone(),
            state: Mutex::new(SwapFlowState::new()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Shared sender so the reconciliation engine feeds the same stream.
    pub fn event_sender(&self) -> broadcast::Sender<ChatEvent> {
        self.events.clone()
    }

    pub async fn flow_snapshot(&self) -> FlowSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Abandons any in-progress flow, e.g. on wallet disconnect. Persisted
    /// orders are untouched.
    pub async fn reset(&self) {
        self.state.lock().await.reset();
    }

    pub async fn handle_command(&self, command: &str) {
        let entry_generation = self.generation().await;
        if let Err(err) = self.dispatch_command(command).await {
            self.handle_flow_error(err, entry_generation).await;
        }
    }

    pub async fn handle_action(&self, action: &str, value: &str) {
        let entry_generation = self.generation().await;
        let result = match action {
            "select-token" => self.handle_token_selection(value).await,
            "confirm" => self.handle_confirmation().await,
            "cancel" => {
                self.handle_cancel().await;
                Ok(())
            }
            other => Err(FlowError::invalid_state(format!("Unknown action: {other}"))),
        };
        if let Err(err) = result {
            self.handle_flow_error(err, entry_generation).await;
        }
    }

    pub async fn handle_amount(&self, amount: f64) {
        let entry_generation = self.generation().await;
        if let Err(err) = self.process_amount(amount).await {
            self.handle_flow_error(err, entry_generation).await;
        }
    }

    async fn dispatch_command(&self, command: &str) -> Result<(), FlowError> {
        let mut parts = command.trim().split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("/swap"), None) => self.begin_swap().await,
            (Some("/buy"), None) => self.begin_buy_selection().await,
            (Some("/buy"), Some(symbol)) => self.begin_buy_inline(symbol).await,
            _ => {
                self.emit_message(MessageData::bot(
                    "Unknown command. Available commands: /swap, /buy [TOKEN]",
                ));
                Ok(())
            }
        }
    }

    async fn begin_swap(&self) -> Result<(), FlowError> {
        let generation = self.generation().await;
        let tokens = self.list_tokens().await?;

        if !self.advance(generation, |state| state.set_step(SwapStep::FromToken)).await {
            return Ok(());
        }

        self.emit_message(MessageData::bot_with_buttons(
            token_selection_prompt(SwapStep::FromToken),
            MessageButtons::TokenSelect { tokens },
        ));
        Ok(())
    }

    async fn begin_buy_selection(&self) -> Result<(), FlowError> {
        let generation = self.generation().await;
        let tokens: Vec<Token> = self
            .list_tokens()
            .await?
            .into_iter()
            .filter(|t| t.symbol != self.base_currency)
            .collect();

        if !self.advance(generation, |state| state.set_step(SwapStep::BuyToken)).await {
            return Ok(());
        }

        self.emit_message(MessageData::bot_with_buttons(
            token_selection_prompt(SwapStep::BuyToken),
            MessageButtons::TokenSelect { tokens },
        ));
        Ok(())
    }

    /// `/buy TOKEN`: the inline symbol is validated before any transition;
    /// failures re-emit an error and leave the flow back at `None`.
    async fn begin_buy_inline(&self, symbol: &str) -> Result<(), FlowError> {
        let generation = self.generation().await;
        let token = symbol.to_uppercase();
        let tokens = self.list_tokens().await?;

        if !tokens.iter().any(|t| t.symbol == token) {
            let available: Vec<&str> = tokens.iter().map(|t| t.symbol.as_str()).collect();
            self.emit_message(MessageData::bot(format!(
                "Token {token} not found. Available tokens: {}",
                available.join(", ")
            )));
            self.reset_from(generation).await;
            return Ok(());
        }

        if token == self.base_currency {
            self.emit_message(MessageData::bot(format!(
                "Cannot buy {token} token directly",
            )));
            self.reset_from(generation).await;
            return Ok(());
        }

        if !self
            .advance(generation, |state| {
                state.set_to_token(token.clone());
                state.set_step(SwapStep::BuyAmount);
            })
            .await
        {
            return Ok(());
        }

        self.emit_message(MessageData::bot(format!(
            "Selected {token} to buy.\nPlease enter the amount of {} you want to spend:",
            self.base_currency
        )));
        Ok(())
    }

    async fn handle_token_selection(&self, value: &str) -> Result<(), FlowError> {
        let token = value.trim().to_uppercase();
        let (step, from_token, generation) = {
            let state = self.state.lock().await;
            (
                state.step(),
                state.from_token().map(str::to_string),
                state.generation(),
            )
        };

        match step {
            SwapStep::FromToken => {
                let tokens = self.list_tokens().await?;
                ensure_known_token(&tokens, &token)?;

                let remaining: Vec<Token> = tokens
                    .into_iter()
                    .filter(|t| t.symbol != token)
                    .collect();

                if !self
                    .advance(generation, |state| {
                        state.set_from_token(token.clone());
                        state.set_step(SwapStep::ToToken);
                    })
                    .await
                {
                    return Ok(());
                }

                self.emit_message(MessageData::bot_with_buttons(
                    format!(
                        "Selected {token} to swap from.\n{}",
                        token_selection_prompt(SwapStep::ToToken)
                    ),
                    MessageButtons::TokenSelect { tokens: remaining },
                ));
                Ok(())
            }
            SwapStep::ToToken => {
                let from_token = from_token
                    .ok_or_else(|| FlowError::invalid_state("missing source token"))?;
                if token == from_token {
                    return Err(FlowError::validation(format!(
                        "Cannot swap {token} for itself. Pick a different token.",
                    )));
                }
                let tokens = self.list_tokens().await?;
                ensure_known_token(&tokens, &token)?;

                if !self
                    .advance(generation, |state| {
                        state.set_to_token(token.clone());
                        state.set_step(SwapStep::Amount);
                    })
                    .await
                {
                    return Ok(());
                }

                self.emit_message(MessageData::bot(format!(
                    "Selected {token} to swap to.\nPlease enter the amount of {from_token} you want to spend:",
                )));
                Ok(())
            }
            SwapStep::BuyToken => {
                if token == self.base_currency {
                    return Err(FlowError::validation(format!(
                        "Cannot buy {token} token directly",
                    )));
                }
                let tokens = self.list_tokens().await?;
                ensure_known_token(&tokens, &token)?;

                if !self
                    .advance(generation, |state| {
                        state.set_to_token(token.clone());
                        state.set_step(SwapStep::BuyAmount);
                    })
                    .await
                {
                    return Ok(());
                }

                self.emit_message(MessageData::bot(format!(
                    "Selected {token} to buy.\nPlease enter the amount of {} you want to spend:",
                    self.base_currency
                )));
                Ok(())
            }
            _ => Err(FlowError::invalid_state("Invalid state for token selection")),
        }
    }

    async fn process_amount(&self, amount: f64) -> Result<(), FlowError> {
        let (step, from_token, to_token, generation) = {
            let state = self.state.lock().await;
            (
                state.step(),
                state.from_token().map(str::to_string),
                state.to_token().map(str::to_string),
                state.generation(),
            )
        };

        if !step.is_amount_entry() {
            return Err(FlowError::invalid_state("Invalid state for amount input"));
        }

        if !amount.is_finite() || amount <= 0.0 {
            return Err(FlowError::validation(
                "Please enter a valid positive number.",
            ));
        }

        let from_token = match step {
            SwapStep::Amount => from_token
                .ok_or_else(|| FlowError::invalid_state("missing source token"))?,
            _ => self.base_currency.clone(),
        };
        let to_token =
            to_token.ok_or_else(|| FlowError::invalid_state("missing target token"))?;

        let quote = self
            .service
            .get_price_quote(&from_token, &to_token, amount)
            .await
            .map_err(|err| FlowError::service(format!("Failed to get quote: {err}")))?;

        let next_step = if step == SwapStep::Amount {
            SwapStep::Confirm
        } else {
            SwapStep::BuyConfirm
        };
        if !self
            .advance(generation, |state| {
                state.set_amount(amount);
                state.set_quote(quote.clone());
                state.set_step(next_step);
            })
            .await
        {
            return Ok(());
        }

        self.emit_message(self.quote_summary_message(&from_token, &to_token, amount, &quote));
        Ok(())
    }

    /// One-shot terminal action for the flow instance: submits the trade and
    /// resets whatever the outcome.
    async fn handle_confirmation(&self) -> Result<(), FlowError> {
        let snapshot = self.flow_snapshot().await;
        let generation = self.generation().await;

        if !snapshot.step.is_confirmation() {
            return Err(FlowError::invalid_state("Invalid state for confirmation"));
        }

        if !self.session.is_connected().await {
            return Err(FlowError::service("No wallet connected"));
        }

        let to_token = snapshot
            .to_token
            .ok_or_else(|| FlowError::invalid_state("missing target token"))?;
        let amount = snapshot
            .amount
            .ok_or_else(|| FlowError::invalid_state("missing amount"))?;
        let from_token = snapshot
            .from_token
            .unwrap_or_else(|| self.base_currency.clone());

        let result = match snapshot.step {
            SwapStep::Confirm => {
                self.service
                    .execute_swap(&from_token, &to_token, amount)
                    .await
            }
            _ => self.service.execute_buy(&to_token, amount).await,
        }
        .map_err(|err| FlowError::service(err.to_string()))?;

        let order_id = match result.order_id.clone() {
            Some(order_id) if result.success => order_id,
            _ => {
                return Err(FlowError::service(
                    result
                        .error
                        .unwrap_or_else(|| "Transaction failed".to_string()),
                ));
            }
        };

        let order = PendingOrder {
            tx_hash: result.tx_hash.clone(),
            from_token,
            to_token,
            amount,
            to_amount: snapshot.quote.map(|q| q.to_amount).unwrap_or_default(),
            status: "submitted".to_string(),
            order_id,
            last_checked: Utc::now().timestamp_millis(),
            last_announced: None,
        };
        self.store.put_order(&order).await.map_err(|err| {
            FlowError::new(
                shared::error::ErrorCode::Storage,
                format!("failed to record submitted order: {err}"),
            )
        })?;

        self.emit_message(self.order_confirmation_message(&order));
        self.reset_from(generation).await;
        Ok(())
    }

    async fn handle_cancel(&self) {
        self.reset().await;
        self.emit_message(MessageData::bot("Transaction cancelled."));
    }

    async fn handle_flow_error(&self, err: FlowError, entry_generation: u64) {
        if err.is_input_rejection() {
            self.emit_message(MessageData::bot(err.message));
            return;
        }

        error!(code = ?err.code, "swap flow error: {}", err.message);
        self.emit_error(MessageData::bot(format!("Error: {}", err.message)));
        self.reset_from(entry_generation).await;
    }

    async fn list_tokens(&self) -> Result<Vec<Token>, FlowError> {
        self.service
            .get_tokens()
            .await
            .map_err(|err| FlowError::service(format!("Failed to load tokens: {err}")))
    }

    async fn generation(&self) -> u64 {
        self.state.lock().await.generation()
    }

    /// Applies `mutate` only when the flow has not been reset since
    /// `generation` was observed; a stale service response must never touch
    /// a newer flow instance. Returns whether the mutation was applied.
    async fn advance(&self, generation: u64, mutate: impl FnOnce(&mut SwapFlowState)) -> bool {
        let mut state = self.state.lock().await;
        if state.generation() != generation {
            warn!("discarding stale flow transition after reset");
            return false;
        }
        mutate(&mut state);
        true
    }

    async fn reset_from(&self, generation: u64) -> bool {
        let mut state = self.state.lock().await;
        if state.generation() != generation {
            return false;
        }
        state.reset();
        true
    }

    fn emit_message(&self, message: MessageData) {
        let _ = self.events.send(ChatEvent::Message(message));
    }

    fn emit_error(&self, message: MessageData) {
        let _ = self.events.send(ChatEvent::Error(message));
    }

    fn quote_summary_message(
        &self,
        from_token: &str,
        to_token: &str,
        amount: f64,
        quote: &PriceQuote,
    ) -> MessageData {
        let from_amount = quote.from_amount.parse::<f64>().unwrap_or(amount);
        let rate = if from_amount > 0.0 {
            quote.to_amount / from_amount
        } else {
            0.0
        };
        let min_received = minimum_received(quote);

        let text = format!(
            r#"<div class="quote-summary">
  <div class="quote-title">💱 Swap Summary</div>
  <div class="quote-details">
    <div class="quote-row">
      <span class="label">From:</span>
      <span class="value">💰 {from_amount} {from_token}</span>
    </div>
    <div class="quote-row">
      <span class="label">To:</span>
      <span class="value">🎯 {to_amount} {to_token}</span>
    </div>
    <div class="quote-row">
      <span class="value">📊 1 {from_token} = {rate:.6} {to_token}</span>
    </div>
    <div class="quote-row">
      <span class="label">Price Impact:</span>
      <span class="value">📉 {price_impact}%</span>
    </div>
    <div class="quote-row fee">
      <span class="label">Min Received:</span>
      <span class="value">🔒 {min_received:.4} {to_token}</span>
    </div>
    <div class="quote-row fee">
      <span class="label">Service Fee:</span>
      <span class="value">🏷️ {fee:.4} {to_token}</span>
    </div>
  </div>
  <div class="quote-confirm">Ready to complete this swap? 🚀</div>
</div>"#,
            from_amount = quote.from_amount,
            to_amount = quote.to_amount,
            price_impact = quote.price_impact,
            fee = quote.fee,
        );

        MessageData::bot_with_buttons(text, MessageButtons::Confirm)
    }

    fn order_confirmation_message(&self, order: &PendingOrder) -> MessageData {
        let tx_link = transaction_link(&self.explorer_tx_url, &order.tx_hash);
        let text = format!(
            r#"<div class="order-confirmation">
  <div class="confirmation-header">
    <span class="icon">✅</span>
    <span class="title">Order Submitted Successfully</span>
  </div>
  <div class="confirmation-details">
    <div class="detail-row">
      <span class="label">Order ID:</span>
      <span class="value">{order_id}</span>
    </div>
    <div class="detail-group">
      <div class="group-title">Swap Details</div>
      <div class="detail-row">
        <span class="label">From:</span>
        <span class="value">{amount} {from_token}</span>
      </div>
      <div class="detail-row">
        <span class="label">To:</span>
        <span class="value">{to_amount} {to_token}</span>
      </div>
    </div>
    <div class="status-message">
      <span class="icon">🔄</span>
      <span>Your order is being processed by the DEX</span>
    </div>
    <div class="notification-message">
      <span class="icon">🔔</span>
      <span>You'll be notified when the order completes</span>
    </div>
  </div>
  <div class="transaction-link">
    {tx_link}
  </div>
</div>"#,
            order_id = order.order_id,
            amount = order.amount,
            from_token = order.from_token,
            to_amount = order.to_amount,
            to_token = order.to_token,
        );

        MessageData::bot(text)
    }
}

fn token_selection_prompt(step: SwapStep) -> &'static str {
    match step {
        SwapStep::FromToken => "🔍 Select or type the token you want to swap from:",
        SwapStep::ToToken => "🎯 Select or type the token you want to swap to:",
        SwapStep::BuyToken => "💎 Select or type the token you want to buy:",
        _ => "🔍 Select a token:",
    }
}

fn ensure_known_token(tokens: &[Token], symbol: &str) -> Result<(), FlowError> {
    if tokens.iter().any(|t| t.symbol == symbol) {
        return Ok(());
    }
    let available: Vec<&str> = tokens.iter().map(|t| t.symbol.as_str()).collect();
    Err(FlowError::validation(format!(
        "Token {symbol} not found. Available tokens: {}",
        available.join(", ")
    )))
}

/// Worst-case amount the user still receives after slippage, in human
/// units. Display-layer arithmetic only; the backend quote stays
/// authoritative.
pub fn minimum_received(quote: &PriceQuote) -> f64 {
    let slippage = quote.slippage.parse::<f64>().unwrap_or(0.0);
    quote.to_amount * (1.0 - slippage / 100.0) / 10f64.powi(quote.chain_decimal as i32)
}

pub(crate) fn transaction_link(explorer_base: &str, tx_hash: &str) -> String {
    format!(
        "🔎 <a href=\"{}/{tx_hash}\">View Transaction</a>",
        explorer_base.trim_end_matches('/')
    )
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod reconcile_tests;

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod backend_tests;
