use super::*;
use shared::protocol::order_key;
use tokio::sync::Notify;

struct TestTokenService {
    tokens: Vec<Token>,
    quote: PriceQuote,
    swap_result: SwapResult,
    fail_with: Option<String>,
    quote_gate: Option<Arc<Notify>>,
    executed_swaps: Mutex<Vec<(String, String, f64)>>,
    executed_buys: Mutex<Vec<(String, f64)>>,
}

impl TestTokenService {
    fn ok() -> Self {
        Self {
            tokens: vec![
                token("KAS", "1000.00"),
                token("PINTL", "500.00"),
                token("NACHO", "750.00"),
            ],
            quote: sample_quote(),
            swap_result: SwapResult {
                success: true,
                tx_hash: "h1".to_string(),
                order_id: Some("o1".to_string()),
                error: None,
            },
            fail_with: None,
            quote_gate: None,
            executed_swaps: Mutex::new(Vec::new()),
            executed_buys: Mutex::new(Vec::new()),
        }
    }

    fn failing(err: impl Into<String>) -> Self {
        let mut service = Self::ok();
        service.fail_with = Some(err.into());
        service
    }

    fn with_swap_result(mut self, result: SwapResult) -> Self {
        self.swap_result = result;
        self
    }

    fn with_quote_gate(mut self, gate: Arc<Notify>) -> Self {
        self.quote_gate = Some(gate);
        self
    }

    fn check_failure(&self) -> Result<()> {
        if let Some(err) = &self.fail_with {
            return Err(anyhow!(err.clone()));
        }
        Ok(())
    }
}

fn token(symbol: &str, balance: &str) -> Token {
    Token {
        symbol: symbol.to_string(),
        balance: balance.to_string(),
        decimals: 8,
    }
}

fn sample_quote() -> PriceQuote {
    PriceQuote {
        from_amount: "10".to_string(),
        to_amount: 100.0,
        exchange_rate: 10.0,
        fee: 0.5,
        slippage: "1".to_string(),
        chain_decimal: 8,
        price_impact: 0.2,
    }
}

#[async_trait]
impl TokenService for TestTokenService {
    async fn get_tokens(&self) -> Result<Vec<Token>> {
        self.check_failure()?;
        Ok(self.tokens.clone())
    }

    async fn is_token_available(&self, symbol: &str) -> Result<bool> {
        self.check_failure()?;
        Ok(self.tokens.iter().any(|t| t.symbol == symbol))
    }

    async fn get_price_quote(
        &self,
        _from_token: &str,
        _to_token: &str,
        _amount: f64,
    ) -> Result<PriceQuote> {
        self.check_failure()?;
        if let Some(gate) = &self.quote_gate {
            gate.notified().await;
        }
        Ok(self.quote.clone())
    }

    async fn execute_swap(
        &self,
        from_token: &str,
        to_token: &str,
        amount: f64,
    ) -> Result<SwapResult> {
        self.check_failure()?;
        self.executed_swaps
            .lock()
            .await
            .push((from_token.to_string(), to_token.to_string(), amount));
        Ok(self.swap_result.clone())
    }

    async fn execute_buy(&self, to_token: &str, amount: f64) -> Result<SwapResult> {
        self.check_failure()?;
        self.executed_buys
            .lock()
            .await
            .push((to_token.to_string(), amount));
        Ok(self.swap_result.clone())
    }

    async fn check_order_status(&self, _order_id: &str) -> Result<String> {
        self.check_failure()?;
        Ok("submitted".to_string())
    }
}

async fn setup(
    service: Arc<TestTokenService>,
) -> (
    Arc<SwapFlowController>,
    OrderStore,
    Arc<WalletSession>,
    broadcast::Receiver<ChatEvent>,
) {
    let store = OrderStore::new("sqlite::memory:").await.expect("db");
    let session = Arc::new(WalletSession::new());
    session.attach("kaspa:qqtest-account").await;
    let controller = SwapFlowController::new(
        service,
        store.clone(),
        Arc::clone(&session),
        &Settings::default(),
    );
    let events = controller.subscribe_events();
    (controller, store, session, events)
}

fn drain(rx: &mut broadcast::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn texts(events: &[ChatEvent]) -> Vec<String> {
    events
        .iter()
        .map(|event| match event {
            ChatEvent::Message(message) | ChatEvent::Error(message) => message.text.clone(),
        })
        .collect()
}

fn last_token_buttons(events: &[ChatEvent]) -> Option<Vec<String>> {
    events.iter().rev().find_map(|event| match event {
        ChatEvent::Message(message) => match &message.buttons {
            Some(MessageButtons::TokenSelect { tokens }) => {
                Some(tokens.iter().map(|t| t.symbol.clone()).collect())
            }
            _ => None,
        },
        _ => None,
    })
}

async fn walk_to_amount_step(controller: &SwapFlowController) {
    controller.handle_command("/swap").await;
    controller.handle_action("select-token", "PINTL").await;
    controller.handle_action("select-token", "NACHO").await;
}

#[tokio::test]
async fn swap_command_offers_every_token() {
    let service = Arc::new(TestTokenService::ok());
    let (controller, _store, _session, mut rx) = setup(service).await;

    controller.handle_command("/swap").await;

    let events = drain(&mut rx);
    assert_eq!(
        last_token_buttons(&events),
        Some(vec![
            "KAS".to_string(),
            "PINTL".to_string(),
            "NACHO".to_string()
        ])
    );
    assert_eq!(controller.flow_snapshot().await.step, SwapStep::FromToken);
}

#[tokio::test]
async fn from_token_selection_excludes_the_chosen_token() {
    let service = Arc::new(TestTokenService::ok());
    let (controller, _store, _session, mut rx) = setup(service).await;

    controller.handle_command("/swap").await;
    controller.handle_action("select-token", "PINTL").await;

    let events = drain(&mut rx);
    let offered = last_token_buttons(&events).expect("to-token list");
    assert!(!offered.contains(&"PINTL".to_string()));
    assert!(offered.contains(&"KAS".to_string()));
    assert!(offered.contains(&"NACHO".to_string()));

    let snapshot = controller.flow_snapshot().await;
    assert_eq!(snapshot.step, SwapStep::ToToken);
    assert_eq!(snapshot.from_token.as_deref(), Some("PINTL"));
}

#[tokio::test]
async fn buying_the_base_currency_is_rejected_without_executing() {
    let service = Arc::new(TestTokenService::ok());
    let (controller, _store, _session, mut rx) = setup(Arc::clone(&service)).await;

    controller.handle_command("/buy KAS").await;

    let events = drain(&mut rx);
    assert!(texts(&events)
        .iter()
        .any(|t| t.contains("Cannot buy KAS token directly")));
    assert_eq!(controller.flow_snapshot().await.step, SwapStep::None);
    assert!(service.executed_swaps.lock().await.is_empty());
    assert!(service.executed_buys.lock().await.is_empty());
}

#[tokio::test]
async fn buying_an_unknown_token_lists_alternatives_and_resets() {
    let service = Arc::new(TestTokenService::ok());
    let (controller, _store, _session, mut rx) = setup(service).await;

    controller.handle_command("/buy DOGE").await;

    let events = drain(&mut rx);
    assert!(texts(&events)
        .iter()
        .any(|t| t.contains("Token DOGE not found") && t.contains("KAS, PINTL, NACHO")));
    assert_eq!(controller.flow_snapshot().await.step, SwapStep::None);
}

#[tokio::test]
async fn buy_selection_list_excludes_the_base_currency() {
    let service = Arc::new(TestTokenService::ok());
    let (controller, _store, _session, mut rx) = setup(service).await;

    controller.handle_command("/buy").await;

    let events = drain(&mut rx);
    assert_eq!(
        last_token_buttons(&events),
        Some(vec!["PINTL".to_string(), "NACHO".to_string()])
    );
    assert_eq!(controller.flow_snapshot().await.step, SwapStep::BuyToken);
}

#[tokio::test]
async fn invalid_amounts_are_rejected_without_moving_the_flow() {
    let service = Arc::new(TestTokenService::ok());
    let (controller, _store, _session, mut rx) = setup(service).await;

    walk_to_amount_step(&controller).await;
    drain(&mut rx);

    controller.handle_amount(-5.0).await;
    controller.handle_amount(f64::NAN).await;

    let events = drain(&mut rx);
    let texts = texts(&events);
    assert_eq!(texts.len(), 2);
    assert!(texts
        .iter()
        .all(|t| t.contains("Please enter a valid positive number.")));

    let snapshot = controller.flow_snapshot().await;
    assert_eq!(snapshot.step, SwapStep::Amount);
    assert_eq!(snapshot.amount, None);
    assert_eq!(snapshot.quote, None);
}

#[tokio::test]
async fn amount_outside_amount_steps_is_a_state_error() {
    let service = Arc::new(TestTokenService::ok());
    let (controller, _store, _session, mut rx) = setup(service).await;

    controller.handle_amount(5.0).await;

    let events = drain(&mut rx);
    assert!(matches!(events.as_slice(), [ChatEvent::Error(_)]));
    let snapshot = controller.flow_snapshot().await;
    assert_eq!(snapshot.step, SwapStep::None);
    assert_eq!(snapshot.quote, None);
}

#[tokio::test]
async fn valid_amount_stores_quote_and_advances_to_confirm() {
    let service = Arc::new(TestTokenService::ok());
    let (controller, _store, _session, mut rx) = setup(service).await;

    walk_to_amount_step(&controller).await;
    controller.handle_amount(10.0).await;

    let events = drain(&mut rx);
    let summary = events
        .iter()
        .rev()
        .find_map(|event| match event {
            ChatEvent::Message(message) => Some(message.clone()),
            _ => None,
        })
        .expect("quote summary");
    assert!(summary.text.contains("Swap Summary"));
    assert_eq!(summary.buttons, Some(MessageButtons::Confirm));

    let snapshot = controller.flow_snapshot().await;
    assert_eq!(snapshot.step, SwapStep::Confirm);
    assert_eq!(snapshot.amount, Some(10.0));
    assert_eq!(snapshot.quote, Some(sample_quote()));
}

#[test]
fn minimum_received_applies_slippage_and_chain_decimals() {
    let quote = sample_quote();
    let expected = 100.0 * 0.99 / 1e8;
    assert!((minimum_received(&quote) - expected).abs() < 1e-15);
}

#[tokio::test]
async fn confirmation_persists_the_order_and_resets_the_flow() {
    let service = Arc::new(TestTokenService::ok());
    let (controller, store, _session, mut rx) = setup(Arc::clone(&service)).await;

    walk_to_amount_step(&controller).await;
    controller.handle_amount(10.0).await;
    drain(&mut rx);

    controller.handle_action("confirm", "").await;

    let events = drain(&mut rx);
    let confirmation = texts(&events).join("\n");
    assert!(confirmation.contains("Order Submitted Successfully"));
    assert!(confirmation.contains("o1"));
    assert!(confirmation.contains("https://kas.fyi/transaction/h1"));

    assert_eq!(
        *service.executed_swaps.lock().await,
        vec![("PINTL".to_string(), "NACHO".to_string(), 10.0)]
    );

    let order = store
        .load_order(&order_key("h1"))
        .await
        .expect("load")
        .expect("order persisted");
    assert_eq!(order.status, "submitted");
    assert_eq!(order.order_id, "o1");
    assert_eq!(order.from_token, "PINTL");
    assert_eq!(order.to_token, "NACHO");
    assert_eq!(order.amount, 10.0);
    assert_eq!(order.to_amount, sample_quote().to_amount);

    let snapshot = controller.flow_snapshot().await;
    assert_eq!(snapshot.step, SwapStep::None);
    assert_eq!(snapshot.quote, None);
}

#[tokio::test]
async fn buy_flow_spends_the_base_currency() {
    let service = Arc::new(TestTokenService::ok());
    let (controller, store, _session, mut rx) = setup(Arc::clone(&service)).await;

    controller.handle_command("/buy").await;
    controller.handle_action("select-token", "NACHO").await;
    assert_eq!(controller.flow_snapshot().await.step, SwapStep::BuyAmount);

    controller.handle_amount(4.0).await;
    assert_eq!(controller.flow_snapshot().await.step, SwapStep::BuyConfirm);

    controller.handle_action("confirm", "").await;
    drain(&mut rx);

    assert_eq!(
        *service.executed_buys.lock().await,
        vec![("NACHO".to_string(), 4.0)]
    );
    assert!(service.executed_swaps.lock().await.is_empty());

    let order = store
        .load_order(&order_key("h1"))
        .await
        .expect("load")
        .expect("order persisted");
    assert_eq!(order.from_token, "KAS");
    assert_eq!(order.to_token, "NACHO");
}

#[tokio::test]
async fn failed_execution_reports_the_backend_error_and_resets() {
    let service = Arc::new(
        TestTokenService::ok()
            .with_swap_result(SwapResult::failure("insufficient funds for swap")),
    );
    let (controller, store, _session, mut rx) = setup(service).await;

    walk_to_amount_step(&controller).await;
    controller.handle_amount(10.0).await;
    drain(&mut rx);

    controller.handle_action("confirm", "").await;

    let events = drain(&mut rx);
    assert!(matches!(events.as_slice(), [ChatEvent::Error(_)]));
    assert!(texts(&events)[0].contains("Error: insufficient funds for swap"));
    assert_eq!(controller.flow_snapshot().await.step, SwapStep::None);
    assert!(store.list_order_keys().await.expect("keys").is_empty());
}

#[tokio::test]
async fn execution_without_an_order_id_counts_as_failure() {
    let service = Arc::new(TestTokenService::ok().with_swap_result(SwapResult {
        success: true,
        tx_hash: "h1".to_string(),
        order_id: None,
        error: None,
    }));
    let (controller, store, _session, mut rx) = setup(service).await;

    walk_to_amount_step(&controller).await;
    controller.handle_amount(10.0).await;
    drain(&mut rx);

    controller.handle_action("confirm", "").await;

    let events = drain(&mut rx);
    assert!(texts(&events)[0].contains("Error: Transaction failed"));
    assert!(store.list_order_keys().await.expect("keys").is_empty());
}

#[tokio::test]
async fn unknown_commands_leave_the_flow_untouched() {
    let service = Arc::new(TestTokenService::ok());
    let (controller, _store, _session, mut rx) = setup(service).await;

    controller.handle_command("/swap").await;
    drain(&mut rx);

    controller.handle_command("/stake KAS").await;

    let events = drain(&mut rx);
    assert!(texts(&events)[0].contains("Unknown command"));
    assert_eq!(controller.flow_snapshot().await.step, SwapStep::FromToken);
}

#[tokio::test]
async fn unknown_actions_fail_safe_by_resetting() {
    let service = Arc::new(TestTokenService::ok());
    let (controller, _store, _session, mut rx) = setup(service).await;

    controller.handle_command("/swap").await;
    drain(&mut rx);

    controller.handle_action("explode", "now").await;

    let events = drain(&mut rx);
    assert!(matches!(events.as_slice(), [ChatEvent::Error(_)]));
    assert!(texts(&events)[0].contains("Unknown action: explode"));
    assert_eq!(controller.flow_snapshot().await.step, SwapStep::None);
}

#[tokio::test]
async fn cancel_always_resets_with_a_notice() {
    let service = Arc::new(TestTokenService::ok());
    let (controller, _store, _session, mut rx) = setup(service).await;

    walk_to_amount_step(&controller).await;
    controller.handle_amount(10.0).await;
    drain(&mut rx);

    controller.handle_action("cancel", "").await;

    let events = drain(&mut rx);
    assert!(texts(&events)[0].contains("Transaction cancelled."));
    let snapshot = controller.flow_snapshot().await;
    assert_eq!(snapshot.step, SwapStep::None);
    assert_eq!(snapshot.quote, None);
    assert_eq!(snapshot.amount, None);
}

#[tokio::test]
async fn swapping_a_token_for_itself_is_rejected_in_place() {
    let service = Arc::new(TestTokenService::ok());
    let (controller, _store, _session, mut rx) = setup(service).await;

    controller.handle_command("/swap").await;
    controller.handle_action("select-token", "PINTL").await;
    drain(&mut rx);

    controller.handle_action("select-token", "PINTL").await;

    let events = drain(&mut rx);
    assert!(texts(&events)[0].contains("Cannot swap PINTL for itself"));
    let snapshot = controller.flow_snapshot().await;
    assert_eq!(snapshot.step, SwapStep::ToToken);
    assert_eq!(snapshot.to_token, None);
}

#[tokio::test]
async fn token_service_failure_resets_the_flow() {
    let service = Arc::new(TestTokenService::failing("backend offline"));
    let (controller, _store, _session, mut rx) = setup(service).await;

    controller.handle_command("/swap").await;

    let events = drain(&mut rx);
    assert!(matches!(events.as_slice(), [ChatEvent::Error(_)]));
    assert!(texts(&events)[0].contains("backend offline"));
    assert_eq!(controller.flow_snapshot().await.step, SwapStep::None);
}

#[tokio::test]
async fn confirmation_without_a_wallet_is_a_service_error() {
    let service = Arc::new(TestTokenService::ok());
    let (controller, _store, session, mut rx) = setup(service).await;

    walk_to_amount_step(&controller).await;
    controller.handle_amount(10.0).await;
    drain(&mut rx);

    session.detach().await;
    controller.handle_action("confirm", "").await;

    let events = drain(&mut rx);
    assert!(texts(&events)[0].contains("Error: No wallet connected"));
    assert_eq!(controller.flow_snapshot().await.step, SwapStep::None);
}

#[tokio::test]
async fn stale_quote_response_cannot_touch_a_newer_flow() {
    let gate = Arc::new(Notify::new());
    let service = Arc::new(TestTokenService::ok().with_quote_gate(Arc::clone(&gate)));
    let (controller, _store, _session, mut rx) = setup(service).await;

    walk_to_amount_step(&controller).await;
    drain(&mut rx);

    let in_flight = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            controller.handle_amount(10.0).await;
        })
    };

    // Let the quote fetch park on the gate, then reset the flow underneath it.
    tokio::task::yield_now().await;
    controller.reset().await;
    gate.notify_one();
    in_flight.await.expect("quote task");

    let snapshot = controller.flow_snapshot().await;
    assert_eq!(snapshot.step, SwapStep::None);
    assert_eq!(snapshot.amount, None);
    assert_eq!(snapshot.quote, None);

    let events = drain(&mut rx);
    assert!(
        texts(&events).iter().all(|t| !t.contains("Swap Summary")),
        "stale quote must not surface a summary"
    );
}
