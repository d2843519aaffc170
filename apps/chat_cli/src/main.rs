use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use storage::OrderStore;
use swap_core::{
    load_settings, BackendTokenService, ChatEvent, MissingWalletBridge,
    OrderReconciliationEngine, SwapFlowController, TokenService, WalletSession,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

/// Terminal driver for the swap chat core: prints the bot event stream and
/// feeds stdin lines into the controller. Presentation glue only.
#[derive(Parser, Debug)]
struct Args {
    /// Override the quoting/order backend URL.
    #[arg(long)]
    backend_url: Option<String>,
    /// Wallet account to attach for this session.
    #[arg(long)]
    account: Option<String>,
    /// Token suggested as a one-tap buy after startup.
    #[arg(long, default_value = "NACHO")]
    quick_buy: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(url) = args.backend_url {
        settings.backend_url = url;
    }

    let store = OrderStore::new(&settings.database_url).await?;
    let session = Arc::new(WalletSession::new());
    if let Some(account) = args.account {
        session.attach(account).await;
    }

    let service: Arc<dyn TokenService> = Arc::new(BackendTokenService::new(
        &settings,
        Arc::clone(&session),
        Arc::new(MissingWalletBridge),
    )?);

    let controller = SwapFlowController::new(
        Arc::clone(&service),
        store.clone(),
        Arc::clone(&session),
        &settings,
    );
    let engine = OrderReconciliationEngine::new(
        store,
        Arc::clone(&service),
        controller.event_sender(),
        &settings,
    );
    let _poller = engine.spawn();

    let mut events = controller.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ChatEvent::Message(message)) => println!("bot> {}", message.text),
                Ok(ChatEvent::Error(message)) => eprintln!("bot!> {}", message.text),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    match service.is_token_available(&args.quick_buy).await {
        Ok(true) => println!("tip> /buy {} is available right now", args.quick_buy),
        Ok(false) => {}
        Err(err) => warn!("could not check quick-buy availability: {err:#}"),
    }

    println!("Commands: /swap, /buy [TOKEN] | select <TOKEN>, confirm, cancel | plain numbers are amounts. Ctrl-D quits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let step = controller.flow_snapshot().await.step;
        if step.is_amount_entry() {
            controller
                .handle_amount(input.parse::<f64>().unwrap_or(f64::NAN))
                .await;
        } else if let Some(symbol) = input.strip_prefix("select ") {
            controller.handle_action("select-token", symbol).await;
        } else if input == "confirm" || input == "cancel" {
            controller.handle_action(input, "").await;
        } else {
            controller.handle_command(input).await;
        }
    }

    Ok(())
}
