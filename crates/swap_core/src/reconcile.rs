use std::{collections::HashSet, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::warn;

use shared::{
    domain::{is_terminal_status, UNKNOWN_STATUS},
    protocol::{MessageData, PendingOrder},
};
use storage::OrderStore;

use crate::{transaction_link, ChatEvent, Settings, TokenService};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Background poller that advances every persisted pending order toward a
/// terminal status. Shares nothing with the flow controller except the
/// durable store (and the outbound event stream), so it survives process
/// restarts by rescanning storage keys.
pub struct OrderReconciliationEngine {
    store: OrderStore,
    service: Arc<dyn TokenService>,
    events: broadcast::Sender<ChatEvent>,
    explorer_tx_url: String,
    poll_interval: Duration,
    /// `(order_id, status)` pairs already surfaced in this process; entries
    /// are dropped once their order resolves. Seeded from each record's
    /// persisted `lastAnnounced` so restarts do not repeat notifications.
    announced: Mutex<HashSet<(String, String)>>,
}

impl OrderReconciliationEngine {
    pub fn new(
        store: OrderStore,
        service: Arc<dyn TokenService>,
        events: broadcast::Sender<ChatEvent>,
        settings: &Settings,
    ) -> Arc<Self> {
        let poll_interval = if settings.order_poll_interval_secs == 0 {
            DEFAULT_POLL_INTERVAL
        } else {
            Duration::from_secs(settings.order_poll_interval_secs)
        };
        Arc::new(Self {
            store,
            service,
            events,
            explorer_tx_url: settings.explorer_tx_url.clone(),
            poll_interval,
            announced: Mutex::new(HashSet::new()),
        })
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                engine.poll_once().await;
            }
        })
    }

    /// One full reconciliation pass. Failures are isolated per order so a
    /// corrupt record or a failed status query never starves the rest of
    /// the batch.
    pub async fn poll_once(&self) {
        let keys = match self.store.list_order_keys().await {
            Ok(keys) => keys,
            Err(err) => {
                warn!("order key scan failed: {err:#}");
                return;
            }
        };

        for key in keys {
            if let Err(err) = self.reconcile_order(&key).await {
                warn!("failed to reconcile order {key}: {err:#}");
            }
        }
    }

    async fn reconcile_order(&self, key: &str) -> Result<()> {
        let Some(order) = self.store.load_order(key).await? else {
            return Ok(());
        };

        if let Some(last) = &order.last_announced {
            self.announced
                .lock()
                .await
                .insert((order.order_id.clone(), last.clone()));
        }

        let status = self
            .service
            .check_order_status(&order.order_id)
            .await
            .context("order status query failed")?;
        let status = status.trim().to_string();

        if status == order.status || status == UNKNOWN_STATUS || status.is_empty() {
            return Ok(());
        }

        let first_announcement = self
            .announced
            .lock()
            .await
            .insert((order.order_id.clone(), status.clone()));
        if first_announcement {
            let _ = self.events.send(ChatEvent::Message(MessageData::bot(
                self.status_message(&order, &status),
            )));
        }

        if is_terminal_status(&status) {
            self.store.delete(key).await?;
            self.announced
                .lock()
                .await
                .retain(|(order_id, _)| order_id != &order.order_id);
        } else {
            let updated = PendingOrder {
                status: status.clone(),
                last_announced: Some(status),
                last_checked: Utc::now().timestamp_millis(),
                ..order
            };
            self.store.put_order(&updated).await?;
        }

        Ok(())
    }

    fn status_message(&self, order: &PendingOrder, status: &str) -> String {
        let tx_link = transaction_link(&self.explorer_tx_url, &order.tx_hash);
        match status {
            "pending" => format!(
                "⏳ Your transaction has been verified and is now processing with the DEX. Swapping {} {} to {}...\n\n{tx_link}",
                order.amount, order.from_token, order.to_token
            ),
            "completed" => format!(
                "✅ Your swap of {} {} to {} {} has been completed successfully!\n\n{tx_link}",
                order.amount, order.from_token, order.to_amount, order.to_token
            ),
            "failed" => format!(
                "❌ Your swap of {} {} to {} has failed. Please try again.\n\n{tx_link}",
                order.amount, order.from_token, order.to_token
            ),
            "refunded" => format!(
                "↩️ Your swap of {} {} has been refunded.\n\n{tx_link}",
                order.amount, order.from_token
            ),
            other => format!("Status: {other}"),
        }
    }
}
