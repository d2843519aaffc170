use tokio::sync::Mutex;

/// Wallet/session context shared by the widget pieces that need to know
/// whether an account is attached. Explicitly constructed and passed by
/// reference, with a lifecycle tied to widget attach/detach; never a
/// process-wide global.
#[derive(Debug, Default)]
pub struct WalletSession {
    inner: Mutex<SessionState>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub account: Option<String>,
    pub connected: bool,
}

impl WalletSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attach(&self, account: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.account = Some(account.into());
        inner.connected = true;
    }

    /// Drops the account. Callers abandoning an in-progress flow combine
    /// this with `SwapFlowController::reset`; persisted orders are not
    /// affected.
    pub async fn detach(&self) {
        let mut inner = self.inner.lock().await;
        inner.account = None;
        inner.connected = false;
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected
    }

    pub async fn account(&self) -> Option<String> {
        self.inner.lock().await.account.clone()
    }

    pub async fn snapshot(&self) -> SessionState {
        self.inner.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attach_detach_lifecycle() {
        let session = WalletSession::new();
        assert!(!session.is_connected().await);

        session.attach("kaspa:qq0example").await;
        assert!(session.is_connected().await);
        assert_eq!(session.account().await.as_deref(), Some("kaspa:qq0example"));

        session.detach().await;
        assert!(!session.is_connected().await);
        assert_eq!(session.account().await, None);
    }
}
