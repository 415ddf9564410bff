//! Cancellation and per-query options.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tabflow_core::error::CancelReason;
use tokio::sync::Notify;

const LIVE: u8 = 0;
const CANCELED: u8 = 1;
const DEADLINE: u8 = 2;

#[derive(Debug, Default)]
struct TokenInner {
    state: AtomicU8,
    notify: Notify,
}

/// Cloneable cancellation flag. The first reason recorded sticks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancel_with(CancelReason::Canceled);
    }

    /// Returns false if the token was already canceled.
    pub fn cancel_with(&self, reason: CancelReason) -> bool {
        let code = match reason {
            CancelReason::Canceled => CANCELED,
            CancelReason::DeadlineExceeded => DEADLINE,
        };
        let won = self
            .inner
            .state
            .compare_exchange(LIVE, code, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.inner.notify.notify_waiters();
        }
        won
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) != LIVE
    }

    pub fn reason(&self) -> Option<CancelReason> {
        match self.inner.state.load(Ordering::Acquire) {
            CANCELED => Some(CancelReason::Canceled),
            DEADLINE => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the token is canceled.
    pub async fn canceled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_canceled() {
                return;
            }
            notified.await;
        }
    }
}

/// Caller-side options for one query.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    cancel: CancelToken,
    timeout: Option<Duration>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
