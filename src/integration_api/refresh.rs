//! Access token refresh scheduling
//!
//! The refresher keeps [`AccessTokenState`] valid for as long as the
//! integration runs. Each cycle moves through an explicit state machine:
//!
//! ```text
//! Scheduled ──timer──▶ Exchanging ──ok──▶ Scheduled
//!                           │
//!                           └─err──▶ Retrying ──timer──▶ Exchanging
//!                                       │
//!                                       └─retries exhausted──▶ Failed
//! ```
//!
//! A new timer is armed only after the previous exchange has finished, so at
//! most one exchange is ever in flight and token writes never race.

use crate::integration_api::client::{AccessToken, AccessTokenState};
use crate::integration_api::oauth::{OAuthCredentials, TokenExchanger};
use crate::integration_api::types::ApiError;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Callback receiving a description of each failed refresh
pub type ErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Holds at most one [`ErrorHandler`]; setting a new one replaces the old
///
/// Owned by a single integration and handed to its refresher at start, so
/// handlers registered after start still receive failures.
#[derive(Clone, Default)]
pub struct ErrorHandlerSlot {
    inner: Arc<RwLock<Option<ErrorHandler>>>,
}

impl fmt::Debug for ErrorHandlerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandlerSlot")
            .field("registered", &self.is_set())
            .finish()
    }
}

impl ErrorHandlerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler`, replacing any previous one
    pub fn set<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let mut slot = match self.inner.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(Arc::new(handler));
    }

    /// Remove the registered handler
    pub fn clear(&self) {
        if let Ok(mut slot) = self.inner.write() {
            *slot = None;
        }
    }

    pub fn is_set(&self) -> bool {
        self.inner.read().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Deliver `message` to the registered handler
    ///
    /// The failure is always logged. Returns whether a handler received it.
    /// A panicking handler is logged and otherwise ignored, so it cannot take
    /// the refresh loop down with it.
    pub fn report(&self, message: &str) -> bool {
        tracing::error!("{}", message);

        // Clone out of the lock so a handler may re-register itself
        let handler = match self.inner.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        match handler {
            Some(handler) => {
                if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                    tracing::error!("Error handler panicked while handling: {}", message);
                }
                true
            }
            None => {
                tracing::debug!("No error handler registered; refresh failure only logged");
                false
            }
        }
    }
}

/// Timing policy for access token refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Safety margin subtracted from the token lifetime
    pub lead_time: Duration,
    /// Shortest delay ever scheduled after a successful exchange
    pub min_delay: Duration,
    /// Delay before the first retry after a failure
    pub initial_backoff: Duration,
    /// Cap for the doubling retry delay
    pub max_backoff: Duration,
    /// Retries allowed after a failure before the refresher gives up.
    /// `None` retries forever, `Some(0)` stops on the first failure.
    pub max_retries: Option<u32>,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            lead_time: Duration::from_secs(15 * 60),
            min_delay: Duration::from_secs(30),
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(15 * 60),
            max_retries: None,
        }
    }
}

impl RefreshPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set lead time (builder pattern)
    pub fn with_lead_time(mut self, lead_time: Duration) -> Self {
        self.lead_time = lead_time;
        self
    }

    /// Set minimum delay (builder pattern). Zero is raised to one second.
    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay.max(Duration::from_secs(1));
        self
    }

    /// Set retry backoff bounds (builder pattern)
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial.max(Duration::from_secs(1));
        self.max_backoff = max.max(self.initial_backoff);
        self
    }

    /// Set retry limit (builder pattern)
    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay until the next refresh for a token living `expires_in_secs`
    ///
    /// `expires_in - lead_time`, clamped to at least `min_delay` so a short
    /// lived token cannot cause a refresh storm.
    pub fn next_delay(&self, expires_in_secs: u64) -> Duration {
        Duration::from_secs(expires_in_secs)
            .saturating_sub(self.lead_time)
            .max(self.min_delay)
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    fn retries_exhausted(&self, failures: u32) -> bool {
        self.max_retries.is_some_and(|max| failures > max)
    }
}

/// Where the refresher currently is in its cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshState {
    /// Waiting `delay` before the next exchange
    Scheduled { delay: Duration },
    /// Exchange in flight
    Exchanging,
    /// Waiting `delay` before retry number `attempt`
    Retrying { attempt: u32, delay: Duration },
    /// Gave up after exhausting retries
    Failed { reason: String },
    /// Stopped by the owner
    Stopped,
}

/// Exchanges credentials on a timer and publishes each new access token
pub struct TokenRefresher {
    credentials: OAuthCredentials,
    exchanger: Arc<dyn TokenExchanger>,
    token: AccessTokenState,
    errors: ErrorHandlerSlot,
    policy: RefreshPolicy,
}

impl fmt::Debug for TokenRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRefresher")
            .field("credentials", &self.credentials)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl TokenRefresher {
    pub fn new(
        credentials: OAuthCredentials,
        exchanger: Arc<dyn TokenExchanger>,
        token: AccessTokenState,
        errors: ErrorHandlerSlot,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            credentials,
            exchanger,
            token,
            errors,
            policy,
        }
    }

    /// Run one exchange and publish the new token
    ///
    /// On success the token is visible to every reader of the shared state
    /// before this returns, and the delay until the next refresh is returned.
    /// On failure the current token is left untouched.
    pub async fn refresh_once(&self) -> Result<Duration, ApiError> {
        let response = self.exchanger.exchange(&self.credentials).await?;

        self.token
            .update(AccessToken::new(response.access_token, response.expires_in));

        let delay = self.policy.next_delay(response.expires_in);
        tracing::info!(
            "Access token refreshed; next refresh in {} minutes",
            delay.as_secs() / 60
        );
        Ok(delay)
    }

    /// Spawn the refresh loop for a token that lives `initial_expires_in` seconds
    ///
    /// The loop runs until retries are exhausted or the returned handle is
    /// stopped. Dropping the handle does not stop it.
    pub fn start(self, initial_expires_in: u64) -> RefreshHandle {
        let delay = self.policy.next_delay(initial_expires_in);
        tracing::info!(
            "Token will be refreshed in {} minutes",
            delay.as_secs() / 60
        );

        let (state_tx, state_rx) = watch::channel(RefreshState::Scheduled { delay });
        let state_tx = Arc::new(state_tx);
        let task = tokio::spawn(self.run(delay, Arc::clone(&state_tx)));

        RefreshHandle {
            task,
            state_tx,
            state_rx,
        }
    }

    async fn run(self, first_delay: Duration, state: Arc<watch::Sender<RefreshState>>) {
        let mut delay = first_delay;
        let mut failures = 0u32;

        loop {
            tokio::time::sleep(delay).await;

            state.send_replace(RefreshState::Exchanging);
            match self.refresh_once().await {
                Ok(next) => {
                    failures = 0;
                    delay = next;
                    state.send_replace(RefreshState::Scheduled { delay });
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let message = format!("Not able to refresh token. {}", e);
                    self.errors.report(&message);

                    if self.policy.retries_exhausted(failures) {
                        tracing::error!(
                            "Giving up on token refresh after {} consecutive failures",
                            failures
                        );
                        state.send_replace(RefreshState::Failed { reason: message });
                        return;
                    }

                    delay = self.policy.backoff(failures);
                    tracing::warn!(
                        "Retrying token refresh in {}s (attempt {})",
                        delay.as_secs(),
                        failures
                    );
                    state.send_replace(RefreshState::Retrying {
                        attempt: failures,
                        delay,
                    });
                }
            }
        }
    }
}

/// Handle to a running refresh loop
#[derive(Debug)]
pub struct RefreshHandle {
    task: JoinHandle<()>,
    state_tx: Arc<watch::Sender<RefreshState>>,
    state_rx: watch::Receiver<RefreshState>,
}

impl RefreshHandle {
    /// Current state of the refresh loop
    pub fn state(&self) -> RefreshState {
        self.state_rx.borrow().clone()
    }

    /// Receiver notified on every state transition
    pub fn subscribe(&self) -> watch::Receiver<RefreshState> {
        self.state_rx.clone()
    }

    /// Whether the loop has ended (gave up or was stopped)
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the refresh loop
    ///
    /// A loop that already gave up keeps reporting `Failed`.
    pub fn stop(&self) {
        self.task.abort();
        self.state_tx.send_if_modified(|state| match state {
            RefreshState::Failed { .. } | RefreshState::Stopped => false,
            _ => {
                *state = RefreshState::Stopped;
                true
            }
        });
        tracing::info!("Token refresh stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_next_delay_subtracts_lead_time() {
        let policy = RefreshPolicy::new().with_lead_time(Duration::from_secs(900));
        assert_eq!(policy.next_delay(3600), Duration::from_secs(2700));
    }

    #[test]
    fn test_next_delay_clamps_short_lifetimes() {
        let policy = RefreshPolicy::new()
            .with_lead_time(Duration::from_secs(900))
            .with_min_delay(Duration::from_secs(30));

        assert_eq!(policy.next_delay(300), Duration::from_secs(30));
        assert_eq!(policy.next_delay(900), Duration::from_secs(30));
        assert_eq!(policy.next_delay(0), Duration::from_secs(30));
        assert!(policy.next_delay(300) > Duration::ZERO);
    }

    #[test]
    fn test_min_delay_is_never_zero() {
        let policy = RefreshPolicy::new().with_min_delay(Duration::ZERO);
        assert_eq!(policy.next_delay(0), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RefreshPolicy::new()
            .with_backoff(Duration::from_secs(30), Duration::from_secs(300));

        assert_eq!(policy.backoff(1), Duration::from_secs(30));
        assert_eq!(policy.backoff(2), Duration::from_secs(60));
        assert_eq!(policy.backoff(3), Duration::from_secs(120));
        assert_eq!(policy.backoff(4), Duration::from_secs(240));
        assert_eq!(policy.backoff(5), Duration::from_secs(300));
        assert_eq!(policy.backoff(100), Duration::from_secs(300));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_retries_exhausted() {
        let unlimited = RefreshPolicy::new();
        assert!(!unlimited.retries_exhausted(u32::MAX));

        let stop_on_first = RefreshPolicy::new().with_max_retries(Some(0));
        assert!(stop_on_first.retries_exhausted(1));

        let two_retries = RefreshPolicy::new().with_max_retries(Some(2));
        assert!(!two_retries.retries_exhausted(2));
        assert!(two_retries.retries_exhausted(3));
    }

    #[test]
    fn test_error_handler_slot_replaces_handler() {
        let slot = ErrorHandlerSlot::new();
        assert!(!slot.report("dropped"));

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        slot.set(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(slot.report("one"));

        let counter = Arc::clone(&second);
        slot.set(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(slot.report("two"));

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        slot.clear();
        assert!(!slot.is_set());
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let slot = ErrorHandlerSlot::new();
        slot.set(|message| panic!("handler blew up on {}", message));

        assert!(slot.report("refresh failed"));
        assert!(slot.is_set());
    }
}
