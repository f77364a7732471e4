//! Extension points invoked at fixed stages of the protocol flow.
//!
//! One listener object implements [`WsFederationEvents`]; every method has a
//! no-op default so callers override only the stages they care about. Each
//! method receives a [`Notification`] it may mutate, and may set its
//! [`HookOutcome`] to change what the handler does next.

use async_trait::async_trait;

use super::{
    callback::{AuthenticationTicket, CallbackOutcome},
    error::ProtocolFailure,
    message::WsFederationMessage,
    state::RelayState,
};

/// What the handler does after a hook returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HookOutcome {
    /// Carry on with default processing.
    #[default]
    Continue,
    /// Stop processing this request and let the next handler in the
    /// pipeline see it.
    Skip,
    /// The hook produced the response itself; stop processing.
    HandleResponse,
}

/// Mutable context passed to a hook.
#[derive(Debug, Clone)]
pub struct Notification<T> {
    /// Protocol message of the current stage.
    pub message: WsFederationMessage,
    /// Stage-specific data the hook may replace or annotate.
    pub payload: T,
    outcome: HookOutcome,
}

impl<T> Notification<T> {
    pub fn new(message: WsFederationMessage, payload: T) -> Self {
        Self {
            message,
            payload,
            outcome: HookOutcome::Continue,
        }
    }

    /// Signal that the hook has produced the response.
    pub fn handle_response(&mut self) {
        self.outcome = HookOutcome::HandleResponse;
    }

    /// Signal that this handler should step aside for the request.
    pub fn skip_to_next(&mut self) {
        self.outcome = HookOutcome::Skip;
    }

    pub fn outcome(&self) -> HookOutcome {
        self.outcome
    }

    pub fn into_parts(self) -> (WsFederationMessage, T, HookOutcome) {
        (self.message, self.payload, self.outcome)
    }
}

/// Listener for the protocol stages.
///
/// For a single callback the handler calls these in order
/// `message_received`, `security_token_received`, `security_token_validated`,
/// each at most once. `authentication_failed` runs at most once, for any
/// failure not already handled by a hook.
#[async_trait]
pub trait WsFederationEvents: Send + Sync {
    /// Before a sign-in or sign-out redirect is issued. Check
    /// `message.wa()` to tell them apart. Changes to the relay state payload
    /// are encoded into `wctx` after this returns.
    async fn redirect_to_identity_provider(&self, _notification: &mut Notification<RelayState>) {}

    /// The callback POST was parsed as a sign-in response.
    async fn message_received(&self, _notification: &mut Notification<()>) {}

    /// The security token was extracted from `wresult`. The hook may replace
    /// it before validation.
    async fn security_token_received(&self, _notification: &mut Notification<String>) {}

    /// The token was validated and the ticket built.
    async fn security_token_validated(
        &self,
        _notification: &mut Notification<AuthenticationTicket>,
    ) {
    }

    /// The flow failed.
    async fn authentication_failed(&self, _notification: &mut Notification<ProtocolFailure>) {}
}

/// Listener that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEvents;

impl WsFederationEvents for DefaultEvents {}

/// Receives the final result of every callback the handler engaged with.
///
/// This is where an embedding application establishes its session.
#[async_trait]
pub trait AuthenticationResultSink: Send + Sync {
    async fn on_authentication_result(&self, outcome: &CallbackOutcome);
}
