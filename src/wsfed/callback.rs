//! Processing of the sign-in response the STS posts to the callback path.
//!
//! The flow advances `Received → MessageValidated → TokenExtracted →
//! TokenValidated → ClaimsTransformed → Complete`. Any step can end it with a
//! [`ProtocolFailure`]; failures not taken over by a hook are reported to
//! `authentication_failed` exactly once.

use super::{
    error::{FailureCause, FlowStage, ProtocolFailure},
    events::{HookOutcome, Notification},
    handler::{RequestContext, WsFederationHandler},
    message::WsFederationMessage,
    principal::{ClaimsIdentity, Principal},
    state::{RelayState, StateError},
    token::{TokenValidationError, ValidationContext},
};

/// An inbound HTTP request that may be a sign-in response.
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    pub method: String,
    pub request: RequestContext,
    /// Raw `application/x-www-form-urlencoded` body.
    pub body: Vec<u8>,
}

impl CallbackRequest {
    pub fn post(request: RequestContext, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: "POST".to_string(),
            request,
            body: body.into(),
        }
    }
}

/// The authenticated result handed to the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationTicket {
    pub principal: Principal,
    /// Sanitized URL to send the browser to after the session is established.
    pub return_url: String,
    pub relay_state: RelayState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The request is not a sign-in response for this handler.
    NotEngaged,
    Completed(AuthenticationTicket),
    Failed {
        failure: ProtocolFailure,
        /// A hook has already produced the response.
        handled: bool,
    },
}

impl CallbackOutcome {
    pub fn is_engaged(&self) -> bool {
        !matches!(self, CallbackOutcome::NotEngaged)
    }

    pub fn ticket(&self) -> Option<&AuthenticationTicket> {
        match self {
            CallbackOutcome::Completed(ticket) => Some(ticket),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&ProtocolFailure> {
        match self {
            CallbackOutcome::Failed { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

/// A failed step, with the message needed to notify `authentication_failed`.
struct FlowFailure {
    message: WsFederationMessage,
    failure: ProtocolFailure,
}

type Step<T> = Result<T, Box<FlowFailure>>;

fn fail<T>(message: WsFederationMessage, failure: ProtocolFailure) -> Step<T> {
    Err(Box::new(FlowFailure { message, failure }))
}

/// Map a hook outcome onto the end of the flow, if it ends it.
fn hook_exit(outcome: HookOutcome, stage: FlowStage) -> Option<CallbackOutcome> {
    match outcome {
        HookOutcome::Continue => None,
        HookOutcome::Skip => Some(CallbackOutcome::NotEngaged),
        HookOutcome::HandleResponse => Some(CallbackOutcome::Failed {
            failure: ProtocolFailure::handled(stage),
            handled: true,
        }),
    }
}

impl WsFederationHandler {
    /// Whether `callback` is a POST to the configured callback path.
    pub fn is_callback_request(&self, callback: &CallbackRequest) -> bool {
        callback.method.eq_ignore_ascii_case("POST")
            && callback.request.path == self.config.callback_path
    }

    /// Process a request that may carry a sign-in response.
    ///
    /// Never renders a response: the caller turns the outcome into a session
    /// and a redirect, or an error page.
    #[tracing::instrument(
        skip(self, callback),
        fields(realm = %self.config.realm, path = %callback.request.path)
    )]
    pub async fn process_callback(&self, callback: &CallbackRequest) -> CallbackOutcome {
        if !self.is_callback_request(callback) {
            return CallbackOutcome::NotEngaged;
        }

        let message = WsFederationMessage::from_form(&callback.body);
        if !message.is_sign_in_message() {
            tracing::debug!(wa = ?message.wa(), "Callback request is not a sign-in response");
            return CallbackOutcome::NotEngaged;
        }

        let outcome = match self.complete_sign_in(message, &callback.request).await {
            Ok(outcome) => outcome,
            Err(flow) => self.report_failure(*flow).await,
        };

        if outcome.is_engaged()
            && let Some(sink) = &self.sink
        {
            sink.on_authentication_result(&outcome).await;
        }

        outcome
    }

    async fn complete_sign_in(
        &self,
        message: WsFederationMessage,
        request: &RequestContext,
    ) -> Step<CallbackOutcome> {
        // MessageReceived
        let mut notification = Notification::new(message, ());
        self.events.message_received(&mut notification).await;
        let (message, (), outcome) = notification.into_parts();
        if let Some(exit) = hook_exit(outcome, FlowStage::MessageValidated) {
            return Ok(exit);
        }

        let relay_state = match self.decode_relay_state(message.wctx()) {
            Ok(state) => state,
            Err(e) => {
                return fail(
                    message,
                    ProtocolFailure::invalid_state(FlowStage::MessageValidated, &e),
                );
            }
        };

        let token = match message.security_token() {
            Ok(token) => token,
            Err(e) => return fail(message, ProtocolFailure::malformed_token(&e)),
        };

        // SecurityTokenReceived
        let mut notification = Notification::new(message, token);
        self.events.security_token_received(&mut notification).await;
        let (message, token, outcome) = notification.into_parts();
        if let Some(exit) = hook_exit(outcome, FlowStage::TokenExtracted) {
            return Ok(exit);
        }

        let metadata = match self.resolve_metadata(FlowStage::TokenExtracted).await {
            Ok(metadata) => metadata,
            Err(failure) => return fail(message, failure),
        };

        let context = ValidationContext {
            audience: self.config.realm.clone(),
            signing_keys: metadata.signing_keys.clone(),
            now: self.clock.now(),
            clock_skew: self.config.clock_skew(),
        };
        let validated = match self.validator.validate(&token, &context).await {
            Ok(validated) => validated,
            Err(e) => return fail(message, ProtocolFailure::token_rejected(&e)),
        };

        let identities: Vec<ClaimsIdentity> = validated
            .identities
            .into_iter()
            .map(|subject| {
                ClaimsIdentity::new(
                    &self.config.authentication_type,
                    &self.config.name_claim_type,
                    &self.config.role_claim_type,
                )
                .with_claims(subject.claims)
            })
            .collect();
        if identities.is_empty() {
            return fail(
                message,
                ProtocolFailure::token_rejected(&TokenValidationError::MissingSubject),
            );
        }

        let ticket = AuthenticationTicket {
            principal: Principal::new(identities),
            return_url: self.resolve_return_url(relay_state.return_url.as_deref(), request),
            relay_state,
        };

        // SecurityTokenValidated
        let mut notification = Notification::new(message, ticket);
        self.events.security_token_validated(&mut notification).await;
        let (message, ticket, outcome) = notification.into_parts();
        if let Some(exit) = hook_exit(outcome, FlowStage::ClaimsTransformed) {
            return Ok(exit);
        }

        if ticket.principal.identities.is_empty() {
            return fail(
                message,
                ProtocolFailure::new(
                    FlowStage::ClaimsTransformed,
                    FailureCause::TokenValidationFailed,
                    "event hook removed every identity",
                ),
            );
        }

        tracing::info!(
            name = ?ticket.principal.name(),
            identities = ticket.principal.identities.len(),
            return_url = %ticket.return_url,
            "WS-Federation sign-in completed"
        );

        Ok(CallbackOutcome::Completed(ticket))
    }

    /// Strip the prefix from `wctx`, decode it and check its age.
    fn decode_relay_state(&self, wctx: Option<&str>) -> Result<RelayState, StateError> {
        let wctx = wctx.filter(|v| !v.is_empty()).ok_or(StateError::Missing)?;
        let encoded = wctx
            .strip_prefix(self.config.state_prefix.as_str())
            .ok_or(StateError::MissingPrefix)?;
        let state = self.codec.decode(encoded)?;

        if let Some(age) = state.age(self.clock.now())
            && age > self.config.state_lifetime()
        {
            return Err(StateError::Expired {
                age_secs: age.num_seconds(),
            });
        }

        Ok(state)
    }

    async fn report_failure(&self, flow: FlowFailure) -> CallbackOutcome {
        let FlowFailure { message, failure } = flow;
        let (failure, outcome) = self.notify_failure(message, failure).await;
        CallbackOutcome::Failed {
            failure,
            handled: outcome != HookOutcome::Continue,
        }
    }

    /// Log a failure and pass it to `authentication_failed` once.
    ///
    /// Failures a hook already took over are not reported again and count as
    /// handled.
    pub(super) async fn notify_failure(
        &self,
        message: WsFederationMessage,
        failure: ProtocolFailure,
    ) -> (ProtocolFailure, HookOutcome) {
        if !failure.is_reportable() {
            return (failure, HookOutcome::HandleResponse);
        }

        tracing::warn!(
            stage = %failure.stage,
            cause = %failure.cause,
            wa = ?message.wa(),
            error = %failure.message,
            "WS-Federation flow failed"
        );

        let mut notification = Notification::new(message, failure);
        self.events.authentication_failed(&mut notification).await;
        let (_, failure, outcome) = notification.into_parts();
        (failure, outcome)
    }
}
