use std::fmt;

use super::{message::MessageError, metadata::MetadataError, state::StateError, token::TokenValidationError};

/// Where in the protocol flow a failure was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowStage {
    /// Building the outbound sign-in or sign-out redirect.
    Redirect,
    /// The inbound POST was recognized as a sign-in response.
    Received,
    /// `MessageReceived` ran and `wctx` was decoded.
    MessageValidated,
    /// The security token was pulled out of `wresult`.
    TokenExtracted,
    /// The token validator accepted the token.
    TokenValidated,
    /// `SecurityTokenReceived` / `SecurityTokenValidated` ran over the principal.
    ClaimsTransformed,
    /// Principal and return URL are ready for the session collaborator.
    Complete,
}

impl FlowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStage::Redirect => "redirect",
            FlowStage::Received => "received",
            FlowStage::MessageValidated => "message_validated",
            FlowStage::TokenExtracted => "token_extracted",
            FlowStage::TokenValidated => "token_validated",
            FlowStage::ClaimsTransformed => "claims_transformed",
            FlowStage::Complete => "complete",
        }
    }
}

impl fmt::Display for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a federation flow did not produce a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCause {
    /// `wctx` is missing, tampered with, expired, or not ours.
    InvalidState,
    /// Federation metadata could not be fetched or parsed.
    MetadataUnavailable,
    /// `wresult` is absent or is not well-formed token XML.
    MissingOrMalformedToken,
    /// Signature, lifetime, or audience checks rejected the token.
    TokenValidationFailed,
    /// An event hook took over the request.
    HandledByExtension,
}

impl FailureCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCause::InvalidState => "invalid_state",
            FailureCause::MetadataUnavailable => "metadata_unavailable",
            FailureCause::MissingOrMalformedToken => "missing_or_malformed_token",
            FailureCause::TokenValidationFailed => "token_validation_failed",
            FailureCause::HandledByExtension => "handled_by_extension",
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed federation flow.
///
/// Failures are per-request values. Nothing here is retried, and nothing
/// downgrades a failure into an anonymous identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolFailure {
    pub stage: FlowStage,
    pub cause: FailureCause,
    pub message: String,
}

impl ProtocolFailure {
    pub fn new(stage: FlowStage, cause: FailureCause, message: impl Into<String>) -> Self {
        Self {
            stage,
            cause,
            message: message.into(),
        }
    }

    pub fn invalid_state(stage: FlowStage, err: &StateError) -> Self {
        Self::new(stage, FailureCause::InvalidState, err.to_string())
    }

    pub fn metadata_unavailable(stage: FlowStage, err: &MetadataError) -> Self {
        Self::new(stage, FailureCause::MetadataUnavailable, err.to_string())
    }

    pub fn malformed_token(err: &MessageError) -> Self {
        Self::new(
            FlowStage::TokenExtracted,
            FailureCause::MissingOrMalformedToken,
            err.to_string(),
        )
    }

    pub fn token_rejected(err: &TokenValidationError) -> Self {
        Self::new(
            FlowStage::TokenValidated,
            FailureCause::TokenValidationFailed,
            err.to_string(),
        )
    }

    pub fn handled(stage: FlowStage) -> Self {
        Self::new(
            stage,
            FailureCause::HandledByExtension,
            format!("request handled by event hook during {stage}"),
        )
    }

    /// Whether the `AuthenticationFailed` hook should see this failure.
    ///
    /// A hook that took over the request has already decided what happens next.
    pub fn is_reportable(&self) -> bool {
        self.cause != FailureCause::HandledByExtension
    }
}

impl fmt::Display for ProtocolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WS-Federation flow failed at {} ({}): {}",
            self.stage, self.cause, self.message
        )
    }
}

impl std::error::Error for ProtocolFailure {}
