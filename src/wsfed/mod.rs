//! WS-Federation passive requestor profile, relying party side.
//!
//! [`WsFederationHandler`] is the entry point. It builds `wsignin1.0` and
//! `wsignout1.0` redirects to the STS and turns the sign-in response posted
//! back to the callback path into a [`Principal`], consulting:
//!
//! - [`MetadataResolver`] for the STS endpoint and signing keys
//! - a [`StateCodec`] for the relay state carried in `wctx`
//! - a [`TokenValidator`] for the security token in `wresult`
//! - a [`WsFederationEvents`] listener at each stage of the flow

pub mod callback;
pub mod error;
pub mod events;
pub mod handler;
pub mod message;
pub mod metadata;
pub mod principal;
pub mod redirect;
pub mod state;
pub mod token;

pub use callback::{AuthenticationTicket, CallbackOutcome, CallbackRequest};
pub use error::{FailureCause, FlowStage, ProtocolFailure};
pub use events::{
    AuthenticationResultSink, DefaultEvents, HookOutcome, Notification, WsFederationEvents,
};
pub use handler::{RequestContext, WsFederationHandler, WsFederationHandlerBuilder};
pub use message::{MessageError, WA_SIGN_IN, WA_SIGN_OUT, WA_SIGN_OUT_CLEANUP, WsFederationMessage};
#[cfg(feature = "http-metadata")]
pub use metadata::HttpMetadataTransport;
pub use metadata::{
    FederationMetadata, MetadataError, MetadataResolver, MetadataTransport, SigningKey,
    StaticMetadataTransport, parse_federation_metadata,
};
pub use principal::{Claim, ClaimsIdentity, Principal, claim_types};
pub use redirect::{IdentityProviderRedirect, RedirectOptions, RedirectOutcome};
pub use state::{HmacStateCodec, RelayState, StateCodec, StateError};
pub use token::{
    AssertionTokenValidator, Clock, SignatureVerifier, SubjectClaims, SystemClock,
    TokenValidationError, TokenValidator, ValidatedToken, ValidationContext,
};
