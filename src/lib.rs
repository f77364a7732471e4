//! WS-Federation passive requestor relying party.
//!
//! Sends unauthenticated browsers to a Security Token Service with a
//! `wsignin1.0` redirect, validates the token the STS posts back, and turns
//! its claims into a [`Principal`]. Serving HTTP and persisting the session
//! are left to the embedding application.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use wsfed_relying_party::{config::RelyingPartyConfig, wsfed::*};
//! # async fn run(validator: Arc<dyn TokenValidator>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = RelyingPartyConfig::from_file("wsfed.toml")?;
//! let handler = WsFederationHandler::builder(config.wsfed, validator).build()?;
//!
//! let request = RequestContext::new("https", "app.example.com", "/reports");
//! if let RedirectOutcome::Redirect(redirect) = handler
//!     .build_sign_in_redirect(&request, RedirectOptions::default())
//!     .await?
//! {
//!     println!("302 Location: {}", redirect.url);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
#[cfg(feature = "cli")]
pub mod observability;
pub mod wsfed;

#[cfg(test)]
mod tests;

pub use wsfed::{
    CallbackOutcome, CallbackRequest, Principal, ProtocolFailure, RequestContext,
    WsFederationHandler,
};
