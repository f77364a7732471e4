use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::ConfigError;
use crate::wsfed::{principal::claim_types, state::MIN_SECRET_LEN};

/// Address under which an inline metadata document is cached.
pub const INLINE_METADATA_ADDRESS: &str = "inline:federation-metadata";

/// Upper bound for `state_lifetime_secs` and `clock_skew_secs` (ten years).
pub const MAX_INTERVAL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// WS-Federation relying party configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WsFederationConfig {
    /// Relying party identifier sent as `wtrealm`.
    pub realm: String,

    /// URL of the STS federation metadata document.
    #[serde(default)]
    pub metadata_address: Option<String>,

    /// Federation metadata XML supplied inline, for offline deployments.
    #[serde(default)]
    pub metadata_document: Option<String>,

    /// Path the STS posts sign-in responses to.
    #[serde(default = "default_callback_path")]
    pub callback_path: String,

    /// Absolute `wreply` override. When unset, `wreply` is built from the
    /// request's scheme and host plus `callback_path`.
    #[serde(default)]
    pub wreply: Option<String>,

    /// `wreply` for sign-out requests. Defaults to the sign-out return URL.
    #[serde(default)]
    pub sign_out_wreply: Option<String>,

    /// STS endpoint for sign-out, overriding the metadata endpoint.
    #[serde(default)]
    pub sign_out_endpoint: Option<String>,

    /// Where to send the browser when the relay state has no usable return URL.
    #[serde(default = "default_return_path")]
    pub default_return_path: String,

    /// Prefix prepended to the encoded relay state in `wctx`.
    #[serde(default = "default_state_prefix")]
    pub state_prefix: String,

    /// Key protecting `wctx`. A random key is generated per process when
    /// unset, so sign-ins in flight across a restart fail.
    #[serde(default)]
    pub state_secret: Option<String>,

    /// How long a relay state stays valid after the redirect (seconds).
    #[serde(default = "default_state_lifetime")]
    pub state_lifetime_secs: u64,

    /// How long resolved metadata is cached (seconds).
    #[serde(default = "default_metadata_ttl")]
    pub metadata_ttl_secs: u64,

    /// Timeout for fetching metadata (seconds).
    #[serde(default = "default_metadata_timeout")]
    pub metadata_timeout_secs: u64,

    /// Refuse to fetch metadata over plain HTTP.
    #[serde(default = "default_true")]
    pub require_https_metadata: bool,

    /// Tolerance applied to token lifetimes (seconds).
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: u64,

    /// Authentication type recorded on created identities.
    #[serde(default = "default_authentication_type")]
    pub authentication_type: String,

    /// Claim type that holds the identity's name.
    #[serde(default = "default_name_claim_type")]
    pub name_claim_type: String,

    /// Claim type that holds the identity's roles.
    #[serde(default = "default_role_claim_type")]
    pub role_claim_type: String,
}

impl WsFederationConfig {
    /// Minimal configuration for a realm and metadata address.
    pub fn new(realm: impl Into<String>, metadata_address: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            metadata_address: Some(metadata_address.into()),
            metadata_document: None,
            callback_path: default_callback_path(),
            wreply: None,
            sign_out_wreply: None,
            sign_out_endpoint: None,
            default_return_path: default_return_path(),
            state_prefix: default_state_prefix(),
            state_secret: None,
            state_lifetime_secs: default_state_lifetime(),
            metadata_ttl_secs: default_metadata_ttl(),
            metadata_timeout_secs: default_metadata_timeout(),
            require_https_metadata: true,
            clock_skew_secs: default_clock_skew(),
            authentication_type: default_authentication_type(),
            name_claim_type: default_name_claim_type(),
            role_claim_type: default_role_claim_type(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.realm.trim().is_empty() {
            return Err(ConfigError::Validation("wsfed.realm must not be empty".into()));
        }

        match (&self.metadata_address, &self.metadata_document) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Validation(
                    "Set only one of wsfed.metadata_address and wsfed.metadata_document".into(),
                ));
            }
            (None, None) => {
                return Err(ConfigError::Validation(
                    "One of wsfed.metadata_address or wsfed.metadata_document is required".into(),
                ));
            }
            (Some(address), None) => {
                let url = Url::parse(address).map_err(|e| {
                    ConfigError::Validation(format!(
                        "wsfed.metadata_address is not a valid URL: {e}"
                    ))
                })?;
                if self.require_https_metadata && url.scheme() != "https" {
                    return Err(ConfigError::Validation(format!(
                        "wsfed.metadata_address must use HTTPS (got '{address}'). \
                         Set wsfed.require_https_metadata = false for development only."
                    )));
                }
            }
            (None, Some(_)) => {}
        }

        if !self.callback_path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "wsfed.callback_path must start with '/' (got '{}')",
                self.callback_path
            )));
        }

        if !self.default_return_path.starts_with('/') || self.default_return_path.starts_with("//")
        {
            return Err(ConfigError::Validation(format!(
                "wsfed.default_return_path must be a local path (got '{}')",
                self.default_return_path
            )));
        }

        for (name, value) in [
            ("wreply", &self.wreply),
            ("sign_out_wreply", &self.sign_out_wreply),
            ("sign_out_endpoint", &self.sign_out_endpoint),
        ] {
            if let Some(value) = value
                && Url::parse(value).is_err()
            {
                return Err(ConfigError::Validation(format!(
                    "wsfed.{name} must be an absolute URL (got '{value}')"
                )));
            }
        }

        if let Some(secret) = &self.state_secret
            && secret.len() < MIN_SECRET_LEN
        {
            return Err(ConfigError::Validation(format!(
                "wsfed.state_secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }

        if self.state_lifetime_secs == 0 {
            return Err(ConfigError::Validation(
                "wsfed.state_lifetime_secs must be greater than 0".into(),
            ));
        }
        for (name, value) in [
            ("state_lifetime_secs", self.state_lifetime_secs),
            ("clock_skew_secs", self.clock_skew_secs),
        ] {
            if value > MAX_INTERVAL_SECS {
                return Err(ConfigError::Validation(format!(
                    "wsfed.{name} must be at most {MAX_INTERVAL_SECS}"
                )));
            }
        }
        if self.metadata_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "wsfed.metadata_timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Key under which metadata is resolved and cached.
    pub fn metadata_cache_address(&self) -> &str {
        self.metadata_address
            .as_deref()
            .unwrap_or(INLINE_METADATA_ADDRESS)
    }

    pub fn state_lifetime(&self) -> chrono::Duration {
        seconds(self.state_lifetime_secs)
    }

    pub fn clock_skew(&self) -> chrono::Duration {
        seconds(self.clock_skew_secs)
    }

    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_ttl_secs)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }
}

/// Saturates instead of panicking for values `validate()` would reject.
fn seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

fn default_callback_path() -> String {
    "/signin-wsfed".to_string()
}

fn default_return_path() -> String {
    "/".to_string()
}

fn default_state_prefix() -> String {
    "WsFedState=".to_string()
}

fn default_state_lifetime() -> u64 {
    900 // 15 minutes
}

fn default_metadata_ttl() -> u64 {
    86400 // 24 hours
}

fn default_metadata_timeout() -> u64 {
    30
}

fn default_clock_skew() -> u64 {
    300
}

fn default_authentication_type() -> String {
    "Federation".to_string()
}

fn default_name_claim_type() -> String {
    claim_types::NAME.to_string()
}

fn default_role_claim_type() -> String {
    claim_types::ROLE.to_string()
}

fn default_true() -> bool {
    true
}
