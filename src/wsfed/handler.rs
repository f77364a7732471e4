use std::sync::Arc;

use url::Url;

use super::{
    events::{AuthenticationResultSink, DefaultEvents, WsFederationEvents},
    metadata::{MetadataResolver, MetadataTransport, StaticMetadataTransport},
    state::{HmacStateCodec, StateCodec},
    token::{Clock, SystemClock, TokenValidator},
};
use crate::config::{ConfigError, WsFederationConfig};

/// The parts of the current HTTP request the protocol needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub scheme: String,
    pub host: String,
    /// Mount point of the application, e.g. `/app`. Empty at the root.
    pub path_base: String,
    /// Request path below `path_base`.
    pub path: String,
    pub query: Option<String>,
}

impl RequestContext {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            path_base: String::new(),
            path: path.into(),
            query: None,
        }
    }

    pub fn with_path_base(mut self, path_base: impl Into<String>) -> Self {
        self.path_base = path_base.into();
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// `scheme://host` of the request.
    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }

    /// Local URL of the request: base, path, and query.
    pub fn local_url(&self) -> String {
        let mut url = format!("{}{}", self.path_base, self.path);
        if url.is_empty() {
            url.push('/');
        }
        if let Some(query) = self.query.as_deref().filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }
}

/// WS-Federation relying party.
///
/// Builds redirects to the STS and processes the sign-in responses it posts
/// back. Holds no per-request state, so one instance serves all requests.
pub struct WsFederationHandler {
    pub(super) config: WsFederationConfig,
    pub(super) resolver: Arc<MetadataResolver>,
    pub(super) codec: Arc<dyn StateCodec>,
    pub(super) validator: Arc<dyn TokenValidator>,
    pub(super) events: Arc<dyn WsFederationEvents>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) sink: Option<Arc<dyn AuthenticationResultSink>>,
}

impl WsFederationHandler {
    pub fn builder(
        config: WsFederationConfig,
        validator: Arc<dyn TokenValidator>,
    ) -> WsFederationHandlerBuilder {
        WsFederationHandlerBuilder {
            config,
            validator,
            codec: None,
            events: None,
            clock: None,
            sink: None,
            transport: None,
            resolver: None,
        }
    }

    pub fn config(&self) -> &WsFederationConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<MetadataResolver> {
        &self.resolver
    }

    /// Absolute callback URL for a request, used as the sign-in `wreply`.
    pub fn callback_url(&self, request: &RequestContext) -> String {
        match &self.config.wreply {
            Some(wreply) => wreply.clone(),
            None => format!(
                "{}{}{}",
                request.origin(),
                request.path_base,
                self.config.callback_path
            ),
        }
    }

    /// Accept `candidate` as a return URL only if it stays on this site.
    ///
    /// Local paths are accepted, as are absolute URLs with the same origin as
    /// the request. Anything else yields the configured default path.
    pub fn resolve_return_url(&self, candidate: Option<&str>, request: &RequestContext) -> String {
        match candidate {
            Some(url) if is_safe_return_url(url, &request.origin()) => url.to_string(),
            Some(url) => {
                tracing::warn!(
                    return_url = %url,
                    "Rejected off-site return URL, using default"
                );
                self.config.default_return_path.clone()
            }
            None => self.config.default_return_path.clone(),
        }
    }
}

fn is_safe_return_url(url: &str, origin: &str) -> bool {
    if url.starts_with('/') {
        return !url.starts_with("//") && !url.starts_with("/\\");
    }
    match (Url::parse(url), Url::parse(origin)) {
        (Ok(url), Ok(origin)) => url.origin() == origin.origin(),
        _ => false,
    }
}

/// Assembles a [`WsFederationHandler`] from configuration and collaborators.
pub struct WsFederationHandlerBuilder {
    config: WsFederationConfig,
    validator: Arc<dyn TokenValidator>,
    codec: Option<Arc<dyn StateCodec>>,
    events: Option<Arc<dyn WsFederationEvents>>,
    clock: Option<Arc<dyn Clock>>,
    sink: Option<Arc<dyn AuthenticationResultSink>>,
    transport: Option<Arc<dyn MetadataTransport>>,
    resolver: Option<Arc<MetadataResolver>>,
}

impl WsFederationHandlerBuilder {
    /// Replace the default HMAC relay state codec.
    pub fn codec(mut self, codec: Arc<dyn StateCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn events(mut self, events: Arc<dyn WsFederationEvents>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn AuthenticationResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Fetch metadata through `transport` instead of the configured source.
    pub fn metadata_transport(mut self, transport: Arc<dyn MetadataTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Share a resolver, and its cache, with other handlers.
    pub fn resolver(mut self, resolver: Arc<MetadataResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> Result<WsFederationHandler, ConfigError> {
        self.config.validate()?;

        let codec = match self.codec {
            Some(codec) => codec,
            None => default_codec(&self.config)?,
        };

        let resolver = match self.resolver {
            Some(resolver) => resolver,
            None => {
                let transport = match self.transport {
                    Some(transport) => transport,
                    None => default_transport(&self.config)?,
                };
                Arc::new(MetadataResolver::new(transport, self.config.metadata_ttl()))
            }
        };

        tracing::debug!(
            realm = %self.config.realm,
            metadata = %self.config.metadata_cache_address(),
            callback_path = %self.config.callback_path,
            "WS-Federation handler configured"
        );

        Ok(WsFederationHandler {
            config: self.config,
            resolver,
            codec,
            validator: self.validator,
            events: self.events.unwrap_or_else(|| Arc::new(DefaultEvents)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            sink: self.sink,
        })
    }
}

fn default_codec(config: &WsFederationConfig) -> Result<Arc<dyn StateCodec>, ConfigError> {
    match &config.state_secret {
        Some(secret) => {
            let codec = HmacStateCodec::new(secret.as_bytes())
                .map_err(|e| ConfigError::Validation(format!("wsfed.state_secret: {e}")))?;
            Ok(Arc::new(codec))
        }
        None => {
            tracing::warn!(
                "No wsfed.state_secret configured; using a per-process key. \
                 Sign-ins in progress will fail after a restart."
            );
            Ok(Arc::new(HmacStateCodec::ephemeral()))
        }
    }
}

fn default_transport(config: &WsFederationConfig) -> Result<Arc<dyn MetadataTransport>, ConfigError> {
    match &config.metadata_document {
        Some(document) => Ok(Arc::new(StaticMetadataTransport::new(document.clone()))),
        None => http_transport(config),
    }
}

#[cfg(feature = "http-metadata")]
fn http_transport(config: &WsFederationConfig) -> Result<Arc<dyn MetadataTransport>, ConfigError> {
    let transport = super::metadata::HttpMetadataTransport::new(
        config.metadata_timeout(),
        config.require_https_metadata,
    )
    .map_err(|e| ConfigError::Validation(e.to_string()))?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "http-metadata"))]
fn http_transport(_config: &WsFederationConfig) -> Result<Arc<dyn MetadataTransport>, ConfigError> {
    Err(ConfigError::Validation(
        "wsfed.metadata_address requires the 'http-metadata' feature; \
         supply wsfed.metadata_document or a custom metadata transport"
            .into(),
    ))
}
