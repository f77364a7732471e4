//! Outbound sign-in and sign-out redirects.

use std::collections::BTreeMap;

use url::Url;

use super::{
    error::{FailureCause, FlowStage, ProtocolFailure},
    events::{HookOutcome, Notification},
    handler::{RequestContext, WsFederationHandler},
    message::WsFederationMessage,
    metadata::FederationMetadata,
    state::RelayState,
};

/// Caller choices for a redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectOptions {
    /// Where to land after the round trip. Defaults to the current request URL
    /// for sign-in and the default return path for sign-out.
    pub return_url: Option<String>,
    /// Extra values carried in the relay state.
    pub extra: BTreeMap<String, String>,
}

impl RedirectOptions {
    pub fn return_to(url: impl Into<String>) -> Self {
        Self {
            return_url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// A redirect to the STS, ready to be sent as an HTTP 302.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityProviderRedirect {
    pub url: Url,
    /// Relay state as encoded into `wctx`.
    pub relay_state: RelayState,
    pub message: WsFederationMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectOutcome {
    /// Send the browser to the STS.
    Redirect(IdentityProviderRedirect),
    /// A hook produced the response; send nothing.
    Handled,
    /// A hook asked this handler to step aside.
    Skipped,
}

impl WsFederationHandler {
    /// Build the `wsignin1.0` redirect for an unauthenticated request.
    #[tracing::instrument(
        skip(self, request, options),
        fields(realm = %self.config.realm, path = %request.path)
    )]
    pub async fn build_sign_in_redirect(
        &self,
        request: &RequestContext,
        options: RedirectOptions,
    ) -> Result<RedirectOutcome, ProtocolFailure> {
        match self.sign_in_redirect(request, options).await {
            Err(failure) => self.redirect_failed(WsFederationMessage::sign_in(), failure).await,
            outcome => outcome,
        }
    }

    async fn sign_in_redirect(
        &self,
        request: &RequestContext,
        options: RedirectOptions,
    ) -> Result<RedirectOutcome, ProtocolFailure> {
        let metadata = self.resolve_metadata(FlowStage::Redirect).await?;

        let mut message = WsFederationMessage::sign_in();
        message.set_wtrealm(&self.config.realm);
        message.set_wreply(self.callback_url(request));

        let relay_state = RelayState {
            return_url: Some(options.return_url.unwrap_or_else(|| request.local_url())),
            extra: options.extra,
            issued_at: Some(self.clock.now()),
        };

        let mut notification = Notification::new(message, relay_state);
        self.events
            .redirect_to_identity_provider(&mut notification)
            .await;
        let (mut message, relay_state, outcome) = notification.into_parts();

        match outcome {
            HookOutcome::Continue => {}
            HookOutcome::HandleResponse => {
                tracing::debug!("Sign-in redirect handled by event hook");
                return Ok(RedirectOutcome::Handled);
            }
            HookOutcome::Skip => return Ok(RedirectOutcome::Skipped),
        }

        if let Some(existing) = message.wctx() {
            tracing::warn!(
                wctx = %existing,
                "Event hook set wctx directly; it is replaced by the encoded relay state. \
                 Add values to the relay state instead."
            );
        }

        let encoded = self
            .codec
            .encode(&relay_state)
            .map_err(|e| ProtocolFailure::invalid_state(FlowStage::Redirect, &e))?;
        message.set_wctx(format!("{}{}", self.config.state_prefix, encoded));

        let url = message.to_redirect_url(&metadata.sign_in_endpoint);

        tracing::info!(
            endpoint = %metadata.sign_in_endpoint,
            return_url = ?relay_state.return_url,
            "Redirecting to identity provider"
        );

        Ok(RedirectOutcome::Redirect(IdentityProviderRedirect {
            url,
            relay_state,
            message,
        }))
    }

    /// Build the `wsignout1.0` redirect.
    ///
    /// The target is `sign_out_endpoint` when configured, otherwise the
    /// passive endpoint from metadata. `wreply` is `sign_out_wreply` when
    /// configured, otherwise the sanitized return URL made absolute.
    #[tracing::instrument(
        skip(self, request, options),
        fields(realm = %self.config.realm)
    )]
    pub async fn build_sign_out_redirect(
        &self,
        request: &RequestContext,
        options: RedirectOptions,
    ) -> Result<RedirectOutcome, ProtocolFailure> {
        match self.sign_out_redirect(request, options).await {
            Err(failure) => self.redirect_failed(WsFederationMessage::sign_out(), failure).await,
            outcome => outcome,
        }
    }

    async fn sign_out_redirect(
        &self,
        request: &RequestContext,
        options: RedirectOptions,
    ) -> Result<RedirectOutcome, ProtocolFailure> {
        let endpoint = self.sign_out_endpoint().await?;

        let return_url = self.resolve_return_url(options.return_url.as_deref(), request);
        let wreply = match &self.config.sign_out_wreply {
            Some(wreply) => wreply.clone(),
            None if return_url.starts_with('/') => format!("{}{}", request.origin(), return_url),
            None => return_url.clone(),
        };

        let mut message = WsFederationMessage::sign_out();
        message.set_wtrealm(&self.config.realm);
        message.set_wreply(wreply);

        let relay_state = RelayState {
            return_url: Some(return_url),
            extra: options.extra,
            issued_at: Some(self.clock.now()),
        };

        let mut notification = Notification::new(message, relay_state);
        self.events
            .redirect_to_identity_provider(&mut notification)
            .await;
        let (message, relay_state, outcome) = notification.into_parts();

        match outcome {
            HookOutcome::Continue => {}
            HookOutcome::HandleResponse => return Ok(RedirectOutcome::Handled),
            HookOutcome::Skip => return Ok(RedirectOutcome::Skipped),
        }

        let url = message.to_redirect_url(&endpoint);
        tracing::info!(endpoint = %endpoint, "Redirecting to identity provider for sign-out");

        Ok(RedirectOutcome::Redirect(IdentityProviderRedirect {
            url,
            relay_state,
            message,
        }))
    }

    /// Report a failed redirect to `authentication_failed`; the hook may
    /// still take over the response.
    async fn redirect_failed(
        &self,
        mut message: WsFederationMessage,
        failure: ProtocolFailure,
    ) -> Result<RedirectOutcome, ProtocolFailure> {
        message.set_wtrealm(&self.config.realm);
        let (failure, outcome) = self.notify_failure(message, failure).await;
        match outcome {
            HookOutcome::Continue => Err(failure),
            HookOutcome::HandleResponse => Ok(RedirectOutcome::Handled),
            HookOutcome::Skip => Ok(RedirectOutcome::Skipped),
        }
    }

    async fn sign_out_endpoint(&self) -> Result<Url, ProtocolFailure> {
        if let Some(endpoint) = &self.config.sign_out_endpoint {
            return Url::parse(endpoint).map_err(|e| {
                ProtocolFailure::new(
                    FlowStage::Redirect,
                    FailureCause::MetadataUnavailable,
                    format!("invalid sign-out endpoint {endpoint}: {e}"),
                )
            });
        }
        let metadata = self.resolve_metadata(FlowStage::Redirect).await?;
        Ok(metadata.sign_in_endpoint.clone())
    }

    /// Resolve metadata within the configured timeout.
    pub(super) async fn resolve_metadata(
        &self,
        stage: FlowStage,
    ) -> Result<std::sync::Arc<FederationMetadata>, ProtocolFailure> {
        let address = self.config.metadata_cache_address();
        self.resolver
            .resolve_with_timeout(address, self.config.metadata_timeout())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, address = %address, "Federation metadata unavailable");
                ProtocolFailure::metadata_unavailable(stage, &e)
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::{
        config::WsFederationConfig,
        wsfed::{
            events::WsFederationEvents,
            message::{WA_SIGN_IN, WA_SIGN_OUT},
            metadata::{StaticMetadataTransport, tests::metadata_document},
            state::{HmacStateCodec, StateCodec},
            token::{AssertionTokenValidator, Clock, tests::MarkerVerifier},
        },
    };

    const SECRET: &str = "test-relay-state-secret-32-bytes";

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn issued() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn config() -> WsFederationConfig {
        let mut config = WsFederationConfig::new("http://Automation1", "https://sts.example/md");
        config.state_secret = Some(SECRET.into());
        config
    }

    fn handler(config: WsFederationConfig, events: Arc<dyn WsFederationEvents>) -> WsFederationHandler {
        WsFederationHandler::builder(config, Arc::new(AssertionTokenValidator::new(MarkerVerifier)))
            .metadata_transport(Arc::new(StaticMetadataTransport::new(metadata_document(
                "https://sts.example/wsfed",
            ))))
            .clock(Arc::new(FixedClock(issued())))
            .events(events)
            .build()
            .unwrap()
    }

    fn query(url: &Url, name: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    fn expect_redirect(outcome: RedirectOutcome) -> IdentityProviderRedirect {
        match outcome {
            RedirectOutcome::Redirect(redirect) => redirect,
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    struct AddsState;

    #[async_trait]
    impl WsFederationEvents for AddsState {
        async fn redirect_to_identity_provider(&self, notification: &mut Notification<RelayState>) {
            notification
                .payload
                .extra
                .insert("mystate".into(), "CustomStateValue".into());
            notification.message.set("whr", "urn:federation:contoso");
            notification.message.set_wctx("appended-by-hook");
        }
    }

    struct TakesOver(HookOutcome);

    #[async_trait]
    impl WsFederationEvents for TakesOver {
        async fn redirect_to_identity_provider(&self, notification: &mut Notification<RelayState>) {
            match self.0 {
                HookOutcome::HandleResponse => notification.handle_response(),
                HookOutcome::Skip => notification.skip_to_next(),
                HookOutcome::Continue => {}
            }
        }
    }

    #[tokio::test]
    async fn test_sign_in_redirect() {
        let handler = handler(config(), Arc::new(crate::wsfed::events::DefaultEvents));
        let request = RequestContext::new("https", "host", "/orders").with_query("id=42");

        let redirect = expect_redirect(
            handler
                .build_sign_in_redirect(&request, RedirectOptions::default())
                .await
                .unwrap(),
        );

        assert_eq!(redirect.url.host_str(), Some("sts.example"));
        assert_eq!(redirect.url.path(), "/wsfed");
        assert_eq!(query(&redirect.url, "wa").as_deref(), Some(WA_SIGN_IN));
        assert_eq!(
            query(&redirect.url, "wtrealm").as_deref(),
            Some("http://Automation1")
        );
        assert_eq!(
            query(&redirect.url, "wreply").as_deref(),
            Some("https://host/signin-wsfed")
        );
        assert_eq!(redirect.relay_state.return_url.as_deref(), Some("/orders?id=42"));
        assert_eq!(redirect.relay_state.issued_at, Some(issued()));

        let wctx = query(&redirect.url, "wctx").unwrap();
        let encoded = wctx.strip_prefix("WsFedState=").unwrap();
        let decoded = HmacStateCodec::new(SECRET).unwrap().decode(encoded).unwrap();
        assert_eq!(decoded, redirect.relay_state);
    }

    #[tokio::test]
    async fn test_hook_extends_relay_state_before_encoding() {
        let handler = handler(config(), Arc::new(AddsState));
        let request = RequestContext::new("https", "host", "/");

        let redirect = expect_redirect(
            handler
                .build_sign_in_redirect(&request, RedirectOptions::return_to("/reports"))
                .await
                .unwrap(),
        );

        assert_eq!(
            query(&redirect.url, "whr").as_deref(),
            Some("urn:federation:contoso")
        );
        let wctx = query(&redirect.url, "wctx").unwrap();
        assert!(!wctx.contains("appended-by-hook"));
        let decoded = HmacStateCodec::new(SECRET)
            .unwrap()
            .decode(wctx.strip_prefix("WsFedState=").unwrap())
            .unwrap();
        assert_eq!(decoded.return_url.as_deref(), Some("/reports"));
        assert_eq!(
            decoded.extra.get("mystate").map(String::as_str),
            Some("CustomStateValue")
        );
    }

    #[rstest::rstest]
    #[case::handled(HookOutcome::HandleResponse, RedirectOutcome::Handled)]
    #[case::skipped(HookOutcome::Skip, RedirectOutcome::Skipped)]
    #[tokio::test]
    async fn test_hook_takes_over_redirect(#[case] hook: HookOutcome, #[case] expected: RedirectOutcome) {
        let handler = handler(config(), Arc::new(TakesOver(hook)));
        let request = RequestContext::new("https", "host", "/");
        let outcome = handler
            .build_sign_in_redirect(&request, RedirectOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome, expected);
    }

    #[tokio::test]
    async fn test_sign_in_metadata_unavailable() {
        let handler = WsFederationHandler::builder(
            config(),
            Arc::new(AssertionTokenValidator::new(MarkerVerifier)),
        )
        .metadata_transport(Arc::new(StaticMetadataTransport::new("<not-metadata>")))
        .build()
        .unwrap();

        let failure = handler
            .build_sign_in_redirect(&RequestContext::new("https", "host", "/"), RedirectOptions::default())
            .await
            .unwrap_err();
        assert_eq!(failure.stage, FlowStage::Redirect);
        assert_eq!(failure.cause, FailureCause::MetadataUnavailable);
    }

    /// Counts `authentication_failed` calls and answers with a fixed outcome.
    struct FailureHook {
        outcome: HookOutcome,
        failures: parking_lot::Mutex<Vec<(Option<String>, ProtocolFailure)>>,
    }

    #[async_trait]
    impl WsFederationEvents for FailureHook {
        async fn authentication_failed(&self, notification: &mut Notification<ProtocolFailure>) {
            self.failures.lock().push((
                notification.message.wa().map(str::to_string),
                notification.payload.clone(),
            ));
            match self.outcome {
                HookOutcome::HandleResponse => notification.handle_response(),
                HookOutcome::Skip => notification.skip_to_next(),
                HookOutcome::Continue => {}
            }
        }
    }

    #[rstest::rstest]
    #[case::sign_in_reported(WA_SIGN_IN, HookOutcome::Continue, None)]
    #[case::sign_out_reported(WA_SIGN_OUT, HookOutcome::Continue, None)]
    #[case::sign_in_handled(WA_SIGN_IN, HookOutcome::HandleResponse, Some(RedirectOutcome::Handled))]
    #[case::sign_out_skipped(WA_SIGN_OUT, HookOutcome::Skip, Some(RedirectOutcome::Skipped))]
    #[tokio::test]
    async fn test_redirect_failure_reaches_hook(
        #[case] wa: &str,
        #[case] hook: HookOutcome,
        #[case] expected: Option<RedirectOutcome>,
    ) {
        let events = Arc::new(FailureHook {
            outcome: hook,
            failures: Default::default(),
        });
        let handler = WsFederationHandler::builder(
            config(),
            Arc::new(AssertionTokenValidator::new(MarkerVerifier)),
        )
        .metadata_transport(Arc::new(StaticMetadataTransport::new("<not-metadata>")))
        .events(events.clone())
        .build()
        .unwrap();
        let request = RequestContext::new("https", "host", "/");

        let result = if wa == WA_SIGN_IN {
            handler.build_sign_in_redirect(&request, RedirectOptions::default()).await
        } else {
            handler.build_sign_out_redirect(&request, RedirectOptions::default()).await
        };

        match expected {
            Some(outcome) => assert_eq!(result, Ok(outcome)),
            None => assert_eq!(
                result.map_err(|f| f.cause),
                Err(FailureCause::MetadataUnavailable)
            ),
        }
        let failures = events.failures.lock();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0.as_deref(), Some(wa));
        assert_eq!(failures[0].1.stage, FlowStage::Redirect);
    }

    #[tokio::test]
    async fn test_sign_out_redirect_uses_metadata_endpoint() {
        let handler = handler(config(), Arc::new(crate::wsfed::events::DefaultEvents));
        let request = RequestContext::new("https", "host", "/logout");

        let redirect = expect_redirect(
            handler
                .build_sign_out_redirect(&request, RedirectOptions::return_to("/goodbye"))
                .await
                .unwrap(),
        );

        assert_eq!(redirect.url.path(), "/wsfed");
        assert_eq!(query(&redirect.url, "wa").as_deref(), Some(WA_SIGN_OUT));
        assert_eq!(
            query(&redirect.url, "wreply").as_deref(),
            Some("https://host/goodbye")
        );
        assert_eq!(query(&redirect.url, "wctx"), None);
    }

    #[tokio::test]
    async fn test_sign_out_overrides() {
        let mut config = config();
        config.sign_out_endpoint = Some("https://sts.example/signout".into());
        config.sign_out_wreply = Some("https://host/signed-out".into());
        let handler = handler(config, Arc::new(crate::wsfed::events::DefaultEvents));

        let redirect = expect_redirect(
            handler
                .build_sign_out_redirect(
                    &RequestContext::new("https", "host", "/logout"),
                    RedirectOptions::return_to("https://evil.example/"),
                )
                .await
                .unwrap(),
        );

        assert_eq!(redirect.url.path(), "/signout");
        assert_eq!(
            query(&redirect.url, "wreply").as_deref(),
            Some("https://host/signed-out")
        );
        assert_eq!(redirect.relay_state.return_url.as_deref(), Some("/"));
    }
}
