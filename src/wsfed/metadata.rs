//! Federation metadata resolution.
//!
//! The resolver learns the STS passive endpoint and token-signing
//! certificates from a WS-Federation metadata document. Documents are cached
//! per address, and concurrent misses for one address share a single fetch.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use quick_xml::{Reader, events::Event};
use sha2::{Digest, Sha256};
use url::Url;

/// Errors surfaced while fetching or parsing federation metadata.
///
/// `Clone` so every caller awaiting a shared fetch receives the same error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata address must use HTTPS: {0}")]
    InsecureAddress(String),

    #[error("failed to fetch federation metadata from {address}: {message}")]
    Fetch { address: String, message: String },

    #[error("federation metadata endpoint {address} returned {status}")]
    Status { address: String, status: u16 },

    #[error("timed out resolving federation metadata from {0}")]
    Timeout(String),

    #[error("failed to parse federation metadata: {0}")]
    Parse(String),

    #[error("federation metadata has no passive requestor endpoint")]
    MissingEndpoint,

    #[error("federation metadata endpoint is not an absolute URL: {0}")]
    InvalidEndpoint(String),
}

/// A token-signing certificate advertised by the STS.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SigningKey {
    certificate: String,
}

impl SigningKey {
    /// Wrap a base64 DER certificate. Whitespace is removed.
    pub fn from_base64(certificate: &str) -> Self {
        Self {
            certificate: certificate.split_whitespace().collect(),
        }
    }

    /// Base64 DER certificate as advertised in the metadata.
    pub fn certificate_base64(&self) -> &str {
        &self.certificate
    }

    /// Decoded DER bytes.
    pub fn certificate_der(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.certificate)
    }

    /// Hex SHA-256 over the DER certificate, for logs and key matching.
    pub fn thumbprint(&self) -> Option<String> {
        let der = self.certificate_der().ok()?;
        Some(hex::encode(Sha256::digest(der)))
    }
}

/// What the relying party needs to know about the STS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederationMetadata {
    /// `entityID` of the metadata document, when present.
    pub entity_id: Option<String>,
    /// Passive requestor endpoint that receives `wsignin1.0` redirects.
    pub sign_in_endpoint: Url,
    /// Certificates the STS signs tokens with.
    pub signing_keys: Vec<SigningKey>,
}

/// Parse a WS-Federation metadata document.
///
/// Reads the `PassiveRequestorEndpoint` address and the signing
/// `KeyDescriptor`s (those with `use="signing"` or no `use`) of the
/// `SecurityTokenServiceType` role descriptor.
pub fn parse_federation_metadata(document: &[u8]) -> Result<FederationMetadata, MetadataError> {
    let xml = std::str::from_utf8(document)
        .map_err(|e| MetadataError::Parse(format!("document is not UTF-8: {e}")))?;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entity_id = None;
    let mut endpoint: Option<String> = None;
    let mut keys: Vec<SigningKey> = Vec::new();

    let mut in_sts_role = false;
    let mut in_signing_key = false;
    let mut in_certificate = false;
    let mut in_passive_endpoint = false;
    let mut in_address = false;
    let mut text = String::new();
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                saw_root = true;
                match e.local_name().as_ref() {
                    b"EntityDescriptor" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.local_name().as_ref() == b"entityID" {
                                entity_id = attr.unescape_value().ok().map(|v| v.to_string());
                            }
                        }
                    }
                    b"RoleDescriptor" => {
                        in_sts_role = e.attributes().flatten().any(|attr| {
                            attr.key.local_name().as_ref() == b"type"
                                && attr
                                    .unescape_value()
                                    .map(|v| v.ends_with("SecurityTokenServiceType"))
                                    .unwrap_or(false)
                        });
                    }
                    b"KeyDescriptor" if in_sts_role => {
                        in_signing_key = e
                            .attributes()
                            .flatten()
                            .find(|attr| attr.key.local_name().as_ref() == b"use")
                            .map(|attr| {
                                attr.unescape_value()
                                    .map(|v| v == "signing")
                                    .unwrap_or(false)
                            })
                            .unwrap_or(true);
                    }
                    b"X509Certificate" if in_signing_key => {
                        in_certificate = true;
                        text.clear();
                    }
                    b"PassiveRequestorEndpoint" if in_sts_role => in_passive_endpoint = true,
                    b"Address" if in_passive_endpoint => {
                        in_address = true;
                        text.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(_)) => saw_root = true,
            Ok(Event::Text(e)) => {
                if in_certificate || in_address {
                    let value = e
                        .unescape()
                        .map_err(|e| MetadataError::Parse(e.to_string()))?;
                    text.push_str(&value);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"RoleDescriptor" => in_sts_role = false,
                b"KeyDescriptor" => in_signing_key = false,
                b"X509Certificate" if in_certificate => {
                    in_certificate = false;
                    let key = SigningKey::from_base64(&text);
                    if !key.certificate_base64().is_empty() && !keys.contains(&key) {
                        keys.push(key);
                    }
                }
                b"PassiveRequestorEndpoint" => in_passive_endpoint = false,
                b"Address" if in_address => {
                    in_address = false;
                    if endpoint.is_none() && !text.trim().is_empty() {
                        endpoint = Some(text.trim().to_string());
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(MetadataError::Parse(e.to_string())),
            _ => {}
        }
    }

    if !saw_root {
        return Err(MetadataError::Parse("document has no root element".to_string()));
    }

    let endpoint = endpoint.ok_or(MetadataError::MissingEndpoint)?;
    let sign_in_endpoint =
        Url::parse(&endpoint).map_err(|_| MetadataError::InvalidEndpoint(endpoint.clone()))?;

    Ok(FederationMetadata {
        entity_id,
        sign_in_endpoint,
        signing_keys: keys,
    })
}

/// Source of raw metadata documents.
#[async_trait]
pub trait MetadataTransport: Send + Sync {
    async fn fetch(&self, address: &str) -> Result<Vec<u8>, MetadataError>;
}

/// Fetches metadata over HTTP(S).
#[cfg(feature = "http-metadata")]
pub struct HttpMetadataTransport {
    http_client: reqwest::Client,
    require_https: bool,
}

#[cfg(feature = "http-metadata")]
impl HttpMetadataTransport {
    /// Create a transport whose requests give up after `timeout`.
    pub fn new(timeout: Duration, require_https: bool) -> Result<Self, MetadataError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MetadataError::Fetch {
                address: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self::with_client(http_client, require_https))
    }

    /// Create a transport with a custom HTTP client.
    pub fn with_client(http_client: reqwest::Client, require_https: bool) -> Self {
        Self {
            http_client,
            require_https,
        }
    }
}

#[cfg(feature = "http-metadata")]
#[async_trait]
impl MetadataTransport for HttpMetadataTransport {
    async fn fetch(&self, address: &str) -> Result<Vec<u8>, MetadataError> {
        let url = Url::parse(address).map_err(|e| MetadataError::Fetch {
            address: address.to_string(),
            message: format!("invalid address: {e}"),
        })?;
        if self.require_https && url.scheme() != "https" {
            return Err(MetadataError::InsecureAddress(address.to_string()));
        }

        let response = self.http_client.get(url).send().await.map_err(|e| {
            tracing::error!(error = %e, address = %address, "Failed to fetch federation metadata");
            MetadataError::Fetch {
                address: address.to_string(),
                message: e.to_string(),
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::error!(status = %status, address = %address, "Federation metadata endpoint returned error");
            return Err(MetadataError::Status {
                address: address.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| MetadataError::Fetch {
            address: address.to_string(),
            message: format!("failed to read body: {e}"),
        })?;
        Ok(body.to_vec())
    }
}

/// Serves documents supplied up front, for offline and test configurations.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadataTransport {
    documents: HashMap<String, Vec<u8>>,
    fallback: Option<Vec<u8>>,
}

impl StaticMetadataTransport {
    /// Serve `document` for every address.
    pub fn new(document: impl Into<Vec<u8>>) -> Self {
        Self {
            documents: HashMap::new(),
            fallback: Some(document.into()),
        }
    }

    /// Serve `document` for one specific address.
    pub fn with_document(mut self, address: impl Into<String>, document: impl Into<Vec<u8>>) -> Self {
        self.documents.insert(address.into(), document.into());
        self
    }
}

#[async_trait]
impl MetadataTransport for StaticMetadataTransport {
    async fn fetch(&self, address: &str) -> Result<Vec<u8>, MetadataError> {
        self.documents
            .get(address)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| MetadataError::Fetch {
                address: address.to_string(),
                message: "no document configured for address".to_string(),
            })
    }
}

type MetadataResult = Result<Arc<FederationMetadata>, MetadataError>;
type SharedFetch = Shared<BoxFuture<'static, MetadataResult>>;

struct CachedMetadata {
    metadata: Arc<FederationMetadata>,
    fetched_at: Instant,
}

/// Caches federation metadata per address.
///
/// Reads of a fresh entry never wait on a lock held across I/O. A miss
/// starts at most one fetch per address; callers arriving while it runs
/// await the same future. Failures are returned to every waiter and are not
/// cached, so the next call fetches again.
pub struct MetadataResolver {
    transport: Arc<dyn MetadataTransport>,
    ttl: Duration,
    entries: Arc<DashMap<String, CachedMetadata>>,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
}

impl MetadataResolver {
    pub fn new(transport: Arc<dyn MetadataTransport>, ttl: Duration) -> Self {
        Self {
            transport,
            ttl,
            entries: Arc::new(DashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve metadata for `address`, fetching it on a miss or after expiry.
    pub async fn resolve(&self, address: &str) -> MetadataResult {
        if let Some(metadata) = self.cached(address) {
            return Ok(metadata);
        }

        let fetch = {
            let mut in_flight = self.in_flight.lock();
            // A fetch may have completed between the first check and the lock.
            if let Some(metadata) = self.cached(address) {
                return Ok(metadata);
            }
            in_flight
                .entry(address.to_string())
                .or_insert_with(|| self.start_fetch(address))
                .clone()
        };

        let result = fetch.clone().await;

        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(address)
            .is_some_and(|current| current.ptr_eq(&fetch))
        {
            in_flight.remove(address);
        }

        result
    }

    /// Resolve, giving up after `deadline`.
    ///
    /// An abandoned fetch keeps its slot, so the next caller resumes it
    /// instead of starting another.
    pub async fn resolve_with_timeout(&self, address: &str, deadline: Duration) -> MetadataResult {
        tokio::time::timeout(deadline, self.resolve(address))
            .await
            .map_err(|_| MetadataError::Timeout(address.to_string()))?
    }

    /// Drop the cached entry so the next resolve fetches again.
    pub fn invalidate(&self, address: &str) {
        if self.entries.remove(address).is_some() {
            tracing::debug!(address = %address, "Invalidated federation metadata");
        }
    }

    fn cached(&self, address: &str) -> Option<Arc<FederationMetadata>> {
        let entry = self.entries.get(address)?;
        (entry.fetched_at.elapsed() < self.ttl).then(|| Arc::clone(&entry.metadata))
    }

    fn start_fetch(&self, address: &str) -> SharedFetch {
        let transport = Arc::clone(&self.transport);
        let entries = Arc::clone(&self.entries);
        let address = address.to_string();

        async move {
            tracing::debug!(address = %address, "Fetching federation metadata");

            let document = transport.fetch(&address).await?;
            let metadata = parse_federation_metadata(&document).map_err(|e| {
                tracing::error!(error = %e, address = %address, "Failed to parse federation metadata");
                e
            })?;
            let metadata = Arc::new(metadata);

            tracing::info!(
                address = %address,
                endpoint = %metadata.sign_in_endpoint,
                signing_keys = metadata.signing_keys.len(),
                "Resolved federation metadata"
            );

            entries.insert(
                address,
                CachedMetadata {
                    metadata: Arc::clone(&metadata),
                    fetched_at: Instant::now(),
                },
            );
            Ok(metadata)
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    pub(crate) const STS_CERT: &str = "MIIBszCCAVmgAwIBAgIUTestCertificateForFederationMetadata";

    pub(crate) fn metadata_document(endpoint: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<EntityDescriptor ID="_1" entityID="https://sts.example/" xmlns="urn:oasis:names:tc:SAML:2.0:metadata">
  <ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
    <ds:KeyInfo><ds:X509Data><ds:X509Certificate>DOCUMENTSIGNATURECERT</ds:X509Certificate></ds:X509Data></ds:KeyInfo>
  </ds:Signature>
  <RoleDescriptor xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:fed="http://docs.oasis-open.org/wsfed/federation/200706" xsi:type="fed:ApplicationServiceType" protocolSupportEnumeration="http://docs.oasis-open.org/wsfed/federation/200706">
    <KeyDescriptor use="signing"><KeyInfo xmlns="http://www.w3.org/2000/09/xmldsig#"><X509Data><X509Certificate>APPLICATIONROLECERT</X509Certificate></X509Data></KeyInfo></KeyDescriptor>
    <fed:PassiveRequestorEndpoint><wsa:EndpointReference xmlns:wsa="http://www.w3.org/2005/08/addressing"><wsa:Address>https://wrong.example/app</wsa:Address></wsa:EndpointReference></fed:PassiveRequestorEndpoint>
  </RoleDescriptor>
  <RoleDescriptor xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:fed="http://docs.oasis-open.org/wsfed/federation/200706" xsi:type="fed:SecurityTokenServiceType" protocolSupportEnumeration="http://docs.oasis-open.org/wsfed/federation/200706">
    <KeyDescriptor use="signing">
      <KeyInfo xmlns="http://www.w3.org/2000/09/xmldsig#">
        <X509Data>
          <X509Certificate>
            {STS_CERT}
          </X509Certificate>
        </X509Data>
      </KeyInfo>
    </KeyDescriptor>
    <KeyDescriptor use="encryption"><KeyInfo xmlns="http://www.w3.org/2000/09/xmldsig#"><X509Data><X509Certificate>ENCRYPTIONCERT</X509Certificate></X509Data></KeyInfo></KeyDescriptor>
    <KeyDescriptor><KeyInfo xmlns="http://www.w3.org/2000/09/xmldsig#"><X509Data><X509Certificate>{STS_CERT}</X509Certificate></X509Data></KeyInfo></KeyDescriptor>
    <fed:PassiveRequestorEndpoint>
      <wsa:EndpointReference xmlns:wsa="http://www.w3.org/2005/08/addressing">
        <wsa:Address>{endpoint}</wsa:Address>
      </wsa:EndpointReference>
    </fed:PassiveRequestorEndpoint>
  </RoleDescriptor>
</EntityDescriptor>"#
        )
    }

    /// Transport that counts fetches and can be slowed down.
    pub(crate) struct CountingTransport {
        pub document: Result<String, MetadataError>,
        pub delay: Duration,
        pub fetches: AtomicUsize,
    }

    impl CountingTransport {
        pub fn new(document: String) -> Self {
            Self {
                document: Ok(document),
                delay: Duration::ZERO,
                fetches: AtomicUsize::new(0),
            }
        }

        pub fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MetadataTransport for CountingTransport {
        async fn fetch(&self, _address: &str) -> Result<Vec<u8>, MetadataError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.document.clone().map(String::into_bytes)
        }
    }

    #[test]
    fn test_parse_metadata() {
        let metadata =
            parse_federation_metadata(metadata_document("https://sts.example/wsfed").as_bytes())
                .unwrap();

        assert_eq!(metadata.entity_id.as_deref(), Some("https://sts.example/"));
        assert_eq!(metadata.sign_in_endpoint.as_str(), "https://sts.example/wsfed");
        assert_eq!(metadata.signing_keys, vec![SigningKey::from_base64(STS_CERT)]);
    }

    #[test]
    fn test_parse_metadata_without_endpoint() {
        let document = r#"<EntityDescriptor entityID="x" xmlns="urn:oasis:names:tc:SAML:2.0:metadata"><RoleDescriptor xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="fed:SecurityTokenServiceType"/></EntityDescriptor>"#;
        assert_eq!(
            parse_federation_metadata(document.as_bytes()),
            Err(MetadataError::MissingEndpoint)
        );
    }

    #[test]
    fn test_parse_metadata_relative_endpoint() {
        let document = metadata_document("/wsfed");
        assert!(matches!(
            parse_federation_metadata(document.as_bytes()),
            Err(MetadataError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            parse_federation_metadata(b"<EntityDescriptor><RoleDescriptor></EntityDescriptor>"),
            Err(MetadataError::Parse(_))
        ));
        assert!(matches!(
            parse_federation_metadata(b"not metadata"),
            Err(MetadataError::Parse(_))
        ));
        assert!(matches!(
            parse_federation_metadata(&[0xff, 0xfe, 0x00]),
            Err(MetadataError::Parse(_))
        ));
    }

    #[test]
    fn test_signing_key_thumbprint() {
        let key = SigningKey::from_base64("AQID");
        assert_eq!(key.certificate_der().unwrap(), vec![1, 2, 3]);
        assert_eq!(
            key.thumbprint().as_deref(),
            Some("039058c6f2c0cb492c533b0a4d14ef77cc0f78abccced5287d84a1a2011cfb81")
        );
    }

    #[tokio::test]
    async fn test_second_resolve_uses_cache() {
        let transport = Arc::new(CountingTransport::new(metadata_document(
            "https://sts.example/wsfed",
        )));
        let resolver = MetadataResolver::new(transport.clone(), Duration::from_secs(3600));

        let first = resolver.resolve("https://sts.example/metadata").await.unwrap();
        let second = resolver.resolve("https://sts.example/metadata").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(transport.fetches(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let transport = Arc::new(CountingTransport::new(metadata_document(
            "https://sts.example/wsfed",
        )));
        let resolver = MetadataResolver::new(transport.clone(), Duration::from_secs(3600));

        resolver.resolve("addr").await.unwrap();
        resolver.invalidate("addr");
        resolver.resolve("addr").await.unwrap();

        assert_eq!(transport.fetches(), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_refetched() {
        let transport = Arc::new(CountingTransport::new(metadata_document(
            "https://sts.example/wsfed",
        )));
        let resolver = MetadataResolver::new(transport.clone(), Duration::ZERO);

        resolver.resolve("addr").await.unwrap();
        resolver.resolve("addr").await.unwrap();

        assert_eq!(transport.fetches(), 2);
    }

    #[tokio::test]
    async fn test_addresses_cached_independently() {
        let transport = Arc::new(CountingTransport::new(metadata_document(
            "https://sts.example/wsfed",
        )));
        let resolver = MetadataResolver::new(transport.clone(), Duration::from_secs(3600));

        resolver.resolve("a").await.unwrap();
        resolver.resolve("b").await.unwrap();
        resolver.resolve("a").await.unwrap();

        assert_eq!(transport.fetches(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_share_one_fetch() {
        let mut transport = CountingTransport::new(metadata_document("https://sts.example/wsfed"));
        transport.delay = Duration::from_millis(50);
        let transport = Arc::new(transport);
        let resolver = Arc::new(MetadataResolver::new(
            transport.clone(),
            Duration::from_secs(3600),
        ));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                tokio::spawn(async move { resolver.resolve("https://sts.example/md").await })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            let metadata = result.unwrap().unwrap();
            assert_eq!(metadata.sign_in_endpoint.as_str(), "https://sts.example/wsfed");
        }
        assert_eq!(transport.fetches(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_shared_and_not_cached() {
        let transport = Arc::new(CountingTransport {
            document: Err(MetadataError::Fetch {
                address: "addr".to_string(),
                message: "connection refused".to_string(),
            }),
            delay: Duration::from_millis(50),
            fetches: AtomicUsize::new(0),
        });
        let resolver = Arc::new(MetadataResolver::new(
            transport.clone(),
            Duration::from_secs(3600),
        ));

        let results = futures::future::join_all((0..8).map(|_| {
            let resolver = Arc::clone(&resolver);
            async move { resolver.resolve("addr").await }
        }))
        .await;

        assert!(results.iter().all(|r| matches!(r, Err(MetadataError::Fetch { .. }))));
        assert_eq!(transport.fetches(), 1);

        // Failures are not cached
        assert!(resolver.resolve("addr").await.is_err());
        assert_eq!(transport.fetches(), 2);
    }

    #[tokio::test]
    async fn test_resolve_with_timeout() {
        let mut transport = CountingTransport::new(metadata_document("https://sts.example/wsfed"));
        transport.delay = Duration::from_millis(200);
        let transport = Arc::new(transport);
        let resolver = MetadataResolver::new(transport.clone(), Duration::from_secs(3600));

        let result = resolver
            .resolve_with_timeout("addr", Duration::from_millis(10))
            .await;
        assert_eq!(result, Err(MetadataError::Timeout("addr".to_string())));

        // The abandoned fetch is resumed rather than restarted
        resolver.resolve("addr").await.unwrap();
        assert_eq!(transport.fetches(), 1);
    }

    #[tokio::test]
    async fn test_static_transport() {
        let transport = StaticMetadataTransport::new("fallback").with_document("a", "specific");
        assert_eq!(transport.fetch("a").await.unwrap(), b"specific".to_vec());
        assert_eq!(transport.fetch("b").await.unwrap(), b"fallback".to_vec());
        assert!(StaticMetadataTransport::default().fetch("a").await.is_err());
    }

    #[cfg(feature = "http-metadata")]
    mod http {
        use wiremock::{
            Mock, MockServer, ResponseTemplate,
            matchers::{method, path},
        };

        use super::*;

        #[tokio::test]
        async fn test_http_transport_fetches_document() {
            let server = MockServer::start().await;
            let document = metadata_document("https://sts.example/wsfed");
            Mock::given(method("GET"))
                .and(path("/FederationMetadata/2007-06/FederationMetadata.xml"))
                .respond_with(ResponseTemplate::new(200).set_body_string(document.clone()))
                .expect(1)
                .mount(&server)
                .await;

            let transport = HttpMetadataTransport::new(Duration::from_secs(5), false).unwrap();
            let resolver = MetadataResolver::new(Arc::new(transport), Duration::from_secs(60));
            let address = format!(
                "{}/FederationMetadata/2007-06/FederationMetadata.xml",
                server.uri()
            );

            let metadata = resolver.resolve(&address).await.unwrap();
            resolver.resolve(&address).await.unwrap();
            assert_eq!(metadata.sign_in_endpoint.as_str(), "https://sts.example/wsfed");
        }

        #[tokio::test]
        async fn test_http_transport_error_status() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(503))
                .mount(&server)
                .await;

            let transport = HttpMetadataTransport::new(Duration::from_secs(5), false).unwrap();
            let result = transport.fetch(&server.uri()).await;
            assert!(matches!(result, Err(MetadataError::Status { status: 503, .. })));
        }

        #[tokio::test]
        async fn test_http_transport_requires_https() {
            let transport = HttpMetadataTransport::new(Duration::from_secs(5), true).unwrap();
            let result = transport.fetch("http://sts.example/metadata").await;
            assert_eq!(
                result,
                Err(MetadataError::InsecureAddress(
                    "http://sts.example/metadata".to_string()
                ))
            );
        }
    }
}
