//! WS-Federation passive protocol messages.
//!
//! A message is an ordered list of `name=value` parameters. The core reads a
//! handful of them (`wa`, `wtrealm`, `wreply`, `wctx`, `wresult`); anything
//! else is carried through untouched so event hooks can inspect or append
//! parameters the protocol does not define.

use quick_xml::{Reader, events::Event};
use url::{Url, form_urlencoded};

/// `wa` value of a sign-in request or response.
pub const WA_SIGN_IN: &str = "wsignin1.0";
/// `wa` value of a sign-out request.
pub const WA_SIGN_OUT: &str = "wsignout1.0";
/// `wa` value of an STS-initiated sign-out cleanup.
pub const WA_SIGN_OUT_CLEANUP: &str = "wsignoutcleanup1.0";

/// Parameter names defined by the passive requestor profile.
pub mod params {
    pub const WA: &str = "wa";
    pub const WTREALM: &str = "wtrealm";
    pub const WREPLY: &str = "wreply";
    pub const WCTX: &str = "wctx";
    pub const WRESULT: &str = "wresult";
}

/// Errors raised while reading the security token out of `wresult`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("wresult parameter is missing")]
    MissingResult,

    #[error("wresult does not contain a RequestedSecurityToken")]
    MissingToken,

    #[error("wresult is not well-formed XML: {0}")]
    MalformedXml(String),
}

/// A WS-Federation protocol message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WsFederationMessage {
    parameters: Vec<(String, String)>,
}

impl WsFederationMessage {
    /// An empty message with no parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// A message with `wa=wsignin1.0`.
    pub fn sign_in() -> Self {
        let mut message = Self::new();
        message.set(params::WA, WA_SIGN_IN);
        message
    }

    /// A message with `wa=wsignout1.0`.
    pub fn sign_out() -> Self {
        let mut message = Self::new();
        message.set(params::WA, WA_SIGN_OUT);
        message
    }

    /// Parse a request from a URL query string (leading `?` optional).
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self::from_form(query.as_bytes())
    }

    /// Parse a response from an `application/x-www-form-urlencoded` body.
    pub fn from_form(body: &[u8]) -> Self {
        Self {
            parameters: form_urlencoded::parse(body).into_owned().collect(),
        }
    }

    /// Build a message from already-decoded pairs, preserving their order.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            parameters: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// First value of a parameter.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set a parameter, replacing every existing value with the same name.
    ///
    /// The parameter keeps the position of its first occurrence.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.parameters.iter().position(|(k, _)| k == name) {
            Some(index) => {
                self.parameters[index].1 = value;
                let mut seen = false;
                self.parameters.retain(|(k, _)| {
                    if k != name {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None => self.parameters.push((name.to_string(), value)),
        }
    }

    /// Remove a parameter, returning its first value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let first = self.get(name).map(str::to_string);
        self.parameters.retain(|(k, _)| k != name);
        first
    }

    /// All parameters in wire order.
    pub fn parameters(&self) -> impl Iterator<Item = (&str, &str)> {
        self.parameters
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn wa(&self) -> Option<&str> {
        self.get(params::WA)
    }

    pub fn wtrealm(&self) -> Option<&str> {
        self.get(params::WTREALM)
    }

    pub fn set_wtrealm(&mut self, realm: impl Into<String>) {
        self.set(params::WTREALM, realm);
    }

    pub fn wreply(&self) -> Option<&str> {
        self.get(params::WREPLY)
    }

    pub fn set_wreply(&mut self, reply: impl Into<String>) {
        self.set(params::WREPLY, reply);
    }

    pub fn wctx(&self) -> Option<&str> {
        self.get(params::WCTX)
    }

    pub fn set_wctx(&mut self, wctx: impl Into<String>) {
        self.set(params::WCTX, wctx);
    }

    pub fn wresult(&self) -> Option<&str> {
        self.get(params::WRESULT)
    }

    /// True iff `wa` is exactly `wsignin1.0`.
    pub fn is_sign_in_message(&self) -> bool {
        self.wa() == Some(WA_SIGN_IN)
    }

    /// True iff `wa` is `wsignout1.0` or `wsignoutcleanup1.0`.
    pub fn is_sign_out_message(&self) -> bool {
        matches!(self.wa(), Some(WA_SIGN_OUT) | Some(WA_SIGN_OUT_CLEANUP))
    }

    /// Serialize as a form-urlencoded query string (no leading `?`).
    pub fn to_query_string(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.parameters.iter())
            .finish()
    }

    /// Append every parameter to the STS endpoint, keeping any query it already has.
    pub fn to_redirect_url(&self, issuer_address: &Url) -> Url {
        let mut url = issuer_address.clone();
        if !self.parameters.is_empty() {
            url.query_pairs_mut().extend_pairs(self.parameters.iter());
        }
        url
    }

    /// Extract the serialized security token carried in `wresult`.
    ///
    /// The usual shape is a `RequestSecurityTokenResponse` (possibly wrapped
    /// in a `RequestSecurityTokenResponseCollection`) whose
    /// `RequestedSecurityToken` child holds the token. A `wresult` without an
    /// RSTR wrapper is treated as the token itself.
    pub fn security_token(&self) -> Result<String, MessageError> {
        let wresult = self
            .wresult()
            .filter(|w| !w.trim().is_empty())
            .ok_or(MessageError::MissingResult)?;
        extract_requested_token(wresult)
    }
}

fn extract_requested_token(wresult: &str) -> Result<String, MessageError> {
    let mut reader = Reader::from_str(wresult);

    let mut depth = 0usize;
    let mut saw_element = false;
    let mut saw_rstr = false;
    let mut token_start: Option<(usize, usize)> = None;
    let mut token: Option<String> = None;

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                saw_element = true;
                match e.local_name().as_ref() {
                    b"RequestSecurityTokenResponse" => saw_rstr = true,
                    b"RequestedSecurityToken" if token.is_none() && token_start.is_none() => {
                        token_start = Some((reader.buffer_position() as usize, depth));
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                saw_element = true;
                if e.local_name().as_ref() == b"RequestSecurityTokenResponse" {
                    saw_rstr = true;
                }
            }
            Ok(Event::End(e)) => {
                if let Some((start, token_depth)) = token_start
                    && token_depth == depth
                    && e.local_name().as_ref() == b"RequestedSecurityToken"
                {
                    let inner = wresult[start..before].trim();
                    if !inner.is_empty() {
                        token = Some(inner.to_string());
                    }
                    token_start = None;
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(MessageError::MalformedXml(e.to_string())),
            _ => {}
        }
    }

    if !saw_element {
        return Err(MessageError::MalformedXml("no root element".to_string()));
    }
    if depth != 0 {
        return Err(MessageError::MalformedXml(
            "unexpected end of document".to_string(),
        ));
    }

    match token {
        Some(token) => Ok(token),
        None if saw_rstr => Err(MessageError::MissingToken),
        None => Ok(wresult.trim().to_string()),
    }
}
