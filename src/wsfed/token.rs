//! Security token validation.
//!
//! The relying party never trusts `wresult` on its own. A [`TokenValidator`]
//! turns the token XML into claims, or refuses it. The bundled
//! [`AssertionTokenValidator`] reads SAML 1.1 and SAML 2.0 assertions and
//! enforces lifetime and audience, leaving XML-signature verification to a
//! pluggable [`SignatureVerifier`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};

use super::{
    metadata::SigningKey,
    principal::{Claim, LOCAL_AUTHORITY, STRING_VALUE_TYPE, claim_types},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenValidationError {
    #[error("no signing keys available to validate the token")]
    NoSigningKeys,

    #[error("token signature is invalid: {0}")]
    Signature(String),

    #[error("token is malformed: {0}")]
    Malformed(String),

    #[error("unsupported token type: {0}")]
    Unsupported(String),

    #[error("token is not valid before {not_before}")]
    NotYetValid { not_before: DateTime<Utc> },

    #[error("token expired at {not_on_or_after}")]
    Expired { not_on_or_after: DateTime<Utc> },

    #[error("token audience {found:?} does not include {expected}")]
    AudienceMismatch {
        expected: String,
        found: Vec<String>,
    },

    #[error("token does not name a subject")]
    MissingSubject,
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Everything a validator needs besides the token itself.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    /// Expected audience, the relying party realm.
    pub audience: String,
    /// Token-signing certificates from federation metadata.
    pub signing_keys: Vec<SigningKey>,
    pub now: DateTime<Utc>,
    pub clock_skew: chrono::Duration,
}

/// Claims about one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectClaims {
    pub subject: String,
    pub claims: Vec<Claim>,
}

/// Claims extracted from an accepted token, grouped by subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedToken {
    pub issuer: Option<String>,
    pub identities: Vec<SubjectClaims>,
}

impl ValidatedToken {
    /// Every claim in token order.
    pub fn claims(&self) -> impl Iterator<Item = &Claim> {
        self.identities.iter().flat_map(|i| i.claims.iter())
    }
}

/// Validates a security token and extracts its claims.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(
        &self,
        token: &str,
        context: &ValidationContext,
    ) -> Result<ValidatedToken, TokenValidationError>;
}

/// Verifies the XML signature of a token against the STS signing keys.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, token: &str, keys: &[SigningKey]) -> Result<(), TokenValidationError>;
}

/// Validator for SAML 1.1 and SAML 2.0 assertions.
pub struct AssertionTokenValidator<S> {
    verifier: S,
}

impl<S: SignatureVerifier> AssertionTokenValidator<S> {
    pub fn new(verifier: S) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl<S: SignatureVerifier> TokenValidator for AssertionTokenValidator<S> {
    async fn validate(
        &self,
        token: &str,
        context: &ValidationContext,
    ) -> Result<ValidatedToken, TokenValidationError> {
        if context.signing_keys.is_empty() {
            return Err(TokenValidationError::NoSigningKeys);
        }
        self.verifier.verify(token, &context.signing_keys)?;

        let assertion = parse_assertion(token)?;
        assertion.check_lifetime(context.now, context.clock_skew)?;
        assertion.check_audience(&context.audience)?;

        tracing::debug!(
            version = ?assertion.version,
            issuer = ?assertion.issuer,
            identities = assertion.identities.len(),
            "Assertion accepted"
        );

        Ok(assertion.into_validated())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Assertion parsing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionVersion {
    Saml11,
    Saml20,
}

#[derive(Debug)]
struct ParsedAssertion {
    version: AssertionVersion,
    issuer: Option<String>,
    not_before: Option<DateTime<Utc>>,
    not_on_or_after: Option<DateTime<Utc>>,
    audiences: Vec<String>,
    identities: Vec<SubjectClaims>,
}

impl ParsedAssertion {
    fn check_lifetime(
        &self,
        now: DateTime<Utc>,
        skew: chrono::Duration,
    ) -> Result<(), TokenValidationError> {
        let latest = now.checked_add_signed(skew).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let earliest = now.checked_sub_signed(skew).unwrap_or(DateTime::<Utc>::MIN_UTC);
        if let Some(not_before) = self.not_before
            && latest < not_before
        {
            return Err(TokenValidationError::NotYetValid { not_before });
        }
        if let Some(not_on_or_after) = self.not_on_or_after
            && earliest >= not_on_or_after
        {
            return Err(TokenValidationError::Expired { not_on_or_after });
        }
        Ok(())
    }

    /// An assertion must be scoped to this relying party.
    fn check_audience(&self, expected: &str) -> Result<(), TokenValidationError> {
        if self.audiences.iter().any(|a| a == expected) {
            return Ok(());
        }
        Err(TokenValidationError::AudienceMismatch {
            expected: expected.to_string(),
            found: self.audiences.clone(),
        })
    }

    fn into_validated(self) -> ValidatedToken {
        let issuer = self.issuer.as_deref().unwrap_or(LOCAL_AUTHORITY).to_string();
        let identities = self
            .identities
            .into_iter()
            .map(|mut identity| {
                for claim in &mut identity.claims {
                    claim.issuer.clone_from(&issuer);
                }
                identity
            })
            .collect();
        ValidatedToken {
            issuer: self.issuer,
            identities,
        }
    }
}

#[derive(Default)]
struct Statement {
    subject: Option<String>,
    claims: Vec<Claim>,
}

#[derive(Default)]
struct AssertionReader {
    version: Option<AssertionVersion>,
    issuer: Option<String>,
    not_before: Option<DateTime<Utc>>,
    not_on_or_after: Option<DateTime<Utc>>,
    audiences: Vec<String>,
    identities: Vec<SubjectClaims>,
    path: Vec<String>,
    text: String,
    assertion_subject: Option<String>,
    statement: Option<Statement>,
    attribute_type: Option<String>,
    value_type: Option<String>,
}

fn malformed(e: impl std::fmt::Display) -> TokenValidationError {
    TokenValidationError::Malformed(e.to_string())
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, TokenValidationError> {
    for attr in e.attributes() {
        let attr = attr.map_err(malformed)?;
        if attr.key.local_name().as_ref() == name {
            return attr
                .unescape_value()
                .map(|v| Some(v.into_owned()))
                .map_err(malformed);
        }
    }
    Ok(None)
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, TokenValidationError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TokenValidationError::Malformed(format!("invalid instant {value:?}: {e}")))
}

/// `xs:int` style type names map onto the XML Schema namespace.
fn schema_value_type(xsi_type: &str) -> String {
    let local = xsi_type.rsplit(':').next().unwrap_or(xsi_type);
    format!("http://www.w3.org/2001/XMLSchema#{local}")
}

impl AssertionReader {
    fn open(&mut self, e: &BytesStart<'_>) -> Result<(), TokenValidationError> {
        let name = e.local_name();
        let name = name.as_ref();

        if self.path.is_empty() {
            if self.version.is_some() {
                return Err(TokenValidationError::Malformed(
                    "content after assertion".to_string(),
                ));
            }
            if name != b"Assertion" {
                return Err(TokenValidationError::Unsupported(
                    String::from_utf8_lossy(name).into_owned(),
                ));
            }
            if attribute(e, b"MajorVersion")?.as_deref() == Some("1") {
                self.version = Some(AssertionVersion::Saml11);
                self.issuer = attribute(e, b"Issuer")?;
            } else if attribute(e, b"Version")?.as_deref() == Some("2.0") {
                self.version = Some(AssertionVersion::Saml20);
            } else {
                return Err(TokenValidationError::Unsupported(
                    "assertion without a recognized version".to_string(),
                ));
            }
            return Ok(());
        }

        match name {
            b"Conditions" => {
                if let Some(value) = attribute(e, b"NotBefore")? {
                    self.not_before = Some(parse_instant(&value)?);
                }
                if let Some(value) = attribute(e, b"NotOnOrAfter")? {
                    self.not_on_or_after = Some(parse_instant(&value)?);
                }
            }
            b"AttributeStatement" | b"AuthenticationStatement" | b"AuthnStatement" => {
                let mut statement = Statement::default();
                if let Some(method) = attribute(e, b"AuthenticationMethod")? {
                    statement
                        .claims
                        .push(Claim::new(claim_types::AUTHENTICATION_METHOD, method));
                }
                let instant = match attribute(e, b"AuthenticationInstant")? {
                    Some(instant) => Some(instant),
                    None => attribute(e, b"AuthnInstant")?,
                };
                if let Some(instant) = instant {
                    statement.claims.push(
                        Claim::new(claim_types::AUTHENTICATION_INSTANT, instant)
                            .with_value_type("http://www.w3.org/2001/XMLSchema#dateTime"),
                    );
                }
                self.statement = Some(statement);
            }
            b"Attribute" if self.statement.is_some() => {
                let claim_type = match self.version {
                    Some(AssertionVersion::Saml11) => {
                        let attribute_name = attribute(e, b"AttributeName")?
                            .ok_or_else(|| malformed("Attribute without AttributeName"))?;
                        match attribute(e, b"AttributeNamespace")? {
                            Some(ns) if !ns.is_empty() => {
                                format!("{}/{attribute_name}", ns.trim_end_matches('/'))
                            }
                            _ => attribute_name,
                        }
                    }
                    _ => attribute(e, b"Name")?.ok_or_else(|| malformed("Attribute without Name"))?,
                };
                self.attribute_type = Some(claim_type);
            }
            b"AttributeValue" => {
                self.value_type = attribute(e, b"type")?.map(|t| schema_value_type(&t));
            }
            _ => {}
        }
        Ok(())
    }

    /// Handle the end of `name`; `self.path` no longer contains it.
    fn close(&mut self, name: &str) -> Result<(), TokenValidationError> {
        let parent = self.path.last().map(String::as_str);
        let text = std::mem::take(&mut self.text);
        let text = text.trim();

        match name {
            "Issuer" if parent == Some("Assertion") => {
                self.issuer = Some(text.to_string());
            }
            "Audience" => self.audiences.push(text.to_string()),
            "NameIdentifier" | "NameID" if parent == Some("Subject") => {
                let owner = self.path.iter().rev().nth(1).map(String::as_str);
                if owner == Some("Assertion") {
                    self.assertion_subject = Some(text.to_string());
                } else if let Some(statement) = &mut self.statement {
                    statement.subject = Some(text.to_string());
                }
            }
            "AuthnContextClassRef" => {
                if let Some(statement) = &mut self.statement {
                    statement
                        .claims
                        .push(Claim::new(claim_types::AUTHENTICATION_METHOD, text));
                }
            }
            "AttributeValue" => {
                if let (Some(statement), Some(claim_type)) =
                    (&mut self.statement, &self.attribute_type)
                {
                    let value_type = self
                        .value_type
                        .take()
                        .unwrap_or_else(|| STRING_VALUE_TYPE.to_string());
                    statement
                        .claims
                        .push(Claim::new(claim_type.clone(), text).with_value_type(value_type));
                }
            }
            "Attribute" => self.attribute_type = None,
            "AttributeStatement" | "AuthenticationStatement" | "AuthnStatement" => {
                if let Some(statement) = self.statement.take() {
                    let subject = statement
                        .subject
                        .or_else(|| self.assertion_subject.clone())
                        .ok_or(TokenValidationError::MissingSubject)?;
                    self.identity_for(&subject).claims.extend(statement.claims);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Claims for `subject`, created with its name identifier claim on first use.
    fn identity_for(&mut self, subject: &str) -> &mut SubjectClaims {
        let index = match self.identities.iter().position(|i| i.subject == subject) {
            Some(index) => index,
            None => {
                self.identities.push(SubjectClaims {
                    subject: subject.to_string(),
                    claims: vec![Claim::new(claim_types::NAME_IDENTIFIER, subject)],
                });
                self.identities.len() - 1
            }
        };
        &mut self.identities[index]
    }

    fn finish(mut self) -> Result<ParsedAssertion, TokenValidationError> {
        let version = self
            .version
            .ok_or_else(|| malformed("token has no root element"))?;
        if !self.path.is_empty() {
            return Err(malformed("token has unclosed elements"));
        }
        if self.identities.is_empty()
            && let Some(subject) = self.assertion_subject.take()
        {
            self.identity_for(&subject);
        }
        if self.identities.is_empty() {
            return Err(TokenValidationError::MissingSubject);
        }
        Ok(ParsedAssertion {
            version,
            issuer: self.issuer,
            not_before: self.not_before,
            not_on_or_after: self.not_on_or_after,
            audiences: self.audiences,
            identities: self.identities,
        })
    }
}

fn parse_assertion(token: &str) -> Result<ParsedAssertion, TokenValidationError> {
    let mut reader = Reader::from_str(token);
    reader.config_mut().trim_text(true);
    let mut state = AssertionReader::default();

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => {
                state.open(&e)?;
                state
                    .path
                    .push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                state.text.clear();
            }
            Event::Empty(e) => {
                state.open(&e)?;
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if state.path.is_empty() {
                    return Err(malformed("empty assertion"));
                }
                state.text.clear();
                state.close(&name)?;
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(malformed)?;
                state.text.push_str(&text);
            }
            Event::CData(t) => {
                state.text.push_str(&String::from_utf8_lossy(&t));
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                state.path.pop();
                state.close(&name)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    state.finish()
}
