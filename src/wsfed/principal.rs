//! Claims-based identity model.
//!
//! A [`Principal`] is what a successful sign-in hands to the session layer:
//! one [`ClaimsIdentity`] per subject the token asserted. Identities are kept
//! apart so the caller can decide which one it trusts.

use serde::{Deserialize, Serialize};

/// Well-known claim type URIs.
pub mod claim_types {
    pub const NAME: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name";
    pub const NAME_IDENTIFIER: &str =
        "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier";
    pub const EMAIL: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress";
    pub const ROLE: &str = "http://schemas.microsoft.com/ws/2008/06/identity/claims/role";
    pub const AUTHENTICATION_METHOD: &str =
        "http://schemas.microsoft.com/ws/2008/06/identity/claims/authenticationmethod";
    pub const AUTHENTICATION_INSTANT: &str =
        "http://schemas.microsoft.com/ws/2008/06/identity/claims/authenticationinstant";
}

/// XML Schema string, the value type of most claims.
pub const STRING_VALUE_TYPE: &str = "http://www.w3.org/2001/XMLSchema#string";

/// Issuer recorded on claims whose token named none.
pub const LOCAL_AUTHORITY: &str = "LOCAL AUTHORITY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_type: String,
    pub value: String,
    pub value_type: String,
    pub issuer: String,
}

impl Claim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
            value_type: STRING_VALUE_TYPE.to_string(),
            issuer: LOCAL_AUTHORITY.to_string(),
        }
    }

    pub fn with_value_type(mut self, value_type: impl Into<String>) -> Self {
        self.value_type = value_type.into();
        self
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }
}

/// An ordered set of claims about one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsIdentity {
    pub authentication_type: String,
    pub name_claim_type: String,
    pub role_claim_type: String,
    pub claims: Vec<Claim>,
}

impl ClaimsIdentity {
    pub fn new(
        authentication_type: impl Into<String>,
        name_claim_type: impl Into<String>,
        role_claim_type: impl Into<String>,
    ) -> Self {
        Self {
            authentication_type: authentication_type.into(),
            name_claim_type: name_claim_type.into(),
            role_claim_type: role_claim_type.into(),
            claims: Vec::new(),
        }
    }

    pub fn with_claims(mut self, claims: impl IntoIterator<Item = Claim>) -> Self {
        self.claims.extend(claims);
        self
    }

    pub fn add_claim(&mut self, claim: Claim) {
        self.claims.push(claim);
    }

    pub fn is_authenticated(&self) -> bool {
        !self.authentication_type.is_empty()
    }

    pub fn find_first(&self, claim_type: &str) -> Option<&Claim> {
        self.claims.iter().find(|c| c.claim_type == claim_type)
    }

    pub fn find_all<'a>(&'a self, claim_type: &'a str) -> impl Iterator<Item = &'a Claim> + 'a {
        self.claims.iter().filter(move |c| c.claim_type == claim_type)
    }

    pub fn has_claim(&self, claim_type: &str, value: &str) -> bool {
        self.find_all(claim_type).any(|c| c.value == value)
    }

    /// Value of the first claim of the identity's name claim type.
    pub fn name(&self) -> Option<&str> {
        self.find_first(&self.name_claim_type)
            .map(|c| c.value.as_str())
    }

    /// Values of every claim of the identity's role claim type.
    pub fn roles(&self) -> Vec<&str> {
        self.find_all(&self.role_claim_type)
            .map(|c| c.value.as_str())
            .collect()
    }
}

/// The authenticated result of a sign-in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub identities: Vec<ClaimsIdentity>,
}

impl Principal {
    pub fn new(identities: Vec<ClaimsIdentity>) -> Self {
        Self { identities }
    }

    /// The first identity, which carries the sign-in subject.
    pub fn primary_identity(&self) -> Option<&ClaimsIdentity> {
        self.identities.first()
    }

    pub fn add_identity(&mut self, identity: ClaimsIdentity) {
        self.identities.push(identity);
    }

    /// Claims across every identity, in identity order.
    pub fn claims(&self) -> impl Iterator<Item = &Claim> {
        self.identities.iter().flat_map(|i| i.claims.iter())
    }

    pub fn find_first(&self, claim_type: &str) -> Option<&Claim> {
        self.claims().find(|c| c.claim_type == claim_type)
    }

    pub fn name(&self) -> Option<&str> {
        self.primary_identity().and_then(ClaimsIdentity::name)
    }

    pub fn is_in_role(&self, role: &str) -> bool {
        self.identities
            .iter()
            .any(|i| i.has_claim(&i.role_claim_type, role))
    }
}
