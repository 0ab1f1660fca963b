//! Credential verification and privilege lookup.
//!
//! Tokens are HS256 JWTs issued elsewhere. The verifier only checks signature
//! and expiry; mapping role claims to privileges is a separate
//! [`PermissionChecker`] so a different policy source can be plugged in.

use std::collections::HashSet;

use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use arrows_core::ProtocolError;

/// Claims carried by an access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id. For researchers this is their `ResearcherId`.
    pub sub: String,
    /// Role claims such as `ROLE_RESEARCHER`.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
}

/// A verified caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Token subject.
    pub subject: String,
    /// Raw role claims.
    pub roles: Vec<String>,
}

/// What a caller may do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Privilege {
    /// May observe sessions they own.
    Researcher,
    /// May take a subject slot.
    Subject,
    /// May take a subject slot on any session.
    Admin,
}

impl Privilege {
    /// Map a role claim. Unknown claims grant nothing.
    pub fn from_role_claim(claim: &str) -> Option<Self> {
        match claim {
            "ROLE_RESEARCHER" => Some(Self::Researcher),
            "ROLE_SUBJECT" => Some(Self::Subject),
            "ROLE_ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Set of privileges granted to an identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrivilegeSet(HashSet<Privilege>);

impl PrivilegeSet {
    /// True if `privilege` is granted.
    pub fn contains(&self, privilege: Privilege) -> bool {
        self.0.contains(&privilege)
    }

    /// True if any of `privileges` is granted.
    pub fn contains_any(&self, privileges: &[Privilege]) -> bool {
        privileges.iter().any(|p| self.0.contains(p))
    }

    /// True if nothing is granted.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Privilege> for PrivilegeSet {
    fn from_iter<I: IntoIterator<Item = Privilege>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Turns presented credentials into an [`Identity`].
pub trait TokenVerifier: Send + Sync + 'static {
    /// Verify `token`. Every failure is an `Authentication` error.
    fn verify(&self, token: &str) -> Result<Identity, ProtocolError>;
}

/// Looks up what an identity may do.
pub trait PermissionChecker: Send + Sync + 'static {
    /// Privileges granted to `identity`.
    fn privileges(&self, identity: &Identity) -> PrivilegeSet;
}

/// HS256 verifier with a shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Verifier for `secret`, tolerating `leeway_secs` of clock skew on `exp`.
    pub fn new(secret: &str, leeway_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Identity, ProtocolError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation).map_err(
            |err| match err.kind() {
                JwtErrorKind::ExpiredSignature => ProtocolError::Authentication("token expired".into()),
                JwtErrorKind::InvalidSignature => {
                    ProtocolError::Authentication("invalid token signature".into())
                }
                _ => ProtocolError::Authentication(format!("invalid token: {err}")),
            },
        )?;
        Ok(Identity {
            subject: data.claims.sub,
            roles: data.claims.roles,
        })
    }
}

/// Grants privileges straight from the token's role claims.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoleClaimPermissions;

impl PermissionChecker for RoleClaimPermissions {
    fn privileges(&self, identity: &Identity) -> PrivilegeSet {
        identity
            .roles
            .iter()
            .filter_map(|claim| Privilege::from_role_claim(claim))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrows_core::ErrorKind;
    use jsonwebtoken::{EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn now() -> u64 {
        u64::try_from(chrono::Utc::now().timestamp()).unwrap()
    }

    fn token(secret: &str, roles: &[&str], exp: u64) -> String {
        let claims = Claims {
            sub: "researcher-1".into(),
            roles: roles.iter().map(|r| (*r).to_string()).collect(),
            exp,
        };
        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
            .unwrap()
    }

    #[test]
    fn valid_token_yields_identity() {
        let verifier = JwtVerifier::new(SECRET, 0);
        let identity = verifier
            .verify(&token(SECRET, &["ROLE_RESEARCHER"], now() + 600))
            .unwrap();
        assert_eq!(identity.subject, "researcher-1");
        assert_eq!(identity.roles, vec!["ROLE_RESEARCHER".to_string()]);
    }

    #[test]
    fn expired_token_is_rejected() {
        let verifier = JwtVerifier::new(SECRET, 0);
        let err = verifier
            .verify(&token(SECRET, &["ROLE_SUBJECT"], now() - 600))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(err.message().contains("expired"));
    }

    #[test]
    fn leeway_accepts_recently_expired() {
        let verifier = JwtVerifier::new(SECRET, 120);
        assert!(verifier.verify(&token(SECRET, &[], now() - 30)).is_ok());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let verifier = JwtVerifier::new(SECRET, 0);
        let err = verifier
            .verify(&token("other-secret", &["ROLE_ADMIN"], now() + 600))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[test]
    fn garbage_is_rejected() {
        let verifier = JwtVerifier::new(SECRET, 0);
        assert_eq!(verifier.verify("not.a.jwt").unwrap_err().kind(), ErrorKind::Authentication);
        assert_eq!(verifier.verify("").unwrap_err().kind(), ErrorKind::Authentication);
    }

    #[test]
    fn role_claims_map_to_privileges() {
        let identity = Identity {
            subject: "u".into(),
            roles: vec!["ROLE_ADMIN".into(), "ROLE_SUBJECT".into(), "ROLE_USER".into()],
        };
        let privileges = RoleClaimPermissions.privileges(&identity);
        assert!(privileges.contains(Privilege::Admin));
        assert!(privileges.contains(Privilege::Subject));
        assert!(!privileges.contains(Privilege::Researcher));
        assert!(privileges.contains_any(&[Privilege::Researcher, Privilege::Admin]));
    }

    #[test]
    fn no_claims_no_privileges() {
        let identity = Identity {
            subject: "u".into(),
            roles: vec![],
        };
        assert!(RoleClaimPermissions.privileges(&identity).is_empty());
    }
}
