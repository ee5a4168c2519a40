//! Digest authentication types and the credential-checking collaborator.
//!
//! The engine drives the server-side authentication procedure (see
//! [`Transaction::auth_begin`](crate::transaction::Transaction::auth_begin))
//! but never hashes anything itself. Checking a credential against a
//! password is delegated to an [`Authenticator`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::Method;

/// Digest algorithm named in a credential or challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthAlgorithm {
    Md5,
    Md5Sess,
    HmacSha1,
    Other(String),
}

impl AuthAlgorithm {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "MD5" => AuthAlgorithm::Md5,
            "MD5-SESS" => AuthAlgorithm::Md5Sess,
            "HMAC-SHA1" | "HMAC-SHA-1" => AuthAlgorithm::HmacSha1,
            _ => AuthAlgorithm::Other(value.to_string()),
        }
    }
}

impl fmt::Display for AuthAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthAlgorithm::Md5 => f.write_str("MD5"),
            AuthAlgorithm::Md5Sess => f.write_str("MD5-sess"),
            AuthAlgorithm::HmacSha1 => f.write_str("HMAC-SHA1"),
            AuthAlgorithm::Other(name) => f.write_str(name),
        }
    }
}

/// Quality of protection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Qop {
    Auth,
    AuthInt,
    Other(String),
}

impl fmt::Display for Qop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qop::Auth => f.write_str("auth"),
            Qop::AuthInt => f.write_str("auth-int"),
            Qop::Other(name) => f.write_str(name),
        }
    }
}

/// Authorization or Proxy-Authorization header value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub scheme: String,
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub algorithm: Option<AuthAlgorithm>,
    pub qop: Option<Qop>,
    pub cnonce: Option<String>,
    pub nonce_count: Option<String>,
    pub opaque: Option<String>,
    /// true for Proxy-Authorization
    pub is_proxy: bool,
}

impl Credentials {
    pub fn digest(
        username: impl Into<String>,
        realm: impl Into<String>,
        nonce: impl Into<String>,
        uri: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            scheme: "Digest".to_string(),
            username: username.into(),
            realm: realm.into(),
            nonce: nonce.into(),
            uri: uri.into(),
            response: response.into(),
            algorithm: None,
            qop: None,
            cnonce: None,
            nonce_count: None,
            opaque: None,
            is_proxy: false,
        }
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            self.scheme, self.username, self.realm, self.nonce, self.uri, self.response
        )?;
        if let Some(algorithm) = &self.algorithm {
            write!(f, ", algorithm={}", algorithm)?;
        }
        if let Some(qop) = &self.qop {
            write!(f, ", qop={}", qop)?;
        }
        if let Some(cnonce) = &self.cnonce {
            write!(f, ", cnonce=\"{}\"", cnonce)?;
        }
        if let Some(nc) = &self.nonce_count {
            write!(f, ", nc={}", nc)?;
        }
        if let Some(opaque) = &self.opaque {
            write!(f, ", opaque=\"{}\"", opaque)?;
        }
        Ok(())
    }
}

/// WWW-Authenticate or Proxy-Authenticate header value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub stale: bool,
    pub algorithm: Option<AuthAlgorithm>,
    pub qop: Vec<Qop>,
    /// true for Proxy-Authenticate
    pub is_proxy: bool,
}

impl Challenge {
    pub fn new(realm: impl Into<String>, nonce: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            nonce: nonce.into(),
            opaque: None,
            stale: false,
            algorithm: Some(AuthAlgorithm::Md5),
            qop: vec![Qop::Auth],
            is_proxy: false,
        }
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest realm=\"{}\", nonce=\"{}\"", self.realm, self.nonce)?;
        if let Some(opaque) = &self.opaque {
            write!(f, ", opaque=\"{}\"", opaque)?;
        }
        if self.stale {
            f.write_str(", stale=TRUE")?;
        }
        if let Some(algorithm) = &self.algorithm {
            write!(f, ", algorithm={}", algorithm)?;
        }
        if !self.qop.is_empty() {
            let qop: Vec<String> = self.qop.iter().map(|q| q.to_string()).collect();
            write!(f, ", qop=\"{}\"", qop.join(","))?;
        }
        Ok(())
    }
}

/// Next step requested by the owner after a credentials-found notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthAction {
    /// Check the current credentials against this password
    UsePassword(String),
    /// Ignore the current credentials and move to the next header
    Skip,
    /// End the procedure as authenticated
    Success,
    /// End the procedure as failed
    Failure,
}

/// Credential checking collaborator
pub trait Authenticator: Send + Sync {
    /// Whether the engine can verify this credential at all.
    ///
    /// The default accepts the Digest scheme with MD5, MD5-sess or
    /// HMAC-SHA1 and the auth or auth-int qop values.
    fn is_supported(&self, credentials: &Credentials) -> bool {
        if !credentials.scheme.eq_ignore_ascii_case("digest") {
            return false;
        }
        let algorithm_ok = match &credentials.algorithm {
            None => true,
            Some(AuthAlgorithm::Other(_)) => false,
            Some(_) => true,
        };
        let qop_ok = !matches!(credentials.qop, Some(Qop::Other(_)));
        algorithm_ok && qop_ok
    }

    /// Checks the credential response for `method` using `password`
    fn verify(&self, credentials: &Credentials, method: &Method, password: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverAuthenticator;

    impl Authenticator for NeverAuthenticator {
        fn verify(&self, _: &Credentials, _: &Method, _: &str) -> bool {
            false
        }
    }

    #[test]
    fn test_default_support_rules() {
        let auth = NeverAuthenticator;
        let mut creds = Credentials::digest("alice", "example.com", "n", "sip:bob@example.com", "r");
        assert!(auth.is_supported(&creds));

        creds.algorithm = Some(AuthAlgorithm::parse("hmac-sha1"));
        assert!(auth.is_supported(&creds));

        creds.algorithm = Some(AuthAlgorithm::parse("SHA-512"));
        assert!(!auth.is_supported(&creds));

        creds.algorithm = None;
        creds.qop = Some(Qop::Other("auth-conf".into()));
        assert!(!auth.is_supported(&creds));

        creds.qop = None;
        creds.scheme = "Basic".into();
        assert!(!auth.is_supported(&creds));
    }

    #[test]
    fn test_challenge_encoding() {
        let challenge = Challenge::new("example.com", "abc123");
        assert_eq!(
            challenge.to_string(),
            "Digest realm=\"example.com\", nonce=\"abc123\", algorithm=MD5, qop=\"auth\""
        );
    }
}
