//! Authentication-scheme negotiation and credential checks.
//!
//! Every request is assigned an [`AuthScheme`] before routing (see
//! [`RouteTable::resolve_auth_scheme`](crate::RouteTable::resolve_auth_scheme)).
//! [`authenticate`] then plays the role of the listener: it either admits the
//! request, optionally with a [`Principal`], or rejects it with an
//! [`AuthError`] that maps to a 401 challenge or a 403.

use std::collections::HashMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use subtle::ConstantTimeEq;

/// Authentication scheme demanded for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthScheme {
    /// No authentication; every request is admitted.
    #[default]
    Anonymous,
    /// HTTP Basic authentication.
    Basic,
    /// Every request is rejected with 403.
    None,
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Anonymous => "Anonymous",
            Self::Basic => "Basic",
            Self::None => "None",
        })
    }
}

/// The authenticated identity attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    name: String,
    scheme: AuthScheme,
}

impl Principal {
    /// Create a principal.
    pub fn new(name: impl Into<String>, scheme: AuthScheme) -> Self {
        Self {
            name: name.into(),
            scheme,
        }
    }

    /// The user name supplied by the client.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scheme the identity was established with.
    #[must_use]
    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }
}

/// Errors that reject a request before it reaches any pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The negotiated scheme admits nobody.
    #[error("Access forbidden")]
    Forbidden,

    /// The `Authorization` header is missing.
    #[error("Missing Authorization header")]
    MissingAuthHeader,

    /// The `Authorization` header could not be parsed.
    #[error("Invalid Authorization header format")]
    InvalidAuthHeader,

    /// The client used a different scheme than the one demanded.
    #[error("Unsupported authorization scheme: {0}")]
    UnsupportedScheme(String),

    /// The user is not known to the credential provider.
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    /// The password does not match.
    #[error("Invalid credentials")]
    InvalidCredentials,
}

impl AuthError {
    /// HTTP status to answer with.
    #[must_use]
    pub fn status_code(&self) -> http::StatusCode {
        match self {
            Self::Forbidden => http::StatusCode::FORBIDDEN,
            _ => http::StatusCode::UNAUTHORIZED,
        }
    }
}

/// Checks user name / password pairs for Basic authentication.
pub trait CredentialProvider: Send + Sync {
    /// Verify the supplied credentials.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownUser`] or [`AuthError::InvalidCredentials`].
    fn verify(&self, username: &str, password: &str) -> Result<(), AuthError>;
}

/// In-memory credential provider backed by a `HashMap`.
///
/// # Examples
///
/// ```
/// use ruststub_core::auth::{CredentialProvider, StaticCredentialProvider};
///
/// let provider = StaticCredentialProvider::new(vec![("alice".to_owned(), "s3cret".to_owned())]);
/// assert!(provider.verify("alice", "s3cret").is_ok());
/// assert!(provider.verify("alice", "wrong").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credentials: HashMap<String, String>,
}

impl StaticCredentialProvider {
    /// Create a provider from (username, password) pairs.
    pub fn new(credentials: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            credentials: credentials.into_iter().collect(),
        }
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn verify(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let expected = self
            .credentials
            .get(username)
            .ok_or_else(|| AuthError::UnknownUser(username.to_owned()))?;

        if bool::from(expected.as_bytes().ct_eq(password.as_bytes())) {
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}

/// Value of the `WWW-Authenticate` header sent with a Basic challenge.
#[must_use]
pub fn basic_challenge(realm: &str) -> String {
    format!("Basic realm=\"{}\"", realm.replace('"', "'"))
}

/// Admit or reject a request under `scheme`.
///
/// Without a `provider`, Basic accepts any well-formed credentials and leaves
/// validation to the handlers, which see them as the request's [`Principal`].
pub fn authenticate(
    scheme: AuthScheme,
    headers: &http::HeaderMap,
    provider: Option<&dyn CredentialProvider>,
) -> Result<Option<Principal>, AuthError> {
    match scheme {
        AuthScheme::Anonymous => Ok(None),
        AuthScheme::None => Err(AuthError::Forbidden),
        AuthScheme::Basic => {
            let (username, password) = parse_basic(headers)?;
            if let Some(provider) = provider {
                provider.verify(&username, &password)?;
            }
            Ok(Some(Principal::new(username, AuthScheme::Basic)))
        }
    }
}

fn parse_basic(headers: &http::HeaderMap) -> Result<(String, String), AuthError> {
    let value = headers
        .get(http::header::AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    let (scheme, token) = value
        .trim()
        .split_once(' ')
        .ok_or(AuthError::InvalidAuthHeader)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(AuthError::UnsupportedScheme(scheme.to_owned()));
    }

    let decoded = STANDARD
        .decode(token.trim())
        .map_err(|_| AuthError::InvalidAuthHeader)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::InvalidAuthHeader)?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or(AuthError::InvalidAuthHeader)?;

    Ok((username.to_owned(), password.to_owned()))
}
