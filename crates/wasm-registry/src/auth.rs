//! Registry token authentication.
//!
//! A registry that requires auth answers the `/v2/` probe with `401` and a
//! `WWW-Authenticate: Bearer realm="...",service="..."` header. The challenge
//! is exchanged for a bearer token at either the Docker token endpoint
//! (`/v2/auth`, field `token`) or an OAuth2 endpoint named by the realm
//! (field `access_token`).

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::client::RegistryClient;
use crate::endpoint::RegistryEndpoint;
use crate::{Error, Result};

const DOCKER_TOKEN_PATH: &str = "/v2/auth";
const OAUTH2_TOKEN_SUFFIX: &str = "/oauth2/token";

/// Token exchange flavour advertised by a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    DockerToken,
    OAuth2,
}

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    scheme: AuthScheme,
    params: BTreeMap<String, String>,
}

impl AuthChallenge {
    /// Parse a header value such as `Bearer realm="https://quay.io/v2/auth",service="quay.io"`.
    ///
    /// Only the `Bearer` scheme is understood; anything else is
    /// [`Error::IllegalAuth`].
    pub fn parse(header: &str) -> Result<Self> {
        let illegal = || Error::IllegalAuth(header.to_string());

        let trimmed = header.trim();
        let (scheme, rest) = trimmed
            .split_once(char::is_whitespace)
            .unwrap_or((trimmed, ""));
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(illegal());
        }

        let params = parse_params(rest).ok_or_else(illegal)?;
        let scheme = match params.get("realm") {
            Some(realm) if realm_path(realm).ends_with(OAUTH2_TOKEN_SUFFIX) => AuthScheme::OAuth2,
            _ => AuthScheme::DockerToken,
        };

        Ok(Self { scheme, params })
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn realm(&self) -> Option<&str> {
        self.param("realm")
    }

    pub fn service(&self) -> Option<&str> {
        self.param("service")
    }

    /// Resolve where and how the token is fetched for `endpoint`.
    pub fn token_exchange(&self, endpoint: &RegistryEndpoint) -> Result<TokenExchange> {
        let url = match self.scheme {
            AuthScheme::DockerToken => endpoint.url(DOCKER_TOKEN_PATH)?,
            AuthScheme::OAuth2 => {
                let realm = self.realm().unwrap_or_default();
                Url::parse(realm).map_err(|_| Error::IllegalAuth(realm.to_string()))?
            }
        };
        let service = self
            .service()
            .map_or_else(|| endpoint.registry.clone(), str::to_string);

        Ok(TokenExchange {
            scheme: self.scheme,
            url,
            service,
        })
    }
}

fn realm_path(realm: &str) -> String {
    match Url::parse(realm) {
        Ok(url) => url.path().trim_end_matches('/').to_string(),
        Err(_) => realm
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string(),
    }
}

/// Parse `key="value",key2=value2` auth-params. Quoted values may contain
/// commas and backslash escapes. Keys are lower-cased.
fn parse_params(input: &str) -> Option<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}
        if chars.peek().is_none() {
            return Some(params);
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && *c != ',') {
            key.push(c);
        }
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() || chars.next() != Some('=') {
            return None;
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'"').is_some() {
            loop {
                match chars.next()? {
                    '"' => break,
                    '\\' => value.push(chars.next()?),
                    c => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| *c != ',') {
                value.push(c);
            }
            value = value.trim().to_string();
        }
        params.insert(key, value);
    }
}

/// A resolved token endpoint together with the response field it yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenExchange {
    pub scheme: AuthScheme,
    pub url: Url,
    pub service: String,
}

impl TokenExchange {
    /// Pull the bearer token out of a token endpoint response body.
    pub(crate) fn token_from(&self, body: &[u8]) -> serde_json::Result<BearerToken> {
        #[derive(Deserialize)]
        struct DockerTokenResponse {
            token: String,
        }

        #[derive(Deserialize)]
        struct OAuth2TokenResponse {
            access_token: String,
        }

        let token = match self.scheme {
            AuthScheme::DockerToken => serde_json::from_slice::<DockerTokenResponse>(body)?.token,
            AuthScheme::OAuth2 => {
                serde_json::from_slice::<OAuth2TokenResponse>(body)?.access_token
            }
        };
        Ok(BearerToken::new(token))
    }
}

/// Access scope requested from a token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub repository: String,
    pub action: String,
}

impl Scope {
    pub fn new(repository: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            action: action.into(),
        }
    }

    pub fn pull(repository: impl Into<String>) -> Self {
        Self::new(repository, "pull")
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "repository:{}:{}", self.repository, self.action)
    }
}

/// Short-lived credential for one registry and one scope.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    token: String,
}

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Value for the `Authorization` header.
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Negotiation progress.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Unchallenged,
    Challenged(AuthChallenge),
    Authorized(BearerToken),
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchallenged => f.write_str("unchallenged"),
            Self::Challenged(challenge) => write!(f, "challenged ({:?})", challenge.scheme()),
            Self::Authorized(_) => f.write_str("authorized"),
        }
    }
}

/// Drives `Unchallenged -> Challenged -> Authorized` for a single pull.
#[derive(Debug, Default)]
pub struct AuthNegotiator {
    state: AuthState,
}

impl AuthNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    /// Record the `WWW-Authenticate` value of a `401` probe response.
    pub fn challenge(&mut self, www_authenticate: Option<&str>) -> Result<AuthScheme> {
        if !matches!(self.state, AuthState::Unchallenged) {
            return Err(Error::IllegalAuth(self.state.to_string()));
        }
        let challenge = AuthChallenge::parse(www_authenticate.unwrap_or_default())?;
        let scheme = challenge.scheme();
        self.state = AuthState::Challenged(challenge);
        Ok(scheme)
    }

    /// Exchange the recorded challenge for a bearer token.
    pub async fn negotiate(
        &mut self,
        client: &RegistryClient,
        scope: &Scope,
    ) -> Result<BearerToken> {
        let AuthState::Challenged(challenge) = &self.state else {
            return Err(Error::IllegalAuth(self.state.to_string()));
        };

        let exchange = challenge.token_exchange(client.endpoint())?;
        debug!(
            scheme = ?exchange.scheme,
            url = %exchange.url,
            service = %exchange.service,
            %scope,
            "requesting registry token"
        );
        let token = client.authorize(&exchange, scope, None).await?;
        self.state = AuthState::Authorized(token.clone());
        Ok(token)
    }
}
