//! Authenticating transport for Docker Registry API v2
//!
//! [`TokenAuthTransport`] wraps a `reqwest::Client` and hides the registry
//! authentication dance from callers:
//! - the base credential (HTTP Basic) is attached to every request
//! - a `401` carrying a bearer challenge is answered by fetching a token from
//!   the challenge's realm, caching it, and replaying the request exactly once
//! - an HTTPS request answered in plain HTTP is retried once over `http`

use crate::config::ClientConfig;
use crate::error::{RegistryError, Result};
use crate::registry::auth::{Challenge, Credential, Token, TokenResponse};
use crate::registry::token_manager::TokenCache;
use reqwest::header::{AUTHORIZATION, HeaderValue, WWW_AUTHENTICATE};
use reqwest::redirect::Policy;
use reqwest::{Client, Request, Response, StatusCode};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Redirect chains longer than this fail with [`RegistryError::TooManyRedirects`]
pub const REDIRECT_LIMIT: usize = 10;

#[derive(Debug)]
struct RedirectLimit(usize);

impl fmt::Display for RedirectLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stopped after {} redirects", self.0)
    }
}

impl StdError for RedirectLimit {}

/// Redirect policy for registry traffic.
///
/// reqwest carries request headers (including `Accept` and `Range`) over to
/// the redirected request and only strips credentials when the host changes,
/// which is what blob storage redirects need.
pub fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        let hops = attempt.previous().len();
        if hops > REDIRECT_LIMIT {
            attempt.error(RedirectLimit(REDIRECT_LIMIT))
        } else {
            attempt.follow()
        }
    })
}

/// Hop count when `err` was produced by [`redirect_policy`]
pub(crate) fn redirect_limit_hit(err: &reqwest::Error) -> Option<usize> {
    if !err.is_redirect() {
        return None;
    }
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(limit) = cause.downcast_ref::<RedirectLimit>() {
            return Some(limit.0);
        }
        source = cause.source();
    }
    None
}

// The server spoke plain HTTP on a connection we opened with TLS.
fn is_scheme_mismatch(err: &reqwest::Error) -> bool {
    const MARKERS: [&str; 4] = [
        "wrong version number",
        "invalidcontenttype",
        "http response to https",
        "corrupt message",
    ];
    let mut messages = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        messages.push(cause.to_string());
        source = cause.source();
    }
    messages.iter().any(|message| {
        let message = message.to_ascii_lowercase();
        MARKERS.iter().any(|marker| message.contains(marker))
    })
}

/// Builds the shared HTTP client: timeout, redirect policy and optional TLS skipping
pub fn build_http_client(config: &ClientConfig) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(config.request_timeout())
        .connect_timeout(Duration::from_secs(30))
        .redirect(redirect_policy())
        .user_agent(concat!("reglib/", env!("CARGO_PKG_VERSION")));
    if config.skip_tls {
        builder = builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }
    builder
        .build()
        .map_err(|e| RegistryError::Config(format!("failed to create HTTP client: {}", e)))
}

#[derive(Clone)]
pub struct TokenAuthTransport {
    http: Client,
    credential: Credential,
    tokens: Arc<TokenCache>,
    clock_skew: Duration,
}

impl TokenAuthTransport {
    pub fn new(http: Client, credential: Credential, clock_skew: Duration) -> Self {
        Self {
            http,
            credential,
            tokens: Arc::new(TokenCache::new()),
            clock_skew,
        }
    }

    /// Underlying client, used to build requests
    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    /// Sends `request`, answering at most one authentication challenge.
    ///
    /// The response of the replayed request is returned whatever its status;
    /// a second `401` is not retried again.
    pub async fn send(&self, mut request: Request) -> Result<Response> {
        if !request.headers().contains_key(AUTHORIZATION) {
            if let Some(value) = self.credential.header_value() {
                request
                    .headers_mut()
                    .insert(AUTHORIZATION, header_value(&value)?);
            }
        }

        let replay = request.try_clone();
        let (response, downgraded) = self.dispatch(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(header) = response.headers().get(WWW_AUTHENTICATE) else {
            debug!(url = %response.url(), "401 without a challenge");
            return Ok(response);
        };
        let header = header.to_str().map_err(|_| RegistryError::Challenge {
            header: String::from_utf8_lossy(header.as_bytes()).into_owned(),
            reason: "header is not valid ASCII".to_string(),
        })?;
        let challenge = Challenge::parse(header)?;

        if challenge.is_pass_through() {
            debug!(realm = %challenge.realm, "registry authenticates with the basic credential");
            return Ok(response);
        }

        let mut replay = replay.ok_or_else(|| {
            RegistryError::Auth("request body cannot be replayed after a challenge".to_string())
        })?;
        if downgraded {
            let _ = replay.url_mut().set_scheme("http");
        }

        let authorization = self.authorization_for(&challenge).await?;
        replay
            .headers_mut()
            .insert(AUTHORIZATION, header_value(&authorization)?);

        debug!(url = %replay.url(), "replaying request with {} token", challenge.scheme);
        let (response, _) = self.dispatch(replay).await?;
        Ok(response)
    }

    /// Executes one request, downgrading to plain HTTP once when the server is not speaking TLS
    async fn dispatch(&self, request: Request) -> Result<(Response, bool)> {
        let fallback = request.try_clone();
        let err = match self.http.execute(request).await {
            Ok(response) => return Ok((response, false)),
            Err(err) => err,
        };

        let mut plain = match fallback {
            Some(plain) if plain.url().scheme() == "https" && is_scheme_mismatch(&err) => plain,
            _ => return Err(err.into()),
        };
        let _ = plain.url_mut().set_scheme("http");
        warn!(url = %plain.url(), "server answered plain HTTP to HTTPS, retrying over http");
        let response = self.http.execute(plain).await?;
        Ok((response, true))
    }

    async fn authorization_for(&self, challenge: &Challenge) -> Result<String> {
        if let Some(token) = self.tokens.get_valid(&challenge.raw, self.clock_skew) {
            debug!(scope = %challenge.scope, "reusing cached token");
            return Ok(token.authorization());
        }

        let token = self.fetch_token(challenge).await?;
        let authorization = token.authorization();
        self.tokens.store(challenge.raw.clone(), token);
        Ok(authorization)
    }

    async fn fetch_token(&self, challenge: &Challenge) -> Result<Token> {
        let mut url = Url::parse(&challenge.realm).map_err(|e| RegistryError::Challenge {
            header: challenge.raw.clone(),
            reason: format!("realm is not a URL: {}", e),
        })?;
        if !challenge.service.is_empty() || !challenge.scope.is_empty() {
            let mut query = url.query_pairs_mut();
            if !challenge.service.is_empty() {
                query.append_pair("service", &challenge.service);
            }
            if !challenge.scope.is_empty() {
                query.append_pair("scope", &challenge.scope);
            }
        }

        debug!(realm = %challenge.realm, service = %challenge.service, scope = %challenge.scope, "requesting token");

        let response = self
            .credential
            .apply(self.http.get(url))
            .send()
            .await
            .map_err(|source| RegistryError::TokenEndpoint {
                realm: challenge.realm.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Auth(format!(
                "token endpoint {} returned HTTP {}: {}",
                challenge.realm, status, body
            )));
        }

        let body: TokenResponse = response.json().await.map_err(|e| {
            RegistryError::Auth(format!("invalid token response from {}: {}", challenge.realm, e))
        })?;
        if !body.error.is_empty() {
            warn!(realm = %challenge.realm, error = %body.error, "token endpoint reported an error");
        }

        body.into_token(&challenge.scheme, Instant::now())
            .ok_or_else(|| {
                RegistryError::Auth(format!("token endpoint {} returned no token", challenge.realm))
            })
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| RegistryError::Auth("credential contains invalid header characters".to_string()))
}
