//! Credentials, authentication challenges and bearer tokens

use crate::error::{RegistryError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::RequestBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Realm used by registries that authenticate with the basic credential directly
pub const REGISTRY_REALM: &str = "Registry Realm";

/// Lifetime assumed when the token endpoint omits `expires_in`
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(60);

/// Base credential attached to every request of one client
#[derive(Clone, Default)]
pub enum Credential {
    #[default]
    Anonymous,
    Basic {
        username: String,
        password: String,
    },
    /// Already encoded `base64(user:pass)`
    Encoded(String),
}

impl Credential {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credential::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn encoded(auth: impl Into<String>) -> Self {
        Credential::Encoded(auth.into())
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Credential::Anonymous)
    }

    /// Value for an `Authorization` header, if any
    pub fn header_value(&self) -> Option<String> {
        match self {
            Credential::Anonymous => None,
            Credential::Basic { username, password } => Some(format!(
                "Basic {}",
                STANDARD.encode(format!("{}:{}", username, password))
            )),
            Credential::Encoded(auth) => Some(format!("Basic {}", auth)),
        }
    }

    pub fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.header_value() {
            Some(value) => builder.header(reqwest::header::AUTHORIZATION, value),
            None => builder,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Anonymous => write!(f, "Anonymous"),
            Credential::Basic { username, .. } => write!(f, "Basic({}:***)", username),
            Credential::Encoded(_) => write!(f, "Encoded(***)"),
        }
    }
}

/// Decodes a docker-style `base64(user:pass)` string
pub fn decode_basic(auth: &str) -> Result<(String, String)> {
    let bytes = STANDARD
        .decode(auth.trim())
        .map_err(|e| RegistryError::Credentials(format!("invalid base64 auth: {}", e)))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| RegistryError::Credentials(format!("auth is not UTF-8: {}", e)))?;
    match text.split_once(':') {
        Some((user, pass)) if !user.is_empty() => Ok((user.to_string(), pass.to_string())),
        _ => Err(RegistryError::Credentials(
            "auth must decode to user:password".to_string(),
        )),
    }
}

/// Parsed `WWW-Authenticate` header of a 401 response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: String,
    pub realm: String,
    pub service: String,
    pub scope: String,
    /// The header exactly as received; tokens are cached under this key
    pub raw: String,
}

impl Challenge {
    /// Parses `Bearer realm="...",service="...",scope="..."`
    pub fn parse(header: &str) -> Result<Self> {
        let malformed = |reason: String| RegistryError::Challenge {
            header: header.to_string(),
            reason,
        };

        let trimmed = header.trim();
        let (scheme, params) = trimmed
            .split_once(char::is_whitespace)
            .ok_or_else(|| malformed("missing scheme or parameters".to_string()))?;

        let params = parse_params(params).map_err(malformed)?;
        let realm = params
            .get("realm")
            .filter(|realm| !realm.is_empty())
            .cloned()
            .ok_or_else(|| malformed("missing realm".to_string()))?;

        Ok(Self {
            scheme: scheme.to_string(),
            realm,
            service: params.get("service").cloned().unwrap_or_default(),
            scope: params.get("scope").cloned().unwrap_or_default(),
            raw: header.to_string(),
        })
    }

    /// No separate token authority: the basic credential is all the registry wants
    pub fn is_pass_through(&self) -> bool {
        self.realm == REGISTRY_REALM || self.scheme.eq_ignore_ascii_case("basic")
    }
}

// Splits `a="1",b="2"` on commas outside quotes.
fn parse_params(input: &str) -> std::result::Result<HashMap<String, String>, String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quoted value".to_string());
    }
    parts.push(current);

    let mut params = HashMap::new();
    for part in parts {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| format!("parameter {:?} is missing '='", part))?;
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(format!("parameter {:?} has an empty name", part));
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        params.insert(key, value.to_string());
    }
    Ok(params)
}

/// Body returned by the token endpoint
#[derive(Debug, Default, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
    // Never trusted: the registry clock may disagree with ours.
    #[serde(default)]
    #[allow(dead_code)]
    pub issued_at: Option<String>,
    #[serde(default)]
    pub error: String,
}

impl TokenResponse {
    pub fn into_token(self, scheme: &str, issued_at: Instant) -> Option<Token> {
        let value = if self.token.is_empty() {
            self.access_token
        } else {
            self.token
        };
        if value.is_empty() {
            return None;
        }
        let lifetime = if self.expires_in == 0 {
            DEFAULT_TOKEN_LIFETIME
        } else {
            Duration::from_secs(self.expires_in)
        };
        Some(Token::new(value, scheme, issued_at + lifetime))
    }
}

/// Short-lived credential handed out by a token authority
#[derive(Clone)]
pub struct Token {
    pub value: String,
    pub scheme: String,
    pub expires_at: Instant,
}

impl Token {
    pub fn new(value: impl Into<String>, scheme: impl Into<String>, expires_at: Instant) -> Self {
        Self {
            value: value.into(),
            scheme: scheme.into(),
            expires_at,
        }
    }

    /// Valid while `now + skew` is still before the expiry
    pub fn is_valid_at(&self, now: Instant, skew: Duration) -> bool {
        now + skew < self.expires_at
    }

    pub fn authorization(&self) -> String {
        format!("{} {}", self.scheme, self.value)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("scheme", &self.scheme)
            .field("len", &self.value.len())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        r#"Bearer realm="https://auth.example/token",service="registry",scope="repository:x:pull""#;

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = Challenge::parse(HEADER).unwrap();
        assert_eq!(challenge.scheme, "Bearer");
        assert_eq!(challenge.realm, "https://auth.example/token");
        assert_eq!(challenge.service, "registry");
        assert_eq!(challenge.scope, "repository:x:pull");
        assert_eq!(challenge.raw, HEADER);
        assert!(!challenge.is_pass_through());
    }

    #[test]
    fn test_scope_with_commas_stays_whole() {
        let challenge = Challenge::parse(
            r#"Bearer realm="https://auth.example/token",scope="repository:x:pull,push",service="r""#,
        )
        .unwrap();
        assert_eq!(challenge.scope, "repository:x:pull,push");
        assert_eq!(challenge.service, "r");
    }

    #[test]
    fn test_pass_through_realm() {
        let challenge = Challenge::parse(r#"Basic realm="Registry Realm""#).unwrap();
        assert!(challenge.is_pass_through());
        let challenge = Challenge::parse(r#"Bearer realm="Registry Realm""#).unwrap();
        assert!(challenge.is_pass_through());
    }

    #[test]
    fn test_malformed_challenges_are_typed_errors() {
        for header in [
            "Bearer",
            "",
            r#"Bearer realm"#,
            r#"Bearer service="registry""#,
            r#"Bearer realm="https://a",scope"#,
            r#"Bearer realm="https://a"#,
        ] {
            let err = Challenge::parse(header).unwrap_err();
            assert!(
                matches!(err, RegistryError::Challenge { .. }),
                "unexpected error for {:?}: {}",
                header,
                err
            );
        }
    }

    #[test]
    fn test_credential_header_values() {
        assert_eq!(Credential::Anonymous.header_value(), None);
        assert_eq!(
            Credential::basic("user", "pass").header_value().unwrap(),
            "Basic dXNlcjpwYXNz"
        );
        assert_eq!(
            Credential::encoded("dXNlcjpwYXNz").header_value().unwrap(),
            "Basic dXNlcjpwYXNz"
        );
        assert!(!format!("{:?}", Credential::basic("user", "pass")).contains("pass)"));
    }

    #[test]
    fn test_decode_basic() {
        assert_eq!(
            decode_basic("dXNlcjpwYXNz").unwrap(),
            ("user".to_string(), "pass".to_string())
        );
        // password containing a colon
        let encoded = STANDARD.encode("user:pa:ss");
        assert_eq!(decode_basic(&encoded).unwrap().1, "pa:ss");
        assert!(decode_basic("not base64!").is_err());
        assert!(decode_basic(&STANDARD.encode("nocolon")).is_err());
    }

    #[test]
    fn test_token_validity_with_skew() {
        let now = Instant::now();
        let token = Token::new("t", "Bearer", now + Duration::from_secs(30));
        assert!(token.is_valid_at(now, Duration::from_secs(10)));
        assert!(!token.is_valid_at(now, Duration::from_secs(30)));
        assert!(!token.is_valid_at(now + Duration::from_secs(25), Duration::from_secs(10)));
        assert_eq!(token.authorization(), "Bearer t");
    }

    #[test]
    fn test_token_response_conversion() {
        let now = Instant::now();
        let body: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","issued_at":"2001-01-01T00:00:00Z"}"#)
                .unwrap();
        let token = body.into_token("Bearer", now).unwrap();
        assert_eq!(token.value, "abc");
        assert_eq!(token.expires_at, now + DEFAULT_TOKEN_LIFETIME);

        let body: TokenResponse =
            serde_json::from_str(r#"{"error":"denied","expires_in":5}"#).unwrap();
        assert!(body.into_token("Bearer", now).is_none());
    }
}
