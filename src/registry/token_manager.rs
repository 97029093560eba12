//! Token cache shared by every request of one transport
//!
//! Tokens are keyed by the raw challenge string: two requests answered with the
//! same challenge share a token, a different scope never does. Reads take the
//! shared lock; inserts take the exclusive lock briefly. Two tasks missing the
//! cache at once may both fetch a token; the last insert wins.

use crate::registry::auth::Token;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct TokenCache {
    tokens: RwLock<HashMap<String, Token>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached token for `challenge`, unless it expires within `skew`
    pub fn get_valid(&self, challenge: &str, skew: Duration) -> Option<Token> {
        let tokens = self.tokens.read().unwrap_or_else(|e| e.into_inner());
        tokens
            .get(challenge)
            .filter(|token| token.is_valid_at(Instant::now(), skew))
            .cloned()
    }

    /// Replaces whatever was stored for `challenge`
    pub fn store(&self, challenge: impl Into<String>, token: Token) {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        tokens.insert(challenge.into(), token);
    }

    pub fn len(&self) -> usize {
        self.tokens.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
