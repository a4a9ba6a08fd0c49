//! Bearer-token caching shared by the OAuth-style carrier adapters.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::carrier::CarrierError;

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Per-adapter bearer-token cache.
///
/// The token is treated as expired `safety_margin` before its real expiry
/// so a request never races the carrier-side cutoff. Refreshes are
/// serialized behind an async lock held across the whole refresh call;
/// a caller that loses the race waits for the winner and reuses its token.
#[derive(Debug)]
pub struct TokenCache {
    token: Mutex<Option<CachedToken>>,
    refresh_lock: tokio::sync::Mutex<()>,
    safety_margin: Duration,
}

impl TokenCache {
    /// Default safety margin used by the carrier adapters (5 minutes).
    pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(300);

    pub fn new(safety_margin: Duration) -> Self {
        Self {
            token: Mutex::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            safety_margin,
        }
    }

    /// Returns the cached token if it is still inside the safety window.
    pub fn cached(&self) -> Option<String> {
        let guard = self.token.lock().expect("token cache lock is not poisoned");
        guard.as_ref().and_then(|token| {
            if Instant::now() < token.expires_at {
                Some(token.value.clone())
            } else {
                None
            }
        })
    }

    pub fn store(&self, value: impl Into<String>, expires_in: Duration) {
        let expires_at = Instant::now() + expires_in.saturating_sub(self.safety_margin);
        let mut guard = self.token.lock().expect("token cache lock is not poisoned");
        *guard = Some(CachedToken {
            value: value.into(),
            expires_at,
        });
    }

    /// Drops the cached token; the next call refreshes.
    pub fn invalidate(&self) {
        let mut guard = self.token.lock().expect("token cache lock is not poisoned");
        *guard = None;
    }

    /// Returns a valid token, invoking `refresh` when the cache is cold.
    ///
    /// At most one refresh is in flight per cache. The cache is re-checked
    /// after the lock is acquired, so callers queued behind the winner pick
    /// up its token instead of issuing another auth call. `refresh` must
    /// return the new token and its carrier-reported lifetime; the safety
    /// margin is subtracted here, not by the caller.
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<String, CarrierError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, Duration), CarrierError>>,
    {
        if let Some(token) = self.cached() {
            return Ok(token);
        }

        let _flight = self.refresh_lock.lock().await;

        // The winner of the race has already stored a fresh token by the
        // time the lock is handed to us.
        if let Some(token) = self.cached() {
            return Ok(token);
        }

        let (value, expires_in) = refresh().await?;
        self.store(value.clone(), expires_in);
        Ok(value)
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SAFETY_MARGIN)
    }
}
