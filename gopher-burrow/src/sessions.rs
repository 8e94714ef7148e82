//! Cancellation tokens for in-flight scan report ingestion
//!
//! One parent token per `(scanner, session)`; each request ingesting a batch
//! of that session gets a child token. Cancelling the session (DELETE
//! endpoint) cancels every batch in flight. A request dropped before
//! finishing (client disconnect) cancels only its own child.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type SessionKey = (String, String);

struct Entry {
    token: CancellationToken,
    in_flight: usize,
}

/// Registry of cancellable ingestion sessions
#[derive(Clone, Default)]
pub struct SessionTokens {
    inner: Arc<Mutex<HashMap<SessionKey, Entry>>>,
}

/// Registration of one in-flight request; deregisters on drop
pub struct SessionGuard {
    tokens: SessionTokens,
    key: SessionKey,
    token: CancellationToken,
    finished: bool,
}

impl SessionTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request for a session
    pub fn register(&self, scanner_id: &str, session_id: &str) -> SessionGuard {
        let key = (scanner_id.to_string(), session_id.to_string());
        let mut inner = self.inner.lock();
        let entry = inner.entry(key.clone()).or_insert_with(|| Entry {
            token: CancellationToken::new(),
            in_flight: 0,
        });
        entry.in_flight += 1;
        let token = entry.token.child_token();
        drop(inner);

        SessionGuard {
            tokens: self.clone(),
            key,
            token,
            finished: false,
        }
    }

    /// Cancel every in-flight request of a session; false if none
    pub fn cancel(&self, scanner_id: &str, session_id: &str) -> bool {
        let key = (scanner_id.to_string(), session_id.to_string());
        match self.inner.lock().get(&key) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of sessions with requests in flight
    pub fn active_sessions(&self) -> usize {
        self.inner.lock().len()
    }

    fn release(&self, key: &SessionKey) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.get_mut(key) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
            if entry.in_flight == 0 {
                inner.remove(key);
            }
        }
    }
}

impl SessionGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Mark the request complete so dropping the guard does not cancel
    pub fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(
                scanner_id = %self.key.0,
                session_id = %self.key.1,
                "Ingestion request dropped before completion, cancelling"
            );
            self.token.cancel();
        }
        self.tokens.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_cancel_reaches_every_batch() {
        let tokens = SessionTokens::new();
        let first = tokens.register("s1", "sess");
        let second = tokens.register("s1", "sess");
        let other = tokens.register("s2", "sess");

        assert!(tokens.cancel("s1", "sess"));
        assert!(first.token().is_cancelled());
        assert!(second.token().is_cancelled());
        assert!(!other.token().is_cancelled());
    }

    #[test]
    fn test_dropped_guard_cancels_only_itself() {
        let tokens = SessionTokens::new();
        let dropped = tokens.register("s1", "sess");
        let dropped_token = dropped.token();
        let kept = tokens.register("s1", "sess");

        drop(dropped);
        assert!(dropped_token.is_cancelled());
        assert!(!kept.token().is_cancelled());
        assert_eq!(tokens.active_sessions(), 1);

        kept.finish();
        assert_eq!(tokens.active_sessions(), 0);
        assert!(!tokens.cancel("s1", "sess"));
    }
}
