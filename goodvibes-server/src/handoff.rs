//! Tokens waiting for their one-time pickup by the client.
//!
//! The callback stages the token pair here under a random id that travels
//! to the browser in an HttpOnly cookie; `/token-handoff` takes it out.

use goodvibes_core::UserTokens;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How long staged tokens wait for pickup.
pub const HANDOFF_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
pub struct HandoffRegistry {
    ttl: Duration,
    entries: Mutex<HashMap<String, (UserTokens, Instant)>>,
}

impl HandoffRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stage `tokens` and return the pickup id.
    pub fn stage(&self, tokens: UserTokens) -> String {
        let id = Uuid::new_v4().to_string();
        let mut entries = self.entries.lock();
        let ttl = self.ttl;
        entries.retain(|_, (_, staged)| staged.elapsed() < ttl);
        entries.insert(id.clone(), (tokens, Instant::now()));
        id
    }

    /// Remove and return the tokens staged under `id` if they are still fresh.
    pub fn take(&self, id: &str) -> Option<UserTokens> {
        let (tokens, staged) = self.entries.lock().remove(id)?;
        (staged.elapsed() < self.ttl).then_some(tokens)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandoffRegistry {
    fn default() -> Self {
        Self::new(HANDOFF_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_is_one_time() {
        let registry = HandoffRegistry::default();
        let id = registry.stage(UserTokens::new("a", "r"));

        assert_eq!(registry.take(&id), Some(UserTokens::new("a", "r")));
        assert_eq!(registry.take(&id), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let registry = HandoffRegistry::new(Duration::ZERO);
        let id = registry.stage(UserTokens::new("a", "r"));

        assert_eq!(registry.take(&id), None);
    }

    #[test]
    fn test_unknown_id() {
        let registry = HandoffRegistry::default();
        assert_eq!(registry.take("nope"), None);
    }
}
