use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

/// Which credentials the exporter was started with.
///
/// Snapshots are never mutated once published; a new snapshot replaces the old one wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySnapshot {
    pub version: u64,
    pub app_token_present: bool,
    pub user_token_present: bool,
    pub user_scopes: BTreeSet<String>,
}

impl CapabilitySnapshot {
    pub fn has_user_scope(&self, scope: &str) -> bool {
        self.user_token_present && self.user_scopes.contains(scope)
    }
}

/// Copy-on-write holder for the current [`CapabilitySnapshot`].
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    inner: RwLock<Arc<CapabilitySnapshot>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a new snapshot and returns the version it was assigned.
    pub fn publish<I, S>(&self, app_token_present: bool, user_token_present: bool, scopes: I) -> u64
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let user_scopes = scopes
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let mut guard = match self.inner.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        let version = guard.version + 1;
        *guard = Arc::new(CapabilitySnapshot {
            version,
            app_token_present,
            user_token_present,
            user_scopes,
        });

        tracing::debug!(version, app_token_present, user_token_present, "published capabilities");
        version
    }

    pub fn current(&self) -> Arc<CapabilitySnapshot> {
        match self.inner.read() {
            Ok(g) => Arc::clone(&g),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn has_user_scope(&self, scope: &str) -> bool {
        self.current().has_user_scope(scope)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_empty_registry_has_no_scopes() {
        let caps = CapabilityRegistry::new();
        assert_eq!(caps.current().version, 0);
        assert!(!caps.has_user_scope("bits:read"));
    }

    #[test]
    fn test_scopes_require_user_token() {
        let caps = CapabilityRegistry::new();
        caps.publish(true, false, ["bits:read"]);
        assert!(!caps.has_user_scope("bits:read"));

        caps.publish(true, true, ["bits:read", " moderation:read "]);
        assert!(caps.has_user_scope("bits:read"));
        assert!(caps.has_user_scope("moderation:read"));
        assert!(!caps.has_user_scope("channel:read:polls"));
    }

    #[test]
    fn test_publish_replaces_snapshot() {
        let caps = CapabilityRegistry::new();
        caps.publish(true, true, ["bits:read"]);
        let before = caps.current();

        let version = caps.publish(true, true, ["channel:read:goals"]);
        let after = caps.current();

        assert_eq!(version, 2);
        assert!(before.user_scopes.contains("bits:read"));
        assert!(!after.user_scopes.contains("bits:read"));
        assert!(after.user_scopes.contains("channel:read:goals"));
    }
}
