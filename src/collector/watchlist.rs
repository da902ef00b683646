use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::config::{ConfigErr, ConfigResult};
use crate::constants::MAX_WATCH_CHANNELS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    SelfChannel,
    Watch,
}

impl ChannelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelfChannel => "self",
            Self::Watch => "watch",
        }
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of channels the exporter polls, split by role.
///
/// Logins are stored normalized (trimmed, lowercase). The self channel never appears in the
/// watch list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelWatchlist {
    self_login: String,
    watch: BTreeSet<String>,
    role_by_login: HashMap<String, ChannelRole>,
}

impl ChannelWatchlist {
    pub fn new<I, S>(self_login: &str, watch_logins: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let self_login = normalize_login(self_login);
        let mut role_by_login = HashMap::new();
        if !self_login.is_empty() {
            role_by_login.insert(self_login.clone(), ChannelRole::SelfChannel);
        }

        let mut watch = BTreeSet::new();
        for raw in watch_logins {
            let login = normalize_login(raw.as_ref());
            if login.is_empty() || role_by_login.contains_key(&login) {
                continue;
            }

            role_by_login.insert(login.clone(), ChannelRole::Watch);
            watch.insert(login);
        }

        if watch.len() > MAX_WATCH_CHANNELS {
            return Err(ConfigErr::WatchlistTooLarge {
                count: watch.len(),
                max: MAX_WATCH_CHANNELS,
            });
        }

        Ok(Self {
            self_login,
            watch,
            role_by_login,
        })
    }

    /// Returns an empty string when no self channel is configured.
    pub fn self_login(&self) -> &str {
        &self.self_login
    }

    pub fn watch_logins(&self) -> impl Iterator<Item = &str> {
        self.watch.iter().map(String::as_str)
    }

    /// Self channel first (if any), followed by the sorted watch list.
    pub fn all_logins(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(1 + self.watch.len());
        if !self.self_login.is_empty() {
            out.push(self.self_login.clone());
        }
        out.extend(self.watch.iter().cloned());
        out
    }

    pub fn role_for(&self, login: &str) -> Option<ChannelRole> {
        self.role_by_login.get(&normalize_login(login)).copied()
    }

    pub fn count_by_role(&self, role: ChannelRole) -> usize {
        match role {
            ChannelRole::SelfChannel => usize::from(!self.self_login.is_empty()),
            ChannelRole::Watch => self.watch.len(),
        }
    }

    pub fn validate_has_self(&self) -> ConfigResult<()> {
        if self.self_login.is_empty() {
            return Err(ConfigErr::MissingSelfChannel);
        }
        Ok(())
    }
}

pub fn normalize_login(login: &str) -> String {
    login.trim().to_lowercase()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_normalizes_and_dedupes() {
        let wl = ChannelWatchlist::new(" Alice ", ["BOB", "alice", " bob", "", "carol"]).unwrap();

        assert_eq!(wl.self_login(), "alice");
        assert_eq!(wl.watch_logins().collect::<Vec<_>>(), vec!["bob", "carol"]);
        assert_eq!(wl.all_logins(), vec!["alice", "bob", "carol"]);
        assert_eq!(wl.role_for("ALICE"), Some(ChannelRole::SelfChannel));
        assert_eq!(wl.role_for("carol"), Some(ChannelRole::Watch));
        assert_eq!(wl.role_for("dave"), None);
        assert_eq!(wl.count_by_role(ChannelRole::SelfChannel), 1);
        assert_eq!(wl.count_by_role(ChannelRole::Watch), 2);
    }

    #[test]
    fn test_watch_limit() {
        let logins: Vec<String> = (0..=MAX_WATCH_CHANNELS).map(|i| format!("ch{i}")).collect();
        let err = ChannelWatchlist::new("", &logins).unwrap_err();
        assert_eq!(
            err,
            ConfigErr::WatchlistTooLarge {
                count: MAX_WATCH_CHANNELS + 1,
                max: MAX_WATCH_CHANNELS
            }
        );

        // the self channel does not count towards the watch limit
        assert!(ChannelWatchlist::new("ch0", &logins).is_ok());
    }

    #[test]
    fn test_missing_self() {
        let wl = ChannelWatchlist::new("", ["bob"]).unwrap();
        assert_eq!(wl.count_by_role(ChannelRole::SelfChannel), 0);
        assert_eq!(wl.validate_has_self(), Err(ConfigErr::MissingSelfChannel));
    }
}
