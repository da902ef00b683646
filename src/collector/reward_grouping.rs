use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use crate::config::{ConfigErr, ConfigResult};
use crate::constants::{DEFAULT_MAX_REWARD_GROUPS, DEFAULT_REWARD_GROUP, UNKNOWN_REWARD_GROUP};

/// Maps channel points rewards onto a bounded set of `reward_group` label values.
///
/// A config can only be obtained through [`RewardGroupConfig::new`], which rejects any table
/// that could emit more than `max_groups` distinct labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardGroupConfig {
    default_group: String,
    unknown_group: String,
    max_groups: usize,
    by_id: HashMap<String, String>,
    by_title: HashMap<String, String>,
}

impl Default for RewardGroupConfig {
    fn default() -> Self {
        Self {
            default_group: DEFAULT_REWARD_GROUP.to_string(),
            unknown_group: UNKNOWN_REWARD_GROUP.to_string(),
            max_groups: DEFAULT_MAX_REWARD_GROUPS,
            by_id: HashMap::new(),
            by_title: HashMap::new(),
        }
    }
}

impl RewardGroupConfig {
    /// Builds a validated config. Blank defaults fall back to `default`/`other`, a zero
    /// `max_groups` falls back to 20, and mappings with a blank key or group are dropped.
    pub fn new<I, T>(
        default_group: &str,
        unknown_group: &str,
        max_groups: usize,
        by_id: I,
        by_title: T,
    ) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
        T: IntoIterator<Item = (String, String)>,
    {
        let default_group = non_blank_or(default_group, DEFAULT_REWARD_GROUP);
        let unknown_group = non_blank_or(unknown_group, UNKNOWN_REWARD_GROUP);
        let max_groups = if max_groups == 0 {
            DEFAULT_MAX_REWARD_GROUPS
        } else {
            max_groups
        };

        let by_id: HashMap<String, String> = by_id
            .into_iter()
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .collect();

        let by_title: HashMap<String, String> = by_title
            .into_iter()
            .map(|(k, v)| (normalize_title(&k), v.trim().to_string()))
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .collect();

        let config = Self {
            default_group,
            unknown_group,
            max_groups,
            by_id,
            by_title,
        };

        let groups = config.groups();
        if groups.len() > max_groups {
            return Err(ConfigErr::RewardGroupCardinality {
                count: groups.len(),
                max: max_groups,
                groups: groups.into_iter().collect(),
            });
        }

        Ok(config)
    }

    /// Every label this config can ever produce.
    pub fn groups(&self) -> BTreeSet<String> {
        [&self.default_group, &self.unknown_group]
            .into_iter()
            .chain(self.by_id.values())
            .chain(self.by_title.values())
            .cloned()
            .collect()
    }

    pub fn default_group(&self) -> &str {
        &self.default_group
    }

    pub fn unknown_group(&self) -> &str {
        &self.unknown_group
    }

    pub fn max_groups(&self) -> usize {
        self.max_groups
    }

    /// Resolves a reward to its group. Ids are matched exactly (after trimming) and always
    /// win over titles, which are matched case-insensitively.
    pub fn group_for(&self, reward_id: &str, reward_title: &str) -> &str {
        let reward_id = reward_id.trim();
        if let Some(group) = self.by_id.get(reward_id) {
            return group;
        }

        let title = normalize_title(reward_title);
        if let Some(group) = self.by_title.get(&title) {
            return group;
        }

        if reward_id.is_empty() && title.is_empty() {
            &self.default_group
        } else {
            &self.unknown_group
        }
    }
}

/// Versioned, copy-on-write holder for the active [`RewardGroupConfig`].
#[derive(Debug, Default)]
pub struct RewardGrouping {
    inner: RwLock<(u64, Arc<RewardGroupConfig>)>,
}

impl RewardGrouping {
    pub fn new(config: RewardGroupConfig) -> Self {
        Self {
            inner: RwLock::new((1, Arc::new(config))),
        }
    }

    pub fn publish(&self, config: RewardGroupConfig) -> u64 {
        let mut guard = match self.inner.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        let version = guard.0 + 1;
        *guard = (version, Arc::new(config));
        version
    }

    /// The active config and the version it was published under.
    pub fn snapshot(&self) -> (u64, Arc<RewardGroupConfig>) {
        let guard = match self.inner.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        (guard.0, Arc::clone(&guard.1))
    }

    pub fn current(&self) -> Arc<RewardGroupConfig> {
        self.snapshot().1
    }

    pub fn group_for(&self, reward_id: &str, reward_title: &str) -> String {
        self.current().group_for(reward_id, reward_title).to_string()
    }
}

fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

fn non_blank_or(value: &str, fallback: &str) -> String {
    match value.trim() {
        "" => fallback.to_string(),
        v => v.to_string(),
    }
}
