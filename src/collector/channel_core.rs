use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::instrument;

use super::watchlist::{ChannelRole, ChannelWatchlist, normalize_login};
use super::{Collector, CollectorErr, CollectorResult, Desc, Sample, bool_to_f64};
use crate::constants::HELIX_BATCH_SIZE;
use crate::helix::HelixResult;

pub const NAME: &str = "channel_core";

const LABELS: &[&str] = &["channel", "role"];

const CHANNEL_LIVE: Desc = Desc::gauge(
    "channel_live",
    "Whether the channel is currently live (1 = live, 0 = offline)",
    LABELS,
);
const CHANNEL_VIEWERS: Desc = Desc::gauge(
    "channel_viewers",
    "Current viewer count for the channel (0 when offline)",
    LABELS,
);
const CHANNEL_STREAM_STARTED_AT: Desc = Desc::gauge(
    "channel_stream_started_at_seconds",
    "Unix timestamp when the current stream started (0 when offline)",
    LABELS,
);
const CHANNEL_STREAM_UPTIME: Desc = Desc::gauge(
    "channel_stream_uptime_seconds",
    "Stream uptime in seconds (0 when offline)",
    LABELS,
);
const CHANNEL_CATEGORY_ID: Desc = Desc::gauge(
    "channel_category_id",
    "Current category/game numeric ID for the channel (0 when offline/unknown)",
    LABELS,
);
const CHANNEL_TITLE_CHANGES: Desc = Desc::counter(
    "channel_title_change",
    "Total number of observed title changes for the channel",
    LABELS,
);
const CHANNEL_CATEGORY_CHANGES: Desc = Desc::counter(
    "channel_category_change",
    "Total number of observed category/game changes for the channel",
    LABELS,
);
const CHANNEL_STREAM_STARTS: Desc = Desc::counter(
    "channel_stream_starts",
    "Total number of observed stream start transitions (offline -> live)",
    LABELS,
);
const CHANNEL_STREAM_ENDS: Desc = Desc::counter(
    "channel_stream_ends",
    "Total number of observed stream end transitions (live -> offline)",
    LABELS,
);

/// One live stream as reported by the stream source. Offline channels are simply absent.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveStream {
    pub user_login: String,
    pub viewer_count: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub title: String,
    pub game_id: String,
}

#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Returns the live streams among `logins` (at most 100 per call).
    async fn live_streams(&self, logins: &[String]) -> HelixResult<Vec<LiveStream>>;
}

/// Poll-driven liveness state for one channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelLiveState {
    pub live: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_title: String,
    pub last_category_id: String,
    pub last_transition_at: Option<DateTime<Utc>>,

    pub stream_starts: u64,
    pub stream_ends: u64,
    pub title_changes: u64,
    pub category_changes: u64,
}

impl ChannelLiveState {
    /// Applies one poll result. Transition counters only move on edges; title and category
    /// changes only count between two non-empty values observed while live.
    pub fn observe(&mut self, stream: Option<&LiveStream>, now: DateTime<Utc>) {
        match (self.live, stream) {
            (false, Some(s)) => {
                self.stream_starts += 1;
                self.last_transition_at = Some(now);
                self.started_at = s.started_at;
            }
            (true, None) => {
                self.stream_ends += 1;
                self.last_transition_at = Some(now);
                self.started_at = None;
                self.last_title.clear();
                self.last_category_id.clear();
            }
            _ => {}
        }

        if let Some(s) = stream {
            if !self.last_title.is_empty() && !s.title.is_empty() && s.title != self.last_title {
                self.title_changes += 1;
            }
            if !self.last_category_id.is_empty()
                && !s.game_id.is_empty()
                && s.game_id != self.last_category_id
            {
                self.category_changes += 1;
            }
            self.last_title.clone_from(&s.title);
            self.last_category_id.clone_from(&s.game_id);
        }

        self.live = stream.is_some();
    }
}

/// Liveness, viewers, uptime and transition counters for every watchlist channel.
///
/// A pass holds the state lock from the first fetch until emission, so overlapping scrapes
/// apply their snapshots in the order they started.
pub struct ChannelCoreCollector {
    source: Option<Arc<dyn StreamSource>>,
    watchlist: Arc<ChannelWatchlist>,
    state: Mutex<HashMap<String, ChannelLiveState>>,
}

impl ChannelCoreCollector {
    /// Without a stream source every pass reports no data.
    pub fn new(source: Option<Arc<dyn StreamSource>>, watchlist: Arc<ChannelWatchlist>) -> Self {
        Self {
            source,
            watchlist,
            state: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Collector for ChannelCoreCollector {
    #[instrument(skip(self, out))]
    async fn update(&self, out: &mut Vec<Sample>) -> CollectorResult<()> {
        let logins = self.watchlist.all_logins();
        let Some(source) = &self.source else {
            return Err(CollectorErr::NoData);
        };
        if logins.is_empty() {
            return Err(CollectorErr::NoData);
        }

        let mut state = self.state.lock().await;

        let mut streams_by_login = HashMap::new();
        for batch in logins.chunks(HELIX_BATCH_SIZE) {
            for stream in source.live_streams(batch).await? {
                streams_by_login.insert(normalize_login(&stream.user_login), stream);
            }
        }

        tracing::debug!(
            channels = logins.len(),
            live = streams_by_login.len(),
            "polled channel liveness"
        );

        let now = Utc::now();

        for login in &logins {
            let role = self
                .watchlist
                .role_for(login)
                .unwrap_or(ChannelRole::Watch)
                .as_str();
            let stream = streams_by_login.get(login);

            let st = state.entry(login.clone()).or_default();
            st.observe(stream, now);

            let (mut viewers, mut started_at, mut uptime, mut category_id) = (0.0, 0.0, 0.0, 0.0);
            if let Some(s) = stream {
                viewers = s.viewer_count as f64;
                if let Some(started) = s.started_at {
                    started_at = started.timestamp() as f64;
                    uptime = (now - started).num_milliseconds() as f64 / 1000.0;
                }
                category_id = s.game_id.parse::<f64>().unwrap_or(0.0);
            }

            let labels = [login.as_str(), role];
            out.extend([
                CHANNEL_LIVE.sample(bool_to_f64(stream.is_some()), &labels),
                CHANNEL_VIEWERS.sample(viewers, &labels),
                CHANNEL_STREAM_STARTED_AT.sample(started_at, &labels),
                CHANNEL_STREAM_UPTIME.sample(uptime, &labels),
                CHANNEL_CATEGORY_ID.sample(category_id, &labels),
                CHANNEL_TITLE_CHANGES.sample(st.title_changes as f64, &labels),
                CHANNEL_CATEGORY_CHANGES.sample(st.category_changes as f64, &labels),
                CHANNEL_STREAM_STARTS.sample(st.stream_starts as f64, &labels),
                CHANNEL_STREAM_ENDS.sample(st.stream_ends as f64, &labels),
            ]);
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::helix::HelixErr;

    fn stream(login: &str, title: &str, game_id: &str, viewers: u64) -> LiveStream {
        LiveStream {
            user_login: login.to_string(),
            viewer_count: viewers,
            started_at: DateTime::from_timestamp(1_700_000_000, 0),
            title: title.to_string(),
            game_id: game_id.to_string(),
        }
    }

    /// Replays one scripted poll result per call.
    struct Scripted {
        polls: Mutex<VecDeque<HelixResult<Vec<LiveStream>>>>,
        requested: Mutex<Vec<Vec<String>>>,
    }

    impl Scripted {
        fn new(polls: Vec<HelixResult<Vec<LiveStream>>>) -> Self {
            Self {
                polls: Mutex::new(polls.into()),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StreamSource for Scripted {
        async fn live_streams(&self, logins: &[String]) -> HelixResult<Vec<LiveStream>> {
            self.requested.lock().unwrap().push(logins.to_vec());
            self.polls.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    fn value(samples: &[Sample], name: &str, channel: &str) -> f64 {
        samples
            .iter()
            .find(|s| s.desc.name == name && s.label("channel") == Some(channel))
            .map(|s| s.value)
            .unwrap_or_else(|| panic!("missing {name} for {channel}"))
    }

    #[test]
    fn test_liveness_sequence() {
        let a = stream("alice", "A", "509658", 10);
        let b = stream("alice", "B", "509658", 12);
        let now = Utc::now();

        let mut st = ChannelLiveState::default();
        for poll in [None, Some(&a), Some(&a), Some(&b), None] {
            st.observe(poll, now);
        }

        assert_eq!(st.stream_starts, 1);
        assert_eq!(st.stream_ends, 1);
        assert_eq!(st.title_changes, 1);
        assert_eq!(st.category_changes, 0);
        assert!(!st.live);
        assert!(st.started_at.is_none());
        assert!(st.last_title.is_empty());
        assert!(st.last_category_id.is_empty());
    }

    #[test]
    fn test_first_observation_after_start_never_counts() {
        let now = Utc::now();
        let mut st = ChannelLiveState::default();

        st.observe(Some(&stream("alice", "A", "1", 1)), now);
        st.observe(None, now);
        st.observe(Some(&stream("alice", "B", "2", 1)), now);
        // empty values never count as a change
        st.observe(Some(&stream("alice", "", "", 1)), now);

        assert_eq!(st.stream_starts, 2);
        assert_eq!(st.title_changes, 0);
        assert_eq!(st.category_changes, 0);
    }

    #[tokio::test]
    async fn test_poll_end_to_end() {
        let watchlist = Arc::new(ChannelWatchlist::new("alice", ["bob"]).unwrap());
        let source = Arc::new(Scripted::new(vec![Ok(vec![stream(
            "Bob", "hello", "509658", 42,
        )])]));
        let collector = ChannelCoreCollector::new(Some(source.clone() as Arc<dyn StreamSource>), watchlist);

        let mut out = Vec::new();
        collector.update(&mut out).await.unwrap();

        assert_eq!(
            source.requested.lock().unwrap().as_slice(),
            &[vec!["alice".to_string(), "bob".to_string()]]
        );

        assert_eq!(value(&out, "channel_live", "bob"), 1.0);
        assert_eq!(value(&out, "channel_viewers", "bob"), 42.0);
        assert_eq!(value(&out, "channel_category_id", "bob"), 509658.0);
        assert_eq!(value(&out, "channel_stream_started_at_seconds", "bob"), 1_700_000_000.0);
        assert!(value(&out, "channel_stream_uptime_seconds", "bob") > 0.0);
        assert_eq!(value(&out, "channel_stream_starts", "bob"), 1.0);

        assert_eq!(value(&out, "channel_live", "alice"), 0.0);
        assert_eq!(value(&out, "channel_viewers", "alice"), 0.0);
        assert_eq!(value(&out, "channel_stream_starts", "alice"), 0.0);

        let alice_role = out
            .iter()
            .find(|s| s.label("channel") == Some("alice"))
            .and_then(|s| s.label("role"));
        assert_eq!(alice_role, Some("self"));
        assert_eq!(out.len(), 18);
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_state() {
        let watchlist = Arc::new(ChannelWatchlist::new("alice", Vec::<String>::new()).unwrap());
        let source = Arc::new(Scripted::new(vec![
            Ok(vec![stream("alice", "A", "1", 5)]),
            Err(HelixErr::Status(502)),
            Ok(vec![stream("alice", "A", "1", 6)]),
        ]));
        let collector = ChannelCoreCollector::new(Some(source as Arc<dyn StreamSource>), watchlist);

        collector.update(&mut Vec::new()).await.unwrap();
        let err = collector.update(&mut Vec::new()).await.unwrap_err();
        assert_eq!(err.reason(), "http_5xx");

        let mut out = Vec::new();
        collector.update(&mut out).await.unwrap();
        assert_eq!(value(&out, "channel_stream_starts", "alice"), 1.0);
        assert_eq!(value(&out, "channel_stream_ends", "alice"), 0.0);
        assert_eq!(value(&out, "channel_viewers", "alice"), 6.0);
    }

    /// Answers polls in call order, each after its own delay.
    struct Delayed {
        polls: Mutex<VecDeque<(u64, Vec<LiveStream>)>>,
    }

    #[async_trait]
    impl StreamSource for Delayed {
        async fn live_streams(&self, _logins: &[String]) -> HelixResult<Vec<LiveStream>> {
            let (delay_ms, streams) = self.polls.lock().unwrap().pop_front().unwrap_or_default();
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(streams)
        }
    }

    #[tokio::test]
    async fn test_overlapping_passes_apply_in_order() {
        let watchlist = Arc::new(ChannelWatchlist::new("alice", Vec::<String>::new()).unwrap());
        let live = || vec![stream("alice", "A", "1", 5)];
        let source = Arc::new(Delayed {
            polls: Mutex::new(VecDeque::from([
                (0, live()),
                (200, live()),
                (0, Vec::new()),
                (0, Vec::new()),
            ])),
        });
        let collector = Arc::new(ChannelCoreCollector::new(
            Some(source as Arc<dyn StreamSource>),
            watchlist,
        ));

        collector.update(&mut Vec::new()).await.unwrap();

        let slow = {
            let collector = Arc::clone(&collector);
            tokio::spawn(async move { collector.update(&mut Vec::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        collector.update(&mut Vec::new()).await.unwrap();
        slow.await.unwrap().unwrap();

        let mut out = Vec::new();
        collector.update(&mut out).await.unwrap();
        assert_eq!(value(&out, "channel_stream_starts", "alice"), 1.0);
        assert_eq!(value(&out, "channel_stream_ends", "alice"), 1.0);
        assert_eq!(value(&out, "channel_live", "alice"), 0.0);
    }

    #[tokio::test]
    async fn test_no_source_is_no_data() {
        let watchlist = Arc::new(ChannelWatchlist::new("alice", ["bob"]).unwrap());
        let collector = ChannelCoreCollector::new(None, watchlist);

        let err = collector.update(&mut Vec::new()).await.unwrap_err();
        assert!(matches!(err, CollectorErr::NoData));
    }
}
