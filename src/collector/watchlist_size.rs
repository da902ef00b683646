use std::sync::Arc;

use async_trait::async_trait;

use super::watchlist::{ChannelRole, ChannelWatchlist};
use super::{Collector, CollectorResult, Desc, Sample};

pub const NAME: &str = "watchlist";

const WATCHLIST_SIZE: Desc = Desc::gauge(
    "watchlist_size",
    "Number of channels configured in the watchlist by role",
    &["role"],
);

pub struct WatchlistSizeCollector {
    watchlist: Arc<ChannelWatchlist>,
}

impl WatchlistSizeCollector {
    pub fn new(watchlist: Arc<ChannelWatchlist>) -> Self {
        Self { watchlist }
    }
}

#[async_trait]
impl Collector for WatchlistSizeCollector {
    async fn update(&self, out: &mut Vec<Sample>) -> CollectorResult<()> {
        for role in [ChannelRole::SelfChannel, ChannelRole::Watch] {
            let count = self.watchlist.count_by_role(role) as f64;
            out.push(WATCHLIST_SIZE.sample(count, &[role.as_str()]));
        }
        Ok(())
    }
}
