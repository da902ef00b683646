pub mod capabilities;
pub mod channel_core;
pub mod eventsub_self;
pub mod events;
pub mod reward_grouping;
pub mod runtime;
pub mod watchlist;
pub mod watchlist_size;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use thiserror::Error;
use tracing::instrument;

use crate::helix::HelixErr;
use runtime::RuntimeMetrics;

pub type CollectorResult<T> = core::result::Result<T, CollectorErr>;

#[derive(Debug, Error)]
pub enum CollectorErr {
    /// The collector had nothing to report this pass; not counted as a failure.
    #[error("collector returned no data")]
    NoData,

    #[error(transparent)]
    Helix(#[from] HelixErr),
}

impl CollectorErr {
    /// Bounded `reason` label for `collector_errors_total`.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NoData => "no_data",
            Self::Helix(e) => e.reason(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

/// Static description of a metric family; the counterpart of a Prometheus `Desc`.
///
/// Counter names omit the `_total` suffix, which the text encoder appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Desc {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    pub labels: &'static [&'static str],
}

impl Desc {
    pub const fn counter(
        name: &'static str,
        help: &'static str,
        labels: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            help,
            kind: MetricKind::Counter,
            labels,
        }
    }

    pub const fn gauge(
        name: &'static str,
        help: &'static str,
        labels: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            help,
            kind: MetricKind::Gauge,
            labels,
        }
    }

    /// Pairs `values` with this family's label names, in order.
    pub fn sample<S: AsRef<str>>(&self, value: f64, values: &[S]) -> Sample {
        debug_assert_eq!(self.labels.len(), values.len(), "label arity for {}", self.name);

        Sample {
            desc: *self,
            labels: self
                .labels
                .iter()
                .zip(values)
                .map(|(k, v)| (*k, v.as_ref().to_string()))
                .collect(),
            value,
        }
    }
}

/// One `(label tuple, value)` pair emitted by a collector.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub desc: Desc,
    pub labels: Vec<(&'static str, String)>,
    pub value: f64,
}

impl Sample {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[async_trait]
pub trait Collector: Send + Sync {
    /// Appends this collector's samples for one scrape.
    async fn update(&self, out: &mut Vec<Sample>) -> CollectorResult<()>;
}

/// Collectors known to the exporter and whether they run without an explicit flag.
pub const COLLECTORS: &[(&str, bool)] = &[
    (channel_core::NAME, true),
    (watchlist_size::NAME, true),
    (eventsub_self::NAME, false),
];

/// Resolves a collector's enabled state from its default and the `--collector.*` flags.
/// A disable flag wins over an enable flag.
pub fn collector_enabled(name: &str, enable: &[String], disable: &[String]) -> bool {
    if disable.iter().any(|d| d == name) {
        return false;
    }
    if enable.iter().any(|e| e == name) {
        return true;
    }

    COLLECTORS
        .iter()
        .find(|(n, _)| *n == name)
        .is_some_and(|(_, default)| *default)
}

/// Runs every registered collector on each scrape and records their outcome.
pub struct Exporter {
    collectors: Vec<(&'static str, Arc<dyn Collector>)>,
    runtime: Arc<RuntimeMetrics>,
}

impl Exporter {
    pub fn new(runtime: Arc<RuntimeMetrics>) -> Self {
        Self {
            collectors: Vec::new(),
            runtime,
        }
    }

    pub fn register(&mut self, name: &'static str, collector: Arc<dyn Collector>) {
        tracing::info!(collector = name, "registered collector");
        self.collectors.push((name, collector));
    }

    pub fn collector_names(&self) -> Vec<&'static str> {
        self.collectors.iter().map(|(name, _)| *name).collect()
    }

    #[instrument(skip(self), fields(collectors = self.collectors.len()))]
    pub async fn gather(&self) -> Vec<Sample> {
        let passes = self.collectors.iter().map(|(name, collector)| async move {
            let mut out = Vec::new();
            let result = collector.update(&mut out).await;
            (*name, result, out)
        });

        let mut samples = Vec::new();
        for (name, result, out) in join_all(passes).await {
            match result {
                Ok(()) => self.runtime.observe_collector_success(name, Utc::now()),
                Err(CollectorErr::NoData) => {
                    tracing::debug!(collector = name, "collector returned no data");
                }
                Err(e) => {
                    tracing::error!(collector = name, error = %e, "collector failed");
                    self.runtime.observe_collector_error(name, e.reason());
                }
            }
            samples.extend(out);
        }

        samples.extend(self.runtime.samples());
        samples
    }
}

pub fn bool_to_f64(v: bool) -> f64 {
    if v { 1.0 } else { 0.0 }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Clone, Copy)]
    enum Outcome {
        Ok,
        NoData,
        Fail,
    }

    struct Fixed(Outcome);

    #[async_trait]
    impl Collector for Fixed {
        async fn update(&self, out: &mut Vec<Sample>) -> CollectorResult<()> {
            const DESC: Desc = Desc::gauge("fixed", "Fixed test gauge", &["k"]);
            out.push(DESC.sample(1.0, &["v"]));
            match self.0 {
                Outcome::Ok => Ok(()),
                Outcome::NoData => Err(CollectorErr::NoData),
                Outcome::Fail => Err(CollectorErr::Helix(HelixErr::Status(503))),
            }
        }
    }

    #[test]
    fn test_collector_enabled_flags() {
        let none: Vec<String> = Vec::new();
        assert!(collector_enabled("channel_core", &none, &none));
        assert!(!collector_enabled("eventsub_self", &none, &none));
        assert!(!collector_enabled("nonexistent", &none, &none));

        let enable = vec!["eventsub_self".to_string()];
        let disable = vec!["channel_core".to_string(), "eventsub_self".to_string()];
        assert!(collector_enabled("eventsub_self", &enable, &none));
        assert!(!collector_enabled("eventsub_self", &enable, &disable));
        assert!(!collector_enabled("channel_core", &none, &disable));
    }

    #[tokio::test]
    async fn test_gather_records_outcomes() {
        let runtime = Arc::new(RuntimeMetrics::new());
        let mut exporter = Exporter::new(Arc::clone(&runtime));
        exporter.register("ok", Arc::new(Fixed(Outcome::Ok)));
        exporter.register("empty", Arc::new(Fixed(Outcome::NoData)));
        exporter.register("broken", Arc::new(Fixed(Outcome::Fail)));

        let samples = exporter.gather().await;
        let fixed = samples.iter().filter(|s| s.desc.name == "fixed").count();
        assert_eq!(fixed, 3);

        let errors: Vec<_> = samples
            .iter()
            .filter(|s| s.desc.name == "collector_errors")
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].label("collector"), Some("broken"));
        assert_eq!(errors[0].label("reason"), Some("http_5xx"));

        let successes: Vec<_> = samples
            .iter()
            .filter(|s| s.desc.name == "collector_last_success_timestamp_seconds")
            .filter_map(|s| s.label("collector"))
            .collect();
        assert_eq!(successes, vec!["ok"]);
    }
}
