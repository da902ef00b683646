use std::collections::HashMap;
use std::fmt;

use prometheus_client::collector::Collector as PromCollector;
use prometheus_client::encoding::{DescriptorEncoder, EncodeMetric, MetricEncoder};
use prometheus_client::metrics::MetricType;
use prometheus_client::metrics::counter::ConstCounter;
use prometheus_client::metrics::gauge::ConstGauge;
use prometheus_client::registry::Registry;

use crate::collector::{Desc, MetricKind, Sample};
use crate::constants::NAMESPACE;

pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// One scrape's samples, grouped into families in first-seen order.
#[derive(Debug)]
struct Snapshot {
    families: Vec<(Desc, Vec<Sample>)>,
}

impl Snapshot {
    fn new(samples: Vec<Sample>) -> Self {
        let mut index: HashMap<&'static str, usize> = HashMap::new();
        let mut families: Vec<(Desc, Vec<Sample>)> = Vec::new();

        for sample in samples {
            match index.get(sample.desc.name) {
                Some(i) => families[*i].1.push(sample),
                None => {
                    index.insert(sample.desc.name, families.len());
                    families.push((sample.desc, vec![sample]));
                }
            }
        }

        Self { families }
    }
}

impl PromCollector for Snapshot {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), fmt::Error> {
        for (desc, samples) in &self.families {
            let metric_type = match desc.kind {
                MetricKind::Counter => MetricType::Counter,
                MetricKind::Gauge => MetricType::Gauge,
            };
            let mut metric = encoder.encode_descriptor(desc.name, desc.help, None, metric_type)?;

            // an unlabelled family is written without an empty label set
            if let [only] = samples.as_slice()
                && only.labels.is_empty()
            {
                encode_value(desc.kind, only.value, metric)?;
                continue;
            }

            for sample in samples {
                let family = metric.encode_family(&sample.labels)?;
                encode_value(desc.kind, sample.value, family)?;
            }
        }

        Ok(())
    }
}

fn encode_value(kind: MetricKind, value: f64, encoder: MetricEncoder) -> Result<(), fmt::Error> {
    match kind {
        MetricKind::Counter => ConstCounter::new(value).encode(encoder),
        MetricKind::Gauge => ConstGauge::new(value).encode(encoder),
    }
}

/// Renders `samples` in the OpenMetrics text format under the `twitch` prefix.
pub fn encode(samples: Vec<Sample>) -> Result<String, fmt::Error> {
    let mut registry = Registry::with_prefix(NAMESPACE);
    registry.register_collector(Box::new(Snapshot::new(samples)));

    let mut body = String::new();
    prometheus_client::encoding::text::encode(&mut body, &registry)?;
    Ok(body)
}
