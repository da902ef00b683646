use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use http::HeaderMap;

use super::{Desc, Sample, bool_to_f64};
use crate::constants::KNOWN_USER_SCOPES;

const EXPORTER_CONFIGURED: Desc = Desc::gauge(
    "exporter_configured",
    "Whether the exporter has the minimum Twitch credentials configured (1 = yes, 0 = no)",
    &[],
);
const COLLECTOR_LAST_SUCCESS: Desc = Desc::gauge(
    "collector_last_success_timestamp_seconds",
    "Unix timestamp of the last successful collector run",
    &["collector"],
);
const COLLECTOR_ERRORS: Desc = Desc::counter(
    "collector_errors",
    "Total number of collector errors by reason",
    &["collector", "reason"],
);
const COLLECTOR_DISABLED: Desc = Desc::counter(
    "collector_disabled",
    "Total number of times a collector was disabled due to missing capabilities or config",
    &["collector", "reason"],
);
const OAUTH_TOKEN_PRESENT: Desc = Desc::gauge(
    "oauth_token_present",
    "Whether an OAuth token is present (1 = yes, 0 = no)",
    &["token_type"],
);
const OAUTH_SCOPE_PRESENT: Desc = Desc::gauge(
    "oauth_scope_present",
    "Whether a known OAuth scope is present on the validated user token (1 = yes, 0 = no)",
    &["scope"],
);
const API_REQUESTS: Desc = Desc::counter(
    "api_requests",
    "Total Twitch API HTTP requests by API surface, endpoint, and status class",
    &["api", "endpoint", "code_class"],
);
const API_RATE_LIMIT_REMAINING: Desc = Desc::gauge(
    "api_rate_limit_remaining",
    "Twitch API rate limit remaining, if provided by response headers",
    &["api"],
);
const API_RATE_LIMIT_RESET_AT: Desc = Desc::gauge(
    "api_rate_limit_reset_at_seconds",
    "Unix timestamp when the Twitch API rate limit resets, if provided by response headers",
    &["api"],
);
const EVENTSUB_SIGNATURE_FAIL: Desc = Desc::counter(
    "eventsub_signature_fail",
    "Total number of EventSub webhook signature verification failures",
    &["reason"],
);

#[derive(Debug, Default)]
struct RuntimeState {
    configured: bool,
    collector_last_success: BTreeMap<String, f64>,
    collector_errors: BTreeMap<(String, String), f64>,
    collector_disabled: BTreeMap<(String, String), f64>,
    oauth_token_present: BTreeMap<String, bool>,
    oauth_scope_present: BTreeMap<String, bool>,
    api_requests: BTreeMap<(String, String, String), f64>,
    api_rate_limit_remaining: BTreeMap<String, f64>,
    api_rate_limit_reset_at: BTreeMap<String, f64>,
    signature_failures: BTreeMap<String, f64>,
}

/// The exporter's own health metrics.
///
/// Shared by reference between the HTTP layer, the Helix client and every collector; each
/// update holds the lock only for the map write.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    state: Mutex<RuntimeState>,
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut RuntimeState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn set_configured(&self, configured: bool) {
        self.with_state(|st| st.configured = configured);
    }

    pub fn set_oauth_token_present(&self, token_type: &str, present: bool) {
        self.with_state(|st| {
            st.oauth_token_present.insert(token_type.to_string(), present);
        });
    }

    /// Sets a 0/1 gauge for every known scope; scopes outside the known list are ignored.
    pub fn set_known_oauth_scopes<S: AsRef<str>>(&self, present: &[S]) {
        self.with_state(|st| {
            for scope in KNOWN_USER_SCOPES {
                let found = present.iter().any(|p| p.as_ref().trim() == *scope);
                st.oauth_scope_present.insert(scope.to_string(), found);
            }
        });
    }

    pub fn inc_collector_disabled(&self, collector: &str, reason: &str) {
        self.with_state(|st| {
            *st.collector_disabled
                .entry((collector.to_string(), reason.to_string()))
                .or_default() += 1.0;
        });
    }

    pub fn observe_collector_success(&self, collector: &str, at: DateTime<Utc>) {
        self.with_state(|st| {
            st.collector_last_success
                .insert(collector.to_string(), at.timestamp() as f64);
        });
    }

    pub fn observe_collector_error(&self, collector: &str, reason: &str) {
        self.with_state(|st| {
            *st.collector_errors
                .entry((collector.to_string(), reason.to_string()))
                .or_default() += 1.0;
        });
    }

    pub fn inc_signature_fail(&self, reason: &str) {
        let reason = if reason.is_empty() { "other" } else { reason };
        self.with_state(|st| {
            *st.signature_failures.entry(reason.to_string()).or_default() += 1.0;
        });
    }

    /// Records one Helix response. Endpoints are request paths, which stay bounded since
    /// Helix carries ids in query params.
    pub fn observe_api_response(&self, api: &str, endpoint: &str, status: u16, headers: &HeaderMap) {
        let code_class = match status {
            200..=299 => "2xx",
            400..=499 => "4xx",
            500..=599 => "5xx",
            _ => "other",
        };
        let endpoint = endpoint_label(endpoint);
        let remaining = header_f64(headers, "ratelimit-remaining");
        let reset = header_f64(headers, "ratelimit-reset");

        self.with_state(|st| {
            *st.api_requests
                .entry((api.to_string(), endpoint, code_class.to_string()))
                .or_default() += 1.0;

            if let Some(v) = remaining {
                st.api_rate_limit_remaining.insert(api.to_string(), v);
            }
            if let Some(v) = reset {
                st.api_rate_limit_reset_at.insert(api.to_string(), v);
            }
        });
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.with_state(|st| {
            let mut out = vec![EXPORTER_CONFIGURED.sample::<&str>(bool_to_f64(st.configured), &[])];

            for (collector, v) in &st.collector_last_success {
                out.push(COLLECTOR_LAST_SUCCESS.sample(*v, &[collector]));
            }
            for ((collector, reason), v) in &st.collector_errors {
                out.push(COLLECTOR_ERRORS.sample(*v, &[collector, reason]));
            }
            for ((collector, reason), v) in &st.collector_disabled {
                out.push(COLLECTOR_DISABLED.sample(*v, &[collector, reason]));
            }
            for (token_type, present) in &st.oauth_token_present {
                out.push(OAUTH_TOKEN_PRESENT.sample(bool_to_f64(*present), &[token_type]));
            }
            for (scope, present) in &st.oauth_scope_present {
                out.push(OAUTH_SCOPE_PRESENT.sample(bool_to_f64(*present), &[scope]));
            }
            for ((api, endpoint, class), v) in &st.api_requests {
                out.push(API_REQUESTS.sample(*v, &[api, endpoint, class]));
            }
            for (api, v) in &st.api_rate_limit_remaining {
                out.push(API_RATE_LIMIT_REMAINING.sample(*v, &[api]));
            }
            for (api, v) in &st.api_rate_limit_reset_at {
                out.push(API_RATE_LIMIT_RESET_AT.sample(*v, &[api]));
            }
            for (reason, v) in &st.signature_failures {
                out.push(EVENTSUB_SIGNATURE_FAIL.sample(*v, &[reason]));
            }

            out
        })
    }
}

fn endpoint_label(path: &str) -> String {
    match path.trim().trim_start_matches('/') {
        "" => "/".to_string(),
        p => p.to_string(),
    }
}

fn header_f64(headers: &HeaderMap, name: &str) -> Option<f64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
}

#[cfg(test)]
mod test {
    use super::*;
    use http::HeaderValue;

    fn find<'a>(samples: &'a [Sample], name: &str, labels: &[(&str, &str)]) -> Option<&'a Sample> {
        samples.iter().find(|s| {
            s.desc.name == name && labels.iter().all(|(k, v)| s.label(k) == Some(*v))
        })
    }

    #[test]
    fn test_known_scopes_only() {
        let rt = RuntimeMetrics::new();
        rt.set_known_oauth_scopes(&["bits:read", "made:up:scope"]);

        let samples = rt.samples();
        let scopes: Vec<_> = samples
            .iter()
            .filter(|s| s.desc.name == "oauth_scope_present")
            .collect();

        assert_eq!(scopes.len(), KNOWN_USER_SCOPES.len());
        assert_eq!(find(&samples, "oauth_scope_present", &[("scope", "bits:read")]).unwrap().value, 1.0);
        assert_eq!(find(&samples, "oauth_scope_present", &[("scope", "moderation:read")]).unwrap().value, 0.0);
        assert!(find(&samples, "oauth_scope_present", &[("scope", "made:up:scope")]).is_none());
    }

    #[test]
    fn test_api_response_observation() {
        let rt = RuntimeMetrics::new();
        let mut headers = HeaderMap::new();
        headers.insert("ratelimit-remaining", HeaderValue::from_static("799"));
        headers.insert("ratelimit-reset", HeaderValue::from_static("1700000000"));

        rt.observe_api_response("helix", "/helix/streams", 200, &headers);
        rt.observe_api_response("helix", "/helix/streams", 200, &HeaderMap::new());
        rt.observe_api_response("helix", "/helix/streams", 429, &HeaderMap::new());

        let samples = rt.samples();
        let ok = find(&samples, "api_requests", &[("endpoint", "helix/streams"), ("code_class", "2xx")]);
        let limited = find(&samples, "api_requests", &[("code_class", "4xx")]);
        assert_eq!(ok.unwrap().value, 2.0);
        assert_eq!(limited.unwrap().value, 1.0);
        assert_eq!(find(&samples, "api_rate_limit_remaining", &[("api", "helix")]).unwrap().value, 799.0);
        assert_eq!(
            find(&samples, "api_rate_limit_reset_at_seconds", &[("api", "helix")]).unwrap().value,
            1_700_000_000.0
        );
    }

    #[test]
    fn test_signature_fail_reason_defaults() {
        let rt = RuntimeMetrics::new();
        rt.inc_signature_fail("bad_signature");
        rt.inc_signature_fail("bad_signature");
        rt.inc_signature_fail("");

        let samples = rt.samples();
        assert_eq!(find(&samples, "eventsub_signature_fail", &[("reason", "bad_signature")]).unwrap().value, 2.0);
        assert_eq!(find(&samples, "eventsub_signature_fail", &[("reason", "other")]).unwrap().value, 1.0);
    }
}
