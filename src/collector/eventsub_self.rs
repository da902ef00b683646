use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::value::RawValue;
use tracing::instrument;

use super::capabilities::CapabilityRegistry;
use super::events::{EVENTS, EventSpec, ModerationAction, Stage, StageFamily, Update, spec_for};
use super::reward_grouping::{RewardGroupConfig, RewardGrouping};
use super::runtime::RuntimeMetrics;
use super::watchlist::{ChannelRole, ChannelWatchlist};
use super::{Collector, CollectorResult, Desc, Sample, bool_to_f64};
use crate::eventsub::dispatch::Dispatcher;
use crate::eventsub::subscriber::{Ensured, SubscriptionRegistry, WebhookSubscriber, active_types};
use crate::helix::HelixResult;

pub const NAME: &str = "eventsub_self";

/// Resolves a login to its Twitch user id.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_id(&self, login: &str) -> HelixResult<Option<String>>;
}

const NOTIFICATIONS: Desc = Desc::counter(
    "eventsub_notifications",
    "Total number of EventSub notifications received",
    &["channel", "role", "event_type"],
);
const SUBSCRIPTION_DESIRED: Desc = Desc::gauge(
    "eventsub_subscription_desired",
    "Whether the exporter desires an EventSub subscription for this event type (1 = yes, 0 = no)",
    &["event_type"],
);
const SUBSCRIPTION_ACTIVE: Desc = Desc::gauge(
    "eventsub_subscription_active",
    "Whether an EventSub subscription is currently enabled or pending for this event type (1 = yes, 0 = no)",
    &["event_type"],
);
const FOLLOWS: Desc = Desc::counter(
    "channel_follows",
    "Total number of follows for the channel (EventSub)",
    &["channel"],
);
const SUBSCRIPTIONS: Desc = Desc::counter(
    "channel_subscriptions",
    "Total number of subscription events for the channel (EventSub)",
    &["channel", "kind"],
);
const GIFT_SUBSCRIPTIONS: Desc = Desc::counter(
    "channel_gift_subscriptions",
    "Total number of gifted subscription events for the channel (EventSub)",
    &["channel"],
);
const BITS: Desc = Desc::counter(
    "channel_bits",
    "Total number of bits cheered for the channel (EventSub)",
    &["channel"],
);
const BITS_EVENTS: Desc = Desc::counter(
    "channel_bits_events",
    "Total number of cheer events for the channel (EventSub)",
    &["channel"],
);
const POINTS_REDEMPTIONS: Desc = Desc::counter(
    "channel_points_redemptions",
    "Total number of channel points redemptions for the channel (EventSub)",
    &["channel", "reward_group"],
);
const RAIDS_IN: Desc = Desc::counter(
    "channel_raids_in",
    "Total number of raids into the channel (EventSub)",
    &["channel"],
);
const RAIDS_OUT: Desc = Desc::counter(
    "channel_raids_out",
    "Total number of raids out of the channel (EventSub)",
    &["channel"],
);
const AD_BREAKS: Desc = Desc::counter(
    "ads_ad_breaks",
    "Total number of ad breaks for the channel (EventSub)",
    &["channel"],
);
const AD_MINUTES: Desc = Desc::counter(
    "ads_minutes",
    "Total ad minutes for the channel (EventSub)",
    &["channel"],
);
const HYPE_TRAIN_EVENTS: Desc = Desc::counter(
    "hype_train_events",
    "Total number of hype train events for the channel (EventSub)",
    &["channel", "stage"],
);
const GOALS_EVENTS: Desc = Desc::counter(
    "goals_events",
    "Total number of goal events for the channel (EventSub)",
    &["channel", "stage"],
);
const POLLS_EVENTS: Desc = Desc::counter(
    "polls_events",
    "Total number of poll events for the channel (EventSub)",
    &["channel", "stage"],
);
const PREDICTIONS_EVENTS: Desc = Desc::counter(
    "predictions_events",
    "Total number of prediction events for the channel (EventSub)",
    &["channel", "stage"],
);
const CHARITY_EVENTS: Desc = Desc::counter(
    "charity_events",
    "Total number of charity campaign events for the channel (EventSub)",
    &["channel", "stage"],
);
const MODERATION_ACTIONS: Desc = Desc::counter(
    "moderation_actions",
    "Total number of moderation actions observed for the channel (EventSub)",
    &["channel", "action"],
);

fn stage_desc(family: StageFamily) -> Desc {
    match family {
        StageFamily::HypeTrain => HYPE_TRAIN_EVENTS,
        StageFamily::Goal => GOALS_EVENTS,
        StageFamily::Poll => POLLS_EVENTS,
        StageFamily::Prediction => PREDICTIONS_EVENTS,
        StageFamily::Charity => CHARITY_EVENTS,
    }
}

#[derive(Debug, Deserialize)]
struct SubscribeEvent {
    #[serde(default)]
    is_gift: bool,
}

#[derive(Debug, Deserialize)]
struct CheerEvent {
    #[serde(default)]
    bits: u64,
}

#[derive(Debug, Default, Deserialize)]
struct Reward {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct RedemptionEvent {
    #[serde(default)]
    reward: Reward,
}

#[derive(Debug, Deserialize)]
struct RaidEvent {
    #[serde(default)]
    from_broadcaster_user_id: String,
    #[serde(default)]
    to_broadcaster_user_id: String,
}

#[derive(Debug, Deserialize)]
struct AdBreakEvent {
    #[serde(default)]
    duration_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct BanEvent {
    #[serde(default)]
    is_permanent: bool,
}

/// The payload-specific change a notification makes, decided before taking the lock.
#[derive(Debug)]
enum Effect {
    None,
    Follow,
    Subscription(&'static str),
    Gift,
    Cheer(u64),
    Redemption(String),
    RaidIn,
    RaidOut,
    AdBreak { duration_seconds: u64 },
    Stage(StageFamily, Stage),
    Moderation(ModerationAction),
}

#[derive(Debug, Clone, Default)]
struct EventCounters {
    notifications: BTreeMap<&'static str, f64>,
    follows: f64,
    subscriptions: BTreeMap<&'static str, f64>,
    gift_subscriptions: f64,
    bits: f64,
    bits_events: f64,
    redemptions: BTreeMap<String, f64>,
    raids_in: f64,
    raids_out: f64,
    ad_breaks: f64,
    ad_minutes: f64,
    stages: BTreeMap<(StageFamily, Stage), f64>,
    moderation: BTreeMap<ModerationAction, f64>,
}

impl EventCounters {
    /// Every label combination that can be incremented starts at zero.
    fn seeded<I: IntoIterator<Item = String>>(reward_groups: I) -> Self {
        Self {
            notifications: EVENTS.iter().map(|s| (s.event_type, 0.0)).collect(),
            subscriptions: [("new", 0.0), ("resub", 0.0)].into_iter().collect(),
            redemptions: reward_groups.into_iter().map(|g| (g, 0.0)).collect(),
            stages: StageFamily::ALL
                .iter()
                .flat_map(|f| Stage::ALL.iter().map(move |s| ((*f, *s), 0.0)))
                .collect(),
            moderation: ModerationAction::ALL.iter().map(|a| (*a, 0.0)).collect(),
            ..Default::default()
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::None => {}
            Effect::Follow => self.follows += 1.0,
            Effect::Subscription(kind) => *self.subscriptions.entry(kind).or_default() += 1.0,
            Effect::Gift => self.gift_subscriptions += 1.0,
            Effect::Cheer(bits) => {
                self.bits_events += 1.0;
                self.bits += bits as f64;
            }
            Effect::Redemption(group) => *self.redemptions.entry(group).or_default() += 1.0,
            Effect::RaidIn => self.raids_in += 1.0,
            Effect::RaidOut => self.raids_out += 1.0,
            Effect::AdBreak { duration_seconds } => {
                self.ad_breaks += 1.0;
                if duration_seconds > 0 {
                    self.ad_minutes += duration_seconds as f64 / 60.0;
                }
            }
            Effect::Stage(family, stage) => {
                *self.stages.entry((family, stage)).or_default() += 1.0;
            }
            Effect::Moderation(action) => *self.moderation.entry(action).or_default() += 1.0,
        }
    }
}

#[derive(Debug, Default)]
struct AggregatorState {
    counters: EventCounters,
    desired: BTreeSet<&'static str>,
    grouping_version: u64,
}

impl AggregatorState {
    /// Seeds the groups of a newer reward grouping table. Groups that are no longer
    /// reachable keep their counts.
    fn sync_groups(&mut self, version: u64, config: &RewardGroupConfig) {
        if version <= self.grouping_version {
            return;
        }

        for group in config.groups() {
            self.counters.redemptions.entry(group).or_default();
        }
        self.grouping_version = version;
    }
}

/// In-memory counters for notifications delivered about the self channel.
///
/// Counters only ever grow and reset on restart. Deliveries may repeat or arrive out of order;
/// every delivery counts.
#[derive(Debug)]
pub struct EventAggregator {
    channel: String,
    self_user_id: String,
    grouping: Arc<RewardGrouping>,
    inner: Mutex<AggregatorState>,
}

impl EventAggregator {
    pub fn new(channel: &str, self_user_id: &str, grouping: Arc<RewardGrouping>) -> Self {
        let (grouping_version, config) = grouping.snapshot();
        let counters = EventCounters::seeded(config.groups());
        Self {
            channel: channel.to_string(),
            self_user_id: self_user_id.to_string(),
            grouping,
            inner: Mutex::new(AggregatorState {
                counters,
                desired: BTreeSet::new(),
                grouping_version,
            }),
        }
    }

    pub fn self_user_id(&self) -> &str {
        &self.self_user_id
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Locks the counters after seeding any groups published since the last access.
    fn lock_counters(&self) -> MutexGuard<'_, AggregatorState> {
        let (version, config) = self.grouping.snapshot();
        let mut state = self.lock();
        state.sync_groups(version, &config);
        state
    }

    /// Records a notification of a known type. Returns false for types with no table entry.
    pub fn dispatch(&self, event_type: &str, event: &RawValue) -> bool {
        match spec_for(event_type) {
            Some(spec) => {
                self.record(spec, event);
                true
            }
            None => false,
        }
    }

    /// Bumps the generic notification counter, then the payload-specific one. A payload that
    /// fails to decode only skips the latter.
    pub fn record(&self, spec: &'static EventSpec, event: &RawValue) {
        let effect = match self.effect(spec.update, event) {
            Ok(effect) => effect,
            Err(e) => {
                tracing::warn!(event_type = spec.event_type, error = %e, "failed to decode eventsub payload");
                Effect::None
            }
        };

        let mut state = self.lock_counters();
        *state.counters.notifications.entry(spec.event_type).or_default() += 1.0;
        state.counters.apply(effect);
    }

    fn effect(&self, update: Update, event: &RawValue) -> serde_json::Result<Effect> {
        let effect = match update {
            Update::Notify => Effect::None,
            Update::Follow => Effect::Follow,
            Update::Subscribe => {
                let ev: SubscribeEvent = serde_json::from_str(event.get())?;
                if ev.is_gift {
                    Effect::Gift
                } else {
                    Effect::Subscription("new")
                }
            }
            Update::Resub => Effect::Subscription("resub"),
            Update::Gift => Effect::Gift,
            Update::Cheer => Effect::Cheer(serde_json::from_str::<CheerEvent>(event.get())?.bits),
            Update::Redemption => {
                let ev: RedemptionEvent = serde_json::from_str(event.get())?;
                Effect::Redemption(self.grouping.group_for(&ev.reward.id, &ev.reward.title))
            }
            Update::Raid => {
                let ev: RaidEvent = serde_json::from_str(event.get())?;
                if ev.to_broadcaster_user_id == self.self_user_id {
                    Effect::RaidIn
                } else if ev.from_broadcaster_user_id == self.self_user_id {
                    Effect::RaidOut
                } else {
                    Effect::None
                }
            }
            Update::AdBreak => Effect::AdBreak {
                duration_seconds: serde_json::from_str::<AdBreakEvent>(event.get())?.duration_seconds,
            },
            Update::Stage(family, stage) => Effect::Stage(family, stage),
            Update::Ban => {
                let ev: BanEvent = serde_json::from_str(event.get())?;
                if ev.is_permanent {
                    Effect::Moderation(ModerationAction::Ban)
                } else {
                    Effect::Moderation(ModerationAction::Timeout)
                }
            }
            Update::Moderation(action) => Effect::Moderation(action),
        };

        Ok(effect)
    }

    pub fn desire(&self, event_type: &'static str) {
        self.lock().desired.insert(event_type);
    }

    pub fn desired(&self) -> BTreeSet<&'static str> {
        self.lock().desired.clone()
    }

    /// Point-in-time copy of every counter as samples.
    pub fn samples(&self) -> Vec<Sample> {
        let c = self.lock_counters().counters.clone();
        let ch = self.channel.as_str();
        let role = ChannelRole::SelfChannel.as_str();

        let mut out = Vec::new();
        for (event_type, v) in &c.notifications {
            out.push(NOTIFICATIONS.sample(*v, &[ch, role, *event_type]));
        }

        out.push(FOLLOWS.sample(c.follows, &[ch]));
        out.push(GIFT_SUBSCRIPTIONS.sample(c.gift_subscriptions, &[ch]));
        for (kind, v) in &c.subscriptions {
            out.push(SUBSCRIPTIONS.sample(*v, &[ch, *kind]));
        }
        out.push(BITS.sample(c.bits, &[ch]));
        out.push(BITS_EVENTS.sample(c.bits_events, &[ch]));
        for (group, v) in &c.redemptions {
            out.push(POINTS_REDEMPTIONS.sample(*v, &[ch, group.as_str()]));
        }
        out.push(RAIDS_IN.sample(c.raids_in, &[ch]));
        out.push(RAIDS_OUT.sample(c.raids_out, &[ch]));
        out.push(AD_BREAKS.sample(c.ad_breaks, &[ch]));
        out.push(AD_MINUTES.sample(c.ad_minutes, &[ch]));

        for ((family, stage), v) in &c.stages {
            out.push(stage_desc(*family).sample(*v, &[ch, stage.as_str()]));
        }
        for (action, v) in &c.moderation {
            out.push(MODERATION_ACTIONS.sample(*v, &[ch, action.as_str()]));
        }

        out
    }
}

/// Everything the self-channel collector may be built from. Missing pieces disable it.
pub struct EventSubSetup {
    pub watchlist: Arc<ChannelWatchlist>,
    pub webhook: Option<WebhookSubscriber>,
    /// Registry authenticated with the app token; lists subscriptions and creates unscoped ones.
    pub app_registry: Option<Arc<dyn SubscriptionRegistry>>,
    /// Registry authenticated with the user token, for scope-gated types.
    pub user_registry: Option<Arc<dyn SubscriptionRegistry>>,
    pub users: Option<Arc<dyn UserDirectory>>,
    pub capabilities: Arc<CapabilityRegistry>,
    pub grouping: Arc<RewardGrouping>,
    pub runtime: Arc<RuntimeMetrics>,
}

/// Push-notification counters and subscription state for the self channel.
pub struct EventSubSelfCollector {
    aggregator: Arc<EventAggregator>,
    subscriber: WebhookSubscriber,
    app_registry: Arc<dyn SubscriptionRegistry>,
    user_registry: Option<Arc<dyn SubscriptionRegistry>>,
    capabilities: Arc<CapabilityRegistry>,
    runtime: Arc<RuntimeMetrics>,
}

impl EventSubSelfCollector {
    /// Looks up the self channel's user id. Returns `None`, after recording why, when the
    /// collector cannot run.
    #[instrument(skip_all)]
    pub async fn new(setup: EventSubSetup) -> CollectorResult<Option<Self>> {
        let disabled = |reason: &'static str| {
            tracing::warn!(collector = NAME, reason, "collector disabled");
            setup.runtime.inc_collector_disabled(NAME, reason);
            Ok(None)
        };

        if let Err(e) = setup.watchlist.validate_has_self() {
            tracing::debug!(error = %e, "no self channel to subscribe for");
            return disabled("not_self_channel");
        }
        let login = setup.watchlist.self_login();

        let (Some(subscriber), Some(app_registry)) = (setup.webhook.clone(), setup.app_registry.clone())
        else {
            return disabled("config_disabled");
        };

        let Some(users) = setup.users.as_ref() else {
            return disabled("missing_token");
        };

        let Some(user_id) = users.user_id(login).await? else {
            return disabled("not_self_channel");
        };

        tracing::info!(login, user_id = %user_id, "resolved self channel");
        let aggregator = EventAggregator::new(login, &user_id, Arc::clone(&setup.grouping));

        Ok(Some(Self {
            aggregator: Arc::new(aggregator),
            subscriber,
            app_registry,
            user_registry: setup.user_registry.clone(),
            capabilities: Arc::clone(&setup.capabilities),
            runtime: Arc::clone(&setup.runtime),
        }))
    }

    pub fn aggregator(&self) -> &Arc<EventAggregator> {
        &self.aggregator
    }

    /// One dispatcher entry per event table row.
    pub fn register_handlers(&self, dispatcher: &mut Dispatcher) {
        for spec in EVENTS {
            let aggregator = Arc::clone(&self.aggregator);
            dispatcher.on(
                spec.event_type,
                Arc::new(move |event: &RawValue| aggregator.record(spec, event)),
            );
        }
    }

    /// Ensures a subscription for every table row the current capabilities allow. Failures are
    /// logged per type and remain visible as desired but inactive.
    #[instrument(skip(self), fields(user_id = %self.aggregator.self_user_id()))]
    pub async fn reconcile(&self) {
        let caps = self.capabilities.current();

        for spec in EVENTS {
            let registry = match spec.scope {
                None => &self.app_registry,
                Some(scope) if caps.has_user_scope(scope) => {
                    self.user_registry.as_ref().unwrap_or(&self.app_registry)
                }
                Some(scope) => {
                    tracing::debug!(event_type = spec.event_type, scope, "missing scope, skipping subscription");
                    self.runtime.inc_collector_disabled(NAME, "missing_scope");
                    continue;
                }
            };

            self.aggregator.desire(spec.event_type);
            let condition = spec.condition.build(self.aggregator.self_user_id());
            match self
                .subscriber
                .ensure(registry.as_ref(), spec.event_type, spec.version, &condition)
                .await
            {
                Ok(Ensured::Created) => tracing::debug!(event_type = spec.event_type, "subscription requested"),
                Ok(Ensured::Existing) => {}
                Err(e) => {
                    tracing::warn!(event_type = spec.event_type, error = %e, "failed to subscribe to eventsub");
                }
            }
        }
    }
}

#[async_trait]
impl Collector for EventSubSelfCollector {
    async fn update(&self, out: &mut Vec<Sample>) -> CollectorResult<()> {
        let desired = self.aggregator.desired();
        for event_type in &desired {
            out.push(SUBSCRIPTION_DESIRED.sample(1.0, &[*event_type]));
        }

        let active = match active_types(self.app_registry.as_ref()).await {
            Ok(active) => active,
            Err(e) => {
                tracing::debug!(error = %e, "failed to list eventsub subscriptions");
                BTreeSet::new()
            }
        };
        for event_type in &desired {
            let v = bool_to_f64(active.contains(*event_type));
            out.push(SUBSCRIPTION_ACTIVE.sample(v, &[*event_type]));
        }

        out.extend(self.aggregator.samples());
        Ok(())
    }
}
