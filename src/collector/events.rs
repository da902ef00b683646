use crate::eventsub::types::Condition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Begin,
    Progress,
    End,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Begin, Stage::Progress, Stage::End];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Progress => "progress",
            Self::End => "end",
        }
    }
}

/// Lifecycle event families that share the `{begin, progress, end}` stage label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StageFamily {
    HypeTrain,
    Goal,
    Poll,
    Prediction,
    Charity,
}

impl StageFamily {
    pub const ALL: [StageFamily; 5] = [
        StageFamily::HypeTrain,
        StageFamily::Goal,
        StageFamily::Poll,
        StageFamily::Prediction,
        StageFamily::Charity,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModerationAction {
    Timeout,
    Ban,
    Unban,
    Delete,
    ShieldOn,
    ShieldOff,
    Warn,
    Other,
}

impl ModerationAction {
    pub const ALL: [ModerationAction; 8] = [
        ModerationAction::Timeout,
        ModerationAction::Ban,
        ModerationAction::Unban,
        ModerationAction::Delete,
        ModerationAction::ShieldOn,
        ModerationAction::ShieldOff,
        ModerationAction::Warn,
        ModerationAction::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Ban => "ban",
            Self::Unban => "unban",
            Self::Delete => "delete",
            Self::ShieldOn => "shield_on",
            Self::ShieldOff => "shield_off",
            Self::Warn => "warn",
            Self::Other => "other",
        }
    }
}

/// Which condition keys a subscription is created with, all set to the self user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionShape {
    Broadcaster,
    BroadcasterModerator,
    ToBroadcaster,
}

impl ConditionShape {
    pub fn build(&self, user_id: &str) -> Condition {
        match self {
            Self::Broadcaster => Condition::new().with("broadcaster_user_id", user_id),
            Self::BroadcasterModerator => Condition::new()
                .with("broadcaster_user_id", user_id)
                .with("moderator_user_id", user_id),
            Self::ToBroadcaster => Condition::new().with("to_broadcaster_user_id", user_id),
        }
    }
}

/// The counter update a notification of a given type performs, on top of the generic
/// notification counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// Only the generic notification counter.
    Notify,
    Follow,
    /// `is_gift` decides between a gift and a `kind=new` subscription.
    Subscribe,
    Resub,
    Gift,
    Cheer,
    Redemption,
    Raid,
    AdBreak,
    Stage(StageFamily, Stage),
    /// `is_permanent` decides between `ban` and `timeout`.
    Ban,
    Moderation(ModerationAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSpec {
    pub event_type: &'static str,
    pub version: &'static str,
    /// `None` means the subscription is created with the app token and is never gated.
    pub scope: Option<&'static str>,
    pub condition: ConditionShape,
    pub update: Update,
}

const fn app(
    event_type: &'static str,
    condition: ConditionShape,
    update: Update,
) -> EventSpec {
    EventSpec {
        event_type,
        version: "1",
        scope: None,
        condition,
        update,
    }
}

const fn user(
    event_type: &'static str,
    version: &'static str,
    scope: &'static str,
    condition: ConditionShape,
    update: Update,
) -> EventSpec {
    EventSpec {
        event_type,
        version,
        scope: Some(scope),
        condition,
        update,
    }
}

use ConditionShape::{Broadcaster, BroadcasterModerator, ToBroadcaster};

/// Every event type the self-channel aggregator subscribes to and understands.
pub const EVENTS: &[EventSpec] = &[
    app("stream.online", Broadcaster, Update::Notify),
    app("stream.offline", Broadcaster, Update::Notify),
    app("channel.raid", ToBroadcaster, Update::Raid),
    user("channel.follow", "2", "moderator:read:followers", BroadcasterModerator, Update::Follow),
    user("channel.subscribe", "1", "channel:read:subscriptions", Broadcaster, Update::Subscribe),
    user("channel.subscription.message", "1", "channel:read:subscriptions", Broadcaster, Update::Resub),
    user("channel.subscription.gift", "1", "channel:read:subscriptions", Broadcaster, Update::Gift),
    user("channel.cheer", "1", "bits:read", Broadcaster, Update::Cheer),
    user(
        "channel.channel_points_custom_reward_redemption.add",
        "1",
        "channel:read:redemptions",
        Broadcaster,
        Update::Redemption,
    ),
    user("channel.hype_train.begin", "1", "channel:read:hype_train", Broadcaster, Update::Stage(StageFamily::HypeTrain, Stage::Begin)),
    user("channel.hype_train.progress", "1", "channel:read:hype_train", Broadcaster, Update::Stage(StageFamily::HypeTrain, Stage::Progress)),
    user("channel.hype_train.end", "1", "channel:read:hype_train", Broadcaster, Update::Stage(StageFamily::HypeTrain, Stage::End)),
    user("channel.goal.begin", "1", "channel:read:goals", Broadcaster, Update::Stage(StageFamily::Goal, Stage::Begin)),
    user("channel.goal.progress", "1", "channel:read:goals", Broadcaster, Update::Stage(StageFamily::Goal, Stage::Progress)),
    user("channel.goal.end", "1", "channel:read:goals", Broadcaster, Update::Stage(StageFamily::Goal, Stage::End)),
    user("channel.poll.begin", "1", "channel:read:polls", Broadcaster, Update::Stage(StageFamily::Poll, Stage::Begin)),
    user("channel.poll.progress", "1", "channel:read:polls", Broadcaster, Update::Stage(StageFamily::Poll, Stage::Progress)),
    user("channel.poll.end", "1", "channel:read:polls", Broadcaster, Update::Stage(StageFamily::Poll, Stage::End)),
    user("channel.prediction.begin", "1", "channel:read:predictions", Broadcaster, Update::Stage(StageFamily::Prediction, Stage::Begin)),
    user("channel.prediction.progress", "1", "channel:read:predictions", Broadcaster, Update::Stage(StageFamily::Prediction, Stage::Progress)),
    // a locked prediction still awaits its outcome
    user("channel.prediction.lock", "1", "channel:read:predictions", Broadcaster, Update::Stage(StageFamily::Prediction, Stage::Progress)),
    user("channel.prediction.end", "1", "channel:read:predictions", Broadcaster, Update::Stage(StageFamily::Prediction, Stage::End)),
    user("channel.charity_campaign.start", "1", "channel:read:charity", Broadcaster, Update::Stage(StageFamily::Charity, Stage::Begin)),
    user("channel.charity_campaign.progress", "1", "channel:read:charity", Broadcaster, Update::Stage(StageFamily::Charity, Stage::Progress)),
    user("channel.charity_campaign.stop", "1", "channel:read:charity", Broadcaster, Update::Stage(StageFamily::Charity, Stage::End)),
    user("channel.ban", "1", "moderation:read", Broadcaster, Update::Ban),
    user("channel.unban", "1", "moderation:read", Broadcaster, Update::Moderation(ModerationAction::Unban)),
    user("channel.chat.message_delete", "1", "moderation:read", BroadcasterModerator, Update::Moderation(ModerationAction::Delete)),
    user("channel.shield_mode.begin", "1", "moderation:read", BroadcasterModerator, Update::Moderation(ModerationAction::ShieldOn)),
    user("channel.shield_mode.end", "1", "moderation:read", BroadcasterModerator, Update::Moderation(ModerationAction::ShieldOff)),
    user("channel.warning.send", "1", "moderator:read:warnings", BroadcasterModerator, Update::Moderation(ModerationAction::Warn)),
    user("channel.ad_break.begin", "1", "channel:read:ads", Broadcaster, Update::AdBreak),
    user("channel.ad_break.end", "1", "channel:read:ads", Broadcaster, Update::Notify),
];

pub fn spec_for(event_type: &str) -> Option<&'static EventSpec> {
    EVENTS.iter().find(|spec| spec.event_type == event_type)
}
