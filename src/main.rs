mod args;
mod collector;
mod config;
mod constants;
mod eventsub;
mod helix;
mod server;
mod util;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;

use collector::capabilities::CapabilityRegistry;
use collector::channel_core::{self, ChannelCoreCollector, StreamSource};
use collector::eventsub_self::{self, EventSubSelfCollector, EventSubSetup, UserDirectory};
use collector::reward_grouping::{RewardGroupConfig, RewardGrouping};
use collector::runtime::RuntimeMetrics;
use collector::watchlist::ChannelWatchlist;
use collector::watchlist_size::{self, WatchlistSizeCollector};
use collector::{Collector, Exporter, collector_enabled};
use constants::{API_HELIX_URL, API_OAUTH_URL};
use eventsub::dispatch::Dispatcher;
use eventsub::subscriber::{SubscriptionRegistry, WebhookSubscriber};
use eventsub::verify::SignatureVerifier;
use helix::HelixClient;
use helix::auth::{OAuthClient, TokenCell, UserSession, spawn_refresh};
use server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // a missing .env file is fine; flags and the environment still apply
    let _ = dotenvy::dotenv();
    let cli = args::Cli::parse();
    util::tracing::build_subscriber(&cli.log_level, cli.log_format)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting twitch exporter");

    let runtime = Arc::new(RuntimeMetrics::new());
    let capabilities = Arc::new(CapabilityRegistry::new());

    let mut configured = !cli.client_id.is_empty() && !cli.client_secret.is_empty();
    if !configured {
        tracing::warn!(
            missing_client_id = cli.client_id.is_empty(),
            missing_client_secret = cli.client_secret.is_empty(),
            "twitch credentials not configured; exporter will start but helix collectors are disabled"
        );
    }

    let user_present = !cli.access_token.is_empty() && !cli.refresh_token.is_empty();
    runtime.set_oauth_token_present("app", configured);
    runtime.set_oauth_token_present("user", user_present);

    let grouping = RewardGroupConfig::new(
        &cli.reward_group_default,
        &cli.reward_group_unknown,
        cli.reward_group_max,
        cli.reward_group_id.clone(),
        cli.reward_group_title.clone(),
    )
    .context("invalid reward group configuration")?;
    let grouping = Arc::new(RewardGrouping::new(grouping));

    let http = helix::build_http_client()?;
    let oauth = Arc::new(OAuthClient::new(
        http.clone(),
        API_OAUTH_URL,
        &cli.client_id,
        &cli.client_secret,
        Arc::clone(&runtime),
    ));

    let session = user_present.then(|| Arc::new(UserSession::new(&cli.access_token, &cli.refresh_token)));
    let mut scopes = Vec::new();
    if let Some(session) = &session {
        if configured && let Err(e) = session.refresh(&oauth).await {
            tracing::warn!(error = %e, "failed to refresh user token at startup");
        }

        match oauth.validate(&session.access.get()).await {
            Ok(validated) => scopes = validated.scopes,
            Err(e) => tracing::warn!(error = %e, "failed to validate user token scopes"),
        }
    }
    runtime.set_known_oauth_scopes(&scopes);
    capabilities.publish(configured, user_present, &scopes);

    let app_token = TokenCell::default();
    if configured {
        match oauth.app_token().await {
            Ok(token) => app_token.set(&token.access_token),
            Err(e) => {
                tracing::error!(error = %e, "failed to obtain app access token; helix collectors are disabled");
                configured = false;
            }
        }
    }
    runtime.set_configured(configured);

    let mut helix: Option<Arc<HelixClient>> = None;
    let mut eventsub_helix: Option<Arc<HelixClient>> = None;
    if configured {
        let token = match &session {
            Some(session) => session.access.clone(),
            None => app_token.clone(),
        };
        tracing::info!(client_type = if session.is_some() { "user" } else { "app" }, "client type determined");

        helix = Some(Arc::new(HelixClient::new(
            http.clone(),
            API_HELIX_URL,
            &cli.client_id,
            token,
            "helix",
            Arc::clone(&runtime),
        )));
        eventsub_helix = Some(Arc::new(HelixClient::new(
            http.clone(),
            API_HELIX_URL,
            &cli.client_id,
            app_token.clone(),
            "eventsub",
            Arc::clone(&runtime),
        )));

        let (app_oauth, cell) = (Arc::clone(&oauth), app_token.clone());
        spawn_refresh("app", move || {
            let (oauth, cell) = (Arc::clone(&app_oauth), cell.clone());
            async move {
                let token = oauth.app_token().await?;
                cell.set(&token.access_token);
                Ok(())
            }
        });

        if let Some(session) = &session {
            let (oauth, session) = (Arc::clone(&oauth), Arc::clone(session));
            let (capabilities, runtime) = (Arc::clone(&capabilities), Arc::clone(&runtime));
            spawn_refresh("user", move || {
                let (oauth, session) = (Arc::clone(&oauth), Arc::clone(&session));
                let (capabilities, runtime) = (Arc::clone(&capabilities), Arc::clone(&runtime));
                async move {
                    let scopes = session.refresh(&oauth).await?;
                    if !scopes.is_empty() {
                        runtime.set_known_oauth_scopes(&scopes);
                        capabilities.publish(true, true, &scopes);
                    }
                    Ok(())
                }
            });
        }
    }

    let mut webhook = None;
    let mut verifier = None;
    if cli.eventsub_enabled {
        if cli.webhook_url.is_empty() || cli.webhook_secret.is_empty() {
            tracing::error!("eventsub enabled but webhook url/secret are missing; disabling eventsub");
        } else {
            config::validate_webhook_url(&cli.webhook_url)?;
            config::validate_webhook_secret(&cli.webhook_secret)?;

            if eventsub_helix.is_none() {
                tracing::error!("eventsub enabled but twitch client is not configured; disabling eventsub");
            } else {
                tracing::info!(endpoint = constants::EVENTSUB_ROUTE, callback = %cli.webhook_url, "eventsub endpoint enabled");
                let hook_runtime = Arc::clone(&runtime);
                verifier = Some(Arc::new(SignatureVerifier::new(&cli.webhook_secret).with_failure_hook(
                    Arc::new(move |reason: &'static str| hook_runtime.inc_signature_fail(reason)),
                )));
                webhook = Some(WebhookSubscriber::new(&cli.webhook_url, &cli.webhook_secret));
            }
        }
    }

    let (self_login, watch_logins) = cli.channels();
    let watchlist = ChannelWatchlist::new(&self_login, &watch_logins)
        .context("invalid watchlist configuration")?;
    let watchlist = Arc::new(watchlist);
    tracing::info!(self_channel = watchlist.self_login(), watch_count = watch_logins.len(), "watchlist configured");

    let mut exporter = Exporter::new(Arc::clone(&runtime));
    let mut dispatcher = Dispatcher::new();
    let enabled = |name: &str| collector_enabled(name, &cli.collector_enable, &cli.collector_disable);

    if enabled(channel_core::NAME) {
        let source = helix.as_ref().map(|h| Arc::clone(h) as Arc<dyn StreamSource>);
        if source.is_none() {
            runtime.inc_collector_disabled(channel_core::NAME, "missing_token");
        }
        exporter.register(
            channel_core::NAME,
            Arc::new(ChannelCoreCollector::new(source, Arc::clone(&watchlist))),
        );
    }

    if enabled(watchlist_size::NAME) {
        exporter.register(
            watchlist_size::NAME,
            Arc::new(WatchlistSizeCollector::new(Arc::clone(&watchlist))),
        );
    }

    let mut eventsub_collector = None;
    if enabled(eventsub_self::NAME) {
        let setup = EventSubSetup {
            watchlist: Arc::clone(&watchlist),
            webhook,
            app_registry: eventsub_helix.map(|h| h as Arc<dyn SubscriptionRegistry>),
            user_registry: helix
                .as_ref()
                .filter(|_| session.is_some())
                .map(|h| Arc::clone(h) as Arc<dyn SubscriptionRegistry>),
            users: helix.as_ref().map(|h| Arc::clone(h) as Arc<dyn UserDirectory>),
            capabilities: Arc::clone(&capabilities),
            grouping: Arc::clone(&grouping),
            runtime: Arc::clone(&runtime),
        };

        match EventSubSelfCollector::new(setup).await {
            Ok(Some(collector)) => {
                let collector = Arc::new(collector);
                collector.register_handlers(&mut dispatcher);
                exporter.register(eventsub_self::NAME, Arc::clone(&collector) as Arc<dyn Collector>);
                eventsub_collector = Some(collector);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(error = %e, "failed to create eventsub collector");
                runtime.observe_collector_error(eventsub_self::NAME, e.reason());
            }
        }
    }
    tracing::info!(
        collectors = ?exporter.collector_names(),
        eventsub_handlers = dispatcher.handler_count(),
        "collectors enabled"
    );

    let state = Arc::new(AppState {
        exporter,
        dispatcher,
        telemetry_path: cli.telemetry_path(),
    });
    let app = server::router(state, verifier);

    let listener = TcpListener::bind(&cli.listen_address)
        .await
        .with_context(|| format!("failed to bind {}", cli.listen_address))?;
    tracing::info!(address = %listener.local_addr()?, telemetry_path = %cli.telemetry_path(), "server ready");

    // subscriptions are verified through the callback route, so the listener must be up first
    if let Some(collector) = eventsub_collector {
        tokio::spawn(async move { collector.reconcile().await });
    }

    server::serve(listener, app).await?;
    Ok(())
}
