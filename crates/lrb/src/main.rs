use std::sync::Arc;

use anyhow::Context;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;

use lrb_core::{
    config::Config,
    correlation::CorrelationCache,
    domain::Platform,
    relay::{log::RelayLog, RelayEngine, RelaySettings},
    status::{spawn_status_task, StatusSnapshot},
    Error,
};
use lrb_discord::{poller::DiscordPoller, DiscordClient};
use lrb_slack::{poller::SlackPoller, SlackClient};

/// Inbound events buffered per platform before pollers wait on the relay.
const EVENT_QUEUE: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Error> {
    lrb_core::logging::init("lrb")?;

    let cfg = Config::load()?;
    let history_limit = u8::try_from(cfg.poll_history_limit).unwrap_or(100);

    let discord = DiscordClient::new(cfg.discord_bot_token.clone(), cfg.call_timeout)?;
    let slack = SlackClient::new(cfg.slack_bot_token.clone(), cfg.call_timeout)?;

    let engine = Arc::new(RelayEngine::new(
        RelaySettings::from_config(&cfg),
        Arc::new(CorrelationCache::new(cfg.correlation_ttl)),
        Arc::new(RelayLog::new(
            &cfg.relay_log_path,
            cfg.relay_log_json,
            cfg.relay_log_capacity,
        )),
        Arc::new(discord.clone()),
        Arc::new(slack.clone()),
    ));

    let cancel = CancellationToken::new();
    let mut pollers = JoinSet::new();
    let mut listeners = Vec::new();

    let discord_channels = cfg.watched_channels(Platform::Discord);
    if !discord_channels.is_empty() {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        listeners.push(tokio::spawn(engine.clone().run_listener(Platform::Discord, rx)));
        let poller = DiscordPoller::new(discord, discord_channels, cfg.poll_interval, history_limit);
        let cancel = cancel.clone();
        pollers.spawn(async move { poller.run(tx, cancel).await.context("discord poller") });
    }

    let slack_channels = cfg.watched_channels(Platform::Slack);
    if !slack_channels.is_empty() {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        listeners.push(tokio::spawn(engine.clone().run_listener(Platform::Slack, rx)));
        let poller = SlackPoller::new(slack, slack_channels, cfg.poll_interval, history_limit);
        let cancel = cancel.clone();
        pollers.spawn(async move { poller.run(tx, cancel).await.context("slack poller") });
    }

    let status = spawn_status_task(engine.clone(), cfg.status_interval, cancel.clone());
    tracing::info!(
        correlation_ttl_secs = cfg.correlation_ttl.as_secs(),
        relay_log = %cfg.relay_log_path.display(),
        "relay running"
    );

    let result = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            res.map_err(Error::Io)
        }
        Some(joined) = pollers.join_next() => Err(poller_exit(joined)),
    };

    cancel.cancel();
    while let Some(joined) = pollers.join_next().await {
        if let Ok(Err(e)) = joined {
            tracing::warn!(error = %format!("{e:#}"), "poller failed during shutdown");
        }
    }
    // Pollers own the senders; once they are gone each listener drains and stops.
    for listener in listeners {
        if let Err(e) = listener.await {
            tracing::error!(error = %e, "relay listener aborted");
        }
    }
    let _ = status.await;

    tracing::info!("{}", StatusSnapshot::capture(&engine));
    result
}

fn poller_exit(joined: Result<anyhow::Result<()>, tokio::task::JoinError>) -> Error {
    let reason = match joined {
        Ok(Ok(())) => "poller stopped unexpectedly".to_string(),
        Ok(Err(e)) => format!("{e:#}"),
        Err(e) => format!("poller task failed: {e}"),
    };
    tracing::error!(%reason, "shutting down");
    Error::External(reason)
}
