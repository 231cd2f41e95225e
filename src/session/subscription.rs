//! Pushes a session's subscription changes to its client.

use super::notifier::Notifier;
use super::registry::{ChangeStream, SessionRegistry, SubscriptionChange};
use super::{SessionChannel, SubscriptionEvent};
use crate::error::SessionError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub const NAME: &str = "subscription";

/// Start the subscription notifier for `session_id`.
///
/// Changes are forwarded in the order the registry applied them. With a
/// non-zero `refresh`, every subscribed topic is also re-announced on that
/// period.
pub fn start(
    notifier: &mut Notifier,
    session_id: String,
    registry: Arc<SessionRegistry>,
    changes: ChangeStream,
    channel: Arc<dyn SessionChannel>,
    refresh: Option<Duration>,
) -> Result<(), SessionError> {
    notifier.start(move |cancel| run(session_id, registry, changes, channel, refresh, cancel))
}

async fn run(
    session_id: String,
    registry: Arc<SessionRegistry>,
    mut changes: ChangeStream,
    channel: Arc<dyn SessionChannel>,
    refresh: Option<Duration>,
    cancel: CancellationToken,
) -> Result<(), SessionError> {
    let mut ticker = refresh.filter(|d| !d.is_zero()).map(|period| {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        let events = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            change = changes.recv() => match change {
                Some(SubscriptionChange::Added(topic)) => vec![SubscriptionEvent::Added(topic)],
                Some(SubscriptionChange::Removed(topic)) => vec![SubscriptionEvent::Removed(topic)],
                // Stream closes when the session is deregistered.
                None => return Ok(()),
            },
            _ = tick(&mut ticker) => match registry.topics_for(&session_id) {
                Ok(topics) => topics.into_iter().map(SubscriptionEvent::Refreshed).collect(),
                Err(SessionError::NotFound(_)) => return Ok(()),
                Err(e) => return Err(e),
            },
        };

        for event in events {
            trace!(session_id = %session_id, ?event, "Subscription event");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                sent = channel.send_subscription(event) => {
                    if let Err(e) = sent {
                        debug!(session_id = %session_id, error = %e, "Subscription send failed");
                        return Err(e);
                    }
                }
            }
        }
    }
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
