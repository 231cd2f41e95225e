//! Pushes process-wide log level changes and log messages to one session.

use super::notifier::Notifier;
use super::{LoggingEvent, SessionChannel};
use crate::error::SessionError;
use crate::logging::{LogHub, LogSubscription};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const NAME: &str = "logging";

/// Start the logging notifier for `session_id`.
///
/// Subscribes to `hub` before spawning, so nothing published after this
/// returns is missed.
pub fn start(
    notifier: &mut Notifier,
    session_id: String,
    hub: &LogHub,
    channel: Arc<dyn SessionChannel>,
) -> Result<(), SessionError> {
    let source = hub.subscribe();
    notifier.start(move |cancel| run(session_id, source, channel, cancel))
}

async fn run(
    session_id: String,
    source: LogSubscription,
    channel: Arc<dyn SessionChannel>,
    cancel: CancellationToken,
) -> Result<(), SessionError> {
    let LogSubscription {
        mut level,
        mut events,
    } = source;
    let mut threshold = *level.borrow_and_update();

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            changed = level.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                threshold = *level.borrow_and_update();
                LoggingEvent::LevelChanged(threshold)
            }
            received = events.recv() => match received {
                Ok(event) if event.level >= threshold => LoggingEvent::Message(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(session_id = %session_id, skipped, "Log events dropped for slow session");
                    continue;
                }
                Err(RecvError::Closed) => return Ok(()),
            },
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            sent = channel.send_logging(event) => {
                if let Err(e) = sent {
                    debug!(session_id = %session_id, error = %e, "Logging send failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogEvent, LogLevel};
    use crate::session::notifier::NotifierState;
    use crate::session::testing::RecordingChannel;
    use std::time::Duration;

    #[tokio::test]
    async fn emits_level_changes_and_messages_at_or_above_level() {
        let hub = LogHub::new(LogLevel::Info, 16);
        let channel = Arc::new(RecordingChannel::default());
        let parent = CancellationToken::new();
        let mut notifier = Notifier::new(NAME, &parent);
        start(&mut notifier, "s1".to_string(), &hub, channel.clone()).unwrap();

        hub.publish(LogEvent::new(LogLevel::Info, "inmate_mcp::server", "first"));
        channel.wait_for_logging_events(1).await;
        hub.set_level(LogLevel::Error);
        channel.wait_for_logging_events(2).await;
        hub.publish(LogEvent::new(LogLevel::Warning, "inmate_mcp::server", "filtered"));
        hub.publish(LogEvent::new(LogLevel::Error, "inmate_mcp::server", "kept"));
        channel.wait_for_logging_events(3).await;

        let events = channel.logging_events();
        assert!(matches!(&events[0], LoggingEvent::Message(e) if e.message == "first"));
        assert_eq!(events[1], LoggingEvent::LevelChanged(LogLevel::Error));
        assert!(matches!(&events[2], LoggingEvent::Message(e) if e.message == "kept"));
        assert_eq!(events.len(), 3);

        notifier.stop().await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_promptly_mid_send() {
        let hub = LogHub::new(LogLevel::Debug, 16);
        let channel = Arc::new(RecordingChannel::stalled());
        let parent = CancellationToken::new();
        let mut notifier = Notifier::new(NAME, &parent);
        let mut state = notifier.watch_state();
        start(&mut notifier, "s1".to_string(), &hub, channel.clone()).unwrap();

        hub.publish(LogEvent::new(LogLevel::Info, "inmate_mcp::server", "stuck"));
        channel.wait_for_attempts(1).await;
        parent.cancel();

        tokio::time::timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == NotifierState::Stopped),
        )
        .await
        .expect("stopped mid-send")
        .unwrap();
    }

    #[tokio::test]
    async fn closed_channel_is_an_error() {
        let hub = LogHub::new(LogLevel::Debug, 16);
        let parent = CancellationToken::new();
        let mut notifier = Notifier::new(NAME, &parent);
        start(
            &mut notifier,
            "s1".to_string(),
            &hub,
            Arc::new(RecordingChannel::closed()),
        )
        .unwrap();

        hub.publish(LogEvent::new(LogLevel::Info, "inmate_mcp::server", "lost"));
        assert!(matches!(
            notifier.finished().await,
            Err(SessionError::ChannelClosed(_))
        ));
    }
}
