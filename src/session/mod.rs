//! Session lifecycle and per-session notifications.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  Transport (stdio / streamable HTTP)                      │
//! │     │ run_session(id, channel, token, protocol)           │
//! │     ▼                                                     │
//! │  SessionSupervisor ──register──▶ SessionRegistry          │
//! │     │                            id → SubscriptionSet     │
//! │     ├─ subscription notifier ◀── ordered change stream    │
//! │     ├─ logging notifier      ◀── LogHub (level + events)  │
//! │     └─ protocol loop (tool calls → ToolDispatcher)        │
//! │                                                           │
//! │  notifiers ──▶ SessionChannel (the session's peer)        │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Stateless connections carry no session id and skip the registry and
//! notifiers entirely.

pub mod logging;
pub mod notifier;
pub mod registry;
pub mod subscription;
mod supervisor;

pub use notifier::{Notifier, NotifierState};
pub use registry::{SessionRegistration, SessionRegistry, SubscriptionChange};
pub use supervisor::{SessionEnd, SessionSupervisor};

use crate::error::SessionError;
use crate::logging::{LogEvent, LogLevel};
use async_trait::async_trait;

/// Emitted by the subscription notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Added(String),
    Removed(String),
    /// Periodic re-announcement of a topic that is still subscribed.
    Refreshed(String),
}

impl SubscriptionEvent {
    pub fn topic(&self) -> &str {
        match self {
            SubscriptionEvent::Added(t)
            | SubscriptionEvent::Removed(t)
            | SubscriptionEvent::Refreshed(t) => t,
        }
    }
}

/// Emitted by the logging notifier.
#[derive(Debug, Clone, PartialEq)]
pub enum LoggingEvent {
    LevelChanged(LogLevel),
    Message(LogEvent),
}

/// Outbound side of one session. Only that session's notifiers write to it.
#[async_trait]
pub trait SessionChannel: Send + Sync {
    async fn send_subscription(&self, event: SubscriptionEvent) -> Result<(), SessionError>;

    async fn send_logging(&self, event: LoggingEvent) -> Result<(), SessionError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::watch;

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mode {
        Deliver,
        Closed,
        Stalled,
    }

    /// Records everything sent to it.
    pub struct RecordingChannel {
        mode: Mode,
        subscription: Mutex<Vec<SubscriptionEvent>>,
        logging: Mutex<Vec<LoggingEvent>>,
        subscription_count: watch::Sender<usize>,
        logging_count: watch::Sender<usize>,
        attempts: watch::Sender<usize>,
    }

    impl Default for RecordingChannel {
        fn default() -> Self {
            Self::with_mode(Mode::Deliver)
        }
    }

    impl RecordingChannel {
        fn with_mode(mode: Mode) -> Self {
            Self {
                mode,
                subscription: Mutex::new(Vec::new()),
                logging: Mutex::new(Vec::new()),
                subscription_count: watch::channel(0).0,
                logging_count: watch::channel(0).0,
                attempts: watch::channel(0).0,
            }
        }

        /// Every send fails as if the client went away.
        pub fn closed() -> Self {
            Self::with_mode(Mode::Closed)
        }

        /// Every send blocks forever.
        pub fn stalled() -> Self {
            Self::with_mode(Mode::Stalled)
        }

        pub fn subscription_events(&self) -> Vec<SubscriptionEvent> {
            self.subscription.lock().unwrap().clone()
        }

        pub fn logging_events(&self) -> Vec<LoggingEvent> {
            self.logging.lock().unwrap().clone()
        }

        pub async fn wait_for_subscription_events(&self, n: usize) {
            wait_for(&self.subscription_count, n).await;
        }

        pub async fn wait_for_logging_events(&self, n: usize) {
            wait_for(&self.logging_count, n).await;
        }

        pub async fn wait_for_attempts(&self, n: usize) {
            wait_for(&self.attempts, n).await;
        }

        async fn gate(&self) -> Result<(), SessionError> {
            self.attempts.send_modify(|n| *n += 1);
            match self.mode {
                Mode::Deliver => Ok(()),
                Mode::Closed => Err(SessionError::ChannelClosed("client gone".into())),
                Mode::Stalled => std::future::pending().await,
            }
        }
    }

    async fn wait_for(counter: &watch::Sender<usize>, n: usize) {
        let mut rx = counter.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|count| *count >= n))
            .await
            .expect("timed out waiting for events")
            .expect("counter dropped");
    }

    #[async_trait]
    impl SessionChannel for RecordingChannel {
        async fn send_subscription(&self, event: SubscriptionEvent) -> Result<(), SessionError> {
            self.gate().await?;
            self.subscription.lock().unwrap().push(event);
            self.subscription_count.send_modify(|n| *n += 1);
            Ok(())
        }

        async fn send_logging(&self, event: LoggingEvent) -> Result<(), SessionError> {
            self.gate().await?;
            self.logging.lock().unwrap().push(event);
            self.logging_count.send_modify(|n| *n += 1);
            Ok(())
        }
    }
}
