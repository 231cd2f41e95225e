//! Orchestrates one session's lifetime.

use super::notifier::Notifier;
use super::registry::SessionRegistry;
use super::{logging, subscription, SessionChannel};
use crate::error::SessionError;
use crate::logging::LogHub;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The protocol loop finished (client disconnected or closed the session).
    Closed,
    /// The session token was cancelled.
    Cancelled,
    /// A notifier finished on its own, e.g. the session was deregistered
    /// from elsewhere.
    NotifierEnded(&'static str),
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Closed => f.write_str("closed"),
            SessionEnd::Cancelled => f.write_str("cancelled"),
            SessionEnd::NotifierEnded(name) => write!(f, "{name} notifier ended"),
        }
    }
}

/// Runs sessions against the shared registry and log hub.
#[derive(Clone)]
pub struct SessionSupervisor {
    registry: Arc<SessionRegistry>,
    log_hub: Arc<LogHub>,
    refresh: Option<Duration>,
}

impl SessionSupervisor {
    pub fn new(registry: Arc<SessionRegistry>, log_hub: Arc<LogHub>) -> Self {
        Self {
            registry,
            log_hub,
            refresh: None,
        }
    }

    /// Periodically re-announce subscribed topics; zero disables.
    pub fn with_refresh(mut self, refresh: Duration) -> Self {
        self.refresh = (!refresh.is_zero()).then_some(refresh);
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn log_hub(&self) -> &Arc<LogHub> {
        &self.log_hub
    }

    /// Run one session until its protocol loop ends, `cancel` fires or a
    /// notifier dies.
    ///
    /// Without a `session_id` the protocol runs alone. Otherwise the session
    /// is registered, both notifiers are started against a child of `cancel`
    /// and `protocol` receives that child token. However this returns, or if
    /// the future is dropped, the notifiers are stopped and the session is
    /// deregistered exactly once. A duplicate id fails before anything runs.
    pub async fn run_session<P, Fut>(
        &self,
        session_id: Option<&str>,
        channel: Arc<dyn SessionChannel>,
        cancel: CancellationToken,
        protocol: P,
    ) -> Result<SessionEnd, SessionError>
    where
        P: FnOnce(CancellationToken) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let Some(id) = session_id else {
            return Ok(tokio::select! {
                _ = cancel.cancelled() => SessionEnd::Cancelled,
                _ = protocol(cancel.clone()) => SessionEnd::Closed,
            });
        };

        let mut registration = self.registry.register(id)?;
        let session_token = cancel.child_token();
        let _cancel_on_drop = session_token.clone().drop_guard();
        let mut subscriptions = Notifier::new(subscription::NAME, &session_token);
        let mut logs = Notifier::new(logging::NAME, &session_token);

        let outcome: Result<SessionEnd, SessionError> = async {
            let changes = registration.take_changes().ok_or_else(|| {
                SessionError::NotifierFailed {
                    notifier: subscription::NAME,
                    reason: "change stream already taken".to_string(),
                }
            })?;
            subscription::start(
                &mut subscriptions,
                id.to_string(),
                Arc::clone(&self.registry),
                changes,
                Arc::clone(&channel),
                self.refresh,
            )?;
            logging::start(&mut logs, id.to_string(), &self.log_hub, Arc::clone(&channel))?;
            info!(session_id = %id, "Session started");

            tokio::select! {
                _ = session_token.cancelled() => Ok(SessionEnd::Cancelled),
                _ = protocol(session_token.clone()) => Ok(SessionEnd::Closed),
                res = subscriptions.finished() => res.map(|_| SessionEnd::NotifierEnded(subscription::NAME)),
                res = logs.finished() => res.map(|_| SessionEnd::NotifierEnded(logging::NAME)),
            }
        }
        .await;

        session_token.cancel();
        for (notifier, stopped) in [
            (subscription::NAME, subscriptions.stop().await),
            (logging::NAME, logs.stop().await),
        ] {
            if let Err(e) = stopped {
                warn!(session_id = %id, notifier, error = %e, "Notifier stopped with error");
            }
        }
        registration.release();

        match &outcome {
            Ok(end) => info!(session_id = %id, reason = %end, "Session ended"),
            Err(e) => warn!(session_id = %id, error = %e, "Session ended with error"),
        }
        outcome
    }
}
