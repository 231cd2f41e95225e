//! Lifecycle shared by the per-session background notifiers.

use crate::error::SessionError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long `stop` waits for the task to observe cancellation before aborting it.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// `Created -> Running -> Stopped`; a stopped notifier never restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierState {
    Created,
    Running,
    Stopped,
}

impl NotifierState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifierState::Created => "created",
            NotifierState::Running => "running",
            NotifierState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for NotifierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marks the notifier stopped however its task exits, including abort.
struct StopOnExit(Arc<watch::Sender<NotifierState>>);

impl Drop for StopOnExit {
    fn drop(&mut self) {
        self.0.send_replace(NotifierState::Stopped);
    }
}

/// A background task bound to a session's cancellation token.
pub struct Notifier {
    name: &'static str,
    state: Arc<watch::Sender<NotifierState>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<Result<(), SessionError>>>,
}

impl Notifier {
    /// Create a notifier whose token is a child of `parent`.
    pub fn new(name: &'static str, parent: &CancellationToken) -> Self {
        let (state, _) = watch::channel(NotifierState::Created);
        Self {
            name,
            state: Arc::new(state),
            cancel: parent.child_token(),
            handle: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> NotifierState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<NotifierState> {
        self.state.subscribe()
    }

    /// Spawn the task produced by `run`, handing it this notifier's token.
    pub fn start<F, Fut>(&mut self, run: F) -> Result<(), SessionError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), SessionError>> + Send + 'static,
    {
        let current = self.state();
        if current != NotifierState::Created {
            return Err(SessionError::NotifierState {
                notifier: self.name,
                action: "start",
                state: current.as_str(),
            });
        }
        self.state.send_replace(NotifierState::Running);

        let guard = StopOnExit(Arc::clone(&self.state));
        let fut = run(self.cancel.clone());
        let name = self.name;
        self.handle = Some(tokio::spawn(async move {
            let _guard = guard;
            let result = fut.await;
            if let Err(e) = &result {
                warn!(notifier = name, error = %e, "Notifier ended with error");
            }
            result
        }));
        debug!(notifier = self.name, "Notifier started");
        Ok(())
    }

    /// Wait for the task to end on its own. Pending forever if never started.
    pub async fn finished(&mut self) -> Result<(), SessionError> {
        let Some(handle) = self.handle.as_mut() else {
            return std::future::pending().await;
        };
        let result = handle.await;
        self.handle = None;
        self.flatten(result)
    }

    /// Cancel the task and wait for it to exit; idempotent.
    ///
    /// A task that ignores cancellation for longer than [`STOP_GRACE`] is
    /// aborted.
    pub async fn stop(&mut self) -> Result<(), SessionError> {
        self.cancel.cancel();
        let result = match self.handle.take() {
            Some(mut handle) => match tokio::time::timeout(STOP_GRACE, &mut handle).await {
                Ok(joined) => self.flatten(joined),
                Err(_) => {
                    warn!(notifier = self.name, "Notifier ignored cancellation; aborting");
                    handle.abort();
                    Ok(())
                }
            },
            None => Ok(()),
        };
        self.state.send_replace(NotifierState::Stopped);
        debug!(notifier = self.name, "Notifier stopped");
        result
    }

    fn flatten(
        &self,
        joined: Result<Result<(), SessionError>, tokio::task::JoinError>,
    ) -> Result<(), SessionError> {
        match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(SessionError::NotifierFailed {
                notifier: self.name,
                reason: e.to_string(),
            }),
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.cancel.cancel();
        if self.handle.is_none() && self.state() == NotifierState::Created {
            self.state.send_replace(NotifierState::Stopped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_runs_until_stopped() {
        let parent = CancellationToken::new();
        let mut notifier = Notifier::new("test", &parent);
        assert_eq!(notifier.state(), NotifierState::Created);

        notifier
            .start(|cancel| async move {
                cancel.cancelled().await;
                Ok(())
            })
            .unwrap();
        assert_eq!(notifier.state(), NotifierState::Running);

        notifier.stop().await.unwrap();
        assert_eq!(notifier.state(), NotifierState::Stopped);
    }

    #[tokio::test]
    async fn never_restarts() {
        let parent = CancellationToken::new();
        let mut notifier = Notifier::new("test", &parent);
        notifier.start(|_| async { Ok(()) }).unwrap();
        notifier.stop().await.unwrap();

        let err = notifier.start(|_| async { Ok(()) }).unwrap_err();
        assert_eq!(
            err,
            SessionError::NotifierState {
                notifier: "test",
                action: "start",
                state: "stopped",
            }
        );
    }

    #[tokio::test]
    async fn parent_cancellation_stops_task() {
        let parent = CancellationToken::new();
        let mut notifier = Notifier::new("test", &parent);
        let mut state = notifier.watch_state();
        notifier
            .start(|cancel| async move {
                cancel.cancelled().await;
                Ok(())
            })
            .unwrap();

        parent.cancel();
        tokio::time::timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == NotifierState::Stopped),
        )
        .await
        .expect("stopped promptly")
        .unwrap();
        assert!(notifier.finished().await.is_ok());
    }

    #[tokio::test]
    async fn task_error_is_reported() {
        let parent = CancellationToken::new();
        let mut notifier = Notifier::new("test", &parent);
        notifier
            .start(|_| async { Err(SessionError::ChannelClosed("gone".into())) })
            .unwrap();
        assert_eq!(
            notifier.finished().await,
            Err(SessionError::ChannelClosed("gone".into()))
        );
        assert_eq!(notifier.state(), NotifierState::Stopped);
    }

    #[tokio::test]
    async fn stop_before_start_is_terminal() {
        let parent = CancellationToken::new();
        let mut notifier = Notifier::new("test", &parent);
        notifier.stop().await.unwrap();
        assert_eq!(notifier.state(), NotifierState::Stopped);
        assert!(notifier.start(|_| async { Ok(()) }).is_err());
    }
}
