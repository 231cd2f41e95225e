//! Process-wide log state shared with connected clients.
//!
//! [`LogHub`] holds the minimum level clients asked for (`logging/setLevel`)
//! and fans log events out to every session's logging notifier.
//! [`LogForwardLayer`] is a `tracing_subscriber::Layer` that feeds the
//! gateway's own `tracing` events into the hub.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{fmt as fmt_layer, EnvFilter, Layer};

/// Default capacity of the event fan-out before slow sessions start lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// MCP (syslog) severity levels, least severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl LogLevel {
    pub fn from_tracing(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => Self::Error,
            tracing::Level::WARN => Self::Warning,
            tracing::Level::INFO => Self::Info,
            _ => Self::Debug,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
            Self::Alert => "alert",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One log record destined for clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    pub level: LogLevel,
    pub logger: String,
    pub message: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

impl LogEvent {
    pub fn new(level: LogLevel, logger: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            logger: logger.into(),
            message: message.into(),
            fields: Map::new(),
        }
    }

    /// JSON payload for an MCP `notifications/message`.
    pub fn data(&self) -> Value {
        let mut data = self.fields.clone();
        data.insert("message".to_string(), Value::String(self.message.clone()));
        Value::Object(data)
    }
}

/// Shared log level and event fan-out.
pub struct LogHub {
    level: watch::Sender<LogLevel>,
    events: broadcast::Sender<LogEvent>,
}

/// A session's view of the hub.
pub struct LogSubscription {
    pub level: watch::Receiver<LogLevel>,
    pub events: broadcast::Receiver<LogEvent>,
}

impl LogHub {
    pub fn new(initial: LogLevel, capacity: usize) -> Self {
        let (level, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(capacity.max(1));
        Self { level, events }
    }

    pub fn level(&self) -> LogLevel {
        *self.level.borrow()
    }

    /// Returns `true` if the level actually changed.
    pub fn set_level(&self, level: LogLevel) -> bool {
        self.level.send_if_modified(|current| {
            if *current == level {
                false
            } else {
                *current = level;
                true
            }
        })
    }

    /// Whether an event at `level` would reach any client.
    pub fn enabled(&self, level: LogLevel) -> bool {
        self.events.receiver_count() > 0 && level >= self.level()
    }

    /// Publish to every subscribed session; dropped if nobody listens.
    pub fn publish(&self, event: LogEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> LogSubscription {
        LogSubscription {
            level: self.level.subscribe(),
            events: self.events.subscribe(),
        }
    }
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new(LogLevel::Info, DEFAULT_EVENT_CAPACITY)
    }
}

/// Forwards this crate's `tracing` events into a [`LogHub`].
pub struct LogForwardLayer {
    hub: Arc<LogHub>,
    target_prefix: &'static str,
}

/// The logging notifier logs through `tracing` too; forwarding its own events
/// would loop them back to the client.
const SUPPRESSED_TARGET: &str = "inmate_mcp::session";

impl LogForwardLayer {
    pub fn new(hub: Arc<LogHub>) -> Self {
        Self {
            hub,
            target_prefix: "inmate_mcp",
        }
    }
}

struct EventFieldVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl Visit for EventFieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), Value::Bool(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(format!("{value:?}")));
        }
    }
}

/// The gateway's subscriber: stderr output filtered by `filter`, plus the
/// forward layer, which sees every crate event and applies the hub level.
pub fn gateway_subscriber(
    hub: Arc<LogHub>,
    filter: EnvFilter,
) -> impl Subscriber + Send + Sync + 'static {
    tracing_subscriber::registry()
        .with(
            fmt_layer::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .with(LogForwardLayer::new(hub))
}

impl<S> Layer<S> for LogForwardLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let target = meta.target();
        if !target.starts_with(self.target_prefix) || target.starts_with(SUPPRESSED_TARGET) {
            return;
        }
        let level = LogLevel::from_tracing(meta.level());
        if !self.hub.enabled(level) {
            return;
        }

        let mut visitor = EventFieldVisitor {
            message: None,
            fields: Map::new(),
        };
        event.record(&mut visitor);
        let mut log = LogEvent::new(level, target, visitor.message.unwrap_or_default());
        log.fields = visitor.fields;
        self.hub.publish(log);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warning < LogLevel::Error);
        assert!(LogLevel::Alert < LogLevel::Emergency);
        assert_eq!(LogLevel::from_tracing(&tracing::Level::TRACE), LogLevel::Debug);
    }

    #[test]
    fn set_level_reports_changes_only() {
        let hub = LogHub::default();
        assert!(!hub.set_level(LogLevel::Info));
        assert!(hub.set_level(LogLevel::Error));
        assert_eq!(hub.level(), LogLevel::Error);
    }

    #[test]
    fn stderr_filter_does_not_hide_debug_from_clients() {
        let hub = Arc::new(LogHub::default());
        let mut sub = hub.subscribe();
        let subscriber = gateway_subscriber(hub.clone(), EnvFilter::new("inmate_mcp=info"));

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!(target: "inmate_mcp::server", "hidden at info");
            hub.set_level(LogLevel::Debug);
            tracing::debug!(target: "inmate_mcp::server", "cache miss");
        });

        let event = sub.events.try_recv().expect("debug event forwarded");
        assert_eq!(event.level, LogLevel::Debug);
        assert_eq!(event.message, "cache miss");
        assert!(sub.events.try_recv().is_err());
    }

    #[test]
    fn layer_forwards_crate_events_at_or_above_level() {
        let hub = Arc::new(LogHub::new(LogLevel::Warning, 16));
        let mut sub = hub.subscribe();
        let subscriber = tracing_subscriber::registry().with(LogForwardLayer::new(hub.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "inmate_mcp::server", "below threshold");
            tracing::warn!(target: "inmate_mcp::server", tool = "inmate_get_details", "backend slow");
            tracing::error!(target: "other_crate", "not ours");
            tracing::error!(target: "inmate_mcp::session::logging", "notifier internals");
        });

        let event = sub.events.try_recv().expect("one forwarded event");
        assert_eq!(event.level, LogLevel::Warning);
        assert_eq!(event.logger, "inmate_mcp::server");
        assert_eq!(event.message, "backend slow");
        assert_eq!(event.fields["tool"], Value::String("inmate_get_details".into()));
        assert!(sub.events.try_recv().is_err());
    }
}
