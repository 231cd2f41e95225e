//! Session notifications delivered through the rmcp peer.

use crate::error::SessionError;
use crate::logging::LogLevel;
use crate::session::{LoggingEvent, SessionChannel, SubscriptionEvent};
use async_trait::async_trait;
use rmcp::model::{LoggingLevel, LoggingMessageNotificationParam, ResourceUpdatedNotificationParam};
use rmcp::service::{Peer, RoleServer};
use serde_json::json;

pub fn to_mcp_level(level: LogLevel) -> LoggingLevel {
    match level {
        LogLevel::Debug => LoggingLevel::Debug,
        LogLevel::Info => LoggingLevel::Info,
        LogLevel::Notice => LoggingLevel::Notice,
        LogLevel::Warning => LoggingLevel::Warning,
        LogLevel::Error => LoggingLevel::Error,
        LogLevel::Critical => LoggingLevel::Critical,
        LogLevel::Alert => LoggingLevel::Alert,
        LogLevel::Emergency => LoggingLevel::Emergency,
    }
}

pub fn from_mcp_level(level: LoggingLevel) -> LogLevel {
    match level {
        LoggingLevel::Debug => LogLevel::Debug,
        LoggingLevel::Info => LogLevel::Info,
        LoggingLevel::Notice => LogLevel::Notice,
        LoggingLevel::Warning => LogLevel::Warning,
        LoggingLevel::Error => LogLevel::Error,
        LoggingLevel::Critical => LogLevel::Critical,
        LoggingLevel::Alert => LogLevel::Alert,
        LoggingLevel::Emergency => LogLevel::Emergency,
    }
}

/// Logger name on level-change notices.
const GATEWAY_LOGGER: &str = "inmate_mcp";

/// Builds the MCP payload for a logging event.
pub fn logging_notification(event: LoggingEvent) -> LoggingMessageNotificationParam {
    match event {
        LoggingEvent::LevelChanged(level) => LoggingMessageNotificationParam {
            level: LoggingLevel::Notice,
            logger: Some(GATEWAY_LOGGER.to_string()),
            data: json!({ "message": format!("log level set to {level}"), "level": level }),
        },
        LoggingEvent::Message(event) => LoggingMessageNotificationParam {
            level: to_mcp_level(event.level),
            data: event.data(),
            logger: Some(event.logger),
        },
    }
}

/// [`SessionChannel`] over the session's rmcp peer.
///
/// MCP has no notification for a dropped subscription, so removals are not
/// sent; additions and refreshes become `notifications/resources/updated`.
pub struct PeerChannel {
    peer: Peer<RoleServer>,
}

impl PeerChannel {
    pub fn new(peer: Peer<RoleServer>) -> Self {
        Self { peer }
    }
}

#[async_trait]
impl SessionChannel for PeerChannel {
    async fn send_subscription(&self, event: SubscriptionEvent) -> Result<(), SessionError> {
        let uri = match event {
            SubscriptionEvent::Added(uri) | SubscriptionEvent::Refreshed(uri) => uri,
            SubscriptionEvent::Removed(_) => return Ok(()),
        };
        self.peer
            .notify_resource_updated(ResourceUpdatedNotificationParam { uri })
            .await
            .map_err(|e| SessionError::ChannelClosed(e.to_string()))
    }

    async fn send_logging(&self, event: LoggingEvent) -> Result<(), SessionError> {
        self.peer
            .notify_logging_message(logging_notification(event))
            .await
            .map_err(|e| SessionError::ChannelClosed(e.to_string()))
    }
}
