//! Security Events
//!
//! Notable security outcomes are pushed into an injected [`NotificationSink`].
//! Delivery (mail, IM, paging) lives outside the gate; sinks must return
//! immediately and never fail the request that produced the event.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Security-relevant outcome emitted by the gate and credential manager
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecurityEvent {
    LoginFailed { username: String, attempts: u32 },
    AccountLocked { username: String, until_ms: i64 },
    RateLimitBlocked { identity: String, route: String, until_ms: i64 },
    ReplayDetected { api_key: String, nonce: String },
    IpRejected { ip: String },
    SessionsRevoked { username: String, count: usize },
    PasswordChanged { username: String },
}

impl SecurityEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SecurityEvent::LoginFailed { .. } => "login_failed",
            SecurityEvent::AccountLocked { .. } => "account_locked",
            SecurityEvent::RateLimitBlocked { .. } => "rate_limit_blocked",
            SecurityEvent::ReplayDetected { .. } => "replay_detected",
            SecurityEvent::IpRejected { .. } => "ip_rejected",
            SecurityEvent::SessionsRevoked { .. } => "sessions_revoked",
            SecurityEvent::PasswordChanged { .. } => "password_changed",
        }
    }
}

/// Fire-and-forget event sink
#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: SecurityEvent);
}

/// Sink that writes events to the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, event: SecurityEvent) {
        match &event {
            SecurityEvent::LoginFailed { .. } => {
                debug!(kind = event.kind(), event = ?event, "Security event")
            }
            _ => warn!(kind = event.kind(), event = ?event, "Security event"),
        }
    }
}

/// Sink that forwards events to a bounded channel consumed by an outbound notifier.
///
/// Events are dropped when the channel is full or closed.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<SecurityEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SecurityEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, event: SecurityEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!(error = %e, "Dropping security event");
        }
    }
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _event: SecurityEvent) {}
}
