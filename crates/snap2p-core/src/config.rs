//! Peer and session configuration (spec §4.8/§5): plain structs with a
//! `Default` impl for every knob a peer or session can be tuned with.

use crate::codec::Visibility;
use std::collections::BTreeSet;
use std::time::Duration;

/// Per-visibility-tier inbound rate limit (spec §4.8): at most
/// `max_requests` admitted within any trailing `period`-long window.
/// `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum requests allowed per `period`.
    pub max_requests: u32,
    /// The refill window.
    pub period: Duration,
}

impl RateLimit {
    /// `max_requests` over `period`.
    #[must_use]
    pub const fn new(max_requests: u32, period: Duration) -> Self {
        Self { max_requests, period }
    }
}

/// The full per-visibility rate-limit table (spec §4.8: STEALTH 5/min,
/// PRIVATE 30/min, PUBLIC unlimited).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitTable {
    /// Limit applied to inbound connections while in STEALTH.
    pub stealth: Option<RateLimit>,
    /// Limit applied to inbound connections while in PRIVATE.
    pub private: Option<RateLimit>,
    /// Limit applied to inbound connections while in PUBLIC.
    pub public: Option<RateLimit>,
}

impl RateLimitTable {
    /// The limit for `visibility`, if any.
    #[must_use]
    pub fn for_visibility(&self, visibility: Visibility) -> Option<RateLimit> {
        match visibility {
            Visibility::Stealth => self.stealth,
            Visibility::Private => self.private,
            Visibility::Public => self.public,
        }
    }
}

impl Default for RateLimitTable {
    fn default() -> Self {
        Self {
            stealth: Some(RateLimit::new(5, Duration::from_secs(60))),
            private: Some(RateLimit::new(30, Duration::from_secs(60))),
            public: None,
        }
    }
}

/// Invite-token issuance defaults (spec §4.8 "Invite-token API").
#[derive(Debug, Clone, Copy)]
pub struct InviteTokenConfig {
    /// Default validity period for a freshly generated token.
    pub default_expiry: Duration,
}

impl Default for InviteTokenConfig {
    fn default() -> Self {
        Self {
            default_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Handshake- and session-scoped timing and capacity knobs (spec §4.5/§4.6/
/// §4.7/§4.8).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound on every handshake I/O step (spec §4.5 "every I/O has the
    /// configured timeout").
    pub handshake_timeout: Duration,
    /// Bound on the initial TCP connect in `Peer::dial` (spec §5).
    pub dial_timeout: Duration,
    /// Keepalive PING interval (spec §4.6).
    pub keepalive_interval: Duration,
    /// How long an outstanding PING may go unanswered before the session
    /// closes with `ERR_TIMEOUT` (spec §4.6).
    pub keepalive_timeout: Duration,
    /// Per-session cap on concurrently tracked streams (spec §4.7).
    pub max_streams: usize,
    /// Read-buffer high-water mark per stream, in bytes (spec §4.7).
    pub stream_high_water_mark: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            dial_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(10),
            max_streams: 100,
            stream_high_water_mark: 64 * 1024,
        }
    }
}

/// Top-level `Peer` configuration (spec §4.8/§6 `Peer.create(...)`).
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// The visibility tier this peer advertises and enforces as a listener.
    pub visibility: Visibility,
    /// If set, only these principals may complete an inbound handshake.
    pub allowlist: Option<BTreeSet<String>>,
    /// Session and handshake timing/capacity knobs.
    pub session: SessionConfig,
    /// Per-visibility inbound rate limits.
    pub rate_limits: RateLimitTable,
    /// Invite-token issuance defaults (STEALTH only).
    pub invite_tokens: InviteTokenConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            visibility: Visibility::Public,
            allowlist: None,
            session: SessionConfig::default(),
            rate_limits: RateLimitTable::default(),
            invite_tokens: InviteTokenConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rate_limits_match_spec() {
        let table = RateLimitTable::default();
        assert_eq!(table.stealth.unwrap().max_requests, 5);
        assert_eq!(table.private.unwrap().max_requests, 30);
        assert!(table.public.is_none());
    }

    #[test]
    fn default_session_config_matches_spec() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.handshake_timeout, Duration::from_secs(30));
        assert_eq!(cfg.dial_timeout, Duration::from_secs(10));
        assert_eq!(cfg.keepalive_interval, Duration::from_secs(30));
        assert_eq!(cfg.keepalive_timeout, Duration::from_secs(10));
        assert_eq!(cfg.max_streams, 100);
        assert_eq!(cfg.stream_high_water_mark, 64 * 1024);
    }

    #[test]
    fn default_invite_token_expiry_is_24h() {
        assert_eq!(
            InviteTokenConfig::default().default_expiry,
            Duration::from_secs(24 * 60 * 60)
        );
    }
}
