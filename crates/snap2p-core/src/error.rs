//! Error types for the snap2p protocol engine.
//!
//! [`ErrorKind`] is the stable, wire-visible error taxonomy of spec §7: it is
//! what gets placed on the wire inside an `AUTH_FAIL`, `ERROR` or
//! `CLOSE_STREAM` control message (as the `ec` codec field), not a raw
//! `repr(u16)` registry, since the catalogue is open-ended text rather than a
//! fixed numeric space. Every layer-specific error type below carries a
//! [`ErrorKind`] via `.kind()` so it can be placed on the wire without a
//! lossy re-mapping step at the call site.

use std::fmt;
use thiserror::Error;

/// Stable error taxonomy, shared between local errors and wire-level
/// `error_code` fields (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown message tag, or unknown protocol version.
    VersionUnsupported,
    /// Generic auth failure.
    AuthFailed,
    /// Remote principal is not in the allowlist.
    NotAllowed,
    /// STEALTH listener but no KNOCK was received first.
    InviteRequired,
    /// KNOCK token not recognized, expired, or exhausted.
    InvalidToken,
    /// Attestation failed structural, signature, or node-key-binding checks.
    AttestationInvalid,
    /// Attestation's clock-skew-adjusted expiry has passed.
    AttestationExpired,
    /// Noise or I/O failure during the handshake.
    HandshakeFailed,
    /// Inbound `OPEN_STREAM` reused an id already tracked.
    StreamIdInUse,
    /// A stream operation referenced an unknown id.
    StreamNotFound,
    /// A stream operation was attempted after the stream closed.
    StreamClosed,
    /// Policy refused an inbound stream open.
    StreamRefused,
    /// The stream-count cap was reached.
    ResourceExhausted,
    /// The session is closed.
    ConnectionClosed,
    /// An operation exceeded its deadline.
    Timeout,
    /// Encoded frame length exceeds the 16 MiB cap.
    MessageTooLarge,
    /// A control message failed to decode or failed validation.
    InvalidMessage,
    /// Anything unclassified.
    Internal,
}

impl ErrorKind {
    /// The short text placed on the wire in `ec` fields, e.g. in `AUTH_FAIL`.
    #[must_use]
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::VersionUnsupported => "ERR_VERSION_UNSUPPORTED",
            Self::AuthFailed => "ERR_AUTH_FAILED",
            Self::NotAllowed => "ERR_NOT_ALLOWED",
            Self::InviteRequired => "ERR_INVITE_REQUIRED",
            Self::InvalidToken => "ERR_INVALID_TOKEN",
            Self::AttestationInvalid => "ERR_ATTESTATION_INVALID",
            Self::AttestationExpired => "ERR_ATTESTATION_EXPIRED",
            Self::HandshakeFailed => "ERR_HANDSHAKE_FAILED",
            Self::StreamIdInUse => "ERR_STREAM_ID_IN_USE",
            Self::StreamNotFound => "ERR_STREAM_NOT_FOUND",
            Self::StreamClosed => "ERR_STREAM_CLOSED",
            Self::StreamRefused => "ERR_STREAM_REFUSED",
            Self::ResourceExhausted => "ERR_RESOURCE_EXHAUSTED",
            Self::ConnectionClosed => "ERR_CONNECTION_CLOSED",
            Self::Timeout => "ERR_TIMEOUT",
            Self::MessageTooLarge => "ERR_MESSAGE_TOO_LARGE",
            Self::InvalidMessage => "ERR_INVALID_MESSAGE",
            Self::Internal => "ERR_INTERNAL",
        }
    }

    /// Parse a wire `ec` string back into a kind, falling back to `Internal`
    /// for anything not in the catalogue (new peers may send new codes).
    #[must_use]
    pub fn from_wire_str(s: &str) -> Self {
        match s {
            "ERR_VERSION_UNSUPPORTED" => Self::VersionUnsupported,
            "ERR_AUTH_FAILED" => Self::AuthFailed,
            "ERR_NOT_ALLOWED" => Self::NotAllowed,
            "ERR_INVITE_REQUIRED" => Self::InviteRequired,
            "ERR_INVALID_TOKEN" => Self::InvalidToken,
            "ERR_ATTESTATION_INVALID" => Self::AttestationInvalid,
            "ERR_ATTESTATION_EXPIRED" => Self::AttestationExpired,
            "ERR_HANDSHAKE_FAILED" => Self::HandshakeFailed,
            "ERR_STREAM_ID_IN_USE" => Self::StreamIdInUse,
            "ERR_STREAM_NOT_FOUND" => Self::StreamNotFound,
            "ERR_STREAM_CLOSED" => Self::StreamClosed,
            "ERR_STREAM_REFUSED" => Self::StreamRefused,
            "ERR_RESOURCE_EXHAUSTED" => Self::ResourceExhausted,
            "ERR_CONNECTION_CLOSED" => Self::ConnectionClosed,
            "ERR_TIMEOUT" => Self::Timeout,
            "ERR_MESSAGE_TOO_LARGE" => Self::MessageTooLarge,
            "ERR_INVALID_MESSAGE" => Self::InvalidMessage,
            _ => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

/// Framing-layer errors (C1).
#[derive(Debug, Error)]
pub enum FrameError {
    /// The LEB128 varint length prefix used more than 28 bits.
    #[error("varint too large")]
    VarintTooLarge,
    /// The declared frame length exceeds [`crate::framing::MAX_FRAME_LEN`].
    #[error("frame length {0} exceeds maximum of {max}", max = crate::framing::MAX_FRAME_LEN)]
    FrameTooLarge(u64),
    /// The underlying socket returned an I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// The wire-level kind this error maps to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::VarintTooLarge | Self::FrameTooLarge(_) => ErrorKind::MessageTooLarge,
            Self::Io(_) => ErrorKind::ConnectionClosed,
        }
    }
}

/// Codec-layer errors (C2).
#[derive(Debug, Error)]
pub enum CodecError {
    /// Bytes did not form a valid canonical-map encoding.
    #[error("malformed canonical encoding: {0}")]
    Malformed(&'static str),
    /// A known message was missing a required field, or a field had the
    /// wrong type.
    #[error("missing or malformed field: {0}")]
    BadField(&'static str),
    /// The `t` tag did not match any entry in the message catalogue.
    #[error("unknown message tag: 0x{0:02X}")]
    UnknownTag(u8),
}

impl CodecError {
    /// The wire-level kind this error maps to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTag(_) => ErrorKind::VersionUnsupported,
            Self::Malformed(_) | Self::BadField(_) => ErrorKind::InvalidMessage,
        }
    }
}

/// Handshake-orchestration errors (C6).
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Framing failed while reading or writing a handshake message.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// A control message failed to decode.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The Noise XX state machine rejected a message.
    #[error("noise handshake failed: {0}")]
    Noise(String),
    /// A HELLO message failed validation (spec §4.5).
    #[error("invalid hello: {0}")]
    InvalidHello(&'static str),
    /// The attestation failed structural or cryptographic verification.
    #[error("attestation invalid: {0}")]
    AttestationInvalid(String),
    /// The attestation's `expires_at` has passed (skew-adjusted).
    #[error("attestation expired")]
    AttestationExpired,
    /// The attestation's node key does not equal the Noise static key.
    #[error("attestation node key does not match the Noise static key (binding mismatch)")]
    BindingMismatch,
    /// The remote sent `AUTH_FAIL`.
    #[error("peer rejected handshake: {kind}: {reason}")]
    RejectedByPeer {
        /// The kind the peer reported.
        kind: ErrorKind,
        /// The peer's human-readable reason, if any.
        reason: String,
    },
    /// STEALTH KNOCK gate rejected the connection.
    #[error("stealth gate rejected connection: {0}")]
    StealthRejected(ErrorKind),
    /// The remote principal is not in the configured allowlist.
    #[error("remote principal not allowed")]
    NotAllowed,
    /// A handshake step did not complete before the configured timeout.
    #[error("handshake timed out")]
    Timeout,
    /// The TCP connection closed before the handshake completed.
    #[error("connection closed during handshake")]
    ConnectionClosed,
}

impl HandshakeError {
    /// The wire-level kind this error maps to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Frame(e) => e.kind(),
            Self::Codec(e) => e.kind(),
            Self::Noise(_) => ErrorKind::HandshakeFailed,
            Self::InvalidHello(_) => ErrorKind::InvalidMessage,
            Self::AttestationInvalid(_) => ErrorKind::AttestationInvalid,
            Self::AttestationExpired => ErrorKind::AttestationExpired,
            Self::BindingMismatch => ErrorKind::AttestationInvalid,
            Self::RejectedByPeer { kind, .. } => *kind,
            Self::StealthRejected(kind) => *kind,
            Self::NotAllowed => ErrorKind::NotAllowed,
            Self::Timeout => ErrorKind::Timeout,
            Self::ConnectionClosed => ErrorKind::ConnectionClosed,
        }
    }
}

/// Session-layer errors (C7).
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session is already closed.
    #[error("session closed")]
    Closed,
    /// Frame-level error during send/receive.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// Control-message decode error.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// AEAD decryption failed; the session is no longer trustworthy.
    #[error("transport decryption failed")]
    DecryptionFailed,
    /// The directional nonce counter reached its limit; the session must be
    /// re-established.
    #[error("nonce counter exhausted")]
    NonceExhausted,
    /// A keepalive PING was not answered before its timeout.
    #[error("keepalive timed out")]
    KeepaliveTimeout,
}

impl SessionError {
    /// The wire-level kind this error maps to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Closed => ErrorKind::ConnectionClosed,
            Self::Frame(e) => e.kind(),
            Self::Codec(e) => e.kind(),
            Self::DecryptionFailed => ErrorKind::Internal,
            Self::NonceExhausted => ErrorKind::Internal,
            Self::KeepaliveTimeout => ErrorKind::Timeout,
        }
    }
}

/// Multiplexer-layer errors (C8).
#[derive(Debug, Error)]
pub enum MuxError {
    /// The requested stream id is already tracked.
    #[error("stream id already in use")]
    StreamIdInUse,
    /// The requested stream id is not tracked.
    #[error("stream not found")]
    StreamNotFound,
    /// The stream was already closed.
    #[error("stream closed")]
    StreamClosed,
    /// The per-session stream cap was reached.
    #[error("stream capacity exhausted")]
    ResourceExhausted,
    /// The owning session is closed.
    #[error("session closed")]
    SessionClosed,
}

impl MuxError {
    /// The wire-level kind this error maps to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StreamIdInUse => ErrorKind::StreamIdInUse,
            Self::StreamNotFound => ErrorKind::StreamNotFound,
            Self::StreamClosed => ErrorKind::StreamClosed,
            Self::ResourceExhausted => ErrorKind::ResourceExhausted,
            Self::SessionClosed => ErrorKind::ConnectionClosed,
        }
    }
}

/// Peer-facade errors (C9).
#[derive(Debug, Error)]
pub enum PeerError {
    /// The handshake failed.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    /// The TCP dial failed or timed out.
    #[error("dial failed: {0}")]
    DialFailed(String),
    /// The locator could not be parsed, or names an unsupported transport.
    #[error("unsupported or invalid locator: {0}")]
    InvalidLocator(String),
    /// An invite-token operation was requested outside STEALTH mode.
    #[error("invite tokens are only meaningful in STEALTH visibility")]
    NotStealth,
    /// An imported invite token was not 16-32 bytes.
    #[error("invalid invite token: {0}")]
    InvalidInviteToken(&'static str),
    /// No session is registered for the given locator.
    #[error("no session for locator")]
    NoSuchSession,
    /// An I/O error from the listening or dialing socket.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PeerError {
    /// The wire-level kind this error maps to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Handshake(e) => e.kind(),
            Self::DialFailed(_) => ErrorKind::ConnectionClosed,
            Self::InvalidLocator(_) => ErrorKind::InvalidMessage,
            Self::NotStealth => ErrorKind::Internal,
            Self::InvalidInviteToken(_) => ErrorKind::InvalidToken,
            Self::NoSuchSession => ErrorKind::ConnectionClosed,
            Self::Io(_) => ErrorKind::ConnectionClosed,
        }
    }
}

/// Top-level crate error, composing every layer's error type behind one
/// enum so callers that do not care which layer failed can match on a
/// single type.
#[derive(Debug, Error)]
pub enum Error {
    /// Framing-layer error.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// Codec-layer error.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Handshake-orchestration error.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    /// Session-layer error.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Multiplexer-layer error.
    #[error(transparent)]
    Mux(#[from] MuxError),
    /// Peer-facade error.
    #[error(transparent)]
    Peer(#[from] PeerError),
    /// Cryptographic primitive error.
    #[error(transparent)]
    Crypto(#[from] snap2p_crypto::CryptoError),
}

impl Error {
    /// The wire-level kind this error maps to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Frame(e) => e.kind(),
            Self::Codec(e) => e.kind(),
            Self::Handshake(e) => e.kind(),
            Self::Session(e) => e.kind(),
            Self::Mux(e) => e.kind(),
            Self::Peer(e) => e.kind(),
            Self::Crypto(_) => ErrorKind::Internal,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
