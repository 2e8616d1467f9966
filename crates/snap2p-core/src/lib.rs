//! # snap2p-core
//!
//! Protocol engine for authenticated, confidential, multiplexed
//! peer-to-peer sessions: a Noise XX handshake binds each session to a
//! wallet-signed attestation of the remote's node key, after which a
//! length-framed, canonical-map-encoded control channel carries a simple
//! stream multiplexer.
//!
//! ## Quick start
//!
//! ```no_run
//! use snap2p_core::config::PeerConfig;
//! use snap2p_core::peer::Peer;
//! use snap2p_core::wallet::EphemeralWallet;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let wallet = Arc::new(EphemeralWallet::generate());
//!     let peer = Peer::new(wallet, PeerConfig::default());
//!     let locator = peer.listen(0, "127.0.0.1").await?;
//!     println!("listening on {locator}");
//!     Ok(())
//! }
//! ```
//!
//! ## Layering
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Peer (facade, C9)                     │
//! │  dial / listen, rate limiting, invite tokens, sessions    │
//! ├──────────────────────────────────────────────────────────┤
//! │                 Session (transport, C7)                  │
//! │   keepalive, encrypted frame I/O, owns the Multiplexer    │
//! ├──────────────────────────────────────────────────────────┤
//! │              Multiplexer / Stream (C8)                   │
//! │          OPEN_STREAM / STREAM_DATA / CLOSE_STREAM         │
//! ├──────────────────────────────────────────────────────────┤
//! │               Handshake orchestrator (C6)                │
//! │   Noise XX + HELLO + attestation exchange over framing    │
//! ├──────────────────────────────────────────────────────────┤
//! │     Attestation (C4) · Codec (C2) · Framing (C1)          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module structure
//!
//! - [`framing`]: varint length-prefixed frame buffer (C1)
//! - [`codec`]: canonical deterministic map encoding and control messages (C2)
//! - [`principal`]: `stacks:<ADDR>` identity newtype (C3)
//! - [`attestation`]: wallet-signed node-key attestation (C4)
//! - [`wallet`]: the external wallet capability (C5)
//! - [`handshake`]: Noise XX + HELLO + AUTH orchestration (C6)
//! - [`session`]: the per-connection actor and its public handle (C7)
//! - [`stream`]: stream multiplexing and backpressure (C8)
//! - [`peer`]: dial/listen facade, rate limiting, invite tokens (C9)
//! - [`config`]: peer/session configuration
//! - [`invite_token`]: STEALTH invite-token store
//! - [`rate_limiter`]: per-remote-address token-bucket limiter
//! - [`locator`]: dialable endpoint addressing
//! - [`error`]: layered error taxonomy and the stable wire error catalogue

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod attestation;
pub mod codec;
pub mod config;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod invite_token;
pub mod locator;
pub mod peer;
pub mod principal;
pub mod rate_limiter;
pub mod session;
pub mod stream;
pub mod wallet;

pub use error::{Error, ErrorKind, Result};
pub use handshake::{HandshakeContext, HandshakeOutcome};
pub use locator::Locator;
pub use peer::{Incoming, Peer};
pub use principal::Principal;
pub use session::{CloseReason, Session, SessionEvent};
pub use stream::Stream;

/// Protocol version carried in HELLO (spec §6 "Protocol version: `1`").
pub const PROTOCOL_VERSION: u32 = 1;

/// Noise protocol name this crate implements (spec §6).
pub const NOISE_PROTOCOL_NAME: &str = "Noise_XX_25519_ChaChaPoly_SHA256";
