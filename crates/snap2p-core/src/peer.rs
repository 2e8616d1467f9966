//! Peer facade (C9, spec §4.8): the thing that owns one wallet-backed
//! identity, a `DashMap` of live sessions, and a listener task, fronting a
//! TCP dial/listen pair over [`crate::handshake`].

use crate::attestation::{NodeKeyAttestation, DEFAULT_VALIDITY_SECS};
use crate::codec::Visibility;
use crate::config::PeerConfig;
use crate::error::PeerError;
use crate::handshake::{self, HandshakeContext};
use crate::invite_token::{InviteTokenOptions, InviteTokenStore};
use crate::locator::{Locator, Transport};
use crate::principal::Principal;
use crate::rate_limiter::RateLimiter;
use crate::session::Session;
use crate::wallet::Wallet;
use dashmap::DashMap;
use snap2p_crypto::noise::NoiseKeypair;
use snap2p_crypto::x25519::ed25519_seed_to_x25519_private;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};

/// This peer's Ed25519 node identity: the seed, its public key, and the
/// X25519 Noise static keypair derived from it (spec §4.4 "the static key
/// used here is the X25519 image of the peer's Ed25519 node key").
struct NodeIdentity {
    node_public_key: [u8; 32],
    noise_keypair: NoiseKeypair,
}

impl NodeIdentity {
    fn generate() -> Self {
        let seed = snap2p_crypto::random::random_32()
            .expect("OS CSPRNG must be available to generate a node identity");
        let signing_key = snap2p_crypto::signatures::SigningKey::from_bytes(&seed);
        let node_public_key = signing_key.verifying_key().to_bytes();
        let x25519_private = ed25519_seed_to_x25519_private(&seed);
        let noise_keypair = NoiseKeypair::from_bytes(x25519_private.to_bytes())
            .expect("a 32-byte X25519 scalar is always a valid Noise keypair");
        Self {
            node_public_key,
            noise_keypair,
        }
    }
}

/// An inbound session accepted by [`Peer::listen`], delivered through
/// [`Peer::accept`] the way `on('connection')` delivers one (spec §6).
pub struct Incoming {
    /// The established session.
    pub session: Session,
}

struct PeerInner {
    wallet: Arc<dyn Wallet>,
    identity: NodeIdentity,
    attestation: RwLock<NodeKeyAttestation>,
    config: PeerConfig,
    invite_tokens: Option<InviteTokenStore>,
    rate_limiters: RateLimiterSet,
    sessions: DashMap<Locator, Session>,
    incoming_tx: mpsc::UnboundedSender<Incoming>,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Incoming>>,
    listener_task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    sweep_task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

struct RateLimiterSet {
    stealth: Option<RateLimiter>,
    private: Option<RateLimiter>,
    public: Option<RateLimiter>,
}

impl RateLimiterSet {
    fn from_config(config: &PeerConfig) -> Self {
        Self {
            stealth: config.rate_limits.stealth.map(RateLimiter::new),
            private: config.rate_limits.private.map(RateLimiter::new),
            public: config.rate_limits.public.map(RateLimiter::new),
        }
    }

    fn check(&self, visibility: Visibility, addr: std::net::IpAddr) -> bool {
        let limiter = match visibility {
            Visibility::Stealth => &self.stealth,
            Visibility::Private => &self.private,
            Visibility::Public => &self.public,
        };
        limiter.as_ref().is_none_or(|l| l.check(addr))
    }

    fn sweep_idle(&self) {
        for limiter in [&self.stealth, &self.private, &self.public].into_iter().flatten() {
            limiter.sweep_idle();
        }
    }
}

/// One participant in the protocol (spec §4.8): a wallet-backed identity
/// that can dial out, listen for inbound connections, and track the
/// resulting sessions. Cheap to clone; every clone shares the same
/// identity, listener, and session table.
#[derive(Clone)]
pub struct Peer(Arc<PeerInner>);

impl Peer {
    /// Construct a peer authenticating as `wallet`, under `config`.
    ///
    /// Generates a fresh Ed25519 node identity and signs an initial
    /// attestation for it. A peer constructed with `config.visibility ==
    /// Stealth` always gets an invite-token store, since a STEALTH
    /// responder must refuse every inbound connection without one; every
    /// other visibility has no store, and its invite-token methods always
    /// return [`PeerError::NotStealth`].
    #[must_use]
    pub fn new(wallet: Arc<dyn Wallet>, config: PeerConfig) -> Self {
        let identity = NodeIdentity::generate();
        let attestation = NodeKeyAttestation::build(
            wallet.as_ref(),
            identity.node_public_key,
            DEFAULT_VALIDITY_SECS,
        );
        let invite_tokens = (config.visibility == Visibility::Stealth).then(InviteTokenStore::new);
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let rate_limiters = RateLimiterSet::from_config(&config);

        let peer = Self(Arc::new(PeerInner {
            wallet,
            identity,
            attestation: RwLock::new(attestation),
            config,
            invite_tokens,
            rate_limiters,
            sessions: DashMap::new(),
            incoming_tx,
            incoming_rx: tokio::sync::Mutex::new(incoming_rx),
            listener_task: tokio::sync::Mutex::new(None),
            sweep_task: tokio::sync::Mutex::new(None),
        }));

        peer.spawn_sweep_task();
        peer
    }

    fn spawn_sweep_task(&self) {
        let inner = Arc::clone(&self.0);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                if let Some(store) = &inner.invite_tokens {
                    store.sweep_expired();
                }
                inner.rate_limiters.sweep_idle();
            }
        });
        // `Peer::new` is sync, so the lock is taken here via `try_lock`
        // rather than `.await`; nothing else holds it yet.
        if let Ok(mut slot) = self.0.sweep_task.try_lock() {
            *slot = Some(task);
        }
    }

    /// This peer's wallet-derived principal.
    #[must_use]
    pub fn principal(&self) -> Principal {
        self.0.wallet.principal()
    }

    /// This peer's Ed25519 node public key.
    #[must_use]
    pub fn node_public_key(&self) -> [u8; 32] {
        self.0.identity.node_public_key
    }

    /// Connect to `locator`, run the initiator handshake, and register the
    /// resulting session (spec §4.8 "Dial").
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::InvalidLocator`] for a non-TCP locator,
    /// [`PeerError::DialFailed`] if the TCP connect does not complete
    /// within `dial_timeout`, or a wrapped [`crate::error::HandshakeError`]
    /// if the handshake itself fails.
    pub async fn dial(&self, locator: &Locator, invite_token: Option<Vec<u8>>) -> Result<Session, PeerError> {
        if locator.transport != Transport::Tcp {
            return Err(PeerError::InvalidLocator(format!(
                "unsupported transport: {locator}"
            )));
        }

        let addr = format!("{}:{}", locator.host, locator.port);
        let mut stream = tokio::time::timeout(self.0.config.session.dial_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| PeerError::DialFailed(format!("connect to {addr} timed out")))?
            .map_err(|e| PeerError::DialFailed(e.to_string()))?;
        stream.set_nodelay(true).map_err(PeerError::Io)?;

        let attestation = self.0.attestation.read().await.clone();
        let ctx = HandshakeContext {
            noise_keypair: &self.0.identity.noise_keypair,
            node_public_key: self.0.identity.node_public_key,
            wallet: self.0.wallet.as_ref(),
            attestation: &attestation,
            visibility: self.0.config.visibility,
            capabilities: Vec::new(),
            allowlist: self.0.config.allowlist.as_ref(),
            invite_tokens: self.0.invite_tokens.as_ref(),
            timeout: self.0.config.session.handshake_timeout,
        };

        let outcome = handshake::run_initiator(&mut stream, &ctx, invite_token).await?;
        let session = Session::spawn(
            stream,
            outcome.remote_principal,
            outcome.remote_node_public_key,
            outcome.session_id,
            outcome.transport,
            &self.0.config.session,
        );
        self.0.sessions.insert(locator.clone(), session.clone());
        Ok(session)
    }

    /// Bind a listener on `host:port` and spawn the accept loop (spec §4.8
    /// "Listen"). Returns the bound [`Locator`] other peers can dial.
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::Io`] if the bind fails.
    pub async fn listen(&self, port: u16, host: &str) -> Result<Locator, PeerError> {
        let listener = TcpListener::bind((host, port)).await.map_err(PeerError::Io)?;
        let bound = listener.local_addr().map_err(PeerError::Io)?;

        let inner = Arc::clone(&self.0);
        let task = tokio::spawn(async move {
            accept_loop(inner, listener).await;
        });
        *self.0.listener_task.lock().await = Some(task);

        Ok(Locator::tcp(host_string(bound), bound.port()))
    }

    /// Await the next inbound session accepted by [`Peer::listen`].
    /// Returns `None` once the listener task has stopped (e.g. the peer was
    /// dropped).
    pub async fn accept(&self) -> Option<Incoming> {
        self.0.incoming_rx.lock().await.recv().await
    }

    /// Look up a previously dialed or accepted session by the locator it
    /// was established through.
    #[must_use]
    pub fn session(&self, locator: &Locator) -> Option<Session> {
        self.0.sessions.get(locator).map(|s| s.clone())
    }

    /// Generate a fresh random invite token (spec §4.8 "Invite-token API").
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::NotStealth`] unless this peer is configured for
    /// STEALTH visibility.
    pub fn generate_invite_token(&self, options: InviteTokenOptions) -> Result<Vec<u8>, PeerError> {
        Ok(self.invite_store()?.generate(options))
    }

    /// Import an externally created invite token.
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::NotStealth`] unless this peer is configured for
    /// STEALTH visibility, or [`PeerError::InvalidInviteToken`] if `token`
    /// is not 16-32 bytes.
    pub fn import_invite_token(&self, token: Vec<u8>, options: InviteTokenOptions) -> Result<(), PeerError> {
        self.invite_store()?
            .import(token, options)
            .map_err(PeerError::InvalidInviteToken)
    }

    /// Revoke a previously issued invite token.
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::NotStealth`] unless this peer is configured for
    /// STEALTH visibility.
    pub fn revoke_invite_token(&self, token: &[u8]) -> Result<bool, PeerError> {
        Ok(self.invite_store()?.revoke(token))
    }

    /// Count currently tracked invite tokens.
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::NotStealth`] unless this peer is configured for
    /// STEALTH visibility.
    pub fn invite_token_count(&self) -> Result<usize, PeerError> {
        Ok(self.invite_store()?.count())
    }

    fn invite_store(&self) -> Result<&InviteTokenStore, PeerError> {
        if self.0.config.visibility != Visibility::Stealth {
            return Err(PeerError::NotStealth);
        }
        self.0.invite_tokens.as_ref().ok_or(PeerError::NotStealth)
    }
}

fn host_string(addr: SocketAddr) -> String {
    match addr {
        SocketAddr::V4(v4) => v4.ip().to_string(),
        SocketAddr::V6(v6) => v6.ip().to_string(),
    }
}

async fn accept_loop(inner: Arc<PeerInner>, listener: TcpListener) {
    loop {
        let (mut stream, remote_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed, continuing");
                continue;
            }
        };

        if !inner.rate_limiters.check(inner.config.visibility, remote_addr.ip()) {
            tracing::debug!(remote = %remote_addr, "inbound connection rate-limited, dropping");
            continue;
        }

        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(error = %e, "failed to set TCP_NODELAY on accepted socket");
        }

        let inner = Arc::clone(&inner);
        tokio::spawn(async move {
            accept_one(inner, stream, remote_addr).await;
        });
    }
}

async fn accept_one(inner: Arc<PeerInner>, mut stream: TcpStream, remote_addr: SocketAddr) {
    let attestation = inner.attestation.read().await.clone();
    let ctx = HandshakeContext {
        noise_keypair: &inner.identity.noise_keypair,
        node_public_key: inner.identity.node_public_key,
        wallet: inner.wallet.as_ref(),
        attestation: &attestation,
        visibility: inner.config.visibility,
        capabilities: Vec::new(),
        allowlist: inner.config.allowlist.as_ref(),
        invite_tokens: inner.invite_tokens.as_ref(),
        timeout: inner.config.session.handshake_timeout,
    };

    let outcome = match handshake::run_responder(&mut stream, &ctx).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::info!(remote = %remote_addr, error = %e, "inbound handshake rejected");
            return;
        }
    };

    let session = Session::spawn(
        stream,
        outcome.remote_principal,
        outcome.remote_node_public_key,
        outcome.session_id,
        outcome.transport,
        &inner.config.session,
    );
    let locator = Locator {
        transport: Transport::Tcp,
        host: remote_addr.ip().to_string(),
        port: remote_addr.port(),
        node_public_key: Some(session.remote_node_public_key()),
    };
    inner.sessions.insert(locator, session.clone());

    if inner.incoming_tx.send(Incoming { session }).is_err() {
        tracing::debug!("no receiver for accepted session, dropping");
    }
}
