//! Post-handshake encrypted session transport (C7), spec §4.6.
//!
//! One [`Session`] owns one TCP connection after [`crate::handshake`]
//! completes: a single actor task drives the socket, the Noise transport,
//! and keepalive timing, one task per peer connection rather than sharing
//! a connection across threads behind a lock. Consumers talk to it through
//! a cheaply-cloneable handle; [`crate::stream::Stream`]s opened on it are
//! multiplexed over the same encrypted channel (spec §4.7).

use crate::codec::{Message, Ping, Pong};
use crate::config::SessionConfig;
use crate::error::{ErrorKind, MuxError, SessionError};
use crate::principal::Principal;
use crate::stream::{Multiplexer, Stream};
use snap2p_crypto::noise::NoiseTransport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tracing::{debug, trace, warn};

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_secs() as i64
}

/// Why a [`Session`] stopped running (spec §4.6 "Session teardown").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The local side called [`Session::close`].
    Local,
    /// The remote closed the TCP connection, or sent a final frame then EOF.
    PeerClosed,
    /// A keepalive PING went unanswered past `keepalive_timeout`.
    KeepaliveTimeout,
    /// A protocol- or transport-layer error tore the session down.
    Error(ErrorKind),
}

/// An event delivered to a session's consumer (spec §4.6/§6 `on('stream')`,
/// `on('close')`).
pub enum SessionEvent {
    /// A new inbound stream was accepted.
    Stream(Stream),
    /// A control message with no session-layer handling of its own arrived
    /// after the handshake (spec §4.6 "any other control tag → surface as a
    /// 'message' event"), e.g. a stray `Hello`/`Auth`/`Knock`.
    Message(Message),
    /// The session has stopped; no further events follow.
    Closed(CloseReason),
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(s) => f.debug_tuple("Stream").field(&s.id()).finish(),
            Self::Message(m) => f.debug_tuple("Message").field(&m.tag()).finish(),
            Self::Closed(r) => f.debug_tuple("Closed").field(r).finish(),
        }
    }
}

struct SessionInner {
    remote_principal: Principal,
    remote_node_public_key: [u8; 32],
    session_id: [u8; 32],
    multiplexer: Arc<Multiplexer>,
    events_rx: AsyncMutex<mpsc::UnboundedReceiver<SessionEvent>>,
    shutdown_tx: AsyncMutex<Option<oneshot::Sender<()>>>,
    closed: Arc<AtomicBool>,
    task: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
}

/// A live, authenticated, encrypted session with one remote peer (spec §3
/// "Session"). Cheap to clone; every clone shares the same underlying
/// connection and actor task.
#[derive(Clone)]
pub struct Session(Arc<SessionInner>);

impl Session {
    /// Take ownership of `stream` and `transport` from a completed handshake
    /// and spawn the actor task that drives them (spec §4.6).
    pub fn spawn(
        stream: TcpStream,
        remote_principal: Principal,
        remote_node_public_key: [u8; 32],
        session_id: [u8; 32],
        transport: NoiseTransport,
        config: &SessionConfig,
    ) -> Session {
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let multiplexer = Arc::new(Multiplexer::new(
            transport.role(),
            config.max_streams,
            config.stream_high_water_mark,
            outbound_tx,
        ));
        let closed = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_actor(ActorState {
            read_half,
            write_half,
            transport,
            multiplexer: multiplexer.clone(),
            outbound_rx,
            events_tx,
            shutdown_rx,
            keepalive_interval: config.keepalive_interval,
            keepalive_timeout: config.keepalive_timeout,
            closed: closed.clone(),
        }));

        Session(Arc::new(SessionInner {
            remote_principal,
            remote_node_public_key,
            session_id,
            multiplexer,
            events_rx: AsyncMutex::new(events_rx),
            shutdown_tx: AsyncMutex::new(Some(shutdown_tx)),
            closed,
            task: AsyncMutex::new(Some(task)),
        }))
    }

    /// The remote's verified principal.
    #[must_use]
    pub fn remote_principal(&self) -> &Principal {
        &self.0.remote_principal
    }

    /// The remote's Ed25519 node public key.
    #[must_use]
    pub fn remote_node_public_key(&self) -> [u8; 32] {
        self.0.remote_node_public_key
    }

    /// The 32-byte session identifier agreed during the handshake.
    #[must_use]
    pub fn session_id(&self) -> [u8; 32] {
        self.0.session_id
    }

    /// Open a new multiplexed stream (spec §4.7).
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::ResourceExhausted`] if the per-session stream cap
    /// has been reached, or [`MuxError::SessionClosed`] if this session has
    /// already stopped.
    pub fn open_stream(&self, label: Option<String>) -> Result<Stream, MuxError> {
        if self.0.closed.load(Ordering::SeqCst) {
            return Err(MuxError::SessionClosed);
        }
        self.0.multiplexer.open_stream(label)
    }

    /// Await the next event: an inbound stream, or the terminal close event.
    /// Returns `None` once the close event has already been delivered and
    /// consumed.
    pub async fn next_event(&self) -> Option<SessionEvent> {
        self.0.events_rx.lock().await.recv().await
    }

    /// Whether the session has stopped (spec §4.6: the actor task exited).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }

    /// Request a graceful local close (spec §4.6 "Session teardown"). Safe
    /// to call more than once or from multiple clones; only the first call
    /// has an effect.
    pub async fn close(&self) {
        if let Some(tx) = self.0.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }
        let task = self.0.task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.0.closed.store(true, Ordering::SeqCst);
    }
}

struct ActorState {
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
    transport: NoiseTransport,
    multiplexer: Arc<Multiplexer>,
    outbound_rx: mpsc::UnboundedReceiver<Message>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    shutdown_rx: oneshot::Receiver<()>,
    keepalive_interval: std::time::Duration,
    keepalive_timeout: std::time::Duration,
    closed: Arc<AtomicBool>,
}

async fn send_encrypted(
    write_half: &mut OwnedWriteHalf,
    transport: &mut NoiseTransport,
    msg: &Message,
) -> Result<(), SessionError> {
    let ciphertext = transport
        .write_message(&msg.encode())
        .map_err(|_| SessionError::NonceExhausted)?;
    let framed = crate::framing::frame(&ciphertext);
    write_half.write_all(&framed).await.map_err(|e| SessionError::Frame(e.into()))
}

async fn run_actor(mut state: ActorState) {
    let mut frame_buf = crate::framing::FrameBuffer::new();
    let mut chunk = [0u8; 16 * 1024];
    let mut keepalive_tick = tokio::time::interval(state.keepalive_interval);
    keepalive_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut ping_seq: u64 = 0;
    let mut pending_ping: Option<(u64, tokio::time::Instant)> = None;

    let reason = 'actor: loop {
        let timeout_wait = async {
            match pending_ping {
                Some((_, sent_at)) => tokio::time::sleep_until(sent_at + state.keepalive_timeout).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;

            _ = &mut state.shutdown_rx => {
                break 'actor CloseReason::Local;
            }

            () = timeout_wait, if pending_ping.is_some() => {
                warn!("keepalive ping unanswered past deadline");
                break 'actor CloseReason::KeepaliveTimeout;
            }

            _ = keepalive_tick.tick() => {
                if pending_ping.is_none() {
                    ping_seq += 1;
                    pending_ping = Some((ping_seq, tokio::time::Instant::now()));
                    let ping = Message::Ping(Ping { sequence: ping_seq, timestamp: now_secs() });
                    if send_encrypted(&mut state.write_half, &mut state.transport, &ping).await.is_err() {
                        break 'actor CloseReason::Error(ErrorKind::ConnectionClosed);
                    }
                }
            }

            outbound = state.outbound_rx.recv() => {
                match outbound {
                    Some(msg) => {
                        if send_encrypted(&mut state.write_half, &mut state.transport, &msg).await.is_err() {
                            break 'actor CloseReason::Error(ErrorKind::ConnectionClosed);
                        }
                    }
                    None => break 'actor CloseReason::Local,
                }
            }

            n = state.read_half.read(&mut chunk) => {
                let n = match n {
                    Ok(0) => break 'actor CloseReason::PeerClosed,
                    Ok(n) => n,
                    Err(_) => break 'actor CloseReason::Error(ErrorKind::ConnectionClosed),
                };
                frame_buf.push(&chunk[..n]);

                loop {
                    let ciphertext = match frame_buf.try_take_frame() {
                        Ok(Some(f)) => f,
                        Ok(None) => break,
                        Err(e) => break 'actor CloseReason::Error(e.kind()),
                    };
                    let plaintext = match state.transport.read_message(&ciphertext) {
                        Ok(p) => p,
                        Err(_) => break 'actor CloseReason::Error(ErrorKind::Internal),
                    };
                    let msg = match Message::decode(&plaintext) {
                        Ok(m) => m,
                        Err(e) => break 'actor CloseReason::Error(e.kind()),
                    };

                    match msg {
                        Message::Ping(p) => {
                            let pong = Message::Pong(Pong { sequence: p.sequence, timestamp: now_secs() });
                            if send_encrypted(&mut state.write_half, &mut state.transport, &pong).await.is_err() {
                                break 'actor CloseReason::Error(ErrorKind::ConnectionClosed);
                            }
                        }
                        Message::Pong(p) => {
                            if pending_ping.is_some_and(|(seq, _)| seq == p.sequence) {
                                pending_ping = None;
                            }
                        }
                        Message::OpenStream(os) => {
                            if let Some(stream) = state.multiplexer.handle_open(os) {
                                let _ = state.events_tx.send(SessionEvent::Stream(stream));
                            }
                        }
                        Message::StreamData(sd) => state.multiplexer.handle_data(sd).await,
                        Message::CloseStream(cs) => state.multiplexer.handle_close(cs),
                        Message::Error(e) => {
                            debug!(error_code = %e.error_code, "peer sent session-level error");
                            break 'actor CloseReason::Error(ErrorKind::from_wire_str(&e.error_code));
                        }
                        other => {
                            trace!(tag = other.tag(), "control message with no session-layer handling, surfacing as an event");
                            let _ = state.events_tx.send(SessionEvent::Message(other));
                        }
                    }
                }
            }
        }
    };

    state.multiplexer.close_all();
    state.closed.store(true, Ordering::SeqCst);
    let _ = state.events_tx.send(SessionEvent::Closed(reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::NodeKeyAttestation;
    use crate::handshake::{run_initiator, run_responder, HandshakeContext};
    use crate::codec::Visibility;
    use crate::wallet::EphemeralWallet;
    use snap2p_crypto::noise::NoiseKeypair;
    use snap2p_crypto::x25519::ed25519_seed_to_x25519_private;
    use std::time::Duration;
    use tokio::net::TcpListener;

    struct Identity {
        wallet: EphemeralWallet,
        node_public_key: [u8; 32],
        noise_keypair: NoiseKeypair,
        attestation: NodeKeyAttestation,
    }

    fn make_identity(seed_byte: u8) -> Identity {
        let seed = [seed_byte; 32];
        let signing_key = snap2p_crypto::signatures::SigningKey::from_bytes(&seed);
        let node_public_key = signing_key.verifying_key().to_bytes();
        let x25519_private = ed25519_seed_to_x25519_private(&seed);
        let noise_keypair = NoiseKeypair::from_bytes(x25519_private.to_bytes()).unwrap();
        let wallet = EphemeralWallet::generate();
        let attestation = NodeKeyAttestation::build(&wallet, node_public_key, 3600);
        Identity { wallet, node_public_key, noise_keypair, attestation }
    }

    async fn connected_sessions(config: SessionConfig) -> (Session, Session) {
        let a = make_identity(1);
        let b = make_identity(2);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (client, server) = tokio::join!(connect, accept);
        let (mut client, (mut server, _)) = (client.unwrap(), server.unwrap());

        let client_ctx = HandshakeContext {
            noise_keypair: &a.noise_keypair,
            node_public_key: a.node_public_key,
            wallet: &a.wallet,
            attestation: &a.attestation,
            visibility: Visibility::Public,
            capabilities: vec![],
            allowlist: None,
            invite_tokens: None,
            timeout: Duration::from_secs(5),
        };
        let server_ctx = HandshakeContext {
            noise_keypair: &b.noise_keypair,
            node_public_key: b.node_public_key,
            wallet: &b.wallet,
            attestation: &b.attestation,
            visibility: Visibility::Public,
            capabilities: vec![],
            allowlist: None,
            invite_tokens: None,
            timeout: Duration::from_secs(5),
        };

        let (client_outcome, server_outcome) = tokio::join!(
            run_initiator(&mut client, &client_ctx, None),
            run_responder(&mut server, &server_ctx),
        );
        let client_outcome = client_outcome.unwrap();
        let server_outcome = server_outcome.unwrap();

        let client_session = Session::spawn(
            client,
            client_outcome.remote_principal,
            client_outcome.remote_node_public_key,
            client_outcome.session_id,
            client_outcome.transport,
            &config,
        );
        let server_session = Session::spawn(
            server,
            server_outcome.remote_principal,
            server_outcome.remote_node_public_key,
            server_outcome.session_id,
            server_outcome.transport,
            &config,
        );
        (client_session, server_session)
    }

    #[tokio::test]
    async fn stream_open_and_data_flow_end_to_end() {
        let config = SessionConfig::default();
        let (client, server) = connected_sessions(config).await;

        let out = client.open_stream(Some("greeting".into())).unwrap();
        out.write(b"hello").unwrap();
        out.end().unwrap();

        let event = server.next_event().await.unwrap();
        let inbound = match event {
            SessionEvent::Stream(s) => s,
            other => panic!("expected Stream event, got {other:?}"),
        };
        assert_eq!(inbound.label(), Some("greeting"));
        let received = inbound.read_to_end().await.unwrap();
        assert_eq!(received, b"hello");

        client.close().await;
        server.close().await;
    }

    #[tokio::test]
    async fn local_close_delivers_closed_event() {
        let config = SessionConfig::default();
        let (client, server) = connected_sessions(config).await;

        client.close().await;
        // The server side never calls `close()` itself; its actor task must
        // still observe the peer's disconnect and flip `is_closed()`.
        let event = server.next_event().await.unwrap();
        assert!(matches!(event, SessionEvent::Closed(CloseReason::PeerClosed)));
        assert!(server.is_closed());
    }

    #[tokio::test]
    async fn stray_control_message_after_handshake_surfaces_as_event() {
        let a = make_identity(1);
        let b = make_identity(2);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (client, server) = tokio::join!(connect, accept);
        let (client, (server, _)) = (client.unwrap(), server.unwrap());

        let client_ctx = HandshakeContext {
            noise_keypair: &a.noise_keypair,
            node_public_key: a.node_public_key,
            wallet: &a.wallet,
            attestation: &a.attestation,
            visibility: Visibility::Public,
            capabilities: vec![],
            allowlist: None,
            invite_tokens: None,
            timeout: Duration::from_secs(5),
        };
        let server_ctx = HandshakeContext {
            noise_keypair: &b.noise_keypair,
            node_public_key: b.node_public_key,
            wallet: &b.wallet,
            attestation: &b.attestation,
            visibility: Visibility::Public,
            capabilities: vec![],
            allowlist: None,
            invite_tokens: None,
            timeout: Duration::from_secs(5),
        };

        let mut client = client;
        let mut server_stream = server;
        let (client_outcome, server_outcome) = tokio::join!(
            run_initiator(&mut client, &client_ctx, None),
            run_responder(&mut server_stream, &server_ctx),
        );
        let client_outcome = client_outcome.unwrap();
        let server_outcome = server_outcome.unwrap();

        // Only the server side becomes a managed `Session`; the client side
        // stays a raw socket so the test can hand-craft a control message no
        // post-handshake dispatch arm recognizes.
        let server_session = Session::spawn(
            server_stream,
            server_outcome.remote_principal,
            server_outcome.remote_node_public_key,
            server_outcome.session_id,
            server_outcome.transport,
            &SessionConfig::default(),
        );

        let (_client_read, mut client_write) = client.into_split();
        let mut client_transport = client_outcome.transport;
        let knock = Message::Knock(crate::codec::Knock { invite_token: vec![0u8; 16] });
        send_encrypted(&mut client_write, &mut client_transport, &knock)
            .await
            .unwrap();

        let event = server_session.next_event().await.unwrap();
        match event {
            SessionEvent::Message(Message::Knock(k)) => assert_eq!(k.invite_token, vec![0u8; 16]),
            other => panic!("expected a stray Knock surfaced as a Message event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn keepalive_roundtrip_does_not_close_session() {
        let mut config = SessionConfig::default();
        config.keepalive_interval = Duration::from_millis(50);
        config.keepalive_timeout = Duration::from_millis(500);
        let (client, server) = connected_sessions(config).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!client.is_closed());
        assert!(!server.is_closed());

        client.close().await;
        server.close().await;
    }
}
