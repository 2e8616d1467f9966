//! Handshake orchestrator (C6), spec §4.5: drives [`crate::framing`] +
//! [`crate::codec`] + [`snap2p_crypto::noise`] over a `tokio::net::TcpStream`,
//! running the initiator/responder steps over a length-framed TCP byte
//! stream rather than raw UDP datagrams.

use crate::attestation::{NodeKeyAttestation, CLOCK_SKEW_SECS};
use crate::codec::{Auth, AuthFail, AuthOk, Hello, Knock, KnockResponse, Message, Visibility};
use crate::error::{ErrorKind, HandshakeError};
use crate::framing::FrameBuffer;
use crate::invite_token::InviteTokenStore;
use crate::principal::Principal;
use crate::wallet::Wallet;
use snap2p_crypto::noise::{NoiseHandshake, NoiseKeypair, NoiseTransport};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_secs() as i64
}

/// Everything a handshake run needs from its owning `Peer` (spec §4.8): one
/// wallet, one node key, one attestation, and the policy knobs that gate an
/// inbound connection.
pub struct HandshakeContext<'a> {
    /// The Noise static keypair: the X25519 image of the node's Ed25519
    /// identity (spec §4.4 "the static key used here is the X25519 image of
    /// the peer's Ed25519 node key").
    pub noise_keypair: &'a NoiseKeypair,
    /// The node's Ed25519 public key, as carried in HELLO and the
    /// attestation.
    pub node_public_key: [u8; 32],
    /// The wallet whose principal this peer authenticates as.
    pub wallet: &'a dyn Wallet,
    /// This peer's current, already-signed attestation.
    pub attestation: &'a NodeKeyAttestation,
    /// The visibility this peer advertises (and, as a listener, enforces).
    pub visibility: Visibility,
    /// Capability strings advertised in HELLO; opaque to this layer.
    pub capabilities: Vec<String>,
    /// If set, only these principals may complete an inbound handshake.
    pub allowlist: Option<&'a BTreeSet<String>>,
    /// Required when `visibility == Stealth`: the store validating inbound
    /// KNOCKs (spec §9 "implementers SHOULD instead refuse to start in
    /// STEALTH without a token store" — enforced at `Peer` construction, not
    /// here).
    pub invite_tokens: Option<&'a InviteTokenStore>,
    /// Bound on every handshake I/O step (spec §4.5).
    pub timeout: Duration,
}

/// What a successful handshake produces: the verified remote identity, the
/// agreed session id, and the live encrypted transport to hand to
/// [`crate::session::Session`].
pub struct HandshakeOutcome {
    /// The remote's verified principal.
    pub remote_principal: Principal,
    /// The remote's Ed25519 node public key (from its attestation).
    pub remote_node_public_key: [u8; 32],
    /// The 32-byte session identifier, generated by the responder.
    pub session_id: [u8; 32],
    /// The live Noise transport, ready for [`crate::session::Session`].
    pub transport: NoiseTransport,
}

async fn with_timeout<T>(
    dur: Duration,
    fut: impl Future<Output = Result<T, HandshakeError>>,
) -> Result<T, HandshakeError> {
    tokio::time::timeout(dur, fut)
        .await
        .unwrap_or(Err(HandshakeError::Timeout))
}

async fn send_frame(stream: &mut TcpStream, payload: &[u8]) -> Result<(), HandshakeError> {
    let framed = crate::framing::frame(payload);
    stream.write_all(&framed).await.map_err(|e| HandshakeError::Frame(e.into()))
}

async fn recv_frame(stream: &mut TcpStream, buf: &mut FrameBuffer) -> Result<Vec<u8>, HandshakeError> {
    loop {
        if let Some(frame) = buf.try_take_frame().map_err(HandshakeError::Frame)? {
            return Ok(frame);
        }
        let mut chunk = [0u8; 4096];
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| HandshakeError::Frame(e.into()))?;
        if n == 0 {
            return Err(HandshakeError::ConnectionClosed);
        }
        buf.push(&chunk[..n]);
    }
}

async fn send_plain(stream: &mut TcpStream, msg: &Message) -> Result<(), HandshakeError> {
    send_frame(stream, &msg.encode()).await
}

async fn recv_plain(stream: &mut TcpStream, buf: &mut FrameBuffer) -> Result<Message, HandshakeError> {
    let frame = recv_frame(stream, buf).await?;
    Message::decode(&frame).map_err(HandshakeError::Codec)
}

async fn noise_write(stream: &mut TcpStream, hs: &mut NoiseHandshake) -> Result<(), HandshakeError> {
    let msg = hs
        .write_message(&[])
        .map_err(|e| HandshakeError::Noise(e.to_string()))?;
    send_frame(stream, &msg).await
}

async fn noise_read(
    stream: &mut TcpStream,
    buf: &mut FrameBuffer,
    hs: &mut NoiseHandshake,
) -> Result<(), HandshakeError> {
    let frame = recv_frame(stream, buf).await?;
    hs.read_message(&frame)
        .map_err(|e| HandshakeError::Noise(e.to_string()))?;
    Ok(())
}

async fn send_encrypted(
    stream: &mut TcpStream,
    transport: &mut NoiseTransport,
    msg: &Message,
) -> Result<(), HandshakeError> {
    let ciphertext = transport
        .write_message(&msg.encode())
        .map_err(|e| HandshakeError::Noise(e.to_string()))?;
    send_frame(stream, &ciphertext).await
}

async fn recv_encrypted(
    stream: &mut TcpStream,
    buf: &mut FrameBuffer,
    transport: &mut NoiseTransport,
) -> Result<Message, HandshakeError> {
    let ciphertext = recv_frame(stream, buf).await?;
    let plaintext = transport
        .read_message(&ciphertext)
        .map_err(|e| HandshakeError::Noise(e.to_string()))?;
    Message::decode(&plaintext).map_err(HandshakeError::Codec)
}

fn build_hello(ctx: &HandshakeContext<'_>) -> Result<Hello, HandshakeError> {
    Ok(Hello {
        version: 1,
        node_public_key: ctx.node_public_key,
        nonce: snap2p_crypto::random::random_32()
            .map_err(|e| HandshakeError::Noise(e.to_string()))?,
        timestamp: now_secs(),
        visibility: ctx.visibility,
        capabilities: ctx.capabilities.clone(),
    })
}

fn expect_hello(msg: Message) -> Result<Hello, HandshakeError> {
    match msg {
        Message::Hello(h) => Ok(h),
        _ => Err(HandshakeError::InvalidHello("expected HELLO")),
    }
}

/// Validate an inbound HELLO (spec §4.5 "HELLO validation"). Field lengths
/// for `node_public_key`/`nonce` are enforced structurally by the codec's
/// fixed-size `[u8; 32]` fields; only version and clock skew remain to
/// check here.
fn validate_hello(hello: &Hello) -> Result<(), HandshakeError> {
    if hello.version != 1 {
        return Err(HandshakeError::InvalidHello("unsupported protocol version"));
    }
    if (hello.timestamp - now_secs()).abs() > CLOCK_SKEW_SECS {
        return Err(HandshakeError::InvalidHello("timestamp outside clock-skew tolerance"));
    }
    Ok(())
}

/// Node-key binding check (spec §4.5 "Node-key binding"): the attestation's
/// Ed25519 node key, converted to its X25519 form, must equal the Noise
/// peer's remote static key.
fn verify_node_key_binding(
    attestation: &NodeKeyAttestation,
    remote_static: &[u8; 32],
) -> Result<(), HandshakeError> {
    let converted = snap2p_crypto::x25519::ed25519_public_to_x25519(&attestation.node_public_key)
        .map_err(|_| HandshakeError::BindingMismatch)?;
    if snap2p_crypto::constant_time::ct_eq(converted.as_bytes(), remote_static) {
        Ok(())
    } else {
        Err(HandshakeError::BindingMismatch)
    }
}

fn auth_fail_of(f: AuthFail) -> HandshakeError {
    HandshakeError::RejectedByPeer {
        kind: ErrorKind::from_wire_str(&f.error_code),
        reason: f.reason.unwrap_or_default(),
    }
}

/// Run the initiator side of the handshake (spec §4.5 "Initiator script")
/// over an already-connected `stream`.
///
/// # Errors
///
/// Returns a [`HandshakeError`] for any failed step: rejected KNOCK, Noise
/// failure, invalid HELLO, attestation or node-key-binding failure, or a
/// peer-sent `AUTH_FAIL`.
pub async fn run_initiator(
    stream: &mut TcpStream,
    ctx: &HandshakeContext<'_>,
    invite_token: Option<Vec<u8>>,
) -> Result<HandshakeOutcome, HandshakeError> {
    let timeout = ctx.timeout;
    let mut buf = FrameBuffer::new();

    if let Some(token) = invite_token {
        with_timeout(
            timeout,
            send_plain(stream, &Message::Knock(Knock { invite_token: token })),
        )
        .await?;
        match with_timeout(timeout, recv_plain(stream, &mut buf)).await? {
            Message::AuthFail(f) => return Err(auth_fail_of(f)),
            Message::KnockResponse(KnockResponse { allowed: false }) => {
                return Err(HandshakeError::StealthRejected(ErrorKind::InvalidToken));
            }
            Message::KnockResponse(KnockResponse { allowed: true }) => {}
            _ => return Err(HandshakeError::InvalidHello("unexpected pre-Noise reply")),
        }
    }

    let mut hs = NoiseHandshake::new_initiator(ctx.noise_keypair)
        .map_err(|e| HandshakeError::Noise(e.to_string()))?;
    with_timeout(timeout, noise_write(stream, &mut hs)).await?;
    with_timeout(timeout, noise_read(stream, &mut buf, &mut hs)).await?;
    with_timeout(timeout, noise_write(stream, &mut hs)).await?;

    let remote_static = hs
        .get_remote_static()
        .ok_or_else(|| HandshakeError::Noise("remote static key missing after handshake".to_string()))?;
    let mut transport = hs.into_transport().map_err(|e| HandshakeError::Noise(e.to_string()))?;

    let my_hello = build_hello(ctx)?;
    with_timeout(timeout, send_encrypted(stream, &mut transport, &Message::Hello(my_hello))).await?;
    let remote_hello = expect_hello(with_timeout(timeout, recv_encrypted(stream, &mut buf, &mut transport)).await?)?;
    validate_hello(&remote_hello)?;

    with_timeout(
        timeout,
        send_encrypted(
            stream,
            &mut transport,
            &Message::Auth(Auth {
                attestation: ctx.attestation.serialize(),
                handshake_data: Vec::new(),
            }),
        ),
    )
    .await?;

    let remote_attestation = match with_timeout(timeout, recv_encrypted(stream, &mut buf, &mut transport)).await? {
        Message::Auth(a) => NodeKeyAttestation::deserialize(&a.attestation)?,
        Message::AuthFail(f) => return Err(auth_fail_of(f)),
        _ => return Err(HandshakeError::InvalidHello("expected AUTH")),
    };
    remote_attestation.verify()?;
    verify_node_key_binding(&remote_attestation, &remote_static)?;

    let session_id = match with_timeout(timeout, recv_encrypted(stream, &mut buf, &mut transport)).await? {
        Message::AuthOk(ok) => ok.session_id,
        Message::AuthFail(f) => return Err(auth_fail_of(f)),
        _ => return Err(HandshakeError::InvalidHello("expected AUTH_OK")),
    };

    with_timeout(
        timeout,
        send_encrypted(
            stream,
            &mut transport,
            &Message::AuthOk(AuthOk {
                principal: ctx.wallet.principal().as_str().to_string(),
                session_id,
            }),
        ),
    )
    .await?;

    Ok(HandshakeOutcome {
        remote_principal: remote_attestation.principal,
        remote_node_public_key: remote_attestation.node_public_key,
        session_id,
        transport,
    })
}

/// Run the responder side of the handshake (spec §4.5 "Responder script")
/// over an already-accepted `stream`.
///
/// # Errors
///
/// Returns a [`HandshakeError`] for any failed step. Where an `AUTH_FAIL`
/// should precede closing (STEALTH gate, attestation rejection, allowlist
/// rejection), this function sends it best-effort and then still returns
/// the corresponding error.
pub async fn run_responder(
    stream: &mut TcpStream,
    ctx: &HandshakeContext<'_>,
) -> Result<HandshakeOutcome, HandshakeError> {
    let timeout = ctx.timeout;
    let mut buf = FrameBuffer::new();

    if ctx.visibility == Visibility::Stealth {
        let store = ctx
            .invite_tokens
            .expect("Peer must not enter STEALTH without an invite-token store");

        let first = with_timeout(timeout, recv_plain(stream, &mut buf)).await?;
        let token = match first {
            Message::Knock(k) => k.invite_token,
            _ => {
                let _ = with_timeout(
                    timeout,
                    send_plain(
                        stream,
                        &Message::AuthFail(AuthFail {
                            error_code: ErrorKind::InviteRequired.as_wire_str().to_string(),
                            reason: None,
                        }),
                    ),
                )
                .await;
                return Err(HandshakeError::StealthRejected(ErrorKind::InviteRequired));
            }
        };

        if !store.validate(&token) {
            let _ = with_timeout(
                timeout,
                send_plain(
                    stream,
                    &Message::AuthFail(AuthFail {
                        error_code: ErrorKind::InvalidToken.as_wire_str().to_string(),
                        reason: None,
                    }),
                ),
            )
            .await;
            return Err(HandshakeError::StealthRejected(ErrorKind::InvalidToken));
        }

        with_timeout(
            timeout,
            send_plain(stream, &Message::KnockResponse(KnockResponse { allowed: true })),
        )
        .await?;
    }

    let mut hs = NoiseHandshake::new_responder(ctx.noise_keypair)
        .map_err(|e| HandshakeError::Noise(e.to_string()))?;
    with_timeout(timeout, noise_read(stream, &mut buf, &mut hs)).await?;
    with_timeout(timeout, noise_write(stream, &mut hs)).await?;
    with_timeout(timeout, noise_read(stream, &mut buf, &mut hs)).await?;

    let remote_static = hs
        .get_remote_static()
        .ok_or_else(|| HandshakeError::Noise("remote static key missing after handshake".to_string()))?;
    let mut transport = hs.into_transport().map_err(|e| HandshakeError::Noise(e.to_string()))?;

    let remote_hello = expect_hello(with_timeout(timeout, recv_encrypted(stream, &mut buf, &mut transport)).await?)?;
    validate_hello(&remote_hello)?;
    let my_hello = build_hello(ctx)?;
    with_timeout(timeout, send_encrypted(stream, &mut transport, &Message::Hello(my_hello))).await?;

    let auth = match with_timeout(timeout, recv_encrypted(stream, &mut buf, &mut transport)).await? {
        Message::Auth(a) => a,
        _ => return Err(HandshakeError::InvalidHello("expected AUTH")),
    };
    let remote_attestation = NodeKeyAttestation::deserialize(&auth.attestation)?;

    if let Err(e) = remote_attestation
        .verify()
        .and_then(|()| verify_node_key_binding(&remote_attestation, &remote_static))
    {
        let _ = with_timeout(
            timeout,
            send_encrypted(
                stream,
                &mut transport,
                &Message::AuthFail(AuthFail {
                    error_code: e.kind().as_wire_str().to_string(),
                    reason: Some(e.to_string()),
                }),
            ),
        )
        .await;
        return Err(e);
    }

    if let Some(allowlist) = ctx.allowlist {
        if !allowlist.contains(remote_attestation.principal.as_str()) {
            let _ = with_timeout(
                timeout,
                send_encrypted(
                    stream,
                    &mut transport,
                    &Message::AuthFail(AuthFail {
                        error_code: ErrorKind::NotAllowed.as_wire_str().to_string(),
                        reason: None,
                    }),
                ),
            )
            .await;
            return Err(HandshakeError::NotAllowed);
        }
    }

    with_timeout(
        timeout,
        send_encrypted(
            stream,
            &mut transport,
            &Message::Auth(Auth {
                attestation: ctx.attestation.serialize(),
                handshake_data: Vec::new(),
            }),
        ),
    )
    .await?;

    let session_id = snap2p_crypto::random::random_32().map_err(|e| HandshakeError::Noise(e.to_string()))?;
    with_timeout(
        timeout,
        send_encrypted(
            stream,
            &mut transport,
            &Message::AuthOk(AuthOk {
                principal: ctx.wallet.principal().as_str().to_string(),
                session_id,
            }),
        ),
    )
    .await?;

    match with_timeout(timeout, recv_encrypted(stream, &mut buf, &mut transport)).await? {
        Message::AuthOk(_) => {}
        Message::AuthFail(f) => return Err(auth_fail_of(f)),
        _ => return Err(HandshakeError::InvalidHello("expected AUTH_OK")),
    }

    Ok(HandshakeOutcome {
        remote_principal: remote_attestation.principal,
        remote_node_public_key: remote_attestation.node_public_key,
        session_id,
        transport,
    })
}
