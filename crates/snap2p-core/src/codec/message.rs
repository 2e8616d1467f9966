//! Control-message catalogue (C2), spec §4.2.
//!
//! Every message is a canonical map with a numeric type tag `t` and
//! per-message short-key fields. `Message::decode` dispatches on `t` and
//! rejects unknown tags with [`CodecError::UnknownTag`] (mapped to
//! `ERR_VERSION_UNSUPPORTED` per spec §8); unknown *fields* inside a known
//! message are silently dropped rather than preserved, matching the
//! round-trip contract exactly.

use super::canonical::{CanonicalValue, field};
use crate::error::CodecError;

/// Visibility tier a HELLO advertises (spec §3/§4.2), a closed enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Discoverable, no gating.
    Public,
    /// Gated by allowlist only.
    Private,
    /// Gated by a pre-Noise KNOCK invite token (spec §4.5).
    Stealth,
}

impl Visibility {
    fn as_str(self) -> &'static str {
        match self {
            Self::Public => "PUBLIC",
            Self::Private => "PRIVATE",
            Self::Stealth => "STEALTH",
        }
    }

    fn from_str(s: &str) -> Result<Self, CodecError> {
        match s {
            "PUBLIC" => Ok(Self::Public),
            "PRIVATE" => Ok(Self::Private),
            "STEALTH" => Ok(Self::Stealth),
            _ => Err(CodecError::BadField("vis")),
        }
    }
}

/// `HELLO` (0x01): the plaintext-adjacent greeting exchanged immediately
/// after the Noise channel is established.
#[derive(Debug, Clone, PartialEq)]
pub struct Hello {
    /// Protocol version; currently always 1.
    pub version: u32,
    /// The sender's Ed25519 node public key.
    pub node_public_key: [u8; 32],
    /// Random 32-byte nonce (replay-resistance for this greeting only; the
    /// attestation carries its own nonce).
    pub nonce: [u8; 32],
    /// Unix-second timestamp.
    pub timestamp: i64,
    /// Advertised visibility tier.
    pub visibility: Visibility,
    /// Advertised capability strings (application-defined, opaque here).
    pub capabilities: Vec<String>,
}

/// `AUTH` (0x02): carries a serialized attestation.
#[derive(Debug, Clone, PartialEq)]
pub struct Auth {
    /// Serialized `NodeKeyAttestation`.
    pub attestation: Vec<u8>,
    /// Reserved, currently always empty. Preserved as an opaque field for
    /// forward compatibility (spec §9 "Open questions in the source").
    pub handshake_data: Vec<u8>,
}

/// `AUTH_OK` (0x03): handshake success.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthOk {
    /// The sender's principal string.
    pub principal: String,
    /// 32-byte session identifier.
    pub session_id: [u8; 32],
}

/// `AUTH_FAIL` (0x04): handshake rejection.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthFail {
    /// The wire error code.
    pub error_code: String,
    /// Optional human-readable reason.
    pub reason: Option<String>,
}

/// `OPEN_STREAM` (0x10): request to open a new multiplexed stream.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenStream {
    /// The stream id, parity-encoding the opener's role.
    pub stream_id: u64,
    /// Optional debug label; MUST NOT influence routing or security.
    pub label: Option<String>,
}

/// `CLOSE_STREAM` (0x11): tear down one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseStream {
    /// The stream id being closed.
    pub stream_id: u64,
    /// Optional wire error code explaining the close.
    pub error_code: Option<String>,
}

/// `STREAM_DATA` (0x12): a chunk of stream payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamData {
    /// The target stream id.
    pub stream_id: u64,
    /// Opaque payload bytes.
    pub data: Vec<u8>,
    /// Set on the final chunk of the write side.
    pub fin: bool,
}

/// `PING` (0x20): keepalive probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// Unix-second timestamp at send time.
    pub timestamp: i64,
}

/// `PONG` (0x21): keepalive reply, echoing the PING's sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    /// The echoed sequence number.
    pub sequence: u64,
    /// Unix-second timestamp at reply time.
    pub timestamp: i64,
}

/// `KNOCK` (0x30): pre-Noise, plaintext STEALTH invite presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct Knock {
    /// 16-32 byte opaque invite token.
    pub invite_token: Vec<u8>,
}

/// `KNOCK_RESPONSE` (0x31): pre-Noise, plaintext reply to a KNOCK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnockResponse {
    /// Whether the presented token was accepted.
    pub allowed: bool,
}

/// `ERROR` (0xFF): post-handshake control-plane error.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMsg {
    /// The wire error code.
    pub error_code: String,
    /// Optional human-readable reason.
    pub reason: Option<String>,
}

/// The tagged union of all control messages (spec §4.2 catalogue).
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// See [`Hello`].
    Hello(Hello),
    /// See [`Auth`].
    Auth(Auth),
    /// See [`AuthOk`].
    AuthOk(AuthOk),
    /// See [`AuthFail`].
    AuthFail(AuthFail),
    /// See [`OpenStream`].
    OpenStream(OpenStream),
    /// See [`CloseStream`].
    CloseStream(CloseStream),
    /// See [`StreamData`].
    StreamData(StreamData),
    /// See [`Ping`].
    Ping(Ping),
    /// See [`Pong`].
    Pong(Pong),
    /// See [`Knock`].
    Knock(Knock),
    /// See [`KnockResponse`].
    KnockResponse(KnockResponse),
    /// See [`ErrorMsg`].
    Error(ErrorMsg),
}

/// Tag byte for [`Hello`].
pub const TAG_HELLO: u8 = 0x01;
/// Tag byte for [`Auth`].
pub const TAG_AUTH: u8 = 0x02;
/// Tag byte for [`AuthOk`].
pub const TAG_AUTH_OK: u8 = 0x03;
/// Tag byte for [`AuthFail`].
pub const TAG_AUTH_FAIL: u8 = 0x04;
/// Tag byte for [`OpenStream`].
pub const TAG_OPEN_STREAM: u8 = 0x10;
/// Tag byte for [`CloseStream`].
pub const TAG_CLOSE_STREAM: u8 = 0x11;
/// Tag byte for [`StreamData`].
pub const TAG_STREAM_DATA: u8 = 0x12;
/// Tag byte for [`Ping`].
pub const TAG_PING: u8 = 0x20;
/// Tag byte for [`Pong`].
pub const TAG_PONG: u8 = 0x21;
/// Tag byte for [`Knock`].
pub const TAG_KNOCK: u8 = 0x30;
/// Tag byte for [`KnockResponse`].
pub const TAG_KNOCK_RESPONSE: u8 = 0x31;
/// Tag byte for [`ErrorMsg`].
pub const TAG_ERROR: u8 = 0xFF;

fn opt_text(s: &Option<String>) -> CanonicalValue {
    match s {
        Some(s) => CanonicalValue::Text(s.clone()),
        None => CanonicalValue::Text(String::new()),
    }
}

impl Message {
    /// The catalogue tag for this message.
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            Self::Hello(_) => TAG_HELLO,
            Self::Auth(_) => TAG_AUTH,
            Self::AuthOk(_) => TAG_AUTH_OK,
            Self::AuthFail(_) => TAG_AUTH_FAIL,
            Self::OpenStream(_) => TAG_OPEN_STREAM,
            Self::CloseStream(_) => TAG_CLOSE_STREAM,
            Self::StreamData(_) => TAG_STREAM_DATA,
            Self::Ping(_) => TAG_PING,
            Self::Pong(_) => TAG_PONG,
            Self::Knock(_) => TAG_KNOCK,
            Self::KnockResponse(_) => TAG_KNOCK_RESPONSE,
            Self::Error(_) => TAG_ERROR,
        }
    }

    fn fields(&self) -> CanonicalValue {
        match self {
            Self::Hello(m) => CanonicalValue::map([
                ("v", CanonicalValue::UInt(u64::from(m.version))),
                ("pk", CanonicalValue::Bytes(m.node_public_key.to_vec())),
                ("n", CanonicalValue::Bytes(m.nonce.to_vec())),
                ("ts", CanonicalValue::Int(m.timestamp)),
                ("vis", CanonicalValue::Text(m.visibility.as_str().to_string())),
                (
                    "cap",
                    CanonicalValue::List(m.capabilities.iter().cloned().map(CanonicalValue::Text).collect()),
                ),
            ]),
            Self::Auth(m) => CanonicalValue::map([
                ("att", CanonicalValue::Bytes(m.attestation.clone())),
                ("hd", CanonicalValue::Bytes(m.handshake_data.clone())),
            ]),
            Self::AuthOk(m) => CanonicalValue::map([
                ("p", CanonicalValue::Text(m.principal.clone())),
                ("sid", CanonicalValue::Bytes(m.session_id.to_vec())),
            ]),
            Self::AuthFail(m) => CanonicalValue::map([
                ("ec", CanonicalValue::Text(m.error_code.clone())),
                ("r", opt_text(&m.reason)),
            ]),
            Self::OpenStream(m) => CanonicalValue::map([
                ("sid", CanonicalValue::UInt(m.stream_id)),
                ("l", opt_text(&m.label)),
            ]),
            Self::CloseStream(m) => CanonicalValue::map([
                ("sid", CanonicalValue::UInt(m.stream_id)),
                ("ec", opt_text(&m.error_code)),
            ]),
            Self::StreamData(m) => CanonicalValue::map([
                ("sid", CanonicalValue::UInt(m.stream_id)),
                ("d", CanonicalValue::Bytes(m.data.clone())),
                ("f", CanonicalValue::Bool(m.fin)),
            ]),
            Self::Ping(m) => CanonicalValue::map([
                ("seq", CanonicalValue::UInt(m.sequence)),
                ("ts", CanonicalValue::Int(m.timestamp)),
            ]),
            Self::Pong(m) => CanonicalValue::map([
                ("seq", CanonicalValue::UInt(m.sequence)),
                ("ts", CanonicalValue::Int(m.timestamp)),
            ]),
            Self::Knock(m) => CanonicalValue::map([("it", CanonicalValue::Bytes(m.invite_token.clone()))]),
            Self::KnockResponse(m) => CanonicalValue::map([("a", CanonicalValue::Bool(m.allowed))]),
            Self::Error(m) => CanonicalValue::map([
                ("ec", CanonicalValue::Text(m.error_code.clone())),
                ("r", opt_text(&m.reason)),
            ]),
        }
    }

    /// Encode this message as canonical bytes, including the leading `t`
    /// tag field, sorted lexicographically with the rest of the fields.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut map = match self.fields() {
            CanonicalValue::Map(m) => m,
            _ => unreachable!("fields() always returns a Map"),
        };
        map.insert("t".to_string(), CanonicalValue::UInt(u64::from(self.tag())));
        CanonicalValue::Map(map).to_bytes()
    }

    /// Decode a message from canonical bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownTag`] if `t` does not match a known
    /// message, or [`CodecError::BadField`]/[`CodecError::Malformed`] if a
    /// required field is missing or of the wrong type. Unknown extra
    /// fields are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let (value, _) = CanonicalValue::decode(buf)?;
        let map = value.as_map().ok_or(CodecError::Malformed("top-level value is not a map"))?;
        let tag = field::uint(map, "t")? as u8;
        match tag {
            TAG_HELLO => Ok(Self::Hello(Hello {
                version: field::uint(map, "v")? as u32,
                node_public_key: to_array32(field::bytes(map, "pk")?, "pk")?,
                nonce: to_array32(field::bytes(map, "n")?, "n")?,
                timestamp: field::int(map, "ts")?,
                visibility: Visibility::from_str(&field::text(map, "vis")?)?,
                capabilities: field::text_list(map, "cap")?,
            })),
            TAG_AUTH => Ok(Self::Auth(Auth {
                attestation: field::bytes(map, "att")?,
                handshake_data: field::bytes_opt(map, "hd").unwrap_or_default(),
            })),
            TAG_AUTH_OK => Ok(Self::AuthOk(AuthOk {
                principal: field::text(map, "p")?,
                session_id: to_array32(field::bytes(map, "sid")?, "sid")?,
            })),
            TAG_AUTH_FAIL => Ok(Self::AuthFail(AuthFail {
                error_code: field::text(map, "ec")?,
                reason: non_empty(field::text_opt(map, "r")),
            })),
            TAG_OPEN_STREAM => Ok(Self::OpenStream(OpenStream {
                stream_id: field::uint(map, "sid")?,
                label: non_empty(field::text_opt(map, "l")),
            })),
            TAG_CLOSE_STREAM => Ok(Self::CloseStream(CloseStream {
                stream_id: field::uint(map, "sid")?,
                error_code: non_empty(field::text_opt(map, "ec")),
            })),
            TAG_STREAM_DATA => Ok(Self::StreamData(StreamData {
                stream_id: field::uint(map, "sid")?,
                data: field::bytes(map, "d")?,
                fin: field::bool_opt(map, "f").unwrap_or(false),
            })),
            TAG_PING => Ok(Self::Ping(Ping {
                sequence: field::uint(map, "seq")?,
                timestamp: field::int(map, "ts")?,
            })),
            TAG_PONG => Ok(Self::Pong(Pong {
                sequence: field::uint(map, "seq")?,
                timestamp: field::int(map, "ts")?,
            })),
            TAG_KNOCK => Ok(Self::Knock(Knock {
                invite_token: field::bytes(map, "it")?,
            })),
            TAG_KNOCK_RESPONSE => Ok(Self::KnockResponse(KnockResponse {
                allowed: field::bool_required(map, "a")?,
            })),
            TAG_ERROR => Ok(Self::Error(ErrorMsg {
                error_code: field::text(map, "ec")?,
                reason: non_empty(field::text_opt(map, "r")),
            })),
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

fn to_array32(v: Vec<u8>, field: &'static str) -> Result<[u8; 32], CodecError> {
    v.try_into().map_err(|_| CodecError::BadField(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hello() -> Message {
        Message::Hello(Hello {
            version: 1,
            node_public_key: [7u8; 32],
            nonce: [9u8; 32],
            timestamp: 1_700_000_000,
            visibility: Visibility::Public,
            capabilities: vec!["stream".to_string(), "echo".to_string()],
        })
    }

    #[test]
    fn hello_roundtrip() {
        let m = sample_hello();
        let bytes = m.encode();
        assert_eq!(Message::decode(&bytes).unwrap(), m);
    }

    #[test]
    fn reencoding_decoded_message_is_byte_stable() {
        let m = sample_hello();
        let bytes1 = m.encode();
        let decoded = Message::decode(&bytes1).unwrap();
        let bytes2 = decoded.encode();
        assert_eq!(bytes1, bytes2);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let v = CanonicalValue::map([("t", CanonicalValue::UInt(0x99))]);
        assert!(matches!(
            Message::decode(&v.to_bytes()),
            Err(CodecError::UnknownTag(0x99))
        ));
    }

    #[test]
    fn unknown_fields_are_dropped_on_decode() {
        let mut map = match sample_hello().fields() {
            CanonicalValue::Map(m) => m,
            _ => unreachable!(),
        };
        map.insert("t".to_string(), CanonicalValue::UInt(u64::from(TAG_HELLO)));
        map.insert("zzz_future_field".to_string(), CanonicalValue::Bool(true));
        let bytes = CanonicalValue::Map(map).to_bytes();

        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded, sample_hello());
        // Re-encoding drops the unknown field entirely.
        assert!(!decoded.encode().windows(16).any(|w| w == b"zzz_future_field"[..]));
    }

    #[test]
    fn auth_fail_optional_reason_roundtrips() {
        let m = Message::AuthFail(AuthFail {
            error_code: "ERR_NOT_ALLOWED".to_string(),
            reason: None,
        });
        let bytes = m.encode();
        assert_eq!(Message::decode(&bytes).unwrap(), m);
    }

    #[test]
    fn stream_data_default_fin_is_false() {
        let m = Message::StreamData(StreamData {
            stream_id: 4,
            data: vec![1, 2, 3],
            fin: false,
        });
        assert_eq!(Message::decode(&m.encode()).unwrap(), m);
    }

    #[test]
    fn open_stream_without_label_roundtrips() {
        let m = Message::OpenStream(OpenStream { stream_id: 2, label: None });
        assert_eq!(Message::decode(&m.encode()).unwrap(), m);
    }

    #[test]
    fn ping_pong_roundtrip() {
        let ping = Message::Ping(Ping { sequence: 42, timestamp: 1000 });
        assert_eq!(Message::decode(&ping.encode()).unwrap(), ping);
        let pong = Message::Pong(Pong { sequence: 42, timestamp: 1001 });
        assert_eq!(Message::decode(&pong.encode()).unwrap(), pong);
    }

    #[test]
    fn knock_roundtrip() {
        let m = Message::Knock(Knock { invite_token: vec![1; 24] });
        assert_eq!(Message::decode(&m.encode()).unwrap(), m);
        let r = Message::KnockResponse(KnockResponse { allowed: true });
        assert_eq!(Message::decode(&r.encode()).unwrap(), r);
    }
}
