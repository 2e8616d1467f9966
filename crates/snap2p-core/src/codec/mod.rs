//! Canonical map encoding and the control-message catalogue (C2), spec §4.2.

pub mod canonical;
pub mod message;

pub use canonical::CanonicalValue;
pub use message::{
    Auth, AuthFail, AuthOk, CloseStream, ErrorMsg, Hello, Knock, KnockResponse, Message,
    OpenStream, Ping, Pong, StreamData, Visibility,
};
