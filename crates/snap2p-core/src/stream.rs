//! Stream multiplexer and backpressured duplex streams (C8), spec §4.7.
//!
//! One [`Multiplexer`] per [`crate::session::Session`]; it owns the
//! id→stream table the way spec §9 "Cyclic ownership" mandates
//! (`Session` owns `Multiplexer`; `Multiplexer` owns `Stream`s). A
//! [`Stream`] holds no back-reference to its multiplexer — only its id and
//! a clone of the session's outbound message channel, the "opaque
//! send-a-DATA-frame / send-a-CLOSE-frame callback" spec §9 describes.
//!
//! Backpressure is a bounded `VecDeque<u8>` read buffer per stream guarded
//! by a high-water mark (spec §4.7 "the read buffer has a bounded
//! high-water mark"); a lock-free single-producer/single-consumer ring
//! buffer is built for a single-threaded hot UDP datagram loop and is a
//! poor fit here, where an async consumer-facing duplex stream needs to
//! park on a `Notify` rather than spin.

use crate::codec::{CloseStream, Message, OpenStream, StreamData};
use crate::error::{ErrorKind, MuxError};
use snap2p_crypto::noise::Role;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace};

struct ReadState {
    data: VecDeque<u8>,
    eof: bool,
    error: Option<ErrorKind>,
}

/// Shared state for one stream, reachable from both the [`Stream`] handle
/// the consumer holds and the [`Multiplexer`] that routes inbound frames
/// into it.
struct StreamShared {
    stream_id: u64,
    high_water_mark: usize,
    read: Mutex<ReadState>,
    data_ready: Notify,
    space_available: Notify,
    write_closed: AtomicBool,
    local_closed: AtomicBool,
}

impl StreamShared {
    fn new(stream_id: u64, high_water_mark: usize) -> Self {
        Self {
            stream_id,
            high_water_mark,
            read: Mutex::new(ReadState {
                data: VecDeque::new(),
                eof: false,
                error: None,
            }),
            data_ready: Notify::new(),
            space_available: Notify::new(),
            write_closed: AtomicBool::new(false),
            local_closed: AtomicBool::new(false),
        }
    }

    fn push_data(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        let mut rb = self.read.lock().expect("stream read-buffer mutex poisoned");
        rb.data.extend(chunk);
        self.data_ready.notify_waiters();
    }

    fn mark_eof(&self) {
        let mut rb = self.read.lock().expect("stream read-buffer mutex poisoned");
        rb.eof = true;
        self.data_ready.notify_waiters();
    }

    fn mark_error(&self, kind: ErrorKind) {
        let mut rb = self.read.lock().expect("stream read-buffer mutex poisoned");
        rb.error.get_or_insert(kind);
        rb.eof = true;
        self.data_ready.notify_waiters();
    }

    fn buffered_len(&self) -> usize {
        self.read.lock().expect("stream read-buffer mutex poisoned").data.len()
    }
}

/// One bidirectional byte channel inside a [`crate::session::Session`]
/// (spec §3 "Stream").
pub struct Stream {
    shared: std::sync::Arc<StreamShared>,
    label: Option<String>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl Stream {
    /// This stream's id; its parity names the role that opened it (spec
    /// §3: initiator even, responder odd).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.stream_id
    }

    /// The opaque debug label, if any (spec §4.7 "MUST NOT influence
    /// security or routing").
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Write one chunk as a `STREAM_DATA` frame with `fin=false` (spec
    /// §4.7 "Stream duplex contract").
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::StreamClosed`] if the write side already closed,
    /// or [`MuxError::SessionClosed`] if the owning session is gone.
    pub fn write(&self, data: &[u8]) -> Result<(), MuxError> {
        if self.shared.write_closed.load(Ordering::SeqCst) {
            return Err(MuxError::StreamClosed);
        }
        self.outbound
            .send(Message::StreamData(StreamData {
                stream_id: self.shared.stream_id,
                data: data.to_vec(),
                fin: false,
            }))
            .map_err(|_| MuxError::SessionClosed)
    }

    /// Close the write side: sends `STREAM_DATA(empty, fin=true)` exactly
    /// once. Idempotent; a repeat call is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::SessionClosed`] if the owning session is gone.
    pub fn end(&self) -> Result<(), MuxError> {
        if self.shared.write_closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.outbound
            .send(Message::StreamData(StreamData {
                stream_id: self.shared.stream_id,
                data: Vec::new(),
                fin: true,
            }))
            .map_err(|_| MuxError::SessionClosed)
    }

    /// Read up to `buf.len()` bytes of the concatenated `DATA` payloads
    /// received so far, in arrival order (spec §4.7 "Read"). Returns
    /// `Ok(0)` once the remote's `fin` has been delivered and the buffer
    /// has drained.
    ///
    /// # Errors
    ///
    /// Returns the stream's terminal error, if the remote or the owning
    /// session tore it down abnormally (spec §4.7 "Destroy").
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, MuxError> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            // Register interest before (re)checking the condition: if
            // `push_data`/`mark_eof` calls `notify_waiters()` anywhere after
            // this point, the `notified` future below observes it even
            // though we haven't awaited it yet — creating it after the
            // check would let that wakeup arrive in the gap and be lost.
            let notified = self.shared.data_ready.notified();
            {
                let mut rb = self.shared.read.lock().expect("stream read-buffer mutex poisoned");
                if !rb.data.is_empty() {
                    let n = buf.len().min(rb.data.len());
                    for slot in buf.iter_mut().take(n) {
                        *slot = rb.data.pop_front().expect("checked non-empty above");
                    }
                    drop(rb);
                    self.shared.space_available.notify_waiters();
                    return Ok(n);
                }
                if let Some(kind) = rb.error {
                    return Err(kind_to_mux_error(kind));
                }
                if rb.eof {
                    return Ok(0);
                }
            }
            notified.await;
        }
    }

    /// Read the entire remaining stream into a `Vec`, stopping at EOF.
    ///
    /// # Errors
    ///
    /// See [`Stream::read`].
    pub async fn read_to_end(&self) -> Result<Vec<u8>, MuxError> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 16 * 1024];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }
}

fn kind_to_mux_error(kind: ErrorKind) -> MuxError {
    match kind {
        ErrorKind::StreamNotFound => MuxError::StreamNotFound,
        ErrorKind::ResourceExhausted => MuxError::ResourceExhausted,
        ErrorKind::ConnectionClosed => MuxError::SessionClosed,
        _ => MuxError::StreamClosed,
    }
}

struct MuxState {
    streams: HashMap<u64, std::sync::Arc<StreamShared>>,
    next_local_id: u64,
}

/// The stream multiplexer for one session (spec §4.7). Allocates
/// locally-opened stream ids with the owning role's parity and routes
/// inbound `OPEN_STREAM`/`STREAM_DATA`/`CLOSE_STREAM` frames.
pub struct Multiplexer {
    role: Role,
    max_streams: usize,
    high_water_mark: usize,
    outbound: mpsc::UnboundedSender<Message>,
    state: Mutex<MuxState>,
}

/// A freshly accepted inbound stream, delivered to the session consumer
/// (spec §6 "on('stream')").
pub type InboundStream = Stream;

impl Multiplexer {
    /// Construct a multiplexer for a session in role `role`, sending its
    /// control frames over `outbound` (the session's outbound channel).
    #[must_use]
    pub fn new(
        role: Role,
        max_streams: usize,
        high_water_mark: usize,
        outbound: mpsc::UnboundedSender<Message>,
    ) -> Self {
        let next_local_id = match role {
            Role::Initiator => 0,
            Role::Responder => 1,
        };
        Self {
            role,
            max_streams,
            high_water_mark,
            outbound,
            state: Mutex::new(MuxState {
                streams: HashMap::new(),
                next_local_id,
            }),
        }
    }

    fn reply_close(&self, stream_id: u64, kind: ErrorKind) {
        let _ = self.outbound.send(Message::CloseStream(CloseStream {
            stream_id,
            error_code: Some(kind.as_wire_str().to_string()),
        }));
    }

    /// Open a new stream from this side: allocates the next id with this
    /// role's parity, registers it, and sends `OPEN_STREAM`.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::ResourceExhausted`] once the tracked-stream cap
    /// is reached (spec §4.7 "Capacity").
    pub fn open_stream(&self, label: Option<String>) -> Result<Stream, MuxError> {
        let mut state = self.state.lock().expect("multiplexer state mutex poisoned");
        if state.streams.len() >= self.max_streams {
            return Err(MuxError::ResourceExhausted);
        }
        let stream_id = state.next_local_id;
        state.next_local_id += 2;

        let shared = std::sync::Arc::new(StreamShared::new(stream_id, self.high_water_mark));
        state.streams.insert(stream_id, shared.clone());
        drop(state);

        self.outbound
            .send(Message::OpenStream(OpenStream { stream_id, label: label.clone() }))
            .map_err(|_| MuxError::SessionClosed)?;

        Ok(Stream { shared, label, outbound: self.outbound.clone() })
    }

    /// Handle an inbound `OPEN_STREAM` (spec §4.7 "Inbound events").
    /// Returns the new stream to hand to the consumer, or `None` if the
    /// open was refused (a `CLOSE_STREAM` reply was already sent).
    pub fn handle_open(&self, msg: OpenStream) -> Option<Stream> {
        let mut state = self.state.lock().expect("multiplexer state mutex poisoned");
        if state.streams.contains_key(&msg.stream_id) {
            drop(state);
            debug!(stream_id = msg.stream_id, "rejecting OPEN_STREAM: id already in use");
            self.reply_close(msg.stream_id, ErrorKind::StreamIdInUse);
            return None;
        }
        if state.streams.len() >= self.max_streams {
            drop(state);
            debug!(stream_id = msg.stream_id, "rejecting OPEN_STREAM: capacity exhausted");
            self.reply_close(msg.stream_id, ErrorKind::ResourceExhausted);
            return None;
        }
        let shared = std::sync::Arc::new(StreamShared::new(msg.stream_id, self.high_water_mark));
        state.streams.insert(msg.stream_id, shared.clone());
        drop(state);

        Some(Stream { shared, label: msg.label, outbound: self.outbound.clone() })
    }

    /// Handle an inbound `STREAM_DATA` (spec §4.7 "Inbound events").
    /// Applies backpressure: if the target stream's read buffer is already
    /// at its high-water mark, awaits space before accepting more — this
    /// stalls the whole session's read loop rather than losing bytes
    /// (spec §4.7 "the protocol MUST NOT lose bytes").
    pub async fn handle_data(&self, msg: StreamData) {
        let shared = {
            let state = self.state.lock().expect("multiplexer state mutex poisoned");
            state.streams.get(&msg.stream_id).cloned()
        };
        let Some(shared) = shared else {
            trace!(stream_id = msg.stream_id, "STREAM_DATA for unknown stream");
            self.reply_close(msg.stream_id, ErrorKind::StreamNotFound);
            return;
        };

        while !msg.data.is_empty() {
            // Same register-before-recheck ordering as `Stream::read`: the
            // `notified` future must exist before we decide the buffer is
            // still full, or a `read()` that drains it and calls
            // `notify_waiters()` in between would wake nothing and stall
            // the whole session's read loop forever.
            let notified = shared.space_available.notified();
            if shared.buffered_len() < shared.high_water_mark {
                break;
            }
            notified.await;
        }
        shared.push_data(&msg.data);
        if msg.fin {
            shared.mark_eof();
        }
    }

    /// Handle an inbound `CLOSE_STREAM` (spec §4.7 "Inbound events"): marks
    /// the stream fully closed locally and releases the id.
    pub fn handle_close(&self, msg: CloseStream) {
        let removed = {
            let mut state = self.state.lock().expect("multiplexer state mutex poisoned");
            state.streams.remove(&msg.stream_id)
        };
        if let Some(shared) = removed {
            shared.write_closed.store(true, Ordering::SeqCst);
            shared.local_closed.store(true, Ordering::SeqCst);
            let kind = msg
                .error_code
                .as_deref()
                .map(ErrorKind::from_wire_str)
                .unwrap_or(ErrorKind::ConnectionClosed);
            if msg.error_code.is_some() {
                shared.mark_error(kind);
            } else {
                shared.mark_eof();
            }
        }
    }

    /// Number of streams currently tracked.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.state.lock().expect("multiplexer state mutex poisoned").streams.len()
    }

    /// Force every tracked stream closed, as if each received an abrupt
    /// `CLOSE_STREAM(ERR_INTERNAL)` (spec §4.7 "Destroy", driven by the
    /// owning [`crate::session::Session`] tearing down).
    pub fn close_all(&self) {
        let streams: Vec<_> = {
            let mut state = self.state.lock().expect("multiplexer state mutex poisoned");
            state.streams.drain().map(|(_, shared)| shared).collect()
        };
        for shared in streams {
            shared.write_closed.store(true, Ordering::SeqCst);
            shared.local_closed.store(true, Ordering::SeqCst);
            shared.mark_error(ErrorKind::ConnectionClosed);
        }
    }

    /// This multiplexer's role, determining locally-opened id parity.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }
}
