//! ACP session transport.
//!
//! One reader task drains the socket into a contiguous receive buffer; a
//! FIFO queue serialises request/response exchanges, each of which borrows a
//! short-lived exclusive [`SessionHandle`]. While the queue is idle and no
//! read is in progress, the buffer head is inspected for unsolicited `"XE"`
//! monitor frames, which are decoded and published to subscribers.
//!
//! Once session encryption is installed, inbound bytes pass through the
//! server-direction cipher before entering the buffer and outbound bytes
//! through the client-direction cipher before the socket write.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch, Mutex, Notify, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::{debug, warn};

use acp_codec::adler::adler32;
use acp_codec::cflbinary::{self, Value};
use acp_codec::message::{Message, HEADER_SIZE};
use acp_codec::property::{ElementHeader, ELEMENT_HEADER_SIZE};
use acp_core::error::{EncryptionStateError, FramingError, Result, TransportError};
use acp_crypto::stream::{EncryptionContext, SessionCipher};

/// Default deadline for `receive`.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(10);

const MONITOR_PREFIX: [u8; 2] = *b"XE";
const MONITOR_HEADER_SIZE: usize = 8;
const MONITOR_CHANNEL_CAPACITY: usize = 32;
const READ_CHUNK: usize = 4096;

struct RecvState {
    buffer: BytesMut,
    connected: bool,
}

struct SessionShared {
    state: StdMutex<RecvState>,
    bytes_ready: Notify,
    /// Depth of in-progress exact reads; monitor dispatch pauses while > 0.
    reading: AtomicUsize,
    /// Whether a queued exchange currently owns the buffer.
    busy: AtomicBool,
    recv_cipher: StdMutex<Option<SessionCipher>>,
    monitor_tx: broadcast::Sender<Value>,
    closed: watch::Sender<bool>,
}

/// A connection to one base station.
pub struct Session {
    shared: Arc<SessionShared>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    send_cipher: Arc<StdMutex<Option<SessionCipher>>>,
    queue: Arc<Mutex<()>>,
    peer: String,
}

impl Session {
    /// Connect to `host:port`.
    pub async fn connect(host: &str, port: u16) -> Result<Session> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(TransportError::Io)?;
        debug!(peer = %format!("{host}:{port}"), "connected");
        Ok(Self::from_stream(stream, format!("{host}:{port}")))
    }

    /// Build a session over an established stream.
    pub fn from_stream(stream: TcpStream, peer: String) -> Session {
        let (read_half, write_half) = stream.into_split();
        let (monitor_tx, _) = broadcast::channel(MONITOR_CHANNEL_CAPACITY);
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(SessionShared {
            state: StdMutex::new(RecvState {
                buffer: BytesMut::with_capacity(READ_CHUNK),
                connected: true,
            }),
            bytes_ready: Notify::new(),
            reading: AtomicUsize::new(0),
            busy: AtomicBool::new(false),
            recv_cipher: StdMutex::new(None),
            monitor_tx,
            closed,
        });
        tokio::spawn(reader_loop(shared.clone(), read_half));
        Session {
            shared,
            writer: Arc::new(Mutex::new(write_half)),
            send_cipher: Arc::new(StdMutex::new(None)),
            queue: Arc::new(Mutex::new(())),
            peer,
        }
    }

    /// Remote peer, for diagnostics.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().unwrap().connected
    }

    pub fn is_encrypted(&self) -> bool {
        self.send_cipher.lock().unwrap().is_some()
    }

    /// Subscribe to unsolicited monitor events.
    pub fn monitor_events(&self) -> broadcast::Receiver<Value> {
        self.shared.monitor_tx.subscribe()
    }

    /// Install the session encryption context. Fails if encryption is
    /// already enabled.
    pub fn enable_encryption(&self, context: EncryptionContext) -> Result<()> {
        install_encryption(&self.shared, &self.send_cipher, context)
    }

    /// Run one request/response exchange with exclusive use of the
    /// transport. Exchanges queue in FIFO order; enqueueing after disconnect
    /// rejects immediately, and pending waiters fail when the connection is
    /// lost.
    pub async fn exchange<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(SessionHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        let mut closed = self.shared.closed.subscribe();
        let queue_guard = tokio::select! {
            guard = self.queue.clone().lock_owned() => guard,
            _ = closed.wait_for(|&c| c) => return Err(TransportError::ConnectionLost.into()),
        };
        if !self.is_connected() {
            return Err(TransportError::ConnectionLost.into());
        }

        let _busy = BusyGuard::engage(&self.shared);
        let writer = self.writer.clone().lock_owned().await;
        let handle = SessionHandle {
            shared: self.shared.clone(),
            writer,
            send_cipher: self.send_cipher.clone(),
            _queue: queue_guard,
        };
        operation(handle).await
    }

    /// Close the session, failing all pending queued work.
    pub async fn close(&self) {
        let _ = self.shared.closed.send_replace(true);
        {
            let mut state = self.shared.state.lock().unwrap();
            state.connected = false;
            state.buffer.clear();
        }
        self.shared.bytes_ready.notify_waiters();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        debug!(peer = %self.peer, "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.shared.closed.send_replace(true);
    }
}

/// Clears the busy flag and re-arms monitor dispatch, even if the exchange
/// future is dropped mid-flight.
struct BusyGuard {
    shared: Arc<SessionShared>,
}

impl BusyGuard {
    fn engage(shared: &Arc<SessionShared>) -> BusyGuard {
        shared.busy.store(true, Ordering::Release);
        BusyGuard {
            shared: shared.clone(),
        }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.shared.busy.store(false, Ordering::Release);
        dispatch_unsolicited(&self.shared);
    }
}

struct ReadingGuard<'a>(&'a AtomicUsize);

impl ReadingGuard<'_> {
    fn engage(counter: &AtomicUsize) -> ReadingGuard<'_> {
        counter.fetch_add(1, Ordering::AcqRel);
        ReadingGuard(counter)
    }
}

impl Drop for ReadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Exclusive use of the session for one request/response exchange. The
/// handle is invalidated when the exchange closure returns.
pub struct SessionHandle {
    shared: Arc<SessionShared>,
    writer: OwnedMutexGuard<OwnedWriteHalf>,
    send_cipher: Arc<StdMutex<Option<SessionCipher>>>,
    _queue: OwnedMutexGuard<()>,
}

impl SessionHandle {
    /// Send raw bytes, passing them through the outbound cipher when
    /// encryption is enabled.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut wire = data.to_vec();
        if let Some(cipher) = self.send_cipher.lock().unwrap().as_mut() {
            cipher.apply(&mut wire);
        }
        self.writer.write_all(&wire).await.map_err(TransportError::Io)?;
        self.writer.flush().await.map_err(TransportError::Io)?;
        debug!(len = wire.len(), "acp ->");
        Ok(())
    }

    /// Receive exactly `size` bytes or time out (10 s default).
    pub async fn receive(&mut self, size: usize) -> Result<Vec<u8>> {
        self.receive_with_timeout(size, DEFAULT_RECEIVE_TIMEOUT).await
    }

    /// Receive exactly `size` bytes within `limit`.
    pub async fn receive_with_timeout(&mut self, size: usize, limit: Duration) -> Result<Vec<u8>> {
        let _reading = ReadingGuard::engage(&self.shared.reading);
        match timeout(limit, self.receive_inner(size)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout.into()),
        }
    }

    async fn receive_inner(&self, size: usize) -> Result<Vec<u8>> {
        loop {
            let notified = self.shared.bytes_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.shared.state.lock().unwrap();
                if state.buffer.len() >= size {
                    return Ok(state.buffer.split_to(size).to_vec());
                }
                if !state.connected {
                    return Err(TransportError::ConnectionLost.into());
                }
            }
            notified.await;
        }
    }

    /// Receive and parse a 128-byte message header.
    pub async fn receive_message_header(&mut self) -> Result<Message> {
        let bytes = self.receive(HEADER_SIZE).await?;
        let message = Message::parse(&bytes)?;
        debug!(command = ?message.command, error_code = message.error_code, "acp <-");
        Ok(message)
    }

    /// Receive a complete message: header plus any declared body. Stream
    /// headers (body size -1) are returned without a body.
    pub async fn receive_message(&mut self) -> Result<Message> {
        let mut message = self.receive_message_header().await?;
        if message.body_size > 0 {
            let body = self.receive(message.body_size as usize).await?;
            let computed = adler32(&body);
            if computed != message.body_checksum {
                return Err(FramingError::BodyChecksum {
                    expected: message.body_checksum,
                    computed,
                }
                .into());
            }
            message.body = Some(body);
        }
        Ok(message)
    }

    /// Receive and parse a 12-byte property element header.
    pub async fn receive_property_element_header(&mut self) -> Result<ElementHeader> {
        let bytes = self.receive(ELEMENT_HEADER_SIZE).await?;
        ElementHeader::parse(&bytes)
    }

    /// Install the session encryption context before the next outbound byte.
    pub fn enable_encryption(&self, context: EncryptionContext) -> Result<()> {
        install_encryption(&self.shared, &self.send_cipher, context)
    }
}

fn install_encryption(
    shared: &SessionShared,
    send_cipher: &StdMutex<Option<SessionCipher>>,
    context: EncryptionContext,
) -> Result<()> {
    let mut send = send_cipher.lock().unwrap();
    let mut recv = shared.recv_cipher.lock().unwrap();
    if send.is_some() || recv.is_some() {
        return Err(EncryptionStateError::AlreadyEnabled.into());
    }
    let (to_device, from_device) = context.split();
    *send = Some(to_device);
    *recv = Some(from_device);
    debug!("session encryption enabled");
    Ok(())
}

async fn reader_loop(shared: Arc<SessionShared>, mut read_half: OwnedReadHalf) {
    let mut closed = shared.closed.subscribe();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = tokio::select! {
            result = read_half.read(&mut chunk) => match result {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => {
                    debug!("socket read failed: {err}");
                    break;
                }
            },
            _ = closed.wait_for(|&c| c) => break,
        };
        let mut data = chunk[..n].to_vec();
        if let Some(cipher) = shared.recv_cipher.lock().unwrap().as_mut() {
            cipher.apply(&mut data);
        }
        {
            let mut state = shared.state.lock().unwrap();
            state.buffer.extend_from_slice(&data);
        }
        shared.bytes_ready.notify_waiters();
        dispatch_unsolicited(&shared);
    }

    let _ = shared.closed.send_replace(true);
    {
        let mut state = shared.state.lock().unwrap();
        state.connected = false;
        state.buffer.clear();
    }
    shared.bytes_ready.notify_waiters();
    debug!("reader task finished");
}

/// Inspect the buffer head for monitor frames while no exchange owns the
/// bytes. Unmatched prefixes are logged and drained.
fn dispatch_unsolicited(shared: &SessionShared) {
    if shared.busy.load(Ordering::Acquire) || shared.reading.load(Ordering::Acquire) > 0 {
        return;
    }
    let mut state = shared.state.lock().unwrap();
    loop {
        if state.buffer.len() < MONITOR_PREFIX.len() {
            return;
        }
        if state.buffer[..2] != MONITOR_PREFIX {
            warn!(
                len = state.buffer.len(),
                "unrecognised bytes on idle channel; draining buffer"
            );
            state.buffer.clear();
            return;
        }
        if state.buffer.len() < MONITOR_HEADER_SIZE {
            // Wait for the rest of the frame header.
            return;
        }
        let body_len = u32::from_be_bytes([
            state.buffer[4],
            state.buffer[5],
            state.buffer[6],
            state.buffer[7],
        ]) as usize;
        if state.buffer.len() < MONITOR_HEADER_SIZE + body_len {
            return;
        }
        state.buffer.advance(MONITOR_HEADER_SIZE);
        let body = state.buffer.split_to(body_len);
        match cflbinary::parse(&body) {
            Ok(event) => {
                debug!("monitor event received");
                let _ = shared.monitor_tx.send(event);
            }
            Err(err) => warn!("undecodable monitor frame: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_prefix_matches_wire_constant() {
        assert_eq!(&MONITOR_PREFIX, b"XE");
        assert_eq!(MONITOR_HEADER_SIZE, 8);
    }

    #[test]
    fn default_timeout_is_ten_seconds() {
        assert_eq!(DEFAULT_RECEIVE_TIMEOUT, Duration::from_secs(10));
    }
}
