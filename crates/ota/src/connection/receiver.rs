use std::fmt;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error, info, trace, warn};

use crate::codec::{HeaderDecoder, PayloadDecoder, ResponseEncoder};
use crate::ensure;
use crate::protocol::{ContentLength, Method, ParseError, PayloadItem, RequestHead, Response, SessionError, SessionOutcome};
use crate::storage::{OtaStorage, Slot};

/// Default capacity of the receive buffer
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Smallest receive buffer the receiver accepts
pub const MIN_BUFFER_SIZE: usize = 16;

/// Settings of a [`Receiver`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// Capacity of the receive buffer. The request head must fit in one byte less.
    pub buffer_size: usize,
    /// Answer `GET` requests with the running firmware version
    pub version_query: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self { buffer_size: DEFAULT_BUFFER_SIZE, version_query: true }
    }
}

/// Where a [`Receiver`] is in its session.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the request head
    Idle,
    /// The request head was read and classified
    HeaderParsed,
    /// A storage write session is open
    Writing,
    /// The image was finalized and marked as the next boot slot
    Committed,
    /// The peer cancelled the update
    Aborted,
    /// A version query was answered
    Answered,
    /// The session ended with an error
    Failed,
}

type ConnectHook = Box<dyn FnOnce() + Send>;

/// Runs one push update session over a byte stream.
///
/// The receiver reads the request head into a fixed size buffer, classifies
/// it and, for a `POST`, streams exactly `Content-Length` payload bytes into
/// the update slot of its [`OtaStorage`]. It always finishes by writing one
/// status response, unless the stream failed before the request head was
/// complete.
///
/// ```no_run
/// use micro_ota::connection::Receiver;
/// use micro_ota::storage::MemoryStorage;
/// use tokio::net::TcpStream;
///
/// # async fn run(stream: TcpStream) {
/// let (reader, writer) = stream.into_split();
/// let mut receiver = Receiver::new(MemoryStorage::new("1.0.0", 2, 1024 * 1024));
/// match receiver.receive(reader, writer).await {
///     Ok(outcome) if outcome.is_restart_safe() => println!("ready to restart"),
///     Ok(_) => println!("done"),
///     Err(e) => println!("update failed: {e}"),
/// }
/// # }
/// ```
pub struct Receiver<S> {
    storage: S,
    config: ReceiverConfig,
    on_connect: Option<ConnectHook>,
    phase: Phase,
}

impl<S> Receiver<S>
where
    S: OtaStorage,
{
    pub fn new(storage: S) -> Self {
        Self { storage, config: ReceiverConfig::default(), on_connect: None, phase: Phase::Idle }
    }

    pub fn with_config(mut self, config: ReceiverConfig) -> Self {
        self.config = ReceiverConfig { buffer_size: config.buffer_size.max(MIN_BUFFER_SIZE), ..config };
        self
    }

    /// Registers a callback run once, right before the first read.
    ///
    /// This lets the embedding system stop tasks and reclaim memory before the
    /// transfer starts.
    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_connect = Some(Box::new(f));
        self
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Runs one session and writes its status response to `writer`.
    ///
    /// The returned outcome tells whether the device may be restarted. Closing
    /// the stream is left to the caller.
    pub async fn receive<R, W>(&mut self, mut reader: R, mut writer: W) -> Result<SessionOutcome, SessionError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if let Some(on_connect) = self.on_connect.take() {
            debug!("running on_connect callback");
            on_connect();
        }

        self.phase = Phase::Idle;
        let mut buffer = BytesMut::with_capacity(self.config.buffer_size);
        let result = self.do_receive(&mut reader, &mut buffer).await;

        let response = match &result {
            Ok(outcome) => Some(outcome.response()),
            Err(e) => {
                self.phase = Phase::Failed;
                error!(cause = %e, "ota receive failed");
                e.response()
            }
        };

        if let Some(response) = response {
            let status = response.status();
            match send_response(&mut writer, response).await {
                Ok(()) => debug!(%status, "sent status response"),
                Err(e) => warn!(%status, cause = %e, "can't send status response"),
            }
        }

        result
    }

    async fn do_receive<R>(&mut self, reader: &mut R, buffer: &mut BytesMut) -> Result<SessionOutcome, SessionError>
    where
        R: AsyncRead + Unpin,
    {
        let head = self.read_head(reader, buffer).await?;
        self.phase = Phase::HeaderParsed;
        trace!(method = head.method().as_str(), leftover = buffer.len(), "request head parsed");

        match head.method() {
            Method::Get if self.config.version_query => {
                let version = self.storage.running_version();
                info!(%version, "reporting firmware version");
                self.phase = Phase::Answered;
                return Ok(SessionOutcome::VersionReported { version });
            }
            Method::Delete => {
                info!("aborting");
                self.phase = Phase::Aborted;
                return Ok(SessionOutcome::Cancelled);
            }
            Method::Post => {}
            method => return Err(ParseError::method_not_allowed(method.as_str()).into()),
        }

        let Some(slot) = self.storage.update_target() else {
            error!("no ota slot available");
            return Err(SessionError::NoUpdateTarget);
        };
        info!(slot = slot.label(), index = slot.index(), capacity = slot.capacity(), "target ota slot");

        let declared_len = match head.content_length() {
            ContentLength::Length(length) => length,
            ContentLength::Missing => return Err(ParseError::length_required("no Content-Length field").into()),
            ContentLength::Invalid => return Err(ParseError::length_required("Content-Length is not a positive integer").into()),
        };
        info!(declared_len, "image size");

        self.write_image(reader, buffer, slot, declared_len).await
    }

    /// Fills the buffer until the request head is complete.
    ///
    /// At most `buffer_size - 1` bytes are read in this phase, and no read ever
    /// goes past that limit.
    async fn read_head<R>(&mut self, reader: &mut R, buffer: &mut BytesMut) -> Result<RequestHead, SessionError>
    where
        R: AsyncRead + Unpin,
    {
        let mut decoder = HeaderDecoder::new(self.config.buffer_size - 1);

        loop {
            let room = decoder.max_size() - buffer.len();
            let mut limited = (&mut *buffer).limit(room);
            let read = reader.read_buf(&mut limited).await.map_err(SessionError::transport)?;
            ensure!(read != 0, SessionError::peer_closed());
            trace!(read, filled = buffer.len(), "received header bytes");

            if let Some(head) = decoder.decode(buffer)? {
                return Ok(head);
            }
        }
    }

    async fn write_image<R>(
        &mut self,
        reader: &mut R,
        buffer: &mut BytesMut,
        slot: Slot,
        declared_len: u64,
    ) -> Result<SessionOutcome, SessionError>
    where
        R: AsyncRead + Unpin,
    {
        let mut writer = self
            .storage
            .begin_write(&slot, declared_len)
            .await
            .map_err(|source| SessionError::StorageOpen { slot: slot.label().to_string(), source })?;
        self.phase = Phase::Writing;

        let mut decoder = PayloadDecoder::new(declared_len);
        if let Err(e) = self.stream_payload(reader, buffer, &mut decoder, &mut writer).await {
            debug_assert!(e.aborts_write());
            warn!(remaining = decoder.remaining(), "discarding partial image");
            self.storage.abort_write(writer).await;
            return Err(e);
        }

        self.storage.end_write(writer).await.map_err(|source| SessionError::StorageFinalize { source })?;
        info!("flash complete");

        self.storage
            .set_boot_target(&slot)
            .await
            .map_err(|source| SessionError::BootTarget { slot: slot.label().to_string(), source })?;
        info!(slot = slot.label(), "next boot slot set");

        self.phase = Phase::Committed;
        Ok(SessionOutcome::Updated { slot })
    }

    /// Forwards the leftover bytes of the header phase, then every payload read,
    /// to the storage writer until the declared length is reached.
    async fn stream_payload<R>(
        &mut self,
        reader: &mut R,
        buffer: &mut BytesMut,
        decoder: &mut PayloadDecoder,
        writer: &mut S::Writer,
    ) -> Result<(), SessionError>
    where
        R: AsyncRead + Unpin,
    {
        if !buffer.is_empty() {
            debug!(leftover = buffer.len(), "forwarding payload bytes received with the headers");
        }

        loop {
            match decoder.decode(buffer).map_err(|source| SessionError::Receive { source })? {
                Some(PayloadItem::Chunk(bytes)) => {
                    self.storage.write(writer, &bytes).await.map_err(|source| SessionError::StorageWrite { source })?;
                    continue;
                }
                Some(PayloadItem::Eof) => {
                    if !buffer.is_empty() {
                        debug!(surplus = buffer.len(), "ignoring bytes beyond the declared length");
                        buffer.clear();
                    }
                    return Ok(());
                }
                None => {}
            }

            let capacity = self.config.buffer_size;
            let want = usize::try_from(decoder.remaining()).map_or(capacity, |remaining| remaining.min(capacity));
            buffer.reserve(want);

            let mut limited = (&mut *buffer).limit(want);
            let read = reader.read_buf(&mut limited).await.map_err(|source| SessionError::Receive { source })?;
            ensure!(read != 0, SessionError::IncompleteTransfer { remaining: decoder.remaining() });
            trace!(read, remaining = decoder.remaining() - read as u64, "received payload bytes");
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for Receiver<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("storage", &self.storage)
            .field("config", &self.config)
            .field("on_connect", &self.on_connect.is_some())
            .field("phase", &self.phase)
            .finish()
    }
}

async fn send_response<W>(writer: &mut W, response: Response) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut dst = BytesMut::new();
    ResponseEncoder::new().encode(response, &mut dst)?;
    writer.write_all(&dst).await?;
    writer.flush().await
}
