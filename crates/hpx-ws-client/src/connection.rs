//! An established WebSocket session.
//!
//! A [`Connection`] owns the upgraded socket split into a read half, driven by
//! one reader task, and a write half shared by every caller of
//! [`send`](Connection::send). Handles are cheap to clone; dropping the last
//! one stops the reader.

use std::{
    fmt, io,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf},
    runtime::Handle,
    sync::{Mutex as AsyncMutex, OnceCell},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::{
    dispatch::Dispatcher,
    error::{ConnectionError, ConnectionResult},
    formatter::{FrameFormatter, MessageFormatter},
    message::Message,
    parser::{MessageParser, ParserConfig, ParserFactory},
    transport::{BoxedSocket, UpgradedSocket},
};

/// Read buffer growth per socket read.
const READ_CHUNK: usize = 8 * 1024;

/// Upper bound on waiting for the output lock and the socket shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Process-unique identifier of a connection, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws-{}", self.0)
    }
}

type Output = BufWriter<WriteHalf<BoxedSocket>>;

/// The write half. The buffered output is created on first use and taken
/// (and shut down) exactly once.
///
/// Writes race the connection's cancellation token, so a write stalled on a
/// peer that stopped reading never holds the output past `close`.
struct Writer {
    raw: Mutex<Option<WriteHalf<BoxedSocket>>>,
    output: OnceCell<AsyncMutex<Option<Output>>>,
    shutdown: CancellationToken,
}

impl Writer {
    fn new(raw: WriteHalf<BoxedSocket>, shutdown: CancellationToken) -> Self {
        Self {
            raw: Mutex::new(Some(raw)),
            output: OnceCell::new(),
            shutdown,
        }
    }

    async fn output(&self) -> &AsyncMutex<Option<Output>> {
        self.output
            .get_or_init(|| async { AsyncMutex::new(self.raw.lock().take().map(BufWriter::new)) })
            .await
    }

    async fn write(&self, bytes: &[u8]) -> ConnectionResult<()> {
        let lock = self.output().await;
        let mut output = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return Err(ConnectionError::Closed),
            guard = lock.lock() => guard,
        };
        let writer = output.as_mut().ok_or(ConnectionError::Closed)?;

        let written = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => None,
            result = async {
                writer.write_all(bytes).await?;
                writer.flush().await
            } => Some(result),
        };
        match written {
            Some(result) => Ok(result?),
            None => {
                // The buffer may hold part of a frame; it is dropped unsent.
                close_output(&mut output).await;
                Err(ConnectionError::Closed)
            }
        }
    }

    async fn shutdown(&self) {
        let lock = self.output().await;
        match timeout(CLOSE_TIMEOUT, lock.lock()).await {
            Ok(mut output) => close_output(&mut output).await,
            Err(_) => debug!("write still in progress, leaving the socket to the writer"),
        }
    }
}

async fn close_output(output: &mut Option<Output>) {
    let Some(writer) = output.take() else {
        return;
    };
    let mut raw = writer.into_inner();
    match timeout(CLOSE_TIMEOUT, raw.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => debug!(error = %error, "failed to close socket"),
        Err(_) => debug!("timed out closing socket"),
    }
}

struct Inner {
    id: ConnectionId,
    parser_factory: Arc<dyn ParserFactory>,
    formatter: Arc<dyn MessageFormatter>,
    dispatcher: Arc<dyn Dispatcher>,
    reader: Mutex<Option<(ReadHalf<BoxedSocket>, Bytes)>>,
    writer: Arc<Writer>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Handle to a WebSocket session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Binds `socket` to the RFC 6455 parser described by `config` and a
    /// masking client formatter.
    pub fn new(socket: UpgradedSocket, config: ParserConfig, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self::with_strategies(
            socket,
            Arc::new(config),
            Arc::new(FrameFormatter::client()),
            dispatcher,
        )
    }

    pub fn with_strategies(
        socket: UpgradedSocket,
        parser_factory: Arc<dyn ParserFactory>,
        formatter: Arc<dyn MessageFormatter>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let (io, leftover) = socket.into_parts();
        let (read, write) = tokio::io::split(io);
        let shutdown = CancellationToken::new();
        Self {
            inner: Arc::new(Inner {
                id: ConnectionId::next(),
                parser_factory,
                formatter,
                dispatcher,
                reader: Mutex::new(Some((read, leftover))),
                writer: Arc::new(Writer::new(write, shutdown.clone())),
                worker: Mutex::new(None),
                shutdown,
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn parser_factory(&self) -> &Arc<dyn ParserFactory> {
        &self.inner.parser_factory
    }

    /// Spawns the reader task. A connection is started at most once.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::AlreadyStarted`] on a second call,
    /// [`ConnectionError::Closed`] after [`close`](Self::close), and
    /// [`ConnectionError::NoRuntime`] outside a Tokio runtime.
    pub fn start(&self) -> ConnectionResult<()> {
        let mut worker = self.inner.worker.lock();
        if self.inner.shutdown.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        let runtime = Handle::try_current()?;
        let (io, leftover) = self
            .inner
            .reader
            .lock()
            .take()
            .ok_or(ConnectionError::AlreadyStarted)?;

        let reader = Reader {
            id: self.inner.id,
            io,
            buf: BytesMut::from(leftover.as_ref()),
            parser_factory: Arc::clone(&self.inner.parser_factory),
            dispatcher: Arc::clone(&self.inner.dispatcher),
            connection: Arc::downgrade(&self.inner),
            shutdown: self.inner.shutdown.clone(),
        };
        *worker = Some(runtime.spawn(reader.run(Arc::clone(&self.inner.writer))));
        debug!(connection = %self.inner.id, "reader started");
        Ok(())
    }

    /// Whether no reader task is running: never started, finished, or closed.
    pub fn is_closed(&self) -> bool {
        self.inner
            .worker
            .lock()
            .as_ref()
            .is_none_or(JoinHandle::is_finished)
    }

    /// Formats `message` and writes it as one unit, then flushes.
    ///
    /// Concurrent sends never interleave on the wire.
    pub async fn send(&self, message: &Message) -> ConnectionResult<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        let mut buf = BytesMut::new();
        self.inner.formatter.format(message, &mut buf)?;
        trace!(connection = %self.inner.id, opcode = ?message.opcode(), len = buf.len(), "sending message");
        self.inner.writer.write(&buf).await
    }

    /// Stops the reader and closes the socket. Idempotent; close failures are
    /// logged and swallowed.
    ///
    /// A write in progress is abandoned and fails with
    /// [`ConnectionError::Closed`]; the peer may see a truncated frame.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        self.inner.worker.lock().take();
        self.inner.reader.lock().take();
        self.inner.writer.shutdown().await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("parser_factory", &self.inner.parser_factory)
            .field("formatter", &self.inner.formatter)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// State owned by the reader task.
struct Reader {
    id: ConnectionId,
    io: ReadHalf<BoxedSocket>,
    buf: BytesMut,
    parser_factory: Arc<dyn ParserFactory>,
    dispatcher: Arc<dyn Dispatcher>,
    connection: Weak<Inner>,
    shutdown: CancellationToken,
}

impl Reader {
    async fn run(mut self, writer: Arc<Writer>) {
        match self.read_messages().await {
            Ok(()) => debug!(connection = %self.id, "reader stopped"),
            Err(err) if err.is_io() => {
                warn!(connection = %self.id, error = %err, "connection lost");
            }
            Err(err) => {
                error!(connection = %self.id, error = %err, "closing connection after protocol error");
            }
        }
        self.shutdown.cancel();
        writer.shutdown().await;
    }

    async fn read_messages(&mut self) -> ConnectionResult<()> {
        let mut parser: Option<Box<dyn MessageParser>> = None;
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            let current = parser.get_or_insert_with(|| self.parser_factory.new_parser());
            current.push(&mut self.buf)?;

            if current.is_done() {
                let closing = current.is_closing();
                let message = current.take_message();
                parser = None;

                if let Some(message) = message {
                    let Some(inner) = self.connection.upgrade() else {
                        return Ok(());
                    };
                    let source = Connection { inner };
                    trace!(connection = %self.id, opcode = ?message.opcode(), len = message.payload().len(), "dispatching message");
                    self.dispatcher.fire(message, &source).await;
                }
                if closing {
                    debug!(connection = %self.id, "peer closed the session");
                    return Ok(());
                }
                continue;
            }

            self.buf.reserve(READ_CHUNK);
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Ok(()),
                read = self.io.read_buf(&mut self.buf) => {
                    if read? == 0 {
                        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "socket closed by peer").into());
                    }
                }
            }
        }
    }
}
