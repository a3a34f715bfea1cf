use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, trace, warn};

use crate::message::{InboundMessage, PendingQueue};
use crate::protocol::{ClientMessage, Codec, ConnectOptions, ServerInfo, ServerMessage};
use crate::service::{ClientConfig, Shutdown};
use crate::{AppError, AppResult};

use super::command::Command;
use super::correlation::{CorrelationTable, Routed};
use super::frame::Framer;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a connection. `Closed` is terminal, there is no reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Handshaking,
    Ready,
    Closed,
}

enum Event {
    Shutdown,
    Readable(io::Result<usize>),
    Command(Option<Command>),
}

/// State owned by the connection task.
///
/// Nothing here is shared: network input and caller commands are both handled
/// inside `run`, one at a time, so the correlation table, the reassembly
/// buffer and the pending queue need no locks.
pub(crate) struct Connection<F, C> {
    connection_id: u64,
    reader: OwnedReadHalf,
    writer: BufWriter<OwnedWriteHalf>,
    /// bytes of frames that have not fully arrived yet
    buffer: BytesMut,
    /// target of the single outstanding socket read
    read_buf: BytesMut,
    read_buffer_size: usize,
    framer: F,
    codec: C,
    server_info: ServerInfo,
    pending: PendingQueue,
    subscriber: Option<mpsc::UnboundedSender<InboundMessage>>,
    correlations: CorrelationTable,
    /// frames that arrived together with INFO during the handshake
    backlog: VecDeque<Bytes>,
    status: watch::Sender<ConnectionStatus>,
}

impl<F: Framer, C: Codec> Connection<F, C> {
    /// Opens the socket and performs the INFO → CONNECT → PING handshake.
    ///
    /// Any failure here is returned as `ConnectError`; nothing is retried.
    pub(crate) async fn open(
        config: &ClientConfig,
        framer: F,
        codec: C,
        status: watch::Sender<ConnectionStatus>,
    ) -> AppResult<Self> {
        let address = config.address();
        status.send_replace(ConnectionStatus::Connecting);
        let socket = TcpStream::connect(&address)
            .await
            .map_err(|e| AppError::ConnectError(format!("tcp connect to {}: {}", address, e)))?;
        socket
            .set_nodelay(true)
            .map_err(|e| AppError::ConnectError(format!("set nodelay on {}: {}", address, e)))?;
        let (reader, writer) = socket.into_split();

        let read_buffer_size = config.network.read_buffer_size;
        let mut connection = Connection {
            connection_id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            reader,
            writer: BufWriter::new(writer),
            buffer: BytesMut::with_capacity(read_buffer_size),
            read_buf: BytesMut::with_capacity(read_buffer_size),
            read_buffer_size,
            framer,
            codec,
            server_info: ServerInfo::default(),
            pending: PendingQueue::new(config.delivery.drain_order),
            subscriber: None,
            correlations: CorrelationTable::new(),
            backlog: VecDeque::new(),
            status,
        };

        connection
            .status
            .send_replace(ConnectionStatus::Handshaking);
        connection
            .handshake(ConnectOptions::from_config(&config.general))
            .await?;
        connection.status.send_replace(ConnectionStatus::Ready);
        debug!(
            "connection {} to {} ready, server info: {:?}",
            connection.connection_id, address, connection.server_info
        );
        Ok(connection)
    }

    pub(crate) fn id(&self) -> u64 {
        self.connection_id
    }

    async fn handshake(&mut self, options: ConnectOptions) -> AppResult<()> {
        let frame = self.read_first_frame().await?;
        match self.codec.decode(&frame) {
            Ok(ServerMessage::Info(info)) => self.server_info = info,
            Ok(other) => {
                return Err(AppError::ConnectError(format!(
                    "expected INFO as first frame, got {}",
                    other.name()
                )))
            }
            Err(e) => {
                return Err(AppError::ConnectError(format!(
                    "undecodable first frame: {}",
                    e
                )))
            }
        }

        for message in [ClientMessage::Connect(options), ClientMessage::Ping] {
            self.send(&message).await.map_err(|e| {
                AppError::ConnectError(format!("sending {}: {}", message.name(), e))
            })?;
        }
        Ok(())
    }

    /// Blocks until one complete frame is available. Frames that arrive in
    /// the same reads stay in the backlog.
    async fn read_first_frame(&mut self) -> AppResult<Bytes> {
        loop {
            if let Some(frame) = self.backlog.pop_front() {
                return Ok(frame);
            }
            self.read_buf.reserve(self.read_buffer_size);
            let n = self
                .reader
                .read_buf(&mut self.read_buf)
                .await
                .map_err(|e| AppError::ConnectError(format!("reading INFO: {}", e)))?;
            if n == 0 {
                return Err(AppError::ConnectError(
                    "server closed the connection before sending INFO".to_string(),
                ));
            }
            let frames = self
                .extract_frames()
                .map_err(|e| AppError::ConnectError(format!("framing INFO: {}", e)))?;
            self.backlog.extend(frames);
        }
    }

    fn extract_frames(&mut self) -> AppResult<Vec<Bytes>> {
        let frames = self.framer.append(&mut self.buffer, &self.read_buf);
        self.read_buf.clear();
        frames
    }

    /// Runs until shutdown, until every client handle is dropped, or until
    /// the socket fails. The socket is closed on the way out.
    pub(crate) async fn run(mut self, mut mailbox: mpsc::Receiver<Command>, mut shutdown: Shutdown) {
        match self.serve(&mut mailbox, &mut shutdown).await {
            Ok(()) => debug!("connection {} finished", self.connection_id),
            Err(err) => error!("connection {} terminated: {}", self.connection_id, err),
        }
        self.close().await;
        mailbox.close();
    }

    async fn serve(
        &mut self,
        mailbox: &mut mpsc::Receiver<Command>,
        shutdown: &mut Shutdown,
    ) -> AppResult<()> {
        while let Some(frame) = self.backlog.pop_front() {
            self.dispatch(frame).await?;
        }

        loop {
            self.read_buf.reserve(self.read_buffer_size);
            // inbound frames go first so a PING is answered before commands
            // that were queued after it
            let event = tokio::select! {
                biased;
                _ = shutdown.recv() => Event::Shutdown,
                read = self.reader.read_buf(&mut self.read_buf) => Event::Readable(read),
                command = mailbox.recv() => Event::Command(command),
            };

            match event {
                Event::Shutdown => {
                    debug!("connection {} received shutdown signal", self.connection_id);
                    return Ok(());
                }
                Event::Readable(read) => self.on_readable(read).await?,
                Event::Command(Some(Command::Shutdown)) => {
                    debug!("connection {} shut down by client", self.connection_id);
                    return Ok(());
                }
                Event::Command(Some(command)) => self.handle_command(command).await?,
                Event::Command(None) => {
                    debug!("connection {} has no client handles left", self.connection_id);
                    return Ok(());
                }
            }
        }
    }

    async fn on_readable(&mut self, read: io::Result<usize>) -> AppResult<()> {
        let n = read.map_err(|e| AppError::ConnectionLost(format!("read error: {}", e)))?;
        if n == 0 {
            return Err(AppError::ConnectionLost(if self.buffer.is_empty() {
                "server closed the connection".to_string()
            } else {
                "server closed the connection in the middle of a frame".to_string()
            }));
        }
        let frames = self.extract_frames()?;
        trace!(
            "connection {} read {} bytes, {} frames, {} bytes carried over",
            self.connection_id,
            n,
            frames.len(),
            self.buffer.len()
        );
        for frame in frames {
            self.dispatch(frame).await?;
        }
        Ok(())
    }

    async fn dispatch(&mut self, frame: Bytes) -> AppResult<()> {
        let message = self.codec.decode(&frame)?;
        trace!("connection {} received {}", self.connection_id, message.name());
        match message {
            ServerMessage::Info(info) => self.server_info = info,
            ServerMessage::Ping => self.send(&ClientMessage::Pong).await?,
            ServerMessage::Pong | ServerMessage::Ok => {}
            ServerMessage::Err(reason) => {
                warn!("connection {} server error: {}", self.connection_id, reason)
            }
            ServerMessage::Msg(message) => self.route(message),
        }
        Ok(())
    }

    fn route(&mut self, message: InboundMessage) {
        let Routed::Uncorrelated(mut message) = self.correlations.deliver(message) else {
            return;
        };
        if let Some(subscriber) = self.subscriber.take() {
            match subscriber.send(message) {
                Ok(()) => {
                    self.subscriber = Some(subscriber);
                    return;
                }
                Err(mpsc::error::SendError(returned)) => {
                    debug!(
                        "connection {} live subscriber is gone, queueing instead",
                        self.connection_id
                    );
                    message = returned;
                }
            }
        }
        self.pending.push(message);
    }

    async fn handle_command(&mut self, command: Command) -> AppResult<()> {
        trace!("connection {} handling {}", self.connection_id, command.name());
        match command {
            Command::RegisterRequest { sid, reply } => {
                // replies that were queued before the sid became tracked move over
                let queued = self.pending.take_sid(&sid);
                self.correlations.register(sid);
                for message in queued {
                    self.correlations.deliver(message);
                }
                let _ = reply.send(());
            }
            Command::AwaitResponse { sid, reply } => {
                self.correlations.await_response(sid, reply);
            }
            Command::Transmit { message, reply } => match self.send(&message).await {
                Err(err) if err.is_fatal() => {
                    let _ = reply.send(Err(AppError::ConnectionLost(err.to_string())));
                    return Err(err);
                }
                result => {
                    let _ = reply.send(result);
                }
            },
            Command::DrainNext { reply } => {
                let _ = reply.send(self.pending.pop());
            }
            Command::GetInfo { reply } => {
                let _ = reply.send(self.server_info.clone());
            }
            Command::SetSubscriber { subscriber, reply } => {
                self.subscriber = subscriber;
                let _ = reply.send(());
            }
            Command::InspectCorrelation { sid, reply } => {
                let _ = reply.send(self.correlations.state(&sid));
            }
            Command::Shutdown => {}
        }
        Ok(())
    }

    async fn send(&mut self, message: &ClientMessage) -> AppResult<()> {
        let frame = self.codec.encode(message)?;
        self.writer.write_all(&frame).await.map_err(|e| {
            AppError::ConnectionLost(format!("write {}: {}", message.name(), e))
        })?;
        self.writer.flush().await.map_err(|e| {
            AppError::ConnectionLost(format!("flush {}: {}", message.name(), e))
        })?;
        trace!("connection {} sent {}", self.connection_id, message.name());
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!("connection {} socket shutdown: {}", self.connection_id, e);
        }
        self.status.send_replace(ConnectionStatus::Closed);
        debug!(
            "connection {} closed with {} pending messages and {} open correlations",
            self.connection_id,
            self.pending.len(),
            self.correlations.len()
        );
    }
}

impl<F, C> Drop for Connection<F, C> {
    fn drop(&mut self) {
        debug!("connection {} dropped", self.connection_id);
    }
}
