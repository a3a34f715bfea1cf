use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};
use uuid::Uuid;

use crate::message::{InboundMessage, Sid};
use crate::protocol::{ClientMessage, Codec, ServerInfo, TextCodec};
use crate::service::{ClientConfig, Shutdown};
use crate::{AppError, AppResult};

use super::command::Command;
use super::connection::{Connection, ConnectionStatus};
use super::frame::{Framer, LineFramer};
use super::CorrelationState;

const INBOX_PREFIX: &str = "_INBOX";

/// Handle to one connection.
///
/// Cloning is cheap; every clone talks to the same connection task. The
/// connection closes when `shutdown` is called, when the shutdown signal it
/// was created with fires, or when the last handle is dropped.
#[derive(Debug, Clone)]
pub struct Client {
    connection_id: u64,
    mailbox: mpsc::Sender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    next_sid: Arc<AtomicU64>,
}

impl Client {
    /// Connects to `config.address()` and completes the handshake.
    pub async fn connect(config: &ClientConfig) -> AppResult<Client> {
        Self::connect_with(
            config,
            LineFramer::new(config.network.max_frame_size),
            TextCodec,
            None,
        )
        .await
    }

    /// Like `connect`, but the connection also closes when `notify_shutdown`
    /// fires.
    pub async fn connect_with_shutdown(
        config: &ClientConfig,
        notify_shutdown: &broadcast::Sender<()>,
    ) -> AppResult<Client> {
        Self::connect_with(
            config,
            LineFramer::new(config.network.max_frame_size),
            TextCodec,
            Some(notify_shutdown),
        )
        .await
    }

    pub async fn connect_with<F: Framer, C: Codec>(
        config: &ClientConfig,
        framer: F,
        codec: C,
        notify_shutdown: Option<&broadcast::Sender<()>>,
    ) -> AppResult<Client> {
        let shutdown = match notify_shutdown {
            Some(notify_shutdown) => Shutdown::new(notify_shutdown.subscribe()),
            // nobody can signal this one, the connection lives until closed otherwise
            None => Shutdown::new(broadcast::channel(1).1),
        };
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);

        let connection = Connection::open(config, framer, codec, status_tx).await?;
        let connection_id = connection.id();
        let (mailbox_tx, mailbox_rx) = mpsc::channel(config.network.mailbox_capacity);
        tokio::spawn(connection.run(mailbox_rx, shutdown));
        info!("connection {} established to {}", connection_id, config.address());

        Ok(Client {
            connection_id,
            mailbox: mailbox_tx,
            status: status_rx,
            next_sid: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Declares that replies arriving under `sid` belong to a request/reply
    /// exchange. Register before subscribing so the reply cannot slip into
    /// the pending queue.
    pub async fn register_request(&self, sid: impl Into<Sid>) -> AppResult<()> {
        let sid = sid.into();
        self.call(|reply| Command::RegisterRequest { sid, reply }).await
    }

    /// Returns the reply for `sid`, suspending this caller until it arrives.
    ///
    /// Only one caller may await a given sid at a time; if a second one does,
    /// the first fails with `CorrelationMisuse`. There is no timeout here,
    /// wrap the call in `tokio::time::timeout` when a deadline is needed.
    pub async fn await_response(&self, sid: impl Into<Sid>) -> AppResult<InboundMessage> {
        let sid = sid.into();
        let (reply, rx) = oneshot::channel();
        self.submit(Command::AwaitResponse {
            sid: sid.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| {
            if self.status() == ConnectionStatus::Closed {
                AppError::ConnectionLost(format!("connection closed while awaiting sid {}", sid))
            } else {
                AppError::CorrelationMisuse(format!("sid {} was awaited by another caller", sid))
            }
        })
    }

    /// Writes `message` to the socket. Returns once the write is flushed,
    /// not once the server has seen it.
    pub async fn transmit(&self, message: ClientMessage) -> AppResult<()> {
        self.call(|reply| Command::Transmit { message, reply })
            .await?
    }

    /// Pops one message that arrived under an uncorrelated sid while no live
    /// subscriber was installed.
    pub async fn drain_next(&self) -> AppResult<Option<InboundMessage>> {
        self.call(|reply| Command::DrainNext { reply }).await
    }

    /// Snapshot of the last INFO received from the server.
    pub async fn get_info(&self) -> AppResult<ServerInfo> {
        self.call(|reply| Command::GetInfo { reply }).await
    }

    /// Installs (or with `None` removes) the live subscriber that receives
    /// uncorrelated messages instead of the pending queue.
    pub async fn set_subscriber(
        &self,
        subscriber: Option<mpsc::UnboundedSender<InboundMessage>>,
    ) -> AppResult<()> {
        self.call(|reply| Command::SetSubscriber { subscriber, reply })
            .await
    }

    /// Installs a fresh live subscriber and returns its message stream,
    /// replacing any previous one.
    pub async fn subscriber(&self) -> AppResult<UnboundedReceiverStream<InboundMessage>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.set_subscriber(Some(tx)).await?;
        Ok(UnboundedReceiverStream::new(rx))
    }

    pub async fn correlation_state(&self, sid: impl Into<Sid>) -> AppResult<CorrelationState> {
        let sid = sid.into();
        self.call(|reply| Command::InspectCorrelation { sid, reply })
            .await
    }

    pub async fn publish(&self, subject: &str, payload: impl Into<Bytes>) -> AppResult<()> {
        self.transmit(ClientMessage::Pub {
            subject: subject.to_string(),
            reply_to: None,
            payload: payload.into(),
        })
        .await
    }

    pub async fn publish_request(
        &self,
        subject: &str,
        reply_to: &str,
        payload: impl Into<Bytes>,
    ) -> AppResult<()> {
        self.transmit(ClientMessage::Pub {
            subject: subject.to_string(),
            reply_to: Some(reply_to.to_string()),
            payload: payload.into(),
        })
        .await
    }

    /// Subscribes to `subject` under a freshly allocated sid and returns it.
    pub async fn subscribe(&self, subject: &str, queue_group: Option<&str>) -> AppResult<Sid> {
        let sid = self.next_sid();
        self.transmit(ClientMessage::Sub {
            subject: subject.to_string(),
            queue_group: queue_group.map(str::to_string),
            sid: sid.clone(),
        })
        .await?;
        Ok(sid)
    }

    pub async fn unsubscribe(&self, sid: &str, max_msgs: Option<u64>) -> AppResult<()> {
        self.transmit(ClientMessage::Unsub {
            sid: sid.to_string(),
            max_msgs,
        })
        .await
    }

    /// Publishes `payload` to `subject` and waits for a single reply on a
    /// private inbox.
    pub async fn request(&self, subject: &str, payload: impl Into<Bytes>) -> AppResult<InboundMessage> {
        let inbox = format!("{}.{}", INBOX_PREFIX, Uuid::new_v4().simple());
        let sid = self.next_sid();

        self.register_request(sid.clone()).await?;
        self.transmit(ClientMessage::Sub {
            subject: inbox.clone(),
            queue_group: None,
            sid: sid.clone(),
        })
        .await?;
        self.unsubscribe(&sid, Some(1)).await?;
        self.publish_request(subject, &inbox, payload).await?;
        debug!("request on {} waiting for reply on {} (sid {})", subject, inbox, sid);

        self.await_response(sid).await
    }

    /// Closes the connection and waits until the socket is shut.
    pub async fn shutdown(&self) -> AppResult<()> {
        // a closed mailbox means the connection is already going away
        let _ = self.mailbox.send(Command::Shutdown).await;
        self.closed().await;
        Ok(())
    }

    /// Resolves once the connection has reached `Closed`.
    pub async fn closed(&self) {
        let mut status = self.status.clone();
        let _ = status
            .wait_for(|status| *status == ConnectionStatus::Closed)
            .await;
    }

    /// Sids handed out by `subscribe` and `request`; numeric and unique per client.
    pub fn next_sid(&self) -> Sid {
        self.next_sid.fetch_add(1, Ordering::Relaxed).to_string()
    }

    async fn submit(&self, command: Command) -> AppResult<()> {
        let name = command.name();
        self.mailbox.send(command).await.map_err(|_| {
            AppError::ConnectionLost(format!(
                "connection {} is closed, {} rejected",
                self.connection_id, name
            ))
        })
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> AppResult<T> {
        let (reply, rx) = oneshot::channel();
        let command = command(reply);
        let name = command.name();
        self.submit(command).await?;
        rx.await.map_err(|_| {
            AppError::ConnectionLost(format!(
                "connection {} closed before answering {}",
                self.connection_id, name
            ))
        })
    }
}
