use std::time::Duration;

use bytes::Bytes;
use rstest::{fixture, rstest};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_stream::StreamExt;

use stonemq_client::{
    setup_local_tracing, AppError, Client, ClientConfig, ClientMessage, ConnectionStatus,
    CorrelationState, DrainOrder,
};

const WAIT: Duration = Duration::from_secs(2);
const INFO: &str = "INFO {\"server_id\":\"x\",\"version\":\"2.10.0\",\"max_payload\":1048576}\r\n";

#[fixture]
#[once]
fn setup() {
    setup_local_tracing().expect("failed to setup tracing");
}

/// Server side of one test connection.
struct Peer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Peer {
    async fn accept(listener: &TcpListener) -> Peer {
        let (socket, _) = timeout(WAIT, listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        let (reader, writer) = socket.into_split();
        Peer {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, raw: &[u8]) {
        self.writer.write_all(raw).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Next CRLF-terminated line from the client, empty on EOF.
    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .expect("client sent nothing")
            .unwrap();
        line
    }

    /// Frames sent before this PING have been dispatched once its PONG is back.
    async fn sync(&mut self) {
        self.send(b"PING\r\n").await;
        assert_eq!(self.read_line().await, "PONG\r\n");
    }

    /// Accepts the client, sends `info` and consumes CONNECT and PING.
    /// Returns the CONNECT line.
    async fn handshake(listener: &TcpListener, info: &[u8]) -> (Peer, String) {
        let mut peer = Peer::accept(listener).await;
        peer.send(info).await;
        let connect = peer.read_line().await;
        assert_eq!(peer.read_line().await, "PING\r\n");
        (peer, connect)
    }
}

async fn listen() -> (TcpListener, ClientConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = ClientConfig::default();
    config.network.host = "127.0.0.1".to_string();
    config.network.port = listener.local_addr().unwrap().port();
    (listener, config)
}

async fn connected(config: &ClientConfig, listener: &TcpListener) -> (Client, Peer) {
    let (client, (peer, _)) =
        tokio::join!(Client::connect(config), Peer::handshake(listener, INFO.as_bytes()));
    (client.unwrap(), peer)
}

async fn wait_for_state(client: &Client, sid: &str, expected: CorrelationState) {
    for _ in 0..400 {
        if client.correlation_state(sid).await.unwrap() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("sid {} never reached {:?}", sid, expected);
}

#[rstest]
#[tokio::test]
async fn test_handshake_sends_connect_then_ping(_setup: ()) {
    let (listener, config) = listen().await;
    let (client, (_peer, connect)) = tokio::join!(
        Client::connect(&config),
        Peer::handshake(&listener, b"INFO {\"server_id\":\"x\"}\r\n")
    );
    let client = client.unwrap();

    assert!(connect.starts_with("CONNECT "));
    assert!(connect.ends_with("\r\n"));
    let options: serde_json::Value =
        serde_json::from_str(connect.trim_start_matches("CONNECT ").trim_end()).unwrap();
    assert_eq!(options["verbose"], false);
    assert_eq!(options["pedantic"], false);
    assert_eq!(options["protocol"], 1);
    assert_eq!(options["lang"], "rust");
    assert_eq!(options["version"], env!("CARGO_PKG_VERSION"));

    assert_eq!(client.status(), ConnectionStatus::Ready);
    let info = client.get_info().await.unwrap();
    assert_eq!(info.server_id.as_deref(), Some("x"));
    assert!(info.extra.is_empty());
}

#[rstest]
#[tokio::test]
async fn test_handshake_requires_info_first(_setup: ()) {
    let (listener, config) = listen().await;
    let server = async {
        let mut peer = Peer::accept(&listener).await;
        peer.send(b"PING\r\n").await;
        peer
    };
    let (client, _peer) = tokio::join!(Client::connect(&config), server);
    assert!(matches!(client, Err(AppError::ConnectError(_))));
}

#[rstest]
#[tokio::test]
async fn test_handshake_server_hangs_up(_setup: ()) {
    let (listener, config) = listen().await;
    let server = async {
        let peer = Peer::accept(&listener).await;
        drop(peer);
    };
    let (client, _) = tokio::join!(Client::connect(&config), server);
    assert!(matches!(client, Err(AppError::ConnectError(_))));
}

#[rstest]
#[tokio::test]
async fn test_connect_refused(_setup: ()) {
    let (listener, config) = listen().await;
    drop(listener);
    let err = Client::connect(&config).await.unwrap_err();
    assert!(matches!(err, AppError::ConnectError(_)));
}

#[rstest]
#[tokio::test]
async fn test_frames_behind_info_are_kept(_setup: ()) {
    let (listener, config) = listen().await;
    let first_segment = format!("{}MSG updates 1 2\r\nhi\r\n", INFO);
    let (client, (mut peer, _)) = tokio::join!(
        Client::connect(&config),
        Peer::handshake(&listener, first_segment.as_bytes())
    );
    let client = client.unwrap();
    peer.sync().await;

    let message = client.drain_next().await.unwrap().unwrap();
    assert_eq!(message.subject, "updates");
    assert_eq!(message.payload, Bytes::from_static(b"hi"));
}

#[rstest]
#[tokio::test]
async fn test_ping_gets_exactly_one_pong(_setup: ()) {
    let (listener, config) = listen().await;
    let (client, mut peer) = connected(&config, &listener).await;

    peer.send(b"PONG\r\nPING\r\n").await;
    assert_eq!(peer.read_line().await, "PONG\r\n");

    // nothing else was queued for the PONG we sent
    client.transmit(ClientMessage::Ping).await.unwrap();
    assert_eq!(peer.read_line().await, "PING\r\n");
}

#[rstest]
#[tokio::test]
async fn test_reply_arriving_before_await(_setup: ()) {
    let (listener, config) = listen().await;
    let (client, mut peer) = connected(&config, &listener).await;

    client.register_request("7").await.unwrap();
    peer.send(b"MSG foo 7 3\r\nbar\r\n").await;
    peer.sync().await;
    assert_eq!(
        client.correlation_state("7").await.unwrap(),
        CorrelationState::MessageWaiting
    );

    let reply = timeout(Duration::from_millis(200), client.await_response("7"))
        .await
        .expect("stored reply must be returned without waiting")
        .unwrap();
    assert_eq!(reply.subject, "foo");
    assert_eq!(reply.sid, "7");
    assert_eq!(reply.payload, Bytes::from_static(b"bar"));
    assert_eq!(
        client.correlation_state("7").await.unwrap(),
        CorrelationState::Absent
    );
    // correlated messages never reach the pending queue
    assert!(client.drain_next().await.unwrap().is_none());
}

#[rstest]
#[tokio::test]
async fn test_suspended_await_resumes_once(_setup: ()) {
    let (listener, config) = listen().await;
    let (client, mut peer) = connected(&config, &listener).await;

    client.register_request("9").await.unwrap();
    let waiter = {
        let client = client.clone();
        tokio::spawn(async move { client.await_response("9").await })
    };
    wait_for_state(&client, "9", CorrelationState::Awaiting).await;

    peer.send(b"MSG foo 9 3\r\nbaz\r\n").await;
    let reply = timeout(WAIT, waiter).await.unwrap().unwrap().unwrap();
    assert_eq!(reply.subject, "foo");
    assert_eq!(reply.sid, "9");
    assert_eq!(reply.payload, Bytes::from_static(b"baz"));

    // a duplicate is no longer correlated and lands in the queue
    peer.send(b"MSG foo 9 3\r\nbaz\r\n").await;
    peer.sync().await;
    assert_eq!(
        client.correlation_state("9").await.unwrap(),
        CorrelationState::Absent
    );
    assert!(client.drain_next().await.unwrap().is_some());
    assert!(client.drain_next().await.unwrap().is_none());
}

#[rstest]
#[tokio::test]
async fn test_concurrent_requests_resolve_independently(_setup: ()) {
    let (listener, config) = listen().await;
    let (client, mut peer) = connected(&config, &listener).await;

    let mut waiters = Vec::new();
    for sid in ["21", "22", "23"] {
        client.register_request(sid).await.unwrap();
        let client = client.clone();
        waiters.push(tokio::spawn(async move { client.await_response(sid).await }));
    }
    for sid in ["21", "22", "23"] {
        wait_for_state(&client, sid, CorrelationState::Awaiting).await;
    }

    peer.send(b"MSG r 23 1\r\nc\r\nMSG r 21 1\r\na\r\nMSG r 22 1\r\nb\r\n")
        .await;
    let mut payloads = Vec::new();
    for waiter in waiters {
        let reply = timeout(WAIT, waiter).await.unwrap().unwrap().unwrap();
        payloads.push(reply.payload);
    }
    assert_eq!(
        payloads,
        vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b"b"),
            Bytes::from_static(b"c")
        ]
    );
}

#[rstest]
#[tokio::test]
async fn test_second_await_on_same_sid_is_misuse(_setup: ()) {
    let (listener, config) = listen().await;
    let (client, mut peer) = connected(&config, &listener).await;

    client.register_request("13").await.unwrap();
    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.await_response("13").await })
    };
    wait_for_state(&client, "13", CorrelationState::Awaiting).await;
    let second = {
        let client = client.clone();
        tokio::spawn(async move { client.await_response("13").await })
    };

    let err = timeout(WAIT, first).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, AppError::CorrelationMisuse(_)));

    peer.send(b"MSG foo 13 2\r\nok\r\n").await;
    let reply = timeout(WAIT, second).await.unwrap().unwrap().unwrap();
    assert_eq!(reply.payload, Bytes::from_static(b"ok"));
}

#[rstest]
#[tokio::test]
async fn test_uncorrelated_messages_are_queued(_setup: ()) {
    let (listener, config) = listen().await;
    let (client, mut peer) = connected(&config, &listener).await;

    peer.send(b"MSG news 1 5\r\nfirst\r\nMSG news 1 _INBOX.r 6\r\nsecond\r\n")
        .await;
    peer.sync().await;

    let first = client.drain_next().await.unwrap().unwrap();
    assert_eq!(first.payload, Bytes::from_static(b"first"));
    assert_eq!(first.reply_to, None);
    let second = client.drain_next().await.unwrap().unwrap();
    assert_eq!(second.payload, Bytes::from_static(b"second"));
    assert_eq!(second.reply_to.as_deref(), Some("_INBOX.r"));
    assert!(client.drain_next().await.unwrap().is_none());
}

#[rstest]
#[tokio::test]
async fn test_lifo_drain_order(_setup: ()) {
    let (listener, mut config) = listen().await;
    config.delivery.drain_order = DrainOrder::Lifo;
    let (client, mut peer) = connected(&config, &listener).await;

    peer.send(b"MSG news 1 1\r\na\r\nMSG news 1 1\r\nb\r\n").await;
    peer.sync().await;

    let newest = client.drain_next().await.unwrap().unwrap();
    assert_eq!(newest.payload, Bytes::from_static(b"b"));
}

#[rstest]
#[tokio::test]
async fn test_live_subscriber_bypasses_queue(_setup: ()) {
    let (listener, config) = listen().await;
    let (client, mut peer) = connected(&config, &listener).await;

    let mut messages = client.subscriber().await.unwrap();
    client.register_request("5").await.unwrap();
    peer.send(b"MSG news 2 4\r\nlive\r\nMSG reply 5 4\r\nmine\r\n")
        .await;
    peer.sync().await;

    let delivered = timeout(WAIT, messages.next()).await.unwrap().unwrap();
    assert_eq!(delivered.sid, "2");
    assert_eq!(delivered.payload, Bytes::from_static(b"live"));
    assert!(client.drain_next().await.unwrap().is_none());
    // the correlated reply was held for its sid, not pushed to the subscriber
    assert_eq!(
        client.correlation_state("5").await.unwrap(),
        CorrelationState::MessageWaiting
    );

    // once the subscriber is gone, delivery falls back to the queue
    drop(messages);
    peer.send(b"MSG news 2 5\r\nlater\r\n").await;
    peer.sync().await;
    let queued = client.drain_next().await.unwrap().unwrap();
    assert_eq!(queued.payload, Bytes::from_static(b"later"));
}

#[rstest]
#[tokio::test]
async fn test_byte_by_byte_delivery(_setup: ()) {
    let (listener, config) = listen().await;
    let (client, mut peer) = connected(&config, &listener).await;

    for byte in b"MSG foo 5 11\r\nhello world\r\n" {
        peer.send(&[*byte]).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    peer.sync().await;

    let message = client.drain_next().await.unwrap().unwrap();
    assert_eq!(message.payload, Bytes::from_static(b"hello world"));
    assert!(client.drain_next().await.unwrap().is_none());
}

#[rstest]
#[tokio::test]
async fn test_info_replaces_cache(_setup: ()) {
    let (listener, config) = listen().await;
    let (client, mut peer) = connected(&config, &listener).await;
    assert_eq!(
        client.get_info().await.unwrap().version.as_deref(),
        Some("2.10.0")
    );

    peer.send(b"INFO {\"server_id\":\"y\",\"cluster\":\"east\"}\r\n").await;
    peer.sync().await;

    let info = client.get_info().await.unwrap();
    assert_eq!(info.server_id.as_deref(), Some("y"));
    assert_eq!(info.version, None);
    assert_eq!(info.extra["cluster"], "east");
}

#[rstest]
#[tokio::test]
async fn test_server_error_is_not_fatal(_setup: ()) {
    let (listener, config) = listen().await;
    let (client, mut peer) = connected(&config, &listener).await;

    peer.send(b"-ERR 'Unknown Protocol Operation'\r\n+OK\r\n").await;
    peer.sync().await;
    assert_eq!(client.status(), ConnectionStatus::Ready);
}

#[rstest]
#[tokio::test]
async fn test_request_round_trip(_setup: ()) {
    let (listener, config) = listen().await;
    let (client, mut peer) = connected(&config, &listener).await;

    let request = {
        let client = client.clone();
        tokio::spawn(async move { client.request("svc.echo", "ping").await })
    };

    let sub = peer.read_line().await;
    let parts: Vec<&str> = sub.split_whitespace().collect();
    assert_eq!(parts[0], "SUB");
    assert!(parts[1].starts_with("_INBOX."));
    let (inbox, sid) = (parts[1].to_string(), parts[2].to_string());
    assert_eq!(peer.read_line().await, format!("UNSUB {} 1\r\n", sid));
    assert_eq!(
        peer.read_line().await,
        format!("PUB svc.echo {} 4\r\n", inbox)
    );
    assert_eq!(peer.read_line().await, "ping\r\n");

    peer.send(format!("MSG {} {} 4\r\npong\r\n", inbox, sid).as_bytes())
        .await;
    let reply = timeout(WAIT, request).await.unwrap().unwrap().unwrap();
    assert_eq!(reply.subject, inbox);
    assert_eq!(reply.payload, Bytes::from_static(b"pong"));
}

#[rstest]
#[tokio::test]
async fn test_publish_and_subscribe_frames(_setup: ()) {
    let (listener, config) = listen().await;
    let (client, mut peer) = connected(&config, &listener).await;

    let sid = client.subscribe("orders.*", Some("workers")).await.unwrap();
    assert_eq!(
        peer.read_line().await,
        format!("SUB orders.* workers {}\r\n", sid)
    );
    client.publish("orders.new", "42").await.unwrap();
    assert_eq!(peer.read_line().await, "PUB orders.new 2\r\n");
    assert_eq!(peer.read_line().await, "42\r\n");
    client.unsubscribe(&sid, None).await.unwrap();
    assert_eq!(peer.read_line().await, format!("UNSUB {}\r\n", sid));

    let err = client.publish("bad subject", "x").await.unwrap_err();
    assert!(matches!(err, AppError::InvalidValue(_)));
    assert_eq!(client.status(), ConnectionStatus::Ready);
}

#[rstest]
#[tokio::test]
async fn test_connection_lost_releases_waiters(_setup: ()) {
    let (listener, config) = listen().await;
    let (client, peer) = connected(&config, &listener).await;

    client.register_request("11").await.unwrap();
    let waiter = {
        let client = client.clone();
        tokio::spawn(async move { client.await_response("11").await })
    };
    wait_for_state(&client, "11", CorrelationState::Awaiting).await;
    drop(peer);

    let err = timeout(WAIT, waiter).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, AppError::ConnectionLost(_)));
    timeout(WAIT, client.closed()).await.unwrap();
    assert_eq!(client.status(), ConnectionStatus::Closed);

    let err = client.publish("foo", "x").await.unwrap_err();
    assert!(matches!(err, AppError::ConnectionLost(_)));
}

#[rstest]
#[tokio::test]
async fn test_malformed_frame_closes_connection(_setup: ()) {
    let (listener, config) = listen().await;
    let (client, mut peer) = connected(&config, &listener).await;

    peer.send(b"BOGUS frame\r\n").await;
    timeout(WAIT, client.closed()).await.unwrap();
    assert_eq!(client.status(), ConnectionStatus::Closed);
    assert_eq!(peer.read_line().await, "");
}

#[rstest]
#[tokio::test]
async fn test_oversized_frame_closes_connection(_setup: ()) {
    let (listener, mut config) = listen().await;
    config.network.max_frame_size = 128;
    let (client, mut peer) = connected(&config, &listener).await;

    let waiter = {
        let client = client.clone();
        tokio::spawn(async move { client.await_response("3").await })
    };
    wait_for_state(&client, "3", CorrelationState::Awaiting).await;

    peer.send(b"MSG foo 3 4096\r\n").await;
    timeout(WAIT, client.closed()).await.unwrap();
    assert_eq!(peer.read_line().await, "");

    let err = timeout(WAIT, waiter).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, AppError::ConnectionLost(_)));
}

#[rstest]
#[tokio::test]
async fn test_register_claims_already_queued_reply(_setup: ()) {
    let (listener, config) = listen().await;
    let (client, mut peer) = connected(&config, &listener).await;

    peer.send(b"MSG news 1 5\r\nhello\r\nMSG foo 5 3\r\nbar\r\n")
        .await;
    peer.sync().await;

    client.register_request("5").await.unwrap();
    assert_eq!(
        client.correlation_state("5").await.unwrap(),
        CorrelationState::MessageWaiting
    );

    let reply = timeout(WAIT, client.await_response("5"))
        .await
        .expect("queued reply was not handed over")
        .unwrap();
    assert_eq!(reply.subject, "foo");
    assert_eq!(reply.payload, Bytes::from_static(b"bar"));
    assert_eq!(
        client.correlation_state("5").await.unwrap(),
        CorrelationState::Absent
    );

    let other = client.drain_next().await.unwrap().unwrap();
    assert_eq!(other.sid, "1");
    assert!(client.drain_next().await.unwrap().is_none());
}

#[rstest]
#[tokio::test]
async fn test_shutdown_closes_socket(_setup: ()) {
    let (listener, config) = listen().await;
    let (client, mut peer) = connected(&config, &listener).await;

    client.shutdown().await.unwrap();
    assert_eq!(client.status(), ConnectionStatus::Closed);
    assert_eq!(peer.read_line().await, "");

    let err = client.drain_next().await.unwrap_err();
    assert!(matches!(err, AppError::ConnectionLost(_)));
}

#[rstest]
#[tokio::test]
async fn test_shutdown_signal_closes_all_connections(_setup: ()) {
    let (listener, config) = listen().await;
    let (notify_shutdown, _) = broadcast::channel(1);

    let mut clients = Vec::new();
    let mut peers = Vec::new();
    for _ in 0..2 {
        let (client, (peer, _)) = tokio::join!(
            Client::connect_with_shutdown(&config, &notify_shutdown),
            Peer::handshake(&listener, INFO.as_bytes())
        );
        clients.push(client.unwrap());
        peers.push(peer);
    }
    assert_ne!(clients[0].connection_id(), clients[1].connection_id());

    notify_shutdown.send(()).unwrap();
    for client in &clients {
        timeout(WAIT, client.closed()).await.unwrap();
    }
    for peer in &mut peers {
        assert_eq!(peer.read_line().await, "");
    }
}
