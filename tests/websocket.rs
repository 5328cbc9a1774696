//! end-to-end scenarios over loopback tcp

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use wsnet::events::{AcceptorEvents, EndpointEvents};
use wsnet::{ClientOptions, Endpoint, ServerOptions, WsAcceptor};

const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

#[derive(Debug)]
enum Ev {
    Connected,
    UnexpectedHandshake(u16),
    Message(Vec<u8>, bool),
    Ping,
    Pong,
    Close(u16, String),
    Error(String),
}

fn channel_events() -> (EndpointEvents, UnboundedReceiver<Ev>) {
    let (tx, rx) = unbounded_channel();
    (events_into(tx), rx)
}

fn events_into(tx: UnboundedSender<Ev>) -> EndpointEvents {
    let mut events = EndpointEvents::default();
    let t = tx.clone();
    events.on_connected = Box::new(move |_| {
        let _ = t.send(Ev::Connected);
    });
    let t = tx.clone();
    events.on_unexpected_handshake = Box::new(move |handshake| {
        let status = handshake
            .as_response()
            .map(|response| response.status_code)
            .unwrap_or(0);
        let _ = t.send(Ev::UnexpectedHandshake(status));
    });
    let t = tx.clone();
    events.on_message_received = Box::new(move |payload, is_binary| {
        let _ = t.send(Ev::Message(payload.to_vec(), is_binary));
    });
    let t = tx.clone();
    events.on_ping = Box::new(move || {
        let _ = t.send(Ev::Ping);
    });
    let t = tx.clone();
    events.on_pong = Box::new(move || {
        let _ = t.send(Ev::Pong);
    });
    let t = tx.clone();
    events.on_close = Box::new(move |code, reason| {
        let _ = t.send(Ev::Close(code, reason.to_string()));
    });
    events.on_error = Box::new(move |error| {
        let _ = tx.send(Ev::Error(error.to_string()));
    });
    events
}

/// acceptor on port 0 whose endpoints bridge their events into a channel
fn start_server(backlog: u32) -> (WsAcceptor, UnboundedReceiver<Ev>) {
    let acceptor = WsAcceptor::new(ServerOptions {
        address: "127.0.0.1".to_string(),
        backlog,
        port: 0,
        ..Default::default()
    });
    let (tx, rx) = unbounded_channel();
    let mut events = AcceptorEvents::default();
    events.on_connection = Box::new(move |endpoint, _request| {
        endpoint.set_events(events_into(tx.clone()));
    });
    acceptor.set_events(events);
    assert!(acceptor.open());
    (acceptor, rx)
}

fn client_for(acceptor: &WsAcceptor) -> (Endpoint, UnboundedReceiver<Ev>) {
    let addr = acceptor.local_addr().expect("acceptor open");
    let client = Endpoint::client(ClientOptions {
        address: "127.0.0.1".to_string(),
        port: addr.port(),
        path: "/chat".to_string(),
        ..Default::default()
    });
    let (events, rx) = channel_events();
    client.set_events(events);
    (client, rx)
}

async fn next(rx: &mut UnboundedReceiver<Ev>) -> Ev {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn expect_silence(rx: &mut UnboundedReceiver<Ev>, ms: u64) {
    if let Ok(Some(ev)) = tokio::time::timeout(Duration::from_millis(ms), rx.recv()).await {
        panic!("unexpected event {ev:?}");
    }
}

async fn read_http_head(tcp: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = tcp.read(&mut byte).await.expect("read response head");
        assert_ne!(n, 0, "eof before end of head");
        head.push(byte[0]);
    }
    String::from_utf8(head).expect("utf-8 head")
}

/// raw upgrade in the exact wire shape, asserting the 101 line
async fn raw_upgrade(port: u16) -> TcpStream {
    let mut tcp = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let request = format!(
        "GET /chat HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\nUpgrade: websocket\r\n\
         Connection: Upgrade\r\nSec-WebSocket-Key: {SAMPLE_KEY}\r\nSec-WebSocket-Version: 13\r\n\r\n"
    );
    tcp.write_all(request.as_bytes()).await.unwrap();
    let head = read_http_head(&mut tcp).await;
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"), "{head}");
    assert!(head.contains(&format!("Sec-WebSocket-Accept: {SAMPLE_ACCEPT}\r\n")), "{head}");
    tcp
}

#[tokio::test]
async fn s1_upgrade_response_wire_shape() {
    let (acceptor, _server_rx) = start_server(u32::MAX);
    let port = acceptor.local_addr().unwrap().port();
    let connected = std::sync::Arc::new(std::sync::Mutex::new(None));
    let seen = connected.clone();
    let mut events = AcceptorEvents::default();
    events.on_connection = Box::new(move |_endpoint, request| {
        *seen.lock().unwrap() = Some((
            request.path.clone(),
            request.headers.get("sec-websocket-key").map(str::to_string),
        ));
    });
    acceptor.set_events(events);

    let _tcp = raw_upgrade(port).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let seen = connected.lock().unwrap().clone().expect("on_connection fired");
    assert_eq!(seen.0, "/chat");
    assert_eq!(seen.1.as_deref(), Some(SAMPLE_KEY));
}

#[tokio::test]
async fn s1_both_sides_fire_on_connected() {
    let (acceptor, mut server_rx) = start_server(u32::MAX);
    let (client, mut client_rx) = client_for(&acceptor);
    assert!(client.connect().await);
    assert!(matches!(next(&mut client_rx).await, Ev::Connected));
    assert!(matches!(next(&mut server_rx).await, Ev::Connected));
    // a second connect on an open endpoint is refused
    assert!(!client.connect().await);
}

#[tokio::test]
async fn s2_text_echo() {
    let (acceptor, mut server_rx) = start_server(u32::MAX);
    let (client, mut client_rx) = client_for(&acceptor);
    assert!(client.connect().await);
    assert!(matches!(next(&mut client_rx).await, Ev::Connected));
    assert!(matches!(next(&mut server_rx).await, Ev::Connected));

    assert!(client.write("hello"));
    match next(&mut server_rx).await {
        Ev::Message(payload, is_binary) => {
            assert_eq!(payload, vec![0x68, 0x65, 0x6c, 0x6c, 0x6f]);
            assert!(!is_binary);
        }
        other => panic!("expected message, got {other:?}"),
    }
}

#[tokio::test]
async fn s3_large_binary_uses_extended_length() {
    let (acceptor, mut server_rx) = start_server(u32::MAX);
    let (client, mut client_rx) = client_for(&acceptor);
    assert!(client.connect().await);
    assert!(matches!(next(&mut client_rx).await, Ev::Connected));
    assert!(matches!(next(&mut server_rx).await, Ev::Connected));

    let data = vec![0x5A; 70_000];
    assert!(client.write_buffer(&data));
    match next(&mut server_rx).await {
        Ev::Message(payload, is_binary) => {
            assert!(is_binary);
            assert_eq!(payload.len(), 70_000);
            assert!(payload.iter().all(|&byte| byte == 0x5A));
        }
        other => panic!("expected message, got {other:?}"),
    }
}

#[tokio::test]
async fn s4_graceful_close_from_client() {
    let (acceptor, mut server_rx) = start_server(u32::MAX);
    let (client, mut client_rx) = client_for(&acceptor);
    assert!(client.connect().await);
    assert!(matches!(next(&mut client_rx).await, Ev::Connected));
    assert!(matches!(next(&mut server_rx).await, Ev::Connected));

    client.end(1000, "bye");
    match next(&mut server_rx).await {
        Ev::Close(code, reason) => {
            assert_eq!(code, 1000);
            assert_eq!(reason, "bye");
        }
        other => panic!("expected close, got {other:?}"),
    }
    match next(&mut client_rx).await {
        Ev::Close(code, reason) => {
            assert_eq!(code, 1000);
            assert_eq!(reason, "bye");
        }
        other => panic!("expected close, got {other:?}"),
    }
    // closed endpoints refuse writes, and on_close never fires twice
    assert!(!client.write("late"));
    client.end(1000, "again");
    client.close(1000, "again");
    expect_silence(&mut client_rx, 200).await;

    // a fresh connect is the only way back to open
    assert!(client.connect().await);
    assert!(matches!(next(&mut client_rx).await, Ev::Connected));
}

#[tokio::test]
async fn s5_unmasked_client_frame_is_rejected() {
    let (acceptor, mut server_rx) = start_server(u32::MAX);
    let port = acceptor.local_addr().unwrap().port();
    let mut tcp = raw_upgrade(port).await;
    assert!(matches!(next(&mut server_rx).await, Ev::Connected));

    // text frame "x" with mask = 0, illegal from a client
    tcp.write_all(&[0x81, 0x01, b'x']).await.unwrap();
    loop {
        match next(&mut server_rx).await {
            Ev::Close(code, reason) => {
                assert_eq!(code, 1002);
                assert!(reason.contains("Protocol error"), "{reason}");
                break;
            }
            Ev::Message(..) => panic!("message dispatched for unmasked frame"),
            _ => {}
        }
    }
    // the server sent its 1002 close frame before shutting down
    let mut reply = Vec::new();
    let _ = tcp.read_to_end(&mut reply).await;
    assert!(reply.len() >= 4, "{reply:?}");
    assert_eq!(reply[0], 0x88);
    assert_eq!(u16::from_be_bytes([reply[2], reply[3]]), 1002);
}

#[tokio::test]
async fn s6_server_rejects_missing_version() {
    let (acceptor, mut server_rx) = start_server(u32::MAX);
    let port = acceptor.local_addr().unwrap().port();

    let mut tcp = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let request = format!(
        "GET /chat HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\nUpgrade: websocket\r\n\
         Connection: Upgrade\r\nSec-WebSocket-Key: {SAMPLE_KEY}\r\n\r\n"
    );
    tcp.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    let _ = tcp.read_to_end(&mut response).await;
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{response}");
    assert!(
        response.contains("\"Sec-WebSocket-Version\" header not found"),
        "{response}"
    );
    // the rejected endpoint never upgraded, so no acceptor-side events
    expect_silence(&mut server_rx, 200).await;
}

#[tokio::test]
async fn s6_client_reports_unexpected_handshake() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut tcp, _) = listener.accept().await.unwrap();
        let mut sink = vec![0u8; 4096];
        let _ = tcp.read(&mut sink).await;
        let body = "no websocket here";
        let response = format!(
            "HTTP/1.1 400 Bad Request\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let _ = tcp.write_all(response.as_bytes()).await;
    });

    let client = Endpoint::client(ClientOptions {
        address: "127.0.0.1".to_string(),
        port,
        ..Default::default()
    });
    let (events, mut client_rx) = channel_events();
    client.set_events(events);
    assert!(client.connect().await);

    assert!(matches!(
        next(&mut client_rx).await,
        Ev::UnexpectedHandshake(400)
    ));
    match next(&mut client_rx).await {
        Ev::Close(code, reason) => {
            assert_eq!(code, 1002);
            assert_eq!(reason, "Protocol error");
        }
        other => panic!("expected close, got {other:?}"),
    }
}

#[tokio::test]
async fn s7_ping_pong() {
    let (acceptor, mut server_rx) = start_server(u32::MAX);
    let (client, mut client_rx) = client_for(&acceptor);
    assert!(client.connect().await);
    assert!(matches!(next(&mut client_rx).await, Ev::Connected));
    assert!(matches!(next(&mut server_rx).await, Ev::Connected));

    assert!(client.ping());
    assert!(matches!(next(&mut server_rx).await, Ev::Ping));
    assert!(matches!(next(&mut client_rx).await, Ev::Pong));
}

#[tokio::test]
async fn server_frames_are_unmasked_on_the_wire() {
    let (acceptor, _server_rx) = start_server(u32::MAX);
    let port = acceptor.local_addr().unwrap().port();
    let endpoint_slot = std::sync::Arc::new(std::sync::Mutex::new(None));
    let slot = endpoint_slot.clone();
    let mut events = AcceptorEvents::default();
    events.on_connection = Box::new(move |endpoint, _| {
        *slot.lock().unwrap() = Some(endpoint.clone());
    });
    acceptor.set_events(events);

    let mut tcp = raw_upgrade(port).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let endpoint = endpoint_slot.lock().unwrap().clone().expect("endpoint");
    assert!(endpoint.write("hi"));

    let mut frame = [0u8; 4];
    tcp.read_exact(&mut frame).await.unwrap();
    assert_eq!(frame, [0x81, 0x02, b'h', b'i']);
}

#[tokio::test]
async fn backlog_cap_shuts_excess_connections() {
    let (acceptor, mut server_rx) = start_server(1);
    let (client, mut client_rx) = client_for(&acceptor);
    assert!(client.connect().await);
    assert!(matches!(next(&mut client_rx).await, Ev::Connected));
    assert!(matches!(next(&mut server_rx).await, Ev::Connected));
    assert_eq!(acceptor.connection_count(), 1);

    let port = acceptor.local_addr().unwrap().port();
    let mut tcp = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut buf = [0u8; 16];
    // the over-backlog socket is shut without an upgrade
    match tokio::time::timeout(Duration::from_secs(5), tcp.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => {}
        other => panic!("expected immediate shutdown, got {other:?}"),
    }
    expect_silence(&mut server_rx, 200).await;
    assert_eq!(acceptor.connection_count(), 1);
}

#[tokio::test]
async fn frames_arrive_in_submission_order() {
    let (acceptor, mut server_rx) = start_server(u32::MAX);
    let (client, mut client_rx) = client_for(&acceptor);
    assert!(client.connect().await);
    assert!(matches!(next(&mut client_rx).await, Ev::Connected));
    assert!(matches!(next(&mut server_rx).await, Ev::Connected));

    for i in 0..32 {
        assert!(client.write(&format!("msg-{i}")));
    }
    for i in 0..32 {
        match next(&mut server_rx).await {
            Ev::Message(payload, _) => {
                assert_eq!(String::from_utf8(payload).unwrap(), format!("msg-{i}"));
            }
            other => panic!("expected message, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn acceptor_close_tears_down_and_reopens() {
    let (acceptor, mut server_rx) = start_server(u32::MAX);
    let (client, mut client_rx) = client_for(&acceptor);
    assert!(client.connect().await);
    assert!(matches!(next(&mut client_rx).await, Ev::Connected));
    assert!(matches!(next(&mut server_rx).await, Ev::Connected));

    acceptor.close();
    match next(&mut server_rx).await {
        Ev::Close(code, _) => assert_eq!(code, 1000),
        other => panic!("expected close, got {other:?}"),
    }
    assert_eq!(acceptor.connection_count(), 0);
    assert!(acceptor.local_addr().is_none());

    assert!(acceptor.open());
    assert!(acceptor.local_addr().is_some());
    acceptor.close();
}

#[tokio::test]
async fn close_handshake_times_out_without_peer_echo() {
    // a server that upgrades correctly but never answers the close frame
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut tcp, _) = listener.accept().await.unwrap();
        let mut head = String::new();
        let mut byte = [0u8; 1];
        while !head.ends_with("\r\n\r\n") {
            if tcp.read(&mut byte).await.unwrap_or(0) == 0 {
                return;
            }
            head.push(byte[0] as char);
        }
        let key = head
            .lines()
            .find_map(|line| line.strip_prefix("Sec-WebSocket-Key: "))
            .unwrap()
            .trim();
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
            wsnet::handshake::accept_key(key)
        );
        let _ = tcp.write_all(response.as_bytes()).await;
        // hold the socket open, answering nothing
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let client = Endpoint::client(ClientOptions {
        address: "127.0.0.1".to_string(),
        port,
        idle_timeout_secs: 1,
        ..Default::default()
    });
    let (events, mut client_rx) = channel_events();
    client.set_events(events);
    assert!(client.connect().await);
    assert!(matches!(next(&mut client_rx).await, Ev::Connected));

    client.end(1000, "bye");
    match next(&mut client_rx).await {
        Ev::Close(code, reason) => {
            assert_eq!(code, 1000);
            assert_eq!(reason, "Timeout");
        }
        other => panic!("expected timeout close, got {other:?}"),
    }
}

#[tokio::test]
async fn echo_round_trip_through_event_wiring() {
    let acceptor = WsAcceptor::new(ServerOptions {
        address: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    });
    let mut events = AcceptorEvents::default();
    events.on_connection = Box::new(|endpoint, _request| {
        let peer = endpoint.clone();
        let mut endpoint_events = EndpointEvents::default();
        endpoint_events.on_message_received = Box::new(move |payload, is_binary| {
            if is_binary {
                peer.write_buffer(payload);
            } else {
                peer.write(&String::from_utf8_lossy(payload));
            }
        });
        endpoint.set_events(endpoint_events);
    });
    acceptor.set_events(events);
    assert!(acceptor.open());

    let (client, mut client_rx) = client_for(&acceptor);
    assert!(client.connect().await);
    assert!(matches!(next(&mut client_rx).await, Ev::Connected));

    assert!(client.write("marco"));
    match next(&mut client_rx).await {
        Ev::Message(payload, is_binary) => {
            assert_eq!(payload, b"marco");
            assert!(!is_binary);
        }
        other => panic!("expected echo, got {other:?}"),
    }
}
