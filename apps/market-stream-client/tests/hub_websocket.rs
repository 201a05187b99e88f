//! WebSocket transport tests against a local hub speaking the JSON protocol.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use market_stream_client::infrastructure::hub::messages::target;
use market_stream_client::infrastructure::hub::{HubCodec, KeepAliveConfig};
use market_stream_client::{
    HubConnectionConfig, HubEvent, HubRequest, PriceUpdate, RequestId, StreamTransport,
    TransportError, WebSocketTransport,
};
use rust_decimal_macros::dec;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

const RS: char = '\u{1e}';
const WAIT: Duration = Duration::from_secs(5);

type ServerSocket = WebSocketStream<TcpStream>;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/marketDataHub", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

/// Read text frames until one is a complete record and return it without the separator.
async fn next_record(socket: &mut ServerSocket) -> String {
    loop {
        let msg = timeout(WAIT, socket.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = msg {
            return text.trim_end_matches(RS).to_string();
        }
    }
}

/// Accept a connection and answer the handshake with `reply`.
async fn accept_with_reply(listener: &TcpListener, reply: &str) -> (ServerSocket, String) {
    let mut socket = accept(listener).await;
    let handshake = next_record(&mut socket).await;
    socket.send(Message::Text(format!("{reply}{RS}").into())).await.unwrap();
    (socket, handshake)
}

fn transport(url: String) -> WebSocketTransport {
    WebSocketTransport::new(HubConnectionConfig::new(url))
}

#[tokio::test]
async fn handshake_then_join_invocation() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let (mut socket, handshake) = accept_with_reply(&listener, "{}").await;
        let join = next_record(&mut socket).await;
        (handshake, join)
    });

    let link = transport(url).open().await.unwrap();
    link.outbound
        .send(HubRequest::JoinGroup {
            symbol: "GOOGL".to_string(),
        })
        .unwrap();

    let (handshake, join) = timeout(WAIT, server).await.unwrap().unwrap();

    let handshake: serde_json::Value = serde_json::from_str(&handshake).unwrap();
    assert_eq!(handshake["protocol"], "json");
    assert_eq!(handshake["version"], 1);

    let join: serde_json::Value = serde_json::from_str(&join).unwrap();
    assert_eq!(join["type"], 1);
    assert_eq!(join["target"], target::JOIN_MARKET_GROUP);
    assert_eq!(join["arguments"][0], "GOOGL");
    assert!(join.get("invocationId").is_none());
}

#[tokio::test]
async fn request_carries_correlation_id() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let (mut socket, _) = accept_with_reply(&listener, "{}").await;
        next_record(&mut socket).await
    });

    let link = transport(url).open().await.unwrap();
    let request_id = RequestId::new();
    link.outbound
        .send(HubRequest::RequestCurrentPrice {
            symbol: "TSLA".to_string(),
            request_id,
        })
        .unwrap();

    let sent = timeout(WAIT, server).await.unwrap().unwrap();
    let sent: serde_json::Value = serde_json::from_str(&sent).unwrap();
    assert_eq!(sent["target"], target::REQUEST_CURRENT_PRICE);
    assert_eq!(sent["invocationId"], request_id.to_string());
}

#[tokio::test]
async fn pushed_invocation_reaches_inbound() {
    let (listener, url) = bind().await;
    let update = PriceUpdate {
        symbol: "GOOGL".to_string(),
        price: dec!(2801.5),
        timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    };
    let frame = HubCodec::new()
        .encode_invocation(target::PRICE_UPDATE, &update)
        .unwrap();

    let server = tokio::spawn(async move {
        let (mut socket, _) = accept_with_reply(&listener, "{}").await;
        // ping and an unknown target are skipped
        socket
            .send(Message::Text(format!("{{\"type\":6}}{RS}").into()))
            .await
            .unwrap();
        socket
            .send(Message::Text(
                format!("{{\"type\":1,\"target\":\"Nope\",\"arguments\":[]}}{RS}{frame}").into(),
            ))
            .await
            .unwrap();
        socket
    });

    let mut link = transport(url).open().await.unwrap();
    let event = timeout(WAIT, link.inbound.recv()).await.unwrap().unwrap();
    assert_eq!(event, HubEvent::PriceUpdate(update));

    drop(server);
}

#[tokio::test]
async fn rejected_handshake_fails_open() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let (socket, _) =
            accept_with_reply(&listener, r#"{"error":"Requested protocol 'json' is not available."}"#)
                .await;
        socket
    });

    let err = transport(url).open().await.unwrap_err();
    assert!(matches!(err, TransportError::HandshakeFailed(ref reason) if reason.contains("not available")));

    drop(server);
}

#[tokio::test]
async fn close_frame_ends_inbound() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let (mut socket, _) = accept_with_reply(&listener, "{}").await;
        socket
            .send(Message::Text(
                format!("{{\"type\":7,\"error\":\"Server shutting down\"}}{RS}").into(),
            ))
            .await
            .unwrap();
        socket
    });

    let mut link = transport(url).open().await.unwrap();
    assert!(timeout(WAIT, link.inbound.recv()).await.unwrap().is_none());

    drop(server);
}

#[tokio::test]
async fn idle_link_sends_keepalive_ping() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let (mut socket, _) = accept_with_reply(&listener, "{}").await;
        next_record(&mut socket).await
    });

    let mut config = HubConnectionConfig::new(url);
    config.keepalive = KeepAliveConfig::new(Duration::from_millis(50), Duration::from_secs(10));
    let _link = WebSocketTransport::new(config).open().await.unwrap();

    let ping = timeout(WAIT, server).await.unwrap().unwrap();
    let ping: serde_json::Value = serde_json::from_str(&ping).unwrap();
    assert_eq!(ping["type"], 6);
}

#[tokio::test]
async fn silent_server_times_out() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let (mut socket, _) = accept_with_reply(&listener, "{}").await;
        // keep the socket open but never answer
        while let Some(Ok(_)) = socket.next().await {}
    });

    let mut config = HubConnectionConfig::new(url);
    config.keepalive = KeepAliveConfig::new(Duration::from_secs(10), Duration::from_millis(100));
    let mut link = WebSocketTransport::new(config).open().await.unwrap();

    assert!(timeout(WAIT, link.inbound.recv()).await.unwrap().is_none());

    server.abort();
}

#[tokio::test]
async fn dropping_link_closes_socket() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let (mut socket, _) = accept_with_reply(&listener, "{}").await;
        let mut saw_close_record = false;
        while let Ok(Some(Ok(msg))) = timeout(WAIT, socket.next()).await {
            match msg {
                Message::Text(text) if text.contains("\"type\":7") => saw_close_record = true,
                Message::Close(_) => break,
                _ => {}
            }
        }
        saw_close_record
    });

    let link = transport(url).open().await.unwrap();
    drop(link);

    assert!(timeout(WAIT, server).await.unwrap().unwrap());
}
