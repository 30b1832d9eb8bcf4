//! Integration tests for the Tokio adapter.
//!
//! These start a real server on an ephemeral port and talk to it with a
//! raw TCP client for HTTP and a tokio-tungstenite client for WebSocket.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use picoweb_protocol::response::html_page;
use picoweb_server::{ServerConfig, ServerHandle, TokioDriver};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a test server with an echo WebSocket handler and a JSON status page.
async fn start_test_server() -> (SocketAddr, ServerHandle, tokio::task::JoinHandle<()>) {
    let config = ServerConfig {
        port: 0,
        poll_interval_ms: 50,
        ..Default::default()
    };
    let mut driver = TokioDriver::new(config);

    let server = driver.server_mut();
    server.set_http_handler(|server, handle, request, _keep_open| match request.path() {
        "/status" => {
            let body = serde_json::json!({ "sessions": server.session_count() }).to_string();
            let mut response =
                b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n".to_vec();
            response.extend_from_slice(body.as_bytes());
            picoweb_protocol::response::set_html_length_header(&mut response);
            server.send_owned(handle, response).is_ok()
        }
        "/" => server.send_owned(handle, html_page("<h1>pico</h1>")).is_ok(),
        _ => false,
    });
    server.set_message_handler(|server, handle, text| {
        if let Some(rest) = text.strip_prefix("all:") {
            server.broadcast_message(rest);
        } else {
            let _ = server.send_message(handle, &format!("echo:{text}"));
        }
    });

    let addr = driver.start().expect("server starts");
    let addr = SocketAddr::from(([127, 0, 0, 1], addr.port()));
    let handle = driver.handle();
    let task = tokio::spawn(async move {
        let _ = driver.run().await;
    });

    (addr, handle, task)
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("server closes the connection")
        .unwrap();
    String::from_utf8(response).unwrap()
}

/// Connect a WebSocket client; browsers always send Origin, so do we.
async fn connect_client(addr: SocketAddr) -> Client {
    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("http://localhost"));
    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("Failed to connect");
    ws
}

async fn recv_text(ws: &mut Client) -> Result<String, &'static str> {
    loop {
        match timeout(Duration::from_secs(5), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return Ok(text),
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(Some(Ok(_))) => return Err("unexpected message type"),
            Ok(Some(Err(_))) => return Err("websocket error"),
            Ok(None) => return Err("stream ended"),
            Err(_) => return Err("timeout"),
        }
    }
}

#[tokio::test]
async fn test_http_page_and_close() {
    let (addr, handle, task) = start_test_server().await;

    let response = http_get(addr, "/").await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("<h1>pico</h1>"));

    handle.shutdown();
    let _ = task.await;
}

#[tokio::test]
async fn test_http_404() {
    let (addr, handle, task) = start_test_server().await;

    let response = http_get(addr, "/nothing-here").await;
    assert_eq!(response, "HTTP/1.0 404 Not Found\r\n\r\n");

    handle.shutdown();
    let _ = task.await;
}

#[tokio::test]
async fn test_status_json() {
    let (addr, handle, task) = start_test_server().await;

    let response = http_get(addr, "/status").await;
    let (head, body) = response.split_once("\r\n\r\n").unwrap();
    assert!(head.contains(&format!("Content-Length: {}", body.len())));
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["sessions"], 1);

    handle.shutdown();
    let _ = task.await;
}

#[tokio::test]
async fn test_websocket_echo() {
    let (addr, handle, task) = start_test_server().await;
    let mut ws = connect_client(addr).await;

    ws.send(Message::Text("hello".to_string())).await.unwrap();
    assert_eq!(recv_text(&mut ws).await.unwrap(), "echo:hello");

    let large = "x".repeat(5000);
    ws.send(Message::Text(large.clone())).await.unwrap();
    assert_eq!(recv_text(&mut ws).await.unwrap(), format!("echo:{large}"));

    ws.close(None).await.unwrap();
    handle.shutdown();
    let _ = task.await;
}

#[tokio::test]
async fn test_websocket_ping() {
    let (addr, handle, task) = start_test_server().await;
    let mut ws = connect_client(addr).await;

    ws.send(Message::Ping(b"beat".to_vec())).await.unwrap();
    let reply = timeout(Duration::from_secs(5), ws.next()).await.unwrap();
    match reply {
        Some(Ok(Message::Pong(payload))) => assert_eq!(payload, b"beat"),
        other => panic!("expected pong, got {other:?}"),
    }

    handle.shutdown();
    let _ = task.await;
}

#[tokio::test]
async fn test_broadcast_between_clients() {
    let (addr, handle, task) = start_test_server().await;
    let mut first = connect_client(addr).await;
    let mut second = connect_client(addr).await;

    first.send(Message::Text("all:news".to_string())).await.unwrap();
    assert_eq!(recv_text(&mut first).await.unwrap(), "news");
    assert_eq!(recv_text(&mut second).await.unwrap(), "news");

    // The same broadcast through a foreground handle.
    assert!(handle.broadcast("from outside"));
    assert_eq!(recv_text(&mut first).await.unwrap(), "from outside");
    assert_eq!(recv_text(&mut second).await.unwrap(), "from outside");

    handle.shutdown();
    let _ = task.await;
}

#[tokio::test]
async fn test_client_close_handshake() {
    let (addr, handle, task) = start_test_server().await;
    let mut ws = connect_client(addr).await;

    ws.close(None).await.unwrap();
    let next = timeout(Duration::from_secs(5), ws.next()).await.unwrap();
    match next {
        Some(Ok(Message::Close(_))) | None => {}
        other => panic!("expected close, got {other:?}"),
    }

    handle.shutdown();
    let _ = task.await;
}
