//! Shared mock backends for integration testing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Start a mock backend that answers every request with a fixed body.
///
/// The connection is kept alive so client-side pooling is observable.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    let (addr, _) = start_counting_backend(body).await;
    addr
}

/// Start a keep-alive mock backend that counts accepted TCP connections.
pub async fn start_counting_backend(body: &'static str) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));

    let counter = connections.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve_connection(socket, body.to_string(), None));
                }
                Err(_) => break,
            }
        }
    });

    (addr, connections)
}

/// Start a mock backend that records the raw header block of every request.
pub async fn start_capturing_backend(
    body: &'static str,
) -> (SocketAddr, Arc<std::sync::Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let captured = Arc::new(std::sync::Mutex::new(Vec::new()));

    let sink = captured.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    tokio::spawn(serve_connection(
                        socket,
                        body.to_string(),
                        Some(sink.clone()),
                    ));
                }
                Err(_) => break,
            }
        }
    });

    (addr, captured)
}

/// Minimal HTTP/1.1 keep-alive loop: read one header block, answer, repeat.
///
/// Requests with bodies are not supported; the mocks only see GETs.
async fn serve_connection(
    mut socket: TcpStream,
    body: String,
    capture: Option<Arc<std::sync::Mutex<Vec<String>>>>,
) {
    let mut buf = Vec::new();
    loop {
        let mut chunk = [0u8; 4096];
        let header_end = loop {
            if let Some(pos) = find_header_end(&buf) {
                break pos;
            }
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        };

        if let Some(sink) = &capture {
            let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
            sink.lock().unwrap().push(headers);
        }
        buf.drain(..header_end + 4);

        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: text/plain\r\n\r\n{}",
            body.len(),
            body
        );
        if socket.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
