//! Minimal HTTP/1.1 responder for tests.

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use url::Url;

/// Request as received on the wire.
#[derive(Debug, Clone)]
pub(crate) struct Request {
    pub method: String,
    /// Path including the query string.
    pub target: String,
    pub raw: String,
    pub body: String,
}

/// Answer `count` requests with `respond`, one connection each, and return
/// the received requests once done.
pub(crate) async fn serve<F>(count: usize, mut respond: F) -> (Url, JoinHandle<Vec<Request>>)
where
    F: FnMut(&Request) -> (u16, String) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();

    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();
        for _ in 0..count {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let (status, body) = respond(&request);
            let response = format!(
                "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            requests.push(request);
        }
        requests
    });
    (url, handle)
}

/// Answer requests with fixed responses, in order.
pub(crate) async fn serve_canned(
    responses: Vec<(u16, &'static str)>,
) -> (Url, JoinHandle<Vec<Request>>) {
    let count = responses.len();
    let mut responses = responses.into_iter();
    serve(count, move |_| {
        let (status, body) = responses.next().unwrap();
        (status, body.to_string())
    })
    .await
}

async fn read_request(stream: &mut TcpStream) -> Request {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        raw.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&raw).into_owned();
        if let Some(head_end) = text.find("\r\n\r\n") {
            let length = text[..head_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            if raw.len() >= head_end + 4 + length || n == 0 {
                let mut request_line = text.split_whitespace();
                return Request {
                    method: request_line.next().unwrap_or_default().to_string(),
                    target: request_line.next().unwrap_or_default().to_string(),
                    body: text[head_end + 4..].to_string(),
                    raw: text,
                };
            }
        } else if n == 0 {
            panic!("connection closed before the request head was complete");
        }
    }
}
