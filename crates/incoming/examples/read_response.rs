//! Serves one chunked response on a local port and reads it back through an `IncomingMessage`.
//!
//! The head is split off with a deliberately naive parser, since head parsing is not this crate's
//! job; the bytes read past the head are handed to the connection as prefetched input.

use std::error::Error;
use std::sync::Arc;

use http::{HeaderName, HeaderValue, StatusCode};
use micro_http_incoming::connection::Connection;
use micro_http_incoming::decoder::BodyDecoder;
use micro_http_incoming::engine::{Engine, Outcome};
use micro_http_incoming::incoming::{IncomingMessage, response_header_pool};
use micro_http_incoming::pool::Pooled;
use micro_http_incoming::protocol::ResponseHeader;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: text/plain\r\n\
Transfer-Encoding: chunked\r\n\
\r\n\
7\r\nMozilla\r\n\
9\r\nDeveloper\r\n\
7\r\nNetwork\r\n\
0\r\n\r\n";

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return;
        }
    };
    let addr = listener.local_addr().expect("bound listener has an address");
    info!(%addr, "start listening");

    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            // dribble the response out to show the decode suspending and resuming
            for piece in RESPONSE.chunks(16) {
                if stream.write_all(piece).await.is_err() {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        }
    });

    match read_response(TcpStream::connect(addr).await.expect("connect to local server")).await {
        Ok(body) => info!(body = %body, "received response body"),
        Err(e) => error!(cause = %e, "failed to read response"),
    }
}

async fn read_response(mut stream: TcpStream) -> Result<String, Box<dyn Error + Send + Sync>> {
    let mut buffer = Vec::new();
    let head_end = loop {
        if let Some(pos) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            break pos + 4;
        }
        let mut piece = [0u8; 64];
        let n = stream.read(&mut piece).await?;
        if n == 0 {
            return Err("connection closed inside the head".into());
        }
        buffer.extend_from_slice(&piece[..n]);
    };

    let head = parse_head(std::str::from_utf8(&buffer[..head_end])?)?;
    info!(status = %head.status(), reason = head.status_description(), "parsed head");

    let connection = Connection::with_prefetched(stream, &buffer[head_end..]);
    let message = IncomingMessage::pooled(head, connection, Arc::new(BodyDecoder::new()));

    let computation = Engine::current().start(message.read_body_to_string_async());
    match computation.await {
        Outcome::Completed(body) => Ok(body),
        Outcome::Failed(e) => Err(e.into()),
        Outcome::Cancelled => Err("body decode cancelled".into()),
    }
}

/// Parses the head into a recycled one from the shared head pool.
fn parse_head(text: &str) -> Result<Pooled<ResponseHeader>, Box<dyn Error + Send + Sync>> {
    let mut lines = text.split("\r\n").filter(|line| !line.is_empty());
    let status_line = lines.next().ok_or("empty head")?;

    let mut parts = status_line.splitn(3, ' ');
    let _version = parts.next();
    let status = StatusCode::from_bytes(parts.next().ok_or("missing status code")?.as_bytes())?;
    let reason = parts.next().unwrap_or_default();

    let mut head = response_header_pool().acquire();
    head.set_status(status);
    head.set_status_description(reason);
    for line in lines {
        let (name, value) = line.split_once(':').ok_or("malformed header line")?;
        head.headers_mut().append(HeaderName::from_bytes(name.trim().as_bytes())?, HeaderValue::from_str(value.trim())?);
    }

    Ok(head)
}
