//! End-to-end tests for the HTTP keep-alive exchange, driving a real
//! connection over in-memory duplex streams and asserting on the exact
//! bytes that reach the client.

use async_trait::async_trait;
use hatchway::connection::HttpContext;
use hatchway::handler::HttpHandler;
use hatchway::protocol::HttpError;
use hatchway::{Config, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Feeds `input` to a connection served by `handler` and returns everything
/// the server wrote back.
async fn run(handler: impl HttpHandler + 'static, input: &[u8]) -> Vec<u8> {
    run_all(vec![Box::new(handler)], input).await
}

async fn run_all(handlers: Vec<Box<dyn HttpHandler>>, input: &[u8]) -> Vec<u8> {
    let server = Server::new(Config::default());
    server.set_handlers(handlers);

    let (client, conn) = tokio::io::duplex(1024 * 1024);
    let (server_read, server_write) = tokio::io::split(conn);
    let (mut client_read, mut client_write) = tokio::io::split(client);

    let input = input.to_vec();
    let client_io = async move {
        client_write.write_all(&input).await.unwrap();
        client_write.shutdown().await.unwrap();
        let mut output = Vec::new();
        client_read.read_to_end(&mut output).await.unwrap();
        output
    };

    let (_, output) = tokio::join!(server.serve_connection(server_read, server_write), client_io);
    output
}

struct HelloWorld;

#[async_trait]
impl HttpHandler for HelloWorld {
    async fn handle(&self, context: &mut HttpContext<'_>) -> Result<(), HttpError> {
        context.response().write_string("Hello World!").await
    }
}

struct EchoBody;

#[async_trait]
impl HttpHandler for EchoBody {
    async fn handle(&self, context: &mut HttpContext<'_>) -> Result<(), HttpError> {
        let body = context.body_to_string().await?;
        context.response().write_string(&format!("Echo: {body}")).await
    }
}

/// Responds without ever touching the request body.
struct IgnoresBody;

#[async_trait]
impl HttpHandler for IgnoresBody {
    async fn handle(&self, context: &mut HttpContext<'_>) -> Result<(), HttpError> {
        context.response().write_string("ok").await
    }
}

/// Never responds, passing the request down the chain.
struct PassesThrough;

#[async_trait]
impl HttpHandler for PassesThrough {
    async fn handle(&self, _context: &mut HttpContext<'_>) -> Result<(), HttpError> {
        Ok(())
    }
}

#[tokio::test]
async fn simple_get_request() {
    let output = run(HelloWorld, b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").await;

    assert_eq!(
        output,
        b"HTTP/1.1 200 \r\ncontent-length: 12\r\nconnection: keep-alive\r\n\r\nHello World!"
    );
}

#[tokio::test]
async fn keep_alive_yields_identical_responses() {
    let request = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let mut input = request.to_vec();
    input.extend_from_slice(request);

    let output = run(HelloWorld, &input).await;

    let expected =
        b"HTTP/1.1 200 \r\ncontent-length: 12\r\nconnection: keep-alive\r\n\r\nHello World!";
    let mut doubled = expected.to_vec();
    doubled.extend_from_slice(expected);
    assert_eq!(output, doubled);
}

#[tokio::test]
async fn post_request_with_body() {
    let output = run(
        EchoBody,
        b"POST /submit HTTP/1.1\r\nHost: example.com\r\nContent-Length: 11\r\n\r\nhello=world",
    )
    .await;

    assert_eq!(
        output,
        b"HTTP/1.1 200 \r\ncontent-length: 17\r\nconnection: keep-alive\r\n\r\nEcho: hello=world"
    );
}

#[tokio::test]
async fn chunked_request_body() {
    let output = run(
        EchoBody,
        b"POST /submit HTTP/1.1\r\nHost: example.com\r\nTransfer-Encoding: chunked\r\n\r\n6\r\nhello=\r\n5\r\nworld\r\n0\r\nX-Trailer: 1\r\n\r\n",
    )
    .await;

    assert_eq!(
        output,
        b"HTTP/1.1 200 \r\ncontent-length: 17\r\nconnection: keep-alive\r\n\r\nEcho: hello=world"
    );
}

#[tokio::test]
async fn missing_host_is_a_400() {
    let output = run(HelloWorld, b"GET / HTTP/1.1\r\n\r\n").await;

    assert_eq!(
        output,
        &b"HTTP/1.1 400 \r\ncontent-type: text/plain\r\ncontent-length: 54\r\nconnection: close\r\n\r\nMissing required Host header field in HTTP/1.1 request"[..]
    );
}

#[tokio::test]
async fn malformed_request_is_a_400() {
    let output = run(HelloWorld, b" GET / HTTP/1.1\r\n\r\n").await;

    let text = String::from_utf8(output).unwrap();
    assert!(text.starts_with("HTTP/1.1 400 \r\n"), "got: {text}");
    assert!(text.contains("connection: close"));
    assert!(text.ends_with("Empty method token"));
}

#[tokio::test]
async fn unhandled_request_is_a_404() {
    let output = run(PassesThrough, b"GET /nowhere HTTP/1.1\r\nHost: example.com\r\n\r\n").await;

    assert_eq!(
        output,
        b"HTTP/1.1 404 \r\ncontent-type: text/plain\r\ncontent-length: 10\r\nconnection: keep-alive\r\n\r\nNot found."
    );
}

#[tokio::test]
async fn handlers_chain_until_one_responds() {
    let output = run_all(
        vec![Box::new(PassesThrough), Box::new(HelloWorld)],
        b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n",
    )
    .await;

    assert!(output.ends_with(b"Hello World!"));
}

#[tokio::test]
async fn unread_body_is_drained_before_next_request() {
    let request =
        b"POST / HTTP/1.1\r\nHost: example.com\r\nContent-Length: 18\r\n\r\nthis-goes-nowhere!";
    let mut input = request.to_vec();
    input.extend_from_slice(request);

    let output = run(IgnoresBody, &input).await;

    let expected = b"HTTP/1.1 200 \r\ncontent-length: 2\r\nconnection: keep-alive\r\n\r\nok";
    let mut doubled = expected.to_vec();
    doubled.extend_from_slice(expected);
    assert_eq!(output, doubled);
}

#[tokio::test]
async fn unread_chunked_body_is_drained() {
    let request: &[u8] =
        b"POST / HTTP/1.1\r\nHost: example.com\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nblah\r\n0\r\n\r\n";
    let mut input = request.to_vec();
    input.extend_from_slice(request);

    let output = run(IgnoresBody, &input).await;

    let expected = b"HTTP/1.1 200 \r\ncontent-length: 2\r\nconnection: keep-alive\r\n\r\nok";
    let mut doubled = expected.to_vec();
    doubled.extend_from_slice(expected);
    assert_eq!(output, doubled);
}

#[tokio::test]
async fn http10_without_keep_alive_closes() {
    let output = run(HelloWorld, b"GET / HTTP/1.0\r\n\r\n").await;

    assert_eq!(output, b"HTTP/1.1 200 \r\ncontent-length: 12\r\nconnection: close\r\n\r\nHello World!");
}

#[tokio::test]
async fn http10_with_keep_alive_stays_open() {
    let request: &[u8] = b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n";
    let mut input = request.to_vec();
    input.extend_from_slice(request);

    let output = run(HelloWorld, &input).await;

    let expected =
        b"HTTP/1.1 200 \r\ncontent-length: 12\r\nconnection: keep-alive\r\n\r\nHello World!";
    let mut doubled = expected.to_vec();
    doubled.extend_from_slice(expected);
    assert_eq!(output, doubled);
}

#[tokio::test]
async fn connection_close_request_ends_the_pipeline() {
    let request: &[u8] = b"GET / HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n";
    let mut input = request.to_vec();
    // a second request that must never be answered
    input.extend_from_slice(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n");

    let output = run(HelloWorld, &input).await;

    assert_eq!(output, b"HTTP/1.1 200 \r\ncontent-length: 12\r\nconnection: close\r\n\r\nHello World!");
}

#[tokio::test]
async fn oversized_content_length_is_rejected() {
    let output = run(
        HelloWorld,
        b"POST / HTTP/1.1\r\nHost: example.com\r\nContent-Length: 10000001\r\n\r\n",
    )
    .await;

    let text = String::from_utf8(output).unwrap();
    assert!(text.starts_with("HTTP/1.1 400 \r\n"));
    assert!(text.contains("exceeds maximum acceptable size"));
}

struct LargePage(String);

#[async_trait]
impl HttpHandler for LargePage {
    async fn handle(&self, context: &mut HttpContext<'_>) -> Result<(), HttpError> {
        context.response().content_type("text/html");
        context.response().write_string(&self.0).await
    }
}

#[tokio::test]
async fn large_response_is_gzipped_for_accepting_clients() {
    let page = "<p>hello hello hello</p>".repeat(100);
    let output = run(
        LargePage(page.clone()),
        b"GET / HTTP/1.1\r\nHost: example.com\r\nAccept-Encoding: gzip, deflate\r\n\r\n",
    )
    .await;

    let head_end = output.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    let head = String::from_utf8_lossy(&output[..head_end]).to_string();
    assert!(head.contains("content-encoding: gzip"), "head: {head}");
    assert!(head.contains("transfer-encoding: chunked"));
    assert!(head.ends_with("\r\n\r\n"));

    let body = dechunk(&output[head_end..]);
    let mut decoder = flate2::read::GzDecoder::new(&body[..]);
    let mut decoded = String::new();
    std::io::Read::read_to_string(&mut decoder, &mut decoded).unwrap();
    assert_eq!(decoded, page);
}

#[tokio::test]
async fn chunked_responses_end_with_the_terminator() {
    let page = "data".repeat(500);
    let output =
        run(LargePage(page), b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").await;

    let head_end = output.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    assert!(String::from_utf8_lossy(&output[..head_end]).contains("transfer-encoding: chunked"));
    assert!(output.ends_with(b"0\r\n\r\n"));
}

/// Minimal chunked-transfer decoder for assertions.
fn dechunk(mut body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let line_end = body.windows(2).position(|w| w == b"\r\n").unwrap();
        let size = usize::from_str_radix(std::str::from_utf8(&body[..line_end]).unwrap(), 16).unwrap();
        body = &body[line_end + 2..];
        if size == 0 {
            break;
        }
        out.extend_from_slice(&body[..size]);
        body = &body[size + 2..];
    }
    out
}
