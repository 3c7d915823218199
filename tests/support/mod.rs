//! In-process servers for integration tests.
#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Size of the `/large` response body.
pub const LARGE: usize = 256 * 1024;

/// How long `/slow` waits before answering.
pub const SLOW: Duration = Duration::from_millis(200);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A running test server, stopped when dropped.
pub struct Server {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Server {
    /// Serve [`route`] over HTTP/1 on a local port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve_connection(stream));
            }
        });
        Self { addr, task }
    }

    /// Accept connections and never answer.
    pub async fn silent() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        Self { addr, task }
    }

    /// Answer every connection with a response which promises more body than it sends.
    pub async fn truncated(head: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }

                    let response = format!(
                        "HTTP/1.1 200 OK\r\n\
                         content-type: application/json\r\n\
                         content-length: 100\r\n\r\n{head}"
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;

                    // Hold the socket until the client gives up on it.
                    while let Ok(n) = stream.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                    }
                });
            }
        });
        Self { addr, task }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Serve [`route`] over HTTP/1 on one connection.
pub async fn serve_connection<IO>(stream: IO)
where
    IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let service = hyper::service::service_fn(route);
    let conn =
        hyper::server::conn::http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    if let Err(error) = conn.await {
        tracing::debug!(%error, "test server connection error");
    }
}

/// Routes:
/// - `/missing`: 404 with body `missing`,
/// - `/bad-json`: 200 with a malformed JSON body,
/// - `/reason`: 200 with the reason phrase `Totally Fine`,
/// - `/large`: 200 with [`LARGE`] bytes of a repeating pattern,
/// - `/latin1`: 200 with `café` encoded as ISO-8859-1,
/// - `/slow`: 200 with body `late`, after [`SLOW`],
/// - anything else echoes the request: the body is returned as-is, and every request
///   header comes back prefixed with `x-request-`, along with `x-request-method` and
///   `x-request-uri`.
pub async fn route(
    request: http::Request<Incoming>,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let path = request.uri().path().to_owned();
    let response = http::Response::builder();
    let response = match path.as_str() {
        "/missing" => response.status(404).body(Full::from("missing")),
        "/bad-json" => response
            .header("content-type", "application/json")
            .body(Full::from("{\"a\": ")),
        "/reason" => {
            let mut response = response.body(Full::from("ok")).unwrap();
            response
                .extensions_mut()
                .insert(hyper::ext::ReasonPhrase::from_static(b"Totally Fine"));
            return Ok(response);
        }
        "/large" => response.body(Full::from(large_body())),
        "/slow" => {
            tokio::time::sleep(SLOW).await;
            response.body(Full::from("late"))
        }
        "/latin1" => response
            .header("content-type", "text/plain; charset=iso-8859-1")
            .body(Full::from(&b"caf\xe9"[..])),
        _ => return Ok(echo(request).await),
    };
    Ok(response.unwrap())
}

async fn echo(request: http::Request<Incoming>) -> http::Response<Full<Bytes>> {
    let (parts, body) = request.into_parts();

    let mut response = http::Response::builder()
        .header("x-request-method", parts.method.as_str())
        .header("x-request-uri", parts.uri.to_string());
    for (name, value) in &parts.headers {
        response = response.header(format!("x-request-{name}"), value.clone());
    }

    match body.collect().await {
        Ok(body) => response.body(Full::new(body.to_bytes())).unwrap(),
        Err(error) => http::Response::builder()
            .status(400)
            .body(Full::from(error.to_string()))
            .unwrap(),
    }
}

pub fn large_body() -> Bytes {
    (0..LARGE).map(|i| (i % 251) as u8).collect::<Vec<_>>().into()
}
