//! Connecting to remote servers.
//!
//! An [`Agent`] is the connection strategy for a request: any clonable
//! [`tower::Service`] which turns a [`Uri`] into a [`Stream`]. The default agent is a
//! [`Transport`], which picks plain TCP or TLS by the URL scheme. Agents are passed through
//! to the exchange unmodified; pooling and keep-alive policy are theirs to implement.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use http::Uri;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tower::util::{BoxCloneService, Oneshot};
use tower::ServiceExt as _;

use crate::BoxError;

pub mod duplex;
#[cfg(feature = "tls")]
mod tls;

#[cfg(feature = "tls")]
pub use self::tls::default_tls_config;

/// Errors from the default [`Transport`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// No transport exists for the scheme.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// The URI has no host to connect to.
    #[error("missing host")]
    NoHost,

    /// Connecting (or the TLS handshake) failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

trait Io: AsyncRead + AsyncWrite + Send + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + 'static {}

/// A connected byte stream, ready for an HTTP handshake.
pub struct Stream {
    inner: InnerStream,
}

enum InnerStream {
    Tcp(TcpStream),

    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),

    Boxed(Pin<Box<dyn Io>>),
}

impl Stream {
    /// Wrap any async byte stream.
    pub fn new<IO>(io: IO) -> Self
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self {
            inner: InnerStream::Boxed(Box::pin(io)),
        }
    }

    /// True if HTTP/2 was negotiated via ALPN.
    pub fn is_h2(&self) -> bool {
        match &self.inner {
            #[cfg(feature = "tls")]
            InnerStream::Tls(stream) => stream.get_ref().1.alpn_protocol() == Some(&b"h2"[..]),
            _ => false,
        }
    }
}

impl From<TcpStream> for Stream {
    fn from(stream: TcpStream) -> Self {
        Self {
            inner: InnerStream::Tcp(stream),
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            InnerStream::Tcp(stream) => f.debug_tuple("Tcp").field(stream).finish(),
            #[cfg(feature = "tls")]
            InnerStream::Tls(_) => f.debug_tuple("Tls").finish(),
            InnerStream::Boxed(_) => f.debug_tuple("Boxed").finish(),
        }
    }
}

macro_rules! delegate {
    ($self:ident, $stream:ident => $call:expr) => {
        match &mut $self.get_mut().inner {
            InnerStream::Tcp($stream) => {
                let $stream = Pin::new($stream);
                $call
            }
            #[cfg(feature = "tls")]
            InnerStream::Tls($stream) => {
                let $stream = Pin::new(&mut **$stream);
                $call
            }
            InnerStream::Boxed($stream) => {
                let $stream = $stream.as_mut();
                $call
            }
        }
    };
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        delegate!(self, stream => stream.poll_read(cx, buf))
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        delegate!(self, stream => stream.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        delegate!(self, stream => stream.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        delegate!(self, stream => stream.poll_shutdown(cx))
    }
}

#[derive(Debug, Clone)]
struct TransportConfig {
    nodelay: bool,

    #[cfg(feature = "tls")]
    tls: Option<Arc<rustls::ClientConfig>>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            nodelay: true,

            #[cfg(feature = "tls")]
            tls: None,
        }
    }
}

/// The default agent: connects over TCP, and over TLS for `https`.
///
/// Without the `tls` feature, `https` targets fail with
/// [`TransportError::UnsupportedScheme`].
#[derive(Debug, Clone, Default)]
pub struct Transport {
    config: Arc<TransportConfig>,
}

impl Transport {
    /// Create a transport with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `TCP_NODELAY` on new connections (default `true`).
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        Arc::make_mut(&mut self.config).nodelay = nodelay;
        self
    }

    /// Use `config` for TLS connections instead of [`default_tls_config`].
    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        Arc::make_mut(&mut self.config).tls = Some(config);
        self
    }
}

impl tower::Service<Uri> for Transport {
    type Response = Stream;
    type Error = TransportError;
    type Future = BoxFuture<'static, Result<Stream, TransportError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let config = self.config.clone();
        Box::pin(async move {
            let scheme = uri.scheme_str().unwrap_or("http").to_owned();
            let host = uri
                .host()
                .ok_or(TransportError::NoHost)?
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_owned();

            match scheme.as_str() {
                "http" => {
                    let port = uri.port_u16().unwrap_or(80);
                    let stream = connect_tcp(&config, &host, port).await?;
                    Ok(Stream::from(stream))
                }

                #[cfg(feature = "tls")]
                "https" => {
                    let port = uri.port_u16().unwrap_or(443);
                    let stream = connect_tcp(&config, &host, port).await?;
                    let tls = config
                        .tls
                        .clone()
                        .unwrap_or_else(|| Arc::new(default_tls_config()));
                    let stream = tls::connect(tls, &host, stream).await?;
                    Ok(Stream {
                        inner: InnerStream::Tls(Box::new(stream)),
                    })
                }

                _ => Err(TransportError::UnsupportedScheme(scheme)),
            }
        })
    }
}

async fn connect_tcp(config: &TransportConfig, host: &str, port: u16) -> io::Result<TcpStream> {
    tracing::trace!(%host, %port, "tcp connect");
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(config.nodelay)?;
    Ok(stream)
}

/// True if the default transport can serve `scheme`.
pub(crate) fn supports_scheme(scheme: &str) -> bool {
    match scheme {
        "http" => true,
        "https" => cfg!(feature = "tls"),
        _ => false,
    }
}

/// A clonable connection strategy shared by requests.
///
/// # Example
/// ```no_run
/// # use courier::transport::{Agent, Transport};
/// let agent = Agent::new(Transport::new().with_nodelay(false));
/// ```
#[derive(Clone)]
pub struct Agent {
    service: BoxCloneService<Uri, Stream, BoxError>,
}

impl Agent {
    /// Create an agent from a connecting service.
    pub fn new<S>(service: S) -> Self
    where
        S: tower::Service<Uri, Response = Stream> + Clone + Send + 'static,
        S::Error: Into<BoxError>,
        S::Future: Send + 'static,
    {
        Self {
            service: BoxCloneService::new(service.map_err(Into::into)),
        }
    }

    /// The returned future owns a clone of the service, so it does not borrow the agent.
    pub(crate) fn connect(&self, uri: Uri) -> Oneshot<BoxCloneService<Uri, Stream, BoxError>, Uri> {
        self.service.clone().oneshot(uri)
    }
}

impl Default for Agent {
    fn default() -> Self {
        Agent::new(Transport::default())
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent").finish()
    }
}

/// Which agent a request uses.
#[derive(Debug, Clone, Default)]
pub enum AgentOption {
    /// A fresh default [`Transport`].
    #[default]
    Default,

    /// A fresh default [`Transport`], asking the server to close the connection afterwards.
    Disabled,

    /// A caller-provided agent.
    Custom(Agent),
}

impl AgentOption {
    /// False if the request should ask for the connection to be closed.
    pub fn keep_alive(&self) -> bool {
        !matches!(self, AgentOption::Disabled)
    }

    /// True if a custom agent is in use, which then owns scheme handling.
    pub fn is_custom(&self) -> bool {
        matches!(self, AgentOption::Custom(_))
    }

    pub(crate) fn agent(&self) -> Agent {
        match self {
            AgentOption::Default | AgentOption::Disabled => Agent::default(),
            AgentOption::Custom(agent) => agent.clone(),
        }
    }
}

impl From<bool> for AgentOption {
    fn from(enabled: bool) -> Self {
        if enabled {
            AgentOption::Default
        } else {
            AgentOption::Disabled
        }
    }
}

impl From<Agent> for AgentOption {
    fn from(agent: Agent) -> Self {
        AgentOption::Custom(agent)
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tower::ServiceExt as _;

    use super::*;

    assert_impl_all!(Agent: Clone, Send);
    assert_impl_all!(Stream: AsyncRead, AsyncWrite, Send, Unpin);

    #[tokio::test]
    async fn tcp_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"ping").await.unwrap();
        });

        let uri: Uri = format!("http://{addr}/").parse().unwrap();
        let mut stream = Agent::default().connect(uri).await.unwrap();
        assert!(!stream.is_h2());

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_scheme() {
        let error = Transport::new()
            .oneshot("ftp://example.com/".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(error, TransportError::UnsupportedScheme(scheme) if scheme == "ftp"));
    }

    #[test]
    fn agent_option_from_bool() {
        assert!(AgentOption::from(true).keep_alive());
        assert!(!AgentOption::from(false).keep_alive());
        assert!(AgentOption::from(Agent::default()).is_custom());
        assert!(supports_scheme("http"));
        assert!(!supports_scheme("ws"));
    }
}
