//! TLS for the default transport.

use std::io;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// Get a default TLS client configuration by loading the platform's native certificates.
///
/// ALPN offers HTTP/2 and HTTP/1.1; the exchange follows whichever the server picks.
pub fn default_tls_config() -> ClientConfig {
    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        tracing::warn!(%error, "could not load platform certificate");
    }

    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::trace!(%added, %ignored, "loaded platform certificates");

    let mut cfg = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    cfg.alpn_protocols.push(b"h2".to_vec());
    cfg.alpn_protocols.push(b"http/1.1".to_vec());
    cfg
}

pub(super) async fn connect(
    config: Arc<ClientConfig>,
    host: &str,
    stream: TcpStream,
) -> io::Result<TlsStream<TcpStream>> {
    let domain = ServerName::try_from(host.to_owned())
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;

    tracing::trace!(%host, "tls handshake");
    tokio_rustls::TlsConnector::from(config)
        .connect(domain, stream)
        .await
}
