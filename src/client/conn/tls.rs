//! TLS for `https` endpoints.

use std::io;
use std::sync::{Arc, OnceLock};

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::Instrument as _;

use super::stream::Stream;

/// Client configuration trusting the platform's root certificates.
///
/// Only `http/1.1` is offered over ALPN. Certificates the platform store
/// fails to load are skipped with a warning.
pub fn default_tls_config() -> Arc<ClientConfig> {
    static CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();

    CONFIG
        .get_or_init(|| {
            let mut roots = rustls::RootCertStore::empty();
            let native = rustls_native_certs::load_native_certs();
            for error in &native.errors {
                tracing::warn!(%error, "could not load platform certificate");
            }
            let (added, ignored) = roots.add_parsable_certificates(native.certs);
            tracing::trace!(added, ignored, "loaded platform root certificates");

            let mut cfg = ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
            cfg.alpn_protocols.push(b"http/1.1".to_vec());
            Arc::new(cfg)
        })
        .clone()
}

/// Run a TLS handshake for `domain` over an established TCP stream.
pub(crate) async fn handshake(
    stream: TcpStream,
    domain: &str,
    config: Arc<ClientConfig>,
) -> io::Result<Stream> {
    let server_name = ServerName::try_from(domain.to_owned())
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;

    tracing::trace!(%domain, "tls handshake starting");
    let stream = TlsConnector::from(config)
        .connect(server_name, stream)
        .instrument(tracing::trace_span!("tls", %domain))
        .await?;
    tracing::trace!(%domain, "tls handshake complete");
    Ok(Stream::Tls(Box::new(stream)))
}
