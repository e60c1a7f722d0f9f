use std::net::TcpStream;
use std::sync::{Arc, OnceLock};

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};

use super::{TlsConnector, TlsStream};
use crate::Error;

/// [`TlsConnector`] using rustls.
#[derive(Debug, Clone)]
pub struct RustlsConnector {
    config: Arc<ClientConfig>,
}

impl RustlsConnector {
    /// Use a caller provided rustls configuration.
    pub fn new(config: Arc<ClientConfig>) -> Self {
        RustlsConnector { config }
    }

    /// Verify servers against the Mozilla root certificates.
    pub fn with_webpki_roots() -> Result<Self, Error> {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.into(),
        };

        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(RustlsConnector::new(Arc::new(config)))
    }

    /// The process wide default, created on first use.
    pub(crate) fn shared() -> Result<Arc<dyn TlsConnector>, Error> {
        static DEFAULT: OnceLock<Result<Arc<RustlsConnector>, Error>> = OnceLock::new();

        match DEFAULT.get_or_init(|| Self::with_webpki_roots().map(Arc::new)) {
            Ok(v) => Ok(v.clone()),
            Err(e) => Err(e.clone()),
        }
    }
}

impl TlsConnector for RustlsConnector {
    fn connect(&self, host: &str, mut stream: TcpStream) -> Result<TlsStream, Error> {
        let name = ServerName::try_from(host.to_string()).map_err(|e| Error::Tls(e.to_string()))?;

        let mut conn = ClientConnection::new(self.config.clone(), name)
            .map_err(|e| Error::Tls(e.to_string()))?;

        // Handshake up front so certificate failures surface from connect().
        while conn.is_handshaking() {
            conn.complete_io(&mut stream)
                .map_err(|e| Error::Tls(e.to_string()))?;
        }

        debug!("TLS handshake done: {}", host);

        Ok(TlsStream {
            stream: Box::new(StreamOwned::new(conn, stream)),
            peer_host: host.to_string(),
        })
    }
}
