//! The network connection primitive.
//!
//! A [`Transport`] opens one [`Connection`] per exchange. The executor drives
//! the connection through a fixed order: configure (method, headers,
//! timeouts, tls), [`Connection::connect`], write the body,
//! [`Connection::response_head`] and finally [`Connection::into_body`].

use std::fmt;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
use url::Url;

use crate::request::Proxy;
use crate::Error;

mod body;
mod parser;
mod tcp;

#[cfg(feature = "tls")]
mod tls;

pub use tcp::TcpTransport;

#[cfg(feature = "tls")]
pub use tls::RustlsConnector;

pub(crate) use parser::try_parse_response;

/// Opens connections.
pub trait Transport: fmt::Debug + Send + Sync {
    /// Prepare a connection to `url`, possibly through a proxy.
    ///
    /// No I/O happens until [`Connection::connect`].
    fn open(&self, url: &Url, proxy: Option<&Proxy>) -> Result<Box<dyn Connection>, Error>;
}

/// One request/response exchange.
pub trait Connection: Send {
    /// Set the request method.
    ///
    /// Returns `false` if the transport can't send this method.
    fn set_method(&mut self, method: &Method) -> bool;

    /// The method the connection will send.
    fn method(&self) -> &Method;

    /// Set a request header, replacing an earlier value for the same name.
    fn set_header(&mut self, name: HeaderName, value: HeaderValue);

    fn set_timeouts(&mut self, connect: Option<Duration>, read: Option<Duration>);

    /// TLS configuration used for https.
    ///
    /// Without a connector the transport falls back on its own default.
    fn set_tls(
        &mut self,
        connector: Option<Arc<dyn TlsConnector>>,
        verifier: Arc<dyn HostnameVerifier>,
    );

    /// Never follow redirects inside the transport.
    fn disable_auto_redirect(&mut self);

    /// Open the socket and do the TLS handshake.
    fn connect(&mut self) -> Result<(), Error>;

    /// Write (part of) the request body.
    fn write_body(&mut self, data: &[u8]) -> Result<(), Error>;

    /// End the request. Calling this more than once is a no-op.
    fn finish_request(&mut self) -> Result<(), Error>;

    /// Read the response status and headers.
    ///
    /// Finishes the request if that wasn't done yet. The head is read once
    /// and then returned on every call.
    fn response_head(&mut self) -> Result<&ResponseHead, Error>;

    /// The response body, decoded from the transfer encoding.
    fn into_body(self: Box<Self>) -> Result<Box<dyn Read + Send>, Error>;
}

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: Version,
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
}

/// A bidirectional byte stream.
pub trait ReadWrite: Read + Write + Send {}

impl<T: Read + Write + Send> ReadWrite for T {}

/// Socket factory for https.
pub trait TlsConnector: Send + Sync {
    /// Wrap the connected `stream` in TLS for `host`.
    fn connect(&self, host: &str, stream: TcpStream) -> Result<TlsStream, Error>;
}

/// A handshaken TLS session.
pub struct TlsStream {
    pub stream: Box<dyn ReadWrite>,
    /// The host name the peer certificate was verified for.
    pub peer_host: String,
}

/// Decides whether a TLS session is acceptable for the requested host.
pub trait HostnameVerifier: Send + Sync {
    fn verify(&self, requested: &str, peer: &str) -> bool;
}

/// Case insensitive exact match of the host names.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultVerifier;

impl HostnameVerifier for DefaultVerifier {
    fn verify(&self, requested: &str, peer: &str) -> bool {
        requested.eq_ignore_ascii_case(peer)
    }
}

impl fmt::Debug for dyn TlsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TlsConnector")
    }
}

impl fmt::Debug for dyn HostnameVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostnameVerifier")
    }
}

impl fmt::Debug for TlsStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsStream")
            .field("peer_host", &self.peer_host)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_verifier() {
        let v = DefaultVerifier;
        assert!(v.verify("Example.COM", "example.com"));
        assert!(!v.verify("example.com", "www.example.com"));
    }
}
