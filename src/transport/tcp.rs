use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderName, HeaderValue, Method};
use url::Url;

use super::body::{BodyReader, BodyWriter};
use super::{Connection, DefaultVerifier, HostnameVerifier, ReadWrite};
use super::{ResponseHead, TlsConnector, Transport};
use crate::request::Proxy;
use crate::util::FillMoreBuffer;
use crate::Error;

/// Response heads larger than this are refused.
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Blocking HTTP/1.1 over TCP, with TLS for https.
///
/// Every connection sends `connection: close` and is used for one exchange.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn open(&self, url: &Url, proxy: Option<&Proxy>) -> Result<Box<dyn Connection>, Error> {
        if url.host_str().is_none() {
            return Err(Error::BadUrl(format!("no host in {}", url)));
        }

        Ok(Box::new(HttpConnection::new(url, proxy)))
    }
}

struct HttpConnection {
    url: Url,
    proxy: Option<Proxy>,
    method: Method,
    headers: Vec<(HeaderName, HeaderValue)>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    tls: Option<Arc<dyn TlsConnector>>,
    verifier: Arc<dyn HostnameVerifier>,
    stream: Option<Box<dyn ReadWrite>>,
    /// Set once the prelude is written.
    writer: Option<BodyWriter>,
    finished: bool,
    input: Option<FillMoreBuffer<Box<dyn ReadWrite>>>,
    head: Option<ResponseHead>,
}

impl HttpConnection {
    fn new(url: &Url, proxy: Option<&Proxy>) -> Self {
        HttpConnection {
            url: url.clone(),
            proxy: proxy.cloned(),
            method: Method::GET,
            headers: vec![],
            connect_timeout: None,
            read_timeout: None,
            tls: None,
            verifier: Arc::new(DefaultVerifier),
            stream: None,
            writer: None,
            finished: false,
            input: None,
            head: None,
        }
    }

    fn host(&self) -> &str {
        // checked in open()
        self.url.host_str().unwrap_or_default()
    }

    fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }

    fn is_https(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// `host[:port]` where the port is left out when it's the default.
    fn host_header(&self) -> String {
        match self.url.port() {
            Some(port) => format!("{}:{}", self.host(), port),
            None => self.host().to_string(),
        }
    }

    fn target(&self) -> String {
        // Plain http through a proxy uses the absolute form.
        if self.proxy.is_some() && !self.is_https() {
            let mut url = self.url.clone();
            url.set_fragment(None);
            return url.to_string();
        }

        match self.url.query() {
            Some(q) => format!("{}?{}", self.url.path(), q),
            None => self.url.path().to_string(),
        }
    }

    fn open_tcp(&self) -> Result<TcpStream, Error> {
        let addrs: Vec<SocketAddr> = match &self.proxy {
            Some(p) => (p.host(), p.port()).to_socket_addrs()?.collect(),
            None => self.url.socket_addrs(|| None)?,
        };

        let mut last_err = None;

        for addr in addrs {
            let result = match self.connect_timeout {
                Some(t) => TcpStream::connect_timeout(&addr, t),
                None => TcpStream::connect(addr),
            };

            match result {
                Ok(tcp) => {
                    debug!("Connected TCP: {}", addr);
                    tcp.set_read_timeout(self.read_timeout)?;
                    tcp.set_write_timeout(self.read_timeout)?;
                    tcp.set_nodelay(true)?;
                    return Ok(tcp);
                }
                Err(e) => {
                    debug!("Failed to connect {}: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        let err = last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", self.host()))
        });

        Err(err.into())
    }

    /// Ask the proxy for a tunnel to the target.
    fn tunnel(&self, mut tcp: TcpStream) -> Result<TcpStream, Error> {
        let authority = format!("{}:{}", self.host(), self.port());

        let prelude = format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n\r\n", authority);
        tcp.write_all(prelude.as_bytes())?;
        tcp.flush()?;

        let head = {
            let mut input = FillMoreBuffer::new(&tcp);
            read_head(&mut input)?
        };

        if !head.status.is_success() {
            return Err(Error::ProxyTunnel(head.status.as_u16()));
        }

        debug!("Proxy tunnel open: {}", authority);

        Ok(tcp)
    }

    fn handshake(&self, tcp: TcpStream) -> Result<Box<dyn ReadWrite>, Error> {
        let connector = match &self.tls {
            Some(c) => c.clone(),
            None => default_tls()?,
        };

        let host = self.host();
        let tls = connector.connect(host, tcp)?;

        if !self.verifier.verify(host, &tls.peer_host) {
            return Err(Error::HostnameMismatch {
                requested: host.to_string(),
                peer: tls.peer_host,
            });
        }

        Ok(tls.stream)
    }

    fn send_prelude(&mut self) -> Result<(), Error> {
        if self.writer.is_some() {
            return Ok(());
        }

        let mut buf = Vec::with_capacity(1024);

        write!(buf, "{} {} HTTP/1.1\r\n", self.method, self.target())?;

        let has_host = self.headers.iter().any(|(n, _)| *n == http::header::HOST);
        if !has_host {
            write!(buf, "host: {}\r\n", self.host_header())?;
        }

        for (name, value) in &self.headers {
            if *name == http::header::CONNECTION {
                continue;
            }
            write!(buf, "{}: ", name)?;
            buf.write_all(value.as_bytes())?;
            write!(buf, "\r\n")?;
        }

        write!(buf, "connection: close\r\n\r\n")?;

        let writer = BodyWriter::for_request(
            self.headers
                .iter()
                .filter_map(|(n, v)| Some((n.as_str(), v.to_str().ok()?))),
        )?;

        trace!("Prelude: {:?}", String::from_utf8_lossy(&buf));

        let stream = self
            .stream
            .as_mut()
            .ok_or(Error::OutOfOrder("request written before connect"))?;
        stream.write_all(&buf)?;

        self.writer = Some(writer);

        Ok(())
    }
}

#[cfg(feature = "tls")]
fn default_tls() -> Result<Arc<dyn TlsConnector>, Error> {
    super::tls::RustlsConnector::shared()
}

#[cfg(not(feature = "tls"))]
fn default_tls() -> Result<Arc<dyn TlsConnector>, Error> {
    Err(Error::TlsUnavailable)
}

/// Read until a complete response head is parsed. The head is consumed
/// from the buffer, leaving any body bytes.
fn read_head<R: Read>(input: &mut FillMoreBuffer<R>) -> Result<ResponseHead, Error> {
    loop {
        if let Some((used, head)) = super::try_parse_response(input.buffer())? {
            input.consume(used);
            return Ok(head);
        }

        if input.buffer().len() > MAX_HEAD_SIZE {
            return Err(Error::ResponseHeadTooLarge);
        }

        if input.is_ended() {
            return Err(Error::IncompleteResponse);
        }

        input.fill_more()?;
    }
}

impl Connection for HttpConnection {
    fn set_method(&mut self, method: &Method) -> bool {
        // Every token is a valid verb on the wire.
        self.method = method.clone();
        true
    }

    fn method(&self) -> &Method {
        &self.method
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        match self.headers.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    fn set_timeouts(&mut self, connect: Option<Duration>, read: Option<Duration>) {
        self.connect_timeout = connect;
        self.read_timeout = read;
    }

    fn set_tls(
        &mut self,
        connector: Option<Arc<dyn TlsConnector>>,
        verifier: Arc<dyn HostnameVerifier>,
    ) {
        if connector.is_some() {
            self.tls = connector;
        }
        self.verifier = verifier;
    }

    fn disable_auto_redirect(&mut self) {
        // This transport never follows redirects.
    }

    fn connect(&mut self) -> Result<(), Error> {
        if self.stream.is_some() || self.input.is_some() {
            return Err(Error::OutOfOrder("connect called twice"));
        }

        let mut tcp = self.open_tcp()?;

        if self.is_https() && self.proxy.is_some() {
            tcp = self.tunnel(tcp)?;
        }

        let stream: Box<dyn ReadWrite> = if self.is_https() {
            self.handshake(tcp)?
        } else {
            Box::new(tcp)
        };

        self.stream = Some(stream);

        Ok(())
    }

    fn write_body(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.finished {
            return Err(Error::OutOfOrder("body written after request finished"));
        }

        self.send_prelude()?;

        let (Some(writer), Some(stream)) = (&mut self.writer, &mut self.stream) else {
            return Err(Error::OutOfOrder("request written before connect"));
        };

        writer.write(data, stream)
    }

    fn finish_request(&mut self) -> Result<(), Error> {
        if self.finished {
            return Ok(());
        }

        self.send_prelude()?;

        let (Some(writer), Some(stream)) = (&self.writer, &mut self.stream) else {
            return Err(Error::OutOfOrder("request written before connect"));
        };

        writer.finish(stream)?;
        stream.flush()?;

        self.finished = true;

        Ok(())
    }

    fn response_head(&mut self) -> Result<&ResponseHead, Error> {
        if self.head.is_none() {
            self.finish_request()?;

            let stream = self
                .stream
                .take()
                .ok_or(Error::OutOfOrder("response read before connect"))?;
            let mut input = FillMoreBuffer::new(stream);

            let head = loop {
                let head = read_head(&mut input)?;

                // 101 is final, but we don't do upgrades so it's an error
                // further up.
                if head.status.is_informational() && head.status.as_u16() != 101 {
                    trace!("Skip informational response: {}", head.status);
                    continue;
                }

                break head;
            };

            debug!("Response: {} {:?}", head.status, head.version);

            self.input = Some(input);
            self.head = Some(head);
        }

        self.head
            .as_ref()
            .ok_or(Error::OutOfOrder("response head missing"))
    }

    fn into_body(mut self: Box<Self>) -> Result<Box<dyn Read + Send>, Error> {
        self.response_head()?;

        let (Some(head), Some(input)) = (self.head.take(), self.input.take()) else {
            return Err(Error::OutOfOrder("response head missing"));
        };

        let reader =
            BodyReader::for_response(head.version, &self.method, head.status, &head.headers)?;

        trace!("Body mode: {:?}", reader);

        Ok(Box::new(BodyStream { input, reader }))
    }
}

impl fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnection")
            .field("url", &self.url.as_str())
            .field("method", &self.method)
            .field("connected", &(self.stream.is_some() || self.input.is_some()))
            .finish()
    }
}

/// Response body read off the connection.
struct BodyStream {
    input: FillMoreBuffer<Box<dyn ReadWrite>>,
    reader: BodyReader,
}

impl Read for BodyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if self.reader.is_ended() {
                return Ok(0);
            }

            let (input_used, output_used) = self
                .reader
                .read(self.input.buffer(), buf)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

            self.input.consume(input_used);

            if output_used > 0 {
                return Ok(output_used);
            }

            // Chunk framing can use input without producing output.
            if input_used > 0 {
                continue;
            }

            if self.input.is_ended() {
                if self.reader.is_close_delimited() {
                    return Ok(0);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before end of body",
                ));
            }

            self.input.fill_more()?;
        }
    }
}
