use std::fmt;
use std::io::{self, Cursor, Read};
use std::sync::{Arc, Mutex, PoisonError};

use encoding_rs::{Encoding, UTF_8};
use http::{HeaderMap, Method, StatusCode, Version};
use serde::de::DeserializeOwned;
use url::Url;

use crate::cookie::CookieJar;
use crate::executor::{Executor, Hop};
use crate::ext::HeaderMapExt;
use crate::iter::{ChunkIter, LineIter};
use crate::redirect::{self, Resolution};
use crate::util::Memo;
use crate::{Error, Request};

/// The response to a [`Request`].
///
/// Creating a response does no I/O. The first access of a field connects,
/// follows any redirects and caches the outcome, also when that outcome is
/// an error. Every field is computed at most once.
///
/// When redirects are followed, this response keeps the status, headers and
/// body of its own (first) hop. The later hops are in [`Response::history`],
/// with the final response last.
pub struct Response {
    request: Request,
    executor: Arc<Executor>,
    carried: CookieJar,
    followed: usize,
    hop: Memo<Hop>,
    content: Memo<Vec<u8>>,
    text: Memo<String>,
    encoding: Mutex<Option<&'static Encoding>>,
}

impl Response {
    pub(crate) fn new(request: Request, executor: Arc<Executor>) -> Self {
        Self::follow_up(request, executor, CookieJar::new(), 0)
    }

    fn follow_up(
        request: Request,
        executor: Arc<Executor>,
        carried: CookieJar,
        followed: usize,
    ) -> Self {
        Response {
            request,
            executor,
            carried,
            followed,
            hop: Memo::new(),
            content: Memo::new(),
            text: Memo::new(),
            encoding: Mutex::new(None),
        }
    }

    fn hop(&self) -> Result<&Hop, Error> {
        self.hop.get_or_try_init(|| {
            let mut hop = self
                .executor
                .execute(&self.request, &self.carried, self.followed)?;

            let resolution = redirect::resolve(&self.request, &hop)?;

            if let Resolution::Redirected(next) = resolution {
                let follow = Response::follow_up(
                    next,
                    self.executor.clone(),
                    hop.jar.clone(),
                    self.followed + 1,
                );
                follow.evaluate()?;

                let follow = Arc::new(follow);

                hop.history = Some(follow.clone())
                    .into_iter()
                    .chain(follow.history()?.iter().cloned())
                    .collect();
            }

            Ok(hop)
        })
    }

    /// Connect and, unless streaming, download the body.
    fn evaluate(&self) -> Result<(), Error> {
        self.hop()?;
        if !self.request.is_stream() {
            self.content()?;
        }
        Ok(())
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn status(&self) -> Result<StatusCode, Error> {
        Ok(self.hop()?.status)
    }

    /// The reason phrase of the status line, which can be empty.
    pub fn reason(&self) -> Result<&str, Error> {
        Ok(&self.hop()?.reason)
    }

    pub fn version(&self) -> Result<Version, Error> {
        Ok(self.hop()?.version)
    }

    /// Response headers. Repeated headers are joined with `, `, apart from
    /// `set-cookie` which keeps one entry per header.
    pub fn headers(&self) -> Result<&HeaderMap, Error> {
        Ok(&self.hop()?.headers)
    }

    /// A header value, if it is a valid string.
    pub fn header(&self, name: &str) -> Result<Option<&str>, Error> {
        Ok(self.headers()?.get_str(name))
    }

    /// The url of this response's hop.
    pub fn url(&self) -> Result<&Url, Error> {
        Ok(&self.hop()?.url)
    }

    /// Cookies sent and received on this hop.
    pub fn cookies(&self) -> Result<&CookieJar, Error> {
        Ok(&self.hop()?.jar)
    }

    /// The responses of the redirects followed from this one, in order.
    pub fn history(&self) -> Result<&[Arc<Response>], Error> {
        Ok(&self.hop()?.history)
    }

    /// The body as a stream, decompressed according to `content-encoding`.
    ///
    /// The stream can be obtained once. It is also what [`Response::content`]
    /// reads from, so taking it first leaves the content unavailable.
    pub fn raw(&self) -> Result<RawStream, Error> {
        let hop = self.hop()?;

        let body = hop.take_body().ok_or(Error::Consumed("raw stream"))?;

        let no_body = self.request.method() == Method::HEAD
            || matches!(hop.status.as_u16(), 204 | 304)
            || hop.headers.get_str("content-length").map(str::trim) == Some("0");

        let coding = if no_body {
            None
        } else {
            hop.headers.get_str("content-encoding")
        };

        Ok(RawStream::new(body, coding))
    }

    /// The entire body. Read once and then cached.
    pub fn content(&self) -> Result<&[u8], Error> {
        self.content
            .get_or_try_init(|| {
                let mut raw = self.raw()?;
                let mut buf = Vec::new();
                raw.read_to_end(&mut buf)?;
                trace!("Read content: {}", buf.len());
                Ok(buf)
            })
            .map(|v| &v[..])
    }

    /// The body decoded with [`Response::encoding`].
    pub fn text(&self) -> Result<&str, Error> {
        self.text
            .get_or_try_init(|| {
                let encoding = self.encoding()?;
                let content = self.content()?;
                let (text, _) = encoding.decode_without_bom_handling(content);
                Ok(text.into_owned())
            })
            .map(|v| v.as_str())
    }

    /// The encoding used for [`Response::text`].
    ///
    /// Either the one set with [`Response::set_encoding`], or the `charset` of
    /// the `content-type` header, or UTF-8.
    pub fn encoding(&self) -> Result<&'static Encoding, Error> {
        let overridden = *self.encoding.lock().unwrap_or_else(PoisonError::into_inner);

        match overridden {
            Some(e) => Ok(e),
            None => Ok(detect_encoding(&self.hop()?.headers)),
        }
    }

    /// Override the encoding by a label such as `latin1` or `utf-8`.
    ///
    /// Once [`Response::text`] is read this has no effect on it.
    pub fn set_encoding(&self, label: &str) -> Result<(), Error> {
        let encoding = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| Error::UnknownEncoding(label.to_string()))?;

        if self.text.is_evaluated() {
            debug!("Text already decoded, encoding {} is not applied", encoding.name());
        }

        *self.encoding.lock().unwrap_or_else(PoisonError::into_inner) = Some(encoding);

        Ok(())
    }

    /// Deserialize the body from JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(self.content()?).map_err(|e| Error::Json(e.to_string()))
    }

    /// The body in chunks of at most `chunk_size` bytes.
    ///
    /// A streaming request reads from the raw stream, otherwise the chunks
    /// come from the buffered content.
    pub fn iter_content(&self, chunk_size: usize) -> Result<ChunkIter<BodySource<'_>>, Error> {
        let source = if self.request.is_stream() && !self.content.is_evaluated() {
            BodySource(Source::Raw(self.raw()?))
        } else {
            BodySource(Source::Buffered(Cursor::new(self.content()?)))
        };

        Ok(ChunkIter::new(source, chunk_size))
    }

    /// The body split into records by `delimiter`.
    ///
    /// Without a delimiter, records end at `\n`, `\r\n` or `\r`.
    pub fn iter_lines(
        &self,
        chunk_size: usize,
        delimiter: Option<&[u8]>,
    ) -> Result<LineIter<ChunkIter<BodySource<'_>>>, Error> {
        let chunks = self.iter_content(chunk_size)?;
        Ok(LineIter::new(chunks, delimiter))
    }
}

fn detect_encoding(headers: &HeaderMap) -> &'static Encoding {
    let Some(content_type) = headers.get_str("content-type") else {
        return UTF_8;
    };

    for segment in content_type.split(';').skip(1) {
        let Some((key, value)) = segment.split_once('=') else {
            continue;
        };

        if !key.trim().eq_ignore_ascii_case("charset") {
            continue;
        }

        let label = value.trim().trim_matches('"');

        return match Encoding::for_label(label.as_bytes()) {
            Some(e) => e,
            None => {
                warn!("Unknown charset {:?}, using UTF-8", label);
                UTF_8
            }
        };
    }

    UTF_8
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Response");
        d.field("method", self.request.method())
            .field("url", &self.request.url().as_str());

        match self.hop.get() {
            Some(hop) => d.field("status", &hop.status),
            None => d.field("hop", &self.hop),
        };

        d.finish()
    }
}

/// The response body, decompressed.
///
/// Dropping the stream closes the connection.
pub struct RawStream(Box<dyn Read + Send>);

impl RawStream {
    fn new(body: Box<dyn Read + Send>, coding: Option<&str>) -> Self {
        let coding = coding.map(|c| c.trim().to_ascii_lowercase());

        match coding.as_deref() {
            #[cfg(feature = "gzip")]
            Some("gzip") | Some("x-gzip") => {
                RawStream(Box::new(flate2::read::MultiGzDecoder::new(body)))
            }
            #[cfg(feature = "gzip")]
            Some("deflate") => RawStream(Box::new(flate2::read::ZlibDecoder::new(body))),
            None | Some("identity") => RawStream(body),
            Some(other) => {
                warn!("Unsupported content-encoding {:?}, passing through", other);
                RawStream(body)
            }
        }
    }
}

impl Read for RawStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl fmt::Debug for RawStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawStream")
    }
}

/// What [`Response::iter_content`] reads from.
#[derive(Debug)]
pub struct BodySource<'a>(Source<'a>);

#[derive(Debug)]
enum Source<'a> {
    Raw(RawStream),
    Buffered(Cursor<&'a [u8]>),
}

impl Read for BodySource<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.0 {
            Source::Raw(r) => r.read(buf),
            Source::Buffered(r) => r.read(buf),
        }
    }
}
