//! Runs one request/response exchange over a transport connection.

use std::fmt;
use std::io::{self, Read};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use http::header::{CONTENT_LENGTH, COOKIE, LOCATION, SET_COOKIE, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Version};
use url::Url;

use crate::body::Data;
use crate::cookie::{Cookie, CookieJar};
use crate::ext::{HeaderMapExt, MethodExt};
use crate::transport::{Connection, Transport};
use crate::{Error, Request, Response, STREAM_CHUNK_SIZE};

/// Steps run on a connection before it connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreConnect {
    /// Force the request method onto the connection.
    Method,
    /// Request headers in sorted order, plus the body framing header.
    Headers,
    /// A single `cookie` header of the request cookies and the cookies
    /// carried from the previous hop.
    Cookies,
    /// Connect and read timeouts.
    Timeouts,
    /// TLS connector and hostname verifier for https.
    Tls,
    /// Turn off redirect following inside the transport.
    DisableRedirects,
}

/// Steps run on a connected connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostConnect {
    /// Write the encoded body, if any.
    WriteBody,
    /// Stream a reader body in bounded chunks.
    StreamSource,
    /// Read the response head and collect its `set-cookie` headers.
    MergeCookies,
}

/// The ordered steps of every exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pre: Vec<PreConnect>,
    post: Vec<PostConnect>,
}

impl Pipeline {
    pub fn new(pre: impl Into<Vec<PreConnect>>, post: impl Into<Vec<PostConnect>>) -> Self {
        Pipeline {
            pre: pre.into(),
            post: post.into(),
        }
    }

    pub fn pre_connect(&self) -> &[PreConnect] {
        &self.pre
    }

    pub fn post_connect(&self) -> &[PostConnect] {
        &self.post
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::new(
            [
                PreConnect::Method,
                PreConnect::Headers,
                PreConnect::Cookies,
                PreConnect::Timeouts,
                PreConnect::Tls,
                PreConnect::DisableRedirects,
            ],
            [
                PostConnect::WriteBody,
                PostConnect::StreamSource,
                PostConnect::MergeCookies,
            ],
        )
    }
}

/// A completed exchange: the response head and a body not yet read.
pub(crate) struct Hop {
    pub url: Url,
    pub version: Version,
    pub status: StatusCode,
    pub reason: String,
    /// Multiple values joined with `, `.
    pub headers: HeaderMap,
    /// The last `location` header.
    pub location: Option<HeaderValue>,
    pub jar: CookieJar,
    pub history: Vec<Arc<Response>>,
    body: Mutex<Option<Box<dyn Read + Send>>>,
}

impl Hop {
    /// The body, handed out once.
    pub fn take_body(&self) -> Option<Box<dyn Read + Send>> {
        self.body.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl fmt::Debug for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hop")
            .field("url", &self.url.as_str())
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("jar", &self.jar.to_header())
            .field("history", &self.history.len())
            .finish()
    }
}

/// Immutable configuration of how exchanges run.
pub(crate) struct Executor {
    transport: Arc<dyn Transport>,
    pipeline: Pipeline,
    max_redirects: usize,
}

impl Executor {
    pub fn new(transport: Arc<dyn Transport>, pipeline: Pipeline, max_redirects: usize) -> Self {
        Executor {
            transport,
            pipeline,
            max_redirects,
        }
    }

    /// Open a connection for `request`, run the pipeline and read the
    /// response head.
    ///
    /// `carried` are the cookies of a previous hop and `followed` is how
    /// many redirects led to this request.
    pub fn execute(
        &self,
        request: &Request,
        carried: &CookieJar,
        followed: usize,
    ) -> Result<Hop, Error> {
        if followed > self.max_redirects {
            return Err(Error::TooManyRedirects(self.max_redirects));
        }

        debug!("{} {}", request.method(), request.url());

        let conn = self.transport.open(request.url(), request.proxy())?;

        let mut exchange = Exchange {
            request,
            conn,
            jar: carried.clone(),
        };

        for step in &self.pipeline.pre {
            trace!("Pre connect: {:?}", step);
            exchange.pre_connect(*step)?;
        }

        exchange.conn.connect()?;

        for step in &self.pipeline.post {
            trace!("Post connect: {:?}", step);
            exchange.post_connect(*step)?;
        }

        let Exchange { mut conn, jar, .. } = exchange;

        conn.finish_request()?;
        let head = conn.response_head()?.clone();
        let body = conn.into_body()?;

        let location = head.headers.get_all(LOCATION).iter().last().cloned();

        Ok(Hop {
            url: request.url().clone(),
            version: head.version,
            status: head.status,
            reason: head.reason,
            headers: head.headers.joined(),
            location,
            jar,
            history: vec![],
            body: Mutex::new(Some(body)),
        })
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("transport", &self.transport)
            .field("pipeline", &self.pipeline)
            .field("max_redirects", &self.max_redirects)
            .finish()
    }
}

struct Exchange<'a> {
    request: &'a Request,
    conn: Box<dyn Connection>,
    jar: CookieJar,
}

impl<'a> Exchange<'a> {
    fn pre_connect(&mut self, step: PreConnect) -> Result<(), Error> {
        let request = self.request;

        match step {
            PreConnect::Method => {
                let method = request.method();
                if !self.conn.set_method(method) || self.conn.method() != method {
                    return Err(Error::UnsupportedMethod(method.clone()));
                }
            }

            PreConnect::Headers => {
                let headers = request.headers();

                let mut names: Vec<&HeaderName> = headers.keys().collect();
                names.sort_by(|a, b| a.as_str().cmp(b.as_str()));

                for name in names {
                    if let Some(value) = headers.get(name) {
                        self.conn.set_header(name.clone(), value.clone());
                    }
                }

                let body = request.body()?;

                if request.is_streamed() {
                    self.conn
                        .set_header(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
                } else if !body.is_empty() || request.method().need_request_body() {
                    self.conn.set_header(CONTENT_LENGTH, HeaderValue::from(body.len()));
                }
            }

            PreConnect::Cookies => {
                if request.cookies().is_empty() {
                    return Ok(());
                }

                let mut jar = request.cookies().clone();
                jar.merge(&self.jar);

                debug!("Send cookies: {}", jar);

                let value = HeaderValue::try_from(jar.to_header())?;
                self.conn.set_header(COOKIE, value);

                self.jar = jar;
            }

            PreConnect::Timeouts => {
                let timeout = match request.timeout() {
                    Some(t) => Some(
                        Duration::try_from_secs_f64(t).map_err(|_| Error::BadTimeout(t))?,
                    ),
                    None => None,
                };
                self.conn.set_timeouts(timeout, timeout);
            }

            PreConnect::Tls => {
                if request.url().scheme() == "https" {
                    self.conn
                        .set_tls(request.tls().cloned(), request.verifier().clone());
                }
            }

            PreConnect::DisableRedirects => {
                self.conn.disable_auto_redirect();
            }
        }

        Ok(())
    }

    fn post_connect(&mut self, step: PostConnect) -> Result<(), Error> {
        let request = self.request;

        match step {
            PostConnect::WriteBody => {
                let body = request.body()?;
                if !body.is_empty() {
                    trace!("Write body: {}", body.len());
                    self.conn.write_body(body)?;
                }
            }

            PostConnect::StreamSource => {
                if !request.body()?.is_empty() || !request.is_streamed() {
                    return Ok(());
                }

                let Some(Data::Reader(shared)) = request.data() else {
                    return Ok(());
                };

                let Some(mut reader) = shared.take() else {
                    warn!("Streamed body already consumed: {}", request.url());
                    return Ok(());
                };

                let mut buf = vec![0; STREAM_CHUNK_SIZE];
                let mut total = 0;

                loop {
                    let n = match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    };
                    self.conn.write_body(&buf[..n])?;
                    total += n;
                }

                trace!("Streamed body: {}", total);
            }

            PostConnect::MergeCookies => {
                let head = self.conn.response_head()?;

                for value in head.headers.get_all(SET_COOKIE) {
                    match value.to_str().ok().and_then(Cookie::parse_set_cookie) {
                        Some(cookie) => {
                            debug!("Set cookie: {}", cookie.name());
                            self.jar.insert(cookie);
                        }
                        None => warn!("Ignore undecodable set-cookie: {:?}", value),
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_pipeline_order() {
        let p = Pipeline::default();
        assert_eq!(p.pre_connect()[0], PreConnect::Method);
        assert_eq!(p.pre_connect().last(), Some(&PreConnect::DisableRedirects));
        assert_eq!(
            p.post_connect(),
            &[
                PostConnect::WriteBody,
                PostConnect::StreamSource,
                PostConnect::MergeCookies
            ]
        );
    }
}
