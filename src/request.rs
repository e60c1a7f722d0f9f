use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::{ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::body::{BodyKind, Data, FileLike};
use crate::client::Client;
use crate::cookie::{Cookie, CookieJar};
use crate::ext::MethodExt;
use crate::transport::{DefaultVerifier, HostnameVerifier, TlsConnector};
use crate::util::Memo;
use crate::{Error, Response};

/// An immutable, fully normalized request.
///
/// Clones share the lazily encoded body.
#[derive(Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    data: Option<Data>,
    json: Option<Value>,
    files: Vec<FileLike>,
    kind: BodyKind,
    body: Arc<Memo<Vec<u8>>>,
    cookies: CookieJar,
    tls: Option<Arc<dyn TlsConnector>>,
    verifier: Arc<dyn HostnameVerifier>,
    proxy: Option<Proxy>,
    timeout: Option<f64>,
    allow_redirects: bool,
    stream: bool,
}

impl Request {
    /// Start building a request using the default [`Client`].
    pub fn builder(method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Client::default(), method, url.into())
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The normalized url, with query parameters appended.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn data(&self) -> Option<&Data> {
        self.data.as_ref()
    }

    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    pub fn files(&self) -> &[FileLike] {
        &self.files
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    /// Timeout in seconds.
    pub fn timeout(&self) -> Option<f64> {
        self.timeout
    }

    pub fn allow_redirects(&self) -> bool {
        self.allow_redirects
    }

    /// Whether the response body is consumed as a stream.
    pub fn is_stream(&self) -> bool {
        self.stream
    }

    /// The encoded body.
    ///
    /// Encoded on first call. A streamed reader body is always empty here.
    pub fn body(&self) -> Result<&[u8], Error> {
        self.body
            .get_or_try_init(|| {
                self.kind
                    .encode(self.data.as_ref(), self.json.as_ref(), &self.files)
            })
            .map(|v| &v[..])
    }

    pub(crate) fn is_streamed(&self) -> bool {
        self.kind.is_streamed() && self.files.is_empty()
    }

    pub(crate) fn tls(&self) -> Option<&Arc<dyn TlsConnector>> {
        self.tls.as_ref()
    }

    pub(crate) fn verifier(&self) -> &Arc<dyn HostnameVerifier> {
        &self.verifier
    }

    /// The follow-up of a redirect.
    ///
    /// A 303 turns into a bodyless GET. Any other redirect keeps the method
    /// and the body.
    pub(crate) fn redirected(&self, url: Url, see_other: bool, cookies: CookieJar) -> Request {
        let mut next = self.clone();

        let same_authority = self.url.host_str() == url.host_str()
            && self.url.port_or_known_default() == url.port_or_known_default();
        if !same_authority {
            next.headers.remove(http::header::HOST);
        }

        next.url = url;
        next.cookies = cookies;
        next.headers.remove(http::header::COOKIE);
        next.headers.remove(http::header::CONTENT_LENGTH);

        if see_other {
            next.method = Method::GET;
            next.data = None;
            next.json = None;
            next.files = vec![];
            next.kind = BodyKind::Empty;
            next.body = Arc::new(Memo::new());
            next.headers.remove(CONTENT_TYPE);
            next.headers.remove(http::header::TRANSFER_ENCODING);
        }

        next
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body", &self.kind)
            .field("cookies", &self.cookies.to_header())
            .field("timeout", &self.timeout)
            .field("allow_redirects", &self.allow_redirects)
            .field("stream", &self.stream)
            .finish()
    }
}

/// Builder of a [`Request`].
///
/// Errors are recorded and returned from [`RequestBuilder::build`].
pub struct RequestBuilder {
    client: Client,
    method: Method,
    url: String,
    params: Vec<(String, String)>,
    headers: Vec<(HeaderName, HeaderValue)>,
    data: Option<Data>,
    json: Option<Value>,
    files: Vec<FileLike>,
    cookies: CookieJar,
    auth: Option<Arc<dyn Auth>>,
    tls: Option<Arc<dyn TlsConnector>>,
    verifier: Option<Arc<dyn HostnameVerifier>>,
    proxy: Option<Proxy>,
    timeout: Option<f64>,
    allow_redirects: Option<bool>,
    stream: bool,
    error: Option<Error>,
}

impl RequestBuilder {
    pub(crate) fn new(client: Client, method: Method, url: String) -> Self {
        RequestBuilder {
            client,
            method,
            url,
            params: vec![],
            headers: vec![],
            data: None,
            json: None,
            files: vec![],
            cookies: CookieJar::new(),
            auth: None,
            tls: None,
            verifier: None,
            proxy: None,
            timeout: None,
            allow_redirects: None,
            stream: false,
            error: None,
        }
    }

    fn fail(mut self, e: Error) -> Self {
        if self.error.is_none() {
            self.error = Some(e);
        }
        self
    }

    /// Append a query parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn params<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set a header. A later value for the same (case insensitive) name wins.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        let name = match HeaderName::try_from(key) {
            Ok(v) => v,
            Err(e) => {
                let e: http::Error = e.into();
                return self.fail(e.into());
            }
        };
        let value = match HeaderValue::try_from(value) {
            Ok(v) => v,
            Err(e) => {
                let e: http::Error = e.into();
                return self.fail(e.into());
            }
        };

        self.headers.push((name, value));
        self
    }

    /// Body data. Text, bytes, a form or a reader.
    pub fn data(mut self, data: impl Into<Data>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// JSON body. Takes precedence over [`RequestBuilder::data`].
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => {
                self.json = Some(v);
                self
            }
            Err(e) => self.fail(Error::UnsupportedData {
                type_name: std::any::type_name::<T>(),
                reason: e.to_string(),
            }),
        }
    }

    /// Attach a file, which makes the body multipart.
    pub fn file(mut self, file: FileLike) -> Self {
        self.files.push(file);
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(Cookie::new(name, value));
        self
    }

    pub fn cookies(mut self, jar: &CookieJar) -> Self {
        self.cookies.merge(jar);
        self
    }

    pub fn auth(mut self, auth: impl Auth + 'static) -> Self {
        self.auth = Some(Arc::new(auth));
        self
    }

    pub fn basic_auth(self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth(BasicAuth::new(user, password))
    }

    /// Socket factory for https.
    pub fn tls_connector(mut self, connector: Arc<dyn TlsConnector>) -> Self {
        self.tls = Some(connector);
        self
    }

    pub fn hostname_verifier(mut self, verifier: Arc<dyn HostnameVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Connect and read timeout in seconds.
    pub fn timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// Follow redirects. Defaults to `true` for all methods but `HEAD`.
    pub fn allow_redirects(mut self, allow: bool) -> Self {
        self.allow_redirects = Some(allow);
        self
    }

    /// Don't buffer the response body up front when following redirects.
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn build(self) -> Result<Request, Error> {
        self.build_parts().map(|(_, r)| r)
    }

    /// Build and hand the request to the client.
    ///
    /// No I/O happens until a field of the response is read.
    pub fn send(self) -> Result<Response, Error> {
        let (client, request) = self.build_parts()?;
        Ok(client.execute(request))
    }

    fn build_parts(self) -> Result<(Client, Request), Error> {
        if let Some(e) = self.error {
            return Err(e);
        }

        let mut url = Url::parse(&self.url)?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidScheme(url.scheme().to_string()));
        }

        if !self.params.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.params);
        }

        let mut headers = HeaderMap::with_capacity(self.headers.len() + 4);
        for (name, value) in self.headers {
            headers.insert(name, value);
        }

        let kind = BodyKind::plan(self.data.as_ref(), self.json.as_ref(), &self.files)?;

        if let Some(ct) = kind.content_type() {
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::try_from(ct)?);
            }
        }

        if let Some(auth) = &self.auth {
            if !headers.contains_key(AUTHORIZATION) {
                let (name, value) = auth.header()?;
                headers.insert(name, value);
            }
        }

        let user_agent = HeaderValue::try_from(self.client.user_agent())?;
        for (name, value) in [
            (ACCEPT, HeaderValue::from_static("*/*")),
            (ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate")),
            (USER_AGENT, user_agent),
        ] {
            if !headers.contains_key(&name) {
                headers.insert(name, value);
            }
        }

        let timeout = match self.timeout {
            Some(t) => Some(t),
            None => self.client.timeout().map(|d| d.as_secs_f64()),
        };
        if let Some(t) = timeout {
            if !(t > 0.0 && t.is_finite()) {
                return Err(Error::BadTimeout(t));
            }
        }

        let allow_redirects = self
            .allow_redirects
            .unwrap_or_else(|| self.method.allows_redirects_by_default());

        let request = Request {
            method: self.method,
            url,
            headers,
            data: self.data,
            json: self.json,
            files: self.files,
            kind,
            body: Arc::new(Memo::new()),
            cookies: self.cookies,
            tls: self.tls,
            verifier: self
                .verifier
                .unwrap_or_else(|| Arc::new(DefaultVerifier)),
            proxy: self.proxy,
            timeout,
            allow_redirects,
            stream: self.stream,
        };

        trace!("Built {:?}", request);

        Ok((self.client, request))
    }
}

/// Produces the authorization header of a request.
pub trait Auth: Send + Sync {
    fn header(&self) -> Result<(HeaderName, HeaderValue), Error>;
}

/// `Authorization: Basic <base64(user:password)>`
#[derive(Clone)]
pub struct BasicAuth {
    user: String,
    password: String,
}

impl BasicAuth {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        BasicAuth {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl Auth for BasicAuth {
    fn header(&self) -> Result<(HeaderName, HeaderValue), Error> {
        let token = STANDARD.encode(format!("{}:{}", self.user, self.password));
        let mut value = HeaderValue::try_from(format!("Basic {}", token))?;
        value.set_sensitive(true);
        Ok((AUTHORIZATION, value))
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// An http proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    host: String,
    port: u16,
}

impl Proxy {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Proxy {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port` or `http://host:port`.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let url = if s.contains("://") {
            Url::parse(s)?
        } else {
            Url::parse(&format!("http://{}", s))?
        };

        if url.scheme() != "http" {
            return Err(Error::InvalidScheme(url.scheme().to_string()));
        }

        let host = url
            .host_str()
            .ok_or_else(|| Error::BadUrl(format!("proxy without host: {}", s)))?;
        let port = url.port_or_known_default().unwrap_or(80);

        Ok(Proxy::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::ErrorKind;

    fn build(b: RequestBuilder) -> Request {
        b.build().unwrap()
    }

    #[test]
    fn ftp_is_refused() {
        let err = Request::builder(Method::GET, "ftp://example.com")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidScheme(ref s) if s == "ftp"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn bad_url() {
        let err = Request::builder(Method::GET, "not a url").build().unwrap_err();
        assert!(matches!(err, Error::BadUrl(_)));
    }

    #[test]
    fn url_is_normalized() {
        let r = build(
            Request::builder(Method::GET, "http://BÜCHER.example/a b?q=x y")
                .param("k", "v w")
                .param("k", "2"),
        );
        assert_eq!(
            r.url().as_str(),
            "http://xn--bcher-kva.example/a%20b?q=x%20y&k=v+w&k=2"
        );
    }

    #[test]
    fn headers_last_write_wins() {
        let r = build(
            Request::builder(Method::GET, "http://x.test/")
                .header("X-Thing", "1")
                .header("x-thing", "2"),
        );
        assert_eq!(r.headers().get("X-THING").unwrap(), "2");
        assert_eq!(r.headers().get_all("x-thing").iter().count(), 1);
    }

    #[test]
    fn bad_header_is_recorded() {
        let err = Request::builder(Method::GET, "http://x.test/")
            .header("bad header", "1")
            .header("x-ok", "1")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::BadHeader(_)));
    }

    #[test]
    fn base_defaults() {
        let r = build(
            Request::builder(Method::GET, "http://x.test/").header("accept", "text/html"),
        );
        assert_eq!(r.headers().get("accept").unwrap(), "text/html");
        assert_eq!(r.headers().get("accept-encoding").unwrap(), "gzip, deflate");
        assert!(r
            .headers()
            .get("user-agent")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("sloth/"));
    }

    #[test]
    fn content_type_default_does_not_override() {
        let r = build(Request::builder(Method::POST, "http://x.test/").data([("a", "1")]));
        assert_eq!(
            r.headers().get("content-type").unwrap(),
            "application/x-www-form-urlencoded"
        );
        assert_eq!(r.body().unwrap(), b"a=1");

        let r = build(
            Request::builder(Method::POST, "http://x.test/")
                .header("Content-Type", "application/vnd.thing")
                .json(&serde_json::json!({"a": 1})),
        );
        assert_eq!(
            r.headers().get("content-type").unwrap(),
            "application/vnd.thing"
        );
        assert_eq!(r.body().unwrap(), br#"{"a":1}"#);
    }

    #[test]
    fn body_is_shared_between_clones() {
        let r = build(Request::builder(Method::POST, "http://x.test/").data("hello"));
        let c = r.clone();
        assert_eq!(r.body().unwrap().as_ptr(), c.body().unwrap().as_ptr());
    }

    #[test]
    fn unsupported_json_names_type() {
        use std::collections::HashMap;

        let mut map: HashMap<(u8, u8), u8> = HashMap::new();
        map.insert((1, 2), 3);

        let err = Request::builder(Method::POST, "http://x.test/")
            .json(&map)
            .build()
            .unwrap_err();

        let Error::UnsupportedData { type_name, .. } = err else {
            panic!("expected UnsupportedData");
        };
        assert!(type_name.contains("HashMap"));
    }

    #[test]
    fn basic_auth_header() {
        let r = build(Request::builder(Method::GET, "http://x.test/").basic_auth("user", "pass"));
        let v = r.headers().get("authorization").unwrap();
        assert_eq!(v, "Basic dXNlcjpwYXNz");
        assert!(v.is_sensitive());

        let r = build(
            Request::builder(Method::GET, "http://x.test/")
                .header("authorization", "Bearer t")
                .basic_auth("user", "pass"),
        );
        assert_eq!(r.headers().get("authorization").unwrap(), "Bearer t");
    }

    #[test]
    fn redirect_default_follows_method() {
        assert!(build(Request::builder(Method::GET, "http://x.test/")).allow_redirects());
        assert!(!build(Request::builder(Method::HEAD, "http://x.test/")).allow_redirects());
        assert!(build(Request::builder(Method::HEAD, "http://x.test/").allow_redirects(true))
            .allow_redirects());
    }

    #[test]
    fn timeout_validation() {
        let r = build(Request::builder(Method::GET, "http://x.test/").timeout(0.25));
        assert_eq!(r.timeout(), Some(0.25));

        let err = Request::builder(Method::GET, "http://x.test/")
            .timeout(-1.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::BadTimeout(_)));
    }

    #[test]
    fn see_other_drops_body() {
        let r = build(Request::builder(Method::POST, "http://x.test/").data("hello"));
        let next = r.redirected(
            Url::parse("http://x.test/next").unwrap(),
            true,
            CookieJar::new(),
        );
        assert_eq!(next.method(), Method::GET);
        assert!(next.body().unwrap().is_empty());
        assert!(next.headers().get("content-type").is_none());

        let next = r.redirected(
            Url::parse("http://x.test/next").unwrap(),
            false,
            CookieJar::new(),
        );
        assert_eq!(next.method(), Method::POST);
        assert_eq!(next.body().unwrap(), b"hello");
    }

    #[test]
    fn proxy_parse() {
        assert_eq!(Proxy::parse("localhost:3128").unwrap(), Proxy::new("localhost", 3128));
        assert_eq!(Proxy::parse("http://p.test").unwrap(), Proxy::new("p.test", 80));
        assert!(Proxy::parse("socks5://p.test:1080").is_err());
    }
}
