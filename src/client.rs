use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::Method;

use crate::executor::{Executor, Pipeline};
use crate::request::RequestBuilder;
use crate::transport::{TcpTransport, Transport};
use crate::{Request, Response, DEFAULT_MAX_REDIRECTS, DEFAULT_TIMEOUT};

/// Shared configuration for sending requests.
///
/// Immutable once built. Clones share the configuration.
#[derive(Clone)]
pub struct Client {
    executor: Arc<Executor>,
    user_agent: Arc<str>,
    timeout: Option<Duration>,
}

impl Client {
    /// A client with the default configuration.
    pub fn new() -> Self {
        ClientBuilder::new().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Timeout for requests that don't set their own.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn request(&self, method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), method, url.into())
    }

    pub fn get(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    pub fn put(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    pub fn patch(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    pub fn delete(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    pub fn head(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }

    pub fn options(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::OPTIONS, url)
    }

    /// Create the lazy response of a request. Nothing is sent until a
    /// response field is read.
    pub fn execute(&self, request: Request) -> Response {
        Response::new(request, self.executor.clone())
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("executor", &self.executor)
            .field("user_agent", &self.user_agent)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Builder of a [`Client`].
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    pipeline: Pipeline,
    user_agent: String,
    max_redirects: usize,
    timeout: Option<Duration>,
}

impl ClientBuilder {
    fn new() -> Self {
        ClientBuilder {
            transport: Arc::new(TcpTransport),
            pipeline: Pipeline::default(),
            user_agent: format!("sloth/{}", env!("CARGO_PKG_VERSION")),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    /// Replace the steps run for every exchange.
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// How many redirects a chain can follow.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    /// Default timeout, `None` to wait forever.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Client {
        Client {
            executor: Arc::new(Executor::new(
                self.transport,
                self.pipeline,
                self.max_redirects,
            )),
            user_agent: self.user_agent.into(),
            timeout: self.timeout,
        }
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("transport", &self.transport)
            .field("pipeline", &self.pipeline)
            .field("max_redirects", &self.max_redirects)
            .finish_non_exhaustive()
    }
}
