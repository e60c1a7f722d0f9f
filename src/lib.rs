//! Blocking http 1.1 client with lazily evaluated responses.
//!
//! A [`Response`] is created without doing any I/O. Reading any of its
//! fields connects, follows redirects and caches the outcome.
//!
//! ```no_run
//! let res = sloth::get("http://httpbin.org/redirect/2")
//!     .param("a", "1")
//!     .send()?;
//!
//! // The first hop, a redirect.
//! assert_eq!(res.status()?, 302);
//!
//! // The final response is last in the history.
//! let last = res.history()?.last().unwrap();
//! println!("{}", last.text()?);
//! # Ok::<_, sloth::Error>(())
//! ```
//!
//! # Bodies
//!
//! A request body is one of
//!
//! * a JSON value, [`RequestBuilder::json`]
//! * a form, text, bytes or a reader, [`RequestBuilder::data`]
//! * a multipart form of fields and [`FileLike`] attachments,
//!   [`RequestBuilder::file`]
//!
//! # Streaming
//!
//! [`Response::iter_content`] and [`Response::iter_lines`] read the body in
//! chunks and lines. With [`RequestBuilder::stream`] the body is read from
//! the connection as the iterator is consumed.

#[macro_use]
extern crate log;

use std::time::Duration;

// Re-export the basis for this library.
pub use http;
pub use url;

mod error;
pub use error::{Error, ErrorKind};

mod ext;
mod util;

mod body;
pub use body::{Data, FileLike, SharedReader};

mod cookie;
pub use cookie::{Cookie, CookieJar};

mod request;
pub use request::{Auth, BasicAuth, Proxy, Request, RequestBuilder};

pub mod transport;

mod executor;
pub use executor::{Pipeline, PostConnect, PreConnect};

mod redirect;

mod response;
pub use response::{BodySource, RawStream, Response};

pub mod iter;

mod client;
pub use client::{Client, ClientBuilder};

#[cfg(test)]
mod test;

/// Timeout of requests that don't set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Max number of headers in a response.
pub const MAX_RESPONSE_HEADERS: usize = 128;

/// Size of the writes when streaming a reader body.
pub const STREAM_CHUNK_SIZE: usize = 4096;

/// Max number of redirects followed in a chain.
pub const DEFAULT_MAX_REDIRECTS: usize = 30;

/// Build a request with the default [`Client`].
pub fn request(method: http::Method, url: impl Into<String>) -> RequestBuilder {
    Client::default().request(method, url)
}

pub fn get(url: impl Into<String>) -> RequestBuilder {
    request(http::Method::GET, url)
}

pub fn post(url: impl Into<String>) -> RequestBuilder {
    request(http::Method::POST, url)
}

pub fn put(url: impl Into<String>) -> RequestBuilder {
    request(http::Method::PUT, url)
}

pub fn patch(url: impl Into<String>) -> RequestBuilder {
    request(http::Method::PATCH, url)
}

pub fn delete(url: impl Into<String>) -> RequestBuilder {
    request(http::Method::DELETE, url)
}

pub fn head(url: impl Into<String>) -> RequestBuilder {
    request(http::Method::HEAD, url)
}

pub fn options(url: impl Into<String>) -> RequestBuilder {
    request(http::Method::OPTIONS, url)
}
