use std::io;
use std::sync::Arc;

use http::Method;
use thiserror::Error;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request could not be built or sent as described.
    Configuration,
    /// The connection, handshake or wire exchange failed.
    Transport,
    /// The response payload could not be decoded.
    Decode,
    /// A one-shot resource was used twice.
    State,
}

/// Error type for sloth
///
/// Errors are `Clone`, since a lazily evaluated response field that failed
/// keeps handing out the same error on every later access.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum Error {
    #[error("bad url: {0}")]
    BadUrl(String),

    #[error("unsupported url scheme: {0}")]
    InvalidScheme(String),

    #[error("bad header: {0}")]
    BadHeader(String),

    #[error("timeout is not a positive number of seconds: {0}")]
    BadTimeout(f64),

    #[error("unsupported data of type {type_name}: {reason}")]
    UnsupportedData {
        type_name: &'static str,
        reason: String,
    },

    #[error("data must be a form when files are attached")]
    FilesRequireForm,

    #[error("unknown character encoding: {0}")]
    UnknownEncoding(String),

    #[error("transport refused method: {0}")]
    UnsupportedMethod(Method),

    #[error("https requested without tls support")]
    TlsUnavailable,

    #[error("attempt to write larger body than content-length")]
    BodyLargerThanContentLength,

    #[error("request body shorter than content-length")]
    BodyShorterThanContentLength,

    #[error("io: {0}")]
    Io(Arc<io::Error>),

    #[error("tls: {0}")]
    Tls(String),

    #[error("hostname {requested} does not match peer {peer}")]
    HostnameMismatch { requested: String, peer: String },

    #[error("proxy refused tunnel with status {0}")]
    ProxyTunnel(u16),

    #[error("http parse fail: {0}")]
    HttpParseFail(String),

    #[error("http response missing version")]
    MissingResponseVersion,

    #[error("http response missing status")]
    ResponseMissingStatus,

    #[error("http response invalid status")]
    ResponseInvalidStatus,

    #[error("http response headers too large")]
    ResponseHeadTooLarge,

    #[error("connection closed before response headers were complete")]
    IncompleteResponse,

    #[error("more than one content-length header")]
    TooManyContentLengthHeaders,

    #[error("content-length header not a number")]
    BadContentLengthHeader,

    #[error("chunk length is not ascii")]
    ChunkLenNotAscii,

    #[error("chunk length cannot be read as a number")]
    ChunkLenNotANumber,

    #[error("chunk expected crlf as next character")]
    ChunkExpectedCrLf,

    #[error("connection used out of order: {0}")]
    OutOfOrder(&'static str),

    #[error("missing a location header")]
    NoLocationHeader,

    #[error("location header is malformed: {0}")]
    BadLocationHeader(String),

    #[error("followed more than {0} redirects")]
    TooManyRedirects(usize),

    #[error("json: {0}")]
    Json(String),

    #[error("{0} already consumed")]
    Consumed(&'static str),
}

impl Error {
    /// Which part of the taxonomy this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            BadUrl(_)
            | InvalidScheme(_)
            | BadHeader(_)
            | BadTimeout(_)
            | UnsupportedData { .. }
            | FilesRequireForm
            | UnknownEncoding(_)
            | UnsupportedMethod(_)
            | TlsUnavailable
            | BodyLargerThanContentLength
            | BodyShorterThanContentLength => ErrorKind::Configuration,

            Json(_) => ErrorKind::Decode,

            Consumed(_) => ErrorKind::State,

            _ => ErrorKind::Transport,
        }
    }

    /// The underlying io error, if this is one.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::Io(Arc::new(value))
    }
}

impl From<httparse::Error> for Error {
    fn from(value: httparse::Error) -> Self {
        Error::HttpParseFail(value.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(value: url::ParseError) -> Self {
        Error::BadUrl(value.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(value: http::header::InvalidHeaderValue) -> Self {
        Error::BadHeader(value.to_string())
    }
}

impl From<http::Error> for Error {
    fn from(value: http::Error) -> Self {
        Error::BadHeader(value.to_string())
    }
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;
