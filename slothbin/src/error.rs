use std::io;
use std::str::Utf8Error;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("http parse: {0}")]
    HttpParse(#[from] httparse::Error),

    #[error("url: {0}")]
    Url(#[from] url::ParseError),

    #[error("utf8: {0}")]
    Utf8(#[from] Utf8Error),

    #[error("bad request: {0}")]
    BadRequest(&'static str),
}
