//! Request body encoding.
//!
//! A request carries up to three body inputs: `data`, `json` and `files`.
//! Exactly one interpretation wins, in this order:
//!
//! 1. `json` – serialized JSON, `application/json`.
//! 2. `data` without files – a form is url encoded
//!    (`application/x-www-form-urlencoded`), text and bytes are sent as is
//!    (`text/plain`), and a reader is streamed at connect time.
//! 3. `files` – `multipart/form-data` with the form fields of `data` first,
//!    then the files in attach order.
//! 4. Nothing – an empty body.

use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use crate::Error;

const BOUNDARY_LEN: usize = 32;

/// Body source of a request.
#[derive(Clone)]
pub enum Data {
    /// Text scalar.
    Text(String),
    /// Raw bytes scalar.
    Bytes(Vec<u8>),
    /// Ordered key/value form.
    Form(Vec<(String, String)>),
    /// A reader streamed to the connection, never buffered.
    Reader(SharedReader),
}

impl Data {
    /// Ordered form fields.
    pub fn form<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Data::Form(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Stream the body from a reader.
    pub fn reader(reader: impl Read + Send + 'static) -> Self {
        Data::Reader(SharedReader::new(reader))
    }

    /// Stream the body from a file.
    pub fn file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = fs::File::open(path)?;
        Ok(Data::reader(file))
    }

    pub(crate) fn is_form(&self) -> bool {
        matches!(self, Data::Form(_))
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(v) => f.debug_tuple("Text").field(v).finish(),
            Self::Bytes(v) => f.debug_tuple("Bytes").field(&v.len()).finish(),
            Self::Form(v) => f.debug_tuple("Form").field(v).finish(),
            Self::Reader(_) => write!(f, "Reader"),
        }
    }
}

impl From<&str> for Data {
    fn from(value: &str) -> Self {
        Data::Text(value.to_string())
    }
}

impl From<String> for Data {
    fn from(value: String) -> Self {
        Data::Text(value)
    }
}

impl From<&[u8]> for Data {
    fn from(value: &[u8]) -> Self {
        Data::Bytes(value.to_vec())
    }
}

impl From<Vec<u8>> for Data {
    fn from(value: Vec<u8>) -> Self {
        Data::Bytes(value)
    }
}

impl<K: Into<String>, V: Into<String>> From<Vec<(K, V)>> for Data {
    fn from(value: Vec<(K, V)>) -> Self {
        Data::form(value)
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Data {
    fn from(value: [(K, V); N]) -> Self {
        Data::form(value)
    }
}

impl<K: Into<String>, V: Into<String>> From<std::collections::BTreeMap<K, V>> for Data {
    fn from(value: std::collections::BTreeMap<K, V>) -> Self {
        Data::form(value)
    }
}

/// A reader that can be handed out exactly once.
///
/// Clones share the reader, so a request cloned for a redirect hop finds it
/// already consumed.
#[derive(Clone)]
pub struct SharedReader(Arc<Mutex<Option<Box<dyn Read + Send>>>>);

impl SharedReader {
    fn new(reader: impl Read + Send + 'static) -> Self {
        SharedReader(Arc::new(Mutex::new(Some(Box::new(reader)))))
    }

    pub(crate) fn take(&self) -> Option<Box<dyn Read + Send>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// A file attachment for a multipart body.
///
/// The content is read once on construction and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLike {
    field: String,
    name: String,
    contents: Vec<u8>,
}

impl FileLike {
    pub fn new(
        field: impl Into<String>,
        name: impl Into<String>,
        contents: impl Into<Vec<u8>>,
    ) -> Self {
        FileLike {
            field: field.into(),
            name: name.into(),
            contents: contents.into(),
        }
    }

    /// Read a file from disk. The file name is the last path component.
    pub fn from_path(field: impl Into<String>, path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(FileLike::new(field, name, contents))
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }
}

/// The chosen interpretation of the body inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BodyKind {
    Empty,
    Json,
    Form,
    Text,
    Streamed,
    Multipart(String),
}

impl BodyKind {
    /// Decide how `(data, json, files)` are sent.
    pub fn plan(
        data: Option<&Data>,
        json: Option<&Value>,
        files: &[FileLike],
    ) -> Result<Self, Error> {
        if json.is_some() {
            return Ok(BodyKind::Json);
        }

        if files.is_empty() {
            return Ok(match data {
                None => BodyKind::Empty,
                Some(Data::Form(_)) => BodyKind::Form,
                Some(Data::Text(_) | Data::Bytes(_)) => BodyKind::Text,
                Some(Data::Reader(_)) => BodyKind::Streamed,
            });
        }

        if let Some(data) = data {
            if !data.is_form() {
                return Err(Error::FilesRequireForm);
            }
        }

        Ok(BodyKind::Multipart(new_boundary()))
    }

    /// `content-type` applied unless the caller set one.
    pub fn content_type(&self) -> Option<String> {
        match self {
            BodyKind::Empty | BodyKind::Streamed => None,
            BodyKind::Json => Some("application/json".into()),
            BodyKind::Form => Some("application/x-www-form-urlencoded".into()),
            BodyKind::Text => Some("text/plain".into()),
            BodyKind::Multipart(b) => Some(format!("multipart/form-data; boundary={}", b)),
        }
    }

    pub fn is_streamed(&self) -> bool {
        matches!(self, BodyKind::Streamed)
    }

    /// Produce the body bytes. A streamed body encodes as empty.
    pub fn encode(
        &self,
        data: Option<&Data>,
        json: Option<&Value>,
        files: &[FileLike],
    ) -> Result<Vec<u8>, Error> {
        let bytes = match (self, data, json) {
            (BodyKind::Json, _, Some(json)) => {
                serde_json::to_vec(json).map_err(|e| Error::UnsupportedData {
                    type_name: "serde_json::Value",
                    reason: e.to_string(),
                })?
            }
            (BodyKind::Form, Some(Data::Form(pairs)), _) => form_urlencode(pairs).into_bytes(),
            (BodyKind::Text, Some(Data::Text(v)), _) => v.as_bytes().to_vec(),
            (BodyKind::Text, Some(Data::Bytes(v)), _) => v.clone(),
            (BodyKind::Multipart(boundary), data, _) => {
                let fields = match data {
                    Some(Data::Form(pairs)) => &pairs[..],
                    _ => &[],
                };
                multipart(boundary, fields, files)
            }
            _ => vec![],
        };

        trace!("Encoded {:?} body: {} bytes", self, bytes.len());

        Ok(bytes)
    }
}

/// A random alphanumeric multipart boundary.
pub(crate) fn new_boundary() -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

    let mut rng = fastrand::Rng::new();
    std::iter::repeat_with(|| CHARS[rng.usize(..CHARS.len())] as char)
        .take(BOUNDARY_LEN)
        .collect()
}

pub(crate) fn form_urlencode(pairs: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

fn multipart(boundary: &str, fields: &[(String, String)], files: &[FileLike]) -> Vec<u8> {
    let mut out = Vec::new();

    for (k, v) in fields {
        part_header(&mut out, boundary, k, None);
        out.extend_from_slice(v.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    for file in files {
        part_header(&mut out, boundary, &file.field, Some(&file.name));
        out.extend_from_slice(&file.contents);
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

    out
}

fn part_header(out: &mut Vec<u8>, boundary: &str, name: &str, filename: Option<&str>) {
    let disposition = match filename {
        Some(f) => format!("form-data; name=\"{}\"; filename=\"{}\"", name, f),
        None => format!("form-data; name=\"{}\"", name),
    };
    out.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: {}\r\n\r\n",
            boundary, disposition
        )
        .as_bytes(),
    );
}
