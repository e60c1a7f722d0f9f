//! A small httpbin emulation, serving one request per connection.

use std::collections::HashMap;
use std::io::{self, Write};
use std::iter::repeat_with;
use std::str;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use serde::Serialize;
use url::Url;

use buffer::InputBuffer;
pub use error::Error;

mod buffer;
mod error;

const MAX_HEADERS: usize = 64;

/// A parsed request.
#[derive(Debug)]
struct Incoming {
    method: String,
    url: Url,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Incoming {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response about to be written.
#[derive(Debug)]
struct Answer {
    status: u16,
    text: &'static str,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    chunks: Option<Vec<Vec<u8>>>,
}

impl Answer {
    fn new(status: u16, text: &'static str) -> Self {
        Answer {
            status,
            text,
            headers: vec![],
            body: vec![],
            chunks: None,
        }
    }

    fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    fn json(self, body: &impl Serialize) -> Self {
        // Our bodies are always serializable.
        let bytes = serde_json::to_vec_pretty(body).unwrap_or_default();
        self.bytes("application/json", bytes)
    }

    fn bytes(mut self, content_type: &str, body: Vec<u8>) -> Self {
        self.body = body;
        self.header("content-type", content_type)
    }
}

/// Serialized to JSON as the echo response body.
#[derive(Debug, Default, Serialize)]
struct Echo {
    method: String,
    args: HashMap<String, Arg>,
    headers: HashMap<String, String>,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    json: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    form: HashMap<String, Arg>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    files: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Arg {
    Single(String),
    Multiple(Vec<String>),
}

fn collect_args(pairs: impl IntoIterator<Item = (String, String)>) -> HashMap<String, Arg> {
    let mut args: HashMap<String, Arg> = HashMap::new();

    for (k, v) in pairs {
        match args.remove(&k) {
            None => {
                args.insert(k, Arg::Single(v));
            }
            Some(Arg::Single(prev)) => {
                args.insert(k, Arg::Multiple(vec![prev, v]));
            }
            Some(Arg::Multiple(mut all)) => {
                all.push(v);
                args.insert(k, Arg::Multiple(all));
            }
        }
    }

    args
}

/// Read one request from `i` and write the answer to `o`.
///
/// `base_url` is used to resolve the request target.
pub fn serve_single(i: impl io::Read, mut o: impl io::Write, base_url: &str) -> Result<(), Error> {
    let base = Url::parse(base_url)?;

    let mut input = InputBuffer::new(i);

    let req = read_request(&mut input, &base)?;

    let answer = route(&req);

    write_answer(&mut o, &req, answer)?;
    o.flush()?;

    Ok(())
}

fn read_request<R: io::Read>(input: &mut InputBuffer<R>, base: &Url) -> Result<Incoming, Error> {
    let (used, method, target, headers) = loop {
        input.fill_more()?;

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        match req.parse(&input[..])? {
            httparse::Status::Complete(used) => {
                let method = req.method.ok_or(Error::BadRequest("method"))?.to_string();
                let target = req.path.ok_or(Error::BadRequest("path"))?.to_string();

                let headers = req
                    .headers
                    .iter()
                    .map(|h| {
                        let value = str::from_utf8(h.value)?;
                        Ok((h.name.to_ascii_lowercase(), value.to_string()))
                    })
                    .collect::<Result<Vec<_>, Error>>()?;

                break (used, method, target, headers);
            }
            httparse::Status::Partial => {
                if input.is_ended() {
                    // The input stopped before the full request head.
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "Input stream end before full request",
                    )
                    .into());
                }
            }
        }
    };

    input.consume(used);

    let mut req = Incoming {
        method,
        url: base.join(&target)?,
        headers,
        body: vec![],
    };

    let chunked = req
        .header("transfer-encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);

    if chunked {
        req.body = read_chunked(input)?;
    } else if let Some(len) = req.header("content-length") {
        let len: usize = len
            .trim()
            .parse()
            .map_err(|_| Error::BadRequest("content-length"))?;
        input.require(len)?;
        req.body = input[..len].to_vec();
        input.consume(len);
    }

    Ok(req)
}

fn read_chunked<R: io::Read>(input: &mut InputBuffer<R>) -> Result<Vec<u8>, Error> {
    let mut body = vec![];

    loop {
        let end = input.require_line()?;
        let line = str::from_utf8(&input[..end])?;
        let size = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size, 16).map_err(|_| Error::BadRequest("chunk size"))?;
        input.consume(end + 2);

        if size == 0 {
            // Trailer lines up to the empty line.
            loop {
                let end = input.require_line()?;
                input.consume(end + 2);
                if end == 0 {
                    return Ok(body);
                }
            }
        }

        input.require(size + 2)?;
        body.extend_from_slice(&input[..size]);
        if &input[size..size + 2] != b"\r\n" {
            return Err(Error::BadRequest("chunk crlf"));
        }
        input.consume(size + 2);
    }
}

fn route(req: &Incoming) -> Answer {
    let path = req.url.path();
    let method = req.method.as_str();

    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();

    match (method, &segments[..]) {
        ("GET" | "HEAD", ["get"])
        | ("POST", ["post"])
        | ("PUT", ["put"])
        | ("PATCH", ["patch"])
        | ("DELETE", ["delete"])
        | (_, ["anything", ..]) => Answer::new(200, "OK").json(&echo(req)),

        (_, ["headers"]) => {
            let headers = echo(req).headers;
            Answer::new(200, "OK").json(&serde_json::json!({ "headers": headers }))
        }

        (_, ["status", n]) => match n.parse::<u16>() {
            Ok(n) if (200..600).contains(&n) => {
                let answer = Answer::new(n, "");
                if matches!(n, 301 | 302 | 303 | 307 | 308) {
                    answer.header("location", "/get")
                } else {
                    answer
                }
            }
            _ => bad_request(),
        },

        (_, ["bytes", n]) => match n.parse::<usize>() {
            Ok(n) => {
                let mut rng = fastrand::Rng::new();
                let bytes = repeat_with(|| rng.u8(..)).take(n).collect();
                Answer::new(200, "OK").bytes("application/octet-stream", bytes)
            }
            Err(_) => bad_request(),
        },

        (_, ["redirect", n]) => match n.parse::<usize>() {
            Ok(0) | Err(_) => bad_request(),
            Ok(1) => Answer::new(302, "Found").header("location", "/get"),
            Ok(n) => Answer::new(302, "Found").header("location", format!("/redirect/{}", n - 1)),
        },

        (_, ["redirect-to"]) => {
            let args: HashMap<_, _> = req.url.query_pairs().into_owned().collect();
            let Some(target) = args.get("url") else {
                return bad_request();
            };
            let status = args
                .get("status_code")
                .and_then(|s| s.parse().ok())
                .unwrap_or(302);
            Answer::new(status, "").header("location", target.as_str())
        }

        (_, ["cookies"]) => {
            let cookies: HashMap<String, String> = req
                .header("cookie")
                .unwrap_or("")
                .split(';')
                .filter_map(|s| s.split_once('='))
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .collect();
            Answer::new(200, "OK").json(&serde_json::json!({ "cookies": cookies }))
        }

        (_, ["cookies", "set"]) => {
            let mut answer = Answer::new(302, "Found").header("location", "/cookies");
            for (k, v) in req.url.query_pairs() {
                answer = answer.header("set-cookie", format!("{}={}; Path=/", k, v));
            }
            answer
        }

        (_, ["basic-auth", user, pass]) => {
            let expected = format!("Basic {}", STANDARD.encode(format!("{}:{}", user, pass)));
            if req.header("authorization") == Some(expected.as_str()) {
                Answer::new(200, "OK")
                    .json(&serde_json::json!({ "authenticated": true, "user": user }))
            } else {
                Answer::new(401, "Unauthorized")
                    .header("www-authenticate", "Basic realm=\"Fake Realm\"")
            }
        }

        (_, ["gzip"]) => {
            let body = serde_json::to_vec(&echo(req)).unwrap_or_default();
            let mut enc = GzEncoder::new(vec![], Compression::default());
            compressed(enc.write_all(&body).and_then(|_| enc.finish()), "gzip")
        }

        (_, ["deflate"]) => {
            let body = serde_json::to_vec(&echo(req)).unwrap_or_default();
            let mut enc = ZlibEncoder::new(vec![], Compression::default());
            compressed(enc.write_all(&body).and_then(|_| enc.finish()), "deflate")
        }

        (_, ["encoding", "latin1"]) => Answer::new(200, "OK").bytes(
            "text/plain; charset=ISO-8859-1",
            // "café" in latin1
            vec![b'c', b'a', b'f', 0xe9],
        ),

        (_, ["stream-lines", n]) => match n.parse::<usize>() {
            Ok(n) => {
                let chunks = (0..n).map(|i| format!("line {}\n", i).into_bytes()).collect();
                let mut answer = Answer::new(200, "OK").header("content-type", "text/plain");
                answer.chunks = Some(chunks);
                answer
            }
            Err(_) => bad_request(),
        },

        _ => Answer::new(404, "Not Found"),
    }
}

fn bad_request() -> Answer {
    Answer::new(400, "Bad Request")
}

fn compressed(body: io::Result<Vec<u8>>, coding: &str) -> Answer {
    match body {
        Ok(body) => Answer::new(200, "OK")
            .bytes("application/json", body)
            .header("content-encoding", coding),
        Err(_) => Answer::new(500, "Internal Server Error"),
    }
}

fn echo(req: &Incoming) -> Echo {
    let mut echo = Echo {
        method: req.method.clone(),
        args: collect_args(req.url.query_pairs().into_owned()),
        url: req.url.to_string(),
        ..Default::default()
    };

    for (k, v) in &req.headers {
        let e = echo.headers.entry(k.clone()).or_default();
        if !e.is_empty() {
            e.push_str(", ");
        }
        e.push_str(v);
    }

    if req.body.is_empty() {
        return echo;
    }

    let content_type = req.header("content-type").unwrap_or("");
    let mime = content_type.to_ascii_lowercase();

    if mime.starts_with("application/x-www-form-urlencoded") {
        echo.form = collect_args(url::form_urlencoded::parse(&req.body).into_owned());
    } else if mime.starts_with("multipart/form-data") {
        let boundary = content_type
            .split(';')
            .find_map(|s| s.trim().strip_prefix("boundary="));

        if let Some(boundary) = boundary {
            let (form, files) = parse_multipart(&req.body, boundary);
            echo.form = collect_args(form);
            echo.files = files;
        }
    }

    // Attempt to interpret the body as a string.
    let string = match String::from_utf8(req.body.clone()) {
        Ok(s) => s,
        Err(e) => format!("{:0x?}", e.into_bytes()),
    };

    // Attempt to interpret the body as json.
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(&string) {
        echo.json = Some(json);
    }

    echo.data = Some(string);

    echo
}

type Parts = (Vec<(String, String)>, HashMap<String, String>);

fn parse_multipart(body: &[u8], boundary: &str) -> Parts {
    let mut form = vec![];
    let mut files = HashMap::new();

    let body = String::from_utf8_lossy(body);
    let delimiter = format!("--{}", boundary);

    for part in body.split(delimiter.as_str()).skip(1) {
        if part.starts_with("--") {
            break;
        }

        let part = part.strip_prefix("\r\n").unwrap_or(part);
        let part = part.strip_suffix("\r\n").unwrap_or(part);

        let Some((head, content)) = part.split_once("\r\n\r\n") else {
            continue;
        };

        let name = disposition_param(head, "name");
        let filename = disposition_param(head, "filename");

        match (name, filename) {
            (Some(name), Some(_)) => {
                files.insert(name, content.to_string());
            }
            (Some(name), None) => form.push((name, content.to_string())),
            _ => {}
        }
    }

    (form, files)
}

fn disposition_param(head: &str, key: &str) -> Option<String> {
    let line = head
        .lines()
        .find(|l| l.to_ascii_lowercase().starts_with("content-disposition:"))?;

    line.split(';').skip(1).find_map(|s| {
        let (k, v) = s.split_once('=')?;
        if k.trim() == key {
            Some(v.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn write_answer(o: &mut impl io::Write, req: &Incoming, answer: Answer) -> io::Result<()> {
    let mut head = format!("HTTP/1.1 {} {}\r\n", answer.status, answer.text);

    for (k, v) in &answer.headers {
        head.push_str(&format!("{}: {}\r\n", k, v));
    }
    head.push_str("server: slothbin\r\n");
    head.push_str("connection: close\r\n");

    let no_body = req.method == "HEAD" || matches!(answer.status, 204 | 304);

    match &answer.chunks {
        Some(_) => head.push_str("transfer-encoding: chunked\r\n"),
        None if answer.status == 204 => {}
        None => head.push_str(&format!("content-length: {}\r\n", answer.body.len())),
    }
    head.push_str("\r\n");

    o.write_all(head.as_bytes())?;

    if no_body {
        return Ok(());
    }

    match answer.chunks {
        Some(chunks) => {
            for chunk in chunks {
                write!(o, "{:x}\r\n", chunk.len())?;
                o.write_all(&chunk)?;
                o.write_all(b"\r\n")?;
                o.flush()?;
            }
            o.write_all(b"0\r\n\r\n")?;
        }
        None => o.write_all(&answer.body)?,
    }

    Ok(())
}
