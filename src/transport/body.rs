use std::io::Write;

use http::{HeaderMap, Method, StatusCode, Version};

use crate::error::Result;
use crate::util::{compare_lowercase_ascii, find_crlf};
use crate::Error;

const DEFAULT_CHUNK_SIZE: usize = 10 * 1024;

/// Longest chunk size line accepted, extensions included.
const MAX_CHUNK_SIZE_LINE: usize = 1024;

/// How the request body goes on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum BodyWriter {
    #[default]
    None,
    /// What's left to send of a content-length.
    Sized(u64),
    Chunked,
}

impl BodyWriter {
    /// Derive the mode from the request headers.
    pub fn for_request<'a, I>(headers: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut mode = BodyWriter::None;

        for (name, value) in headers {
            if compare_lowercase_ascii(name, "content-length") {
                let len = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| Error::BadContentLengthHeader)?;
                if !matches!(mode, BodyWriter::Chunked) {
                    mode = BodyWriter::Sized(len);
                }
            } else if compare_lowercase_ascii(name, "transfer-encoding")
                && value
                    .split(',')
                    .any(|v| compare_lowercase_ascii(v.trim(), "chunked"))
            {
                mode = BodyWriter::Chunked;
            }
        }

        Ok(mode)
    }

    pub fn write(&mut self, input: &[u8], w: &mut impl Write) -> Result<()> {
        match self {
            BodyWriter::None => {
                if !input.is_empty() {
                    return Err(Error::BodyLargerThanContentLength);
                }
            }
            BodyWriter::Sized(left) => {
                if input.len() as u64 > *left {
                    return Err(Error::BodyLargerThanContentLength);
                }
                w.write_all(input)?;
                *left -= input.len() as u64;
            }
            BodyWriter::Chunked => {
                // Zero length chunks would end the body.
                for chunk in input.chunks(DEFAULT_CHUNK_SIZE) {
                    write!(w, "{:x}\r\n", chunk.len())?;
                    w.write_all(chunk)?;
                    write!(w, "\r\n")?;
                }
            }
        }

        trace!("Wrote body part: {}", input.len());

        Ok(())
    }

    pub fn finish(&self, w: &mut impl Write) -> Result<()> {
        match self {
            BodyWriter::Sized(left) if *left > 0 => Err(Error::BodyShorterThanContentLength),
            BodyWriter::Chunked => {
                w.write_all(b"0\r\n\r\n")?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Where a reader is in a `transfer-encoding: chunked` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Chunked {
    /// Expecting `<hex size>[;ext]\r\n`.
    SizeLine,
    /// Bytes left of the current chunk.
    Data(u64),
    /// The `\r\n` closing the chunk data.
    DataEnd,
    /// Trailer lines after the last chunk, up to an empty line.
    Trailers,
    Done,
}

/// How the response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyReader {
    /// No body is expected either due to the status or method.
    NoBody,
    /// Delimited by content-length.
    /// The value is what's left to receive.
    LengthDelimited(u64),
    /// Chunked transfer encoding
    Chunked(Chunked),
    /// Expect remote to close at end of body.
    CloseDelimited,
}

impl BodyReader {
    pub fn for_response(
        version: Version,
        method: &Method,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> Result<Self> {
        let status_code = status.as_u16();
        let is_success = status.is_success();
        let is_informational = status.is_informational();

        let has_no_body =
            // https://datatracker.ietf.org/doc/html/rfc2616#section-4.3
            // All responses to the HEAD request method
            // MUST NOT include a message-body, even though the presence of entity-
            // header fields might lead one to believe they do.
            method == Method::HEAD ||
            // A client MUST ignore any Content-Length or Transfer-Encoding
            // header fields received in a successful response to CONNECT.
            is_success && method == Method::CONNECT ||
            // All 1xx (informational), 204 (no content), and 304 (not modified) responses
            // MUST NOT include a message-body.
            is_informational ||
            matches!(status_code, 204 | 304);

        if has_no_body {
            return Ok(Self::NoBody);
        }

        Self::header_defined(version == Version::HTTP_10, headers)
    }

    fn header_defined(http10: bool, headers: &HeaderMap) -> Result<Self> {
        let mut lengths = headers.get_all("content-length").iter();

        let content_length = match lengths.next() {
            Some(v) => {
                let v = v
                    .to_str()
                    .ok()
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .ok_or(Error::BadContentLengthHeader)?;
                if lengths.next().is_some() {
                    return Err(Error::TooManyContentLengthHeaders);
                }
                Some(v)
            }
            None => None,
        };

        // Header can repeat, stop looking if we found "chunked"
        let chunked = headers.get_all("transfer-encoding").iter().any(|v| {
            v.to_str()
                .map(|v| {
                    v.split(',')
                        .any(|v| compare_lowercase_ascii(v.trim(), "chunked"))
                })
                .unwrap_or(false)
        });

        if chunked && !http10 {
            // https://datatracker.ietf.org/doc/html/rfc2616#section-4.4
            // Messages MUST NOT include both a Content-Length header field and a
            // non-identity transfer-coding. If the message does include a non-
            // identity transfer-coding, the Content-Length MUST be ignored.
            return Ok(Self::Chunked(Chunked::SizeLine));
        }

        if let Some(len) = content_length {
            return Ok(Self::LengthDelimited(len));
        }

        Ok(Self::CloseDelimited)
    }

    /// Returns `(input_used, output_used)`.
    pub fn read(&mut self, src: &[u8], dst: &mut [u8]) -> Result<(usize, usize)> {
        let part = match self {
            BodyReader::LengthDelimited(_) => self.read_limit(src, dst),
            BodyReader::Chunked(_) => self.read_chunked(src, dst),
            BodyReader::CloseDelimited => self.read_unlimit(src, dst),
            BodyReader::NoBody => return Ok((0, 0)),
        }?;

        Ok(part)
    }

    fn read_limit(&mut self, src: &[u8], dst: &mut [u8]) -> Result<(usize, usize)> {
        let Self::LengthDelimited(left) = self else {
            unreachable!()
        };
        let left_usize = (*left).min(usize::MAX as u64) as usize;

        let to_read = src.len().min(dst.len()).min(left_usize);

        dst[..to_read].copy_from_slice(&src[..to_read]);

        *left -= to_read as u64;

        Ok((to_read, to_read))
    }

    fn read_chunked(&mut self, src: &[u8], dst: &mut [u8]) -> Result<(usize, usize)> {
        let BodyReader::Chunked(state) = self else {
            unreachable!();
        };

        let mut input_used = 0;
        let mut output_used = 0;

        loop {
            let rest = &src[input_used..];

            match *state {
                Chunked::SizeLine => {
                    let Some(end) = find_crlf(rest) else {
                        if rest.len() > MAX_CHUNK_SIZE_LINE {
                            return Err(Error::ChunkExpectedCrLf);
                        }
                        break;
                    };
                    *state = match chunk_size(&rest[..end])? {
                        0 => Chunked::Trailers,
                        n => Chunked::Data(n),
                    };
                    input_used += end + 2;
                }

                Chunked::Data(left) => {
                    let left_usize = left.min(usize::MAX as u64) as usize;
                    let n = rest.len().min(dst.len() - output_used).min(left_usize);
                    if n == 0 {
                        break;
                    }

                    dst[output_used..output_used + n].copy_from_slice(&rest[..n]);
                    input_used += n;
                    output_used += n;

                    *state = match left - n as u64 {
                        0 => Chunked::DataEnd,
                        left => Chunked::Data(left),
                    };
                }

                Chunked::DataEnd => {
                    if rest.len() < 2 {
                        break;
                    }
                    if &rest[..2] != b"\r\n" {
                        return Err(Error::ChunkExpectedCrLf);
                    }
                    input_used += 2;
                    *state = Chunked::SizeLine;
                }

                // Trailer headers are skipped.
                Chunked::Trailers => {
                    let Some(end) = find_crlf(rest) else {
                        break;
                    };
                    input_used += end + 2;
                    if end == 0 {
                        *state = Chunked::Done;
                    }
                }

                Chunked::Done => break,
            }
        }

        trace!("Read chunked: {} -> {}", input_used, output_used);

        Ok((input_used, output_used))
    }

    fn read_unlimit(&mut self, src: &[u8], dst: &mut [u8]) -> Result<(usize, usize)> {
        let to_read = src.len().min(dst.len());

        dst[..to_read].copy_from_slice(&src[..to_read]);

        Ok((to_read, to_read))
    }

    pub fn is_ended(&self) -> bool {
        match self {
            BodyReader::NoBody => true,
            BodyReader::LengthDelimited(v) => *v == 0,
            BodyReader::Chunked(v) => *v == Chunked::Done,
            BodyReader::CloseDelimited => false,
        }
    }

    pub fn is_close_delimited(&self) -> bool {
        matches!(self, BodyReader::CloseDelimited)
    }
}

/// The size of a chunk size line without its `\r\n`.
fn chunk_size(line: &[u8]) -> Result<u64> {
    let digits = match line.iter().position(|c| *c == b';') {
        Some(i) => &line[..i],
        None => line,
    };

    let digits = std::str::from_utf8(digits)
        .map_err(|_| Error::ChunkLenNotAscii)?
        .trim();

    // More than 16 hex digits overflows a u64.
    if digits.is_empty() || digits.len() > 16 {
        return Err(Error::ChunkLenNotANumber);
    }

    u64::from_str_radix(digits, 16).map_err(|_| Error::ChunkLenNotANumber)
}

#[cfg(test)]
mod test {
    use http::HeaderValue;

    use super::*;

    #[test]
    fn writer_mode_from_headers() {
        let mode = BodyWriter::for_request([("Content-Length", "5")]).unwrap();
        assert_eq!(mode, BodyWriter::Sized(5));

        let mode = BodyWriter::for_request([("transfer-encoding", "gzip, Chunked")]).unwrap();
        assert_eq!(mode, BodyWriter::Chunked);

        let mode = BodyWriter::for_request([("accept", "*/*")]).unwrap();
        assert_eq!(mode, BodyWriter::None);
    }

    #[test]
    fn sized_writer_checks_length() {
        let mut out = vec![];
        let mut mode = BodyWriter::Sized(4);

        mode.write(b"ab", &mut out).unwrap();
        assert!(matches!(
            mode.finish(&mut out),
            Err(Error::BodyShorterThanContentLength)
        ));
        assert!(matches!(
            mode.write(b"cde", &mut out),
            Err(Error::BodyLargerThanContentLength)
        ));
        mode.write(b"cd", &mut out).unwrap();
        mode.finish(&mut out).unwrap();

        assert_eq!(out, b"abcd");
    }

    #[test]
    fn chunked_writer() {
        let mut out = vec![];
        let mut mode = BodyWriter::Chunked;

        mode.write(b"hello", &mut out).unwrap();
        mode.write(b"", &mut out).unwrap();
        mode.finish(&mut out).unwrap();

        assert_eq!(out, b"5\r\nhello\r\n0\r\n\r\n");
    }

    #[test]
    fn reader_modes() {
        let mut headers = HeaderMap::new();
        let get = Method::GET;

        let r = BodyReader::for_response(Version::HTTP_11, &get, StatusCode::OK, &headers);
        assert!(r.unwrap().is_close_delimited());

        let r = BodyReader::for_response(Version::HTTP_11, &Method::HEAD, StatusCode::OK, &headers);
        assert_eq!(r.unwrap(), BodyReader::NoBody);

        let r = BodyReader::for_response(Version::HTTP_11, &get, StatusCode::NO_CONTENT, &headers);
        assert_eq!(r.unwrap(), BodyReader::NoBody);

        headers.insert("content-length", HeaderValue::from_static("10"));
        let r = BodyReader::for_response(Version::HTTP_11, &get, StatusCode::OK, &headers);
        assert_eq!(r.unwrap(), BodyReader::LengthDelimited(10));

        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        let r = BodyReader::for_response(Version::HTTP_11, &get, StatusCode::OK, &headers);
        assert_eq!(r.unwrap(), BodyReader::Chunked(Chunked::SizeLine));

        // http/1.0 has no chunked.
        let r = BodyReader::for_response(Version::HTTP_10, &get, StatusCode::OK, &headers);
        assert_eq!(r.unwrap(), BodyReader::LengthDelimited(10));
    }

    #[test]
    fn reader_rejects_double_content_length() {
        let mut headers = HeaderMap::new();
        headers.append("content-length", HeaderValue::from_static("1"));
        headers.append("content-length", HeaderValue::from_static("2"));

        let r = BodyReader::for_response(Version::HTTP_11, &Method::GET, StatusCode::OK, &headers);
        assert!(matches!(r, Err(Error::TooManyContentLengthHeaders)));
    }

    fn dechunk(input: &[u8], step: usize) -> Result<Vec<u8>> {
        let mut r = BodyReader::Chunked(Chunked::SizeLine);
        let mut buf = vec![];
        let mut out = vec![];
        let mut dst = [0; 4];

        for part in input.chunks(step) {
            buf.extend_from_slice(part);
            loop {
                let (used, n) = r.read(&buf, &mut dst)?;
                buf.drain(..used);
                out.extend_from_slice(&dst[..n]);
                if used == 0 && n == 0 {
                    break;
                }
            }
        }

        assert!(r.is_ended(), "not ended: {:?}", r);
        assert!(buf.is_empty());

        Ok(out)
    }

    #[test]
    fn chunked_any_input_split() -> Result<()> {
        let input = b"3\r\nabc\r\na;name=val\r\n0123456789\r\n0\r\n\r\n";
        for step in 1..input.len() {
            assert_eq!(dechunk(input, step)?, b"abc0123456789", "step {}", step);
        }
        Ok(())
    }

    #[test]
    fn chunked_semicolon_in_data() -> Result<()> {
        assert_eq!(dechunk(b"9\r\nnot meta;\r\n0\r\n\r\n", 64)?, b"not meta;");
        Ok(())
    }

    #[test]
    fn chunked_trailers_skipped() -> Result<()> {
        let input = b"2\r\nok\r\n0\r\nx-trailer: 1\r\nx-other: 2\r\n\r\n";
        assert_eq!(dechunk(input, 5)?, b"ok");
        Ok(())
    }

    #[test]
    fn chunked_waits_for_size_line() {
        let mut r = BodyReader::Chunked(Chunked::SizeLine);
        let mut dst = [0; 8];
        assert_eq!(r.read(b"2", &mut dst).unwrap(), (0, 0));
        assert_eq!(r.read(b"2\r", &mut dst).unwrap(), (0, 0));
        assert_eq!(r.read(b"2\r\n", &mut dst).unwrap(), (3, 0));
        assert_eq!(r, BodyReader::Chunked(Chunked::Data(2)));
    }

    #[test]
    fn chunked_errors() {
        let mut dst = [0; 8];

        let mut r = BodyReader::Chunked(Chunked::SizeLine);
        let err = r.read(b"2\r\nOKxx", &mut dst).unwrap_err();
        assert!(matches!(err, Error::ChunkExpectedCrLf));

        let mut r = BodyReader::Chunked(Chunked::SizeLine);
        let err = r.read(b"zz\r\n", &mut dst).unwrap_err();
        assert!(matches!(err, Error::ChunkLenNotANumber));

        let mut r = BodyReader::Chunked(Chunked::SizeLine);
        let err = r.read(b"fffffffffffffffff\r\n", &mut dst).unwrap_err();
        assert!(matches!(err, Error::ChunkLenNotANumber));

        let mut r = BodyReader::Chunked(Chunked::SizeLine);
        let long = vec![b'1'; MAX_CHUNK_SIZE_LINE + 1];
        let err = r.read(&long, &mut dst).unwrap_err();
        assert!(matches!(err, Error::ChunkExpectedCrLf));
    }

    #[test]
    fn length_delimited_read() {
        let mut r = BodyReader::LengthDelimited(3);
        let mut dst = [0; 10];
        assert_eq!(r.read(b"abcdef", &mut dst).unwrap(), (3, 3));
        assert!(r.is_ended());
        assert_eq!(&dst[..3], b"abc");
    }
}
