use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Version};

use super::ResponseHead;
use crate::error::Result;
use crate::{Error, MAX_RESPONSE_HEADERS};

/// Parse a response head from `input`.
///
/// Returns `None` until the input holds the entire head. On success the
/// `usize` is how many bytes of the input the head used.
pub(crate) fn try_parse_response(input: &[u8]) -> Result<Option<(usize, ResponseHead)>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS]; // ~3k for 128 headers
    let mut res = httparse::Response::new(&mut headers);

    let input_used = match res.parse(input) {
        Ok(httparse::Status::Complete(v)) => v,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(httparse::Error::TooManyHeaders) => return Err(Error::ResponseHeadTooLarge),
        Err(e) => return Err(e.into()),
    };

    let version = match res.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        _ => return Err(Error::MissingResponseVersion),
    };

    let code = res.code.ok_or(Error::ResponseMissingStatus)?;
    let status = StatusCode::from_u16(code).map_err(|_| Error::ResponseInvalidStatus)?;

    let mut map = HeaderMap::with_capacity(res.headers.len());
    for h in res.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|e| Error::HttpParseFail(e.to_string()))?;
        let value =
            HeaderValue::from_bytes(h.value).map_err(|e| Error::HttpParseFail(e.to_string()))?;
        map.append(name, value);
    }

    let head = ResponseHead {
        version,
        status,
        reason: res.reason.unwrap_or("").to_string(),
        headers: map,
    };

    Ok(Some((input_used, head)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_then_complete() {
        let input =
            b"HTTP/1.1 302 Found\r\nLocation: /next\r\nset-cookie: a=1\r\nSet-Cookie: b=2\r\n";
        assert!(try_parse_response(input).unwrap().is_none());

        let mut full = input.to_vec();
        full.extend_from_slice(b"\r\nbody");

        let (used, head) = try_parse_response(&full).unwrap().unwrap();
        assert_eq!(used, full.len() - 4);
        assert_eq!(head.version, Version::HTTP_11);
        assert_eq!(head.status, StatusCode::FOUND);
        assert_eq!(head.reason, "Found");
        assert_eq!(head.headers.get("location").unwrap(), "/next");
        assert_eq!(head.headers.get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn no_headers_no_reason() {
        let (_, head) = try_parse_response(b"HTTP/1.0 404\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.version, Version::HTTP_10);
        assert_eq!(head.status, StatusCode::NOT_FOUND);
        assert_eq!(head.reason, "");
        assert!(head.headers.is_empty());
    }

    #[test]
    fn garbage_fails() {
        assert!(try_parse_response(b"SMTP hello\r\n\r\n").is_err());
    }

    #[test]
    fn too_many_headers() {
        let mut input = b"HTTP/1.1 200 OK\r\n".to_vec();
        for i in 0..=MAX_RESPONSE_HEADERS {
            input.extend_from_slice(format!("x-{}: 1\r\n", i).as_bytes());
        }
        input.extend_from_slice(b"\r\n");

        let err = try_parse_response(&input).unwrap_err();
        assert!(matches!(err, Error::ResponseHeadTooLarge));
    }
}
