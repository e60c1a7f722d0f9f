use http::{HeaderMap, HeaderValue, Method, StatusCode};

pub(crate) trait MethodExt {
    fn need_request_body(&self) -> bool;
    fn allows_redirects_by_default(&self) -> bool;
}

impl MethodExt for Method {
    fn need_request_body(&self) -> bool {
        self == Method::POST || self == Method::PUT || self == Method::PATCH
    }

    fn allows_redirects_by_default(&self) -> bool {
        self != Method::HEAD
    }
}

pub(crate) trait StatusExt {
    /// Detect 301/302/303/307/308, the redirects we follow.
    fn is_followed_redirect(&self) -> bool;

    /// Detect 303, which turns the follow-up into a GET
    fn is_see_other(&self) -> bool;
}

impl StatusExt for StatusCode {
    fn is_followed_redirect(&self) -> bool {
        matches!(self.as_u16(), 301 | 302 | 303 | 307 | 308)
    }

    fn is_see_other(&self) -> bool {
        *self == StatusCode::SEE_OTHER
    }
}

pub(crate) trait HeaderMapExt {
    /// Every value of a header name, joined with `, `.
    fn joined(&self) -> HeaderMap;

    /// Lookup a header value as a `&str`.
    fn get_str(&self, name: &str) -> Option<&str>;
}

impl HeaderMapExt for HeaderMap {
    fn joined(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.keys_len());

        for name in self.keys() {
            // Joining set-cookie is lossy since cookie dates contain commas.
            if *name == http::header::SET_COOKIE {
                for v in self.get_all(name) {
                    map.append(name.clone(), v.clone());
                }
                continue;
            }

            let mut values = self.get_all(name).iter();
            let Some(first) = values.next() else {
                continue;
            };

            let mut joined = first.as_bytes().to_vec();
            for v in values {
                joined.extend_from_slice(b", ");
                joined.extend_from_slice(v.as_bytes());
            }

            // Joining valid header values with ", " is always a valid header value.
            if let Ok(v) = HeaderValue::from_bytes(&joined) {
                map.insert(name.clone(), v);
            }
        }

        map
    }

    fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.to_str().ok())
    }
}
