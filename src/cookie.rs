//! Cookies and the cookie jar.
//!
//! A [`CookieJar`] is an ordered, name keyed collection. Merging a cookie
//! with a name already in the jar overwrites the value in place, which keeps
//! the serialized `Cookie` header in first-insertion order.

use std::fmt;

/// A single cookie record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    attributes: Vec<(String, Option<String>)>,
}

impl Cookie {
    /// Create a cookie without attributes.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Cookie {
            name: name.into(),
            value: value.into(),
            attributes: vec![],
        }
    }

    /// Parse a `Set-Cookie` header value.
    ///
    /// `name=value; Path=/; HttpOnly`
    ///
    /// Returns `None` if the first segment is not a `name=value` pair.
    pub fn parse_set_cookie(line: &str) -> Option<Cookie> {
        let mut segments = line.split(';');

        let (name, value) = segments.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let attributes = segments
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| match s.split_once('=') {
                Some((k, v)) => (k.trim().to_string(), Some(v.trim().to_string())),
                None => (s.to_string(), None),
            })
            .collect();

        Some(Cookie {
            name: name.to_string(),
            value: strip_quotes(value.trim()).to_string(),
            attributes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Attributes in the order they appeared, such as `("Path", Some("/"))`.
    pub fn attributes(&self) -> &[(String, Option<String>)] {
        &self.attributes
    }

    /// Look up an attribute by case insensitive name.
    ///
    /// Flag attributes like `HttpOnly` are `Some(None)`.
    pub fn attribute(&self, key: &str) -> Option<Option<&str>> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_deref())
    }

    /// Builder style attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.attributes.push((key.into(), value));
        self
    }
}

fn strip_quotes(v: &str) -> &str {
    if v.len() >= 2 && v.starts_with('"') && v.ends_with('"') {
        &v[1..v.len() - 1]
    } else {
        v
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Ordered collection of cookies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `Cookie` request header value, `a=1; b=2`.
    ///
    /// Segments without `=` are ignored.
    pub fn parse_header(header: &str) -> Self {
        let mut jar = CookieJar::new();
        for segment in header.split(';') {
            if let Some((k, v)) = segment.split_once('=') {
                let k = k.trim();
                if !k.is_empty() {
                    jar.insert(Cookie::new(k, strip_quotes(v.trim())));
                }
            }
        }
        jar
    }

    /// Insert a cookie, overwriting any cookie with the same name.
    pub fn insert(&mut self, cookie: Cookie) {
        match self.cookies.iter_mut().find(|c| c.name == cookie.name) {
            Some(existing) => *existing = cookie,
            None => self.cookies.push(cookie),
        }
    }

    /// Merge all cookies of `other` into this jar. Values from `other` win.
    pub fn merge(&mut self, other: &CookieJar) {
        for c in &other.cookies {
            self.insert(c.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }

    /// Value of the cookie with the given name.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(|c| c.value())
    }

    pub fn remove(&mut self, name: &str) -> Option<Cookie> {
        let idx = self.cookies.iter().position(|c| c.name == name)?;
        Some(self.cookies.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.iter()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Serialize as a `Cookie` header value in insertion order.
    pub fn to_header(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CookieJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.cookies.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CookieJar {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut jar = CookieJar::new();
        jar.extend(iter);
        jar
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for CookieJar {
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (k, v) in iter {
            self.insert(Cookie::new(k, v));
        }
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for CookieJar {
    fn from(value: [(K, V); N]) -> Self {
        value.into_iter().collect()
    }
}

impl<'a> IntoIterator for &'a CookieJar {
    type Item = &'a Cookie;
    type IntoIter = std::slice::Iter<'a, Cookie>;

    fn into_iter(self) -> Self::IntoIter {
        self.cookies.iter()
    }
}
