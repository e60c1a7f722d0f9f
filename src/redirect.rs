//! Decides whether a hop is followed by another request.

use crate::executor::Hop;
use crate::ext::StatusExt;
use crate::{Error, Request};

/// Outcome of inspecting a completed hop.
#[derive(Debug)]
pub(crate) enum Resolution {
    /// No redirect to follow.
    Direct,
    /// The request of the next hop.
    Redirected(Request),
}

/// Inspect `hop`, the response to `request`.
pub(crate) fn resolve(request: &Request, hop: &Hop) -> Result<Resolution, Error> {
    if !request.allow_redirects() || !hop.status.is_followed_redirect() {
        return Ok(Resolution::Direct);
    }

    let location = hop.location.as_ref().ok_or(Error::NoLocationHeader)?;

    let location = location.to_str().map_err(|_| {
        Error::BadLocationHeader(String::from_utf8_lossy(location.as_bytes()).into())
    })?;

    let url = hop
        .url
        .join(location)
        .map_err(|e| Error::BadLocationHeader(format!("{}: {}", location, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::BadLocationHeader(location.to_string()));
    }

    // The cookies of this hop win over those configured on the request.
    let mut cookies = request.cookies().clone();
    cookies.merge(&hop.jar);

    debug!("Redirect {} -> {}", hop.status, url);

    let next = request.redirected(url, hop.status.is_see_other(), cookies);

    Ok(Resolution::Redirected(next))
}
