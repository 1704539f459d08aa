//! Bearer credential extraction

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use std::convert::Infallible;

/// Credential from `Authorization: Bearer <token>`, if any. Never rejects;
/// deciding whether a credential is required is the gatekeeper's job.
#[derive(Debug, Clone, Default)]
pub struct BearerCredential(pub Option<String>);

pub fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

impl<S> FromRequestParts<S> for BearerCredential
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(BearerCredential(bearer_from_headers(&parts.headers)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn extracts_bearer_token() {
        assert_eq!(bearer_from_headers(&headers("Bearer abc")), Some("abc".to_string()));
        assert_eq!(bearer_from_headers(&headers("bearer  abc ")), Some("abc".to_string()));
    }

    #[test]
    fn ignores_other_schemes() {
        assert_eq!(bearer_from_headers(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_from_headers(&headers("Bearer ")), None);
        assert_eq!(bearer_from_headers(&HeaderMap::new()), None);
    }
}
