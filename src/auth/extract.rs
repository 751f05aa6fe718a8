use std::collections::HashMap;

use axum::extract::Query;
use axum::http::{header, request::Parts};

/// Query parameter carrying a credential when no header can be set
pub const TOKEN_QUERY_PARAM: &str = "access_token";

/// Extract a bearer credential, preferring the Authorization header over the
/// query string.
pub fn extract_token(parts: &Parts) -> Option<String> {
    if let Some(token) = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
    {
        return Some(token.to_string());
    }

    Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(mut query)| query.remove(TOKEN_QUERY_PARAM))
        .filter(|token| !token.is_empty())
}

fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(uri: &str, authorization: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_header_token() {
        let p = parts("/websocket", Some("Bearer abc.def"));
        assert_eq!(extract_token(&p).as_deref(), Some("abc.def"));
    }

    #[test]
    fn test_query_token() {
        let p = parts("/websocket?access_token=xyz&x=1", None);
        assert_eq!(extract_token(&p).as_deref(), Some("xyz"));
    }

    #[test]
    fn test_header_takes_precedence() {
        let p = parts("/websocket?access_token=from-query", Some("bearer from-header"));
        assert_eq!(extract_token(&p).as_deref(), Some("from-header"));
    }

    #[test]
    fn test_non_bearer_header_falls_back_to_query() {
        let p = parts("/websocket?access_token=q", Some("Basic dXNlcjpwYXNz"));
        assert_eq!(extract_token(&p).as_deref(), Some("q"));
    }

    #[test]
    fn test_missing_token() {
        assert!(extract_token(&parts("/websocket", None)).is_none());
        assert!(extract_token(&parts("/websocket?access_token=", Some("Bearer "))).is_none());
    }
}
