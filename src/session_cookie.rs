//! The `sid` cookie: HttpOnly, SameSite=Lax, a 10 minute max-age that mirrors
//! the session TTL so the browser and the fast store expire in lockstep.

use axum::http::header::{HeaderMap, HeaderValue, SET_COOKIE};

const COOKIE_NAME: &str = "sid";

pub fn extract_session_id(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == COOKIE_NAME).then(|| value.to_string())
    })
}

pub fn set_cookie_header(session_id: &str, max_age_seconds: i64) -> HeaderValue {
    let cookie = format!(
        "{COOKIE_NAME}={session_id}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age_seconds}"
    );
    HeaderValue::from_str(&cookie).expect("cookie header is ASCII-safe")
}

pub fn expire_cookie_header() -> HeaderValue {
    HeaderValue::from_static(concat!("sid=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0"))
}

pub fn apply_set_cookie(headers: &mut HeaderMap, value: HeaderValue) {
    headers.append(SET_COOKIE, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_sid_among_multiple_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::COOKIE, HeaderValue::from_static("foo=bar; sid=abc123; baz=qux"));
        assert_eq!(extract_session_id(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn missing_cookie_header_yields_none() {
        let headers = HeaderMap::new();
        assert_eq!(extract_session_id(&headers), None);
    }

    #[test]
    fn set_cookie_header_carries_httponly_and_samesite() {
        let value = set_cookie_header("abc", 600);
        let text = value.to_str().unwrap();
        assert!(text.contains("HttpOnly"));
        assert!(text.contains("SameSite=Lax"));
        assert!(text.contains("Max-Age=600"));
    }
}
