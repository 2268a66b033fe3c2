use http::{header, HeaderMap, Method};

use crate::core::error::{RuntimeError, RuntimeResult};

/// Header carrying the Ajax marker
pub const X_REQUESTED_WITH: &str = "x-requested-with";

/// Retrieves the value of a specific header.
///
/// Returns `None` if the header is not present or its value is not valid UTF-8.
pub fn get_header_value<'a>(headers: &'a HeaderMap, key: &str) -> Option<&'a str> {
    headers.get(key).and_then(|value| value.to_str().ok())
}

/// Retrieves the value of a specific cookie from the `Cookie` header.
///
/// Parses simple `key=value` pairs separated by `;` and returns the first
/// occurrence. Quoted or encoded values are returned as-is.
pub fn get_cookie_value<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    for cookie_header_value in headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
    {
        for item in cookie_header_value.split(';') {
            if let Some((k, v)) = item.trim().split_once('=') {
                if k.trim() == cookie_name {
                    return Some(v.trim());
                }
            }
        }
    }
    log::debug!("Cookie '{cookie_name}' not found");
    None
}

/// Builds a `Set-Cookie` header value.
///
/// A `max_age` below zero produces a session cookie. Names must be tokens
/// and values plain cookie octets (RFC 6265), so neither can smuggle in
/// attributes through `;` or `,`.
pub fn build_set_cookie(name: &str, value: &str, max_age: i64, path: &str) -> RuntimeResult<String> {
    if name.is_empty() || !name.bytes().all(is_token_byte) {
        return Err(RuntimeError::InvalidArgument(format!(
            "invalid cookie name '{name}'"
        )));
    }
    if !value.bytes().all(is_cookie_octet) {
        return Err(RuntimeError::InvalidArgument(format!(
            "invalid value for cookie '{name}'"
        )));
    }

    let mut cookie = format!("{name}={value}; Path={path}");
    if max_age >= 0 {
        cookie.push_str(&format!("; Max-Age={max_age}"));
    }
    Ok(cookie)
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b)
}

fn is_cookie_octet(b: u8) -> bool {
    b.is_ascii_graphic() && !matches!(b, b'"' | b',' | b';' | b'\\')
}

/// True for a POST request whose content type starts with `multipart/`.
pub fn is_multipart_content(method: &Method, headers: &HeaderMap) -> bool {
    if method != Method::POST {
        return false;
    }
    get_header_value(headers, header::CONTENT_TYPE.as_str())
        .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("multipart/"))
        .unwrap_or(false)
}

pub fn is_form_urlencoded(headers: &HeaderMap) -> bool {
    get_header_value(headers, header::CONTENT_TYPE.as_str())
        .map(|ct| {
            ct.to_ascii_lowercase()
                .starts_with("application/x-www-form-urlencoded")
        })
        .unwrap_or(false)
}

/// First language tag of the `Accept-Language` header, ignoring weights.
pub fn get_preferred_language(headers: &HeaderMap) -> Option<&str> {
    get_header_value(headers, header::ACCEPT_LANGUAGE.as_str()).and_then(|value| {
        value
            .split(',')
            .map(|tag| tag.split(';').next().unwrap_or("").trim())
            .find(|tag| !tag.is_empty() && *tag != "*")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; sid = abc123 ;flag"),
        );
        assert_eq!(get_cookie_value(&headers, "theme"), Some("dark"));
        assert_eq!(get_cookie_value(&headers, "sid"), Some("abc123"));
        assert_eq!(get_cookie_value(&headers, "flag"), None);
        assert_eq!(get_cookie_value(&HeaderMap::new(), "theme"), None);
    }

    #[test]
    fn test_set_cookie() {
        assert_eq!(build_set_cookie("a", "1", 60, "/").unwrap(), "a=1; Path=/; Max-Age=60");
        assert_eq!(build_set_cookie("a", "1", -1, "/").unwrap(), "a=1; Path=/");
        assert_eq!(build_set_cookie("a", "", 0, "/").unwrap(), "a=; Path=/; Max-Age=0");
    }

    #[test]
    fn test_set_cookie_rejects_attribute_injection() {
        for value in ["x; Domain=evil", "x,y", "two words", "\"quoted\"", "back\\slash"] {
            let err = build_set_cookie("sid", value, 60, "/").unwrap_err();
            assert!(matches!(err, RuntimeError::InvalidArgument(_)), "{value}");
        }
        assert!(build_set_cookie("sid;Path", "1", 60, "/").is_err());
        assert!(build_set_cookie("", "1", 60, "/").is_err());
    }

    #[test]
    fn test_multipart_detection() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("Multipart/Form-Data; boundary=xyz"),
        );
        assert!(is_multipart_content(&Method::POST, &headers));
        assert!(!is_multipart_content(&Method::GET, &headers));
        assert!(!is_multipart_content(&Method::POST, &HeaderMap::new()));
    }

    #[test]
    fn test_preferred_language() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("fr-CH;q=0.9, en;q=0.8"),
        );
        assert_eq!(get_preferred_language(&headers), Some("fr-CH"));
        assert_eq!(get_preferred_language(&HeaderMap::new()), None);
    }
}
