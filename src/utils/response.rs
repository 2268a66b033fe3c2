//! Response building for the generic error page.

use http::{header, HeaderValue, Response, StatusCode};

/// Standard content types
pub mod content_type {
    pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
}

pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Build a plain-text error response
    pub fn error_http(status: StatusCode, message: &str) -> Response<Vec<u8>> {
        let mut response = Response::new(message.as_bytes().to_vec());
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(content_type::TEXT_PLAIN),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response() {
        let response = ResponseBuilder::error_http(StatusCode::BAD_REQUEST, "Invalid input");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.body(), b"Invalid input");
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            content_type::TEXT_PLAIN
        );
    }
}
