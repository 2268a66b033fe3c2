//! Incoming request and outgoing response model
//!
//! [`RawRequest`] is the unshielded request as the hosting layer hands it
//! over. [`shield::ShieldedRequest`] wraps it so that multipart and plain
//! requests expose the same parameter view.

#[cfg(feature = "multipart")]
pub mod multipart;
pub mod session;
pub mod shield;

use std::{cell::RefCell, fmt, rc::Rc, sync::Arc};

use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, Response, Uri};
use indexmap::IndexMap;
use log::{debug, warn};

use crate::core::error::{RuntimeError, RuntimeResult};
use crate::core::traits::{HttpSession, UploadParser};
use crate::property::Value;
use crate::utils::request::{get_header_value, is_form_urlencoded};
use session::MemorySession;

pub use shield::ShieldedRequest;

/// Upload parser of builds without the `multipart` feature. Every multipart
/// body fails to parse; the failure is recorded on the shielded request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUploadParser;

impl UploadParser for NoUploadParser {
    fn parse_request(&self, request: &RawRequest) -> RuntimeResult<Vec<FileItem>> {
        Err(RuntimeError::UploadParse(format!(
            "no upload parser configured for {}",
            request.uri()
        )))
    }
}

/// Ordered multi-value parameter map, in submission order
pub type ParameterMap = IndexMap<String, Vec<String>>;

/// Response shared by every context of one request
pub type ResponseHandle = Rc<RefCell<Response<Vec<u8>>>>;

pub fn new_response() -> ResponseHandle {
    Rc::new(RefCell::new(Response::new(Vec::new())))
}

/// Supported character encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Latin1,
    Ascii,
}

impl Charset {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Charset::Utf8),
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" => Some(Charset::Latin1),
            "us-ascii" | "ascii" => Some(Charset::Ascii),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Latin1 => "ISO-8859-1",
            Charset::Ascii => "US-ASCII",
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> RuntimeResult<String> {
        match self {
            Charset::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| RuntimeError::InvalidArgument(format!("invalid UTF-8: {e}"))),
            Charset::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            Charset::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
                Some(at) => Err(RuntimeError::InvalidArgument(format!(
                    "non US-ASCII byte at offset {at}"
                ))),
                None => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            },
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One part of a multipart body
#[derive(Debug, Clone)]
pub struct FileItem {
    field_name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    data: Bytes,
    form_field: bool,
}

impl FileItem {
    pub fn form_field(field_name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            field_name: field_name.into(),
            file_name: None,
            content_type: None,
            data: value.into(),
            form_field: true,
        }
    }

    pub fn file(
        field_name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: Option<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            file_name: Some(file_name.into()),
            content_type,
            data: data.into(),
            form_field: false,
        }
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_form_field(&self) -> bool {
        self.form_field
    }

    /// Decode the content, UTF-8 when no charset is given
    pub fn string(&self, charset: Option<Charset>) -> RuntimeResult<String> {
        charset.unwrap_or(Charset::Utf8).decode(&self.data)
    }
}

/// The request as received from the hosting layer
pub struct RawRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    parameters: ParameterMap,
    attributes: RefCell<IndexMap<String, Value>>,
    character_encoding: Option<Charset>,
    session: RefCell<Option<Arc<dyn HttpSession>>>,
    mock_mode: bool,
}

impl RawRequest {
    /// Build a request; query string parameters are decoded immediately.
    pub fn new(method: Method, uri: &str) -> RuntimeResult<Self> {
        let uri: Uri = uri
            .parse()
            .map_err(|e| RuntimeError::InvalidArgument(format!("invalid request uri '{uri}': {e}")))?;

        let mut parameters = ParameterMap::new();
        if let Some(query) = uri.query() {
            append_urlencoded(&mut parameters, query.as_bytes());
        }

        Ok(Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            parameters,
            attributes: RefCell::new(IndexMap::new()),
            character_encoding: None,
            session: RefCell::new(None),
            mock_mode: false,
        })
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Inject a parameter directly, the way test harnesses do
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_attribute(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.borrow_mut().insert(name.into(), value.into());
        self
    }

    pub fn with_session(self, session: Arc<dyn HttpSession>) -> Self {
        *self.session.borrow_mut() = Some(session);
        self
    }

    /// Test configuration: multipart parameter access reads the injected
    /// parameters instead of the parsed body.
    pub fn with_mock_mode(mut self, enabled: bool) -> Self {
        self.mock_mode = enabled;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        get_header_value(&self.headers, name)
    }

    pub fn content_type(&self) -> Option<&str> {
        get_header_value(&self.headers, header::CONTENT_TYPE.as_str())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_mock_mode(&self) -> bool {
        self.mock_mode
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn parameter_values(&self, name: &str) -> Option<&[String]> {
        self.parameters.get(name).map(Vec::as_slice)
    }

    pub fn parameter_map(&self) -> &ParameterMap {
        &self.parameters
    }

    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes.borrow().get(name).cloned()
    }

    pub fn set_attribute(&self, name: impl Into<String>, value: impl Into<Value>) {
        let value = value.into();
        let name = name.into();
        if value.is_null() {
            self.attributes.borrow_mut().shift_remove(&name);
        } else {
            self.attributes.borrow_mut().insert(name, value);
        }
    }

    pub fn remove_attribute(&self, name: &str) -> Option<Value> {
        self.attributes.borrow_mut().shift_remove(name)
    }

    pub fn character_encoding(&self) -> Option<Charset> {
        self.character_encoding
    }

    /// Must be applied before any parameter of the body is decoded
    pub fn set_character_encoding(&mut self, label: &str) -> RuntimeResult<()> {
        match Charset::from_label(label) {
            Some(charset) => {
                self.character_encoding = Some(charset);
                Ok(())
            }
            None => Err(RuntimeError::UnsupportedEncoding(label.to_string())),
        }
    }

    /// The session, created on demand when `create` is set
    pub fn session(&self, create: bool) -> Option<Arc<dyn HttpSession>> {
        if create {
            return Some(self.session_or_create());
        }
        self.session.borrow().clone()
    }

    pub fn session_or_create(&self) -> Arc<dyn HttpSession> {
        self.session
            .borrow_mut()
            .get_or_insert_with(|| {
                let session: Arc<dyn HttpSession> = Arc::new(MemorySession::new());
                debug!("Created session {}", session.id());
                session
            })
            .clone()
    }

    /// Merge an url-encoded form body into the parameter map
    pub(crate) fn decode_form_body(&mut self) {
        if self.method != Method::POST || !is_form_urlencoded(&self.headers) || self.body.is_empty() {
            return;
        }
        if !matches!(self.character_encoding, None | Some(Charset::Utf8)) {
            warn!(
                "Form body decoded as UTF-8 although request encoding is {:?}",
                self.character_encoding
            );
        }
        let body = self.body.clone();
        append_urlencoded(&mut self.parameters, &body);
    }
}

impl fmt::Debug for RawRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawRequest")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("parameters", &self.parameters)
            .field("mock_mode", &self.mock_mode)
            .finish()
    }
}

fn append_urlencoded(parameters: &mut ParameterMap, input: &[u8]) {
    match serde_urlencoded::from_bytes::<Vec<(String, String)>>(input) {
        Ok(pairs) => {
            for (name, value) in pairs {
                parameters.entry(name).or_default().push(value);
            }
        }
        Err(e) => warn!("Ignoring malformed url-encoded parameters: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_parameters() {
        let request = RawRequest::new(Method::GET, "/search?q=rust&tag=a&tag=b").unwrap();
        assert_eq!(request.parameter("q"), Some("rust"));
        assert_eq!(
            request.parameter_values("tag"),
            Some(&["a".to_string(), "b".to_string()][..])
        );
        assert!(request.parameter("missing").is_none());
    }

    #[test]
    fn test_form_body() {
        let mut request = RawRequest::new(Method::POST, "/save?id=7")
            .unwrap()
            .with_header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            )
            .with_body("name=Ada+Lovelace&id=8");
        request.decode_form_body();
        assert_eq!(request.parameter("name"), Some("Ada Lovelace"));
        assert_eq!(request.parameter_values("id").map(|v| v.len()), Some(2));
    }

    #[test]
    fn test_character_encoding() {
        let mut request = RawRequest::new(Method::GET, "/").unwrap();
        assert!(request.set_character_encoding("latin1").is_ok());
        assert_eq!(request.character_encoding(), Some(Charset::Latin1));
        assert!(matches!(
            request.set_character_encoding("klingon"),
            Err(RuntimeError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn test_charset_decode() {
        assert_eq!(Charset::Latin1.decode(&[0x63, 0x61, 0x66, 0xe9]).unwrap(), "café");
        assert_eq!(Charset::Utf8.decode("café".as_bytes()).unwrap(), "café");
        assert!(Charset::Ascii.decode(&[0xe9]).is_err());
        assert!(Charset::Utf8.decode(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_attributes_and_session() {
        let request = RawRequest::new(Method::GET, "/").unwrap();
        request.set_attribute("a", 1);
        assert_eq!(request.attribute("a"), Some(Value::Int(1)));
        request.set_attribute("a", Value::Null);
        assert!(request.attribute("a").is_none());

        assert!(request.session(false).is_none());
        let created = request.session(true).unwrap();
        let again = request.session(false).unwrap();
        assert_eq!(created.id(), again.id());
    }

    #[test]
    fn test_invalid_uri() {
        assert!(RawRequest::new(Method::GET, "http://[::1").is_err());
    }
}
