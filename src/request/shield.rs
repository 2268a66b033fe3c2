//! Parameter shield
//!
//! Decides once whether the request is multipart. Multipart bodies are
//! parsed eagerly into field values and file items; every parameter
//! accessor is then served from those maps. Plain requests delegate to the
//! raw request unchanged.

use indexmap::IndexMap;
use log::{debug, warn};

use super::{FileItem, ParameterMap, RawRequest};
use crate::core::error::RuntimeError;
use crate::core::traits::UploadParser;
use crate::property::{Value, ValueMap};
use crate::utils::request::is_multipart_content;

/// Request attribute carrying the upload parse failure message
pub const UPLOAD_EXCEPTION: &str = "upload_exception";

pub struct ShieldedRequest {
    raw: RawRequest,
    multipart: bool,
    multipart_parameters: ParameterMap,
    file_items: IndexMap<String, Vec<FileItem>>,
    upload_error: Option<RuntimeError>,
}

impl ShieldedRequest {
    pub fn new(mut raw: RawRequest, parser: &dyn UploadParser) -> Self {
        let multipart = is_multipart_content(raw.method(), raw.headers());

        if !multipart {
            raw.decode_form_body();
            return Self {
                raw,
                multipart,
                multipart_parameters: ParameterMap::new(),
                file_items: IndexMap::new(),
                upload_error: None,
            };
        }

        let mut parameters = ParameterMap::new();
        let mut file_items: IndexMap<String, Vec<FileItem>> = IndexMap::new();
        let mut upload_error = None;

        match parser.parse_request(&raw) {
            Ok(items) => {
                for item in items {
                    if !item.is_form_field() {
                        file_items
                            .entry(item.field_name().to_string())
                            .or_default()
                            .push(item);
                        continue;
                    }
                    match item.string(raw.character_encoding()) {
                        Ok(value) => parameters
                            .entry(item.field_name().to_string())
                            .or_default()
                            .push(value),
                        Err(e) => {
                            upload_error = Some(e);
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                parameters.clear();
                upload_error = Some(e);
            }
        }

        if let Some(e) = &upload_error {
            warn!("Multipart request {} could not be parsed: {}", raw.uri(), e);
            raw.set_attribute(UPLOAD_EXCEPTION, e.to_string());
        } else {
            debug!(
                "Multipart request {} parsed: {} fields, {} files",
                raw.uri(),
                parameters.len(),
                file_items.len()
            );
        }

        Self {
            raw,
            multipart,
            multipart_parameters: parameters,
            file_items,
            upload_error,
        }
    }

    pub fn raw(&self) -> &RawRequest {
        &self.raw
    }

    pub fn is_multipart(&self) -> bool {
        self.multipart
    }

    /// The captured upload parse failure, if any
    pub fn upload_error(&self) -> Option<&RuntimeError> {
        self.upload_error.as_ref()
    }

    fn active_parameters(&self) -> &ParameterMap {
        if self.multipart && !self.raw.is_mock_mode() {
            &self.multipart_parameters
        } else {
            self.raw.parameter_map()
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.active_parameters()
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn parameter_values(&self, name: &str) -> Option<&[String]> {
        self.active_parameters().get(name).map(Vec::as_slice)
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.active_parameters().keys().map(String::as_str).collect()
    }

    pub fn parameter_map(&self) -> &ParameterMap {
        self.active_parameters()
    }

    /// Parameters as a mapping value: one value becomes a string, repeated
    /// values become a list.
    pub fn parameter_value_map(&self) -> Value {
        let map: ValueMap = self
            .active_parameters()
            .iter()
            .map(|(name, values)| {
                let value = match values.as_slice() {
                    [single] => Value::from(single.as_str()),
                    many => Value::List(many.iter().map(|v| Value::from(v.as_str())).collect()),
                };
                (name.clone(), value)
            })
            .collect();
        Value::Map(map)
    }

    pub fn file_item_map(&self) -> &IndexMap<String, Vec<FileItem>> {
        &self.file_items
    }

    pub fn file_item(&self, name: &str) -> Option<&FileItem> {
        self.file_items.get(name).and_then(|items| items.first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::RuntimeResult;
    #[cfg(feature = "multipart")]
    use crate::request::multipart::MultipartUploadParser;
    use crate::request::NoUploadParser;
    use http::{header, HeaderValue, Method};

    const BODY: &str = "--b1\r\n\
Content-Disposition: form-data; name=\"tag\"\r\n\
\r\n\
red\r\n\
--b1\r\n\
Content-Disposition: form-data; name=\"avatar\"; filename=\"me.png\"\r\n\
Content-Type: image/png\r\n\
\r\n\
PNG\r\n\
--b1\r\n\
Content-Disposition: form-data; name=\"tag\"\r\n\
\r\n\
blue\r\n\
--b1--\r\n";

    struct FailingParser;

    impl UploadParser for FailingParser {
        fn parse_request(&self, _request: &RawRequest) -> RuntimeResult<Vec<FileItem>> {
            Err(RuntimeError::UploadParse("stream ended unexpectedly".into()))
        }
    }

    fn multipart(body: &'static str) -> RawRequest {
        RawRequest::new(Method::POST, "/profile?source=query")
            .unwrap()
            .with_header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("multipart/form-data; boundary=b1"),
            )
            .with_body(body)
    }

    #[test]
    #[cfg(feature = "multipart")]
    fn test_multipart_isolation() {
        let shield = ShieldedRequest::new(multipart(BODY), &MultipartUploadParser::default());
        assert!(shield.is_multipart());
        assert_eq!(
            shield.parameter_values("tag"),
            Some(&["red".to_string(), "blue".to_string()][..])
        );
        assert_eq!(shield.parameter("tag"), Some("red"));
        // query parameters are not part of the multipart view
        assert!(shield.parameter("source").is_none());
        assert_eq!(shield.parameter_names(), vec!["tag"]);

        assert_eq!(shield.file_item("avatar").map(FileItem::size), Some(3));
        assert!(shield.upload_error().is_none());
    }

    #[test]
    fn test_plain_request_delegates() {
        let raw = RawRequest::new(Method::GET, "/page?name=Ada").unwrap();
        let shield = ShieldedRequest::new(raw, &FailingParser);
        assert!(!shield.is_multipart());
        assert_eq!(shield.parameter("name"), Some("Ada"));
        assert!(shield.file_item_map().is_empty());
    }

    #[test]
    #[cfg(feature = "multipart")]
    fn test_mock_mode_reads_raw_parameters() {
        let raw = multipart(BODY)
            .with_parameter("tag", "green")
            .with_mock_mode(true);
        let shield = ShieldedRequest::new(raw, &MultipartUploadParser::default());
        assert_eq!(shield.parameter("tag"), Some("green"));
        assert_eq!(shield.parameter("source"), Some("query"));
        // files are still parsed
        assert!(shield.file_item("avatar").is_some());
    }

    #[test]
    fn test_parse_failure_is_captured() {
        let shield = ShieldedRequest::new(multipart(BODY), &FailingParser);
        assert!(shield.parameter_map().is_empty());
        assert!(shield.file_item_map().is_empty());
        assert!(matches!(shield.upload_error(), Some(RuntimeError::UploadParse(_))));
        let attribute = shield.raw().attribute(UPLOAD_EXCEPTION).unwrap();
        assert!(attribute.to_string().contains("stream ended"));
    }

    #[test]
    #[cfg(feature = "multipart")]
    fn test_parameter_value_map() {
        let shield = ShieldedRequest::new(multipart(BODY), &MultipartUploadParser::default());
        let map = shield.parameter_value_map();
        let tags = map.as_map().and_then(|m| m.get("tag")).unwrap();
        assert_eq!(tags.as_list().map(|l| l.len()), Some(2));
    }

    #[test]
    fn test_missing_parser_is_captured() {
        let shield = ShieldedRequest::new(multipart(BODY), &NoUploadParser);
        assert!(shield.is_multipart());
        assert!(shield.parameter("tag").is_none());
        assert!(matches!(shield.upload_error(), Some(RuntimeError::UploadParse(_))));
        assert!(shield.raw().attribute(UPLOAD_EXCEPTION).is_some());
    }
}
