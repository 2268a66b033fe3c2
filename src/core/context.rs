//! Request context
//!
//! One [`Context`] exists per request unit (the request itself, or a
//! forward within it). It wraps the shielded request and the response and
//! exposes the attribute, session, cookie and locale accessors pages use.

use std::{rc::Rc, sync::Arc};

use http::{header, HeaderValue, Method};
use indexmap::IndexMap;
use log::{debug, warn};
use uuid::Uuid;

use super::error::{RuntimeError, RuntimeResult};
use super::runtime::Runtime;
use super::traits::HttpSession;
use crate::property::Value;
use crate::request::{
    session::SessionAttribute, FileItem, RawRequest, ResponseHandle, ShieldedRequest,
};
use crate::utils::request::{
    build_set_cookie, get_cookie_value, get_preferred_language, X_REQUESTED_WITH,
};

/// Request attribute present while a forward is being processed
pub const FORWARD_ATTRIBUTE: &str = "clickrt.forward";

/// Session attribute holding the user's locale
pub const LOCALE_ATTRIBUTE: &str = "locale";

pub const DEFAULT_CHARSET: &str = "UTF-8";

pub const DEFAULT_LOCALE: &str = "en";

/// Request handed to a new context
pub enum IncomingRequest {
    /// Fresh request from the hosting layer; shielded on construction
    Raw(RawRequest),
    /// Request already shielded by an outer context
    Shielded(Rc<ShieldedRequest>),
}

impl From<RawRequest> for IncomingRequest {
    fn from(request: RawRequest) -> Self {
        IncomingRequest::Raw(request)
    }
}

impl From<Rc<ShieldedRequest>> for IncomingRequest {
    fn from(request: Rc<ShieldedRequest>) -> Self {
        IncomingRequest::Shielded(request)
    }
}

pub struct Context {
    id: String,
    runtime: Arc<Runtime>,
    request: Rc<ShieldedRequest>,
    response: ResponseHandle,
    is_post: bool,
}

impl Context {
    /// Create the context, applying the configured charset to a fresh raw
    /// request before any parameter is decoded.
    pub fn new(
        runtime: Arc<Runtime>,
        request: impl Into<IncomingRequest>,
        response: ResponseHandle,
    ) -> Self {
        let request = match request.into() {
            IncomingRequest::Shielded(shielded) => shielded,
            IncomingRequest::Raw(mut raw) => {
                if let Some(charset) = runtime.config().charset.as_deref() {
                    if let Err(e) = raw.set_character_encoding(charset) {
                        warn!("Could not apply request charset: {e}");
                    }
                }
                Rc::new(ShieldedRequest::new(raw, runtime.upload_parser().as_ref()))
            }
        };
        let is_post = request.raw().method() == Method::POST;
        let id = Uuid::new_v4().to_string();
        debug!("Created context {id} for {} {}", request.raw().method(), request.raw().uri());

        Self {
            id,
            runtime,
            request,
            response,
            is_post,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn request(&self) -> &Rc<ShieldedRequest> {
        &self.request
    }

    pub fn response(&self) -> &ResponseHandle {
        &self.response
    }

    pub fn is_post(&self) -> bool {
        self.is_post
    }

    pub fn is_get(&self) -> bool {
        !self.is_post && self.request.raw().method() == Method::GET
    }

    pub fn is_forward(&self) -> bool {
        self.request.raw().attribute(FORWARD_ATTRIBUTE).is_some()
    }

    pub fn is_ajax_request(&self) -> bool {
        let raw = self.request.raw();
        raw.header(X_REQUESTED_WITH).is_some() || self.request.parameter(X_REQUESTED_WITH).is_some()
    }

    pub fn is_multipart_request(&self) -> bool {
        self.request.is_multipart()
    }

    pub fn resource_path(&self) -> &str {
        self.request.raw().uri().path()
    }

    pub fn charset(&self) -> &str {
        self.runtime
            .config()
            .charset
            .as_deref()
            .unwrap_or(DEFAULT_CHARSET)
    }

    // Request attributes

    pub fn request_attribute(&self, name: &str) -> Option<Value> {
        self.request.raw().attribute(name)
    }

    /// Store a request attribute; `Value::Null` removes it
    pub fn set_request_attribute(&self, name: &str, value: impl Into<Value>) {
        self.request.raw().set_attribute(name, value);
    }

    pub fn remove_request_attribute(&self, name: &str) -> Option<Value> {
        self.request.raw().remove_attribute(name)
    }

    pub fn has_request_attribute(&self, name: &str) -> bool {
        self.request_attribute(name).is_some()
    }

    // Request parameters

    pub fn request_parameter(&self, name: &str) -> RuntimeResult<Option<&str>> {
        check_name(name)?;
        Ok(self.request.parameter(name))
    }

    pub fn request_parameter_values(&self, name: &str) -> RuntimeResult<Option<&[String]>> {
        check_name(name)?;
        Ok(self.request.parameter_values(name))
    }

    pub fn has_request_parameter(&self, name: &str) -> RuntimeResult<bool> {
        Ok(self.request_parameter(name)?.is_some())
    }

    pub fn parameter_value_map(&self) -> Value {
        self.request.parameter_value_map()
    }

    // Uploads

    pub fn file_item(&self, name: &str) -> Option<&FileItem> {
        self.request.file_item(name)
    }

    pub fn file_item_map(&self) -> &IndexMap<String, Vec<FileItem>> {
        self.request.file_item_map()
    }

    pub fn upload_error(&self) -> Option<&RuntimeError> {
        self.request.upload_error()
    }

    // Session

    /// The session, created when none exists yet
    pub fn session(&self) -> Arc<dyn HttpSession> {
        self.request.raw().session_or_create()
    }

    pub fn has_session(&self) -> bool {
        self.request.raw().session(false).is_some()
    }

    /// Read a session attribute; flash attributes are removed by the read
    pub fn session_attribute(&self, name: &str) -> Option<Value> {
        let session = self.request.raw().session(false)?;
        let attribute = session.attribute(name)?;
        if attribute.is_flash() {
            session.remove_attribute(name);
        }
        Some(attribute.into_value())
    }

    /// Store a session attribute; `Value::Null` removes it
    pub fn set_session_attribute(&self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        if value.is_null() {
            self.remove_session_attribute(name);
        } else {
            self.session().set_attribute(name, SessionAttribute::Value(value));
        }
    }

    pub fn set_flash_attribute(&self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        if value.is_null() {
            self.remove_session_attribute(name);
        } else {
            self.session().set_attribute(name, SessionAttribute::Flash(value));
        }
    }

    pub fn remove_session_attribute(&self, name: &str) -> Option<Value> {
        self.request
            .raw()
            .session(false)?
            .remove_attribute(name)
            .map(SessionAttribute::into_value)
    }

    /// Presence check; does not consume flash attributes
    pub fn has_session_attribute(&self, name: &str) -> bool {
        self.request
            .raw()
            .session(false)
            .is_some_and(|session| session.attribute(name).is_some())
    }

    // Cookies

    pub fn cookie_value(&self, name: &str) -> Option<&str> {
        get_cookie_value(self.request.raw().headers(), name)
    }

    /// Append a root-path cookie to the response. A negative `max_age`
    /// makes it a session cookie.
    pub fn set_cookie(&self, name: &str, value: &str, max_age: i64) -> RuntimeResult<()> {
        let cookie = build_set_cookie(name, value, max_age, "/")?;
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| RuntimeError::InvalidArgument(format!("invalid cookie '{name}': {e}")))?;
        self.response
            .borrow_mut()
            .headers_mut()
            .append(header::SET_COOKIE, value);
        Ok(())
    }

    pub fn invalidate_cookie(&self, name: &str) -> RuntimeResult<()> {
        self.set_cookie(name, "", 0)
    }

    // Locale

    pub fn locale(&self) -> String {
        if let Some(locale) = self
            .request
            .raw()
            .session(false)
            .and_then(|session| session.attribute(LOCALE_ATTRIBUTE))
            .and_then(|attr| attr.value().as_str().map(str::to_string))
        {
            return locale;
        }
        if let Some(locale) = &self.runtime.config().locale {
            return locale.clone();
        }
        get_preferred_language(self.request.raw().headers())
            .unwrap_or(DEFAULT_LOCALE)
            .to_string()
    }

    /// Store the user's locale in the session; `None` removes it
    pub fn set_locale(&self, locale: Option<&str>) {
        match locale {
            Some(locale) => self.set_session_attribute(LOCALE_ATTRIBUTE, locale),
            None => {
                self.remove_session_attribute(LOCALE_ATTRIBUTE);
            }
        }
    }

    // Properties

    pub fn get_value(&self, source: &Value, path: &str) -> RuntimeResult<Value> {
        self.runtime.property_service().get_value(source, path)
    }

    pub fn set_value(&self, target: &mut Value, path: &str, value: impl Into<Value>) -> RuntimeResult<()> {
        self.runtime
            .property_service()
            .set_value(target, path, value.into())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("request", self.request.raw())
            .field("is_post", &self.is_post)
            .finish()
    }
}

fn check_name(name: &str) -> RuntimeResult<()> {
    if name.is_empty() {
        return Err(RuntimeError::InvalidArgument(
            "parameter name must not be empty".to_string(),
        ));
    }
    Ok(())
}
