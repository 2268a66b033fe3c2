//! Request processing flow
//!
//! [`Runtime`] is the long-lived, shareable part: configuration, the
//! property service and the upload parser. [`RequestScope`] is the
//! per-thread part: the context and registry stacks of the request being
//! processed. It is passed explicitly to everything that needs the current
//! context or registry.

use std::{cell::RefCell, rc::Rc, sync::Arc};

use http::{Response, StatusCode};
use log::{debug, error, info, warn};

use super::context::{Context, FORWARD_ATTRIBUTE};
use super::error::{RuntimeError, RuntimeResult};
use super::registry::{ComponentRegistry, LifecyclePhase};
use super::stack::ScopeStack;
use super::traits::{Behavior, Component, UploadParser};
use crate::config::Config;
use crate::property::{PropertyResolver, PropertyService, Value};
use crate::request::{new_response, RawRequest, ResponseHandle};
use crate::utils::response::ResponseBuilder;

/// Page or controller driven by the runtime
pub trait RequestHandler {
    /// Process the component tree: bind parameters, run listeners and
    /// register Ajax targets or interceptors.
    fn process(&self, scope: &RequestScope) -> RuntimeResult<()>;

    /// Produce the response body
    fn render(&self, _scope: &RequestScope) -> RuntimeResult<()> {
        Ok(())
    }
}

pub struct Runtime {
    config: Config,
    property_service: Arc<dyn PropertyService>,
    upload_parser: Arc<dyn UploadParser>,
}

impl Runtime {
    pub fn new(config: Config) -> Self {
        let resolver = PropertyResolver::new(&config.property_cache);
        let upload_parser = default_upload_parser(&config);

        Self {
            config,
            property_service: Arc::new(resolver),
            upload_parser,
        }
    }

    pub fn with_property_service(mut self, service: Arc<dyn PropertyService>) -> Self {
        self.property_service = service;
        self
    }

    pub fn with_upload_parser(mut self, parser: Arc<dyn UploadParser>) -> Self {
        self.upload_parser = parser;
        self
    }

    /// Initialize the services and share the runtime
    pub fn start(self) -> RuntimeResult<Arc<Self>> {
        self.property_service.on_init()?;
        info!(
            "Runtime started (charset {}, property cache capacity {})",
            self.config.charset.as_deref().unwrap_or("UTF-8"),
            self.config.property_cache.max_capacity
        );
        Ok(Arc::new(self))
    }

    pub fn shutdown(&self) {
        self.property_service.on_destroy();
        info!("Runtime stopped");
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn property_service(&self) -> &Arc<dyn PropertyService> {
        &self.property_service
    }

    pub fn upload_parser(&self) -> &Arc<dyn UploadParser> {
        &self.upload_parser
    }

    /// Process one request: create its context and registry, run the
    /// handler and the three dispatch phases. The scope is restored on every
    /// exit path.
    pub fn process(
        self: &Arc<Self>,
        scope: &RequestScope,
        request: RawRequest,
        handler: &dyn RequestHandler,
    ) -> RuntimeResult<ResponseHandle> {
        let response = new_response();
        let ctx = Rc::new(Context::new(self.clone(), request, response.clone()));
        self.run(scope, ctx, handler)?;
        Ok(response)
    }

    /// Forward the current request to another handler. The shielded request
    /// and the response are shared with the outer context; the registry is
    /// fresh.
    pub fn forward(self: &Arc<Self>, scope: &RequestScope, handler: &dyn RequestHandler) -> RuntimeResult<()> {
        let outer = scope.current_context()?;
        let request = outer.request().clone();
        let previous = request.raw().attribute(FORWARD_ATTRIBUTE);
        request
            .raw()
            .set_attribute(FORWARD_ATTRIBUTE, outer.resource_path());

        let ctx = Rc::new(Context::new(self.clone(), request.clone(), outer.response().clone()));
        debug!("Forwarding context {} to {}", outer.id(), ctx.id());
        let result = self.run(scope, ctx, handler);

        request
            .raw()
            .set_attribute(FORWARD_ATTRIBUTE, previous.unwrap_or(Value::Null));
        result
    }

    /// Like [`Runtime::process`], but an error becomes a plain 500 response
    pub fn handle(
        self: &Arc<Self>,
        scope: &RequestScope,
        request: RawRequest,
        handler: &dyn RequestHandler,
    ) -> Response<Vec<u8>> {
        match self.process(scope, request, handler) {
            Ok(response) => response.replace(Response::new(Vec::new())),
            Err(e) => {
                error!("Request processing failed: {e}");
                ResponseBuilder::error_http(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
            }
        }
    }

    fn run(
        &self,
        scope: &RequestScope,
        ctx: Rc<Context>,
        handler: &dyn RequestHandler,
    ) -> RuntimeResult<()> {
        let registry = Rc::new(ComponentRegistry::new());
        let _guard = scope.enter(ctx, registry.clone());

        let result = Self::drive(scope, &registry, handler);
        if let Err(e) = &result {
            registry.error_occurred(e);
        }
        result
    }

    fn drive(
        scope: &RequestScope,
        registry: &ComponentRegistry,
        handler: &dyn RequestHandler,
    ) -> RuntimeResult<()> {
        handler.process(scope)?;
        registry.dispatch(LifecyclePhase::PreResponse)?;
        registry.dispatch(LifecyclePhase::PreRenderHeadElements)?;
        handler.render(scope)?;
        registry.dispatch(LifecyclePhase::PreDestroy)
    }
}

#[cfg(feature = "multipart")]
fn default_upload_parser(config: &Config) -> Arc<dyn UploadParser> {
    Arc::new(crate::request::multipart::MultipartUploadParser::new(&config.upload))
}

#[cfg(not(feature = "multipart"))]
fn default_upload_parser(_config: &Config) -> Arc<dyn UploadParser> {
    Arc::new(crate::request::NoUploadParser)
}

/// Context and registry stacks of the thread processing a request
#[derive(Default)]
pub struct RequestScope {
    contexts: RefCell<ScopeStack<Context>>,
    registries: RefCell<ScopeStack<ComponentRegistry>>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push both and return a guard that pops them again
    pub fn enter(&self, ctx: Rc<Context>, registry: Rc<ComponentRegistry>) -> ScopeGuard<'_> {
        let context = self.push_context(ctx.clone()).then_some(ctx);
        let registry = self.push_registry(registry.clone()).then_some(registry);
        ScopeGuard {
            scope: self,
            context,
            registry,
        }
    }

    /// Returns false when `ctx` already is the current context
    pub fn push_context(&self, ctx: Rc<Context>) -> bool {
        let id = ctx.id().to_string();
        let pushed = self.contexts.borrow_mut().push(ctx);
        if pushed {
            debug!("Pushed context {id}, depth {}", self.context_depth());
        }
        pushed
    }

    pub fn pop_context(&self) -> Option<Rc<Context>> {
        let popped = self.contexts.borrow_mut().pop();
        if let Some(ctx) = &popped {
            debug!("Popped context {}, depth {}", ctx.id(), self.context_depth());
        }
        popped
    }

    pub fn push_registry(&self, registry: Rc<ComponentRegistry>) -> bool {
        let pushed = self.registries.borrow_mut().push(registry);
        if pushed {
            debug!("Pushed registry, depth {}", self.registry_depth());
        }
        pushed
    }

    pub fn pop_registry(&self) -> Option<Rc<ComponentRegistry>> {
        self.registries.borrow_mut().pop()
    }

    /// The current context; an error outside request processing
    pub fn current_context(&self) -> RuntimeResult<Rc<Context>> {
        self.try_current_context().ok_or_else(|| {
            RuntimeError::IllegalState("no context available on this thread".to_string())
        })
    }

    pub fn try_current_context(&self) -> Option<Rc<Context>> {
        self.contexts.borrow().current().cloned()
    }

    pub fn current_registry(&self) -> RuntimeResult<Rc<ComponentRegistry>> {
        self.registries.borrow().current().cloned().ok_or_else(|| {
            RuntimeError::IllegalState("no component registry available on this thread".to_string())
        })
    }

    pub fn register_ajax_target(&self, component: Rc<dyn Component>) -> RuntimeResult<bool> {
        Ok(self.current_registry()?.register_ajax_target(component))
    }

    pub fn register_interceptor(
        &self,
        component: Rc<dyn Component>,
        interceptor: Rc<dyn Behavior>,
    ) -> RuntimeResult<bool> {
        Ok(self
            .current_registry()?
            .register_interceptor(component, interceptor))
    }

    pub fn context_depth(&self) -> usize {
        self.contexts.borrow().depth()
    }

    pub fn registry_depth(&self) -> usize {
        self.registries.borrow().depth()
    }
}

/// Pops on drop whatever [`RequestScope::enter`] pushed
pub struct ScopeGuard<'a> {
    scope: &'a RequestScope,
    context: Option<Rc<Context>>,
    registry: Option<Rc<ComponentRegistry>>,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.take() {
            if self.scope.registries.borrow().is_current(&registry) {
                self.scope.pop_registry();
            } else {
                warn!("Registry is no longer on top of the stack, leaving it in place");
            }
        }
        if let Some(ctx) = self.context.take() {
            if self.scope.contexts.borrow().is_current(&ctx) {
                self.scope.pop_context();
            } else {
                warn!("Context {} is no longer on top of the stack, leaving it in place", ctx.id());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn runtime() -> Arc<Runtime> {
        Runtime::new(Config::default()).start().unwrap()
    }

    fn context(rt: &Arc<Runtime>, uri: &str) -> Rc<Context> {
        let raw = RawRequest::new(Method::GET, uri).unwrap();
        Rc::new(Context::new(rt.clone(), raw, new_response()))
    }

    struct Noop;

    impl RequestHandler for Noop {
        fn process(&self, _scope: &RequestScope) -> RuntimeResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_context_stack_lifo() {
        init_log();
        let rt = runtime();
        let scope = RequestScope::new();
        assert!(scope.try_current_context().is_none());
        assert!(matches!(
            scope.current_context(),
            Err(RuntimeError::IllegalState(_))
        ));

        let c1 = context(&rt, "/one");
        let c2 = context(&rt, "/two");
        let c3 = context(&rt, "/three");
        assert!(scope.push_context(c1.clone()));
        assert!(scope.push_context(c2.clone()));
        assert!(scope.push_context(c3.clone()));
        assert!(!scope.push_context(c3.clone()));
        assert_eq!(scope.context_depth(), 3);

        scope.pop_context();
        assert!(Rc::ptr_eq(&scope.current_context().unwrap(), &c2));
        scope.pop_context();
        scope.pop_context();
        assert!(scope.try_current_context().is_none());
        assert!(scope.pop_context().is_none());
    }

    #[test]
    fn test_guard_restores_outer_scope() {
        init_log();
        let rt = runtime();
        let scope = RequestScope::new();
        let outer = context(&rt, "/outer");
        let outer_registry = Rc::new(ComponentRegistry::new());
        let _outer_guard = scope.enter(outer.clone(), outer_registry.clone());

        {
            let _inner = scope.enter(context(&rt, "/inner"), Rc::new(ComponentRegistry::new()));
            assert_eq!(scope.context_depth(), 2);
            assert_eq!(scope.registry_depth(), 2);
        }
        assert!(Rc::ptr_eq(&scope.current_context().unwrap(), &outer));
        assert!(Rc::ptr_eq(&scope.current_registry().unwrap(), &outer_registry));

        {
            // re-entering the current pair pushes nothing and pops nothing
            let _again = scope.enter(outer.clone(), outer_registry.clone());
            assert_eq!(scope.context_depth(), 1);
        }
        assert_eq!(scope.context_depth(), 1);
        assert_eq!(scope.registry_depth(), 1);
    }

    #[test]
    fn test_handle_turns_error_into_500() {
        init_log();
        struct Broken;
        impl RequestHandler for Broken {
            fn process(&self, _scope: &RequestScope) -> RuntimeResult<()> {
                Err(RuntimeError::Component("page exploded".into()))
            }
        }

        let rt = runtime();
        let scope = RequestScope::new();
        let request = RawRequest::new(Method::GET, "/broken").unwrap();
        let response = rt.handle(&scope, request, &Broken);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(String::from_utf8_lossy(response.body()).contains("page exploded"));
        assert_eq!(scope.context_depth(), 0);

        let request = RawRequest::new(Method::GET, "/fine").unwrap();
        let response = rt.handle(&scope, request, &Noop);
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_forward_requires_context() {
        init_log();
        let rt = runtime();
        let scope = RequestScope::new();
        assert!(matches!(
            rt.forward(&scope, &Noop),
            Err(RuntimeError::IllegalState(_))
        ));
    }
}
