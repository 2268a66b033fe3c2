//! Cached property path resolution
//!
//! Reads walk a dotted path one segment at a time. Mappings are resolved
//! structurally; objects, strings and lists go through their accessor
//! tables, trying an ordered list of strategies and caching the first one
//! that succeeds for the (type, segment) pair.

use std::{any::Any, sync::Arc};

use log::{debug, warn};

use super::{
    assign::{AssignmentEngine, PathAssignmentEngine},
    bean::{list_type, string_type, Accessor, BeanRef, BeanType, TypeKey},
    cache::{CacheStats, TtlCache},
    value::Value,
};
use crate::config::PropertyCache as PropertyCacheConfig;
use crate::core::error::{ResolutionCause, RuntimeError, RuntimeResult};

/// Pluggable property read/write service
pub trait PropertyService: Send + Sync {
    fn on_init(&self) -> RuntimeResult<()> {
        Ok(())
    }

    fn on_destroy(&self) {}

    /// Read a possibly dotted property path. Absent values are `Value::Null`.
    fn get_value(&self, source: &Value, name: &str) -> RuntimeResult<Value>;

    /// Write `value` at the property path on `target`
    fn set_value(&self, target: &mut Value, name: &str, value: Value) -> RuntimeResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    type_key: TypeKey,
    property: String,
}

impl CacheKey {
    pub fn new(type_key: TypeKey, property: &str) -> Self {
        Self {
            type_key,
            property: property.to_string(),
        }
    }
}

/// Accessor lookup strategies, in resolution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// `get<Name>()`
    Getter,
    /// `is<Name>()`
    BoolGetter,
    /// public field `<name>`
    Field,
    /// zero-argument method `<name>()`
    Method,
}

pub const STRATEGIES: [Strategy; 4] = [
    Strategy::Getter,
    Strategy::BoolGetter,
    Strategy::Field,
    Strategy::Method,
];

impl Strategy {
    pub fn lookup(self, ty: &BeanType, segment: &str) -> Option<Arc<Accessor>> {
        match self {
            Strategy::Getter => ty.method(&accessor_name("get", segment)),
            Strategy::BoolGetter => ty.method(&accessor_name("is", segment)),
            Strategy::Field => ty.field(segment),
            Strategy::Method => ty.method(segment),
        }
        .cloned()
    }
}

/// `prefix` followed by `property` with its first letter upper-cased
pub fn accessor_name(prefix: &str, property: &str) -> String {
    let mut chars = property.chars();
    match chars.next() {
        Some(first) => {
            let mut name = String::with_capacity(prefix.len() + property.len());
            name.push_str(prefix);
            name.extend(first.to_uppercase());
            name.push_str(chars.as_str());
            name
        }
        None => prefix.to_string(),
    }
}

/// A non-mapping value the accessor tables apply to
enum Target<'a> {
    Object(&'a BeanRef),
    Builtin(&'static Arc<BeanType>, &'a dyn Any),
}

impl Target<'_> {
    fn bean_type(&self) -> &BeanType {
        match self {
            Target::Object(bean) => bean.bean_type(),
            Target::Builtin(ty, _) => ty,
        }
    }

    fn invoke(&self, accessor: &Accessor) -> RuntimeResult<Value> {
        match self {
            Target::Object(bean) => bean.invoke(accessor),
            Target::Builtin(_, value) => accessor.invoke(*value),
        }
    }
}

/// Default [`PropertyService`]
pub struct PropertyResolver {
    accessors: TtlCache<CacheKey, Arc<Accessor>>,
    assigner: Arc<dyn AssignmentEngine>,
}

impl PropertyResolver {
    pub fn new(config: &PropertyCacheConfig) -> Self {
        Self {
            accessors: TtlCache::from_config(config),
            assigner: Arc::new(PathAssignmentEngine::new(config)),
        }
    }

    /// Replace the engine used by [`PropertyResolver::set`]
    pub fn with_assignment_engine(mut self, assigner: Arc<dyn AssignmentEngine>) -> Self {
        self.assigner = assigner;
        self
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.accessors.stats()
    }

    pub fn get(&self, source: &Value, name: &str) -> RuntimeResult<Value> {
        let name = name.trim();

        // literal dotted keys win over path splitting
        if let Value::Map(map) = source {
            if let Some(value) = map.get(name) {
                return Ok(value.clone());
            }
        }

        let (base, rest) = match name.split_once('.') {
            Some((base, rest)) => (base.trim(), Some(rest.trim())),
            None => (name, None),
        };

        let value = self.resolve_segment(source, base)?;

        match rest {
            Some(rest) if !value.is_null() => self.get(&value, rest),
            _ => Ok(value),
        }
    }

    pub fn set(&self, target: &mut Value, name: &str, value: Value) -> RuntimeResult<()> {
        self.assigner.assign(self, target, name.trim(), value)
    }

    fn resolve_segment(&self, source: &Value, segment: &str) -> RuntimeResult<Value> {
        let target = match source {
            Value::Map(map) => return Ok(map.get(segment).cloned().unwrap_or_default()),
            Value::Null => return Ok(Value::Null),
            Value::Object(bean) => Target::Object(bean),
            Value::Str(s) => Target::Builtin(string_type(), s),
            Value::List(items) => Target::Builtin(list_type(), items),
            _ => return Err(resolution_error(source, segment, ResolutionCause::NoSuchProperty)),
        };

        let ty = target.bean_type();
        let key = CacheKey::new(ty.key().clone(), segment);

        if let Some(accessor) = self.accessors.get(&key) {
            match target.invoke(&accessor) {
                Ok(value) => return Ok(value),
                Err(e) => warn!(
                    "Cached accessor {} for '{}' on {} failed, resolving again: {}",
                    accessor.member(),
                    segment,
                    ty.qualified_name(),
                    e
                ),
            }
        }

        let last = STRATEGIES.len() - 1;
        let mut failure = None;
        for (i, strategy) in STRATEGIES.iter().enumerate() {
            let Some(accessor) = strategy.lookup(ty, segment) else {
                continue;
            };
            match target.invoke(&accessor) {
                Ok(value) => {
                    debug!(
                        "Caching {:?} accessor {} for {}.{}",
                        strategy,
                        accessor.member(),
                        ty.qualified_name(),
                        segment
                    );
                    self.accessors.insert(key, accessor);
                    return Ok(value);
                }
                Err(e) if i == last => {
                    return Err(resolution_error(
                        source,
                        segment,
                        ResolutionCause::AccessFailed(e.to_string()),
                    ));
                }
                Err(e) => {
                    warn!(
                        "Accessor {} for '{}' on {} failed, trying next strategy: {}",
                        accessor.member(),
                        segment,
                        ty.qualified_name(),
                        e
                    );
                    failure = Some(e.to_string());
                }
            }
        }

        let cause = match failure {
            Some(msg) => ResolutionCause::AccessFailed(msg),
            None => ResolutionCause::NoSuchProperty,
        };
        Err(resolution_error(source, segment, cause))
    }
}

impl PropertyService for PropertyResolver {
    fn on_destroy(&self) {
        self.accessors.invalidate_all();
        self.assigner.clear();
    }

    fn get_value(&self, source: &Value, name: &str) -> RuntimeResult<Value> {
        self.get(source, name)
    }

    fn set_value(&self, target: &mut Value, name: &str, value: Value) -> RuntimeResult<()> {
        self.set(target, name, value)
    }
}

fn resolution_error(source: &Value, segment: &str, cause: ResolutionCause) -> RuntimeError {
    RuntimeError::PropertyResolution {
        segment: segment.to_string(),
        source_type: source.type_name(),
        source: source.to_string(),
        cause,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::bean::Bean;
    use once_cell::sync::Lazy;
    use serde_json::json;

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn resolver() -> PropertyResolver {
        PropertyResolver::new(&PropertyCacheConfig::default())
    }

    #[derive(Debug)]
    struct Address {
        city: String,
    }

    impl Bean for Address {
        fn bean_type() -> Arc<BeanType> {
            static TYPE: Lazy<Arc<BeanType>> = Lazy::new(|| {
                BeanType::builder::<Address>("Address")
                    .method("getCity", |a| Ok(a.city.clone().into()))
                    .build()
            });
            TYPE.clone()
        }
    }

    #[derive(Debug)]
    struct Person {
        name: String,
        active: bool,
        nickname: String,
        address: Option<BeanRef>,
    }

    impl Bean for Person {
        fn bean_type() -> Arc<BeanType> {
            static TYPE: Lazy<Arc<BeanType>> = Lazy::new(|| {
                BeanType::builder::<Person>("Person")
                    .method("getName", |p| Ok(p.name.clone().into()))
                    .method("isActive", |p| Ok(p.active.into()))
                    .field("nickname", |p| Ok(p.nickname.clone().into()))
                    .method("greeting", |p| Ok(format!("Hello {}", p.name).into()))
                    .method("getAddress", |p| Ok(p.address.clone().into()))
                    // getter that always fails, shadowed by the field below
                    .method("getBroken", |_| Err(RuntimeError::Component("boom".into())))
                    .field("broken", |_| Ok("from field".into()))
                    .method("explode", |_| Err(RuntimeError::Component("kaboom".into())))
                    .build()
            });
            TYPE.clone()
        }
    }

    fn ada() -> Value {
        let address = BeanRef::new(Address {
            city: "London".into(),
        });
        Value::Object(BeanRef::new(Person {
            name: "Ada".into(),
            active: true,
            nickname: "Countess".into(),
            address: Some(address),
        }))
    }

    #[test]
    fn test_strategy_order() {
        init_log();
        let resolver = resolver();
        let person = ada();
        assert_eq!(resolver.get(&person, "name").unwrap(), Value::from("Ada"));
        assert_eq!(resolver.get(&person, "active").unwrap(), Value::Bool(true));
        assert_eq!(resolver.get(&person, "nickname").unwrap(), Value::from("Countess"));
        assert_eq!(resolver.get(&person, "greeting").unwrap(), Value::from("Hello Ada"));
        assert_eq!(resolver.get(&person, " name ").unwrap(), Value::from("Ada"));
    }

    #[test]
    fn test_dot_path_equivalence() {
        init_log();
        let resolver = resolver();
        let person = ada();
        let direct = resolver.get(&person, "address.city").unwrap();
        let address = resolver.get(&person, "address").unwrap();
        let stepwise = resolver.get(&address, "city").unwrap();
        assert_eq!(direct, stepwise);
        assert_eq!(direct, Value::from("London"));
    }

    #[test]
    fn test_absent_intermediate_short_circuits() {
        init_log();
        let resolver = resolver();
        let person = Value::Object(BeanRef::new(Person {
            name: "Bob".into(),
            active: false,
            nickname: String::new(),
            address: None,
        }));
        assert_eq!(resolver.get(&person, "address.city").unwrap(), Value::Null);
    }

    #[test]
    fn test_map_short_circuit() {
        init_log();
        let resolver = resolver();
        let map = Value::from(json!({"x.y": "literal", "x": {"y": "nested"}}));
        assert_eq!(resolver.get(&map, "x.y").unwrap(), Value::from("literal"));

        let nested = Value::from(json!({"x": {"y": "nested"}}));
        assert_eq!(resolver.get(&nested, "x.y").unwrap(), Value::from("nested"));
        assert_eq!(resolver.cache_stats().entry_count, 0);
    }

    #[test]
    fn test_mapping_absence_tolerance() {
        init_log();
        let resolver = resolver();
        let empty = Value::from(json!({}));
        assert_eq!(resolver.get(&empty, "missing").unwrap(), Value::Null);

        let err = resolver.get(&ada(), "missing").unwrap_err();
        assert!(err.is_no_such_property());
        match err {
            RuntimeError::PropertyResolution {
                segment,
                source_type,
                source,
                ..
            } => {
                assert_eq!(segment, "missing");
                assert_eq!(source_type, "Person");
                assert!(source.contains("Ada"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cache_stability() {
        init_log();
        let resolver = resolver();
        let first = ada();
        let second = ada();

        assert_eq!(resolver.get(&first, "name").unwrap(), Value::from("Ada"));
        let populated = resolver.cache_stats();
        assert_eq!(populated.entry_count, 1);

        assert_eq!(resolver.get(&second, "name").unwrap(), Value::from("Ada"));
        let after = resolver.cache_stats();
        assert_eq!(after.entry_count, 1);
        assert_eq!(after.hits, populated.hits + 1);
    }

    #[test]
    fn test_realms_keep_separate_accessors() {
        init_log();
        let resolver = resolver();
        let reloaded = BeanType::builder::<Address>("Address")
            .realm("reloaded")
            .method("getCity", |a| Ok(a.city.to_uppercase().into()))
            .build();

        let current = Value::Object(BeanRef::new(Address {
            city: "London".into(),
        }));
        let stale = Value::Object(
            BeanRef::with_type(
                reloaded,
                Address {
                    city: "London".into(),
                },
            )
            .unwrap(),
        );

        assert_eq!(resolver.get(&current, "city").unwrap(), Value::from("London"));
        assert_eq!(resolver.get(&stale, "city").unwrap(), Value::from("LONDON"));
        assert_eq!(resolver.cache_stats().entry_count, 2);

        // served from the cache, still per realm
        assert_eq!(resolver.get(&current, "city").unwrap(), Value::from("London"));
        assert_eq!(resolver.get(&stale, "city").unwrap(), Value::from("LONDON"));
        assert_eq!(resolver.cache_stats().hits, 2);
    }

    #[test]
    fn test_failing_accessor_falls_through() {
        init_log();
        let resolver = resolver();
        let person = ada();
        assert_eq!(resolver.get(&person, "broken").unwrap(), Value::from("from field"));

        let err = resolver.get(&person, "explode").unwrap_err();
        match err {
            RuntimeError::PropertyResolution {
                cause: ResolutionCause::AccessFailed(msg),
                ..
            } => assert!(msg.contains("kaboom")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_builtin_members() {
        init_log();
        let resolver = resolver();
        let value = Value::from(json!({"tags": ["a", "b", "c"], "title": "héllo"}));
        assert_eq!(resolver.get(&value, "tags.size").unwrap(), Value::Int(3));
        assert_eq!(resolver.get(&value, "tags.empty").unwrap(), Value::Bool(false));
        assert_eq!(resolver.get(&value, "title.length").unwrap(), Value::Int(5));
        assert!(resolver.get(&Value::Int(1), "anything").is_err());
    }

    #[test]
    fn test_on_destroy_clears_cache() {
        init_log();
        let resolver = resolver();
        resolver.get(&ada(), "name").unwrap();
        assert_eq!(resolver.cache_stats().entry_count, 1);
        resolver.on_destroy();
        assert_eq!(resolver.cache_stats().entry_count, 0);
    }

    #[test]
    fn test_accessor_name() {
        assert_eq!(accessor_name("get", "name"), "getName");
        assert_eq!(accessor_name("is", "active"), "isActive");
        assert_eq!(accessor_name("get", ""), "get");
    }
}
