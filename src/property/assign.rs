//! Property assignment
//!
//! Writes do not use the read strategies. A path is compiled once per
//! (target type, path) into navigation steps plus a leaf, and the compiled
//! form is cached like read accessors are.

use std::sync::Arc;

use log::debug;

use super::{
    bean::{TypeKey, BUILTIN_REALM},
    cache::TtlCache,
    resolver::{accessor_name, PropertyResolver},
    value::{Value, ValueMap},
};
use crate::config::PropertyCache as PropertyCacheConfig;
use crate::core::error::{RuntimeError, RuntimeResult};

/// Pluggable assignment mechanism behind `PropertyResolver::set`
pub trait AssignmentEngine: Send + Sync {
    fn assign(
        &self,
        resolver: &PropertyResolver,
        target: &mut Value,
        path: &str,
        value: Value,
    ) -> RuntimeResult<()>;

    /// Drop any compiled state
    fn clear(&self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledAssignment {
    path: String,
    steps: Vec<String>,
    leaf: String,
}

impl CompiledAssignment {
    pub fn compile(path: &str) -> RuntimeResult<Self> {
        let mut segments: Vec<String> = path.split('.').map(|s| s.trim().to_string()).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(RuntimeError::InvalidArgument(format!(
                "property path '{path}' has an empty segment"
            )));
        }
        // split always yields at least one segment
        let leaf = segments.pop().unwrap_or_default();
        Ok(Self {
            path: path.to_string(),
            steps: segments,
            leaf,
        })
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn leaf(&self) -> &str {
        &self.leaf
    }
}

/// Default engine: navigates the path with the resolver and writes the
/// leaf through a `set<Name>` method, a writable field or a map insert.
pub struct PathAssignmentEngine {
    compiled: TtlCache<(TypeKey, String), Arc<CompiledAssignment>>,
}

impl PathAssignmentEngine {
    pub fn new(config: &PropertyCacheConfig) -> Self {
        Self {
            compiled: TtlCache::from_config(config),
        }
    }

    pub fn compiled_count(&self) -> usize {
        self.compiled.entry_count()
    }

    fn compiled_for(&self, target: &Value, path: &str) -> RuntimeResult<Arc<CompiledAssignment>> {
        let key = (type_key_of(target), path.to_string());
        if let Some(compiled) = self.compiled.get(&key) {
            return Ok(compiled);
        }
        let compiled = Arc::new(CompiledAssignment::compile(path)?);
        debug!("Compiled assignment '{}' for {}", path, target.type_name());
        self.compiled.insert(key, compiled.clone());
        Ok(compiled)
    }

    fn execute(
        &self,
        resolver: &PropertyResolver,
        target: &mut Value,
        steps: &[String],
        compiled: &CompiledAssignment,
        value: Value,
    ) -> RuntimeResult<()> {
        let Some((step, rest)) = steps.split_first() else {
            return write_leaf(target, &compiled.leaf, value, &compiled.path);
        };

        if let Value::Map(map) = target {
            return match map.get_mut(step.as_str()) {
                Some(child) if !child.is_null() => self.execute(resolver, child, rest, compiled, value),
                _ => Err(assignment_error(
                    &compiled.path,
                    "map",
                    format!("'{step}' is absent"),
                )),
            };
        }

        if matches!(target, Value::Object(_)) {
            let mut child = resolver.get(target, step)?;
            if child.is_null() {
                return Err(assignment_error(
                    &compiled.path,
                    &target.type_name(),
                    format!("'{step}' is absent"),
                ));
            }
            self.execute(resolver, &mut child, rest, compiled, value)?;
            // objects are shared handles, anything else is a copy to hand back
            if !matches!(child, Value::Object(_)) {
                write_leaf(target, step, child, &compiled.path)?;
            }
            return Ok(());
        }

        Err(assignment_error(
            &compiled.path,
            &target.type_name(),
            format!("cannot navigate into '{step}'"),
        ))
    }
}

impl AssignmentEngine for PathAssignmentEngine {
    fn assign(
        &self,
        resolver: &PropertyResolver,
        target: &mut Value,
        path: &str,
        value: Value,
    ) -> RuntimeResult<()> {
        if target.is_null() {
            return Ok(());
        }
        let compiled = self.compiled_for(target, path)?;
        self.execute(resolver, target, compiled.steps(), &compiled, value)
    }

    fn clear(&self) {
        self.compiled.invalidate_all();
    }
}

fn type_key_of(value: &Value) -> TypeKey {
    match value {
        Value::Object(bean) => bean.bean_type().key().clone(),
        Value::Map(_) => TypeKey::of::<ValueMap>(BUILTIN_REALM),
        Value::List(_) => TypeKey::of::<Vec<Value>>(BUILTIN_REALM),
        Value::Str(_) => TypeKey::of::<String>(BUILTIN_REALM),
        _ => TypeKey::of::<Value>(BUILTIN_REALM),
    }
}

fn write_leaf(target: &mut Value, leaf: &str, value: Value, path: &str) -> RuntimeResult<()> {
    match target {
        Value::Map(map) => {
            map.insert(leaf.to_string(), value);
            Ok(())
        }
        Value::Object(bean) => {
            let ty = bean.bean_type().clone();
            if let Some(setter) = ty.setter(&accessor_name("set", leaf)) {
                bean.apply(setter, value)
            } else if let Some(setter) = ty.field_setter(leaf) {
                bean.apply(setter, value)
            } else {
                Err(assignment_error(
                    path,
                    &ty.qualified_name(),
                    format!("no setter or writable field for '{leaf}'"),
                ))
            }
        }
        other => Err(assignment_error(
            path,
            &other.type_name(),
            format!("cannot assign '{leaf}'"),
        )),
    }
}

fn assignment_error(path: &str, target_type: &str, reason: String) -> RuntimeError {
    RuntimeError::Assignment {
        path: path.to_string(),
        target_type: target_type.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::bean::{Bean, BeanRef, BeanType};
    use crate::property::resolver::PropertyService;
    use once_cell::sync::Lazy;
    use serde_json::json;

    #[derive(Debug, Default)]
    struct Customer {
        name: String,
        age: i64,
        prefs: ValueMap,
    }

    impl Bean for Customer {
        fn bean_type() -> Arc<BeanType> {
            static TYPE: Lazy<Arc<BeanType>> = Lazy::new(|| {
                BeanType::builder::<Customer>("Customer")
                    .method("getName", |c| Ok(c.name.clone().into()))
                    .setter("setName", |c, v| {
                        c.name = v.to_string();
                        Ok(())
                    })
                    .field("age", |c| Ok(c.age.into()))
                    .field_setter("age", |c, v| match v.as_i64() {
                        Some(age) => {
                            c.age = age;
                            Ok(())
                        }
                        None => Err(RuntimeError::InvalidArgument(format!("age {v}"))),
                    })
                    .method("getPrefs", |c| Ok(Value::Map(c.prefs.clone())))
                    .setter("setPrefs", |c, v| match v {
                        Value::Map(m) => {
                            c.prefs = m;
                            Ok(())
                        }
                        other => Err(RuntimeError::InvalidArgument(other.to_string())),
                    })
                    .build()
            });
            TYPE.clone()
        }
    }

    fn resolver() -> PropertyResolver {
        PropertyResolver::new(&PropertyCacheConfig::default())
    }

    #[test]
    fn test_set_through_setter_and_field() {
        let resolver = resolver();
        let mut customer = Value::Object(BeanRef::new(Customer::default()));

        resolver.set(&mut customer, "name", "Grace".into()).unwrap();
        resolver.set(&mut customer, "age", Value::Int(85)).unwrap();

        assert_eq!(resolver.get(&customer, "name").unwrap(), Value::from("Grace"));
        assert_eq!(resolver.get(&customer, "age").unwrap(), Value::Int(85));
        assert!(resolver.set(&mut customer, "age", "old".into()).is_err());
    }

    #[test]
    fn test_set_nested_value_writes_back() {
        let resolver = resolver();
        let mut customer = Value::Object(BeanRef::new(Customer::default()));
        resolver
            .set(&mut customer, "prefs", Value::from(json!({"theme": "dark"})))
            .unwrap();

        resolver.set(&mut customer, "prefs.theme", "light".into()).unwrap();
        assert_eq!(resolver.get(&customer, "prefs.theme").unwrap(), Value::from("light"));
    }

    #[test]
    fn test_set_on_map() {
        let resolver = resolver();
        let mut form = Value::from(json!({"order": {"qty": 1}}));
        resolver.set(&mut form, "order.qty", Value::Int(3)).unwrap();
        resolver.set(&mut form, "note", "gift".into()).unwrap();
        assert_eq!(resolver.get(&form, "order.qty").unwrap(), Value::Int(3));
        assert_eq!(resolver.get(&form, "note").unwrap(), Value::from("gift"));

        let err = resolver.set(&mut form, "missing.qty", Value::Int(1)).unwrap_err();
        assert!(matches!(err, RuntimeError::Assignment { .. }));
    }

    #[test]
    fn test_set_on_null_is_noop() {
        let resolver = resolver();
        let mut nothing = Value::Null;
        resolver.set(&mut nothing, "a.b", Value::Int(1)).unwrap();
        assert!(nothing.is_null());
    }

    #[test]
    fn test_unknown_property() {
        let resolver = resolver();
        let mut customer = Value::Object(BeanRef::new(Customer::default()));
        let err = resolver.set(&mut customer, "email", "x".into()).unwrap_err();
        assert!(err.to_string().contains("no setter"));
    }

    #[test]
    fn test_compile_is_cached() {
        let engine = PathAssignmentEngine::new(&PropertyCacheConfig::default());
        let resolver = resolver();
        let mut form = Value::from(json!({"a": {}}));
        engine.assign(&resolver, &mut form, "a.b", Value::Int(1)).unwrap();
        engine.assign(&resolver, &mut form, "a.b", Value::Int(2)).unwrap();
        assert_eq!(engine.compiled_count(), 1);
        assert_eq!(resolver.get_value(&form, "a.b").unwrap(), Value::Int(2));

        assert!(CompiledAssignment::compile("a..b").is_err());
        engine.clear();
        assert_eq!(engine.compiled_count(), 0);
    }
}
