//! Typed accessor tables
//!
//! A [`BeanType`] lists, once per concrete type, the named members the
//! resolver may read or write: zero-argument methods (`getName`, `isActive`,
//! `size`) and public fields (`name`). Tables are built at startup and looked
//! up by member name, so no per-call probing of the type happens.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::value::Value;
use crate::core::error::{RuntimeError, RuntimeResult};
use crate::internal_error;

/// Realm used when a type does not name one
pub const DEFAULT_REALM: &str = "default";

/// Realm of the built-in string and list tables
pub const BUILTIN_REALM: &str = "builtin";

pub type Getter = Arc<dyn Fn(&dyn Any) -> RuntimeResult<Value> + Send + Sync>;
pub type Setter = Arc<dyn Fn(&mut dyn Any, Value) -> RuntimeResult<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Method,
    Field,
}

/// Identity of a runtime type inside one isolated type universe.
///
/// Two builds of the same Rust type registered under different realms
/// (plugins, reloaded modules) never share cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeKey {
    type_id: TypeId,
    realm: Arc<str>,
}

impl TypeKey {
    pub fn of<T: Any>(realm: &str) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            realm: Arc::from(realm),
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

/// A readable member of a type
pub struct Accessor {
    kind: MemberKind,
    member: String,
    read: Getter,
}

impl Accessor {
    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn invoke(&self, target: &dyn Any) -> RuntimeResult<Value> {
        (self.read)(target)
    }
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("kind", &self.kind)
            .field("member", &self.member)
            .finish()
    }
}

/// Accessor table of one concrete type
pub struct BeanType {
    key: TypeKey,
    name: &'static str,
    methods: HashMap<String, Arc<Accessor>>,
    fields: HashMap<String, Arc<Accessor>>,
    setters: HashMap<String, Setter>,
    field_setters: HashMap<String, Setter>,
    describe: fn(&dyn Any) -> String,
}

impl BeanType {
    pub fn builder<T>(name: &'static str) -> BeanTypeBuilder<T>
    where
        T: Any + Send + Sync + fmt::Debug,
    {
        BeanTypeBuilder {
            ty: BeanType {
                key: TypeKey::of::<T>(DEFAULT_REALM),
                name,
                methods: HashMap::new(),
                fields: HashMap::new(),
                setters: HashMap::new(),
                field_setters: HashMap::new(),
                describe: describe_any::<T>,
            },
            _marker: std::marker::PhantomData,
        }
    }

    pub fn key(&self) -> &TypeKey {
        &self.key
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name prefixed with its realm unless it lives in the default one
    pub fn qualified_name(&self) -> String {
        match self.key.realm() {
            DEFAULT_REALM => self.name.to_string(),
            realm => format!("{realm}/{}", self.name),
        }
    }

    pub fn method(&self, name: &str) -> Option<&Arc<Accessor>> {
        self.methods.get(name)
    }

    pub fn field(&self, name: &str) -> Option<&Arc<Accessor>> {
        self.fields.get(name)
    }

    pub fn setter(&self, name: &str) -> Option<&Setter> {
        self.setters.get(name)
    }

    pub fn field_setter(&self, name: &str) -> Option<&Setter> {
        self.field_setters.get(name)
    }

    pub(crate) fn describe(&self, target: &dyn Any) -> String {
        (self.describe)(target)
    }
}

impl fmt::Debug for BeanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanType")
            .field("name", &self.name)
            .field("realm", &self.key.realm())
            .finish()
    }
}

fn describe_any<T: Any + fmt::Debug>(target: &dyn Any) -> String {
    target
        .downcast_ref::<T>()
        .map(|t| format!("{t:?}"))
        .unwrap_or_else(|| "<unknown>".to_string())
}

fn mismatch(type_name: &str) -> RuntimeError {
    internal_error!("accessor applied to a value that is not a {}", type_name)
}

pub struct BeanTypeBuilder<T> {
    ty: BeanType,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> BeanTypeBuilder<T>
where
    T: Any + Send + Sync + fmt::Debug,
{
    /// Register the type under an isolated realm
    pub fn realm(mut self, realm: &str) -> Self {
        self.ty.key = TypeKey::of::<T>(realm);
        self
    }

    /// Zero-argument method, e.g. `getName`, `isActive` or `size`
    pub fn method<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&T) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        let accessor = self.accessor(MemberKind::Method, name, f);
        self.ty.methods.insert(name.to_string(), accessor);
        self
    }

    /// Public field
    pub fn field<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&T) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        let accessor = self.accessor(MemberKind::Field, name, f);
        self.ty.fields.insert(name.to_string(), accessor);
        self
    }

    /// One-argument method, e.g. `setName`
    pub fn setter<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&mut T, Value) -> RuntimeResult<()> + Send + Sync + 'static,
    {
        let setter = Self::wrap_setter(self.ty.name, f);
        self.ty.setters.insert(name.to_string(), setter);
        self
    }

    /// Writable public field
    pub fn field_setter<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&mut T, Value) -> RuntimeResult<()> + Send + Sync + 'static,
    {
        let setter = Self::wrap_setter(self.ty.name, f);
        self.ty.field_setters.insert(name.to_string(), setter);
        self
    }

    pub fn build(self) -> Arc<BeanType> {
        Arc::new(self.ty)
    }

    fn accessor<F>(&self, kind: MemberKind, name: &str, f: F) -> Arc<Accessor>
    where
        F: Fn(&T) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        let type_name = self.ty.name;
        let read: Getter = Arc::new(move |target: &dyn Any| match target.downcast_ref::<T>() {
            Some(t) => f(t),
            None => Err(mismatch(type_name)),
        });
        Arc::new(Accessor {
            kind,
            member: name.to_string(),
            read,
        })
    }

    fn wrap_setter<F>(type_name: &'static str, f: F) -> Setter
    where
        F: Fn(&mut T, Value) -> RuntimeResult<()> + Send + Sync + 'static,
    {
        Arc::new(
            move |target: &mut dyn Any, value: Value| match target.downcast_mut::<T>() {
                Some(t) => f(t, value),
                None => Err(mismatch(type_name)),
            },
        )
    }
}

/// Types that publish an accessor table
pub trait Bean: Any + Send + Sync + fmt::Debug {
    fn bean_type() -> Arc<BeanType>
    where
        Self: Sized;
}

/// Shared handle to an object with an accessor table.
///
/// Clones point at the same object, so writes through one handle are seen
/// by every other.
#[derive(Clone)]
pub struct BeanRef {
    ty: Arc<BeanType>,
    cell: Arc<RwLock<Box<dyn Any + Send + Sync>>>,
}

impl BeanRef {
    pub fn new<T: Bean>(value: T) -> Self {
        Self {
            ty: T::bean_type(),
            cell: Arc::new(RwLock::new(Box::new(value))),
        }
    }

    /// Attach an explicit accessor table, e.g. one registered under another
    /// realm. The table must have been built for `T`.
    pub fn with_type<T: Any + Send + Sync>(ty: Arc<BeanType>, value: T) -> RuntimeResult<Self> {
        if ty.key().type_id() != TypeId::of::<T>() {
            return Err(RuntimeError::InvalidArgument(format!(
                "accessor table {} does not describe {}",
                ty.qualified_name(),
                std::any::type_name::<T>()
            )));
        }
        Ok(Self {
            ty,
            cell: Arc::new(RwLock::new(Box::new(value))),
        })
    }

    pub fn bean_type(&self) -> &Arc<BeanType> {
        &self.ty
    }

    pub fn ptr_eq(&self, other: &BeanRef) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Typed read access; `None` when the object is not a `T`
    pub fn read<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.cell.read();
        guard.downcast_ref::<T>().map(f)
    }

    /// Typed write access; `None` when the object is not a `T`
    pub fn write<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.cell.write();
        guard.downcast_mut::<T>().map(f)
    }

    pub(crate) fn invoke(&self, accessor: &Accessor) -> RuntimeResult<Value> {
        let guard = self.cell.read();
        let target: &dyn Any = &**guard;
        accessor.invoke(target)
    }

    pub(crate) fn apply(&self, setter: &Setter, value: Value) -> RuntimeResult<()> {
        let mut guard = self.cell.write();
        let target: &mut dyn Any = &mut **guard;
        setter(target, value)
    }
}

impl fmt::Display for BeanRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.cell.read();
        let target: &dyn Any = &**guard;
        write!(f, "{}", self.ty.describe(target))
    }
}

impl fmt::Debug for BeanRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BeanRef({}: {self})", self.ty.qualified_name())
    }
}

static STRING_TYPE: Lazy<Arc<BeanType>> = Lazy::new(|| {
    BeanType::builder::<String>("String")
        .realm(BUILTIN_REALM)
        .method("length", |s| Ok(Value::Int(s.chars().count() as i64)))
        .method("isEmpty", |s| Ok(Value::Bool(s.is_empty())))
        .build()
});

static LIST_TYPE: Lazy<Arc<BeanType>> = Lazy::new(|| {
    BeanType::builder::<Vec<Value>>("List")
        .realm(BUILTIN_REALM)
        .method("size", |l| Ok(Value::Int(l.len() as i64)))
        .method("isEmpty", |l| Ok(Value::Bool(l.is_empty())))
        .build()
});

/// Accessor table of built-in strings
pub fn string_type() -> &'static Arc<BeanType> {
    &STRING_TYPE
}

/// Accessor table of built-in lists
pub fn list_type() -> &'static Arc<BeanType> {
    &LIST_TYPE
}
