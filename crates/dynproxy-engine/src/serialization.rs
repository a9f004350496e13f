//! Persisting proxies
//!
//! A proxy is saved as a [`ProxyRecipe`]: the generation request that
//! produced its type (by type name, so it survives a new scope) plus an
//! [`ObjectGraph`] holding the target, the mixins and, for class proxies,
//! the proxied class's own state. Interceptors are behavior, not data; the
//! caller hands them in again on rebuild.
//!
//! Rebuilding resolves the names, fetches or generates the proxy type and
//! restores the graph in two passes: every object is allocated first, then
//! fields are filled, so cycles and references back to the proxy resolve.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::ProxyKind;
use crate::error::{ProxyError, ProxyResult};
use crate::generators::{
    mixin_field_name, INTERCEPTORS_FIELD, SELECTOR_FIELD, TARGET_FIELD,
};
use crate::interceptor::{AllMethodsHook, Interceptor, InterceptorSelector, ProxyGenerationHook};
use crate::options::ProxyGenerationOptions;
use crate::proxy_generator::ProxyGenerator;
use crate::scope::ModuleScope;
use crate::types::{GenericOwner, Primitive, TypeDef, TypeRef, TypeTable};
use crate::value::{Array, Object, ObjectRef, Value};

/// A type reference by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeSpec {
    /// No value
    Void,
    /// Built-in scalar
    Primitive {
        /// Which scalar
        primitive: Primitive,
    },
    /// Table type by full name
    Named {
        /// Full type name
        name: String,
        /// Type arguments
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<TypeSpec>,
    },
    /// Generic parameter
    GenericParam {
        /// Declared on a method rather than on the type
        method: bool,
        /// Position in the declaration
        position: u16,
    },
    /// Single-dimension array
    Array {
        /// Element type
        element: Box<TypeSpec>,
    },
}

impl TypeSpec {
    /// Name form of `ty`
    pub fn describe(types: &TypeTable, ty: &TypeRef) -> ProxyResult<Self> {
        Ok(match ty {
            TypeRef::Void => TypeSpec::Void,
            TypeRef::Primitive(primitive) => TypeSpec::Primitive {
                primitive: *primitive,
            },
            TypeRef::Named(id, args) => {
                let def = types
                    .get(*id)
                    .ok_or_else(|| ProxyError::UnknownType(format!("#{}", id.0)))?;
                TypeSpec::Named {
                    name: def.name.clone(),
                    args: args
                        .iter()
                        .map(|arg| Self::describe(types, arg))
                        .collect::<ProxyResult<_>>()?,
                }
            }
            TypeRef::GenericParam(owner, position) => TypeSpec::GenericParam {
                method: *owner == GenericOwner::Method,
                position: *position,
            },
            TypeRef::Array(element) => TypeSpec::Array {
                element: Box::new(Self::describe(types, element)?),
            },
            TypeRef::ByRef(_) => {
                return Err(ProxyError::Serialization(format!(
                    "by-reference type {} cannot be persisted",
                    ty
                )))
            }
        })
    }

    /// Type reference for this name in `types`
    pub fn resolve(&self, types: &TypeTable) -> ProxyResult<TypeRef> {
        Ok(match self {
            TypeSpec::Void => TypeRef::Void,
            TypeSpec::Primitive { primitive } => TypeRef::Primitive(*primitive),
            TypeSpec::Named { name, args } => {
                let def = types
                    .get_by_name(name)
                    .ok_or_else(|| ProxyError::UnknownType(name.clone()))?;
                let args = args
                    .iter()
                    .map(|arg| arg.resolve(types))
                    .collect::<ProxyResult<_>>()?;
                TypeRef::Named(def.id, args)
            }
            TypeSpec::GenericParam { method, position } => {
                let owner = if *method {
                    GenericOwner::Method
                } else {
                    GenericOwner::Type
                };
                TypeRef::GenericParam(owner, *position)
            }
            TypeSpec::Array { element } => TypeRef::array_of(element.resolve(types)?),
        })
    }
}

/// A persisted value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum GraphValue {
    /// Null reference
    Null,
    /// `bool`
    Bool(bool),
    /// `char`
    Char(char),
    /// `i32`
    I32(i32),
    /// `i64`
    I64(i64),
    /// `f64`
    F64(f64),
    /// `string`
    Str(String),
    /// Enum constant
    Enum {
        /// Enum type
        ty: TypeSpec,
        /// Constant value
        value: i32,
    },
    /// Index into [`ObjectGraph::nodes`]
    Object(usize),
    /// The proxy being persisted
    Proxy,
    /// Array, stored inline
    Array {
        /// Element type
        element: TypeSpec,
        /// Elements
        items: Vec<GraphValue>,
    },
    /// Type handle
    Type(TypeSpec),
}

/// One persisted object: its type and its instance fields by slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectNode {
    /// Runtime type
    pub ty: TypeSpec,
    /// Instance field values, indexed by slot
    pub fields: Vec<GraphValue>,
}

/// Objects reachable from a proxy's state, each stored once
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectGraph {
    /// Objects in discovery order
    pub nodes: Vec<ObjectNode>,
}

/// Everything needed to recreate a proxy in another scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRecipe {
    /// Proxy kind ([`ProxyKind::as_str`])
    pub kind: String,
    /// Proxied class or primary interface
    pub target_type: TypeSpec,
    /// Additional interfaces, as normalized in the cache key
    pub interfaces: Vec<TypeSpec>,
    /// Runtime type of the target, for interface proxies with a fixed target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<TypeSpec>,
    /// Key of the generation hook
    pub hook: String,
    /// Whether the proxy was generated with a selector
    pub selector: bool,
    /// Base class of interface proxies
    pub base_type: TypeSpec,
    /// The target object
    pub target: GraphValue,
    /// Mixin instances, each once
    pub mixins: Vec<GraphValue>,
    /// Fields of the proxied class (class proxies without target)
    pub state: Vec<GraphValue>,
    /// Objects referenced by the values above
    pub graph: ObjectGraph,
}

impl ProxyRecipe {
    /// Capture `proxy`, which must come from a generator over `scope`
    pub fn capture(scope: &ModuleScope, proxy: &Value) -> ProxyResult<Self> {
        let object = proxy
            .as_object()
            .ok_or(ProxyError::NullArgument("proxy"))?
            .clone();
        let key = scope.cache_key_of(object.ty.id).ok_or_else(|| {
            ProxyError::Serialization(format!("{} is not a generated proxy", object.ty.name))
        })?;
        let hook = key.options.hook.key().ok_or_else(|| {
            ProxyError::Serialization(
                "the proxy generation hook has no key and cannot be persisted".to_string(),
            )
        })?;

        let types = scope.types().read();
        let mut writer = GraphWriter::new(&types, &object);
        let target = match &key.kind {
            ProxyKind::Class | ProxyKind::InterfaceWithoutTarget => GraphValue::Null,
            _ => writer.write(&proxy_field(&object, TARGET_FIELD)?)?,
        };

        let mut mixins: Vec<GraphValue> = Vec::new();
        if let Ok(data) = key.options.mixin_data() {
            let mut seen: Vec<ObjectRef> = Vec::new();
            for iface in data.interfaces() {
                let value = proxy_field(&object, &mixin_field_name(&types.type_name(iface)))?;
                if let Value::Object(mixin) = &value {
                    if seen.iter().any(|known| Arc::ptr_eq(known, mixin)) {
                        continue;
                    }
                    seen.push(mixin.clone());
                }
                mixins.push(writer.write(&value)?);
            }
        }

        let state = if key.kind == ProxyKind::Class {
            let class = types
                .def_of(&key.target)
                .ok_or_else(|| ProxyError::UnknownType(types.type_name(&key.target)))?;
            let fields = object.fields();
            fields
                .iter()
                .take(class.instance_field_count)
                .map(|value| writer.write(value))
                .collect::<ProxyResult<_>>()?
        } else {
            Vec::new()
        };

        let recipe = ProxyRecipe {
            kind: key.kind.as_str().to_string(),
            target_type: TypeSpec::describe(&types, &key.target)?,
            interfaces: key
                .interfaces
                .iter()
                .map(|iface| TypeSpec::describe(&types, iface))
                .collect::<ProxyResult<_>>()?,
            implementation: key
                .implementation
                .as_ref()
                .map(|ty| TypeSpec::describe(&types, ty))
                .transpose()?,
            hook: hook.to_string(),
            selector: key.options.selector.is_some(),
            base_type: TypeSpec::describe(&types, &key.options.base_type_for_interface_proxy)?,
            target,
            mixins,
            state,
            graph: writer.finish(),
        };
        debug!(
            "Captured {} proxy of {} with {} objects",
            recipe.kind,
            types.type_name(&key.target),
            recipe.graph.nodes.len()
        );
        Ok(recipe)
    }

    /// JSON form
    pub fn to_json(&self) -> ProxyResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ProxyError::Serialization(e.to_string()))
    }

    /// Parse the JSON form
    pub fn from_json(content: &str) -> ProxyResult<Self> {
        serde_json::from_str(content).map_err(|e| ProxyError::Serialization(e.to_string()))
    }

    /// Recreate the proxy through `generator`, reusing a cached type when
    /// the scope already has one for this request
    pub fn rebuild(
        &self,
        generator: &ProxyGenerator,
        registry: &HookRegistry,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> ProxyResult<Value> {
        let kind = ProxyKind::from_name(&self.kind)
            .ok_or_else(|| ProxyError::Serialization(format!("unknown proxy kind '{}'", self.kind)))?;
        let hook = registry.hook(&self.hook).ok_or_else(|| {
            ProxyError::Serialization(format!("no hook registered under '{}'", self.hook))
        })?;
        let scope = generator.scope();
        let vm = scope.vm();

        let (target_type, interfaces, implementation, base_type, node_types) = {
            let types = scope.types().read();
            (
                self.target_type.resolve(&types)?,
                self.interfaces
                    .iter()
                    .map(|iface| iface.resolve(&types))
                    .collect::<ProxyResult<Vec<_>>>()?,
                self.implementation
                    .as_ref()
                    .map(|ty| ty.resolve(&types))
                    .transpose()?,
                self.base_type.resolve(&types)?,
                self.graph
                    .nodes
                    .iter()
                    .map(|node| node.ty.resolve(&types))
                    .collect::<ProxyResult<Vec<_>>>()?,
            )
        };

        // Pass one: allocate every object so references can point anywhere
        let nodes = node_types
            .iter()
            .map(|ty| vm.allocate(ty))
            .collect::<Result<Vec<_>, _>>()?;

        let mut options = ProxyGenerationOptions::new(hook).with_base_type(base_type);
        if self.selector {
            let selector = registry.selector().ok_or_else(|| {
                ProxyError::Serialization("the proxy needs an interceptor selector".to_string())
            })?;
            options = options.with_selector(selector);
        }
        let reader = GraphReader {
            nodes: &nodes,
            proxy: Value::Null,
        };
        for mixin in &self.mixins {
            options.add_mixin_instance(reader.read(mixin, scope)?)?;
        }

        let proxy_type =
            generator.proxy_type(kind, &target_type, &interfaces, implementation.as_ref(), &options)?;
        let proxy = vm.allocate(&proxy_type)?;
        let reader = GraphReader {
            nodes: &nodes,
            proxy: proxy.clone(),
        };

        // Pass two: fill fields
        for (node, value) in self.graph.nodes.iter().zip(&nodes) {
            let object = value.expect_object("persisted object")?;
            for (slot, field) in node.fields.iter().enumerate() {
                object.set_field(slot, reader.read(field, scope)?);
            }
        }

        let object = proxy.expect_object("proxy")?.clone();
        set_proxy_field(&object, INTERCEPTORS_FIELD, Value::Interceptors(Arc::new(interceptors)))?;
        if let Some(selector) = &options.selector {
            set_proxy_field(&object, SELECTOR_FIELD, Value::Selector(selector.clone()))?;
        }
        if !matches!(kind, ProxyKind::Class | ProxyKind::InterfaceWithoutTarget) {
            set_proxy_field(&object, TARGET_FIELD, reader.read(&self.target, scope)?)?;
        }
        let data = options.mixin_data()?;
        for (iface, mixin) in data.interfaces().iter().zip(data.mixins()) {
            let name = mixin_field_name(&scope.type_name(iface));
            set_proxy_field(&object, &name, mixin.clone())?;
        }
        for (slot, value) in self.state.iter().enumerate() {
            object.set_field(slot, reader.read(value, scope)?);
        }

        debug!(
            "Rebuilt {} proxy of {} with {} objects",
            self.kind,
            scope.type_name(&target_type),
            nodes.len()
        );
        Ok(proxy)
    }
}

/// Hooks (and the selector) that recipes refer to by key
#[derive(Clone)]
pub struct HookRegistry {
    hooks: FxHashMap<String, Arc<dyn ProxyGenerationHook>>,
    selector: Option<Arc<dyn InterceptorSelector>>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    /// Registry knowing [`AllMethodsHook`]
    pub fn new() -> Self {
        let mut hooks: FxHashMap<String, Arc<dyn ProxyGenerationHook>> = FxHashMap::default();
        hooks.insert(AllMethodsHook::KEY.to_string(), Arc::new(AllMethodsHook));
        Self {
            hooks,
            selector: None,
        }
    }

    /// Register a hook under its own key
    pub fn register(&mut self, hook: Arc<dyn ProxyGenerationHook>) -> ProxyResult<()> {
        let key = hook
            .key()
            .ok_or_else(|| ProxyError::Serialization("hook has no key".to_string()))?
            .to_string();
        self.hooks.insert(key, hook);
        Ok(())
    }

    /// Selector used by recipes that were generated with one
    pub fn with_selector(mut self, selector: Arc<dyn InterceptorSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Hook registered under `key`
    pub fn hook(&self, key: &str) -> Option<Arc<dyn ProxyGenerationHook>> {
        self.hooks.get(key).cloned()
    }

    /// The registered selector
    pub fn selector(&self) -> Option<Arc<dyn InterceptorSelector>> {
        self.selector.clone()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .field("selector", &self.selector.is_some())
            .finish()
    }
}

fn proxy_field(object: &Object, name: &str) -> ProxyResult<Value> {
    let slot = field_slot(&object.ty, name)?;
    Ok(object.field(slot))
}

fn set_proxy_field(object: &Object, name: &str, value: Value) -> ProxyResult<()> {
    let slot = field_slot(&object.ty, name)?;
    object.set_field(slot, value);
    Ok(())
}

fn field_slot(def: &TypeDef, name: &str) -> ProxyResult<usize> {
    def.field(name)
        .filter(|field| !field.is_static)
        .map(|field| field.slot)
        .ok_or_else(|| ProxyError::Serialization(format!("{} has no field {}", def.name, name)))
}

struct GraphWriter<'a> {
    types: &'a TypeTable,
    proxy: &'a ObjectRef,
    ids: FxHashMap<*const Object, usize>,
    nodes: Vec<ObjectNode>,
}

impl<'a> GraphWriter<'a> {
    fn new(types: &'a TypeTable, proxy: &'a ObjectRef) -> Self {
        Self {
            types,
            proxy,
            ids: FxHashMap::default(),
            nodes: Vec::new(),
        }
    }

    fn write(&mut self, value: &Value) -> ProxyResult<GraphValue> {
        Ok(match value {
            Value::Null => GraphValue::Null,
            Value::Bool(b) => GraphValue::Bool(*b),
            Value::Char(c) => GraphValue::Char(*c),
            Value::I32(i) => GraphValue::I32(*i),
            Value::I64(i) => GraphValue::I64(*i),
            Value::F64(f) => GraphValue::F64(*f),
            Value::Str(s) => GraphValue::Str(s.to_string()),
            Value::Enum(ty, v) => GraphValue::Enum {
                ty: TypeSpec::describe(self.types, &TypeRef::named(*ty))?,
                value: *v,
            },
            Value::Type(ty) => GraphValue::Type(TypeSpec::describe(self.types, ty)?),
            Value::Array(array) => GraphValue::Array {
                element: TypeSpec::describe(self.types, &array.element)?,
                items: array
                    .to_vec()
                    .iter()
                    .map(|item| self.write(item))
                    .collect::<ProxyResult<_>>()?,
            },
            Value::Object(object) if Arc::ptr_eq(object, self.proxy) => GraphValue::Proxy,
            Value::Object(object) => {
                let ptr = Arc::as_ptr(object);
                if let Some(id) = self.ids.get(&ptr) {
                    return Ok(GraphValue::Object(*id));
                }
                let id = self.nodes.len();
                self.ids.insert(ptr, id);
                self.nodes.push(ObjectNode {
                    ty: TypeSpec::describe(self.types, &object.type_ref())?,
                    fields: Vec::new(),
                });
                let fields = object
                    .fields()
                    .iter()
                    .map(|field| self.write(field))
                    .collect::<ProxyResult<Vec<_>>>()?;
                self.nodes[id].fields = fields;
                GraphValue::Object(id)
            }
            Value::Ref(_) | Value::Method(_) | Value::Interceptors(_) | Value::Selector(_) => {
                return Err(ProxyError::Serialization(format!(
                    "{:?} cannot be persisted",
                    value
                )))
            }
        })
    }

    fn finish(self) -> ObjectGraph {
        ObjectGraph { nodes: self.nodes }
    }
}

struct GraphReader<'a> {
    nodes: &'a [Value],
    proxy: Value,
}

impl GraphReader<'_> {
    fn read(&self, value: &GraphValue, scope: &ModuleScope) -> ProxyResult<Value> {
        Ok(match value {
            GraphValue::Null => Value::Null,
            GraphValue::Bool(b) => Value::Bool(*b),
            GraphValue::Char(c) => Value::Char(*c),
            GraphValue::I32(i) => Value::I32(*i),
            GraphValue::I64(i) => Value::I64(*i),
            GraphValue::F64(f) => Value::F64(*f),
            GraphValue::Str(s) => Value::Str(s.as_str().into()),
            GraphValue::Enum { ty, value } => {
                let ty = ty.resolve(&scope.types().read())?;
                let id = ty
                    .type_id()
                    .ok_or_else(|| ProxyError::Serialization(format!("{} is not an enum", ty)))?;
                Value::Enum(id, *value)
            }
            GraphValue::Type(ty) => Value::Type(ty.resolve(&scope.types().read())?),
            GraphValue::Array { element, items } => {
                let element = element.resolve(&scope.types().read())?;
                let items = items
                    .iter()
                    .map(|item| self.read(item, scope))
                    .collect::<ProxyResult<_>>()?;
                Value::Array(Array::new(element, items))
            }
            GraphValue::Object(id) => self.nodes.get(*id).cloned().ok_or_else(|| {
                ProxyError::Serialization(format!("object #{} is missing from the graph", id))
            })?,
            GraphValue::Proxy => self.proxy.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MethodBuilder, TypeBuilder};

    #[test]
    fn test_type_spec_resolves_by_name() {
        let scope = ModuleScope::new().unwrap();
        let def = scope
            .define(TypeBuilder::interface("Demo.IBox").generic_param("T"))
            .unwrap();
        let types = scope.types().read();
        let ty = TypeRef::array_of(TypeRef::Named(def.id, vec![TypeRef::string()]));
        let spec = TypeSpec::describe(&types, &ty).unwrap();
        assert_eq!(spec.resolve(&types).unwrap(), ty);
    }

    #[test]
    fn test_unknown_type_name_fails() {
        let scope = ModuleScope::new().unwrap();
        let spec = TypeSpec::Named {
            name: "Demo.Missing".to_string(),
            args: Vec::new(),
        };
        let err = spec.resolve(&scope.types().read()).unwrap_err();
        assert_eq!(err, ProxyError::UnknownType("Demo.Missing".to_string()));
    }

    #[test]
    fn test_cyclic_target_survives_rebuild() {
        let generator = ProxyGenerator::new().unwrap();
        let scope = generator.scope().clone();
        let iface = scope
            .define(
                TypeBuilder::interface("Demo.ILink")
                    .method(MethodBuilder::new("Label").returns(TypeRef::string())),
            )
            .unwrap();
        let link = scope
            .define(
                TypeBuilder::class("Demo.Link")
                    .implements(TypeRef::named(iface.id))
                    .field("Next", TypeRef::object())
                    .field("Text", TypeRef::string())
                    .method(
                        MethodBuilder::new("Label")
                            .returns(TypeRef::string())
                            .as_virtual()
                            .native(|vm, call| vm.field_value(&call.this, "Text")),
                    ),
            )
            .unwrap();
        let target = scope
            .vm()
            .construct(&TypeRef::named(link.id), Vec::new())
            .unwrap();
        let object = target.as_object().unwrap();
        object.set_field(link.field("Next").unwrap().slot, target.clone());
        object.set_field(link.field("Text").unwrap().slot, Value::from("loop"));

        let proxy = generator
            .create_interface_proxy_with_target(
                &TypeRef::named(iface.id),
                &[],
                &ProxyGenerationOptions::default(),
                target,
                Vec::new(),
            )
            .unwrap();
        let json = ProxyRecipe::capture(&scope, &proxy).unwrap().to_json().unwrap();
        let recipe = ProxyRecipe::from_json(&json).unwrap();
        assert_eq!(recipe.graph.nodes.len(), 1);

        let rebuilt = recipe
            .rebuild(&generator, &HookRegistry::new(), Vec::new())
            .unwrap();
        assert_eq!(rebuilt.runtime_type(), proxy.runtime_type());
        let label = scope.vm().invoke(&rebuilt, "Label", Vec::new()).unwrap();
        assert_eq!(label.as_str(), Some("loop"));

        let new_target = crate::proxy_util::get_unproxied_instance(&scope, &rebuilt).unwrap();
        let next = scope.vm().field_value(&new_target, "Next").unwrap();
        assert!(next.value_eq(&new_target));
    }

    #[test]
    fn test_hook_without_key_cannot_be_registered() {
        struct Anonymous;
        impl ProxyGenerationHook for Anonymous {
            fn should_intercept_method(
                &self,
                _ty: &TypeDef,
                _method: &crate::types::MethodDef,
            ) -> bool {
                true
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }

        let mut registry = HookRegistry::new();
        assert!(registry.register(Arc::new(Anonymous)).is_err());
        assert!(registry.hook(AllMethodsHook::KEY).is_some());
    }
}
