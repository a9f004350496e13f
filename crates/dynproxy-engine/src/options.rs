//! Proxy generation options and mixin bookkeeping

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use rustc_hash::{FxHashMap, FxHasher};

use crate::attributes::AttributeDisassembler;
use crate::error::{ProxyError, ProxyResult};
use crate::interceptor::{AllMethodsHook, InterceptorSelector, ProxyGenerationHook};
use crate::types::{CustomAttributeData, TypeRef, TypeTable};
use crate::value::Value;
use crate::vm::Vm;

/// Mixin instances keyed by the interfaces they contribute
///
/// Interfaces are ordered by full name; `mixins()` runs parallel to
/// `interfaces()`, so a mixin implementing several interfaces appears once
/// per interface.
#[derive(Debug, Clone, Default)]
pub struct MixinData {
    interfaces: Vec<TypeRef>,
    mixins: Vec<Value>,
    positions: FxHashMap<TypeRef, usize>,
}

impl MixinData {
    /// Collect the interfaces of every mixin instance.
    ///
    /// Values that implement no interface are ignored.
    pub fn new(table: &TypeTable, instances: &[Value]) -> ProxyResult<Self> {
        let mut owners: Vec<(String, TypeRef, Value)> = Vec::new();
        for instance in instances {
            let Some(ty) = instance.runtime_type() else {
                return Err(ProxyError::NullArgument("mixin instance"));
            };
            for iface in table.all_interfaces(&ty) {
                let name = table.type_name(&iface);
                if let Some((_, _, first)) = owners.iter().find(|(_, known, _)| *known == iface) {
                    return Err(ProxyError::DuplicateMixin {
                        interface: name,
                        first: first
                            .runtime_type()
                            .map(|t| table.type_name(&t))
                            .unwrap_or_default(),
                        second: table.type_name(&ty),
                    });
                }
                owners.push((name, iface, instance.clone()));
            }
        }
        owners.sort_by(|a, b| a.0.cmp(&b.0));

        let mut data = MixinData::default();
        for (position, (_, iface, mixin)) in owners.into_iter().enumerate() {
            data.positions.insert(iface.clone(), position);
            data.interfaces.push(iface);
            data.mixins.push(mixin);
        }
        Ok(data)
    }

    /// Contributed interfaces, sorted by full name
    pub fn interfaces(&self) -> &[TypeRef] {
        &self.interfaces
    }

    /// Mixin instance for each entry of [`interfaces`](Self::interfaces)
    pub fn mixins(&self) -> &[Value] {
        &self.mixins
    }

    /// Whether a mixin contributes `iface`
    pub fn contains_mixin(&self, iface: &TypeRef) -> bool {
        self.positions.contains_key(iface)
    }

    /// Position of the mixin contributing `iface`
    pub fn mixin_position(&self, iface: &TypeRef) -> Option<usize> {
        self.positions.get(iface).copied()
    }

    /// No mixin contributes anything
    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

impl PartialEq for MixinData {
    fn eq(&self, other: &Self) -> bool {
        self.interfaces == other.interfaces
    }
}

impl Eq for MixinData {}

/// Knobs that change the shape of a generated proxy.
///
/// Options take part in the generation cache key. Mixins and attribute
/// instances are resolved once by [`initialize`](Self::initialize); after
/// that both lists are frozen.
#[derive(Clone)]
pub struct ProxyGenerationOptions {
    /// Decides which members are intercepted
    pub hook: Arc<dyn ProxyGenerationHook>,
    /// Narrows the interceptor chain per method
    pub selector: Option<Arc<dyn InterceptorSelector>>,
    /// Base class of interface proxies
    pub base_type_for_interface_proxy: TypeRef,
    /// Extra attributes applied to the proxy type
    pub additional_attributes: Vec<CustomAttributeData>,
    attribute_instances: Vec<Value>,
    mixins: Vec<Value>,
    mixin_data: OnceCell<MixinData>,
    disassembled: OnceCell<Vec<CustomAttributeData>>,
}

impl Default for ProxyGenerationOptions {
    fn default() -> Self {
        Self::new(Arc::new(AllMethodsHook))
    }
}

impl ProxyGenerationOptions {
    /// Options with the given hook and nothing else
    pub fn new(hook: Arc<dyn ProxyGenerationHook>) -> Self {
        Self {
            hook,
            selector: None,
            base_type_for_interface_proxy: TypeRef::object(),
            additional_attributes: Vec::new(),
            attribute_instances: Vec::new(),
            mixins: Vec::new(),
            mixin_data: OnceCell::new(),
            disassembled: OnceCell::new(),
        }
    }

    /// Set the interceptor selector
    pub fn with_selector(mut self, selector: Arc<dyn InterceptorSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Set the base class of interface proxies
    pub fn with_base_type(mut self, base: TypeRef) -> Self {
        self.base_type_for_interface_proxy = base;
        self
    }

    /// Add an attribute to the generated proxy type
    pub fn with_attribute(mut self, attribute: CustomAttributeData) -> Self {
        self.additional_attributes.push(attribute);
        self
    }

    /// Add a live attribute instance to the generated proxy type.
    ///
    /// The instance is disassembled when the options are initialized;
    /// instances that cannot be rebuilt are dropped.
    pub fn with_attribute_instance(mut self, attribute: Value) -> ProxyResult<Self> {
        self.add_attribute_instance(attribute)?;
        Ok(self)
    }

    /// Add a live attribute instance; fails once the options are initialized
    pub fn add_attribute_instance(&mut self, attribute: Value) -> ProxyResult<()> {
        if self.is_initialized() {
            return Err(ProxyError::AlreadyInitialized("ProxyGenerationOptions"));
        }
        if attribute.is_null() {
            return Err(ProxyError::NullArgument("attribute"));
        }
        self.attribute_instances.push(attribute);
        Ok(())
    }

    /// Add a mixin instance
    pub fn with_mixin(mut self, mixin: Value) -> ProxyResult<Self> {
        self.add_mixin_instance(mixin)?;
        Ok(self)
    }

    /// Add a mixin instance; fails once the options are initialized
    pub fn add_mixin_instance(&mut self, mixin: Value) -> ProxyResult<()> {
        if self.is_initialized() {
            return Err(ProxyError::AlreadyInitialized("ProxyGenerationOptions"));
        }
        if mixin.is_null() {
            return Err(ProxyError::NullArgument("mixin"));
        }
        self.mixins.push(mixin);
        Ok(())
    }

    /// Mixin instances in the order they were added
    pub fn mixin_instances(&self) -> &[Value] {
        &self.mixins
    }

    /// Whether any mixin was added
    pub fn has_mixins(&self) -> bool {
        !self.mixins.is_empty()
    }

    /// Resolve the mixins and disassemble the attribute instances.
    /// Idempotent.
    ///
    /// Runs the attribute constructors and getters, so the type table must
    /// not be locked by the caller.
    pub fn initialize(&self, vm: &Vm) -> ProxyResult<()> {
        self.mixin_data
            .get_or_try_init(|| MixinData::new(&vm.types().read(), &self.mixins))?;
        self.disassembled.get_or_init(|| {
            self.attribute_instances
                .iter()
                .filter_map(|instance| AttributeDisassembler.disassemble(vm, instance))
                .collect()
        });
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.mixin_data.get().is_some()
    }

    /// Every attribute the proxy type receives: the explicit ones, then the
    /// disassembled instances once the options are initialized
    pub fn attributes(&self) -> impl Iterator<Item = &CustomAttributeData> + '_ {
        self.additional_attributes
            .iter()
            .chain(self.disassembled.get().into_iter().flatten())
    }

    /// Resolved mixins
    pub fn mixin_data(&self) -> ProxyResult<&MixinData> {
        self.mixin_data
            .get()
            .ok_or(ProxyError::NotInitialized("ProxyGenerationOptions"))
    }

    fn mixin_interfaces(&self) -> Option<&[TypeRef]> {
        self.mixin_data.get().map(|d| d.interfaces())
    }

    fn attribute_count(&self, attribute: &CustomAttributeData) -> usize {
        self.attributes().filter(|a| *a == attribute).count()
    }

    /// Same instances, in any order; compared by identity
    fn same_instances(&self, other: &Self) -> bool {
        let count = |list: &[Value], v: &Value| list.iter().filter(|x| x.value_eq(v)).count();
        self.attribute_instances.len() == other.attribute_instances.len()
            && self.attribute_instances.iter().all(|v| {
                count(&self.attribute_instances, v) == count(&other.attribute_instances, v)
            })
    }
}

impl PartialEq for ProxyGenerationOptions {
    fn eq(&self, other: &Self) -> bool {
        self.hook.equals(other.hook.as_ref())
            && self.selector.is_some() == other.selector.is_some()
            && self.mixin_interfaces() == other.mixin_interfaces()
            && self.base_type_for_interface_proxy == other.base_type_for_interface_proxy
            && self.is_initialized() == other.is_initialized()
            && (self.is_initialized() || self.same_instances(other))
            && self.attributes().count() == other.attributes().count()
            && self
                .attributes()
                .all(|a| self.attribute_count(a) == other.attribute_count(a))
    }
}

impl Eq for ProxyGenerationOptions {}

impl Hash for ProxyGenerationOptions {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hook.hash_code());
        self.selector.is_some().hash(state);
        self.mixin_interfaces().hash(state);
        self.base_type_for_interface_proxy.hash(state);
        // Order-insensitive
        let attributes = self
            .attributes()
            .map(|a| {
                let mut hasher = FxHasher::default();
                a.hash(&mut hasher);
                hasher.finish()
            })
            .fold(0u64, u64::wrapping_add);
        state.write_u64(attributes);
        if !self.is_initialized() {
            self.attribute_instances.len().hash(state);
        }
    }
}

impl fmt::Debug for ProxyGenerationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyGenerationOptions")
            .field("hook", &self.hook)
            .field("selector", &self.selector.is_some())
            .field("mixins", &self.mixins.len())
            .field("base_type_for_interface_proxy", &self.base_type_for_interface_proxy)
            .field("additional_attributes", &self.additional_attributes)
            .field("attribute_instances", &self.attribute_instances.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;
    use crate::types::{MethodDef, MethodId, TypeBuilder, TypeDef, TypeId};
    use std::any::Any;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(options: &ProxyGenerationOptions) -> u64 {
        let mut hasher = DefaultHasher::new();
        options.hash(&mut hasher);
        hasher.finish()
    }

    struct Declines;

    impl ProxyGenerationHook for Declines {
        fn should_intercept_method(&self, _ty: &TypeDef, _method: &MethodDef) -> bool {
            false
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn vm_over(table: TypeTable) -> Vm {
        Vm::new(Arc::new(parking_lot::RwLock::new(table)))
    }

    fn table_with_mixins() -> (TypeTable, Value, Value) {
        let mut table = TypeTable::new();
        bootstrap::install(&mut table).unwrap();
        let simple = TypeBuilder::interface("Mixins.ISimpleMixin").build(&mut table).unwrap();
        let other = TypeBuilder::interface("Mixins.IOtherMixin").build(&mut table).unwrap();
        let simple_impl = TypeBuilder::class("Mixins.SimpleMixin")
            .implements(TypeRef::named(simple.id))
            .build(&mut table)
            .unwrap();
        let other_impl = TypeBuilder::class("Mixins.OtherMixin")
            .implements(TypeRef::named(other.id))
            .build(&mut table)
            .unwrap();
        let make = |def: Arc<TypeDef>| Value::Object(crate::value::Object::new(def, Vec::new(), Vec::new()));
        (table, make(simple_impl), make(other_impl))
    }

    #[test]
    fn test_mixins_sorted_by_interface_name() {
        let (table, simple, other) = table_with_mixins();
        let data = MixinData::new(&table, &[simple.clone(), other.clone()]).unwrap();
        assert_eq!(data.mixins()[0], other);
        assert_eq!(data.mixins()[1], simple);
        let iface = table.get_by_name("Mixins.ISimpleMixin").unwrap();
        assert_eq!(data.mixin_position(&TypeRef::named(iface.id)), Some(1));
        assert_eq!(data, MixinData::new(&table, &[other, simple]).unwrap());
    }

    #[test]
    fn test_duplicate_mixin_interface_fails() {
        let (table, simple, _) = table_with_mixins();
        let copy = Value::Object(crate::value::Object::new(
            simple.as_object().unwrap().ty.clone(),
            Vec::new(),
            Vec::new(),
        ));
        let err = MixinData::new(&table, &[simple, copy]).unwrap_err();
        assert!(matches!(err, ProxyError::DuplicateMixin { .. }));
    }

    #[test]
    fn test_values_without_interfaces_are_ignored() {
        let (table, _, _) = table_with_mixins();
        let data = MixinData::new(&table, &[Value::from("text")]).unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn test_initialize_freezes_mixins() {
        let (table, simple, other) = table_with_mixins();
        let mut options = ProxyGenerationOptions::default();
        assert!(matches!(options.mixin_data(), Err(ProxyError::NotInitialized(_))));
        options.add_mixin_instance(simple).unwrap();
        let vm = vm_over(table);
        options.initialize(&vm).unwrap();
        options.initialize(&vm).unwrap();
        assert_eq!(options.mixin_data().unwrap().interfaces().len(), 1);
        assert_eq!(
            options.add_mixin_instance(other.clone()),
            Err(ProxyError::AlreadyInitialized("ProxyGenerationOptions"))
        );
        assert_eq!(
            options.add_attribute_instance(other),
            Err(ProxyError::AlreadyInitialized("ProxyGenerationOptions"))
        );
    }

    #[test]
    fn test_equality_ignores_mixin_instances() {
        let (table, simple, _) = table_with_mixins();
        let simple2 = Value::Object(crate::value::Object::new(
            simple.as_object().unwrap().ty.clone(),
            Vec::new(),
            Vec::new(),
        ));
        let a = ProxyGenerationOptions::default().with_mixin(simple).unwrap();
        let b = ProxyGenerationOptions::default().with_mixin(simple2).unwrap();
        let vm = vm_over(table);
        a.initialize(&vm).unwrap();
        b.initialize(&vm).unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_equality_of_hooks_and_selector_presence() {
        let a = ProxyGenerationOptions::default();
        let b = ProxyGenerationOptions::default();
        assert_eq!(a, b);
        assert_ne!(a, ProxyGenerationOptions::new(Arc::new(Declines)));
        assert_ne!(a, b.clone().with_base_type(TypeRef::named(TypeId::ATTRIBUTE)));
    }

    #[test]
    fn test_attributes_compare_as_multiset() {
        let attr = |n: i32| CustomAttributeData::new(TypeId::ATTRIBUTE, MethodId(0), vec![Value::I32(n)]);
        let a = ProxyGenerationOptions::default()
            .with_attribute(attr(1))
            .with_attribute(attr(2));
        let b = ProxyGenerationOptions::default()
            .with_attribute(attr(2))
            .with_attribute(attr(1));
        let c = ProxyGenerationOptions::default()
            .with_attribute(attr(1))
            .with_attribute(attr(1));
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, c);
    }
}
