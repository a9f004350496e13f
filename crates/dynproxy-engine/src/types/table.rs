//! Type table for managing runtime type metadata

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{ProxyError, ProxyResult};
use crate::types::signature::{same_signature_parts, MethodSignature};
use crate::types::{
    MethodDef, MethodId, Primitive, TypeDef, TypeId, TypeKind, TypeRef, Visibility,
};
use crate::value::Value;

/// Global counter for method ids
static NEXT_METHOD_ID: AtomicU32 = AtomicU32::new(1);

/// Allocate a fresh method id
pub fn next_method_id() -> MethodId {
    MethodId(NEXT_METHOD_ID.fetch_add(1, Ordering::Relaxed))
}

/// Registry of every type and method known to a scope
#[derive(Debug, Default)]
pub struct TypeTable {
    /// Types indexed by id; `None` while an id is reserved but not built
    types: Vec<Option<Arc<TypeDef>>>,
    /// Full name to id mapping (reserved names included)
    name_to_id: FxHashMap<String, TypeId>,
    /// Methods of registered types
    methods: FxHashMap<MethodId, Arc<MethodDef>>,
}

impl TypeTable {
    /// Create a new empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id for a type that is about to be built.
    ///
    /// # Errors
    ///
    /// Fails when the name is already taken.
    pub fn reserve(&mut self, name: &str) -> ProxyResult<TypeId> {
        if self.name_to_id.contains_key(name) {
            return Err(ProxyError::InvalidDefinition {
                type_name: name.to_string(),
                reason: "a type with this name already exists".to_string(),
            });
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(None);
        self.name_to_id.insert(name.to_string(), id);
        Ok(id)
    }

    /// First free name of the form `base`, `base_1`, `base_2`, ...
    pub fn unique_name(&self, base: &str) -> String {
        if !self.name_to_id.contains_key(base) {
            return base.to_string();
        }
        let mut counter = 1usize;
        loop {
            let candidate = format!("{}_{}", base, counter);
            if !self.name_to_id.contains_key(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Release a reservation whose type was never built
    pub fn release(&mut self, id: TypeId) {
        if matches!(self.types.get(id.index()), Some(None)) {
            self.name_to_id.retain(|_, v| *v != id);
        }
    }

    /// Drop every type (and its methods) with an id of `mark` or above.
    ///
    /// Used to undo a failed generation while the write lock is still held.
    pub(crate) fn rollback(&mut self, mark: usize) {
        if mark >= self.types.len() {
            return;
        }
        for def in self.types.drain(mark..).flatten() {
            for id in def.methods.iter().chain(&def.constructors).chain(&def.type_initializer) {
                self.methods.remove(id);
            }
        }
        self.name_to_id.retain(|_, id| id.index() < mark);
    }

    /// Register a type together with its methods.
    ///
    /// The id must have been reserved. The flattened vtable is computed
    /// here, so implicit interface implementations are resolved at
    /// registration time.
    pub fn register(&mut self, mut def: TypeDef, methods: Vec<MethodDef>) -> ProxyResult<Arc<TypeDef>> {
        match self.types.get(def.id.index()) {
            Some(None) => {}
            _ => {
                return Err(ProxyError::InvalidDefinition {
                    type_name: def.name.clone(),
                    reason: format!("type id {} is not reserved", def.id.0),
                })
            }
        }

        def.vtable = self.build_vtable(&def, &methods)?;

        for method in methods {
            self.methods.insert(method.id, Arc::new(method));
        }
        let def = Arc::new(def);
        self.types[def.id.index()] = Some(def.clone());
        Ok(def)
    }

    /// Get type by id
    pub fn get(&self, id: TypeId) -> Option<Arc<TypeDef>> {
        self.types.get(id.index()).and_then(|t| t.clone())
    }

    /// Get type by full name
    pub fn get_by_name(&self, name: &str) -> Option<Arc<TypeDef>> {
        self.name_to_id.get(name).and_then(|id| self.get(*id))
    }

    /// Get the definition behind a named type reference
    pub fn def_of(&self, ty: &TypeRef) -> Option<Arc<TypeDef>> {
        ty.type_id().and_then(|id| self.get(id))
    }

    /// Get method by id
    pub fn method(&self, id: MethodId) -> Option<Arc<MethodDef>> {
        self.methods.get(&id).cloned()
    }

    /// Number of ids handed out (built or reserved)
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no type was registered yet
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Iterate over all built types
    pub fn iter(&self) -> impl Iterator<Item = &Arc<TypeDef>> {
        self.types.iter().flatten()
    }

    /// Declared methods of a type (constructors excluded)
    pub fn methods_of(&self, id: TypeId) -> Vec<Arc<MethodDef>> {
        self.get(id)
            .map(|def| def.methods.iter().filter_map(|m| self.method(*m)).collect())
            .unwrap_or_default()
    }

    /// Declared constructors of a type
    pub fn constructors_of(&self, id: TypeId) -> Vec<Arc<MethodDef>> {
        self.get(id)
            .map(|def| {
                def.constructors
                    .iter()
                    .filter_map(|m| self.method(*m))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Find a method by name on a type or its ancestors
    pub fn find_method(&self, id: TypeId, name: &str) -> Option<Arc<MethodDef>> {
        let mut current = Some(TypeRef::named(id));
        while let Some(ty) = current {
            let def = self.def_of(&ty)?;
            if let Some(found) = self
                .methods_of(def.id)
                .into_iter()
                .find(|m| m.name == name)
            {
                return Some(found);
            }
            current = def.parent.clone();
        }
        None
    }

    /// Readable name of a type reference
    pub fn type_name(&self, ty: &TypeRef) -> String {
        match ty {
            TypeRef::Named(id, args) => {
                let base = self
                    .get(*id)
                    .map(|d| d.name.clone())
                    .or_else(|| {
                        self.name_to_id
                            .iter()
                            .find(|(_, v)| *v == id)
                            .map(|(k, _)| k.clone())
                    })
                    .unwrap_or_else(|| format!("#{}", id.0));
                if args.is_empty() {
                    base
                } else {
                    let args: Vec<String> = args.iter().map(|a| self.type_name(a)).collect();
                    format!("{}<{}>", base, args.join(", "))
                }
            }
            TypeRef::Array(inner) => format!("{}[]", self.type_name(inner)),
            TypeRef::ByRef(inner) => format!("{}&", self.type_name(inner)),
            other => other.to_string(),
        }
    }

    /// Whether values of `ty` are value types
    pub fn is_value_type(&self, ty: &TypeRef) -> bool {
        match ty {
            TypeRef::Primitive(p) => p.is_value_type(),
            TypeRef::Named(..) => self
                .def_of(ty)
                .map(|d| d.kind == TypeKind::Enum)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Whether `ty` is an interface type
    pub fn is_interface(&self, ty: &TypeRef) -> bool {
        self.def_of(ty).map(|d| d.is_interface()).unwrap_or(false)
    }

    /// Default value of a type (zero for value types, null otherwise)
    pub fn default_value(&self, ty: &TypeRef) -> Value {
        match ty {
            TypeRef::Named(id, _) if self.is_value_type(ty) => Value::Enum(*id, 0),
            other => Value::default_of(other),
        }
    }

    /// Base class of a constructed type, with type arguments substituted
    pub fn parent_of(&self, ty: &TypeRef) -> Option<TypeRef> {
        let def = self.def_of(ty)?;
        def.parent
            .as_ref()
            .map(|p| p.substitute(ty.type_args(), &[]))
    }

    /// Every interface implemented by `ty`, transitively, in declaration order
    pub fn all_interfaces(&self, ty: &TypeRef) -> Vec<TypeRef> {
        let mut out = Vec::new();
        self.collect_interfaces(ty, &mut out);
        out
    }

    fn collect_interfaces(&self, ty: &TypeRef, out: &mut Vec<TypeRef>) {
        let Some(def) = self.def_of(ty) else {
            return;
        };
        let args = ty.type_args();
        for iface in &def.interfaces {
            let closed = iface.substitute(args, &[]);
            if !out.contains(&closed) {
                out.push(closed.clone());
                self.collect_interfaces(&closed, out);
            }
        }
        if let Some(parent) = &def.parent {
            self.collect_interfaces(&parent.substitute(args, &[]), out);
        }
    }

    /// Whether `ty` implements `iface`
    pub fn implements(&self, ty: &TypeRef, iface: &TypeRef) -> bool {
        ty == iface || self.all_interfaces(ty).contains(iface)
    }

    /// Whether `ty` strictly derives from `base`
    pub fn is_subclass_of(&self, ty: &TypeRef, base: &TypeRef) -> bool {
        let mut current = self.parent_of(ty);
        while let Some(parent) = current {
            if &parent == base {
                return true;
            }
            current = self.parent_of(&parent);
        }
        false
    }

    /// Whether a value of type `from` can be stored where `to` is expected
    pub fn is_assignable(&self, from: &TypeRef, to: &TypeRef) -> bool {
        if from == to {
            return true;
        }
        match (from, to) {
            (TypeRef::Void, _) | (_, TypeRef::Void) => false,
            (TypeRef::ByRef(_), _) | (_, TypeRef::ByRef(_)) => false,
            (_, TypeRef::Named(id, _)) if *id == TypeId::OBJECT => true,
            (TypeRef::GenericParam(..), _) | (_, TypeRef::GenericParam(..)) => false,
            (TypeRef::Array(a), TypeRef::Array(b)) => {
                !self.is_value_type(a) && !self.is_value_type(b) && self.is_assignable(a, b)
            }
            (TypeRef::Named(..), TypeRef::Named(..)) => {
                if self.is_interface(to) {
                    self.implements(from, to)
                } else {
                    self.is_subclass_of(from, to)
                }
            }
            _ => false,
        }
    }

    /// The method that a class dispatches an interface or virtual slot to
    pub fn find_implementation(&self, class: &TypeRef, slot: MethodId) -> Option<Arc<MethodDef>> {
        let def = self.def_of(class)?;
        def.vtable.get(&slot).and_then(|id| self.method(*id))
    }

    /// Virtual method of an ancestor with the same signature as `method`
    pub fn find_base_slot(&self, parent: &TypeRef, method: &MethodDef) -> Option<Arc<MethodDef>> {
        let wanted = MethodSignature::of(method);
        let mut current = Some(parent.clone());
        while let Some(ty) = current {
            let def = self.def_of(&ty)?;
            let found = self.methods_of(def.id).into_iter().find(|candidate| {
                candidate.is_virtual
                    && !candidate.is_static
                    && same_signature_parts(
                        &MethodSignature::closed(candidate, ty.type_args()),
                        &wanted,
                    )
            });
            if found.is_some() {
                return found;
            }
            current = self.parent_of(&ty);
        }
        None
    }

    fn build_vtable(
        &self,
        def: &TypeDef,
        own: &[MethodDef],
    ) -> ProxyResult<FxHashMap<MethodId, MethodId>> {
        if def.kind != TypeKind::Class {
            return Ok(FxHashMap::default());
        }

        let mut vtable = def
            .parent
            .as_ref()
            .and_then(|p| self.def_of(p))
            .map(|p| p.vtable.clone())
            .unwrap_or_default();

        for (slot, implementation) in &def.overrides {
            let slot_on_interface = self
                .method(*slot)
                .and_then(|m| self.get(m.declaring_type))
                .map(|t| t.is_interface())
                .unwrap_or(false);
            if slot_on_interface {
                vtable.insert(*slot, *implementation);
                continue;
            }
            // Virtual override: every slot that dispatched to the old
            // implementation now dispatches to the new one.
            let previous = vtable.get(slot).copied().unwrap_or(*slot);
            for target in vtable.values_mut() {
                if *target == previous {
                    *target = *implementation;
                }
            }
            vtable.insert(*slot, *implementation);
        }

        let mut interfaces = Vec::new();
        for iface in &def.interfaces {
            if !interfaces.contains(iface) {
                interfaces.push(iface.clone());
            }
            for base in self.all_interfaces(iface) {
                if !interfaces.contains(&base) {
                    interfaces.push(base);
                }
            }
        }

        for iface in interfaces {
            let Some(iface_def) = self.def_of(&iface) else {
                return Err(ProxyError::UnknownType(iface.to_string()));
            };
            for slot in self.methods_of(iface_def.id) {
                if vtable.contains_key(&slot.id) {
                    continue;
                }
                let wanted = MethodSignature::closed(&slot, iface.type_args());
                match self.find_public_match(def.parent.clone(), own, &wanted) {
                    Some(found) => {
                        let resolved = vtable.get(&found).copied().unwrap_or(found);
                        vtable.insert(slot.id, resolved);
                    }
                    None if def.is_abstract => {}
                    None => {
                        return Err(ProxyError::InvalidDefinition {
                            type_name: def.name.clone(),
                            reason: format!(
                                "does not implement interface member {}.{}",
                                iface_def.name, slot.name
                            ),
                        })
                    }
                }
            }
        }

        Ok(vtable)
    }

    // Most derived public instance method with the wanted signature.
    fn find_public_match(
        &self,
        parent: Option<TypeRef>,
        own: &[MethodDef],
        wanted: &MethodSignature,
    ) -> Option<MethodId> {
        let accepts = |m: &MethodDef, type_args: &[TypeRef]| {
            !m.is_static
                && m.visibility == Visibility::Public
                && same_signature_parts(&MethodSignature::closed(m, type_args), wanted)
        };
        if let Some(found) = own.iter().find(|m| accepts(m, &[])) {
            return Some(found.id);
        }
        let mut current = parent;
        while let Some(ty) = current {
            let def = self.def_of(&ty)?;
            if let Some(found) = self
                .methods_of(def.id)
                .into_iter()
                .find(|m| accepts(m, ty.type_args()))
            {
                return Some(found.id);
            }
            current = self.parent_of(&ty);
        }
        None
    }
}

/// Whether `ty` names the `string` primitive
pub fn is_string(ty: &TypeRef) -> bool {
    matches!(ty, TypeRef::Primitive(Primitive::String))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MethodBody, MethodKind, ParameterDef};

    fn method(id: MethodId, owner: TypeId, name: &str, is_abstract: bool) -> MethodDef {
        MethodDef {
            id,
            declaring_type: owner,
            name: name.to_string(),
            kind: MethodKind::Method,
            visibility: Visibility::Public,
            is_static: false,
            is_virtual: true,
            is_abstract,
            is_final: false,
            parameters: vec![ParameterDef::new("x", TypeRef::i32())],
            return_type: TypeRef::Void,
            generic_params: Vec::new(),
            body: MethodBody::Abstract,
            attributes: Vec::new(),
        }
    }

    #[test]
    fn test_reserve_rejects_duplicate_names() {
        let mut table = TypeTable::new();
        table.reserve("Demo.Point").unwrap();
        assert!(table.reserve("Demo.Point").is_err());
        assert_eq!(table.unique_name("Demo.Point"), "Demo.Point_1");
        assert_eq!(table.unique_name("Demo.Circle"), "Demo.Circle");
    }

    #[test]
    fn test_release_frees_unbuilt_name() {
        let mut table = TypeTable::new();
        let id = table.reserve("Demo.Temp").unwrap();
        table.release(id);
        assert_eq!(table.unique_name("Demo.Temp"), "Demo.Temp");
    }

    #[test]
    fn test_implicit_interface_mapping() {
        let mut table = TypeTable::new();
        let iface_id = table.reserve("Demo.IWriter").unwrap();
        let class_id = table.reserve("Demo.Writer").unwrap();

        let slot = method(next_method_id(), iface_id, "Write", true);
        let slot_id = slot.id;
        let mut iface = TypeDef::new(iface_id, "Demo.IWriter", TypeKind::Interface);
        iface.methods.push(slot_id);
        table.register(iface, vec![slot]).unwrap();

        let implementation = method(next_method_id(), class_id, "Write", false);
        let impl_id = implementation.id;
        let mut class = TypeDef::new(class_id, "Demo.Writer", TypeKind::Class);
        class.interfaces.push(TypeRef::named(iface_id));
        class.methods.push(impl_id);
        let class = table.register(class, vec![implementation]).unwrap();

        assert_eq!(class.resolve_slot(slot_id), impl_id);
        assert!(table.implements(&TypeRef::named(class_id), &TypeRef::named(iface_id)));
        assert!(table.is_assignable(&TypeRef::named(class_id), &TypeRef::named(iface_id)));
    }

    #[test]
    fn test_missing_interface_member_is_an_error() {
        let mut table = TypeTable::new();
        let iface_id = table.reserve("Demo.IReader").unwrap();
        let class_id = table.reserve("Demo.Reader").unwrap();

        let slot = method(next_method_id(), iface_id, "Read", true);
        let mut iface = TypeDef::new(iface_id, "Demo.IReader", TypeKind::Interface);
        iface.methods.push(slot.id);
        table.register(iface, vec![slot]).unwrap();

        let mut class = TypeDef::new(class_id, "Demo.Reader", TypeKind::Class);
        class.interfaces.push(TypeRef::named(iface_id));
        let err = table.register(class, Vec::new()).unwrap_err();
        assert!(err.to_string().contains("Demo.IReader.Read"));
    }

    #[test]
    fn test_override_redirects_inherited_interface_slot() {
        let mut table = TypeTable::new();
        let iface_id = table.reserve("Demo.IRun").unwrap();
        let base_id = table.reserve("Demo.Base").unwrap();
        let derived_id = table.reserve("Demo.Derived").unwrap();

        let slot = method(next_method_id(), iface_id, "Run", true);
        let slot_id = slot.id;
        let mut iface = TypeDef::new(iface_id, "Demo.IRun", TypeKind::Interface);
        iface.methods.push(slot_id);
        table.register(iface, vec![slot]).unwrap();

        let base_run = method(next_method_id(), base_id, "Run", false);
        let base_run_id = base_run.id;
        let mut base = TypeDef::new(base_id, "Demo.Base", TypeKind::Class);
        base.interfaces.push(TypeRef::named(iface_id));
        base.methods.push(base_run_id);
        table.register(base, vec![base_run]).unwrap();

        let derived_run = method(next_method_id(), derived_id, "Run", false);
        let derived_run_id = derived_run.id;
        let mut derived = TypeDef::new(derived_id, "Demo.Derived", TypeKind::Class);
        derived.parent = Some(TypeRef::named(base_id));
        derived.methods.push(derived_run_id);
        derived.overrides.push((base_run_id, derived_run_id));
        let derived = table.register(derived, vec![derived_run]).unwrap();

        assert_eq!(derived.resolve_slot(base_run_id), derived_run_id);
        assert_eq!(derived.resolve_slot(slot_id), derived_run_id);
        assert!(table.is_subclass_of(&TypeRef::named(derived_id), &TypeRef::named(base_id)));
    }
}
