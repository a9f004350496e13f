//! Virtual machine
//!
//! Executes method bodies registered in a shared [`TypeTable`]. The table
//! lock is only taken for short lookups and is never held across a call,
//! so generated code may request new proxy types while it runs.

mod frame;
mod interpreter;

use std::cell::Cell;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::error::{VmError, VmResult};
use crate::types::{
    MethodBody, MethodDef, MethodId, NativeCall, PropertyDef, TypeDef, TypeId, TypeRef, TypeTable,
};
use crate::value::{Object, Value};

use frame::Frame;

/// Type table shared between the generator and the VM
pub type SharedTypes = Arc<RwLock<TypeTable>>;

/// Nested managed calls allowed per thread before `StackOverflow`
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

thread_local! {
    static CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Tracks one level of managed call nesting on the current thread
struct DepthGuard;

impl DepthGuard {
    fn enter(max_depth: usize) -> VmResult<Self> {
        CALL_DEPTH.with(|depth| {
            if depth.get() >= max_depth {
                return Err(VmError::StackOverflow);
            }
            depth.set(depth.get() + 1);
            Ok(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        CALL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Method executor over a shared type table
#[derive(Debug, Clone)]
pub struct Vm {
    types: SharedTypes,
    max_depth: usize,
}

impl Vm {
    /// Create a VM over `types`
    pub fn new(types: SharedTypes) -> Self {
        Self {
            types,
            max_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    /// Set the call depth limit
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// The shared type table
    pub fn types(&self) -> &SharedTypes {
        &self.types
    }

    /// Registered type by id
    pub fn type_def(&self, id: TypeId) -> VmResult<Arc<TypeDef>> {
        self.types
            .read()
            .get(id)
            .ok_or_else(|| VmError::MissingMember(format!("type #{}", id.0)))
    }

    /// Registered method by id
    pub fn method_def(&self, id: MethodId) -> VmResult<Arc<MethodDef>> {
        self.types
            .read()
            .method(id)
            .ok_or_else(|| VmError::MissingMember(format!("method #{}", id.0)))
    }

    /// Allocate an instance with every field at its default value.
    ///
    /// No constructor runs.
    pub fn allocate(&self, ty: &TypeRef) -> VmResult<Value> {
        let table = self.types.read();
        let def = table
            .def_of(ty)
            .ok_or_else(|| VmError::MissingMember(table.type_name(ty)))?;
        if !def.is_class() || def.is_abstract {
            return Err(VmError::InvalidOperation(format!(
                "cannot create an instance of {}",
                def.name
            )));
        }

        let mut fields = vec![Value::Null; def.instance_field_count];
        let mut current = Some(ty.clone());
        while let Some(level) = current {
            let Some(level_def) = table.def_of(&level) else {
                break;
            };
            for field in level_def.fields.iter().filter(|f| !f.is_static) {
                if let Some(slot) = fields.get_mut(field.slot) {
                    *slot = table.default_value(&field.ty.substitute(level.type_args(), &[]));
                }
            }
            current = table.parent_of(&level);
        }
        Ok(Value::Object(Object::new(def, ty.type_args().to_vec(), fields)))
    }

    /// Constructor of `ty` accepting `args`
    pub fn find_constructor(&self, ty: &TypeRef, args: &[Value]) -> Option<Arc<MethodDef>> {
        let constructors = {
            let table = self.types.read();
            table.constructors_of(ty.type_id()?)
        };
        constructors.into_iter().find(|ctor| {
            ctor.parameters.len() == args.len()
                && ctor.parameters.iter().zip(args).all(|(param, arg)| {
                    let param_ty = param.ty.substitute(ty.type_args(), &[]);
                    arg.is_null() || self.is_instance_of(arg, &param_ty)
                })
        })
    }

    /// Allocate an instance of `ty` and run the constructor matching `args`
    pub fn construct(&self, ty: &TypeRef, args: Vec<Value>) -> VmResult<Value> {
        let ctor = self.find_constructor(ty, &args).ok_or_else(|| {
            VmError::MissingMember(format!(
                "constructor of {} taking {} arguments",
                self.types.read().type_name(ty),
                args.len()
            ))
        })?;
        let object = self.allocate(ty)?;
        self.invoke_method(ctor, object.clone(), args, Vec::new())?;
        Ok(object)
    }

    /// Non-virtual call
    pub fn call_method(
        &self,
        method: MethodId,
        this: &Value,
        args: Vec<Value>,
        method_args: Vec<TypeRef>,
    ) -> VmResult<Value> {
        let method = self.method_def(method)?;
        self.invoke_method(method, this.clone(), args, method_args)
    }

    /// Call dispatched through the receiver's vtable
    pub fn call_virtual(
        &self,
        slot: MethodId,
        this: &Value,
        args: Vec<Value>,
        method_args: Vec<TypeRef>,
    ) -> VmResult<Value> {
        let slot_def = self.method_def(slot)?;
        let target = match this {
            Value::Null if !slot_def.is_static => {
                return Err(VmError::NullReference(format!(
                    "virtual call to {} on null",
                    slot_def.name
                )))
            }
            Value::Object(object) if slot_def.is_virtual => {
                let resolved = object.ty.resolve_slot(slot);
                if resolved == slot {
                    slot_def
                } else {
                    self.method_def(resolved)?
                }
            }
            _ => slot_def,
        };
        self.invoke_method(target, this.clone(), args, method_args)
    }

    /// Run a constructor on an already allocated instance
    pub fn call_constructor(&self, ctor: MethodId, this: &Value, args: Vec<Value>) -> VmResult<Value> {
        self.call_method(ctor, this, args, Vec::new())
    }

    /// Call a method by name on the receiver's runtime type
    pub fn invoke(&self, this: &Value, name: &str, args: Vec<Value>) -> VmResult<Value> {
        self.invoke_generic(this, name, Vec::new(), args)
    }

    /// Call a generic method by name on the receiver's runtime type
    pub fn invoke_generic(
        &self,
        this: &Value,
        name: &str,
        method_args: Vec<TypeRef>,
        args: Vec<Value>,
    ) -> VmResult<Value> {
        let object = this.expect_object(name)?;
        let method = self.resolve_by_name(&object.type_ref(), name, args.len())?;
        let method = if method.is_virtual {
            let resolved = object.ty.resolve_slot(method.id);
            if resolved == method.id {
                method
            } else {
                self.method_def(resolved)?
            }
        } else {
            method
        };
        self.invoke_method(method, this.clone(), args, method_args)
    }

    fn resolve_by_name(&self, ty: &TypeRef, name: &str, arg_count: usize) -> VmResult<Arc<MethodDef>> {
        let table = self.types.read();
        let matches = |m: &Arc<MethodDef>| m.name == name && m.parameters.len() == arg_count;

        let mut current = Some(ty.clone());
        while let Some(level) = current {
            let Some(def) = table.def_of(&level) else {
                break;
            };
            if let Some(found) = table.methods_of(def.id).into_iter().find(matches) {
                return Ok(found);
            }
            current = table.parent_of(&level);
        }
        for iface in table.all_interfaces(ty) {
            if let Some(def) = table.def_of(&iface) {
                if let Some(found) = table.methods_of(def.id).into_iter().find(matches) {
                    return Ok(found);
                }
            }
        }
        Err(VmError::MissingMember(format!(
            "{}.{} taking {} arguments",
            table.type_name(ty),
            name,
            arg_count
        )))
    }

    fn find_property(&self, ty: &TypeRef, name: &str) -> VmResult<PropertyDef> {
        let table = self.types.read();
        let mut current = Some(ty.clone());
        while let Some(level) = current {
            let Some(def) = table.def_of(&level) else {
                break;
            };
            if let Some(found) = def.properties.iter().find(|p| p.name == name) {
                return Ok(found.clone());
            }
            current = table.parent_of(&level);
        }
        for iface in table.all_interfaces(ty) {
            if let Some(found) = table
                .def_of(&iface)
                .and_then(|d| d.properties.iter().find(|p| p.name == name).cloned())
            {
                return Ok(found);
            }
        }
        Err(VmError::MissingMember(format!(
            "property {}.{}",
            table.type_name(ty),
            name
        )))
    }

    /// Read a property through its getter
    pub fn get_property(&self, this: &Value, name: &str) -> VmResult<Value> {
        let object = this.expect_object(name)?;
        let property = self.find_property(&object.type_ref(), name)?;
        let getter = property
            .getter
            .ok_or_else(|| VmError::MissingMember(format!("getter of {}", name)))?;
        self.call_virtual(getter, this, Vec::new(), Vec::new())
    }

    /// Write a property through its setter
    pub fn set_property(&self, this: &Value, name: &str, value: Value) -> VmResult<()> {
        let object = this.expect_object(name)?;
        let property = self.find_property(&object.type_ref(), name)?;
        let setter = property
            .setter
            .ok_or_else(|| VmError::MissingMember(format!("setter of {}", name)))?;
        self.call_virtual(setter, this, vec![value], Vec::new())?;
        Ok(())
    }

    /// Read an instance field by name
    pub fn field_value(&self, this: &Value, name: &str) -> VmResult<Value> {
        let object = this.expect_object(name)?;
        let table = self.types.read();
        let mut current = Some(object.type_ref());
        while let Some(level) = current {
            let Some(def) = table.def_of(&level) else {
                break;
            };
            if let Some(field) = def.fields.iter().find(|f| f.name == name && !f.is_static) {
                return Ok(object.field(field.slot));
            }
            current = table.parent_of(&level);
        }
        Err(VmError::MissingMember(format!("field {}", name)))
    }

    /// Whether `value` is a non-null instance of `ty`
    pub fn is_instance_of(&self, value: &Value, ty: &TypeRef) -> bool {
        match (value, ty) {
            (Value::Null, _) => false,
            // Open parameters cannot be checked
            (_, TypeRef::GenericParam(..)) => true,
            (_, TypeRef::Named(id, _)) if *id == TypeId::OBJECT => true,
            _ => match value.runtime_type() {
                Some(runtime) => self.types.read().is_assignable(&runtime, ty),
                None => false,
            },
        }
    }

    /// Run the static initializer of a registered type, if it has one
    pub fn run_type_initializer(&self, id: TypeId) -> VmResult<()> {
        let def = self.type_def(id)?;
        if let Some(cctor) = def.type_initializer {
            trace!("Running type initializer of {}", def.name);
            self.call_method(cctor, &Value::Null, Vec::new(), Vec::new())?;
        }
        Ok(())
    }

    /// Execute a resolved method
    pub(crate) fn invoke_method(
        &self,
        method: Arc<MethodDef>,
        this: Value,
        args: Vec<Value>,
        method_args: Vec<TypeRef>,
    ) -> VmResult<Value> {
        if args.len() != method.parameters.len() {
            return Err(VmError::InvalidArgument(format!(
                "{} takes {} arguments, {} supplied",
                method.name,
                method.parameters.len(),
                args.len()
            )));
        }
        if !method.is_static && this.is_null() {
            return Err(VmError::NullReference(format!(
                "instance method {} called without a receiver",
                method.name
            )));
        }
        let _guard = DepthGuard::enter(self.max_depth)?;
        let type_args = if method.is_static {
            Vec::new()
        } else {
            self.receiver_type_args(&this, method.declaring_type)
        };

        match &method.body {
            MethodBody::Abstract => Err(VmError::AbstractMethod(method.name.clone())),
            MethodBody::Native(native) => native(
                self,
                NativeCall {
                    this,
                    args,
                    type_args,
                    method_args,
                },
            ),
            MethodBody::Compiled(code) => {
                let locals = {
                    let table = self.types.read();
                    code.locals
                        .iter()
                        .map(|ty| table.default_value(&ty.substitute(&type_args, &method_args)))
                        .collect()
                };
                let frame = Frame::new(
                    code.clone(),
                    this,
                    args,
                    locals,
                    type_args,
                    method_args,
                );
                self.run_frame(frame)
            }
        }
    }

    /// Type arguments of the receiver as seen from `declaring`
    fn receiver_type_args(&self, this: &Value, declaring: TypeId) -> Vec<TypeRef> {
        let Value::Object(object) = this else {
            return Vec::new();
        };
        if object.ty.id == declaring {
            return object.type_args.clone();
        }
        let table = self.types.read();
        let mut current = table.parent_of(&object.type_ref());
        while let Some(level) = current {
            if level.type_id() == Some(declaring) {
                return level.type_args().to_vec();
            }
            current = table.parent_of(&level);
        }
        Vec::new()
    }

    pub(crate) fn unbox_any(&self, value: Value, ty: &TypeRef) -> VmResult<Value> {
        if value.is_null() {
            if self.types.read().is_value_type(ty) {
                return Err(VmError::NullReference(format!(
                    "cannot unbox null to {}",
                    self.types.read().type_name(ty)
                )));
            }
            return Ok(value);
        }
        if !self.is_instance_of(&value, ty) {
            return Err(self.cast_error(&value, ty));
        }
        Ok(value)
    }

    pub(crate) fn cast_error(&self, value: &Value, ty: &TypeRef) -> VmError {
        let table = self.types.read();
        let from = value
            .runtime_type()
            .map(|t| table.type_name(&t))
            .unwrap_or_else(|| "null".to_string());
        VmError::InvalidCast(format!(
            "unable to cast {} to {}",
            from,
            table.type_name(ty)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::ast::{Expression, Reference, Statement};
    use crate::emit::ClassEmitter;
    use crate::types::{MethodBuilder, ParameterDef, TypeBuilder};

    fn vm() -> Vm {
        let mut table = TypeTable::new();
        TypeBuilder::class("System.Object").root().build(&mut table).unwrap();
        Vm::new(Arc::new(RwLock::new(table)))
    }

    #[test]
    fn test_finally_runs_when_body_throws() {
        let vm = vm();
        let def = {
            let mut table = vm.types().write();
            let mut class =
                ClassEmitter::new(&mut table, "Demo.Guarded", TypeRef::object(), Vec::new()).unwrap();
            let flag = class.create_static_field("cleaned", TypeRef::bool());
            let mut method = class.create_method("Run", Vec::new(), TypeRef::Void);
            method.add_statement(Statement::TryFinally {
                body: vec![Statement::Throw(VmError::User("boom".to_string()))],
                finally: vec![Statement::assign(
                    Reference::field(flag),
                    Expression::Literal(Value::Bool(true)),
                )],
            });
            class.add_method(method);
            class.build(&mut table).unwrap()
        };

        let object = vm.allocate(&TypeRef::named(def.id)).unwrap();
        let result = vm.invoke(&object, "Run", Vec::new());
        assert_eq!(result, Err(VmError::User("boom".to_string())));
        assert_eq!(def.static_value(0), Value::Bool(true));
    }

    #[test]
    fn test_finally_runs_on_normal_exit() {
        let vm = vm();
        let def = {
            let mut table = vm.types().write();
            let mut class =
                ClassEmitter::new(&mut table, "Demo.Counter", TypeRef::object(), Vec::new()).unwrap();
            let count = class.create_field("count", TypeRef::i32());
            let mut method =
                class.create_method("Run", vec![ParameterDef::new("n", TypeRef::i32())], TypeRef::i32());
            method.add_statement(Statement::TryFinally {
                body: vec![Statement::assign(
                    Reference::field(count.clone()),
                    Reference::arg(0, TypeRef::i32()).to_expression(),
                )],
                finally: vec![Statement::assign(
                    Reference::arg(0, TypeRef::i32()),
                    Expression::Literal(Value::I32(-1)),
                )],
            });
            method.add_statement(Statement::Return(Some(
                Reference::arg(0, TypeRef::i32()).to_expression(),
            )));
            class.add_method(method);
            class.build(&mut table).unwrap()
        };

        let object = vm.allocate(&TypeRef::named(def.id)).unwrap();
        assert_eq!(vm.invoke(&object, "Run", vec![Value::I32(5)]), Ok(Value::I32(-1)));
        assert_eq!(vm.field_value(&object, "count"), Ok(Value::I32(5)));
    }

    #[test]
    fn test_runaway_recursion_overflows() {
        let vm = vm();
        let def = {
            let mut table = vm.types().write();
            TypeBuilder::class("Demo.Loop")
                .method(MethodBuilder::new("Spin").native(|vm, call| {
                    vm.invoke(&call.this, "Spin", Vec::new())
                }))
                .build(&mut table)
                .unwrap()
        };
        let object = vm.construct(&TypeRef::named(def.id), Vec::new()).unwrap();
        assert_eq!(vm.invoke(&object, "Spin", Vec::new()), Err(VmError::StackOverflow));
    }

    #[test]
    fn test_virtual_dispatch_uses_override() {
        let vm = vm();
        let derived = {
            let mut table = vm.types().write();
            let base = TypeBuilder::class("Demo.Animal")
                .method(
                    MethodBuilder::new("Speak")
                        .returns(TypeRef::string())
                        .as_virtual()
                        .native(|_, _| Ok(Value::from("..."))),
                )
                .build(&mut table)
                .unwrap();
            TypeBuilder::class("Demo.Dog")
                .extends(TypeRef::named(base.id))
                .method(
                    MethodBuilder::new("Speak")
                        .returns(TypeRef::string())
                        .as_override()
                        .native(|_, _| Ok(Value::from("woof"))),
                )
                .build(&mut table)
                .unwrap()
        };
        let dog = vm.construct(&TypeRef::named(derived.id), Vec::new()).unwrap();
        let slot = vm
            .types()
            .read()
            .find_method(TypeId(1), "Speak")
            .unwrap();
        assert_eq!(
            vm.call_virtual(slot.id, &dog, Vec::new(), Vec::new()),
            Ok(Value::from("woof"))
        );
    }

    #[test]
    fn test_instance_checks() {
        let vm = vm();
        assert!(vm.is_instance_of(&Value::I32(1), &TypeRef::i32()));
        assert!(vm.is_instance_of(&Value::from("x"), &TypeRef::object()));
        assert!(!vm.is_instance_of(&Value::Null, &TypeRef::object()));
        assert!(!vm.is_instance_of(&Value::from("x"), &TypeRef::i32()));
    }
}
