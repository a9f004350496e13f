//! Value-producing nodes

use crate::emit::ast::Reference;
use crate::emit::code_emitter::CodeEmitter;
use crate::emit::instruction::Instruction;
use crate::error::{EmitError, VmError};
use crate::types::{MethodHandle, TypeRef, TypeTable};
use crate::value::Value;

/// An expression
#[derive(Debug, Clone)]
pub enum Expression {
    /// `null`
    Null,
    /// Constant
    Literal(Value),
    /// Default value of a type
    Default(TypeRef),
    /// Read a reference
    Load(Reference),
    /// Pointer to a reference
    AddressOf(Reference),
    /// Type conversion
    Convert {
        /// Converted value
        value: Box<Expression>,
        /// Static type of `value`
        from: TypeRef,
        /// Requested type
        to: TypeRef,
    },
    /// Object construction
    NewInstance {
        /// Constructor
        ctor: MethodHandle,
        /// Type to construct
        ty: TypeRef,
        /// Constructor arguments
        args: Vec<Expression>,
    },
    /// Array construction from element expressions
    NewArray {
        /// Element type
        element: TypeRef,
        /// Elements
        items: Vec<Expression>,
    },
    /// Method call
    Invoke {
        /// Receiver (the current receiver when absent and the callee is an instance method)
        target: Option<Box<Expression>>,
        /// Callee
        method: MethodHandle,
        /// Generic method arguments
        generic_args: Vec<TypeRef>,
        /// Arguments
        args: Vec<Expression>,
        /// Dispatch through the receiver's vtable
        is_virtual: bool,
    },
    /// Method token
    MethodToken {
        /// Method
        method: MethodHandle,
        /// Generic method arguments
        generic_args: Vec<TypeRef>,
    },
    /// Type token
    TypeToken(TypeRef),
    /// `object[]` holding the values of the given references (value types boxed)
    ReferencesToObjectArray(Vec<Reference>),
    /// `value ?? fallback`
    NullCoalescing {
        /// Preferred value
        value: Box<Expression>,
        /// Used when `value` is null
        fallback: Box<Expression>,
    },
}

impl Expression {
    /// Non-virtual call on the current receiver
    pub fn call_self(method: MethodHandle, args: Vec<Expression>) -> Self {
        Expression::Invoke {
            target: None,
            method,
            generic_args: Vec::new(),
            args,
            is_virtual: false,
        }
    }

    /// Virtual call on `target`
    pub fn call_virtual(target: Expression, method: MethodHandle, args: Vec<Expression>) -> Self {
        Expression::Invoke {
            target: Some(Box::new(target)),
            method,
            generic_args: Vec::new(),
            args,
            is_virtual: true,
        }
    }

    /// Conversion between two static types
    pub fn convert(value: Expression, from: TypeRef, to: TypeRef) -> Self {
        Expression::Convert {
            value: Box::new(value),
            from,
            to,
        }
    }

    /// Whether evaluating the expression leaves a value on the stack
    pub fn pushes_value(&self) -> bool {
        match self {
            Expression::Invoke { method, .. } => !method.return_type.is_void(),
            _ => true,
        }
    }

    /// Compile the expression
    pub fn emit(&self, e: &mut CodeEmitter, types: &TypeTable) -> Result<(), EmitError> {
        match self {
            Expression::Null => e.emit(Instruction::LoadNull),
            Expression::Literal(v) => e.emit(Instruction::LoadConst(v.clone())),
            Expression::Default(ty) => e.emit(Instruction::LoadDefault(ty.clone())),
            Expression::Load(r) => r.load(e, types),
            Expression::AddressOf(r) => r.load_address(e, types),
            Expression::Convert { value, from, to } => {
                value.emit(e, types)?;
                emit_conversion(from, to, e, types)
            }
            Expression::NewInstance { ctor, ty, args } => {
                if args.len() != ctor.param_count {
                    return Err(EmitError::InvalidReference(format!(
                        "constructor of {} takes {} arguments, {} supplied",
                        ty,
                        ctor.param_count,
                        args.len()
                    )));
                }
                for arg in args {
                    arg.emit(e, types)?;
                }
                e.emit(Instruction::NewObject {
                    ctor: ctor.clone(),
                    ty: ty.clone(),
                })
            }
            Expression::NewArray { element, items } => {
                e.emit(Instruction::LoadConst(Value::I32(items.len() as i32)))?;
                e.emit(Instruction::NewArray(element.clone()))?;
                for (i, item) in items.iter().enumerate() {
                    e.emit(Instruction::Dup)?;
                    e.emit(Instruction::LoadConst(Value::I32(i as i32)))?;
                    item.emit(e, types)?;
                    e.emit(Instruction::StoreElement)?;
                }
                Ok(())
            }
            Expression::Invoke {
                target,
                method,
                generic_args,
                args,
                is_virtual,
            } => {
                if args.len() != method.param_count {
                    return Err(EmitError::InvalidReference(format!(
                        "method {} takes {} arguments, {} supplied",
                        method.name,
                        method.param_count,
                        args.len()
                    )));
                }
                if !method.is_static {
                    match target {
                        Some(target) => target.emit(e, types)?,
                        None => e.emit(Instruction::LoadThis)?,
                    }
                }
                for arg in args {
                    arg.emit(e, types)?;
                }
                let method = method.clone();
                let generic_args = generic_args.clone();
                if *is_virtual && !method.is_static {
                    e.emit(Instruction::CallVirtual {
                        method,
                        generic_args,
                    })
                } else {
                    e.emit(Instruction::Call {
                        method,
                        generic_args,
                    })
                }
            }
            Expression::MethodToken {
                method,
                generic_args,
            } => e.emit(Instruction::LoadToken {
                method: method.clone(),
                generic_args: generic_args.clone(),
            }),
            Expression::TypeToken(ty) => e.emit(Instruction::LoadType(ty.clone())),
            Expression::ReferencesToObjectArray(references) => {
                e.emit(Instruction::LoadConst(Value::I32(references.len() as i32)))?;
                e.emit(Instruction::NewArray(TypeRef::object()))?;
                for (i, reference) in references.iter().enumerate() {
                    e.emit(Instruction::Dup)?;
                    e.emit(Instruction::LoadConst(Value::I32(i as i32)))?;
                    reference.load(e, types)?;
                    let ty = reference.ty();
                    if ty.is_generic_param() || types.is_value_type(&ty) {
                        e.emit(Instruction::Box(ty))?;
                    }
                    e.emit(Instruction::StoreElement)?;
                }
                Ok(())
            }
            Expression::NullCoalescing { value, fallback } => {
                let end = e.define_label();
                value.emit(e, types)?;
                e.emit(Instruction::Dup)?;
                e.emit_jump(Instruction::BranchIfNotNull(0), end)?;
                e.emit(Instruction::Pop)?;
                fallback.emit(e, types)?;
                e.mark_label(end)
            }
        }
    }
}

/// Emit the conversion of the value on top of the stack from `from` to `to`.
///
/// Value to reference boxes, then casts when needed. Reference to value
/// unboxes through a pointer and an indirect load. Reference to reference
/// casts only towards generic parameters, constructed generics, interfaces
/// and strict subtypes.
pub fn emit_conversion(
    from: &TypeRef,
    to: &TypeRef,
    e: &mut CodeEmitter,
    types: &TypeTable,
) -> Result<(), EmitError> {
    if from == to {
        return Ok(());
    }
    if from.is_by_ref() || to.is_by_ref() {
        return Err(EmitError::InvalidReference(format!(
            "cannot convert between by-ref types {} and {}",
            from, to
        )));
    }
    if to.is_void() {
        return Err(EmitError::InvalidReference("cannot convert to void".to_string()));
    }

    let from_value = types.is_value_type(from);
    let to_value = types.is_value_type(to);

    if to_value {
        if from_value {
            return match to {
                TypeRef::Primitive(p) => e.emit(Instruction::Convert(*p)),
                _ => e.emit(Instruction::Throw(VmError::InvalidCast(format!(
                    "cannot convert value type {} to {}",
                    from, to
                )))),
            };
        }
        if !matches!(to, TypeRef::Primitive(_)) || from.is_generic_param() {
            return e.emit(Instruction::UnboxAny(to.clone()));
        }
        e.emit(Instruction::Unbox(to.clone()))?;
        return e.emit(Instruction::LoadIndirect);
    }

    if from_value {
        e.emit(Instruction::Box(from.clone()))?;
        return emit_cast_if_needed(&TypeRef::object(), to, e, types);
    }
    emit_cast_if_needed(from, to, e, types)
}

fn emit_cast_if_needed(
    from: &TypeRef,
    to: &TypeRef,
    e: &mut CodeEmitter,
    types: &TypeTable,
) -> Result<(), EmitError> {
    if from == to {
        return Ok(());
    }
    if to.is_generic_param() {
        return e.emit(Instruction::UnboxAny(to.clone()));
    }
    if from.is_generic_param() {
        e.emit(Instruction::Box(from.clone()))?;
        if *to != TypeRef::object() {
            e.emit(Instruction::CastClass(to.clone()))?;
        }
        return Ok(());
    }
    let generic_target = !to.type_args().is_empty();
    let needs_cast = generic_target
        || types.is_interface(to)
        || matches!(to, TypeRef::Array(_) | TypeRef::Primitive(_))
        || types.is_subclass_of(to, from);
    if needs_cast {
        e.emit(Instruction::CastClass(to.clone()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Primitive, TypeBuilder, TypeId};

    fn compile(expression: Expression) -> Vec<Instruction> {
        let types = TypeTable::new();
        let mut e = CodeEmitter::new("Test", true);
        expression.emit(&mut e, &types).unwrap();
        e.emit(Instruction::Return).unwrap();
        e.build().unwrap().instructions
    }

    #[test]
    fn test_object_to_primitive_unboxes_through_pointer() {
        let code = compile(Expression::convert(
            Expression::Null,
            TypeRef::object(),
            TypeRef::i32(),
        ));
        assert!(matches!(code[1], Instruction::Unbox(TypeRef::Primitive(Primitive::I32))));
        assert!(matches!(code[2], Instruction::LoadIndirect));
    }

    #[test]
    fn test_object_to_enum_uses_unbox_any() {
        let mut types = TypeTable::new();
        let color = TypeBuilder::enumeration("Demo.Color")
            .build(&mut types)
            .unwrap();
        let mut e = CodeEmitter::new("Test", true);
        Expression::convert(Expression::Null, TypeRef::object(), TypeRef::named(color.id))
            .emit(&mut e, &types)
            .unwrap();
        e.emit(Instruction::Return).unwrap();
        let code = e.build().unwrap().instructions;
        assert!(matches!(&code[1], Instruction::UnboxAny(ty) if *ty == TypeRef::named(color.id)));
        assert!(matches!(code[2], Instruction::Return));
    }

    #[test]
    fn test_primitive_to_object_boxes() {
        let code = compile(Expression::convert(
            Expression::Literal(Value::I32(3)),
            TypeRef::i32(),
            TypeRef::object(),
        ));
        assert!(matches!(code[1], Instruction::Box(_)));
        assert!(matches!(code[2], Instruction::Return));
    }

    #[test]
    fn test_generic_parameter_uses_unbox_any() {
        let code = compile(Expression::convert(
            Expression::Null,
            TypeRef::object(),
            TypeRef::method_param(0),
        ));
        assert!(matches!(code[1], Instruction::UnboxAny(TypeRef::GenericParam(..))));
    }

    #[test]
    fn test_reference_to_unrelated_class_does_not_cast() {
        let code = compile(Expression::convert(
            Expression::Null,
            TypeRef::named(TypeId(40)),
            TypeRef::object(),
        ));
        assert_eq!(code.len(), 2);
    }

    #[test]
    fn test_null_coalescing_balances_stack() {
        let types = TypeTable::new();
        let mut e = CodeEmitter::new("Test", true);
        Expression::NullCoalescing {
            value: Box::new(Expression::Null),
            fallback: Box::new(Expression::Literal(Value::I32(1))),
        }
        .emit(&mut e, &types)
        .unwrap();
        assert_eq!(e.depth(), 1);
    }

    #[test]
    fn test_references_to_object_array() {
        let code = compile(Expression::ReferencesToObjectArray(vec![
            Reference::arg(0, TypeRef::i32()),
            Reference::arg(1, TypeRef::string()),
        ]));
        // length, newarr, then dup/index/load/box/stelem for the i32 and
        // dup/index/load/stelem for the string
        assert_eq!(code.len(), 2 + 5 + 4 + 1);
    }
}
