//! Assignable storage locations

use crate::emit::ast::Expression;
use crate::emit::code_emitter::CodeEmitter;
use crate::emit::instruction::Instruction;
use crate::error::EmitError;
use crate::types::{FieldRef, TypeRef, TypeTable};
use crate::value::Value;

/// A storage location that can be loaded, addressed and stored
#[derive(Debug, Clone)]
pub enum Reference {
    /// The receiver
    This,
    /// A declared parameter (position excludes the receiver)
    Argument {
        /// Parameter position
        position: u16,
        /// Declared type
        ty: TypeRef,
    },
    /// A local declared on the emitter
    Local {
        /// Local index
        index: u16,
        /// Declared type
        ty: TypeRef,
    },
    /// A static field, or an instance field of `owner` (the receiver when absent)
    Field {
        /// Field handle
        field: FieldRef,
        /// Object holding the field
        owner: Option<Box<Reference>>,
    },
    /// An element of an array held by another reference
    ArrayElement {
        /// Reference holding the array
        array: Box<Reference>,
        /// Element index
        index: usize,
        /// Element type
        ty: TypeRef,
    },
    /// The location addressed by a pointer held in another reference
    Indirect(Box<Reference>),
    /// Another reference viewed as a different type
    AsType {
        /// Underlying reference
        inner: Box<Reference>,
        /// Type to view it as
        ty: TypeRef,
    },
}

impl Reference {
    /// Parameter reference
    pub fn arg(position: u16, ty: TypeRef) -> Self {
        Reference::Argument { position, ty }
    }

    /// Field of the receiver, or a static field
    pub fn field(field: FieldRef) -> Self {
        Reference::Field { field, owner: None }
    }

    /// Field of the object held by `owner`
    pub fn field_of(owner: Reference, field: FieldRef) -> Self {
        Reference::Field {
            field,
            owner: Some(Box::new(owner)),
        }
    }

    /// Dereference by-ref references, leave others untouched
    pub fn wrap_if_by_ref(self) -> Self {
        if self.ty().is_by_ref() {
            Reference::Indirect(Box::new(self))
        } else {
            self
        }
    }

    /// Static type of the value stored at this location
    pub fn ty(&self) -> TypeRef {
        match self {
            Reference::This => TypeRef::object(),
            Reference::Argument { ty, .. } | Reference::Local { ty, .. } => ty.clone(),
            Reference::Field { field, .. } => field.ty.clone(),
            Reference::ArrayElement { ty, .. } => ty.clone(),
            Reference::Indirect(inner) => inner.ty().strip_by_ref().clone(),
            Reference::AsType { ty, .. } => ty.clone(),
        }
    }

    /// Expression reading this location
    pub fn to_expression(&self) -> Expression {
        Expression::Load(self.clone())
    }

    fn emit_owner(
        owner: &Option<Box<Reference>>,
        e: &mut CodeEmitter,
        types: &TypeTable,
    ) -> Result<(), EmitError> {
        match owner {
            Some(owner) => owner.load(e, types),
            None => e.emit(Instruction::LoadThis),
        }
    }

    /// Push the stored value
    pub fn load(&self, e: &mut CodeEmitter, types: &TypeTable) -> Result<(), EmitError> {
        match self {
            Reference::This => e.emit(Instruction::LoadThis),
            Reference::Argument { position, .. } => e.emit(Instruction::LoadArg(*position)),
            Reference::Local { index, .. } => e.emit(Instruction::LoadLocal(*index)),
            Reference::Field { field, owner } => {
                if field.is_static {
                    e.emit(Instruction::LoadStatic(field.clone()))
                } else {
                    Self::emit_owner(owner, e, types)?;
                    e.emit(Instruction::LoadField(field.clone()))
                }
            }
            Reference::ArrayElement { array, index, .. } => {
                array.load(e, types)?;
                e.emit(Instruction::LoadConst(Value::I32(*index as i32)))?;
                e.emit(Instruction::LoadElement)
            }
            Reference::Indirect(inner) => {
                inner.load(e, types)?;
                e.emit(Instruction::LoadIndirect)
            }
            Reference::AsType { inner, ty } => {
                inner.load(e, types)?;
                e.emit(Instruction::CastClass(ty.clone()))
            }
        }
    }

    /// Push a pointer to the location
    pub fn load_address(&self, e: &mut CodeEmitter, types: &TypeTable) -> Result<(), EmitError> {
        match self {
            Reference::This => Err(EmitError::InvalidReference(
                "cannot take the address of the receiver".to_string(),
            )),
            Reference::Argument { position, .. } => e.emit(Instruction::LoadArgAddress(*position)),
            Reference::Local { index, .. } => e.emit(Instruction::LoadLocalAddress(*index)),
            Reference::Field { field, owner } => {
                if field.is_static {
                    e.emit(Instruction::LoadStaticAddress(field.clone()))
                } else {
                    Self::emit_owner(owner, e, types)?;
                    e.emit(Instruction::LoadFieldAddress(field.clone()))
                }
            }
            Reference::ArrayElement { array, index, .. } => {
                array.load(e, types)?;
                e.emit(Instruction::LoadConst(Value::I32(*index as i32)))?;
                e.emit(Instruction::LoadElementAddress)
            }
            // The pointer itself is the address
            Reference::Indirect(inner) => inner.load(e, types),
            Reference::AsType { .. } => Err(EmitError::InvalidReference(
                "cannot take the address of a type view".to_string(),
            )),
        }
    }

    /// Evaluate `value` and store it at the location
    pub fn store(
        &self,
        value: &Expression,
        e: &mut CodeEmitter,
        types: &TypeTable,
    ) -> Result<(), EmitError> {
        match self {
            Reference::This => Err(EmitError::InvalidReference(
                "cannot assign to the receiver".to_string(),
            )),
            Reference::Argument { position, .. } => {
                value.emit(e, types)?;
                e.emit(Instruction::StoreArg(*position))
            }
            Reference::Local { index, .. } => {
                value.emit(e, types)?;
                e.emit(Instruction::StoreLocal(*index))
            }
            Reference::Field { field, owner } => {
                if field.is_static {
                    value.emit(e, types)?;
                    e.emit(Instruction::StoreStatic(field.clone()))
                } else {
                    Self::emit_owner(owner, e, types)?;
                    value.emit(e, types)?;
                    e.emit(Instruction::StoreField(field.clone()))
                }
            }
            Reference::ArrayElement { array, index, .. } => {
                array.load(e, types)?;
                e.emit(Instruction::LoadConst(Value::I32(*index as i32)))?;
                value.emit(e, types)?;
                e.emit(Instruction::StoreElement)
            }
            Reference::Indirect(inner) => {
                inner.load(e, types)?;
                value.emit(e, types)?;
                e.emit(Instruction::StoreIndirect)
            }
            Reference::AsType { .. } => Err(EmitError::InvalidReference(
                "cannot assign through a type view".to_string(),
            )),
        }
    }
}
