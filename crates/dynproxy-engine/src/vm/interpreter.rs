//! Instruction interpreter
//!
//! Executes one compiled method activation. Calls recurse through
//! [`Vm::invoke_method`], so a Rust stack frame backs every managed frame.

use crate::emit::Instruction;
use crate::error::{VmError, VmResult};
use crate::types::Primitive;
use crate::value::{Array, ArrayRef, MethodToken, Pointer, Value};
use crate::vm::frame::{FinallyState, Frame};
use crate::vm::Vm;

/// Control flow after one instruction
enum Step {
    /// Fall through to the next instruction
    Continue,
    /// Continue at an absolute position
    Jump(usize),
    /// Leave the method
    Return(Value),
}

impl Vm {
    pub(crate) fn run_frame(&self, mut frame: Frame) -> VmResult<Value> {
        let code = frame.code.clone();
        loop {
            // Running off the end is an implicit `return`
            let Some(instruction) = code.instructions.get(frame.pc) else {
                return Ok(Value::Null);
            };
            match self.step(&mut frame, instruction) {
                Ok(Step::Continue) => frame.pc += 1,
                Ok(Step::Jump(target)) => frame.pc = target,
                Ok(Step::Return(value)) => return Ok(value),
                Err(error) => Self::raise(&mut frame, error)?,
            }
        }
    }

    /// Route an error to the innermost finally handler protecting the
    /// current position, or out of the frame when there is none.
    fn raise(frame: &mut Frame, error: VmError) -> VmResult<()> {
        let pc = frame.pc;
        // An error inside a running handler replaces whatever that handler
        // was going to do on completion.
        while let Some((region, _)) = frame.finally_states.last() {
            if frame.code.regions[*region].in_handler(pc) {
                frame.finally_states.pop();
            } else {
                break;
            }
        }
        match frame.code.regions.iter().position(|r| r.protects(pc)) {
            Some(index) => {
                frame.finally_states.push((index, FinallyState::Error(error)));
                frame.stack.clear();
                frame.pc = frame.code.regions[index].handler_start;
                Ok(())
            }
            None => Err(error),
        }
    }

    fn step(&self, frame: &mut Frame, instruction: &Instruction) -> VmResult<Step> {
        match instruction {
            // =========================================================
            // Stack
            // =========================================================
            Instruction::Nop => {}
            Instruction::Pop => {
                frame.pop()?;
            }
            Instruction::Dup => {
                let top = frame.stack.last().cloned().ok_or(VmError::StackUnderflow)?;
                frame.push(top);
            }
            Instruction::LoadNull => frame.push(Value::Null),
            Instruction::LoadConst(value) => frame.push(value.clone()),
            Instruction::LoadDefault(ty) => {
                let ty = frame.close(ty);
                let value = self.types.read().default_value(&ty);
                frame.push(value);
            }
            Instruction::LoadThis => frame.push(frame.this.clone()),

            // =========================================================
            // Arguments and locals
            // =========================================================
            Instruction::LoadArg(i) => {
                let value = frame.arg(*i)?;
                frame.push(value);
            }
            Instruction::LoadArgAddress(i) => {
                let value = frame.arg_address(*i)?;
                frame.push(value);
            }
            Instruction::StoreArg(i) => {
                let value = frame.pop()?;
                frame.set_arg(*i, value)?;
            }
            Instruction::LoadLocal(i) => {
                let value = frame.local(*i)?;
                frame.push(value);
            }
            Instruction::LoadLocalAddress(i) => {
                let value = frame.local_address(*i)?;
                frame.push(value);
            }
            Instruction::StoreLocal(i) => {
                let value = frame.pop()?;
                frame.set_local(*i, value)?;
            }

            // =========================================================
            // Fields
            // =========================================================
            Instruction::LoadField(field) => {
                let owner = frame.pop()?;
                let object = owner.expect_object(&field.name)?;
                frame.push(object.field(field.slot));
            }
            Instruction::LoadFieldAddress(field) => {
                let owner = frame.pop()?;
                let object = owner.expect_object(&field.name)?.clone();
                frame.push(Value::Ref(Pointer::Field(object, field.slot)));
            }
            Instruction::StoreField(field) => {
                let value = frame.pop()?;
                let owner = frame.pop()?;
                owner.expect_object(&field.name)?.set_field(field.slot, value);
            }
            Instruction::LoadStatic(field) => {
                let def = self.type_def(field.owner)?;
                frame.push(def.static_value(field.slot));
            }
            Instruction::LoadStaticAddress(field) => {
                let def = self.type_def(field.owner)?;
                frame.push(Value::Ref(Pointer::Static(def, field.slot)));
            }
            Instruction::StoreStatic(field) => {
                let value = frame.pop()?;
                self.type_def(field.owner)?.set_static_value(field.slot, value);
            }

            // =========================================================
            // Arrays and pointers
            // =========================================================
            Instruction::LoadElement => {
                let index = Self::pop_index(frame)?;
                let array = frame.pop()?;
                let value = Self::expect_array(&array)?.get(index)?;
                frame.push(value);
            }
            Instruction::LoadElementAddress => {
                let index = Self::pop_index(frame)?;
                let array = frame.pop()?;
                let array = Self::expect_array(&array)?.clone();
                if index >= array.len() {
                    return Err(VmError::IndexOutOfRange {
                        index: index as i64,
                        length: array.len(),
                    });
                }
                frame.push(Value::Ref(Pointer::Element(array, index)));
            }
            Instruction::StoreElement => {
                let value = frame.pop()?;
                let index = Self::pop_index(frame)?;
                let array = frame.pop()?;
                Self::expect_array(&array)?.set(index, value)?;
            }
            Instruction::NewArray(element) => {
                let length = Self::pop_index(frame)?;
                let element = frame.close(element);
                let default = self.types.read().default_value(&element);
                frame.push(Value::Array(Array::new(element, vec![default; length])));
            }
            Instruction::LoadIndirect => {
                let pointer = frame.pop()?;
                let value = pointer.expect_pointer("indirect load")?.load();
                frame.push(value);
            }
            Instruction::StoreIndirect => {
                let value = frame.pop()?;
                let pointer = frame.pop()?;
                pointer.expect_pointer("indirect store")?.store(value);
            }

            // =========================================================
            // Conversions
            // =========================================================
            // Values carry their runtime type already
            Instruction::Box(_) => {}
            Instruction::Unbox(ty) => {
                let value = frame.pop()?;
                let ty = frame.close(ty);
                if value.is_null() {
                    return Err(VmError::NullReference(format!(
                        "cannot unbox null to {}",
                        self.types.read().type_name(&ty)
                    )));
                }
                if !self.is_instance_of(&value, &ty) {
                    return Err(self.cast_error(&value, &ty));
                }
                frame.push(Value::new_ref(value));
            }
            Instruction::UnboxAny(ty) => {
                let value = frame.pop()?;
                let ty = frame.close(ty);
                let value = self.unbox_any(value, &ty)?;
                frame.push(value);
            }
            Instruction::CastClass(ty) => {
                let value = frame.pop()?;
                let ty = frame.close(ty);
                if !value.is_null() && !self.is_instance_of(&value, &ty) {
                    return Err(self.cast_error(&value, &ty));
                }
                frame.push(value);
            }
            Instruction::Convert(primitive) => {
                let value = frame.pop()?;
                frame.push(convert_primitive(value, *primitive)?);
            }

            // =========================================================
            // Calls
            // =========================================================
            Instruction::NewObject { ctor, ty } => {
                let args = frame.pop_n(ctor.param_count)?;
                let ty = frame.close(ty);
                let object = self.allocate(&ty)?;
                self.call_method(ctor.id, &object, args, Vec::new())?;
                frame.push(object);
            }
            Instruction::Call {
                method,
                generic_args,
            } => {
                let args = frame.pop_n(method.param_count)?;
                let this = if method.is_static {
                    Value::Null
                } else {
                    frame.pop()?
                };
                let generic_args = generic_args.iter().map(|a| frame.close(a)).collect();
                let result = self.call_method(method.id, &this, args, generic_args)?;
                if !method.return_type.is_void() {
                    frame.push(result);
                }
            }
            Instruction::CallVirtual {
                method,
                generic_args,
            } => {
                let args = frame.pop_n(method.param_count)?;
                let this = frame.pop()?;
                let generic_args = generic_args.iter().map(|a| frame.close(a)).collect();
                let result = self.call_virtual(method.id, &this, args, generic_args)?;
                if !method.return_type.is_void() {
                    frame.push(result);
                }
            }
            Instruction::LoadToken {
                method,
                generic_args,
            } => {
                let def = self.method_def(method.id)?;
                let generic_args = generic_args.iter().map(|a| frame.close(a)).collect();
                frame.push(Value::Method(MethodToken {
                    method: def,
                    generic_args,
                }));
            }
            Instruction::LoadType(ty) => {
                let ty = frame.close(ty);
                frame.push(Value::Type(ty));
            }

            // =========================================================
            // Control flow
            // =========================================================
            Instruction::Branch(target) => return Ok(Step::Jump(*target)),
            Instruction::BranchIfTrue(target) => {
                if Self::pop_bool(frame)? {
                    return Ok(Step::Jump(*target));
                }
            }
            Instruction::BranchIfFalse(target) => {
                if !Self::pop_bool(frame)? {
                    return Ok(Step::Jump(*target));
                }
            }
            Instruction::BranchIfNull(target) => {
                if frame.pop()?.is_null() {
                    return Ok(Step::Jump(*target));
                }
            }
            Instruction::BranchIfNotNull(target) => {
                if !frame.pop()?.is_null() {
                    return Ok(Step::Jump(*target));
                }
            }
            Instruction::Leave(target) => {
                let pc = frame.pc;
                let region = frame.code.regions.iter().position(|r| r.protects(pc));
                return Ok(match region {
                    Some(index) => {
                        frame
                            .finally_states
                            .push((index, FinallyState::Leave(*target)));
                        frame.stack.clear();
                        Step::Jump(frame.code.regions[index].handler_start)
                    }
                    None => Step::Jump(*target),
                });
            }
            Instruction::EndFinally => match frame.finally_states.pop() {
                Some((_, FinallyState::Leave(target))) => return Ok(Step::Jump(target)),
                Some((_, FinallyState::Error(error))) => return Err(error),
                None => {}
            },
            Instruction::Throw(error) => return Err(error.clone()),
            Instruction::Return => {
                let value = if frame.code.returns_value {
                    frame.pop()?
                } else {
                    Value::Null
                };
                return Ok(Step::Return(value));
            }
        }
        Ok(Step::Continue)
    }

    fn pop_index(frame: &mut Frame) -> VmResult<usize> {
        match frame.pop()? {
            Value::I32(i) if i >= 0 => Ok(i as usize),
            Value::I64(i) if i >= 0 => Ok(i as usize),
            Value::I32(i) => Err(VmError::IndexOutOfRange {
                index: i as i64,
                length: 0,
            }),
            other => Err(VmError::InvalidCast(format!(
                "expected an index, found {}",
                other
            ))),
        }
    }

    fn pop_bool(frame: &mut Frame) -> VmResult<bool> {
        match frame.pop()? {
            Value::Bool(b) => Ok(b),
            other => Err(VmError::InvalidCast(format!(
                "expected a bool, found {}",
                other
            ))),
        }
    }

    fn expect_array(value: &Value) -> VmResult<&ArrayRef> {
        match value {
            Value::Array(array) => Ok(array),
            Value::Null => Err(VmError::NullReference("array is null".to_string())),
            other => Err(VmError::InvalidCast(format!(
                "expected an array, found {}",
                other
            ))),
        }
    }
}

/// Numeric conversion between primitive value types
fn convert_primitive(value: Value, to: Primitive) -> VmResult<Value> {
    let invalid = |value: &Value| {
        VmError::InvalidCast(format!("cannot convert {} to {}", value, to.name()))
    };
    Ok(match (to, &value) {
        (Primitive::I32, Value::I32(_))
        | (Primitive::I64, Value::I64(_))
        | (Primitive::F64, Value::F64(_))
        | (Primitive::Bool, Value::Bool(_))
        | (Primitive::Char, Value::Char(_))
        | (Primitive::String, Value::Str(_)) => value,
        (Primitive::I32, Value::I64(v)) => Value::I32(*v as i32),
        (Primitive::I32, Value::F64(v)) => Value::I32(*v as i32),
        (Primitive::I32, Value::Char(c)) => Value::I32(*c as i32),
        (Primitive::I32, Value::Enum(_, v)) => Value::I32(*v),
        (Primitive::I64, Value::I32(v)) => Value::I64(*v as i64),
        (Primitive::I64, Value::F64(v)) => Value::I64(*v as i64),
        (Primitive::F64, Value::I32(v)) => Value::F64(*v as f64),
        (Primitive::F64, Value::I64(v)) => Value::F64(*v as f64),
        (Primitive::Char, Value::I32(v)) => {
            Value::Char(char::from_u32(*v as u32).ok_or_else(|| invalid(&value))?)
        }
        _ => return Err(invalid(&value)),
    })
}
