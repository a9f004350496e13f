//! Statements

use crate::emit::ast::{Expression, Reference};
use crate::emit::code_emitter::CodeEmitter;
use crate::emit::instruction::Instruction;
use crate::error::{EmitError, VmError};
use crate::types::{MethodHandle, TypeTable};
use crate::value::Value;

/// A statement
#[derive(Debug, Clone)]
pub enum Statement {
    /// `target = value`
    Assign {
        /// Storage location
        target: Reference,
        /// Assigned value
        value: Expression,
    },
    /// `array[index] = value`
    AssignArrayElement {
        /// Reference holding the array
        array: Reference,
        /// Element index
        index: usize,
        /// Assigned value
        value: Expression,
    },
    /// Evaluate and discard
    Expression(Expression),
    /// Return, with a value for non-void methods
    Return(Option<Expression>),
    /// Run `then` when `value` is null, `otherwise` when it is not
    IfNull {
        /// Tested value
        value: Expression,
        /// Null branch
        then: Vec<Statement>,
        /// Non-null branch
        otherwise: Vec<Statement>,
    },
    /// Raise an error
    Throw(VmError),
    /// `try { body } finally { finally }`
    TryFinally {
        /// Protected block
        body: Vec<Statement>,
        /// Handler run on every exit path
        finally: Vec<Statement>,
    },
    /// Run a base class constructor on the receiver
    BaseConstructorCall {
        /// Base constructor
        ctor: MethodHandle,
        /// Arguments
        args: Vec<Expression>,
    },
}

impl Statement {
    /// `target = value`
    pub fn assign(target: Reference, value: Expression) -> Self {
        Statement::Assign { target, value }
    }

    /// Compile the statement
    pub fn emit(&self, e: &mut CodeEmitter, types: &TypeTable) -> Result<(), EmitError> {
        match self {
            Statement::Assign { target, value } => target.store(value, e, types),
            Statement::AssignArrayElement {
                array,
                index,
                value,
            } => {
                array.load(e, types)?;
                e.emit(Instruction::LoadConst(Value::I32(*index as i32)))?;
                value.emit(e, types)?;
                e.emit(Instruction::StoreElement)
            }
            Statement::Expression(expression) => {
                expression.emit(e, types)?;
                if expression.pushes_value() {
                    e.emit(Instruction::Pop)?;
                }
                Ok(())
            }
            Statement::Return(value) => {
                if let Some(value) = value {
                    value.emit(e, types)?;
                }
                e.emit(Instruction::Return)
            }
            Statement::IfNull {
                value,
                then,
                otherwise,
            } => {
                let not_null = e.define_label();
                let end = e.define_label();
                value.emit(e, types)?;
                e.emit_jump(Instruction::BranchIfNotNull(0), not_null)?;
                emit_block(then, e, types)?;
                if otherwise.is_empty() {
                    e.mark_label(not_null)?;
                    return e.mark_label(end);
                }
                e.emit_jump(Instruction::Branch(0), end)?;
                e.mark_label(not_null)?;
                emit_block(otherwise, e, types)?;
                e.mark_label(end)
            }
            Statement::Throw(error) => e.emit(Instruction::Throw(error.clone())),
            Statement::TryFinally { body, finally } => {
                e.begin_try()?;
                emit_block(body, e, types)?;
                e.begin_finally()?;
                emit_block(finally, e, types)?;
                e.end_try()
            }
            Statement::BaseConstructorCall { ctor, args } => {
                e.emit(Instruction::LoadThis)?;
                for arg in args {
                    arg.emit(e, types)?;
                }
                e.emit(Instruction::Call {
                    method: ctor.clone(),
                    generic_args: Vec::new(),
                })
            }
        }
    }
}

/// Compile a sequence of statements
pub fn emit_block(
    statements: &[Statement],
    e: &mut CodeEmitter,
    types: &TypeTable,
) -> Result<(), EmitError> {
    for statement in statements {
        statement.emit(e, types)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeRef;

    #[test]
    fn test_if_null_without_else() {
        let types = TypeTable::new();
        let mut e = CodeEmitter::new("Test", false);
        let local = e.declare_local(TypeRef::object()).unwrap();
        let local = Reference::Local {
            index: local,
            ty: TypeRef::object(),
        };
        Statement::IfNull {
            value: local.to_expression(),
            then: vec![Statement::Throw(VmError::MissingReturnValue)],
            otherwise: Vec::new(),
        }
        .emit(&mut e, &types)
        .unwrap();
        Statement::Return(None).emit(&mut e, &types).unwrap();

        let code = e.build().unwrap();
        assert!(matches!(code.instructions[1], Instruction::BranchIfNotNull(3)));
        assert!(matches!(code.instructions[2], Instruction::Throw(VmError::MissingReturnValue)));
    }

    #[test]
    fn test_return_inside_try_is_rejected() {
        let types = TypeTable::new();
        let mut e = CodeEmitter::new("Test", false);
        let statement = Statement::TryFinally {
            body: vec![Statement::Return(None)],
            finally: Vec::new(),
        };
        assert!(matches!(
            statement.emit(&mut e, &types),
            Err(EmitError::ReturnInsideProtectedRegion(_))
        ));
    }

    #[test]
    fn test_discarded_expression_is_popped() {
        let types = TypeTable::new();
        let mut e = CodeEmitter::new("Test", false);
        Statement::Expression(Expression::Literal(Value::I32(1)))
            .emit(&mut e, &types)
            .unwrap();
        assert_eq!(e.depth(), 0);
    }
}
