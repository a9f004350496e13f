//! Call frames

use std::sync::Arc;

use parking_lot::Mutex;

use crate::emit::CompiledMethod;
use crate::error::{VmError, VmResult};
use crate::types::TypeRef;
use crate::value::{Pointer, Value};

/// Why a finally handler is running
#[derive(Debug, Clone)]
pub(crate) enum FinallyState {
    /// Normal exit: continue at the target afterwards
    Leave(usize),
    /// Error exit: re-raise afterwards
    Error(VmError),
}

/// Execution state of one compiled method activation
pub(crate) struct Frame {
    pub code: Arc<CompiledMethod>,
    pub this: Value,
    args: Vec<Arc<Mutex<Value>>>,
    locals: Vec<Arc<Mutex<Value>>>,
    pub type_args: Vec<TypeRef>,
    pub method_args: Vec<TypeRef>,
    pub stack: Vec<Value>,
    pub pc: usize,
    /// Pending finally handlers as (region index, state)
    pub finally_states: Vec<(usize, FinallyState)>,
}

impl Frame {
    pub fn new(
        code: Arc<CompiledMethod>,
        this: Value,
        args: Vec<Value>,
        local_defaults: Vec<Value>,
        type_args: Vec<TypeRef>,
        method_args: Vec<TypeRef>,
    ) -> Self {
        let max_stack = code.max_stack;
        Self {
            code,
            this,
            args: args.into_iter().map(|v| Arc::new(Mutex::new(v))).collect(),
            locals: local_defaults
                .into_iter()
                .map(|v| Arc::new(Mutex::new(v)))
                .collect(),
            type_args,
            method_args,
            stack: Vec::with_capacity(max_stack),
            pc: 0,
            finally_states: Vec::new(),
        }
    }

    /// Close a type over the frame's generic arguments
    pub fn close(&self, ty: &TypeRef) -> TypeRef {
        if ty.contains_generic_params() {
            ty.substitute(&self.type_args, &self.method_args)
        } else {
            ty.clone()
        }
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    /// Pop `count` values, first pushed first
    pub fn pop_n(&mut self, count: usize) -> VmResult<Vec<Value>> {
        if self.stack.len() < count {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn slot<'a>(slots: &'a [Arc<Mutex<Value>>], index: u16, what: &str) -> VmResult<&'a Arc<Mutex<Value>>> {
        slots.get(index as usize).ok_or_else(|| {
            VmError::InvalidArgument(format!("{} {} does not exist", what, index))
        })
    }

    pub fn arg(&self, index: u16) -> VmResult<Value> {
        Ok(Self::slot(&self.args, index, "argument")?.lock().clone())
    }

    pub fn set_arg(&self, index: u16, value: Value) -> VmResult<()> {
        *Self::slot(&self.args, index, "argument")?.lock() = value;
        Ok(())
    }

    pub fn arg_address(&self, index: u16) -> VmResult<Value> {
        Ok(Value::Ref(Pointer::Slot(
            Self::slot(&self.args, index, "argument")?.clone(),
        )))
    }

    pub fn local(&self, index: u16) -> VmResult<Value> {
        Ok(Self::slot(&self.locals, index, "local")?.lock().clone())
    }

    pub fn set_local(&self, index: u16, value: Value) -> VmResult<()> {
        *Self::slot(&self.locals, index, "local")?.lock() = value;
        Ok(())
    }

    pub fn local_address(&self, index: u16) -> VmResult<Value> {
        Ok(Value::Ref(Pointer::Slot(
            Self::slot(&self.locals, index, "local")?.clone(),
        )))
    }
}
