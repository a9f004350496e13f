//! Instruction set executed by the interpreter
//!
//! A small stack machine. Operands are typed values rather than encoded
//! bytes: type and method operands stay symbolic so that generated code can
//! refer to types that are registered after the code is compiled.

use std::fmt;

use crate::error::VmError;
use crate::types::{FieldRef, MethodHandle, Primitive, TypeRef};
use crate::value::Value;

/// A single instruction
#[derive(Debug, Clone)]
pub enum Instruction {
    /// Do nothing
    Nop,
    /// Discard the top of the stack
    Pop,
    /// Duplicate the top of the stack
    Dup,
    /// Push null
    LoadNull,
    /// Push a constant
    LoadConst(Value),
    /// Push the default value of a type
    LoadDefault(TypeRef),
    /// Push the receiver
    LoadThis,
    /// Push an argument
    LoadArg(u16),
    /// Push a pointer to an argument slot
    LoadArgAddress(u16),
    /// Pop into an argument slot
    StoreArg(u16),
    /// Push a local
    LoadLocal(u16),
    /// Push a pointer to a local slot
    LoadLocalAddress(u16),
    /// Pop into a local slot
    StoreLocal(u16),
    /// Pop an object, push one of its fields
    LoadField(FieldRef),
    /// Pop an object, push a pointer to one of its fields
    LoadFieldAddress(FieldRef),
    /// Pop a value and an object, store the value into the field
    StoreField(FieldRef),
    /// Push a static field
    LoadStatic(FieldRef),
    /// Push a pointer to a static field
    LoadStaticAddress(FieldRef),
    /// Pop into a static field
    StoreStatic(FieldRef),
    /// Pop an index and an array, push the element
    LoadElement,
    /// Pop an index and an array, push a pointer to the element
    LoadElementAddress,
    /// Pop a value, an index and an array, store the element
    StoreElement,
    /// Pop a length, push a fresh array of defaults
    NewArray(TypeRef),
    /// Pop a pointer, push the value it addresses
    LoadIndirect,
    /// Pop a value and a pointer, store through the pointer
    StoreIndirect,
    /// Value type to reference: checks the value and leaves it in place
    Box(TypeRef),
    /// Reference to value type: pushes a pointer to a copy of the value
    Unbox(TypeRef),
    /// Reference to any type: unboxes value types, casts reference types
    UnboxAny(TypeRef),
    /// Checked reference conversion; null passes
    CastClass(TypeRef),
    /// Numeric conversion
    Convert(Primitive),
    /// Pop constructor arguments, allocate, run the constructor, push the instance
    NewObject {
        /// Constructor to run
        ctor: MethodHandle,
        /// Type to allocate
        ty: TypeRef,
    },
    /// Non-virtual call
    Call {
        /// Callee
        method: MethodHandle,
        /// Generic method arguments
        generic_args: Vec<TypeRef>,
    },
    /// Call dispatched through the receiver's vtable
    CallVirtual {
        /// Slot to dispatch
        method: MethodHandle,
        /// Generic method arguments
        generic_args: Vec<TypeRef>,
    },
    /// Push a method token
    LoadToken {
        /// Method
        method: MethodHandle,
        /// Generic method arguments
        generic_args: Vec<TypeRef>,
    },
    /// Push a type token
    LoadType(TypeRef),
    /// Unconditional jump
    Branch(usize),
    /// Pop a bool and jump when it is true
    BranchIfTrue(usize),
    /// Pop a bool and jump when it is false
    BranchIfFalse(usize),
    /// Pop a value and jump when it is null
    BranchIfNull(usize),
    /// Pop a value and jump when it is not null
    BranchIfNotNull(usize),
    /// Exit a try block through its finally handler, then jump
    Leave(usize),
    /// End of a finally handler
    EndFinally,
    /// Raise an error
    Throw(VmError),
    /// Return from the method (popping the result when the method has one)
    Return,
}

impl Instruction {
    /// Values popped and pushed, for stack-depth tracking.
    ///
    /// `Return` is accounted by the emitter, which knows whether the method
    /// produces a value.
    pub fn stack_effect(&self) -> (usize, usize) {
        use Instruction::*;
        match self {
            Nop | Branch(_) | Leave(_) | EndFinally | Throw(_) | Return => (0, 0),
            Pop => (1, 0),
            Dup => (1, 2),
            LoadNull | LoadConst(_) | LoadDefault(_) | LoadThis => (0, 1),
            LoadArg(_) | LoadArgAddress(_) | LoadLocal(_) | LoadLocalAddress(_) => (0, 1),
            StoreArg(_) | StoreLocal(_) => (1, 0),
            LoadField(_) | LoadFieldAddress(_) => (1, 1),
            StoreField(_) => (2, 0),
            LoadStatic(_) | LoadStaticAddress(_) => (0, 1),
            StoreStatic(_) => (1, 0),
            LoadElement | LoadElementAddress => (2, 1),
            StoreElement => (3, 0),
            NewArray(_) => (1, 1),
            LoadIndirect => (1, 1),
            StoreIndirect => (2, 0),
            Box(_) | Unbox(_) | UnboxAny(_) | CastClass(_) | Convert(_) => (1, 1),
            NewObject { ctor, .. } => (ctor.param_count, 1),
            Call { method, .. } | CallVirtual { method, .. } => {
                let receiver = usize::from(!method.is_static);
                let result = usize::from(!method.return_type.is_void());
                (method.param_count + receiver, result)
            }
            LoadToken { .. } | LoadType(_) => (0, 1),
            BranchIfTrue(_) | BranchIfFalse(_) | BranchIfNull(_) | BranchIfNotNull(_) => (1, 0),
        }
    }

    /// Whether control never falls through to the next instruction
    pub fn ends_block(&self) -> bool {
        matches!(
            self,
            Instruction::Branch(_)
                | Instruction::Leave(_)
                | Instruction::EndFinally
                | Instruction::Throw(_)
                | Instruction::Return
        )
    }

    /// Jump target, when this is a branch
    pub fn branch_target(&self) -> Option<usize> {
        match self {
            Instruction::Branch(t)
            | Instruction::BranchIfTrue(t)
            | Instruction::BranchIfFalse(t)
            | Instruction::BranchIfNull(t)
            | Instruction::BranchIfNotNull(t)
            | Instruction::Leave(t) => Some(*t),
            _ => None,
        }
    }

    pub(crate) fn set_branch_target(&mut self, target: usize) {
        match self {
            Instruction::Branch(t)
            | Instruction::BranchIfTrue(t)
            | Instruction::BranchIfFalse(t)
            | Instruction::BranchIfNull(t)
            | Instruction::BranchIfNotNull(t)
            | Instruction::Leave(t) => *t = target,
            _ => {}
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;
        match self {
            Nop => write!(f, "nop"),
            Pop => write!(f, "pop"),
            Dup => write!(f, "dup"),
            LoadNull => write!(f, "ldnull"),
            LoadConst(v) => write!(f, "ldc {:?}", v),
            LoadDefault(t) => write!(f, "lddefault {}", t),
            LoadThis => write!(f, "ldthis"),
            LoadArg(i) => write!(f, "ldarg {}", i),
            LoadArgAddress(i) => write!(f, "ldarga {}", i),
            StoreArg(i) => write!(f, "starg {}", i),
            LoadLocal(i) => write!(f, "ldloc {}", i),
            LoadLocalAddress(i) => write!(f, "ldloca {}", i),
            StoreLocal(i) => write!(f, "stloc {}", i),
            LoadField(r) => write!(f, "ldfld {}", r.name),
            LoadFieldAddress(r) => write!(f, "ldflda {}", r.name),
            StoreField(r) => write!(f, "stfld {}", r.name),
            LoadStatic(r) => write!(f, "ldsfld {}", r.name),
            LoadStaticAddress(r) => write!(f, "ldsflda {}", r.name),
            StoreStatic(r) => write!(f, "stsfld {}", r.name),
            LoadElement => write!(f, "ldelem"),
            LoadElementAddress => write!(f, "ldelema"),
            StoreElement => write!(f, "stelem"),
            NewArray(t) => write!(f, "newarr {}", t),
            LoadIndirect => write!(f, "ldind"),
            StoreIndirect => write!(f, "stind"),
            Box(t) => write!(f, "box {}", t),
            Unbox(t) => write!(f, "unbox {}", t),
            UnboxAny(t) => write!(f, "unbox.any {}", t),
            CastClass(t) => write!(f, "castclass {}", t),
            Convert(p) => write!(f, "conv.{}", p.name()),
            NewObject { ctor, ty } => write!(f, "newobj {}::{}/{}", ty, ctor.name, ctor.param_count),
            Call { method, .. } => write!(f, "call {}/{}", method.name, method.param_count),
            CallVirtual { method, .. } => write!(f, "callvirt {}/{}", method.name, method.param_count),
            LoadToken { method, .. } => write!(f, "ldtoken {}", method.name),
            LoadType(t) => write!(f, "ldtype {}", t),
            Branch(t) => write!(f, "br {}", t),
            BranchIfTrue(t) => write!(f, "brtrue {}", t),
            BranchIfFalse(t) => write!(f, "brfalse {}", t),
            BranchIfNull(t) => write!(f, "brnull {}", t),
            BranchIfNotNull(t) => write!(f, "brinst {}", t),
            Leave(t) => write!(f, "leave {}", t),
            EndFinally => write!(f, "endfinally"),
            Throw(e) => write!(f, "throw \"{}\"", e),
            Return => write!(f, "ret"),
        }
    }
}

/// A try/finally region, as instruction index ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// First instruction of the protected block
    pub try_start: usize,
    /// One past the last instruction of the protected block
    pub try_end: usize,
    /// First instruction of the finally handler
    pub handler_start: usize,
    /// One past the last instruction of the finally handler
    pub handler_end: usize,
}

impl Region {
    /// Whether `pc` lies inside the protected block
    pub fn protects(&self, pc: usize) -> bool {
        pc >= self.try_start && pc < self.try_end
    }

    /// Whether `pc` lies inside the finally handler
    pub fn in_handler(&self, pc: usize) -> bool {
        pc >= self.handler_start && pc < self.handler_end
    }
}

/// A finished method body
#[derive(Debug, Clone)]
pub struct CompiledMethod {
    /// Method name, for diagnostics
    pub name: String,
    /// Instructions
    pub instructions: Vec<Instruction>,
    /// Local variable types
    pub locals: Vec<TypeRef>,
    /// Protected regions, innermost first
    pub regions: Vec<Region>,
    /// Maximum operand stack depth
    pub max_stack: usize,
    /// Whether `Return` pops a result
    pub returns_value: bool,
}

impl CompiledMethod {
    /// Human-readable listing
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (i, local) in self.locals.iter().enumerate() {
            out.push_str(&format!("  .local {} {}\n", i, local));
        }
        for (pc, instruction) in self.instructions.iter().enumerate() {
            for region in &self.regions {
                if region.try_start == pc {
                    out.push_str("  .try {\n");
                }
                if region.handler_start == pc {
                    out.push_str("  } finally {\n");
                }
            }
            out.push_str(&format!("  {:04}: {}\n", pc, instruction));
            for region in &self.regions {
                if region.handler_end == pc + 1 {
                    out.push_str("  }\n");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MethodId;
    use std::sync::Arc;

    fn handle(params: usize, is_static: bool, ret: TypeRef) -> MethodHandle {
        MethodHandle {
            id: MethodId(1),
            name: Arc::from("M"),
            return_type: ret,
            param_count: params,
            is_static,
        }
    }

    #[test]
    fn test_call_stack_effect_counts_receiver() {
        let call = Instruction::Call {
            method: handle(2, false, TypeRef::i32()),
            generic_args: Vec::new(),
        };
        assert_eq!(call.stack_effect(), (3, 1));

        let call = Instruction::CallVirtual {
            method: handle(0, true, TypeRef::Void),
            generic_args: Vec::new(),
        };
        assert_eq!(call.stack_effect(), (0, 0));
    }

    #[test]
    fn test_branch_target_patching() {
        let mut jump = Instruction::Leave(0);
        jump.set_branch_target(7);
        assert_eq!(jump.branch_target(), Some(7));
        assert!(jump.ends_block());
        assert_eq!(Instruction::Pop.branch_target(), None);
    }

    #[test]
    fn test_region_ranges() {
        let region = Region {
            try_start: 2,
            try_end: 5,
            handler_start: 5,
            handler_end: 8,
        };
        assert!(region.protects(2));
        assert!(!region.protects(5));
        assert!(region.in_handler(7));
        assert!(!region.in_handler(8));
    }
}
