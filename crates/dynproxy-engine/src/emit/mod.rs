//! Code emission
//!
//! Layers, bottom up:
//! - [`instruction`]: the stack-machine instruction set and compiled methods
//! - [`code_emitter`]: labels, locals and protected regions over a flat
//!   instruction buffer
//! - [`ast`]: typed references, expressions and statements
//! - [`method_emitter`], [`class_emitter`], [`property_emitter`]: members
//!   and types assembled from statements and registered in a
//!   [`TypeTable`](crate::types::TypeTable)

pub mod ast;
pub mod class_emitter;
pub mod code_emitter;
pub mod instruction;
pub mod method_emitter;
pub mod naming;
pub mod property_emitter;

pub use class_emitter::ClassEmitter;
pub use code_emitter::{CodeEmitter, Label};
pub use instruction::{CompiledMethod, Instruction, Region};
pub use method_emitter::MethodEmitter;
pub use naming::NamingScope;
pub use property_emitter::{EventEmitter, PropertyEmitter};
