//! Symbolic instruction layer
//!
//! Typed references, expressions and statements that compile themselves
//! against a [`CodeEmitter`](crate::emit::CodeEmitter). Nodes are plain
//! values: compiling one mutates only the emitter, so the same fragment can
//! be compiled into several members.

mod expression;
mod reference;
mod statement;

pub use expression::{emit_conversion, Expression};
pub use reference::Reference;
pub use statement::{emit_block, Statement};
