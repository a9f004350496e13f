//! Low-level code emitter
//!
//! Appends instructions to a method body, tracks operand stack depth,
//! resolves labels and records try/finally regions. Branches are emitted
//! with a placeholder target and patched when the body is built.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::emit::instruction::{CompiledMethod, Instruction, Region};
use crate::error::EmitError;
use crate::types::TypeRef;

/// Global counter for emitter ids
static NEXT_EMITTER_ID: AtomicUsize = AtomicUsize::new(1);

fn generate_emitter_id() -> usize {
    NEXT_EMITTER_ID.fetch_add(1, Ordering::Relaxed)
}

/// A jump target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    /// Index within the emitter
    pub id: usize,
}

/// Branch waiting for its label to be marked
#[derive(Debug, Clone)]
struct UnresolvedJump {
    /// Instruction index of the branch
    position: usize,
    /// Target label
    label: Label,
}

#[derive(Debug, Clone)]
struct OpenRegion {
    try_start: usize,
    end_label: Label,
    handler_start: Option<usize>,
    try_end: usize,
}

/// Builder for a single method body
#[derive(Debug)]
pub struct CodeEmitter {
    /// Unique emitter id
    pub id: usize,
    name: String,
    returns_value: bool,
    instructions: Vec<Instruction>,
    locals: Vec<TypeRef>,
    /// Label positions (label id -> instruction index)
    labels: Vec<Option<usize>>,
    /// Stack depth expected at each label
    label_depths: Vec<Option<usize>>,
    unresolved: Vec<UnresolvedJump>,
    regions: Vec<Region>,
    open_regions: Vec<OpenRegion>,
    depth: usize,
    max_stack: usize,
    reachable: bool,
    finalized: bool,
}

impl CodeEmitter {
    /// Create an emitter for a method named `name`
    pub fn new(name: impl Into<String>, returns_value: bool) -> Self {
        Self {
            id: generate_emitter_id(),
            name: name.into(),
            returns_value,
            instructions: Vec::with_capacity(32),
            locals: Vec::new(),
            labels: Vec::new(),
            label_depths: Vec::new(),
            unresolved: Vec::new(),
            regions: Vec::new(),
            open_regions: Vec::new(),
            depth: 0,
            max_stack: 0,
            reachable: true,
            finalized: false,
        }
    }

    /// Name of the method being emitted
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current operand stack depth
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of instructions emitted so far
    pub fn position(&self) -> usize {
        self.instructions.len()
    }

    fn ensure_open(&self) -> Result<(), EmitError> {
        if self.finalized {
            return Err(EmitError::Finalized(self.name.clone()));
        }
        Ok(())
    }

    /// Declare a local variable
    pub fn declare_local(&mut self, ty: TypeRef) -> Result<u16, EmitError> {
        self.ensure_open()?;
        self.locals.push(ty);
        Ok((self.locals.len() - 1) as u16)
    }

    /// Type of a declared local
    pub fn local_type(&self, index: u16) -> Option<&TypeRef> {
        self.locals.get(index as usize)
    }

    /// Define a new label
    pub fn define_label(&mut self) -> Label {
        self.labels.push(None);
        self.label_depths.push(None);
        Label {
            id: self.labels.len() - 1,
        }
    }

    /// Mark the current position with a label
    pub fn mark_label(&mut self, label: Label) -> Result<(), EmitError> {
        self.ensure_open()?;
        match self.labels.get_mut(label.id) {
            Some(Some(_)) => return Err(EmitError::LabelAlreadyMarked(label.id)),
            Some(slot) => *slot = Some(self.instructions.len()),
            None => return Err(EmitError::LabelAlreadyMarked(label.id)),
        }
        if !self.reachable {
            self.depth = self.label_depths[label.id].unwrap_or(0);
            self.reachable = true;
        }
        Ok(())
    }

    fn track(&mut self, instruction: &Instruction) -> Result<(), EmitError> {
        if !self.reachable {
            return Ok(());
        }
        let (pops, pushes) = match instruction {
            Instruction::Return => (usize::from(self.returns_value), 0),
            other => other.stack_effect(),
        };
        if pops > self.depth {
            return Err(EmitError::StackUnderflow {
                method: self.name.clone(),
                position: self.instructions.len(),
            });
        }
        self.depth = self.depth - pops + pushes;
        self.max_stack = self.max_stack.max(self.depth);
        Ok(())
    }

    /// Emit a non-branch instruction
    pub fn emit(&mut self, instruction: Instruction) -> Result<(), EmitError> {
        self.ensure_open()?;
        if matches!(instruction, Instruction::Return) && !self.open_regions.is_empty() {
            return Err(EmitError::ReturnInsideProtectedRegion(self.name.clone()));
        }
        self.track(&instruction)?;
        let ends_block = instruction.ends_block();
        self.instructions.push(instruction);
        if ends_block {
            self.reachable = false;
            self.depth = 0;
        }
        Ok(())
    }

    /// Emit a branch to `label`; the instruction's own target is ignored
    pub fn emit_jump(&mut self, instruction: Instruction, label: Label) -> Result<(), EmitError> {
        self.ensure_open()?;
        if instruction.branch_target().is_none() {
            return Err(EmitError::InvalidReference(format!(
                "'{}' is not a branch instruction",
                instruction
            )));
        }
        self.track(&instruction)?;
        let depth_at_target = if matches!(instruction, Instruction::Leave(_)) {
            0
        } else {
            self.depth
        };
        if let Some(slot) = self.label_depths.get_mut(label.id) {
            slot.get_or_insert(depth_at_target);
        }
        self.unresolved.push(UnresolvedJump {
            position: self.instructions.len(),
            label,
        });
        let ends_block = instruction.ends_block();
        self.instructions.push(instruction);
        if ends_block {
            self.reachable = false;
            self.depth = 0;
        }
        Ok(())
    }

    /// Open a protected block
    pub fn begin_try(&mut self) -> Result<(), EmitError> {
        self.ensure_open()?;
        let end_label = self.define_label();
        self.open_regions.push(OpenRegion {
            try_start: self.instructions.len(),
            end_label,
            handler_start: None,
            try_end: 0,
        });
        Ok(())
    }

    /// Close the protected block and open its finally handler
    pub fn begin_finally(&mut self) -> Result<(), EmitError> {
        self.ensure_open()?;
        let end_label = match self.open_regions.last() {
            Some(region) if region.handler_start.is_none() => region.end_label,
            _ => return Err(EmitError::UnbalancedRegion(self.name.clone())),
        };
        self.emit_jump(Instruction::Leave(0), end_label)?;
        let position = self.instructions.len();
        if let Some(region) = self.open_regions.last_mut() {
            region.try_end = position;
            region.handler_start = Some(position);
        }
        self.reachable = true;
        self.depth = 0;
        Ok(())
    }

    /// Close the finally handler
    pub fn end_try(&mut self) -> Result<(), EmitError> {
        self.ensure_open()?;
        let region = match self.open_regions.pop() {
            Some(region) if region.handler_start.is_some() => region,
            _ => return Err(EmitError::UnbalancedRegion(self.name.clone())),
        };
        self.emit(Instruction::EndFinally)?;
        self.regions.push(Region {
            try_start: region.try_start,
            try_end: region.try_end,
            handler_start: region.handler_start.unwrap_or(region.try_end),
            handler_end: self.instructions.len(),
        });
        self.mark_label(region.end_label)
    }

    /// Resolve labels and produce the method body
    pub fn build(&mut self) -> Result<CompiledMethod, EmitError> {
        self.ensure_open()?;
        if !self.open_regions.is_empty() {
            return Err(EmitError::UnbalancedRegion(self.name.clone()));
        }
        for jump in &self.unresolved {
            let target = self
                .labels
                .get(jump.label.id)
                .copied()
                .flatten()
                .ok_or_else(|| EmitError::UnmarkedLabel {
                    method: self.name.clone(),
                    label: jump.label.id,
                })?;
            self.instructions[jump.position].set_branch_target(target);
        }
        self.finalized = true;

        Ok(CompiledMethod {
            name: self.name.clone(),
            instructions: std::mem::take(&mut self.instructions),
            locals: std::mem::take(&mut self.locals),
            regions: std::mem::take(&mut self.regions),
            max_stack: self.max_stack,
            returns_value: self.returns_value,
        })
    }
}
