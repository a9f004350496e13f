//! Method and constructor emitter

use crate::emit::ast::{emit_block, Expression, Reference, Statement};
use crate::emit::code_emitter::CodeEmitter;
use crate::emit::instruction::Instruction;
use crate::error::{EmitError, ProxyResult};
use crate::types::generics::copy_generic_parameters;
use crate::types::table::next_method_id;
use crate::types::{
    CustomAttributeData, GenericOwner, GenericParameterDef, MethodBody, MethodDef, MethodHandle,
    MethodId, MethodKind, NativeFn, ParameterDef, TypeId, TypeRef, TypeTable, Visibility,
};
use std::fmt;
use std::sync::Arc;

/// A method under construction
///
/// The id is allocated up front so that other members can call the method
/// before it is built.
pub struct MethodEmitter {
    id: MethodId,
    declaring_type: TypeId,
    name: String,
    kind: MethodKind,
    visibility: Visibility,
    is_static: bool,
    is_virtual: bool,
    is_final: bool,
    parameters: Vec<ParameterDef>,
    return_type: TypeRef,
    generic_params: Vec<GenericParameterDef>,
    attributes: Vec<CustomAttributeData>,
    code: CodeEmitter,
    statements: Vec<Statement>,
    native: Option<NativeFn>,
}

impl fmt::Debug for MethodEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEmitter")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("parameters", &self.parameters.len())
            .field("statements", &self.statements.len())
            .field("native", &self.native.is_some())
            .finish()
    }
}

impl MethodEmitter {
    /// Public, non-virtual instance method
    pub fn new(
        declaring_type: TypeId,
        name: impl Into<String>,
        kind: MethodKind,
        parameters: Vec<ParameterDef>,
        return_type: TypeRef,
    ) -> Self {
        let name = name.into();
        let code = CodeEmitter::new(name.clone(), !return_type.is_void());
        Self {
            id: next_method_id(),
            declaring_type,
            name,
            kind,
            visibility: Visibility::Public,
            is_static: kind == MethodKind::TypeInitializer,
            is_virtual: false,
            is_final: false,
            parameters,
            return_type,
            generic_params: Vec::new(),
            attributes: Vec::new(),
            code,
            statements: Vec::new(),
            native: None,
        }
    }

    /// Method id
    pub fn id(&self) -> MethodId {
        self.id
    }

    /// Method name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameters
    pub fn parameters(&self) -> &[ParameterDef] {
        &self.parameters
    }

    /// Declared return type
    pub fn return_type(&self) -> &TypeRef {
        &self.return_type
    }

    /// Declared generic parameters
    pub fn generic_params(&self) -> &[GenericParameterDef] {
        &self.generic_params
    }

    /// Call handle
    pub fn handle(&self) -> MethodHandle {
        MethodHandle {
            id: self.id,
            name: Arc::from(self.name.as_str()),
            return_type: self.return_type.clone(),
            param_count: self.parameters.len(),
            is_static: self.is_static,
        }
    }

    /// Set the accessibility
    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Mark as virtual
    pub fn as_virtual(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    /// Mark as final (only meaningful together with `as_virtual`)
    pub fn as_final(mut self) -> Self {
        self.is_final = true;
        self
    }

    /// Mark as static
    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Re-declare the generic parameters of `source` on this method
    pub fn copy_generic_parameters_from(&mut self, source: &MethodDef) {
        self.generic_params = copy_generic_parameters(
            &source.generic_params,
            GenericOwner::Method,
            GenericOwner::Method,
        );
    }

    /// Attach a custom attribute
    pub fn add_attribute(&mut self, data: CustomAttributeData) {
        self.attributes.push(data);
    }

    /// References to the declared parameters
    pub fn arguments(&self) -> Vec<Reference> {
        self.parameters
            .iter()
            .enumerate()
            .map(|(i, p)| Reference::arg(i as u16, p.ty.clone()))
            .collect()
    }

    /// Declare a local variable
    pub fn declare_local(&mut self, ty: TypeRef) -> Result<Reference, EmitError> {
        let index = self.code.declare_local(ty.clone())?;
        Ok(Reference::Local { index, ty })
    }

    /// Append a statement to the body
    pub fn add_statement(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    /// Append an expression evaluated for its side effects
    pub fn add_expression(&mut self, expression: Expression) {
        self.statements.push(Statement::Expression(expression));
    }

    /// Implement the method in Rust instead of compiled statements
    pub fn set_native(&mut self, body: NativeFn) {
        self.native = Some(body);
    }

    /// Compile the body and produce the method record
    pub fn build(mut self, types: &TypeTable) -> ProxyResult<MethodDef> {
        let body = match self.native.take() {
            Some(native) => MethodBody::Native(native),
            None => {
                emit_block(&self.statements, &mut self.code, types)?;
                if !ends_with_return(&self.statements) {
                    if !self.return_type.is_void() {
                        self.code
                            .emit(Instruction::LoadDefault(self.return_type.clone()))?;
                    }
                    self.code.emit(Instruction::Return)?;
                }
                MethodBody::Compiled(Arc::new(self.code.build()?))
            }
        };

        Ok(MethodDef {
            id: self.id,
            declaring_type: self.declaring_type,
            name: self.name,
            kind: self.kind,
            visibility: self.visibility,
            is_static: self.is_static,
            is_virtual: self.is_virtual,
            is_abstract: false,
            is_final: self.is_final,
            parameters: self.parameters,
            return_type: self.return_type,
            generic_params: self.generic_params,
            body,
            attributes: self.attributes,
        })
    }
}

fn ends_with_return(statements: &[Statement]) -> bool {
    matches!(
        statements.last(),
        Some(Statement::Return(_)) | Some(Statement::Throw(_))
    )
}
