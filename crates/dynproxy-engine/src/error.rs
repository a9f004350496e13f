//! Error types for proxy generation and execution
//!
//! Three layers, each with its own enum:
//!
//! - [`EmitError`]: malformed code handed to the low-level emitter
//! - [`VmError`]: failures while executing method bodies (including
//!   the "no target" dispatch failure)
//! - [`ProxyError`]: everything a proxy generation request can fail with

use std::fmt;

use thiserror::Error;

/// Errors raised while compiling instruction-layer code
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmitError {
    /// The emitter was already built
    #[error("Cannot modify finalized code emitter '{0}'")]
    Finalized(String),

    /// A label was branched to but never marked
    #[error("Label {label} is never marked in '{method}'")]
    UnmarkedLabel {
        /// Method being emitted
        method: String,
        /// Label index
        label: usize,
    },

    /// A label was marked twice
    #[error("Label {0} is already marked")]
    LabelAlreadyMarked(usize),

    /// An instruction popped more values than the stack holds
    #[error("Stack underflow at instruction {position} in '{method}'")]
    StackUnderflow {
        /// Method being emitted
        method: String,
        /// Instruction index
        position: usize,
    },

    /// Protected regions were closed out of order, or left open
    #[error("Unbalanced protected region in '{0}'")]
    UnbalancedRegion(String),

    /// `return` is not allowed inside a try block
    #[error("Return inside a protected region in '{0}'")]
    ReturnInsideProtectedRegion(String),

    /// Reference cannot be used the requested way
    #[error("Invalid reference use: {0}")]
    InvalidReference(String),

    /// A method referenced by the code is not known
    #[error("Unknown method id {0}")]
    UnknownMethod(u32),
}

/// Runtime execution errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VmError {
    /// Call stack grew past the configured limit
    #[error("Stack overflow")]
    StackOverflow,

    /// Operand stack underflow
    #[error("Stack underflow")]
    StackUnderflow,

    /// Member access on a null value
    #[error("Null reference: {0}")]
    NullReference(String),

    /// Conversion between incompatible types
    #[error("Invalid cast: {0}")]
    InvalidCast(String),

    /// The invocation has no target to proceed to
    #[error(
        "The interceptor attempted to 'Proceed' for method '{method}' which has no target. \
         When calling method without target there is no implementation to 'proceed' to and \
         it is the responsibility of the interceptor to mimic the implementation \
         (set return value, out arguments etc)"
    )]
    NoTarget {
        /// Method that was being proceeded
        method: String,
    },

    /// The invocation target was redirected to the proxy itself
    #[error(
        "Target of invocation for method '{method}' has been set to the proxy itself. \
         This may result in recursively calling the method over and over again until \
         stack overflow, which is not supported"
    )]
    TargetIsProxy {
        /// Method that was being proceeded
        method: String,
    },

    /// A value-returning method finished its interceptor chain without a result
    #[error(
        "Interceptors failed to set a return value, or swallowed the exception thrown by the target"
    )]
    MissingReturnValue,

    /// `proceed` was called more times than there are interceptors
    #[error(
        "Cannot proceed past the end of the interception pipeline for method '{0}'. \
         This likely signifies a bug in the calling code"
    )]
    ProceedPastEnd(String),

    /// Abstract method has no body
    #[error("Method '{0}' is abstract and cannot be invoked")]
    AbstractMethod(String),

    /// Method or type could not be resolved
    #[error("Missing member: {0}")]
    MissingMember(String),

    /// Argument count or shape mismatch
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Array index out of range
    #[error("Index {index} is out of range for length {length}")]
    IndexOutOfRange {
        /// Requested index
        index: i64,
        /// Array length
        length: usize,
    },

    /// Explicit `throw` emitted by generated code
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Failure raised by user code (native method bodies, interceptors)
    #[error("{0}")]
    User(String),
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;

/// Which input carried the proxy infrastructure interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictSource {
    /// The proxied type itself
    Target,
    /// One of the mixin instances
    Mixin,
    /// An explicitly requested additional interface
    AdditionalInterface,
}

impl fmt::Display for ConflictSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictSource::Target => write!(f, "target type"),
            ConflictSource::Mixin => write!(f, "mixin"),
            ConflictSource::AdditionalInterface => write!(f, "additional interface"),
        }
    }
}

/// Errors raised by proxy generation requests
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProxyError {
    /// A required argument was null or missing
    #[error("Argument '{0}' must not be null")]
    NullArgument(&'static str),

    /// Open generic definition passed where a closed type is required
    #[error(
        "Can not create proxy for type {0} because it is an open generic type. \
         Supply type arguments for all of its generic parameters"
    )]
    OpenGenericType(String),

    /// Type is not visible to generated code
    #[error(
        "Can not create proxy for type {0} because it is not accessible. \
         Make it public, or enable internals_visible in the scope configuration"
    )]
    InaccessibleType(String),

    /// Interface expected
    #[error("Type {0} is not an interface type")]
    NotAnInterface(String),

    /// Class expected
    #[error("Type {0} is not a class type")]
    NotAClass(String),

    /// Sealed classes cannot be subclassed
    #[error("Can not create proxy for type {0} because it is sealed")]
    SealedType(String),

    /// The alternate base type for interface proxies is unusable
    #[error("Base type {type_name} for proxy is invalid: {reason}")]
    InvalidBaseType {
        /// Offending type
        type_name: String,
        /// What is wrong with it
        reason: String,
    },

    /// The supplied target does not implement the proxied type
    #[error("Target type {target} does not implement {expected}")]
    TargetDoesNotImplement {
        /// Runtime type of the target
        target: String,
        /// Type it was expected to implement
        expected: String,
    },

    /// No base constructor accepts the supplied arguments
    #[error(
        "Can not instantiate proxy of class {type_name}. \
         Could not find a constructor that would match given arguments ({arg_count} supplied)"
    )]
    NoMatchingConstructor {
        /// Class being proxied
        type_name: String,
        /// Number of arguments supplied
        arg_count: usize,
    },

    /// The infrastructure interface was supplied by the caller
    #[error("{}", infrastructure_conflict_message(*.origin, .type_name))]
    InfrastructureConflict {
        /// Where the interface came from
        origin: ConflictSource,
        /// Type that carried it
        type_name: String,
    },

    /// Two mixins implement the same interface
    #[error(
        "The list of mixins contains two mixins implementing the same interface '{interface}': \
         {first} and {second}. An interface cannot be added by more than one mixin"
    )]
    DuplicateMixin {
        /// Shared interface
        interface: String,
        /// First mixin type
        first: String,
        /// Second mixin type
        second: String,
    },

    /// Two members collide even after switching to explicit implementation
    #[error("Duplicate element: {0}")]
    DuplicateElement(String),

    /// A member required by the proxy shape cannot be overridden
    #[error("Member {member} on {type_name} cannot be overridden: {reason}")]
    NotOverridable {
        /// Declaring type
        type_name: String,
        /// Member name
        member: String,
        /// Why
        reason: String,
    },

    /// One-shot value was set twice
    #[error("{0} has already been initialized")]
    AlreadyInitialized(&'static str),

    /// One-shot value was read before being set
    #[error("{0} has not been initialized. Call initialize() first")]
    NotInitialized(&'static str),

    /// A type id or name did not resolve
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// Malformed type definition handed to the builder
    #[error("Invalid type definition for {type_name}: {reason}")]
    InvalidDefinition {
        /// Type being defined
        type_name: String,
        /// What is wrong with it
        reason: String,
    },

    /// Generated code failed to compile
    #[error("Code emission failed: {0}")]
    Emit(#[from] EmitError),

    /// Executing generated or user code failed
    #[error("Execution failed: {0}")]
    Vm(#[from] VmError),

    /// Proxy recipe could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Scope configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Generation result
pub type ProxyResult<T> = Result<T, ProxyError>;

fn infrastructure_conflict_message(source: ConflictSource, type_name: &str) -> String {
    match source {
        ConflictSource::Target => format!(
            "Target type {} implements IProxyTargetAccessor which is a proxy infrastructure \
             interface and you should never implement it yourself. Are you trying to proxy \
             an existing proxy?",
            type_name
        ),
        ConflictSource::Mixin => format!(
            "Mixin type {} implements IProxyTargetAccessor which is a proxy infrastructure \
             interface and you should never implement it yourself. Are you trying to mix in \
             an existing proxy?",
            type_name
        ),
        ConflictSource::AdditionalInterface => format!(
            "You passed {} as one of additional interfaces to proxy which is a proxy \
             infrastructure interface and is implemented by every proxy anyway. Please \
             remove it from the list of additional interfaces to proxy",
            type_name
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_names_source() {
        let err = ProxyError::InfrastructureConflict {
            origin: ConflictSource::Mixin,
            type_name: "Demo.Mixin".to_string(),
        };
        let message = err.to_string();
        assert!(message.starts_with("Mixin type Demo.Mixin"));

        let err = ProxyError::InfrastructureConflict {
            origin: ConflictSource::AdditionalInterface,
            type_name: "DynProxy.IProxyTargetAccessor".to_string(),
        };
        assert!(err.to_string().contains("additional interfaces"));
    }

    #[test]
    fn test_vm_error_converts_into_proxy_error() {
        let err: ProxyError = VmError::MissingReturnValue.into();
        assert!(matches!(err, ProxyError::Vm(VmError::MissingReturnValue)));
    }
}
