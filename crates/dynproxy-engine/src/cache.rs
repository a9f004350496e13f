//! Generation cache keys

use std::fmt;

use crate::options::ProxyGenerationOptions;
use crate::types::{MethodId, TypeRef, TypeTable};

/// Shape of a generated proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProxyKind {
    /// Subclass of the proxied class, calls proceed to the base implementation
    Class,
    /// Subclass of the proxied class forwarding to a separate target instance
    ClassWithTarget,
    /// Interface implementation forwarding to a fixed target
    InterfaceWithTarget,
    /// Interface implementation whose target can be swapped at run time
    InterfaceWithTargetInterface,
    /// Interface implementation with no target at all
    InterfaceWithoutTarget,
}

impl ProxyKind {
    /// Stable name used in proxy recipes
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyKind::Class => "class",
            ProxyKind::ClassWithTarget => "class-with-target",
            ProxyKind::InterfaceWithTarget => "interface-with-target",
            ProxyKind::InterfaceWithTargetInterface => "interface-with-target-interface",
            ProxyKind::InterfaceWithoutTarget => "interface-without-target",
        }
    }

    /// Inverse of [`as_str`](Self::as_str)
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "class" => ProxyKind::Class,
            "class-with-target" => ProxyKind::ClassWithTarget,
            "interface-with-target" => ProxyKind::InterfaceWithTarget,
            "interface-with-target-interface" => ProxyKind::InterfaceWithTargetInterface,
            "interface-without-target" => ProxyKind::InterfaceWithoutTarget,
            _ => return None,
        })
    }

    /// Whether the proxy derives from the proxied type
    pub fn is_class(self) -> bool {
        matches!(self, ProxyKind::Class | ProxyKind::ClassWithTarget)
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a generation request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Proxy shape
    pub kind: ProxyKind,
    /// Proxied class or interface
    pub target: TypeRef,
    /// Additional interfaces, normalized
    pub interfaces: Vec<TypeRef>,
    /// Runtime type of a fixed target, when it decides which additional
    /// interfaces are forwarded
    pub implementation: Option<TypeRef>,
    /// Generation options
    pub options: ProxyGenerationOptions,
}

impl CacheKey {
    /// Build a key, normalizing the interface list.
    ///
    /// Interfaces the target already implements, and interfaces inherited by
    /// another listed interface, are dropped; the rest is deduplicated and
    /// sorted, so permutations and redundant listings map to one key.
    pub fn new(
        table: &TypeTable,
        kind: ProxyKind,
        target: TypeRef,
        interfaces: &[TypeRef],
        options: ProxyGenerationOptions,
    ) -> Self {
        let mut normalized: Vec<TypeRef> = interfaces
            .iter()
            .filter(|iface| !table.implements(&target, iface))
            .filter(|iface| {
                !interfaces
                    .iter()
                    .any(|other| other != *iface && table.implements(other, iface))
            })
            .cloned()
            .collect();
        normalized.sort();
        normalized.dedup();
        Self {
            kind,
            target,
            interfaces: normalized,
            implementation: None,
            options,
        }
    }

    /// Record the runtime type of the target
    pub fn with_implementation(mut self, implementation: TypeRef) -> Self {
        self.implementation = Some(implementation);
        self
    }
}

/// Identity of a shareable invocation type.
///
/// Only composition invocations whose target cannot change are shared;
/// inheritance and retargetable invocations call back into one particular
/// proxy type and are generated per proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvocationKey {
    /// Intercepted method
    pub method: MethodId,
    /// Declaring type with its type arguments (`IRepo<i32>` and
    /// `IRepo<string>` need different invocation types)
    pub declaring: TypeRef,
    /// Whether calls reach a target
    pub has_target: bool,
    /// Whether the constructor resolves interceptors through a selector
    pub with_selector: bool,
}
