//! JSON type manifests
//!
//! A manifest declares source types and the proxies to synthesize for them:
//!
//! ```json
//! {
//!   "types": [
//!     { "name": "Shop.IStore", "kind": "interface",
//!       "methods": [{ "name": "Price", "params": [{ "name": "sku", "type": "string" }], "returns": "f64" }] }
//!   ],
//!   "proxies": [{ "kind": "interface-without-target", "target": "Shop.IStore" }]
//! }
//! ```
//!
//! Type names are primitives (`i32`, `string`, ...), `void`, names declared
//! earlier in the manifest, or any of those suffixed with `[]`. Parameter
//! types may be prefixed with `out ` or `ref `.

use std::path::Path;

use anyhow::{anyhow, bail, Context};
use dynproxy_engine::types::Primitive;
use dynproxy_engine::{
    ModuleScope, MethodBuilder, ProxyGenerationOptions, ProxyGenerator, ProxyKind, ScopeConfig,
    TypeBuilder, TypeRef,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Scope settings; `--config` takes precedence
    #[serde(default)]
    pub config: Option<ScopeConfig>,
    #[serde(default)]
    pub types: Vec<TypeDecl>,
    #[serde(default)]
    pub proxies: Vec<ProxyDecl>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Class,
    Interface,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeDecl {
    pub name: String,
    pub kind: TypeKind,
    #[serde(default)]
    pub sealed: bool,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub implements: Vec<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDecl>,
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodDecl {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
    #[serde(default = "void")]
    pub returns: String,
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
}

fn void() -> String {
    "void".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// One proxy to synthesize
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyDecl {
    /// `class`, `class-with-target`, `interface-with-target`, ...
    pub kind: String,
    pub target: String,
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Concrete target class, required by `interface-with-target`
    #[serde(default)]
    pub implementation: Option<String>,
    #[serde(default)]
    pub base_type: Option<String>,
}

impl Manifest {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        Self::from_json_str(&content).with_context(|| format!("in {}", path.display()))
    }

    pub fn from_json_str(content: &str) -> anyhow::Result<Self> {
        serde_json::from_str(content).context("invalid manifest")
    }

    /// Build a generator over a fresh scope holding every declared type
    pub fn instantiate(&self, config: Option<ScopeConfig>) -> anyhow::Result<ProxyGenerator> {
        let config = config.or_else(|| self.config.clone()).unwrap_or_default();
        let generator = ProxyGenerator::with_scope(ModuleScope::with_config(config)?.into());
        for decl in &self.types {
            let builder = decl.builder(generator.scope())?;
            generator
                .scope()
                .define(builder)
                .with_context(|| format!("failed to define {}", decl.name))?;
            tracing::debug!("defined {}", decl.name);
        }
        Ok(generator)
    }
}

impl TypeDecl {
    fn builder(&self, scope: &ModuleScope) -> anyhow::Result<TypeBuilder> {
        let mut builder = match self.kind {
            TypeKind::Class => TypeBuilder::class(self.name.as_str()),
            TypeKind::Interface => TypeBuilder::interface(self.name.as_str()),
        };
        if self.sealed {
            builder = builder.sealed();
        }
        if self.is_abstract {
            builder = builder.as_abstract();
        }
        if let Some(parent) = &self.extends {
            builder = builder.extends(parse_type(scope, parent)?);
        }
        for iface in &self.implements {
            builder = builder.implements(parse_type(scope, iface)?);
        }
        for property in &self.properties {
            let ty = parse_type(scope, &property.ty)?;
            builder = if property.is_virtual {
                builder.virtual_auto_property(property.name.as_str(), ty)
            } else {
                builder.auto_property(property.name.as_str(), ty)
            };
        }
        for method in &self.methods {
            builder = builder.method(method.builder(scope, self.kind)?);
        }
        Ok(builder)
    }
}

impl MethodDecl {
    fn builder(&self, scope: &ModuleScope, owner: TypeKind) -> anyhow::Result<MethodBuilder> {
        let mut builder = MethodBuilder::new(self.name.as_str());
        for param in &self.params {
            let ty = param.ty.trim();
            builder = if let Some(rest) = ty.strip_prefix("out ") {
                builder.out_param(param.name.as_str(), parse_type(scope, rest)?)
            } else if let Some(rest) = ty.strip_prefix("ref ") {
                builder.ref_param(param.name.as_str(), parse_type(scope, rest)?)
            } else {
                builder.param(param.name.as_str(), parse_type(scope, ty)?)
            };
        }
        let returns = parse_type(scope, &self.returns)?;
        builder = builder.returns(returns.clone());

        if owner == TypeKind::Interface {
            return Ok(builder);
        }
        if self.is_abstract {
            return Ok(builder.as_abstract());
        }
        if self.is_virtual {
            builder = builder.as_virtual();
        }
        // Manifest classes carry no code; every body yields the default value
        Ok(builder.native(move |vm, _| Ok(vm.types().read().default_value(&returns))))
    }
}

impl ProxyDecl {
    pub fn kind(&self) -> anyhow::Result<ProxyKind> {
        ProxyKind::from_name(&self.kind).ok_or_else(|| anyhow!("unknown proxy kind '{}'", self.kind))
    }

    /// Short label used in reports
    pub fn label(&self) -> String {
        if self.interfaces.is_empty() {
            format!("{} {}", self.kind, self.target)
        } else {
            format!("{} {} + {}", self.kind, self.target, self.interfaces.join(", "))
        }
    }

    /// Synthesize (or fetch from the cache) the proxy type
    pub fn synthesize(&self, generator: &ProxyGenerator) -> anyhow::Result<TypeRef> {
        let scope = generator.scope();
        let kind = self.kind()?;
        let target = parse_type(scope, &self.target)?;
        let interfaces = self
            .interfaces
            .iter()
            .map(|name| parse_type(scope, name))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let mut options = ProxyGenerationOptions::default();
        if let Some(base) = &self.base_type {
            options = options.with_base_type(parse_type(scope, base)?);
        }

        let proxy = match kind {
            ProxyKind::Class => generator.create_class_proxy_type(&target, &interfaces, &options),
            ProxyKind::ClassWithTarget => {
                generator.create_class_proxy_type_with_target(&target, &interfaces, &options)
            }
            ProxyKind::InterfaceWithTarget => {
                let Some(implementation) = &self.implementation else {
                    bail!("{} requires an implementation type", self.label());
                };
                let implementation = parse_type(scope, implementation)?;
                generator.create_interface_proxy_type_with_target(
                    &target,
                    &interfaces,
                    &implementation,
                    &options,
                )
            }
            ProxyKind::InterfaceWithTargetInterface => generator
                .create_interface_proxy_type_with_target_interface(&target, &interfaces, &options),
            ProxyKind::InterfaceWithoutTarget => {
                generator.create_interface_proxy_type_without_target(&target, &interfaces, &options)
            }
        }?;
        Ok(proxy)
    }
}

/// Resolve a manifest type name against the scope
pub fn parse_type(scope: &ModuleScope, text: &str) -> anyhow::Result<TypeRef> {
    let text = text.trim();
    if let Some(element) = text.strip_suffix("[]") {
        return Ok(TypeRef::array_of(parse_type(scope, element)?));
    }
    if text == "void" {
        return Ok(TypeRef::Void);
    }
    if let Some(primitive) = Primitive::from_name(text) {
        return Ok(TypeRef::Primitive(primitive));
    }
    scope
        .type_by_name(text)
        .map(|def| TypeRef::named(def.id))
        .ok_or_else(|| anyhow!("unknown type '{}'", text))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STORE: &str = r#"{
        "types": [
            { "name": "Shop.IStore", "kind": "interface",
              "methods": [
                { "name": "Price", "params": [{ "name": "sku", "type": "string" }], "returns": "f64" },
                { "name": "Reserve", "params": [{ "name": "count", "type": "out i32" }] }
              ] },
            { "name": "Shop.Store", "kind": "class", "implements": ["Shop.IStore"],
              "properties": [{ "name": "Owner", "type": "string", "virtual": true }],
              "methods": [
                { "name": "Price", "params": [{ "name": "sku", "type": "string" }], "returns": "f64", "virtual": true },
                { "name": "Reserve", "params": [{ "name": "count", "type": "out i32" }], "virtual": true },
                { "name": "Skus", "returns": "string[]" }
              ] }
        ],
        "proxies": [
            { "kind": "interface-without-target", "target": "Shop.IStore" },
            { "kind": "class", "target": "Shop.Store" },
            { "kind": "interface-with-target", "target": "Shop.IStore", "implementation": "Shop.Store" }
        ]
    }"#;

    #[test]
    fn test_manifest_defines_types() {
        let manifest = Manifest::from_json_str(STORE).unwrap();
        let generator = manifest.instantiate(None).unwrap();
        let scope = generator.scope();
        assert!(scope.type_by_name("Shop.IStore").unwrap().is_interface());
        assert!(scope.type_by_name("Shop.Store").unwrap().is_class());
        assert_eq!(
            parse_type(scope, "Shop.Store[]").unwrap(),
            TypeRef::array_of(TypeRef::named(scope.type_by_name("Shop.Store").unwrap().id))
        );
    }

    #[test]
    fn test_every_declared_proxy_synthesizes() {
        let manifest = Manifest::from_json_str(STORE).unwrap();
        let generator = manifest.instantiate(None).unwrap();
        for proxy in &manifest.proxies {
            let ty = proxy.synthesize(&generator).unwrap();
            assert!(ty.type_id().is_some(), "{}", proxy.label());
        }
        assert_eq!(generator.scope().cached_count(), 3);
    }

    #[test]
    fn test_unknown_names_are_reported() {
        let manifest = Manifest::from_json_str(
            r#"{ "types": [{ "name": "A", "kind": "class", "extends": "Missing" }] }"#,
        )
        .unwrap();
        let err = manifest.instantiate(None).unwrap_err();
        assert!(err.to_string().contains("Missing"));

        let manifest = Manifest::from_json_str(
            r#"{ "proxies": [{ "kind": "sideways", "target": "object" }] }"#,
        )
        .unwrap();
        let generator = manifest.instantiate(None).unwrap();
        let err = manifest.proxies[0].synthesize(&generator).unwrap_err();
        assert!(err.to_string().contains("sideways"));
    }

    #[test]
    fn test_interface_with_target_needs_implementation() {
        let manifest = Manifest::from_json_str(
            r#"{
                "types": [{ "name": "A.IThing", "kind": "interface" }],
                "proxies": [{ "kind": "interface-with-target", "target": "A.IThing" }]
            }"#,
        )
        .unwrap();
        let generator = manifest.instantiate(None).unwrap();
        let err = manifest.proxies[0].synthesize(&generator).unwrap_err();
        assert!(err.to_string().contains("implementation"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, STORE).unwrap();
        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.types.len(), 2);
        assert_eq!(manifest.proxies.len(), 3);

        let err = Manifest::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("absent.json"));
    }
}
