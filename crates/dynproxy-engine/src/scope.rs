//! Module scope: the shared type table plus the generation cache
//!
//! Every generated type lives in exactly one scope. Lookups take a read lock
//! on the cache; a miss takes an upgradable read (exclusive among writers and
//! other upgradable readers), checks again and only then generates, so one
//! request shape is never synthesized twice.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use rustc_hash::FxHashMap;
use tracing::{debug, info, trace};

use crate::bootstrap::{self, Infrastructure};
use crate::cache::{CacheKey, InvocationKey};
use crate::config::ScopeConfig;
use crate::dump;
use crate::error::{ProxyError, ProxyResult};
use crate::types::{TypeBuilder, TypeDef, TypeId, TypeRef, TypeTable};
use crate::vm::{SharedTypes, Vm};

/// Everything a generator may touch while the type table is locked
pub(crate) struct GenerationContext<'a> {
    /// The locked type table
    pub types: &'a mut TypeTable,
    /// Built-in member handles
    pub infrastructure: &'a Infrastructure,
    /// Scope settings
    pub config: &'a ScopeConfig,
    /// Shareable invocation types generated so far
    pub invocations: &'a mut FxHashMap<InvocationKey, TypeId>,
}

/// Owner of generated types and the cache that maps requests to them
pub struct ModuleScope {
    types: SharedTypes,
    vm: Vm,
    cache: RwLock<FxHashMap<CacheKey, TypeId>>,
    keys: RwLock<FxHashMap<TypeId, CacheKey>>,
    invocations: Mutex<FxHashMap<InvocationKey, TypeId>>,
    infrastructure: Infrastructure,
    config: ScopeConfig,
}

impl ModuleScope {
    /// Scope with default settings
    pub fn new() -> ProxyResult<Self> {
        Self::with_config(ScopeConfig::default())
    }

    /// Scope with the given settings
    pub fn with_config(config: ScopeConfig) -> ProxyResult<Self> {
        let mut table = TypeTable::new();
        let infrastructure = bootstrap::install(&mut table)?;
        let types: SharedTypes = Arc::new(RwLock::new(table));
        let vm = Vm::new(types.clone()).with_max_depth(config.max_call_depth);
        Ok(Self {
            types,
            vm,
            cache: RwLock::new(FxHashMap::default()),
            keys: RwLock::new(FxHashMap::default()),
            invocations: Mutex::new(FxHashMap::default()),
            infrastructure,
            config,
        })
    }

    /// The shared type table
    pub fn types(&self) -> &SharedTypes {
        &self.types
    }

    /// Interpreter over this scope's types
    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    /// Scope settings
    pub fn config(&self) -> &ScopeConfig {
        &self.config
    }

    /// Handles to the built-in types
    pub fn infrastructure(&self) -> &Infrastructure {
        &self.infrastructure
    }

    /// Register a source type
    pub fn define(&self, builder: TypeBuilder) -> ProxyResult<Arc<TypeDef>> {
        let mut types = self.types.write();
        builder.build(&mut types)
    }

    /// Registered type by full name
    pub fn type_by_name(&self, name: &str) -> Option<Arc<TypeDef>> {
        self.types.read().get_by_name(name)
    }

    /// Display name of a type
    pub fn type_name(&self, ty: &TypeRef) -> String {
        self.types.read().type_name(ty)
    }

    /// Cached proxy type for a request
    pub fn get_from_cache(&self, key: &CacheKey) -> Option<TypeId> {
        self.cache.read().get(key).copied()
    }

    /// Record a generated type. Entries are never replaced or evicted.
    pub fn register_in_cache(&self, key: CacheKey, id: TypeId) {
        let mut cache = self.cache.write();
        if cache.contains_key(&key) {
            return;
        }
        self.keys.write().insert(id, key.clone());
        cache.insert(key, id);
    }

    /// The request a generated proxy type was built for
    pub fn cache_key_of(&self, id: TypeId) -> Option<CacheKey> {
        self.keys.read().get(&id).cloned()
    }

    /// Number of cached proxy types
    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }

    /// Cached type for `key`, generating it on a miss.
    ///
    /// A failed generation is rolled back and leaves the cache untouched.
    pub(crate) fn get_or_generate<F>(&self, key: CacheKey, generate: F) -> ProxyResult<TypeId>
    where
        F: FnOnce(&mut GenerationContext<'_>) -> ProxyResult<TypeId>,
    {
        if let Some(id) = self.get_from_cache(&key) {
            trace!("Cache hit for {} proxy of {}", key.kind, key.target);
            return Ok(id);
        }

        let cache = self.cache.upgradable_read();
        if let Some(id) = cache.get(&key).copied() {
            trace!("Cache hit for {} proxy of {} after upgrade", key.kind, key.target);
            return Ok(id);
        }
        debug!("Cache miss for {} proxy of {}", key.kind, key.target);

        let (id, first_new, end) = {
            let mut types = self.types.write();
            let mut invocations = self.invocations.lock();
            let mark = types.len();
            let mut context = GenerationContext {
                types: &mut types,
                infrastructure: &self.infrastructure,
                config: &self.config,
                invocations: &mut invocations,
            };
            match generate(&mut context) {
                Ok(id) => (id, mark, types.len()),
                Err(err) => {
                    debug!("Generation failed, rolling back: {}", err);
                    invocations.retain(|_, id| id.index() < mark);
                    types.rollback(mark);
                    return Err(err);
                }
            }
        };

        // Static initializers (method tokens) run once the table is unlocked
        let generated: Vec<TypeId> = {
            let types = self.types.read();
            types
                .iter()
                .filter(|def| def.id.index() >= first_new && def.type_initializer.is_some())
                .map(|def| def.id)
                .collect()
        };
        for ty in generated {
            if let Err(err) = self.vm.run_type_initializer(ty) {
                debug!("Type initializer of #{} failed, discarding: {}", ty.0, err);
                self.discard(first_new, end);
                return Err(err.into());
            }
        }

        info!(
            "Generated {} for {} proxy of {}",
            self.type_name(&TypeRef::named(id)),
            key.kind,
            self.type_name(&key.target)
        );
        let mut cache = RwLockUpgradableReadGuard::upgrade(cache);
        self.keys.write().insert(id, key.clone());
        cache.insert(key, id);
        Ok(id)
    }

    /// Undo a generation whose types were registered as `mark..end`.
    ///
    /// Source types defined in the meantime sit above `end` and pin the
    /// range; the generated types then stay in the table but unreachable.
    fn discard(&self, mark: usize, end: usize) {
        let mut types = self.types.write();
        let mut invocations = self.invocations.lock();
        invocations.retain(|_, id| !(mark..end).contains(&id.index()));
        if types.len() == end {
            types.rollback(mark);
        } else {
            debug!("Types were defined after #{}; leaving the generated ones unreferenced", end);
        }
    }

    /// Human-readable listing of a type: fields, members and method bodies
    pub fn dump_type(&self, id: TypeId) -> ProxyResult<String> {
        let types = self.types.read();
        let def = types
            .get(id)
            .ok_or_else(|| ProxyError::UnknownType(format!("#{}", id.0)))?;
        Ok(dump::render_type(&types, &def))
    }
}

impl std::fmt::Debug for ModuleScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleScope")
            .field("types", &self.types.read().len())
            .field("cached", &self.cached_count())
            .field("config", &self.config)
            .finish()
    }
}
