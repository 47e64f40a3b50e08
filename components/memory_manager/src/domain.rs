//! Domains and the runtime modules they own.
//!
//! A `Domain` cell is the GC-visible anchor of compiled code. It owns its
//! [`RuntimeModule`]s through a native slot holding [`DomainModules`]; each
//! module points back at the domain through a [`WeakRef`] that only the
//! domain's weak hook keeps alive. When the domain becomes unreachable its
//! finalizer drops the module list, running each module's delete hook
//! exactly once.

use core_types::layout::DOMAIN_CJS_MODULES;
use core_types::CellKind;

use crate::cell::{CellHandle, HasFinalizer};
use crate::error::{invariant_violation, HeapError};
use crate::heap::Heap;
use crate::native::NativeResource;
use crate::weak_ref::{WeakRef, WeakRefAcceptor};

/// Hook run when a module is deleted, with the module id.
pub type DeleteHook = Box<dyn FnOnce(u32)>;

/// A unit of compiled code owned by a domain.
pub struct RuntimeModule {
    id: u32,
    source_url: String,
    bytecode: Vec<u8>,
    domain: Option<WeakRef>,
    on_delete: Option<DeleteHook>,
}

impl RuntimeModule {
    /// Creates a module not yet attached to a domain.
    pub fn new(id: u32, source_url: impl Into<String>, bytecode: Vec<u8>) -> Self {
        RuntimeModule {
            id,
            source_url: source_url.into(),
            bytecode,
            domain: None,
            on_delete: None,
        }
    }

    /// Installs a hook that runs when the module is deleted.
    pub fn with_delete_hook(mut self, hook: impl FnOnce(u32) + 'static) -> Self {
        self.on_delete = Some(Box::new(hook));
        self
    }

    /// Module id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// URL the module was compiled from.
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Compiled bytecode.
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// The owning domain, if attached and still alive.
    pub fn domain(&self, heap: &Heap) -> Option<CellHandle> {
        self.domain.as_ref().and_then(|weak| heap.get_weak(weak))
    }

    fn mark_weak(&self, acceptor: &mut WeakRefAcceptor<'_>) {
        if let Some(weak) = &self.domain {
            acceptor.accept(weak);
        }
    }
}

impl Drop for RuntimeModule {
    fn drop(&mut self) {
        log::trace!("deleting runtime module {} ({})", self.id, self.source_url);
        if let Some(hook) = self.on_delete.take() {
            hook(self.id);
        }
    }
}

impl std::fmt::Debug for RuntimeModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeModule")
            .field("id", &self.id)
            .field("source_url", &self.source_url)
            .field("bytecode_len", &self.bytecode.len())
            .finish()
    }
}

/// Native payload of a domain: its modules.
#[derive(Debug, Default)]
pub struct DomainModules(Vec<RuntimeModule>);

impl NativeResource for DomainModules {
    fn malloc_size(&self) -> usize {
        self.0.iter().map(|m| m.bytecode.capacity()).sum()
    }
}

/// Operations on `Domain` cells.
pub struct Domain;

impl Domain {
    /// Allocates an empty domain.
    pub fn create(heap: &mut Heap) -> Result<CellHandle, HeapError> {
        let size = CellKind::Domain.metadata().min_size();
        let domain = heap.allocate(CellKind::Domain, size, HasFinalizer::Yes)?;
        heap.attach_native(domain, Box::new(DomainModules::default()));
        log::trace!("created domain {:?}", domain);
        Ok(domain)
    }

    /// Transfers ownership of `module` to `domain`.
    pub fn add_module(heap: &mut Heap, domain: CellHandle, mut module: RuntimeModule) {
        Self::check(heap, domain);
        module.domain = Some(heap.weak_refs.alloc(domain));
        match Self::modules_mut(heap, domain) {
            Some(modules) => modules.0.push(module),
            None => invariant_violation!("domain {:?} has no module list", domain),
        }
    }

    /// Number of modules owned by `domain`.
    pub fn module_count(heap: &Heap, domain: CellHandle) -> usize {
        Self::with_modules(heap, domain, |modules| modules.len())
    }

    /// Calls `f` with the modules owned by `domain`.
    pub fn with_modules<R>(
        heap: &Heap,
        domain: CellHandle,
        f: impl FnOnce(&[RuntimeModule]) -> R,
    ) -> R {
        Self::check(heap, domain);
        let modules = heap
            .native(domain)
            .and_then(|r| r.downcast_ref::<DomainModules>());
        match modules {
            Some(modules) => f(&modules.0),
            None => f(&[]),
        }
    }

    /// Sets the CommonJS module table (an `ArrayStorage`, or `None`).
    pub fn set_cjs_modules(heap: &mut Heap, domain: CellHandle, table: Option<CellHandle>) {
        Self::check(heap, domain);
        if let Some(table) = table {
            if heap.kind_of(table) != CellKind::ArrayStorage {
                invariant_violation!("CommonJS module table must be ArrayStorage");
            }
        }
        heap.set_field(domain, DOMAIN_CJS_MODULES, table);
    }

    /// The CommonJS module table.
    pub fn cjs_modules(heap: &Heap, domain: CellHandle) -> Option<CellHandle> {
        Self::check(heap, domain);
        heap.get_field(domain, DOMAIN_CJS_MODULES)
    }

    /// Weak hook of the `Domain` kind: each module reports its back-reference.
    /// The domain itself is not kept alive by this.
    pub(crate) fn mark_weak_refs(
        domain: CellHandle,
        heap: &Heap,
        acceptor: &mut WeakRefAcceptor<'_>,
    ) {
        let modules = heap
            .native(domain)
            .and_then(|r| r.downcast_ref::<DomainModules>());
        if let Some(modules) = modules {
            for module in &modules.0 {
                module.mark_weak(acceptor);
            }
        }
    }

    fn modules_mut(heap: &mut Heap, domain: CellHandle) -> Option<&mut DomainModules> {
        heap.native_mut(domain)?.downcast_mut::<DomainModules>()
    }

    fn check(heap: &Heap, domain: CellHandle) {
        let kind = heap.kind_of(domain);
        if kind != CellKind::Domain {
            invariant_violation!("expected a Domain, found {} at {:?}", kind, domain);
        }
    }
}
