//! Allocator state shared by every stage of a build.

use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::guid::{default_guid_base, GuidAllocator};
use crate::ids::IdAllocator;
use crate::options::{GuidOptions, IdOptions};

#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    pub ids: IdAllocator,
    pub guids: GuidAllocator,
    /// Base pinned by configuration. Takes precedence over the product's own.
    guid_base: Option<Uuid>,
}

impl BuildContext {
    pub fn new(guid: &GuidOptions) -> Self {
        BuildContext {
            ids: IdAllocator::new(),
            guids: GuidAllocator::new(guid.base.unwrap_or_else(default_guid_base), guid.mode),
            guid_base: guid.base,
        }
    }

    /// GUID base a build starts from: the configured one, else the one derived
    /// from the product, else the built-in default.
    pub fn start_base(&self, product_base: Option<Uuid>) -> Uuid {
        self.guid_base
            .or(product_base)
            .unwrap_or_else(default_guid_base)
    }

    /// Resets identifier state and the GUID base for a fresh build. The
    /// returned message is an allocator-misuse warning; it has already been
    /// logged.
    pub fn begin_build(&mut self, opts: &IdOptions, product_base: Option<Uuid>) -> Option<String> {
        let warning = self
            .ids
            .reset_for_build(opts.do_not_reset, opts.suppress_reset_warning);
        if let Some(msg) = &warning {
            tracing::warn!("{msg}");
        }
        let base = self.start_base(product_base);
        self.guids.set_base(base);
        warning
    }

    /// Clears what a build allocated, whether it succeeded or not.
    pub fn end_build(&mut self, opts: &IdOptions) {
        if !opts.do_not_reset {
            self.ids.reset();
        }
        let base = self.start_base(None);
        self.guids.set_base(base);
    }
}

/// A context shared between threads. Hold the lock for a whole build.
pub type SharedBuildContext = Arc<Mutex<BuildContext>>;

pub fn shared_context(ctx: BuildContext) -> SharedBuildContext {
    Arc::new(Mutex::new(ctx))
}

/// Runs `f` with exclusive access to the shared context. A poisoned lock only
/// means an earlier build panicked; the next build resets the state anyway.
pub fn with_context<T>(shared: &SharedBuildContext, f: impl FnOnce(&mut BuildContext) -> T) -> T {
    let mut guard = shared
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard)
}
