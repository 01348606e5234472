//! The process-scoped compiler service.
//!
//! A [`ShaderCompiler`] owns the binary cache, the prolog/epilog cache, the
//! compile queues and the selector registry. Tests build one per case;
//! nothing here is a global.

mod build;

use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::binary::ShaderBinary;
use crate::cache::{BinaryCache, DiskCache, PersistentStore, ProgramDigest, default_cache_root};
use crate::codegen::CodeGenerator;
use crate::config::CompilerOptions;
use crate::key::{SelectorId, VariantKey};
use crate::runtime::task::{
    CompilerMetrics, CompilerQueues, Fence, FenceState, JobTicket, MetricsSnapshot, Priority,
    QueueConfig, WorkerContext,
};
use crate::select::CompilerSession;
use crate::shader::{PartCache, Selector, SelectorInner, ShaderProgram};
use crate::trace::TraceSink;

pub(crate) use build::build_variant;

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("failed to spawn shader compiler threads: {0}")]
    Spawn(#[from] std::io::Error),
}

/// State shared between the service, its sessions and queued jobs.
pub(crate) struct CompilerShared {
    pub(crate) options: CompilerOptions,
    pub(crate) binaries: BinaryCache,
    pub(crate) parts: PartCache,
    pub(crate) metrics: Arc<CompilerMetrics>,
    sink: Option<Arc<dyn TraceSink>>,
    registry: RwLock<AHashMap<SelectorId, Weak<SelectorInner>>>,
    next_id: AtomicU64,
}

impl CompilerShared {
    /// Live selector registered under `id`.
    pub(crate) fn resolve(&self, id: SelectorId) -> Option<Selector> {
        let inner = self.registry.read().get(&id)?.upgrade()?;
        let selector = Selector::from_inner(inner);
        (!selector.is_destroyed()).then_some(selector)
    }

    pub(crate) fn sink(&self) -> Option<&dyn TraceSink> {
        self.sink.as_deref()
    }

    /// The trace sink, if it may be called from a worker.
    pub(crate) fn async_sink(&self) -> Option<&dyn TraceSink> {
        self.sink().filter(|sink| sink.accepts_async())
    }

    pub(crate) fn finish_binary(&self, mut binary: ShaderBinary) -> ShaderBinary {
        if !self.options.capture_disassembly {
            binary.disassembly = None;
        }
        binary
    }

    /// Insert into the binary cache; persistent failures only cost a
    /// future recompile.
    pub(crate) fn store(&self, digest: ProgramDigest, binary: &Arc<ShaderBinary>) {
        if let Err(err) = self.binaries.insert(digest, binary, true) {
            warn!(%digest, "failed to persist shader binary: {err}");
        }
    }

    fn live_selectors(&self) -> Vec<Selector> {
        self.registry
            .read()
            .values()
            .filter_map(Weak::upgrade)
            .map(Selector::from_inner)
            .collect()
    }
}

pub struct CompilerBuilder {
    options: CompilerOptions,
    generator: Arc<dyn CodeGenerator>,
    store: Option<Arc<dyn PersistentStore>>,
    sink: Option<Arc<dyn TraceSink>>,
}

impl CompilerBuilder {
    /// Use `store` as the persistent layer instead of the configured disk
    /// cache.
    pub fn persistent_store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<ShaderCompiler, SetupError> {
        let options = self.options.clone();
        let metrics = CompilerMetrics::new();

        let mut binaries = BinaryCache::new(self.generator.identifier(), Arc::clone(&metrics));
        if let Some(store) = self.store.or_else(|| open_disk_cache(&options)) {
            binaries = binaries.with_persistent(store);
        }

        let queues = CompilerQueues::new(
            QueueConfig {
                threads: options.compiler_threads,
                low_priority_threads: options.low_priority_threads,
            },
            &self.generator,
            Arc::clone(&metrics),
        )?;

        info!(
            generator = %binaries.generator_id(),
            threads = options.compiler_threads,
            low_priority_threads = options.low_priority_threads,
            persistent = binaries.has_persistent(),
            "shader compiler ready"
        );

        Ok(ShaderCompiler {
            shared: Arc::new(CompilerShared {
                options,
                binaries,
                parts: PartCache::new(),
                metrics,
                sink: self.sink,
                registry: RwLock::new(AHashMap::new()),
                next_id: AtomicU64::new(1),
            }),
            generator: self.generator,
            queues,
        })
    }
}

fn open_disk_cache(options: &CompilerOptions) -> Option<Arc<dyn PersistentStore>> {
    if !options.disk_cache {
        return None;
    }
    let opened = match &options.cache_dir {
        Some(dir) => DiskCache::open(dir.clone()),
        None => default_cache_root().and_then(DiskCache::open),
    };
    match opened {
        Ok(disk) => Some(Arc::new(disk)),
        Err(err) => {
            warn!("persistent shader cache disabled: {err}");
            None
        }
    }
}

/// Compiles and caches shader variants for a set of programs.
pub struct ShaderCompiler {
    shared: Arc<CompilerShared>,
    generator: Arc<dyn CodeGenerator>,
    queues: CompilerQueues,
}

impl ShaderCompiler {
    pub fn new(
        options: CompilerOptions,
        generator: Arc<dyn CodeGenerator>,
    ) -> Result<Self, SetupError> {
        Self::builder(options, generator).build()
    }

    pub fn builder(options: CompilerOptions, generator: Arc<dyn CodeGenerator>) -> CompilerBuilder {
        CompilerBuilder {
            options,
            generator,
            store: None,
            sink: None,
        }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.shared.options
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn binary_cache(&self) -> &BinaryCache {
        &self.shared.binaries
    }

    pub fn part_cache(&self) -> &PartCache {
        &self.shared.parts
    }

    /// A foreground session with its own generator context. One per
    /// calling thread.
    pub fn session(&self) -> CompilerSession<'_> {
        CompilerSession::foreground(&self.shared, &self.queues, self.generator.create_context())
    }

    /// Register a program and start compiling its most likely main part in
    /// the background.
    pub fn define_program(&self, program: ShaderProgram) -> Selector {
        let id = SelectorId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let role = program.default_role(self.shared.options.ngg);
        let selector = Selector::new(id, program, role);
        self.shared
            .registry
            .write()
            .insert(id, selector.downgrade());

        if self.shared.options.monolithic {
            selector.ready_fence().signal(FenceState::Ready);
        } else {
            let shared = Arc::clone(&self.shared);
            let job_selector = selector.clone();
            let ticket = self.queues.add_job(
                Priority::Normal,
                Arc::clone(selector.ready_fence()),
                Box::new(move |ctx: &mut WorkerContext| {
                    build::initial_compile(&shared, ctx, &job_selector)
                }),
            );
            selector.track_job(ticket);
            if self.shared.options.sync_compile {
                selector.ready_fence().wait();
            }
        }

        debug!(
            selector = %id,
            stage = %selector.program().stage(),
            label = selector.program().label().unwrap_or("-"),
            role = ?role,
            digest = %selector.digest(),
            "shader program defined"
        );
        selector
    }

    pub fn lookup_selector(&self, id: SelectorId) -> Option<Selector> {
        self.shared.resolve(id)
    }

    pub fn live_selectors(&self) -> usize {
        self.shared.live_selectors().len()
    }

    /// Build `keys` on the normal queue from a background session.
    pub fn prewarm(&self, selector: &Selector, keys: Vec<VariantKey>) -> Arc<JobTicket> {
        selector.assert_live();
        let shared = Arc::clone(&self.shared);
        let job_selector = selector.clone();
        let ticket = self.queues.add_job(
            Priority::Normal,
            Arc::new(Fence::new()),
            Box::new(move |ctx: &mut WorkerContext| {
                let mut session = CompilerSession::background(&shared, ctx.generator.as_mut());
                let total = keys.len();
                let failed = keys
                    .into_iter()
                    .filter(|key| session.select(&job_selector, *key, false).is_err())
                    .count();
                debug!(selector = %job_selector.id(), total, failed, "prewarm finished");
                if failed == 0 {
                    FenceState::Ready
                } else {
                    FenceState::Failed
                }
            }),
        );
        selector.track_job(Arc::clone(&ticket));
        if self.shared.options.sync_compile {
            ticket.fence().wait();
        }
        ticket
    }

    /// Tear down a program: queued jobs referencing it are dropped and
    /// running ones waited for.
    ///
    /// # Panics
    ///
    /// Destroying the same program twice.
    pub fn destroy_program(&self, selector: Selector) {
        assert!(
            selector.begin_teardown(),
            "shader selector {} destroyed twice",
            selector.id()
        );

        let jobs = selector.take_jobs();
        // cancel everything still queued before waiting, so a worker freed by
        // a finishing job cannot pick up another one of ours
        for ticket in &jobs {
            self.queues.cancel_job(ticket);
        }
        for ticket in &jobs {
            self.queues.drop_job(ticket);
        }
        let variants = selector.variants();
        for variant in &variants {
            variant.wait();
        }

        selector.finish_teardown();
        self.shared.registry.write().remove(&selector.id());
        info!(
            selector = %selector.id(),
            variants = variants.len(),
            jobs = jobs.len(),
            "shader program destroyed"
        );
    }
}

impl Drop for ShaderCompiler {
    fn drop(&mut self) {
        let jobs: Vec<_> = self
            .shared
            .live_selectors()
            .iter()
            .flat_map(Selector::take_jobs)
            .collect();
        for ticket in &jobs {
            self.queues.cancel_job(ticket);
        }
        for ticket in &jobs {
            self.queues.drop_job(ticket);
        }
    }
}
