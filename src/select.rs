//! Variant selection, the entry point of the draw path.
//!
//! Each call runs a small state machine: fast path on the bound variant,
//! scan of the selector's list, then build on a miss. Optimized keys that
//! are not ready fall back to the same key with the opt bits cleared, whose
//! build never depends on a background worker.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::codegen::GeneratorContext;
use crate::compiler::{CompilerShared, build_variant};
use crate::key::VariantKey;
use crate::runtime::task::{CompilerQueues, Fence, FenceState, Priority, WorkerContext};
use crate::shader::{Classification, Selector, ShaderVariant};
use crate::trace::TraceSink;

pub type VariantHandle = Arc<ShaderVariant>;

/// Why a draw had to be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// The optimized variant is still compiling and the caller refused to
    /// take the fallback.
    NotReady,
    CompileFailed,
    MainPartUnavailable,
    OutOfMemory,
    /// The build was dropped before it ran.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotReady => "variant not ready",
            Self::CompileFailed => "compile failed",
            Self::MainPartUnavailable => "main part unavailable",
            Self::OutOfMemory => "out of memory",
            Self::Cancelled => "build cancelled",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("draw skipped: {reason}")]
pub struct Skip {
    pub reason: SkipReason,
}

impl From<SkipReason> for Skip {
    fn from(reason: SkipReason) -> Self {
        Self { reason }
    }
}

/// Outcome of one pass of the selection loop.
enum Step {
    Ready(VariantHandle),
    Fallback(VariantKey),
    Blocked(VariantHandle),
    Skip(SkipReason),
}

/// A selector together with the variant last selected for it.
#[derive(Debug, Clone)]
pub struct BoundShader {
    selector: Selector,
    current: Option<VariantHandle>,
}

impl BoundShader {
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            current: None,
        }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn current(&self) -> Option<&VariantHandle> {
        self.current.as_ref()
    }
}

enum GeneratorSlot<'a> {
    Owned(Box<dyn GeneratorContext>),
    Borrowed(&'a mut dyn GeneratorContext),
}

impl GeneratorSlot<'_> {
    fn get(&mut self) -> &mut dyn GeneratorContext {
        match self {
            Self::Owned(generator) => generator.as_mut(),
            Self::Borrowed(generator) => &mut **generator,
        }
    }
}

/// Resolves the fence as failed if a build unwinds before signalling it.
struct FailOnUnwind<'a>(&'a Fence);

impl Drop for FailOnUnwind<'_> {
    fn drop(&mut self) {
        self.0.signal(FenceState::Failed);
    }
}

/// A caller's view of the compiler.
///
/// Foreground sessions belong to draw threads: they wait for definition-time
/// compiles and push optimized builds to the low-priority queue. Background
/// sessions run inside a worker and build everything in place.
pub struct CompilerSession<'a> {
    shared: &'a Arc<CompilerShared>,
    queues: Option<&'a CompilerQueues>,
    generator: GeneratorSlot<'a>,
}

impl<'a> CompilerSession<'a> {
    pub(crate) fn foreground(
        shared: &'a Arc<CompilerShared>,
        queues: &'a CompilerQueues,
        generator: Box<dyn GeneratorContext>,
    ) -> Self {
        Self {
            shared,
            queues: Some(queues),
            generator: GeneratorSlot::Owned(generator),
        }
    }

    pub(crate) fn background(
        shared: &'a Arc<CompilerShared>,
        generator: &'a mut dyn GeneratorContext,
    ) -> Self {
        Self {
            shared,
            queues: None,
            generator: GeneratorSlot::Borrowed(generator),
        }
    }

    pub fn is_background(&self) -> bool {
        self.queues.is_none()
    }

    fn sink(&self) -> Option<&'a dyn TraceSink> {
        if self.is_background() {
            self.shared.async_sink()
        } else {
            self.shared.sink()
        }
    }

    /// Select the variant of `selector` for `key`.
    ///
    /// With `optimized_or_none`, an optimized variant that is still compiling
    /// yields `Skip(NotReady)` instead of the unoptimized fallback.
    ///
    /// # Panics
    ///
    /// If `selector` has been destroyed.
    pub fn select(
        &mut self,
        selector: &Selector,
        key: VariantKey,
        optimized_or_none: bool,
    ) -> Result<VariantHandle, Skip> {
        self.select_from(selector, None, key, optimized_or_none)
    }

    /// Like [`select`](Self::select), using and updating the variant bound
    /// in `bound`.
    pub fn select_bound(
        &mut self,
        bound: &mut BoundShader,
        key: VariantKey,
        optimized_or_none: bool,
    ) -> Result<VariantHandle, Skip> {
        let selected =
            self.select_from(&bound.selector, bound.current.as_ref(), key, optimized_or_none)?;
        bound.current = Some(Arc::clone(&selected));
        Ok(selected)
    }

    fn select_from(
        &mut self,
        selector: &Selector,
        current: Option<&VariantHandle>,
        mut key: VariantKey,
        optimized_or_none: bool,
    ) -> Result<VariantHandle, Skip> {
        selector.assert_live();
        loop {
            if !self.is_background() {
                selector.ready_fence().wait();
            }
            match self.step(selector, current, &key, optimized_or_none) {
                Step::Ready(variant) => return Ok(variant),
                Step::Fallback(stripped) => {
                    debug!(selector = %selector.id(), "falling back to unoptimized variant");
                    key = stripped;
                }
                Step::Blocked(variant) => {
                    return match variant.wait() {
                        FenceState::Ready => Ok(variant),
                        _ => Err(failure_of(&variant).into()),
                    };
                }
                Step::Skip(reason) => return Err(reason.into()),
            }
        }
    }

    fn step(
        &mut self,
        selector: &Selector,
        current: Option<&VariantHandle>,
        key: &VariantKey,
        optimized_or_none: bool,
    ) -> Step {
        if let Some(current) = current
            && current.key() == key
        {
            return resolve_existing(current, key, optimized_or_none);
        }

        let variant = {
            let mut state = selector.lock_state();
            if let Some(found) = state.find(key, current) {
                drop(state);
                return resolve_existing(&found, key, optimized_or_none);
            }

            let previous = match key.part.previous_stage() {
                Some(id) => match self.shared.resolve(id) {
                    Some(previous) => Some(previous),
                    None => {
                        warn!(selector = %selector.id(), previous = %id, "previous stage is not live");
                        return Step::Skip(SkipReason::MainPartUnavailable);
                    }
                },
                None => None,
            };
            let class = Classification::of(key, self.shared.options.monolithic);
            // appended while still holding the lock that performed the scan,
            // so a concurrent miss on the same key finds this entry
            match state.try_append(|index| ShaderVariant::new(*key, index, class, previous)) {
                Ok(variant) => variant,
                Err(err) => {
                    error!(selector = %selector.id(), "cannot allocate shader variant: {err}");
                    return Step::Skip(SkipReason::OutOfMemory);
                }
            }
        };

        if variant.is_optimized()
            && let Some(queues) = self.queues
        {
            self.enqueue_optimized(queues, selector, &variant);
            if optimized_or_none {
                return Step::Skip(SkipReason::NotReady);
            }
            return Step::Fallback(key.without_opt());
        }

        let guard = FailOnUnwind(variant.fence());
        let sink = self.sink();
        let state = build_variant(self.shared, self.generator.get(), selector, &variant, sink);
        variant.fence().signal(state);
        drop(guard);

        match state {
            FenceState::Ready => Step::Ready(variant),
            _ => Step::Skip(failure_of(&variant)),
        }
    }

    fn enqueue_optimized(
        &self,
        queues: &CompilerQueues,
        selector: &Selector,
        variant: &VariantHandle,
    ) {
        let shared = Arc::clone(self.shared);
        let job_selector = selector.clone();
        let job_variant = Arc::clone(variant);
        let ticket = queues.add_job(
            Priority::Low,
            Arc::clone(variant.fence()),
            Box::new(move |ctx: &mut WorkerContext| {
                build_variant(
                    &shared,
                    ctx.generator.as_mut(),
                    &job_selector,
                    &job_variant,
                    shared.async_sink(),
                )
            }),
        );
        debug!(
            selector = %selector.id(),
            variant = variant.index(),
            job = ?ticket.id(),
            "optimized variant queued"
        );
        selector.track_job(ticket);

        if self.shared.options.sync_compile {
            variant.wait();
        }
    }
}

fn failure_of(variant: &ShaderVariant) -> SkipReason {
    variant.failure_reason().unwrap_or(SkipReason::CompileFailed)
}

fn resolve_existing(variant: &VariantHandle, key: &VariantKey, optimized_or_none: bool) -> Step {
    match variant.state() {
        FenceState::Ready => Step::Ready(Arc::clone(variant)),
        FenceState::Failed => Step::Skip(failure_of(variant)),
        FenceState::Pending if variant.is_optimized() => {
            if optimized_or_none {
                Step::Skip(SkipReason::NotReady)
            } else {
                Step::Fallback(key.without_opt())
            }
        }
        FenceState::Pending => Step::Blocked(Arc::clone(variant)),
    }
}
