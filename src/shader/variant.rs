use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;

use super::Selector;
use crate::binary::ShaderBinary;
use crate::key::VariantKey;
use crate::runtime::task::{Fence, FenceState};
use crate::select::SkipReason;

/// How a key must be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub is_monolithic: bool,
    pub is_optimized: bool,
}

impl Classification {
    /// An optimized build needs the whole program, so opt bits imply a
    /// monolithic build. Global monolithic mode disables background builds.
    pub fn of(key: &VariantKey, global_monolithic: bool) -> Self {
        Self {
            is_monolithic: key.has_mono() || global_monolithic || key.has_opt(),
            is_optimized: !global_monolithic && key.has_opt(),
        }
    }
}

/// One compiled artifact of a selector for one exact key.
///
/// Owned by its selector and never removed before the selector is
/// destroyed. The artifact is published before the fence turns ready.
#[derive(Debug)]
pub struct ShaderVariant {
    key: VariantKey,
    index: usize,
    class: Classification,
    fence: Arc<Fence>,
    artifact: OnceCell<Arc<ShaderBinary>>,
    failure: OnceCell<SkipReason>,
    compile_time: OnceCell<Duration>,
    previous_stage: Option<Selector>,
}

impl ShaderVariant {
    pub(crate) fn new(
        key: VariantKey,
        index: usize,
        class: Classification,
        previous_stage: Option<Selector>,
    ) -> Self {
        Self {
            key,
            index,
            class,
            fence: Arc::new(Fence::new()),
            artifact: OnceCell::new(),
            failure: OnceCell::new(),
            compile_time: OnceCell::new(),
            previous_stage,
        }
    }

    pub fn key(&self) -> &VariantKey {
        &self.key
    }

    /// Position in the owning selector's variant list.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_monolithic(&self) -> bool {
        self.class.is_monolithic
    }

    pub fn is_optimized(&self) -> bool {
        self.class.is_optimized
    }

    pub fn fence(&self) -> &Arc<Fence> {
        &self.fence
    }

    pub fn state(&self) -> FenceState {
        self.fence.state()
    }

    pub fn is_ready(&self) -> bool {
        self.fence.state() == FenceState::Ready
    }

    pub fn is_failed(&self) -> bool {
        self.fence.state() == FenceState::Failed
    }

    /// Block until the build finishes.
    pub fn wait(&self) -> FenceState {
        self.fence.wait()
    }

    /// The compiled artifact, once ready.
    pub fn binary(&self) -> Option<&Arc<ShaderBinary>> {
        self.artifact.get()
    }

    pub fn failure_reason(&self) -> Option<SkipReason> {
        if self.is_failed() {
            Some(self.failure.get().copied().unwrap_or(SkipReason::Cancelled))
        } else {
            None
        }
    }

    pub fn compile_time(&self) -> Option<Duration> {
        self.compile_time.get().copied()
    }

    pub fn previous_stage(&self) -> Option<&Selector> {
        self.previous_stage.as_ref()
    }

    pub(crate) fn publish(&self, binary: Arc<ShaderBinary>, elapsed: Duration) {
        let _ = self.compile_time.set(elapsed);
        let _ = self.artifact.set(binary);
    }

    pub(crate) fn record_failure(&self, reason: SkipReason, elapsed: Duration) {
        let _ = self.compile_time.set(elapsed);
        let _ = self.failure.set(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ShaderStage;

    #[test]
    fn classification_rules() {
        let plain = VariantKey::new(ShaderStage::Vertex);
        assert_eq!(
            Classification::of(&plain, false),
            Classification {
                is_monolithic: false,
                is_optimized: false
            }
        );

        let mut mono = plain;
        mono.mono.vs_export_prim_id = true;
        let class = Classification::of(&mono, false);
        assert!(class.is_monolithic && !class.is_optimized);

        let mut both = mono;
        both.opt.kill_outputs = 1;
        let class = Classification::of(&both, false);
        assert!(class.is_monolithic && class.is_optimized);

        let class = Classification::of(&both, true);
        assert!(class.is_monolithic && !class.is_optimized);
    }

    #[test]
    fn failure_reason_only_after_failed_fence() {
        let variant = ShaderVariant::new(
            VariantKey::new(ShaderStage::Fragment),
            0,
            Classification::of(&VariantKey::new(ShaderStage::Fragment), false),
            None,
        );
        variant.record_failure(SkipReason::CompileFailed, Duration::ZERO);
        assert_eq!(variant.failure_reason(), None);
        variant.fence().signal(FenceState::Failed);
        assert_eq!(variant.failure_reason(), Some(SkipReason::CompileFailed));
    }
}
