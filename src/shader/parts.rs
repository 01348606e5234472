use ahash::AHashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::binary::ShaderBinary;
use crate::codegen::GeneratorContext;
use crate::key::ShaderPartKey;
use crate::runtime::task::CompilerMetrics;
use crate::utils::errors::Diagnostics;

/// Process-wide table of compiled prologs and epilogs.
///
/// Fragments are keyed only by their own small key, so every selector shares
/// them. Compiles happen under the table lock, which makes each key compile
/// at most once. Failures are not remembered.
#[derive(Default)]
pub struct PartCache {
    parts: Mutex<AHashMap<ShaderPartKey, Arc<ShaderBinary>>>,
}

impl PartCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ShaderPartKey) -> Option<Arc<ShaderBinary>> {
        self.parts.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.parts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.lock().is_empty()
    }

    /// Returns the cached fragment and whether it was already present.
    pub(crate) fn get_or_compile(
        &self,
        key: &ShaderPartKey,
        generator: &mut dyn GeneratorContext,
        metrics: &CompilerMetrics,
    ) -> Result<(Arc<ShaderBinary>, bool), Diagnostics> {
        let mut parts = self.parts.lock();
        if let Some(part) = parts.get(key) {
            return Ok((Arc::clone(part), true));
        }

        let part = Arc::new(generator.compile_part(key)?);
        parts.insert(*key, Arc::clone(&part));
        metrics.record_part();
        debug!(part = key.name(), size = part.size(), "shader part compiled");
        Ok((part, false))
    }
}
