//! Interface to the code generator.
//!
//! The cache never generates code itself. A [`CodeGenerator`] hands out one
//! [`GeneratorContext`] per compiling thread; contexts are never shared, so
//! parallel compiles cannot observe each other's state.

use crate::binary::ShaderBinary;
use crate::key::{ShaderPartKey, StageRole, VariantKey};
use crate::shader::ShaderProgram;
use crate::utils::errors::Diagnostics;

/// What a compile request produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileTarget<'a> {
    /// The program body alone, lowered for `role`, to be composed with
    /// separately compiled prologs and epilogs.
    MainPart { role: StageRole },
    /// The whole program with every state in `key` inlined, fused with the
    /// merged previous stage if the key names one.
    Monolithic {
        key: &'a VariantKey,
        previous: Option<&'a ShaderProgram>,
    },
}

impl CompileTarget<'_> {
    pub fn role(&self) -> StageRole {
        match self {
            Self::MainPart { role } => *role,
            Self::Monolithic { key, .. } => key.role,
        }
    }
}

/// Factory of per-thread compile contexts.
pub trait CodeGenerator: Send + Sync {
    /// Identifies the generator build; persisted artifacts from a different
    /// identifier are never reused.
    fn identifier(&self) -> String;

    fn create_context(&self) -> Box<dyn GeneratorContext>;
}

/// A single-threaded compile context.
pub trait GeneratorContext: Send {
    fn compile(
        &mut self,
        program: &ShaderProgram,
        target: CompileTarget<'_>,
    ) -> Result<ShaderBinary, Diagnostics>;

    fn compile_part(&mut self, key: &ShaderPartKey) -> Result<ShaderBinary, Diagnostics>;
}
