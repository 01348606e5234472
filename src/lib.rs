//! Shader-variant compilation cache.
//!
//! A [`ShaderCompiler`] turns abstract programs plus run-time pipeline state
//! ([`VariantKey`]) into compiled variants. Each distinct key is compiled at
//! most once per program; optimized variants build on a low-priority queue
//! while an unoptimized fallback keeps drawing; identical programs share
//! artifacts through a content-addressed [`BinaryCache`] that can persist
//! across runs.

pub mod binary;
pub mod cache;
pub mod cli;
pub mod codegen;
pub mod compiler;
pub mod config;
pub mod key;
pub mod runtime;
pub mod select;
pub mod shader;
pub mod trace;
pub mod utils;
pub mod version;

pub use binary::{ShaderBinary, ShaderConfig, ShaderInfo};
pub use cache::{BinaryCache, CacheError, DiskCache, PersistentStore, ProgramDigest};
pub use codegen::{CodeGenerator, CompileTarget, GeneratorContext};
pub use compiler::{CompilerBuilder, SetupError, ShaderCompiler};
pub use config::{CompilerOptions, ConfigError};
pub use key::{SelectorId, ShaderPartKey, ShaderStage, StageRole, VariantKey};
pub use runtime::task::{FenceState, MetricsSnapshot};
pub use select::{BoundShader, CompilerSession, Skip, SkipReason, VariantHandle};
pub use shader::{Selector, ShaderProgram, ShaderVariant};
pub use trace::{CompileRecord, TraceSink};
pub use utils::errors::{Diagnostic, Diagnostics};
