use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::CompilerShared;
use crate::binary::ShaderBinary;
use crate::codegen::{CompileTarget, GeneratorContext};
use crate::key::{ShaderPartKey, StageRole};
use crate::runtime::task::{FenceState, WorkerContext};
use crate::select::SkipReason;
use crate::shader::compose::{self, Pieces};
use crate::shader::{Selector, ShaderVariant};
use crate::trace::{BuildKind, CompileRecord, TraceSink};
use crate::utils::errors::emit_diagnostics;

fn elapsed_us(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX)
}

fn record_for(selector: &Selector, kind: BuildKind, start: Instant) -> CompileRecord<'_> {
    CompileRecord {
        selector: Some(selector.id()),
        label: selector.program().label(),
        stage: Some(selector.program().stage()),
        kind,
        key: None,
        part: None,
        elapsed_us: elapsed_us(start),
        cache_hit: false,
        failed: false,
        disassembly: None,
    }
}

fn source_id(selector: &Selector) -> String {
    match selector.program().label() {
        Some(label) => format!("{} ({label})", selector.id()),
        None => selector.id().to_string(),
    }
}

/// Definition-time compile of the guessed main part. Always resolves the
/// selector's ready fence as ready; a missing main part is rebuilt later.
pub(super) fn initial_compile(
    shared: &CompilerShared,
    ctx: &mut WorkerContext,
    selector: &Selector,
) -> FenceState {
    let role = selector.initial_role();
    if ensure_main_part(shared, ctx.generator.as_mut(), selector, role, shared.async_sink())
        .is_none()
    {
        debug!(selector = %selector.id(), ?role, "initial main part unavailable");
    }
    FenceState::Ready
}

/// The main part of `selector` for `role`, compiled under the selector lock
/// if the slot is empty and the binary cache has nothing.
pub(crate) fn ensure_main_part(
    shared: &CompilerShared,
    generator: &mut dyn GeneratorContext,
    selector: &Selector,
    role: StageRole,
    sink: Option<&dyn TraceSink>,
) -> Option<Arc<ShaderBinary>> {
    let mut state = selector.lock_state();
    if let Some(part) = &state.main_parts[role.index()] {
        return Some(Arc::clone(part));
    }

    let start = Instant::now();
    // the lowering depends on the role, so identical IR guessed into
    // different roles must not share an entry
    let digest = selector.digest().for_main_part(role);

    let (binary, cache_hit) = match shared.binaries.lookup(&digest) {
        Some(hit) => (hit, true),
        None => match generator.compile(selector.program(), CompileTarget::MainPart { role }) {
            Ok(binary) => {
                let binary = Arc::new(shared.finish_binary(binary));
                shared.store(digest, &binary);
                (binary, false)
            }
            Err(diagnostics) => {
                drop(state);
                emit_diagnostics(&diagnostics, &source_id(selector));
                if let Some(sink) = sink {
                    sink.record(&CompileRecord {
                        failed: true,
                        ..record_for(selector, BuildKind::MainPart, start)
                    });
                }
                return None;
            }
        },
    };
    state.main_parts[role.index()] = Some(Arc::clone(&binary));
    drop(state);

    debug!(selector = %selector.id(), ?role, cache_hit, "main part ready");
    if let Some(sink) = sink {
        sink.record(&CompileRecord {
            cache_hit,
            disassembly: binary.disassembly.as_deref(),
            ..record_for(selector, BuildKind::MainPart, start)
        });
    }
    Some(binary)
}

fn fetch_part(
    shared: &CompilerShared,
    generator: &mut dyn GeneratorContext,
    key: Option<&ShaderPartKey>,
    sink: Option<&dyn TraceSink>,
) -> Result<Option<Arc<ShaderBinary>>, SkipReason> {
    let Some(key) = key else {
        return Ok(None);
    };
    let start = Instant::now();
    let result = shared.parts.get_or_compile(key, generator, &shared.metrics);

    if let Some(sink) = sink {
        let record = CompileRecord {
            selector: None,
            label: None,
            stage: None,
            kind: BuildKind::Part,
            key: None,
            part: Some(key),
            elapsed_us: elapsed_us(start),
            cache_hit: matches!(result, Ok((_, true))),
            failed: result.is_err(),
            disassembly: None,
        };
        sink.record(&record);
    }

    match result {
        Ok((part, _)) => Ok(Some(part)),
        Err(diagnostics) => {
            emit_diagnostics(&diagnostics, key.name());
            Err(SkipReason::CompileFailed)
        }
    }
}

fn build_monolithic(
    shared: &CompilerShared,
    generator: &mut dyn GeneratorContext,
    selector: &Selector,
    variant: &ShaderVariant,
) -> Result<(Arc<ShaderBinary>, bool), SkipReason> {
    let key = variant.key();
    let previous = variant.previous_stage();
    let digest = selector
        .digest()
        .for_variant(key, previous.map(Selector::digest));
    if let Some(hit) = shared.binaries.lookup(&digest) {
        return Ok((hit, true));
    }

    let target = CompileTarget::Monolithic {
        key,
        previous: previous.map(Selector::program),
    };
    let binary = generator
        .compile(selector.program(), target)
        .map_err(|diagnostics| {
            emit_diagnostics(&diagnostics, &source_id(selector));
            SkipReason::CompileFailed
        })?;
    let binary = Arc::new(shared.finish_binary(binary));
    shared.store(digest, &binary);
    Ok((binary, false))
}

fn build_composed(
    shared: &CompilerShared,
    generator: &mut dyn GeneratorContext,
    selector: &Selector,
    variant: &ShaderVariant,
    sink: Option<&dyn TraceSink>,
) -> Result<Arc<ShaderBinary>, SkipReason> {
    let key = variant.key();
    let main = ensure_main_part(shared, generator, selector, key.role, sink)
        .ok_or(SkipReason::MainPartUnavailable)?;

    let previous = match variant.previous_stage() {
        Some(previous) => {
            let role = compose::previous_stage_role(key);
            let part = ensure_main_part(shared, generator, previous, role, sink)
                .ok_or(SkipReason::MainPartUnavailable)?;
            Some((previous, part))
        }
        None => None,
    };

    let plan = compose::plan_parts(
        key,
        selector.program(),
        previous.as_ref().map(|(previous, _)| previous.program()),
    );
    let previous_prolog = fetch_part(shared, generator, plan.previous_prolog.as_ref(), sink)?;
    let prolog = fetch_part(shared, generator, plan.prolog.as_ref(), sink)?;
    let epilog = fetch_part(shared, generator, plan.epilog.as_ref(), sink)?;

    let pieces = Pieces {
        previous_prolog: previous_prolog.as_deref(),
        previous_main: previous.as_ref().map(|(_, part)| part.as_ref()),
        prolog: prolog.as_deref(),
        main: &main,
        epilog: epilog.as_deref(),
    };
    Ok(Arc::new(compose::combine(
        &pieces,
        shared.options.capture_disassembly,
    )))
}

/// Build `variant` on the calling context and publish its artifact.
///
/// Returns the outcome for the caller to signal on the variant's fence.
pub(crate) fn build_variant(
    shared: &CompilerShared,
    generator: &mut dyn GeneratorContext,
    selector: &Selector,
    variant: &ShaderVariant,
    sink: Option<&dyn TraceSink>,
) -> FenceState {
    let start = Instant::now();
    let (kind, result) = if variant.is_monolithic() {
        (
            BuildKind::Monolithic,
            build_monolithic(shared, generator, selector, variant),
        )
    } else {
        (
            BuildKind::Composed,
            build_composed(shared, generator, selector, variant, sink).map(|binary| (binary, false)),
        )
    };

    let (state, cache_hit) = match &result {
        Ok((binary, cache_hit)) => {
            variant.publish(Arc::clone(binary), start.elapsed());
            (FenceState::Ready, *cache_hit)
        }
        Err(reason) => {
            variant.record_failure(*reason, start.elapsed());
            warn!(
                selector = %selector.id(),
                variant = variant.index(),
                %reason,
                "shader variant failed to build"
            );
            (FenceState::Failed, false)
        }
    };
    shared.metrics.record_variant(result.is_err());
    debug!(
        selector = %selector.id(),
        variant = variant.index(),
        ?kind,
        cache_hit,
        optimized = variant.is_optimized(),
        "shader variant built"
    );

    if let Some(sink) = sink {
        sink.record(&CompileRecord {
            key: Some(variant.key()),
            cache_hit,
            failed: result.is_err(),
            disassembly: result
                .as_ref()
                .ok()
                .and_then(|(binary, _)| binary.disassembly.as_deref()),
            ..record_for(selector, kind, start)
        });
    }
    state
}
