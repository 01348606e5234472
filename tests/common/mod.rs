#![allow(dead_code)]

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use shadercache::{
    CodeGenerator, CompileTarget, CompilerOptions, Diagnostic, Diagnostics, GeneratorContext,
    ShaderBinary, ShaderCompiler, ShaderConfig, ShaderInfo, ShaderPartKey, ShaderProgram,
    ShaderStage, VariantKey,
};

#[derive(Default)]
struct GateState {
    closed: bool,
    waiting: usize,
}

/// Holds optimized builds inside the generator until released.
#[derive(Default)]
struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    fn pass(&self) {
        let mut state = self.state.lock();
        state.waiting += 1;
        self.changed.notify_all();
        while state.closed {
            self.changed.wait(&mut state);
        }
        state.waiting -= 1;
        self.changed.notify_all();
    }
}

#[derive(Default)]
struct MockState {
    identifier: String,
    main_parts: AtomicUsize,
    monolithic: AtomicUsize,
    parts: AtomicUsize,
    contexts: AtomicUsize,
    fail_main_parts: AtomicBool,
    failing: Mutex<Vec<VariantKey>>,
    gate: Gate,
}

/// Deterministic stand-in for a code generator.
///
/// Artifacts encode what was compiled, so tests can tell them apart.
#[derive(Clone)]
pub struct MockGenerator {
    state: Arc<MockState>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::with_identifier("mock-gen-1")
    }

    pub fn with_identifier(identifier: &str) -> Self {
        Self {
            state: Arc::new(MockState {
                identifier: identifier.to_owned(),
                ..MockState::default()
            }),
        }
    }

    pub fn shared(&self) -> Arc<dyn CodeGenerator> {
        Arc::new(self.clone())
    }

    pub fn main_part_compiles(&self) -> usize {
        self.state.main_parts.load(Ordering::SeqCst)
    }

    pub fn monolithic_compiles(&self) -> usize {
        self.state.monolithic.load(Ordering::SeqCst)
    }

    pub fn part_compiles(&self) -> usize {
        self.state.parts.load(Ordering::SeqCst)
    }

    pub fn total_compiles(&self) -> usize {
        self.main_part_compiles() + self.monolithic_compiles() + self.part_compiles()
    }

    pub fn fail_on(&self, key: VariantKey) {
        self.state.failing.lock().push(key);
    }

    pub fn fail_main_parts(&self, fail: bool) {
        self.state.fail_main_parts.store(fail, Ordering::SeqCst);
    }

    /// Optimized builds block until [`release_optimized`](Self::release_optimized).
    pub fn hold_optimized(&self) {
        self.state.gate.state.lock().closed = true;
    }

    pub fn release_optimized(&self) {
        let mut state = self.state.gate.state.lock();
        state.closed = false;
        self.state.gate.changed.notify_all();
    }

    /// Block until `count` optimized builds are parked at the gate.
    pub fn wait_for_held(&self, count: usize) {
        let mut state = self.state.gate.state.lock();
        while state.waiting < count {
            self.state.gate.changed.wait(&mut state);
        }
    }
}

struct MockContext {
    state: Arc<MockState>,
}

fn binary(tag: u8, vgprs: u32, payload: &[&[u8]], text: &str) -> ShaderBinary {
    let mut code = vec![tag];
    for chunk in payload {
        code.extend_from_slice(chunk);
    }
    let config = ShaderConfig {
        num_sgprs: 16,
        num_vgprs: vgprs,
        ..ShaderConfig::default()
    };
    let info = ShaderInfo {
        num_input_sgprs: 2,
        nr_param_exports: 1,
        ..ShaderInfo::default()
    };
    ShaderBinary::new(config, info, code).with_disassembly(text)
}

impl GeneratorContext for MockContext {
    fn compile(
        &mut self,
        program: &ShaderProgram,
        target: CompileTarget<'_>,
    ) -> Result<ShaderBinary, Diagnostics> {
        match target {
            CompileTarget::MainPart { role } => {
                self.state.main_parts.fetch_add(1, Ordering::SeqCst);
                if self.state.fail_main_parts.load(Ordering::SeqCst) {
                    return Err(Diagnostic::error("main part rejected").into());
                }
                Ok(binary(
                    0xA0,
                    8,
                    &[&[role.index() as u8], program.ir()],
                    "; main part",
                ))
            }
            CompileTarget::Monolithic { key, previous } => {
                if key.has_opt() {
                    self.state.gate.pass();
                }
                self.state.monolithic.fetch_add(1, Ordering::SeqCst);
                if self.state.failing.lock().contains(key) {
                    return Err(Diagnostic::error("unsupported state combination")
                        .with_label("mock")
                        .into());
                }
                let previous_ir = previous.map(ShaderProgram::ir).unwrap_or_default();
                Ok(binary(
                    0xB0,
                    if key.has_opt() { 24 } else { 16 },
                    &[program.ir(), previous_ir, &key.to_bytes()],
                    "; monolithic",
                ))
            }
        }
    }

    fn compile_part(&mut self, key: &ShaderPartKey) -> Result<ShaderBinary, Diagnostics> {
        self.state.parts.fetch_add(1, Ordering::SeqCst);
        let vgprs = if key.is_prolog() { 4 } else { 12 };
        Ok(binary(0xC0, vgprs, &[key.name().as_bytes()], key.name()))
    }
}

impl CodeGenerator for MockGenerator {
    fn identifier(&self) -> String {
        self.state.identifier.clone()
    }

    fn create_context(&self) -> Box<dyn GeneratorContext> {
        self.state.contexts.fetch_add(1, Ordering::SeqCst);
        Box::new(MockContext {
            state: Arc::clone(&self.state),
        })
    }
}

/// Asynchronous options without a disk layer.
pub fn options() -> CompilerOptions {
    CompilerOptions {
        sync_compile: false,
        disk_cache: false,
        compiler_threads: 2,
        low_priority_threads: 1,
        ..CompilerOptions::default()
    }
}

pub fn compiler(options: CompilerOptions, generator: &MockGenerator) -> ShaderCompiler {
    ShaderCompiler::new(options, generator.shared()).expect("compiler setup")
}

pub fn program(stage: ShaderStage, body: &str) -> ShaderProgram {
    ShaderProgram::new(stage, body.as_bytes().to_vec()).with_label(body)
}

/// A vertex key that forces a monolithic build.
pub fn mono_key() -> VariantKey {
    let mut key = VariantKey::new(ShaderStage::Vertex);
    key.mono.vs_fix_fetch[0] = 3;
    key
}

/// `base` with performance-only bits set.
pub fn with_opt(base: VariantKey) -> VariantKey {
    let mut key = base;
    key.opt.kill_outputs = 0b100;
    key
}
