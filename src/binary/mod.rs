//! Compiled artifacts.

mod codec;

pub use codec::{CodecError, HEADER_SIZE, decode, encode};

use serde::{Deserialize, Serialize};

/// Register and memory configuration of a compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShaderConfig {
    pub num_sgprs: u32,
    pub num_vgprs: u32,
    pub spilled_sgprs: u32,
    pub spilled_vgprs: u32,
    pub scratch_bytes_per_wave: u32,
    pub lds_size: u32,
    pub float_mode: u32,
}

/// Interface metadata the register-emission layer consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShaderInfo {
    pub num_input_sgprs: u8,
    pub num_input_vgprs: u8,
    pub uses_instanceid: bool,
    pub nr_pos_exports: u8,
    pub nr_param_exports: u8,
    pub private_mem_vgprs: u32,
    pub max_simd_waves: u32,
}

/// Machine code plus everything needed to bind it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ShaderBinary {
    pub config: ShaderConfig,
    pub info: ShaderInfo,
    #[serde(skip)]
    pub code: Vec<u8>,
    pub disassembly: Option<String>,
}

impl ShaderBinary {
    pub fn new(config: ShaderConfig, info: ShaderInfo, code: Vec<u8>) -> Self {
        Self {
            config,
            info,
            code,
            disassembly: None,
        }
    }

    /// Attach generated-code text. Empty text is treated as absent.
    pub fn with_disassembly(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.disassembly = (!text.is_empty()).then_some(text);
        self
    }

    pub fn size(&self) -> usize {
        self.code.len()
    }
}
