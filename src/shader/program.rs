use serde::{Deserialize, Serialize};

use crate::key::{ShaderStage, StageRole};

/// One stream-output (transform feedback) binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StreamOutputSlot {
    pub register_index: u8,
    pub start_component: u8,
    pub num_components: u8,
    pub output_buffer: u8,
    pub dst_offset: u16,
    pub stream: u8,
}

/// Stream-output descriptors of a program. They affect the generated code
/// without being part of the program body, so they are hashed separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StreamOutput {
    pub strides: [u16; 4],
    pub outputs: Vec<StreamOutputSlot>,
}

impl StreamOutput {
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.outputs.len() * 7);
        for stride in self.strides {
            out.extend_from_slice(&stride.to_le_bytes());
        }
        out.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for slot in &self.outputs {
            out.push(slot.register_index);
            out.push(slot.start_component);
            out.push(slot.num_components);
            out.push(slot.output_buffer);
            out.extend_from_slice(&slot.dst_offset.to_le_bytes());
            out.push(slot.stream);
        }
        out
    }
}

/// Interface summary the prolog/epilog keys are derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IoMasks {
    pub inputs_read: u64,
    pub outputs_written: u64,
    /// Color components read by a fragment program.
    pub colors_read: u8,
    /// Color buffers written by a fragment program.
    pub colors_written: u8,
    pub writes_z: bool,
    /// Vertex inputs fetched by a vertex program.
    pub num_inputs: u8,
}

/// An abstract shader program, immutable once defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderProgram {
    stage: ShaderStage,
    ir: Vec<u8>,
    stream_output: StreamOutput,
    io: IoMasks,
    next_stage: Option<ShaderStage>,
    label: Option<String>,
}

impl ShaderProgram {
    pub fn new(stage: ShaderStage, ir: impl Into<Vec<u8>>) -> Self {
        Self {
            stage,
            ir: ir.into(),
            stream_output: StreamOutput::default(),
            io: IoMasks::default(),
            next_stage: None,
            label: None,
        }
    }

    pub fn with_stream_output(mut self, stream_output: StreamOutput) -> Self {
        self.stream_output = stream_output;
        self
    }

    pub fn with_io(mut self, io: IoMasks) -> Self {
        self.io = io;
        self
    }

    /// Stage the program is expected to feed, used to guess the role of the
    /// main part compiled at definition time.
    pub fn with_next_stage(mut self, next: ShaderStage) -> Self {
        self.next_stage = Some(next);
        self
    }

    /// Human-readable name for logs and traces. Not part of the digest.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn ir(&self) -> &[u8] {
        &self.ir
    }

    pub fn stream_output(&self) -> &StreamOutput {
        &self.stream_output
    }

    pub fn io(&self) -> &IoMasks {
        &self.io
    }

    pub fn next_stage(&self) -> Option<ShaderStage> {
        self.next_stage
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Deterministic encoding of everything that reaches the code generator.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.ir.len() + 32);
        out.push(self.stage.tag());
        out.extend_from_slice(&(self.ir.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.ir);
        out.extend_from_slice(&self.io.inputs_read.to_le_bytes());
        out.extend_from_slice(&self.io.outputs_written.to_le_bytes());
        out.push(self.io.colors_read);
        out.push(self.io.colors_written);
        out.push(u8::from(self.io.writes_z));
        out.push(self.io.num_inputs);
        out
    }

    /// Best guess at the role this program will be bound in.
    pub fn default_role(&self, ngg: bool) -> StageRole {
        match (self.stage, self.next_stage) {
            (ShaderStage::Vertex, Some(ShaderStage::TessCtrl)) => StageRole::AsLs,
            (ShaderStage::Vertex | ShaderStage::TessEval, Some(ShaderStage::Geometry)) => {
                StageRole::AsEs
            }
            (ShaderStage::Vertex | ShaderStage::TessEval | ShaderStage::Geometry, _) if ngg => {
                StageRole::AsNgg
            }
            _ => StageRole::Default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_does_not_change_serialized_form() {
        let a = ShaderProgram::new(ShaderStage::Fragment, b"body".to_vec());
        let b = a.clone().with_label("named");
        assert_eq!(a.serialize(), b.serialize());
    }

    #[test]
    fn role_guess_follows_next_stage() {
        let vs = ShaderProgram::new(ShaderStage::Vertex, Vec::new());
        assert_eq!(vs.default_role(false), StageRole::Default);
        assert_eq!(vs.default_role(true), StageRole::AsNgg);
        assert_eq!(
            vs.clone()
                .with_next_stage(ShaderStage::TessCtrl)
                .default_role(true),
            StageRole::AsLs
        );

        let tes = ShaderProgram::new(ShaderStage::TessEval, Vec::new())
            .with_next_stage(ShaderStage::Geometry);
        assert_eq!(tes.default_role(true), StageRole::AsEs);

        let fs = ShaderProgram::new(ShaderStage::Fragment, Vec::new());
        assert_eq!(fs.default_role(true), StageRole::Default);
    }

    #[test]
    fn stream_output_bytes_cover_every_slot() {
        let mut so = StreamOutput::default();
        let empty = so.to_bytes();
        so.outputs.push(StreamOutputSlot {
            num_components: 4,
            ..StreamOutputSlot::default()
        });
        assert!(!so.is_empty());
        assert_eq!(so.to_bytes().len(), empty.len() + 7);
    }
}
