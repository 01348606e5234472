//! Variant keys.
//!
//! A [`VariantKey`] captures every run-time state that changes the code a
//! program compiles to. Keys are fixed-size `Copy` values; they are compared
//! and hashed structurally and never normalised.

mod bits;
mod part;

pub use bits::{
    GsPrologBits, MAX_VERTEX_ATTRIBS, MonoFlags, OptFlags, PsEpilogBits, PsMonoBits,
    PsPrologBits, TcsEpilogBits, VsPrologBits,
};
pub use part::ShaderPartKey;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage a program is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    TessCtrl,
    TessEval,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub fn tag(self) -> u8 {
        match self {
            Self::Vertex => 0,
            Self::TessCtrl => 1,
            Self::TessEval => 2,
            Self::Geometry => 3,
            Self::Fragment => 4,
            Self::Compute => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::TessCtrl => "tess_ctrl",
            Self::TessEval => "tess_eval",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hardware stage a program is lowered to.
///
/// A vertex program can run as a plain vertex shader, as the local shader in
/// front of tessellation, as the export shader in front of geometry, or as a
/// primitive shader. Each role needs its own main part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StageRole {
    #[default]
    Default,
    AsLs,
    AsEs,
    AsNgg,
    AsNggEs,
}

impl StageRole {
    pub const COUNT: usize = 5;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Default,
        Self::AsLs,
        Self::AsEs,
        Self::AsNgg,
        Self::AsNggEs,
    ];

    /// Slot index of the main part compiled for this role.
    pub fn index(self) -> usize {
        match self {
            Self::Default => 0,
            Self::AsLs => 1,
            Self::AsEs => 2,
            Self::AsNgg => 3,
            Self::AsNggEs => 4,
        }
    }

    pub fn is_ngg(self) -> bool {
        matches!(self, Self::AsNgg | Self::AsNggEs)
    }

    pub fn is_es(self) -> bool {
        matches!(self, Self::AsEs | Self::AsNggEs)
    }
}

/// Stable identifier of a selector, used by keys that reference a merged
/// previous stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SelectorId(pub u64);

impl fmt::Display for SelectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sel#{}", self.0)
    }
}

/// Prolog and epilog state, tagged by the program's stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartKey {
    Vertex {
        prolog: VsPrologBits,
    },
    TessCtrl {
        /// Prolog of the merged local shader.
        ls_prolog: VsPrologBits,
        /// Merged local shader, if any.
        ls: Option<SelectorId>,
        epilog: TcsEpilogBits,
    },
    TessEval,
    Geometry {
        /// Prolog of the merged export shader.
        vs_prolog: VsPrologBits,
        /// Merged export shader, if any.
        es: Option<SelectorId>,
        prolog: GsPrologBits,
    },
    Fragment {
        prolog: PsPrologBits,
        epilog: PsEpilogBits,
    },
    Compute,
}

impl PartKey {
    /// Empty prolog/epilog state for `stage`.
    pub fn for_stage(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => Self::Vertex {
                prolog: VsPrologBits::default(),
            },
            ShaderStage::TessCtrl => Self::TessCtrl {
                ls_prolog: VsPrologBits::default(),
                ls: None,
                epilog: TcsEpilogBits::default(),
            },
            ShaderStage::TessEval => Self::TessEval,
            ShaderStage::Geometry => Self::Geometry {
                vs_prolog: VsPrologBits::default(),
                es: None,
                prolog: GsPrologBits::default(),
            },
            ShaderStage::Fragment => Self::Fragment {
                prolog: PsPrologBits::default(),
                epilog: PsEpilogBits::default(),
            },
            ShaderStage::Compute => Self::Compute,
        }
    }

    pub fn stage(&self) -> ShaderStage {
        match self {
            Self::Vertex { .. } => ShaderStage::Vertex,
            Self::TessCtrl { .. } => ShaderStage::TessCtrl,
            Self::TessEval => ShaderStage::TessEval,
            Self::Geometry { .. } => ShaderStage::Geometry,
            Self::Fragment { .. } => ShaderStage::Fragment,
            Self::Compute => ShaderStage::Compute,
        }
    }

    /// Selector of the merged previous stage, if this stage has one.
    pub fn previous_stage(&self) -> Option<SelectorId> {
        match self {
            Self::TessCtrl { ls, .. } => *ls,
            Self::Geometry { es, .. } => *es,
            _ => None,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.stage().tag());
        match self {
            Self::Vertex { prolog } => prolog.encode(out),
            Self::TessCtrl {
                ls_prolog,
                ls,
                epilog,
            } => {
                ls_prolog.encode(out);
                encode_selector(*ls, out);
                epilog.encode(out);
            }
            Self::Geometry {
                vs_prolog,
                es,
                prolog,
            } => {
                vs_prolog.encode(out);
                encode_selector(*es, out);
                prolog.encode(out);
            }
            Self::Fragment { prolog, epilog } => {
                prolog.encode(out);
                epilog.encode(out);
            }
            Self::TessEval | Self::Compute => {}
        }
    }
}

fn encode_selector(id: Option<SelectorId>, out: &mut Vec<u8>) {
    match id {
        Some(id) => {
            out.push(1);
            out.extend_from_slice(&id.0.to_le_bytes());
        }
        None => out.push(0),
    }
}

/// Every axis of code-generation variability for one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantKey {
    pub part: PartKey,
    pub role: StageRole,
    /// States the program body must inline; non-zero forces a monolithic build.
    pub mono: MonoFlags,
    /// Performance-only states; a build that ignores them is still correct.
    pub opt: OptFlags,
}

impl VariantKey {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            part: PartKey::for_stage(stage),
            role: StageRole::Default,
            mono: MonoFlags::default(),
            opt: OptFlags::default(),
        }
    }

    pub fn with_role(mut self, role: StageRole) -> Self {
        self.role = role;
        self
    }

    pub fn stage(&self) -> ShaderStage {
        self.part.stage()
    }

    pub fn has_mono(&self) -> bool {
        !self.mono.is_zero()
    }

    pub fn has_opt(&self) -> bool {
        !self.opt.is_zero()
    }

    /// Same key with every optimization bit cleared.
    pub fn without_opt(mut self) -> Self {
        self.opt = OptFlags::default();
        self
    }

    /// Same key with the merged previous-stage reference cleared.
    pub fn without_previous_stage(mut self) -> Self {
        match &mut self.part {
            PartKey::TessCtrl { ls, .. } => *ls = None,
            PartKey::Geometry { es, .. } => *es = None,
            _ => {}
        }
        self
    }

    /// Deterministic byte encoding, used to derive cache digests.
    pub fn encode(&self, out: &mut Vec<u8>) {
        self.part.encode(out);
        out.push(role_tag(self.role));
        self.mono.encode(out);
        self.opt.encode(out);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        self.encode(&mut out);
        out
    }
}

pub(crate) fn role_tag(role: StageRole) -> u8 {
    // index() is stable and dense, so it doubles as the encoded tag
    role.index() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opt_bits_do_not_leak_into_stripped_key() {
        let mut key = VariantKey::new(ShaderStage::Vertex);
        key.opt.kill_outputs = 0b1010;
        key.opt.clip_disable = true;
        assert!(key.has_opt());

        let stripped = key.without_opt();
        assert!(!stripped.has_opt());
        assert_eq!(stripped.part, key.part);
        assert_ne!(stripped, key);
    }

    #[test]
    fn encoding_distinguishes_every_group() {
        let base = VariantKey::new(ShaderStage::Fragment);

        let mut mono = base;
        mono.mono.ps.fbfetch_msaa = true;

        let mut opt = base;
        opt.opt.prefer_mono = true;

        let role = base.with_role(StageRole::AsNgg);

        let encodings = [
            base.to_bytes(),
            mono.to_bytes(),
            opt.to_bytes(),
            role.to_bytes(),
        ];
        for (i, a) in encodings.iter().enumerate() {
            for b in &encodings[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn previous_stage_is_reported_for_merged_stages() {
        let mut key = VariantKey::new(ShaderStage::TessCtrl);
        assert_eq!(key.part.previous_stage(), None);

        if let PartKey::TessCtrl { ls, .. } = &mut key.part {
            *ls = Some(SelectorId(7));
        }
        assert_eq!(key.part.previous_stage(), Some(SelectorId(7)));
        assert_eq!(
            VariantKey::new(ShaderStage::Fragment).part.previous_stage(),
            None
        );
    }
}
