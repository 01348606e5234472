use serde::{Deserialize, Serialize};

use super::{GsPrologBits, PsEpilogBits, PsPrologBits, StageRole, TcsEpilogBits, VsPrologBits};

/// Key of a prolog or epilog fragment.
///
/// Fragments depend only on this small key, not on the program they are
/// attached to, so one compiled fragment is shared by every selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderPartKey {
    VsProlog {
        states: VsPrologBits,
        /// Number of vertex inputs the prolog loads.
        num_inputs: u8,
        role: StageRole,
    },
    TcsEpilog {
        states: TcsEpilogBits,
    },
    GsProlog {
        states: GsPrologBits,
        as_ngg: bool,
    },
    PsProlog {
        states: PsPrologBits,
        /// Color components read by the program (bitmask).
        colors_read: u8,
    },
    PsEpilog {
        states: PsEpilogBits,
        /// Color buffers written by the program (bitmask).
        colors_written: u8,
        writes_z: bool,
    },
}

impl ShaderPartKey {
    pub fn is_prolog(&self) -> bool {
        matches!(
            self,
            Self::VsProlog { .. } | Self::GsProlog { .. } | Self::PsProlog { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::VsProlog { .. } => "vs_prolog",
            Self::TcsEpilog { .. } => "tcs_epilog",
            Self::GsProlog { .. } => "gs_prolog",
            Self::PsProlog { .. } => "ps_prolog",
            Self::PsEpilog { .. } => "ps_epilog",
        }
    }
}
