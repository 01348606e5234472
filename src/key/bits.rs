use serde::{Deserialize, Serialize};

/// Number of vertex attributes a fetch fix-up can be recorded for.
pub const MAX_VERTEX_ATTRIBS: usize = 16;

fn push_bool(out: &mut Vec<u8>, value: bool) {
    out.push(u8::from(value));
}

/// Vertex prolog state shared by the variant key and the prolog key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VsPrologBits {
    /// Inputs whose instance divisor is one (bitmask).
    pub instance_divisor_is_one: u16,
    /// Inputs whose instance divisor is loaded from a constant buffer (bitmask).
    pub instance_divisor_is_fetched: u16,
    pub ls_vgpr_fix: bool,
    pub unpack_instance_id_from_vertex_id: bool,
}

impl VsPrologBits {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.instance_divisor_is_one.to_le_bytes());
        out.extend_from_slice(&self.instance_divisor_is_fetched.to_le_bytes());
        push_bool(out, self.ls_vgpr_fix);
        push_bool(out, self.unpack_instance_id_from_vertex_id);
    }
}

/// Tessellation control epilog state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TcsEpilogBits {
    pub prim_mode: u8,
    pub invoc0_tess_factors_are_def: bool,
    pub tes_reads_tess_factors: bool,
}

impl TcsEpilogBits {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.prim_mode);
        push_bool(out, self.invoc0_tess_factors_are_def);
        push_bool(out, self.tes_reads_tess_factors);
    }
}

/// Geometry prolog state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GsPrologBits {
    pub tri_strip_adj_fix: bool,
    pub prev_is_vs: bool,
}

impl GsPrologBits {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        push_bool(out, self.tri_strip_adj_fix);
        push_bool(out, self.prev_is_vs);
    }
}

/// Fragment prolog state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PsPrologBits {
    pub color_two_side: bool,
    pub flatshade_colors: bool,
    pub poly_stipple: bool,
    pub force_persp_sample_interp: bool,
    pub force_linear_sample_interp: bool,
    pub force_persp_center_interp: bool,
    pub force_linear_center_interp: bool,
    pub bc_optimize_for_persp: bool,
    pub bc_optimize_for_linear: bool,
    pub samplemask_log_ps_iter: u8,
}

impl PsPrologBits {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        let flags = [
            self.color_two_side,
            self.flatshade_colors,
            self.poly_stipple,
            self.force_persp_sample_interp,
            self.force_linear_sample_interp,
            self.force_persp_center_interp,
            self.force_linear_center_interp,
            self.bc_optimize_for_persp,
            self.bc_optimize_for_linear,
        ];
        let packed = flags
            .iter()
            .enumerate()
            .fold(0u16, |acc, (bit, set)| acc | (u16::from(*set) << bit));
        out.extend_from_slice(&packed.to_le_bytes());
        out.push(self.samplemask_log_ps_iter);
    }
}

/// Fragment epilog state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PsEpilogBits {
    pub spi_shader_col_format: u32,
    pub color_is_int8: u8,
    pub color_is_int10: u8,
    pub last_cbuf: u8,
    pub alpha_func: u8,
    pub alpha_to_one: bool,
    pub poly_line_smoothing: bool,
    pub clamp_color: bool,
}

impl PsEpilogBits {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.spi_shader_col_format.to_le_bytes());
        out.push(self.color_is_int8);
        out.push(self.color_is_int10);
        out.push(self.last_cbuf);
        out.push(self.alpha_func);
        push_bool(out, self.alpha_to_one);
        push_bool(out, self.poly_line_smoothing);
        push_bool(out, self.clamp_color);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PsMonoBits {
    pub interpolate_at_sample_force_center: bool,
    pub fbfetch_msaa: bool,
    pub fbfetch_is_1d: bool,
    pub fbfetch_layered: bool,
}

/// States that can only be honoured by compiling the program as one piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MonoFlags {
    /// Attributes whose fetch is open-coded (bitmask).
    pub vs_fetch_opencode: u16,
    /// Per-attribute fetch fix-up code, zero when none is needed.
    pub vs_fix_fetch: [u8; MAX_VERTEX_ATTRIBS],
    /// Outputs a fixed-function tessellation control program copies through.
    pub ff_tcs_inputs_to_copy: u64,
    pub vs_export_prim_id: bool,
    pub ps: PsMonoBits,
}

impl MonoFlags {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.vs_fetch_opencode.to_le_bytes());
        out.extend_from_slice(&self.vs_fix_fetch);
        out.extend_from_slice(&self.ff_tcs_inputs_to_copy.to_le_bytes());
        push_bool(out, self.vs_export_prim_id);
        push_bool(out, self.ps.interpolate_at_sample_force_center);
        push_bool(out, self.ps.fbfetch_msaa);
        push_bool(out, self.ps.fbfetch_is_1d);
        push_bool(out, self.ps.fbfetch_layered);
    }
}

/// Performance-only states. Ignoring them never changes observable results,
/// which is what makes the opt-stripped twin a valid stand-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OptFlags {
    /// Outputs no later stage reads (bitmask of unique output indices).
    pub kill_outputs: u64,
    pub clip_disable: bool,
    /// Has no effect on code; asks for the monolithic build as soon as possible.
    pub prefer_mono: bool,
}

impl OptFlags {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.kill_outputs.to_le_bytes());
        push_bool(out, self.clip_disable);
        push_bool(out, self.prefer_mono);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ps_prolog_flags_pack_into_distinct_bits() {
        let mut a = PsPrologBits::default();
        a.color_two_side = true;
        let mut b = PsPrologBits::default();
        b.bc_optimize_for_linear = true;

        let (mut ea, mut eb) = (Vec::new(), Vec::new());
        a.encode(&mut ea);
        b.encode(&mut eb);
        assert_eq!(ea.len(), eb.len());
        assert_ne!(ea, eb);
    }

    #[test]
    fn fix_fetch_entry_makes_mono_non_zero() {
        let mut mono = MonoFlags::default();
        assert!(mono.is_zero());
        mono.vs_fix_fetch[3] = 2;
        assert!(!mono.is_zero());
    }
}
