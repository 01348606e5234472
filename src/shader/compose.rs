use crate::binary::ShaderBinary;
use crate::key::{PartKey, ShaderPartKey, ShaderStage, StageRole, VariantKey, VsPrologBits};

use super::ShaderProgram;

/// Prolog and epilog fragments a composed variant needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartPlan {
    pub previous_prolog: Option<ShaderPartKey>,
    pub prolog: Option<ShaderPartKey>,
    pub epilog: Option<ShaderPartKey>,
}

/// Role the merged previous stage's main part is compiled for.
pub fn previous_stage_role(key: &VariantKey) -> StageRole {
    match key.part {
        PartKey::TessCtrl { .. } => StageRole::AsLs,
        _ if key.role.is_ngg() => StageRole::AsNggEs,
        _ => StageRole::AsEs,
    }
}

fn vs_prolog(
    states: VsPrologBits,
    program: &ShaderProgram,
    role: StageRole,
) -> Option<ShaderPartKey> {
    (!states.is_default()).then_some(ShaderPartKey::VsProlog {
        states,
        num_inputs: program.io().num_inputs,
        role,
    })
}

/// Derive fragment keys. Prologs are only used when their states differ
/// from the defaults; tessellation-control and fragment epilogs always are.
pub fn plan_parts(
    key: &VariantKey,
    program: &ShaderProgram,
    previous: Option<&ShaderProgram>,
) -> PartPlan {
    match key.part {
        PartKey::Vertex { prolog } => PartPlan {
            prolog: vs_prolog(prolog, program, key.role),
            ..PartPlan::default()
        },
        PartKey::TessCtrl {
            ls_prolog, epilog, ..
        } => PartPlan {
            previous_prolog: previous
                .and_then(|ls| vs_prolog(ls_prolog, ls, StageRole::AsLs)),
            epilog: Some(ShaderPartKey::TcsEpilog { states: epilog }),
            ..PartPlan::default()
        },
        PartKey::Geometry {
            vs_prolog: es_prolog,
            prolog,
            ..
        } => PartPlan {
            previous_prolog: previous
                .filter(|es| es.stage() == ShaderStage::Vertex)
                .and_then(|es| vs_prolog(es_prolog, es, previous_stage_role(key))),
            prolog: (!prolog.is_default()).then_some(ShaderPartKey::GsProlog {
                states: prolog,
                as_ngg: key.role.is_ngg(),
            }),
            ..PartPlan::default()
        },
        PartKey::Fragment { prolog, epilog } => PartPlan {
            prolog: (!prolog.is_default()).then_some(ShaderPartKey::PsProlog {
                states: prolog,
                colors_read: program.io().colors_read,
            }),
            epilog: Some(ShaderPartKey::PsEpilog {
                states: epilog,
                colors_written: program.io().colors_written,
                writes_z: program.io().writes_z,
            }),
            ..PartPlan::default()
        },
        PartKey::TessEval | PartKey::Compute => PartPlan::default(),
    }
}

/// Compiled pieces of a composed variant, in execution order.
#[derive(Debug, Clone, Copy)]
pub struct Pieces<'a> {
    pub previous_prolog: Option<&'a ShaderBinary>,
    pub previous_main: Option<&'a ShaderBinary>,
    pub prolog: Option<&'a ShaderBinary>,
    pub main: &'a ShaderBinary,
    pub epilog: Option<&'a ShaderBinary>,
}

impl Pieces<'_> {
    fn iter(&self) -> impl Iterator<Item = &ShaderBinary> {
        [
            self.previous_prolog,
            self.previous_main,
            self.prolog,
            Some(self.main),
            self.epilog,
        ]
        .into_iter()
        .flatten()
    }
}

/// Concatenate pieces into one binary.
///
/// Register counts are the maxima over every piece. Spills and scratch
/// merge with the previous stage's main part; everything else comes from
/// the main part.
pub fn combine(pieces: &Pieces<'_>, keep_disassembly: bool) -> ShaderBinary {
    let main = pieces.main;
    let mut config = main.config;
    for piece in pieces.iter() {
        config.num_sgprs = config.num_sgprs.max(piece.config.num_sgprs);
        config.num_vgprs = config.num_vgprs.max(piece.config.num_vgprs);
    }
    if let Some(previous) = pieces.previous_main {
        config.spilled_sgprs = config.spilled_sgprs.max(previous.config.spilled_sgprs);
        config.spilled_vgprs = config.spilled_vgprs.max(previous.config.spilled_vgprs);
        config.scratch_bytes_per_wave = config
            .scratch_bytes_per_wave
            .max(previous.config.scratch_bytes_per_wave);
        config.lds_size = config.lds_size.max(previous.config.lds_size);
    }

    let code_len = pieces.iter().map(ShaderBinary::size).sum();
    let mut code = Vec::with_capacity(code_len);
    for piece in pieces.iter() {
        code.extend_from_slice(&piece.code);
    }

    let mut binary = ShaderBinary::new(config, main.info, code);
    if keep_disassembly {
        let text = pieces
            .iter()
            .filter_map(|piece| piece.disassembly.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        binary = binary.with_disassembly(text);
    }
    binary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::{ShaderConfig, ShaderInfo};
    use crate::key::{PsPrologBits, SelectorId};
    use crate::shader::IoMasks;

    fn piece(sgprs: u32, vgprs: u32, code: &[u8]) -> ShaderBinary {
        let config = ShaderConfig {
            num_sgprs: sgprs,
            num_vgprs: vgprs,
            ..ShaderConfig::default()
        };
        ShaderBinary::new(config, ShaderInfo::default(), code.to_vec())
    }

    #[test]
    fn default_prolog_states_need_no_prolog() {
        let program = ShaderProgram::new(ShaderStage::Vertex, Vec::new());
        let key = VariantKey::new(ShaderStage::Vertex);
        assert_eq!(plan_parts(&key, &program, None), PartPlan::default());

        let mut with_prolog = key;
        with_prolog.part = PartKey::Vertex {
            prolog: VsPrologBits {
                instance_divisor_is_one: 1,
                ..VsPrologBits::default()
            },
        };
        let plan = plan_parts(&with_prolog, &program, None);
        assert!(matches!(plan.prolog, Some(ShaderPartKey::VsProlog { .. })));
        assert!(plan.previous_prolog.is_none() && plan.epilog.is_none());
    }

    #[test]
    fn fragment_epilog_is_always_planned() {
        let program = ShaderProgram::new(ShaderStage::Fragment, Vec::new()).with_io(IoMasks {
            colors_written: 0b11,
            ..IoMasks::default()
        });
        let mut key = VariantKey::new(ShaderStage::Fragment);
        let plan = plan_parts(&key, &program, None);
        assert!(plan.prolog.is_none());
        assert!(matches!(
            plan.epilog,
            Some(ShaderPartKey::PsEpilog {
                colors_written: 0b11,
                ..
            })
        ));

        key.part = PartKey::Fragment {
            prolog: PsPrologBits {
                color_two_side: true,
                ..PsPrologBits::default()
            },
            epilog: Default::default(),
        };
        assert!(plan_parts(&key, &program, None).prolog.is_some());
    }

    #[test]
    fn merged_tcs_plans_ls_prolog() {
        let ls = ShaderProgram::new(ShaderStage::Vertex, Vec::new());
        let tcs = ShaderProgram::new(ShaderStage::TessCtrl, Vec::new());
        let key = VariantKey {
            part: PartKey::TessCtrl {
                ls_prolog: VsPrologBits {
                    ls_vgpr_fix: true,
                    ..VsPrologBits::default()
                },
                ls: Some(SelectorId(1)),
                epilog: Default::default(),
            },
            ..VariantKey::new(ShaderStage::TessCtrl)
        };
        let plan = plan_parts(&key, &tcs, Some(&ls));
        assert!(matches!(
            plan.previous_prolog,
            Some(ShaderPartKey::VsProlog {
                role: StageRole::AsLs,
                ..
            })
        ));
        assert!(plan.epilog.is_some());
        assert_eq!(previous_stage_role(&key), StageRole::AsLs);
    }

    #[test]
    fn combine_orders_code_and_takes_register_maxima() {
        let prolog = piece(10, 4, &[1]);
        let main = piece(20, 8, &[2, 2]);
        let epilog = piece(4, 32, &[3]);
        let combined = combine(
            &Pieces {
                previous_prolog: None,
                previous_main: None,
                prolog: Some(&prolog),
                main: &main,
                epilog: Some(&epilog),
            },
            false,
        );
        assert_eq!(combined.code, vec![1, 2, 2, 3]);
        assert_eq!(combined.config.num_sgprs, 20);
        assert_eq!(combined.config.num_vgprs, 32);
        assert!(combined.disassembly.is_none());
    }
}
