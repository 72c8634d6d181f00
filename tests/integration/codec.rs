//! Parameter vector codec round trips over multi-spin clusters.

use approx::assert_relative_eq;
use dispfit_rs::data::{CurveShape, Spin};
use dispfit_rs::parameters::{
    assemble_param_vector, aux_params, disassemble_param_vector, linear_constraints, loop_parameters,
    param_index_to_param_info, param_names, param_num, scaling_factors, Param, ParamSlot,
};
use dispfit_rs::DispModel;

use crate::test_helpers::Truth;

fn cluster_spins() -> Vec<Spin> {
    let truths = [
        Truth { r2: [10.0, 12.0], dw: 2.0, pa: 0.85, kex: 1500.0 },
        Truth { r2: [8.0, 9.5], dw: 0.7, pa: 0.85, kex: 1500.0 },
        Truth { r2: [14.0, 16.0], dw: 3.1, pa: 0.85, kex: 1500.0 },
    ];
    truths
        .iter()
        .enumerate()
        .map(|(i, truth)| {
            let mut spin = Spin::new(format!(":{}@N", i + 1));
            truth.apply(&mut spin);
            spin
        })
        .collect()
}

#[test]
fn test_cluster_layout() {
    let infos = loop_parameters(DispModel::Cr72, 3, 2, CurveShape::Decay, &[]);
    assert_eq!(param_num(&infos), 11);
    assert_eq!(
        param_names(&infos),
        vec!["r2", "r2", "r2", "r2", "r2", "r2", "dw", "dw", "dw", "pA", "kex"]
    );

    let dw = param_index_to_param_info(7, &infos).unwrap();
    assert_eq!(dw.param, Param::Dw);
    assert_eq!(dw.spin_index, 1);
    assert!(!dw.is_shared());
    assert!(param_index_to_param_info(9, &infos).unwrap().is_shared());
    assert!(param_index_to_param_info(11, &infos).is_err());

    assert_eq!(aux_params(DispModel::Cr72), vec![Param::Pb, Param::Tex]);
    assert!(aux_params(DispModel::Tsmfk01).is_empty());
}

#[test]
fn test_scaled_round_trip() {
    let spins = cluster_spins();
    let refs: Vec<&Spin> = spins.iter().collect();
    let infos = loop_parameters(DispModel::Cr72, 3, 2, CurveShape::Decay, &[]);

    let scaling = scaling_factors(&refs, &infos, true);
    assert_eq!(scaling[0], 10.0);
    assert_eq!(scaling[6], 1.0);
    assert_eq!(scaling[10], 10000.0);

    let scaled = assemble_param_vector(&refs, &infos, None).unwrap() / &scaling;
    assert_relative_eq!(scaled[10], 0.15, epsilon = 1e-15);
    assert!(linear_constraints(&infos, &scaling).is_interior(&scaled));

    let mut fresh: Vec<Spin> = (1..=3).map(|i| Spin::new(format!(":{}@N", i))).collect();
    let mut targets: Vec<&mut Spin> = fresh.iter_mut().collect();
    disassemble_param_vector(&mut targets, &infos, &(&scaled * &scaling), None).unwrap();

    for (original, copy) in spins.iter().zip(&fresh) {
        for info in &infos {
            let slot = info.slot;
            assert_relative_eq!(
                copy.param(&slot).unwrap().unwrap(),
                original.param(&slot).unwrap().unwrap(),
                max_relative = 1e-14
            );
        }
        // Derived from the shared values written to every spin.
        assert_relative_eq!(copy.param(&ParamSlot::single(Param::Pb)).unwrap().unwrap(), 0.15, epsilon = 1e-14);
        assert_relative_eq!(
            copy.param(&ParamSlot::single(Param::Tex)).unwrap().unwrap(),
            1.0 / 1500.0,
            max_relative = 1e-14
        );
    }
}

#[test]
fn test_simulation_round_trip() {
    let mut spins = cluster_spins();
    let infos = loop_parameters(DispModel::Cr72, 3, 2, CurveShape::Decay, &[]);
    for spin in &mut spins {
        for info in &infos {
            let value = spin.param(&info.slot).unwrap().unwrap();
            spin.sims.init(info.slot, value, 4);
        }
    }

    let mut values = {
        let refs: Vec<&Spin> = spins.iter().collect();
        assemble_param_vector(&refs, &infos, Some(2)).unwrap()
    };
    values[9] = 0.95;
    values[10] = 800.0;

    let mut targets: Vec<&mut Spin> = spins.iter_mut().collect();
    disassemble_param_vector(&mut targets, &infos, &values, Some(2)).unwrap();

    let pa = ParamSlot::single(Param::Pa);
    for spin in &spins {
        assert_eq!(spin.sims.get(&pa, 2), Some(0.95));
        assert_eq!(spin.sims.get(&pa, 1), Some(0.85));
        assert_eq!(spin.sims.get(&ParamSlot::single(Param::Kex), 2), Some(800.0));
        // The best fit is untouched.
        assert_eq!(spin.param(&pa).unwrap(), Some(0.85));
    }
}

#[test]
fn test_defaults_fill_missing_values() {
    let spin = Spin::new(":1@N");
    let infos = loop_parameters(DispModel::Tsmfk01, 1, 1, CurveShape::Decay, &[]);
    let values = assemble_param_vector(&[&spin], &infos, None).unwrap();
    assert_eq!(values.to_vec(), vec![15.0, 0.0, 10000.0]);
}
