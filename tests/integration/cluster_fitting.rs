//! Cluster fits through the driver.

use approx::assert_relative_eq;
use dispfit_rs::data::{
    AnalysisSession, CurveDesign, CurveType, DataKey, ExpType, ExperimentalDesign, IntensityKey, PointKey, Spin,
};
use dispfit_rs::minimise::GridOptions;
use dispfit_rs::parameters::{default_bounds, loop_parameters, Param, ParamSlot};
use dispfit_rs::{DispModel, DispersionApi, FittingApi, MinAlgorithm, MinimiseOptions, SerialProcessor};

use crate::test_helpers::{curve_session, init_logging, synthesise, synthetic_session, Truth, FIELDS};

const SPIN_A: Truth = Truth {
    r2: [10.0, 12.0],
    dw: 2.0,
    pa: 0.9,
    kex: 1000.0,
};

const SPIN_B: Truth = Truth {
    r2: [8.0, 9.0],
    dw: 1.0,
    pa: 0.9,
    kex: 1000.0,
};

fn cr72_cluster() -> AnalysisSession {
    let mut session = synthetic_session(DispModel::Cr72, &[(":1@N", SPIN_A), (":2@N", SPIN_B)], 0.2);
    session.cluster("exchange", &[":1@N", ":2@N"]).unwrap();
    session
}

fn value(spin: &Spin, slot: ParamSlot) -> f64 {
    spin.param(&slot).unwrap().unwrap()
}

fn lm() -> MinimiseOptions {
    MinimiseOptions::new(MinAlgorithm::Lm).with_constraints(false)
}

#[test]
fn test_cr72_cluster_recovers_parameters() {
    init_logging();
    let mut session = cr72_cluster();
    Truth { r2: [11.0, 13.0], dw: 1.8, pa: 0.88, kex: 1300.0 }.apply(session.spin_mut(0).unwrap());
    Truth { r2: [9.0, 10.0], dw: 1.2, pa: 0.88, kex: 1300.0 }.apply(session.spin_mut(1).unwrap());

    let api = DispersionApi::new();
    api.minimise(&mut session, &lm(), &SerialProcessor).unwrap();

    let a = session.spin(0).unwrap();
    let b = session.spin(1).unwrap();
    let pa = ParamSlot::single(Param::Pa);
    let kex = ParamSlot::single(Param::Kex);
    let dw = ParamSlot::single(Param::Dw);

    assert_relative_eq!(value(a, pa), 0.9, epsilon = 1e-3);
    assert_relative_eq!(value(a, kex), 1000.0, max_relative = 1e-2);
    assert_relative_eq!(value(a, dw), 2.0, max_relative = 1e-2);
    assert_relative_eq!(value(b, dw), 1.0, max_relative = 1e-2);
    assert_relative_eq!(value(b, ParamSlot::field(Param::R2, 1)), 9.0, max_relative = 1e-2);

    // Shared values are written to every spin of the cluster.
    assert_eq!(value(a, pa), value(b, pa));
    assert_eq!(value(a, kex), value(b, kex));
    assert!(a.chi2.unwrap() < 1e-4);
    assert_eq!(a.chi2, b.chi2);
    assert!(a.min_stats.iterations > 0);

    let cluster = session.cluster_loop(true).next().unwrap();
    assert_eq!(cluster.id, "exchange");
    let stats = api.model_statistics(&session, &cluster).unwrap();
    assert_eq!((stats.k, stats.n), (8, 40));

    assert_eq!(api.run_elimination(&mut session).unwrap(), 0);
    assert!(session.spin(0).unwrap().select);
}

#[test]
fn test_constrained_simplex_improves_and_stays_feasible() {
    init_logging();
    let mut session = cr72_cluster();
    for index in 0..2 {
        Truth { r2: [15.0, 15.0], dw: 0.5, pa: 0.6, kex: 5000.0 }.apply(session.spin_mut(index).unwrap());
    }

    let api = DispersionApi::new();
    let start = api.calculate(&mut session, None, None).unwrap()["exchange"];

    let options = MinimiseOptions::default().with_max_iterations(2000);
    api.minimise(&mut session, &options, &SerialProcessor).unwrap();

    let spin = session.spin(0).unwrap();
    let chi2 = spin.chi2.unwrap();
    assert!(chi2 < start, "chi2 {} did not improve on {}", chi2, start);

    let pa = value(spin, ParamSlot::single(Param::Pa));
    assert!((0.5..=1.0).contains(&pa));
    let kex = value(spin, ParamSlot::single(Param::Kex));
    assert!((0.0..=1e6).contains(&kex));
    for field in 0..FIELDS.len() {
        let r2 = value(spin, ParamSlot::field(Param::R2, field));
        assert!((0.0..=200.0).contains(&r2));
    }
}

#[test]
fn test_grid_search_stays_on_lattice_bounds() {
    let mut session = cr72_cluster();
    let api = DispersionApi::new();
    api.grid_search(&mut session, GridOptions::new(3), false, None, &SerialProcessor)
        .unwrap();

    let infos = loop_parameters(DispModel::Cr72, 2, FIELDS.len(), Default::default(), &[]);
    let spins = [session.spin(0).unwrap(), session.spin(1).unwrap()];
    for info in infos {
        let bounds = default_bounds(info.param, None);
        let v = value(spins[info.spin_index], info.slot);
        assert!(
            v >= bounds.min - 1e-9 && v <= bounds.max * (1.0 + 1e-12),
            "{} = {} outside the grid",
            info.param,
            v
        );
    }
    assert!(spins[0].chi2.unwrap().is_finite());
}

#[test]
fn test_lm_rejects_constraints() {
    let mut session = cr72_cluster();
    let options = MinimiseOptions::new(MinAlgorithm::Lm);
    let err = DispersionApi::new()
        .minimise(&mut session, &options, &SerialProcessor)
        .unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn test_exponential_curves() {
    let mut session = curve_session(1e5, &[12.0, 20.0], 100.0);
    let api = DispersionApi::new();
    let options = lm().with_grid(GridOptions::new(21));
    api.minimise(&mut session, &options, &SerialProcessor).unwrap();

    let points = session.design.point_keys();
    let spin = session.spin(0).unwrap();
    for (point, rate) in points.iter().zip([12.0, 20.0]) {
        assert_relative_eq!(spin.r2eff[point], rate, max_relative = 1e-4);
        assert_relative_eq!(spin.i0[point], 1e5, max_relative = 1e-4);
    }
    assert!(spin.chi2.unwrap() < 1e-6);

    let chi2s = api.calculate(&mut session, None, None).unwrap();
    assert!(chi2s[":5@N"] < 1e-6);
}

#[test]
fn test_fixed_time_r2eff_then_no_rex() {
    let mut design = ExperimentalDesign::new(FIELDS.to_vec(), CurveType::Fixed);
    for field in 0..FIELDS.len() {
        design
            .add_curve(
                DataKey::new(ExpType::CpmgSq, field, 0),
                CurveDesign::fixed(vec![100.0, 200.0, 400.0, 800.0], 0.04),
            )
            .unwrap();
    }
    let points = design.point_keys();

    let mut spin = Spin::new(":7@N");
    for point in &points {
        let rate = if point.key.field == 0 { 10.0 } else { 14.0 };
        spin.set_intensity(IntensityKey { point: *point, time: 0 }, 2e5, 1e3);
        spin.set_intensity(IntensityKey { point: *point, time: 1 }, 2e5 * (-rate * 0.04f64).exp(), 1e3);
    }

    let mut session = AnalysisSession::new(design);
    session.add_spin(spin).unwrap();
    session.set_model(DispModel::R2eff).unwrap();

    let api = DispersionApi::new();
    api.calculate(&mut session, None, None).unwrap();
    let first: PointKey = points[0];
    assert_relative_eq!(session.spin(0).unwrap().r2eff[&first], 10.0, max_relative = 1e-12);

    session.set_model(DispModel::NoRex).unwrap();
    api.minimise(&mut session, &lm(), &SerialProcessor).unwrap();
    let spin = session.spin(0).unwrap();
    assert_relative_eq!(value(spin, ParamSlot::field(Param::R2, 0)), 10.0, max_relative = 1e-6);
    assert_relative_eq!(value(spin, ParamSlot::field(Param::R2, 1)), 14.0, max_relative = 1e-6);
}

#[test]
fn test_spins_without_data_are_skipped() {
    let mut session = cr72_cluster();
    session.add_spin(Spin::new(":3@N")).unwrap();
    let api = DispersionApi::new();

    assert_eq!(api.overfit_deselect(&mut session).unwrap(), 1);
    assert!(!session.spin(2).unwrap().select);
    assert_eq!(api.model_loop(&session).count(), 2);
    assert_eq!(session.cluster_loop(true).count(), 1);
}

const SPIN_LOCK_FRQS: [f64; 7] = [500.0, 1000.0, 1500.0, 2000.0, 3000.0, 4500.0, 6000.0];

/// Two off-resonance spins sharing kex, with R1rho data from DPL94.
fn dpl94_cluster(kex: f64) -> AnalysisSession {
    let mut design = ExperimentalDesign::new(FIELDS.to_vec(), CurveType::Fixed);
    for field in 0..FIELDS.len() {
        design
            .add_curve(
                DataKey::new(ExpType::R1rho, field, 0),
                CurveDesign::fixed(SPIN_LOCK_FRQS.to_vec(), 0.1),
            )
            .unwrap();
    }
    let points = design.point_keys();

    let mut session = AnalysisSession::new(design);
    let truths = [(":1@N", [3.0, 3.5], 0.5, [1.5, 1.3]), (":2@N", [2.5, 2.8], 0.2, [1.4, 1.2])];
    for (id, r2, phi_ex, r1) in truths {
        let mut spin = Spin::new(id);
        for (field, (&r2, &r1)) in r2.iter().zip(&r1).enumerate() {
            spin.set_param(&ParamSlot::field(Param::R2, field), r2).unwrap();
            spin.r1.insert(field, r1);
        }
        spin.set_param(&ParamSlot::single(Param::PhiEx), phi_ex).unwrap();
        spin.set_param(&ParamSlot::single(Param::Kex), kex).unwrap();
        for point in &points {
            spin.tilt_angles.insert(*point, 0.8 + 0.08 * point.point as f64);
        }
        session.add_spin(spin).unwrap();
    }
    session.set_model(DispModel::Dpl94).unwrap();
    session.cluster("spin lock", &[":1@N", ":2@N"]).unwrap();
    synthesise(&mut session, 0.05).unwrap();
    session
}

#[test]
fn test_dpl94_cluster_recovers_parameters() {
    let mut session = dpl94_cluster(5000.0);
    for index in 0..2 {
        let spin = session.spin_mut(index).unwrap();
        for field in 0..FIELDS.len() {
            let slot = ParamSlot::field(Param::R2, field);
            let r2 = value(spin, slot);
            spin.set_param(&slot, r2 + 1.0).unwrap();
        }
        let phi_ex = value(spin, ParamSlot::single(Param::PhiEx));
        spin.set_param(&ParamSlot::single(Param::PhiEx), phi_ex * 1.3).unwrap();
        spin.set_param(&ParamSlot::single(Param::Kex), 6500.0).unwrap();
    }

    let api = DispersionApi::new();
    api.minimise(&mut session, &lm(), &SerialProcessor).unwrap();

    let a = session.spin(0).unwrap();
    let b = session.spin(1).unwrap();
    assert_relative_eq!(value(a, ParamSlot::single(Param::Kex)), 5000.0, max_relative = 1e-3);
    assert_relative_eq!(value(a, ParamSlot::single(Param::PhiEx)), 0.5, max_relative = 1e-3);
    assert_relative_eq!(value(b, ParamSlot::single(Param::PhiEx)), 0.2, max_relative = 1e-3);
    assert_relative_eq!(value(a, ParamSlot::field(Param::R2, 1)), 3.5, max_relative = 1e-3);
    assert_relative_eq!(value(b, ParamSlot::field(Param::R2, 0)), 2.5, max_relative = 1e-3);
    assert!(a.chi2.unwrap() < 1e-6);

    let cluster = session.cluster_loop(true).next().unwrap();
    let stats = api.model_statistics(&session, &cluster).unwrap();
    assert_eq!((stats.k, stats.n), (7, 28));
}

#[test]
fn test_dpl94_without_exchange_is_the_tilted_baseline() {
    let mut session = dpl94_cluster(0.0);
    DispersionApi::new().calculate(&mut session, None, None).unwrap();

    for spin in session.spins() {
        for (point, &theta) in &spin.tilt_angles {
            let field = point.key.field;
            let r2 = value(spin, ParamSlot::field(Param::R2, field));
            let baseline = spin.r1[&field] * theta.cos().powi(2) + r2 * theta.sin().powi(2);
            assert_relative_eq!(spin.r2eff_bc[point], baseline, epsilon = 1e-12);
        }
    }
}

#[test]
fn test_dpl94_missing_r1_is_fatal() {
    let mut session = dpl94_cluster(5000.0);
    session.spin_mut(1).unwrap().r1.remove(&1);

    let api = DispersionApi::new();
    let err = api.calculate(&mut session, None, None).unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains(":2@N"), "{}", err);

    let err = api.minimise(&mut session, &lm(), &SerialProcessor).unwrap_err();
    assert!(err.is_fatal());
}
