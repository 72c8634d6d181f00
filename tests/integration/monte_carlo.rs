//! Monte Carlo error analysis of fitted clusters.

use dispfit_rs::data::AnalysisSession;
use dispfit_rs::minimise::GridOptions;
use dispfit_rs::parameters::{Param, ParamSlot};
use dispfit_rs::uncertainty::{monte_carlo, McMethod, MonteCarloResult};
use dispfit_rs::{
    DispModel, DispersionApi, FittingApi, MinAlgorithm, MinimiseOptions, Processor, SerialProcessor,
    ThreadPoolProcessor,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::test_helpers::{curve_session, synthetic_session, Truth};

fn lm() -> MinimiseOptions {
    MinimiseOptions::new(MinAlgorithm::Lm).with_constraints(false)
}

fn fitted_curves() -> AnalysisSession {
    let mut session = curve_session(1e5, &[12.0, 20.0], 500.0);
    let options = lm().with_grid(GridOptions::new(21));
    DispersionApi::new()
        .minimise(&mut session, &options, &SerialProcessor)
        .unwrap();
    session
}

fn curve_errors<P: Processor>(processor: &P, seed: u64) -> (AnalysisSession, MonteCarloResult) {
    let mut session = fitted_curves();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let result = monte_carlo(
        &DispersionApi::new(),
        &mut session,
        8,
        McMethod::BackCalc,
        &lm(),
        processor,
        &mut rng,
    )
    .unwrap();
    (session, result)
}

#[test]
fn test_curve_errors() {
    let (session, result) = curve_errors(&SerialProcessor, 3);

    let cluster = result.cluster(":5@N").unwrap();
    let names: Vec<&str> = cluster.params.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["r2eff", "i0", "r2eff", "i0"]);
    assert!(cluster.params.iter().all(|p| p.n == 8));

    let spin = session.spin(0).unwrap();
    for point in session.design.point_keys() {
        let error = spin.r2eff_err[&point];
        assert!(error > 0.0 && error < 2.0, "R2eff error {}", error);
        assert_eq!(spin.errors[&ParamSlot::point(Param::R2eff, point)], error);
        assert!(spin.errors[&ParamSlot::point(Param::I0, point)] > 0.0);
    }

    // The best fit itself is left alone.
    assert!(spin.chi2.unwrap() < 1e-6);
}

#[test]
fn test_processors_give_identical_results() {
    let pool = ThreadPoolProcessor::new(Some(4)).unwrap();
    let (_, serial) = curve_errors(&SerialProcessor, 11);
    let (_, parallel) = curve_errors(&pool, 11);
    assert_eq!(serial, parallel);

    let (_, other_seed) = curve_errors(&SerialProcessor, 12);
    assert_ne!(serial, other_seed);
}

#[test]
fn test_cluster_errors() {
    let truths = [
        (":1@N", Truth { r2: [10.0, 12.0], dw: 2.0, pa: 0.9, kex: 1000.0 }),
        (":2@N", Truth { r2: [8.0, 9.0], dw: 1.0, pa: 0.9, kex: 1000.0 }),
    ];
    let mut session = synthetic_session(DispModel::Cr72, &truths, 0.2);
    session.cluster("exchange", &[":1@N", ":2@N"]).unwrap();

    let api = DispersionApi::new();
    api.minimise(&mut session, &lm(), &SerialProcessor).unwrap();

    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    let result = monte_carlo(&api, &mut session, 5, McMethod::BackCalc, &lm(), &SerialProcessor, &mut rng).unwrap();

    let cluster = result.cluster("exchange").unwrap();
    let names: Vec<&str> = cluster.params.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["r2", "r2", "r2", "r2", "dw", "dw", "pA", "kex", "pB", "tex"]
    );

    for spin in session.spins() {
        for param in [Param::Dw, Param::Pa, Param::Kex, Param::Pb, Param::Tex] {
            let error = spin.errors[&ParamSlot::single(param)];
            assert!(error.is_finite() && error > 0.0, "{} error {} on {}", param, error, spin.id);
        }
    }

    // Shared errors agree across the cluster, the per spin ones do not.
    let (a, b) = (session.spin(0).unwrap(), session.spin(1).unwrap());
    assert_eq!(
        a.errors[&ParamSlot::single(Param::Kex)],
        b.errors[&ParamSlot::single(Param::Kex)]
    );
    assert_ne!(
        a.errors[&ParamSlot::single(Param::Dw)],
        b.errors[&ParamSlot::single(Param::Dw)]
    );
}

#[test]
fn test_direct_method_perturbs_measured_data() {
    let mut session = fitted_curves();
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let result = monte_carlo(
        &DispersionApi::new(),
        &mut session,
        4,
        McMethod::Direct,
        &lm(),
        &SerialProcessor,
        &mut rng,
    )
    .unwrap();

    assert_eq!(result.sim_number, 4);
    let spin = session.spin(0).unwrap();
    assert!(!spin.peak_intensity_sim.is_empty());
    assert!(result.cluster(":5@N").unwrap().params.iter().all(|p| p.std.is_some()));
}
