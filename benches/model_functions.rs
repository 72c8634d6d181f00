//! Benchmarks for the dispersion model functions and the cluster target.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dispfit_rs::data::{CurveDesign, CurveType, DataKey, ExpType, ExperimentalDesign, Spin};
use dispfit_rs::dispersion::cr72::r2eff_cr72;
use dispfit_rs::dispersion::ns_cpmg_2site::r2eff_ns_cpmg_2site;
use dispfit_rs::dispersion::{ppm_to_rad, Integration};
use dispfit_rs::parameters::{assemble_param_vector, loop_parameters, scaling_factors};
use dispfit_rs::target::DispersionTarget;
use dispfit_rs::{DispModel, Problem};

const CPMG_FRQS: [f64; 16] = [
    33.3, 66.7, 100.0, 133.3, 166.7, 200.0, 266.7, 333.3, 400.0, 466.7, 533.3, 600.0, 666.7, 800.0, 933.3,
    1000.0,
];

fn bench_model_functions(c: &mut Criterion) {
    let dw = ppm_to_rad(2.0, 600e6);
    let mut back_calc = vec![0.0; CPMG_FRQS.len()];

    c.bench_function("r2eff_cr72", |b| {
        b.iter(|| {
            r2eff_cr72(10.0, 10.0, 0.9, black_box(dw), black_box(1000.0), &CPMG_FRQS, &mut back_calc);
        })
    });

    for (name, integration) in [
        ("ns_cpmg_2site closed form", Integration::ClosedForm),
        ("ns_cpmg_2site rk4", Integration::Numerical { steps: 20 }),
    ] {
        c.bench_function(name, |b| {
            b.iter(|| {
                r2eff_ns_cpmg_2site(
                    10.0,
                    0.9,
                    black_box(dw),
                    black_box(1000.0),
                    0.04,
                    &CPMG_FRQS,
                    integration,
                    &mut back_calc,
                );
            })
        });
    }
}

fn bench_cluster_target(c: &mut Criterion) {
    let fields = vec![600e6, 800e6];
    let mut design = ExperimentalDesign::new(fields.clone(), CurveType::Fixed);
    for field in 0..fields.len() {
        if design
            .add_curve(
                DataKey::new(ExpType::CpmgSq, field, 0),
                CurveDesign::fixed(CPMG_FRQS.to_vec(), 0.04),
            )
            .is_err()
        {
            return;
        }
    }

    let spins: Vec<Spin> = (0..4)
        .map(|i| {
            let mut spin = Spin::new(format!(":{}@N", i + 1));
            for point in design.point_keys() {
                spin.set_r2eff(point, 12.0 + i as f64, 0.5);
            }
            spin
        })
        .collect();
    let refs: Vec<&Spin> = spins.iter().collect();

    let infos = loop_parameters(DispModel::Cr72, refs.len(), fields.len(), design.curve_shape, &[]);
    let scaling = scaling_factors(&refs, &infos, true);
    let Ok(x0) = assemble_param_vector(&refs, &infos, None) else {
        return;
    };
    let x0 = x0 / &scaling;
    let Ok(target) = DispersionTarget::new(
        DispModel::Cr72,
        Integration::default(),
        &design,
        &refs,
        infos,
        scaling,
        None,
    ) else {
        return;
    };

    c.bench_function("cr72 cluster of 4 chi2", |b| b.iter(|| target.eval_cost(black_box(&x0))));
}

criterion_group!(benches, bench_model_functions, bench_cluster_target);
criterion_main!(benches);
