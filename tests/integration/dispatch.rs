//! Serial and parallel dispatch of independent cluster fits.

use dispfit_rs::data::AnalysisSession;
use dispfit_rs::parameters::{Param, ParamSlot};
use dispfit_rs::processor::{Command, Memo};
use dispfit_rs::{
    DispModel, DispersionApi, FittingApi, MinAlgorithm, MinimiseOptions, Processor, Result, SerialProcessor,
    ThreadPoolProcessor,
};

use crate::test_helpers::{synthetic_session, Truth};

/// Runs serially, then hands the results back in reverse order.
struct ReversedProcessor;

impl Processor for ReversedProcessor {
    fn name(&self) -> &'static str {
        "reversed"
    }

    fn execute<C, M>(&self, queue: Vec<(C, M)>) -> Vec<(M, Result<C::Output>)>
    where
        C: Command,
        M: Memo<Output = C::Output>,
    {
        let mut results = SerialProcessor.execute(queue);
        results.reverse();
        results
    }
}

fn free_spins() -> AnalysisSession {
    let spins: Vec<(String, Truth)> = (0..6)
        .map(|i| {
            let truth = Truth {
                r2: [8.0 + i as f64, 10.0 + i as f64],
                dw: 0.5 + 0.4 * i as f64,
                pa: 0.95 - 0.02 * i as f64,
                kex: 600.0 + 250.0 * i as f64,
            };
            (format!(":{}@N", i + 1), truth)
        })
        .collect();
    let refs: Vec<(&str, Truth)> = spins.iter().map(|(id, t)| (id.as_str(), *t)).collect();
    let mut session = synthetic_session(DispModel::Cr72, &refs, 0.3);

    // Common starting point away from the truth.
    for index in 0..refs.len() {
        Truth { r2: [12.0, 12.0], dw: 1.0, pa: 0.9, kex: 1200.0 }.apply(session.spin_mut(index).unwrap());
    }
    session
}

fn fitted_values(session: &AnalysisSession) -> Vec<Vec<Option<f64>>> {
    let slots = [
        ParamSlot::field(Param::R2, 0),
        ParamSlot::field(Param::R2, 1),
        ParamSlot::single(Param::Dw),
        ParamSlot::single(Param::Pa),
        ParamSlot::single(Param::Kex),
    ];
    session
        .spins()
        .iter()
        .map(|spin| {
            let mut values: Vec<Option<f64>> = slots.iter().map(|s| spin.param(s).unwrap()).collect();
            values.push(spin.chi2);
            values
        })
        .collect()
}

fn fit_with<P: Processor>(processor: &P) -> Vec<Vec<Option<f64>>> {
    let mut session = free_spins();
    let options = MinimiseOptions::new(MinAlgorithm::Lm).with_constraints(false);
    DispersionApi::new().minimise(&mut session, &options, processor).unwrap();
    fitted_values(&session)
}

#[test]
fn test_thread_pool_matches_serial() {
    let serial = fit_with(&SerialProcessor);
    let pool = ThreadPoolProcessor::new(Some(3)).unwrap();
    let parallel = fit_with(&pool);

    assert_eq!(serial.len(), 6);
    assert!(serial.iter().all(|values| values.iter().all(Option::is_some)));
    assert_eq!(serial, parallel);
}

#[test]
fn test_merge_order_does_not_matter() {
    assert_eq!(fit_with(&SerialProcessor), fit_with(&ReversedProcessor));
}

#[test]
fn test_two_worker_pool() {
    let pool = ThreadPoolProcessor::new(Some(2)).unwrap();
    let mut session = free_spins();
    let options = MinimiseOptions::new(MinAlgorithm::Lm).with_constraints(false);
    DispersionApi::new().minimise(&mut session, &options, &pool).unwrap();
    assert_eq!(fitted_values(&session), fit_with(&SerialProcessor));
    assert_eq!(pool.name(), "thread pool");
}
