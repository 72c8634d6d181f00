//! The Tollinger et al. (2001) 2-site very-slow exchange CPMG model.
//!
//! Applicable in the limit of slow exchange, when |R2A - R2B| << k_AB and
//! kB << 1/tau_CP:
//!
//! ```text
//!                             sin(dw * tau_CP)
//!   R2eff = R20A + k_AB - k_AB * ----------------
//!                               dw * tau_CP
//! ```
//!
//! with tau_CP = 1 / (4 nu_CPMG).

use super::{catch_blowup, fill};

/// Back-calculate the R2eff values for the TSMFK01 model.
///
/// # Arguments
///
/// * `r20a` - R2 of state A in the absence of exchange
/// * `dw` - Chemical shift difference between states A and B in rad/s
/// * `k_ab` - The forward exchange rate
/// * `tcp` - The tau_CP times, 1 / (4 nu_CPMG)
/// * `back_calc` - Output buffer, one value per dispersion point
pub fn r2eff_tsmfk01(r20a: f64, dw: f64, k_ab: f64, tcp: &[f64], back_calc: &mut [f64]) {
    // No exchange: flat R20A line.
    if dw == 0.0 || k_ab == 0.0 {
        fill(back_calc, r20a);
        return;
    }

    for (out, &t) in back_calc.iter_mut().zip(tcp.iter()) {
        let denom = dw * t;
        let numer = denom.sin();

        // sin(x) == 0 means the sinc term vanishes exactly.
        *out = if numer == 0.0 {
            r20a + k_ab
        } else {
            r20a + k_ab - k_ab * numer / denom
        };
    }

    catch_blowup(back_calc);
}
