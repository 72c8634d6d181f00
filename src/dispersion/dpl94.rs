//! The Davis, Perlman and London (1994) 2-site fast exchange R1rho model.
//!
//! ```text
//!                                                       sin^2(theta) phi_ex kex
//!   R1rho = R1 cos^2(theta) + R1rho' sin^2(theta) + -----------------------------
//!                                                       kex^2 + omega_e^2
//! ```
//!
//! The effective field is approximated by the spin-lock field omega1.

use super::{catch_blowup, BLOWUP_SENTINEL};

/// Back-calculate the R1rho values for the DPL94 model.
///
/// # Arguments
///
/// * `r1rho_prime` - R1rho in the absence of exchange
/// * `phi_ex` - pA.pB.dw^2 in (rad/s)^2
/// * `kex` - The exchange rate
/// * `theta` - The rotating frame tilt angle per dispersion point
/// * `r1` - The longitudinal relaxation rate
/// * `spin_lock_fields2` - The squared spin-lock field strengths omega1^2
/// * `back_calc` - Output buffer
pub fn r1rho_dpl94(
    r1rho_prime: f64,
    phi_ex: f64,
    kex: f64,
    theta: &[f64],
    r1: f64,
    spin_lock_fields2: &[f64],
    back_calc: &mut [f64],
) {
    // The non-Rex factors, which are also the no-exchange line.
    for (out, &t) in back_calc.iter_mut().zip(theta.iter()) {
        let (sin_t, cos_t) = t.sin_cos();
        *out = r1 * cos_t * cos_t + r1rho_prime * sin_t * sin_t;
    }

    if phi_ex == 0.0 || kex == 0.0 {
        return;
    }

    let kex2 = kex * kex;
    let numer_scale = phi_ex * kex;

    for i in 0..back_calc.len().min(spin_lock_fields2.len()) {
        let denom = kex2 + spin_lock_fields2[i];
        if denom == 0.0 {
            back_calc.iter_mut().for_each(|v| *v = BLOWUP_SENTINEL);
            return;
        }
        let sin_t = theta[i].sin();
        back_calc[i] += sin_t * sin_t * numer_scale / denom;
    }

    catch_blowup(back_calc);
}
