//! The Meiboom (1961) on-resonance 2-site fast exchange R1rho model.
//!
//! ```text
//!                              kex
//!   R1rho = R1rho' + phi_ex ------------
//!                           kex^2 + w1^2
//! ```

use super::{catch_blowup, fill, BLOWUP_SENTINEL};

/// Back-calculate the R1rho values for the M61 model.
///
/// # Arguments
///
/// * `r1rho_prime` - R1rho in the absence of exchange
/// * `phi_ex` - pA.pB.dw^2 in (rad/s)^2
/// * `kex` - The exchange rate
/// * `spin_lock_fields2` - The squared spin-lock field strengths omega1^2
/// * `back_calc` - Output buffer
pub fn r1rho_m61(
    r1rho_prime: f64,
    phi_ex: f64,
    kex: f64,
    spin_lock_fields2: &[f64],
    back_calc: &mut [f64],
) {
    if phi_ex == 0.0 || kex == 0.0 {
        fill(back_calc, r1rho_prime);
        return;
    }

    let numer = phi_ex * kex;
    let kex2 = kex * kex;

    for (out, &w1_2) in back_calc.iter_mut().zip(spin_lock_fields2.iter()) {
        let denom = kex2 + w1_2;
        if denom == 0.0 {
            fill(back_calc, BLOWUP_SENTINEL);
            return;
        }
        *out = r1rho_prime + numer / denom;
    }

    catch_blowup(back_calc);
}
