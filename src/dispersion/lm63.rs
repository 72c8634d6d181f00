//! The Luz and Meiboom (1963) 2-site fast exchange CPMG model.
//!
//! ```text
//!                   phi_ex   /       4 nu_CPMG         /     kex     \ \
//!   R2eff = R20 +  ------- * | 1 -  -----------  tanh | ----------- | |
//!                    kex     \         kex            \ 4 nu_CPMG   / /
//! ```

use super::{catch_blowup, fill};

/// Back-calculate the R2eff values for the LM63 model.
///
/// `phi_ex` must already be in (rad/s)^2.
pub fn r2eff_lm63(r20: f64, phi_ex: f64, kex: f64, cpmg_frqs: &[f64], back_calc: &mut [f64]) {
    if phi_ex == 0.0 || kex == 0.0 {
        fill(back_calc, r20);
        return;
    }

    let rex = phi_ex / kex;
    let kex_4 = 4.0 / kex;

    for (out, &nu) in back_calc.iter_mut().zip(cpmg_frqs.iter()) {
        *out = r20 + rex * (1.0 - kex_4 * nu * (kex / (4.0 * nu)).tanh());
    }

    catch_blowup(back_calc);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_no_rex() {
        let cpmg = [50.0, 100.0, 200.0];
        let mut r2eff = vec![0.0; 3];

        r2eff_lm63(12.0, 0.0, 1000.0, &cpmg, &mut r2eff);
        assert_eq!(r2eff, vec![12.0; 3]);

        r2eff_lm63(12.0, 5000.0, 0.0, &cpmg, &mut r2eff);
        assert_eq!(r2eff, vec![12.0; 3]);
    }

    #[test]
    fn test_slow_pulsing_limit() {
        // nu_CPMG << kex: tanh -> 1 and R2eff -> R20 + phi_ex/kex.
        let cpmg = [1.0];
        let mut r2eff = vec![0.0];
        r2eff_lm63(10.0, 20000.0, 2000.0, &cpmg, &mut r2eff);
        assert_relative_eq!(r2eff[0], 10.0 + 10.0 * (1.0 - 4.0 / 2000.0), epsilon = 1e-9);
    }

    #[test]
    fn test_fast_pulsing_refocuses() {
        let cpmg = [1e7];
        let mut r2eff = vec![0.0];
        r2eff_lm63(10.0, 20000.0, 2000.0, &cpmg, &mut r2eff);
        assert_relative_eq!(r2eff[0], 10.0, epsilon = 1e-6);
    }
}
