//! The Carver and Richards (1972) 2-site CPMG model, valid for all time scales.
//!
//! ```text
//!   R2eff = 1/2 (R20A + R20B + kex - 1/tau_CP * arccosh(D+ cosh(eta+) - D- cos(eta-)))
//! ```
//!
//! The reduced `CR72` model uses R20A = R20B, the `CR72 full` model keeps both.

use super::{catch_blowup, fill, BLOWUP_SENTINEL};

/// cosh() overflows an f64 a little above 710.
const ETA_LIMIT: f64 = 700.0;

/// Back-calculate the R2eff values for the CR72 model.
///
/// # Arguments
///
/// * `r20a` - R2 of state A in the absence of exchange
/// * `r20b` - R2 of state B in the absence of exchange
/// * `pa` - The population of state A
/// * `dw` - Chemical shift difference between states A and B in rad/s
/// * `kex` - The exchange rate kex = k_AB + k_BA
/// * `cpmg_frqs` - The CPMG pulse train frequencies nu_CPMG in Hz
/// * `back_calc` - Output buffer, one value per dispersion point
pub fn r2eff_cr72(
    r20a: f64,
    r20b: f64,
    pa: f64,
    dw: f64,
    kex: f64,
    cpmg_frqs: &[f64],
    back_calc: &mut [f64],
) {
    if dw == 0.0 || pa == 1.0 || kex == 0.0 {
        fill(back_calc, r20a);
        return;
    }

    let pb = 1.0 - pa;
    let k_ba = pa * kex;
    let k_ab = pb * kex;

    let dw2 = dw * dw;
    let r20_kex = (r20a + r20b + kex) / 2.0;

    let (psi, zeta) = if r20a != r20b {
        let fact = r20a - r20b - k_ba + k_ab;
        (fact * fact - dw2 + 4.0 * pa * pb * kex * kex, 2.0 * dw * fact)
    } else {
        (kex * kex - dw2, 2.0 * dw * (k_ab - k_ba))
    };

    let sqrt_psi2_zeta2 = (psi * psi + zeta * zeta).sqrt();
    let d_part = (0.5 * psi + dw2) / sqrt_psi2_zeta2;
    let d_pos = 0.5 + d_part;
    let d_neg = -0.5 + d_part;

    let eta_scale = 2.0_f64.powf(-1.5);
    let eta_pos_part = eta_scale * (psi + sqrt_psi2_zeta2).sqrt();
    let eta_neg_part = eta_scale * (-psi + sqrt_psi2_zeta2).sqrt();

    let mut max_eta_pos = f64::NEG_INFINITY;
    let mut min_fact = f64::INFINITY;
    for (out, &nu) in back_calc.iter_mut().zip(cpmg_frqs.iter()) {
        let eta_pos = eta_pos_part / nu;
        let eta_neg = eta_neg_part / nu;
        max_eta_pos = max_eta_pos.max(eta_pos);

        // Stash the arccosh argument, converted below once all points are known.
        let fact = d_pos * eta_pos.cosh() - d_neg * eta_neg.cos();
        min_fact = min_fact.min(fact);
        *out = fact;
    }

    if max_eta_pos > ETA_LIMIT {
        fill(back_calc, BLOWUP_SENTINEL);
        return;
    }

    // Outside the arccosh domain: collapse to the exchange-averaged line.
    if min_fact < 1.0 {
        fill(back_calc, r20_kex);
        return;
    }

    for (out, &nu) in back_calc.iter_mut().zip(cpmg_frqs.iter()) {
        *out = r20_kex - nu * out.acosh();
    }

    catch_blowup(back_calc);
}
