//! Exponential relaxation curves used to extract R2eff from peak intensities.
//!
//! Two curve shapes are supported: the two parameter decay `I(t) = I0 exp(-R t)`
//! and the three parameter inversion recovery `I(t) = Iinf - (Iinf - I0) exp(-R t)`.

use super::catch_blowup;

/// Back-calculate a two parameter exponential decay.
pub fn exponential(rx: f64, i0: f64, times: &[f64], back_calc: &mut [f64]) {
    for (out, &t) in back_calc.iter_mut().zip(times.iter()) {
        *out = i0 * (-rx * t).exp();
    }
    catch_blowup(back_calc);
}

/// Back-calculate a three parameter inversion recovery curve.
pub fn exponential_inv(rx: f64, i0: f64, iinf: f64, times: &[f64], back_calc: &mut [f64]) {
    for (out, &t) in back_calc.iter_mut().zip(times.iter()) {
        *out = iinf - (iinf - i0) * (-rx * t).exp();
    }
    catch_blowup(back_calc);
}

/// Partial derivatives of the two parameter decay.
///
/// Row `i` of the output holds `[dI/dR, dI/dI0]` at `times[i]`.
pub fn d_exponential(rx: f64, i0: f64, times: &[f64]) -> Vec<[f64; 2]> {
    times
        .iter()
        .map(|&t| {
            let decay = (-rx * t).exp();
            [-i0 * t * decay, decay]
        })
        .collect()
}

/// Partial derivatives of the inversion recovery curve, `[dI/dR, dI/dI0, dI/dIinf]`.
pub fn d_exponential_inv(rx: f64, i0: f64, iinf: f64, times: &[f64]) -> Vec<[f64; 3]> {
    times
        .iter()
        .map(|&t| {
            let decay = (-rx * t).exp();
            [(iinf - i0) * t * decay, decay, 1.0 - decay]
        })
        .collect()
}
