//! Adaptive Simpson quadrature for the LMS coefficients

const MAX_DEPTH: u32 = 48;

/// Integrate `f` over `[a, b]` to within roughly `epsilon`
///
/// `a > b` is allowed and yields the negated integral.
pub fn integrate<F: Fn(f64) -> f64>(f: F, a: f64, b: f64, epsilon: f64) -> f64 {
    let fa = f(a);
    let fb = f(b);
    let (whole, c, fc) = simpson(&f, a, fa, b, fb);
    adaptive(&f, a, fa, b, fb, c, fc, whole, epsilon, MAX_DEPTH)
}

/// Simpson's rule on `[a, b]`; also returns the midpoint and its value
fn simpson<F: Fn(f64) -> f64>(f: &F, a: f64, fa: f64, b: f64, fb: f64) -> (f64, f64, f64) {
    let c = (a + b) / 2.0;
    let fc = f(c);
    ((b - a) / 6.0 * (fa + 4.0 * fc + fb), c, fc)
}

#[allow(clippy::too_many_arguments)]
fn adaptive<F: Fn(f64) -> f64>(
    f: &F,
    a: f64,
    fa: f64,
    b: f64,
    fb: f64,
    c: f64,
    fc: f64,
    whole: f64,
    epsilon: f64,
    depth: u32,
) -> f64 {
    let (left, lc, flc) = simpson(f, a, fa, c, fc);
    let (right, rc, frc) = simpson(f, c, fc, b, fb);
    let delta = left + right - whole;

    if depth == 0 || delta.abs() <= 15.0 * epsilon {
        return left + right + delta / 15.0;
    }

    adaptive(f, a, fa, c, fc, lc, flc, left, epsilon / 2.0, depth - 1)
        + adaptive(f, c, fc, b, fb, rc, frc, right, epsilon / 2.0, depth - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polynomials_are_exact() {
        let cubic = integrate(|x| x * x * x - 2.0 * x + 1.0, 0.0, 2.0, 1e-4);
        assert!((cubic - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_transcendental_within_tolerance() {
        let sin = integrate(f64::sin, 0.0, std::f64::consts::PI, 1e-4);
        assert!((sin - 2.0).abs() < 1e-4);

        let exp = integrate(f64::exp, 0.0, 1.0, 1e-6);
        assert!((exp - (std::f64::consts::E - 1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_reversed_interval_negates() {
        let forward = integrate(|x| x * x, 1.0, 3.0, 1e-4);
        let backward = integrate(|x| x * x, 3.0, 1.0, 1e-4);
        assert!((forward + backward).abs() < 1e-9);
    }
}
