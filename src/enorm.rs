/// Small-component threshold of the three-bucket norm.
const RDWARF: f64 = 3.834e-20;
/// Large-component threshold before division by the vector length.
const RGIANT: f64 = 1.304e19;

/// Euclidean norm of `x` without destructive underflow or overflow.
///
/// Components are split into small, intermediate and large magnitude buckets.
/// Small and large sums are accumulated relative to their running maxima, so a
/// vector such as `[1e200, 1.0, 1.0]` yields a finite result.
pub fn enorm(x: &[f64]) -> f64 {
    if x.is_empty() {
        return 0.0;
    }

    let agiant = RGIANT / x.len() as f64;
    let mut s1 = 0.0;
    let mut s2 = 0.0;
    let mut s3 = 0.0;
    let mut x1max = 0.0;
    let mut x3max = 0.0;

    for &value in x {
        let xabs = value.abs();
        if xabs > RDWARF && xabs < agiant {
            s2 += xabs * xabs;
        } else if xabs > RDWARF {
            if xabs > x1max {
                let ratio = x1max / xabs;
                s1 = 1.0 + s1 * ratio * ratio;
                x1max = xabs;
            } else {
                let ratio = xabs / x1max;
                s1 += ratio * ratio;
            }
        } else if xabs > x3max {
            let ratio = x3max / xabs;
            s3 = 1.0 + s3 * ratio * ratio;
            x3max = xabs;
        } else if xabs != 0.0 {
            let ratio = xabs / x3max;
            s3 += ratio * ratio;
        }
    }

    if s1 != 0.0 {
        x1max * (s1 + (s2 / x1max) / x1max).sqrt()
    } else if s2 != 0.0 {
        if s2 >= x3max {
            (s2 * (1.0 + (x3max / s2) * (x3max * s3))).sqrt()
        } else {
            (x3max * ((s2 / x3max) + (x3max * s3))).sqrt()
        }
    } else {
        x3max * s3.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel_err(a: f64, b: f64) -> f64 {
        (a - b).abs() / b.abs().max(f64::MIN_POSITIVE)
    }

    #[test]
    fn matches_naive_norm_for_moderate_values() {
        let v = [3.0, -4.0, 12.0];
        assert!(rel_err(enorm(&v), 13.0) < 1e-15);
    }

    #[test]
    fn empty_and_zero_vectors() {
        assert_eq!(enorm(&[]), 0.0);
        assert_eq!(enorm(&[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn is_nonnegative() {
        let vectors: [&[f64]; 4] = [&[-1.0], &[-1e-30, 2e-25], &[-1e250, -1e250], &[0.5, -0.25]];
        for v in vectors {
            assert!(enorm(v) >= 0.0);
        }
    }

    #[test]
    fn scales_homogeneously() {
        let v = [0.3, -1.7, 2.25, 1e-3, 42.0];
        let base = enorm(&v);
        for scale in [-7.5, 1e-12, 3.0, 1e15] {
            let scaled: Vec<f64> = v.iter().map(|x| x * scale).collect();
            assert!(rel_err(enorm(&scaled), scale.abs() * base) < 1e-14);
        }
    }

    #[test]
    fn huge_component_does_not_overflow() {
        let n = enorm(&[1e200, 1.0, 1.0]);
        assert!(n.is_finite());
        assert!(rel_err(n, 1e200) < 1e-15);

        let n = enorm(&[1e300, 1e300]);
        assert!(n.is_finite());
        assert!(rel_err(n, 1e300 * 2.0_f64.sqrt()) < 1e-15);
    }

    #[test]
    fn tiny_components_do_not_underflow() {
        let n = enorm(&[1e-200, 1e-200, 1e-200, 1e-200]);
        assert!(rel_err(n, 2e-200) < 1e-15);

        let n = enorm(&[1e-30, 1.0]);
        assert!(rel_err(n, 1.0) < 1e-15);
    }
}
