use crate::enorm::enorm;
use crate::qr::QrFactorization;

/// Iteration cap of the damping search; the best `par` so far is returned.
const MAX_ITERS: usize = 10;

/// Levenberg-Marquardt parameter search with its scratch vectors.
///
/// Given the QR factorization of A (with the full R restored), the scaling
/// `diag` = D and `qtb` = first n components of `Q^T b`, finds `par >= 0` such
/// that the solution x of `A x = b`, `sqrt(par) D x = 0` satisfies either
/// `par == 0` and `||D x|| - delta <= 0.1 delta`, or
/// `| ||D x|| - delta | <= 0.1 delta`.
#[derive(Debug, Clone)]
pub struct LmParSearch {
    sdiag: Vec<f64>,
    wa1: Vec<f64>,
    wa2: Vec<f64>,
    dwarf: f64,
}

impl LmParSearch {
    /// `dwarf` is the smallest positive magnitude used to keep `par` nonzero.
    pub fn new(ncols: usize, dwarf: f64) -> Self {
        Self {
            sdiag: vec![0.0; ncols],
            wa1: vec![0.0; ncols],
            wa2: vec![0.0; ncols],
            dwarf,
        }
    }

    pub fn set_dwarf(&mut self, dwarf: f64) {
        self.dwarf = dwarf;
    }

    /// Diagonal of S from the last damped solve.
    pub fn sdiag(&self) -> &[f64] {
        &self.sdiag
    }

    /// Returns the final `par` and leaves the matching step in `x`.
    pub fn solve(
        &mut self,
        qr: &mut QrFactorization,
        diag: &[f64],
        qtb: &[f64],
        delta: f64,
        par: f64,
        x: &mut [f64],
    ) -> f64 {
        let n = qr.ncols();

        // Gauss-Newton direction; least squares solution if R is singular.
        let mut nsing = n;
        for j in 0..n {
            self.wa1[j] = qtb[j];
            if qr.r(j, j) == 0.0 && nsing == n {
                nsing = j;
            }
            if nsing < n {
                self.wa1[j] = 0.0;
            }
        }
        for j in (0..nsing).rev() {
            self.wa1[j] /= qr.r(j, j);
            let temp = self.wa1[j];
            for i in 0..j {
                self.wa1[i] -= qr.r(i, j) * temp;
            }
        }
        for j in 0..n {
            x[qr.ipvt()[j]] = self.wa1[j];
        }

        for j in 0..n {
            self.wa2[j] = diag[j] * x[j];
        }
        let mut dxnorm = enorm(&self.wa2[..n]);
        let mut fp = dxnorm - delta;
        if fp <= 0.1 * delta {
            return 0.0;
        }

        // Newton step gives a lower bound for the zero of fp when R has full
        // rank; otherwise the bound is zero.
        let mut parl = 0.0;
        if nsing == n {
            for j in 0..n {
                let l = qr.ipvt()[j];
                self.wa1[j] = diag[l] * (self.wa2[l] / dxnorm);
            }
            for j in 0..n {
                let mut sum = 0.0;
                for i in 0..j {
                    sum += qr.r(i, j) * self.wa1[i];
                }
                self.wa1[j] = (self.wa1[j] - sum) / qr.r(j, j);
            }
            let temp = enorm(&self.wa1[..n]);
            parl = ((fp / delta) / temp) / temp;
        }

        for j in 0..n {
            let mut sum = 0.0;
            for i in 0..=j {
                sum += qr.r(i, j) * qtb[i];
            }
            self.wa1[j] = sum / diag[qr.ipvt()[j]];
        }
        let gnorm = enorm(&self.wa1[..n]);
        let mut paru = gnorm / delta;
        if paru == 0.0 {
            paru = self.dwarf / delta.min(0.1);
        }

        let mut par = par.max(parl).min(paru);
        if par == 0.0 {
            par = gnorm / dxnorm;
        }

        let mut iter = 0;
        loop {
            iter += 1;

            if par == 0.0 {
                par = self.dwarf.max(0.001 * paru);
            }
            let scale = par.sqrt();
            for j in 0..n {
                self.wa1[j] = scale * diag[j];
            }
            qr.qrsolv(&self.wa1, qtb, x, &mut self.sdiag, &mut self.wa2);
            for j in 0..n {
                self.wa2[j] = diag[j] * x[j];
            }
            dxnorm = enorm(&self.wa2[..n]);
            let previous = fp;
            fp = dxnorm - delta;

            if fp.abs() <= 0.1 * delta
                || (parl == 0.0 && fp <= previous && previous < 0.0)
                || iter == MAX_ITERS
            {
                return par;
            }

            // Newton correction, using S^T stored below the diagonal.
            for j in 0..n {
                let l = qr.ipvt()[j];
                self.wa1[j] = diag[l] * (self.wa2[l] / dxnorm);
            }
            for j in 0..n {
                self.wa1[j] /= self.sdiag[j];
                let temp = self.wa1[j];
                for i in (j + 1)..n {
                    self.wa1[i] -= qr.r(i, j) * temp;
                }
            }
            let temp = enorm(&self.wa1[..n]);
            let parc = ((fp / delta) / temp) / temp;

            if fp > 0.0 {
                parl = parl.max(par);
            }
            if fp < 0.0 {
                paru = paru.min(par);
            }
            par = parl.max(par + parc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 4x2 column-major system with exact solution [2, -1].
    const A: [f64; 8] = [1.0, 0.5, 0.0, 2.0, 0.0, 1.0, 3.0, -1.0];
    const X_TRUE: [f64; 2] = [2.0, -1.0];

    fn factor(a: &[f64], m: usize, n: usize, b: &[f64]) -> (QrFactorization, Vec<f64>) {
        let mut qr = QrFactorization::new(m, n);
        {
            let mut jac = qr.jacobian_mut();
            for j in 0..n {
                jac.col_mut(j).copy_from_slice(&a[j * m..(j + 1) * m]);
            }
        }
        qr.factorize(true, f64::EPSILON);
        let mut work = b.to_vec();
        let mut qtb = vec![0.0; n];
        qr.transform_rhs(&mut work, &mut qtb);
        (qr, qtb)
    }

    fn rhs() -> Vec<f64> {
        let mut b = vec![0.0; 4];
        for j in 0..2 {
            for i in 0..4 {
                b[i] += A[i + j * 4] * X_TRUE[j];
            }
        }
        b
    }

    #[test]
    fn gauss_newton_step_inside_region_returns_zero() {
        let (mut qr, qtb) = factor(&A, 4, 2, &rhs());
        let mut search = LmParSearch::new(2, f64::MIN_POSITIVE);
        let mut x = [0.0; 2];
        let par = search.solve(&mut qr, &[1.0, 1.0], &qtb, 100.0, 0.5, &mut x);

        assert_eq!(par, 0.0);
        assert!((x[0] - X_TRUE[0]).abs() <= 1e-12);
        assert!((x[1] - X_TRUE[1]).abs() <= 1e-12);
    }

    #[test]
    fn constrained_step_lands_near_trust_radius() {
        let (mut qr, qtb) = factor(&A, 4, 2, &rhs());
        let diag = [2.0, 0.5];
        let mut search = LmParSearch::new(2, f64::MIN_POSITIVE);
        let mut x = [0.0; 2];
        let delta = 0.3;
        let par = search.solve(&mut qr, &diag, &qtb, delta, 0.0, &mut x);

        assert!(par > 0.0);
        let dxnorm = enorm(&[diag[0] * x[0], diag[1] * x[1]]);
        assert!((dxnorm - delta).abs() <= 0.1 * delta);
        // The damped step is still a descent direction for ||A x - b||.
        let b = rhs();
        let mut g = [0.0; 2];
        for j in 0..2 {
            for i in 0..4 {
                g[j] += A[i + j * 4] * b[i];
            }
        }
        assert!(g[0] * x[0] + g[1] * x[1] > 0.0);

        // S from the last damped solve factors A^T A + par D^2.
        let mut h = [[0.0; 2]; 2];
        for p in 0..2 {
            for q in 0..2 {
                for i in 0..4 {
                    h[p][q] += A[i + p * 4] * A[i + q * 4];
                }
            }
            h[p][p] += par * diag[p] * diag[p];
        }
        let det = h[0][0] * h[1][1] - h[0][1] * h[1][0];
        let sdet = search.sdiag()[0] * search.sdiag()[1];
        assert!((sdet * sdet - det).abs() <= 1e-10 * det);
    }

    #[test]
    fn rank_deficient_jacobian_still_respects_radius() {
        let a = [1.0, 2.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        let b = [3.0, 1.0, -1.0, 2.0];
        let (mut qr, qtb) = factor(&a, 4, 2, &b);
        let mut search = LmParSearch::new(2, f64::MIN_POSITIVE);
        let mut x = [0.0; 2];
        let delta = 0.1;
        let par = search.solve(&mut qr, &[1.0, 1.0], &qtb, delta, 0.0, &mut x);

        assert!(par > 0.0);
        assert_eq!(x[1], 0.0);
        assert!((x[0].abs() - delta).abs() <= 0.1 * delta);
    }
}
