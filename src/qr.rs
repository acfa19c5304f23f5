use crate::enorm::enorm;
use crate::jacobian::JacobianMut;

/// Householder QR factorization with column pivoting, `A P = Q R`.
///
/// The factorization owns the m-by-n column-major working matrix. The
/// Jacobian is written into it through [`QrFactorization::jacobian_mut`] and
/// [`QrFactorization::factorize`] overwrites it in place: the strict upper
/// trapezoid holds R, the lower trapezoid holds the Householder vectors and the
/// diagonal of R is kept separately in `rdiag`.
///
/// After [`QrFactorization::transform_rhs`] the diagonal of R is written back
/// into the matrix, so `r(i, j)` for `i <= j` reads the full upper triangle.
/// [`QrFactorization::qrsolv`] then reuses the strict lower triangle of the
/// leading n-by-n block as scratch for the factor S.
#[derive(Debug, Clone)]
pub struct QrFactorization {
    nrows: usize,
    ncols: usize,
    packed: Vec<f64>,
    ipvt: Vec<usize>,
    rdiag: Vec<f64>,
    acnorm: Vec<f64>,
    norms: Vec<f64>,
}

impl QrFactorization {
    /// Allocate storage for an `nrows` x `ncols` matrix.
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            packed: vec![0.0; nrows * ncols],
            ipvt: (0..ncols).collect(),
            rdiag: vec![0.0; ncols],
            acnorm: vec![0.0; ncols],
            norms: vec![0.0; ncols],
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Column `j` of the factored matrix is column `ipvt()[j]` of the input.
    pub fn ipvt(&self) -> &[usize] {
        &self.ipvt
    }

    /// Diagonal of R.
    pub fn rdiag(&self) -> &[f64] {
        &self.rdiag
    }

    /// Euclidean norms of the input columns, in original column order.
    pub fn acnorm(&self) -> &[f64] {
        &self.acnorm
    }

    /// Entry (i, j) of the working matrix.
    pub fn r(&self, i: usize, j: usize) -> f64 {
        self.packed[i + j * self.nrows]
    }

    /// Column `j` of the working matrix.
    pub fn column(&self, j: usize) -> &[f64] {
        let m = self.nrows;
        &self.packed[j * m..(j + 1) * m]
    }

    /// Mutable view used to fill the matrix before factorizing.
    pub fn jacobian_mut(&mut self) -> JacobianMut<'_> {
        JacobianMut::new(&mut self.packed, self.nrows, self.ncols)
    }

    /// Factorize the working matrix in place.
    ///
    /// With `pivot` set, the remaining column of largest norm is brought into
    /// the pivot position at each step, so `|rdiag|` is nonincreasing. Running
    /// column norms are downdated and recomputed from scratch once the
    /// downdate has lost too much relative accuracy.
    pub fn factorize(&mut self, pivot: bool, epsmch: f64) {
        let m = self.nrows;
        let n = self.ncols;

        for j in 0..n {
            let norm = enorm(&self.packed[j * m..(j + 1) * m]);
            self.acnorm[j] = norm;
            self.rdiag[j] = norm;
            self.norms[j] = norm;
            self.ipvt[j] = j;
        }

        for j in 0..m.min(n) {
            if pivot {
                let mut kmax = j;
                for k in j..n {
                    if self.rdiag[k] > self.rdiag[kmax] {
                        kmax = k;
                    }
                }
                if kmax != j {
                    swap_columns(&mut self.packed, m, j, kmax);
                    self.rdiag[kmax] = self.rdiag[j];
                    self.norms[kmax] = self.norms[j];
                    self.ipvt.swap(j, kmax);
                }
            }

            // Householder reflector taking column j to a multiple of e_j.
            let (left, right) = self.packed.split_at_mut((j + 1) * m);
            let col_j = &mut left[j * m..];
            let mut ajnorm = enorm(&col_j[j..]);
            if ajnorm != 0.0 {
                if col_j[j] < 0.0 {
                    ajnorm = -ajnorm;
                }
                for v in &mut col_j[j..] {
                    *v /= ajnorm;
                }
                col_j[j] += 1.0;

                for k in (j + 1)..n {
                    let col_k = &mut right[(k - j - 1) * m..(k - j) * m];
                    let mut sum = 0.0;
                    for i in j..m {
                        sum += col_j[i] * col_k[i];
                    }
                    let temp = sum / col_j[j];
                    for i in j..m {
                        col_k[i] -= temp * col_j[i];
                    }

                    if pivot && self.rdiag[k] != 0.0 {
                        let temp = col_k[j] / self.rdiag[k];
                        self.rdiag[k] *= (1.0 - temp * temp).max(0.0).sqrt();
                        let ratio = self.rdiag[k] / self.norms[k];
                        if 0.05 * ratio * ratio <= epsmch {
                            self.rdiag[k] = enorm(&col_k[(j + 1)..]);
                            self.norms[k] = self.rdiag[k];
                        }
                    }
                }
            }
            self.rdiag[j] = -ajnorm;
        }
    }

    /// Replace `b` (length m) by `Q^T b`, store its first n entries in `qtb`
    /// and write the diagonal of R back into the working matrix.
    pub fn transform_rhs(&mut self, b: &mut [f64], qtb: &mut [f64]) {
        let m = self.nrows;
        for j in 0..self.ncols {
            let col = &mut self.packed[j * m..(j + 1) * m];
            if col[j] != 0.0 {
                let mut sum = 0.0;
                for i in j..m {
                    sum += col[i] * b[i];
                }
                let temp = -sum / col[j];
                for i in j..m {
                    b[i] += col[i] * temp;
                }
            }
            col[j] = self.rdiag[j];
            qtb[j] = b[j];
        }
    }

    /// Solve `A x = b`, `D x = 0` in the least squares sense.
    ///
    /// Requires the full upper triangle of R (see [`Self::transform_rhs`]),
    /// `diag` holding D in original column order and `qtb` the first n
    /// components of `Q^T b`. On return `x` holds the solution, `sdiag` the
    /// diagonal of S with `P^T (A^T A + D D) P = S^T S`, and the strict lower
    /// triangle of the working matrix holds S transposed. R itself is left
    /// intact. A singular S yields the least squares solution: the first zero
    /// diagonal entry and every later component are set to zero.
    pub fn qrsolv(
        &mut self,
        diag: &[f64],
        qtb: &[f64],
        x: &mut [f64],
        sdiag: &mut [f64],
        wa: &mut [f64],
    ) {
        let m = self.nrows;
        let n = self.ncols;
        let r = &mut self.packed;
        let at = |i: usize, j: usize| i + j * m;

        for j in 0..n {
            for i in j..n {
                r[at(i, j)] = r[at(j, i)];
            }
            x[j] = r[at(j, j)];
            wa[j] = qtb[j];
        }

        // Eliminate D with Givens rotations, one row of D at a time.
        for j in 0..n {
            let l = self.ipvt[j];
            if diag[l] != 0.0 {
                sdiag[j..n].fill(0.0);
                sdiag[j] = diag[l];

                // Only one extra element of (Q^T b, 0) is touched per row.
                let mut qtbpj = 0.0;
                for k in j..n {
                    if sdiag[k] == 0.0 {
                        continue;
                    }
                    let rkk = r[at(k, k)];
                    let (cos, sin) = if rkk.abs() < sdiag[k].abs() {
                        let cotan = rkk / sdiag[k];
                        let sin = 0.5 / (0.25 + 0.25 * cotan * cotan).sqrt();
                        (sin * cotan, sin)
                    } else {
                        let tan = sdiag[k] / rkk;
                        let cos = 0.5 / (0.25 + 0.25 * tan * tan).sqrt();
                        (cos, cos * tan)
                    };

                    r[at(k, k)] = cos * rkk + sin * sdiag[k];
                    let temp = cos * wa[k] + sin * qtbpj;
                    qtbpj = -sin * wa[k] + cos * qtbpj;
                    wa[k] = temp;

                    for i in (k + 1)..n {
                        let rik = r[at(i, k)];
                        let temp = cos * rik + sin * sdiag[i];
                        sdiag[i] = -sin * rik + cos * sdiag[i];
                        r[at(i, k)] = temp;
                    }
                }
            }
            sdiag[j] = r[at(j, j)];
            r[at(j, j)] = x[j];
        }

        let mut nsing = n;
        for j in 0..n {
            if sdiag[j] == 0.0 && nsing == n {
                nsing = j;
            }
            if nsing < n {
                wa[j] = 0.0;
            }
        }

        for j in (0..nsing).rev() {
            let mut sum = 0.0;
            for i in (j + 1)..nsing {
                sum += r[at(i, j)] * wa[i];
            }
            wa[j] = (wa[j] - sum) / sdiag[j];
        }

        for j in 0..n {
            x[self.ipvt[j]] = wa[j];
        }
    }
}

fn swap_columns(packed: &mut [f64], nrows: usize, a: usize, b: usize) {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    let (left, right) = packed.split_at_mut(hi * nrows);
    left[lo * nrows..(lo + 1) * nrows].swap_with_slice(&mut right[..nrows]);
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = f64::EPSILON;

    // Column-major 6x3 test matrix, well conditioned.
    fn sample_matrix() -> (usize, usize, Vec<f64>) {
        let m = 6;
        let n = 3;
        let mut a = vec![0.0; m * n];
        let mut seed = 12345u64;
        for v in a.iter_mut() {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            *v = ((seed >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0;
        }
        (m, n, a)
    }

    fn load(qr: &mut QrFactorization, a: &[f64]) {
        let mut jac = qr.jacobian_mut();
        for j in 0..jac.ncols() {
            let m = jac.nrows();
            jac.col_mut(j).copy_from_slice(&a[j * m..(j + 1) * m]);
        }
    }

    fn mat_vec(m: usize, n: usize, a: &[f64], x: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; m];
        for j in 0..n {
            for i in 0..m {
                out[i] += a[i + j * m] * x[j];
            }
        }
        out
    }

    // Solves (A^T A + D^2) x = A^T b by Gaussian elimination.
    fn normal_equations(m: usize, n: usize, a: &[f64], d: &[f64], b: &[f64]) -> Vec<f64> {
        let mut g = vec![vec![0.0; n + 1]; n];
        for p in 0..n {
            for q in 0..n {
                let mut s = 0.0;
                for i in 0..m {
                    s += a[i + p * m] * a[i + q * m];
                }
                g[p][q] = s;
            }
            g[p][p] += d[p] * d[p];
            let mut s = 0.0;
            for i in 0..m {
                s += a[i + p * m] * b[i];
            }
            g[p][n] = s;
        }
        for c in 0..n {
            let piv = (c..n)
                .max_by(|&x, &y| g[x][c].abs().partial_cmp(&g[y][c].abs()).unwrap())
                .unwrap();
            g.swap(c, piv);
            for r in (c + 1)..n {
                let f = g[r][c] / g[c][c];
                for k in c..=n {
                    g[r][k] -= f * g[c][k];
                }
            }
        }
        let mut x = vec![0.0; n];
        for c in (0..n).rev() {
            let mut s = g[c][n];
            for k in (c + 1)..n {
                s -= g[c][k] * x[k];
            }
            x[c] = s / g[c][c];
        }
        x
    }

    fn solve(qr: &mut QrFactorization, b: &[f64], d: &[f64]) -> Vec<f64> {
        let n = qr.ncols();
        let mut work = b.to_vec();
        let mut qtb = vec![0.0; n];
        qr.transform_rhs(&mut work, &mut qtb);
        let mut x = vec![0.0; n];
        let mut sdiag = vec![0.0; n];
        let mut wa = vec![0.0; n];
        qr.qrsolv(d, &qtb, &mut x, &mut sdiag, &mut wa);
        x
    }

    #[test]
    fn pivoting_orders_diagonal_and_keeps_column_norms() {
        let (m, n, a) = sample_matrix();
        let mut qr = QrFactorization::new(m, n);
        load(&mut qr, &a);
        qr.factorize(true, EPS);

        for j in 0..n {
            let expected = enorm(&a[j * m..(j + 1) * m]);
            assert!((qr.acnorm()[j] - expected).abs() <= 1e-15 * expected);
        }
        for j in 1..n {
            assert!(qr.rdiag()[j].abs() <= qr.rdiag()[j - 1].abs() * (1.0 + 1e-12));
        }
        let mut seen = qr.ipvt().to_vec();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn undamped_solve_recovers_consistent_solution() {
        let (m, n, a) = sample_matrix();
        let x_true = [1.5, -0.25, 3.0];
        let b = mat_vec(m, n, &a, &x_true);

        let mut qr = QrFactorization::new(m, n);
        load(&mut qr, &a);
        qr.factorize(true, EPS);
        let x = solve(&mut qr, &b, &[0.0; 3]);

        for j in 0..n {
            assert!((x[j] - x_true[j]).abs() <= 1e-10 * x_true[j].abs());
        }
    }

    #[test]
    fn undamped_solve_matches_least_squares() {
        let (m, n, a) = sample_matrix();
        let b = [0.3, -1.0, 2.0, 0.7, -0.4, 1.1];
        let expected = normal_equations(m, n, &a, &[0.0; 3], &b);

        let mut qr = QrFactorization::new(m, n);
        load(&mut qr, &a);
        qr.factorize(true, EPS);
        let x = solve(&mut qr, &b, &[0.0; 3]);

        for j in 0..n {
            assert!((x[j] - expected[j]).abs() <= 1e-10 * expected[j].abs().max(1.0));
        }
    }

    #[test]
    fn damped_solve_matches_regularized_normal_equations() {
        let (m, n, a) = sample_matrix();
        let b = [0.3, -1.0, 2.0, 0.7, -0.4, 1.1];
        let d = [0.5, 2.0, 0.1];
        let expected = normal_equations(m, n, &a, &d, &b);

        let mut qr = QrFactorization::new(m, n);
        load(&mut qr, &a);
        qr.factorize(true, EPS);
        let x = solve(&mut qr, &b, &d);

        for j in 0..n {
            assert!((x[j] - expected[j]).abs() <= 1e-10 * expected[j].abs().max(1.0));
        }
        // R is restored on the diagonal and above.
        for j in 0..n {
            assert_eq!(qr.r(j, j), qr.rdiag()[j]);
        }
    }

    #[test]
    fn rank_deficient_solve_zeroes_null_space() {
        let m = 4;
        let n = 2;
        // Second column is zero.
        let a = vec![1.0, 2.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        let b = [1.0, 1.0, 1.0, 1.0];

        let mut qr = QrFactorization::new(m, n);
        load(&mut qr, &a);
        qr.factorize(true, EPS);
        assert_eq!(qr.ipvt()[1], 1);
        let x = solve(&mut qr, &b, &[0.0; 2]);

        assert_eq!(x[1], 0.0);
        assert!((x[0] - 4.0 / 6.0).abs() <= 1e-14);
    }

    #[test]
    fn nearly_parallel_columns_recompute_downdated_norms() {
        let m = 4;
        let n = 3;
        let tail = 1.0 + 1e-9;
        let eps_b = tail - 1.0;
        let s = 3e-10;
        // a = (1, 1, 1, 1), b = a + eps_b e4, c orthogonal to both.
        let a = vec![
            1.0, 1.0, 1.0, 1.0, //
            1.0, 1.0, 1.0, tail, //
            s, -s, 0.0, 0.0,
        ];

        let mut qr = QrFactorization::new(m, n);
        load(&mut qr, &a);
        qr.factorize(true, EPS);

        // The residual of a against b is far below the downdate's resolution,
        // so its norm has to be recomputed to outrank c.
        assert_eq!(qr.ipvt(), &[1, 0, 2]);
        let norm_b = enorm(&a[m..2 * m]);
        let expected = [norm_b, 3.0_f64.sqrt() * eps_b / norm_b, 2.0_f64.sqrt() * s];
        for j in 0..n {
            let got = qr.rdiag()[j].abs();
            assert!(
                (got - expected[j]).abs() <= 1e-5 * expected[j],
                "rdiag[{j}] = {got}, expected {}",
                expected[j]
            );
        }
    }
}
