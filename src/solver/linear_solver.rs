use crate::solver::error::{SolverError, SolverResult};
use rayon::prelude::*;
use wide::f64x4;

/// Residual growth over the initial residual treated as divergence.
const DIVERGENCE_FACTOR: f64 = 1e10;

/// Rows below this count run the matrix-vector product inline.
const PARALLEL_ROWS: usize = 4096;

#[derive(Clone, Debug)]
pub struct SparseMatrix {
    pub values: Vec<f64>,
    pub col_indices: Vec<usize>,
    pub row_offsets: Vec<usize>,
    pub n_rows: usize,
    pub n_cols: usize,
}

impl SparseMatrix {
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        Self {
            values: Vec::new(),
            col_indices: Vec::new(),
            row_offsets: vec![0; n_rows + 1],
            n_rows,
            n_cols,
        }
    }

    /// Builds a CSR matrix; duplicate `(row, col)` entries are summed.
    pub fn from_triplets(n_rows: usize, n_cols: usize, triplets: &[(usize, usize, f64)]) -> Self {
        let mut row_counts = vec![0; n_rows];
        for &(r, _, _) in triplets {
            row_counts[r] += 1;
        }

        let mut row_offsets = vec![0; n_rows + 1];
        for i in 0..n_rows {
            row_offsets[i + 1] = row_offsets[i] + row_counts[i];
        }

        let mut values = vec![0.0; triplets.len()];
        let mut col_indices = vec![0; triplets.len()];
        let mut current_row_indices = row_offsets.clone();
        for &(r, c, v) in triplets {
            let idx = current_row_indices[r];
            values[idx] = v;
            col_indices[idx] = c;
            current_row_indices[r] += 1;
        }

        // Sort each row by column and merge duplicates.
        let mut mat = Self::new(n_rows, n_cols);
        mat.values.reserve(triplets.len());
        mat.col_indices.reserve(triplets.len());
        let mut row: Vec<(usize, f64)> = Vec::new();
        for i in 0..n_rows {
            row.clear();
            row.extend(
                (row_offsets[i]..row_offsets[i + 1]).map(|k| (col_indices[k], values[k])),
            );
            row.sort_unstable_by_key(|&(c, _)| c);
            for &(c, v) in &row {
                match mat.col_indices.last() {
                    Some(&last) if last == c && mat.col_indices.len() > mat.row_offsets[i] => {
                        if let Some(acc) = mat.values.last_mut() {
                            *acc += v;
                        }
                    }
                    _ => {
                        mat.col_indices.push(c);
                        mat.values.push(v);
                    }
                }
            }
            mat.row_offsets[i + 1] = mat.values.len();
        }
        mat
    }

    pub fn mat_vec_mul(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.n_cols);
        assert_eq!(y.len(), self.n_rows);

        let row = |i: usize| {
            let mut sum = 0.0;
            for j in self.row_offsets[i]..self.row_offsets[i + 1] {
                sum += self.values[j] * x[self.col_indices[j]];
            }
            sum
        };
        if self.n_rows >= PARALLEL_ROWS {
            y.par_iter_mut().enumerate().for_each(|(i, yi)| *yi = row(i));
        } else {
            for (i, yi) in y.iter_mut().enumerate() {
                *yi = row(i);
            }
        }
    }

    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.n_rows)
            .map(|i| {
                (self.row_offsets[i]..self.row_offsets[i + 1])
                    .filter(|&j| self.col_indices[j] == i)
                    .map(|j| self.values[j])
                    .sum()
            })
            .collect()
    }

    /// Multiplies every diagonal entry by `factor`.
    pub fn scale_diagonal(&mut self, factor: f64) {
        for i in 0..self.n_rows {
            for j in self.row_offsets[i]..self.row_offsets[i + 1] {
                if self.col_indices[j] == i {
                    self.values[j] *= factor;
                }
            }
        }
    }

    /// `true` when every entry equals its transpose up to `tol`.
    pub fn is_symmetric(&self, tol: f64) -> bool {
        (0..self.n_rows).all(|i| {
            (self.row_offsets[i]..self.row_offsets[i + 1]).all(|k| {
                let j = self.col_indices[k];
                (self.get(j, i) - self.values[k]).abs() <= tol
            })
        })
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        (self.row_offsets[row]..self.row_offsets[row + 1])
            .filter(|&k| self.col_indices[k] == col)
            .map(|k| self.values[k])
            .sum()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolveStats {
    pub iterations: usize,
    pub initial_residual: f64,
    pub final_residual: f64,
    pub converged: bool,
}

fn inverse_diagonal(a: &SparseMatrix) -> Vec<f64> {
    a.diagonal()
        .into_iter()
        .map(|d| if d.abs() > 1e-300 { 1.0 / d } else { 1.0 })
        .collect()
}

fn check_finite(
    solver: &'static str,
    system: &str,
    iteration: usize,
    resid: f64,
    init_resid: f64,
) -> SolverResult<()> {
    if !resid.is_finite() || resid > DIVERGENCE_FACTOR * init_resid.max(1.0) {
        log::error!(
            "{} diverging on '{}' at iter {}: resid={:.3e}",
            solver,
            system,
            iteration,
            resid
        );
        return Err(SolverError::breakdown(solver, "jacobi", system, iteration, resid));
    }
    Ok(())
}

/// Jacobi-preconditioned BiCGStab for non-symmetric systems.
pub fn solve_bicgstab(
    a: &SparseMatrix,
    b: &[f64],
    x: &mut [f64],
    max_iter: usize,
    tol: f64,
    system: &str,
) -> SolverResult<SolveStats> {
    const SOLVER: &str = "BiCGStab";
    let n = b.len();
    let inv_diag = inverse_diagonal(a);
    let mut r = vec![0.0; n];
    a.mat_vec_mul(x, &mut r);
    sub_from(&mut r, b);

    let init_resid = norm(&r);
    check_finite(SOLVER, system, 0, init_resid, 0.0)?;
    if init_resid <= tol {
        return Ok(SolveStats {
            iterations: 0,
            initial_residual: init_resid,
            final_residual: init_resid,
            converged: true,
        });
    }

    let r0 = r.clone();
    let mut rho_old = 1.0;
    let mut alpha = 1.0;
    let mut omega = 1.0;
    let mut v = vec![0.0; n];
    let mut p = vec![0.0; n];
    let mut y = vec![0.0; n];
    let mut s = vec![0.0; n];
    let mut z = vec![0.0; n];
    let mut t = vec![0.0; n];
    let mut resid = init_resid;

    for iter in 0..max_iter {
        let rho_new = dot(&r0, &r);
        if rho_new.is_nan() {
            return Err(SolverError::breakdown(SOLVER, "jacobi", system, iter, f64::NAN));
        }
        if rho_new.abs() < 1e-300 {
            log::debug!("{} stagnation on '{}' at iter {}", SOLVER, system, iter);
            break;
        }

        if iter == 0 {
            p.copy_from_slice(&r);
        } else {
            let beta = (rho_new / rho_old) * (alpha / omega);
            let v_beta = f64x4::splat(beta);
            let v_omega = f64x4::splat(omega);
            let mut i = 0;
            while i + 4 <= n {
                let vr = f64x4::from(&r[i..i + 4]);
                let vp = f64x4::from(&p[i..i + 4]);
                let vv = f64x4::from(&v[i..i + 4]);
                let res = vr + v_beta * (vp - v_omega * vv);
                let res_arr: [f64; 4] = res.into();
                p[i..i + 4].copy_from_slice(&res_arr);
                i += 4;
            }
            while i < n {
                p[i] = r[i] + beta * (p[i] - omega * v[i]);
                i += 1;
            }
        }

        hadamard(&inv_diag, &p, &mut y);
        a.mat_vec_mul(&y, &mut v);
        let r0_v = dot(&r0, &v);
        if r0_v.abs() < 1e-300 {
            break;
        }
        alpha = rho_new / r0_v;

        s.copy_from_slice(&r);
        axpy(&mut s, -alpha, &v);
        let s_norm = norm(&s);
        if s_norm <= tol {
            axpy(x, alpha, &y);
            return Ok(SolveStats {
                iterations: iter + 1,
                initial_residual: init_resid,
                final_residual: s_norm,
                converged: true,
            });
        }

        hadamard(&inv_diag, &s, &mut z);
        a.mat_vec_mul(&z, &mut t);
        let t_t = dot(&t, &t);
        omega = if t_t.abs() < 1e-300 { 0.0 } else { dot(&t, &s) / t_t };

        let v_alpha = f64x4::splat(alpha);
        let v_omega = f64x4::splat(omega);
        let mut i = 0;
        while i + 4 <= n {
            let vx = f64x4::from(&x[i..i + 4]);
            let vy = f64x4::from(&y[i..i + 4]);
            let vz = f64x4::from(&z[i..i + 4]);
            let vs = f64x4::from(&s[i..i + 4]);
            let vt = f64x4::from(&t[i..i + 4]);

            let res_x = vx + v_alpha * vy + v_omega * vz;
            let res_r = vs - v_omega * vt;

            let res_x_arr: [f64; 4] = res_x.into();
            let res_r_arr: [f64; 4] = res_r.into();
            x[i..i + 4].copy_from_slice(&res_x_arr);
            r[i..i + 4].copy_from_slice(&res_r_arr);
            i += 4;
        }
        while i < n {
            x[i] += alpha * y[i] + omega * z[i];
            r[i] = s[i] - omega * t[i];
            i += 1;
        }

        resid = norm(&r);
        check_finite(SOLVER, system, iter, resid, init_resid)?;
        if resid <= tol {
            return Ok(SolveStats {
                iterations: iter + 1,
                initial_residual: init_resid,
                final_residual: resid,
                converged: true,
            });
        }
        if omega.abs() < 1e-300 {
            break;
        }
        rho_old = rho_new;
    }

    Ok(SolveStats {
        iterations: max_iter,
        initial_residual: init_resid,
        final_residual: resid,
        converged: false,
    })
}

/// Jacobi-preconditioned conjugate gradient for symmetric positive systems.
pub fn solve_pcg(
    a: &SparseMatrix,
    b: &[f64],
    x: &mut [f64],
    max_iter: usize,
    tol: f64,
    system: &str,
) -> SolverResult<SolveStats> {
    const SOLVER: &str = "PCG";
    let n = b.len();
    let inv_diag = inverse_diagonal(a);
    let mut r = vec![0.0; n];
    a.mat_vec_mul(x, &mut r);
    sub_from(&mut r, b);

    let init_resid = norm(&r);
    check_finite(SOLVER, system, 0, init_resid, 0.0)?;

    let mut z = vec![0.0; n];
    hadamard(&inv_diag, &r, &mut z);
    let mut p = z.clone();
    let mut rz_old = dot(&r, &z);
    let mut q = vec![0.0; n];
    let mut resid = init_resid;

    for iter in 0..max_iter {
        if resid <= tol {
            return Ok(SolveStats {
                iterations: iter,
                initial_residual: init_resid,
                final_residual: resid,
                converged: true,
            });
        }

        a.mat_vec_mul(&p, &mut q);
        let p_q = dot(&p, &q);
        if p_q.abs() < 1e-300 {
            break;
        }
        let alpha = rz_old / p_q;

        let v_alpha = f64x4::splat(alpha);
        let mut i = 0;
        while i + 4 <= n {
            let vx = f64x4::from(&x[i..i + 4]);
            let vp = f64x4::from(&p[i..i + 4]);
            let vr = f64x4::from(&r[i..i + 4]);
            let vq = f64x4::from(&q[i..i + 4]);

            let res_x = vx + v_alpha * vp;
            let res_r = vr - v_alpha * vq;

            let res_x_arr: [f64; 4] = res_x.into();
            let res_r_arr: [f64; 4] = res_r.into();
            x[i..i + 4].copy_from_slice(&res_x_arr);
            r[i..i + 4].copy_from_slice(&res_r_arr);
            i += 4;
        }
        while i < n {
            x[i] += alpha * p[i];
            r[i] -= alpha * q[i];
            i += 1;
        }

        resid = norm(&r);
        check_finite(SOLVER, system, iter, resid, init_resid)?;

        hadamard(&inv_diag, &r, &mut z);
        let rz_new = dot(&r, &z);
        let beta = rz_new / rz_old;
        let v_beta = f64x4::splat(beta);
        let mut i = 0;
        while i + 4 <= n {
            let vz = f64x4::from(&z[i..i + 4]);
            let vp = f64x4::from(&p[i..i + 4]);
            let res = vz + v_beta * vp;
            let res_arr: [f64; 4] = res.into();
            p[i..i + 4].copy_from_slice(&res_arr);
            i += 4;
        }
        while i < n {
            p[i] = z[i] + beta * p[i];
            i += 1;
        }
        rz_old = rz_new;
    }

    Ok(SolveStats {
        iterations: max_iter,
        initial_residual: init_resid,
        final_residual: resid,
        converged: resid <= tol,
    })
}

/// `r = b - r`
fn sub_from(r: &mut [f64], b: &[f64]) {
    let n = r.len();
    let mut i = 0;
    while i + 4 <= n {
        let vb = f64x4::from(&b[i..i + 4]);
        let vr = f64x4::from(&r[i..i + 4]);
        let res_arr: [f64; 4] = (vb - vr).into();
        r[i..i + 4].copy_from_slice(&res_arr);
        i += 4;
    }
    while i < n {
        r[i] = b[i] - r[i];
        i += 1;
    }
}

/// `y += a x`
fn axpy(y: &mut [f64], a: f64, x: &[f64]) {
    let n = y.len();
    let va = f64x4::splat(a);
    let mut i = 0;
    while i + 4 <= n {
        let vx = f64x4::from(&x[i..i + 4]);
        let vy = f64x4::from(&y[i..i + 4]);
        let res_arr: [f64; 4] = (vy + va * vx).into();
        y[i..i + 4].copy_from_slice(&res_arr);
        i += 4;
    }
    while i < n {
        y[i] += a * x[i];
        i += 1;
    }
}

/// `out = d * x` elementwise.
fn hadamard(d: &[f64], x: &[f64], out: &mut [f64]) {
    let n = out.len();
    let mut i = 0;
    while i + 4 <= n {
        let vd = f64x4::from(&d[i..i + 4]);
        let vx = f64x4::from(&x[i..i + 4]);
        let res_arr: [f64; 4] = (vd * vx).into();
        out[i..i + 4].copy_from_slice(&res_arr);
        i += 4;
    }
    while i < n {
        out[i] = d[i] * x[i];
        i += 1;
    }
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    let mut sum = f64x4::splat(0.0);
    let mut i = 0;
    let n = a.len();
    while i + 4 <= n {
        let va = f64x4::from(&a[i..i + 4]);
        let vb = f64x4::from(&b[i..i + 4]);
        sum += va * vb;
        i += 4;
    }
    let mut s = sum.reduce_add();
    while i < n {
        s += a[i] * b[i];
        i += 1;
    }
    s
}

pub fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1-D Laplacian with Dirichlet ends.
    fn laplacian(n: usize) -> SparseMatrix {
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push((i, i, 2.0));
            if i > 0 {
                triplets.push((i, i - 1, -1.0));
            }
            if i + 1 < n {
                triplets.push((i, i + 1, -1.0));
            }
        }
        SparseMatrix::from_triplets(n, n, &triplets)
    }

    #[test]
    fn duplicate_triplets_are_merged() {
        let m = SparseMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (0, 1, 2.0), (0, 0, 3.0), (1, 1, 5.0)]);
        assert_eq!(m.row_offsets, vec![0, 2, 3]);
        assert_eq!(m.get(0, 0), 4.0);
        assert_eq!(m.diagonal(), vec![4.0, 5.0]);
    }

    #[test]
    fn pcg_solves_laplacian() {
        let n = 37;
        let a = laplacian(n);
        assert!(a.is_symmetric(0.0));
        let exact: Vec<f64> = (0..n).map(|i| (i as f64 * 0.3).sin()).collect();
        let mut b = vec![0.0; n];
        a.mat_vec_mul(&exact, &mut b);
        let mut x = vec![0.0; n];
        let stats = solve_pcg(&a, &b, &mut x, 200, 1e-12, "test").unwrap();
        assert!(stats.converged);
        for (xi, ei) in x.iter().zip(&exact) {
            assert!((xi - ei).abs() < 1e-9);
        }
    }

    #[test]
    fn bicgstab_solves_upwind_system() {
        let n = 23;
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push((i, i, 3.0));
            if i > 0 {
                triplets.push((i, i - 1, -1.5));
            }
            if i + 1 < n {
                triplets.push((i, i + 1, -0.5));
            }
        }
        let a = SparseMatrix::from_triplets(n, n, &triplets);
        assert!(!a.is_symmetric(1e-12));
        let b: Vec<f64> = (0..n).map(|i| 1.0 + i as f64).collect();
        let mut x = vec![0.0; n];
        let stats = solve_bicgstab(&a, &b, &mut x, 200, 1e-11, "test").unwrap();
        assert!(stats.converged);
        let mut ax = vec![0.0; n];
        a.mat_vec_mul(&x, &mut ax);
        for (l, r) in ax.iter().zip(&b) {
            assert!((l - r).abs() < 1e-9);
        }
    }

    #[test]
    fn nan_right_hand_side_is_a_breakdown() {
        let a = laplacian(4);
        let b = vec![1.0, f64::NAN, 0.0, 0.0];
        let mut x = vec![0.0; 4];
        let err = solve_pcg(&a, &b, &mut x, 10, 1e-10, "Pressure").unwrap_err();
        match err {
            SolverError::SolverBreakdown { solver, system, .. } => {
                assert_eq!(solver, "PCG");
                assert_eq!(system, "Pressure");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn scale_diagonal_only_touches_diagonal() {
        let mut a = laplacian(3);
        a.scale_diagonal(2.0);
        assert_eq!(a.diagonal(), vec![4.0, 4.0, 4.0]);
        assert_eq!(a.get(0, 1), -1.0);
    }
}
