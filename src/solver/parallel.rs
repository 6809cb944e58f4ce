//! Dispatch context: elementwise loops over cells and faces.
//!
//! Every kernel is a pure closure over an entity index. The context owns the
//! decision of running it serially or on the rayon pool, so the numerical code
//! has one source of truth for both backends. Loop bodies must not depend on
//! iteration order; floating-point reductions are not bit-reproducible across
//! backends.

use crate::solver::mesh::Mesh;
use bytemuck::Pod;
use num_traits::Zero;
use rayon::prelude::*;
use std::ops::AddAssign;
use std::sync::atomic::{AtomicU64, Ordering};

/// Below this size a threaded context still runs loops inline.
const MIN_PARALLEL_LEN: usize = 1024;

/// Above this many cells per-thread gather buffers get too large.
const GATHER_CELL_LIMIT: usize = 200_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Serial,
    Threads,
}

/// Reduction strategy for face-to-cell scatter-add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SumType {
    Serial,
    /// Compare-and-swap accumulation into shared cells.
    Atomic,
    /// Per-thread partial arrays reduced at the end.
    Gather,
}

#[derive(Debug, Clone)]
pub struct DispatchContext {
    backend: Backend,
    min_parallel_len: usize,
}

impl Default for DispatchContext {
    fn default() -> Self {
        Self::threaded()
    }
}

impl DispatchContext {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            min_parallel_len: MIN_PARALLEL_LEN,
        }
    }

    pub fn serial() -> Self {
        Self::new(Backend::Serial)
    }

    pub fn threaded() -> Self {
        Self::new(Backend::Threads)
    }

    /// Threaded context that never falls back to inline loops.
    pub fn threaded_eager() -> Self {
        Self {
            backend: Backend::Threads,
            min_parallel_len: 0,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    fn runs_parallel(&self, n: usize) -> bool {
        self.backend == Backend::Threads && n >= self.min_parallel_len
    }

    /// Runs `body(i, &mut out[i])` for every entry of `out`.
    pub fn parallel_for<T, F>(&self, out: &mut [T], body: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Sync + Send,
    {
        if self.runs_parallel(out.len()) {
            out.par_iter_mut()
                .enumerate()
                .for_each(|(i, v)| body(i, v));
        } else {
            for (i, v) in out.iter_mut().enumerate() {
                body(i, v);
            }
        }
    }

    /// Two outputs written by one kernel.
    pub fn parallel_for2<A, B, F>(&self, a: &mut [A], b: &mut [B], body: F)
    where
        A: Send,
        B: Send,
        F: Fn(usize, &mut A, &mut B) + Sync + Send,
    {
        debug_assert_eq!(a.len(), b.len());
        if self.runs_parallel(a.len()) {
            a.par_iter_mut()
                .zip(b.par_iter_mut())
                .enumerate()
                .for_each(|(i, (x, y))| body(i, x, y));
        } else {
            for (i, (x, y)) in a.iter_mut().zip(b.iter_mut()).enumerate() {
                body(i, x, y);
            }
        }
    }

    /// Per-face kernel over interior faces writing one value per face.
    pub fn parallel_for_i_faces<T, F>(&self, mesh: &Mesh, out: &mut [T], body: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Sync + Send,
    {
        debug_assert_eq!(out.len(), mesh.n_i_faces());
        self.parallel_for(out, body);
    }

    /// Per-face kernel over boundary faces writing one value per face.
    pub fn parallel_for_b_faces<T, F>(&self, mesh: &Mesh, out: &mut [T], body: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Sync + Send,
    {
        debug_assert_eq!(out.len(), mesh.n_b_faces());
        self.parallel_for(out, body);
    }

    /// Sum of `f(i)` over `0..n`.
    pub fn sum<T, F>(&self, n: usize, f: F) -> T
    where
        T: Zero + Send + Copy + std::ops::Add<Output = T>,
        F: Fn(usize) -> T + Sync + Send,
    {
        if self.runs_parallel(n) {
            (0..n).into_par_iter().map(&f).reduce(T::zero, |a, b| a + b)
        } else {
            (0..n).map(f).fold(T::zero(), |a, b| a + b)
        }
    }

    /// Maximum of `f(i)` over `0..n`, `f64::MIN` for an empty range.
    pub fn max<F>(&self, n: usize, f: F) -> f64
    where
        F: Fn(usize) -> f64 + Sync + Send,
    {
        if self.runs_parallel(n) {
            (0..n).into_par_iter().map(&f).reduce(|| f64::MIN, f64::max)
        } else {
            (0..n).map(f).fold(f64::MIN, f64::max)
        }
    }

    /// Blocks until previously issued loops completed. Both backends here
    /// finish a loop before returning, so this is a synchronization point
    /// only; callers still place it before reductions and halo exchanges.
    pub fn wait(&self) {}

    /// Reduction strategy for interior-face loops, which write two cells.
    pub fn i_sum_type(&self, mesh: &Mesh) -> SumType {
        match self.backend {
            Backend::Serial => SumType::Serial,
            Backend::Threads if mesh.n_i_faces() < self.min_parallel_len => SumType::Serial,
            Backend::Threads if mesh.n_cells_ext > GATHER_CELL_LIMIT => SumType::Atomic,
            Backend::Threads => SumType::Gather,
        }
    }

    /// Reduction strategy for boundary-face loops, which write one cell.
    pub fn b_sum_type(&self, mesh: &Mesh) -> SumType {
        match self.backend {
            Backend::Serial => SumType::Serial,
            Backend::Threads if mesh.n_b_faces() < self.min_parallel_len => SumType::Serial,
            Backend::Threads => SumType::Atomic,
        }
    }

    /// Scatter-add of per-entity contributions into `out`.
    ///
    /// `body(e)` returns `K` `(cell, value)` pairs; cells at or beyond
    /// `n_owned` (ghost cells) are skipped.
    pub fn dispatch_sum<T, F, const K: usize>(
        &self,
        sum_type: SumType,
        n_entities: usize,
        n_owned: usize,
        out: &mut [T],
        body: F,
    ) where
        T: Pod + Zero + AddAssign + Send + Sync,
        F: Fn(usize) -> [(usize, T); K] + Sync + Send,
    {
        let n_owned = n_owned.min(out.len());
        match sum_type {
            SumType::Serial => {
                for e in 0..n_entities {
                    for (c, v) in body(e) {
                        if c < n_owned {
                            out[c] += v;
                        }
                    }
                }
            }
            SumType::Gather => {
                let partial = (0..n_entities)
                    .into_par_iter()
                    .fold(
                        || vec![T::zero(); n_owned],
                        |mut acc, e| {
                            for (c, v) in body(e) {
                                if c < n_owned {
                                    acc[c] += v;
                                }
                            }
                            acc
                        },
                    )
                    .reduce(
                        || vec![T::zero(); n_owned],
                        |mut a, b| {
                            for (x, y) in a.iter_mut().zip(b) {
                                *x += y;
                            }
                            a
                        },
                    );
                for (x, y) in out.iter_mut().zip(partial) {
                    *x += y;
                }
            }
            SumType::Atomic => {
                let lanes = std::mem::size_of::<T>() / std::mem::size_of::<f64>();
                let flat: &mut [f64] = bytemuck::cast_slice_mut(&mut out[..n_owned]);
                let acc: Vec<AtomicU64> = flat.iter().map(|v| AtomicU64::new(v.to_bits())).collect();
                (0..n_entities).into_par_iter().for_each(|e| {
                    for (c, v) in body(e) {
                        if c < n_owned {
                            let parts: &[f64] = bytemuck::cast_slice(std::slice::from_ref(&v));
                            for (k, &x) in parts.iter().enumerate() {
                                atomic_add(&acc[c * lanes + k], x);
                            }
                        }
                    }
                });
                for (v, a) in flat.iter_mut().zip(acc) {
                    *v = f64::from_bits(a.into_inner());
                }
            }
        }
    }

    /// Adds `body(f) = (to_cell_0, to_cell_1)` of each interior face to its two cells.
    pub fn scatter_i_faces<T, F>(&self, mesh: &Mesh, out: &mut [T], body: F)
    where
        T: Pod + Zero + AddAssign + Send + Sync,
        F: Fn(usize) -> (T, T) + Sync + Send,
    {
        let sum_type = self.i_sum_type(mesh);
        self.dispatch_sum(sum_type, mesh.n_i_faces(), mesh.n_cells, out, |f| {
            let [c0, c1] = mesh.i_face_cells[f];
            let (v0, v1) = body(f);
            [(c0, v0), (c1, v1)]
        });
    }

    /// Adds `body(f)` of each boundary face to its cell.
    pub fn scatter_b_faces<T, F>(&self, mesh: &Mesh, out: &mut [T], body: F)
    where
        T: Pod + Zero + AddAssign + Send + Sync,
        F: Fn(usize) -> T + Sync + Send,
    {
        let sum_type = self.b_sum_type(mesh);
        self.dispatch_sum(sum_type, mesh.n_b_faces(), mesh.n_cells, out, |f| {
            [(mesh.b_face_cells[f], body(f))]
        });
    }
}

fn atomic_add(cell: &AtomicU64, x: f64) {
    let mut current = cell.load(Ordering::Relaxed);
    loop {
        let next = (f64::from_bits(current) + x).to_bits();
        match cell.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(seen) => current = seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::mesh::{generate_box_mesh, BoxSides};
    use nalgebra::Vector3;

    fn face_count_per_cell(ctx: &DispatchContext, mesh: &Mesh, sum_type: SumType) -> Vec<f64> {
        let mut out = vec![0.0; mesh.n_cells];
        ctx.dispatch_sum(sum_type, mesh.n_i_faces(), mesh.n_cells, &mut out, |f| {
            let [c0, c1] = mesh.i_face_cells[f];
            [(c0, 1.0), (c1, 1.0)]
        });
        out
    }

    #[test]
    fn all_sum_types_agree_on_face_counts() {
        let mesh = generate_box_mesh(6, 5, 4, 1.0, 1.0, 1.0, &BoxSides::wall()).unwrap();
        let ctx = DispatchContext::threaded_eager();
        let serial = face_count_per_cell(&ctx, &mesh, SumType::Serial);
        let gather = face_count_per_cell(&ctx, &mesh, SumType::Gather);
        let atomic = face_count_per_cell(&ctx, &mesh, SumType::Atomic);
        assert_eq!(serial, gather);
        assert_eq!(serial, atomic);
        // Corner cell of a box has three interior neighbours.
        assert_eq!(serial[0], 3.0);
    }

    #[test]
    fn vector_scatter_matches_serial() {
        let mesh = generate_box_mesh(4, 4, 4, 1.0, 2.0, 3.0, &BoxSides::wall()).unwrap();
        let serial_ctx = DispatchContext::serial();
        let threaded = DispatchContext::threaded_eager();
        let mut a = vec![Vector3::zeros(); mesh.n_cells];
        let mut b = vec![Vector3::zeros(); mesh.n_cells];
        let body = |f: usize| (mesh.i_face_normal[f], -mesh.i_face_normal[f]);
        serial_ctx.scatter_i_faces(&mesh, &mut a, body);
        threaded.scatter_i_faces(&mesh, &mut b, body);
        serial_ctx.scatter_b_faces(&mesh, &mut a, |f| mesh.b_face_normal[f]);
        threaded.scatter_b_faces(&mesh, &mut b, |f| mesh.b_face_normal[f]);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).norm() < 1e-12);
            // Closed cells: outward normals sum to zero.
            assert!(x.norm() < 1e-12, "normals do not close: {:?}", x);
        }
    }

    #[test]
    fn ghost_cells_are_not_written() {
        let ctx = DispatchContext::serial();
        let mut out = vec![0.0; 4];
        ctx.dispatch_sum(SumType::Serial, 2, 2, &mut out, |e| [(e, 1.0), (e + 2, 5.0)]);
        assert_eq!(out, vec![1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn reductions_match_between_backends() {
        let n = 5000;
        let serial = DispatchContext::serial().sum(n, |i| i as f64);
        let threaded = DispatchContext::threaded().sum(n, |i| i as f64);
        assert_eq!(serial, threaded);
        assert_eq!(DispatchContext::threaded().max(n, |i| i as f64), (n - 1) as f64);
    }
}
