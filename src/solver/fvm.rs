//! Cell-centred finite-volume operators: gradients, face coefficients,
//! fluxes and the coupled vector convection/diffusion operator.

use crate::solver::boundary::{ScalarBc, VectorBc};
use crate::solver::linear_solver::SparseMatrix;
use crate::solver::mesh::Mesh;
use crate::solver::options::FaceMean;
use crate::solver::parallel::DispatchContext;
use nalgebra::{Matrix3, Vector3};

/// Hydrostatic offset `f_c . (x - x_c)` of a cell-wise force field.
#[inline]
fn hydrostatic_offset(mesh: &Mesh, f_ext: Option<&[Vector3<f64>]>, c: usize, x: &Vector3<f64>) -> f64 {
    f_ext.map_or(0.0, |f| f[c].dot(&(x - mesh.cell_cen[c])))
}

fn divide_by_volume<T>(mesh: &Mesh, values: &mut [T])
where
    T: Copy + std::ops::DivAssign<f64>,
{
    for (v, &vol) in values.iter_mut().zip(&mesh.cell_vol[..mesh.n_cells]) {
        *v /= vol;
    }
}

fn green_gauss_scalar(
    ctx: &DispatchContext,
    mesh: &Mesh,
    var: &[f64],
    bc: &ScalarBc,
    f_ext: Option<&[Vector3<f64>]>,
    rec: Option<&[Vector3<f64>]>,
) -> Vec<Vector3<f64>> {
    let mut grad = vec![Vector3::zeros(); mesh.n_cells_ext];
    ctx.scatter_i_faces(mesh, &mut grad, |f| {
        let [i, j] = mesh.i_face_cells[f];
        let xf = mesh.i_face_cog[f];
        let pond = mesh.weight[f];
        let mut pf = pond * (var[i] + hydrostatic_offset(mesh, f_ext, i, &xf))
            + (1.0 - pond) * (var[j] + hydrostatic_offset(mesh, f_ext, j, &xf));
        if let Some(r) = rec {
            pf += 0.5 * (r[i] + r[j]).dot(&mesh.dofij[f]);
        }
        let flux = mesh.i_face_normal[f] * pf;
        (flux, -flux)
    });
    ctx.scatter_b_faces(mesh, &mut grad, |f| {
        let c = mesh.b_face_cells[f];
        let mut pi = var[c] + hydrostatic_offset(mesh, f_ext, c, &mesh.b_face_cog[f]);
        if let Some(r) = rec {
            pi += r[c].dot(&mesh.diipb[f]);
        }
        mesh.b_face_normal[f] * bc.face_value(f, pi)
    });
    ctx.wait();
    divide_by_volume(mesh, &mut grad);
    mesh.sync(&mut grad);
    grad
}

fn max_change(a: &[Vector3<f64>], b: &[Vector3<f64>]) -> (f64, f64) {
    a.iter().zip(b).fold((0.0_f64, 0.0_f64), |(d, m), (x, y)| {
        (d.max((x - y).norm()), m.max(x.norm()))
    })
}

/// Green-Gauss gradient of a scalar with `sweeps` non-orthogonal
/// reconstruction passes, stopped early once the gradient changes by less
/// than `tolerance` relative to its magnitude.
pub fn scalar_gradient(
    ctx: &DispatchContext,
    mesh: &Mesh,
    var: &[f64],
    bc: &ScalarBc,
    sweeps: usize,
    tolerance: f64,
) -> Vec<Vector3<f64>> {
    gradient_potential(ctx, mesh, var, bc, None, sweeps, tolerance)
}

/// Gradient of a potential balanced by a cell-wise force `f_ext`: face
/// values are extrapolated from each side with `p + f.(x_f - x)`, which
/// makes the gradient exact for hydrostatic states.
pub fn gradient_potential(
    ctx: &DispatchContext,
    mesh: &Mesh,
    var: &[f64],
    bc: &ScalarBc,
    f_ext: Option<&[Vector3<f64>]>,
    sweeps: usize,
    tolerance: f64,
) -> Vec<Vector3<f64>> {
    let mut grad = green_gauss_scalar(ctx, mesh, var, bc, f_ext, None);
    for _ in 0..sweeps {
        let rec: Vec<Vector3<f64>> = match f_ext {
            Some(f) => grad.iter().zip(f).map(|(g, f)| g - f).collect(),
            None => grad.clone(),
        };
        let next = green_gauss_scalar(ctx, mesh, var, bc, f_ext, Some(&rec));
        let (change, magnitude) = max_change(&next[..mesh.n_cells], &grad[..mesh.n_cells]);
        grad = next;
        if change <= tolerance * magnitude.max(1e-300) {
            break;
        }
    }
    grad
}

fn green_gauss_vector(
    ctx: &DispatchContext,
    mesh: &Mesh,
    var: &[Vector3<f64>],
    bc: &VectorBc,
    rec: Option<&[Matrix3<f64>]>,
) -> Vec<Matrix3<f64>> {
    let mut grad = vec![Matrix3::zeros(); mesh.n_cells_ext];
    ctx.scatter_i_faces(mesh, &mut grad, |f| {
        let [i, j] = mesh.i_face_cells[f];
        let pond = mesh.weight[f];
        let mut uf = var[i] * pond + var[j] * (1.0 - pond);
        if let Some(r) = rec {
            uf += (r[i] + r[j]) * mesh.dofij[f] * 0.5;
        }
        let flux = uf * mesh.i_face_normal[f].transpose();
        (flux, -flux)
    });
    ctx.scatter_b_faces(mesh, &mut grad, |f| {
        let c = mesh.b_face_cells[f];
        let mut ui = var[c];
        if let Some(r) = rec {
            ui += r[c] * mesh.diipb[f];
        }
        bc.face_value(f, &ui) * mesh.b_face_normal[f].transpose()
    });
    ctx.wait();
    divide_by_volume(mesh, &mut grad);
    mesh.sync(&mut grad);
    grad
}

/// Velocity gradient `G[r][c] = du_r/dx_c`.
pub fn vector_gradient(
    ctx: &DispatchContext,
    mesh: &Mesh,
    var: &[Vector3<f64>],
    bc: &VectorBc,
    sweeps: usize,
    tolerance: f64,
) -> Vec<Matrix3<f64>> {
    let mut grad = green_gauss_vector(ctx, mesh, var, bc, None);
    for _ in 0..sweeps {
        let next = green_gauss_vector(ctx, mesh, var, bc, Some(&grad));
        let (change, magnitude) = grad[..mesh.n_cells]
            .iter()
            .zip(&next[..mesh.n_cells])
            .fold((0.0_f64, 0.0_f64), |(d, m), (a, b)| (d.max((a - b).norm()), m.max(b.norm())));
        grad = next;
        if change <= tolerance * magnitude.max(1e-300) {
            break;
        }
    }
    grad
}

#[inline]
fn face_mean(mean: FaceMean, pond: f64, ki: f64, kj: f64) -> f64 {
    match mean {
        FaceMean::Arithmetic => pond * ki + (1.0 - pond) * kj,
        FaceMean::Harmonic => {
            let denom = pond * ki + (1.0 - pond) * kj;
            if denom.abs() > 1e-300 {
                ki * kj / denom
            } else {
                0.0
            }
        }
    }
}

/// `viscf = k_f S / d_ij` on interior faces, `viscb = S` on boundary faces.
pub fn face_viscosity(
    ctx: &DispatchContext,
    mesh: &Mesh,
    coef: &[f64],
    mean: FaceMean,
) -> (Vec<f64>, Vec<f64>) {
    let mut viscf = vec![0.0; mesh.n_i_faces()];
    ctx.parallel_for_i_faces(mesh, &mut viscf, |f, v| {
        let [i, j] = mesh.i_face_cells[f];
        let kf = face_mean(mean, mesh.weight[f], coef[i], coef[j]);
        *v = kf * mesh.i_face_surf[f] / mesh.i_dist[f];
    });
    (viscf, mesh.b_face_surf.clone())
}

/// Tensorial diffusivity projected on the face normal: `n.K_f.n S / d_ij`.
pub fn face_viscosity_projected(
    ctx: &DispatchContext,
    mesh: &Mesh,
    coef: &[Matrix3<f64>],
) -> (Vec<f64>, Vec<f64>) {
    let mut viscf = vec![0.0; mesh.n_i_faces()];
    ctx.parallel_for_i_faces(mesh, &mut viscf, |f, v| {
        let [i, j] = mesh.i_face_cells[f];
        let pond = mesh.weight[f];
        let n = mesh.i_face_u_normal[f];
        let kf = coef[i] * pond + coef[j] * (1.0 - pond);
        *v = n.dot(&(kf * n)) * mesh.i_face_surf[f] / mesh.i_dist[f];
    });
    (viscf, mesh.b_face_surf.clone())
}

/// Face diffusivity of a vector equation: scalar, or a full tensor for
/// anisotropic diffusion.
#[derive(Clone, Debug)]
pub enum FaceDiffusivity {
    Isotropic(Vec<f64>),
    Anisotropic(Vec<Matrix3<f64>>),
}

impl FaceDiffusivity {
    /// Isotropic from a cell coefficient, tensorial from cell tensors.
    pub fn isotropic(ctx: &DispatchContext, mesh: &Mesh, coef: &[f64], mean: FaceMean) -> Self {
        FaceDiffusivity::Isotropic(face_viscosity(ctx, mesh, coef, mean).0)
    }

    pub fn anisotropic(ctx: &DispatchContext, mesh: &Mesh, coef: &[Matrix3<f64>]) -> Self {
        let mut viscf = vec![Matrix3::zeros(); mesh.n_i_faces()];
        ctx.parallel_for_i_faces(mesh, &mut viscf, |f, v| {
            let [i, j] = mesh.i_face_cells[f];
            let pond = mesh.weight[f];
            *v = (coef[i] * pond + coef[j] * (1.0 - pond)) * (mesh.i_face_surf[f] / mesh.i_dist[f]);
        });
        FaceDiffusivity::Anisotropic(viscf)
    }

    #[inline]
    pub fn apply(&self, f: usize, d: &Vector3<f64>) -> Vector3<f64> {
        match self {
            FaceDiffusivity::Isotropic(v) => d * v[f],
            FaceDiffusivity::Anisotropic(v) => v[f] * d,
        }
    }

    #[inline]
    pub fn block(&self, f: usize) -> Matrix3<f64> {
        match self {
            FaceDiffusivity::Isotropic(v) => Matrix3::identity() * v[f],
            FaceDiffusivity::Anisotropic(v) => v[f],
        }
    }

    /// Rusanov floor `max(viscf, r/2)` (componentwise against `r/2 n n^T`
    /// for tensors).
    pub fn apply_rusanov_floor(&mut self, mesh: &Mesh, rusanov: &[f64]) {
        match self {
            FaceDiffusivity::Isotropic(v) => {
                for (vf, &r) in v.iter_mut().zip(rusanov) {
                    *vf = vf.max(0.5 * r);
                }
            }
            FaceDiffusivity::Anisotropic(v) => {
                for (f, vf) in v.iter_mut().enumerate() {
                    let n = mesh.i_face_u_normal[f];
                    let floor = n * n.transpose() * (0.5 * rusanov[f]);
                    *vf = vf.zip_map(&floor, f64::max);
                }
            }
        }
    }
}

/// Sum of outgoing face fluxes per cell; ghost entries stay zero.
pub fn divergence(ctx: &DispatchContext, mesh: &Mesh, i_flux: &[f64], b_flux: &[f64]) -> Vec<f64> {
    let mut div = vec![0.0; mesh.n_cells_ext];
    ctx.scatter_i_faces(mesh, &mut div, |f| (i_flux[f], -i_flux[f]));
    ctx.scatter_b_faces(mesh, &mut div, |f| b_flux[f]);
    ctx.wait();
    div
}

/// `m = rho_f u_f . S`, with the face velocity optionally reconstructed
/// from the velocity gradient.
#[allow(clippy::too_many_arguments)]
pub fn mass_flux(
    ctx: &DispatchContext,
    mesh: &Mesh,
    rho: &[f64],
    rho_b: &[f64],
    vel: &[Vector3<f64>],
    bc: &VectorBc,
    grad: Option<&[Matrix3<f64>]>,
    i_flux: &mut [f64],
    b_flux: &mut [f64],
) {
    ctx.parallel_for_i_faces(mesh, i_flux, |f, m| {
        let [i, j] = mesh.i_face_cells[f];
        let pond = mesh.weight[f];
        let rho_f = pond * rho[i] + (1.0 - pond) * rho[j];
        let mut uf = vel[i] * pond + vel[j] * (1.0 - pond);
        if let Some(g) = grad {
            uf += (g[i] + g[j]) * mesh.dofij[f] * 0.5;
        }
        *m = rho_f * uf.dot(&mesh.i_face_normal[f]);
    });
    ctx.parallel_for_b_faces(mesh, b_flux, |f, m| {
        let c = mesh.b_face_cells[f];
        let mut ui = vel[c];
        if let Some(g) = grad {
            ui += g[c] * mesh.diipb[f];
        }
        *m = rho_b[f] * bc.face_value(f, &ui).dot(&mesh.b_face_normal[f]);
    });
    ctx.wait();
}

/// A scalar potential entering a face diffusion flux.
#[derive(Clone, Copy)]
pub struct Potential<'a> {
    pub values: &'a [f64],
    pub bc: &'a ScalarBc,
    /// Force balanced by the potential; interior face values are
    /// extrapolated with it.
    pub f_ext: Option<&'a [Vector3<f64>]>,
    /// Gradient used for non-orthogonal reconstruction.
    pub grad: Option<&'a [Vector3<f64>]>,
}

impl Potential<'_> {
    #[inline]
    fn reconstruction(&self, c: usize, offset: &Vector3<f64>) -> f64 {
        match (self.grad, self.f_ext) {
            (Some(g), Some(f)) => (g[c] - f[c]).dot(offset),
            (Some(g), None) => g[c].dot(offset),
            _ => 0.0,
        }
    }
}

/// Adds the diffusion flux of a potential,
/// `viscf ((p_i + f_i.(x_f - x_i)) - (p_j + f_j.(x_f - x_j)))` on interior
/// faces and `viscb (af + bf p_I')` on boundary faces.
pub fn face_diffusion_potential(
    ctx: &DispatchContext,
    mesh: &Mesh,
    pot: &Potential,
    viscf: &[f64],
    viscb: &[f64],
    i_flux: &mut [f64],
    b_flux: &mut [f64],
) {
    let p = pot.values;
    ctx.parallel_for_i_faces(mesh, i_flux, |f, m| {
        let [i, j] = mesh.i_face_cells[f];
        let xf = mesh.i_face_cog[f];
        let pi = p[i] + hydrostatic_offset(mesh, pot.f_ext, i, &xf) + pot.reconstruction(i, &mesh.diipf[f]);
        let pj = p[j] + hydrostatic_offset(mesh, pot.f_ext, j, &xf) + pot.reconstruction(j, &mesh.djjpf[f]);
        *m += viscf[f] * (pi - pj);
    });
    ctx.parallel_for_b_faces(mesh, b_flux, |f, m| {
        let c = mesh.b_face_cells[f];
        let pip = p[c] + pot.reconstruction(c, &mesh.diipb[f]);
        *m += viscb[f] * pot.bc.face_flux(f, pip);
    });
    ctx.wait();
}

/// Discrete diffusion balance `div(face_diffusion_potential(p))`.
pub fn diffusion_balance(
    ctx: &DispatchContext,
    mesh: &Mesh,
    pot: &Potential,
    viscf: &[f64],
    viscb: &[f64],
) -> Vec<f64> {
    let mut i_flux = vec![0.0; mesh.n_i_faces()];
    let mut b_flux = vec![0.0; mesh.n_b_faces()];
    face_diffusion_potential(ctx, mesh, pot, viscf, viscb, &mut i_flux, &mut b_flux);
    divergence(ctx, mesh, &i_flux, &b_flux)
}

/// Symmetric matrix of the scalar diffusion operator plus an optional
/// diagonal `rovsdt`, on owned cells.
pub fn diffusion_matrix(
    mesh: &Mesh,
    viscf: &[f64],
    viscb: &[f64],
    bc: &ScalarBc,
    rovsdt: Option<&[f64]>,
) -> SparseMatrix {
    let n = mesh.n_cells;
    let mut triplets = Vec::with_capacity(n + 2 * mesh.n_i_faces() + mesh.n_b_faces());
    for c in 0..n {
        triplets.push((c, c, rovsdt.map_or(0.0, |r| r[c])));
    }
    for (f, &[i, j]) in mesh.i_face_cells.iter().enumerate() {
        let (ci, cj) = (mesh.owner_of(i), mesh.owner_of(j));
        if i < n {
            triplets.push((i, i, viscf[f]));
            triplets.push((i, cj, -viscf[f]));
        }
        if j < n {
            triplets.push((j, j, viscf[f]));
            triplets.push((j, ci, -viscf[f]));
        }
    }
    for f in 0..mesh.n_b_faces() {
        let c = mesh.b_face_cells[f];
        triplets.push((c, c, viscb[f] * bc.bf[f]));
    }
    SparseMatrix::from_triplets(n, n, &triplets)
}

/// Coefficients of the coupled convection/diffusion operator of a vector.
pub struct ConvectionDiffusion<'a> {
    pub i_flux: &'a [f64],
    pub b_flux: &'a [f64],
    pub viscf: &'a FaceDiffusivity,
    pub viscb: &'a [f64],
    pub convection: bool,
    pub diffusion: bool,
}

impl ConvectionDiffusion<'_> {
    /// Explicit balance of `u`: first-order upwind convection in
    /// non-conservative form plus diffusion, per owned cell.
    pub fn balance(
        &self,
        ctx: &DispatchContext,
        mesh: &Mesh,
        u: &[Vector3<f64>],
        bc: &VectorBc,
        grad: Option<&[Matrix3<f64>]>,
    ) -> Vec<Vector3<f64>> {
        let conv = if self.convection { 1.0 } else { 0.0 };
        let diff = if self.diffusion { 1.0 } else { 0.0 };
        let mut bal = vec![Vector3::zeros(); mesh.n_cells_ext];
        ctx.scatter_i_faces(mesh, &mut bal, |f| {
            let [i, j] = mesh.i_face_cells[f];
            let m = self.i_flux[f] * conv;
            let du = u[j] - u[i];
            let (mut ui, mut uj) = (u[i], u[j]);
            if let Some(g) = grad {
                ui += g[i] * mesh.diipf[f];
                uj += g[j] * mesh.djjpf[f];
            }
            let vis = self.viscf.apply(f, &(ui - uj)) * diff;
            (du * m.min(0.0) + vis, du * m.max(0.0) - vis)
        });
        ctx.scatter_b_faces(mesh, &mut bal, |f| {
            let c = mesh.b_face_cells[f];
            let mut uip = u[c];
            if let Some(g) = grad {
                uip += g[c] * mesh.diipb[f];
            }
            let m = self.b_flux[f] * conv;
            let ub = bc.face_value(f, &uip);
            (ub - u[c]) * m.min(0.0) + bc.face_flux(f, &uip) * (self.viscb[f] * diff)
        });
        ctx.wait();
        bal
    }

    /// `3 n x 3 n` matrix `fimp + theta A` where `A` is the implicit part of
    /// [`balance`](Self::balance) without reconstruction.
    pub fn matrix(&self, mesh: &Mesh, bc: &VectorBc, fimp: &[Matrix3<f64>], theta: f64) -> SparseMatrix {
        let n = mesh.n_cells;
        let conv = if self.convection { 1.0 } else { 0.0 };
        let diff = if self.diffusion { 1.0 } else { 0.0 };
        let mut diag: Vec<Matrix3<f64>> = fimp[..n].to_vec();
        let tensor_blocks = matches!(self.viscf, FaceDiffusivity::Anisotropic(_));
        let mut triplets = Vec::with_capacity(9 * n + (if tensor_blocks { 18 } else { 6 }) * mesh.n_i_faces());

        let push_off = |row: usize, col: usize, block: Matrix3<f64>, triplets: &mut Vec<(usize, usize, f64)>| {
            for r in 0..3 {
                for k in 0..3 {
                    if tensor_blocks || r == k {
                        triplets.push((3 * row + r, 3 * col + k, block[(r, k)]));
                    }
                }
            }
        };

        for (f, &[i, j]) in mesh.i_face_cells.iter().enumerate() {
            let m = self.i_flux[f] * conv;
            let k = self.viscf.block(f) * diff;
            let eye = Matrix3::identity();
            if i < n {
                diag[i] += (k - eye * m.min(0.0)) * theta;
                push_off(i, mesh.owner_of(j), (eye * m.min(0.0) - k) * theta, &mut triplets);
            }
            if j < n {
                diag[j] += (k + eye * m.max(0.0)) * theta;
                push_off(j, mesh.owner_of(i), (-eye * m.max(0.0) - k) * theta, &mut triplets);
            }
        }
        for f in 0..mesh.n_b_faces() {
            let c = mesh.b_face_cells[f];
            let m = self.b_flux[f] * conv;
            diag[c] += ((bc.b[f] - Matrix3::identity()) * m.min(0.0) + bc.bf[f] * (self.viscb[f] * diff)) * theta;
        }
        for (c, block) in diag.iter().enumerate() {
            for r in 0..3 {
                for k in 0..3 {
                    triplets.push((3 * c + r, 3 * c + k, block[(r, k)]));
                }
            }
        }
        SparseMatrix::from_triplets(3 * n, 3 * n, &triplets)
    }
}
