//! Defect-correction solves of scalar potentials and of the coupled
//! velocity system.
//!
//! Each sweep evaluates the full (reconstructed) residual, solves the
//! non-reconstructed matrix for an increment and applies it. The loop stops
//! when the residual drops below `sweep_tolerance * rnorm`, where `rnorm`
//! normalises by the initial state; exhausting the sweep budget is logged,
//! not returned as an error.

use crate::solver::boundary::{ScalarBc, VectorBc};
use crate::solver::error::SolverResult;
use crate::solver::fvm::{self, ConvectionDiffusion, Potential};
use crate::solver::linear_solver::{self, SolveStats};
use crate::solver::mesh::Mesh;
use crate::solver::options::EquationParams;
use crate::solver::parallel::DispatchContext;
use nalgebra::{Matrix3, Vector3};

/// Factor applied to the diagonal of singular (pure Neumann) systems.
pub const DIAGONAL_STRENGTHENING: f64 = 1.0 + 1e-7;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepReport {
    pub sweeps: usize,
    /// Normalisation of the residual.
    pub rnorm: f64,
    /// Norm of the last residual.
    pub residual: f64,
    pub converged: bool,
    pub linear: Option<SolveStats>,
}

impl SweepReport {
    fn trivial(rnorm: f64, residual: f64) -> Self {
        Self {
            sweeps: 0,
            rnorm,
            residual,
            converged: true,
            linear: None,
        }
    }

    /// Residual relative to its normalisation.
    pub fn relative_residual(&self) -> f64 {
        if self.rnorm > 0.0 {
            self.residual / self.rnorm
        } else {
            0.0
        }
    }
}

/// Diffusion equation of a potential:
/// `rovsdt x + div(face_diffusion_potential(x; f_ext)) = smbr`.
pub struct ScalarSystem<'a> {
    pub viscf: &'a [f64],
    pub viscb: &'a [f64],
    pub bc: &'a ScalarBc,
    pub rovsdt: Option<&'a [f64]>,
    pub f_ext: Option<&'a [Vector3<f64>]>,
    /// Strengthen the diagonal, required when no Dirichlet face pins the level.
    pub strengthen_diagonal: bool,
}

impl ScalarSystem<'_> {
    fn residual(
        &self,
        ctx: &DispatchContext,
        mesh: &Mesh,
        eq: &EquationParams,
        x: &[f64],
        smbr: &[f64],
        reconstruct: bool,
    ) -> Vec<f64> {
        let grad = reconstruct.then(|| {
            fvm::gradient_potential(ctx, mesh, x, self.bc, self.f_ext, eq.gradient_sweeps, eq.gradient_tolerance)
        });
        let pot = Potential {
            values: x,
            bc: self.bc,
            f_ext: self.f_ext,
            grad: grad.as_deref(),
        };
        let bal = fvm::diffusion_balance(ctx, mesh, &pot, self.viscf, self.viscb);
        let mut rhs = vec![0.0; mesh.n_cells];
        ctx.parallel_for(&mut rhs, |c, r| {
            *r = smbr[c] - bal[c] - self.rovsdt.map_or(0.0, |d| d[c] * x[c]);
        });
        rhs
    }
}

/// Solves a scalar potential equation in place; `x` holds the initial guess
/// and has `n_cells_ext` entries. `last_increment` receives the increment
/// applied by the final sweep (zero when no sweep ran), so callers can
/// update fluxes with a non-reconstructed last step.
pub fn iterative_solve_scalar(
    ctx: &DispatchContext,
    mesh: &Mesh,
    eq: &EquationParams,
    system: &ScalarSystem,
    x: &mut [f64],
    smbr: &[f64],
    mut last_increment: Option<&mut [f64]>,
) -> SolverResult<SweepReport> {
    let n = mesh.n_cells;
    if let Some(li) = last_increment.as_deref_mut() {
        li.iter_mut().for_each(|v| *v = 0.0);
    }
    let mut a = fvm::diffusion_matrix(mesh, system.viscf, system.viscb, system.bc, system.rovsdt);
    if system.strengthen_diagonal {
        a.scale_diagonal(DIAGONAL_STRENGTHENING);
    }
    let reconstruct = eq.flux_reconstruction && eq.n_sweeps > 1;
    let mut rhs = system.residual(ctx, mesh, eq, x, smbr, reconstruct);

    let mut w = vec![0.0; n];
    a.mat_vec_mul(&x[..n], &mut w);
    for (wc, r) in w.iter_mut().zip(&rhs) {
        *wc += r;
    }
    ctx.wait();
    let rnorm = linear_solver::norm(&w);
    let mut residual = linear_solver::norm(&rhs);
    if rnorm <= 0.0 {
        return Ok(SweepReport::trivial(rnorm, residual));
    }

    let max_sweeps = eq.n_sweeps.max(1) as usize;
    let mut report = SweepReport {
        sweeps: 0,
        rnorm,
        residual,
        converged: false,
        linear: None,
    };
    let mut dx = vec![0.0; n];
    while report.sweeps < max_sweeps {
        if residual <= eq.sweep_tolerance * rnorm {
            report.converged = true;
            break;
        }
        dx.iter_mut().for_each(|v| *v = 0.0);
        let stats = linear_solver::solve_pcg(
            &a,
            &rhs,
            &mut dx,
            eq.max_linear_iterations,
            eq.solver_tolerance * rnorm,
            &eq.name,
        )?;
        for (xc, d) in x.iter_mut().zip(&dx) {
            *xc += d;
        }
        mesh.sync(x);
        if let Some(li) = last_increment.as_deref_mut() {
            li[..n].copy_from_slice(&dx);
            mesh.sync(li);
        }
        report.sweeps += 1;
        report.linear = Some(stats);

        rhs = system.residual(ctx, mesh, eq, x, smbr, reconstruct);
        residual = linear_solver::norm(&rhs);
        log::trace!(
            "{}: sweep {} residual {:.3e} (rnorm {:.3e}, {} linear iterations)",
            eq.name,
            report.sweeps,
            residual,
            rnorm,
            stats.iterations
        );
    }
    report.residual = residual;
    if residual <= eq.sweep_tolerance * rnorm {
        report.converged = true;
    }
    if !report.converged && eq.n_sweeps > 1 {
        log::warn!(
            "{}: reconstruction sweeps exhausted ({}), residual {:.3e} > {:.1e} x {:.3e}",
            eq.name,
            max_sweeps,
            residual,
            eq.sweep_tolerance,
            rnorm
        );
    }
    Ok(report)
}

/// Coupled vector equation
/// `fimp (x - x_a) + Bal(theta x + (1 - theta) x_a) = smbr`.
pub struct VectorSystem<'a> {
    pub operator: ConvectionDiffusion<'a>,
    pub bc: &'a VectorBc,
    pub fimp: &'a [Matrix3<f64>],
}

impl VectorSystem<'_> {
    #[allow(clippy::too_many_arguments)]
    fn residual(
        &self,
        ctx: &DispatchContext,
        mesh: &Mesh,
        eq: &EquationParams,
        xa: &[Vector3<f64>],
        x: &[Vector3<f64>],
        smbr: &[Vector3<f64>],
        reconstruct: bool,
        with_unsteady: bool,
    ) -> Vec<Vector3<f64>> {
        let theta = eq.theta;
        let mut blended: Vec<Vector3<f64>> = x.iter().zip(xa).map(|(v, va)| v * theta + va * (1.0 - theta)).collect();
        mesh.sync(&mut blended);
        let grad = reconstruct
            .then(|| fvm::vector_gradient(ctx, mesh, &blended, self.bc, eq.gradient_sweeps, eq.gradient_tolerance));
        let bal = self.operator.balance(ctx, mesh, &blended, self.bc, grad.as_deref());
        let mut rhs = vec![Vector3::zeros(); mesh.n_cells];
        ctx.parallel_for(&mut rhs, |c, r| {
            *r = smbr[c] - bal[c];
            if with_unsteady {
                *r -= self.fimp[c] * (x[c] - xa[c]);
            }
        });
        rhs
    }
}

fn flat(v: &[Vector3<f64>]) -> &[f64] {
    bytemuck::cast_slice(v)
}

/// Solves the coupled velocity system in place. When `eswork` is given it
/// receives `|rhs / V|^2` per cell after the first sweep.
#[allow(clippy::too_many_arguments)]
pub fn iterative_solve_vector(
    ctx: &DispatchContext,
    mesh: &Mesh,
    eq: &EquationParams,
    system: &VectorSystem,
    xa: &[Vector3<f64>],
    x: &mut [Vector3<f64>],
    smbr: &[Vector3<f64>],
    mut eswork: Option<&mut [f64]>,
) -> SolverResult<SweepReport> {
    let n = mesh.n_cells;
    let a = system.operator.matrix(mesh, system.bc, system.fimp, eq.theta);
    let reconstruct = eq.flux_reconstruction && eq.n_sweeps > 1;
    let mut rhs = system.residual(ctx, mesh, eq, xa, x, smbr, reconstruct, true);

    let mut w = vec![0.0; 3 * n];
    a.mat_vec_mul(flat(&x[..n]), &mut w);
    for (wc, r) in w.iter_mut().zip(flat(&rhs)) {
        *wc += r;
    }
    ctx.wait();
    let rnorm = linear_solver::norm(&w);
    let mut residual = linear_solver::norm(flat(&rhs));
    if rnorm <= 0.0 {
        if let Some(es) = eswork.as_deref_mut() {
            es.iter_mut().for_each(|e| *e = 0.0);
        }
        return Ok(SweepReport::trivial(rnorm, residual));
    }

    let max_sweeps = eq.n_sweeps.max(1) as usize;
    let mut report = SweepReport {
        sweeps: 0,
        rnorm,
        residual,
        converged: false,
        linear: None,
    };
    let mut dx = vec![0.0; 3 * n];
    while report.sweeps < max_sweeps {
        if residual <= eq.sweep_tolerance * rnorm {
            report.converged = true;
            break;
        }
        dx.iter_mut().for_each(|v| *v = 0.0);
        let stats = linear_solver::solve_bicgstab(
            &a,
            flat(&rhs),
            &mut dx,
            eq.max_linear_iterations,
            eq.solver_tolerance * rnorm,
            &eq.name,
        )?;
        report.sweeps += 1;
        report.linear = Some(stats);
        // Relaxation on every sweep but the last.
        let relax = if report.sweeps < max_sweeps { eq.relaxation } else { 1.0 };
        for (c, xc) in x[..n].iter_mut().enumerate() {
            *xc += Vector3::new(dx[3 * c], dx[3 * c + 1], dx[3 * c + 2]) * relax;
        }
        mesh.sync(x);

        rhs = system.residual(ctx, mesh, eq, xa, x, smbr, reconstruct, true);
        residual = linear_solver::norm(flat(&rhs));
        if report.sweeps == 1 {
            if let Some(es) = eswork.as_deref_mut() {
                for c in 0..n {
                    es[c] = (rhs[c] / mesh.cell_vol[c]).norm_squared();
                }
            }
        }
        log::trace!(
            "{}: sweep {} residual {:.3e} (rnorm {:.3e}, {} linear iterations)",
            eq.name,
            report.sweeps,
            residual,
            rnorm,
            stats.iterations
        );
    }
    report.residual = residual;
    if residual <= eq.sweep_tolerance * rnorm {
        report.converged = true;
    }
    if !report.converged && eq.n_sweeps > 1 {
        log::warn!(
            "{}: reconstruction sweeps exhausted ({}), residual {:.3e} > {:.1e} x {:.3e}",
            eq.name,
            max_sweeps,
            residual,
            eq.sweep_tolerance,
            rnorm
        );
    }
    Ok(report)
}

/// Residual `smbr - Bal(x)` of the vector equation, evaluated once without
/// reconstruction, unsteady term or solve.
pub fn balance_vector(
    ctx: &DispatchContext,
    mesh: &Mesh,
    eq: &EquationParams,
    system: &VectorSystem,
    xa: &[Vector3<f64>],
    x: &[Vector3<f64>],
    smbr: &[Vector3<f64>],
) -> Vec<Vector3<f64>> {
    system.residual(ctx, mesh, eq, xa, x, smbr, false, eq.unsteady)
}
