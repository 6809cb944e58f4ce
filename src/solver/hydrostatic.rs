//! A-priori hydrostatic pressure.
//!
//! Solves `div((1/rho) grad P) = 0` with `(1/rho) dP/dn = g.n` on every
//! boundary face, so that `grad P` balances `rho g` before the velocity
//! predictor runs. A single sweep without reconstruction is used: the
//! mesh is assumed orthogonal enough for this auxiliary field.

use crate::solver::boundary::ScalarBc;
use crate::solver::equation::{iterative_solve_scalar, ScalarSystem, SweepReport};
use crate::solver::error::SolverResult;
use crate::solver::field::FlowFields;
use crate::solver::fvm::{face_viscosity, scalar_gradient};
use crate::solver::mesh::Mesh;
use crate::solver::options::{EquationParams, FaceMean, NavierStokesConfig};
use crate::solver::parallel::DispatchContext;
use log::debug;

pub struct HydrostaticPredictor<'a> {
    pub ctx: &'a DispatchContext,
    pub mesh: &'a Mesh,
    pub config: &'a NavierStokesConfig,
}

impl HydrostaticPredictor<'_> {
    /// Updates `fields.hydrostatic_pressure` in place (it is also the
    /// initial guess) and stores its gradient in
    /// `fields.hydrostatic_gradient`.
    pub fn predict(&self, fields: &mut FlowFields) -> SolverResult<SweepReport> {
        let (ctx, mesh) = (self.ctx, self.mesh);
        let g = self.config.constants.gravity;
        let rho = &fields.density.val;

        let mut inv_rho = vec![0.0; mesh.n_cells_ext];
        ctx.parallel_for(&mut inv_rho, |c, k| *k = 1.0 / rho[c]);
        let (viscf, viscb) = face_viscosity(ctx, mesh, &inv_rho, FaceMean::Harmonic);

        let mut bc = ScalarBc::new(mesh.n_b_faces());
        for f in 0..mesh.n_b_faces() {
            let c = mesh.b_face_cells[f];
            let hint = 1.0 / (rho[c] * mesh.b_dist[f]);
            bc.set_neumann(f, -mesh.b_face_u_normal[f].dot(&g), hint);
        }

        let eq = EquationParams {
            name: String::from("HydrostaticPressure"),
            unsteady: false,
            convection: false,
            diffusion: true,
            n_sweeps: 1,
            ..self.config.pressure.clone()
        };
        let system = ScalarSystem {
            viscf: &viscf,
            viscb: &viscb,
            bc: &bc,
            rovsdt: None,
            f_ext: None,
            strengthen_diagonal: true,
        };
        let rhs = vec![0.0; mesh.n_cells];
        let report = iterative_solve_scalar(ctx, mesh, &eq, &system, &mut fields.hydrostatic_pressure, &rhs, None)?;
        debug!(
            "{}: {} sweep(s), residual {:.3e} / {:.3e}",
            eq.name, report.sweeps, report.residual, report.rnorm
        );

        fields.hydrostatic_gradient = scalar_gradient(
            ctx,
            mesh,
            &fields.hydrostatic_pressure,
            &bc,
            1,
            eq.gradient_tolerance,
        );
        Ok(report)
    }
}
