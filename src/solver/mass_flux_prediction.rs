//! Mass-flux prediction for dilatable flows.
//!
//! When the density changed since the last step, the stored face mass flux
//! no longer satisfies continuity. A potential `phi` with homogeneous
//! Neumann conditions is solved from
//! `div(dt grad phi) = div(m) - V Gamma + (rho - rho_prev) V / dt`
//! and the flux is corrected by the face diffusion of `phi`.

use crate::solver::boundary::ScalarBc;
use crate::solver::equation::{iterative_solve_scalar, ScalarSystem, SweepReport};
use crate::solver::error::SolverResult;
use crate::solver::field::FlowFields;
use crate::solver::fvm::{divergence, face_diffusion_potential, face_viscosity, scalar_gradient, Potential};
use crate::solver::mesh::Mesh;
use crate::solver::options::{EquationParams, NavierStokesConfig};
use crate::solver::parallel::DispatchContext;
use crate::solver::source_terms::SourceTerms;
use log::debug;

pub struct MassFluxPredictor<'a> {
    pub ctx: &'a DispatchContext,
    pub mesh: &'a Mesh,
    pub config: &'a NavierStokesConfig,
    pub sources: &'a SourceTerms,
}

impl MassFluxPredictor<'_> {
    /// Corrects `fields.i_mass_flux`/`b_mass_flux` in place and, with a
    /// variable density, refreshes the mass-coherent density.
    pub fn predict(&self, fields: &mut FlowFields) -> SolverResult<SweepReport> {
        let (ctx, mesh) = (self.ctx, self.mesh);
        let n = mesh.n_cells;
        let eq = EquationParams {
            name: String::from("potential"),
            ..self.config.pressure.clone()
        };
        let bc = ScalarBc::new(mesh.n_b_faces());

        let mut divu = divergence(ctx, mesh, &fields.i_mass_flux.val, &fields.b_mass_flux.val);
        if let Some(gamma) = self.sources.mass_source(mesh) {
            for (d, g) in divu[..n].iter_mut().zip(&gamma) {
                *d -= g;
            }
        }
        let rho = &fields.density.val;
        let rho_pre = &fields.density.val_pre;
        let mut smbr = vec![0.0; n];
        ctx.parallel_for(&mut smbr, |c, s| {
            let drom = rho[c] - rho_pre[c];
            *s = -(divu[c] + drom * mesh.cell_vol[c] / fields.dt[c]);
        });
        ctx.wait();

        let (viscf, viscb) = if eq.diffusion {
            face_viscosity(ctx, mesh, &fields.dt, eq.face_mean)
        } else {
            (vec![0.0; mesh.n_i_faces()], vec![0.0; mesh.n_b_faces()])
        };

        // Pure Neumann: the level of phi is free and only its face
        // differences matter.
        let system = ScalarSystem {
            viscf: &viscf,
            viscb: &viscb,
            bc: &bc,
            rovsdt: None,
            f_ext: None,
            strengthen_diagonal: true,
        };
        let mut pot = vec![0.0; mesh.n_cells_ext];
        let mut dpot = vec![0.0; mesh.n_cells_ext];
        let report = iterative_solve_scalar(ctx, mesh, &eq, &system, &mut pot, &smbr, Some(&mut dpot))?;
        if !report.converged {
            debug!(
                "{}: mass flux prediction stopped after {} sweep(s), residual {:.3e}",
                eq.name, report.sweeps, report.residual
            );
        }

        // Everything but the last increment may be reconstructed; the last
        // one is not, so that the corrected flux matches the solved matrix.
        let pota: Vec<f64> = pot.iter().zip(&dpot).map(|(p, d)| p - d).collect();
        let reconstruct = eq.flux_reconstruction && eq.n_sweeps > 1;
        let grad = reconstruct.then(|| scalar_gradient(ctx, mesh, &pota, &bc, eq.gradient_sweeps, eq.gradient_tolerance));
        let previous = Potential {
            values: &pota,
            bc: &bc,
            f_ext: None,
            grad: grad.as_deref(),
        };
        let last = Potential {
            values: &dpot,
            bc: &bc,
            f_ext: None,
            grad: None,
        };
        for potential in [&previous, &last] {
            face_diffusion_potential(
                ctx,
                mesh,
                potential,
                &viscf,
                &viscb,
                &mut fields.i_mass_flux.val,
                &mut fields.b_mass_flux.val,
            );
        }

        if self.config.fluid.variable_density {
            fields.density_mass.copy_from_slice(&fields.density.val);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::mesh::{generate_box_mesh, BoxSides};
    use crate::solver::source_terms::{InjectionKind, MassInjection};
    use nalgebra::Vector3;

    fn closed_box() -> (Mesh, FlowFields, NavierStokesConfig) {
        let mesh = generate_box_mesh(4, 3, 2, 1.0, 0.75, 0.5, &BoxSides::wall()).unwrap();
        let mut fields = FlowFields::new(&mesh, 1.0, 1e-3, 0.1);
        for (f, m) in fields.i_mass_flux.val.iter_mut().enumerate() {
            *m = 0.01 * (((f * 5) % 7) as f64 - 3.0);
        }
        let mut config = NavierStokesConfig::new();
        config.pressure.solver_tolerance = 1e-12;
        config.pressure.sweep_tolerance = 1e-10;
        (mesh, fields, config)
    }

    fn run(mesh: &Mesh, fields: &mut FlowFields, config: &NavierStokesConfig, sources: &SourceTerms) -> Vec<f64> {
        let ctx = DispatchContext::serial();
        let predictor = MassFluxPredictor {
            ctx: &ctx,
            mesh,
            config,
            sources,
        };
        predictor.predict(fields).unwrap();
        divergence(&ctx, mesh, &fields.i_mass_flux.val, &fields.b_mass_flux.val)
    }

    #[test]
    fn removes_divergence_at_constant_density() {
        let (mesh, mut fields, config) = closed_box();
        let div = run(&mesh, &mut fields, &config, &SourceTerms::new());
        assert!(div[..mesh.n_cells].iter().all(|d| d.abs() < 1e-7), "{:?}", div);
        assert!(fields.b_mass_flux.val.iter().all(|m| *m == 0.0));
    }

    #[test]
    fn divergence_follows_density_change_and_injection() {
        let (mesh, mut fields, mut config) = closed_box();
        config.fluid.variable_density = true;
        fields.set_density(&mesh, |_| 1.0);
        fields.density.val.iter_mut().for_each(|r| *r = 0.9);
        // The density drop releases mass everywhere; a sink in one cell
        // removes it again so the closed box stays compatible.
        let sink = -(mesh.n_cells as f64);
        let sources = SourceTerms::new().with(
            MassInjection::new(
                &mesh,
                vec![0],
                vec![sink],
                InjectionKind::Ambient,
                vec![Vector3::zeros()],
            )
            .unwrap(),
        );
        let div = run(&mesh, &mut fields, &config, &sources);
        for c in 0..mesh.n_cells {
            let vol = mesh.cell_vol[c];
            let gamma = if c == 0 { sink * vol } else { 0.0 };
            let expected = gamma + 0.1 * vol / 0.1;
            assert!((div[c] - expected).abs() < 1e-6, "cell {}: {} vs {}", c, div[c], expected);
        }
        assert_eq!(fields.density_mass[3], 0.9);
    }
}
