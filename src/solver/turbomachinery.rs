//! Rotating frames and rotors.
//!
//! Rotation 0 is the reference frame; every other entry is a rotor whose
//! cells are listed in the per-cell rotor index.

use crate::solver::boundary::VectorBc;
use crate::solver::error::{SolverError, SolverResult};
use crate::solver::field::Resizable;
use crate::solver::mesh::{Mesh, MeshTopology};
use crate::solver::parallel::DispatchContext;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Solid-body rotation about an axis through `invariant_point`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    /// Unit axis.
    pub axis: Vector3<f64>,
    /// Angular velocity in rad/s.
    pub omega: f64,
    pub invariant_point: Vector3<f64>,
}

impl Default for Rotation {
    fn default() -> Self {
        Self::none()
    }
}

impl Rotation {
    pub fn none() -> Self {
        Self {
            axis: Vector3::z(),
            omega: 0.0,
            invariant_point: Vector3::zeros(),
        }
    }

    /// Normalises `axis`; a zero axis gives no rotation.
    pub fn new(axis: Vector3<f64>, omega: f64, invariant_point: Vector3<f64>) -> Self {
        let norm = axis.norm();
        if norm <= 0.0 {
            return Self::none();
        }
        Self {
            axis: axis / norm,
            omega,
            invariant_point,
        }
    }

    pub fn is_rotating(&self) -> bool {
        self.omega != 0.0
    }

    #[inline]
    pub fn angular_velocity(&self) -> Vector3<f64> {
        self.axis * self.omega
    }

    /// Entrainment velocity `Omega x (x - x0)`.
    #[inline]
    pub fn velocity(&self, x: &Vector3<f64>) -> Vector3<f64> {
        self.angular_velocity().cross(&(x - self.invariant_point))
    }

    /// `Omega x u`.
    #[inline]
    pub fn coriolis(&self, u: &Vector3<f64>) -> Vector3<f64> {
        self.angular_velocity().cross(u)
    }

    /// Matrix of `u -> Omega x u`.
    #[inline]
    pub fn coriolis_tensor(&self) -> Matrix3<f64> {
        self.angular_velocity().cross_matrix()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurbomachineryModel {
    #[default]
    None,
    /// Rotors stay in place; rotation enters through Coriolis terms.
    Frozen,
    /// Rotor mesh moves; the topology is rebuilt at each step.
    Transient,
}

/// Rotor layout and rotating-wall coefficients.
#[derive(Clone, Debug)]
pub struct TurbomachineryState {
    pub model: TurbomachineryModel,
    pub rotations: Vec<Rotation>,
    /// Rotor number per cell (ghosts included), 0 outside rotors.
    pub cell_rotor: Vec<usize>,
    /// Wall-law factor per boundary face; `f64::MAX` marks faces that are not
    /// rotating walls.
    pub coftur: Vec<f64>,
    /// Wall exchange coefficient per boundary face.
    pub hfltur: Vec<f64>,
}

impl TurbomachineryState {
    pub fn new(model: TurbomachineryModel, frame: Rotation, mesh: &Mesh) -> Self {
        Self {
            model,
            rotations: vec![frame],
            cell_rotor: vec![0; mesh.n_cells_ext],
            coftur: vec![f64::MAX; mesh.n_b_faces()],
            hfltur: vec![0.0; mesh.n_b_faces()],
        }
    }

    /// Registers a rotor over `cells` and returns its number.
    pub fn add_rotor(&mut self, mesh: &Mesh, rotation: Rotation, cells: &[usize]) -> SolverResult<usize> {
        let id = self.rotations.len();
        for &c in cells {
            if c >= mesh.n_cells {
                return Err(SolverError::configuration(
                    "turbomachinery",
                    format!("rotor cell {} outside the {} owned cells", c, mesh.n_cells),
                ));
            }
            self.cell_rotor[c] = id;
        }
        mesh.sync(&mut self.cell_rotor);
        self.rotations.push(rotation);
        Ok(id)
    }

    pub fn n_rotors(&self) -> usize {
        self.rotations.len() - 1
    }

    pub fn frame(&self) -> &Rotation {
        &self.rotations[0]
    }

    /// Rotation of the rotor containing `c` (the frame outside rotors).
    pub fn rotor_rotation(&self, c: usize) -> &Rotation {
        &self.rotations[self.cell_rotor[c]]
    }

    /// Marks boundary face `f` as a rotating wall.
    pub fn set_wall(&mut self, f: usize, coftur: f64, hfltur: f64) {
        self.coftur[f] = coftur;
        self.hfltur[f] = hfltur;
    }

    /// Marks every face of a boundary zone as a no-slip rotating wall.
    pub fn set_wall_zone(&mut self, mesh: &Mesh, zone: &str, viscosity: &[f64]) -> SolverResult<()> {
        let id = mesh
            .boundary_zone_id(zone)
            .ok_or_else(|| SolverError::ZoneNotFound(zone.to_string()))?;
        for f in 0..mesh.n_b_faces() {
            if mesh.b_face_zone[f] == id {
                let c = mesh.b_face_cells[f];
                self.set_wall(f, 0.0, viscosity[c] / mesh.b_dist[f]);
            }
        }
        Ok(())
    }

    /// Removes the entrainment flux of rotor cells from the mass flux,
    /// so convection uses the relative velocity.
    pub fn correct_mass_flux(
        &self,
        ctx: &DispatchContext,
        mesh: &Mesh,
        rho: &[f64],
        rho_b: &[f64],
        i_flux: &mut [f64],
        b_flux: &mut [f64],
    ) {
        if self.model == TurbomachineryModel::None {
            return;
        }
        ctx.parallel_for_i_faces(mesh, i_flux, |f, m| {
            let [i, j] = mesh.i_face_cells[f];
            if self.cell_rotor[i] == 0 && self.cell_rotor[j] == 0 {
                return;
            }
            let rho_f = 0.5 * (rho[i] + rho[j]);
            let xf = mesh.i_face_cog[f];
            let vr = self.rotor_rotation(i).velocity(&xf) + self.rotor_rotation(j).velocity(&xf);
            *m -= 0.5 * rho_f * mesh.i_face_normal[f].dot(&vr);
        });
        ctx.parallel_for_b_faces(mesh, b_flux, |f, m| {
            let c = mesh.b_face_cells[f];
            if self.cell_rotor[c] == 0 {
                return;
            }
            let vr = self.rotor_rotation(c).velocity(&mesh.b_face_cog[f]);
            *m -= rho_b[f] * mesh.b_face_normal[f].dot(&vr);
        });
        ctx.wait();
    }

    /// Recomputes the Dirichlet values of rotating walls from the solid-body
    /// velocity on the current mesh.
    pub fn update_wall_velocity_bc(
        &self,
        mesh: &Mesh,
        viscosity: &[f64],
        turbulent_viscosity: &[f64],
        bc: &mut VectorBc,
    ) {
        for f in 0..mesh.n_b_faces() {
            if self.coftur[f] >= f64::MAX * 0.5 {
                continue;
            }
            let c = mesh.b_face_cells[f];
            let hint = (viscosity[c] + turbulent_viscosity[c]) / mesh.b_dist[f];
            let n = mesh.b_face_u_normal[f];
            let vr = self.rotor_rotation(c).velocity(&mesh.b_face_cog[f]);
            let vrn = vr.dot(&n);
            let tangential = vr - n * vrn;
            bc.a[f] = tangential * (1.0 - self.coftur[f]) + n * vrn;
            bc.af[f] = -tangential * self.hfltur[f] - n * (hint * vrn);
        }
    }
}

impl Resizable for TurbomachineryState {
    /// Rotor numbers of owned cells are kept; boundary faces must not change.
    fn resize_to(&mut self, mesh: &Mesh) -> SolverResult<()> {
        if self.cell_rotor.len() < mesh.n_cells {
            return Err(SolverError::ResizeFailed {
                buffer: "cell rotor index",
                required: mesh.n_cells_ext,
                actual: self.cell_rotor.len(),
            });
        }
        if self.coftur.len() != mesh.n_b_faces() {
            return Err(SolverError::ResizeFailed {
                buffer: "rotating wall coefficients",
                required: mesh.n_b_faces(),
                actual: self.coftur.len(),
            });
        }
        self.cell_rotor.resize(mesh.n_cells_ext, 0);
        mesh.sync(&mut self.cell_rotor);
        Ok(())
    }
}

/// Produces the topology of the next rotor position. Called once per time
/// step, on the first inner iteration, when the transient model is active.
pub trait MeshUpdater: Send {
    fn update(&mut self, mesh: &Mesh, state: &TurbomachineryState) -> SolverResult<MeshTopology>;
}

/// Keeps the current topology; used when rotor motion is handled outside.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticMesh;

impl MeshUpdater for StaticMesh {
    fn update(&mut self, mesh: &Mesh, _state: &TurbomachineryState) -> SolverResult<MeshTopology> {
        Ok(mesh.topology())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::mesh::{cells_in_box, generate_box_mesh, generate_periodic_x_box_mesh, BoxSides};

    #[test]
    fn solid_body_velocity_is_tangential() {
        let r = Rotation::new(Vector3::new(0.0, 0.0, 2.0), 3.0, Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(r.axis, Vector3::z());
        let v = r.velocity(&Vector3::new(2.0, 0.0, 5.0));
        assert!((v - Vector3::new(0.0, 3.0, 0.0)).norm() < 1e-14);
        let u = Vector3::new(0.3, -1.2, 0.7);
        assert!((r.coriolis_tensor() * u - r.coriolis(&u)).norm() < 1e-14);
    }

    #[test]
    fn flux_correction_only_touches_rotor_faces() {
        let mesh = generate_box_mesh(4, 1, 1, 4.0, 1.0, 1.0, &BoxSides::wall()).unwrap();
        let ctx = DispatchContext::serial();
        let mut state = TurbomachineryState::new(TurbomachineryModel::Frozen, Rotation::none(), &mesh);
        let rotor = cells_in_box(&mesh, Vector3::new(2.0, 0.0, 0.0), Vector3::new(4.0, 1.0, 1.0));
        state
            .add_rotor(&mesh, Rotation::new(Vector3::x(), 1.0, Vector3::zeros()), &rotor)
            .unwrap();
        let rho = vec![1.0; mesh.n_cells];
        let rho_b = vec![1.0; mesh.n_b_faces()];
        let mut i_flux = vec![0.0; mesh.n_i_faces()];
        let mut b_flux = vec![0.0; mesh.n_b_faces()];
        state.correct_mass_flux(&ctx, &mesh, &rho, &rho_b, &mut i_flux, &mut b_flux);
        for (f, &[i, j]) in mesh.i_face_cells.iter().enumerate() {
            if state.cell_rotor[i] == 0 && state.cell_rotor[j] == 0 {
                assert_eq!(i_flux[f], 0.0);
            }
        }
        // Rotation about x never crosses the x_max plane.
        let x_max = mesh.boundary_zone_id("x_max").unwrap();
        for f in 0..mesh.n_b_faces() {
            if mesh.b_face_zone[f] == x_max {
                assert!(b_flux[f].abs() < 1e-14);
            }
        }
    }

    #[test]
    fn rotating_wall_gets_solid_body_velocity() {
        let mesh = generate_box_mesh(2, 2, 1, 2.0, 2.0, 1.0, &BoxSides::walls_2d()).unwrap();
        let mut state = TurbomachineryState::new(TurbomachineryModel::Transient, Rotation::none(), &mesh);
        let all: Vec<usize> = (0..mesh.n_cells).collect();
        let rotation = Rotation::new(Vector3::z(), 2.0, Vector3::new(1.0, 1.0, 0.0));
        state.add_rotor(&mesh, rotation, &all).unwrap();
        let mu = vec![1e-3; mesh.n_cells];
        state.set_wall_zone(&mesh, "y_min", &mu).unwrap();
        let mut bc = VectorBc::new(mesh.n_b_faces());
        state.update_wall_velocity_bc(&mesh, &mu, &vec![0.0; mesh.n_cells], &mut bc);
        let y_min = mesh.boundary_zone_id("y_min").unwrap();
        for f in 0..mesh.n_b_faces() {
            if mesh.b_face_zone[f] == y_min {
                let vr = rotation.velocity(&mesh.b_face_cog[f]);
                assert!((bc.a[f] - vr).norm() < 1e-14);
                let hint = 1e-3 / mesh.b_dist[f];
                assert!((bc.af[f] + vr * hint).norm() < 1e-14);
            } else {
                assert_eq!(bc.a[f], Vector3::zeros());
            }
        }
    }

    #[test]
    fn resize_follows_new_halo() {
        let mesh = generate_periodic_x_box_mesh(4, 1, 1, 4.0, 1.0, 1.0, &BoxSides::walls_2d()).unwrap();
        let plain = generate_box_mesh(4, 1, 1, 4.0, 1.0, 1.0, &BoxSides::walls_2d()).unwrap();
        let mut state = TurbomachineryState::new(TurbomachineryModel::Transient, Rotation::none(), &plain);
        state.cell_rotor = vec![0, 0, 1, 1];
        state.coftur = vec![f64::MAX; mesh.n_b_faces()];
        state.hfltur = vec![0.0; mesh.n_b_faces()];
        state.resize_to(&mesh).unwrap();
        assert_eq!(state.cell_rotor.len(), mesh.n_cells_ext);
        for c in mesh.n_cells..mesh.n_cells_ext {
            assert_eq!(state.cell_rotor[c], state.cell_rotor[mesh.owner_of(c)]);
        }
    }
}
