//! Boundary-condition coefficient bundles.
//!
//! A boundary face value is `a + b x_I'` and the outward diffusive flux per
//! unit diffusivity-surface is `af + bf x_I'`, where `x_I'` is the cell value
//! reconstructed at the projection of the cell centre on the face normal.

use crate::solver::error::{SolverError, SolverResult};
use crate::solver::mesh::{BoundaryType, Mesh};
use nalgebra::{Matrix3, Vector3};

#[derive(Clone, Debug, Default)]
pub struct ScalarBc {
    pub a: Vec<f64>,
    pub b: Vec<f64>,
    pub af: Vec<f64>,
    pub bf: Vec<f64>,
}

impl ScalarBc {
    /// Homogeneous Neumann on every face.
    pub fn new(n_b_faces: usize) -> Self {
        Self {
            a: vec![0.0; n_b_faces],
            b: vec![1.0; n_b_faces],
            af: vec![0.0; n_b_faces],
            bf: vec![0.0; n_b_faces],
        }
    }

    pub fn len(&self) -> usize {
        self.a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }

    pub fn set_dirichlet(&mut self, f: usize, value: f64, hint: f64) {
        self.a[f] = value;
        self.b[f] = 0.0;
        self.af[f] = -hint * value;
        self.bf[f] = hint;
    }

    /// Imposed outward flux `qimp`.
    pub fn set_neumann(&mut self, f: usize, qimp: f64, hint: f64) {
        self.a[f] = -qimp / hint.max(1e-300);
        self.b[f] = 1.0;
        self.af[f] = qimp;
        self.bf[f] = 0.0;
    }

    pub fn set_homogeneous_neumann(&mut self, f: usize) {
        self.set_neumann(f, 0.0, 1.0);
    }

    pub fn face_value(&self, f: usize, x_ip: f64) -> f64 {
        self.a[f] + self.b[f] * x_ip
    }

    pub fn face_flux(&self, f: usize, x_ip: f64) -> f64 {
        self.af[f] + self.bf[f] * x_ip
    }

    pub fn is_dirichlet(&self, f: usize) -> bool {
        self.b[f] == 0.0
    }

    /// Number of faces carrying a Dirichlet condition (`ndircl`).
    pub fn n_dirichlet(&self) -> usize {
        (0..self.len()).filter(|&f| self.is_dirichlet(f)).count()
    }

    /// Homogeneous counterpart: same `b`/`bf`, zero `a`/`af`.
    pub fn homogeneous(&self) -> Self {
        Self {
            a: vec![0.0; self.len()],
            b: self.b.clone(),
            af: vec![0.0; self.len()],
            bf: self.bf.clone(),
        }
    }

    pub fn resize(&mut self, n_b_faces: usize) {
        self.a.resize(n_b_faces, 0.0);
        self.b.resize(n_b_faces, 1.0);
        self.af.resize(n_b_faces, 0.0);
        self.bf.resize(n_b_faces, 0.0);
    }
}

#[derive(Clone, Debug, Default)]
pub struct VectorBc {
    pub a: Vec<Vector3<f64>>,
    pub b: Vec<Matrix3<f64>>,
    pub af: Vec<Vector3<f64>>,
    pub bf: Vec<Matrix3<f64>>,
}

impl VectorBc {
    pub fn new(n_b_faces: usize) -> Self {
        Self {
            a: vec![Vector3::zeros(); n_b_faces],
            b: vec![Matrix3::identity(); n_b_faces],
            af: vec![Vector3::zeros(); n_b_faces],
            bf: vec![Matrix3::zeros(); n_b_faces],
        }
    }

    pub fn len(&self) -> usize {
        self.a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }

    pub fn set_dirichlet(&mut self, f: usize, value: Vector3<f64>, hint: f64) {
        self.a[f] = value;
        self.b[f] = Matrix3::zeros();
        self.af[f] = -value * hint;
        self.bf[f] = Matrix3::identity() * hint;
    }

    pub fn set_neumann(&mut self, f: usize, qimp: Vector3<f64>, hint: f64) {
        self.a[f] = -qimp / hint.max(1e-300);
        self.b[f] = Matrix3::identity();
        self.af[f] = qimp;
        self.bf[f] = Matrix3::zeros();
    }

    pub fn set_homogeneous_neumann(&mut self, f: usize) {
        self.set_neumann(f, Vector3::zeros(), 1.0);
    }

    /// Slip wall: zero normal component, free tangential components.
    pub fn set_symmetry(&mut self, f: usize, normal: &Vector3<f64>, hint: f64) {
        let nn = normal * normal.transpose();
        self.a[f] = Vector3::zeros();
        self.b[f] = Matrix3::identity() - nn;
        self.af[f] = Vector3::zeros();
        self.bf[f] = nn * hint;
    }

    pub fn face_value(&self, f: usize, x_ip: &Vector3<f64>) -> Vector3<f64> {
        self.a[f] + self.b[f] * x_ip
    }

    pub fn face_flux(&self, f: usize, x_ip: &Vector3<f64>) -> Vector3<f64> {
        self.af[f] + self.bf[f] * x_ip
    }

    pub fn resize(&mut self, n_b_faces: usize) {
        self.a.resize(n_b_faces, Vector3::zeros());
        self.b.resize(n_b_faces, Matrix3::identity());
        self.af.resize(n_b_faces, Vector3::zeros());
        self.bf.resize(n_b_faces, Matrix3::zeros());
    }
}

/// Velocity condition attached to a boundary zone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VelocityCondition {
    /// No-slip wall moving with the given velocity.
    Wall(Vector3<f64>),
    Inlet(Vector3<f64>),
    Outlet,
    Symmetry,
}

/// Pressure condition attached to a boundary zone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PressureCondition {
    Neumann,
    Dirichlet(f64),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZoneCondition {
    pub velocity: VelocityCondition,
    pub pressure: PressureCondition,
}

impl ZoneCondition {
    /// Default pairing for a zone kind.
    pub fn for_kind(kind: BoundaryType) -> Self {
        match kind {
            BoundaryType::Wall => Self {
                velocity: VelocityCondition::Wall(Vector3::zeros()),
                pressure: PressureCondition::Neumann,
            },
            BoundaryType::Inlet => Self {
                velocity: VelocityCondition::Inlet(Vector3::zeros()),
                pressure: PressureCondition::Neumann,
            },
            BoundaryType::Outlet => Self {
                velocity: VelocityCondition::Outlet,
                pressure: PressureCondition::Dirichlet(0.0),
            },
            BoundaryType::Symmetry => Self {
                velocity: VelocityCondition::Symmetry,
                pressure: PressureCondition::Neumann,
            },
        }
    }
}

/// Per-zone conditions; turned into coefficient bundles every step since
/// the exchange coefficients depend on viscosity and time step.
#[derive(Clone, Debug)]
pub struct BoundaryConditions {
    pub zones: Vec<ZoneCondition>,
}

impl BoundaryConditions {
    pub fn from_mesh(mesh: &Mesh) -> Self {
        Self {
            zones: mesh
                .boundary_zones
                .iter()
                .map(|z| ZoneCondition::for_kind(z.kind))
                .collect(),
        }
    }

    pub fn set_zone(&mut self, mesh: &Mesh, name: &str, condition: ZoneCondition) -> SolverResult<()> {
        let id = mesh
            .boundary_zone_id(name)
            .ok_or_else(|| SolverError::ZoneNotFound(name.to_string()))?;
        self.zones[id] = condition;
        Ok(())
    }

    /// Outlet faces with an imposed pressure (`isostd`).
    pub fn standard_outlets(&self, mesh: &Mesh) -> Vec<bool> {
        (0..mesh.n_b_faces())
            .map(|f| {
                let z = &self.zones[mesh.b_face_zone[f]];
                matches!(z.velocity, VelocityCondition::Outlet)
                    && matches!(z.pressure, PressureCondition::Dirichlet(_))
            })
            .collect()
    }

    /// Fills the velocity bundle; `hint = (mu + mu_t) / d_b`.
    pub fn velocity_coefficients(
        &self,
        mesh: &Mesh,
        viscosity: &[f64],
        turbulent_viscosity: &[f64],
        bc: &mut VectorBc,
    ) {
        bc.resize(mesh.n_b_faces());
        for f in 0..mesh.n_b_faces() {
            let c = mesh.b_face_cells[f];
            let hint = (viscosity[c] + turbulent_viscosity[c]) / mesh.b_dist[f];
            match self.zones[mesh.b_face_zone[f]].velocity {
                VelocityCondition::Wall(v) | VelocityCondition::Inlet(v) => {
                    bc.set_dirichlet(f, v, hint)
                }
                VelocityCondition::Outlet => bc.set_homogeneous_neumann(f),
                VelocityCondition::Symmetry => bc.set_symmetry(f, &mesh.b_face_u_normal[f], hint),
            }
        }
    }

    /// Fills the pressure bundle and the homogeneous pressure-increment
    /// bundle; `hint = dt / d_b`.
    pub fn pressure_coefficients(
        &self,
        mesh: &Mesh,
        dt: &[f64],
        pressure: &mut ScalarBc,
        increment: &mut ScalarBc,
    ) {
        pressure.resize(mesh.n_b_faces());
        increment.resize(mesh.n_b_faces());
        for f in 0..mesh.n_b_faces() {
            let c = mesh.b_face_cells[f];
            let hint = dt[c] / mesh.b_dist[f];
            match self.zones[mesh.b_face_zone[f]].pressure {
                PressureCondition::Dirichlet(p) => {
                    pressure.set_dirichlet(f, p, hint);
                    increment.set_dirichlet(f, 0.0, hint);
                }
                PressureCondition::Neumann => {
                    pressure.set_homogeneous_neumann(f);
                    increment.set_homogeneous_neumann(f);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::mesh::{generate_box_mesh, BoxSides};

    #[test]
    fn dirichlet_flux_is_proportional_to_jump() {
        let mut bc = ScalarBc::new(1);
        bc.set_dirichlet(0, 2.0, 4.0);
        assert_eq!(bc.face_value(0, 10.0), 2.0);
        // hint (x_I - x_b)
        assert_eq!(bc.face_flux(0, 3.0), 4.0);
        assert_eq!(bc.n_dirichlet(), 1);
    }

    #[test]
    fn neumann_value_extrapolates_imposed_flux() {
        let mut bc = ScalarBc::new(1);
        bc.set_neumann(0, 1.5, 3.0);
        assert!((bc.face_value(0, 1.0) - 0.5).abs() < 1e-14);
        assert_eq!(bc.face_flux(0, 123.0), 1.5);
        assert!(!bc.is_dirichlet(0));
    }

    #[test]
    fn symmetry_removes_normal_component() {
        let mut bc = VectorBc::new(1);
        let n = Vector3::new(0.0, 0.0, 1.0);
        bc.set_symmetry(0, &n, 2.0);
        let v = bc.face_value(0, &Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(v, Vector3::new(1.0, 2.0, 0.0));
        let q = bc.face_flux(0, &Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(q, Vector3::new(0.0, 0.0, 6.0));
    }

    #[test]
    fn outlet_zone_gets_dirichlet_pressure() {
        let mesh = generate_box_mesh(2, 2, 1, 1.0, 1.0, 1.0, &BoxSides::channel()).unwrap();
        let conditions = BoundaryConditions::from_mesh(&mesh);
        let mut p = ScalarBc::new(0);
        let mut dp = ScalarBc::new(0);
        conditions.pressure_coefficients(&mesh, &vec![0.1; mesh.n_cells], &mut p, &mut dp);
        let outlets = conditions.standard_outlets(&mesh);
        assert_eq!(p.n_dirichlet(), 2);
        assert_eq!(outlets.iter().filter(|o| **o).count(), 2);
        for f in 0..mesh.n_b_faces() {
            assert_eq!(p.is_dirichlet(f), outlets[f]);
            assert_eq!(dp.is_dirichlet(f), outlets[f]);
            assert_eq!(dp.a[f], 0.0);
        }
    }

    #[test]
    fn unknown_zone_is_reported() {
        let mesh = generate_box_mesh(1, 1, 1, 1.0, 1.0, 1.0, &BoxSides::wall()).unwrap();
        let mut conditions = BoundaryConditions::from_mesh(&mesh);
        let lid = ZoneCondition {
            velocity: VelocityCondition::Wall(Vector3::x()),
            pressure: PressureCondition::Neumann,
        };
        assert!(conditions.set_zone(&mesh, "y_max", lid).is_ok());
        assert!(conditions.set_zone(&mesh, "lid", lid).is_err());
    }
}
