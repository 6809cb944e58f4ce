use crate::solver::error::{SolverError, SolverResult};
use nalgebra::Vector3;
use rayon::prelude::*;
use std::collections::VecDeque;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryType {
    Inlet,
    Outlet,
    Wall,
    Symmetry,
}

#[derive(Clone, Debug)]
pub struct BoundaryZone {
    pub name: String,
    pub kind: BoundaryType,
}

/// Named cell set, e.g. a head-loss or injection zone.
#[derive(Clone, Debug)]
pub struct VolumeZone {
    pub name: String,
    pub cells: Vec<usize>,
}

/// Ghost cells `n_cells..n_cells_ext`, each mirroring an owned cell.
#[derive(Clone, Debug, Default)]
pub struct Halo {
    pub ghost_sources: Vec<usize>,
}

/// Minimal geometric description a mesh is built from.
#[derive(Clone, Debug, Default)]
pub struct MeshTopology {
    pub n_cells: usize,
    pub cell_cen: Vec<Vector3<f64>>,
    pub cell_vol: Vec<f64>,
    pub i_face_cells: Vec<[usize; 2]>,
    /// Area-weighted, oriented from the first to the second cell.
    pub i_face_normal: Vec<Vector3<f64>>,
    pub i_face_cog: Vec<Vector3<f64>>,
    pub b_face_cells: Vec<usize>,
    /// Area-weighted, outward.
    pub b_face_normal: Vec<Vector3<f64>>,
    pub b_face_cog: Vec<Vector3<f64>>,
    pub b_face_zone: Vec<usize>,
    pub boundary_zones: Vec<BoundaryZone>,
    pub volume_zones: Vec<VolumeZone>,
    pub halo: Option<Halo>,
}

/// Structure-of-arrays polyhedral mesh with the derived quantities the
/// finite-volume operators need.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub n_cells: usize,
    pub n_cells_ext: usize,

    // Cells (n_cells_ext entries)
    pub cell_cen: Vec<Vector3<f64>>,
    pub cell_vol: Vec<f64>,

    // Interior faces
    pub i_face_cells: Vec<[usize; 2]>,
    pub i_face_normal: Vec<Vector3<f64>>,
    pub i_face_u_normal: Vec<Vector3<f64>>,
    pub i_face_surf: Vec<f64>,
    pub i_face_cog: Vec<Vector3<f64>>,
    pub i_dist: Vec<f64>,
    pub weight: Vec<f64>,
    pub diipf: Vec<Vector3<f64>>,
    pub djjpf: Vec<Vector3<f64>>,
    pub dofij: Vec<Vector3<f64>>,

    // Boundary faces
    pub b_face_cells: Vec<usize>,
    pub b_face_normal: Vec<Vector3<f64>>,
    pub b_face_u_normal: Vec<Vector3<f64>>,
    pub b_face_surf: Vec<f64>,
    pub b_face_cog: Vec<Vector3<f64>>,
    pub b_dist: Vec<f64>,
    pub diipb: Vec<Vector3<f64>>,
    pub b_face_zone: Vec<usize>,

    pub boundary_zones: Vec<BoundaryZone>,
    pub volume_zones: Vec<VolumeZone>,
    pub halo: Option<Halo>,

    /// Bumped on every topology change.
    pub revision: u64,
}

impl Mesh {
    pub fn from_topology(topo: MeshTopology) -> SolverResult<Self> {
        let n_ghosts = topo.halo.as_ref().map_or(0, |h| h.ghost_sources.len());
        let n_cells_ext = topo.n_cells + n_ghosts;
        SolverError::check_len("cell centres", n_cells_ext, topo.cell_cen.len())?;
        SolverError::check_len("cell volumes", n_cells_ext, topo.cell_vol.len())?;
        let n_i = topo.i_face_cells.len();
        SolverError::check_len("interior face normals", n_i, topo.i_face_normal.len())?;
        SolverError::check_len("interior face centres", n_i, topo.i_face_cog.len())?;
        let n_b = topo.b_face_cells.len();
        SolverError::check_len("boundary face normals", n_b, topo.b_face_normal.len())?;
        SolverError::check_len("boundary face centres", n_b, topo.b_face_cog.len())?;
        SolverError::check_len("boundary face zones", n_b, topo.b_face_zone.len())?;
        if let Some(&[c0, c1]) = topo
            .i_face_cells
            .iter()
            .find(|&&[c0, c1]| c0 >= n_cells_ext || c1 >= n_cells_ext)
        {
            return Err(SolverError::configuration(
                "mesh",
                format!("interior face references cell {} / {} beyond {}", c0, c1, n_cells_ext),
            ));
        }
        if let Some(&z) = topo.b_face_zone.iter().find(|&&z| z >= topo.boundary_zones.len()) {
            return Err(SolverError::configuration(
                "mesh",
                format!("boundary zone {} is not declared", z),
            ));
        }

        let mut mesh = Mesh {
            n_cells: topo.n_cells,
            n_cells_ext,
            cell_cen: topo.cell_cen,
            cell_vol: topo.cell_vol,
            i_face_cells: topo.i_face_cells,
            i_face_normal: topo.i_face_normal,
            i_face_cog: topo.i_face_cog,
            b_face_cells: topo.b_face_cells,
            b_face_normal: topo.b_face_normal,
            b_face_cog: topo.b_face_cog,
            b_face_zone: topo.b_face_zone,
            boundary_zones: topo.boundary_zones,
            volume_zones: topo.volume_zones,
            halo: topo.halo,
            ..Default::default()
        };
        mesh.recalculate_geometry();
        Ok(mesh)
    }

    pub fn n_i_faces(&self) -> usize {
        self.i_face_cells.len()
    }

    pub fn n_b_faces(&self) -> usize {
        self.b_face_cells.len()
    }

    pub fn has_halo(&self) -> bool {
        self.halo.as_ref().is_some_and(|h| !h.ghost_sources.is_empty())
    }

    pub fn b_face_type(&self, f: usize) -> BoundaryType {
        self.boundary_zones[self.b_face_zone[f]].kind
    }

    pub fn total_volume(&self) -> f64 {
        self.cell_vol[..self.n_cells].iter().sum()
    }

    /// Volume-zone selector.
    pub fn select_cells(&self, zone: &str) -> SolverResult<&[usize]> {
        self.volume_zones
            .iter()
            .find(|z| z.name == zone)
            .map(|z| z.cells.as_slice())
            .ok_or_else(|| SolverError::ZoneNotFound(zone.to_string()))
    }

    pub fn boundary_zone_id(&self, name: &str) -> Option<usize> {
        self.boundary_zones.iter().position(|z| z.name == name)
    }

    /// Recomputes the derived face quantities from normals and centres.
    pub fn recalculate_geometry(&mut self) {
        let cell_cen = &self.cell_cen;
        let n_i = self.i_face_cells.len();

        self.i_face_surf = self.i_face_normal.par_iter().map(|n| n.norm()).collect();
        self.i_face_u_normal = self
            .i_face_normal
            .par_iter()
            .zip(self.i_face_surf.par_iter())
            .map(|(n, &s)| if s > 0.0 { n / s } else { Vector3::zeros() })
            .collect();

        let mut i_dist = vec![0.0; n_i];
        let mut weight = vec![0.5; n_i];
        let mut diipf = vec![Vector3::zeros(); n_i];
        let mut djjpf = vec![Vector3::zeros(); n_i];
        let mut dofij = vec![Vector3::zeros(); n_i];
        i_dist
            .par_iter_mut()
            .zip(weight.par_iter_mut())
            .zip(diipf.par_iter_mut())
            .zip(djjpf.par_iter_mut())
            .zip(dofij.par_iter_mut())
            .enumerate()
            .for_each(|(f, ((((dist, pond), dii), djj), dof))| {
                let [c0, c1] = self.i_face_cells[f];
                let n = self.i_face_u_normal[f];
                let xf = self.i_face_cog[f];
                let xi = cell_cen[c0];
                let xj = cell_cen[c1];
                let dij = (xj - xi).dot(&n);
                *dist = dij;
                *pond = if dij.abs() > 0.0 { (xj - xf).dot(&n) / dij } else { 0.5 };
                let fi = xf - xi;
                let fj = xf - xj;
                *dii = fi - n * fi.dot(&n);
                *djj = fj - n * fj.dot(&n);
                *dof = xf - (xi * *pond + xj * (1.0 - *pond));
            });
        self.i_dist = i_dist;
        self.weight = weight;
        self.diipf = diipf;
        self.djjpf = djjpf;
        self.dofij = dofij;

        self.b_face_surf = self.b_face_normal.par_iter().map(|n| n.norm()).collect();
        self.b_face_u_normal = self
            .b_face_normal
            .par_iter()
            .zip(self.b_face_surf.par_iter())
            .map(|(n, &s)| if s > 0.0 { n / s } else { Vector3::zeros() })
            .collect();
        let (b_dist, diipb): (Vec<f64>, Vec<Vector3<f64>>) = (0..self.b_face_cells.len())
            .into_par_iter()
            .map(|f| {
                let n = self.b_face_u_normal[f];
                let d = self.b_face_cog[f] - cell_cen[self.b_face_cells[f]];
                let dist = d.dot(&n);
                (dist, d - n * dist)
            })
            .unzip();
        self.b_dist = b_dist;
        self.diipb = diipb;
    }

    /// Owned cell a (possibly ghost) cell index stands for.
    pub fn owner_of(&self, c: usize) -> usize {
        match &self.halo {
            Some(h) if c >= self.n_cells => h.ghost_sources[c - self.n_cells],
            _ => c,
        }
    }

    /// Copies owned values into the ghost cells.
    pub fn sync<T: Copy>(&self, values: &mut [T]) {
        if let Some(halo) = &self.halo {
            for (k, &src) in halo.ghost_sources.iter().enumerate() {
                if self.n_cells + k < values.len() {
                    values[self.n_cells + k] = values[src];
                }
            }
        }
    }

    /// Swaps in a new topology (sliding interfaces). The cell set must be
    /// preserved; every buffer indexed by faces or ghost cells becomes stale.
    pub fn replace_topology(&mut self, topo: MeshTopology) -> SolverResult<()> {
        if topo.n_cells != self.n_cells {
            return Err(SolverError::ResizeFailed {
                buffer: "mesh cells",
                required: topo.n_cells,
                actual: self.n_cells,
            });
        }
        let revision = self.revision + 1;
        *self = Mesh::from_topology(topo)?;
        self.revision = revision;
        Ok(())
    }

    /// Rebuilds a `MeshTopology` from this mesh.
    pub fn topology(&self) -> MeshTopology {
        MeshTopology {
            n_cells: self.n_cells,
            cell_cen: self.cell_cen.clone(),
            cell_vol: self.cell_vol.clone(),
            i_face_cells: self.i_face_cells.clone(),
            i_face_normal: self.i_face_normal.clone(),
            i_face_cog: self.i_face_cog.clone(),
            b_face_cells: self.b_face_cells.clone(),
            b_face_normal: self.b_face_normal.clone(),
            b_face_cog: self.b_face_cog.clone(),
            b_face_zone: self.b_face_zone.clone(),
            boundary_zones: self.boundary_zones.clone(),
            volume_zones: self.volume_zones.clone(),
            halo: self.halo.clone(),
        }
    }

    /// Number of owned cells not reachable from cell 0 through interior faces.
    pub fn check_connectivity(&self) -> usize {
        if self.n_cells == 0 {
            return 0;
        }
        let mut offsets = vec![0usize; self.n_cells_ext + 1];
        for &[c0, c1] in &self.i_face_cells {
            offsets[c0 + 1] += 1;
            offsets[c1 + 1] += 1;
        }
        for i in 0..self.n_cells_ext {
            offsets[i + 1] += offsets[i];
        }
        let mut fill = offsets.clone();
        let mut adjacency = vec![0usize; offsets[self.n_cells_ext]];
        for &[c0, c1] in &self.i_face_cells {
            adjacency[fill[c0]] = c1;
            fill[c0] += 1;
            adjacency[fill[c1]] = c0;
            fill[c1] += 1;
        }

        let mut visited = vec![false; self.n_cells_ext];
        let mut queue = VecDeque::new();
        visited[0] = true;
        queue.push_back(0);
        while let Some(c) = queue.pop_front() {
            for &n in &adjacency[offsets[c]..offsets[c + 1]] {
                let n = self.owner_of(n);
                if !visited[n] {
                    visited[n] = true;
                    queue.push_back(n);
                }
            }
        }
        let unreachable = visited[..self.n_cells].iter().filter(|v| !**v).count();
        if unreachable > 0 {
            log::warn!("mesh has {} cells unreachable from cell 0", unreachable);
        }
        unreachable
    }
}
