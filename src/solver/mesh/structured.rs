use super::structs::{BoundaryType, BoundaryZone, Halo, Mesh, MeshTopology, VolumeZone};
use crate::solver::error::{SolverError, SolverResult};
use nalgebra::Vector3;

/// Boundary types of the six sides of a box.
#[derive(Clone, Copy, Debug)]
pub struct BoxSides {
    pub x_min: BoundaryType,
    pub x_max: BoundaryType,
    pub y_min: BoundaryType,
    pub y_max: BoundaryType,
    pub z_min: BoundaryType,
    pub z_max: BoundaryType,
}

impl BoxSides {
    /// All sides set to Wall.
    pub fn wall() -> Self {
        Self {
            x_min: BoundaryType::Wall,
            x_max: BoundaryType::Wall,
            y_min: BoundaryType::Wall,
            y_max: BoundaryType::Wall,
            z_min: BoundaryType::Wall,
            z_max: BoundaryType::Wall,
        }
    }

    /// Walls in x and y, symmetry planes in z (quasi 2-D cases).
    pub fn walls_2d() -> Self {
        Self {
            z_min: BoundaryType::Symmetry,
            z_max: BoundaryType::Symmetry,
            ..Self::wall()
        }
    }

    /// Inlet at x_min, outlet at x_max, walls elsewhere.
    pub fn channel() -> Self {
        Self {
            x_min: BoundaryType::Inlet,
            x_max: BoundaryType::Outlet,
            ..Self::walls_2d()
        }
    }
}

/// Zone names, in zone-id order.
pub const BOX_ZONE_NAMES: [&str; 6] = ["x_min", "x_max", "y_min", "y_max", "z_min", "z_max"];

pub fn generate_box_mesh(
    nx: usize,
    ny: usize,
    nz: usize,
    lx: f64,
    ly: f64,
    lz: f64,
    sides: &BoxSides,
) -> SolverResult<Mesh> {
    build_box(nx, ny, nz, [lx, ly, lz], sides, false)
}

/// Same box, periodic along x through ghost cells.
pub fn generate_periodic_x_box_mesh(
    nx: usize,
    ny: usize,
    nz: usize,
    lx: f64,
    ly: f64,
    lz: f64,
    sides: &BoxSides,
) -> SolverResult<Mesh> {
    build_box(nx, ny, nz, [lx, ly, lz], sides, true)
}

fn build_box(
    nx: usize,
    ny: usize,
    nz: usize,
    lengths: [f64; 3],
    sides: &BoxSides,
    periodic_x: bool,
) -> SolverResult<Mesh> {
    if nx == 0 || ny == 0 || nz == 0 {
        return Err(SolverError::configuration(
            "box mesh",
            format!("needs at least one cell per direction, got {}x{}x{}", nx, ny, nz),
        ));
    }
    if !lengths.iter().all(|&l| l > 0.0) {
        return Err(SolverError::configuration("box mesh", format!("lengths must be > 0, got {:?}", lengths)));
    }
    if periodic_x && nx < 2 {
        return Err(SolverError::configuration("box mesh", "periodic box needs nx > 1"));
    }

    let [lx, ly, lz] = lengths;
    let (dx, dy, dz) = (lx / nx as f64, ly / ny as f64, lz / nz as f64);
    let n_cells = nx * ny * nz;
    let cell_id = |i: usize, j: usize, k: usize| i + nx * (j + ny * k);
    let centre = |i: f64, j: f64, k: f64| Vector3::new((i + 0.5) * dx, (j + 0.5) * dy, (k + 0.5) * dz);

    let mut topo = MeshTopology {
        n_cells,
        ..Default::default()
    };
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                topo.cell_cen.push(centre(i as f64, j as f64, k as f64));
                topo.cell_vol.push(dx * dy * dz);
            }
        }
    }

    let kinds = [sides.x_min, sides.x_max, sides.y_min, sides.y_max, sides.z_min, sides.z_max];
    topo.boundary_zones = BOX_ZONE_NAMES
        .iter()
        .zip(kinds)
        .map(|(name, kind)| BoundaryZone {
            name: name.to_string(),
            kind,
        })
        .collect();

    let (ax, ay, az) = (dy * dz, dx * dz, dx * dy);

    // --- Interior faces ---
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx - 1 {
                topo.i_face_cells.push([cell_id(i, j, k), cell_id(i + 1, j, k)]);
                topo.i_face_normal.push(Vector3::new(ax, 0.0, 0.0));
                topo.i_face_cog.push(Vector3::new((i + 1) as f64 * dx, (j as f64 + 0.5) * dy, (k as f64 + 0.5) * dz));
            }
        }
    }
    for k in 0..nz {
        for j in 0..ny.saturating_sub(1) {
            for i in 0..nx {
                topo.i_face_cells.push([cell_id(i, j, k), cell_id(i, j + 1, k)]);
                topo.i_face_normal.push(Vector3::new(0.0, ay, 0.0));
                topo.i_face_cog.push(Vector3::new((i as f64 + 0.5) * dx, (j + 1) as f64 * dy, (k as f64 + 0.5) * dz));
            }
        }
    }
    for k in 0..nz.saturating_sub(1) {
        for j in 0..ny {
            for i in 0..nx {
                topo.i_face_cells.push([cell_id(i, j, k), cell_id(i, j, k + 1)]);
                topo.i_face_normal.push(Vector3::new(0.0, 0.0, az));
                topo.i_face_cog.push(Vector3::new((i as f64 + 0.5) * dx, (j as f64 + 0.5) * dy, (k + 1) as f64 * dz));
            }
        }
    }

    // --- Periodic faces through ghost cells ---
    if periodic_x {
        let mut ghost_sources = Vec::new();
        for k in 0..nz {
            for j in 0..ny {
                // Ghost image of the first column, right of the last column.
                let first = cell_id(0, j, k);
                let last = cell_id(nx - 1, j, k);
                let ghost_right = n_cells + ghost_sources.len();
                ghost_sources.push(first);
                topo.cell_cen.push(centre(nx as f64, j as f64, k as f64));
                topo.cell_vol.push(dx * dy * dz);
                topo.i_face_cells.push([last, ghost_right]);
                topo.i_face_normal.push(Vector3::new(ax, 0.0, 0.0));
                topo.i_face_cog.push(Vector3::new(lx, (j as f64 + 0.5) * dy, (k as f64 + 0.5) * dz));

                // Ghost image of the last column, left of the first column.
                let ghost_left = n_cells + ghost_sources.len();
                ghost_sources.push(last);
                topo.cell_cen.push(centre(-1.0, j as f64, k as f64));
                topo.cell_vol.push(dx * dy * dz);
                topo.i_face_cells.push([ghost_left, first]);
                topo.i_face_normal.push(Vector3::new(ax, 0.0, 0.0));
                topo.i_face_cog.push(Vector3::new(0.0, (j as f64 + 0.5) * dy, (k as f64 + 0.5) * dz));
            }
        }
        topo.halo = Some(Halo { ghost_sources });
    }

    // --- Boundary faces ---
    let mut push_b = |c: usize, normal: Vector3<f64>, cog: Vector3<f64>, zone: usize| {
        topo.b_face_cells.push(c);
        topo.b_face_normal.push(normal);
        topo.b_face_cog.push(cog);
        topo.b_face_zone.push(zone);
    };
    if !periodic_x {
        for k in 0..nz {
            for j in 0..ny {
                let (y, z) = ((j as f64 + 0.5) * dy, (k as f64 + 0.5) * dz);
                push_b(cell_id(0, j, k), Vector3::new(-ax, 0.0, 0.0), Vector3::new(0.0, y, z), 0);
                push_b(cell_id(nx - 1, j, k), Vector3::new(ax, 0.0, 0.0), Vector3::new(lx, y, z), 1);
            }
        }
    }
    for k in 0..nz {
        for i in 0..nx {
            let (x, z) = ((i as f64 + 0.5) * dx, (k as f64 + 0.5) * dz);
            push_b(cell_id(i, 0, k), Vector3::new(0.0, -ay, 0.0), Vector3::new(x, 0.0, z), 2);
            push_b(cell_id(i, ny - 1, k), Vector3::new(0.0, ay, 0.0), Vector3::new(x, ly, z), 3);
        }
    }
    for j in 0..ny {
        for i in 0..nx {
            let (x, y) = ((i as f64 + 0.5) * dx, (j as f64 + 0.5) * dy);
            push_b(cell_id(i, j, 0), Vector3::new(0.0, 0.0, -az), Vector3::new(x, y, 0.0), 4);
            push_b(cell_id(i, j, nz - 1), Vector3::new(0.0, 0.0, az), Vector3::new(x, y, lz), 5);
        }
    }

    topo.volume_zones.push(VolumeZone {
        name: String::from("all_cells"),
        cells: (0..n_cells).collect(),
    });

    Mesh::from_topology(topo)
}

/// Cells whose centre lies inside the axis-aligned box `[lo, hi]`.
pub fn cells_in_box(mesh: &Mesh, lo: Vector3<f64>, hi: Vector3<f64>) -> Vec<usize> {
    (0..mesh.n_cells)
        .filter(|&c| {
            let x = mesh.cell_cen[c];
            (0..3).all(|d| x[d] >= lo[d] && x[d] <= hi[d])
        })
        .collect()
}

/// Adds a named volume zone.
pub fn add_volume_zone(mesh: &mut Mesh, name: &str, cells: Vec<usize>) {
    mesh.volume_zones.push(VolumeZone {
        name: name.to_string(),
        cells,
    });
}
