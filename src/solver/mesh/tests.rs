use super::*;
use nalgebra::Vector3;

#[test]
fn box_mesh_counts_and_volume() {
    let mesh = generate_box_mesh(4, 3, 2, 2.0, 1.5, 1.0, &BoxSides::wall()).unwrap();
    assert_eq!(mesh.n_cells, 24);
    assert_eq!(mesh.n_cells_ext, 24);
    // (nx-1) ny nz + nx (ny-1) nz + nx ny (nz-1)
    assert_eq!(mesh.n_i_faces(), 3 * 3 * 2 + 4 * 2 * 2 + 4 * 3);
    assert_eq!(mesh.n_b_faces(), 2 * (3 * 2 + 4 * 2 + 4 * 3));
    assert!((mesh.total_volume() - 3.0).abs() < 1e-12);
    assert_eq!(mesh.check_connectivity(), 0);
}

#[test]
fn orthogonal_box_has_no_reconstruction_offsets() {
    let mesh = generate_box_mesh(3, 3, 3, 1.0, 1.0, 1.0, &BoxSides::wall()).unwrap();
    for f in 0..mesh.n_i_faces() {
        assert!(mesh.diipf[f].norm() < 1e-14);
        assert!(mesh.djjpf[f].norm() < 1e-14);
        assert!((mesh.weight[f] - 0.5).abs() < 1e-14);
        assert!((mesh.i_dist[f] - 1.0 / 3.0).abs() < 1e-14);
    }
    for f in 0..mesh.n_b_faces() {
        assert!(mesh.diipb[f].norm() < 1e-14);
        assert!((mesh.b_dist[f] - 1.0 / 6.0).abs() < 1e-14);
    }
}

#[test]
fn boundary_normals_point_outward() {
    let mesh = generate_box_mesh(2, 2, 2, 1.0, 1.0, 1.0, &BoxSides::channel()).unwrap();
    let centre = Vector3::new(0.5, 0.5, 0.5);
    for f in 0..mesh.n_b_faces() {
        let outward = mesh.b_face_cog[f] - centre;
        assert!(mesh.b_face_normal[f].dot(&outward) > 0.0);
    }
    let inlet = mesh.boundary_zone_id("x_min").unwrap();
    assert_eq!(mesh.boundary_zones[inlet].kind, BoundaryType::Inlet);
    assert_eq!(mesh.b_face_type(0), BoundaryType::Inlet);
}

#[test]
fn periodic_box_ghosts_mirror_first_and_last_columns() {
    let mesh = generate_periodic_x_box_mesh(4, 2, 1, 4.0, 2.0, 1.0, &BoxSides::walls_2d()).unwrap();
    assert!(mesh.has_halo());
    assert_eq!(mesh.n_cells, 8);
    assert_eq!(mesh.n_cells_ext, 8 + 4);
    let mut values: Vec<f64> = (0..mesh.n_cells_ext).map(|c| c as f64).collect();
    mesh.sync(&mut values);
    let halo = mesh.halo.as_ref().unwrap();
    for (k, &src) in halo.ghost_sources.iter().enumerate() {
        assert_eq!(values[mesh.n_cells + k], src as f64);
    }
    assert_eq!(mesh.check_connectivity(), 0);
    // Periodic faces keep the regular spacing.
    for f in 0..mesh.n_i_faces() {
        assert!((mesh.i_dist[f] - 1.0).abs() < 1e-12);
        assert!((mesh.weight[f] - 0.5).abs() < 1e-12);
    }
}

#[test]
fn zone_selector_reports_missing_zone() {
    let mut mesh = generate_box_mesh(2, 2, 1, 1.0, 1.0, 1.0, &BoxSides::wall()).unwrap();
    let cells = cells_in_box(&mesh, Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.5, 1.0, 1.0));
    assert_eq!(cells, vec![0, 2]);
    add_volume_zone(&mut mesh, "porous", cells);
    assert_eq!(mesh.select_cells("porous").unwrap(), &[0, 2]);
    assert!(mesh.select_cells("fan").is_err());
}

#[test]
fn replace_topology_bumps_revision_and_rejects_cell_changes() {
    let mut mesh = generate_box_mesh(2, 2, 2, 1.0, 1.0, 1.0, &BoxSides::wall()).unwrap();
    let topo = mesh.topology();
    mesh.replace_topology(topo).unwrap();
    assert_eq!(mesh.revision, 1);

    let other = generate_box_mesh(3, 2, 2, 1.0, 1.0, 1.0, &BoxSides::wall()).unwrap().topology();
    assert!(mesh.replace_topology(other).is_err());
    assert_eq!(mesh.revision, 1);
}

#[test]
fn degenerate_box_is_rejected() {
    let empty = generate_box_mesh(0, 2, 1, 1.0, 1.0, 1.0, &BoxSides::wall());
    assert!(matches!(empty, Err(crate::solver::error::SolverError::ConfigurationFatal { .. })));
    assert!(generate_box_mesh(2, 2, 1, 1.0, -1.0, 1.0, &BoxSides::wall()).is_err());
    assert!(generate_periodic_x_box_mesh(1, 2, 1, 1.0, 1.0, 1.0, &BoxSides::walls_2d()).is_err());
}
