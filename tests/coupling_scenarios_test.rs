use nalgebra::Vector3;
use ns_coupling::solver::boundary::{BoundaryConditions, PressureCondition, VelocityCondition, ZoneCondition};
use ns_coupling::solver::field::FlowFields;
use ns_coupling::solver::fvm::divergence;
use ns_coupling::solver::mesh::{generate_box_mesh, BoxSides, Mesh};
use ns_coupling::solver::options::{EstimatorFlags, HydrostaticMode, NavierStokesConfig};
use ns_coupling::solver::parallel::DispatchContext;
use ns_coupling::solver::source_terms::{InjectionKind, MassInjection, SourceTerms};
use ns_coupling::solver::PisoSolver;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn tight(mut config: NavierStokesConfig) -> NavierStokesConfig {
    config.pressure.solver_tolerance = 1e-12;
    config.pressure.sweep_tolerance = 1e-10;
    config
}

fn solver(mesh: Mesh, config: NavierStokesConfig, density: f64) -> PisoSolver {
    let fields = FlowFields::new(&mesh, density, 1e-2, 0.05);
    PisoSolver::new(mesh, config, fields)
        .expect("valid case")
        .with_dispatch(DispatchContext::serial())
}

fn lid_driven_cavity(ctx: DispatchContext) -> PisoSolver {
    let mesh = generate_box_mesh(6, 6, 1, 1.0, 1.0, 0.2, &BoxSides::walls_2d()).expect("box mesh");
    let mut bcs = BoundaryConditions::from_mesh(&mesh);
    bcs.set_zone(
        &mesh,
        "y_max",
        ZoneCondition {
            velocity: VelocityCondition::Wall(Vector3::new(1.0, 0.0, 0.0)),
            pressure: PressureCondition::Neumann,
        },
    )
    .expect("lid zone");
    solver(mesh, tight(NavierStokesConfig::inner_iterations(4, 1e-6)), 1.0)
        .with_dispatch(ctx)
        .with_boundary_conditions(bcs)
}

#[test]
fn fluid_at_rest_stays_at_rest() {
    init_logging();
    let mesh = generate_box_mesh(4, 4, 2, 1.0, 1.0, 0.5, &BoxSides::wall()).expect("box mesh");
    let mut config = NavierStokesConfig::new();
    config.velocity_pressure.estimators = EstimatorFlags::all();
    let mut solver = solver(mesh, config, 1.0);

    let reports = solver.advance(2).expect("steps run");
    assert_eq!(reports.len(), 2);
    let fields = &solver.fields;
    assert!(fields.velocity.val.iter().all(|u| u.norm() < 1e-14));
    assert!(fields.i_mass_flux.val.iter().all(|m| m.abs() < 1e-14));
    assert!(fields.b_mass_flux.val.iter().all(|m| m.abs() < 1e-14));

    let estimators = &reports[1].iterations[0].estimators;
    for e in [estimators.prediction, estimators.correction, estimators.total] {
        let e = e.expect("estimator requested");
        assert!(e < 1e-12, "estimator {}", e);
    }
}

#[test]
fn lid_driven_cavity_stays_divergence_free() {
    init_logging();
    let mut solver = lid_driven_cavity(DispatchContext::serial());
    let reports = solver.advance(3).expect("steps run");

    for report in &reports {
        assert!(report.inner_iterations >= 1 && report.inner_iterations <= 4);
        assert!(report.iterations.iter().all(|it| it.pressure_sweeps.is_some()));
    }
    assert_eq!(solver.time_step, 3);
    assert!((solver.time - 0.15).abs() < 1e-12);

    let mesh = &solver.mesh;
    let div = divergence(&solver.ctx, mesh, &solver.fields.i_mass_flux.val, &solver.fields.b_mass_flux.val);
    for (c, d) in div[..mesh.n_cells].iter().enumerate() {
        assert!(d.abs() < 1e-7, "cell {}: div {}", c, d);
    }
    assert!(solver.fields.b_mass_flux.val.iter().all(|m| m.abs() < 1e-14));

    // The lid drags the top row along.
    let top_row = (0..mesh.n_cells).filter(|&c| mesh.cell_cen[c].y > 0.9);
    for c in top_row {
        assert!(solver.fields.velocity.val[c].x > 0.0, "cell {}", c);
    }

    // Closed box: the pressure level is pinned to the reference mean.
    let mean: f64 = (0..mesh.n_cells)
        .map(|c| solver.fields.pressure.val[c] * mesh.cell_vol[c])
        .sum::<f64>()
        / mesh.total_volume();
    assert!(mean.abs() < 1e-10);
}

#[test]
fn lid_driven_cavity_inner_iterations_converge() {
    init_logging();
    let mut solver = lid_driven_cavity(DispatchContext::serial());
    solver.config.velocity_pressure.n_inner_iterations = 20;
    solver.config.velocity_pressure.inner_tolerance = 1e-4;
    let reports = solver.advance(4).expect("steps run");

    let last = reports.last().expect("one report per step");
    assert!(last.converged);
    assert!(last.inner_iterations < 20, "{} inner iterations", last.inner_iterations);
    let final_iteration = last.iterations.last().expect("at least one iteration");
    let xnrmu = final_iteration.xnrmu.expect("norm tracked with inner iterations");
    assert!(xnrmu < 1e-4 * final_iteration.xnrmu0);
    assert!(solver.step_context().map_or(true, |s| s.trava.is_none()));
}

#[test]
fn serial_and_threaded_dispatch_agree() {
    init_logging();
    let mut serial = lid_driven_cavity(DispatchContext::serial());
    let mut threaded = lid_driven_cavity(DispatchContext::threaded_eager());
    serial.advance(2).expect("serial steps");
    threaded.advance(2).expect("threaded steps");
    for (a, b) in serial.fields.velocity.val.iter().zip(&threaded.fields.velocity.val) {
        assert!((a - b).norm() < 1e-6, "{} vs {}", a, b);
    }
    for (a, b) in serial.fields.pressure.val.iter().zip(&threaded.fields.pressure.val) {
        assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
    }
}

#[test]
fn channel_outflow_balances_inflow() {
    init_logging();
    let mesh = generate_box_mesh(8, 4, 1, 2.0, 0.5, 0.1, &BoxSides::channel()).expect("box mesh");
    let mut bcs = BoundaryConditions::from_mesh(&mesh);
    bcs.set_zone(
        &mesh,
        "x_min",
        ZoneCondition {
            velocity: VelocityCondition::Inlet(Vector3::new(1.0, 0.0, 0.0)),
            pressure: PressureCondition::Neumann,
        },
    )
    .expect("inlet zone");
    let mut solver = solver(mesh, tight(NavierStokesConfig::new()), 1.0).with_boundary_conditions(bcs);

    let reports = solver.advance(2).expect("steps run");
    let norms = reports[1].iterations[0].norms.as_ref().expect("norms logged");
    let inflow = 0.5 * 0.1;
    assert!(norms.boundary_mass_balance.abs() < 1e-7, "{}", norms.boundary_mass_balance);

    let mesh = &solver.mesh;
    let outlet = mesh.boundary_zone_id("x_max").expect("outlet zone");
    let outflow: f64 = (0..mesh.n_b_faces())
        .filter(|&f| mesh.b_face_zone[f] == outlet)
        .map(|f| solver.fields.b_mass_flux.val[f])
        .sum();
    assert!((outflow - inflow).abs() < 1e-7, "{}", outflow);
}

#[test]
fn injected_mass_leaves_through_the_flux() {
    init_logging();
    let mesh = generate_box_mesh(4, 3, 2, 1.0, 0.75, 0.5, &BoxSides::wall()).expect("box mesh");
    let last = mesh.n_cells - 1;
    let injection = MassInjection::new(
        &mesh,
        vec![0, last],
        vec![2.0, -2.0],
        InjectionKind::Ambient,
        vec![Vector3::zeros(); 2],
    )
    .expect("injection cells");
    let mut solver = solver(mesh, tight(NavierStokesConfig::new()), 1.0).with_sources(SourceTerms::new().with(injection));

    solver.advance(1).expect("step runs");
    let mesh = &solver.mesh;
    let div = divergence(&solver.ctx, mesh, &solver.fields.i_mass_flux.val, &solver.fields.b_mass_flux.val);
    for c in 0..mesh.n_cells {
        let gamma = match c {
            0 => 2.0,
            c if c == last => -2.0,
            _ => 0.0,
        };
        let expected = gamma * mesh.cell_vol[c];
        assert!((div[c] - expected).abs() < 1e-7, "cell {}: {} vs {}", c, div[c], expected);
    }
}

#[test]
fn balanced_gravity_builds_hydrostatic_pressure() {
    init_logging();
    let mesh = generate_box_mesh(3, 5, 1, 0.6, 1.0, 0.2, &BoxSides::walls_2d()).expect("box mesh");
    let g = Vector3::new(0.0, -9.81, 0.0);
    let mut config = tight(NavierStokesConfig::new().with_gravity(g));
    config.velocity_pressure.hydrostatic = HydrostaticMode::ExternalForces;
    // rho - ro0 = 1, so the balanced force is g per unit volume.
    let mut solver = solver(mesh, config, 2.0);

    solver.advance(1).expect("step runs");
    let mesh = &solver.mesh;
    let fields = &solver.fields;
    for (c, u) in fields.velocity.val[..mesh.n_cells].iter().enumerate() {
        assert!(u.norm() < 1e-5, "cell {}: {}", c, u);
    }
    for c in 0..mesh.n_cells {
        assert!((fields.volume_forces[c] - g).norm() < 1e-12);
        let expected = g.dot(&(mesh.cell_cen[c] - mesh.cell_cen[0]));
        let dp = fields.pressure.val[c] - fields.pressure.val[0];
        assert!((dp - expected).abs() < 1e-4, "cell {}: {} vs {}", c, dp, expected);
    }

    // Next step: the force is already carried by the pressure.
    solver.advance(1).expect("second step runs");
    assert!(solver.fields.velocity.val[..solver.mesh.n_cells]
        .iter()
        .all(|u| u.norm() < 1e-5));
}

const G: f64 = -9.81;

/// 3x8 column with walls all around, heavier fluid at the bottom.
fn stratified_column(mode: HydrostaticMode) -> PisoSolver {
    let mesh = generate_box_mesh(3, 8, 1, 0.375, 1.0, 0.125, &BoxSides::walls_2d()).expect("box mesh");
    let mut config = tight(NavierStokesConfig::new().with_gravity(Vector3::new(0.0, G, 0.0)));
    config.velocity_pressure.hydrostatic = mode;
    let mut solver = solver(mesh, config, 1.0);
    solver.fields.set_density(&solver.mesh, |x| 1.0 + 0.5 * (1.0 - x.y));
    solver
}

fn max_speed(solver: &PisoSolver) -> f64 {
    solver.fields.velocity.val[..solver.mesh.n_cells]
        .iter()
        .map(|u| u.norm())
        .fold(0.0, f64::max)
}

#[test]
fn stratified_column_is_balanced_by_external_forces() {
    init_logging();
    let mut solver = stratified_column(HydrostaticMode::ExternalForces);
    solver.advance(3).expect("steps run");

    let speed = max_speed(&solver);
    assert!(speed < 1e-9, "max |u| = {:e}", speed);

    let mesh = &solver.mesh;
    let fields = &solver.fields;
    let rho = &fields.density.val;
    let ro0 = solver.config.fluid.ro0;
    let g = Vector3::new(0.0, G, 0.0);
    for c in 0..mesh.n_cells {
        assert!((fields.volume_forces[c] - g * (rho[c] - ro0)).norm() < 1e-12, "cell {}", c);
    }

    // Across every horizontal face the total pressure jumps by rho_f g dy.
    let mut checked = 0;
    for f in 0..mesh.n_i_faces() {
        let [i, j] = mesh.i_face_cells[f];
        let dx = mesh.cell_cen[j] - mesh.cell_cen[i];
        if dx.y.abs() < 1e-12 {
            assert!((fields.total_pressure[j] - fields.total_pressure[i]).abs() < 1e-4);
            continue;
        }
        let expected = 0.5 * (rho[i] + rho[j]) * g.dot(&dx);
        let dp = fields.total_pressure[j] - fields.total_pressure[i];
        assert!((dp - expected).abs() < 1e-4, "face {}: {} vs {}", f, dp, expected);
        checked += 1;
    }
    assert_eq!(checked, 3 * 7);
}

#[test]
fn stratified_column_with_hydrostatic_predictor() {
    init_logging();
    let mut unbalanced = stratified_column(HydrostaticMode::Off);
    unbalanced.advance(3).expect("steps run");
    let drift = max_speed(&unbalanced);
    assert!(drift > 1e-3, "max |u| without balancing = {:e}", drift);

    let mut solver = stratified_column(HydrostaticMode::Predictor);
    solver.advance(3).expect("steps run");

    // The predicted pressure follows rho g cell by cell.
    let mesh = &solver.mesh;
    let fields = &solver.fields;
    for c in 0..mesh.n_cells {
        let grad = fields.hydrostatic_gradient[c];
        let rho_g = fields.density.val[c] * G;
        assert!((grad.y - rho_g).abs() < 5e-2 * rho_g.abs(), "cell {}: {} vs {}", c, grad.y, rho_g);
        assert!(grad.x.abs() < 1e-6 && grad.z.abs() < 1e-6, "cell {}: {}", c, grad);
    }

    // The cell-centred prediction does not match the face pressure balance
    // exactly, so a residual drift of order dx remains; it must stay well
    // below the unbalanced one.
    let speed = max_speed(&solver);
    assert!(speed < 0.25 * drift, "max |u| = {:e} against {:e} without balancing", speed, drift);
}
