use criterion::{criterion_group, criterion_main, Criterion};
use nalgebra::Vector3;
use ns_coupling::solver::boundary::{BoundaryConditions, PressureCondition, VelocityCondition, ZoneCondition};
use ns_coupling::solver::field::FlowFields;
use ns_coupling::solver::mesh::{generate_box_mesh, BoxSides};
use ns_coupling::solver::options::NavierStokesConfig;
use ns_coupling::solver::parallel::DispatchContext;
use ns_coupling::solver::PisoSolver;

fn cavity(ctx: DispatchContext) -> PisoSolver {
    let mesh = generate_box_mesh(24, 24, 4, 1.0, 1.0, 0.2, &BoxSides::walls_2d()).expect("box mesh");
    let mut bcs = BoundaryConditions::from_mesh(&mesh);
    let lid = ZoneCondition {
        velocity: VelocityCondition::Wall(Vector3::new(1.0, 0.0, 0.0)),
        pressure: PressureCondition::Neumann,
    };
    if let Err(err) = bcs.set_zone(&mesh, "y_max", lid) {
        panic!("{err}");
    }
    let fields = FlowFields::new(&mesh, 1000.0, 1e-3, 0.01);
    match PisoSolver::new(mesh, NavierStokesConfig::inner_iterations(3, 1e-5), fields) {
        Ok(solver) => solver.with_dispatch(ctx).with_boundary_conditions(bcs),
        Err(err) => panic!("{err}"),
    }
}

fn coupling_step_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("coupling_step");
    group.sample_size(10);
    for (name, ctx) in [
        ("serial", DispatchContext::serial()),
        ("threaded", DispatchContext::threaded()),
    ] {
        let mut solver = cavity(ctx);
        group.bench_function(name, |b| {
            b.iter(|| {
                if let Err(err) = solver.advance(1) {
                    panic!("{err}");
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, coupling_step_benchmark);
criterion_main!(benches);
