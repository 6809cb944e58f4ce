use ns_coupling::solver::field::FlowFields;
use ns_coupling::solver::mesh::{generate_box_mesh, BoxSides};
use ns_coupling::solver::options::NavierStokesConfig;
use ns_coupling::solver::parallel::DispatchContext;
use ns_coupling::solver::PisoSolver;
use ns_coupling::trace::{make_header, read_trace, TraceEvent, TraceWriter};

#[test]
fn solver_run_is_traced_as_json_lines() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mesh = generate_box_mesh(3, 3, 1, 1.0, 1.0, 0.3, &BoxSides::walls_2d()).expect("box mesh");
    let fields = FlowFields::new(&mesh, 1.0, 1e-2, 0.1);
    let config = NavierStokesConfig::inner_iterations(2, 1e-4);
    let mut solver = PisoSolver::new(mesh, config, fields)
        .expect("valid case")
        .with_dispatch(DispatchContext::serial());

    let path = std::env::temp_dir().join(format!("ns-coupling-run-{}.jsonl", std::process::id()));
    let mut writer = TraceWriter::create(&path).expect("trace file");
    writer
        .write_event(&TraceEvent::Header(make_header(&solver.mesh, &solver.config)))
        .expect("header");
    let reports = solver.advance(3).expect("steps run");
    writer.write_steps(&reports).expect("steps");
    assert_eq!(writer.events_written(), 4);
    writer.close(solver.time_step).expect("footer");

    let text = std::fs::read_to_string(&path).expect("trace readable");
    let _ = std::fs::remove_file(&path);
    let events = read_trace(&text).expect("valid trace");
    assert_eq!(events.len(), 5);

    let steps: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TraceEvent::Step(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(steps.len(), 3);
    for (i, step) in steps.iter().enumerate() {
        assert_eq!(step.step, i as u64 + 1);
        assert_eq!(step.inner_iterations, step.iterations.len());
        assert!(step.iterations.iter().all(|it| it.xnrmu.is_some()));
    }
    match events.last() {
        Some(TraceEvent::Footer(footer)) => assert_eq!(footer.steps, 3),
        other => panic!("trace does not end with a footer: {:?}", other),
    }
}
