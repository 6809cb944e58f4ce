use crate::solver::mesh::Mesh;
use crate::solver::options::NavierStokesConfig;
use crate::solver::piso::StepReport;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

const TRACE_FORMAT_VERSION: u32 = 1;

/// One line of a JSON-lines run trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TraceEvent {
    Header(TraceHeader),
    Step(StepReport),
    Footer(TraceFooter),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceHeader {
    pub format_version: u32,
    pub created_unix_ms: u64,
    pub case: TraceCase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceFooter {
    pub closed_unix_ms: u64,
    pub steps: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceCase {
    pub mesh: TraceMesh,
    pub config: NavierStokesConfig,
}

/// Mesh summary; the geometry itself is not traced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TraceMesh {
    pub n_cells: usize,
    pub n_cells_ext: usize,
    pub n_i_faces: usize,
    pub n_b_faces: usize,
    pub total_volume: f64,
    pub revision: u64,
}

impl TraceMesh {
    pub fn from_mesh(mesh: &Mesh) -> Self {
        Self {
            n_cells: mesh.n_cells,
            n_cells_ext: mesh.n_cells_ext,
            n_i_faces: mesh.n_i_faces(),
            n_b_faces: mesh.n_b_faces(),
            total_volume: mesh.total_volume(),
            revision: mesh.revision,
        }
    }
}

pub struct TraceWriter {
    path: PathBuf,
    writer: std::io::BufWriter<std::fs::File>,
    events_written: usize,
    flush_every: usize,
}

impl TraceWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref().to_owned();
        let file = std::fs::File::create(&path)
            .map_err(|err| format!("failed to create trace file '{}': {err}", path.display()))?;
        Ok(Self {
            path,
            writer: std::io::BufWriter::new(file),
            events_written: 0,
            flush_every: 25,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn events_written(&self) -> usize {
        self.events_written
    }

    pub fn write_event(&mut self, event: &TraceEvent) -> Result<(), String> {
        serde_json::to_writer(&mut self.writer, event)
            .map_err(|err| format!("failed to serialize trace event: {err}"))?;
        self.writer
            .write_all(b"\n")
            .map_err(|err| format!("failed to write trace event: {err}"))?;
        self.events_written += 1;
        if self.events_written % self.flush_every == 0 {
            let _ = self.writer.flush();
        }
        Ok(())
    }

    pub fn write_steps(&mut self, reports: &[StepReport]) -> Result<(), String> {
        for report in reports {
            self.write_event(&TraceEvent::Step(report.clone()))?;
        }
        Ok(())
    }

    pub fn close(mut self, steps: u64) -> Result<(), String> {
        self.write_event(&TraceEvent::Footer(TraceFooter {
            closed_unix_ms: now_unix_ms(),
            steps,
        }))?;
        self.writer
            .flush()
            .map_err(|err| format!("failed to flush trace file: {err}"))?;
        Ok(())
    }
}

pub fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn make_header(mesh: &Mesh, config: &NavierStokesConfig) -> TraceHeader {
    TraceHeader {
        format_version: TRACE_FORMAT_VERSION,
        created_unix_ms: now_unix_ms(),
        case: TraceCase {
            mesh: TraceMesh::from_mesh(mesh),
            config: config.clone(),
        },
    }
}

/// Parses a trace written by [`TraceWriter`], one event per line.
pub fn read_trace(text: &str) -> Result<Vec<TraceEvent>, String> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|err| format!("invalid trace event on line {}: {err}", i + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::mesh::{generate_box_mesh, BoxSides};
    use crate::solver::piso::{EstimatorNorms, IterationReport};

    #[test]
    fn trace_round_trips_through_json_lines() {
        let mesh = generate_box_mesh(2, 2, 1, 1.0, 1.0, 0.5, &BoxSides::wall()).unwrap();
        let config = NavierStokesConfig::inner_iterations(4, 1e-6);
        let step = StepReport {
            step: 3,
            time: 0.3,
            inner_iterations: 1,
            converged: true,
            iterations: vec![IterationReport {
                iterns: 1,
                velocity_sweeps: 2,
                velocity_residual: 1e-9,
                pressure_sweeps: Some(1),
                pressure_residual: Some(1e-10),
                mass_flux_sweeps: None,
                continuity_defect: Some(0.5),
                xnrmu: Some(1e-8),
                xnrmu0: 1.0,
                converged: true,
                estimators: EstimatorNorms::default(),
                norms: None,
            }],
        };

        let path = std::env::temp_dir().join(format!("ns-coupling-trace-{}.jsonl", std::process::id()));
        let mut writer = TraceWriter::create(&path).unwrap();
        writer.write_event(&TraceEvent::Header(make_header(&mesh, &config))).unwrap();
        writer.write_steps(std::slice::from_ref(&step)).unwrap();
        writer.close(3).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        let events = read_trace(&text).unwrap();
        assert_eq!(events.len(), 3);
        match &events[0] {
            TraceEvent::Header(h) => {
                assert_eq!(h.case.mesh.n_cells, 4);
                assert_eq!(h.case.config.velocity_pressure.n_inner_iterations, 4);
            }
            other => panic!("unexpected first event {:?}", other),
        }
        match &events[1] {
            TraceEvent::Step(s) => assert_eq!(s.iterations[0].continuity_defect, Some(0.5)),
            other => panic!("unexpected step event {:?}", other),
        }
        assert!(matches!(events[2], TraceEvent::Footer(TraceFooter { steps: 3, .. })));
    }
}
