use std::{
    fs::File,
    io::{
        BufWriter,
        Write,
    },
    sync::Arc,
    time::Instant,
};

use color_eyre::eyre::Error;
use fdtd_engine::{
    Axis,
    Engine,
    SequentialEngine,
    Stepper,
};
use nalgebra::{
    Point3,
    Vector3,
};
use serde::Serialize;

use crate::{
    args::RunArgs,
    problem::{
        FieldKind,
        Probe,
        Problem,
    },
    util::format_size,
};

pub fn run(args: &RunArgs) -> Result<(), Error> {
    let problem = Problem::load(&args.problem)?;

    let steps = args.steps.unwrap_or(problem.steps);
    let batch = args.batch.unwrap_or(problem.batch).max(1);
    let mut engine_config = problem.engine.clone();
    if let Some(num_threads) = args.threads {
        engine_config.num_threads = Some(num_threads);
    }

    let operator = Arc::new(problem.operator()?);
    tracing::info!(
        size = ?operator.size(),
        memory_required = %format_size(operator.memory_required()),
        steps,
        batch,
        "creating engine"
    );

    let (mut stepper, num_threads): (Box<dyn Stepper>, usize) = if args.sequential {
        (Box::new(SequentialEngine::new(operator.clone())), 1)
    }
    else {
        let engine = Engine::new(operator.clone(), &engine_config)?;
        let num_threads = engine.num_threads();
        (Box::new(engine), num_threads)
    };

    let mut recorder = ProbeRecorder::new(&problem.probes);
    recorder.record(stepper.as_ref());

    let start_time = Instant::now();
    while stepper.step() < steps {
        let batch = batch.min(steps - stepper.step());
        stepper.run_steps(batch)?;
        recorder.record(stepper.as_ref());
        tracing::debug!(step = stepper.step(), steps, "batch done");
    }
    let elapsed = start_time.elapsed();

    let cell_updates = operator.strider().num_cells() as f64 * steps as f64;
    tracing::info!(
        ?elapsed,
        cells_per_second = cell_updates / elapsed.as_secs_f64().max(f64::EPSILON),
        "finished"
    );

    if !stepper.volt().is_finite() || !stepper.curr().is_finite() {
        tracing::warn!("fields contain non-finite samples, the coefficients are probably unstable");
    }

    let output = RunOutput {
        size: *operator.size(),
        steps,
        num_threads,
        elapsed_seconds: elapsed.as_secs_f64(),
        probes: recorder.into_series(),
    };

    if let Some(path) = &args.output {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &output)?;
        writer.flush()?;
        tracing::info!(path = %path.display(), "wrote probes");
    }
    else {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct RunOutput {
    size: Vector3<usize>,
    steps: u64,
    num_threads: usize,
    elapsed_seconds: f64,
    probes: Vec<ProbeSeries>,
}

#[derive(Debug, Serialize)]
struct ProbeSeries {
    name: String,
    field: FieldKind,
    component: Axis,
    point: Point3<usize>,
    samples: Vec<ProbeSample>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
struct ProbeSample {
    step: u64,
    value: f64,
}

/// Samples a fixed set of points after every batch.
#[derive(Debug)]
struct ProbeRecorder {
    series: Vec<ProbeSeries>,
}

impl ProbeRecorder {
    fn new(probes: &[Probe]) -> Self {
        Self {
            series: probes
                .iter()
                .map(|probe| {
                    ProbeSeries {
                        name: probe.name.clone(),
                        field: probe.field,
                        component: probe.component,
                        point: probe.point,
                        samples: vec![],
                    }
                })
                .collect(),
        }
    }

    fn record(&mut self, stepper: &dyn Stepper) {
        let step = stepper.step();
        let volt = stepper.volt();
        let curr = stepper.curr();

        for series in &mut self.series {
            let field = match series.field {
                FieldKind::Volt => volt,
                FieldKind::Curr => curr,
            };
            // probes are checked against the grid when the problem is loaded
            if let Some(value) = field.get(series.component, &series.point) {
                series.samples.push(ProbeSample { step, value });
            }
        }
    }

    fn into_series(self) -> Vec<ProbeSeries> {
        self.series
    }
}
