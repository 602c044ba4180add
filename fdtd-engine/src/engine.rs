use std::{
    iter,
    num::NonZeroUsize,
    ops::Range,
    sync::{
        Arc,
        mpsc,
    },
    thread::JoinHandle,
    time::{
        Duration,
        Instant,
    },
};

use nalgebra::Vector3;

use crate::{
    decomposition::partition,
    error::{
        ConcurrencyFault,
        ConfigurationError,
        Error,
    },
    field::{
        FieldStorage,
        FieldView,
    },
    operator::Operator,
    sync::PhaseBarriers,
    traits::Stepper,
    worker::{
        Command,
        Report,
        Role,
        Shared,
        StepCounter,
        Worker,
        WorkerId,
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    /// Number of slab workers. Defaults to the available parallelism. Values
    /// larger than the number of lines along x are clamped.
    pub num_threads: Option<usize>,

    /// How long a worker waits at a barrier before the engine is considered
    /// deadlocked. `None` waits forever.
    ///
    /// This bounds a whole phase: the excitation worker waits at the first
    /// barrier while the slab workers update their voltages. The default of
    /// 60 seconds only catches deadlocks. Huge grids or heavily oversubscribed
    /// machines can take longer per phase and should raise it or pass `None`.
    pub barrier_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            barrier_timeout: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// Workers are parked and waiting for the next batch.
    Idle,
    /// A batch failed. Only shutting down is possible.
    Faulted,
    /// Workers have been joined.
    Stopped,
}

/// Multi-threaded leapfrog engine.
///
/// The grid is split into slabs along x, each updated by its own worker
/// thread. One additional thread injects the excitation between the voltage
/// and current phase of every step.
#[derive(derive_more::Debug)]
pub struct Engine {
    shared: Arc<Shared>,
    slabs: Vec<Range<usize>>,
    #[debug(ignore)]
    workers: Vec<WorkerHandle>,
    #[debug(ignore)]
    reports: mpsc::Receiver<Report>,
    state: EngineState,
}

#[derive(Debug)]
struct WorkerHandle {
    id: WorkerId,
    commands: mpsc::Sender<Command>,
    join_handle: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn new(operator: Arc<Operator>, config: &EngineConfig) -> Result<Self, Error> {
        let num_lines = operator.size().x;
        let num_threads = resolve_num_threads(config.num_threads, num_lines)?;
        let slabs = partition(num_lines, num_threads);
        Self::with_slabs(operator, slabs, config.barrier_timeout)
    }

    /// Spawns one slab worker per entry of `slabs` and the excitation worker.
    fn with_slabs(
        operator: Arc<Operator>,
        slabs: Vec<Range<usize>>,
        barrier_timeout: Option<Duration>,
    ) -> Result<Self, Error> {
        let size = *operator.size();
        let num_threads = slabs.len();

        let shared = Arc::new(Shared {
            fields: FieldStorage::new(operator.strider()),
            barriers: PhaseBarriers::new(num_threads, barrier_timeout),
            step: StepCounter::default(),
            operator,
        });

        // the engine never holds a report sender, so the channel closes once
        // all workers are gone.
        let (report_sender, reports) = mpsc::channel();

        let mut engine = Self {
            shared,
            slabs,
            workers: Vec::with_capacity(num_threads + 1),
            reports,
            state: EngineState::Idle,
        };

        let roles = engine
            .slabs
            .iter()
            .enumerate()
            .map(|(index, lines)| {
                Role::Slab {
                    index,
                    lines: lines.clone(),
                }
            })
            .chain(iter::once(Role::Excitation))
            .collect::<Vec<_>>();

        for role in roles {
            let (commands, command_receiver) = mpsc::channel();
            let id = role.id();

            let worker = Worker {
                role,
                shared: engine.shared.clone(),
                commands: command_receiver,
                reports: report_sender.clone(),
            };

            // on error the partial engine is dropped, which joins the workers
            // spawned so far.
            let join_handle = worker.spawn().map_err(Error::Spawn)?;

            engine.workers.push(WorkerHandle {
                id,
                commands,
                join_handle: Some(join_handle),
            });
        }

        tracing::debug!(
            ?size,
            num_threads,
            slabs = ?engine.slabs,
            memory = engine.shared.operator.memory_required(),
            "created engine"
        );

        Ok(engine)
    }

    pub fn operator(&self) -> &Arc<Operator> {
        &self.shared.operator
    }

    pub fn size(&self) -> &Vector3<usize> {
        self.shared.operator.size()
    }

    pub fn num_threads(&self) -> usize {
        self.slabs.len()
    }

    /// The lines along x updated by each slab worker.
    pub fn slabs(&self) -> &[Range<usize>] {
        &self.slabs
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Handle to the step counter that can be read from other threads while a
    /// batch is running.
    pub fn step_counter(&self) -> StepCounter {
        self.shared.step.clone()
    }

    /// Stops and joins all workers.
    ///
    /// Afterwards the fields can still be read, but no more steps can be run.
    /// Returns an error if a worker thread panicked.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        if self.state == EngineState::Stopped {
            return Ok(());
        }
        self.state = EngineState::Stopped;

        for worker in &self.workers {
            // fails only if the worker is gone already
            let _ = worker.commands.send(Command::Shutdown);
        }

        let mut panicked = None;
        for worker in &mut self.workers {
            if let Some(join_handle) = worker.join_handle.take()
                && join_handle.join().is_err()
            {
                tracing::error!(worker = %worker.id, "worker panicked");
                panicked.get_or_insert(worker.id);
            }
        }

        tracing::debug!("engine shut down");

        if let Some(worker) = panicked {
            Err(ConcurrencyFault::WorkerPanicked {
                worker: worker.to_string(),
            }
            .into())
        }
        else {
            Ok(())
        }
    }

    fn check_state(&self) -> Result<(), Error> {
        match self.state {
            EngineState::Idle => Ok(()),
            EngineState::Faulted => Err(Error::Faulted),
            EngineState::Stopped => Err(Error::Shutdown),
        }
    }

    fn fault(&mut self, fault: ConcurrencyFault) -> Error {
        tracing::error!(%fault, "engine faulted");
        self.state = EngineState::Faulted;
        self.shared.barriers.poison_all();
        fault.into()
    }
}

impl Stepper for Engine {
    /// Runs `steps` global steps and blocks until all workers finished them.
    fn run_steps(&mut self, steps: u64) -> Result<(), Error> {
        self.check_state()?;
        if steps == 0 {
            return Ok(());
        }

        let start_step = self.shared.step.get();
        let start_time = Instant::now();

        let mut fault = None;
        let mut num_running = 0;
        for worker in &self.workers {
            if worker.commands.send(Command::Run { steps }).is_err() {
                // the started workers would wait for this one forever
                self.shared.barriers.poison_all();
                fault = Some(ConcurrencyFault::WorkersDisconnected);
                break;
            }
            num_running += 1;
        }

        for _ in 0..num_running {
            match self.reports.recv() {
                Ok(Report {
                    result: Err(error),
                    worker,
                }) => {
                    tracing::debug!(%worker, %error, "worker reported failure");
                    fault = Some(root_cause(fault, error));
                }
                Ok(_) => {}
                Err(_) => {
                    fault = Some(root_cause(fault, ConcurrencyFault::WorkersDisconnected));
                    break;
                }
            }
        }

        if let Some(fault) = fault {
            return Err(self.fault(fault));
        }

        let expected = start_step + steps;
        let actual = self.shared.step.get();
        if actual != expected {
            return Err(self.fault(ConcurrencyFault::StepCountMismatch { expected, actual }));
        }

        tracing::trace!(steps, step = actual, elapsed = ?start_time.elapsed(), "batch done");

        Ok(())
    }

    fn reset(&mut self) -> Result<(), Error> {
        self.check_state()?;

        // SAFETY: all workers are parked waiting for a command. `run_steps`
        // only returns after every started worker reported back.
        unsafe {
            self.shared.fields.reset_unchecked();
        }
        self.shared.step.reset();

        Ok(())
    }

    fn step(&self) -> u64 {
        self.shared.step.get()
    }

    fn volt(&self) -> FieldView<'_> {
        self.shared.fields.volt()
    }

    fn curr(&self) -> FieldView<'_> {
        self.shared.fields.curr()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(error) = self.shutdown() {
            tracing::error!(%error, "failed to shut down engine");
        }
    }
}

fn resolve_num_threads(requested: Option<usize>, num_lines: usize) -> Result<usize, Error> {
    let num_threads = match requested {
        Some(0) => return Err(ConfigurationError::ZeroThreads.into()),
        Some(num_threads) => num_threads,
        None => {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        }
    };

    let clamped = num_threads.clamp(1, num_lines.max(1));
    if clamped != num_threads {
        tracing::debug!(
            requested = num_threads,
            num_threads = clamped,
            "more threads than lines"
        );
    }

    Ok(clamped)
}

/// Poisoned barriers are only a consequence of another failure, so any other
/// fault is preferred.
fn root_cause(current: Option<ConcurrencyFault>, new: ConcurrencyFault) -> ConcurrencyFault {
    match current {
        Some(ConcurrencyFault::BarrierPoisoned { .. }) | None => new,
        Some(current) => current,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::Duration,
    };

    use nalgebra::{
        Point3,
        Vector3,
    };

    use crate::{
        engine::{
            Engine,
            EngineConfig,
            EngineState,
        },
        error::{
            ConcurrencyFault,
            ConfigurationError,
            Error,
        },
        excitation::{
            Excitation,
            ExcitationSource,
        },
        field::FieldView,
        operator::{
            CellCoefficients,
            Coefficients,
            Operator,
        },
        sequential::SequentialEngine,
        strider::{
            Axis,
            Strider,
        },
        traits::Stepper,
    };

    fn config(num_threads: usize) -> EngineConfig {
        EngineConfig {
            num_threads: Some(num_threads),
            ..Default::default()
        }
    }

    fn scenario(vv: f64) -> Arc<Operator> {
        let size = Vector3::new(4, 4, 4);
        let strider = Strider::new(&size);
        let coefficients = Coefficients::from_fn(&strider, |component, _| {
            if component == Axis::X {
                CellCoefficients {
                    vv,
                    vi: 1.0,
                    ..Default::default()
                }
            }
            else {
                CellCoefficients::default()
            }
        });
        let excitation = Excitation::new(
            vec![1.0, 1.0, 1.0],
            vec![ExcitationSource {
                component: Axis::X,
                point: Point3::origin(),
                delay: 0,
                amplitude: 1.0,
            }],
        );
        Arc::new(Operator::new(size, coefficients, excitation).unwrap())
    }

    /// Deterministic values in `[-0.5, 0.5)`.
    fn noise(seed: usize) -> f64 {
        let mut x = (seed as u64)
            .wrapping_mul(0x9e3779b97f4a7c15)
            .wrapping_add(0x2545f4914f6cdd1d);
        x ^= x >> 29;
        x = x.wrapping_mul(0xbf58476d1ce4e5b9);
        x ^= x >> 32;
        (x >> 11) as f64 / (1u64 << 53) as f64 - 0.5
    }

    fn random_operator(size: Vector3<usize>) -> Arc<Operator> {
        let strider = Strider::new(&size);
        let coefficients = Coefficients::from_fn(&strider, |component, point| {
            let seed = 4 * strider.index_unchecked(component, &point);
            CellCoefficients {
                vv: 0.75 + 0.5 * noise(seed),
                vi: noise(seed + 1),
                ii: 0.75 + 0.5 * noise(seed + 2),
                iv: noise(seed + 3),
            }
        });
        let excitation = Excitation::new(
            (0..8).map(|t| (t as f64 * 0.7).sin()).collect(),
            vec![
                ExcitationSource {
                    component: Axis::Z,
                    point: Point3::new(2, 1, 1),
                    delay: 0,
                    amplitude: 1.0,
                },
                ExcitationSource {
                    component: Axis::Y,
                    point: size.map(|n| n - 1).into(),
                    delay: 3,
                    amplitude: -2.0,
                },
            ],
        );
        Arc::new(Operator::new(size, coefficients, excitation).unwrap())
    }

    fn bits(field: FieldView) -> Vec<u64> {
        field.as_slice().iter().map(|x| x.to_bits()).collect()
    }

    #[test]
    fn it_runs_the_single_source_scenario() {
        for num_threads in 1..=4 {
            let mut engine = Engine::new(scenario(1.0), &config(num_threads)).unwrap();
            engine.run_steps(3).unwrap();

            // injected at steps 1 and 2, not at step 0
            let volt = engine.volt();
            assert_eq!(volt.get(Axis::X, &Point3::origin()), Some(2.0));
            assert_eq!(volt.iter().filter(|(_, _, x)| *x != 0.0).count(), 1);
            assert!(engine.curr().as_slice().iter().all(|x| *x == 0.0));
        }
    }

    #[test]
    fn it_overwrites_voltages_without_memory() {
        let mut engine = Engine::new(scenario(0.0), &config(2)).unwrap();
        engine.run_steps(3).unwrap();
        assert_eq!(engine.volt().get(Axis::X, &Point3::origin()), Some(1.0));
    }

    #[test]
    fn it_counts_global_steps() {
        for num_threads in 1..=5 {
            let operator = random_operator(Vector3::new(5, 3, 3));
            let mut engine = Engine::new(operator, &config(num_threads)).unwrap();
            let counter = engine.step_counter();

            engine.run_steps(3).unwrap();
            engine.run_steps(0).unwrap();
            engine.run_steps(4).unwrap();
            assert_eq!(engine.step(), 7);
            assert_eq!(counter.get(), 7);

            engine.reset().unwrap();
            assert_eq!(engine.step(), 0);
            engine.run_steps(2).unwrap();
            assert_eq!(counter.get(), 2);
        }
    }

    #[test]
    fn it_windows_the_excitation() {
        let size = Vector3::new(3, 3, 3);
        let strider = Strider::new(&size);
        let point = Point3::new(1, 2, 0);
        let coefficients = Coefficients::uniform(
            &strider,
            CellCoefficients {
                vv: 1.0,
                ..Default::default()
            },
        );
        let excitation = Excitation::new(
            vec![5.0, 2.0, 3.0],
            vec![ExcitationSource {
                component: Axis::Y,
                point,
                delay: 2,
                amplitude: 0.5,
            }],
        );
        let operator = Arc::new(Operator::new(size, coefficients, excitation).unwrap());
        let mut engine = Engine::new(operator, &config(2)).unwrap();

        let mut injected = vec![];
        let mut previous = 0.0;
        for _ in 0..8 {
            engine.run_steps(1).unwrap();
            let current = engine.volt().get(Axis::Y, &point).unwrap();
            injected.push(current - previous);
            previous = current;
        }

        assert_eq!(injected, vec![0.0, 0.0, 0.0, 1.0, 1.5, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn it_is_deterministic() {
        let operator = random_operator(Vector3::new(6, 4, 5));

        let mut first = Engine::new(operator.clone(), &config(3)).unwrap();
        let mut second = Engine::new(operator, &config(3)).unwrap();
        first.run_steps(15).unwrap();
        second.run_steps(15).unwrap();

        assert_eq!(bits(first.volt()), bits(second.volt()));
        assert_eq!(bits(first.curr()), bits(second.curr()));

        let volt = bits(first.volt());
        let curr = bits(first.curr());
        first.reset().unwrap();
        first.run_steps(15).unwrap();
        assert_eq!(bits(first.volt()), volt);
        assert_eq!(bits(first.curr()), curr);
    }

    #[test]
    fn it_matches_the_sequential_engine_for_any_thread_count() {
        let operator = random_operator(Vector3::new(5, 4, 3));

        let mut sequential = SequentialEngine::new(operator.clone());
        sequential.run_steps(12).unwrap();
        assert!(sequential.volt().iter().filter(|(_, _, x)| *x != 0.0).count() > 10);
        assert!(sequential.curr().iter().filter(|(_, _, x)| *x != 0.0).count() > 10);

        for num_threads in [1, 2, 3, 4, 5, 8] {
            let mut engine = Engine::new(operator.clone(), &config(num_threads)).unwrap();
            // split into uneven batches
            engine.run_steps(5).unwrap();
            engine.run_steps(7).unwrap();

            assert_eq!(bits(engine.volt()), bits(sequential.volt()), "{num_threads} threads");
            assert_eq!(bits(engine.curr()), bits(sequential.curr()), "{num_threads} threads");
        }
    }

    #[test]
    fn it_rejects_zero_threads() {
        let result = Engine::new(scenario(1.0), &config(0));
        assert!(matches!(
            result,
            Err(Error::Configuration(ConfigurationError::ZeroThreads))
        ));
    }

    #[test]
    fn it_clamps_threads_to_the_number_of_lines() {
        let engine = Engine::new(random_operator(Vector3::new(3, 4, 4)), &config(16)).unwrap();
        assert_eq!(engine.num_threads(), 3);
        assert_eq!(engine.slabs(), &[0..1, 1..2, 2..3]);
        assert_eq!(engine.size(), &Vector3::new(3, 4, 4));
        assert_eq!(engine.operator().strider().num_cells(), 48);
    }

    #[test]
    fn it_defaults_to_the_available_parallelism() {
        let operator = random_operator(Vector3::new(64, 2, 2));
        let engine = Engine::new(operator, &EngineConfig::default()).unwrap();
        assert!(engine.num_threads() >= 1);
        assert_eq!(engine.slabs().len(), engine.num_threads());
        assert_eq!(engine.slabs().last().unwrap().end, 64);
    }

    #[test]
    fn it_fails_after_shutdown() {
        let mut engine = Engine::new(scenario(1.0), &config(2)).unwrap();
        engine.run_steps(2).unwrap();
        engine.shutdown().unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);

        assert!(matches!(engine.run_steps(1), Err(Error::Shutdown)));
        assert!(matches!(engine.reset(), Err(Error::Shutdown)));
        // fields stay readable
        assert_eq!(engine.volt().get(Axis::X, &Point3::origin()), Some(1.0));
        engine.shutdown().unwrap();
    }

    #[test]
    fn it_faults_when_a_barrier_is_poisoned() {
        let mut engine = Engine::new(scenario(1.0), &config(3)).unwrap();
        engine.run_steps(1).unwrap();

        engine.shared.barriers.voltage_done.poison();

        assert!(matches!(
            engine.run_steps(1),
            Err(Error::Concurrency(ConcurrencyFault::BarrierPoisoned { .. }))
        ));
        assert_eq!(engine.state(), EngineState::Faulted);
        assert!(matches!(engine.run_steps(1), Err(Error::Faulted)));

        engine.shutdown().unwrap();
    }

    #[test]
    fn it_faults_when_a_worker_panics() {
        // the second slab reaches past the grid, so its worker panics in the
        // first voltage update
        let mut engine =
            Engine::with_slabs(scenario(1.0), vec![0..2, 2..99], Some(Duration::from_secs(10)))
                .unwrap();

        match engine.run_steps(3) {
            Err(Error::Concurrency(ConcurrencyFault::WorkerPanicked { worker })) => {
                assert_eq!(worker, "slab 1");
            }
            result => panic!("unexpected result: {result:?}"),
        }
        assert_eq!(engine.state(), EngineState::Faulted);
        assert!(matches!(engine.run_steps(1), Err(Error::Faulted)));
        assert!(matches!(engine.reset(), Err(Error::Faulted)));

        assert!(matches!(
            engine.shutdown(),
            Err(Error::Concurrency(ConcurrencyFault::WorkerPanicked { .. }))
        ));
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn it_runs_without_a_barrier_timeout() {
        assert_eq!(
            EngineConfig::default().barrier_timeout,
            Some(Duration::from_secs(60))
        );

        let operator = random_operator(Vector3::new(4, 3, 3));
        let mut engine = Engine::new(
            operator.clone(),
            &EngineConfig {
                num_threads: Some(3),
                barrier_timeout: None,
            },
        )
        .unwrap();
        let mut sequential = SequentialEngine::new(operator);

        engine.run_steps(6).unwrap();
        sequential.run_steps(6).unwrap();
        assert_eq!(bits(engine.volt()), bits(sequential.volt()));
    }

    #[test]
    fn it_ignores_zero_steps() {
        let mut engine = Engine::new(scenario(1.0), &config(2)).unwrap();
        engine.run_steps(0).unwrap();
        assert_eq!(engine.step(), 0);
        assert!(engine.volt().as_slice().iter().all(|x| *x == 0.0));
    }
}
