use std::{
    fmt::Display,
    ops::Range,
    sync::{
        Arc,
        atomic::{
            AtomicU64,
            Ordering,
        },
        mpsc,
    },
    thread::JoinHandle,
};

use crate::{
    error::ConcurrencyFault,
    field::{
        FieldBuffer,
        FieldStorage,
    },
    kernel::{
        self,
        SlabMut,
    },
    operator::Operator,
    strider::Axis,
    sync::PhaseBarriers,
};

/// Number of completed global steps.
///
/// Cloning gives a handle to the same counter, which can be used to monitor
/// progress of a running batch from another thread.
#[derive(Clone, Debug, Default)]
pub struct StepCounter {
    step: Arc<AtomicU64>,
}

impl StepCounter {
    pub fn get(&self) -> u64 {
        self.step.load(Ordering::Acquire)
    }

    pub(crate) fn advance(&self) {
        self.step.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn reset(&self) {
        self.step.store(0, Ordering::Release);
    }
}

/// State shared by the controller and all workers.
#[derive(Debug)]
pub(crate) struct Shared {
    pub operator: Arc<Operator>,
    pub fields: FieldStorage,
    pub barriers: PhaseBarriers,
    pub step: StepCounter,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Command {
    Run { steps: u64 },
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerId {
    Slab(usize),
    Excitation,
}

impl WorkerId {
    pub fn thread_name(&self) -> String {
        match self {
            WorkerId::Slab(n) => format!("fdtd-slab-{n}"),
            WorkerId::Excitation => "fdtd-excitation".to_owned(),
        }
    }
}

impl Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerId::Slab(n) => write!(f, "slab {n}"),
            WorkerId::Excitation => write!(f, "excitation"),
        }
    }
}

/// Sent by each worker once per batch.
#[derive(Debug)]
pub(crate) struct Report {
    pub worker: WorkerId,
    pub result: Result<(), ConcurrencyFault>,
}

/// What a worker computes each step.
#[derive(Clone, Debug)]
pub(crate) enum Role {
    /// Updates the lines of one slab.
    Slab { index: usize, lines: Range<usize> },
    /// Injects the soft sources between the voltage and current phase.
    Excitation,
}

impl Role {
    pub fn id(&self) -> WorkerId {
        match self {
            Role::Slab { index, .. } => WorkerId::Slab(*index),
            Role::Excitation => WorkerId::Excitation,
        }
    }
}

/// Everything a worker thread owns.
#[derive(Debug)]
pub(crate) struct Worker {
    pub role: Role,
    pub shared: Arc<Shared>,
    pub commands: mpsc::Receiver<Command>,
    pub reports: mpsc::Sender<Report>,
}

impl Worker {
    pub fn spawn(self) -> Result<JoinHandle<()>, std::io::Error> {
        spawn_thread(self.role.id().thread_name(), move || self.run())
    }

    fn run(self) {
        let id = self.role.id();
        let _guard = PanicGuard {
            worker: id,
            shared: &self.shared,
            reports: &self.reports,
        };

        tracing::trace!(worker = %id, "worker idle");

        // a closed command channel means the engine is gone
        while let Ok(command) = self.commands.recv() {
            match command {
                Command::Run { steps } => {
                    let result = match &self.role {
                        Role::Slab { lines, .. } => run_slab_batch(&self.shared, lines, steps),
                        Role::Excitation => run_excitation_batch(&self.shared, steps),
                    };

                    if let Err(error) = &result {
                        tracing::debug!(worker = %id, %error, "batch failed");
                        self.shared.barriers.poison_all();
                    }

                    if self.reports.send(Report { worker: id, result }).is_err() {
                        break;
                    }
                }
                Command::Shutdown => break,
            }
        }

        tracing::trace!(worker = %id, "worker stopped");
    }
}

fn spawn_thread<F>(name: String, f: F) -> Result<JoinHandle<()>, std::io::Error>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new().name(name).spawn(f)
}

fn run_slab_batch(
    shared: &Shared,
    lines: &Range<usize>,
    steps: u64,
) -> Result<(), ConcurrencyFault> {
    let Shared {
        operator,
        fields,
        barriers,
        step,
    } = shared;
    let strider = operator.strider();
    let coefficients = operator.coefficients();

    for _ in 0..steps {
        {
            // SAFETY: until `voltage_done` each slab worker only writes the
            // voltages of its own slab, and nobody writes currents.
            let (mut volt, curr) = unsafe {
                (
                    borrow_slab(operator, &fields.volt, lines),
                    fields.curr.slice_unchecked(),
                )
            };
            kernel::update_voltages(strider, coefficients, &mut volt, curr);
        }

        barriers.voltage_done.wait()?;
        // the excitation worker injects now
        barriers.excitation_done.wait()?;

        {
            // SAFETY: until `current_done` each slab worker only writes the
            // currents of its own slab, and nobody writes voltages.
            let (mut curr, volt) = unsafe {
                (
                    borrow_slab(operator, &fields.curr, lines),
                    fields.volt.slice_unchecked(),
                )
            };
            kernel::update_currents(strider, coefficients, &mut curr, volt);
        }

        if barriers.current_done.wait()?.is_leader() {
            step.advance();
        }
    }

    Ok(())
}

fn run_excitation_batch(shared: &Shared, steps: u64) -> Result<(), ConcurrencyFault> {
    let Shared {
        operator,
        fields,
        barriers,
        step,
    } = shared;

    for _ in 0..steps {
        barriers.voltage_done.wait()?;

        {
            // SAFETY: between `voltage_done` and `excitation_done` no other
            // thread accesses the voltages.
            let volt = unsafe { fields.volt.slice_mut_unchecked(0..fields.volt.len()) };
            kernel::apply_excitation(
                operator.strider(),
                operator.excitation(),
                volt,
                step.get(),
            );
        }

        barriers.excitation_done.wait()?;
    }

    Ok(())
}

/// # Safety
///
/// No other thread may access the slab while it is borrowed.
unsafe fn borrow_slab<'a>(
    operator: &Operator,
    buffer: &'a FieldBuffer,
    lines: &Range<usize>,
) -> SlabMut<'a> {
    let strider = operator.strider();
    let components = Axis::ALL.map(|component| {
        let range = strider.slab_index_range(component, lines);
        unsafe { buffer.slice_mut_unchecked(range) }
    });
    SlabMut::from_components(strider, lines.clone(), components)
}

/// Makes sure the controller and the other workers learn about a panicking
/// worker instead of waiting for it.
struct PanicGuard<'a> {
    worker: WorkerId,
    shared: &'a Shared,
    reports: &'a mpsc::Sender<Report>,
}

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!(worker = %self.worker, "worker panicked");
            self.shared.barriers.poison_all();
            let _ = self.reports.send(Report {
                worker: self.worker,
                result: Err(ConcurrencyFault::WorkerPanicked {
                    worker: self.worker.to_string(),
                }),
            });
        }
    }
}
