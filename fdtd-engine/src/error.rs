use std::time::Duration;

use nalgebra::{
    Point3,
    Vector3,
};

use crate::strider::Axis;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid engine configuration")]
    Configuration(#[from] ConfigurationError),
    #[error("engine fault")]
    Concurrency(#[from] ConcurrencyFault),
    #[error("failed to spawn worker thread")]
    Spawn(#[source] std::io::Error),
    #[error("engine has been shut down")]
    Shutdown,
    #[error("engine is unusable after an earlier fault")]
    Faulted,
}

/// Problems with the operator or engine configuration. These are detected
/// when the engine is constructed and never during stepping.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("grid dimensions must be non-zero: {size:?}")]
    ZeroDimension { size: Vector3<usize> },
    #[error("{table} table has {actual} samples, expected {expected}")]
    ShapeMismatch {
        table: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("excitation source {source_index} ({component:?} at {point:?}) is outside the grid {size:?}")]
    SourceOutOfBounds {
        source_index: usize,
        component: Axis,
        point: Point3<usize>,
        size: Vector3<usize>,
    },
    #[error("number of threads must be at least 1")]
    ZeroThreads,
}

/// Runtime failures of the worker pool.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConcurrencyFault {
    #[error("timed out after {timeout:?} waiting at barrier {barrier}")]
    BarrierTimeout {
        barrier: &'static str,
        timeout: Duration,
    },
    #[error("barrier {barrier} was poisoned by a failing peer")]
    BarrierPoisoned { barrier: &'static str },
    #[error("worker {worker} panicked")]
    WorkerPanicked { worker: String },
    #[error("all workers disconnected before finishing the batch")]
    WorkersDisconnected,
    #[error("step counter at {actual} after batch, expected {expected}")]
    StepCountMismatch { expected: u64, actual: u64 },
}
