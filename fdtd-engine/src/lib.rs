//! Multi-threaded FDTD leapfrog engine.
//!
//! The grid is decomposed into slabs along the x axis. Each slab is updated by
//! its own worker thread, and a dedicated thread injects the excitation
//! between the voltage and current half step.

pub mod decomposition;
mod engine;
pub mod error;
pub mod excitation;
pub mod field;
pub mod kernel;
pub mod operator;
mod sequential;
pub mod strider;
pub mod sync;
mod traits;
pub mod waveform;
mod worker;

pub use crate::{
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
    waveform::Waveform,
    worker::{
        StepCounter,
        WorkerId,
    },
};
