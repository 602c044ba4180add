use std::sync::Arc;

use crate::{
    error::Error,
    field::{
        FieldStorage,
        FieldView,
    },
    kernel::{
        self,
        SlabMut,
    },
    operator::Operator,
    traits::Stepper,
};

/// Single threaded reference engine.
///
/// Runs the same kernel as [`Engine`](crate::Engine) over the whole grid as a
/// single slab. Results of both are bit-identical.
#[derive(Debug)]
pub struct SequentialEngine {
    operator: Arc<Operator>,
    fields: FieldStorage,
    step: u64,
}

impl SequentialEngine {
    pub fn new(operator: Arc<Operator>) -> Self {
        let fields = FieldStorage::new(operator.strider());

        tracing::debug!(
            size = ?operator.size(),
            memory = operator.memory_required(),
            "created sequential engine"
        );

        Self {
            operator,
            fields,
            step: 0,
        }
    }

    fn update(&mut self) {
        let strider = self.operator.strider();
        let coefficients = self.operator.coefficients();
        let lines = 0..strider.size().x;

        kernel::update_voltages(
            strider,
            coefficients,
            &mut SlabMut::from_buffer(strider, lines.clone(), self.fields.volt.as_slice_mut()),
            self.fields.curr.as_slice(),
        );

        kernel::apply_excitation(
            strider,
            self.operator.excitation(),
            self.fields.volt.as_slice_mut(),
            self.step,
        );

        kernel::update_currents(
            strider,
            coefficients,
            &mut SlabMut::from_buffer(strider, lines, self.fields.curr.as_slice_mut()),
            self.fields.volt.as_slice(),
        );

        self.step += 1;
    }
}

impl Stepper for SequentialEngine {
    fn run_steps(&mut self, steps: u64) -> Result<(), Error> {
        for _ in 0..steps {
            self.update();
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), Error> {
        self.fields.reset();
        self.step = 0;
        Ok(())
    }

    fn step(&self) -> u64 {
        self.step
    }

    fn volt(&self) -> FieldView<'_> {
        self.fields.volt()
    }

    fn curr(&self) -> FieldView<'_> {
        self.fields.curr()
    }
}
