use core::cell::RefCell;

use ufmt::uWrite;

use crate::{AxisData, EncoderLink, MotorOutput, PidTask, PositionSource, RunContext, Task, TaskControl, TaskError, Transport, AXIS_LIST};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusState {
    Report,
}

impl From<StatusState> for u8 {
    fn from(_: StatusState) -> u8 { 0 }
}

/// Periodic one line per axis report of the controllers and the encoder link.
///
/// Reporting never stops the machine: output errors are dropped, and an axis
/// whose controller or link is borrowed elsewhere is skipped for the cycle.
pub struct StatusTask<'a, W, T: Transport, E: PositionSource, M: MotorOutput> {
    out: W,
    link: &'a RefCell<EncoderLink<T>>,
    controllers: AxisData<&'a RefCell<TaskControl<PidTask<E, M>>>>,
}

impl<'a, W, T, E, M> StatusTask<'a, W, T, E, M>
    where W: uWrite, T: Transport, E: PositionSource, M: MotorOutput
{
    pub fn new(out: W, link: &'a RefCell<EncoderLink<T>>, controllers: AxisData<&'a RefCell<TaskControl<PidTask<E, M>>>>) -> Self {
        Self { out, link, controllers }
    }

    pub fn out(&self) -> &W { &self.out }

    fn report(&mut self) {
        let Ok(link) = self.link.try_borrow() else {
            return;
        };
        for axis in AXIS_LIST {
            let Ok(control) = self.controllers.match_id(axis).try_borrow() else {
                continue;
            };
            let control: &TaskControl<PidTask<E, M>> = &control;
            let pid = control.task();
            let _ = ufmt::uwriteln!(self.out, "{} set {} pos {} duty {} link errors {} {}",
                axis, pid.setpoint(), link.position(axis), pid.duty_cycle(), link.error_count(axis), control);
        }
    }
}

impl<W, T, E, M> Task for StatusTask<'_, W, T, E, M>
    where W: uWrite, T: Transport, E: PositionSource, M: MotorOutput
{
    type State = StatusState;

    fn initial_state(&self) -> StatusState { StatusState::Report }

    fn run(&mut self, _state: StatusState, _ctx: &mut RunContext) -> Result<Option<StatusState>, TaskError> {
        self.report();
        Ok(None)
    }
}
