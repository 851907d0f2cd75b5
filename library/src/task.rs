//! Cooperative, time triggered tasks.
//!
//! Each task owns a small state machine. The polling loop calls
//! [`TaskControl::poll_task`] for every task in turn; a task whose due time has
//! arrived gets its run step invoked once with its current state and may move
//! to another state. Nothing preempts a run step, so tasks never need locks
//! between themselves.

use portable_atomic::{AtomicU8, Ordering};
use ufmt::{uDisplay, uWrite, Formatter};

use crate::{ClockValue, TaskError, TimerSource};

static SERIAL_COUNTER: AtomicU8 = AtomicU8::new(0);

/// Scheduler level status of a task, separate from the task's own state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpState {
    /// Waiting for its due time.
    Waiting,
    /// Runs on the next poll without waiting for the interval.
    Pending,
    /// Skipped by polling until resumed.
    Suspended,
}

/// Handed to a run step so it can ask to be run again straight away.
#[derive(Default)]
pub struct RunContext {
    run_again: bool,
}

impl RunContext {
    pub fn run_again_asap(&mut self) {
        self.run_again = true;
    }
}

/// A unit of periodic work.
pub trait Task {
    /// The task's own state. Converts to a number for diagnostics.
    type State: Copy + Into<u8>;

    fn initial_state(&self) -> Self::State;

    /// Do one step of work in `state`. `Ok(None)` keeps the current state.
    fn run(&mut self, state: Self::State, ctx: &mut RunContext) -> Result<Option<Self::State>, TaskError>;
}

/// Execution time statistics for one task.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Profile {
    pub min: ClockValue,
    pub max: ClockValue,
    pub sum: ClockValue,
    pub runs: u32,
}

impl Profile {
    pub fn record(&mut self, start: ClockValue, end: ClockValue) {
        // a clock running backwards can't be timed
        let Some(duration) = end.checked_sub(start) else {
            return;
        };
        if duration > self.max {
            self.max = duration;
        }
        if self.runs == 0 || duration < self.min {
            self.min = duration;
        }
        self.sum += duration;
        self.runs = self.runs.saturating_add(1);
    }

    pub fn average(&self) -> ClockValue {
        self.sum.div_runs(self.runs)
    }
}

/// Scheduling bookkeeping wrapped around a [`Task`].
pub struct TaskControl<T: Task> {
    task: T,
    serial_number: u8,
    interval: ClockValue,
    next_run_time: ClockValue,
    op_state: OpState,
    saved_op_state: OpState,
    current_state: T::State,
    profile: Option<Profile>,
}

impl<T: Task> TaskControl<T> {
    /// The task is due immediately and starts in its initial state.
    pub fn new(task: T, interval: ClockValue) -> Self {
        let current_state = task.initial_state();
        Self {
            task,
            serial_number: SERIAL_COUNTER.fetch_add(1, Ordering::Relaxed),
            interval,
            next_run_time: ClockValue::ZERO,
            op_state: OpState::Waiting,
            saved_op_state: OpState::Waiting,
            current_state,
            profile: None,
        }
    }

    pub fn serial_number(&self) -> u8 { self.serial_number }
    pub fn op_state(&self) -> OpState { self.op_state }
    pub fn current_state(&self) -> T::State { self.current_state }
    pub fn interval(&self) -> ClockValue { self.interval }
    pub fn next_run_time(&self) -> ClockValue { self.next_run_time }
    pub fn task(&self) -> &T { &self.task }
    pub fn task_mut(&mut self) -> &mut T { &mut self.task }

    pub fn set_interval(&mut self, interval: ClockValue) {
        self.interval = interval;
    }

    /// Override the due time. After a large jump of the clock or the interval
    /// this keeps the task from running back to back to catch up.
    pub fn set_next_run_time(&mut self, next_run_time: ClockValue) {
        self.next_run_time = next_run_time;
    }

    /// Only meaningful before the task first runs.
    pub fn set_initial_state(&mut self, state: T::State) {
        self.current_state = state;
    }

    pub fn is_due(&self, now: ClockValue) -> bool {
        now >= self.next_run_time
    }

    /// Give the task its chance to run and report where it stands afterwards.
    ///
    /// A `Pending` result asks the caller to poll again promptly. Errors come
    /// straight from the run step and leave the task's state, due time and
    /// op-state as they were before the run.
    pub fn poll_task(&mut self, timer: &impl TimerSource) -> Result<OpState, TaskError> {
        self.poll(timer, |_, _| {})
    }

    /// [`TaskControl::poll_task`], writing a `T<serial>:<from>-<to>` line to
    /// `trace` whenever the run step moves the task to another state.
    pub fn poll_task_traced<W: uWrite + ?Sized>(&mut self, timer: &impl TimerSource, trace: &mut W) -> Result<OpState, TaskError> {
        let serial_number = self.serial_number;
        self.poll(timer, |from, to| {
            let _ = ufmt::uwriteln!(trace, "T{}:{}-{}", serial_number, from, to);
        })
    }

    fn poll(&mut self, timer: &impl TimerSource, mut on_transition: impl FnMut(u8, u8)) -> Result<OpState, TaskError> {
        match self.op_state {
            OpState::Suspended => return Ok(OpState::Suspended),
            OpState::Waiting if !self.is_due(timer.now()) => return Ok(OpState::Waiting),
            OpState::Waiting | OpState::Pending => {},
        }

        let mut ctx = RunContext::default();
        let start = self.profile.map(|_| timer.now());
        let result = self.task.run(self.current_state, &mut ctx);
        if let (Some(profile), Some(start)) = (self.profile.as_mut(), start) {
            profile.record(start, timer.now());
        }

        if let Some(next_state) = result? {
            on_transition(self.current_state.into(), next_state.into());
            self.current_state = next_state;
        }
        if ctx.run_again {
            self.op_state = OpState::Pending;
        }
        else {
            self.op_state = OpState::Waiting;
            self.next_run_time += self.interval;
        }
        Ok(self.op_state)
    }

    /// Stop polling the task. Its due time does not move while suspended.
    pub fn suspend(&mut self) {
        if self.op_state != OpState::Suspended {
            self.saved_op_state = self.op_state;
            self.op_state = OpState::Suspended;
        }
    }

    /// Restore the operational state saved by [`TaskControl::suspend`].
    pub fn resume(&mut self) {
        if self.op_state == OpState::Suspended {
            self.op_state = self.saved_op_state;
        }
    }

    pub fn enable_profiler(&mut self) {
        if self.profile.is_none() {
            self.profile = Some(Profile::default());
        }
    }

    pub fn clear_profiler(&mut self) {
        if let Some(profile) = self.profile.as_mut() {
            *profile = Profile::default();
        }
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    /// Write the stop-the-world message for `error`. The caller halts after.
    pub fn report_fatal<W: uWrite + ?Sized>(&self, w: &mut W, error: &TaskError) -> Result<(), W::Error> {
        let state: u8 = self.current_state.into();
        ufmt::uwriteln!(w, "ERROR in task {} state {}: {}", self.serial_number, state, error)?;
        ufmt::uwriteln!(w, "Processing stopped.")
    }
}

impl<T: Task> uDisplay for TaskControl<T> {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
        where W: uWrite + ?Sized
    {
        ufmt::uwrite!(f, "Task: {}", self.serial_number)?;
        if let Some(profile) = &self.profile {
            ufmt::uwrite!(f, " runs: {} avg: {} max: {} min: {}",
                profile.runs, profile.average(), profile.max, profile.min)?;
        }
        Ok(())
    }
}
