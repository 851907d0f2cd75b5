//! Closed loop position control for one plotter axis.

use core::cell::RefCell;

use crate::config::{
    ARRIVAL_COUNT, ARRIVAL_TOLERANCE, DUTY_CYCLE_MAX, D_SCALE, INTEGRAL_LIMIT, I_SCALE, P_SCALE,
};
use crate::{Axis, PositionSource, RetryPolicy, RunContext, Task, TaskError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
    Brake,
}

/// H-bridge and PWM outputs for the motors.
pub trait MotorOutput {
    fn set_direction(&mut self, axis: Axis, direction: Direction);
    fn set_duty_cycle(&mut self, axis: Axis, duty: u8);
}

impl<M: MotorOutput> MotorOutput for &RefCell<M> {
    fn set_direction(&mut self, axis: Axis, direction: Direction) {
        self.borrow_mut().set_direction(axis, direction)
    }
    fn set_duty_cycle(&mut self, axis: Axis, duty: u8) {
        self.borrow_mut().set_duty_cycle(axis, duty)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Gains {
    pub kp: u16,
    pub ki: u16,
    pub kd: u16,
}

/// What an off target cycle does to the run of on target cycles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArrivalPolicy {
    /// Leave the count alone; hits need not be consecutive.
    #[default]
    HoldOnMiss,
    /// Start counting again from zero.
    ResetOnMiss,
}

/// The derivative gain is kept but not summed into the output unless enabled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DerivativeMode {
    #[default]
    Disabled,
    Enabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PidConfig {
    pub p_scale: i64,
    pub i_scale: i64,
    pub d_scale: i64,
    pub integral_limit: i32,
    pub tolerance: i32,
    pub arrival_count: u8,
    pub arrival: ArrivalPolicy,
    pub derivative: DerivativeMode,
    pub retry: RetryPolicy,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            p_scale: P_SCALE,
            i_scale: I_SCALE,
            d_scale: D_SCALE,
            integral_limit: INTEGRAL_LIMIT,
            tolerance: ARRIVAL_TOLERANCE,
            arrival_count: ARRIVAL_COUNT,
            arrival: ArrivalPolicy::default(),
            derivative: DerivativeMode::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PidConfig {
    pub fn with_arrival(mut self, arrival: ArrivalPolicy) -> Self {
        self.arrival = arrival;
        self
    }

    pub fn with_derivative(mut self, derivative: DerivativeMode) -> Self {
        self.derivative = derivative;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PidState {
    /// Motor off, waiting for `go`.
    Idle,
    /// Reading the encoder and driving the motor every run.
    Regulating,
}

impl From<PidState> for u8 {
    fn from(value: PidState) -> u8 {
        match value {
            PidState::Idle => 0,
            PidState::Regulating => 1,
        }
    }
}

/// A zero scale contributes nothing.
fn scaled(value: i32, gain: u16, scale: i64) -> i64 {
    (value as i64 * gain as i64).checked_div(scale).unwrap_or(0)
}

/// PI position controller for one axis, run as a scheduled task.
pub struct PidTask<E: PositionSource, M: MotorOutput> {
    axis: Axis,
    encoder: E,
    motor: M,
    config: PidConfig,
    gains: Gains,
    enabled: bool,
    homing: bool,
    setpoint: i32,
    position: i32,
    integral_sum: i32,
    prev_error: i32,
    duty_cycle: u8,
    direction: Direction,
    arrived: bool,
    arrival_hits: u8,
}

impl<E: PositionSource, M: MotorOutput> PidTask<E, M> {
    pub fn new(axis: Axis, encoder: E, motor: M, config: PidConfig) -> Self {
        Self {
            axis,
            encoder,
            motor,
            config,
            gains: Gains::default(),
            enabled: false,
            homing: false,
            setpoint: 0,
            position: 0,
            integral_sum: 0,
            prev_error: 0,
            duty_cycle: 0,
            direction: Direction::Forward,
            arrived: false,
            arrival_hits: 0,
        }
    }

    pub fn axis(&self) -> Axis { self.axis }
    pub fn config(&self) -> &PidConfig { &self.config }
    pub fn gains(&self) -> Gains { self.gains }
    pub fn kp(&self) -> u16 { self.gains.kp }
    pub fn ki(&self) -> u16 { self.gains.ki }
    pub fn kd(&self) -> u16 { self.gains.kd }
    pub fn set_kp(&mut self, kp: u16) { self.gains.kp = kp; }
    pub fn set_ki(&mut self, ki: u16) { self.gains.ki = ki; }
    pub fn set_kd(&mut self, kd: u16) { self.gains.kd = kd; }
    pub fn set_gains(&mut self, gains: Gains) { self.gains = gains; }

    pub fn setpoint(&self) -> i32 { self.setpoint }
    pub fn current_position(&self) -> i32 { self.position }
    pub fn integral_sum(&self) -> i32 { self.integral_sum }
    pub fn duty_cycle(&self) -> u8 { self.duty_cycle }
    pub fn direction(&self) -> Direction { self.direction }
    pub fn is_enabled(&self) -> bool { self.enabled }
    pub fn is_homing(&self) -> bool { self.homing }
    pub fn at_segment_end(&self) -> bool { self.arrived }
    pub fn motor(&self) -> &M { &self.motor }
    pub fn encoder(&self) -> &E { &self.encoder }

    /// Start regulating toward the setpoint.
    pub fn go(&mut self) {
        self.enabled = true;
        self.arrived = false;
    }

    /// Stop regulating. The motor is switched off on the next idle run and the
    /// segment reads as finished.
    pub fn stop(&mut self) {
        self.enabled = false;
        self.arrived = true;
    }

    /// Forget all control history, e.g. after the encoder was zeroed.
    pub fn clear(&mut self) {
        self.integral_sum = 0;
        self.prev_error = 0;
        self.position = 0;
        self.duty_cycle = 0;
        self.arrival_hits = 0;
    }

    pub fn set_setpoint(&mut self, setpoint: i32) {
        self.setpoint = setpoint;
        self.arrived = false;
    }

    /// Hand the motor to the homing sequence while idle.
    pub fn request_home(&mut self, homing: bool) {
        self.homing = homing;
    }

    fn idle(&mut self) -> Option<PidState> {
        if self.homing {
            return None;
        }
        self.duty_cycle = 0;
        self.motor.set_duty_cycle(self.axis, 0);
        match self.enabled {
            true => Some(PidState::Regulating),
            false => None,
        }
    }

    fn regulate(&mut self) -> Result<Option<PidState>, TaskError> {
        let position = self.encoder.fetch_position(self.axis, self.config.retry)?;
        self.position = position;
        let error = self.setpoint.saturating_sub(position);

        let proportional = scaled(error, self.gains.kp, self.config.p_scale);
        let limit = self.config.integral_limit;
        let integral_sum = error.saturating_add(self.integral_sum).clamp(-limit, limit);
        let integral = scaled(integral_sum, self.gains.ki, self.config.i_scale);
        let derivative = match self.config.derivative {
            DerivativeMode::Disabled => 0,
            DerivativeMode::Enabled => scaled(error.saturating_sub(self.prev_error), self.gains.kd, self.config.d_scale),
        };
        self.integral_sum = integral_sum;
        self.prev_error = error;

        let output = proportional + integral + derivative;
        self.direction = if output < 0 { Direction::Reverse } else { Direction::Forward };
        self.duty_cycle = output.unsigned_abs().min(DUTY_CYCLE_MAX as u64) as u8;
        self.motor.set_direction(self.axis, self.direction);
        self.motor.set_duty_cycle(self.axis, self.duty_cycle);

        if !self.enabled {
            return Ok(Some(PidState::Idle));
        }

        if error.unsigned_abs() <= self.config.tolerance.unsigned_abs() {
            self.arrival_hits = self.arrival_hits.saturating_add(1);
            if self.arrival_hits >= self.config.arrival_count {
                self.arrived = true;
                self.arrival_hits = 0;
            }
        }
        else if self.config.arrival == ArrivalPolicy::ResetOnMiss {
            self.arrival_hits = 0;
        }
        Ok(None)
    }
}

impl<E: PositionSource, M: MotorOutput> Task for PidTask<E, M> {
    type State = PidState;

    fn initial_state(&self) -> PidState { PidState::Idle }

    fn run(&mut self, state: PidState, _ctx: &mut RunContext) -> Result<Option<PidState>, TaskError> {
        match state {
            PidState::Idle => Ok(self.idle()),
            PidState::Regulating => self.regulate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::Loopback;
    use crate::{ClockValue, EncoderCounters, EncoderLink, LinkError, OpState, TaskControl, TimerSource};

    use super::*;

    #[derive(Default)]
    struct MockEncoder {
        position: i32,
        fail: Option<LinkError>,
        reads: u32,
        policy: Option<RetryPolicy>,
    }
    impl PositionSource for MockEncoder {
        fn fetch_position(&mut self, _: Axis, policy: RetryPolicy) -> Result<i32, LinkError> {
            self.reads += 1;
            self.policy = Some(policy);
            match self.fail {
                Some(e) => Err(e),
                None => Ok(self.position),
            }
        }
    }

    #[derive(Default)]
    struct MockMotor {
        direction: Option<Direction>,
        duty: Option<u8>,
        writes: u32,
    }
    impl MotorOutput for MockMotor {
        fn set_direction(&mut self, _: Axis, direction: Direction) { self.direction = Some(direction); }
        fn set_duty_cycle(&mut self, _: Axis, duty: u8) {
            self.duty = Some(duty);
            self.writes += 1;
        }
    }

    struct Always;
    impl TimerSource for Always {
        fn now(&self) -> ClockValue { ClockValue::from_secs(1) }
    }

    type Pid = PidTask<MockEncoder, MockMotor>;

    fn pid(config: PidConfig) -> Pid {
        PidTask::new(Axis::Radius, MockEncoder::default(), MockMotor::default(), config)
    }

    fn step(pid: &mut Pid, state: PidState) -> Option<PidState> {
        pid.run(state, &mut RunContext::default()).unwrap()
    }

    /// Run one regulating cycle with the encoder reading `position`.
    fn regulate_at(pid: &mut Pid, position: i32) {
        pid.encoder.position = position;
        assert_eq!(step(pid, PidState::Regulating), None);
    }

    #[test]
    fn idle_holds_motor_off_until_go() {
        let mut pid = pid(PidConfig::default());
        assert_eq!(step(&mut pid, PidState::Idle), None);
        assert_eq!(pid.motor.duty, Some(0));
        pid.go();
        assert_eq!(step(&mut pid, PidState::Idle), Some(PidState::Regulating));
        assert_eq!(pid.encoder.reads, 0);
    }

    #[test]
    fn homing_override_leaves_motor_alone() {
        let mut pid = pid(PidConfig::default());
        pid.request_home(true);
        pid.go();
        assert_eq!(step(&mut pid, PidState::Idle), None);
        assert_eq!(pid.motor.writes, 0);
        pid.request_home(false);
        assert_eq!(step(&mut pid, PidState::Idle), Some(PidState::Regulating));
    }

    #[test]
    fn proportional_only_drive() {
        let mut pid = pid(PidConfig::default());
        pid.set_kp(1_000);
        pid.set_setpoint(1_000);
        pid.go();
        regulate_at(&mut pid, 0);
        // 1000 * 1000 / 10000
        assert_eq!(pid.duty_cycle(), 100);
        assert_eq!(pid.motor.duty, Some(100));
        assert_eq!(pid.motor.direction, Some(Direction::Forward));
        assert_eq!(pid.current_position(), 0);
    }

    #[test]
    fn proportional_plus_integral() {
        let mut pid = pid(PidConfig::default());
        pid.set_gains(Gains { kp: 1_000, ki: 50_000, kd: 0 });
        pid.set_setpoint(800);
        pid.go();
        regulate_at(&mut pid, 0);
        // p = 80, sum = 800, i = 800 * 50000 / 1e6 = 40
        assert_eq!(pid.duty_cycle(), 120);
        assert_eq!(pid.integral_sum(), 800);
        regulate_at(&mut pid, 0);
        // sum saturates at 1000, i = 50
        assert_eq!(pid.integral_sum(), 1_000);
        assert_eq!(pid.duty_cycle(), 130);
    }

    #[test]
    fn output_saturates_with_sign() {
        let mut pid = pid(PidConfig::default());
        pid.set_kp(10_000);
        pid.set_setpoint(1_000);
        pid.go();
        regulate_at(&mut pid, 0);
        assert_eq!(pid.duty_cycle(), 255);
        assert_eq!(pid.direction(), Direction::Forward);

        pid.set_setpoint(-1_000);
        regulate_at(&mut pid, 0);
        assert_eq!(pid.duty_cycle(), 255);
        assert_eq!(pid.direction(), Direction::Reverse);
        assert_eq!(pid.motor.direction, Some(Direction::Reverse));
    }

    #[test]
    fn small_negative_output_reverses() {
        let mut pid = pid(PidConfig::default());
        pid.set_kp(10_000);
        pid.set_setpoint(0);
        pid.go();
        regulate_at(&mut pid, 20);
        assert_eq!(pid.direction(), Direction::Reverse);
        assert_eq!(pid.duty_cycle(), 20);
    }

    #[test]
    fn zero_output_is_forward() {
        let mut pid = pid(PidConfig::default());
        pid.go();
        regulate_at(&mut pid, 0);
        assert_eq!(pid.direction(), Direction::Forward);
        assert_eq!(pid.duty_cycle(), 0);
    }

    #[test]
    fn integral_never_winds_up() {
        let mut pid = pid(PidConfig::default());
        pid.set_ki(1_000);
        pid.set_setpoint(1_000_000);
        pid.go();
        for _ in 0..500 {
            regulate_at(&mut pid, 0);
            assert!(pid.integral_sum() <= 1_000);
        }
        assert_eq!(pid.integral_sum(), 1_000);

        pid.set_setpoint(-1_000_000);
        for _ in 0..500 {
            regulate_at(&mut pid, 0);
            assert!(pid.integral_sum() >= -1_000);
        }
        assert_eq!(pid.integral_sum(), -1_000);
    }

    #[test]
    fn integral_unwinds_immediately_after_saturation() {
        let mut pid = pid(PidConfig::default());
        pid.set_setpoint(5_000);
        pid.go();
        regulate_at(&mut pid, 0);
        assert_eq!(pid.integral_sum(), 1_000);
        regulate_at(&mut pid, 5_300);
        assert_eq!(pid.integral_sum(), 700);
    }

    #[test]
    fn derivative_is_ignored_by_default() {
        let mut pid = pid(PidConfig::default());
        pid.set_kd(10_000);
        pid.set_setpoint(100);
        pid.go();
        regulate_at(&mut pid, 0);
        assert_eq!(pid.duty_cycle(), 0);
        assert_eq!(pid.kd(), 10_000);
    }

    #[test]
    fn derivative_when_enabled() {
        let mut pid = pid(PidConfig::default().with_derivative(DerivativeMode::Enabled));
        pid.set_kd(100);
        pid.set_setpoint(100);
        pid.go();
        // error goes 0 -> 100 in one step: d = 100 * 100 / 100
        regulate_at(&mut pid, 0);
        assert_eq!(pid.duty_cycle(), 100);
        regulate_at(&mut pid, 0);
        assert_eq!(pid.duty_cycle(), 0);
    }

    #[test]
    fn stop_returns_to_idle_and_motor_off() {
        let mut pid = pid(PidConfig::default());
        pid.set_kp(10_000);
        pid.set_setpoint(1_000);
        pid.go();
        regulate_at(&mut pid, 0);
        pid.stop();
        assert!(pid.at_segment_end());
        assert_eq!(step(&mut pid, PidState::Regulating), Some(PidState::Idle));
        assert_eq!(step(&mut pid, PidState::Idle), None);
        assert_eq!(pid.motor.duty, Some(0));
        assert_eq!(pid.duty_cycle(), 0);
    }

    #[test]
    fn go_and_setpoint_clear_arrival() {
        let mut pid = pid(PidConfig::default());
        pid.stop();
        assert!(pid.at_segment_end());
        pid.go();
        assert!(!pid.at_segment_end());
        pid.stop();
        pid.set_setpoint(5);
        assert!(!pid.at_segment_end());
    }

    #[test]
    fn clear_zeroes_control_state() {
        let mut pid = pid(PidConfig::default());
        pid.set_gains(Gains { kp: 1_000, ki: 1_000, kd: 0 });
        pid.set_setpoint(500);
        pid.go();
        regulate_at(&mut pid, 100);
        assert_ne!(pid.integral_sum(), 0);
        pid.clear();
        assert_eq!(pid.integral_sum(), 0);
        assert_eq!(pid.current_position(), 0);
        assert_eq!(pid.duty_cycle(), 0);
        assert_eq!(pid.setpoint(), 500);
        assert_eq!(pid.gains(), Gains { kp: 1_000, ki: 1_000, kd: 0 });
    }

    #[test]
    fn ten_cycles_in_band_arrive() {
        let mut pid = pid(PidConfig::default());
        pid.set_setpoint(1_000);
        pid.go();
        for _ in 0..9 {
            regulate_at(&mut pid, 1_400);
            assert!(!pid.at_segment_end());
        }
        regulate_at(&mut pid, 600);
        assert!(pid.at_segment_end());
    }

    fn arrival_with_miss(policy: ArrivalPolicy) -> [bool; 16] {
        let mut pid = pid(PidConfig::default().with_arrival(policy));
        pid.set_setpoint(0);
        pid.go();
        let mut arrived = [false; 16];
        for (cycle, seen) in arrived.iter_mut().enumerate() {
            let position = if cycle == 5 { 401 } else { -400 };
            regulate_at(&mut pid, position);
            *seen = pid.at_segment_end();
        }
        arrived
    }

    #[test]
    fn out_of_band_cycle_holds_count_by_default() {
        let arrived = arrival_with_miss(ArrivalPolicy::HoldOnMiss);
        // ten hits by cycle index 10
        assert!(!arrived[9]);
        assert!(arrived[10]);
    }

    #[test]
    fn out_of_band_cycle_resets_count_when_configured() {
        let arrived = arrival_with_miss(ArrivalPolicy::ResetOnMiss);
        assert!(!arrived[10]);
        assert!(!arrived[14]);
        assert!(arrived[15]);
    }

    #[test]
    fn link_error_surfaces_from_run() {
        let mut pid = pid(PidConfig::default());
        let error = LinkError::ChecksumRetriesExhausted { axis: Axis::Radius, attempts: 5 };
        pid.encoder.fail = Some(error);
        pid.go();
        assert_eq!(pid.run(PidState::Regulating, &mut RunContext::default()), Err(TaskError::Link(error)));
        assert_eq!(pid.motor.writes, 0);
    }

    #[test]
    fn retry_policy_is_passed_to_encoder() {
        let mut pid = pid(PidConfig::default().with_retry(RetryPolicy::Bounded(7)));
        pid.go();
        regulate_at(&mut pid, 0);
        assert_eq!(pid.encoder.policy, Some(RetryPolicy::Bounded(7)));

        let mut pid = self::pid(PidConfig::default());
        pid.go();
        regulate_at(&mut pid, 0);
        assert_eq!(pid.encoder.policy, Some(RetryPolicy::Unbounded));
    }

    #[test]
    fn bounded_retry_gives_up_on_bad_checksum() {
        let counters = EncoderCounters::new();
        let mut transport = Loopback::new(&counters);
        transport.corrupt_exchange(5, 0x01);
        let link = RefCell::new(EncoderLink::new(transport));
        let motor = RefCell::new(MockMotor::default());
        let config = PidConfig::default().with_retry(RetryPolicy::Bounded(1));
        let mut pid = PidTask::new(Axis::Radius, &link, &motor, config);
        pid.go();

        assert_eq!(
            pid.run(PidState::Regulating, &mut RunContext::default()),
            Err(TaskError::Link(LinkError::ChecksumRetriesExhausted { axis: Axis::Radius, attempts: 1 })),
        );
        assert_eq!(motor.borrow().writes, 0);
        assert_eq!(link.borrow().error_count(Axis::Radius), 1);
    }

    #[test]
    fn zero_scale_drops_the_term() {
        let mut config = PidConfig::default();
        config.p_scale = 0;
        let mut pid = pid(config);
        pid.set_gains(Gains { kp: 1_000, ki: 50_000, kd: 0 });
        pid.set_setpoint(800);
        pid.go();
        regulate_at(&mut pid, 0);
        // only the integral term: 800 * 50000 / 1e6
        assert_eq!(pid.duty_cycle(), 40);
    }

    #[test]
    fn scheduled_end_to_end_over_link() {
        let counters = EncoderCounters::new();
        let mut transport = Loopback::new(&counters);
        // first transfer's checksum is mangled and has to be retried
        transport.corrupt_exchange(5, 0x01);
        let link = RefCell::new(EncoderLink::new(transport));
        let motor = RefCell::new(MockMotor::default());
        let mut task = TaskControl::new(
            PidTask::new(Axis::Radius, &link, &motor, PidConfig::default()),
            ClockValue::ZERO,
        );
        task.task_mut().set_kp(5_000);
        task.task_mut().set_setpoint(1_000);
        task.task_mut().go();

        assert_eq!(task.poll_task(&Always), Ok(OpState::Waiting));
        assert_eq!(task.current_state(), PidState::Regulating);
        task.poll_task(&Always).unwrap();
        // error 1000, p = 500, clamped
        assert_eq!(motor.borrow().duty, Some(255));
        assert_eq!(motor.borrow().direction, Some(Direction::Forward));
        assert_eq!(link.borrow().error_count(Axis::Radius), 1);

        counters.add(Axis::Radius, 1_100);
        task.poll_task(&Always).unwrap();
        assert_eq!(task.task().current_position(), 1_100);
        assert_eq!(motor.borrow().direction, Some(Direction::Reverse));
        assert_eq!(motor.borrow().duty, Some(50));
    }

    #[test]
    fn two_axes_share_link_and_motor() {
        let counters = EncoderCounters::new();
        counters.add(Axis::Angle, -300);
        let link = RefCell::new(EncoderLink::new(Loopback::new(&counters)));
        let motor = RefCell::new(MockMotor::default());
        let mut radius = PidTask::new(Axis::Radius, &link, &motor, PidConfig::default());
        let mut angle = PidTask::new(Axis::Angle, &link, &motor, PidConfig::default());
        radius.go();
        angle.go();
        let mut ctx = RunContext::default();
        radius.run(PidState::Regulating, &mut ctx).unwrap();
        angle.run(PidState::Regulating, &mut ctx).unwrap();
        assert_eq!(radius.current_position(), 0);
        assert_eq!(angle.current_position(), -300);
    }
}
