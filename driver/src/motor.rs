use arduino_hal::port::mode::PwmOutput;
use arduino_hal::port::Pin;
use avr_hal_generic::simple_pwm::PwmPinOps;
use embedded_hal::digital::v2::OutputPin;
use plotter_core::{Axis, Direction, MotorOutput};

/// An 8 bit PWM output.
pub trait DutyOutput {
    fn enable(&mut self);
    fn set_duty(&mut self, duty: u8);
}

impl<TC, PIN: PwmPinOps<TC, Duty = u8>> DutyOutput for Pin<PwmOutput<TC>, PIN> {
    fn enable(&mut self) {
        Pin::enable(self)
    }
    fn set_duty(&mut self, duty: u8) {
        Pin::set_duty(self, duty)
    }
}

/// One half of the dual H-bridge: two direction inputs and a PWM enable.
pub struct Bridge<P, A, B> {
    pwm: P,
    in_a: A,
    in_b: B,
}

pub trait Channel {
    fn direction(&mut self, direction: Direction);
    fn duty(&mut self, duty: u8);
}

impl<P, A, B> Bridge<P, A, B>
    where P: DutyOutput, A: OutputPin, B: OutputPin
{
    /// Starts braked with the output at zero.
    pub fn new(mut pwm: P, in_a: A, in_b: B) -> Self {
        pwm.set_duty(0);
        pwm.enable();
        let mut bridge = Self { pwm, in_a, in_b };
        bridge.direction(Direction::Brake);
        bridge
    }
}

impl<P, A, B> Channel for Bridge<P, A, B>
    where P: DutyOutput, A: OutputPin, B: OutputPin
{
    fn direction(&mut self, direction: Direction) {
        let (a, b) = match direction {
            Direction::Forward => (true, false),
            Direction::Reverse => (false, true),
            Direction::Brake => (true, true),
        };
        // lows first so both inputs are never driven the opposite way at once
        if !a {
            let _ = self.in_a.set_low();
        }
        if !b {
            let _ = self.in_b.set_low();
        }
        if a {
            let _ = self.in_a.set_high();
        }
        if b {
            let _ = self.in_b.set_high();
        }
    }

    fn duty(&mut self, duty: u8) {
        self.pwm.set_duty(duty);
    }
}

/// Both plotter motors. Duty cycle 0 leaves the motor coasting in whatever
/// direction was last set.
pub struct HBridge<R, T> {
    radius: R,
    angle: T,
}

impl<R: Channel, T: Channel> HBridge<R, T> {
    pub fn new(radius: R, angle: T) -> Self {
        Self { radius, angle }
    }

    fn channel(&mut self, axis: Axis) -> &mut dyn Channel {
        match axis {
            Axis::Radius => &mut self.radius,
            Axis::Angle => &mut self.angle,
        }
    }
}

impl<R: Channel, T: Channel> MotorOutput for HBridge<R, T> {
    fn set_direction(&mut self, axis: Axis, direction: Direction) {
        self.channel(axis).direction(direction);
    }

    fn set_duty_cycle(&mut self, axis: Axis, duty: u8) {
        self.channel(axis).duty(duty);
    }
}
