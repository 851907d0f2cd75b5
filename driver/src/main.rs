#![no_std]
#![no_main]
#![feature(abi_avr_interrupt)]

mod clock;
mod console;
mod link;
mod motor;

use core::cell::RefCell;

use arduino_hal::hal::port::{Dynamic, PB0, PB5, PB6};
use arduino_hal::port::mode::{Output, PwmOutput};
use arduino_hal::port::Pin;
use arduino_hal::simple_pwm::{IntoPwmPin, Prescaler, Timer1Pwm};
use arduino_hal::spi::ChipSelectPin;
use panic_halt as _;
use plotter_core::config::{PID_INTERVAL, STATUS_INTERVAL};
use plotter_core::{
    Axis, AxisData, EncoderLink, Gains, MotorOutput, PidConfig, PidTask, RetryPolicy, StatusTask, Task,
    TaskControl, TaskError, TimerSource, AXIS_LIST,
};
use static_cell::StaticCell;

use clock::SystemClock;
use console::Console;
use link::SpiTransport;
use motor::{Bridge, HBridge};

/*
* Arduino mega wiring.
* Encoder link (SPI master)
*   sck     D52(PB1)
*   mosi    D51(PB2)
*   miso    D50(PB3)
*   select  D53(PB0)
* Radius motor (H-bridge 1)
*   pwm     D12(PB6, OC1B)
*   in a/b  D22(PA0) / D23(PA1)
* Angle motor (H-bridge 2)
*   pwm     D11(PB5, OC1A)
*   in a/b  D24(PA2) / D25(PA3)
*/

#[cfg(feature = "bounded-retry")]
const LINK_RETRY: RetryPolicy = RetryPolicy::Bounded(plotter_core::config::MAX_LINK_ATTEMPTS);
#[cfg(not(feature = "bounded-retry"))]
const LINK_RETRY: RetryPolicy = RetryPolicy::Unbounded;

const RADIUS_GAINS: Gains = Gains { kp: 2_000, ki: 5_000, kd: 0 };
const ANGLE_GAINS: Gains = Gains { kp: 3_000, ki: 5_000, kd: 0 };

type Transport = SpiTransport<arduino_hal::Spi, ChipSelectPin<PB0>>;
type Link = EncoderLink<Transport>;
type Motors = HBridge<
    Bridge<Pin<PwmOutput<Timer1Pwm>, PB6>, Pin<Output, Dynamic>, Pin<Output, Dynamic>>,
    Bridge<Pin<PwmOutput<Timer1Pwm>, PB5>, Pin<Output, Dynamic>, Pin<Output, Dynamic>>,
>;
type Pid = PidTask<&'static RefCell<Link>, &'static RefCell<Motors>>;

static LINK: StaticCell<RefCell<Link>> = StaticCell::new();
static MOTORS: StaticCell<RefCell<Motors>> = StaticCell::new();
static CONTROLLERS: StaticCell<AxisData<RefCell<TaskControl<Pid>>>> = StaticCell::new();

/// Motors off, say why, and stop everything.
fn halt<T: Task>(control: &TaskControl<T>, error: TaskError, motors: &RefCell<Motors>) -> ! {
    if let Ok(mut motors) = motors.try_borrow_mut() {
        for axis in AXIS_LIST {
            motors.set_duty_cycle(axis, 0);
        }
    }
    let _ = control.report_fatal(&mut Console, &error);
    freeze()
}

fn freeze() -> ! {
    avr_device::interrupt::disable();
    loop {
        avr_device::asm::nop();
    }
}

fn poll<T: Task>(control: &mut TaskControl<T>, clock: &SystemClock, motors: &RefCell<Motors>) {
    #[cfg(feature = "trace")]
    let result = control.poll_task_traced(clock, &mut Console);
    #[cfg(not(feature = "trace"))]
    let result = control.poll_task(clock);
    if let Err(error) = result {
        halt(control, error, motors);
    }
}

#[arduino_hal::entry]
fn main() -> ! {
    let dp = arduino_hal::Peripherals::take().unwrap();
    let pins = arduino_hal::pins!(dp);
    let clock = SystemClock::new(dp.TC0);
    let serial = arduino_hal::default_serial!(dp, pins, 57600);
    let (_serial_reader, serial_writer) = serial.split();
    console::init(serial_writer);
    unsafe { avr_device::interrupt::enable(); }

    let (spi, chip_select) = arduino_hal::Spi::new(
        dp.SPI,
        pins.d52.into_output(),
        pins.d51.into_output(),
        pins.d50.into_pull_up_input(),
        pins.d53.into_output(),
        arduino_hal::spi::Settings::default(),
    );
    let link: &'static RefCell<Link> = LINK.init(RefCell::new(EncoderLink::new(SpiTransport::new(spi, chip_select))));

    let timer1 = Timer1Pwm::new(dp.TC1, Prescaler::Prescale64);
    let motors: &'static RefCell<Motors> = MOTORS.init(RefCell::new(HBridge::new(
        Bridge::new(pins.d12.into_output().into_pwm(&timer1), pins.d22.into_output().downgrade(), pins.d23.into_output().downgrade()),
        Bridge::new(pins.d11.into_output().into_pwm(&timer1), pins.d24.into_output().downgrade(), pins.d25.into_output().downgrade()),
    )));

    let mut console = Console;
    let _ = ufmt::uwriteln!(console, "Polar plotter controller");

    for axis in AXIS_LIST {
        if let Err(error) = link.borrow_mut().clear(axis, LINK_RETRY) {
            let _ = ufmt::uwriteln!(console, "ERROR clearing encoders: {}", error);
            let _ = ufmt::uwriteln!(console, "Processing stopped.");
            freeze();
        }
    }

    let config = PidConfig::default().with_retry(LINK_RETRY);
    let controllers: &'static AxisData<RefCell<TaskControl<Pid>>> = CONTROLLERS.init(AxisData {
        radius: RefCell::new(TaskControl::new(PidTask::new(Axis::Radius, link, motors, config), PID_INTERVAL)),
        angle: RefCell::new(TaskControl::new(PidTask::new(Axis::Angle, link, motors, config), PID_INTERVAL)),
    });
    for (axis, gains) in [(Axis::Radius, RADIUS_GAINS), (Axis::Angle, ANGLE_GAINS)] {
        let mut control = controllers.match_id(axis).borrow_mut();
        control.enable_profiler();
        let pid = control.task_mut();
        pid.clear();
        pid.set_gains(gains);
        pid.set_setpoint(0);
        pid.go();
    }

    let mut status = TaskControl::new(
        StatusTask::new(Console, link, AxisData { radius: &controllers.radius, angle: &controllers.angle }),
        STATUS_INTERVAL,
    );
    status.set_next_run_time(clock.now() + STATUS_INTERVAL);

    for axis in AXIS_LIST {
        let control = controllers.match_id(axis).borrow();
        let _ = ufmt::uwriteln!(console, "{} pid {} every {}", axis, &*control, control.interval());
    }
    let _ = ufmt::uwriteln!(console, "status {} every {}", &status, status.interval());

    loop {
        for axis in AXIS_LIST {
            poll(&mut *controllers.match_id(axis).borrow_mut(), &clock, motors);
        }
        poll(&mut status, &clock, motors);
    }
}
