use core::cell;

use plotter_core::{ClockValue, TimerSource};

// datasheet: https://ww1.microchip.com/downloads/en/devicedoc/atmel-2549-8-bit-avr-microcontroller-atmega640-1280-1281-2560-2561_datasheet.pdf
// rust timer block: https://blog.rahix.de/005-avr-hal-millis/

// ╔═══════════╦══════════════╦═══════════════════╗
// ║ PRESCALER ║ TIMER_COUNTS ║ Overflow Interval ║
// ╠═══════════╬══════════════╬═══════════════════╣
// ║        64 ║          250 ║              1 ms ║
// ║       256 ║          125 ║              2 ms ║
// ║       256 ║          250 ║              4 ms ║
// ║      1024 ║          125 ║              8 ms ║
// ║      1024 ║          250 ║             16 ms ║
// ╚═══════════╩══════════════╩═══════════════════╝
const PRESCALER: u64 = 64;
const TIMER_COUNTS: u64 = 250;
const MICROS_PER_COUNT: u64 = PRESCALER / 16;
const MICROS_PER_INTERRUPT: u64 = MICROS_PER_COUNT * TIMER_COUNTS;

static MICROS_COUNTER: avr_device::interrupt::Mutex<cell::Cell<u64>> = avr_device::interrupt::Mutex::new(cell::Cell::new(0));

/// Free running microsecond clock on TC0.
pub struct SystemClock {
    tc0: arduino_hal::pac::TC0,
}

impl SystemClock {
    pub fn new(tc0: arduino_hal::pac::TC0) -> Self {
        tc0.tccr0a.write(|w| w.wgm0().ctc());
        tc0.ocr0a.write(|w| unsafe { w.bits((TIMER_COUNTS - 1) as u8) });
        tc0.tccr0b.write(|w| match PRESCALER {
            8 => w.cs0().prescale_8(),
            64 => w.cs0().prescale_64(),
            256 => w.cs0().prescale_256(),
            _ => w.cs0().prescale_1024(),
        });
        tc0.timsk0.write(|w| w.ocie0a().set_bit());

        avr_device::interrupt::free(|cs| {
            MICROS_COUNTER.borrow(cs).set(0);
        });
        Self { tc0 }
    }

    pub fn micros(&self) -> u64 {
        avr_device::interrupt::free(|cs| {
            let mut elapsed = MICROS_COUNTER.borrow(cs).get();
            let mut counts = self.tc0.tcnt0.read().bits() as u64;
            // compare match happened but the interrupt hasn't run yet
            if self.tc0.tifr0.read().ocf0a().bit_is_set() {
                counts = self.tc0.tcnt0.read().bits() as u64;
                elapsed += MICROS_PER_INTERRUPT;
            }
            elapsed + counts * MICROS_PER_COUNT
        })
    }
}

impl TimerSource for SystemClock {
    fn now(&self) -> ClockValue {
        ClockValue::from_micros(self.micros())
    }
}

#[avr_device::interrupt(atmega2560)]
fn TIMER0_COMPA() {
    avr_device::interrupt::free(|cs| {
        let counter_cell = MICROS_COUNTER.borrow(cs);
        counter_cell.set(counter_cell.get() + MICROS_PER_INTERRUPT);
    })
}
