//! Encoder counter chip. Decodes both quadrature encoders and answers the
//! controller over SPI as a slave.
//!
//! Pins:
//!   radius encoder A/B   A8(PK0) / A9(PK1)
//!   angle encoder A/B    A10(PK2) / A11(PK3)
//!   SPI slave            SS D53(PB0), SCK D52, MOSI D51, MISO D50

#![no_std]
#![no_main]
#![feature(abi_avr_interrupt)]

use core::cell::RefCell;

use arduino_hal::hal::port::Dynamic;
use arduino_hal::port::mode::{Input, PullUp};
use arduino_hal::port::Pin;
use avr_device::interrupt::Mutex;
use panic_halt as _;
use plotter_core::{AxisData, EncoderCounters, Quadrature, Responder, AXIS_LIST, IDLE_REPLY};

type EncoderPin = Pin<Input<PullUp>, Dynamic>;

struct Encoders {
    pins: AxisData<(EncoderPin, EncoderPin)>,
    decoders: AxisData<Quadrature>,
}

impl Encoders {
    fn sample(pins: &(EncoderPin, EncoderPin)) -> u8 {
        pins.0.is_high() as u8 | (pins.1.is_high() as u8) << 1
    }
}

struct Link {
    spi: arduino_hal::pac::SPI,
    select: Pin<Input<PullUp>, Dynamic>,
    responder: Responder<'static>,
}

static COUNTERS: EncoderCounters = EncoderCounters::new();
static ENCODERS: Mutex<RefCell<Option<Encoders>>> = Mutex::new(RefCell::new(None));
static LINK: Mutex<RefCell<Option<Link>>> = Mutex::new(RefCell::new(None));

#[arduino_hal::entry]
fn main() -> ! {
    let dp = arduino_hal::Peripherals::take().unwrap();
    let pins = arduino_hal::pins!(dp);
    let mut serial = arduino_hal::default_serial!(dp, pins, 57600);

    let encoder_pins = AxisData {
        radius: (pins.a8.into_pull_up_input().downgrade(), pins.a9.into_pull_up_input().downgrade()),
        angle: (pins.a10.into_pull_up_input().downgrade(), pins.a11.into_pull_up_input().downgrade()),
    };
    let encoders = Encoders {
        decoders: AxisData {
            radius: Quadrature::starting_at(Encoders::sample(&encoder_pins.radius)),
            angle: Quadrature::starting_at(Encoders::sample(&encoder_pins.angle)),
        },
        pins: encoder_pins,
    };

    // MISO is the only output of a slave. The other SPI pins stay inputs.
    let _miso = pins.d50.into_output();
    let select = pins.d53.into_pull_up_input().downgrade();
    dp.SPI.spcr.write(|w| w.spe().set_bit().spie().set_bit());
    dp.SPI.spdr.write(|w| unsafe { w.bits(IDLE_REPLY) });

    // PCINT0 watches slave select, PCINT2 the four encoder lines.
    dp.EXINT.pcmsk0.write(|w| unsafe { w.bits(0b0000_0001) });
    dp.EXINT.pcmsk2.write(|w| unsafe { w.bits(0b0000_1111) });
    dp.EXINT.pcicr.write(|w| unsafe { w.bits(0b0000_0101) });

    avr_device::interrupt::free(|cs| {
        ENCODERS.borrow(cs).replace(Some(encoders));
        LINK.borrow(cs).replace(Some(Link { spi: dp.SPI, select, responder: Responder::new(&COUNTERS) }));
    });
    unsafe { avr_device::interrupt::enable(); }

    let _ = ufmt::uwriteln!(&mut serial, "Encoder counter node ready");
    loop {
        arduino_hal::delay_ms(1000);
        let missed = avr_device::interrupt::free(|cs| {
            ENCODERS.borrow(cs).borrow().as_ref().map(|e| e.decoders.map(|d| d.missed()))
        }).unwrap_or_default();
        for axis in AXIS_LIST {
            let _ = ufmt::uwriteln!(&mut serial, "{}: {} missed {}", axis, COUNTERS.get(axis), *missed.match_id(axis));
        }
    }
}

#[avr_device::interrupt(atmega2560)]
fn PCINT2() {
    avr_device::interrupt::free(|cs| {
        if let Some(encoders) = ENCODERS.borrow(cs).borrow_mut().as_mut() {
            for axis in AXIS_LIST {
                let sample = Encoders::sample(encoders.pins.match_id(axis));
                let delta = encoders.decoders.match_id_mut(axis).update(sample);
                if delta != 0 {
                    COUNTERS.add(axis, delta);
                }
            }
        }
    })
}

#[avr_device::interrupt(atmega2560)]
fn PCINT0() {
    avr_device::interrupt::free(|cs| {
        if let Some(link) = LINK.borrow(cs).borrow_mut().as_mut() {
            if link.select.is_high() {
                link.responder.deselect();
                link.spi.spdr.write(|w| unsafe { w.bits(link.responder.outgoing()) });
            }
        }
    })
}

#[avr_device::interrupt(atmega2560)]
fn SPI_STC() {
    avr_device::interrupt::free(|cs| {
        if let Some(link) = LINK.borrow(cs).borrow_mut().as_mut() {
            let incoming = link.spi.spdr.read().bits();
            link.responder.exchange(incoming);
            link.spi.spdr.write(|w| unsafe { w.bits(link.responder.outgoing()) });
        }
    })
}
