use core::cell::RefCell;
use core::convert::Infallible;

use arduino_hal::clock::MHz16;
use arduino_hal::hal::port::{PE0, PE1};
use arduino_hal::hal::Atmega;
use arduino_hal::pac::USART0;
use arduino_hal::port::mode::{Input, Output};
use arduino_hal::port::Pin;
use avr_device::interrupt::Mutex;
use avr_hal_generic::usart::UsartWriter;
use embedded_hal::serial::Write;
use ufmt::uWrite;

pub type Writer = UsartWriter<Atmega, USART0, Pin<Input, PE0>, Pin<Output, PE1>, MHz16>;

static WRITER: Mutex<RefCell<Option<Writer>>> = Mutex::new(RefCell::new(None));

pub fn init(writer: Writer) {
    avr_device::interrupt::free(|cs| {
        WRITER.borrow(cs).replace(Some(writer));
    });
}

/// Handle to the serial port. Output before [`init`] is dropped.
#[derive(Clone, Copy, Default)]
pub struct Console;

impl uWrite for Console {
    type Error = Infallible;

    fn write_str(&mut self, s: &str) -> Result<(), Infallible> {
        // one byte per critical section so the clock interrupt keeps up
        for b in s.bytes() {
            avr_device::interrupt::free(|cs| {
                if let Some(writer) = WRITER.borrow(cs).borrow_mut().as_mut() {
                    let _ = nb::block!(writer.write(b));
                }
            });
        }
        Ok(())
    }
}
