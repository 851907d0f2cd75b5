use embedded_hal::digital::v2::OutputPin;
use embedded_hal::spi::FullDuplex;
use plotter_core::config::LINK_SETTLE_US;
use plotter_core::Transport;

/// SPI master wired point to point to the counter node.
pub struct SpiTransport<S, CS> {
    spi: S,
    chip_select: CS,
}

impl<S: FullDuplex<u8>, CS: OutputPin> SpiTransport<S, CS> {
    pub fn new(spi: S, chip_select: CS) -> Self {
        Self { spi, chip_select }
    }
}

impl<S: FullDuplex<u8>, CS: OutputPin> Transport for SpiTransport<S, CS> {
    fn select(&mut self, active: bool) {
        // select is active low
        let _ = match active {
            true => self.chip_select.set_low(),
            false => self.chip_select.set_high(),
        };
    }

    fn transfer(&mut self, byte: u8) -> u8 {
        // a bus fault reads as garbage and gets caught by the checksum
        if nb::block!(self.spi.send(byte)).is_err() {
            return 0;
        }
        nb::block!(self.spi.read()).unwrap_or(0)
    }

    fn settle(&mut self) {
        arduino_hal::delay_us(LINK_SETTLE_US);
    }
}
