//! Remote command link over USART2.

use embassy_stm32::usart::BufferedUart;
use embedded_io::{Read, ReadReady, Write};
use limiter_core::repl::RemoteLink;

pub struct UartLink {
    uart: BufferedUart<'static>,
}

impl UartLink {
    pub fn new(uart: BufferedUart<'static>) -> Self {
        Self { uart }
    }
}

impl RemoteLink for UartLink {
    fn read_byte(&mut self) -> Option<u8> {
        if !self.uart.read_ready().unwrap_or(false) {
            return None;
        }
        let mut byte = [0u8; 1];
        match self.uart.read(&mut byte) {
            Ok(1) => Some(byte[0]),
            _ => None,
        }
    }

    fn write_line(&mut self, line: &str) {
        if self.uart.write_all(line.as_bytes()).is_err() || self.uart.write_all(b"\r\n").is_err() {
            defmt::warn!("link: write failed");
        }
    }
}
