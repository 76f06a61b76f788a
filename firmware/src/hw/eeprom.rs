//! Preset cells on the 24x02 I2C EEPROM.

use eeprom24x::{Eeprom24x, SlaveAddr};
use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::mode::Blocking;
use embassy_time::{block_for, Duration};
use limiter_core::store::ByteStore;

type Bus = I2c<'static, Blocking, i2c::mode::Master>;
type Chip = Eeprom24x<Bus, eeprom24x::page_size::B8, eeprom24x::addr_size::OneByte, eeprom24x::unique_serial::No>;

/// Worst-case internal write cycle of the 24x02.
const WRITE_CYCLE: Duration = Duration::from_millis(5);

pub struct PresetEeprom {
    chip: Chip,
}

impl PresetEeprom {
    pub fn new(bus: Bus) -> Self {
        Self {
            chip: Eeprom24x::new_24x02(bus, SlaveAddr::default()),
        }
    }
}

impl ByteStore for PresetEeprom {
    type Error = eeprom24x::Error<i2c::Error>;

    fn read_bytes(&mut self, address: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.chip.read_data(u32::from(address), buf)
    }

    /// One page write; the chip rejects data that crosses a page boundary.
    fn write_bytes(&mut self, address: u16, data: &[u8]) -> Result<(), Self::Error> {
        self.chip.write_page(u32::from(address), data)
    }

    fn settle(&mut self) {
        block_for(WRITE_CYCLE);
    }
}
