//! STM32G0 implementation of the limiter collaborator traits.
//!
//! | Signal            | Pin  | Peripheral          |
//! |-------------------|------|---------------------|
//! | zero-cross pulse  | PA0  | EXTI0_1             |
//! | gate enable       | PA5  | GPIO, shared w/ ISR |
//! | reference PWM     | PA6  | TIM3 CH1            |
//! | comparator output | PA7  | EXTI4_15            |
//! | operator button   | PC13 | GPIO, active low    |
//! | EEPROM            | PB8/PB9 | I2C1             |
//! | remote link       | PA2/PA3 | USART2           |

pub mod eeprom;
pub mod link;
pub mod triggers;

use core::time::Duration;

use defmt::{debug, info};
use embassy_stm32::gpio::Input;
use embassy_stm32::peripherals::TIM3;
use embassy_stm32::timer::simple_pwm::SimplePwm;
use embassy_time::{block_for, Instant};
use limiter_core::clock::{Clock, Micros};
use limiter_core::config::LimiterConfig;
use limiter_core::controller::{DutyDriver, StopSignal};
use limiter_core::display::{Content, Region, Screen, Style};
use limiter_core::gate::{EdgeMode, GateHardware};
use limiter_core::hold::Button;
use limiter_core::repl::RemoteLink;
use limiter_core::store::ByteStore;

use eeprom::PresetEeprom;
use link::UartLink;

/// Synthetic edge source for the load-disabled posture.
struct SyntheticEdges {
    period: embassy_time::Duration,
    next: Instant,
}

pub struct LimiterBoard {
    cfg: LimiterConfig,
    pwm: SimplePwm<'static, TIM3>,
    comparator: Input<'static>,
    button: Input<'static>,
    eeprom: PresetEeprom,
    link: UartLink,
    synthetic: Option<SyntheticEdges>,
    phase_offset: u16,
}

impl LimiterBoard {
    pub fn new(
        cfg: LimiterConfig,
        pwm: SimplePwm<'static, TIM3>,
        comparator: Input<'static>,
        button: Input<'static>,
        eeprom: PresetEeprom,
        link: UartLink,
    ) -> Self {
        triggers::configure();
        Self {
            cfg,
            pwm,
            comparator,
            button,
            eeprom,
            link,
            synthetic: None,
            phase_offset: 0,
        }
    }

    fn pump_synthetic(&mut self) {
        if let Some(edges) = self.synthetic.as_mut() {
            let now = Instant::now();
            while edges.next <= now {
                triggers::fire_synthetic_zero_cross();
                edges.next += edges.period;
            }
        }
    }
}

impl Clock for LimiterBoard {
    fn now(&self) -> Micros {
        triggers::timestamp()
    }

    fn delay(&mut self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        block_for(embassy_time::Duration::from_micros(micros));
        self.pump_synthetic();
    }
}

impl GateHardware for LimiterBoard {
    fn set_output(&mut self, on: bool) {
        triggers::drive_gate(on);
    }

    fn set_triggers(&mut self, enabled: bool) {
        triggers::set_masked(!enabled);
    }

    fn set_edge(&mut self, mode: EdgeMode) {
        triggers::set_edge(mode);
    }

    fn overcurrent_level(&mut self) -> bool {
        self.comparator.is_high()
    }

    fn use_synthetic_edges(&mut self, half_period: Duration) {
        let micros = u64::try_from(half_period.as_micros()).unwrap_or(u64::MAX);
        let period = embassy_time::Duration::from_micros(micros);
        info!("gate: synthetic zero-cross every {} us", micros);
        self.synthetic = Some(SyntheticEdges {
            period,
            next: Instant::now() + period,
        });
    }
}

impl DutyDriver for LimiterBoard {
    fn set_duty(&mut self, code: u16, phase_offset: u16) {
        let span = self.cfg.max_current_ma.saturating_add(1);
        let mut channel = self.pwm.ch1();
        channel.set_duty_cycle_fraction(code.min(span), span);
        if phase_offset != self.phase_offset {
            // Single-channel board: the offset has nothing to align against.
            debug!("pwm: phase offset {} ignored", phase_offset);
            self.phase_offset = phase_offset;
        }
    }
}

impl StopSignal for LimiterBoard {
    fn stop_requested(&mut self) -> bool {
        let input = matches!(self.link.read_byte(), Some(byte) if byte != b'\r' && byte != b'\n');
        input || self.button.is_low()
    }
}

impl Button for LimiterBoard {
    fn pressed(&mut self) -> bool {
        self.button.is_low()
    }
}

impl ByteStore for LimiterBoard {
    type Error = <PresetEeprom as ByteStore>::Error;

    fn read_bytes(&mut self, address: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.eeprom.read_bytes(address, buf)
    }

    fn write_bytes(&mut self, address: u16, data: &[u8]) -> Result<(), Self::Error> {
        self.eeprom.write_bytes(address, data)
    }

    fn settle(&mut self) {
        self.eeprom.settle();
    }
}

impl Screen for LimiterBoard {
    fn render(&mut self, content: Content<'_>, region: Region, style: Style) {
        info!("screen {} {}: {}", region, style, content);
    }
}

impl RemoteLink for LimiterBoard {
    fn read_byte(&mut self) -> Option<u8> {
        self.link.read_byte()
    }

    fn write_line(&mut self, line: &str) {
        self.link.write_line(line);
    }
}
