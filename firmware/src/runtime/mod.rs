use cortex_m::interrupt;
use cortex_m::register::primask;
use cortex_m_rt::entry;
use critical_section::{self, RawRestoreState};
use defmt::{error, info, warn};
use defmt_rtt as _;
use embassy_stm32 as hal;
use embassy_stm32::gpio::{Input, Level, Output, OutputType, Pull, Speed};
use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::time::Hertz;
use embassy_stm32::timer::low_level::CountingMode;
use embassy_stm32::timer::simple_pwm::{PwmPin, SimplePwm};
use embassy_stm32::usart::{self, BufferedUart, Config as UartConfig};
use limiter_core::config::LimiterConfig;
use limiter_core::context::SystemMode;
use limiter_core::menu::{poll, power_up, Listen, OperatorMachine};
use limiter_core::repl::session::LineBuffer;
use limiter_core::telemetry::TelemetryEventKind;

use crate::hw::eeprom::PresetEeprom;
use crate::hw::link::UartLink;
use crate::hw::triggers::{self, SIGNALS};
use crate::hw::LimiterBoard;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

const LINK_BAUD: u32 = 115_200;
const LINK_BUFFER_SIZE: usize = 128;
const REFERENCE_PWM: Hertz = Hertz(2_000);
const EEPROM_I2C: Hertz = Hertz(100_000);

static mut LINK_TX_BUFFER: [u8; LINK_BUFFER_SIZE] = [0; LINK_BUFFER_SIZE];
static mut LINK_RX_BUFFER: [u8; LINK_BUFFER_SIZE] = [0; LINK_BUFFER_SIZE];

embassy_stm32::bind_interrupts!(struct LinkIrqs {
    USART2_LPUART2 => usart::BufferedInterruptHandler<hal::peripherals::USART2>;
});

#[entry]
fn main() -> ! {
    let cfg = LimiterConfig::DEFAULT;
    if let Err(err) = cfg.validate() {
        error!("config: {}", defmt::Display2Format(&err));
        halt();
    }

    let hal::Peripherals {
        PA2,
        PA3,
        PA5,
        PA6,
        PA7,
        PB8,
        PB9,
        PC13,
        TIM3,
        I2C1,
        USART2,
        ..
    } = hal::init(hal::Config::default());

    triggers::install_gate(Output::new(PA5, Level::Low, Speed::High));

    let mut pwm = SimplePwm::new(
        TIM3,
        Some(PwmPin::new(PA6, OutputType::PushPull)),
        None,
        None,
        None,
        REFERENCE_PWM,
        CountingMode::EdgeAlignedUp,
    );
    pwm.ch1().enable();

    let mut i2c_config = i2c::Config::default();
    i2c_config.frequency = EEPROM_I2C;
    let eeprom = PresetEeprom::new(I2c::new_blocking(I2C1, PB8, PB9, i2c_config));

    let mut link_config = UartConfig::default();
    link_config.baudrate = LINK_BAUD;
    // SAFETY: the link buffers are handed out exactly once, here.
    let uart = unsafe {
        BufferedUart::new(
            USART2,
            PA3,
            PA2,
            &mut *core::ptr::addr_of_mut!(LINK_TX_BUFFER),
            &mut *core::ptr::addr_of_mut!(LINK_RX_BUFFER),
            LinkIrqs,
            link_config,
        )
    };
    let Ok(uart) = uart else {
        error!("link: USART2 configuration rejected");
        halt();
    };

    let mut board = LimiterBoard::new(
        cfg,
        pwm,
        Input::new(PA7, Pull::None),
        Input::new(PC13, Pull::Up),
        eeprom,
        UartLink::new(uart),
    );

    let diagnostic = cfg!(feature = "diagnostic");
    let mut machine = OperatorMachine::new(&SIGNALS, cfg, diagnostic);
    let mut lines = LineBuffer::new();
    info!("limiter: power up (diagnostic = {})", diagnostic);

    let mut listen = power_up(&mut machine, &mut board);
    let mut mode = machine.mode();
    let mut logged = machine.telemetry().recorded();
    let mut trips = 0;
    info!("mode {}", mode);

    loop {
        listen = poll(&mut machine, &mut board, &mut lines, listen);

        if machine.mode() != mode {
            mode = machine.mode();
            info!("mode {}", mode);
        }

        let telemetry = machine.telemetry();
        if telemetry.trip_count() != trips {
            trips = telemetry.trip_count();
            warn!("trip #{} at {}", trips, machine.context().current_limit);
        }
        if telemetry.recorded() != logged {
            logged = telemetry.recorded();
            if let Some(record) = telemetry.latest() {
                match record.event {
                    TelemetryEventKind::Fault(code) => error!("fault: {}", code),
                    TelemetryEventKind::Trip => {}
                    TelemetryEventKind::IntegrityRepaired(cells) => {
                        warn!("store: repaired {} cells", cells);
                    }
                    TelemetryEventKind::StoreFailure => warn!("store: access failed"),
                    event => info!("event {}", event),
                }
            }
        }

        if listen == Listen::Halted && mode == SystemMode::Fault {
            halt();
        }
    }
}

/// Parks the core until power is removed.
fn halt() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}
