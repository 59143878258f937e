#![cfg_attr(target_arch = "avr", no_std)]
#![cfg_attr(target_arch = "avr", no_main)]
#![cfg_attr(target_arch = "avr", feature(abi_avr_interrupt))]

#[cfg(target_arch = "avr")]
mod firmware {
    use panic_halt as _;

    use embedded_hal::watchdog::WatchdogDisable;
    use pmc_firmware::hal::gpio::board;
    use pmc_firmware::hal::{
        adc, pwm, timer, twi, watchdog, Adc, AvrIrq, Eeprom, Gcore, InputLine, OutputLine,
        Power, PwmChannel, SampleTimer, SleepMode, TickTimer, Timer3Pwm, TwiSlave, Watchdog,
    };
    use pmc_firmware::protocol::BusResponse;
    use pmc_firmware::sync::{Irq, IsrCtx};
    use pmc_firmware::{Parts, RunState, SharedState, Supervisor};

    #[cfg(feature = "debug")]
    use pmc_firmware::drivers::SerialConsole;
    #[cfg(feature = "debug")]
    use pmc_firmware::hal::Uart;

    static SHARED: SharedState = SharedState::new();

    fn input((port, pin): (pmc_firmware::hal::Port, u8)) -> InputLine {
        InputLine::new(port, pin, true)
    }

    fn output((port, pin): (pmc_firmware::hal::Port, u8)) -> OutputLine {
        OutputLine::new(port, pin)
    }

    #[avr_device::entry]
    fn main() -> ! {
        let reset_cause = watchdog::take_reset_cause();
        let mut wdt = Watchdog::new();
        // A watchdog reset leaves the watchdog running
        wdt.disable();

        pwm::init();
        let parts = Parts::<Gcore> {
            irq: unsafe { AvrIrq::new() },
            button: input(board::BUTTON),
            charge_1: input(board::CHARGE_1),
            charge_2: input(board::CHARGE_2),
            card: input(board::CARD),
            main_rail: output(board::MAIN_RAIL),
            aux_rail: output(board::AUX_RAIL),
            status_led: Timer3Pwm::new(PwmChannel::A),
            backlight: Timer3Pwm::new(PwmChannel::B),
            storage: Eeprom::new(),
            bus: TwiSlave::new(),
            adc: Adc::new(SampleTimer::new()),
            watchdog: wdt,
        };
        let mut tick = TickTimer::new();
        let mut power = Power::new();
        timer::start_clock();

        #[cfg(feature = "debug")]
        let mut console = SerialConsole::new(Uart::new());

        let mut supervisor = Supervisor::new(&SHARED, parts);
        unsafe { avr_device::interrupt::enable() };
        supervisor.power_on(reset_cause);

        loop {
            let wake = supervisor.sense_wake();
            if !wake.is_empty() {
                pwm::init();
                tick.start();
                supervisor.start(wake);
                while supervisor.step() != RunState::Sleep {
                    #[cfg(feature = "debug")]
                    let _ = supervisor.log.drain(&mut console);
                }
                supervisor.finish();
                tick.stop();
                pwm::shutdown();
            }

            #[cfg(feature = "debug")]
            {
                let _ = supervisor.log.drain(&mut console);
                let _ = console.flush();
            }

            // The clock overflow wakes us every second as well; without a
            // wake reason we go straight back to sleep
            power.enable_pin_wake();
            timer::wait_clock_sync();
            power.sleep(SleepMode::PowerSave);
            power.disable_pin_wake();
        }
    }

    #[avr_device::interrupt(atmega1284p)]
    fn TWI() {
        let ctx = unsafe { IsrCtx::enter(Irq::Bus) };
        let response = SHARED.on_bus_event(&ctx, twi::decode());
        twi::respond(response);
    }

    #[avr_device::interrupt(atmega1284p)]
    fn TIMER1_COMPB() {
        let ctx = unsafe { IsrCtx::enter(Irq::BusGuard) };
        if SHARED.on_bus_guard(&ctx, twi::clock_held()) {
            twi::respond(BusResponse::Listen);
        }
    }

    #[avr_device::interrupt(atmega1284p)]
    fn ADC() {
        let ctx = unsafe { IsrCtx::enter(Irq::Sampler) };
        let next = SHARED.on_conversion(&ctx, adc::result());
        adc::select(next);
    }

    #[avr_device::interrupt(atmega1284p)]
    fn TIMER0_COMPA() {
        let ctx = unsafe { IsrCtx::enter(Irq::SampleTimer) };
        timer::set_sample_compare(SHARED.on_sample_timer(&ctx));
    }

    #[avr_device::interrupt(atmega1284p)]
    fn TIMER2_OVF() {
        let ctx = unsafe { IsrCtx::enter(Irq::Clock) };
        SHARED.on_second(&ctx);
    }

    #[avr_device::interrupt(atmega1284p)]
    fn TIMER1_COMPA() {
        let ctx = unsafe { IsrCtx::enter(Irq::Tick) };
        SHARED.on_tick(&ctx);
    }

    // Wake-up only
    #[avr_device::interrupt(atmega1284p)]
    fn PCINT3() {}
}

#[cfg(not(target_arch = "avr"))]
fn main() {}
