//! aq-node firmware entry point.
//!
//! 1. Bring up the console and co-processor UARTs and control pins
//! 2. Initialize the ESP-AT session and start its TCP server
//! 3. Offer the AT passthrough on the console
//! 4. Start the I/O task on core 1 (sinks, log drain)
//! 5. Run the sampler on core 0

#![cfg_attr(target_os = "espidf", no_std)]
#![cfg_attr(target_os = "espidf", no_main)]

#[cfg(target_os = "espidf")]
mod firmware {
    use core::ffi::c_void;
    use core::time::Duration;

    use esp_idf_svc::hal::gpio::{AnyIOPin, AnyOutputPin, OutputPin, PinDriver};
    use esp_idf_svc::hal::peripherals::Peripherals;
    use esp_idf_svc::hal::uart::{config::Config as UartConfig, UartDriver};
    use esp_idf_svc::hal::units::Hertz;
    use esp_idf_svc::sys::{self, EspError};

    use aq_node::console::Passthrough;
    use aq_node::hal::esp::{EspClock, EspControlPins, EspSerial};
    use aq_node::hal::{Clock, Instant, SerialPort};
    use aq_node::mux::{ConsoleSink, WifiSink};
    use aq_node::{
        node_error, node_info, node_warn, LogDrain, ModemSession, MuxSettings, NodeOutput,
        NodeStatus, StatusFlags, TelemetryFrame, CONFIG, SAMPLER_LOG,
    };

    const BAUD_RATE: u32 = 115_200;
    const PASSTHROUGH_WINDOW: Duration = Duration::from_secs(3);
    const IO_TASK_STACK: u32 = 8192;
    const IO_TASK_PRIORITY: u32 = 5;
    const IO_TASK_CORE: i32 = 1;

    static STATUS: NodeStatus = NodeStatus::new();
    static OUTPUT: NodeOutput = NodeOutput::new(MuxSettings::DEFAULT);

    type Session = ModemSession<
        EspSerial<'static>,
        EspControlPins<'static, AnyOutputPin, AnyOutputPin>,
        EspClock,
    >;

    /// Handed to the I/O task. Lives on the main task's stack, which never
    /// unwinds.
    struct IoContext {
        session: *const Session,
        console: Option<EspSerial<'static>>,
    }

    #[no_mangle]
    fn main() {
        sys::link_patches();

        if let Err(e) = boot() {
            node_error!(SAMPLER_LOG, EspClock.now().as_micros(), "boot failed: {}", e);
        }
    }

    fn boot() -> Result<(), EspError> {
        let peripherals = Peripherals::take()?;
        let pins = peripherals.pins;
        let uart_config = UartConfig::default().baudrate(Hertz(BAUD_RATE));

        let console = UartDriver::new(
            peripherals.uart0,
            pins.gpio1,
            pins.gpio3,
            Option::<AnyIOPin>::None,
            Option::<AnyIOPin>::None,
            &uart_config,
        )?;
        let modem = UartDriver::new(
            peripherals.uart1,
            pins.gpio17,
            pins.gpio16,
            Option::<AnyIOPin>::None,
            Option::<AnyIOPin>::None,
            &uart_config,
        )?;
        let control = EspControlPins::new(
            PinDriver::output(pins.gpio4.downgrade_output())?,
            PinDriver::output(pins.gpio5.downgrade_output())?,
        );

        let clock = EspClock;
        let mut console = EspSerial::new(console);
        let session: Session =
            ModemSession::new(EspSerial::new(modem), control, clock, CONFIG.modem_timing());

        STATUS.set(StatusFlags::I_CONSOLE_CONNECTED);
        OUTPUT.configure(CONFIG.mux_settings());

        match session.init() {
            Ok(()) => {
                if session.start_server(CONFIG.server_port()).is_err() {
                    STATUS.set(StatusFlags::E_WIFI_FAIL);
                }
            }
            Err(_) => STATUS.set(StatusFlags::E_WIFI_FAIL | StatusFlags::W_WIFI_DISCONNECTED),
        }

        offer_passthrough(&mut console, &session, &clock);

        let mut io = IoContext {
            session: &session,
            console: Some(console),
        };
        // SAFETY: `io` and `session` outlive the task because sample_loop
        // never returns.
        let created = unsafe {
            sys::xTaskCreatePinnedToCore(
                Some(io_task),
                c"aq-io".as_ptr(),
                IO_TASK_STACK,
                &mut io as *mut IoContext as *mut c_void,
                IO_TASK_PRIORITY,
                core::ptr::null_mut(),
                IO_TASK_CORE,
            )
        };
        if created != 1 {
            node_error!(SAMPLER_LOG, clock.now().as_micros(), "I/O task not started");
        }

        sample_loop(&session, &clock)
    }

    fn offer_passthrough(console: &mut EspSerial<'static>, session: &Session, clock: &EspClock) {
        let _ = console.transmit(b"\r\nPress any key for the AT passthrough\r\n");
        if console.receive_byte(clock.now() + PASSTHROUGH_WINDOW).is_ok() {
            Passthrough::new().run(console, session, clock);
        }
    }

    /// Core 0: status refresh, frame building, emit.
    fn sample_loop(session: &Session, clock: &EspClock) -> ! {
        let mut next_refresh = Instant::ZERO;

        loop {
            let now = clock.now();

            if now >= next_refresh {
                match session.refresh_status() {
                    Ok(flags) => STATUS.apply_modem_flags(flags),
                    Err(_) => STATUS.set(StatusFlags::W_WIFI_DISCONNECTED),
                }
                next_refresh = now + CONFIG.refresh_interval();
            }

            let mut frame = TelemetryFrame::new(now);
            frame.status(STATUS.snapshot());
            match frame.render() {
                Ok(text) => {
                    let emitted = OUTPUT.emit_with(text.as_bytes(), || clock.relax());
                    if emitted.truncated {
                        node_warn!(SAMPLER_LOG, now.as_micros(), "frame {} truncated", emitted.seq);
                    }
                }
                Err(e) => node_warn!(SAMPLER_LOG, now.as_micros(), "frame not sent: {}", e),
            }

            let wake = now + CONFIG.sample_interval();
            OUTPUT.request_sleep_until(wake);
            clock.sleep_until(wake);
        }
    }

    /// Core 1: execute output tasks and drain the logs.
    unsafe extern "C" fn io_task(arg: *mut c_void) {
        // SAFETY: boot passes a live IoContext and never touches it again
        let io = unsafe { &mut *(arg as *mut IoContext) };
        // SAFETY: the session outlives this task, see boot
        let session = unsafe { &*io.session };
        let Some(console) = io.console.take() else {
            // FreeRTOS tasks must not return
            unsafe { sys::vTaskDelete(core::ptr::null_mut()) };
            return;
        };

        let clock = EspClock;
        let mut console = ConsoleSink::new(console, &STATUS);
        let mut wifi = WifiSink::new(session, &STATUS);
        let mut drain = LogDrain::new();

        node_info!(aq_node::IO_LOG, clock.now().as_micros(), "I/O task running");

        loop {
            console.poll_attach();
            let ran = OUTPUT.run_until_idle(&mut console, &mut wifi, &clock);
            let logged = drain.pump(console.port_mut(), clock.now(), CONFIG.log_level());
            if ran == 0 && logged == 0 {
                clock.relax();
            }
        }
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    println!(
        "{}: firmware image, build for an ESP-IDF target (cargo build --target xtensa-esp32-espidf)",
        env!("VERSION_STRING")
    );
}
