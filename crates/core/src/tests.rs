#[cfg(all(test, feature = "std"))]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::sync::Arc;

    use embedded_hal::delay::DelayNs;

    use crate::metrics::AcquisitionMetrics;
    use crate::peripherals::adc::{SimAdc, SimConversion};
    use crate::peripherals::systick::SimClock;
    use crate::peripherals::uart::SimUart;
    use crate::peripherals::{AdcSettings, Converter, SerialPort, SerialSettings, Timeout};
    use crate::{
        Acquisition, AcquisitionSettings, ConversionError, InitError, State, Step, TransmitError,
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        ConfigureAdc,
        ConfigureSerial,
        Start,
        Poll,
        Read(u32),
        Transmit(String),
        Delay(u32),
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    struct LoggingAdc {
        log: Log,
        results: VecDeque<Result<u32, ConversionError>>,
        current: u32,
        fail_configure: bool,
    }

    impl Converter for LoggingAdc {
        fn configure(&mut self, _settings: &AdcSettings) -> Result<(), InitError> {
            self.log.borrow_mut().push(Event::ConfigureAdc);
            if self.fail_configure {
                return Err(InitError::Adc("mock"));
            }
            Ok(())
        }

        fn start(&mut self) {
            self.log.borrow_mut().push(Event::Start);
        }

        fn poll_for_conversion(&mut self, timeout: Timeout) -> Result<(), ConversionError> {
            assert_eq!(timeout, Timeout::Forever);
            self.log.borrow_mut().push(Event::Poll);
            let value = self.results.pop_front().unwrap_or(Err(ConversionError::Timeout))?;
            self.current = value;
            Ok(())
        }

        fn value(&mut self) -> u32 {
            self.log.borrow_mut().push(Event::Read(self.current));
            self.current
        }
    }

    struct LoggingSerial {
        log: Log,
        fail_configure: bool,
        fail_transmit: bool,
    }

    impl SerialPort for LoggingSerial {
        fn configure(&mut self, _settings: &SerialSettings) -> Result<(), InitError> {
            self.log.borrow_mut().push(Event::ConfigureSerial);
            if self.fail_configure {
                return Err(InitError::Serial("mock"));
            }
            Ok(())
        }

        fn transmit(&mut self, bytes: &[u8], _timeout: Timeout) -> Result<(), TransmitError> {
            if self.fail_transmit {
                return Err(TransmitError::Timeout);
            }
            let text = String::from_utf8(bytes.to_vec()).unwrap();
            self.log.borrow_mut().push(Event::Transmit(text));
            Ok(())
        }
    }

    struct LoggingDelay {
        log: Log,
    }

    impl DelayNs for LoggingDelay {
        fn delay_ns(&mut self, _ns: u32) {}

        fn delay_ms(&mut self, ms: u32) {
            self.log.borrow_mut().push(Event::Delay(ms));
        }
    }

    fn rig(
        results: Vec<Result<u32, ConversionError>>,
    ) -> (Acquisition<LoggingAdc, LoggingSerial, LoggingDelay>, Log) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let adc = LoggingAdc {
            log: log.clone(),
            results: results.into(),
            current: 0,
            fail_configure: false,
        };
        let serial = LoggingSerial {
            log: log.clone(),
            fail_configure: false,
            fail_transmit: false,
        };
        let delay = LoggingDelay { log: log.clone() };
        let acq = Acquisition::new(adc, serial, delay, AcquisitionSettings::default());
        (acq, log)
    }

    #[test]
    fn test_boot_order() {
        let (mut acq, log) = rig(vec![]);
        assert_eq!(acq.state(), State::Initializing);
        acq.boot().unwrap();
        assert_eq!(acq.state(), State::Sampling);
        assert_eq!(
            *log.borrow(),
            vec![Event::ConfigureAdc, Event::ConfigureSerial, Event::Start]
        );

        // Booting twice does not restart the converter.
        acq.boot().unwrap();
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn test_samples_are_streamed_in_order_with_throttle() {
        let (mut acq, log) = rig(vec![Ok(100), Ok(2048), Ok(4095)]);
        acq.boot().unwrap();
        log.borrow_mut().clear();

        assert_eq!(acq.step(), Step::Sampled(100));
        assert_eq!(acq.step(), Step::Sampled(2048));
        assert_eq!(acq.step(), Step::Sampled(4095));

        let expected: Vec<Event> = [100, 2048, 4095]
            .into_iter()
            .flat_map(|v| {
                [
                    Event::Poll,
                    Event::Read(v),
                    Event::Transmit(format!("ADC: {}\r\n", v)),
                    Event::Delay(50),
                ]
            })
            .collect();
        assert_eq!(*log.borrow(), expected);
    }

    #[test]
    fn test_wait_failure_skips_iteration() {
        let (mut acq, log) = rig(vec![Err(ConversionError::Overrun), Ok(7)]);
        acq.boot().unwrap();
        log.borrow_mut().clear();

        assert_eq!(acq.step(), Step::Skipped);
        assert_eq!(*log.borrow(), vec![Event::Poll]);

        // Next pass simply tries again.
        assert_eq!(acq.step(), Step::Sampled(7));
        assert_eq!(acq.state(), State::Sampling);
        assert_eq!(
            log.borrow()[1..],
            [
                Event::Poll,
                Event::Read(7),
                Event::Transmit("ADC: 7\r\n".to_string()),
                Event::Delay(50),
            ]
        );
    }

    #[test]
    fn test_serial_init_failure_halts_without_conversion() {
        let (mut acq, log) = rig(vec![Ok(1), Ok(2)]);
        acq.serial.fail_configure = true;

        assert_eq!(acq.boot(), Err(InitError::Serial("mock")));
        assert_eq!(acq.state(), State::Halted);
        assert_eq!(acq.fault(), Some(InitError::Serial("mock")));

        // Halted is absorbing.
        assert_eq!(acq.step(), Step::Halted);
        assert_eq!(acq.step(), Step::Halted);
        assert_eq!(acq.boot(), Err(InitError::Serial("mock")));

        assert_eq!(
            *log.borrow(),
            vec![Event::ConfigureAdc, Event::ConfigureSerial]
        );
    }

    #[test]
    fn test_adc_init_failure_skips_serial() {
        let (mut acq, log) = rig(vec![Ok(1)]);
        acq.adc.fail_configure = true;

        assert!(acq.boot().is_err());
        assert_eq!(*log.borrow(), vec![Event::ConfigureAdc]);
    }

    #[test]
    fn test_step_before_boot_does_nothing() {
        let (mut acq, log) = rig(vec![Ok(1)]);
        assert_eq!(acq.step(), Step::Halted);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_transmit_failure_is_not_fatal() {
        let (mut acq, log) = rig(vec![Ok(5), Ok(6)]);
        let metrics = Arc::new(AcquisitionMetrics::new());
        acq.observers.push(metrics.clone());
        acq.boot().unwrap();
        log.borrow_mut().clear();

        acq.serial.fail_transmit = true;
        assert_eq!(acq.step(), Step::Sampled(5));
        assert_eq!(
            *log.borrow(),
            vec![Event::Poll, Event::Read(5), Event::Delay(50)]
        );

        acq.serial.fail_transmit = false;
        assert_eq!(acq.step(), Step::Sampled(6));

        let snap = metrics.snapshot();
        assert_eq!(snap.transmit_errors, 1);
        assert_eq!(snap.samples, 1);
        assert_eq!(snap.last_sample, Some(6));
    }

    #[test]
    fn test_simulated_board_end_to_end() {
        let adc = SimAdc::new([
            SimConversion::Sample(100),
            SimConversion::Fail,
            SimConversion::Sample(2048),
            SimConversion::Sample(4095),
        ]);
        let metrics = Arc::new(AcquisitionMetrics::new());
        let mut acq = Acquisition::new(
            adc,
            SimUart::new(),
            SimClock::new(),
            AcquisitionSettings::default(),
        )
        .with_observer(metrics.clone());

        acq.boot().unwrap();
        while !acq.adc.is_exhausted() {
            acq.step();
        }

        assert_eq!(acq.serial.lines(), vec!["ADC: 100", "ADC: 2048", "ADC: 4095"]);
        assert_eq!(
            acq.serial.output_string(),
            "ADC: 100\r\nADC: 2048\r\nADC: 4095\r\n"
        );
        assert_eq!(acq.delay.delays(), 3);
        assert_eq!(acq.delay.elapsed_ms(), 150);

        let snap = metrics.snapshot();
        assert_eq!(snap.samples, 3);
        assert_eq!(snap.skipped, 1);
        assert_eq!(snap.bytes_sent, 32);
    }

    #[test]
    fn test_simulated_serial_rejection_never_polls() {
        let adc = SimAdc::from_samples(&[1, 2, 3]);
        let uart = SimUart::new().rejecting(InitError::Serial("no clock"));
        let mut acq = Acquisition::new(adc, uart, SimClock::new(), AcquisitionSettings::default());

        assert!(acq.boot().is_err());
        for _ in 0..3 {
            assert_eq!(acq.step(), Step::Halted);
        }
        let (adc, uart, clock) = acq.into_parts();
        assert_eq!(adc.polls(), 0);
        assert!(!adc.is_started());
        assert!(uart.output().is_empty());
        assert_eq!(clock.delays(), 0);
    }
}
