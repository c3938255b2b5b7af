//! NCN5120 driver tests: the chip-specific host commands, indications
//! and the windowed send protocol.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use knx_stack::drivers::ncn5120::{configure, Ncn5120};
use knx_stack::drivers::{DriverError, GapTimer, LinkDriver, LinkEvent};
use knx_stack::proto::addr::Addr;
use knx_stack::time::Clock;

#[derive(Clone, Default)]
struct RecordingUart(Arc<Mutex<Vec<u8>>>);

impl RecordingUart {
	fn written(&self) -> Vec<u8> {
		self.0.lock().unwrap().clone()
	}
}

impl embedded_io::ErrorType for RecordingUart {
	type Error = Infallible;
}

impl embedded_io::Write for RecordingUart {
	fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
		self.0.lock().unwrap().extend_from_slice(buf);
		Ok(buf.len())
	}

	fn flush(&mut self) -> Result<(), Infallible> {
		Ok(())
	}
}

struct StdClock(Instant);

impl Clock for StdClock {
	fn now_us(&self) -> u64 {
		self.0.elapsed().as_micros() as u64
	}
}

struct NullTimer;

impl GapTimer for NullTimer {
	fn arm(&self, _timeout_us: u64) {}
}

fn driver() -> (Ncn5120<RecordingUart, StdClock, NullTimer>, RecordingUart) {
	let uart = RecordingUart::default();
	let driver = Ncn5120::new(uart.clone(), StdClock(Instant::now()), NullTimer);

	(driver, uart)
}

/// Runs `command` while a feeder thread answers with `response` as
/// soon as the driver has written `written` bytes.
fn with_response<T: Send>(
	driver: &Ncn5120<RecordingUart, StdClock, NullTimer>,
	uart: &RecordingUart,
	written: usize,
	response: &[u8],
	command: impl FnOnce() -> T + Send,
) -> T {
	std::thread::scope(|scope| {
		scope.spawn(|| {
			while uart.written().len() < written {
				std::thread::sleep(Duration::from_millis(1));
			}

			for byte in response {
				driver.handle_byte(*byte);
			}
		});

		command()
	})
}

#[test]
fn reset_clears_modes() {
	let (driver, uart) = driver();

	let result = with_response(&driver, &uart, 1, &[0x03], || driver.reset());

	assert_eq!(result, Ok(()));
	assert_eq!(uart.written(), &[0x01]);
	assert!(!driver.is_crc_enabled());
	assert!(!driver.is_busy());
	assert!(!driver.is_stopped());
}

#[test]
fn configure_enables_crc() {
	let (driver, uart) = driver();

	let result = with_response(&driver, &uart, 1, &[0x01], || {
		driver.configure(configure::CRC_CTIT)
	});

	assert_eq!(result, Ok(()));
	assert_eq!(uart.written(), &[0x18 | 0x02]);
	assert!(driver.is_crc_enabled());
}

#[test]
fn configure_validates_options() {
	let (driver, uart) = driver();

	assert_eq!(driver.configure(0x08), Err(DriverError::Args));
	assert!(uart.written().is_empty());
}

#[test]
fn stop_mode_round_trip() {
	let (driver, uart) = driver();

	let result = with_response(&driver, &uart, 1, &[0x2b], || driver.stop_mode());
	assert_eq!(result, Ok(()));
	assert!(driver.is_stopped());

	let before = uart.written().len();
	let result = with_response(&driver, &uart, before + 1, &[0x03], || {
		driver.exit_stop_mode()
	});
	assert_eq!(result, Ok(()));
	assert!(!driver.is_stopped());
}

#[test]
fn set_address_uses_four_byte_command() {
	let (driver, uart) = driver();

	let result = with_response(&driver, &uart, 4, &[0x01], || {
		driver.set_address(Addr::new(0x1108))
	});

	assert_eq!(result, Ok(()));
	assert_eq!(uart.written(), &[0xf1, 0x11, 0x08, 0x00]);
	assert_eq!(driver.address(), Addr::new(0x1108));
}

#[test]
fn system_state_returns_second_byte() {
	let (driver, uart) = driver();

	let result = with_response(&driver, &uart, 1, &[0x4b, 0x42], || driver.system_state());

	assert_eq!(result, Ok(0x42));
	assert_eq!(uart.written(), &[0x0d]);
}

#[test]
fn register_access_validates_address() {
	let (driver, uart) = driver();

	assert_eq!(driver.reg_read(4), Err(DriverError::Args));
	assert_eq!(driver.reg_write(4, 0), Err(DriverError::Args));
	assert!(uart.written().is_empty());
}

#[test]
fn register_read() {
	let (driver, uart) = driver();

	let result = with_response(&driver, &uart, 1, &[0x5a], || driver.reg_read(2));

	assert_eq!(result, Ok(0x5a));
	assert_eq!(uart.written(), &[0x38 | 0x02]);
}

#[test]
fn system_state_indication_is_surfaced() {
	let (driver, _uart) = driver();

	driver.handle_byte(0x4b);

	assert_eq!(driver.take_event(), Some(LinkEvent::SystemState(0x4b)));
}

#[test]
fn assembles_standard_telegram() {
	let (driver, _uart) = driver();
	let frame = [0xbc, 0x11, 0x03, 0x01, 0x01, 0xe1, 0x00, 0x80, 0x30];

	for byte in frame {
		driver.handle_byte(byte);
	}

	driver.handle_gap_timeout();

	assert_eq!(driver.take_event(), Some(LinkEvent::Telegram));
	assert_eq!(driver.take_telegram().unwrap().as_slice(), &frame);
}

#[test]
fn send_prefixes_offset_windows() {
	let (driver, uart) = driver();

	// an extended frame longer than one 64-byte window
	let mut frame = vec![0x3c, 0xe0, 0x11, 0x03, 0x11, 0x08, 0x78, 0x00, 0x80];
	frame.resize(129, 0xaa);

	// every data byte is a 2-byte pair, plus two offset commands when
	// crossing into windows 1 and 2
	let expected_written = frame.len() * 2 + 2;

	let result = std::thread::scope(|scope| {
		scope.spawn(|| {
			while uart.written().len() < expected_written {
				std::thread::sleep(Duration::from_millis(1));
			}

			for byte in &frame {
				driver.handle_byte(*byte);
			}

			driver.handle_byte(0x8b);
		});

		LinkDriver::send(&driver, &frame)
	});

	assert_eq!(result, Ok(frame.len()));

	let written = uart.written();
	assert_eq!(written.len(), expected_written);

	// window 0 needs no announcement; windows 1 and 2 do
	assert_eq!(written[64 * 2], 0x08 | 0x01);
	assert_eq!(written[64 * 2 + 1], 0x80 | 0x00);
	assert_eq!(written[1 + 128 * 2], 0x08 | 0x02);

	// the final byte carries the end service with the wrapped position
	assert_eq!(written[written.len() - 2], 0x40 | (128 & 0x3f) as u8);
	assert_eq!(written[written.len() - 1], 0xaa);
}

#[test]
fn send_rejects_oversized_frames() {
	let (driver, _uart) = driver();
	let frame = [0u8; 264];

	assert_eq!(LinkDriver::send(&driver, &frame), Err(DriverError::Args));
}
