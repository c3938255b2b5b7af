//! TP-UART driver tests: frame assembly from the byte callback, host
//! commands and the send protocol, with a recording UART standing in
//! for the transceiver.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use knx_stack::drivers::tpuart::Tpuart;
use knx_stack::drivers::{DriverError, GapTimer, LinkDriver, LinkEvent};
use knx_stack::proto::addr::Addr;
use knx_stack::time::Clock;

const GROUP_WRITE: [u8; 9] = [0xbc, 0x11, 0x03, 0x01, 0x01, 0xe1, 0x00, 0x80, 0x30];

/// Records everything the driver writes towards the transceiver.
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

/// Wall-clock time; the driver timeouts are tens of milliseconds.
struct StdClock(Instant);

impl StdClock {
	fn new() -> StdClock {
		StdClock(Instant::now())
	}
}

impl Clock for StdClock {
	fn now_us(&self) -> u64 {
		self.0.elapsed().as_micros() as u64
	}
}

/// Counts how often the end-of-telegram timer was armed.
#[derive(Clone, Default)]
struct CountingTimer(Arc<AtomicUsize>);

impl CountingTimer {
	fn armed(&self) -> usize {
		self.0.load(Ordering::Relaxed)
	}
}

impl GapTimer for CountingTimer {
	fn arm(&self, _timeout_us: u64) {
		self.0.fetch_add(1, Ordering::Relaxed);
	}
}

fn driver() -> (Tpuart<RecordingUart, StdClock, CountingTimer>, RecordingUart, CountingTimer) {
	let uart = RecordingUart::default();
	let timer = CountingTimer::default();
	let driver = Tpuart::new(uart.clone(), StdClock::new(), timer.clone());

	(driver, uart, timer)
}

#[test]
fn assembles_standard_telegram() {
	let (driver, _uart, timer) = driver();

	for byte in GROUP_WRITE {
		driver.handle_byte(byte);
	}

	// every data byte re-arms the end-of-telegram gap timer, and
	// nothing is reported until the gap is observed
	assert_eq!(timer.armed(), GROUP_WRITE.len());
	assert_eq!(driver.take_event(), None);

	driver.handle_gap_timeout();

	assert_eq!(driver.take_event(), Some(LinkEvent::Telegram));
	assert_eq!(driver.take_telegram().unwrap().as_slice(), &GROUP_WRITE);
	assert_eq!(driver.take_telegram(), None);
}

#[test]
fn reports_short_frame_as_incomplete() {
	let (driver, _uart, _timer) = driver();

	for byte in &GROUP_WRITE[..4] {
		driver.handle_byte(*byte);
	}

	driver.handle_gap_timeout();

	assert_eq!(driver.take_event(), Some(LinkEvent::TelegramIncomplete));
}

#[test]
fn state_indication_is_surfaced() {
	let (driver, _uart, _timer) = driver();

	driver.handle_byte(0x07);

	assert_eq!(driver.take_event(), Some(LinkEvent::State(0x07)));
}

#[test]
fn save_pin_is_surfaced() {
	let (driver, _uart, _timer) = driver();

	driver.handle_save();

	assert_eq!(driver.take_event(), Some(LinkEvent::Save));
}

#[test]
fn back_to_back_frames() {
	let (driver, _uart, _timer) = driver();

	for byte in GROUP_WRITE {
		driver.handle_byte(byte);
	}
	driver.handle_gap_timeout();

	for byte in GROUP_WRITE {
		driver.handle_byte(byte);
	}
	driver.handle_gap_timeout();

	assert_eq!(driver.take_event(), Some(LinkEvent::Telegram));
	assert_eq!(driver.take_event(), Some(LinkEvent::Telegram));
	assert_eq!(driver.take_event(), None);
}

#[test]
fn command_without_response_bytes() {
	let (driver, uart, _timer) = driver();

	assert_eq!(driver.activate_busmon(), Ok(()));
	assert_eq!(uart.written(), &[0x05]);
	assert!(driver.is_monitoring());
}

#[test]
fn set_address_sends_wire_order() {
	let (driver, uart, _timer) = driver();

	assert_eq!(driver.set_address(Addr::new(0x1108)), Ok(()));
	assert_eq!(uart.written(), &[0x28, 0x11, 0x08]);
	assert_eq!(driver.address(), Addr::new(0x1108));
}

#[test]
fn set_resend_count_validates_arguments() {
	let (driver, uart, _timer) = driver();

	assert_eq!(driver.set_resend_count(8, 0), Err(DriverError::Args));
	assert_eq!(driver.set_resend_count(0, 8), Err(DriverError::Args));
	assert!(uart.written().is_empty());

	assert_eq!(driver.set_resend_count(3, 3), Ok(()));
	assert_eq!(uart.written(), &[0x24, 0x63]);
}

#[test]
fn command_times_out_without_answer() {
	let (driver, _uart, _timer) = driver();

	// the state request expects a response byte that never arrives
	assert_eq!(driver.state(), Err(DriverError::Request));
}

#[test]
fn product_id_response() {
	let (driver, uart, _timer) = driver();

	std::thread::scope(|scope| {
		scope.spawn(|| {
			while uart.written().is_empty() {
				std::thread::sleep(Duration::from_millis(1));
			}

			driver.handle_byte(0x55);
		});

		assert_eq!(driver.product_id(), Ok(0x55));
	});

	assert_eq!(uart.written(), &[0x20]);
}

#[test]
fn send_frames_every_byte() {
	let (driver, uart, _timer) = driver();
	let frame = [0xbc, 0x11, 0x03, 0x01, 0x01, 0xe1, 0x00, 0x80, 0x30];

	std::thread::scope(|scope| {
		scope.spawn(|| {
			// wait for the full frame, then echo it and confirm
			while uart.written().len() < frame.len() * 2 {
				std::thread::sleep(Duration::from_millis(1));
			}

			for byte in frame {
				driver.handle_byte(byte);
			}

			driver.handle_byte(0x8b);
		});

		assert_eq!(LinkDriver::send(&driver, &frame), Ok(frame.len()));
	});

	// every data byte is prefixed with a positioned service code, the
	// last one with the end service
	let written = uart.written();
	assert_eq!(written.len(), frame.len() * 2);

	for (position, byte) in frame.iter().enumerate() {
		let service = if position == frame.len() - 1 {
			0x40 | position as u8
		} else {
			0x80 | position as u8
		};

		assert_eq!(written[2 * position], service, "service at {position}");
		assert_eq!(written[2 * position + 1], *byte, "data at {position}");
	}
}

#[test]
fn send_nack_is_a_response_error() {
	let (driver, uart, _timer) = driver();
	let frame = [0xbc, 0x11, 0x03, 0x01, 0x01, 0xe1, 0x00, 0x80, 0x30];

	std::thread::scope(|scope| {
		scope.spawn(|| {
			while uart.written().len() < frame.len() * 2 {
				std::thread::sleep(Duration::from_millis(1));
			}

			for byte in frame {
				driver.handle_byte(byte);
			}

			// confirmation with the high bit clear means NACK
			driver.handle_byte(0x0b);
		});

		assert_eq!(LinkDriver::send(&driver, &frame), Err(DriverError::Response));
	});
}

#[test]
fn send_rejects_oversized_frames() {
	let (driver, _uart, _timer) = driver();
	let frame = [0u8; 65];

	assert_eq!(LinkDriver::send(&driver, &frame), Err(DriverError::Args));
}

#[test]
fn reception_resumes_after_command() {
	let (driver, _uart, _timer) = driver();

	// a command that ran into the response timeout leaves the device
	// ready for bus traffic again
	assert_eq!(driver.state(), Err(DriverError::Request));

	for byte in GROUP_WRITE {
		driver.handle_byte(byte);
	}
	driver.handle_gap_timeout();

	assert_eq!(driver.take_event(), Some(LinkEvent::Telegram));
	assert_eq!(driver.take_telegram().unwrap().as_slice(), &GROUP_WRITE);
}
