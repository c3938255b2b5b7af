//! The receive engine shared by both transceiver drivers.
//!
//! Inbound traffic runs `Idle → Receiving → Completed → Idle`; host
//! commands run `Idle → WaitForResponse → Idle` and sends
//! `Idle → Sending → Idle`. The UART byte callback drives the inbound
//! side at interrupt priority and only ever touches the state behind
//! the spin lock; bytes arriving while a host transaction is active
//! are routed into the response pipe instead.
//!
//! Each received data byte re-arms the end-of-telegram gap timer.
//! When CRC mode is on, a rolling CRC-16/CCITT over the frame (minus
//! the trailing two CRC bytes) allows completing a telegram before the
//! gap is observed; trailing bytes arriving before the gap re-open the
//! frame and the completion is redone.

use heapless::Deque;
use hermit_sync::SpinMutex;
use log::{debug, warn};

use super::{DriverError, GapTimer, LinkEvent};
use crate::proto::telegram::Telegram;
use crate::synch::Pipe;
use crate::time::Clock;

/// Extended frame plus two CRC bytes.
const RX_BUFFER_SIZE: usize = 265;

/// Capacity of the host-command response pipe.
pub(crate) const PIPE_SIZE: usize = 16;

/// Capacity of the event queue towards the netdev adaptor.
const EVENT_QUEUE_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
	Idle,
	Sending,
	Receiving,
	WaitForResponse,
	Completed,
}

/// Variant-specific receive parameters.
pub(crate) struct EngineConfig {
	/// Seed of the rolling CRC-16/CCITT.
	pub crc_seed: u16,
	/// End-of-telegram gap, re-armed per byte.
	pub gap_timeout_us: u64,
}

struct Rx {
	state: State,
	buf: [u8; RX_BUFFER_SIZE],
	buf_size: usize,
	telegram_size: usize,
	min_telegram_size: usize,
	max_telegram_size: usize,
	crc_checksum: u16,
	crc_ready: bool,
	crc: bool,
	monitoring: bool,
	busy: bool,
	stop: bool,
	address: u16,
}

pub(crate) struct Engine {
	config: EngineConfig,
	rx: SpinMutex<Rx>,
	pipe: Pipe<PIPE_SIZE>,
	events: SpinMutex<Deque<LinkEvent, EVENT_QUEUE_SIZE>>,
}

impl Engine {
	pub fn new(config: EngineConfig) -> Engine {
		Engine {
			config,
			rx: SpinMutex::new(Rx {
				state: State::Idle,
				buf: [0; RX_BUFFER_SIZE],
				buf_size: 0,
				telegram_size: 0,
				min_telegram_size: 0,
				max_telegram_size: 0,
				crc_checksum: 0,
				crc_ready: false,
				crc: false,
				monitoring: false,
				busy: false,
				stop: false,
				address: 0,
			}),
			pipe: Pipe::new(),
			events: SpinMutex::new(Deque::new()),
		}
	}

	pub fn state(&self) -> State {
		self.rx.lock().state
	}

	/// Starts receiving a frame. A device that is not idle (host
	/// transaction in flight) drops the frame silently; completed host
	/// commands re-enable reception.
	pub fn begin_receive(
		&self,
		byte: u8,
		min_telegram_size: usize,
		max_telegram_size: usize,
		timer: &impl GapTimer,
	) {
		let mut rx = self.rx.lock();

		if rx.state != State::Idle {
			debug!("frame start while busy, dropping");
			return;
		}

		rx.state = State::Receiving;
		rx.buf_size = 0;
		rx.telegram_size = 0;
		rx.min_telegram_size = min_telegram_size;
		rx.max_telegram_size = max_telegram_size;
		rx.crc_checksum = self.config.crc_seed;
		rx.crc_ready = false;

		self.receive_locked(&mut rx, byte, timer);
	}

	/// Appends a data byte to the running frame. Also re-opens a frame
	/// completed early by the CRC check, as long as the gap timer has
	/// not fired.
	pub fn receive(&self, byte: u8, timer: &impl GapTimer) {
		let mut rx = self.rx.lock();

		rx.state = State::Receiving;
		self.receive_locked(&mut rx, byte, timer);
	}

	fn receive_locked(&self, rx: &mut Rx, byte: u8, timer: &impl GapTimer) {
		timer.arm(self.config.gap_timeout_us);

		if rx.buf_size == RX_BUFFER_SIZE {
			warn!("receive buffer full, dropping byte");
			return;
		}

		rx.buf[rx.buf_size] = byte;
		rx.buf_size += 1;

		if rx.crc {
			// the trailing two bytes carry the CRC, keep them out of
			// the rolling checksum
			if rx.buf_size > 2 {
				let last = rx.buf[rx.buf_size - 3];
				rx.crc_checksum = crc16_ccitt_step(rx.crc_checksum, last);
			}

			if rx.buf_size >= rx.min_telegram_size + 2 {
				let received =
					u16::from_be_bytes([rx.buf[rx.buf_size - 2], rx.buf[rx.buf_size - 1]]);

				if received == rx.crc_checksum {
					rx.crc_ready = true;

					let size = rx.buf_size - 2;
					self.complete_locked(rx, size);
				} else {
					rx.crc_ready = false;
				}
			}
		}
	}

	fn complete_locked(&self, rx: &mut Rx, telegram_size: usize) {
		rx.telegram_size = telegram_size;

		let event = if telegram_size < rx.min_telegram_size || telegram_size > rx.max_telegram_size
		{
			debug!(
				"telegram incomplete ({}/{} bytes)",
				telegram_size, rx.min_telegram_size
			);
			LinkEvent::TelegramIncomplete
		} else if rx.crc && !rx.crc_ready {
			debug!("telegram corrupt ({} bytes)", telegram_size);
			LinkEvent::TelegramIncomplete
		} else {
			debug!("telegram complete ({} bytes)", telegram_size);
			LinkEvent::Telegram
		};

		self.push_event(event);
		rx.state = State::Completed;
	}

	/// The end-of-telegram gap fired: close the frame and go idle.
	pub fn gap_timeout(&self) {
		let mut rx = self.rx.lock();

		match rx.state {
			State::Receiving => {
				let size = rx.buf_size;
				self.complete_locked(&mut rx, size);
				rx.state = State::Idle;
			}
			State::Completed => rx.state = State::Idle,
			_ => {}
		}
	}

	/// Routes a byte into the host-command response pipe.
	pub fn push_response(&self, byte: u8) {
		if self.pipe.write(byte).is_err() {
			warn!("response pipe full, dropping byte");
		}
	}

	pub fn push_event(&self, event: LinkEvent) {
		if self.events.lock().push_back(event).is_err() {
			warn!("link event queue full, event dropped");
		}
	}

	pub fn take_event(&self) -> Option<LinkEvent> {
		self.events.lock().pop_front()
	}

	/// Copies the completed telegram out of the receive buffer.
	pub fn take_telegram(&self) -> Option<Telegram> {
		let mut rx = self.rx.lock();

		if rx.telegram_size == 0 {
			return None;
		}

		let telegram = Telegram::from_slice(&rx.buf[..rx.telegram_size]);
		rx.telegram_size = 0;

		telegram
	}

	/// Claims the device for a host transaction, waiting for a running
	/// reception to finish. The wait is bounded by `timeout_us`.
	pub fn claim(
		&self,
		state: State,
		clock: &impl Clock,
		timeout_us: u64,
	) -> Result<(), DriverError> {
		let deadline = clock.now_us().saturating_add(timeout_us);

		loop {
			{
				let mut rx = self.rx.lock();

				if rx.state == State::Idle {
					rx.state = state;
					return Ok(());
				}
			}

			if clock.now_us() >= deadline {
				return Err(DriverError::Request);
			}

			core::hint::spin_loop();
		}
	}

	/// Ends a host transaction.
	pub fn release(&self) {
		let mut rx = self.rx.lock();

		if matches!(rx.state, State::Sending | State::WaitForResponse) {
			rx.state = State::Idle;
		}
	}

	pub fn pipe(&self) -> &Pipe<PIPE_SIZE> {
		&self.pipe
	}

	pub fn crc_enabled(&self) -> bool {
		self.rx.lock().crc
	}

	pub fn monitoring(&self) -> bool {
		self.rx.lock().monitoring
	}

	pub fn busy(&self) -> bool {
		self.rx.lock().busy
	}

	pub fn stopped(&self) -> bool {
		self.rx.lock().stop
	}

	pub fn address(&self) -> u16 {
		self.rx.lock().address
	}

	pub fn set_crc(&self, enabled: bool) {
		self.rx.lock().crc = enabled;
	}

	pub fn set_monitoring(&self, enabled: bool) {
		self.rx.lock().monitoring = enabled;
	}

	pub fn set_busy(&self, enabled: bool) {
		self.rx.lock().busy = enabled;
	}

	pub fn set_stop(&self, enabled: bool) {
		self.rx.lock().stop = enabled;
	}

	pub fn set_address(&self, address: u16) {
		self.rx.lock().address = address;
	}

	/// Clears the mode flags after a transceiver reset.
	pub fn reset_modes(&self) {
		let mut rx = self.rx.lock();

		rx.address = 0;
		rx.crc = false;
		rx.monitoring = false;
		rx.busy = false;
		rx.stop = false;
	}
}

/// One step of the CRC-16/CCITT used by both transceivers (polynomial
/// 0x1021, most significant bit first).
pub(crate) fn crc16_ccitt_step(mut crc: u16, byte: u8) -> u16 {
	crc ^= u16::from(byte) << 8;

	for _ in 0..8 {
		crc = if crc & 0x8000 != 0 {
			(crc << 1) ^ 0x1021
		} else {
			crc << 1
		};
	}

	crc
}
