//! Driver for the ON Semiconductor NCN5120 KNX transceiver.
//!
//! See <http://www.onsemi.com/pub/Collateral/NCN5120-D.PDF>

use embedded_io::Write;
use hermit_sync::SpinMutex;
use log::debug;

use super::transceiver::{Engine, EngineConfig, State};
use super::{DriverError, GapTimer, LinkDriver, LinkEvent};
use crate::proto::addr::Addr;
use crate::proto::telegram::Telegram;
use crate::time::{Clock, US_PER_MS};

/// End-of-telegram gap.
const TIMEOUT_END_OF_TELEGRAM: u64 = 13 * US_PER_MS / 5;
/// Per-byte budget while waiting for the echo and confirmation.
const TIMEOUT_WAIT_FOR_ACK: u64 = 26 * US_PER_MS / 5;
/// Budget for a host-command response.
const TIMEOUT_WAIT_FOR_RESPONSE: u64 = 100 * US_PER_MS;

/// Services provided/supported by the NCN5120.
const SERVICE_L_DATA_CONFIRM: u8 = 0x0b;
const SERVICE_L_DATA_EXTENDED_INDICATION: u8 = 0x10;
const SERVICE_L_DATA_STANDARD_INDICATION: u8 = 0x90;
const SERVICE_L_POLL_DATA_INDICATION: u8 = 0xf0;
const SERVICE_U_BUSMON_REQUEST: u8 = 0x05;
const SERVICE_U_CONFIGURE_INDICATION: u8 = 0x01;
const SERVICE_U_CONFIGURE_REQUEST: u8 = 0x18;
const SERVICE_U_EXIT_STOP_MODE_REQUEST: u8 = 0x0f;
const SERVICE_U_INT_REG_RD_REQUEST: u8 = 0x38;
const SERVICE_U_INT_REG_WR_REQUEST: u8 = 0x28;
const SERVICE_U_L_DATA_CONTINUE_REQUEST: u8 = 0x80;
const SERVICE_U_L_DATA_END_REQUEST: u8 = 0x40;
const SERVICE_U_L_DATA_OFFSET_REQUEST: u8 = 0x08;
const SERVICE_U_QUIT_BUSY_REQUEST: u8 = 0x04;
const SERVICE_U_RESET_INDICATION: u8 = 0x03;
const SERVICE_U_RESET_REQUEST: u8 = 0x01;
const SERVICE_U_SET_ADDRESS_REQUEST: u8 = 0xf1;
const SERVICE_U_SET_BUSY_REQUEST: u8 = 0x21;
const SERVICE_U_SET_REPETITION_REQUEST: u8 = 0xf2;
const SERVICE_U_STATE_INDICATION: u8 = 0x07;
const SERVICE_U_STATE_REQUEST: u8 = 0x02;
const SERVICE_U_STOP_MODE: u8 = 0x0e;
const SERVICE_U_STOP_MODE_INDICATION: u8 = 0x2b;
const SERVICE_U_SYSTEM_STATE_INDICATION: u8 = 0x4b;
const SERVICE_U_SYSTEM_STATE_REQUEST: u8 = 0x0d;

/// Configuration options for [`Ncn5120::configure`].
pub mod configure {
	pub const NONE: u8 = 0x00;
	pub const FRAME_END_MARKER: u8 = 0x01;
	pub const CRC_CTIT: u8 = 0x02;
	pub const AUTO_POLLING: u8 = 0x04;
}

/// Largest frame the NCN5120 send protocol can carry.
const MAX_SEND_SIZE: usize = 263;

const fn matches(byte: u8, service: u8) -> bool {
	byte & service == service
}

/// An NCN5120 transceiver on a byte-wise UART.
pub struct Ncn5120<U, C, T> {
	engine: Engine,
	uart: SpinMutex<U>,
	clock: C,
	timer: T,
	cmd_lock: SpinMutex<()>,
}

impl<U: Write, C: Clock, T: GapTimer> Ncn5120<U, C, T> {
	/// Creates the driver on an initialised UART (19200 baud, 8E1).
	pub fn new(uart: U, clock: C, timer: T) -> Ncn5120<U, C, T> {
		Ncn5120 {
			engine: Engine::new(EngineConfig {
				crc_seed: 0xffff,
				gap_timeout_us: TIMEOUT_END_OF_TELEGRAM,
			}),
			uart: SpinMutex::new(uart),
			clock,
			timer,
			cmd_lock: SpinMutex::new(()),
		}
	}

	/// UART receive callback; safe to call from interrupt context.
	pub fn handle_byte(&self, byte: u8) {
		match self.engine.state() {
			State::Idle => {
				if byte == SERVICE_L_POLL_DATA_INDICATION {
					self.engine.begin_receive(byte, 6, 6, &self.timer);
				} else if matches(byte, SERVICE_L_DATA_STANDARD_INDICATION) {
					self.engine.begin_receive(byte, 8, 23, &self.timer);
				} else if matches(byte, SERVICE_L_DATA_EXTENDED_INDICATION) {
					self.engine.begin_receive(byte, 9, 263, &self.timer);
				} else if byte & SERVICE_U_STATE_INDICATION != 0 {
					self.engine.push_event(LinkEvent::State(byte));
				} else if byte & SERVICE_U_SYSTEM_STATE_INDICATION != 0 {
					self.engine.push_event(LinkEvent::SystemState(byte));
				} else {
					debug!("unexpected control byte: {byte:#04x}");
				}
			}
			State::Receiving | State::Completed => self.engine.receive(byte, &self.timer),
			State::Sending | State::WaitForResponse => self.engine.push_response(byte),
		}
	}

	/// The end-of-telegram gap timer fired.
	pub fn handle_gap_timeout(&self) {
		self.engine.gap_timeout();
	}

	/// The SAVE pin signalled a bus voltage drop.
	pub fn handle_save(&self) {
		self.engine.push_event(LinkEvent::Save);
	}

	/// True while bus monitoring mode is active.
	pub fn is_monitoring(&self) -> bool {
		self.engine.monitoring()
	}

	/// True while busy mode is active.
	pub fn is_busy(&self) -> bool {
		self.engine.busy()
	}

	/// True while stop mode is active.
	pub fn is_stopped(&self) -> bool {
		self.engine.stopped()
	}

	/// True while CRC-protected communication is active.
	pub fn is_crc_enabled(&self) -> bool {
		self.engine.crc_enabled()
	}

	/// The programmed physical address.
	pub fn address(&self) -> Addr {
		Addr::new(self.engine.address())
	}

	/// Resets the transceiver and clears all mode flags.
	pub fn reset(&self) -> Result<(), DriverError> {
		let mut response = [0; 1];
		self.request(&[SERVICE_U_RESET_REQUEST], &mut response)?;

		if response[0] & SERVICE_U_RESET_INDICATION == 0 {
			return Err(DriverError::Response);
		}

		self.engine.reset_modes();

		Ok(())
	}

	/// Switches the transceiver into bus monitoring mode.
	pub fn busmon(&self) -> Result<(), DriverError> {
		self.request(&[SERVICE_U_BUSMON_REQUEST], &mut [])?;
		self.engine.set_monitoring(true);

		Ok(())
	}

	/// Applies the configuration options in [`configure`].
	pub fn configure(&self, opts: u8) -> Result<(), DriverError> {
		if opts > 7 {
			return Err(DriverError::Args);
		}

		let mut response = [0; 1];
		self.request(&[SERVICE_U_CONFIGURE_REQUEST | opts], &mut response)?;

		if response[0] & SERVICE_U_CONFIGURE_INDICATION == 0 {
			return Err(DriverError::Response);
		}

		self.engine.set_crc(opts & configure::CRC_CTIT != 0);

		Ok(())
	}

	pub fn set_busy_mode(&self) -> Result<(), DriverError> {
		self.request(&[SERVICE_U_SET_BUSY_REQUEST], &mut [])?;
		self.engine.set_busy(true);

		Ok(())
	}

	pub fn quit_busy(&self) -> Result<(), DriverError> {
		self.request(&[SERVICE_U_QUIT_BUSY_REQUEST], &mut [])?;
		self.engine.set_busy(false);

		Ok(())
	}

	/// Enters stop mode (no bus traffic is processed).
	pub fn stop_mode(&self) -> Result<(), DriverError> {
		let mut response = [0; 1];
		self.request(&[SERVICE_U_STOP_MODE], &mut response)?;

		if response[0] & SERVICE_U_STOP_MODE_INDICATION == 0 {
			return Err(DriverError::Response);
		}

		self.engine.set_stop(true);

		Ok(())
	}

	pub fn exit_stop_mode(&self) -> Result<(), DriverError> {
		let mut response = [0; 1];
		self.request(&[SERVICE_U_EXIT_STOP_MODE_REQUEST], &mut response)?;

		if response[0] & SERVICE_U_RESET_INDICATION == 0 {
			return Err(DriverError::Response);
		}

		self.engine.set_stop(false);

		Ok(())
	}

	/// Programs the physical address used for link-layer
	/// acknowledgement.
	pub fn set_address(&self, addr: Addr) -> Result<(), DriverError> {
		let bytes = addr.to_be_bytes();

		let mut response = [0; 1];
		self.request(
			&[SERVICE_U_SET_ADDRESS_REQUEST, bytes[0], bytes[1], 0x00],
			&mut response,
		)?;

		if response[0] & SERVICE_U_CONFIGURE_INDICATION == 0 {
			return Err(DriverError::Response);
		}

		self.engine.set_address(addr.raw());

		Ok(())
	}

	/// Configures the busy/NACK retransmission counts (0..=7 each).
	pub fn set_repetition(&self, busy_count: u8, nack_count: u8) -> Result<(), DriverError> {
		if busy_count > 7 || nack_count > 7 {
			return Err(DriverError::Args);
		}

		self.request(
			&[
				SERVICE_U_SET_REPETITION_REQUEST,
				((busy_count & 0x07) << 5) | (nack_count & 0x07),
				0x00,
				0x00,
			],
			&mut [],
		)
	}

	/// Reads the communication state byte.
	pub fn state(&self) -> Result<u8, DriverError> {
		let mut response = [0; 1];
		self.request(&[SERVICE_U_STATE_REQUEST], &mut response)?;

		if response[0] & SERVICE_U_STATE_INDICATION == 0 {
			return Err(DriverError::Response);
		}

		Ok(response[0])
	}

	/// Reads the system state byte.
	pub fn system_state(&self) -> Result<u8, DriverError> {
		let mut response = [0; 2];
		self.request(&[SERVICE_U_SYSTEM_STATE_REQUEST], &mut response)?;

		if response[0] != SERVICE_U_SYSTEM_STATE_INDICATION {
			return Err(DriverError::Response);
		}

		Ok(response[1])
	}

	/// Writes an internal register (0..=3).
	pub fn reg_write(&self, addr: u8, value: u8) -> Result<(), DriverError> {
		if addr > 3 {
			return Err(DriverError::Args);
		}

		self.request(&[SERVICE_U_INT_REG_WR_REQUEST | addr, value], &mut [])
	}

	/// Reads an internal register (0..=3).
	pub fn reg_read(&self, addr: u8) -> Result<u8, DriverError> {
		if addr > 3 {
			return Err(DriverError::Args);
		}

		let mut response = [0; 1];
		self.request(&[SERVICE_U_INT_REG_RD_REQUEST | addr], &mut response)?;

		Ok(response[0])
	}

	/// Streams a frame to the transceiver. Every 64-byte window is
	/// prefixed with a data-offset service; the transceiver echoes the
	/// frame and follows up with a data confirmation whose high bit
	/// distinguishes ACK from NACK.
	pub fn send(&self, frame: &[u8]) -> Result<usize, DriverError> {
		debug!("sending telegram of {} bytes", frame.len());

		if frame.len() > MAX_SEND_SIZE {
			return Err(DriverError::Args);
		}

		let _cmd = self.cmd_lock.lock();

		self.engine
			.claim(State::Sending, &self.clock, TIMEOUT_WAIT_FOR_RESPONSE)?;
		let result = self.stream(frame);
		self.engine.release();

		result
	}

	fn stream(&self, frame: &[u8]) -> Result<usize, DriverError> {
		{
			let mut uart = self.uart.lock();
			let mut offset = 0u8;

			for (position, byte) in frame.iter().enumerate() {
				// announce the window whenever the three most
				// significant position bits change
				let window = ((position >> 6) & 0x07) as u8;

				if window != offset {
					offset = window;
					uart.write_all(&[SERVICE_U_L_DATA_OFFSET_REQUEST | offset])
						.map_err(|_| DriverError::Request)?;
				}

				let service = if position == frame.len() - 1 {
					SERVICE_U_L_DATA_END_REQUEST | (position as u8 & 0x3f)
				} else {
					SERVICE_U_L_DATA_CONTINUE_REQUEST | (position as u8 & 0x3f)
				};

				uart.write_all(&[service, *byte])
					.map_err(|_| DriverError::Request)?;
			}
		}

		// the transceiver echoes the whole frame before the
		// confirmation byte
		let mut expected = frame.len() + 1 + if self.engine.crc_enabled() { 2 } else { 0 };
		let mut last = [0u8; 1];

		while expected > 0 {
			if !self
				.engine
				.pipe()
				.read_exact(&mut last, &self.clock, TIMEOUT_WAIT_FOR_ACK)
			{
				break;
			}

			expected -= 1;
		}

		if expected == 0 && last[0] & SERVICE_L_DATA_CONFIRM != 0 {
			if last[0] & 0x80 != 0 {
				debug!("ACK received");
				Ok(frame.len())
			} else {
				debug!("NACK received");
				Err(DriverError::Response)
			}
		} else {
			debug!("send confirmation missing, {expected} bytes outstanding");
			Err(DriverError::Request)
		}
	}

	/// Runs one host command: writes the request bytes and reads the
	/// expected response under the device lock.
	fn request(&self, out: &[u8], response: &mut [u8]) -> Result<(), DriverError> {
		let _cmd = self.cmd_lock.lock();

		self.engine
			.claim(State::WaitForResponse, &self.clock, TIMEOUT_WAIT_FOR_RESPONSE)?;
		let result = self.transfer(out, response);
		self.engine.release();

		result
	}

	fn transfer(&self, out: &[u8], response: &mut [u8]) -> Result<(), DriverError> {
		self.uart
			.lock()
			.write_all(out)
			.map_err(|_| DriverError::Request)?;

		if !self
			.engine
			.pipe()
			.read_exact(response, &self.clock, TIMEOUT_WAIT_FOR_RESPONSE)
		{
			return Err(DriverError::Request);
		}

		Ok(())
	}
}

impl<U: Write, C: Clock, T: GapTimer> LinkDriver for Ncn5120<U, C, T> {
	fn send(&self, frame: &[u8]) -> Result<usize, DriverError> {
		Ncn5120::send(self, frame)
	}

	fn take_event(&self) -> Option<LinkEvent> {
		self.engine.take_event()
	}

	fn take_telegram(&self) -> Option<Telegram> {
		self.engine.take_telegram()
	}

	fn set_address(&self, addr: Addr) -> Result<(), DriverError> {
		Ncn5120::set_address(self, addr)
	}

	fn set_busy(&self, enabled: bool) -> Result<(), DriverError> {
		if enabled {
			self.set_busy_mode()
		} else {
			self.quit_busy()
		}
	}

	fn activate_crc(&self) -> Result<(), DriverError> {
		self.configure(configure::CRC_CTIT)
	}
}
