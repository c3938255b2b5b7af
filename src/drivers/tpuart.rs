//! Driver for the Siemens TP-UART KNX transceiver.
//!
//! See <http://www.hqs.sbt.siemens.com/cps_product_data/gamma-b2b/tpuart.pdf>

use embedded_io::Write;
use hermit_sync::SpinMutex;
use log::debug;

use super::transceiver::{Engine, EngineConfig, State};
use super::{DriverError, GapTimer, LinkDriver, LinkEvent};
use crate::proto::addr::Addr;
use crate::proto::telegram::Telegram;
use crate::time::{Clock, US_PER_MS};

/// End-of-telegram gap.
const TIMEOUT_END_OF_TELEGRAM: u64 = 5 * US_PER_MS / 2;
/// Per-byte budget while waiting for the echo and confirmation.
const TIMEOUT_WAIT_FOR_ACK: u64 = 5 * US_PER_MS;
/// Budget for a host-command response.
const TIMEOUT_WAIT_FOR_RESPONSE: u64 = 100 * US_PER_MS;

/// Services provided/supported by the TP-UART.
const SERVICE_L_DATA_CONFIRM: u8 = 0x0b;
const SERVICE_L_DATA_REQUEST: u8 = 0x90;
const SERVICE_L_EXT_DATA_REQUEST: u8 = 0x10;
const SERVICE_L_POLLDATA_REQUEST: u8 = 0xf0;
const SERVICE_U_ACTIVATE_BUSMON: u8 = 0x05;
const SERVICE_U_ACTIVATE_BUSY_MODE: u8 = 0x21;
const SERVICE_U_ACTIVATE_CRC: u8 = 0x25;
const SERVICE_U_L_DATA_CONTINUE: u8 = 0x80;
const SERVICE_U_L_DATA_END: u8 = 0x40;
const SERVICE_U_MX_RST_CNT: u8 = 0x24;
const SERVICE_U_PRODUCT_ID_REQUEST: u8 = 0x20;
const SERVICE_U_RESET_BUSY_MODE: u8 = 0x22;
const SERVICE_U_RESET_REQUEST: u8 = 0x01;
const SERVICE_U_RESET_RESPONSE: u8 = 0x03;
const SERVICE_U_SET_ADDRESS: u8 = 0x28;
const SERVICE_U_STATE_REQUEST: u8 = 0x02;
const SERVICE_U_STATE_RESPONSE: u8 = 0x07;

/// Largest frame the TP-UART send protocol can carry.
const MAX_SEND_SIZE: usize = 64;

const fn matches(byte: u8, service: u8) -> bool {
	byte & service == service
}

/// A TP-UART transceiver on a byte-wise UART.
pub struct Tpuart<U, C, T> {
	engine: Engine,
	uart: SpinMutex<U>,
	clock: C,
	timer: T,
	cmd_lock: SpinMutex<()>,
}

impl<U: Write, C: Clock, T: GapTimer> Tpuart<U, C, T> {
	/// Creates the driver on an initialised UART (19200 baud, 8E1).
	pub fn new(uart: U, clock: C, timer: T) -> Tpuart<U, C, T> {
		Tpuart {
			engine: Engine::new(EngineConfig {
				crc_seed: 0x1d0f,
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
				if byte == SERVICE_L_POLLDATA_REQUEST {
					self.engine.begin_receive(byte, 6, 6, &self.timer);
				} else if matches(byte, SERVICE_L_DATA_REQUEST) {
					self.engine.begin_receive(byte, 8, 23, &self.timer);
				} else if matches(byte, SERVICE_L_EXT_DATA_REQUEST) {
					self.engine.begin_receive(byte, 9, 263, &self.timer);
				} else if byte & SERVICE_U_STATE_RESPONSE != 0 {
					self.engine.push_event(LinkEvent::State(byte));
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
		let mut response = [0; 2];
		self.request(&[SERVICE_U_RESET_REQUEST], &mut response)?;

		if response[1] & SERVICE_U_RESET_RESPONSE == 0 {
			return Err(DriverError::Response);
		}

		self.engine.reset_modes();

		Ok(())
	}

	/// Reads the product identifier.
	pub fn product_id(&self) -> Result<u8, DriverError> {
		let mut response = [0; 1];
		self.request(&[SERVICE_U_PRODUCT_ID_REQUEST], &mut response)?;

		Ok(response[0])
	}

	/// Reads the communication state byte.
	pub fn state(&self) -> Result<u8, DriverError> {
		let mut response = [0; 1];
		self.request(&[SERVICE_U_STATE_REQUEST], &mut response)?;

		if response[0] & SERVICE_U_STATE_RESPONSE == 0 {
			return Err(DriverError::Response);
		}

		Ok(response[0])
	}

	/// Switches the transceiver into bus monitoring mode.
	pub fn activate_busmon(&self) -> Result<(), DriverError> {
		self.request(&[SERVICE_U_ACTIVATE_BUSMON], &mut [])?;
		self.engine.set_monitoring(true);

		Ok(())
	}

	/// Enables CRC-protected communication.
	pub fn activate_crc(&self) -> Result<(), DriverError> {
		self.request(&[SERVICE_U_ACTIVATE_CRC], &mut [])?;
		self.engine.set_crc(true);

		Ok(())
	}

	pub fn activate_busy_mode(&self) -> Result<(), DriverError> {
		self.request(&[SERVICE_U_ACTIVATE_BUSY_MODE], &mut [])?;
		self.engine.set_busy(true);

		Ok(())
	}

	pub fn reset_busy_mode(&self) -> Result<(), DriverError> {
		self.request(&[SERVICE_U_RESET_BUSY_MODE], &mut [])?;
		self.engine.set_busy(false);

		Ok(())
	}

	/// Configures the busy/NACK retransmission counts (0..=7 each).
	pub fn set_resend_count(&self, busy_count: u8, nack_count: u8) -> Result<(), DriverError> {
		if busy_count > 7 || nack_count > 7 {
			return Err(DriverError::Args);
		}

		self.request(
			&[
				SERVICE_U_MX_RST_CNT,
				((busy_count & 0x07) << 5) | (nack_count & 0x07),
			],
			&mut [],
		)
	}

	/// Programs the physical address used for link-layer
	/// acknowledgement.
	pub fn set_address(&self, addr: Addr) -> Result<(), DriverError> {
		let bytes = addr.to_be_bytes();

		self.request(&[SERVICE_U_SET_ADDRESS, bytes[0], bytes[1]], &mut [])?;
		self.engine.set_address(addr.raw());

		Ok(())
	}

	/// Streams a frame to the transceiver. The transceiver echoes the
	/// frame and follows up with a data confirmation after the
	/// end-of-telegram gap; its high bit distinguishes ACK from NACK.
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

			for (position, byte) in frame.iter().enumerate() {
				let service = if position == frame.len() - 1 {
					SERVICE_U_L_DATA_END | position as u8
				} else {
					SERVICE_U_L_DATA_CONTINUE | position as u8
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

impl<U: Write, C: Clock, T: GapTimer> LinkDriver for Tpuart<U, C, T> {
	fn send(&self, frame: &[u8]) -> Result<usize, DriverError> {
		Tpuart::send(self, frame)
	}

	fn take_event(&self) -> Option<LinkEvent> {
		self.engine.take_event()
	}

	fn take_telegram(&self) -> Option<Telegram> {
		self.engine.take_telegram()
	}

	fn set_address(&self, addr: Addr) -> Result<(), DriverError> {
		Tpuart::set_address(self, addr)
	}

	fn set_busy(&self, enabled: bool) -> Result<(), DriverError> {
		if enabled {
			self.activate_busy_mode()
		} else {
			self.reset_busy_mode()
		}
	}

	fn activate_crc(&self) -> Result<(), DriverError> {
		Tpuart::activate_crc(self)
	}
}
