//! Link-layer transceiver drivers.
//!
//! Two interchangeable TP1 transceivers are supported: the Siemens
//! TP-UART and the ON Semiconductor NCN5120. Both sit on a byte-wise
//! UART (19200 baud, 8E1) and share the same receive engine; they
//! differ in their service code tables, timings and send protocols.
//!
//! The host wires three interrupt-context entry points to the drivers:
//! the UART receive callback (`handle_byte`), the end-of-telegram gap
//! timer (`handle_gap_timeout`) and, optionally, the SAVE pin edge
//! (`handle_save`). Everything else is host-command context.

pub mod netdev;
#[cfg(feature = "ncn5120")]
pub mod ncn5120;
#[cfg(feature = "tpuart")]
pub mod tpuart;
#[cfg(any(feature = "tpuart", feature = "ncn5120"))]
pub(crate) mod transceiver;

use thiserror::Error;

use crate::proto::addr::Addr;
use crate::proto::telegram::Telegram;

/// Serial parameters expected by both transceivers: 19200 baud,
/// 8 data bits, even parity, 1 stop bit.
pub const BAUD_RATE: u32 = 19_200;

/// Errors of the transceiver host commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DriverError {
	/// Device initialisation failed.
	#[error("initialization failed")]
	Init,
	/// The transceiver did not answer in time.
	#[error("request timed out")]
	Request,
	/// The transceiver answered with an unexpected indication.
	#[error("unexpected response")]
	Response,
	/// Invalid arguments.
	#[error("invalid arguments")]
	Args,
}

/// Events raised towards the upper layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
	/// A complete telegram is ready to be fetched.
	Telegram,
	/// A frame ended with too few or too many bytes, or a bad CRC.
	TelegramIncomplete,
	/// A state indication byte arrived.
	State(u8),
	/// A system state indication byte arrived (NCN5120 only).
	SystemState(u8),
	/// The SAVE pin signalled imminent bus-voltage loss.
	Save,
}

/// Single-shot timer seam for the end-of-telegram gap.
///
/// The driver re-arms the timer on every received byte; the host
/// arranges for `handle_gap_timeout` to be called when it expires.
pub trait GapTimer {
	fn arm(&self, timeout_us: u64);
}

/// The driver behaviour the netdev adaptor builds on.
pub trait LinkDriver {
	/// Streams a frame to the transceiver and waits for the data
	/// confirmation. Returns the number of frame bytes written.
	fn send(&self, frame: &[u8]) -> Result<usize, DriverError>;

	/// Takes the next queued link event.
	fn take_event(&self) -> Option<LinkEvent>;

	/// Takes the most recently completed telegram.
	fn take_telegram(&self) -> Option<Telegram>;

	/// Programs the physical address used for link-layer
	/// acknowledgement.
	fn set_address(&self, addr: Addr) -> Result<(), DriverError>;

	/// Toggles busy mode.
	fn set_busy(&self, enabled: bool) -> Result<(), DriverError>;

	/// Enables CRC-protected communication with the transceiver.
	fn activate_crc(&self) -> Result<(), DriverError>;
}
