//! The transport layer.
//!
//! Connectionless traffic (UDP) passes straight through. On top of it,
//! a single connection-oriented point-to-point session carries the
//! device management services: UCD connect/disconnect maintain the
//! session, NDP telegrams carry numbered data which is acknowledged
//! with NCD ACK, and every protocol violation (sequence mismatch,
//! NACK) tears the session down rather than surfacing an error.

use log::debug;

use crate::proto::addr::Addr;
use crate::proto::telegram::{Telegram, TelegramType};
use crate::proto::tpci::{Tpci, TpciNcd, TpciUcd};
use crate::time::{Clock, US_PER_SEC};

/// Inactivity threshold after which a session is considered stale.
pub const CONNECTION_TIMEOUT_US: u64 = 6 * US_PER_SEC;

/// State of the single point-to-point session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Connection {
	pub connected: bool,
	/// Peer the session belongs to.
	pub peer: Addr,
	/// Next sequence number to send.
	pub tx_seq: u8,
	/// Next sequence number expected.
	pub rx_seq: u8,
	/// Timestamp of the last valid exchange.
	pub last_activity_us: u64,
}

/// What the layer decided about an inbound telegram.
pub struct Outcome {
	/// Forward the telegram to the application layer.
	pub deliver: bool,
	/// Control telegram to transmit first (ACK or disconnect).
	pub reply: Option<Telegram>,
}

impl Outcome {
	fn drop() -> Outcome {
		Outcome {
			deliver: false,
			reply: None,
		}
	}

	fn deliver() -> Outcome {
		Outcome {
			deliver: true,
			reply: None,
		}
	}
}

enum Control {
	Ack(u8),
	Disconnect,
}

/// The transport layer with its single session.
pub struct TransportLayer<C> {
	connection: Connection,
	clock: C,
	timeout_us: u64,
}

impl<C: Clock> TransportLayer<C> {
	pub fn new(clock: C) -> TransportLayer<C> {
		TransportLayer {
			connection: Connection::default(),
			clock,
			timeout_us: CONNECTION_TIMEOUT_US,
		}
	}

	pub fn connection(&self) -> &Connection {
		&self.connection
	}

	/// Runs the session state machine over an inbound telegram.
	pub fn receive(&mut self, telegram: &Telegram) -> Outcome {
		if !telegram.is_valid() {
			debug!("invalid or incomplete telegram");
			return Outcome::drop();
		}

		match telegram.tpci() {
			Some(Tpci::Udp) => Outcome::deliver(),
			Some(Tpci::Ndp) => self.handle_ndp(telegram),
			Some(Tpci::Ucd) => {
				self.handle_ucd(telegram);
				Outcome::drop()
			}
			Some(Tpci::Ncd) => Outcome {
				deliver: false,
				reply: self.handle_ncd(telegram),
			},
			None => Outcome::drop(),
		}
	}

	fn handle_ucd(&mut self, telegram: &Telegram) {
		match telegram.tpci_ucd() {
			Some(TpciUcd::Connect) => {
				if !self.connection.connected {
					self.connection.connected = true;
					self.connection.tx_seq = 0;
					self.connection.rx_seq = 0;
					self.connection.last_activity_us = self.clock.now_us();
					self.connection.peer = telegram.src_addr().unwrap_or(Addr::UNDEFINED);

					debug!("connected");
				} else {
					debug!("connection request but already connected");
				}
			}
			Some(TpciUcd::Disconnect) => {
				if self.connection.connected {
					if telegram.src_addr() == Some(self.connection.peer) {
						self.connection.connected = false;

						debug!("disconnected");
					} else {
						debug!("disconnect request not from peer");
					}
				} else {
					debug!("disconnect request but not connected");
				}
			}
			None => debug!("unexpected UCD sub-code"),
		}
	}

	fn handle_ncd(&mut self, telegram: &Telegram) -> Option<Telegram> {
		if !self.connection.connected {
			debug!("control telegram received but not connected");
			return None;
		}

		if telegram.src_addr() != Some(self.connection.peer) {
			debug!("control telegram received from wrong peer");
			return None;
		}

		match telegram.tpci_ncd() {
			Some(TpciNcd::Ack) => {
				let seq = telegram.tpci_seq_number();

				if seq == self.connection.tx_seq {
					self.connection.last_activity_us = self.clock.now_us();
					self.connection.tx_seq = (self.connection.tx_seq + 1) % 16;

					debug!("received ACK with sequence number {seq}");
				} else {
					debug!(
						"received ACK for wrong sequence number (got {seq}, expected {})",
						self.connection.tx_seq
					);
				}

				None
			}
			Some(TpciNcd::Nack) => {
				debug!("NACK received, disconnecting");
				self.connection.connected = false;

				control(telegram, Control::Disconnect)
			}
			None => None,
		}
	}

	fn handle_ndp(&mut self, telegram: &Telegram) -> Outcome {
		// stale sessions are torn down before the telegram is looked at
		if self.connection.connected
			&& self
				.clock
				.now_us()
				.saturating_sub(self.connection.last_activity_us)
				> self.timeout_us
		{
			debug!("connection timed out");
			self.connection.connected = false;
		}

		if !self.connection.connected {
			debug!("data telegram received but not connected");
			return Outcome::drop();
		}

		if telegram.src_addr() != Some(self.connection.peer) {
			debug!("data telegram received from wrong peer");
			return Outcome::drop();
		}

		let seq = telegram.tpci_seq_number();

		if seq != self.connection.rx_seq {
			debug!(
				"unexpected sequence number (got {seq}, expected {})",
				self.connection.rx_seq
			);
			self.connection.connected = false;

			return Outcome {
				deliver: false,
				reply: control(telegram, Control::Disconnect),
			};
		}

		self.connection.last_activity_us = self.clock.now_us();
		self.connection.rx_seq = (seq + 1) % 16;

		debug!("next sequence number is {}", self.connection.rx_seq);

		Outcome {
			deliver: true,
			reply: control(telegram, Control::Ack(seq)),
		}
	}

	/// Gates an outbound telegram: numbered data requires a session
	/// with the destination and gets the current sequence number
	/// stamped in. Returns `false` when the telegram must not be sent.
	pub fn send(&mut self, telegram: &mut Telegram) -> bool {
		if telegram.tpci() == Some(Tpci::Ndp) {
			if !self.connection.connected {
				debug!("not connected");
				return false;
			}

			if telegram.dst_addr() != Some(self.connection.peer) {
				debug!("unable to send telegram to unconnected destination");
				return false;
			}

			telegram.set_tpci_seq_number(self.connection.tx_seq);
		}

		true
	}
}

/// Builds a control telegram answering `telegram`, with source and
/// destination swapped and the priority copied.
fn control(telegram: &Telegram, kind: Control) -> Option<Telegram> {
	let src = telegram.dst_addr()?;
	let dst = telegram.src_addr()?;

	let mut out = Telegram::build(TelegramType::Standard, src, dst, false);
	out.set_priority(telegram.priority());

	match kind {
		Control::Ack(seq) => {
			out.set_tpci(Tpci::Ncd);
			out.set_tpci_ncd(TpciNcd::Ack);
			out.set_tpci_seq_number(seq);
		}
		Control::Disconnect => {
			out.set_tpci(Tpci::Ucd);
			out.set_tpci_ucd(TpciUcd::Disconnect);
		}
	}

	Some(out)
}
