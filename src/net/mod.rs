//! The protocol layers and their wiring.
//!
//! Telegrams climb `netdev → L3 → L4 → L7` and descend the same way in
//! reverse. Each layer owns a bounded mailbox; a full mailbox drops the
//! telegram (the peer retransmits or times out). The [`Stack`] drives
//! all layers from a single `poll`, so the device object model stays
//! single-writer.

pub mod l3;
pub mod l4;
pub mod l7;
pub mod stack;

use thiserror::Error;

pub use stack::Stack;

use crate::drivers::DriverError;
use crate::proto::addr::Addr;
use crate::proto::telegram::Telegram;

/// Capacity of the per-layer mailboxes.
pub const MAILBOX_SIZE: usize = 8;

/// Errors on the interface boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NetifError {
	#[error("not a valid telegram")]
	InvalidTelegram,
	#[error("no interface with a matching address")]
	NoInterface,
	#[error("link driver rejected the frame")]
	Link(#[from] DriverError),
}

/// A generic KNX frame device, as the network layer sees it.
pub trait Netif {
	/// The physical address configured on this interface.
	fn address(&self) -> Addr;

	/// Takes the next validated inbound telegram.
	fn recv(&mut self) -> Option<Telegram>;

	/// Fills in the checksum and transmits.
	fn send(&mut self, telegram: &mut Telegram) -> Result<(), NetifError>;
}
