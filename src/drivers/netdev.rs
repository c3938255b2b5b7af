//! Netdev adaptor: presents a link driver as a generic frame device.
//!
//! Receive returns only validated telegrams (shape bounds and XOR
//! checksum); send stamps the checksum before handing the bytes to the
//! driver. Link events that do not carry telegrams (state indications,
//! SAVE) are parked in a small queue for the host to inspect.

use log::debug;

use super::{LinkDriver, LinkEvent};
use crate::net::{Netif, NetifError};
use crate::proto::addr::{Addr, PhysicalAddr};
use crate::proto::telegram::Telegram;
use crate::synch::Mailbox;

/// Capacity of the bus event queue.
const BUS_EVENT_QUEUE_SIZE: usize = 4;

/// A KNX network interface on top of a transceiver driver.
pub struct KnxNetdev<D> {
	driver: D,
	address: Addr,
	bus_events: Mailbox<LinkEvent, BUS_EVENT_QUEUE_SIZE>,
}

impl<D: LinkDriver> KnxNetdev<D> {
	pub fn new(driver: D) -> KnxNetdev<D> {
		KnxNetdev {
			driver,
			address: Addr::UNDEFINED,
			bus_events: Mailbox::new(),
		}
	}

	/// Programs the interface address into the transceiver and keeps
	/// it for the network layer.
	pub fn set_address(&mut self, address: PhysicalAddr) -> Result<(), NetifError> {
		self.driver.set_address(address.into())?;
		self.address = address.into();

		Ok(())
	}

	pub fn driver(&self) -> &D {
		&self.driver
	}

	/// Takes the next non-telegram bus event (state indication, SAVE).
	pub fn take_bus_event(&mut self) -> Option<LinkEvent> {
		self.bus_events.pop()
	}
}

impl<D: LinkDriver> Netif for KnxNetdev<D> {
	fn address(&self) -> Addr {
		self.address
	}

	fn recv(&mut self) -> Option<Telegram> {
		while let Some(event) = self.driver.take_event() {
			match event {
				LinkEvent::Telegram => {
					let Some(telegram) = self.driver.take_telegram() else {
						continue;
					};

					if !telegram.is_valid() {
						debug!("invalid or incomplete telegram");
						continue;
					}

					if !telegram.is_checksum_valid() {
						debug!("telegram checksum mismatch");
						continue;
					}

					return Some(telegram);
				}
				LinkEvent::TelegramIncomplete => {
					debug!("incomplete telegram");
				}
				event => {
					if self.bus_events.push(event).is_err() {
						debug!("bus event queue full, event dropped");
					}
				}
			}
		}

		None
	}

	fn send(&mut self, telegram: &mut Telegram) -> Result<(), NetifError> {
		telegram.update_checksum();
		self.driver.send(telegram.as_slice())?;

		Ok(())
	}
}
