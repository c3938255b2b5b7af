//! Stack wiring.
//!
//! The [`Stack`] owns the interfaces, the transport session and the
//! device object model, and pumps telegrams through the layers from a
//! single `poll`. Outbound telegrams (transport acknowledgements
//! first, then application responses) pass the transport gate, get
//! dispatched by source address and leave through the matching
//! interface.

use alloc::boxed::Box;
use alloc::vec::Vec;

use log::{debug, warn};

use super::l4::{Connection, TransportLayer};
use super::{l3, l7, Netif, MAILBOX_SIZE};
use crate::device::Device;
use crate::proto::telegram::Telegram;
use crate::synch::Mailbox;
use crate::time::Clock;

/// A complete KNX device stack.
pub struct Stack<C> {
	ifaces: Vec<Box<dyn Netif>>,
	transport: TransportLayer<C>,
	device: Device,
	tx: Mailbox<Telegram, MAILBOX_SIZE>,
}

impl<C: Clock> Stack<C> {
	pub fn new(device: Device, clock: C) -> Stack<C> {
		Stack {
			ifaces: Vec::new(),
			transport: TransportLayer::new(clock),
			device,
			tx: Mailbox::new(),
		}
	}

	/// Attaches a network interface.
	pub fn add_interface(&mut self, iface: Box<dyn Netif>) {
		self.ifaces.push(iface);
	}

	pub fn device(&self) -> &Device {
		&self.device
	}

	pub fn device_mut(&mut self) -> &mut Device {
		&mut self.device
	}

	pub fn connection(&self) -> &Connection {
		self.transport.connection()
	}

	/// Drains the interfaces and runs every received telegram through
	/// the layers, then flushes queued responses.
	pub fn poll(&mut self) {
		let mut rx: Mailbox<Telegram, MAILBOX_SIZE> = Mailbox::new();

		for iface in self.ifaces.iter_mut() {
			while let Some(telegram) = iface.recv() {
				if rx.push(telegram).is_err() {
					warn!("receive mailbox full, telegram dropped");
					break;
				}
			}
		}

		while let Some(telegram) = rx.pop() {
			self.process(telegram);
		}

		self.flush();
	}

	/// Runs a single telegram through L3, L4 and L7. Exposed for
	/// hosts that feed telegrams from their own receive path.
	pub fn process(&mut self, telegram: Telegram) {
		if !l3::admit(&self.ifaces, &telegram) {
			return;
		}

		let outcome = self.transport.receive(&telegram);

		// the acknowledgement leaves before any response
		if let Some(reply) = outcome.reply {
			push_tx(&mut self.tx, reply);
		}

		if outcome.deliver {
			let Stack { device, tx, .. } = self;

			l7::handle(device, &telegram, &mut |response| push_tx(tx, response));
		}

		self.flush();
	}

	/// Queues an outbound telegram built by the host.
	pub fn send(&mut self, telegram: Telegram) {
		push_tx(&mut self.tx, telegram);
		self.flush();
	}

	/// Publishes the current value of a communication object to all
	/// its group addresses.
	pub fn update_com_object(&mut self, index: usize) {
		let Stack { device, tx, .. } = self;

		l7::update_com_object(device, index, &mut |telegram| push_tx(tx, telegram));

		self.flush();
	}

	fn flush(&mut self) {
		while let Some(mut telegram) = self.tx.pop() {
			if !self.transport.send(&mut telegram) {
				continue;
			}

			if let Err(error) = l3::dispatch(&mut self.ifaces, &mut telegram) {
				debug!("unable to send telegram: {error}");
			}
		}
	}
}

fn push_tx(tx: &mut Mailbox<Telegram, MAILBOX_SIZE>, telegram: Telegram) {
	if tx.push(telegram).is_err() {
		warn!("transmit mailbox full, telegram dropped");
	}
}
