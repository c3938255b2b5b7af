//! Device events.
//!
//! The application layer records what bus traffic did to the object
//! model as tagged events; the host drains them through
//! [`Device::next_event`](super::Device::next_event) and reacts (toggle
//! an output, persist memory, restart, take a new address).

use crate::proto::addr::PhysicalAddr;

/// Longest property payload carried inside an event.
pub const EVENT_DATA_MAX: usize = 15;

/// An event raised by the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
	/// A restart service was received.
	Restart,
	/// An authorize request was answered with the given level.
	Authorize { level: u8 },
	/// A communication object was read by the bus.
	ComObjectRead { object: usize },
	/// A communication object received a new value.
	ComObjectWrite { object: usize },
	/// A memory segment was read by the bus.
	MemRead { segment: usize },
	/// A memory segment was written; `segment` indexes
	/// [`Device::segments`](super::Device::segments).
	MemWrite { segment: usize },
	/// A property was read.
	PropRead { object: u8, id: u8, count: u8, start: u16 },
	/// A property was written.
	PropWrite {
		object: u8,
		id: u8,
		count: u8,
		start: u16,
		data: heapless::Vec<u8, EVENT_DATA_MAX>,
	},
	/// An individual address write asks the device to take a new
	/// address.
	SetAddress { address: PhysicalAddr },
}
