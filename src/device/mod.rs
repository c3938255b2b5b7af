//! The System 7 device object model.
//!
//! A [`Device`] aggregates everything the application layer operates
//! on: the physical address and mask version, memory segments (with the
//! memory-mapped configuration tables inside them), interface object
//! properties, communication objects and the group-address association
//! set. All structures are created at configuration time and live for
//! the lifetime of the stack; the association set is rebuilt whenever a
//! downloader writes the address or association tables.

pub mod assoc;
pub mod com_object;
pub mod events;
pub mod memory;
pub mod property;
pub mod tables;

use alloc::boxed::Box;
use alloc::vec::Vec;

use log::warn;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::proto::addr::PhysicalAddr;
use crate::synch::mailbox::Mailbox;
use assoc::Associations;
use com_object::ComObject;
use events::DeviceEvent;
use memory::MemorySegment;
use property::PropertyObject;
use tables::{AddrTable, AssocTable, ComObjectTable, DeviceTable};

/// Errors reported by the object-model accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ObjectError {
	#[error("destination buffer too small")]
	BufferTooSmall,
	#[error("value not writable")]
	NotWritable,
	#[error("value not readable")]
	NotReadable,
	#[error("access outside the stored value")]
	OutOfRange,
}

/// Value storage for communication objects and properties: small
/// values inline, larger ones in an owned buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
	Inline([u8; 4]),
	Buffer(Box<[u8]>),
}

impl Value {
	/// Storage sized and zeroed for `size` bytes.
	pub fn zeroed(size: usize) -> Value {
		if size <= 4 {
			Value::Inline([0; 4])
		} else {
			Value::Buffer(vec![0; size].into_boxed_slice())
		}
	}

	pub fn from_bytes(bytes: &[u8]) -> Value {
		let mut value = Value::zeroed(bytes.len());

		if let Ok(dst) = value.bytes_mut(bytes.len()) {
			dst.copy_from_slice(bytes);
		}

		value
	}

	pub fn bytes(&self, size: usize) -> Result<&[u8], ObjectError> {
		match self {
			Value::Inline(inline) => inline.get(..size).ok_or(ObjectError::OutOfRange),
			Value::Buffer(buffer) => buffer.get(..size).ok_or(ObjectError::OutOfRange),
		}
	}

	pub fn bytes_mut(&mut self, size: usize) -> Result<&mut [u8], ObjectError> {
		match self {
			Value::Inline(inline) => inline.get_mut(..size).ok_or(ObjectError::OutOfRange),
			Value::Buffer(buffer) => buffer.get_mut(..size).ok_or(ObjectError::OutOfRange),
		}
	}

	fn range(&self, start: usize, len: usize) -> Result<&[u8], ObjectError> {
		let bytes: &[u8] = match self {
			Value::Inline(inline) => inline,
			Value::Buffer(buffer) => buffer,
		};

		bytes
			.get(start..start + len)
			.ok_or(ObjectError::OutOfRange)
	}

	fn range_mut(&mut self, start: usize, len: usize) -> Result<&mut [u8], ObjectError> {
		let bytes: &mut [u8] = match self {
			Value::Inline(inline) => inline,
			Value::Buffer(buffer) => buffer,
		};

		bytes
			.get_mut(start..start + len)
			.ok_or(ObjectError::OutOfRange)
	}
}

/// Device descriptor (mask) versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum MaskVersion {
	/// System 1.
	Mask0012 = 0x0012,
	/// System 2.
	Mask0021 = 0x0021,
	/// System 7, TP.
	Mask0701 = 0x0701,
	/// System 7, TP, with extended memory services.
	Mask0705 = 0x0705,
	/// System B, TP.
	Mask07B0 = 0x07b0,
	/// System 7, KNXnet/IP.
	Mask5705 = 0x5705,
}

/// Capacity of the device event queue.
const EVENT_QUEUE_SIZE: usize = 16;

/// A System 7 KNX device.
pub struct Device {
	pub address: PhysicalAddr,
	pub mask_version: MaskVersion,

	pub segments: Vec<MemorySegment>,
	pub objects: Vec<PropertyObject>,
	pub com_objects: Vec<ComObject>,
	pub associations: Associations,

	info_segment: Option<usize>,
	addr_table_segment: Option<usize>,
	assoc_table_segment: Option<usize>,
	com_object_table_segment: Option<usize>,
	association_limit: usize,

	events: Mailbox<DeviceEvent, EVENT_QUEUE_SIZE>,
}

impl Device {
	pub fn new(address: PhysicalAddr) -> Device {
		Device {
			address,
			mask_version: MaskVersion::Mask0705,
			segments: Vec::new(),
			objects: Vec::new(),
			com_objects: Vec::new(),
			associations: Associations::default(),
			info_segment: None,
			addr_table_segment: None,
			assoc_table_segment: None,
			com_object_table_segment: None,
			association_limit: tables::TABLE_MAX_ENTRIES,
			events: Mailbox::new(),
		}
	}

	/// Registers a memory segment and returns its index.
	pub fn add_segment(&mut self, segment: MemorySegment) -> usize {
		self.segments.push(segment);
		self.segments.len() - 1
	}

	/// Marks the segment holding the device info table.
	pub fn set_info_segment(&mut self, segment: usize) {
		self.info_segment = Some(segment);
	}

	/// Marks the segments holding the downloadable tables, so writes to
	/// them rebuild the runtime structures.
	pub fn set_table_segments(
		&mut self,
		addr_table: Option<usize>,
		assoc_table: Option<usize>,
		com_object_table: Option<usize>,
	) {
		self.addr_table_segment = addr_table;
		self.assoc_table_segment = assoc_table;
		self.com_object_table_segment = com_object_table;
	}

	/// Caps the number of runtime associations.
	pub fn set_association_limit(&mut self, limit: usize) {
		self.association_limit = limit;
	}

	pub fn info(&self) -> Option<&DeviceTable> {
		let segment = self.segments.get(self.info_segment?)?;
		DeviceTable::parse(segment.bytes())
	}

	pub fn info_mut(&mut self) -> Option<&mut DeviceTable> {
		let segment = self.segments.get_mut(self.info_segment?)?;
		DeviceTable::parse_mut(segment.bytes_mut())
	}

	pub fn programming_mode(&self) -> bool {
		self.info().map(|info| info.programming_mode != 0).unwrap_or(false)
	}

	pub fn set_programming_mode(&mut self, enabled: bool) {
		if let Some(info) = self.info_mut() {
			info.programming_mode = enabled as u8;
		}
	}

	pub fn serial(&self) -> Option<[u8; 6]> {
		self.info().map(|info| info.serial)
	}

	pub fn device_control(&self) -> u8 {
		self.info().map(|info| info.device_control).unwrap_or(0)
	}

	/// Index of the segment that entirely contains `[addr, addr + size)`.
	pub fn memory_find(&self, addr: u16, size: u16) -> Option<usize> {
		self.segments
			.iter()
			.position(|segment| segment.contains(addr, size))
	}

	/// Rebuilds the association set from the address and association
	/// tables.
	pub fn refresh_associations(&mut self) {
		let (Some(addr_index), Some(assoc_index)) =
			(self.addr_table_segment, self.assoc_table_segment)
		else {
			return;
		};

		let Some(addr_table) = self
			.segments
			.get(addr_index)
			.and_then(|segment| AddrTable::parse(segment.bytes()))
		else {
			warn!("address table segment too small, not rebuilding");
			return;
		};

		let Some(assoc_table) = self
			.segments
			.get(assoc_index)
			.and_then(|segment| AssocTable::parse(segment.bytes()))
		else {
			warn!("association table segment too small, not rebuilding");
			return;
		};

		self.associations
			.update(assoc_table, addr_table, self.association_limit);
	}

	/// Rebuilds the communication object attributes from the com-object
	/// table.
	pub fn refresh_com_objects(&mut self) {
		let Some(index) = self.com_object_table_segment else {
			return;
		};

		let Some(table) = self
			.segments
			.get(index)
			.and_then(|segment| ComObjectTable::parse(segment.bytes()))
		else {
			warn!("com-object table segment too small, not rebuilding");
			return;
		};

		com_object::update_from_table(&mut self.com_objects, table);
	}

	/// Called after a downloader wrote a memory segment; rebuilds the
	/// runtime structures backed by that segment.
	pub fn memory_written(&mut self, segment: usize) {
		if self.addr_table_segment == Some(segment) || self.assoc_table_segment == Some(segment) {
			self.refresh_associations();
		}

		if self.com_object_table_segment == Some(segment) {
			self.refresh_com_objects();
		}
	}

	pub(crate) fn push_event(&mut self, event: DeviceEvent) {
		if self.events.push(event).is_err() {
			warn!("device event queue full, event dropped");
		}
	}

	/// Takes the next pending device event, if any.
	pub fn next_event(&mut self) -> Option<DeviceEvent> {
		self.events.pop()
	}
}
