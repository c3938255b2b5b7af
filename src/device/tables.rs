//! Memory-mapped configuration tables.
//!
//! An engineering tool downloads the device configuration as raw bytes
//! into well-known memory locations. These views interpret segment
//! bytes in place; the runtime structures (associations, com-object
//! attributes) are rebuilt from them after a download.

use zerocopy::byteorder::big_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::proto::addr::Addr;

/// Entry capacity of the downloadable tables.
pub const TABLE_MAX_ENTRIES: usize = 255;

/// Device-control bit: echo written memory in a response.
pub const DEVICE_CONTROL_VERIFY_MODE: u8 = 0x04;

/// The device info table: identification and mode bits.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct DeviceTable {
	/// Non-zero while the device accepts address programming.
	pub programming_mode: u8,
	pub serial: [u8; 6],
	pub manufacturer_id: U16,
	pub hardware_type: [u8; 6],
	pub order_info: [u8; 10],
	pub device_control: u8,
}

impl DeviceTable {
	pub fn parse(bytes: &[u8]) -> Option<&DeviceTable> {
		DeviceTable::ref_from_prefix(bytes).ok().map(|(table, _)| table)
	}

	pub fn parse_mut(bytes: &mut [u8]) -> Option<&mut DeviceTable> {
		DeviceTable::mut_from_prefix(bytes).ok().map(|(table, _)| table)
	}
}

/// The group address table. Addresses are stored in network order and
/// referenced by 1-based index from the association table.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct AddrTable {
	pub count: u8,
	pub reserved: [u8; 2],
	pub addrs: [U16; TABLE_MAX_ENTRIES],
}

impl AddrTable {
	pub fn parse(bytes: &[u8]) -> Option<&AddrTable> {
		AddrTable::ref_from_prefix(bytes).ok().map(|(table, _)| table)
	}

	pub fn parse_mut(bytes: &mut [u8]) -> Option<&mut AddrTable> {
		AddrTable::mut_from_prefix(bytes).ok().map(|(table, _)| table)
	}

	/// Returns the address at the given 1-based index.
	pub fn get(&self, index: u8) -> Option<Addr> {
		let index = usize::from(index.checked_sub(1)?);
		self.addrs.get(index).map(|raw| Addr::new(raw.get()))
	}
}

/// One association table entry: a 1-based address index and a 0-based
/// communication object index.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct AssocEntry {
	pub addr_index: u8,
	pub com_object_index: u8,
}

/// The association table as downloaded.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct AssocTable {
	pub count: u8,
	pub entries: [AssocEntry; TABLE_MAX_ENTRIES],
}

impl AssocTable {
	pub fn parse(bytes: &[u8]) -> Option<&AssocTable> {
		AssocTable::ref_from_prefix(bytes).ok().map(|(table, _)| table)
	}

	pub fn parse_mut(bytes: &mut [u8]) -> Option<&mut AssocTable> {
		AssocTable::mut_from_prefix(bytes).ok().map(|(table, _)| table)
	}
}

/// One com-object table entry: access flags and the value type.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ComObjectEntry {
	pub reserved: [u8; 2],
	pub flags: u8,
	pub ty: u8,
}

/// The com-object attribute table as downloaded.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ComObjectTable {
	pub reserved: [u8; 3],
	pub objects: [ComObjectEntry; TABLE_MAX_ENTRIES],
}

impl ComObjectTable {
	pub fn parse(bytes: &[u8]) -> Option<&ComObjectTable> {
		ComObjectTable::ref_from_prefix(bytes)
			.ok()
			.map(|(table, _)| table)
	}

	pub fn parse_mut(bytes: &mut [u8]) -> Option<&mut ComObjectTable> {
		ComObjectTable::mut_from_prefix(bytes)
			.ok()
			.map(|(table, _)| table)
	}
}

/// Load states of the downloadable tables.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct LoadStateTable {
	pub addr_table: u8,
	pub assoc_table: u8,
	pub com_object_table: u8,
	pub pei_prog: u8,
}
