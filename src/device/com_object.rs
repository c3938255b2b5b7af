//! Communication objects.
//!
//! A communication object is a typed value exchanged over group
//! addresses. Sixteen fixed sizes exist, from a single bit up to 14
//! bytes, plus a variable-length case. Sub-byte values occupy a whole
//! byte at rest; on the wire they ride in the low six bits of the
//! merged APCI byte.

use bitflags::bitflags;
use log::warn;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::tables::ComObjectTable;
use super::{ObjectError, Value};
use crate::proto::telegram::Priority;

/// Communication object value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ComObjectType {
	Bit1 = 0,
	Bit2 = 1,
	Bit3 = 2,
	Bit4 = 3,
	Bit5 = 4,
	Bit6 = 5,
	Bit7 = 6,
	Byte1 = 7,
	Byte2 = 8,
	Byte3 = 9,
	/// 4 bytes, also used for floats.
	Byte4 = 10,
	Data6 = 11,
	/// 8 bytes, also used for doubles.
	Data8 = 12,
	Data10 = 13,
	MaxData = 14,
	/// Variable length, 1..14 bytes.
	VarData = 15,
}

impl ComObjectType {
	pub const FLOAT: ComObjectType = ComObjectType::Byte4;
	pub const DOUBLE: ComObjectType = ComObjectType::Data8;

	/// Payload size in bytes; zero for sub-byte types, which travel in
	/// the merged APCI byte.
	pub const fn size(self) -> usize {
		match self {
			ComObjectType::Bit1
			| ComObjectType::Bit2
			| ComObjectType::Bit3
			| ComObjectType::Bit4
			| ComObjectType::Bit5
			| ComObjectType::Bit6 => 0,
			ComObjectType::Bit7 | ComObjectType::Byte1 => 1,
			ComObjectType::Byte2 => 2,
			ComObjectType::Byte3 => 3,
			ComObjectType::Byte4 => 4,
			ComObjectType::Data6 => 6,
			ComObjectType::Data8 => 8,
			ComObjectType::Data10 => 10,
			ComObjectType::MaxData => 14,
			ComObjectType::VarData => 15,
		}
	}
}

bitflags! {
	/// Access bits of a communication object.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct Access: u8 {
		/// Communication enabled.
		const ENABLED = 0x04;
		/// Read enabled.
		const READ = 0x08;
		/// Write enabled.
		const WRITE = 0x10;
		/// Transmit enabled.
		const TRANSMIT = 0x40;
		/// Update enabled.
		const UPDATE = 0x80;
	}
}

/// A communication object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComObject {
	pub ty: ComObjectType,
	pub priority: Priority,
	pub access: Access,
	value: Value,
}

impl ComObject {
	/// A zero-valued object with inline storage if the type fits.
	pub fn new(ty: ComObjectType, priority: Priority, access: Access) -> ComObject {
		ComObject {
			ty,
			priority,
			access,
			value: Value::zeroed(stored_size(ty)),
		}
	}

	/// An object whose value lives in the given buffer.
	pub fn with_value(ty: ComObjectType, priority: Priority, access: Access, bytes: &[u8]) -> ComObject {
		ComObject {
			ty,
			priority,
			access,
			value: Value::from_bytes(bytes),
		}
	}

	/// Payload size in bytes (zero for sub-byte types).
	pub fn size(&self) -> usize {
		self.ty.size()
	}

	/// Copies the stored value into `buf` and returns the number of
	/// bytes moved. Sub-byte values occupy one byte.
	pub fn read(&self, buf: &mut [u8]) -> Result<usize, ObjectError> {
		let size = stored_size(self.ty);

		if buf.len() < size {
			return Err(ObjectError::BufferTooSmall);
		}

		buf[..size].copy_from_slice(self.value.bytes(size)?);

		Ok(size)
	}

	/// Replaces the stored value from `buf` and returns the number of
	/// bytes moved.
	pub fn write(&mut self, buf: &[u8]) -> Result<usize, ObjectError> {
		let size = stored_size(self.ty);

		if buf.len() < size {
			return Err(ObjectError::BufferTooSmall);
		}

		self.value.bytes_mut(size)?.copy_from_slice(&buf[..size]);

		Ok(size)
	}
}

/// Bit-sized values take up a whole byte at rest.
fn stored_size(ty: ComObjectType) -> usize {
	ty.size().max(1)
}

/// Reapplies the attributes from a downloaded com-object table:
/// access bits from the high six flag bits, priority from the low two,
/// the value type from the type byte.
pub fn update_from_table(objects: &mut [ComObject], table: &ComObjectTable) {
	for (index, (object, entry)) in objects.iter_mut().zip(table.objects.iter()).enumerate() {
		let Ok(ty) = ComObjectType::try_from(entry.ty) else {
			warn!("com-object {index}: unknown type {:#04x}, skipping", entry.ty);
			continue;
		};

		object.access = Access::from_bits_truncate(entry.flags & 0xfc);
		object.priority = Priority::try_from(entry.flags & 0x03).unwrap_or(Priority::Low);
		object.ty = ty;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sub_byte_is_stored_as_byte() {
		let mut object = ComObject::new(ComObjectType::Bit1, Priority::Low, Access::all());

		assert_eq!(object.size(), 0);
		assert_eq!(object.write(&[0x01]), Ok(1));

		let mut buf = [0; 1];
		assert_eq!(object.read(&mut buf), Ok(1));
		assert_eq!(buf[0], 0x01);
	}

	#[test]
	fn read_into_short_buffer() {
		let object = ComObject::new(ComObjectType::Byte4, Priority::Low, Access::all());
		let mut buf = [0; 2];

		assert_eq!(object.read(&mut buf), Err(ObjectError::BufferTooSmall));
	}

	#[test]
	fn large_value_round_trip() {
		let bytes = *b"hello, bus345!";
		let mut object =
			ComObject::with_value(ComObjectType::MaxData, Priority::Low, Access::all(), &bytes);

		let mut buf = [0; 14];
		assert_eq!(object.read(&mut buf), Ok(14));
		assert_eq!(buf, bytes);

		assert_eq!(object.write(&[0xab; 14]), Ok(14));
		assert_eq!(object.read(&mut buf), Ok(14));
		assert_eq!(buf, [0xab; 14]);
	}
}
