//! Interface object properties.
//!
//! Properties are grouped into interface objects, addressed by ordinal
//! index; a property within an object is addressed by its id or by
//! index. Each property has a type from a closed 64-value enum with a
//! fixed element size; array properties hold `total size / element
//! size` elements. Element positions on the wire are 1-based; position
//! 0 asks for the element count.

use alloc::vec::Vec;

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{ObjectError, Value};

/// Well-known property ids of the device and load-control interface
/// objects.
pub mod pid {
	pub const OBJECT_TYPE: u8 = 1;
	pub const OBJECT_NAME: u8 = 2;
	pub const LOAD_STATE_CONTROL: u8 = 5;
	pub const RUN_STATE_CONTROL: u8 = 6;
	pub const TABLE_REFERENCE: u8 = 7;
	pub const SERVICE_CONTROL: u8 = 8;
	pub const FIRMWARE_REVISION: u8 = 9;
	pub const SERIAL_NUMBER: u8 = 11;
	pub const MANUFACTURER_ID: u8 = 12;
	pub const PROGRAM_VERSION: u8 = 13;
	pub const DEVICE_CONTROL: u8 = 14;
	pub const ORDER_INFO: u8 = 15;
	pub const PEI_TYPE: u8 = 16;
	pub const PORT_CONFIGURATION: u8 = 17;
	pub const TABLE: u8 = 23;
	pub const VERSION: u8 = 25;
	pub const PROGMODE: u8 = 54;
	pub const MAX_APDU_LENGTH: u8 = 56;
	pub const SUBNET_ADDRESS: u8 = 57;
	pub const DEVICE_ADDRESS: u8 = 58;
	pub const HARDWARE_TYPE: u8 = 78;
}

/// Property value types. The list is closed; each type has a fixed
/// element size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PropertyType {
	/// Write-only trigger; state transitions are delegated to events.
	Control = 0,
	Char = 1,
	UnsignedChar = 2,
	Int = 3,
	UnsignedInt = 4,
	KnxFloat = 5,
	Date = 6,
	Time = 7,
	Long = 8,
	UnsignedLong = 9,
	Float = 10,
	Double = 11,
	CharBlock = 12,
	PollGroupSettings = 13,
	ShortCharBlock = 14,
	DateTime = 15,
	VariableLength = 16,
	Generic1 = 17,
	Generic2 = 18,
	Generic3 = 19,
	Generic4 = 20,
	Generic5 = 21,
	Generic6 = 22,
	Generic7 = 23,
	Generic8 = 24,
	Generic9 = 25,
	Generic10 = 26,
	Generic11 = 27,
	Generic12 = 28,
	Generic13 = 29,
	Generic14 = 30,
	Generic15 = 31,
	Generic16 = 32,
	Generic17 = 33,
	Generic18 = 34,
	Generic19 = 35,
	Generic20 = 36,
	Utf8 = 47,
	Version = 48,
	AlarmInfo = 49,
	BinaryInformation = 50,
	Bitset8 = 51,
	Bitset16 = 52,
	Enum8 = 53,
	Scaling = 54,
	NeVl = 60,
	NeFl = 61,
	Function = 62,
	Escape = 63,
}

impl PropertyType {
	/// Element size in bytes. The variable-length kinds report 255,
	/// matching the KNX descriptor layout.
	pub const fn size(self) -> usize {
		match self {
			PropertyType::Control => 1,
			PropertyType::Char => 1,
			PropertyType::UnsignedChar => 1,
			PropertyType::Int => 2,
			PropertyType::UnsignedInt => 2,
			PropertyType::KnxFloat => 2,
			PropertyType::Date => 3,
			PropertyType::Time => 3,
			PropertyType::Long => 4,
			PropertyType::UnsignedLong => 4,
			PropertyType::Float => 4,
			PropertyType::Double => 8,
			PropertyType::CharBlock => 10,
			PropertyType::PollGroupSettings => 3,
			PropertyType::ShortCharBlock => 5,
			PropertyType::DateTime => 8,
			PropertyType::Generic1 => 1,
			PropertyType::Generic2 => 2,
			PropertyType::Generic3 => 3,
			PropertyType::Generic4 => 4,
			PropertyType::Generic5 => 5,
			PropertyType::Generic6 => 6,
			PropertyType::Generic7 => 7,
			PropertyType::Generic8 => 8,
			PropertyType::Generic9 => 9,
			PropertyType::Generic10 => 10,
			PropertyType::Generic11 => 11,
			PropertyType::Generic12 => 12,
			PropertyType::Generic13 => 13,
			PropertyType::Generic14 => 14,
			PropertyType::Generic15 => 15,
			PropertyType::Generic16 => 16,
			PropertyType::Generic17 => 17,
			PropertyType::Generic18 => 18,
			PropertyType::Generic19 => 19,
			PropertyType::Generic20 => 20,
			PropertyType::Version => 2,
			PropertyType::AlarmInfo => 6,
			PropertyType::BinaryInformation => 1,
			PropertyType::Bitset8 => 1,
			PropertyType::Bitset16 => 2,
			PropertyType::Enum8 => 1,
			PropertyType::Scaling => 1,
			PropertyType::VariableLength
			| PropertyType::Utf8
			| PropertyType::NeVl
			| PropertyType::NeFl
			| PropertyType::Function
			| PropertyType::Escape => 255,
		}
	}
}

bitflags! {
	/// Property attribute flags.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct PropertyFlags: u8 {
		/// More than one element.
		const ARRAY = 0x02;
		/// Writable from the bus.
		const WRITABLE = 0x04;
		/// Changed since the last snapshot.
		const MODIFIED = 0x10;
	}
}

/// A single property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
	pub id: u8,
	pub ty: PropertyType,
	/// Total size of the stored value in bytes.
	pub size: u8,
	pub flags: PropertyFlags,
	value: Value,
}

impl Property {
	/// A zero-valued property of `size` total bytes.
	pub fn new(id: u8, ty: PropertyType, flags: PropertyFlags, size: u8) -> Property {
		Property {
			id,
			ty,
			size,
			flags,
			value: Value::zeroed(size as usize),
		}
	}

	/// A property initialised from `bytes`.
	pub fn with_value(id: u8, ty: PropertyType, flags: PropertyFlags, bytes: &[u8]) -> Property {
		Property {
			id,
			ty,
			size: bytes.len() as u8,
			flags,
			value: Value::from_bytes(bytes),
		}
	}

	/// Element size in bytes. The variable-length kinds report their
	/// total size, so they behave as a single element.
	pub fn element_size(&self) -> usize {
		match self.ty.size() {
			255 => self.size as usize,
			size => size,
		}
	}

	/// Number of elements: `total size / element size` for arrays,
	/// one otherwise.
	pub fn elements(&self) -> usize {
		if self.flags.contains(PropertyFlags::ARRAY) {
			(self.size as usize) / self.element_size().max(1)
		} else {
			1
		}
	}

	/// Reads `count` elements beginning at the 1-based position
	/// `start` into `buf`; returns the number of bytes moved.
	pub fn read(&self, count: u8, start: u16, buf: &mut [u8]) -> Result<usize, ObjectError> {
		let size = self.element_size();
		let len = count as usize * size;

		if buf.len() < len {
			return Err(ObjectError::BufferTooSmall);
		}

		let start = usize::from(start.checked_sub(1).ok_or(ObjectError::OutOfRange)?);

		buf[..len].copy_from_slice(self.value.range(start * size, len)?);

		Ok(len)
	}

	/// Writes `count` elements beginning at the 1-based position
	/// `start`; returns the number of bytes moved.
	///
	/// Writes to control properties succeed without storing anything;
	/// they are state transitions handled through events.
	pub fn write(&mut self, count: u8, start: u16, data: &[u8]) -> Result<usize, ObjectError> {
		let size = self.element_size();
		let len = count as usize * size;

		if data.len() < len {
			return Err(ObjectError::BufferTooSmall);
		}

		if !self.flags.contains(PropertyFlags::WRITABLE) {
			return Err(ObjectError::NotWritable);
		}

		if self.ty == PropertyType::Control {
			return Ok(0);
		}

		let start = usize::from(start.checked_sub(1).ok_or(ObjectError::OutOfRange)?);

		self.value
			.range_mut(start * size, len)?
			.copy_from_slice(&data[..len]);
		self.flags.insert(PropertyFlags::MODIFIED);

		Ok(len)
	}
}

/// An interface object: an ordered collection of properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyObject {
	pub properties: Vec<Property>,
}

impl PropertyObject {
	pub fn new(properties: Vec<Property>) -> PropertyObject {
		PropertyObject { properties }
	}
}

/// Finds a property by interface object ordinal and property id.
pub fn find_by_id(objects: &[PropertyObject], object: u8, id: u8) -> Option<&Property> {
	objects
		.get(object as usize)?
		.properties
		.iter()
		.find(|property| property.id == id)
}

pub fn find_by_id_mut(objects: &mut [PropertyObject], object: u8, id: u8) -> Option<&mut Property> {
	objects
		.get_mut(object as usize)?
		.properties
		.iter_mut()
		.find(|property| property.id == id)
}

/// Finds a property by interface object ordinal and property index.
pub fn find_by_index(objects: &[PropertyObject], object: u8, index: u8) -> Option<&Property> {
	objects.get(object as usize)?.properties.get(index as usize)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn serial() -> Property {
		Property::with_value(
			pid::SERIAL_NUMBER,
			PropertyType::Generic6,
			PropertyFlags::empty(),
			&[0x06, 0x05, 0x04, 0x03, 0x02, 0x01],
		)
	}

	#[test]
	fn read_single_element() {
		let mut buf = [0; 6];

		assert_eq!(serial().read(1, 1, &mut buf), Ok(6));
		assert_eq!(buf, [0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
	}

	#[test]
	fn read_rejects_position_zero() {
		let mut buf = [0; 6];

		assert_eq!(serial().read(1, 0, &mut buf), Err(ObjectError::OutOfRange));
	}

	#[test]
	fn write_requires_flag() {
		let mut property = serial();

		assert_eq!(
			property.write(1, 1, &[0; 6]),
			Err(ObjectError::NotWritable)
		);
	}

	#[test]
	fn write_read_back() {
		let mut property = Property::new(
			pid::PROGMODE,
			PropertyType::UnsignedChar,
			PropertyFlags::WRITABLE,
			1,
		);

		assert_eq!(property.write(1, 1, &[0x01]), Ok(1));
		assert!(property.flags.contains(PropertyFlags::MODIFIED));

		let mut buf = [0; 1];
		assert_eq!(property.read(1, 1, &mut buf), Ok(1));
		assert_eq!(buf[0], 0x01);
	}

	#[test]
	fn control_write_is_a_no_op() {
		let mut property = Property::with_value(
			pid::LOAD_STATE_CONTROL,
			PropertyType::Control,
			PropertyFlags::WRITABLE,
			&[0x02],
		);

		assert_eq!(property.write(1, 1, &[0x07]), Ok(0));

		let mut buf = [0; 1];
		assert_eq!(property.read(1, 1, &mut buf), Ok(1));
		assert_eq!(buf[0], 0x02);
	}

	#[test]
	fn array_elements() {
		let property = Property::new(
			pid::TABLE,
			PropertyType::UnsignedInt,
			PropertyFlags::ARRAY,
			10,
		);

		assert_eq!(property.elements(), 5);

		let mut buf = [0; 4];
		assert_eq!(property.read(2, 4, &mut buf), Ok(4));
		assert_eq!(property.read(2, 5, &mut buf), Err(ObjectError::OutOfRange));
	}
}
