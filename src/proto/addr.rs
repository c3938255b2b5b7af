//! KNX bus addresses.
//!
//! A KNX address is a 16-bit value with two interpretations: a physical
//! (individual) address `area.line.device` with 4/4/8 bits, or a group
//! address, written either `main/mid/sub` (5/3/8 bits) or `main/sub`
//! (5/11 bits). On the wire both travel in network byte order.

use core::fmt;
use core::str::FromStr;

use thiserror::Error;

/// Maximum length of a formatted address, including the terminator
/// conventions of the original tables (`15.15.255` and `31/7/255`).
pub const ADDR_MAX_STR_LEN: usize = 9;

#[derive(Debug, PartialEq, Eq, Error)]
pub enum AddrError {
	/// A component exceeds its field width.
	#[error("address component out of range")]
	Component,
	/// The textual form does not match the expected shape.
	#[error("malformed address string")]
	Syntax,
}

/// A raw 16-bit bus address, uninterpreted.
///
/// Ordering and equality are by numeric value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Addr(u16);

impl Addr {
	/// All devices on the line listen to this address.
	pub const BROADCAST: Addr = Addr(0x0000);
	/// Marks an unconfigured address slot.
	pub const UNDEFINED: Addr = Addr(0xffff);

	pub const fn new(raw: u16) -> Addr {
		Addr(raw)
	}

	pub const fn raw(self) -> u16 {
		self.0
	}

	/// Reads an address from its two wire bytes (network order).
	pub const fn from_be_bytes(bytes: [u8; 2]) -> Addr {
		Addr(u16::from_be_bytes(bytes))
	}

	/// Returns the two wire bytes (network order).
	pub const fn to_be_bytes(self) -> [u8; 2] {
		self.0.to_be_bytes()
	}

	/// Signed numeric difference, matching the sort order of the
	/// association table.
	pub const fn compare(self, other: Addr) -> i32 {
		self.0 as i32 - other.0 as i32
	}
}

impl From<u16> for Addr {
	fn from(raw: u16) -> Addr {
		Addr(raw)
	}
}

impl From<Addr> for u16 {
	fn from(addr: Addr) -> u16 {
		addr.0
	}
}

/// A physical (individual) device address, `area.line.device`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysicalAddr(u16);

impl PhysicalAddr {
	/// Builds a physical address from its components.
	///
	/// Returns `None` when `area` or `line` exceed their 4-bit fields.
	pub const fn new(area: u8, line: u8, device: u8) -> Option<PhysicalAddr> {
		if area >= 16 || line >= 16 {
			return None;
		}

		Some(PhysicalAddr(
			((area as u16 & 0xf) << 12) | ((line as u16 & 0xf) << 8) | device as u16,
		))
	}

	pub const fn area(self) -> u8 {
		((self.0 >> 12) & 0xf) as u8
	}

	pub const fn line(self) -> u8 {
		((self.0 >> 8) & 0xf) as u8
	}

	pub const fn device(self) -> u8 {
		(self.0 & 0xff) as u8
	}

	pub const fn addr(self) -> Addr {
		Addr(self.0)
	}
}

impl From<Addr> for PhysicalAddr {
	fn from(addr: Addr) -> PhysicalAddr {
		PhysicalAddr(addr.0)
	}
}

impl From<PhysicalAddr> for Addr {
	fn from(addr: PhysicalAddr) -> Addr {
		Addr(addr.0)
	}
}

impl fmt::Display for PhysicalAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}.{}", self.area(), self.line(), self.device())
	}
}

impl FromStr for PhysicalAddr {
	type Err = AddrError;

	fn from_str(s: &str) -> Result<PhysicalAddr, AddrError> {
		let mut parts = s.splitn(3, '.');

		let area = next_component(&mut parts)?;
		let line = next_component(&mut parts)?;
		let device = next_component(&mut parts)?;

		PhysicalAddr::new(area, line, device).ok_or(AddrError::Component)
	}
}

/// A group address, `main/mid/sub` (or `main/sub` in the two-level
/// scheme).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupAddr(u16);

impl GroupAddr {
	/// Builds a three-level group address.
	///
	/// Returns `None` when `main` or `mid` exceed their fields.
	pub const fn new(main: u8, mid: u8, sub: u8) -> Option<GroupAddr> {
		if main >= 32 || mid >= 8 {
			return None;
		}

		Some(GroupAddr(
			((main as u16 & 0x1f) << 11) | ((mid as u16 & 0x7) << 8) | sub as u16,
		))
	}

	/// Builds a two-level group address.
	///
	/// Returns `None` when `main` or `sub` exceed their fields.
	pub const fn new2(main: u8, sub: u16) -> Option<GroupAddr> {
		if main >= 32 || sub >= 2048 {
			return None;
		}

		Some(GroupAddr(((main as u16 & 0x1f) << 11) | sub))
	}

	pub const fn main(self) -> u8 {
		((self.0 >> 11) & 0x1f) as u8
	}

	pub const fn mid(self) -> u8 {
		((self.0 >> 8) & 0x7) as u8
	}

	pub const fn sub(self) -> u8 {
		(self.0 & 0xff) as u8
	}

	pub const fn sub2(self) -> u16 {
		self.0 & 0x7ff
	}

	pub const fn addr(self) -> Addr {
		Addr(self.0)
	}

	/// Formats with the two-level `main/sub` scheme.
	pub const fn display2(self) -> GroupAddr2 {
		GroupAddr2(self)
	}
}

impl From<Addr> for GroupAddr {
	fn from(addr: Addr) -> GroupAddr {
		GroupAddr(addr.0)
	}
}

impl From<GroupAddr> for Addr {
	fn from(addr: GroupAddr) -> Addr {
		Addr(addr.0)
	}
}

impl fmt::Display for GroupAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}/{}", self.main(), self.mid(), self.sub())
	}
}

impl FromStr for GroupAddr {
	type Err = AddrError;

	fn from_str(s: &str) -> Result<GroupAddr, AddrError> {
		let mut parts = s.splitn(3, '/');

		let main = next_component(&mut parts)?;
		let second: u16 = parts
			.next()
			.ok_or(AddrError::Syntax)?
			.parse()
			.map_err(|_| AddrError::Syntax)?;

		match parts.next() {
			Some(sub) => {
				let mid = u8::try_from(second).map_err(|_| AddrError::Component)?;
				let sub = sub.parse().map_err(|_| AddrError::Syntax)?;
				GroupAddr::new(main, mid, sub).ok_or(AddrError::Component)
			}
			None => GroupAddr::new2(main, second).ok_or(AddrError::Component),
		}
	}
}

fn next_component<'a>(parts: &mut impl Iterator<Item = &'a str>) -> Result<u8, AddrError> {
	parts
		.next()
		.ok_or(AddrError::Syntax)?
		.parse()
		.map_err(|_| AddrError::Syntax)
}

/// Two-level display wrapper for a [`GroupAddr`].
pub struct GroupAddr2(pub GroupAddr);

impl fmt::Display for GroupAddr2 {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.0.main(), self.0.sub2())
	}
}
