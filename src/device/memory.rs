//! Memory segments.
//!
//! A downloader addresses device memory through 16-bit addresses. The
//! device maps disjoint address ranges onto owned byte buffers; a
//! lookup returns the single segment that entirely contains the
//! requested range. Every successful write marks the segment modified,
//! so a persistence layer can snapshot lazily.

use alloc::boxed::Box;

use bitflags::bitflags;

use super::ObjectError;

/// Kind of backing storage of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
	Eeprom,
	Ram,
	Flash,
}

bitflags! {
	/// Segment attribute flags.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct SegmentFlags: u8 {
		const READABLE = 0x01;
		const WRITABLE = 0x02;
		const MODIFIED = 0x10;
	}
}

/// A memory segment: an address range backed by owned bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySegment {
	pub start: u16,
	pub ty: MemoryType,
	pub flags: SegmentFlags,
	data: Box<[u8]>,
}

impl MemorySegment {
	pub fn new(start: u16, ty: MemoryType, flags: SegmentFlags, data: Box<[u8]>) -> MemorySegment {
		MemorySegment {
			start,
			ty,
			flags,
			data,
		}
	}

	/// A zero-filled segment of `size` bytes.
	pub fn zeroed(start: u16, ty: MemoryType, flags: SegmentFlags, size: u16) -> MemorySegment {
		MemorySegment::new(start, ty, flags, vec![0; size as usize].into_boxed_slice())
	}

	pub fn size(&self) -> u16 {
		self.data.len() as u16
	}

	/// True when `[addr, addr + size)` lies entirely inside this
	/// segment.
	pub fn contains(&self, addr: u16, size: u16) -> bool {
		let start = u32::from(self.start);
		let end = start + self.data.len() as u32;

		u32::from(addr) >= start && u32::from(addr) + u32::from(size) <= end
	}

	/// Raw view of the backing bytes, for the memory-mapped tables.
	pub fn bytes(&self) -> &[u8] {
		&self.data
	}

	pub fn bytes_mut(&mut self) -> &mut [u8] {
		&mut self.data
	}

	/// Reads `buf.len()` bytes starting at the bus address `addr`.
	pub fn read(&self, addr: u16, buf: &mut [u8]) -> Result<usize, ObjectError> {
		if !self.flags.contains(SegmentFlags::READABLE) {
			return Err(ObjectError::NotReadable);
		}

		let offset = usize::from(addr.checked_sub(self.start).ok_or(ObjectError::OutOfRange)?);
		let source = self
			.data
			.get(offset..offset + buf.len())
			.ok_or(ObjectError::OutOfRange)?;

		buf.copy_from_slice(source);

		Ok(buf.len())
	}

	/// Writes `bytes` starting at the bus address `addr` and marks the
	/// segment modified.
	pub fn write(&mut self, addr: u16, bytes: &[u8]) -> Result<usize, ObjectError> {
		if !self.flags.contains(SegmentFlags::WRITABLE) {
			return Err(ObjectError::NotWritable);
		}

		let offset = usize::from(addr.checked_sub(self.start).ok_or(ObjectError::OutOfRange)?);
		let target = self
			.data
			.get_mut(offset..offset + bytes.len())
			.ok_or(ObjectError::OutOfRange)?;

		target.copy_from_slice(bytes);
		self.flags.insert(SegmentFlags::MODIFIED);

		Ok(bytes.len())
	}
}

/// Returns the segment that entirely contains `[addr, addr + size)`.
pub fn find(segments: &[MemorySegment], addr: u16, size: u16) -> Option<&MemorySegment> {
	segments.iter().find(|segment| segment.contains(addr, size))
}

pub fn find_mut(segments: &mut [MemorySegment], addr: u16, size: u16) -> Option<&mut MemorySegment> {
	segments
		.iter_mut()
		.find(|segment| segment.contains(addr, size))
}
