//! Group address associations.
//!
//! The association set maps group addresses to communication objects.
//! It is kept sorted by group address so lookups stay binary; multiple
//! entries may share a group address or a communication object.
//! Associations reference communication objects by index into the
//! device's com-object array.

use alloc::vec::Vec;

use log::{debug, warn};

use super::tables::{AddrTable, AssocTable};
use crate::proto::addr::GroupAddr;

/// A single association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Association {
	pub group_addr: GroupAddr,
	/// Index into the device's communication object array.
	pub com_object: usize,
}

/// The runtime association set, sorted by group address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Associations {
	mappings: Vec<Association>,
}

impl Associations {
	pub fn len(&self) -> usize {
		self.mappings.len()
	}

	pub fn is_empty(&self) -> bool {
		self.mappings.is_empty()
	}

	pub fn as_slice(&self) -> &[Association] {
		&self.mappings
	}

	pub fn clear(&mut self) {
		self.mappings.clear();
	}

	/// Rebuilds the set from the downloaded association and address
	/// tables. At most `limit` entries are taken; entries with an
	/// invalid address index are skipped. Duplicates are preserved.
	pub fn update(&mut self, assoc_table: &AssocTable, addr_table: &AddrTable, limit: usize) {
		self.mappings.clear();

		let count = limit.min(assoc_table.count as usize);

		for entry in &assoc_table.entries[..count.min(assoc_table.entries.len())] {
			let Some(addr) = addr_table.get(entry.addr_index) else {
				warn!(
					"association references invalid address index {}, skipping",
					entry.addr_index
				);
				continue;
			};

			self.insert(Association {
				group_addr: GroupAddr::from(addr),
				com_object: usize::from(entry.com_object_index),
			});
		}

		debug!("{} associations updated", self.mappings.len());
	}

	/// Ordered insert, so lookups can stay binary. Duplicates are
	/// allowed and kept.
	pub fn insert(&mut self, mapping: Association) {
		let index = self.lower_bound(mapping.group_addr);
		self.mappings.insert(index, mapping);
	}

	/// First index whose group address is not less than `addr`.
	fn lower_bound(&self, addr: GroupAddr) -> usize {
		let mut left = 0;
		let mut right = self.mappings.len();

		while left < right {
			let middle = (left + right) / 2;

			if self.mappings[middle].group_addr < addr {
				left = middle + 1;
			} else {
				right = middle;
			}
		}

		left
	}

	/// Binary search for the first association with the given group
	/// address.
	pub fn find_by_group_address(&self, addr: GroupAddr) -> Option<usize> {
		let index = self.lower_bound(addr);

		match self.mappings.get(index) {
			Some(mapping) if mapping.group_addr == addr => Some(index),
			_ => None,
		}
	}

	/// All associations with the given group address, in table order.
	pub fn iter_by_group_address(&self, addr: GroupAddr) -> impl Iterator<Item = &Association> {
		let start = self.find_by_group_address(addr).unwrap_or(self.mappings.len());

		self.mappings[start..]
			.iter()
			.take_while(move |mapping| mapping.group_addr == addr)
	}

	/// All associations of the given communication object (sequential
	/// scan; the set is not ordered by object).
	pub fn iter_by_com_object(&self, com_object: usize) -> impl Iterator<Item = &Association> {
		self.mappings
			.iter()
			.filter(move |mapping| mapping.com_object == com_object)
	}
}
