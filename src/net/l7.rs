//! The application layer.
//!
//! A single dispatcher keyed by the (extended) APCI service interprets
//! telegrams against the device object model, mutates it, raises
//! device events and queues responses. Responses swap source and
//! destination and copy priority and TPCI class from the request; the
//! individual-address services override the source with the device's
//! own address, as those answers leave before an address is assigned.

use alloc::vec::Vec;

use log::{debug, warn};

use crate::device::com_object::Access;
use crate::device::events::{DeviceEvent, EVENT_DATA_MAX};
use crate::device::tables::DEVICE_CONTROL_VERIFY_MODE;
use crate::device::property::{self, PropertyFlags};
use crate::device::Device;
use crate::proto::addr::{Addr, GroupAddr, PhysicalAddr};
use crate::proto::apci::{Apci, ApciExtended};
use crate::proto::telegram::{Telegram, TelegramType};

/// Scratch size for response payloads, bounding property reads to ten
/// bytes per response like the descriptor protocol expects.
const SCRATCH_SIZE: usize = 10;

/// Handles one inbound telegram. Responses are handed to `out` in the
/// order they must reach the bus.
pub fn handle(device: &mut Device, telegram: &Telegram, out: &mut dyn FnMut(Telegram)) {
	if !telegram.is_valid() {
		debug!("invalid or incomplete telegram");
		return;
	}

	let Some(apci) = telegram.apci() else {
		return;
	};

	match apci {
		Apci::GroupValueRead => group_value(device, telegram, out, GroupOp::Read),
		Apci::GroupValueResponse => group_value(device, telegram, out, GroupOp::Response),
		Apci::GroupValueWrite => group_value(device, telegram, out, GroupOp::Write),
		Apci::IndividualAddrWrite => addr_write(device, telegram),
		Apci::IndividualAddrRead => {
			if let Some(response) = addr_read(device, telegram) {
				out(response);
			}
		}
		Apci::AdcRead => {
			if let Some(response) = adc_read(telegram) {
				out(response);
			}
		}
		Apci::MemoryRead => {
			if let Some(response) = memory_read(device, telegram) {
				out(response);
			}
		}
		Apci::MemoryWrite => {
			if let Some(response) = memory_write(device, telegram) {
				out(response);
			}
		}
		Apci::MaskVersionRead => {
			if let Some(response) = mask_version_read(device, telegram) {
				out(response);
			}
		}
		Apci::Restart => restart(device, telegram),
		Apci::Escape => handle_extended(device, telegram, out),
		_ => debug!("unhandled service {apci:?}"),
	}
}

fn handle_extended(device: &mut Device, telegram: &Telegram, out: &mut dyn FnMut(Telegram)) {
	let Some(apci) = telegram.apci_extended() else {
		debug!("unknown extended service");
		return;
	};

	let response = match apci {
		ApciExtended::AuthorizeRequest => authorize_request(device, telegram),
		ApciExtended::PropertyValueRead => property_value_read(device, telegram),
		ApciExtended::PropertyValueWrite => property_value_write(device, telegram),
		ApciExtended::PropertyDescriptionRead => property_description_read(device, telegram),
		ApciExtended::IndividualAddrSerialRead => individual_addr_serial_read(device, telegram),
		ApciExtended::IndividualAddrSerialWrite => individual_addr_serial_write(device, telegram),
		_ => {
			debug!("unhandled extended service {apci:?}");
			None
		}
	};

	if let Some(response) = response {
		out(response);
	}
}

/// Builds a standard response telegram. `data` is the merged payload:
/// its first byte shares the APCI byte, so only the low six bits of
/// `data[0]` survive.
fn response(request: &Telegram, apci: Apci, data: &[u8]) -> Option<Telegram> {
	let src = request.dst_addr()?;
	let dst = request.src_addr()?;

	if data.len() > 0x0f {
		warn!("response payload of {} bytes does not fit", data.len());
		return None;
	}

	let mut out = Telegram::build(TelegramType::Standard, src, dst, false);
	out.set_priority(request.priority());
	out.set_tpci(request.tpci()?);
	out.set_payload_length(data.len());
	out.payload_mut(true)[..data.len()].copy_from_slice(data);
	out.set_apci(apci);

	Some(out)
}

/// Builds an extended-APCI response telegram. `data` starts after the
/// merged byte, which the extended APCI occupies entirely.
fn response_extended(request: &Telegram, apci: ApciExtended, data: &[u8]) -> Option<Telegram> {
	let src = request.dst_addr()?;
	let dst = request.src_addr()?;

	if data.len() + 1 > 0x0f {
		warn!("response payload of {} bytes does not fit", data.len());
		return None;
	}

	let mut out = Telegram::build(TelegramType::Standard, src, dst, false);
	out.set_priority(request.priority());
	out.set_tpci(request.tpci()?);
	out.set_payload_length(data.len() + 1);
	out.payload_mut(false)[..data.len()].copy_from_slice(data);
	out.set_apci_extended(apci);

	Some(out)
}

enum GroupOp {
	Read,
	Write,
	Response,
}

fn group_value(
	device: &mut Device,
	telegram: &Telegram,
	out: &mut dyn FnMut(Telegram),
	op: GroupOp,
) {
	let Some(dst) = telegram.dst_addr() else {
		return;
	};

	let addr = GroupAddr::from(dst);

	let objects: Vec<usize> = device
		.associations
		.iter_by_group_address(addr)
		.map(|assoc| assoc.com_object)
		.collect();

	if objects.is_empty() {
		debug!("no associations for {addr}");
		return;
	}

	for index in objects {
		let Some(object) = device.com_objects.get(index) else {
			warn!("association references missing com-object {index}");
			continue;
		};

		if !object.access.contains(Access::ENABLED) {
			debug!("com-object {index} disabled");
			continue;
		}

		match op {
			GroupOp::Read => group_value_read(device, telegram, index, out),
			GroupOp::Write => group_value_update(device, telegram, index, Access::WRITE),
			GroupOp::Response => group_value_update(device, telegram, index, Access::UPDATE),
		}
	}
}

/// Answers a group value read with the stored value.
fn group_value_read(
	device: &mut Device,
	telegram: &Telegram,
	index: usize,
	out: &mut dyn FnMut(Telegram),
) {
	let object = &device.com_objects[index];

	if !object.access.contains(Access::READ) {
		debug!("com-object {index} read disabled");
		return;
	}

	let mut scratch = [0u8; 15];
	let size = object.size();

	let data = if size < 1 {
		// sub-byte values ride in the merged APCI byte
		if object.read(&mut scratch).is_err() {
			return;
		}

		scratch[0] &= 0x3f;
		&scratch[..1]
	} else {
		let Ok(read) = object.read(&mut scratch[1..]) else {
			return;
		};

		scratch[0] = 0;
		&scratch[..read + 1]
	};

	device.push_event(DeviceEvent::ComObjectRead { object: index });

	// the answer is for the whole group, so every listener updates
	let Some(group) = telegram.dst_addr() else {
		return;
	};

	if data.len() > 0x0f {
		warn!("response payload of {} bytes does not fit", data.len());
		return;
	}

	let mut response = Telegram::build(
		TelegramType::Standard,
		device.address.into(),
		group,
		true,
	);
	response.set_priority(telegram.priority());
	response.set_payload_length(data.len());
	response.payload_mut(true)[..data.len()].copy_from_slice(data);
	response.set_apci(Apci::GroupValueResponse);

	out(response);
}

/// Stores a group value carried by a write or response service, gated
/// on the given access bit.
fn group_value_update(device: &mut Device, telegram: &Telegram, index: usize, access: Access) {
	let object = &mut device.com_objects[index];

	let actual = telegram.payload_length();
	let expected = object.size() + 1;

	if actual != expected {
		debug!("expected {expected} payload bytes, got {actual}");
		return;
	}

	if !object.access.contains(access) {
		debug!("com-object {index} access {access:?} disabled");
		return;
	}

	let result = if expected == 1 {
		let value = telegram.payload(true)[0] & 0x3f;
		object.write(&[value])
	} else {
		object.write(telegram.payload(false))
	};

	if result.is_err() {
		warn!("com-object {index} write failed");
		return;
	}

	device.push_event(DeviceEvent::ComObjectWrite { object: index });
}

/// Sends one Group-Value-Write per association of the communication
/// object, carrying its current value.
pub fn update_com_object(device: &Device, index: usize, out: &mut dyn FnMut(Telegram)) {
	let Some(object) = device.com_objects.get(index) else {
		warn!("unknown com-object {index}");
		return;
	};

	let size = object.size() + 1;

	let mut base = Telegram::build(
		TelegramType::Standard,
		device.address.into(),
		Addr::BROADCAST,
		true,
	);

	base.set_priority(object.priority);
	base.set_payload_length(size);

	if size >= 2 {
		if object.read(base.payload_mut(false)).is_err() {
			return;
		}
	} else {
		let mut scratch = [0u8; 1];

		if object.read(&mut scratch).is_err() {
			return;
		}

		base.payload_mut(true)[0] = scratch[0] & 0x3f;
	}

	base.set_apci(Apci::GroupValueWrite);

	let mut sent = false;

	for assoc in device.associations.iter_by_com_object(index) {
		let mut telegram = base.clone();
		telegram.set_dst_addr(assoc.group_addr.into());

		out(telegram);
		sent = true;
	}

	if !sent {
		debug!("no associations for com-object {index}");
	}
}

fn addr_write(device: &mut Device, telegram: &Telegram) {
	if telegram.payload_length() != 3 {
		debug!("incorrect payload length");
		return;
	}

	let data = telegram.payload(false);
	let addr = PhysicalAddr::from(Addr::from_be_bytes([data[0], data[1]]));

	if !device.programming_mode() {
		debug!("not in programming mode");
		return;
	}

	device.push_event(DeviceEvent::SetAddress { address: addr });
}

fn addr_read(device: &mut Device, telegram: &Telegram) -> Option<Telegram> {
	if !device.programming_mode() {
		debug!("not in programming mode");
		return None;
	}

	let mut out = response(telegram, Apci::IndividualAddrResponse, &[0x00])?;

	// the answer originates from the device itself, towards everyone
	out.set_src_addr(device.address.into());
	out.set_dst_addr(Addr::BROADCAST);

	Some(out)
}

fn mask_version_read(device: &Device, telegram: &Telegram) -> Option<Telegram> {
	if telegram.payload_length() != 1 {
		debug!("incorrect payload length");
		return None;
	}

	let descriptor = telegram.payload(true)[0] & 0x3f;

	debug!("mask version read, descriptor={descriptor}");

	if descriptor != 0 {
		debug!("unhandled descriptor");
		return None;
	}

	let mask = u16::from(device.mask_version);

	response(
		telegram,
		Apci::MaskVersionResponse,
		&[0x00, (mask >> 8) as u8, mask as u8],
	)
}

fn restart(device: &mut Device, telegram: &Telegram) {
	if telegram.payload_length() != 1 {
		debug!("incorrect payload length");
		return;
	}

	debug!("restart request");

	device.push_event(DeviceEvent::Restart);
}

/// The ADC is a board concern; the stack answers with a zero sample.
fn adc_read(telegram: &Telegram) -> Option<Telegram> {
	if telegram.payload_length() != 2 {
		debug!("incorrect payload length");
		return None;
	}

	let data = telegram.payload(true);
	let channel = data[0] & 0x3f;
	let samples = data[1];

	debug!("ADC read, channel={channel} samples={samples}");

	response(telegram, Apci::AdcResponse, &[channel, samples, 0x00, 0x00])
}

fn memory_read(device: &mut Device, telegram: &Telegram) -> Option<Telegram> {
	if telegram.payload_length() != 3 {
		debug!("incorrect payload length");
		return None;
	}

	let data = telegram.payload(true);
	let count = usize::from(data[0] & 0x0f);
	let addr = u16::from_be_bytes([data[1], data[2]]);

	debug!("memory read, addr={addr:#06x} count={count}");

	let segment = device.memory_find(addr, count as u16)?;

	let mut scratch = [0u8; 19];
	scratch[..3].copy_from_slice(&data[..3]);

	device.segments[segment]
		.read(addr, &mut scratch[3..3 + count])
		.ok()?;

	device.push_event(DeviceEvent::MemRead { segment });

	response(telegram, Apci::MemoryResponse, &scratch[..3 + count])
}

fn memory_write(device: &mut Device, telegram: &Telegram) -> Option<Telegram> {
	if telegram.payload_length() < 3 {
		debug!("incorrect payload length");
		return None;
	}

	let data = telegram.payload(true);
	let count = usize::from(data[0] & 0x0f);
	let addr = u16::from_be_bytes([data[1], data[2]]);

	if data.len() < 3 + count {
		debug!("payload shorter than the byte count");
		return None;
	}

	debug!("memory write, addr={addr:#06x} count={count}");

	let segment = device.memory_find(addr, count as u16)?;

	let mut scratch = [0u8; 19];
	scratch[..3].copy_from_slice(&data[..3]);

	if let Err(error) = device.segments[segment].write(addr, &data[3..3 + count]) {
		debug!("unable to write: {error}");
		return None;
	}

	device.push_event(DeviceEvent::MemWrite { segment });

	// a table write invalidates the runtime structures built from it
	device.memory_written(segment);

	if device.device_control() & DEVICE_CONTROL_VERIFY_MODE == 0 {
		debug!("verification disabled");
		return None;
	}

	device.segments[segment]
		.read(addr, &mut scratch[3..3 + count])
		.ok()?;

	response(telegram, Apci::MemoryResponse, &scratch[..3 + count])
}

fn authorize_request(device: &mut Device, telegram: &Telegram) -> Option<Telegram> {
	if telegram.payload_length() != 6 {
		debug!("incorrect payload length");
		return None;
	}

	// authorisation is unused, everyone gets the highest level
	device.push_event(DeviceEvent::Authorize { level: 0 });

	response_extended(telegram, ApciExtended::AuthorizeResponse, &[0x00])
}

fn property_value_read(device: &mut Device, telegram: &Telegram) -> Option<Telegram> {
	if telegram.payload_length() != 5 {
		debug!("incorrect payload length");
		return None;
	}

	let data = telegram.payload(false);

	let object = data[0];
	let id = data[1];
	let count = data[2] >> 4;
	let start = (u16::from(data[2] & 0x0f) << 8) | u16::from(data[3]);

	debug!("property read, object={object} id={id} count={count} start={start}");

	let mut buf = [0u8; 4 + SCRATCH_SIZE];
	buf[..4].copy_from_slice(&data[..4]);

	let Some(property) = property::find_by_id(&device.objects, object, id) else {
		debug!("property not found");
		buf[2] = 0;

		return response_extended(telegram, ApciExtended::PropertyValueResponse, &buf[..4]);
	};

	// position zero asks for the number of elements
	if start == 0 {
		buf[4] = 0;
		buf[5] = property.elements() as u8;

		return response_extended(telegram, ApciExtended::PropertyValueResponse, &buf[..6]);
	}

	let result = match property.read(count, start, &mut buf[4..]) {
		Ok(result) => result,
		Err(error) => {
			debug!("error while reading property: {error}");
			return None;
		}
	};

	device.push_event(DeviceEvent::PropRead {
		object,
		id,
		count,
		start,
	});

	response_extended(
		telegram,
		ApciExtended::PropertyValueResponse,
		&buf[..4 + result],
	)
}

fn property_value_write(device: &mut Device, telegram: &Telegram) -> Option<Telegram> {
	if telegram.payload_length() < 5 {
		debug!("incorrect payload length");
		return None;
	}

	let data = telegram.payload(false);

	let object = data[0];
	let id = data[1];
	let count = data[2] >> 4;
	let start = (u16::from(data[2] & 0x0f) << 8) | u16::from(data[3]);
	let payload = &data[4..];

	debug!("property write, object={object} id={id} count={count} start={start}");

	let mut buf = [0u8; 4 + SCRATCH_SIZE];
	buf[..4].copy_from_slice(&data[..4]);

	let Some(property) = property::find_by_id_mut(&mut device.objects, object, id) else {
		debug!("property not found");
		buf[2] = 0;

		return response_extended(telegram, ApciExtended::PropertyValueResponse, &buf[..4]);
	};

	if let Err(error) = property.write(count, start, payload) {
		debug!("unable to write property: {error}");
		return None;
	}

	device.push_event(DeviceEvent::PropWrite {
		object,
		id,
		count,
		start,
		data: payload.iter().copied().take(EVENT_DATA_MAX).collect(),
	});

	// echo back what is actually stored now
	let property = property::find_by_id(&device.objects, object, id)?;

	let result = match property.read(count, start, &mut buf[4..]) {
		Ok(result) => result,
		Err(error) => {
			debug!("error while reading property: {error}");
			return None;
		}
	};

	response_extended(
		telegram,
		ApciExtended::PropertyValueResponse,
		&buf[..4 + result],
	)
}

fn property_description_read(device: &Device, telegram: &Telegram) -> Option<Telegram> {
	if telegram.payload_length() != 4 {
		debug!("incorrect payload length");
		return None;
	}

	let data = telegram.payload(false);

	let object = data[0];
	let id = data[1];
	let index = data[2];

	debug!("property description read, object={object} id={id} index={index}");

	let property = if id == 0 {
		property::find_by_index(&device.objects, object, index)
	} else {
		property::find_by_id(&device.objects, object, id)
	};

	let mut buf = [0u8; 7];
	buf[0] = object;
	buf[1] = id;
	buf[2] = index;

	let Some(property) = property else {
		debug!("property not found");
		buf[6] = 0xff;

		return response_extended(telegram, ApciExtended::PropertyDescriptionResponse, &buf);
	};

	buf[1] = property.id;
	buf[3] = u8::from(property.ty)
		| if property.flags.contains(PropertyFlags::WRITABLE) {
			0x80
		} else {
			0x00
		};
	buf[4] = 0;
	buf[5] = property.elements() as u8;
	// read and write access level
	buf[6] = 0xff;

	response_extended(telegram, ApciExtended::PropertyDescriptionResponse, &buf)
}

fn individual_addr_serial_read(device: &mut Device, telegram: &Telegram) -> Option<Telegram> {
	if telegram.payload_length() != 7 {
		debug!("incorrect payload length");
		return None;
	}

	let data = telegram.payload(false);

	if device.serial() != Some([data[0], data[1], data[2], data[3], data[4], data[5]]) {
		debug!("serial number not ours");
		return None;
	}

	let mut buf = [0u8; 10];
	buf[..6].copy_from_slice(&data[..6]);

	let mut out = response_extended(
		telegram,
		ApciExtended::IndividualAddrSerialResponse,
		&buf,
	)?;

	out.set_src_addr(device.address.into());

	Some(out)
}

fn individual_addr_serial_write(device: &mut Device, telegram: &Telegram) -> Option<Telegram> {
	let data = telegram.payload(false);

	if data.len() < 8 {
		debug!("incorrect payload length");
		return None;
	}

	if device.serial() != Some([data[0], data[1], data[2], data[3], data[4], data[5]]) {
		debug!("serial number not ours");
		return None;
	}

	let addr = PhysicalAddr::from(Addr::from_be_bytes([data[6], data[7]]));

	device.push_event(DeviceEvent::SetAddress { address: addr });

	None
}
