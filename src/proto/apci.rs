//! APCI service codes.
//!
//! The application-layer protocol control information is a 4-bit code
//! spread over two bytes: the low two bits of the TPCI byte and the top
//! two bits of the following byte. The `Escape` code (`0x0f`) promotes
//! to a 10-bit extended code that occupies the full following byte.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::telegram::{Telegram, TelegramType};

/// The sixteen base APCI services. This list is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Apci {
	GroupValueRead = 0x00,
	GroupValueResponse = 0x01,
	GroupValueWrite = 0x02,
	IndividualAddrWrite = 0x03,
	IndividualAddrRead = 0x04,
	IndividualAddrResponse = 0x05,
	AdcRead = 0x06,
	AdcResponse = 0x07,
	MemoryRead = 0x08,
	MemoryResponse = 0x09,
	MemoryWrite = 0x0a,
	UserMessage = 0x0b,
	MaskVersionRead = 0x0c,
	MaskVersionResponse = 0x0d,
	Restart = 0x0e,
	Escape = 0x0f,
}

/// Extended APCI services reached through [`Apci::Escape`].
///
/// This list is not complete; codes not enumerated here are dropped by
/// the application layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum ApciExtended {
	DeviceDescriptorRead = 0x0300,
	DeviceDescriptorResponse = 0x0340,
	AuthorizeRequest = 0x03d1,
	AuthorizeResponse = 0x03d2,
	PropertyValueRead = 0x03d5,
	PropertyValueResponse = 0x03d6,
	PropertyValueWrite = 0x03d7,
	PropertyDescriptionRead = 0x03d8,
	PropertyDescriptionResponse = 0x03d9,
	IndividualAddrSerialRead = 0x03dc,
	IndividualAddrSerialResponse = 0x03dd,
	IndividualAddrSerialWrite = 0x03de,
}

impl Telegram {
	/// Returns the APCI service of a UDP or NDP telegram, or `None`
	/// for telegram types that carry no APCI.
	pub fn apci(&self) -> Option<Apci> {
		let buf = self.raw();

		let code = match self.telegram_type()? {
			TelegramType::Standard => ((buf[6] & 0x03) << 2) | ((buf[7] & 0xc0) >> 6),
			TelegramType::Extended => ((buf[7] & 0x03) << 2) | ((buf[8] & 0xc0) >> 6),
			TelegramType::Poll => return None,
		};

		Apci::try_from(code).ok()
	}

	/// Sets the APCI service. The low six bits of the merged APCI/data
	/// byte are preserved, so sub-byte payloads survive.
	pub fn set_apci(&mut self, apci: Apci) {
		let code = u8::from(apci);

		match self.telegram_type() {
			Some(TelegramType::Standard) => {
				let buf = self.raw_mut();
				buf[6] = (buf[6] & 0xfc) | (code >> 2);
				buf[7] = (buf[7] & 0x3f) | ((code & 0x03) << 6);
			}
			Some(TelegramType::Extended) => {
				let buf = self.raw_mut();
				buf[7] = (buf[7] & 0xfc) | (code >> 2);
				buf[8] = (buf[8] & 0x3f) | ((code & 0x03) << 6);
			}
			_ => {}
		}
	}

	/// Returns the extended APCI service of an escaped telegram, or
	/// `None` when the code is not enumerated.
	pub fn apci_extended(&self) -> Option<ApciExtended> {
		let buf = self.raw();

		let code = match self.telegram_type()? {
			TelegramType::Standard => (u16::from(buf[6] & 0x03) << 8) | u16::from(buf[7]),
			TelegramType::Extended => (u16::from(buf[7] & 0x03) << 8) | u16::from(buf[8]),
			TelegramType::Poll => return None,
		};

		ApciExtended::try_from(code).ok()
	}

	/// Sets the extended APCI service, overwriting the full merged
	/// byte.
	pub fn set_apci_extended(&mut self, apci: ApciExtended) {
		let code = u16::from(apci);

		match self.telegram_type() {
			Some(TelegramType::Standard) => {
				let buf = self.raw_mut();
				buf[6] = (buf[6] & 0xfc) | ((code >> 8) as u8 & 0x03);
				buf[7] = code as u8;
			}
			Some(TelegramType::Extended) => {
				let buf = self.raw_mut();
				buf[7] = (buf[7] & 0xfc) | ((code >> 8) as u8 & 0x03);
				buf[8] = code as u8;
			}
			_ => {}
		}
	}
}
