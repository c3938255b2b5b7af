//! The network layer.
//!
//! Inbound, telegrams are admitted when they are group-addressed, sent
//! to the broadcast address, or physically addressed to one of the
//! configured interfaces; everything else is discarded. Outbound, the
//! interface whose address equals the telegram's source address
//! transmits the telegram.

use alloc::boxed::Box;

use log::debug;

use super::{Netif, NetifError};
use crate::proto::addr::Addr;
use crate::proto::telegram::Telegram;

/// Decides whether an inbound telegram concerns this device.
pub fn admit(ifaces: &[Box<dyn Netif>], telegram: &Telegram) -> bool {
	if !telegram.is_valid() {
		debug!("invalid or incomplete telegram");
		return false;
	}

	if telegram.is_group_addressed() {
		return true;
	}

	let Some(dst) = telegram.dst_addr() else {
		return false;
	};

	if dst == Addr::BROADCAST {
		return true;
	}

	if ifaces.iter().any(|iface| iface.address() == dst) {
		return true;
	}

	debug!("telegram not for me");
	false
}

/// Hands an outbound telegram to the interface configured with the
/// telegram's source address.
pub fn dispatch(ifaces: &mut [Box<dyn Netif>], telegram: &mut Telegram) -> Result<(), NetifError> {
	if !telegram.is_valid() {
		debug!("invalid or incomplete telegram");
		return Err(NetifError::InvalidTelegram);
	}

	let src = telegram.src_addr().ok_or(NetifError::InvalidTelegram)?;

	let iface = ifaces
		.iter_mut()
		.find(|iface| iface.address() == src)
		.ok_or_else(|| {
			debug!("unable to find iface");
			NetifError::NoInterface
		})?;

	iface.send(telegram)
}
