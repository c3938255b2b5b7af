//! KNX wire types: addresses, telegrams and the protocol control fields.

pub mod addr;
pub mod apci;
pub mod dpt;
pub mod telegram;
pub mod tpci;

pub use addr::{Addr, GroupAddr, PhysicalAddr};
pub use apci::{Apci, ApciExtended};
pub use telegram::{Priority, Telegram, TelegramType};
pub use tpci::{Tpci, TpciNcd, TpciUcd};
