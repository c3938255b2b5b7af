//! A KNX System 7 (TP1) device stack for resource-constrained targets.
//!
//! The crate implements the device side of a KNX twisted-pair installation
//! for mask version 0705: the telegram codec, the TP-UART and NCN5120
//! transceiver drivers, the network/transport/application protocol layers
//! and the device object model (communication objects, interface object
//! properties, memory segments and group-address associations).
//!
//! Board bring-up, peripheral access and persistence stay with the host
//! firmware: the drivers transmit through an [`embedded_io::Write`]
//! byte sink, received UART bytes are pushed in from the host's interrupt
//! handler, and time comes from an injected [`time::Clock`].

#![no_std]
#![warn(rust_2018_idioms)]

#[macro_use]
extern crate alloc;
#[cfg(test)]
#[macro_use]
extern crate std;

pub mod device;
pub mod drivers;
pub mod net;
pub mod proto;
pub mod synch;
pub mod time;
