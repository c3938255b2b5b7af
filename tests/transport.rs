//! Transport layer tests: the session algebra of the single
//! point-to-point connection.

use std::cell::Cell;
use std::rc::Rc;

use knx_stack::net::l4::{TransportLayer, CONNECTION_TIMEOUT_US};
use knx_stack::proto::addr::{Addr, PhysicalAddr};
use knx_stack::proto::telegram::{Telegram, TelegramType};
use knx_stack::proto::tpci::{Tpci, TpciNcd, TpciUcd};
use knx_stack::time::Clock;

#[derive(Clone)]
struct TestClock(Rc<Cell<u64>>);

impl TestClock {
	fn new() -> TestClock {
		TestClock(Rc::new(Cell::new(0)))
	}

	fn advance(&self, us: u64) {
		self.0.set(self.0.get() + us);
	}
}

impl Clock for TestClock {
	fn now_us(&self) -> u64 {
		self.0.get()
	}
}

fn peer() -> Addr {
	PhysicalAddr::new(1, 2, 0).unwrap().into()
}

fn device() -> Addr {
	PhysicalAddr::new(1, 1, 8).unwrap().into()
}

fn other() -> Addr {
	PhysicalAddr::new(1, 2, 1).unwrap().into()
}

fn control(src: Addr, tpci: Tpci) -> Telegram {
	let mut telegram = Telegram::build(TelegramType::Standard, src, device(), false);
	telegram.set_tpci(tpci);
	telegram
}

fn connect(src: Addr) -> Telegram {
	let mut telegram = control(src, Tpci::Ucd);
	telegram.set_tpci_ucd(TpciUcd::Connect);
	telegram
}

fn disconnect(src: Addr) -> Telegram {
	let mut telegram = control(src, Tpci::Ucd);
	telegram.set_tpci_ucd(TpciUcd::Disconnect);
	telegram
}

fn ack(src: Addr, seq: u8) -> Telegram {
	let mut telegram = control(src, Tpci::Ncd);
	telegram.set_tpci_ncd(TpciNcd::Ack);
	telegram.set_tpci_seq_number(seq);
	telegram
}

fn nack(src: Addr) -> Telegram {
	let mut telegram = control(src, Tpci::Ncd);
	telegram.set_tpci_ncd(TpciNcd::Nack);
	telegram
}

fn ndp(src: Addr, seq: u8) -> Telegram {
	let mut telegram = control(src, Tpci::Ndp);
	telegram.set_tpci_seq_number(seq);
	telegram
}

fn layer() -> (TransportLayer<TestClock>, TestClock) {
	let clock = TestClock::new();
	(TransportLayer::new(clock.clone()), clock)
}

#[test]
fn connect_opens_session() {
	let (mut layer, _clock) = layer();

	let outcome = layer.receive(&connect(peer()));

	assert!(!outcome.deliver);
	assert!(outcome.reply.is_none());

	let connection = layer.connection();
	assert!(connection.connected);
	assert_eq!(connection.peer, peer());
	assert_eq!(connection.tx_seq, 0);
	assert_eq!(connection.rx_seq, 0);
}

#[test]
fn second_connect_does_not_refresh() {
	let (mut layer, clock) = layer();

	layer.receive(&connect(peer()));
	let stamp = layer.connection().last_activity_us;

	clock.advance(1_000);
	layer.receive(&connect(other()));

	// still bound to the first peer, timestamp untouched
	assert_eq!(layer.connection().peer, peer());
	assert_eq!(layer.connection().last_activity_us, stamp);
}

#[test]
fn disconnect_from_peer_closes() {
	let (mut layer, _clock) = layer();

	layer.receive(&connect(peer()));
	layer.receive(&disconnect(peer()));

	assert!(!layer.connection().connected);
}

#[test]
fn disconnect_from_other_is_ignored() {
	let (mut layer, _clock) = layer();

	layer.receive(&connect(peer()));
	layer.receive(&disconnect(other()));

	assert!(layer.connection().connected);
	assert_eq!(layer.connection().peer, peer());
}

#[test]
fn ack_advances_send_sequence() {
	let (mut layer, _clock) = layer();

	layer.receive(&connect(peer()));
	layer.receive(&ack(peer(), 0));

	assert_eq!(layer.connection().tx_seq, 1);
}

#[test]
fn ack_with_wrong_sequence_is_ignored() {
	let (mut layer, _clock) = layer();

	layer.receive(&connect(peer()));
	layer.receive(&ack(peer(), 3));

	assert_eq!(layer.connection().tx_seq, 0);
	assert!(layer.connection().connected);
}

#[test]
fn nack_disconnects_with_reply() {
	let (mut layer, _clock) = layer();

	layer.receive(&connect(peer()));
	let outcome = layer.receive(&nack(peer()));

	assert!(!layer.connection().connected);

	let reply = outcome.reply.expect("expected a disconnect");
	assert_eq!(reply.tpci(), Some(Tpci::Ucd));
	assert_eq!(reply.tpci_ucd(), Some(TpciUcd::Disconnect));
	assert_eq!(reply.src_addr(), Some(device()));
	assert_eq!(reply.dst_addr(), Some(peer()));
}

#[test]
fn ndp_in_sequence_is_delivered_and_acked() {
	let (mut layer, _clock) = layer();

	layer.receive(&connect(peer()));
	let outcome = layer.receive(&ndp(peer(), 0));

	assert!(outcome.deliver);

	let reply = outcome.reply.expect("expected an ACK");
	assert_eq!(reply.tpci(), Some(Tpci::Ncd));
	assert_eq!(reply.tpci_ncd(), Some(TpciNcd::Ack));
	assert_eq!(reply.tpci_seq_number(), 0);
	assert_eq!(reply.dst_addr(), Some(peer()));

	assert_eq!(layer.connection().rx_seq, 1);
}

#[test]
fn session_survives_a_full_exchange() {
	// CONNECT, NDP(0), NDP(1), DISCONNECT ends with a closed session
	let (mut layer, _clock) = layer();

	layer.receive(&connect(peer()));
	assert!(layer.receive(&ndp(peer(), 0)).deliver);
	assert!(layer.receive(&ndp(peer(), 1)).deliver);
	layer.receive(&disconnect(peer()));

	assert!(!layer.connection().connected);
}

#[test]
fn sequence_mismatch_disconnects() {
	// CONNECT, NDP(0), NDP(2) ends with a closed session as well
	let (mut layer, _clock) = layer();

	layer.receive(&connect(peer()));
	assert!(layer.receive(&ndp(peer(), 0)).deliver);

	let outcome = layer.receive(&ndp(peer(), 2));

	// the payload is not delivered, the peer is told to go away
	assert!(!outcome.deliver);
	assert!(!layer.connection().connected);

	let reply = outcome.reply.expect("expected a disconnect");
	assert_eq!(reply.tpci(), Some(Tpci::Ucd));
	assert_eq!(reply.tpci_ucd(), Some(TpciUcd::Disconnect));
}

#[test]
fn ndp_from_other_peer_is_dropped() {
	let (mut layer, _clock) = layer();

	layer.receive(&connect(peer()));
	let outcome = layer.receive(&ndp(other(), 0));

	assert!(!outcome.deliver);
	assert!(outcome.reply.is_none());
	assert_eq!(layer.connection().rx_seq, 0);
}

#[test]
fn stale_session_times_out() {
	let (mut layer, clock) = layer();

	layer.receive(&connect(peer()));
	clock.advance(CONNECTION_TIMEOUT_US + 1);

	let outcome = layer.receive(&ndp(peer(), 0));

	assert!(!outcome.deliver);
	assert!(!layer.connection().connected);
}

#[test]
fn udp_passes_through_without_session() {
	let (mut layer, _clock) = layer();

	let outcome = layer.receive(&control(peer(), Tpci::Udp));

	assert!(outcome.deliver);
	assert!(outcome.reply.is_none());
}

#[test]
fn outbound_ndp_requires_session() {
	let (mut layer, _clock) = layer();

	let mut telegram = Telegram::build(TelegramType::Standard, device(), peer(), false);
	telegram.set_tpci(Tpci::Ndp);

	assert!(!layer.send(&mut telegram));

	layer.receive(&connect(peer()));

	assert!(layer.send(&mut telegram));

	let mut foreign = Telegram::build(TelegramType::Standard, device(), other(), false);
	foreign.set_tpci(Tpci::Ndp);

	assert!(!layer.send(&mut foreign));
}

#[test]
fn outbound_ndp_gets_sequence_stamped() {
	let (mut layer, _clock) = layer();

	layer.receive(&connect(peer()));
	layer.receive(&ack(peer(), 0));
	layer.receive(&ack(peer(), 1));

	let mut telegram = Telegram::build(TelegramType::Standard, device(), peer(), false);
	telegram.set_tpci(Tpci::Ndp);

	assert!(layer.send(&mut telegram));
	assert_eq!(telegram.tpci_seq_number(), 2);
}
