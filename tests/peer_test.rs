//! End-to-end tests running two real peers against each other over
//! localhost TCP.

mod common;

use std::net::TcpStream;
use std::sync::Arc;

use crossbeam_channel as chan;

use bitcoin_peer::wire::Message;
use bitcoin_peer::{registry, Config, MessageListeners, Peer, PeerState};

/// Connect an outbound and an inbound peer to each other and return both
/// once their handshakes completed.
fn connect_pair(outbound_cfg: Config, inbound_cfg: Config) -> (Arc<Peer>, Arc<Peer>) {
	// Both ends live in this process and share the nonce registry, so
	// the handshake would be flagged as a self-connection.
	registry::allow_self_connections(true);

	let (listener, addr) = common::listen();
	let accept_thread = std::thread::spawn(move || {
		let (socket, _) = listener.accept().expect("accept inbound connection");
		socket
	});

	let outbound = Peer::new_outbound(outbound_cfg, &addr).expect("create outbound peer");
	let socket = TcpStream::connect(&addr).expect("connect to inbound peer");
	outbound.associate_connection(socket);

	let inbound = Peer::new_inbound(inbound_cfg);
	inbound.associate_connection(accept_thread.join().expect("accept thread"));

	common::wait_until("outbound handshake", || outbound.state() == PeerState::Established);
	common::wait_until("inbound handshake", || inbound.state() == PeerState::Established);
	(outbound, inbound)
}

#[test]
fn handshake_and_teardown() {
	let (outbound, inbound) = connect_pair(common::test_config(), common::test_config());

	for peer in [&outbound, &inbound].iter() {
		assert!(peer.version_known());
		assert!(peer.verack_received());
		assert_eq!(peer.state(), PeerState::Established);
		assert_eq!(peer.protocol_version(), bitcoin_peer::MAX_PROTOCOL_VERSION);
		assert_ne!(peer.id(), 0);
		assert!(peer.user_agent().starts_with("/harness:"));
		assert!(peer.bytes_sent() > 0);
		assert!(peer.bytes_received() > 0);
	}
	assert!(!outbound.inbound());
	assert!(inbound.inbound());
	// Ids are assigned from a process-wide counter.
	assert_ne!(outbound.id(), inbound.id());

	let snap = outbound.stats_snapshot();
	assert_eq!(snap.id, outbound.id());
	assert_eq!(snap.last_block, 100);
	assert!(snap.conn_time.is_some());

	outbound.disconnect();
	outbound.wait_for_disconnect();
	assert_eq!(outbound.state(), PeerState::Terminated);

	// The remote end notices the close and tears down as well.
	inbound.wait_for_disconnect();
	assert_eq!(inbound.state(), PeerState::Terminated);

	// Disconnecting again has no observable effect.
	outbound.disconnect();
	assert_eq!(outbound.state(), PeerState::Terminated);
}

#[test]
fn messages_reach_listeners() {
	let (inv_tx, inv_rx) = chan::bounded(16);
	let mut inbound_cfg = common::test_config();
	inbound_cfg.listeners = MessageListeners {
		on_inv: Some(Box::new(move |_peer, invs| {
			let _ = inv_tx.try_send(invs.to_vec());
		})),
		..MessageListeners::default()
	};

	let (outbound, inbound) = connect_pair(common::test_config(), inbound_cfg);

	let inv = bitcoin_peer::wire::InvVect::new(
		bitcoin_peer::wire::InvType::Block,
		bitcoin::hashes::Hash::hash(b"some block"),
	);
	outbound.queue_message(Message::Inv(vec![inv]), None);

	let received = inv_rx
		.recv_timeout(common::HARNESS_TIMEOUT)
		.expect("inv listener never fired");
	assert_eq!(received, vec![inv]);

	// The byte counters on both sides cover the same stream, with the
	// receiving side trailing the sender.
	common::wait_until("bytes flow", || inbound.bytes_received() > 0);

	outbound.disconnect();
	inbound.wait_for_disconnect();
	outbound.wait_for_disconnect();
}

#[test]
fn ping_latency_is_measured() {
	let (outbound, inbound) = connect_pair(common::test_config(), common::test_config());

	// Pings go out every second and the other peer answers them
	// intrinsically: a ping is recorded as outstanding and the pong
	// clears it again.
	common::wait_until("outbound ping sent", || outbound.last_ping_time().is_some());
	common::wait_until("outbound ping answered", || outbound.last_ping_nonce() == 0);
	common::wait_until("inbound ping sent", || inbound.last_ping_time().is_some());
	common::wait_until("inbound ping answered", || inbound.last_ping_nonce() == 0);

	outbound.disconnect();
	inbound.wait_for_disconnect();
	outbound.wait_for_disconnect();
}
