//! Self-connection detection. Kept in its own test binary because it
//! relies on the process-wide self-connection setting staying at its
//! default.

mod common;

use std::net::TcpStream;

use bitcoin::network::constants::Network;

use bitcoin_peer::wire::{Command, Message};
use bitcoin_peer::Peer;

use common::RemotePeer;

#[test]
fn echoed_nonce_is_a_self_connection() {
	let (listener, addr) = common::listen();

	let peer = Peer::new_outbound(common::test_config(), &addr).expect("create outbound peer");
	let socket = TcpStream::connect(&addr).expect("connect");
	peer.associate_connection(socket);

	let mut remote = RemotePeer::accept(&listener, Network::Regtest);
	let their_version = match remote.expect(Command::Version) {
		Message::Version(version) => version,
		msg => panic!("unexpected message: {:?}", msg.command()),
	};

	// Echo the peer's own nonce back at it, exactly what happens when a
	// node accidentally dials its own listening address.
	let mut version = remote.version_msg(0);
	version.nonce = their_version.nonce;
	remote.write_frame(&Message::Version(version));

	// The peer recognizes itself and hangs up without ever sending a
	// verack.
	peer.wait_for_disconnect();
	assert!(!peer.verack_received());

	loop {
		match remote.try_read_frame() {
			Ok(msg) => assert_ne!(msg.command(), Command::Verack, "verack after self-connect"),
			Err(_) => break, // connection closed
		}
	}
}
