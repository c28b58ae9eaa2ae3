//! Outbound queuing behavior observed on the wire by a fake remote:
//! duplicate locator suppression, the block inventory fast path and
//! inventory trickling.

mod common;

use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::hashes::{sha256d, Hash};
use bitcoin::network::constants::Network;
use bitcoin::BlockHash;

use bitcoin_peer::wire::{Command, InvType, InvVect, Message};
use bitcoin_peer::{Config, Peer};

use common::RemotePeer;

/// An outbound peer under test, fully negotiated against a fake remote.
fn negotiated_outbound(config: Config) -> (Arc<Peer>, RemotePeer) {
	let (listener, addr) = common::listen();

	let peer = Peer::new_outbound(config, &addr).expect("create outbound peer");
	let socket = TcpStream::connect(&addr).expect("connect");
	peer.associate_connection(socket);

	let mut remote = RemotePeer::accept(&listener, Network::Regtest);
	remote.handshake_as_server(fastrand::u64(..));
	common::wait_until("handshake", || peer.verack_received());
	(peer, remote)
}

#[test]
fn duplicate_getblocks_is_sent_once() {
	let (peer, mut remote) = negotiated_outbound(common::test_config());

	let locator = vec![
		BlockHash::from_hash(sha256d::Hash::hash(b"tip")),
		BlockHash::from_hash(sha256d::Hash::hash(b"earlier")),
	];
	let stop = BlockHash::from_hash(sha256d::Hash::hash(b"stop"));

	peer.push_get_blocks(&locator, stop).unwrap();
	peer.push_get_blocks(&locator, stop).unwrap();
	common::flush_peer(&peer);

	// Everything queued is on the wire; count the getblocks frames that
	// arrived before the fence.
	let before = remote.read_until(Command::GetAddr);
	let getblocks: Vec<_> =
		before.iter().filter(|msg| msg.command() == Command::GetBlocks).collect();
	assert_eq!(getblocks.len(), 1, "duplicate getblocks was not suppressed");
	match getblocks[0] {
		Message::GetBlocks(request) => {
			assert_eq!(request.locator_hashes, locator);
			assert_eq!(request.stop_hash, stop);
		}
		msg => panic!("unexpected message: {:?}", msg.command()),
	}

	peer.disconnect();
	peer.wait_for_disconnect();
}

#[test]
fn block_inventory_skips_the_trickle() {
	// An hour-long trickle interval: anything that arrives promptly must
	// have bypassed the trickle queue.
	let mut config = common::test_config();
	config.trickle_interval = Duration::from_secs(3600);
	let (peer, mut remote) = negotiated_outbound(config);

	let block_inv = InvVect::new(InvType::Block, sha256d::Hash::hash(b"new block"));
	let tx_inv = InvVect::new(InvType::Tx, sha256d::Hash::hash(b"new tx"));
	peer.queue_inventory(block_inv);
	peer.queue_inventory(tx_inv);

	// The block announcement arrives as a single-entry inv well before
	// any trickle tick.
	loop {
		match remote.read_frame() {
			Message::Inv(invs) => {
				assert_eq!(invs, vec![block_inv]);
				break;
			}
			Message::Ping(_) => continue,
			msg => panic!("expected the block inv, got {:?}", msg.command()),
		}
	}

	// The transaction announcement is still stuck in the trickle queue.
	common::flush_peer(&peer);
	let before = remote.read_until(Command::GetAddr);
	assert!(
		!before.iter().any(|msg| msg.command() == Command::Inv),
		"tx inventory should not be announced before the trickle tick",
	);

	peer.disconnect();
	peer.wait_for_disconnect();
}

#[test]
fn trickled_inventory_is_batched_and_deduplicated() {
	let mut config = common::test_config();
	config.trickle_interval = Duration::from_millis(100);
	let (peer, mut remote) = negotiated_outbound(config);

	let known = InvVect::new(InvType::Tx, sha256d::Hash::hash(b"already known"));
	peer.add_known_inventory(&known);

	let fresh: Vec<InvVect> = (0u8..3)
		.map(|i| InvVect::new(InvType::Tx, sha256d::Hash::hash(&[i])))
		.collect();
	for inv in &fresh {
		peer.queue_inventory(*inv);
	}
	// Known inventory is dropped on submission already.
	peer.queue_inventory(known);

	// The trickle may split the announcements over ticks; collect until
	// everything arrived.
	let mut announced: Vec<InvVect> = Vec::new();
	while announced.len() < fresh.len() {
		match remote.read_frame() {
			Message::Inv(invs) => announced.extend(invs),
			Message::Ping(_) => {}
			msg => panic!("expected the trickled inv, got {:?}", msg.command()),
		}
	}
	assert_eq!(announced, fresh);

	// Everything announced is now in the known-inventory set, so a
	// repeat announcement of any of it is dropped.
	for inv in &fresh {
		peer.queue_inventory(*inv);
	}
	common::flush_peer(&peer);
	std::thread::sleep(Duration::from_millis(300));
	common::flush_peer(&peer);
	let _ = remote.read_until(Command::GetAddr);
	let between = remote.read_until(Command::GetAddr);
	assert!(
		!between.iter().any(|msg| msg.command() == Command::Inv),
		"re-announced inventory was not deduplicated",
	);

	peer.disconnect();
	peer.wait_for_disconnect();
}

#[test]
fn trickle_splits_at_five_thousand_entries() {
	let mut config = common::test_config();
	config.trickle_interval = Duration::from_millis(500);
	let (peer, mut remote) = negotiated_outbound(config);

	// One more announcement than fits in a single inv message.
	for i in 0u32..5001 {
		peer.queue_inventory(InvVect::new(InvType::Tx, sha256d::Hash::hash(&i.to_le_bytes())));
	}

	let mut sizes = Vec::new();
	let mut total = 0;
	while total < 5001 {
		match remote.read_frame() {
			Message::Inv(invs) => {
				total += invs.len();
				sizes.push(invs.len());
			}
			Message::Ping(_) => {}
			msg => panic!("expected trickled invs, got {:?}", msg.command()),
		}
	}
	assert_eq!(sizes, vec![5000, 1]);

	peer.disconnect();
	peer.wait_for_disconnect();
}

#[test]
fn sendheaders_latches_preference() {
	let (peer, mut remote) = negotiated_outbound(common::test_config());
	assert!(!peer.wants_headers());

	remote.write_frame(&Message::SendHeaders);
	common::wait_until("sendheaders latch", || peer.wants_headers());

	peer.disconnect();
	peer.wait_for_disconnect();
}

#[test]
fn pings_carry_fresh_nonces_and_expect_pongs() {
	let (peer, mut remote) = negotiated_outbound(common::test_config());

	// Wait for a periodic ping and answer it.
	let nonce = loop {
		match remote.read_frame() {
			Message::Ping(nonce) => break nonce,
			msg => panic!("expected a ping, got {:?}", msg.command()),
		}
	};
	assert_ne!(nonce, 0);
	assert_eq!(peer.last_ping_nonce(), nonce);

	remote.write_frame(&Message::Pong(nonce));
	common::wait_until("pong recorded", || peer.last_ping_nonce() == 0);

	peer.disconnect();
	peer.wait_for_disconnect();
}
