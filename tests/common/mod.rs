//! Test harness: a fake remote peer that speaks the raw wire protocol
//! over a real TCP socket, plus some polling helpers.

#![allow(dead_code)] // not every test binary uses every helper

use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

use bitcoin::network::constants::{Network, ServiceFlags};

use bitcoin_peer::wire::{
	self, Command, Message, MessageEncoding, NetAddress, VersionMessage,
};
use bitcoin_peer::Config;

/// How long the harness waits for a single frame or condition.
pub const HARNESS_TIMEOUT: Duration = Duration::from_secs(10);

pub fn test_config() -> Config {
	let _ = env_logger::builder().is_test(true).try_init();
	Config {
		network: Network::Regtest,
		user_agent_name: "harness".to_owned(),
		user_agent_version: "0.0.1".to_owned(),
		services: ServiceFlags::NETWORK,
		newest_block: Some(Box::new(|| (bitcoin::BlockHash::default(), 100))),
		..Config::default()
	}
}

/// Bind a listener on an ephemeral localhost port.
pub fn listen() -> (TcpListener, String) {
	let listener = TcpListener::bind("127.0.0.1:0").expect("bind harness listener");
	let addr = listener.local_addr().expect("listener addr").to_string();
	(listener, addr)
}

/// Poll for a condition instead of sleeping a fixed amount.
pub fn wait_until(what: &str, cond: impl Fn() -> bool) {
	let start = Instant::now();
	while !cond() {
		if start.elapsed() > HARNESS_TIMEOUT {
			panic!("timed out waiting for {}", what);
		}
		std::thread::sleep(Duration::from_millis(10));
	}
}

/// The remote end of a peer connection, driven manually through the wire
/// codec.
pub struct RemotePeer {
	pub stream: TcpStream,
	pub pver: u32,
	pub magic: u32,
}

impl RemotePeer {
	pub fn new(stream: TcpStream, network: Network) -> RemotePeer {
		stream
			.set_read_timeout(Some(HARNESS_TIMEOUT))
			.expect("set harness read timeout");
		RemotePeer { stream, pver: wire::PROTOCOL_VERSION, magic: network.magic() }
	}

	/// Connect to the given "host:port" address.
	pub fn connect(addr: &str, network: Network) -> RemotePeer {
		let stream = TcpStream::connect(addr).expect("connect to peer under test");
		RemotePeer::new(stream, network)
	}

	/// Accept one connection from the listener.
	pub fn accept(listener: &TcpListener, network: Network) -> RemotePeer {
		let (stream, _) = listener.accept().expect("accept peer under test");
		RemotePeer::new(stream, network)
	}

	pub fn write_frame(&mut self, msg: &Message) {
		let (_, res) =
			wire::write_message(&mut self.stream, msg, self.pver, self.magic, MessageEncoding::Witness);
		res.expect("harness write");
	}

	/// Write raw bytes, bypassing the codec. For malformed-input tests.
	pub fn write_raw(&mut self, bytes: &[u8]) {
		use std::io::Write;
		self.stream.write_all(bytes).expect("harness raw write");
	}

	pub fn read_frame(&mut self) -> Message {
		let (_, res) = wire::read_message(
			&mut self.stream,
			self.pver,
			self.magic,
			MessageEncoding::Witness,
		);
		res.expect("harness read").0
	}

	pub fn try_read_frame(&mut self) -> Result<Message, wire::Error> {
		let (_, res) = wire::read_message(
			&mut self.stream,
			self.pver,
			self.magic,
			MessageEncoding::Witness,
		);
		res.map(|(msg, _)| msg)
	}

	/// Read frames until one with the given command arrives, returning
	/// the frames that came before it.
	pub fn read_until(&mut self, what: Command) -> Vec<Message> {
		let mut before = Vec::new();
		loop {
			let msg = self.read_frame();
			if msg.command() == what {
				return before;
			}
			before.push(msg);
		}
	}

	/// Read frames, ignoring pings, until one with the given command.
	pub fn expect(&mut self, what: Command) -> Message {
		loop {
			let msg = self.read_frame();
			if msg.command() == what {
				return msg;
			}
			if msg.command() == Command::Ping {
				continue;
			}
			panic!("expected {} frame, got {}", what, msg.command());
		}
	}

	/// A plausible version message for the fake remote.
	pub fn version_msg(&self, nonce: u64) -> VersionMessage {
		let me = NetAddress::new("127.0.0.1".parse().unwrap(), 0, ServiceFlags::NETWORK);
		let you = NetAddress::new("127.0.0.1".parse().unwrap(), 0, ServiceFlags::NONE);
		let mut msg = VersionMessage::new(me, you, nonce, 100);
		msg.services = ServiceFlags::NETWORK;
		msg.add_user_agent("fakeremote", "0.0.1", &[]).unwrap();
		msg
	}

	/// Drive the handshake against an outbound peer under test: it speaks
	/// first, we answer with our version and ack its.
	pub fn handshake_as_server(&mut self, nonce: u64) -> VersionMessage {
		let their_version = match self.expect(Command::Version) {
			Message::Version(v) => v,
			msg => panic!("unexpected message: {:?}", msg.command()),
		};
		self.write_frame(&Message::Version(self.version_msg(nonce)));
		self.expect(Command::Verack);
		self.write_frame(&Message::Verack);
		their_version
	}

	/// Drive the handshake against an inbound peer under test: we speak
	/// first.
	pub fn handshake_as_client(&mut self, nonce: u64) -> VersionMessage {
		self.write_frame(&Message::Version(self.version_msg(nonce)));
		let their_version = match self.expect(Command::Version) {
			Message::Version(v) => v,
			msg => panic!("unexpected message: {:?}", msg.command()),
		};
		self.expect(Command::Verack);
		self.write_frame(&Message::Verack);
		their_version
	}
}

/// Queue a getaddr with a completion channel and wait for it to hit the
/// wire. Everything queued before it is on the socket once this returns.
pub fn flush_peer(peer: &bitcoin_peer::Peer) {
	let (done_tx, done_rx) = crossbeam_channel::bounded(1);
	peer.queue_message(Message::GetAddr, Some(done_tx));
	done_rx
		.recv_timeout(HARNESS_TIMEOUT)
		.expect("peer never flushed the fence message");
}
