//! The per-connection peer state machine.
//!
//! A [Peer] provides a concurrency safe bitcoin peer for handling
//! communications via the peer-to-peer protocol. It offers full duplex
//! reading and writing, automatic handling of the initial handshake,
//! querying of usage statistics and other information about the remote
//! peer such as its address, user agent and protocol version, output
//! message queuing, inventory trickling, and the ability to register
//! callbacks for handling protocol messages.
//!
//! Outbound messages are typically queued via [Peer::queue_message] or
//! [Peer::queue_inventory]. `queue_message` is intended for all messages,
//! including responses to data such as blocks and transactions.
//! `queue_inventory` on the other hand is only intended for relaying
//! inventory as it employs a trickling mechanism to batch the inventory
//! together. Helpers for pushing messages that require special handling
//! are provided as a convenience.
//!
//! Internally the data flow is split over five tasks. Incoming messages
//! are read and dispatched by the input task. Outbound messages flow
//! through the queue task, which muxes direct messages and trickled
//! inventory so that submitters never block on a peer that is busy
//! sending, into the output task, which owns the socket writes. The stall
//! task tracks expected responses and their deadlines, and the ping task
//! periodically emits pings.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use std::{fmt, io, thread};

use bitcoin::hashes::sha256d;
use bitcoin::network::constants::ServiceFlags;
use bitcoin::BlockHash;
use crossbeam_channel as chan;
use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::mru::MruSet;
use crate::signal;
use crate::time::{self, TimeExt};
use crate::waitgroup::WaitGroup;
use crate::wire::{
	self, Command, InvVect, LocatorRequest, Message, MessageEncoding, NetAddress, Reject,
	RejectCode, VersionMessage,
};
use crate::{registry, Error};

/// The maximum protocol version the peer supports.
pub const MAX_PROTOCOL_VERSION: u32 = wire::PROTOCOL_VERSION;

/// The lowest protocol version that a connected peer may advertise.
pub const MIN_ACCEPTABLE_PROTOCOL_VERSION: u32 = 1;

/// The minimum time between attempts to send an inv message to a peer.
pub const DEFAULT_TRICKLE_INTERVAL: Duration = Duration::from_secs(1);

/// The number of elements the output channels use.
const OUTPUT_BUFFER_SIZE: usize = 1000;

/// The maximum amount of inventory in a single inv message when trickling
/// inventory to remote peers.
const MAX_INV_TRICKLE_SIZE: usize = 5000;

/// The maximum number of items in the known inventory cache.
const MAX_KNOWN_INVENTORY: usize = 30_000;

/// The interval of time to wait in between sending ping messages.
const PING_INTERVAL: Duration = Duration::from_secs(1);

/// The duration of inactivity before we timeout a peer that hasn't
/// completed the initial version negotiation.
const NEGOTIATE_TIMEOUT: Duration = Duration::from_secs(27);

/// The duration of inactivity before we time out a peer.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// The interval of time between each check for stalled peers.
const STALL_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// The base maximum amount of time messages that expect a response will
/// wait before disconnecting the peer for stalling. The deadlines are
/// adjusted for callback running times and checked on each stall tick.
const STALL_RESPONSE_TIMEOUT: Duration = Duration::from_secs(360);

/// The connection lifecycle of a [Peer].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PeerState {
	/// No socket has been associated yet.
	Disconnected,
	/// A socket is attached but negotiation hasn't started.
	Connecting,
	/// The version/verack exchange is in progress.
	Handshaking,
	/// The handshake completed; the peer is fully operational.
	Established,
	/// The connection is being torn down.
	Disconnecting,
	/// All tasks have finished and the socket is closed.
	Terminated,
}

impl PeerState {
	fn from_u8(v: u8) -> PeerState {
		match v {
			0 => PeerState::Disconnected,
			1 => PeerState::Connecting,
			2 => PeerState::Handshaking,
			3 => PeerState::Established,
			4 => PeerState::Disconnecting,
			_ => PeerState::Terminated,
		}
	}
}

/// A snapshot of peer flags and statistics at a point in time.
#[derive(Debug, Clone)]
pub struct StatsSnap {
	pub id: u32,
	pub addr: String,
	pub services: ServiceFlags,
	pub last_send: SystemTime,
	pub last_recv: SystemTime,
	pub bytes_sent: u64,
	pub bytes_received: u64,
	pub conn_time: Option<SystemTime>,
	pub time_offset: i64,
	/// The protocol version advertised by the remote peer.
	pub version: u32,
	pub user_agent: String,
	pub inbound: bool,
	pub starting_height: i32,
	pub last_block: i32,
	pub last_ping_nonce: u64,
	pub last_ping_time: Option<SystemTime>,
	pub last_ping_micros: i64,
}

/// A message on its way out along with a channel to signal when it has
/// been sent (or won't be, due to shutdown).
struct OutMsg {
	message: Message,
	done: Option<chan::Sender<()>>,
	encoding: MessageEncoding,
}

/// Events the input and output tasks report to the stall task.
enum StallControl {
	/// A message is being sent to the remote peer.
	Send(Command),
	/// A message has been received from the remote peer.
	Receive(Command),
	/// A message listener is about to be invoked.
	HandlerStart,
	/// A message listener has completed.
	HandlerDone,
}

/// Peer fields only written during version negotiation, protected by one
/// lock.
struct Flags {
	na: Option<NetAddress>,
	id: u32,
	user_agent: String,
	services: ServiceFlags,
	version_known: bool,
	/// Protocol version advertised by the remote.
	advertised_protocol_version: u32,
	/// Negotiated protocol version.
	protocol_version: u32,
	/// The peer sent us a sendheaders message.
	send_headers_preferred: bool,
	verack_received: bool,
	wire_encoding: MessageEncoding,
	/// The nonce from the remote's version message.
	nonce: u64,
}

/// Peer statistics, protected by the stats lock.
#[derive(Default)]
struct Stats {
	time_offset: i64,
	time_connected: Option<SystemTime>,
	starting_height: i32,
	last_block: i32,
	last_announced_block: Option<BlockHash>,
	/// Set to the sent nonce while a ping is outstanding.
	last_ping_nonce: u64,
	last_ping_time: Option<SystemTime>,
	last_ping_micros: i64,
}

/// The receiving halves of the peer channels, handed to the tasks when
/// they start.
struct TaskReceivers {
	output_queue_rx: chan::Receiver<OutMsg>,
	send_queue_rx: chan::Receiver<OutMsg>,
	send_done_rx: chan::Receiver<()>,
	output_inv_rx: chan::Receiver<InvVect>,
	stall_rx: chan::Receiver<StallControl>,
}

/// A connection to a single remote peer.
///
/// Create one with [Peer::new_inbound] or [Peer::new_outbound] and hand
/// in the socket with [Peer::associate_connection] once the TCP
/// connection exists. All methods are safe for concurrent access.
pub struct Peer {
	// Transfer counters and connection flags, updated atomically.
	bytes_received: AtomicU64,
	bytes_sent: AtomicU64,
	last_recv: AtomicI64,
	last_send: AtomicI64,
	connected: AtomicBool,
	disconnect: AtomicBool,
	state: AtomicU8,

	cfg: Config,
	inbound: bool,
	addr: RwLock<String>,
	socket: Mutex<Option<TcpStream>>,

	flags: Mutex<Flags>,
	stats: RwLock<Stats>,

	known_inventory: Mutex<MruSet<InvVect>>,
	prev_get_blocks: Mutex<Option<(BlockHash, BlockHash)>>,
	prev_get_headers: Mutex<Option<(BlockHash, BlockHash)>>,

	output_queue_tx: chan::Sender<OutMsg>,
	send_queue_tx: chan::Sender<OutMsg>,
	send_done_tx: chan::Sender<()>,
	output_inv_tx: chan::Sender<InvVect>,
	stall_tx: chan::Sender<StallControl>,
	receivers: Mutex<Option<TaskReceivers>>,

	in_quit: signal::Pair,
	queue_quit: signal::Pair,
	out_quit: signal::Pair,
	quit: signal::Pair,
	tasks: WaitGroup,
}

impl Peer {
	/// Create a new inbound peer. Hand in the accepted socket with
	/// [Peer::associate_connection] to begin processing messages.
	pub fn new_inbound(config: Config) -> Arc<Peer> {
		Arc::new(Peer::new_base(config, true))
	}

	/// Create a new outbound peer for the given "host:port" address.
	pub fn new_outbound(config: Config, addr: &str) -> Result<Arc<Peer>, Error> {
		let peer = Peer::new_base(config, false);
		*peer.addr.write() = addr.to_owned();

		let (host, port) = split_host_port(addr)?;
		let na = match peer.cfg.host_to_net_address {
			Some(ref hook) => hook(&host, port, ServiceFlags::NONE)?,
			None => {
				let ip: IpAddr = host
					.parse()
					.map_err(|_| Error::InvalidAddress(addr.to_owned()))?;
				NetAddress::new(ip, port, ServiceFlags::NONE)
			}
		};
		peer.flags.lock().na = Some(na);
		Ok(Arc::new(peer))
	}

	fn new_base(mut config: Config, inbound: bool) -> Peer {
		// Default to the max supported protocol version if the caller
		// didn't pick one, and to the default trickle interval.
		if config.protocol_version == 0 {
			config.protocol_version = MAX_PROTOCOL_VERSION;
		}
		if config.trickle_interval == Duration::from_secs(0) {
			config.trickle_interval = DEFAULT_TRICKLE_INTERVAL;
		}

		let (output_queue_tx, output_queue_rx) = chan::bounded(OUTPUT_BUFFER_SIZE);
		let (send_queue_tx, send_queue_rx) = chan::bounded(1);
		let (send_done_tx, send_done_rx) = chan::bounded(1);
		let (output_inv_tx, output_inv_rx) = chan::bounded(OUTPUT_BUFFER_SIZE);
		let (stall_tx, stall_rx) = chan::bounded(1);

		Peer {
			bytes_received: AtomicU64::new(0),
			bytes_sent: AtomicU64::new(0),
			last_recv: AtomicI64::new(0),
			last_send: AtomicI64::new(0),
			connected: AtomicBool::new(false),
			disconnect: AtomicBool::new(false),
			state: AtomicU8::new(PeerState::Disconnected as u8),
			flags: Mutex::new(Flags {
				na: None,
				id: 0,
				user_agent: String::new(),
				services: config.services,
				version_known: false,
				advertised_protocol_version: 0,
				protocol_version: config.protocol_version,
				send_headers_preferred: false,
				verack_received: false,
				wire_encoding: MessageEncoding::Base,
				nonce: 0,
			}),
			stats: RwLock::new(Stats::default()),
			known_inventory: Mutex::new(MruSet::new(MAX_KNOWN_INVENTORY)),
			prev_get_blocks: Mutex::new(None),
			prev_get_headers: Mutex::new(None),
			output_queue_tx,
			send_queue_tx,
			send_done_tx,
			output_inv_tx,
			stall_tx,
			receivers: Mutex::new(Some(TaskReceivers {
				output_queue_rx,
				send_queue_rx,
				send_done_rx,
				output_inv_rx,
				stall_rx,
			})),
			in_quit: signal::pair(),
			queue_quit: signal::pair(),
			out_quit: signal::pair(),
			quit: signal::pair(),
			tasks: WaitGroup::new(),
			cfg: config,
			inbound,
			addr: RwLock::new(String::new()),
			socket: Mutex::new(None),
		}
	}

	/// Associate the given socket with the peer and start the handshake.
	/// Calling this when the peer is already connected has no effect.
	pub fn associate_connection(self: &Arc<Self>, conn: TcpStream) {
		if self.connected.swap(true, Ordering::SeqCst) {
			debug!("peer {} already has a connection, dropping the new one", self);
			return;
		}
		self.stats.write().time_connected = Some(SystemTime::now());
		self.advance_state(PeerState::Connecting);

		if self.inbound {
			// Outbound peers set this up at creation time, no point
			// recomputing.
			match conn.peer_addr() {
				Ok(addr) => {
					*self.addr.write() = addr.to_string();
					let services = self.flags.lock().services;
					self.flags.lock().na =
						Some(NetAddress::from_socket_addr(&addr, services));
				}
				Err(e) => {
					error!("cannot create remote net address: {}", e);
					*self.socket.lock() = Some(conn);
					self.disconnect();
					return;
				}
			}
		}
		*self.socket.lock() = Some(conn);

		let peer = Arc::clone(self);
		let res = thread::Builder::new()
			.name(format!("peer-{}", self.addr.read()))
			.spawn(move || {
				if let Err(e) = peer.run() {
					debug!("cannot start peer {}: {}", peer, e);
					peer.disconnect();
				}
				peer.tasks.wait();
				peer.advance_state(PeerState::Terminated);
				trace!("peer {} terminated", peer);
			});
		if let Err(e) = res {
			error!("failed to spawn handshake thread for {}: {}", self, e);
			self.disconnect();
		}
	}

	/// Negotiate the protocol and start the long-running tasks.
	fn run(self: &Arc<Self>) -> Result<(), Error> {
		trace!("starting peer {}", self);
		self.advance_state(PeerState::Handshaking);

		let mut stream = match *self.socket.lock() {
			Some(ref conn) => conn.try_clone()?,
			None => return Err(Error::Io(io::Error::new(io::ErrorKind::NotConnected, "no socket"))),
		};

		// Bound the whole negotiation; an unresponsive remote fails with
		// a timeout instead of hanging the handshake forever.
		stream.set_read_timeout(Some(NEGOTIATE_TIMEOUT))?;
		stream.set_write_timeout(Some(NEGOTIATE_TIMEOUT))?;

		let res = if self.inbound {
			self.read_remote_version(&mut stream)
				.and_then(|_| self.write_local_version(&mut stream))
		} else {
			self.write_local_version(&mut stream)
				.and_then(|_| self.read_remote_version(&mut stream))
		};
		if let Err(e) = res {
			return Err(negotiate_error(e));
		}
		trace!("negotiated protocol version {} for peer {}", self.protocol_version(), self);

		// From here on the input task enforces the idle timeout through
		// its read deadline; writes block until the socket drains or the
		// connection dies.
		stream.set_read_timeout(Some(IDLE_TIMEOUT))?;
		stream.set_write_timeout(None)?;
		let writer = stream.try_clone()?;
		let reader = stream;

		let TaskReceivers {
			output_queue_rx,
			send_queue_rx,
			send_done_rx,
			output_inv_rx,
			stall_rx,
		} = self
			.receivers
			.lock()
			.take()
			.expect("peer tasks already started");

		self.spawn_task("stall", {
			let peer = Arc::clone(self);
			move || peer.stall_handler(stall_rx)
		});
		self.spawn_task("in", {
			let peer = Arc::clone(self);
			move || peer.in_handler(reader)
		});
		self.spawn_task("queue", {
			let peer = Arc::clone(self);
			move || peer.queue_handler(output_queue_rx, send_done_rx, output_inv_rx)
		});
		self.spawn_task("out", {
			let peer = Arc::clone(self);
			move || peer.out_handler(writer, send_queue_rx)
		});
		self.spawn_task("ping", {
			let peer = Arc::clone(self);
			move || peer.ping_handler()
		});

		// Send our verack now that the io machinery is running.
		self.queue_message(Message::Verack, None);
		Ok(())
	}

	fn spawn_task(self: &Arc<Self>, name: &str, task: impl FnOnce() + Send + 'static) {
		let worker = self.tasks.worker();
		let res = thread::Builder::new()
			.name(format!("peer-{}-{}", self.id(), name))
			.spawn(move || {
				task();
				drop(worker);
			});
		if let Err(e) = res {
			error!("failed to spawn {} task for {}: {}", name, self, e);
			self.disconnect();
		}
	}

	// Handshake ///////////////////////////////////////////////////////////

	/// Wait for the remote version message, check it and absorb the
	/// negotiated state.
	fn read_remote_version(&self, stream: &mut TcpStream) -> Result<(), Error> {
		if self.flags.lock().version_known {
			debug!("received version from {} previously, dropping", self);
			return Ok(());
		}

		let (msg, _) = self.read_message(stream)?;
		let version = match msg {
			Message::Version(version) => version,
			other => {
				// Notify and disconnect peers whose first message is not
				// a version message.
				let reject = Reject::new(
					other.command().as_str(),
					RejectCode::Malformed,
					"a version message must precede all others",
				);
				self.write_handshake_reject(stream, reject);
				return Err(Error::ExpectedVersion);
			}
		};

		// Detect self connections.
		if !registry::self_connections_allowed() && registry::is_own_nonce(version.nonce) {
			return Err(Error::SelfConnection);
		}

		// Negotiate the protocol version and absorb what the remote
		// advertised.
		{
			let mut flags = self.flags.lock();
			flags.nonce = version.nonce;
			flags.advertised_protocol_version = version.version;
			flags.protocol_version = flags.protocol_version.min(version.version);
			flags.version_known = true;
			flags.services = version.services;
			flags.user_agent = version.user_agent.clone();
			flags.id = registry::next_peer_id();
		}
		{
			let mut stats = self.stats.write();
			stats.last_block = version.last_block;
			stats.starting_height = version.last_block;
			stats.time_offset = version.timestamp - time::unix_time();
		}

		// Notify and disconnect peers with a protocol version that is
		// too old.
		if version.version < MIN_ACCEPTABLE_PROTOCOL_VERSION {
			let reason = format!(
				"protocol version must be {} or greater",
				MIN_ACCEPTABLE_PROTOCOL_VERSION,
			);
			let reject =
				Reject::new(Command::Version.as_str(), RejectCode::Obsolete, &reason);
			self.write_handshake_reject(stream, reject);
			return Err(Error::ObsoleteVersion(version.version));
		}

		// The version listener may veto the peer.
		if let Some(ref on_version) = self.cfg.listeners.on_version {
			if let Some(reject) = on_version(self, &version) {
				let reason = reject.reason.clone();
				self.write_handshake_reject(stream, reject);
				return Err(Error::ListenerReject(reason));
			}
		}
		Ok(())
	}

	/// Write a reject during the handshake. The negotiated version may
	/// already have dropped below the reject threshold, so the frame is
	/// encoded at our own maximum version to make sure it leaves before
	/// the connection is torn down.
	fn write_handshake_reject(&self, stream: &mut TcpStream, reject: Reject) {
		let msg = Message::Reject(reject);
		trace!("sending {} to {}", msg.command(), self);
		let (n, res) = wire::write_message(
			stream,
			&msg,
			MAX_PROTOCOL_VERSION,
			self.cfg.network.magic(),
			MessageEncoding::Witness,
		);
		self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
		if let Some(ref on_write) = self.cfg.listeners.on_write {
			on_write(self, n, &msg, res.as_ref().err());
		}
	}

	fn write_local_version(&self, stream: &mut TcpStream) -> Result<(), Error> {
		let version = self.local_version_msg()?;
		self.write_message(stream, &Message::Version(version), MessageEncoding::Witness)?;
		Ok(())
	}

	/// Create the version message to send to the remote peer.
	fn local_version_msg(&self) -> Result<VersionMessage, Error> {
		let block_num = match self.cfg.newest_block {
			Some(ref newest_block) => newest_block().1,
			None => 0,
		};

		let their_na = self
			.flags
			.lock()
			.na
			.unwrap_or_else(|| NetAddress::unroutable(ServiceFlags::NONE));
		// If we are behind a proxy and the connection comes from the
		// proxy then replace the address with a non-routable one. This
		// prevents leaking the tor proxy address.
		let their_na = match self.cfg.proxy {
			Some(ref proxy) if !proxy.is_empty() => match split_host_port(proxy) {
				Ok((proxy_host, _)) if their_na.ip.to_string() != proxy_host => their_na,
				// An invalid proxy means a misconfiguration, stay on the
				// safe side.
				_ => NetAddress::unroutable(their_na.services),
			},
			_ => their_na,
		};

		let our_na = NetAddress::new(self.cfg.ip, self.cfg.port, self.cfg.services);

		// A unique nonce for this peer, remembered so connections to
		// ourselves can be recognized.
		let nonce = fastrand::u64(..);
		registry::register_nonce(nonce);

		let mut msg = VersionMessage::new(our_na, their_na, nonce, block_num);
		msg.add_user_agent(
			&self.cfg.user_agent_name,
			&self.cfg.user_agent_version,
			&self.cfg.user_agent_comments,
		)?;
		// Advertise our services, our max supported protocol version and
		// whether we want inv messages for transactions.
		msg.services = self.cfg.services;
		msg.version = self.cfg.protocol_version;
		msg.disable_relay_tx = self.cfg.disable_relay_tx;
		Ok(msg)
	}

	// Message io //////////////////////////////////////////////////////////

	/// Read the next message from the peer, keeping the receive counter
	/// and the on_read listener informed.
	fn read_message(&self, r: &mut TcpStream) -> Result<(Message, Vec<u8>), wire::Error> {
		let (n, res) = wire::read_message(
			r,
			self.protocol_version(),
			self.cfg.network.magic(),
			self.wire_encoding(),
		);
		self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
		if let Some(ref on_read) = self.cfg.listeners.on_read {
			match res {
				Ok((ref msg, _)) => on_read(self, n, Some(msg), None),
				Err(ref e) => on_read(self, n, None, Some(e)),
			}
		}
		let (msg, buf) = res?;
		trace!("received {} from {}", msg.command(), self);
		Ok((msg, buf))
	}

	/// Write a message to the peer, keeping the send counter and the
	/// on_write listener informed. Messages are quietly dropped while the
	/// peer is disconnecting.
	fn write_message(
		&self,
		w: &mut TcpStream,
		msg: &Message,
		enc: MessageEncoding,
	) -> Result<(), wire::Error> {
		if self.disconnect.load(Ordering::SeqCst) {
			return Ok(());
		}
		trace!("sending {} to {}", msg.command(), self);
		let (n, res) = wire::write_message(
			w,
			msg,
			self.protocol_version(),
			self.cfg.network.magic(),
			enc,
		);
		self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
		if let Some(ref on_write) = self.cfg.listeners.on_write {
			on_write(self, n, msg, res.as_ref().err());
		}
		res
	}

	/// Whether the read error may be ignored without disconnecting the
	/// peer. Regression tests deliberately send malformed messages from
	/// localhost.
	fn is_allowed_read_error(&self, e: &wire::Error) -> bool {
		if self.cfg.network != bitcoin::network::constants::Network::Regtest {
			return false;
		}
		if !e.is_malformed() {
			return false;
		}
		match split_host_port(&self.addr.read()) {
			Ok((host, _)) => host == "127.0.0.1" || host == "localhost",
			Err(_) => false,
		}
	}

	/// Whether the read error should be answered with a reject message.
	fn should_handle_read_error(&self, e: &wire::Error) -> bool {
		// Not when we're forcibly disconnecting or the remote simply
		// went away.
		if self.disconnect.load(Ordering::SeqCst) {
			return false;
		}
		match *e {
			wire::Error::Io(ref e) => !matches!(
				e.kind(),
				io::ErrorKind::ConnectionReset
					| io::ErrorKind::ConnectionAborted
					| io::ErrorKind::BrokenPipe
			),
			_ => true,
		}
	}

	// Tasks ///////////////////////////////////////////////////////////////

	/// Handles all incoming messages for the peer.
	fn in_handler(&self, mut reader: TcpStream) {
		trace!("starting input handler for {}", self);
		'out: while !self.disconnect.load(Ordering::SeqCst) {
			let (msg, buf) = match self.read_message(&mut reader) {
				Ok(read) => read,
				Err(e) => {
					// The socket read deadline doubles as the idle timer;
					// it is pushed back by every received message.
					if is_timeout(&e) {
						warn!("peer {} no answer for {:?} -- disconnecting", self, IDLE_TIMEOUT);
						break 'out;
					}
					if self.is_allowed_read_error(&e) {
						error!("allowed test error from {}: {}", self, e);
						continue;
					}
					if self.should_handle_read_error(&e) {
						let err_msg = format!("can't read message from {}: {}", self, e);
						if !is_unexpected_eof(&e) {
							error!("{}", err_msg);
						}
						// Answer the malformed message with a reject and
						// wait for it to be sent before disconnecting.
						self.push_reject("malformed", RejectCode::Malformed, &err_msg, None, true);
					}
					break 'out;
				}
			};
			self.last_recv.store(time::unix_time(), Ordering::SeqCst);
			let command = msg.command();
			let _ = self.stall_tx.send(StallControl::Receive(command));

			let _ = self.stall_tx.send(StallControl::HandlerStart);
			let listeners = &self.cfg.listeners;
			match msg {
				Message::Version(_) => {
					// Limit to one version message per peer.
					self.push_reject(
						command.as_str(),
						RejectCode::Duplicate,
						"duplicate version message",
						None,
						true,
					);
					let _ = self.stall_tx.send(StallControl::HandlerDone);
					break 'out;
				}
				Message::Verack => {
					// The flag latches on the first verack; spurious
					// duplicates are dropped.
					let first = {
						let mut flags = self.flags.lock();
						let first = !flags.verack_received;
						flags.verack_received = true;
						first
					};
					if first {
						self.advance_state(PeerState::Established);
						if let Some(ref on_ver_ack) = listeners.on_ver_ack {
							on_ver_ack(self);
						}
					}
				}
				Message::Ping(nonce) => {
					self.handle_ping(nonce);
					if let Some(ref on_ping) = listeners.on_ping {
						on_ping(self, nonce);
					}
				}
				Message::Pong(nonce) => {
					self.handle_pong(nonce);
					if let Some(ref on_pong) = listeners.on_pong {
						on_pong(self, nonce);
					}
				}
				Message::SendHeaders => {
					self.flags.lock().send_headers_preferred = true;
					if let Some(ref on_send_headers) = listeners.on_send_headers {
						on_send_headers(self);
					}
				}
				Message::GetAddr => {
					if let Some(ref on_get_addr) = listeners.on_get_addr {
						on_get_addr(self);
					}
				}
				Message::Addr(addrs) => {
					if let Some(ref on_addr) = listeners.on_addr {
						on_addr(self, &addrs);
					}
				}
				Message::Alert(alert) => {
					if let Some(ref on_alert) = listeners.on_alert {
						on_alert(self, &alert);
					}
				}
				Message::MemPool => {
					if let Some(ref on_mem_pool) = listeners.on_mem_pool {
						on_mem_pool(self);
					}
				}
				Message::Tx(tx) => {
					if let Some(ref on_tx) = listeners.on_tx {
						on_tx(self, &tx);
					}
				}
				Message::Block(block) => {
					if let Some(ref on_block) = listeners.on_block {
						on_block(self, &block, &buf);
					}
				}
				Message::Inv(invs) => {
					if let Some(ref on_inv) = listeners.on_inv {
						on_inv(self, &invs);
					}
				}
				Message::Headers(headers) => {
					if let Some(ref on_headers) = listeners.on_headers {
						on_headers(self, &headers);
					}
				}
				Message::NotFound(invs) => {
					if let Some(ref on_not_found) = listeners.on_not_found {
						on_not_found(self, &invs);
					}
				}
				Message::GetData(invs) => {
					if let Some(ref on_get_data) = listeners.on_get_data {
						on_get_data(self, &invs);
					}
				}
				Message::GetBlocks(request) => {
					if let Some(ref on_get_blocks) = listeners.on_get_blocks {
						on_get_blocks(self, &request);
					}
				}
				Message::GetHeaders(request) => {
					if let Some(ref on_get_headers) = listeners.on_get_headers {
						on_get_headers(self, &request);
					}
				}
				Message::GetCFilters(request) => {
					if let Some(ref on_get_cfilters) = listeners.on_get_cfilters {
						on_get_cfilters(self, &request);
					}
				}
				Message::GetCFHeaders(request) => {
					if let Some(ref on_get_cfheaders) = listeners.on_get_cfheaders {
						on_get_cfheaders(self, &request);
					}
				}
				Message::GetCFCheckpt(request) => {
					if let Some(ref on_get_cfcheckpt) = listeners.on_get_cfcheckpt {
						on_get_cfcheckpt(self, &request);
					}
				}
				Message::CFilter(filter) => {
					if let Some(ref on_cfilter) = listeners.on_cfilter {
						on_cfilter(self, &filter);
					}
				}
				Message::CFHeaders(headers) => {
					if let Some(ref on_cfheaders) = listeners.on_cfheaders {
						on_cfheaders(self, &headers);
					}
				}
				Message::CFCheckpt(checkpt) => {
					if let Some(ref on_cfcheckpt) = listeners.on_cfcheckpt {
						on_cfcheckpt(self, &checkpt);
					}
				}
				Message::FeeFilter(rate) => {
					if let Some(ref on_fee_filter) = listeners.on_fee_filter {
						on_fee_filter(self, rate);
					}
				}
				Message::FilterAdd(data) => {
					if let Some(ref on_filter_add) = listeners.on_filter_add {
						on_filter_add(self, &data);
					}
				}
				Message::FilterClear => {
					if let Some(ref on_filter_clear) = listeners.on_filter_clear {
						on_filter_clear(self);
					}
				}
				Message::FilterLoad(filter) => {
					if let Some(ref on_filter_load) = listeners.on_filter_load {
						on_filter_load(self, &filter);
					}
				}
				Message::MerkleBlock(block) => {
					if let Some(ref on_merkle_block) = listeners.on_merkle_block {
						on_merkle_block(self, &block);
					}
				}
				Message::Reject(reject) => {
					if let Some(ref on_reject) = listeners.on_reject {
						on_reject(self, &reject);
					}
				}
			}
			let _ = self.stall_tx.send(StallControl::HandlerDone);
		}
		// Ensure the connection is closed.
		self.disconnect();
		self.in_quit.fire();
		trace!("peer input handler done for {}", self);
	}

	/// Handles the queuing of outgoing data for the peer. This runs as a
	/// muxer for various sources of input so that submitters don't block
	/// on us sending a message. The data is passed on to the output task
	/// to actually be written.
	fn queue_handler(
		&self,
		output_queue_rx: chan::Receiver<OutMsg>,
		send_done_rx: chan::Receiver<()>,
		output_inv_rx: chan::Receiver<InvVect>,
	) {
		trace!("starting queue handler for {}", self);
		let mut pending_msgs: VecDeque<OutMsg> = VecDeque::new();
		let mut inv_send_queue: VecDeque<InvVect> = VecDeque::new();
		let trickle_ticker = chan::tick(self.cfg.trickle_interval);
		let quit = self.quit.receiver().clone();

		// `waiting` tracks whether the output task holds a message, so at
		// cleanup time there is no confusion about who signals the done
		// channel of the head of the queue. `pending_msgs` only ever
		// contains messages not yet handed to the output task.
		let mut waiting = false;

		loop {
			chan::select! {
				recv(output_queue_rx) -> msg => match msg {
					Ok(msg) => waiting = self.queue_packet(msg, &mut pending_msgs, waiting),
					Err(_) => break,
				},
				// Notified when a message has been sent across the
				// network socket.
				recv(send_done_rx) -> res => {
					if res.is_err() {
						break;
					}
					match pending_msgs.pop_front() {
						Some(next) => { let _ = self.send_queue_tx.send(next); }
						None => waiting = false,
					}
				}
				recv(output_inv_rx) -> inv => {
					let iv = match inv {
						Ok(iv) => iv,
						Err(_) => break,
					};
					// No handshake? They'll find out soon enough.
					if !self.version_known() {
						continue;
					}
					if iv.inv_type.is_block() {
						// A new block is blasted out immediately,
						// skipping the inv trickle queue.
						let msg = OutMsg {
							message: Message::Inv(vec![iv]),
							done: None,
							encoding: MessageEncoding::Base,
						};
						waiting = self.queue_packet(msg, &mut pending_msgs, waiting);
					} else {
						inv_send_queue.push_back(iv);
					}
				}
				recv(trickle_ticker) -> _ => {
					if self.disconnect.load(Ordering::SeqCst) || inv_send_queue.is_empty() {
						continue;
					}
					// Create and send as many inv messages as needed to
					// drain the inventory send queue.
					let mut invs =
						Vec::with_capacity(inv_send_queue.len().min(MAX_INV_TRICKLE_SIZE));
					while let Some(iv) = inv_send_queue.pop_front() {
						// Don't send inventory that became known after
						// the initial check.
						if self.known_inventory.lock().contains(&iv) {
							continue;
						}
						invs.push(iv);
						if invs.len() >= MAX_INV_TRICKLE_SIZE {
							let full = std::mem::replace(
								&mut invs,
								Vec::with_capacity(
									inv_send_queue.len().min(MAX_INV_TRICKLE_SIZE),
								),
							);
							let msg = OutMsg {
								message: Message::Inv(full),
								done: None,
								encoding: MessageEncoding::Base,
							};
							waiting = self.queue_packet(msg, &mut pending_msgs, waiting);
						}
						self.add_known_inventory(&iv);
					}
					if !invs.is_empty() {
						let msg = OutMsg {
							message: Message::Inv(invs),
							done: None,
							encoding: MessageEncoding::Base,
						};
						waiting = self.queue_packet(msg, &mut pending_msgs, waiting);
					}
				}
				recv(quit) -> _ => break,
			}
		}

		// Drain everything left so no submitter is stuck waiting on us.
		for msg in pending_msgs.drain(..) {
			if let Some(done) = msg.done {
				let _ = done.try_send(());
			}
		}
		while let Ok(msg) = output_queue_rx.try_recv() {
			if let Some(done) = msg.done {
				let _ = done.try_send(());
			}
		}
		while output_inv_rx.try_recv().is_ok() {}
		self.queue_quit.fire();
		trace!("peer queue handler done for {}", self);
	}

	/// Hand the message to the output task, or park it in the pending
	/// list when a send is already in flight. Returns the new `waiting`
	/// state, which is always true.
	fn queue_packet(
		&self,
		msg: OutMsg,
		pending_msgs: &mut VecDeque<OutMsg>,
		waiting: bool,
	) -> bool {
		if !waiting {
			let _ = self.send_queue_tx.send(msg);
		} else {
			pending_msgs.push_back(msg);
		}
		true
	}

	/// Handles all outgoing messages for the peer: writes what the queue
	/// task hands over and reports completions.
	fn out_handler(&self, mut writer: TcpStream, send_queue_rx: chan::Receiver<OutMsg>) {
		trace!("starting output handler for {}", self);
		let quit = self.quit.receiver().clone();
		loop {
			chan::select! {
				recv(send_queue_rx) -> msg => {
					let msg = match msg {
						Ok(msg) => msg,
						Err(_) => break,
					};
					if let Message::Ping(nonce) = msg.message {
						// A pong is only expected in later protocol
						// versions; set up the latency measurement.
						if self.protocol_version() > wire::BIP0031_VERSION {
							let mut stats = self.stats.write();
							stats.last_ping_nonce = nonce;
							stats.last_ping_time = Some(SystemTime::now());
						}
					}
					let _ = self.stall_tx.send(StallControl::Send(msg.message.command()));

					let was_disconnecting = self.disconnect.load(Ordering::SeqCst);
					if let Err(e) = self.write_message(&mut writer, &msg.message, msg.encoding) {
						self.disconnect();
						if !was_disconnecting && !is_silent_io_error(&e) {
							error!("failed to send message to {}: {}", self, e);
						}
						if let Some(done) = msg.done {
							let _ = done.try_send(());
						}
						continue;
					}

					// The message went out; update the last send time,
					// signal the submitter if it asked for that, and let
					// the queue task deliver the next message.
					self.last_send.store(time::unix_time(), Ordering::SeqCst);
					if let Some(done) = msg.done {
						let _ = done.try_send(());
					}
					let _ = self.send_done_tx.send(());
				}
				recv(quit) -> _ => break,
			}
		}

		// Wait until the queue task is done so nothing new can land on
		// the send queue, then drain it so no submitter stays blocked.
		self.queue_quit.wait();
		while let Ok(msg) = send_queue_rx.try_recv() {
			if let Some(done) = msg.done {
				let _ = done.try_send(());
			}
		}
		self.out_quit.fire();
		trace!("peer output handler done for {}", self);
	}

	/// Handles stall detection for the peer: tracks expected responses
	/// and their deadlines while accounting for time spent in listeners.
	fn stall_handler(&self, stall_rx: chan::Receiver<StallControl>) {
		trace!("starting stall handler for {}", self);
		// Deadlines are pushed forward by the time listeners take,
		// because the input task doesn't read the next message until the
		// previous one is fully processed.
		let mut handler_active = false;
		let mut handlers_start_time = Instant::now();
		let mut deadline_offset = Duration::from_secs(0);
		let mut pending_responses: HashMap<Command, Instant> = HashMap::new();
		let stall_ticker = chan::tick(STALL_TICK_INTERVAL);
		// The stall task is the last to go: it only exits once both the
		// input and output tasks are done.
		let mut in_quit = self.in_quit.receiver().clone();
		let mut out_quit = self.out_quit.receiver().clone();
		let mut io_stopped = false;

		loop {
			// Which of the io quit signals fired this round, if any. The
			// receiver is swapped for a dead one outside the select so
			// an already-fired signal doesn't keep the select busy.
			let mut io_quit: Option<bool> = None;
			chan::select! {
				recv(stall_rx) -> ctl => {
					let ctl = match ctl {
						Ok(ctl) => ctl,
						Err(_) => break,
					};
					match ctl {
						StallControl::Send(command) => {
							maybe_add_deadline(&mut pending_responses, command);
						}
						StallControl::Receive(command) => match command {
							// Several responses settle a getdata; any one
							// of them clears the whole group.
							Command::Block
							| Command::MerkleBlock
							| Command::Tx
							| Command::NotFound => {
								pending_responses.remove(&Command::Block);
								pending_responses.remove(&Command::MerkleBlock);
								pending_responses.remove(&Command::Tx);
								pending_responses.remove(&Command::NotFound);
							}
							command => {
								pending_responses.remove(&command);
							}
						},
						StallControl::HandlerStart => {
							if handler_active {
								warn!("received handler start control command while a handler is already active");
								continue;
							}
							handler_active = true;
							handlers_start_time = Instant::now();
						}
						StallControl::HandlerDone => {
							if !handler_active {
								warn!("received handler done control command when a handler is not already active");
								continue;
							}
							// Extend active deadlines by the listener's
							// running time.
							deadline_offset += handlers_start_time.elapsed();
							handler_active = false;
						}
					}
				}
				recv(stall_ticker) -> _ => {
					let now = Instant::now();
					let mut offset = deadline_offset;
					if handler_active {
						offset += now - handlers_start_time;
					}
					// Disconnect the peer if any of the pending responses
					// didn't arrive by its adjusted deadline.
					for (&command, &deadline) in pending_responses.iter() {
						if now < deadline + offset {
							continue;
						}
						debug!(
							"peer {} appears to be stalled or misbehaving, {} timeout -- disconnecting",
							self, command,
						);
						self.disconnect();
						break;
					}
					// Reset the offset for the next tick.
					deadline_offset = Duration::from_secs(0);
				}
				recv(in_quit) -> _ => io_quit = Some(true),
				recv(out_quit) -> _ => io_quit = Some(false),
			}
			if let Some(input_side) = io_quit {
				if io_stopped {
					break;
				}
				io_stopped = true;
				if input_side {
					in_quit = chan::never();
				} else {
					out_quit = chan::never();
				}
			}
		}

		// Drain the control channel so the io tasks never block on it.
		while stall_rx.try_recv().is_ok() {}
		trace!("peer stall handler done for {}", self);
	}

	/// Periodically pings the peer.
	fn ping_handler(&self) {
		trace!("starting ping handler for {}", self);
		let ping_ticker = chan::tick(PING_INTERVAL);
		let quit = self.quit.receiver().clone();
		loop {
			chan::select! {
				recv(ping_ticker) -> _ => {
					self.queue_message(Message::Ping(fastrand::u64(..)), None);
				}
				recv(quit) -> _ => break,
			}
		}
		trace!("peer ping handler done for {}", self);
	}

	// Intrinsic message handling //////////////////////////////////////////

	/// Reply to a ping with a pong carrying the same nonce. Clients too
	/// old to know pong consider anything but failure a successful ping.
	fn handle_ping(&self, nonce: u64) {
		if self.protocol_version() > wire::BIP0031_VERSION {
			self.queue_message(Message::Pong(nonce), None);
		}
	}

	/// Record the round-trip time when a pong answers the last
	/// outstanding ping. Overlapping pings are ignored; only the latest
	/// one is tracked.
	fn handle_pong(&self, nonce: u64) {
		if self.protocol_version() <= wire::BIP0031_VERSION {
			return;
		}
		let mut stats = self.stats.write();
		if stats.last_ping_nonce != 0 && nonce == stats.last_ping_nonce {
			let rtt = stats
				.last_ping_time
				.map(|t| t.saturating_elapsed())
				.unwrap_or_default();
			stats.last_ping_micros = rtt.as_micros() as i64;
			stats.last_ping_nonce = 0;
		}
	}
}

impl Peer {
	// Outbound api ////////////////////////////////////////////////////////

	/// Add the message to the peer send queue.
	///
	/// When a done channel is supplied, one message is sent on it once
	/// the message has been sent to the remote (or definitely won't be,
	/// due to shutdown). The channel should have capacity for at least
	/// one message.
	pub fn queue_message(&self, msg: Message, done: Option<chan::Sender<()>>) {
		self.queue_message_with_encoding(msg, done, MessageEncoding::Base)
	}

	/// Like [Peer::queue_message], but with an explicit wire encoding to
	/// use for blocks and transactions.
	pub fn queue_message_with_encoding(
		&self,
		msg: Message,
		done: Option<chan::Sender<()>>,
		encoding: MessageEncoding,
	) {
		// Avoid blocking on tasks that already exited; they only drain
		// their channels once the disconnect flag is set.
		if !self.connected() {
			if let Some(done) = done {
				let _ = done.try_send(());
			}
			return;
		}
		let _ = self.output_queue_tx.send(OutMsg { message: msg, done, encoding });
	}

	/// Add the inventory to the send queue to be trickled to the peer in
	/// batches. Inventory the peer is already known to have is ignored.
	pub fn queue_inventory(&self, inv: InvVect) {
		// Don't announce inventory the peer is already known to have.
		if self.known_inventory.lock().contains(&inv) {
			return;
		}
		if !self.connected() {
			return;
		}
		let _ = self.output_inv_tx.send(inv);
	}

	/// Send an addr message with the provided addresses.
	///
	/// Limits the addresses to the maximum one message may carry by
	/// picking them uniformly at random when there are too many, and
	/// sends nothing when the slice is empty. Returns the addresses that
	/// were actually sent.
	pub fn push_addr(&self, addresses: &[NetAddress]) -> Vec<NetAddress> {
		if addresses.is_empty() {
			return Vec::new();
		}
		let mut list = addresses.to_vec();
		truncate_random(&mut list, wire::MAX_ADDR_PER_MSG);
		self.queue_message(Message::Addr(list.clone()), None);
		list
	}

	/// Send a getblocks message for the provided block locator and stop
	/// hash. Back-to-back duplicate requests are ignored.
	pub fn push_get_blocks(
		&self,
		locator: &[BlockHash],
		stop_hash: BlockHash,
	) -> Result<(), Error> {
		let begin = locator.first().copied();

		// Filter duplicate getblocks requests.
		{
			let prev = self.prev_get_blocks.lock();
			if let (Some((prev_begin, prev_stop)), Some(begin)) = (*prev, begin) {
				if prev_begin == begin && prev_stop == stop_hash {
					trace!(
						"filtering duplicate getblocks with begin hash {}, stop hash {}",
						begin, stop_hash,
					);
					return Ok(());
				}
			}
		}

		if locator.len() > wire::MAX_BLOCK_LOCATORS_PER_MSG {
			return Err(Error::TooManyLocatorHashes(locator.len()));
		}
		let msg = LocatorRequest {
			version: self.protocol_version(),
			locator_hashes: locator.to_vec(),
			stop_hash,
		};
		self.queue_message(Message::GetBlocks(msg), None);

		*self.prev_get_blocks.lock() = begin.map(|begin| (begin, stop_hash));
		Ok(())
	}

	/// Send a getheaders message for the provided block locator and stop
	/// hash. Back-to-back duplicate requests are ignored.
	pub fn push_get_headers(
		&self,
		locator: &[BlockHash],
		stop_hash: BlockHash,
	) -> Result<(), Error> {
		let begin = locator.first().copied();

		// Filter duplicate getheaders requests.
		{
			let prev = self.prev_get_headers.lock();
			if let (Some((prev_begin, prev_stop)), Some(begin)) = (*prev, begin) {
				if prev_begin == begin && prev_stop == stop_hash {
					trace!("filtering duplicate getheaders with begin hash {}", begin);
					return Ok(());
				}
			}
		}

		if locator.len() > wire::MAX_BLOCK_LOCATORS_PER_MSG {
			return Err(Error::TooManyLocatorHashes(locator.len()));
		}
		let msg = LocatorRequest {
			version: self.protocol_version(),
			locator_hashes: locator.to_vec(),
			stop_hash,
		};
		self.queue_message(Message::GetHeaders(msg), None);

		*self.prev_get_headers.lock() = begin.map(|begin| (begin, stop_hash));
		Ok(())
	}

	/// Send a reject message for the provided command, reject code,
	/// reject reason and hash.
	///
	/// The hash is only used when the rejected command is tx or block and
	/// should be None otherwise. When `wait` is set, the call only
	/// returns once the message has actually been sent.
	pub fn push_reject(
		&self,
		command: &str,
		code: RejectCode,
		reason: &str,
		hash: Option<sha256d::Hash>,
		wait: bool,
	) {
		// Don't bother with peers that predate the reject message.
		if self.version_known() && self.protocol_version() < wire::REJECT_VERSION {
			return;
		}
		let mut msg = Reject::new(command, code, reason);
		if command == Command::Tx.as_str() || command == Command::Block.as_str() {
			match hash {
				Some(hash) => msg.hash = hash,
				// The zero hash in Reject::new stands in.
				None => warn!(
					"sending a reject message for command type {} which should have specified a hash but does not",
					command,
				),
			}
		}

		if !wait {
			self.queue_message(Message::Reject(msg), None);
			return;
		}
		// Send the message and block until it has been sent.
		let (done_tx, done_rx) = chan::bounded(1);
		self.queue_message(Message::Reject(msg), Some(done_tx));
		let _ = done_rx.recv();
	}

	// Connection control //////////////////////////////////////////////////

	/// Whether the peer is currently connected.
	pub fn connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst) && !self.disconnect.load(Ordering::SeqCst)
	}

	/// Disconnect the peer by closing the connection. Has no effect when
	/// the peer is already disconnecting.
	pub fn disconnect(&self) {
		if self.disconnect.swap(true, Ordering::SeqCst) {
			return;
		}
		trace!("disconnecting {}", self);
		self.advance_state(PeerState::Disconnecting);
		if self.connected.load(Ordering::SeqCst) {
			if let Some(ref conn) = *self.socket.lock() {
				let _ = conn.shutdown(Shutdown::Both);
			}
		}
		self.quit.fire();
	}

	/// Wait until the peer has completely disconnected and all its tasks
	/// have finished. This happens when either side disconnects or the
	/// peer is forcibly disconnected via [Peer::disconnect].
	pub fn wait_for_disconnect(&self) {
		self.quit.wait();
		self.tasks.wait();
	}

	fn advance_state(&self, state: PeerState) {
		// The lifecycle only ever moves forward.
		self.state.fetch_max(state as u8, Ordering::SeqCst);
	}

	// Queries /////////////////////////////////////////////////////////////

	/// The peer id, assigned when version negotiation completes.
	pub fn id(&self) -> u32 {
		self.flags.lock().id
	}

	/// The peer address as a "host:port" string.
	pub fn addr(&self) -> String {
		self.addr.read().clone()
	}

	/// The peer's network address record, if known.
	pub fn na(&self) -> Option<NetAddress> {
		self.flags.lock().na
	}

	/// Whether the peer is inbound.
	pub fn inbound(&self) -> bool {
		self.inbound
	}

	/// Where the peer is in its connection lifecycle.
	pub fn state(&self) -> PeerState {
		PeerState::from_u8(self.state.load(Ordering::SeqCst))
	}

	/// The services advertised by the remote peer.
	pub fn services(&self) -> ServiceFlags {
		self.flags.lock().services
	}

	/// The user agent of the remote peer.
	pub fn user_agent(&self) -> String {
		self.flags.lock().user_agent.clone()
	}

	/// The nonce the remote peer sent in its version message.
	pub fn version_nonce(&self) -> u64 {
		self.flags.lock().nonce
	}

	/// Whether the version of the peer is known locally.
	pub fn version_known(&self) -> bool {
		self.flags.lock().version_known
	}

	/// Whether the peer has acknowledged our version message.
	pub fn verack_received(&self) -> bool {
		self.flags.lock().verack_received
	}

	/// The negotiated protocol version: the minimum of what both sides
	/// support.
	pub fn protocol_version(&self) -> u32 {
		self.flags.lock().protocol_version
	}

	/// The protocol version the remote peer advertised.
	pub fn advertised_protocol_version(&self) -> u32 {
		self.flags.lock().advertised_protocol_version
	}

	/// Whether the peer asked for headers instead of block inventory
	/// announcements (BIP 130).
	pub fn wants_headers(&self) -> bool {
		self.flags.lock().send_headers_preferred
	}

	fn wire_encoding(&self) -> MessageEncoding {
		self.flags.lock().wire_encoding
	}

	/// The height the peer reported during version negotiation.
	pub fn starting_height(&self) -> i32 {
		self.stats.read().starting_height
	}

	/// The last known block height of the peer.
	pub fn last_block(&self) -> i32 {
		self.stats.read().last_block
	}

	/// The hash of the last block the peer announced, if any.
	pub fn last_announced_block(&self) -> Option<BlockHash> {
		self.stats.read().last_announced_block
	}

	/// The time at which the socket was associated, if it ever was.
	pub fn time_connected(&self) -> Option<SystemTime> {
		self.stats.read().time_connected
	}

	/// The offset in seconds between the remote clock and ours at
	/// negotiation time. Negative values mean the remote clock is behind.
	pub fn time_offset(&self) -> i64 {
		self.stats.read().time_offset
	}

	/// The nonce of the outstanding ping, or 0 when none is in flight.
	pub fn last_ping_nonce(&self) -> u64 {
		self.stats.read().last_ping_nonce
	}

	/// When the last ping was sent.
	pub fn last_ping_time(&self) -> Option<SystemTime> {
		self.stats.read().last_ping_time
	}

	/// The round-trip time of the last answered ping, in microseconds.
	pub fn last_ping_micros(&self) -> i64 {
		self.stats.read().last_ping_micros
	}

	/// When the last message was sent to the peer.
	pub fn last_send(&self) -> SystemTime {
		UNIX_EPOCH + Duration::from_secs(self.last_send.load(Ordering::SeqCst).max(0) as u64)
	}

	/// When the last message was received from the peer.
	pub fn last_recv(&self) -> SystemTime {
		UNIX_EPOCH + Duration::from_secs(self.last_recv.load(Ordering::SeqCst).max(0) as u64)
	}

	/// Total bytes sent to the peer.
	pub fn bytes_sent(&self) -> u64 {
		self.bytes_sent.load(Ordering::Relaxed)
	}

	/// Total bytes received from the peer.
	pub fn bytes_received(&self) -> u64 {
		self.bytes_received.load(Ordering::Relaxed)
	}

	/// The local address of the connection, when connected.
	pub fn local_addr(&self) -> Option<SocketAddr> {
		self.socket.lock().as_ref().and_then(|conn| conn.local_addr().ok())
	}

	/// Update the last known block height of the peer.
	pub fn update_last_block_height(&self, height: i32) {
		let mut stats = self.stats.write();
		trace!(
			"updating last block height of peer {} from {} to {}",
			self.addr.read(),
			stats.last_block,
			height,
		);
		stats.last_block = height;
	}

	/// Update the last block hash this peer is known to have announced.
	pub fn update_last_announced_block(&self, hash: BlockHash) {
		trace!("updating last announced block for peer {} to {}", self.addr.read(), hash);
		self.stats.write().last_announced_block = Some(hash);
	}

	/// Add the inventory to the cache of inventory known to the peer.
	pub fn add_known_inventory(&self, inv: &InvVect) {
		self.known_inventory.lock().insert(*inv);
	}

	/// A snapshot of the current peer flags and statistics.
	pub fn stats_snapshot(&self) -> StatsSnap {
		let stats = self.stats.read();
		let flags = self.flags.lock();
		StatsSnap {
			id: flags.id,
			addr: self.addr.read().clone(),
			services: flags.services,
			user_agent: flags.user_agent.clone(),
			version: flags.advertised_protocol_version,
			inbound: self.inbound,
			last_send: self.last_send(),
			last_recv: self.last_recv(),
			bytes_sent: self.bytes_sent(),
			bytes_received: self.bytes_received(),
			conn_time: stats.time_connected,
			time_offset: stats.time_offset,
			starting_height: stats.starting_height,
			last_block: stats.last_block,
			last_ping_nonce: stats.last_ping_nonce,
			last_ping_time: stats.last_ping_time,
			last_ping_micros: stats.last_ping_micros,
		}
	}
}

impl fmt::Display for Peer {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let direction = if self.inbound { "inbound" } else { "outbound" };
		write!(f, "{} ({})", self.addr.read(), direction)
	}
}

impl fmt::Debug for Peer {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

/// Add a deadline for the response expected for the sent command, if any.
///
/// Pings are intentionally not tracked here: they are sent asynchronously
/// and commonly back up behind a long message backlog, such as during
/// initial block download, so their responses regularly miss any sane
/// deadline.
fn maybe_add_deadline(pending_responses: &mut HashMap<Command, Instant>, command: Command) {
	let deadline = Instant::now() + STALL_RESPONSE_TIMEOUT;
	match command {
		Command::Version => {
			// Expects a verack message.
			pending_responses.insert(Command::Verack, deadline);
		}
		Command::MemPool | Command::GetBlocks => {
			// Expects an inv message.
			pending_responses.insert(Command::Inv, deadline);
		}
		Command::GetData => {
			// Expects a block, merkleblock, tx or notfound message.
			pending_responses.insert(Command::Block, deadline);
			pending_responses.insert(Command::MerkleBlock, deadline);
			pending_responses.insert(Command::Tx, deadline);
			pending_responses.insert(Command::NotFound, deadline);
		}
		Command::GetHeaders => {
			// Expects a headers message. Use a longer deadline since it
			// can take a while for the remote to load all of them.
			let deadline = Instant::now() + STALL_RESPONSE_TIMEOUT * 3;
			pending_responses.insert(Command::Headers, deadline);
		}
		_ => {}
	}
}

/// Keep a uniformly random sample of at most `max` elements, in place.
fn truncate_random<T>(list: &mut Vec<T>, max: usize) {
	if list.len() <= max {
		return;
	}
	// A partial Fisher-Yates shuffle: after `max` rounds the head of the
	// list holds a uniform sample of the whole.
	for i in 0..max {
		let j = i + fastrand::usize(..list.len() - i);
		list.swap(i, j);
	}
	list.truncate(max);
}

/// Split a "host:port" string, tolerating bracketed IPv6 hosts.
fn split_host_port(addr: &str) -> Result<(String, u16), Error> {
	let (host, port) = addr
		.rsplit_once(':')
		.ok_or_else(|| Error::InvalidAddress(addr.to_owned()))?;
	let port = port.parse::<u16>().map_err(|_| Error::InvalidAddress(addr.to_owned()))?;
	let host = host.trim_start_matches('[').trim_end_matches(']');
	Ok((host.to_owned(), port))
}

/// Whether the error is a read deadline expiring.
fn is_timeout(e: &wire::Error) -> bool {
	match *e {
		wire::Error::Io(ref e) => {
			matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
		}
		_ => false,
	}
}

fn is_unexpected_eof(e: &wire::Error) -> bool {
	matches!(*e, wire::Error::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof)
}

/// Write errors that just mean the remote went away and aren't worth a
/// log line.
fn is_silent_io_error(e: &wire::Error) -> bool {
	match *e {
		wire::Error::Io(ref e) => matches!(
			e.kind(),
			io::ErrorKind::UnexpectedEof
				| io::ErrorKind::ConnectionReset
				| io::ErrorKind::ConnectionAborted
				| io::ErrorKind::BrokenPipe
				| io::ErrorKind::WouldBlock
		),
		_ => false,
	}
}

/// Map deadline expiries during the handshake to the negotiation timeout
/// error.
fn negotiate_error(e: Error) -> Error {
	let timed_out = match e {
		Error::Io(ref io) => {
			matches!(io.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
		}
		Error::Wire(ref w) => is_timeout(w),
		_ => false,
	};
	if timed_out {
		Error::NegotiateTimeout
	} else {
		e
	}
}
