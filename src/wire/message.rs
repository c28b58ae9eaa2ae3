use std::fmt;
use std::io::Cursor;

use bitcoin::consensus::encode::Decodable;
use bitcoin::hash_types::{FilterHash, FilterHeader};
use bitcoin::hashes::sha256d;
use bitcoin::network::constants::ServiceFlags;
use bitcoin::util::merkleblock::MerkleBlock;
use bitcoin::{Block, BlockHash, BlockHeader, Transaction};

use super::address::NetAddress;
use super::inventory::InvVect;
use super::{
	put_encodable, put_hash, put_i32, put_i64, put_u32, put_u64, put_u8, put_var_bytes,
	put_var_int, put_var_string, read_hash, read_i32, read_i64, read_u32, read_u64, read_u8,
	read_var_bytes, read_var_int, read_var_string, remaining, Error, MessageEncoding,
	PayloadReader, BIP0031_VERSION, BIP0035_VERSION, BIP0037_VERSION, COMMAND_SIZE,
	FEEFILTER_VERSION, MAX_MESSAGE_PAYLOAD, MAX_VAR_INT_PAYLOAD, NET_ADDRESS_TIME_VERSION,
	REJECT_VERSION, SENDHEADERS_VERSION,
};

/// The maximum number of addresses in a single `addr` message.
pub const MAX_ADDR_PER_MSG: usize = 1000;

/// The maximum number of inventory vectors in a single `inv`, `getdata`
/// or `notfound` message.
pub const MAX_INV_PER_MSG: usize = 50_000;

/// The maximum number of block locator hashes in a single `getblocks` or
/// `getheaders` message.
pub const MAX_BLOCK_LOCATORS_PER_MSG: usize = 2000;

/// The maximum number of block headers in a single `headers` message.
pub const MAX_BLOCK_HEADERS_PER_MSG: usize = 2000;

/// The maximum length of a user agent string in a `version` message.
pub const MAX_USER_AGENT_LEN: usize = 256;

const MAX_BLOCK_PAYLOAD: u32 = 4_000_000;
const MAX_FILTER_LOAD_SIZE: usize = 36_000;
const MAX_FILTER_LOAD_HASH_FUNCS: u32 = 50;
const MAX_FILTER_ADD_DATA_SIZE: usize = 520;
const MAX_CFILTER_SIZE: usize = 256 * 1024;
const MAX_CF_HEADERS_PER_MSG: usize = 2000;

/// A wire protocol command, as carried in the 12-byte header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
	Version,
	Verack,
	Addr,
	GetAddr,
	Ping,
	Pong,
	Inv,
	GetData,
	NotFound,
	GetBlocks,
	GetHeaders,
	Headers,
	Block,
	Tx,
	MerkleBlock,
	MemPool,
	FeeFilter,
	FilterAdd,
	FilterClear,
	FilterLoad,
	SendHeaders,
	Reject,
	Alert,
	CFilter,
	CFHeaders,
	CFCheckpt,
	GetCFilters,
	GetCFHeaders,
	GetCFCheckpt,
}

impl Command {
	pub fn as_str(self) -> &'static str {
		match self {
			Command::Version => "version",
			Command::Verack => "verack",
			Command::Addr => "addr",
			Command::GetAddr => "getaddr",
			Command::Ping => "ping",
			Command::Pong => "pong",
			Command::Inv => "inv",
			Command::GetData => "getdata",
			Command::NotFound => "notfound",
			Command::GetBlocks => "getblocks",
			Command::GetHeaders => "getheaders",
			Command::Headers => "headers",
			Command::Block => "block",
			Command::Tx => "tx",
			Command::MerkleBlock => "merkleblock",
			Command::MemPool => "mempool",
			Command::FeeFilter => "feefilter",
			Command::FilterAdd => "filteradd",
			Command::FilterClear => "filterclear",
			Command::FilterLoad => "filterload",
			Command::SendHeaders => "sendheaders",
			Command::Reject => "reject",
			Command::Alert => "alert",
			Command::CFilter => "cfilter",
			Command::CFHeaders => "cfheaders",
			Command::CFCheckpt => "cfcheckpt",
			Command::GetCFilters => "getcfilters",
			Command::GetCFHeaders => "getcfheaders",
			Command::GetCFCheckpt => "getcfcheckpt",
		}
	}

	fn from_str(s: &str) -> Option<Command> {
		Some(match s {
			"version" => Command::Version,
			"verack" => Command::Verack,
			"addr" => Command::Addr,
			"getaddr" => Command::GetAddr,
			"ping" => Command::Ping,
			"pong" => Command::Pong,
			"inv" => Command::Inv,
			"getdata" => Command::GetData,
			"notfound" => Command::NotFound,
			"getblocks" => Command::GetBlocks,
			"getheaders" => Command::GetHeaders,
			"headers" => Command::Headers,
			"block" => Command::Block,
			"tx" => Command::Tx,
			"merkleblock" => Command::MerkleBlock,
			"mempool" => Command::MemPool,
			"feefilter" => Command::FeeFilter,
			"filteradd" => Command::FilterAdd,
			"filterclear" => Command::FilterClear,
			"filterload" => Command::FilterLoad,
			"sendheaders" => Command::SendHeaders,
			"reject" => Command::Reject,
			"alert" => Command::Alert,
			"cfilter" => Command::CFilter,
			"cfheaders" => Command::CFHeaders,
			"cfcheckpt" => Command::CFCheckpt,
			"getcfilters" => Command::GetCFilters,
			"getcfheaders" => Command::GetCFHeaders,
			"getcfcheckpt" => Command::GetCFCheckpt,
			_ => return None,
		})
	}

	/// The NUL-padded header representation of this command.
	pub(crate) fn to_bytes(self) -> [u8; COMMAND_SIZE] {
		let mut bytes = [0u8; COMMAND_SIZE];
		let s = self.as_str().as_bytes();
		bytes[..s.len()].copy_from_slice(s);
		bytes
	}

	/// Parse a header command field. The command must be NUL-padded on the
	/// right with no embedded NUL bytes.
	pub(crate) fn from_bytes(bytes: &[u8; COMMAND_SIZE]) -> Option<Command> {
		let end = bytes.iter().position(|&b| b == 0).unwrap_or(COMMAND_SIZE);
		if bytes[end..].iter().any(|&b| b != 0) {
			return None;
		}
		Command::from_str(std::str::from_utf8(&bytes[..end]).ok()?)
	}
}

impl fmt::Display for Command {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// The maximum payload size for the given command at the given protocol
/// version. Frames declaring a larger payload are rejected before the
/// payload is read.
pub(crate) fn max_payload(cmd: Command, pver: u32) -> u32 {
	// `addr` entries grew a timestamp in protocol version 31402.
	let addr_size: u32 = if pver >= NET_ADDRESS_TIME_VERSION { 30 } else { 26 };
	match cmd {
		// 33 fixed bytes + two addresses (which never carry a timestamp
		// here) + the user agent.
		Command::Version => 33 + 2 * 26 + MAX_VAR_INT_PAYLOAD + MAX_USER_AGENT_LEN as u32,
		Command::Verack
		| Command::GetAddr
		| Command::MemPool
		| Command::FilterClear
		| Command::SendHeaders => 0,
		Command::Addr => MAX_VAR_INT_PAYLOAD + MAX_ADDR_PER_MSG as u32 * addr_size,
		Command::Ping | Command::Pong | Command::FeeFilter => 8,
		Command::Inv | Command::GetData | Command::NotFound => {
			MAX_VAR_INT_PAYLOAD + MAX_INV_PER_MSG as u32 * 36
		}
		Command::GetBlocks | Command::GetHeaders => {
			4 + MAX_VAR_INT_PAYLOAD + MAX_BLOCK_LOCATORS_PER_MSG as u32 * 32 + 32
		}
		Command::Headers => {
			MAX_VAR_INT_PAYLOAD
				+ MAX_BLOCK_HEADERS_PER_MSG as u32 * (80 + MAX_VAR_INT_PAYLOAD)
		}
		Command::Block | Command::Tx | Command::MerkleBlock => MAX_BLOCK_PAYLOAD,
		Command::FilterAdd => MAX_VAR_INT_PAYLOAD + MAX_FILTER_ADD_DATA_SIZE as u32,
		Command::FilterLoad => MAX_VAR_INT_PAYLOAD + MAX_FILTER_LOAD_SIZE as u32 + 9,
		Command::Reject | Command::Alert | Command::CFCheckpt => MAX_MESSAGE_PAYLOAD,
		Command::CFilter => 1 + 32 + MAX_VAR_INT_PAYLOAD + MAX_CFILTER_SIZE as u32,
		Command::CFHeaders => {
			1 + 32 + 32 + MAX_VAR_INT_PAYLOAD + MAX_CF_HEADERS_PER_MSG as u32 * 32
		}
		Command::GetCFilters | Command::GetCFHeaders => 1 + 4 + 32,
		Command::GetCFCheckpt => 1 + 32,
	}
}

/// The contents of a `version` message.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionMessage {
	/// The highest protocol version the sender speaks.
	pub version: u32,
	/// The services the sender supports.
	pub services: ServiceFlags,
	/// The sender's local time in unix seconds.
	pub timestamp: i64,
	/// The receiver's address as seen by the sender.
	pub addr_you: NetAddress,
	/// The sender's own address.
	pub addr_me: NetAddress,
	/// Random nonce used to detect connections to self.
	pub nonce: u64,
	/// BIP 14 user agent.
	pub user_agent: String,
	/// The height of the sender's best known block.
	pub last_block: i32,
	/// Ask the receiver not to announce transactions (BIP 37). Encoded
	/// inverted as the `relay` field on the wire.
	pub disable_relay_tx: bool,
}

impl VersionMessage {
	pub fn new(
		addr_me: NetAddress,
		addr_you: NetAddress,
		nonce: u64,
		last_block: i32,
	) -> VersionMessage {
		VersionMessage {
			version: super::PROTOCOL_VERSION,
			services: ServiceFlags::NONE,
			timestamp: crate::time::unix_time(),
			addr_you,
			addr_me,
			nonce,
			user_agent: String::new(),
			last_block,
			disable_relay_tx: false,
		}
	}

	/// Append a BIP 14 formatted user agent to the message:
	/// `/name:version(comment; comment)/`.
	///
	/// The parts may not contain the characters forbidden by BIP 14
	/// (`/`, `:`, `(` and `)`) and the total length may not exceed
	/// [MAX_USER_AGENT_LEN].
	pub fn add_user_agent(
		&mut self,
		name: &str,
		version: &str,
		comments: &[String],
	) -> Result<(), Error> {
		for part in [name, version].iter().copied().chain(comments.iter().map(|c| c.as_str())) {
			if part.contains(|c| c == '/' || c == ':' || c == '(' || c == ')') {
				return Err(Error::Malformed {
					command: Command::Version,
					reason: format!("user agent part {:?} contains characters forbidden by BIP 14", part),
				});
			}
		}

		let mut agent = format!("{}:{}", name, version);
		if !comments.is_empty() {
			agent.push('(');
			agent.push_str(&comments.join("; "));
			agent.push(')');
		}
		let new_agent = format!("{}/{}/", self.user_agent, agent);
		if new_agent.len() > MAX_USER_AGENT_LEN {
			return Err(Error::Malformed {
				command: Command::Version,
				reason: format!(
					"user agent is too long: {} > {}",
					new_agent.len(),
					MAX_USER_AGENT_LEN,
				),
			});
		}
		self.user_agent = new_agent;
		Ok(())
	}

	fn encode(&self, buf: &mut Vec<u8>, pver: u32) -> Result<(), Error> {
		if self.user_agent.len() > MAX_USER_AGENT_LEN {
			return Err(Error::Malformed {
				command: Command::Version,
				reason: format!(
					"user agent is too long: {} > {}",
					self.user_agent.len(),
					MAX_USER_AGENT_LEN,
				),
			});
		}
		put_u32(buf, self.version);
		put_encodable(buf, &self.services);
		put_i64(buf, self.timestamp);
		self.addr_you.encode(buf, false);
		self.addr_me.encode(buf, false);
		put_u64(buf, self.nonce);
		put_var_string(buf, &self.user_agent);
		put_i32(buf, self.last_block);
		if pver >= BIP0037_VERSION {
			put_u8(buf, !self.disable_relay_tx as u8);
		}
		Ok(())
	}

	fn decode(cur: &mut PayloadReader) -> Result<VersionMessage, Error> {
		let version = read_u32(cur)?;
		let services = ServiceFlags::consensus_decode(&mut *cur)?;
		let timestamp = read_i64(cur)?;
		let addr_you = NetAddress::decode(cur, false)?;

		// The remaining fields grew over protocol history; tolerate
		// older senders that omit the tail.
		let mut msg = VersionMessage {
			version,
			services,
			timestamp,
			addr_you,
			addr_me: NetAddress::unroutable(ServiceFlags::NONE),
			nonce: 0,
			user_agent: String::new(),
			last_block: 0,
			disable_relay_tx: false,
		};
		if remaining(cur) == 0 {
			return Ok(msg);
		}
		msg.addr_me = NetAddress::decode(cur, false)?;
		msg.nonce = read_u64(cur)?;
		msg.user_agent = read_var_string(cur, MAX_USER_AGENT_LEN, Command::Version, "user agent")?;
		msg.last_block = read_i32(cur)?;
		if msg.version >= BIP0037_VERSION && remaining(cur) > 0 {
			msg.disable_relay_tx = read_u8(cur)? == 0;
		}
		Ok(msg)
	}
}

/// A `getblocks` or `getheaders` request: block locator hashes plus a
/// stop hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorRequest {
	pub version: u32,
	/// Block locator hashes, highest heights first.
	pub locator_hashes: Vec<BlockHash>,
	/// The hash at which to stop; the zero hash means "as many as
	/// possible".
	pub stop_hash: BlockHash,
}

impl LocatorRequest {
	fn encode(&self, buf: &mut Vec<u8>, command: Command) -> Result<(), Error> {
		if self.locator_hashes.len() > MAX_BLOCK_LOCATORS_PER_MSG {
			return Err(too_many(command, self.locator_hashes.len(), MAX_BLOCK_LOCATORS_PER_MSG, "locator hashes"));
		}
		put_u32(buf, self.version);
		put_var_int(buf, self.locator_hashes.len() as u64);
		for hash in &self.locator_hashes {
			put_encodable(buf, hash);
		}
		put_encodable(buf, &self.stop_hash);
		Ok(())
	}

	fn decode(cur: &mut PayloadReader, command: Command) -> Result<LocatorRequest, Error> {
		let version = read_u32(cur)?;
		let count = read_var_int(cur)? as usize;
		if count > MAX_BLOCK_LOCATORS_PER_MSG {
			return Err(too_many(command, count, MAX_BLOCK_LOCATORS_PER_MSG, "locator hashes"));
		}
		if count * 32 > remaining(cur) {
			return Err(truncated(command));
		}
		let mut locator_hashes = Vec::with_capacity(count);
		for _ in 0..count {
			locator_hashes.push(BlockHash::from_hash(read_hash(cur)?));
		}
		let stop_hash = BlockHash::from_hash(read_hash(cur)?);
		Ok(LocatorRequest { version, locator_hashes, stop_hash })
	}
}

/// A one-byte code carried in a `reject` message identifying why a prior
/// message was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
	Malformed,
	Invalid,
	Obsolete,
	Duplicate,
	Nonstandard,
	Dust,
	InsufficientFee,
	Checkpoint,
	/// A code this codec doesn't know, carried through untouched.
	Unknown(u8),
}

impl RejectCode {
	fn to_u8(self) -> u8 {
		match self {
			RejectCode::Malformed => 0x01,
			RejectCode::Invalid => 0x10,
			RejectCode::Obsolete => 0x11,
			RejectCode::Duplicate => 0x12,
			RejectCode::Nonstandard => 0x40,
			RejectCode::Dust => 0x41,
			RejectCode::InsufficientFee => 0x42,
			RejectCode::Checkpoint => 0x43,
			RejectCode::Unknown(code) => code,
		}
	}

	fn from_u8(code: u8) -> RejectCode {
		match code {
			0x01 => RejectCode::Malformed,
			0x10 => RejectCode::Invalid,
			0x11 => RejectCode::Obsolete,
			0x12 => RejectCode::Duplicate,
			0x40 => RejectCode::Nonstandard,
			0x41 => RejectCode::Dust,
			0x42 => RejectCode::InsufficientFee,
			0x43 => RejectCode::Checkpoint,
			code => RejectCode::Unknown(code),
		}
	}
}

impl fmt::Display for RejectCode {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			RejectCode::Malformed => write!(f, "REJECT_MALFORMED"),
			RejectCode::Invalid => write!(f, "REJECT_INVALID"),
			RejectCode::Obsolete => write!(f, "REJECT_OBSOLETE"),
			RejectCode::Duplicate => write!(f, "REJECT_DUPLICATE"),
			RejectCode::Nonstandard => write!(f, "REJECT_NONSTANDARD"),
			RejectCode::Dust => write!(f, "REJECT_DUST"),
			RejectCode::InsufficientFee => write!(f, "REJECT_INSUFFICIENTFEE"),
			RejectCode::Checkpoint => write!(f, "REJECT_CHECKPOINT"),
			RejectCode::Unknown(code) => write!(f, "Unknown RejectCode (0x{:02x})", code),
		}
	}
}

/// The contents of a `reject` message (BIP 61).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reject {
	/// The command of the message being rejected.
	pub message: String,
	pub code: RejectCode,
	/// Human-readable reason.
	pub reason: String,
	/// The hash of the rejected object. Only on the wire when the
	/// rejected command is `tx` or `block`.
	pub hash: sha256d::Hash,
}

impl Reject {
	pub fn new(message: &str, code: RejectCode, reason: &str) -> Reject {
		Reject {
			message: message.to_owned(),
			code,
			reason: reason.to_owned(),
			hash: sha256d::Hash::default(),
		}
	}

	fn has_hash(&self) -> bool {
		self.message == Command::Tx.as_str() || self.message == Command::Block.as_str()
	}

	fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
		put_var_string(buf, &self.message);
		put_u8(buf, self.code.to_u8());
		put_var_string(buf, &self.reason);
		if self.has_hash() {
			put_hash(buf, &self.hash);
		}
		Ok(())
	}

	fn decode(cur: &mut PayloadReader) -> Result<Reject, Error> {
		let message = read_var_string(cur, COMMAND_SIZE, Command::Reject, "rejected command")?;
		let code = RejectCode::from_u8(read_u8(cur)?);
		let reason =
			read_var_string(cur, MAX_MESSAGE_PAYLOAD as usize, Command::Reject, "reason")?;
		let mut msg = Reject { message, code, reason, hash: sha256d::Hash::default() };
		if msg.has_hash() {
			msg.hash = read_hash(cur)?;
		}
		Ok(msg)
	}
}

/// The contents of an `alert` message: an opaque serialized alert payload
/// plus its signature. Alerts are deprecated network-wide but the message
/// still round-trips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
	pub payload: Vec<u8>,
	pub signature: Vec<u8>,
}

/// The contents of a `filterload` message (BIP 37).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterLoad {
	pub filter: Vec<u8>,
	pub hash_funcs: u32,
	pub tweak: u32,
	pub flags: u8,
}

/// The contents of a `getcfilters` message (BIP 157).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetCFilters {
	pub filter_type: u8,
	pub start_height: u32,
	pub stop_hash: BlockHash,
}

/// The contents of a `getcfheaders` message (BIP 157).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetCFHeaders {
	pub filter_type: u8,
	pub start_height: u32,
	pub stop_hash: BlockHash,
}

/// The contents of a `getcfcheckpt` message (BIP 157).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetCFCheckpt {
	pub filter_type: u8,
	pub stop_hash: BlockHash,
}

/// The contents of a `cfilter` message (BIP 157).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CFilter {
	pub filter_type: u8,
	pub block_hash: BlockHash,
	pub filter: Vec<u8>,
}

/// The contents of a `cfheaders` message (BIP 157).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CFHeaders {
	pub filter_type: u8,
	pub stop_hash: BlockHash,
	pub prev_filter_header: FilterHeader,
	pub filter_hashes: Vec<FilterHash>,
}

/// The contents of a `cfcheckpt` message (BIP 157).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CFCheckpt {
	pub filter_type: u8,
	pub stop_hash: BlockHash,
	pub filter_headers: Vec<FilterHeader>,
}

/// A decoded wire protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
	Version(VersionMessage),
	Verack,
	Addr(Vec<NetAddress>),
	GetAddr,
	Ping(u64),
	Pong(u64),
	Inv(Vec<InvVect>),
	GetData(Vec<InvVect>),
	NotFound(Vec<InvVect>),
	GetBlocks(LocatorRequest),
	GetHeaders(LocatorRequest),
	Headers(Vec<BlockHeader>),
	Block(Block),
	Tx(Transaction),
	MerkleBlock(MerkleBlock),
	MemPool,
	FeeFilter(i64),
	FilterAdd(Vec<u8>),
	FilterClear,
	FilterLoad(FilterLoad),
	SendHeaders,
	Reject(Reject),
	Alert(Alert),
	CFilter(CFilter),
	CFHeaders(CFHeaders),
	CFCheckpt(CFCheckpt),
	GetCFilters(GetCFilters),
	GetCFHeaders(GetCFHeaders),
	GetCFCheckpt(GetCFCheckpt),
}

impl Message {
	/// The wire command of this message.
	pub fn command(&self) -> Command {
		match *self {
			Message::Version(_) => Command::Version,
			Message::Verack => Command::Verack,
			Message::Addr(_) => Command::Addr,
			Message::GetAddr => Command::GetAddr,
			Message::Ping(_) => Command::Ping,
			Message::Pong(_) => Command::Pong,
			Message::Inv(_) => Command::Inv,
			Message::GetData(_) => Command::GetData,
			Message::NotFound(_) => Command::NotFound,
			Message::GetBlocks(_) => Command::GetBlocks,
			Message::GetHeaders(_) => Command::GetHeaders,
			Message::Headers(_) => Command::Headers,
			Message::Block(_) => Command::Block,
			Message::Tx(_) => Command::Tx,
			Message::MerkleBlock(_) => Command::MerkleBlock,
			Message::MemPool => Command::MemPool,
			Message::FeeFilter(_) => Command::FeeFilter,
			Message::FilterAdd(_) => Command::FilterAdd,
			Message::FilterClear => Command::FilterClear,
			Message::FilterLoad(_) => Command::FilterLoad,
			Message::SendHeaders => Command::SendHeaders,
			Message::Reject(_) => Command::Reject,
			Message::Alert(_) => Command::Alert,
			Message::CFilter(_) => Command::CFilter,
			Message::CFHeaders(_) => Command::CFHeaders,
			Message::CFCheckpt(_) => Command::CFCheckpt,
			Message::GetCFilters(_) => Command::GetCFilters,
			Message::GetCFHeaders(_) => Command::GetCFHeaders,
			Message::GetCFCheckpt(_) => Command::GetCFCheckpt,
		}
	}

	/// Encode the message payload at the given protocol version and
	/// encoding flavor.
	pub(crate) fn encode(&self, pver: u32, enc: MessageEncoding) -> Result<Vec<u8>, Error> {
		let mut buf = Vec::new();
		match *self {
			Message::Version(ref msg) => msg.encode(&mut buf, pver)?,
			Message::Verack | Message::GetAddr => {}
			Message::FilterClear => require_pver(Command::FilterClear, pver, BIP0037_VERSION)?,
			Message::MemPool => require_pver(Command::MemPool, pver, BIP0035_VERSION)?,
			Message::SendHeaders => {
				require_pver(Command::SendHeaders, pver, SENDHEADERS_VERSION)?
			}
			Message::Addr(ref addrs) => {
				if addrs.len() > MAX_ADDR_PER_MSG {
					return Err(too_many(Command::Addr, addrs.len(), MAX_ADDR_PER_MSG, "addresses"));
				}
				put_var_int(&mut buf, addrs.len() as u64);
				for addr in addrs {
					addr.encode(&mut buf, pver >= NET_ADDRESS_TIME_VERSION);
				}
			}
			Message::Ping(nonce) => {
				if pver > BIP0031_VERSION {
					put_u64(&mut buf, nonce);
				}
			}
			Message::Pong(nonce) => {
				require_pver_above(Command::Pong, pver, BIP0031_VERSION)?;
				put_u64(&mut buf, nonce);
			}
			Message::Inv(ref invs) => encode_inv_list(&mut buf, Command::Inv, invs)?,
			Message::GetData(ref invs) => encode_inv_list(&mut buf, Command::GetData, invs)?,
			Message::NotFound(ref invs) => encode_inv_list(&mut buf, Command::NotFound, invs)?,
			Message::GetBlocks(ref req) => req.encode(&mut buf, Command::GetBlocks)?,
			Message::GetHeaders(ref req) => req.encode(&mut buf, Command::GetHeaders)?,
			Message::Headers(ref headers) => {
				if headers.len() > MAX_BLOCK_HEADERS_PER_MSG {
					return Err(too_many(
						Command::Headers,
						headers.len(),
						MAX_BLOCK_HEADERS_PER_MSG,
						"headers",
					));
				}
				put_var_int(&mut buf, headers.len() as u64);
				for header in headers {
					put_encodable(&mut buf, header);
					// Headers never carry transactions.
					put_var_int(&mut buf, 0);
				}
			}
			Message::Block(ref block) => encode_block(&mut buf, block, enc),
			Message::Tx(ref tx) => encode_tx(&mut buf, tx, enc),
			Message::MerkleBlock(ref mb) => {
				require_pver(Command::MerkleBlock, pver, BIP0037_VERSION)?;
				put_encodable(&mut buf, mb);
			}
			Message::FeeFilter(rate) => {
				require_pver(Command::FeeFilter, pver, FEEFILTER_VERSION)?;
				put_i64(&mut buf, rate);
			}
			Message::FilterAdd(ref data) => {
				require_pver(Command::FilterAdd, pver, BIP0037_VERSION)?;
				if data.len() > MAX_FILTER_ADD_DATA_SIZE {
					return Err(too_many(
						Command::FilterAdd,
						data.len(),
						MAX_FILTER_ADD_DATA_SIZE,
						"data bytes",
					));
				}
				put_var_bytes(&mut buf, data);
			}
			Message::FilterLoad(ref msg) => {
				require_pver(Command::FilterLoad, pver, BIP0037_VERSION)?;
				if msg.filter.len() > MAX_FILTER_LOAD_SIZE {
					return Err(too_many(
						Command::FilterLoad,
						msg.filter.len(),
						MAX_FILTER_LOAD_SIZE,
						"filter bytes",
					));
				}
				if msg.hash_funcs > MAX_FILTER_LOAD_HASH_FUNCS {
					return Err(too_many(
						Command::FilterLoad,
						msg.hash_funcs as usize,
						MAX_FILTER_LOAD_HASH_FUNCS as usize,
						"hash functions",
					));
				}
				put_var_bytes(&mut buf, &msg.filter);
				put_u32(&mut buf, msg.hash_funcs);
				put_u32(&mut buf, msg.tweak);
				put_u8(&mut buf, msg.flags);
			}
			Message::Reject(ref msg) => {
				require_pver(Command::Reject, pver, REJECT_VERSION)?;
				msg.encode(&mut buf)?;
			}
			Message::Alert(ref msg) => {
				put_var_bytes(&mut buf, &msg.payload);
				put_var_bytes(&mut buf, &msg.signature);
			}
			Message::CFilter(ref msg) => {
				if msg.filter.len() > MAX_CFILTER_SIZE {
					return Err(too_many(
						Command::CFilter,
						msg.filter.len(),
						MAX_CFILTER_SIZE,
						"filter bytes",
					));
				}
				put_u8(&mut buf, msg.filter_type);
				put_encodable(&mut buf, &msg.block_hash);
				put_var_bytes(&mut buf, &msg.filter);
			}
			Message::CFHeaders(ref msg) => {
				if msg.filter_hashes.len() > MAX_CF_HEADERS_PER_MSG {
					return Err(too_many(
						Command::CFHeaders,
						msg.filter_hashes.len(),
						MAX_CF_HEADERS_PER_MSG,
						"filter hashes",
					));
				}
				put_u8(&mut buf, msg.filter_type);
				put_encodable(&mut buf, &msg.stop_hash);
				put_encodable(&mut buf, &msg.prev_filter_header);
				put_var_int(&mut buf, msg.filter_hashes.len() as u64);
				for hash in &msg.filter_hashes {
					put_encodable(&mut buf, hash);
				}
			}
			Message::CFCheckpt(ref msg) => {
				put_u8(&mut buf, msg.filter_type);
				put_encodable(&mut buf, &msg.stop_hash);
				put_var_int(&mut buf, msg.filter_headers.len() as u64);
				for header in &msg.filter_headers {
					put_encodable(&mut buf, header);
				}
			}
			Message::GetCFilters(ref msg) => {
				put_u8(&mut buf, msg.filter_type);
				put_u32(&mut buf, msg.start_height);
				put_encodable(&mut buf, &msg.stop_hash);
			}
			Message::GetCFHeaders(ref msg) => {
				put_u8(&mut buf, msg.filter_type);
				put_u32(&mut buf, msg.start_height);
				put_encodable(&mut buf, &msg.stop_hash);
			}
			Message::GetCFCheckpt(ref msg) => {
				put_u8(&mut buf, msg.filter_type);
				put_encodable(&mut buf, &msg.stop_hash);
			}
		}
		Ok(buf)
	}

	/// Decode a message payload for the given command at the given
	/// protocol version.
	pub(crate) fn decode(
		command: Command,
		payload: &[u8],
		pver: u32,
		enc: MessageEncoding,
	) -> Result<Message, Error> {
		let mut cur = Cursor::new(payload);
		let res = Message::decode_body(command, &mut cur, pver, enc);
		match res {
			// The payload is an in-memory buffer here, so running out of
			// bytes means the message was truncated, not that the
			// transport failed.
			Err(Error::Io(_)) => Err(truncated(command)),
			other => other,
		}
	}

	fn decode_body(
		command: Command,
		cur: &mut PayloadReader,
		pver: u32,
		_enc: MessageEncoding,
	) -> Result<Message, Error> {
		Ok(match command {
			Command::Version => Message::Version(VersionMessage::decode(cur)?),
			Command::Verack => Message::Verack,
			Command::GetAddr => Message::GetAddr,
			Command::MemPool => {
				require_pver(Command::MemPool, pver, BIP0035_VERSION)?;
				Message::MemPool
			}
			Command::SendHeaders => {
				require_pver(Command::SendHeaders, pver, SENDHEADERS_VERSION)?;
				Message::SendHeaders
			}
			Command::FilterClear => {
				require_pver(Command::FilterClear, pver, BIP0037_VERSION)?;
				Message::FilterClear
			}
			Command::Addr => {
				let with_time = pver >= NET_ADDRESS_TIME_VERSION;
				let entry_size = if with_time { 30 } else { 26 };
				let count = read_var_int(cur)? as usize;
				if count > MAX_ADDR_PER_MSG {
					return Err(too_many(Command::Addr, count, MAX_ADDR_PER_MSG, "addresses"));
				}
				if count * entry_size > remaining(cur) {
					return Err(truncated(Command::Addr));
				}
				let mut addrs = Vec::with_capacity(count);
				for _ in 0..count {
					addrs.push(NetAddress::decode(cur, with_time)?);
				}
				Message::Addr(addrs)
			}
			Command::Ping => {
				let nonce = if pver > BIP0031_VERSION { read_u64(cur)? } else { 0 };
				Message::Ping(nonce)
			}
			Command::Pong => {
				require_pver_above(Command::Pong, pver, BIP0031_VERSION)?;
				Message::Pong(read_u64(cur)?)
			}
			Command::Inv => Message::Inv(decode_inv_list(cur, Command::Inv)?),
			Command::GetData => Message::GetData(decode_inv_list(cur, Command::GetData)?),
			Command::NotFound => Message::NotFound(decode_inv_list(cur, Command::NotFound)?),
			Command::GetBlocks => {
				Message::GetBlocks(LocatorRequest::decode(cur, Command::GetBlocks)?)
			}
			Command::GetHeaders => {
				Message::GetHeaders(LocatorRequest::decode(cur, Command::GetHeaders)?)
			}
			Command::Headers => {
				let count = read_var_int(cur)? as usize;
				if count > MAX_BLOCK_HEADERS_PER_MSG {
					return Err(too_many(
						Command::Headers,
						count,
						MAX_BLOCK_HEADERS_PER_MSG,
						"headers",
					));
				}
				if count * 81 > remaining(cur) {
					return Err(truncated(Command::Headers));
				}
				let mut headers = Vec::with_capacity(count);
				for _ in 0..count {
					let header = BlockHeader::consensus_decode(&mut *cur)?;
					if read_var_int(cur)? != 0 {
						return Err(Error::Malformed {
							command: Command::Headers,
							reason: "block headers may not contain transactions".to_owned(),
						});
					}
					headers.push(header);
				}
				Message::Headers(headers)
			}
			Command::Block => Message::Block(Block::consensus_decode(&mut *cur)?),
			Command::Tx => Message::Tx(Transaction::consensus_decode(&mut *cur)?),
			Command::MerkleBlock => {
				require_pver(Command::MerkleBlock, pver, BIP0037_VERSION)?;
				Message::MerkleBlock(MerkleBlock::consensus_decode(&mut *cur)?)
			}
			Command::FeeFilter => {
				require_pver(Command::FeeFilter, pver, FEEFILTER_VERSION)?;
				Message::FeeFilter(read_i64(cur)?)
			}
			Command::FilterAdd => {
				require_pver(Command::FilterAdd, pver, BIP0037_VERSION)?;
				Message::FilterAdd(read_var_bytes(
					cur,
					MAX_FILTER_ADD_DATA_SIZE,
					Command::FilterAdd,
					"data",
				)?)
			}
			Command::FilterLoad => {
				require_pver(Command::FilterLoad, pver, BIP0037_VERSION)?;
				let filter =
					read_var_bytes(cur, MAX_FILTER_LOAD_SIZE, Command::FilterLoad, "filter")?;
				let hash_funcs = read_u32(cur)?;
				if hash_funcs > MAX_FILTER_LOAD_HASH_FUNCS {
					return Err(too_many(
						Command::FilterLoad,
						hash_funcs as usize,
						MAX_FILTER_LOAD_HASH_FUNCS as usize,
						"hash functions",
					));
				}
				let tweak = read_u32(cur)?;
				let flags = read_u8(cur)?;
				Message::FilterLoad(FilterLoad { filter, hash_funcs, tweak, flags })
			}
			Command::Reject => {
				require_pver(Command::Reject, pver, REJECT_VERSION)?;
				Message::Reject(Reject::decode(cur)?)
			}
			Command::Alert => {
				let payload = read_var_bytes(
					cur,
					MAX_MESSAGE_PAYLOAD as usize,
					Command::Alert,
					"alert payload",
				)?;
				let signature = read_var_bytes(
					cur,
					MAX_MESSAGE_PAYLOAD as usize,
					Command::Alert,
					"signature",
				)?;
				Message::Alert(Alert { payload, signature })
			}
			Command::CFilter => {
				let filter_type = read_u8(cur)?;
				let block_hash = BlockHash::from_hash(read_hash(cur)?);
				let filter = read_var_bytes(cur, MAX_CFILTER_SIZE, Command::CFilter, "filter")?;
				Message::CFilter(CFilter { filter_type, block_hash, filter })
			}
			Command::CFHeaders => {
				let filter_type = read_u8(cur)?;
				let stop_hash = BlockHash::from_hash(read_hash(cur)?);
				let prev_filter_header = FilterHeader::from_hash(read_hash(cur)?);
				let count = read_var_int(cur)? as usize;
				if count > MAX_CF_HEADERS_PER_MSG {
					return Err(too_many(
						Command::CFHeaders,
						count,
						MAX_CF_HEADERS_PER_MSG,
						"filter hashes",
					));
				}
				if count * 32 > remaining(cur) {
					return Err(truncated(Command::CFHeaders));
				}
				let mut filter_hashes = Vec::with_capacity(count);
				for _ in 0..count {
					filter_hashes.push(FilterHash::from_hash(read_hash(cur)?));
				}
				Message::CFHeaders(CFHeaders {
					filter_type,
					stop_hash,
					prev_filter_header,
					filter_hashes,
				})
			}
			Command::CFCheckpt => {
				let filter_type = read_u8(cur)?;
				let stop_hash = BlockHash::from_hash(read_hash(cur)?);
				let count = read_var_int(cur)? as usize;
				if count * 32 > remaining(cur) {
					return Err(truncated(Command::CFCheckpt));
				}
				let mut filter_headers = Vec::with_capacity(count);
				for _ in 0..count {
					filter_headers.push(FilterHeader::from_hash(read_hash(cur)?));
				}
				Message::CFCheckpt(CFCheckpt { filter_type, stop_hash, filter_headers })
			}
			Command::GetCFilters => Message::GetCFilters(GetCFilters {
				filter_type: read_u8(cur)?,
				start_height: read_u32(cur)?,
				stop_hash: BlockHash::from_hash(read_hash(cur)?),
			}),
			Command::GetCFHeaders => Message::GetCFHeaders(GetCFHeaders {
				filter_type: read_u8(cur)?,
				start_height: read_u32(cur)?,
				stop_hash: BlockHash::from_hash(read_hash(cur)?),
			}),
			Command::GetCFCheckpt => Message::GetCFCheckpt(GetCFCheckpt {
				filter_type: read_u8(cur)?,
				stop_hash: BlockHash::from_hash(read_hash(cur)?),
			}),
		})
	}
}

fn encode_inv_list(buf: &mut Vec<u8>, command: Command, invs: &[InvVect]) -> Result<(), Error> {
	if invs.len() > MAX_INV_PER_MSG {
		return Err(too_many(command, invs.len(), MAX_INV_PER_MSG, "inventory vectors"));
	}
	put_var_int(buf, invs.len() as u64);
	for inv in invs {
		inv.encode(buf);
	}
	Ok(())
}

fn decode_inv_list(cur: &mut PayloadReader, command: Command) -> Result<Vec<InvVect>, Error> {
	let count = read_var_int(cur)? as usize;
	if count > MAX_INV_PER_MSG {
		return Err(too_many(command, count, MAX_INV_PER_MSG, "inventory vectors"));
	}
	if count * 36 > remaining(cur) {
		return Err(truncated(command));
	}
	let mut invs = Vec::with_capacity(count);
	for _ in 0..count {
		invs.push(InvVect::decode(cur)?);
	}
	Ok(invs)
}

/// Encode a transaction, stripping witness data for the base encoding.
fn encode_tx(buf: &mut Vec<u8>, tx: &Transaction, enc: MessageEncoding) {
	if enc == MessageEncoding::Base && tx.input.iter().any(|i| !i.witness.is_empty()) {
		let mut stripped = tx.clone();
		for input in &mut stripped.input {
			input.witness = Default::default();
		}
		put_encodable(buf, &stripped);
	} else {
		put_encodable(buf, tx);
	}
}

fn encode_block(buf: &mut Vec<u8>, block: &Block, enc: MessageEncoding) {
	let has_witness = block
		.txdata
		.iter()
		.any(|tx| tx.input.iter().any(|i| !i.witness.is_empty()));
	if enc == MessageEncoding::Base && has_witness {
		let mut stripped = block.clone();
		for tx in &mut stripped.txdata {
			for input in &mut tx.input {
				input.witness = Default::default();
			}
		}
		put_encodable(buf, &stripped);
	} else {
		put_encodable(buf, block);
	}
}

fn require_pver(command: Command, pver: u32, min: u32) -> Result<(), Error> {
	if pver < min {
		return Err(Error::Malformed {
			command,
			reason: format!("{} message invalid for protocol version {}", command, pver),
		});
	}
	Ok(())
}

fn require_pver_above(command: Command, pver: u32, above: u32) -> Result<(), Error> {
	if pver <= above {
		return Err(Error::Malformed {
			command,
			reason: format!("{} message invalid for protocol version {}", command, pver),
		});
	}
	Ok(())
}

fn too_many(command: Command, count: usize, max: usize, what: &str) -> Error {
	Error::Malformed {
		command,
		reason: format!("too many {} in message: {} > {}", what, count, max),
	}
}

fn truncated(command: Command) -> Error {
	Error::Malformed { command, reason: "payload is truncated".to_owned() }
}

#[cfg(test)]
mod tests {
	use super::*;
	use bitcoin::hashes::Hash;

	use crate::wire::{InvType, BIP0031_VERSION, PROTOCOL_VERSION};

	fn round_trip(msg: &Message, pver: u32) -> Message {
		let payload = msg.encode(pver, MessageEncoding::Witness).unwrap();
		Message::decode(msg.command(), &payload, pver, MessageEncoding::Witness).unwrap()
	}

	fn dummy_addr() -> NetAddress {
		NetAddress {
			timestamp: 0x5000_0000,
			services: ServiceFlags::NETWORK,
			ip: "203.0.113.7".parse().unwrap(),
			port: 8333,
		}
	}

	fn dummy_version() -> VersionMessage {
		let mut msg = VersionMessage::new(dummy_addr(), dummy_addr(), 0x1122_3344_5566_7788, 320);
		msg.services = ServiceFlags::NETWORK;
		msg.add_user_agent("test", "0.1.0", &[]).unwrap();
		msg
	}

	#[test]
	fn version_round_trip() {
		let msg = dummy_version();
		assert_eq!(msg.user_agent, "/test:0.1.0/");
		match round_trip(&Message::Version(msg.clone()), PROTOCOL_VERSION) {
			Message::Version(decoded) => {
				// Addresses lose their timestamp inside a version message.
				assert_eq!(decoded.nonce, msg.nonce);
				assert_eq!(decoded.user_agent, msg.user_agent);
				assert_eq!(decoded.last_block, msg.last_block);
				assert_eq!(decoded.services, msg.services);
				assert_eq!(decoded.disable_relay_tx, msg.disable_relay_tx);
				assert_eq!(decoded.addr_you.ip, msg.addr_you.ip);
				assert_eq!(decoded.addr_you.port, msg.addr_you.port);
			}
			other => panic!("unexpected message: {:?}", other),
		}
	}

	#[test]
	fn version_relay_flag_gated_by_pver() {
		let mut msg = dummy_version();
		msg.disable_relay_tx = true;
		let with_relay = Message::Version(msg.clone()).encode(BIP0037_VERSION, MessageEncoding::Base).unwrap();
		let without_relay =
			Message::Version(msg).encode(BIP0037_VERSION - 1, MessageEncoding::Base).unwrap();
		assert_eq!(with_relay.len(), without_relay.len() + 1);
	}

	#[test]
	fn version_tolerates_short_payload() {
		// Only the fields up to and including addr_you.
		let msg = dummy_version();
		let full = Message::Version(msg).encode(PROTOCOL_VERSION, MessageEncoding::Base).unwrap();
		let short = &full[..4 + 8 + 8 + 26];
		match Message::decode(Command::Version, short, PROTOCOL_VERSION, MessageEncoding::Base) {
			Ok(Message::Version(decoded)) => {
				assert_eq!(decoded.nonce, 0);
				assert_eq!(decoded.user_agent, "");
			}
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn user_agent_rejects_bip14_characters() {
		let mut msg = dummy_version();
		assert!(msg.add_user_agent("bad/name", "1.0", &[]).is_err());
		assert!(msg.add_user_agent("name", "1:0", &[]).is_err());
		assert!(msg.add_user_agent("name", "1.0", &["(nested)".to_owned()]).is_err());
		msg.add_user_agent("more", "2.0", &["a".to_owned(), "b".to_owned()]).unwrap();
		assert_eq!(msg.user_agent, "/test:0.1.0//more:2.0(a; b)/");
	}

	#[test]
	fn ping_nonce_gated_by_pver() {
		let new = Message::Ping(7).encode(PROTOCOL_VERSION, MessageEncoding::Base).unwrap();
		assert_eq!(new.len(), 8);
		let old = Message::Ping(7).encode(BIP0031_VERSION, MessageEncoding::Base).unwrap();
		assert!(old.is_empty());
		match Message::decode(Command::Ping, &[], BIP0031_VERSION, MessageEncoding::Base) {
			Ok(Message::Ping(0)) => {}
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn pong_invalid_before_bip31() {
		assert!(Message::Pong(7).encode(BIP0031_VERSION, MessageEncoding::Base).is_err());
		assert_eq!(
			round_trip(&Message::Pong(7), BIP0031_VERSION + 1),
			Message::Pong(7),
		);
	}

	#[test]
	fn addr_timestamp_gated_by_pver() {
		let msg = Message::Addr(vec![dummy_addr(), dummy_addr()]);
		let new = msg.encode(PROTOCOL_VERSION, MessageEncoding::Base).unwrap();
		assert_eq!(new.len(), 1 + 2 * 30);
		let old = msg.encode(NET_ADDRESS_TIME_VERSION - 1, MessageEncoding::Base).unwrap();
		assert_eq!(old.len(), 1 + 2 * 26);
		assert_eq!(round_trip(&msg, PROTOCOL_VERSION), msg);
	}

	#[test]
	fn addr_enforces_max_entries() {
		let msg = Message::Addr(vec![dummy_addr(); MAX_ADDR_PER_MSG + 1]);
		assert!(msg.encode(PROTOCOL_VERSION, MessageEncoding::Base).is_err());
	}

	#[test]
	fn inv_round_trip() {
		let msg = Message::Inv(vec![
			InvVect::new(InvType::Tx, sha256d::Hash::hash(b"a")),
			InvVect::new(InvType::Block, sha256d::Hash::hash(b"b")),
			InvVect::new(InvType::WitnessTx, sha256d::Hash::hash(b"c")),
		]);
		assert_eq!(round_trip(&msg, PROTOCOL_VERSION), msg);
	}

	#[test]
	fn inv_truncated_count_is_malformed() {
		let mut payload = Vec::new();
		put_var_int(&mut payload, 3);
		InvVect::new(InvType::Tx, sha256d::Hash::hash(b"a")).encode(&mut payload);
		let err = Message::decode(Command::Inv, &payload, PROTOCOL_VERSION, MessageEncoding::Base)
			.unwrap_err();
		assert!(err.is_malformed());
	}

	#[test]
	fn locator_round_trip() {
		let req = LocatorRequest {
			version: PROTOCOL_VERSION,
			locator_hashes: vec![
				BlockHash::from_hash(sha256d::Hash::hash(b"tip")),
				BlockHash::from_hash(sha256d::Hash::hash(b"older")),
			],
			stop_hash: BlockHash::default(),
		};
		let msg = Message::GetHeaders(req);
		assert_eq!(round_trip(&msg, PROTOCOL_VERSION), msg);
	}

	#[test]
	fn locator_enforces_max_hashes() {
		let req = LocatorRequest {
			version: PROTOCOL_VERSION,
			locator_hashes: vec![BlockHash::default(); MAX_BLOCK_LOCATORS_PER_MSG + 1],
			stop_hash: BlockHash::default(),
		};
		assert!(Message::GetBlocks(req).encode(PROTOCOL_VERSION, MessageEncoding::Base).is_err());
	}

	#[test]
	fn reject_hash_only_for_tx_and_block() {
		let mut reject = Reject::new("block", RejectCode::Duplicate, "duplicate block");
		reject.hash = sha256d::Hash::hash(b"blk");
		let msg = Message::Reject(reject);
		assert_eq!(round_trip(&msg, PROTOCOL_VERSION), msg);

		let bare = Message::Reject(Reject::new("version", RejectCode::Obsolete, "too old"));
		let with_hash = msg.encode(PROTOCOL_VERSION, MessageEncoding::Base).unwrap();
		let without = bare.encode(PROTOCOL_VERSION, MessageEncoding::Base).unwrap();
		// varstr("block") + code + varstr("duplicate block") + 32-byte hash
		assert_eq!(with_hash.len(), 6 + 1 + 16 + 32);
		// varstr("version") + code + varstr("too old"), no hash
		assert_eq!(without.len(), 8 + 1 + 8);
		assert_eq!(round_trip(&bare, PROTOCOL_VERSION), bare);
	}

	#[test]
	fn reject_invalid_before_bip61() {
		let msg = Message::Reject(Reject::new("tx", RejectCode::Dust, "dust"));
		assert!(msg.encode(REJECT_VERSION - 1, MessageEncoding::Base).is_err());
	}

	#[test]
	fn feefilter_round_trip() {
		let msg = Message::FeeFilter(1000);
		assert_eq!(round_trip(&msg, PROTOCOL_VERSION), msg);
		assert!(msg.encode(FEEFILTER_VERSION - 1, MessageEncoding::Base).is_err());
	}

	#[test]
	fn filterload_enforces_limits() {
		let msg = Message::FilterLoad(FilterLoad {
			filter: vec![0xaa; 64],
			hash_funcs: 11,
			tweak: 0xdead_beef,
			flags: 1,
		});
		assert_eq!(round_trip(&msg, PROTOCOL_VERSION), msg);

		let too_big = Message::FilterLoad(FilterLoad {
			filter: vec![0; MAX_FILTER_LOAD_SIZE + 1],
			hash_funcs: 1,
			tweak: 0,
			flags: 0,
		});
		assert!(too_big.encode(PROTOCOL_VERSION, MessageEncoding::Base).is_err());

		let too_many_funcs = Message::FilterLoad(FilterLoad {
			filter: vec![0; 8],
			hash_funcs: MAX_FILTER_LOAD_HASH_FUNCS + 1,
			tweak: 0,
			flags: 0,
		});
		assert!(too_many_funcs.encode(PROTOCOL_VERSION, MessageEncoding::Base).is_err());
	}

	#[test]
	fn cf_messages_round_trip() {
		let stop = BlockHash::from_hash(sha256d::Hash::hash(b"stop"));
		for msg in vec![
			Message::GetCFilters(GetCFilters { filter_type: 0, start_height: 10, stop_hash: stop }),
			Message::GetCFHeaders(GetCFHeaders { filter_type: 0, start_height: 10, stop_hash: stop }),
			Message::GetCFCheckpt(GetCFCheckpt { filter_type: 0, stop_hash: stop }),
			Message::CFilter(CFilter { filter_type: 0, block_hash: stop, filter: vec![1, 2, 3] }),
			Message::CFHeaders(CFHeaders {
				filter_type: 0,
				stop_hash: stop,
				prev_filter_header: FilterHeader::from_hash(sha256d::Hash::hash(b"prev")),
				filter_hashes: vec![FilterHash::from_hash(sha256d::Hash::hash(b"f"))],
			}),
			Message::CFCheckpt(CFCheckpt {
				filter_type: 0,
				stop_hash: stop,
				filter_headers: vec![FilterHeader::from_hash(sha256d::Hash::hash(b"h"))],
			}),
		] {
			assert_eq!(round_trip(&msg, PROTOCOL_VERSION), msg);
		}
	}

	#[test]
	fn headers_reject_embedded_transactions() {
		let header = dummy_header();
		let msg = Message::Headers(vec![header, header]);
		assert_eq!(round_trip(&msg, PROTOCOL_VERSION), msg);

		let mut payload = Vec::new();
		put_var_int(&mut payload, 1);
		put_encodable(&mut payload, &header);
		put_var_int(&mut payload, 1); // claims one transaction
		let err =
			Message::decode(Command::Headers, &payload, PROTOCOL_VERSION, MessageEncoding::Base)
				.unwrap_err();
		assert!(err.is_malformed());
	}

	fn dummy_header() -> BlockHeader {
		BlockHeader {
			version: 1,
			prev_blockhash: BlockHash::from_hash(sha256d::Hash::hash(b"prev")),
			merkle_root: bitcoin::TxMerkleNode::from_hash(sha256d::Hash::hash(b"root")),
			time: 1_600_000_000,
			bits: 0x1d00_ffff,
			nonce: 42,
		}
	}
}
