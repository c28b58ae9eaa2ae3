//! Bitcoin wire protocol codec.
//!
//! Implements the message framing used by the p2p network (magic, command,
//! length, checksum, payload) along with the payload encodings of all
//! supported protocol messages. Encodings are protocol-version aware:
//! fields that were added in later protocol versions are absent when
//! speaking to older peers.

mod address;
mod inventory;
mod message;

pub use address::NetAddress;
pub use inventory::{InvType, InvVect};
pub use message::{
	Alert, CFCheckpt, CFHeaders, CFilter, Command, FilterLoad, GetCFCheckpt, GetCFHeaders,
	GetCFilters, LocatorRequest, Message, Reject, RejectCode, VersionMessage, MAX_ADDR_PER_MSG,
	MAX_BLOCK_HEADERS_PER_MSG, MAX_BLOCK_LOCATORS_PER_MSG, MAX_INV_PER_MSG, MAX_USER_AGENT_LEN,
};

use std::{fmt, io};
use std::io::Read;

use bitcoin::consensus::encode::{self, Decodable, Encodable, VarInt};
use bitcoin::hashes::{sha256d, Hash};

/// The highest protocol version this codec can speak.
pub const PROTOCOL_VERSION: u32 = FEEFILTER_VERSION;

/// The protocol version from which `addr` entries carry a timestamp.
pub const NET_ADDRESS_TIME_VERSION: u32 = 31402;

/// The protocol version up to which `ping` carries no nonce and `pong`
/// does not exist (BIP 31).
pub const BIP0031_VERSION: u32 = 60000;

/// The protocol version from which the `mempool` message is understood
/// (BIP 35).
pub const BIP0035_VERSION: u32 = 60002;

/// The protocol version from which bloom filtering messages and the
/// `relay` field of `version` are understood (BIP 37).
pub const BIP0037_VERSION: u32 = 70001;

/// The protocol version from which the `reject` message is understood
/// (BIP 61).
pub const REJECT_VERSION: u32 = 70002;

/// The protocol version from which the `sendheaders` message is
/// understood (BIP 130).
pub const SENDHEADERS_VERSION: u32 = 70012;

/// The protocol version from which the `feefilter` message is understood
/// (BIP 133).
pub const FEEFILTER_VERSION: u32 = 70013;

/// Number of bytes in a message header: magic 4 + command 12 + length 4 +
/// checksum 4.
pub const HEADER_SIZE: usize = 24;

/// Number of bytes a command occupies in a message header.
pub const COMMAND_SIZE: usize = 12;

/// The largest payload any message may carry, regardless of command.
pub const MAX_MESSAGE_PAYLOAD: u32 = 1024 * 1024 * 32;

/// The largest possible encoding of a variable-length integer.
pub const MAX_VAR_INT_PAYLOAD: u32 = 9;

/// Message encoding flavor, selected per send.
///
/// [MessageEncoding::Witness] carries segregated witness data in `tx` and
/// `block` payloads (BIP 144), [MessageEncoding::Base] strips it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageEncoding {
	Base,
	Witness,
}

/// An error produced while reading or writing a wire message.
#[derive(Debug)]
pub enum Error {
	/// A transport-level I/O error. Everything else is a framing or
	/// payload error caused by the bytes themselves.
	Io(io::Error),
	/// The frame header carried the wrong network magic.
	BadMagic(u32),
	/// The frame declared a length above the global payload cap.
	FrameTooLarge(u32),
	/// The frame carried a command this codec doesn't know.
	UnknownCommand([u8; COMMAND_SIZE]),
	/// The payload is larger than the maximum for its command.
	OversizePayload { command: Command, size: u32, max: u32 },
	/// The payload checksum didn't match the header.
	Checksum { command: Command, want: [u8; 4], got: [u8; 4] },
	/// The payload failed consensus decoding.
	Decode(encode::Error),
	/// The payload violated a protocol rule for its command.
	Malformed { command: Command, reason: String },
}

impl Error {
	/// Whether the error was caused by the message bytes rather than by
	/// the transport. Malformed input warrants a `reject` message, a
	/// failing transport does not.
	pub fn is_malformed(&self) -> bool {
		!matches!(*self, Error::Io(_))
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::Io(e)
	}
}

impl From<encode::Error> for Error {
	fn from(e: encode::Error) -> Error {
		Error::Decode(e)
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			Error::Io(ref e) => write!(f, "I/O error: {}", e),
			Error::BadMagic(magic) => write!(f, "message with invalid magic: 0x{:08x}", magic),
			Error::FrameTooLarge(size) => {
				write!(f, "message payload is too large: {} > {}", size, MAX_MESSAGE_PAYLOAD)
			}
			Error::UnknownCommand(ref cmd) => {
				write!(f, "unknown command: {:?}", String::from_utf8_lossy(&cmd[..]))
			}
			Error::OversizePayload { command, size, max } => {
				write!(f, "payload of {} message too large: {} > {}", command, size, max)
			}
			Error::Checksum { command, want, got } => write!(
				f,
				"payload checksum of {} message failed: checksum {:x?}, want {:x?}",
				command, got, want,
			),
			Error::Decode(ref e) => write!(f, "payload decoding error: {}", e),
			Error::Malformed { command, ref reason } => {
				write!(f, "malformed {} message: {}", command, reason)
			}
		}
	}
}

impl std::error::Error for Error {}

/// Read one complete message from the reader.
///
/// Verifies the network magic, the per-command payload size limit and the
/// payload checksum before decoding the payload at the given protocol
/// version. On success the decoded message and the raw payload bytes are
/// returned.
///
/// The first element of the returned pair is the number of bytes consumed
/// from the reader, which is reported even when the result is an error so
/// callers can keep their transfer counters correct.
pub fn read_message<R: Read>(
	r: &mut R,
	pver: u32,
	magic: u32,
	enc: MessageEncoding,
) -> (usize, Result<(Message, Vec<u8>), Error>) {
	let mut total = 0;

	let mut header = [0u8; HEADER_SIZE];
	let (n, res) = read_full(r, &mut header);
	total += n;
	if let Err(e) = res {
		// A remote that goes away on a frame boundary is a normal close,
		// not a truncated message.
		let e = if e.kind() == io::ErrorKind::UnexpectedEof && n == 0 {
			io::Error::new(io::ErrorKind::ConnectionReset, "peer disconnected")
		} else {
			e
		};
		return (total, Err(Error::Io(e)));
	}

	let got_magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
	if got_magic != magic {
		return (total, Err(Error::BadMagic(got_magic)));
	}

	let length = u32::from_le_bytes([header[16], header[17], header[18], header[19]]);
	if length > MAX_MESSAGE_PAYLOAD {
		return (total, Err(Error::FrameTooLarge(length)));
	}

	let mut checksum = [0u8; 4];
	checksum.copy_from_slice(&header[20..24]);

	let mut cmd_bytes = [0u8; COMMAND_SIZE];
	cmd_bytes.copy_from_slice(&header[4..16]);
	let command = match Command::from_bytes(&cmd_bytes) {
		Some(cmd) => cmd,
		None => {
			// Discard the payload so the stream stays framed for the
			// next message.
			match io::copy(&mut r.take(length as u64), &mut io::sink()) {
				Ok(n) => total += n as usize,
				Err(e) => return (total, Err(Error::Io(e))),
			}
			return (total, Err(Error::UnknownCommand(cmd_bytes)));
		}
	};

	let max = message::max_payload(command, pver).min(MAX_MESSAGE_PAYLOAD);
	if length > max {
		return (total, Err(Error::OversizePayload { command, size: length, max }));
	}

	let mut payload = vec![0u8; length as usize];
	let (n, res) = read_full(r, &mut payload);
	total += n;
	if let Err(e) = res {
		return (total, Err(Error::Io(e)));
	}

	let want = checksum_of(&payload);
	if want != checksum {
		return (total, Err(Error::Checksum { command, want, got: checksum }));
	}

	let res = Message::decode(command, &payload, pver, enc).map(|msg| (msg, payload));
	(total, res)
}

/// Write one complete message to the writer, framed for the given network
/// magic and encoded at the given protocol version.
///
/// The first element of the returned pair is the number of bytes written,
/// reported even when the result is an error.
pub fn write_message<W: io::Write>(
	w: &mut W,
	msg: &Message,
	pver: u32,
	magic: u32,
	enc: MessageEncoding,
) -> (usize, Result<(), Error>) {
	let command = msg.command();
	let payload = match msg.encode(pver, enc) {
		Ok(p) => p,
		Err(e) => return (0, Err(e)),
	};

	let max = message::max_payload(command, pver).min(MAX_MESSAGE_PAYLOAD);
	if payload.len() > max as usize {
		let size = payload.len() as u32;
		return (0, Err(Error::OversizePayload { command, size, max }));
	}

	let mut header = [0u8; HEADER_SIZE];
	header[0..4].copy_from_slice(&magic.to_le_bytes());
	header[4..16].copy_from_slice(&command.to_bytes());
	header[16..20].copy_from_slice(&(payload.len() as u32).to_le_bytes());
	header[20..24].copy_from_slice(&checksum_of(&payload));

	let mut total = 0;
	if let Err(e) = w.write_all(&header) {
		return (total, Err(Error::Io(e)));
	}
	total += HEADER_SIZE;
	if let Err(e) = w.write_all(&payload) {
		return (total, Err(Error::Io(e)));
	}
	total += payload.len();

	(total, Ok(()))
}

/// The first four bytes of the double-SHA256 of the payload.
fn checksum_of(payload: &[u8]) -> [u8; 4] {
	let hash = sha256d::Hash::hash(payload).into_inner();
	[hash[0], hash[1], hash[2], hash[3]]
}

/// Like [Read::read_exact], but additionally reports how many bytes were
/// consumed when the read fails partway.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> (usize, io::Result<()>) {
	let mut off = 0;
	while off < buf.len() {
		match r.read(&mut buf[off..]) {
			Ok(0) => {
				let e = io::Error::new(io::ErrorKind::UnexpectedEof, "failed to fill buffer");
				return (off, Err(e));
			}
			Ok(n) => off += n,
			Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
			Err(e) => return (off, Err(e)),
		}
	}
	(off, Ok(()))
}

// Payload en-/decoding helpers shared by the message modules. Encoders
// write into a plain Vec and therefore cannot fail; decoders read from an
// in-memory cursor over the payload, so any I/O error they produce means
// the payload was truncated.

pub(crate) type PayloadReader<'a> = io::Cursor<&'a [u8]>;

pub(crate) fn remaining(cur: &PayloadReader) -> usize {
	(cur.get_ref().len() as u64).saturating_sub(cur.position()) as usize
}

pub(crate) fn put_u8(buf: &mut Vec<u8>, v: u8) {
	buf.push(v);
}

pub(crate) fn put_u16_be(buf: &mut Vec<u8>, v: u16) {
	buf.extend_from_slice(&v.to_be_bytes());
}

pub(crate) fn put_u32(buf: &mut Vec<u8>, v: u32) {
	buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u64(buf: &mut Vec<u8>, v: u64) {
	buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_i32(buf: &mut Vec<u8>, v: i32) {
	buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_i64(buf: &mut Vec<u8>, v: i64) {
	buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_var_int(buf: &mut Vec<u8>, n: u64) {
	match n {
		0..=0xfc => buf.push(n as u8),
		0xfd..=0xffff => {
			buf.push(0xfd);
			buf.extend_from_slice(&(n as u16).to_le_bytes());
		}
		0x1_0000..=0xffff_ffff => {
			buf.push(0xfe);
			buf.extend_from_slice(&(n as u32).to_le_bytes());
		}
		_ => {
			buf.push(0xff);
			buf.extend_from_slice(&n.to_le_bytes());
		}
	}
}

pub(crate) fn put_var_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
	put_var_int(buf, bytes.len() as u64);
	buf.extend_from_slice(bytes);
}

pub(crate) fn put_var_string(buf: &mut Vec<u8>, s: &str) {
	put_var_bytes(buf, s.as_bytes());
}

pub(crate) fn put_hash(buf: &mut Vec<u8>, hash: &sha256d::Hash) {
	buf.extend_from_slice(&hash.into_inner());
}

/// Consensus-encode a value into the buffer.
pub(crate) fn put_encodable<T: Encodable>(buf: &mut Vec<u8>, v: &T) {
	v.consensus_encode(buf).expect("writing to a Vec doesn't error");
}

pub(crate) fn read_u8(cur: &mut PayloadReader) -> Result<u8, Error> {
	let mut b = [0u8; 1];
	cur.read_exact(&mut b)?;
	Ok(b[0])
}

pub(crate) fn read_u16_be(cur: &mut PayloadReader) -> Result<u16, Error> {
	let mut b = [0u8; 2];
	cur.read_exact(&mut b)?;
	Ok(u16::from_be_bytes(b))
}

pub(crate) fn read_u32(cur: &mut PayloadReader) -> Result<u32, Error> {
	let mut b = [0u8; 4];
	cur.read_exact(&mut b)?;
	Ok(u32::from_le_bytes(b))
}

pub(crate) fn read_u64(cur: &mut PayloadReader) -> Result<u64, Error> {
	let mut b = [0u8; 8];
	cur.read_exact(&mut b)?;
	Ok(u64::from_le_bytes(b))
}

pub(crate) fn read_i32(cur: &mut PayloadReader) -> Result<i32, Error> {
	let mut b = [0u8; 4];
	cur.read_exact(&mut b)?;
	Ok(i32::from_le_bytes(b))
}

pub(crate) fn read_i64(cur: &mut PayloadReader) -> Result<i64, Error> {
	let mut b = [0u8; 8];
	cur.read_exact(&mut b)?;
	Ok(i64::from_le_bytes(b))
}

pub(crate) fn read_var_int(cur: &mut PayloadReader) -> Result<u64, Error> {
	Ok(VarInt::consensus_decode(&mut *cur)?.0)
}

pub(crate) fn read_var_bytes(
	cur: &mut PayloadReader,
	max: usize,
	command: Command,
	what: &str,
) -> Result<Vec<u8>, Error> {
	let len = read_var_int(cur)? as usize;
	if len > max {
		return Err(Error::Malformed {
			command,
			reason: format!("{} is too long: {} > {}", what, len, max),
		});
	}
	if len > remaining(cur) {
		return Err(Error::Malformed {
			command,
			reason: format!("{} is longer than the remaining payload", what),
		});
	}
	let mut bytes = vec![0u8; len];
	cur.read_exact(&mut bytes)?;
	Ok(bytes)
}

pub(crate) fn read_var_string(
	cur: &mut PayloadReader,
	max: usize,
	command: Command,
	what: &str,
) -> Result<String, Error> {
	let bytes = read_var_bytes(cur, max, command, what)?;
	String::from_utf8(bytes).map_err(|_| Error::Malformed {
		command,
		reason: format!("{} is not valid UTF-8", what),
	})
}

pub(crate) fn read_hash(cur: &mut PayloadReader) -> Result<sha256d::Hash, Error> {
	let mut b = [0u8; 32];
	cur.read_exact(&mut b)?;
	Ok(sha256d::Hash::from_inner(b))
}
