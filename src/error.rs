
use std::{fmt, io};

use crate::wire;

#[derive(Debug)]
pub enum Error {
	/// The remote peer advertised one of our own recently used version
	/// nonces.
	SelfConnection,
	/// The remote peer's protocol version is below the minimum we accept.
	ObsoleteVersion(u32),
	/// The first message of the handshake was not `version`.
	ExpectedVersion,
	/// Version negotiation did not complete in time.
	NegotiateTimeout,
	/// The `on_version` listener rejected the peer.
	ListenerReject(String),
	/// A locator request carried more hashes than a message may hold.
	TooManyLocatorHashes(usize),
	/// A peer address string could not be parsed or resolved.
	InvalidAddress(String),
	/// A wire protocol error.
	Wire(wire::Error),
	/// An I/O error.
	Io(io::Error),
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::Io(e)
	}
}

impl From<wire::Error> for Error {
	fn from(e: wire::Error) -> Error {
		Error::Wire(e)
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			Error::SelfConnection => write!(f, "disconnecting peer connected to self"),
			Error::ObsoleteVersion(v) => {
				write!(f, "peer protocol version {} is obsolete", v)
			}
			Error::ExpectedVersion => {
				write!(f, "a version message must precede all others")
			}
			Error::NegotiateTimeout => write!(f, "protocol negotiation timeout"),
			Error::ListenerReject(ref reason) => {
				write!(f, "version rejected by listener: {}", reason)
			}
			Error::TooManyLocatorHashes(n) => {
				write!(f, "too many block locator hashes for message: {}", n)
			}
			Error::InvalidAddress(ref addr) => write!(f, "invalid peer address: {}", addr),
			Error::Wire(ref e) => write!(f, "wire error: {}", e),
			Error::Io(ref e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl std::error::Error for Error {}
