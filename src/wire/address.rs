use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bitcoin::consensus::encode::Decodable;
use bitcoin::network::constants::ServiceFlags;

use crate::time;
use super::{put_encodable, put_u16_be, put_u32, Error, PayloadReader};

/// A network address as carried in `addr` messages and in the two address
/// fields of a `version` message.
///
/// The timestamp is only on the wire for `addr` entries at protocol
/// versions that know it; the `version` address fields never carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetAddress {
	/// The last time the address was seen, in unix seconds.
	pub timestamp: u32,
	/// The services the node at this address supports.
	pub services: ServiceFlags,
	pub ip: IpAddr,
	pub port: u16,
}

impl NetAddress {
	/// Create an address with the timestamp set to the current time.
	pub fn new(ip: IpAddr, port: u16, services: ServiceFlags) -> NetAddress {
		NetAddress {
			timestamp: time::unix_time() as u32,
			services,
			ip,
			port,
		}
	}

	pub fn from_socket_addr(addr: &SocketAddr, services: ServiceFlags) -> NetAddress {
		NetAddress::new(addr.ip(), addr.port(), services)
	}

	pub fn socket_addr(&self) -> SocketAddr {
		SocketAddr::new(self.ip, self.port)
	}

	/// A zeroed, non-routable address carrying only the given services.
	/// Used to avoid advertising a real address.
	pub fn unroutable(services: ServiceFlags) -> NetAddress {
		NetAddress::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0, services)
	}

	pub(crate) fn encode(&self, buf: &mut Vec<u8>, with_timestamp: bool) {
		if with_timestamp {
			put_u32(buf, self.timestamp);
		}
		put_encodable(buf, &self.services);
		let v6 = match self.ip {
			IpAddr::V4(a) => a.to_ipv6_mapped(),
			IpAddr::V6(a) => a,
		};
		buf.extend_from_slice(&v6.octets());
		// Port is big-endian, unlike everything else.
		put_u16_be(buf, self.port);
	}

	pub(crate) fn decode(cur: &mut PayloadReader, with_timestamp: bool) -> Result<NetAddress, Error> {
		let timestamp = if with_timestamp { super::read_u32(cur)? } else { 0 };
		let services = ServiceFlags::consensus_decode(&mut *cur)?;
		let mut octets = [0u8; 16];
		std::io::Read::read_exact(cur, &mut octets)?;
		let v6 = Ipv6Addr::from(octets);
		let ip = match v6.to_ipv4() {
			Some(v4) if v6.segments()[..6] == [0, 0, 0, 0, 0, 0xffff] => IpAddr::V4(v4),
			_ => IpAddr::V6(v6),
		};
		let port = super::read_u16_be(cur)?;
		Ok(NetAddress { timestamp, services, ip, port })
	}
}

impl fmt::Display for NetAddress {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.socket_addr())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	#[test]
	fn round_trip_v4() {
		let na = NetAddress::new("10.0.0.1".parse().unwrap(), 8333, ServiceFlags::NETWORK);
		let mut buf = Vec::new();
		na.encode(&mut buf, true);
		assert_eq!(buf.len(), 30);
		let mut cur = Cursor::new(&buf[..]);
		assert_eq!(NetAddress::decode(&mut cur, true).unwrap(), na);
	}

	#[test]
	fn round_trip_v6_without_timestamp() {
		let na = NetAddress {
			timestamp: 0,
			services: ServiceFlags::NONE,
			ip: "2001:db8::1".parse().unwrap(),
			port: 18333,
		};
		let mut buf = Vec::new();
		na.encode(&mut buf, false);
		assert_eq!(buf.len(), 26);
		let mut cur = Cursor::new(&buf[..]);
		assert_eq!(NetAddress::decode(&mut cur, false).unwrap(), na);
	}

	#[test]
	fn port_is_big_endian() {
		let na = NetAddress::new("127.0.0.1".parse().unwrap(), 0x1234, ServiceFlags::NONE);
		let mut buf = Vec::new();
		na.encode(&mut buf, false);
		assert_eq!(&buf[buf.len() - 2..], &[0x12, 0x34]);
	}
}
