use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use bitcoin::network::constants::{Network, ServiceFlags};
use bitcoin::util::merkleblock::MerkleBlock;
use bitcoin::{Block, BlockHash, BlockHeader, Transaction};

use crate::peer::Peer;
use crate::wire::{
	Alert, CFCheckpt, CFHeaders, CFilter, FilterLoad, GetCFCheckpt, GetCFHeaders, GetCFilters,
	InvVect, LocatorRequest, Message, NetAddress, Reject, VersionMessage,
};
use crate::{wire, Error};

/// Callback returning the hash and height of our best known block, used
/// to fill in the `version` message.
pub type NewestBlockFn = Box<dyn Fn() -> (BlockHash, i32) + Send + Sync>;

/// Callback resolving a hostname into a network address, for hosts that
/// are not plain IP addresses (e.g. onion names behind a proxy).
pub type HostToNetAddrFn =
	Box<dyn Fn(&str, u16, ServiceFlags) -> Result<NetAddress, Error> + Send + Sync>;

/// Callback invoked with the remote `version` message during the
/// handshake. Returning a reject message refuses the peer: the reject is
/// sent and the connection is torn down.
pub type OnVersionFn = Box<dyn Fn(&Peer, &VersionMessage) -> Option<Reject> + Send + Sync>;

/// Callbacks to invoke when the peer receives messages. Any listener left
/// unset is ignored.
///
/// Listeners run serially on the peer's input task: one callback blocks
/// the processing of the next message. They must not call blocking peer
/// methods such as [Peer::wait_for_disconnect] on the same peer, which
/// would deadlock the input task.
#[derive(Default)]
pub struct MessageListeners {
	/// Invoked when a peer receives a getaddr message.
	pub on_get_addr: Option<Box<dyn Fn(&Peer) + Send + Sync>>,
	/// Invoked when a peer receives an addr message.
	pub on_addr: Option<Box<dyn Fn(&Peer, &[NetAddress]) + Send + Sync>>,
	/// Invoked when a peer receives a ping message.
	pub on_ping: Option<Box<dyn Fn(&Peer, u64) + Send + Sync>>,
	/// Invoked when a peer receives a pong message.
	pub on_pong: Option<Box<dyn Fn(&Peer, u64) + Send + Sync>>,
	/// Invoked when a peer receives an alert message.
	pub on_alert: Option<Box<dyn Fn(&Peer, &Alert) + Send + Sync>>,
	/// Invoked when a peer receives a mempool message.
	pub on_mem_pool: Option<Box<dyn Fn(&Peer) + Send + Sync>>,
	/// Invoked when a peer receives a tx message.
	pub on_tx: Option<Box<dyn Fn(&Peer, &Transaction) + Send + Sync>>,
	/// Invoked when a peer receives a block message. The raw payload
	/// bytes are passed along with the decoded block.
	pub on_block: Option<Box<dyn Fn(&Peer, &Block, &[u8]) + Send + Sync>>,
	/// Invoked when a peer receives an inv message.
	pub on_inv: Option<Box<dyn Fn(&Peer, &[InvVect]) + Send + Sync>>,
	/// Invoked when a peer receives a headers message.
	pub on_headers: Option<Box<dyn Fn(&Peer, &[BlockHeader]) + Send + Sync>>,
	/// Invoked when a peer receives a notfound message.
	pub on_not_found: Option<Box<dyn Fn(&Peer, &[InvVect]) + Send + Sync>>,
	/// Invoked when a peer receives a getdata message.
	pub on_get_data: Option<Box<dyn Fn(&Peer, &[InvVect]) + Send + Sync>>,
	/// Invoked when a peer receives a getblocks message.
	pub on_get_blocks: Option<Box<dyn Fn(&Peer, &LocatorRequest) + Send + Sync>>,
	/// Invoked when a peer receives a getheaders message.
	pub on_get_headers: Option<Box<dyn Fn(&Peer, &LocatorRequest) + Send + Sync>>,
	/// Invoked when a peer receives a getcfilters message.
	pub on_get_cfilters: Option<Box<dyn Fn(&Peer, &GetCFilters) + Send + Sync>>,
	/// Invoked when a peer receives a getcfheaders message.
	pub on_get_cfheaders: Option<Box<dyn Fn(&Peer, &GetCFHeaders) + Send + Sync>>,
	/// Invoked when a peer receives a getcfcheckpt message.
	pub on_get_cfcheckpt: Option<Box<dyn Fn(&Peer, &GetCFCheckpt) + Send + Sync>>,
	/// Invoked when a peer receives a cfilter message.
	pub on_cfilter: Option<Box<dyn Fn(&Peer, &CFilter) + Send + Sync>>,
	/// Invoked when a peer receives a cfheaders message.
	pub on_cfheaders: Option<Box<dyn Fn(&Peer, &CFHeaders) + Send + Sync>>,
	/// Invoked when a peer receives a cfcheckpt message.
	pub on_cfcheckpt: Option<Box<dyn Fn(&Peer, &CFCheckpt) + Send + Sync>>,
	/// Invoked when a peer receives a feefilter message.
	pub on_fee_filter: Option<Box<dyn Fn(&Peer, i64) + Send + Sync>>,
	/// Invoked when a peer receives a filteradd message.
	pub on_filter_add: Option<Box<dyn Fn(&Peer, &[u8]) + Send + Sync>>,
	/// Invoked when a peer receives a filterclear message.
	pub on_filter_clear: Option<Box<dyn Fn(&Peer) + Send + Sync>>,
	/// Invoked when a peer receives a filterload message.
	pub on_filter_load: Option<Box<dyn Fn(&Peer, &FilterLoad) + Send + Sync>>,
	/// Invoked when a peer receives a merkleblock message.
	pub on_merkle_block: Option<Box<dyn Fn(&Peer, &MerkleBlock) + Send + Sync>>,
	/// Invoked when a peer receives a version message during the
	/// handshake. Returning a reject refuses the peer.
	pub on_version: Option<OnVersionFn>,
	/// Invoked when a peer receives its verack message.
	pub on_ver_ack: Option<Box<dyn Fn(&Peer) + Send + Sync>>,
	/// Invoked when a peer receives a reject message.
	pub on_reject: Option<Box<dyn Fn(&Peer, &Reject) + Send + Sync>>,
	/// Invoked when a peer receives a sendheaders message.
	pub on_send_headers: Option<Box<dyn Fn(&Peer) + Send + Sync>>,
	/// Invoked for every read off the wire with the number of bytes read,
	/// the message if one was decoded and the error if the read failed.
	/// Useful for keeping server-wide byte counts.
	pub on_read:
		Option<Box<dyn Fn(&Peer, usize, Option<&Message>, Option<&wire::Error>) + Send + Sync>>,
	/// Invoked for every message written to the wire with the number of
	/// bytes written and the error if the write failed.
	pub on_write:
		Option<Box<dyn Fn(&Peer, usize, &Message, Option<&wire::Error>) + Send + Sync>>,
}

/// Configuration options for a [Peer].
pub struct Config {
	/// Callback which provides the newest block details as needed.
	///
	/// Can be unset, in which case the peer reports a block height of 0,
	/// but peers should specify it so their best known block is reported
	/// accurately.
	pub newest_block: Option<NewestBlockFn>,

	/// Returns the network address for a given host. Can be unset, in
	/// which case the host is parsed as an IP address.
	pub host_to_net_address: Option<HostToNetAddrFn>,

	/// The proxy address used for connections, as a "host:port" string.
	/// The only effect is to suppress leaking the proxy address in the
	/// `version` message, so it only needs to be set when using a tor
	/// proxy.
	pub proxy: Option<String>,

	/// The user agent name to advertise.
	pub user_agent_name: String,

	/// The user agent version to advertise, ideally in the form
	/// "major.minor.revision".
	pub user_agent_version: String,

	/// User agent comments to advertise. Must not contain the characters
	/// forbidden by BIP 14: '/', ':', '(' and ')'.
	pub user_agent_comments: Vec<String>,

	/// The network the peer is associated with.
	///
	/// Default value: testnet.
	pub network: Network,

	/// The services to advertise as supported by the local peer.
	///
	/// Default value: none.
	pub services: ServiceFlags,

	/// The maximum protocol version to use and advertise. Zero means the
	/// highest version the codec supports.
	pub protocol_version: u32,

	/// Ask remote peers not to send inv messages for transactions.
	pub disable_relay_tx: bool,

	/// Callbacks invoked on receiving peer messages.
	pub listeners: MessageListeners,

	/// The interval of the ticker which trickles queued inventory to the
	/// peer. Non-positive values select the default.
	///
	/// Default value: 1 second.
	pub trickle_interval: Duration,

	/// The local IP advertised in our `version` message.
	pub ip: IpAddr,

	/// The local port advertised in our `version` message.
	pub port: u16,
}

impl Default for Config {
	fn default() -> Config {
		Config {
			newest_block: None,
			host_to_net_address: None,
			proxy: None,
			user_agent_name: "bitcoin-peer".to_owned(),
			user_agent_version: env!("CARGO_PKG_VERSION").to_owned(),
			user_agent_comments: Vec::new(),
			network: Network::Testnet,
			services: ServiceFlags::NONE,
			protocol_version: wire::PROTOCOL_VERSION,
			disable_relay_tx: false,
			listeners: MessageListeners::default(),
			trickle_interval: Duration::from_secs(1),
			ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
			port: 0,
		}
	}
}
