use std::fmt;

use bitcoin::hashes::sha256d;
use bitcoin::{BlockHash, Txid};

use super::{put_hash, put_u32, read_hash, read_u32, Error, PayloadReader};

/// Bit flag marking the witness variant of an inventory type (BIP 144).
const WITNESS_FLAG: u32 = 1 << 30;

/// The kind of object an [InvVect] announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvType {
	Error,
	Tx,
	Block,
	FilteredBlock,
	WitnessTx,
	WitnessBlock,
	FilteredWitnessBlock,
	/// A type this codec doesn't know. Carried through untouched so
	/// unknown announcements survive a decode/encode cycle.
	Unknown(u32),
}

impl InvType {
	pub(crate) fn to_u32(self) -> u32 {
		match self {
			InvType::Error => 0,
			InvType::Tx => 1,
			InvType::Block => 2,
			InvType::FilteredBlock => 3,
			InvType::WitnessTx => 1 | WITNESS_FLAG,
			InvType::WitnessBlock => 2 | WITNESS_FLAG,
			InvType::FilteredWitnessBlock => 3 | WITNESS_FLAG,
			InvType::Unknown(v) => v,
		}
	}

	pub(crate) fn from_u32(v: u32) -> InvType {
		match v {
			0 => InvType::Error,
			1 => InvType::Tx,
			2 => InvType::Block,
			3 => InvType::FilteredBlock,
			v if v == 1 | WITNESS_FLAG => InvType::WitnessTx,
			v if v == 2 | WITNESS_FLAG => InvType::WitnessBlock,
			v if v == 3 | WITNESS_FLAG => InvType::FilteredWitnessBlock,
			v => InvType::Unknown(v),
		}
	}

	/// Whether this type announces a block. Block announcements skip the
	/// inventory trickle and are relayed immediately.
	pub fn is_block(self) -> bool {
		matches!(self, InvType::Block | InvType::WitnessBlock)
	}
}

impl fmt::Display for InvType {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			InvType::Error => write!(f, "ERROR"),
			InvType::Tx => write!(f, "MSG_TX"),
			InvType::Block => write!(f, "MSG_BLOCK"),
			InvType::FilteredBlock => write!(f, "MSG_FILTERED_BLOCK"),
			InvType::WitnessTx => write!(f, "MSG_WITNESS_TX"),
			InvType::WitnessBlock => write!(f, "MSG_WITNESS_BLOCK"),
			InvType::FilteredWitnessBlock => write!(f, "MSG_FILTERED_WITNESS_BLOCK"),
			InvType::Unknown(v) => write!(f, "Unknown InvType ({})", v),
		}
	}
}

/// An inventory vector: the announcement that a peer has an object of a
/// given type available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvVect {
	pub inv_type: InvType,
	pub hash: sha256d::Hash,
}

impl InvVect {
	pub fn new(inv_type: InvType, hash: sha256d::Hash) -> InvVect {
		InvVect { inv_type, hash }
	}

	pub fn block(hash: BlockHash) -> InvVect {
		InvVect::new(InvType::Block, hash.as_hash())
	}

	pub fn tx(txid: Txid) -> InvVect {
		InvVect::new(InvType::Tx, txid.as_hash())
	}

	pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
		put_u32(buf, self.inv_type.to_u32());
		put_hash(buf, &self.hash);
	}

	pub(crate) fn decode(cur: &mut PayloadReader) -> Result<InvVect, Error> {
		let inv_type = InvType::from_u32(read_u32(cur)?);
		let hash = read_hash(cur)?;
		Ok(InvVect { inv_type, hash })
	}
}

impl fmt::Display for InvVect {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{} {}", self.inv_type, self.hash)
	}
}
