//! PIR wire messages.

use std::sync::Arc;

use briar_he::bfv::{BfvContext, Ciphertext};
use briar_he::Coeff;
use briar_math::{read_varint, write_varint};

use crate::error::{PirError, Result};

/// A client query: compressed one-hot ciphertexts plus the number of
/// batched indices they encode.
#[derive(Debug, Clone)]
pub struct Query {
	/// Compressed query ciphertexts, in the coefficient basis.
	pub ciphertexts: Vec<Ciphertext<Coeff>>,
	/// Number of indices batched into this query.
	pub indices_count: usize,
}

/// One reply per batched index: a ciphertext per database chunk.
#[derive(Debug, Clone)]
pub struct Reply {
	/// The per-chunk response ciphertexts.
	pub ciphertexts: Vec<Ciphertext<Coeff>>,
}

/// The server's response: a reply per batched index.
#[derive(Debug, Clone)]
pub struct Response {
	/// One reply per query index, in query order.
	pub replies: Vec<Reply>,
}

fn write_ciphertexts(buffer: &mut Vec<u8>, ciphertexts: &[Ciphertext<Coeff>]) {
	write_varint(buffer, ciphertexts.len() as u64);
	for ciphertext in ciphertexts {
		let bytes = ciphertext.to_bytes();
		write_varint(buffer, bytes.len() as u64);
		buffer.extend(bytes);
	}
}

fn read_ciphertexts(
	context: &Arc<BfvContext>,
	bytes: &[u8],
	offset: &mut usize,
) -> Result<Vec<Ciphertext<Coeff>>> {
	let (count, consumed) = read_varint(&bytes[*offset..])?;
	*offset += consumed;
	let mut ciphertexts = Vec::with_capacity(count as usize);
	for _ in 0..count {
		let (length, consumed) = read_varint(&bytes[*offset..])?;
		*offset += consumed;
		let end = offset
			.checked_add(length as usize)
			.filter(|&end| end <= bytes.len())
			.ok_or_else(|| PirError::CorruptedData {
				reason: "ciphertext extends past the end of the buffer".to_string(),
			})?;
		let chunk = &bytes[*offset..end];
		ciphertexts.push(Ciphertext::from_bytes(context, chunk)?);
		*offset = end;
	}
	Ok(ciphertexts)
}

impl Query {
	/// Serializes the query.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut buffer = Vec::new();
		write_varint(&mut buffer, self.indices_count as u64);
		write_ciphertexts(&mut buffer, &self.ciphertexts);
		buffer
	}

	/// Deserializes a query.
	pub fn from_bytes(context: &Arc<BfvContext>, bytes: &[u8]) -> Result<Self> {
		let mut offset = 0usize;
		let (indices_count, consumed) = read_varint(bytes)?;
		offset += consumed;
		let ciphertexts = read_ciphertexts(context, bytes, &mut offset)?;
		Ok(Self {
			ciphertexts,
			indices_count: indices_count as usize,
		})
	}
}

impl Response {
	/// Serializes the response.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut buffer = Vec::new();
		write_varint(&mut buffer, self.replies.len() as u64);
		for reply in &self.replies {
			write_ciphertexts(&mut buffer, &reply.ciphertexts);
		}
		buffer
	}

	/// Deserializes a response.
	pub fn from_bytes(context: &Arc<BfvContext>, bytes: &[u8]) -> Result<Self> {
		let mut offset = 0usize;
		let (reply_count, consumed) = read_varint(bytes)?;
		offset += consumed;
		let mut replies = Vec::with_capacity(reply_count as usize);
		for _ in 0..reply_count {
			replies.push(Reply {
				ciphertexts: read_ciphertexts(context, bytes, &mut offset)?,
			});
		}
		Ok(Self {
			replies,
		})
	}
}
