//! The SymmetricPIR interface.
//!
//! Symmetric PIR protects the database as well as the query: keywords are
//! replaced by oblivious keywords derived through a verifiable OPRF
//! (P-384), and values are sealed with AES-GCM under keys derived from the
//! same OPRF output. The OPRF and AEAD themselves live with an external
//! collaborator; this module fixes the interface and the byte layout both
//! sides must agree on.

use crate::error::Result;
use crate::keyword::cuckoo::KeywordValuePair;

/// Length of an oblivious keyword: the first 16 bytes of the OPRF output.
pub const OBLIVIOUS_KEYWORD_SIZE: usize = 16;

/// Length of the AES key: the next 24 bytes of the OPRF output.
pub const ENCRYPTION_KEY_SIZE: usize = 24;

/// Length of the GCM nonce: the first 12 bytes of the nonce block.
pub const NONCE_SIZE: usize = 12;

/// Length of the GCM authentication tag appended to each sealed value.
pub const GCM_TAG_SIZE: usize = 16;

/// What a client needs to blind its keywords: the server's OPRF public
/// key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymmetricPirClientConfig {
	/// Serialized P-384 OPRF public key.
	pub oprf_public_key: Vec<u8>,
}

/// The database-side OPRF + AEAD provider.
///
/// Implementations evaluate the OPRF on a keyword, derive the oblivious
/// keyword and sealing key from its output, and seal the value; the core
/// only relies on the advertised byte layout.
pub trait SymmetricPirBackend {
	/// Maps one row to its oblivious keyword and sealed value.
	fn process_row(&self, row: &KeywordValuePair) -> Result<KeywordValuePair>;

	/// The public configuration clients blind their queries against.
	fn client_config(&self) -> SymmetricPirClientConfig;
}

/// Rewrites a database through a [`SymmetricPirBackend`]; the output rows
/// feed the regular keyword-PIR processing.
pub fn symmetric_pir_process<B: SymmetricPirBackend>(
	backend: &B,
	rows: &[KeywordValuePair],
) -> Result<Vec<KeywordValuePair>> {
	rows.iter().map(|row| backend.process_row(row)).collect()
}
