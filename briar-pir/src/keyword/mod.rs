//! Keyword PIR: cuckoo hashing layered on the index engine.

mod bucket;
mod cuckoo;
mod hash;
mod pir;
mod symmetric;

pub use bucket::{HashBucket, HashBucketSlot};
pub use cuckoo::{BucketCountConfig, CuckooTable, CuckooTableConfig, KeywordValuePair};
pub use hash::HashKeyword;
pub use pir::{KeywordPirClient, KeywordPirConfig, KeywordPirParameter, KeywordPirServer};
pub use symmetric::{
	symmetric_pir_process, SymmetricPirBackend, SymmetricPirClientConfig,
	ENCRYPTION_KEY_SIZE, GCM_TAG_SIZE, NONCE_SIZE, OBLIVIOUS_KEYWORD_SIZE,
};
