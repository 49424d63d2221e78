//! MulPir: private information retrieval by index and by keyword.
//!
//! The index engine compresses a batch of one-hot queries into a handful
//! of ciphertexts, expands them on the server with Galois automorphisms,
//! and walks a one- or two-dimensional database hypercube with
//! ciphertext-plaintext and ciphertext-ciphertext inner products. The
//! keyword layer reduces keyword lookup to batched index lookups through
//! cuckoo hashing.

#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod client;
mod database;
mod error;
pub mod keyword;
mod messages;
mod parameter;
mod server;

pub use client::MulPirClient;
pub use database::ProcessedDatabase;
pub use error::{PirError, Result};
pub use messages::{Query, Reply, Response};
pub use parameter::{generate_parameter, IndexPirConfig, IndexPirParameter, KeyCompression};
pub use server::MulPirServer;
