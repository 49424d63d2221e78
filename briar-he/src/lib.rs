//! The briar RLWE kernel: RNS polynomial ring, NTT, Galois automorphisms,
//! and the BFV scheme glue the protocol engines build on.
//!
//! # Example
//!
//! ```rust
//! use briar_he::bfv::{BfvContext, BfvParameters, Plaintext, SecretKey};
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut rng = StdRng::seed_from_u64(0);
//!     let context = BfvContext::new(BfvParameters::insecure_testing(64, 257, 3)?)?;
//!     let secret_key = SecretKey::generate(&context, &mut rng);
//!
//!     let plaintext = Plaintext::encode_coefficients(&context, &[1, 2, 3, 4])?;
//!     let ciphertext = secret_key.encrypt(&plaintext, &mut rng)?;
//!     let decrypted = secret_key.decrypt(&ciphertext)?;
//!     assert_eq!(decrypted.coefficients()[..4], [1, 2, 3, 4]);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod bfv;
mod context;
mod error;
mod format;
mod galois;
mod ntt;
mod poly;
mod sampling;

pub use context::{PolyContext, MAX_DEGREE};
pub use error::{HeError, Result};
pub use format::{Coeff, Eval, PolyFormat};
pub use galois::GaloisElement;
pub use ntt::{is_ntt_friendly, NttContext};
pub use poly::{LazyAccumulator, PolyRq};
