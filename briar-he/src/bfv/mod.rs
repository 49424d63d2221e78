//! The BFV scheme: parameters, keys, encryption, and the homomorphic
//! operations the PIR and PNNS engines drive.

mod ciphertext;
mod keys;
mod mul;
mod params;
mod plaintext;
mod secret_key;
mod simd;

pub use ciphertext::Ciphertext;
pub use keys::{EvaluationKey, EvaluationKeyConfig, KeySwitchKey};
pub use mul::TensorProduct;
pub use params::{BfvContext, BfvParameters, DEFAULT_ERROR_STD_DEV, MAX_TENSOR_ACCUMULATION};
pub use plaintext::{EvalPlaintext, Plaintext};
pub use secret_key::SecretKey;
pub use simd::SimdEncoder;
