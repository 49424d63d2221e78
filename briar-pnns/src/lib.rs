//! Private nearest-neighbor search over BFV.
//!
//! The server holds a plaintext vector database packed along generalized
//! diagonals; the client sends encrypted, unit-normalized, fixed-point
//! query vectors in a dense-row SIMD packing. A baby-step/giant-step
//! product scores every database vector against every query in
//! `O(sqrt(D))` rotations, and plaintext-CRT composition widens the score
//! range across several plaintext moduli.

#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod error;
mod matrix;
mod mul;
mod pnns;
mod scoring;

pub use error::{PnnsError, Result};
pub use matrix::{
	BabyStepGiantStep, CiphertextMatrix, MatrixDimensions, MatrixPacking, PlaintextMatrix,
	SimdGeometry,
};
pub use mul::{
	bsgs_multiply, evaluation_key_config, extract_dense_row, mul_transpose, DiagonalMatrix,
};
pub use pnns::{
	DistanceMetric, PnnsClient, PnnsConfig, PnnsParameter, PnnsQuery, PnnsResponse, PnnsServer,
	SearchResult, VectorDatabase,
};
pub use scoring::{
	decode_scores, normalize_rows, reduce_signed, scale_and_round, PlaintextCrt,
};
