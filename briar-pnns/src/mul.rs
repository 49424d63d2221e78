//! The encrypted matrix-multiplication engine: baby-step/giant-step
//! plaintext-matrix x ciphertext-vector products, dense-row extraction, and
//! post-multiplication packing.

use std::sync::Arc;

use briar_he::bfv::{
	BfvContext, Ciphertext, EvalPlaintext, EvaluationKey, EvaluationKeyConfig, Plaintext,
};
use briar_he::{Coeff, GaloisElement};
use briar_math::next_power_of_two;

use crate::error::{PnnsError, Result};
use crate::matrix::{
	dense_column_blocks, dense_row_geometry, BabyStepGiantStep, CiphertextMatrix,
	MatrixDimensions, MatrixPacking, PlaintextMatrix, SimdGeometry,
};

/// A diagonal-packed database lifted to the evaluation basis, ready for
/// repeated BSGS products.
pub struct DiagonalMatrix {
	context: Arc<BfvContext>,
	dimensions: MatrixDimensions,
	bsgs: BabyStepGiantStep,
	result_count: usize,
	/// `result_count * (baby * giant)` slots; all-zero diagonals are
	/// `None` and skipped by the inner products.
	diagonals: Vec<Option<EvalPlaintext>>,
}

impl DiagonalMatrix {
	/// Lifts a diagonal-packed plaintext matrix.
	pub fn new(matrix: &PlaintextMatrix) -> Result<Self> {
		let MatrixPacking::Diagonal(bsgs) = matrix.packing() else {
			return Err(PnnsError::WrongMatrixPacking);
		};
		let context = Arc::clone(matrix.context());
		let geometry = SimdGeometry::of(&context);
		let result_count = matrix.dimensions().row_count.div_ceil(geometry.column_count);
		let expected = result_count * bsgs.baby_step * bsgs.giant_step;
		if matrix.plaintexts().len() != expected {
			return Err(PnnsError::WrongPlaintextCount {
				actual: matrix.plaintexts().len(),
				expected,
			});
		}
		let diagonals = matrix
			.plaintexts()
			.iter()
			.map(|plaintext| {
				if plaintext.is_zero() {
					Ok(None)
				} else {
					plaintext.to_eval(context.poly_context()).map(Some)
				}
			})
			.collect::<briar_he::Result<Vec<_>>>()?;
		Ok(Self {
			dimensions: matrix.dimensions(),
			bsgs,
			result_count,
			diagonals,
			context,
		})
	}

	/// The database dimensions.
	pub fn dimensions(&self) -> MatrixDimensions {
		self.dimensions
	}

	/// The BSGS split in use.
	pub fn bsgs(&self) -> BabyStepGiantStep {
		self.bsgs
	}

	/// The owning context.
	pub fn context(&self) -> &Arc<BfvContext> {
		&self.context
	}
}

/// The Galois keys the multiplication pipeline needs: the BSGS rotations,
/// row swapping, the extract-dense-row spread, and the post-packing shift
/// ladder.
pub fn evaluation_key_config(
	context: &Arc<BfvContext>,
	database_dimensions: MatrixDimensions,
	bsgs: &BabyStepGiantStep,
) -> Result<EvaluationKeyConfig> {
	let degree = context.degree();
	let geometry = SimdGeometry::of(context);
	let simd_columns = geometry.column_count;
	let mut elements = vec![GaloisElement::swapping_rows(degree)];
	elements.push(GaloisElement::rotating_columns(-1, degree)?);
	if bsgs.baby_step > 1 && bsgs.baby_step < simd_columns {
		elements.push(GaloisElement::rotating_columns(-(bsgs.baby_step as i64), degree)?);
	}
	// Extract-dense-row spreads a masked tile across its SIMD row.
	let padded_columns =
		next_power_of_two(database_dimensions.column_count as u64) as usize;
	if padded_columns != simd_columns {
		elements.push(GaloisElement::rotating_columns(padded_columns as i64, degree)?);
	}
	// Post-packing shifts result columns by multiples of the block height,
	// composed from +1, +16, and +256 rotations.
	let blocks = dense_column_blocks(
		&geometry,
		MatrixDimensions::new(database_dimensions.row_count, 1)?,
	);
	if blocks.iter().any(|block| block.columns_per_simd_row > 1) {
		elements.push(GaloisElement::rotating_columns(1, degree)?);
		if simd_columns > 16 {
			elements.push(GaloisElement::rotating_columns(16, degree)?);
		}
		if simd_columns > 256 {
			elements.push(GaloisElement::rotating_columns(256, degree)?);
		}
	}
	Ok(EvaluationKeyConfig::new(elements, false))
}

fn rotate_columns(
	ciphertext: &Ciphertext<Coeff>,
	step: i64,
	evaluation_key: &EvaluationKey,
) -> Result<Ciphertext<Coeff>> {
	let degree = ciphertext.context().degree();
	let element = GaloisElement::rotating_columns(step, degree)?;
	Ok(ciphertext.apply_galois(element, evaluation_key)?)
}

/// Shifts slots toward higher column indices by `steps`, composing the
/// +256/+16/+1 rotation ladder.
fn rotate_columns_by_steps(
	ciphertext: Ciphertext<Coeff>,
	steps: usize,
	evaluation_key: &EvaluationKey,
) -> Result<Ciphertext<Coeff>> {
	let mut remaining = steps;
	let mut result = ciphertext;
	for unit in [256usize, 16, 1] {
		while remaining >= unit {
			result = rotate_columns(&result, unit as i64, evaluation_key)?;
			remaining -= unit;
		}
	}
	Ok(result)
}

fn simd_mask(
	context: &Arc<BfvContext>,
	slots: impl Iterator<Item = usize>,
) -> Result<EvalPlaintext> {
	let degree = context.degree();
	let mut values = vec![0u64; degree];
	for slot in slots {
		debug_assert!(slot < degree);
		values[slot] = 1;
	}
	let plaintext = Plaintext::encode_simd(context, &values)?;
	Ok(plaintext.to_eval(context.poly_context())?)
}

/// Broadcasts data row `row` of a dense-row ciphertext matrix across both
/// SIMD rows of a single ciphertext: mask the row's tile, spread it across
/// its SIMD row by rotate-and-add, then duplicate via a row swap.
pub fn extract_dense_row(
	matrix: &CiphertextMatrix<Coeff>,
	row: usize,
	evaluation_key: &EvaluationKey,
) -> Result<Ciphertext<Coeff>> {
	if matrix.packing() != MatrixPacking::DenseRow {
		return Err(PnnsError::WrongMatrixPacking);
	}
	let context = matrix.context();
	let geometry = SimdGeometry::of(context);
	let (padded_columns, rows_per_simd_row) =
		dense_row_geometry(&geometry, matrix.dimensions())?;
	let rows_per_plaintext = geometry.row_count * rows_per_simd_row;

	let ciphertext = matrix
		.ciphertexts()
		.get(row / rows_per_plaintext)
		.ok_or(PnnsError::WrongCiphertextCount {
			actual: matrix.ciphertexts().len(),
			expected: row / rows_per_plaintext + 1,
		})?;
	let tile = row % rows_per_plaintext;
	let simd_row = tile / rows_per_simd_row;
	let tile_offset = (tile % rows_per_simd_row) * padded_columns;
	let mask = simd_mask(
		context,
		(0..padded_columns).map(|slot| simd_row * geometry.column_count + tile_offset + slot),
	)?;
	let masked = ciphertext
		.clone()
		.to_eval()?
		.multiply_plain(&mask)?
		.to_coeff()?;

	// Spread the tile across the whole SIMD row.
	let copies = geometry.column_count / padded_columns;
	let mut accumulator = masked.clone();
	let mut rotated = masked;
	for _ in 1..copies {
		rotated = rotate_columns(&rotated, padded_columns as i64, evaluation_key)?;
		accumulator.add_assign(&rotated);
	}

	// Duplicate into the other SIMD row.
	let swap = GaloisElement::swapping_rows(context.degree());
	let swapped = accumulator.apply_galois(swap, evaluation_key)?;
	accumulator.add_assign(&swapped);
	Ok(accumulator)
}

/// The BSGS plaintext-matrix x ciphertext-vector product.
///
/// `vector` must hold the input vector tiled with the database's padded
/// column period across both SIMD rows (what [`extract_dense_row`]
/// produces). Returns one ciphertext per block of `N/2` database rows; the
/// scores sit in the leading slots of both SIMD rows.
pub fn bsgs_multiply(
	database: &DiagonalMatrix,
	vector: &Ciphertext<Coeff>,
	evaluation_key: &EvaluationKey,
) -> Result<Vec<Ciphertext<Coeff>>> {
	let bsgs = database.bsgs;
	let baby_rotation = GaloisElement::rotating_columns(-1, database.context.degree())?;

	let mut baby_eval = Vec::with_capacity(bsgs.baby_step);
	baby_eval.push(vector.clone().to_eval()?);
	let mut current = vector.clone();
	for _ in 1..bsgs.baby_step {
		current = current.apply_galois(baby_rotation, evaluation_key)?;
		baby_eval.push(current.clone().to_eval()?);
	}

	let mut outputs = Vec::with_capacity(database.result_count);
	for block in 0..database.result_count {
		let mut accumulator: Option<Ciphertext<Coeff>> = None;
		for giant_index in (0..bsgs.giant_step).rev() {
			let window = (0..bsgs.baby_step).map(|baby_index| {
				let diagonal = baby_index + bsgs.baby_step * giant_index;
				database.diagonals[database.result_count * diagonal + block].as_ref()
			});
			let inner =
				Ciphertext::inner_product_plain(&baby_eval, window)?.to_coeff()?;
			accumulator = Some(match accumulator {
				None => inner,
				Some(previous) => {
					let mut rotated = rotate_columns(
						&previous,
						-(bsgs.baby_step as i64),
						evaluation_key,
					)?;
					rotated.add_assign(&inner);
					rotated
				},
			});
		}
		outputs.push(accumulator.expect("giant step is positive"));
	}
	Ok(outputs)
}

/// The full plaintext-matrix x ciphertext-matrix transpose product:
/// `database * query^T`, one extracted-row BSGS product per query row,
/// post-packed into a dense-column ciphertext matrix of scores.
pub fn mul_transpose(
	database: &DiagonalMatrix,
	query: &CiphertextMatrix<Coeff>,
	evaluation_key: &EvaluationKey,
) -> Result<CiphertextMatrix<Coeff>> {
	if query.packing() != MatrixPacking::DenseRow {
		return Err(PnnsError::WrongMatrixPacking);
	}
	if !std::sync::Arc::ptr_eq(query.context(), &database.context) {
		return Err(PnnsError::WrongContext);
	}
	if query.dimensions().column_count != database.dimensions.column_count {
		return Err(PnnsError::ValidationError {
			reason: format!(
				"query vectors of dimension {} against a database of dimension {}",
				query.dimensions().column_count,
				database.dimensions.column_count
			),
		});
	}
	let context = &database.context;
	let geometry = SimdGeometry::of(context);
	let query_count = query.dimensions().row_count;
	let output_dimensions =
		MatrixDimensions::new(database.dimensions.row_count, query_count)?;
	let blocks = dense_column_blocks(&geometry, output_dimensions);
	let swap = GaloisElement::swapping_rows(context.degree());

	let mut outputs: Vec<Option<Ciphertext<Coeff>>> =
		vec![None; blocks.iter().map(|block| block.plaintext_count).sum()];
	for query_row in 0..query_count {
		let extracted = extract_dense_row(query, query_row, evaluation_key)?;
		let scores = bsgs_multiply(database, &extracted, evaluation_key)?;
		for (block, score) in blocks.iter().zip(scores) {
			// One copy of the score column, masked out of SIMD row 0.
			let mask = simd_mask(context, 0..block.height)?;
			let mut placed = score.to_eval()?.multiply_plain(&mask)?.to_coeff()?;
			let tile = query_row % block.columns_per_plaintext;
			let offset = (tile % block.columns_per_simd_row) * block.height;
			if offset > 0 {
				placed = rotate_columns_by_steps(placed, offset, evaluation_key)?;
			}
			if tile / block.columns_per_simd_row == 1 {
				placed = placed.apply_galois(swap, evaluation_key)?;
			}
			let slot =
				&mut outputs[block.offset + query_row / block.columns_per_plaintext];
			match slot {
				None => *slot = Some(placed),
				Some(accumulator) => accumulator.add_assign(&placed),
			}
		}
	}

	Ok(CiphertextMatrix {
		context: Arc::clone(context),
		dimensions: output_dimensions,
		packing: MatrixPacking::DenseColumn,
		ciphertexts: outputs
			.into_iter()
			.map(|ciphertext| ciphertext.expect("every output slot receives a column"))
			.collect(),
	})
}
