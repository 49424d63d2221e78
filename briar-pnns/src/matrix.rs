//! Matrix dimensions, SIMD packings, and the plaintext/ciphertext matrix
//! types.

use std::sync::Arc;

use briar_he::bfv::{BfvContext, Ciphertext, Plaintext, SecretKey};
use briar_he::{Coeff, PolyFormat};
use briar_math::{next_power_of_two, previous_multiple, read_varint, write_varint, Array2d};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::{PnnsError, Result};

/// Row and column counts of a data matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixDimensions {
	/// Number of rows.
	pub row_count: usize,
	/// Number of columns.
	pub column_count: usize,
}

impl MatrixDimensions {
	/// Validated dimensions; both counts must be positive.
	pub fn new(row_count: usize, column_count: usize) -> Result<Self> {
		if row_count == 0 || column_count == 0 {
			return Err(PnnsError::InvalidMatrixDimensions {
				row_count,
				column_count,
			});
		}
		Ok(Self {
			row_count,
			column_count,
		})
	}

	/// Total element count.
	pub fn count(&self) -> usize {
		self.row_count * self.column_count
	}
}

/// Baby-step/giant-step split of a vector dimension: `baby_step *
/// giant_step` covers the padded dimension, with `baby_step >= giant_step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BabyStepGiantStep {
	/// The vector dimension being covered.
	pub vector_dimension: usize,
	/// Rotations materialized up front.
	pub baby_step: usize,
	/// Sequential accumulator rotations.
	pub giant_step: usize,
}

impl BabyStepGiantStep {
	/// Splits `vector_dimension` near its square root.
	pub fn new(vector_dimension: usize) -> Result<Self> {
		let padded = next_power_of_two(vector_dimension as u64) as usize;
		let baby_step = (padded as f64).sqrt().ceil() as usize;
		let giant_step = padded.div_ceil(baby_step);
		Self::with_steps(vector_dimension, baby_step, giant_step)
	}

	/// Explicit steps, normalized so `baby_step >= giant_step`.
	pub fn with_steps(
		vector_dimension: usize,
		baby_step: usize,
		giant_step: usize,
	) -> Result<Self> {
		let (baby_step, giant_step) = if baby_step >= giant_step {
			(baby_step, giant_step)
		} else {
			(giant_step, baby_step)
		};
		let padded = next_power_of_two(vector_dimension as u64) as usize;
		if vector_dimension == 0 || baby_step * giant_step < padded {
			return Err(PnnsError::ValidationError {
				reason: format!(
					"baby step {baby_step} times giant step {giant_step} does not cover {padded}"
				),
			});
		}
		Ok(Self {
			vector_dimension,
			baby_step,
			giant_step,
		})
	}
}

/// How a data matrix maps onto the `2 x (N/2)` SIMD slot grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatrixPacking {
	/// Row-major, each data row zero-padded to a power of two, no row
	/// crossing a SIMD-row boundary; the last plaintext repeats its final
	/// row tile.
	DenseRow,
	/// Column-major, whole data columns inside one SIMD row.
	DenseColumn,
	/// Generalized diagonals, pre-rotated for the BSGS product.
	Diagonal(BabyStepGiantStep),
}

/// SIMD geometry shared by the packings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimdGeometry {
	/// Always two.
	pub row_count: usize,
	/// Slots per SIMD row: `N/2`.
	pub column_count: usize,
}

impl SimdGeometry {
	pub(crate) fn of(context: &BfvContext) -> Self {
		Self {
			row_count: 2,
			column_count: context.degree() / 2,
		}
	}
}

/// A data matrix packed into SIMD plaintexts.
#[derive(Debug, Clone)]
pub struct PlaintextMatrix {
	context: Arc<BfvContext>,
	dimensions: MatrixDimensions,
	packing: MatrixPacking,
	plaintexts: Vec<Plaintext>,
}

impl PlaintextMatrix {
	/// Packs `values` (shape `dimensions`, entries modulo `t`) under the
	/// given packing.
	pub fn new(
		context: &Arc<BfvContext>,
		dimensions: MatrixDimensions,
		packing: MatrixPacking,
		values: &Array2d<u64>,
	) -> Result<Self> {
		if values.row_count() != dimensions.row_count
			|| values.column_count() != dimensions.column_count
		{
			return Err(PnnsError::WrongEncodingValuesCount {
				actual: values.count(),
				expected: dimensions.count(),
			});
		}
		let geometry = SimdGeometry::of(context);
		let slot_vectors = match packing {
			MatrixPacking::DenseRow => pack_dense_row(&geometry, values)?,
			MatrixPacking::DenseColumn => pack_dense_column(&geometry, values)?,
			MatrixPacking::Diagonal(bsgs) => pack_diagonal(&geometry, values, &bsgs)?,
		};
		let plaintexts = slot_vectors
			.into_iter()
			.map(|slots| Plaintext::encode_simd(context, &slots))
			.collect::<briar_he::Result<Vec<_>>>()?;
		if plaintexts.is_empty() {
			return Err(PnnsError::EmptyPlaintextArray);
		}
		Ok(Self {
			context: Arc::clone(context),
			dimensions,
			packing,
			plaintexts,
		})
	}

	/// The owning context.
	pub fn context(&self) -> &Arc<BfvContext> {
		&self.context
	}

	/// The data dimensions.
	pub fn dimensions(&self) -> MatrixDimensions {
		self.dimensions
	}

	/// The packing.
	pub fn packing(&self) -> MatrixPacking {
		self.packing
	}

	/// The packed plaintexts.
	pub fn plaintexts(&self) -> &[Plaintext] {
		&self.plaintexts
	}

	/// Decodes a dense-row or dense-column matrix back to its values.
	pub fn decode(&self) -> Result<Array2d<u64>> {
		let geometry = SimdGeometry::of(&self.context);
		let slot_vectors = self
			.plaintexts
			.iter()
			.map(Plaintext::decode_simd)
			.collect::<briar_he::Result<Vec<_>>>()?;
		match self.packing {
			MatrixPacking::DenseRow => unpack_dense_row(&geometry, self.dimensions, &slot_vectors),
			MatrixPacking::DenseColumn => {
				unpack_dense_column(&geometry, self.dimensions, &slot_vectors)
			},
			MatrixPacking::Diagonal(_) => Err(PnnsError::WrongMatrixPacking),
		}
	}

	/// Encrypts into a ciphertext matrix.
	pub fn encrypt<R: RngCore + CryptoRng>(
		&self,
		secret_key: &SecretKey,
		rng: &mut R,
	) -> Result<CiphertextMatrix<Coeff>> {
		let ciphertexts = self
			.plaintexts
			.iter()
			.map(|plaintext| secret_key.encrypt(plaintext, rng))
			.collect::<briar_he::Result<Vec<_>>>()?;
		Ok(CiphertextMatrix {
			context: Arc::clone(&self.context),
			dimensions: self.dimensions,
			packing: self.packing,
			ciphertexts,
		})
	}
}

/// An encrypted packed matrix.
#[derive(Debug, Clone)]
pub struct CiphertextMatrix<F: PolyFormat> {
	pub(crate) context: Arc<BfvContext>,
	pub(crate) dimensions: MatrixDimensions,
	pub(crate) packing: MatrixPacking,
	pub(crate) ciphertexts: Vec<Ciphertext<F>>,
}

impl<F: PolyFormat> CiphertextMatrix<F> {
	/// The owning context.
	pub fn context(&self) -> &Arc<BfvContext> {
		&self.context
	}

	/// The data dimensions.
	pub fn dimensions(&self) -> MatrixDimensions {
		self.dimensions
	}

	/// The packing.
	pub fn packing(&self) -> MatrixPacking {
		self.packing
	}

	/// The component ciphertexts.
	pub fn ciphertexts(&self) -> &[Ciphertext<F>] {
		&self.ciphertexts
	}
}

impl CiphertextMatrix<Coeff> {
	/// Serializes as row count, column count, packing, and the ciphertext
	/// list, all varint-framed.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut bytes = Vec::new();
		write_varint(&mut bytes, self.dimensions.row_count as u64);
		write_varint(&mut bytes, self.dimensions.column_count as u64);
		match self.packing {
			MatrixPacking::DenseRow => bytes.push(0),
			MatrixPacking::DenseColumn => bytes.push(1),
			MatrixPacking::Diagonal(bsgs) => {
				bytes.push(2);
				write_varint(&mut bytes, bsgs.vector_dimension as u64);
				write_varint(&mut bytes, bsgs.baby_step as u64);
				write_varint(&mut bytes, bsgs.giant_step as u64);
			},
		}
		write_varint(&mut bytes, self.ciphertexts.len() as u64);
		for ciphertext in &self.ciphertexts {
			let serialized = ciphertext.to_bytes();
			write_varint(&mut bytes, serialized.len() as u64);
			bytes.extend(serialized);
		}
		bytes
	}

	/// Deserializes a matrix under `context`.
	pub fn from_bytes(context: &Arc<BfvContext>, bytes: &[u8]) -> Result<Self> {
		let mut offset = 0usize;
		let mut next = |offset: &mut usize| -> Result<u64> {
			let (value, consumed) = read_varint(&bytes[*offset..])?;
			*offset += consumed;
			Ok(value)
		};
		let row_count = next(&mut offset)? as usize;
		let column_count = next(&mut offset)? as usize;
		let dimensions = MatrixDimensions::new(row_count, column_count)?;
		let tag = *bytes.get(offset).ok_or(PnnsError::ValidationError {
			reason: "matrix ends before its packing tag".to_string(),
		})?;
		offset += 1;
		let packing = match tag {
			0 => MatrixPacking::DenseRow,
			1 => MatrixPacking::DenseColumn,
			2 => {
				let vector_dimension = next(&mut offset)? as usize;
				let baby_step = next(&mut offset)? as usize;
				let giant_step = next(&mut offset)? as usize;
				MatrixPacking::Diagonal(BabyStepGiantStep::with_steps(
					vector_dimension,
					baby_step,
					giant_step,
				)?)
			},
			other => {
				return Err(PnnsError::ValidationError {
					reason: format!("unknown matrix packing tag {other}"),
				})
			},
		};
		let count = next(&mut offset)? as usize;
		let mut ciphertexts = Vec::with_capacity(count);
		for _ in 0..count {
			let length = next(&mut offset)? as usize;
			let end = offset.checked_add(length).filter(|&end| end <= bytes.len()).ok_or(
				PnnsError::ValidationError {
					reason: "ciphertext extends past the end of the buffer".to_string(),
				},
			)?;
			ciphertexts.push(Ciphertext::from_bytes(context, &bytes[offset..end])?);
			offset = end;
		}
		if ciphertexts.is_empty() {
			return Err(PnnsError::EmptyCiphertextArray);
		}
		Ok(Self {
			context: Arc::clone(context),
			dimensions,
			packing,
			ciphertexts,
		})
	}

	/// Decrypts back to a plaintext matrix.
	pub fn decrypt(&self, secret_key: &SecretKey) -> Result<PlaintextMatrix> {
		let plaintexts = self
			.ciphertexts
			.iter()
			.map(|ciphertext| secret_key.decrypt(ciphertext))
			.collect::<briar_he::Result<Vec<_>>>()?;
		Ok(PlaintextMatrix {
			context: Arc::clone(&self.context),
			dimensions: self.dimensions,
			packing: self.packing,
			plaintexts,
		})
	}

	/// Switches every ciphertext down to a single modulus.
	pub fn mod_switch_to_single(&mut self) -> Result<()> {
		for ciphertext in &mut self.ciphertexts {
			ciphertext.mod_switch_to_single()?;
		}
		Ok(())
	}
}

/// Rows per SIMD row under dense-row packing.
pub(crate) fn dense_row_geometry(
	geometry: &SimdGeometry,
	dimensions: MatrixDimensions,
) -> Result<(usize, usize)> {
	let padded_columns = next_power_of_two(dimensions.column_count as u64) as usize;
	if padded_columns > geometry.column_count {
		return Err(PnnsError::SimdEncodingNotSupported {
			reason: format!(
				"{padded_columns} padded columns exceed the {} slots of a SIMD row",
				geometry.column_count
			),
		});
	}
	Ok((padded_columns, geometry.column_count / padded_columns))
}

fn pack_dense_row(
	geometry: &SimdGeometry,
	values: &Array2d<u64>,
) -> Result<Vec<Vec<u64>>> {
	let dimensions = MatrixDimensions::new(values.row_count(), values.column_count())?;
	let (padded_columns, rows_per_simd_row) = dense_row_geometry(geometry, dimensions)?;
	let rows_per_plaintext = geometry.row_count * rows_per_simd_row;
	let plaintext_count = dimensions.row_count.div_ceil(rows_per_plaintext);
	let slot_count = geometry.row_count * geometry.column_count;

	let mut slot_vectors = Vec::with_capacity(plaintext_count);
	for plaintext_index in 0..plaintext_count {
		let mut slots = vec![0u64; slot_count];
		for tile in 0..rows_per_plaintext {
			// The last plaintext repeats the final row's tile to fill out.
			let row = (plaintext_index * rows_per_plaintext + tile)
				.min(dimensions.row_count - 1);
			let offset = (tile / rows_per_simd_row) * geometry.column_count
				+ (tile % rows_per_simd_row) * padded_columns;
			for column in 0..dimensions.column_count {
				slots[offset + column] = *values.get(row, column);
			}
		}
		slot_vectors.push(slots);
	}
	Ok(slot_vectors)
}

fn unpack_dense_row(
	geometry: &SimdGeometry,
	dimensions: MatrixDimensions,
	slot_vectors: &[Vec<u64>],
) -> Result<Array2d<u64>> {
	let (padded_columns, rows_per_simd_row) = dense_row_geometry(geometry, dimensions)?;
	let rows_per_plaintext = geometry.row_count * rows_per_simd_row;
	let mut data = Vec::with_capacity(dimensions.count());
	for row in 0..dimensions.row_count {
		let slots = &slot_vectors[row / rows_per_plaintext];
		let tile = row % rows_per_plaintext;
		let offset = (tile / rows_per_simd_row) * geometry.column_count
			+ (tile % rows_per_simd_row) * padded_columns;
		for column in 0..dimensions.column_count {
			data.push(slots[offset + column]);
		}
	}
	Ok(Array2d::new(data, dimensions.row_count, dimensions.column_count)?)
}

/// Dense-column layout: columns are split into blocks of at most
/// `simd_column_count` rows; block `b` packs its column segments
/// `columns_per_simd_row = C / block_height` to a SIMD row, two SIMD rows
/// per plaintext, and the plaintext list is block-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DenseColumnBlock {
	/// Rows covered by this block.
	pub height: usize,
	/// Column segments per SIMD row.
	pub columns_per_simd_row: usize,
	/// Column segments per plaintext.
	pub columns_per_plaintext: usize,
	/// Plaintexts (or ciphertexts) in this block.
	pub plaintext_count: usize,
	/// Index of the block's first plaintext in the flat list.
	pub offset: usize,
}

pub(crate) fn dense_column_blocks(
	geometry: &SimdGeometry,
	dimensions: MatrixDimensions,
) -> Vec<DenseColumnBlock> {
	let block_count = dimensions.row_count.div_ceil(geometry.column_count);
	let mut blocks = Vec::with_capacity(block_count);
	let mut offset = 0;
	for block in 0..block_count {
		let height =
			(dimensions.row_count - block * geometry.column_count).min(geometry.column_count);
		let columns_per_simd_row = geometry.column_count / height;
		let columns_per_plaintext = geometry.row_count * columns_per_simd_row;
		let plaintext_count = dimensions.column_count.div_ceil(columns_per_plaintext);
		blocks.push(DenseColumnBlock {
			height,
			columns_per_simd_row,
			columns_per_plaintext,
			plaintext_count,
			offset,
		});
		offset += plaintext_count;
	}
	blocks
}

fn pack_dense_column(
	geometry: &SimdGeometry,
	values: &Array2d<u64>,
) -> Result<Vec<Vec<u64>>> {
	let dimensions = MatrixDimensions::new(values.row_count(), values.column_count())?;
	let blocks = dense_column_blocks(geometry, dimensions);
	let slot_count = geometry.row_count * geometry.column_count;
	let total: usize = blocks.iter().map(|block| block.plaintext_count).sum();

	let mut slot_vectors = vec![vec![0u64; slot_count]; total];
	for (block_index, block) in blocks.iter().enumerate() {
		for column in 0..dimensions.column_count {
			let slots = &mut slot_vectors[block.offset + column / block.columns_per_plaintext];
			let tile = column % block.columns_per_plaintext;
			let offset = (tile / block.columns_per_simd_row) * geometry.column_count
				+ (tile % block.columns_per_simd_row) * block.height;
			for row in 0..block.height {
				slots[offset + row] =
					*values.get(block_index * geometry.column_count + row, column);
			}
		}
	}
	Ok(slot_vectors)
}

fn unpack_dense_column(
	geometry: &SimdGeometry,
	dimensions: MatrixDimensions,
	slot_vectors: &[Vec<u64>],
) -> Result<Array2d<u64>> {
	let blocks = dense_column_blocks(geometry, dimensions);
	let mut data = Array2d::zero(dimensions.row_count, dimensions.column_count);
	for (block_index, block) in blocks.iter().enumerate() {
		for column in 0..dimensions.column_count {
			let slots = &slot_vectors[block.offset + column / block.columns_per_plaintext];
			let tile = column % block.columns_per_plaintext;
			let offset = (tile / block.columns_per_simd_row) * geometry.column_count
				+ (tile % block.columns_per_simd_row) * block.height;
			for row in 0..block.height {
				*data.get_mut(block_index * geometry.column_count + row, column) =
					slots[offset + row];
			}
		}
	}
	Ok(data)
}

fn pack_diagonal(
	geometry: &SimdGeometry,
	values: &Array2d<u64>,
	bsgs: &BabyStepGiantStep,
) -> Result<Vec<Vec<u64>>> {
	let dimensions = MatrixDimensions::new(values.row_count(), values.column_count())?;
	if bsgs.vector_dimension != dimensions.column_count {
		return Err(PnnsError::ValidationError {
			reason: format!(
				"BSGS dimension {} does not match {} matrix columns",
				bsgs.vector_dimension, dimensions.column_count
			),
		});
	}
	let padded_columns = next_power_of_two(dimensions.column_count as u64) as usize;
	if padded_columns > geometry.column_count {
		return Err(PnnsError::SimdEncodingNotSupported {
			reason: format!(
				"{padded_columns} padded columns exceed the {} slots of a SIMD row",
				geometry.column_count
			),
		});
	}
	let simd_columns = geometry.column_count;
	let result_count = dimensions.row_count.div_ceil(simd_columns);
	let diagonal_count = bsgs.baby_step * bsgs.giant_step;
	let slot_count = geometry.row_count * simd_columns;

	// plaintexts[result_count * j + r] holds diagonal j of result block r,
	// pre-rotated right by the giant-step multiple the evaluator will undo.
	let mut slot_vectors = vec![vec![0u64; slot_count]; result_count * diagonal_count];
	for diagonal in 0..diagonal_count {
		let rotation = previous_multiple(diagonal, bsgs.baby_step);
		for block in 0..result_count {
			let slots = &mut slot_vectors[result_count * diagonal + block];
			if diagonal >= padded_columns {
				continue;
			}
			for slot in 0..simd_columns {
				// The evaluator rotates block results left by the
				// giant-step multiple, so the diagonal is stored rotated
				// right by the same amount: slot u holds logical position
				// (u - rotation) mod C.
				let logical =
					(slot + simd_columns - rotation % simd_columns) % simd_columns;
				let row = block * simd_columns + logical;
				if row >= dimensions.row_count {
					continue;
				}
				let column = (logical + diagonal) % padded_columns;
				if column >= dimensions.column_count {
					continue;
				}
				let value = *values.get(row, column);
				slots[slot] = value;
				slots[simd_columns + slot] = value;
			}
		}
	}
	Ok(slot_vectors)
}
