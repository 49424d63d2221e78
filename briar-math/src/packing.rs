//! MSB-first bit-packing of coefficients into byte streams.
//!
//! Each coefficient contributes its top `bits_per_coefficient - skip_lsbs`
//! bits to the stream, most significant bit first. Decoding zero-fills the
//! skipped low bits, so a round trip recovers `coefficient & !((1<<k)-1)`.

/// Number of bytes produced by packing `coefficient_count` coefficients at
/// the given width.
pub fn serialized_byte_count(
	coefficient_count: usize,
	bits_per_coefficient: u32,
	skip_lsbs: u32,
) -> usize {
	debug_assert!(skip_lsbs < bits_per_coefficient && bits_per_coefficient <= 64);
	let bits = coefficient_count * (bits_per_coefficient - skip_lsbs) as usize;
	bits.div_ceil(8)
}

/// Packs `coefficients` into bytes at `bits_per_coefficient` bits each,
/// dropping the `skip_lsbs` low bits of every coefficient.
pub fn coefficients_to_bytes(
	coefficients: &[u64],
	bits_per_coefficient: u32,
	skip_lsbs: u32,
) -> Vec<u8> {
	debug_assert!(skip_lsbs < bits_per_coefficient && bits_per_coefficient <= 64);
	let kept_bits = bits_per_coefficient - skip_lsbs;
	let mut bytes =
		Vec::with_capacity(serialized_byte_count(coefficients.len(), bits_per_coefficient, skip_lsbs));
	let mut buffer: u64 = 0;
	let mut buffered_bits: u32 = 0;
	for &coefficient in coefficients {
		debug_assert!(kept_bits == 64 || coefficient >> skip_lsbs < 1 << kept_bits);
		let value = coefficient >> skip_lsbs;
		let mut remaining = kept_bits;
		while remaining > 0 {
			let take = remaining.min(8 - buffered_bits);
			let shifted = (value >> (remaining - take)) & ((1u64 << take) - 1);
			buffer = (buffer << take) | shifted;
			buffered_bits += take;
			remaining -= take;
			if buffered_bits == 8 {
				bytes.push(buffer as u8);
				buffer = 0;
				buffered_bits = 0;
			}
		}
	}
	if buffered_bits > 0 {
		bytes.push((buffer << (8 - buffered_bits)) as u8);
	}
	bytes
}

/// Unpacks `coefficient_count` coefficients from the MSB-first bit stream,
/// zero-filling the `skip_lsbs` low bits of each.
///
/// Bits beyond the end of `bytes` read as zero; strict length validation is
/// the caller's concern (the polynomial wire format checks its total before
/// decoding).
pub fn bytes_to_coefficients(
	bytes: &[u8],
	coefficient_count: usize,
	bits_per_coefficient: u32,
	skip_lsbs: u32,
) -> Vec<u64> {
	debug_assert!(skip_lsbs < bits_per_coefficient && bits_per_coefficient <= 64);
	let kept_bits = bits_per_coefficient - skip_lsbs;
	let mut coefficients = Vec::with_capacity(coefficient_count);
	let mut bit_position = 0usize;
	for _ in 0..coefficient_count {
		let mut value: u64 = 0;
		let mut remaining = kept_bits;
		while remaining > 0 {
			let byte = bytes.get(bit_position / 8).copied().unwrap_or(0);
			let offset = (bit_position % 8) as u32;
			let take = remaining.min(8 - offset);
			let chunk = (byte >> (8 - offset - take)) & ((1u16 << take) - 1) as u8;
			value = (value << take) | chunk as u64;
			bit_position += take as usize;
			remaining -= take;
		}
		coefficients.push(value << skip_lsbs);
	}
	coefficients
}
