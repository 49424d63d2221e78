//! Compile-time polynomial format markers.
//!
//! A polynomial is either in the standard coefficient basis ([`Coeff`]) or
//! in the bit-reversed NTT evaluation basis ([`Eval`]). The marker is part
//! of the polynomial's type, so operations that are only meaningful in one
//! basis (coefficientwise multiplication in `Eval`, `multiply_power_of_x`
//! in `Coeff`) simply do not exist on the other type.

mod sealed {
	pub trait Sealed {}
	impl Sealed for super::Coeff {}
	impl Sealed for super::Eval {}
}

/// Marker trait implemented by [`Coeff`] and [`Eval`].
pub trait PolyFormat: sealed::Sealed + std::fmt::Debug + Copy + Eq + 'static {
	/// Human-readable basis name, used in debug output.
	const NAME: &'static str;
}

/// Standard coefficient basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coeff {}

/// Bit-reversed NTT evaluation basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eval {}

impl PolyFormat for Coeff {
	const NAME: &'static str = "coeff";
}

impl PolyFormat for Eval {
	const NAME: &'static str = "eval";
}
