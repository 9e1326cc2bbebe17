#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	clippy::expect_used,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::as_conversions,
	clippy::dbg_macro
)]
#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod consts;
mod encoder;
mod error;
mod formatter;
mod generic;

pub use consts::{DEFAULT_WEBP_QUALITY, GENERIC_FORMATS};
pub use encoder::{to_jpeg, to_webp_thumbnail};
pub use error::{Error, Result};
pub use formatter::format_image;
pub use image::DynamicImage;

pub trait ImageHandler {
	fn maximum_size(&self) -> u64
	where
		Self: Sized; // thanks vtables

	fn validate_size(&self, data: &[u8]) -> Result<()>
	where
		Self: Sized,
	{
		let max = self.maximum_size();
		if u64::try_from(data.len())? > max {
			Err(Error::TooLarge(max))
		} else {
			Ok(())
		}
	}

	fn handle_image(&self, data: &[u8]) -> Result<DynamicImage>;
}

/// Scales `w`x`h` so the result has roughly `target_px` pixels, keeping the aspect ratio.
#[allow(
	clippy::cast_possible_truncation,
	clippy::cast_sign_loss,
	clippy::as_conversions
)]
#[must_use]
pub fn scale_dimensions(w: f32, h: f32, target_px: f32) -> (u32, u32) {
	let sf = (target_px / (w * h)).sqrt();
	((w * sf).round() as u32, (h * sf).round() as u32)
}
