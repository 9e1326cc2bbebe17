use crate::{
	error::{Error, Result},
	scale_dimensions,
};
use image::{codecs::jpeg::JpegEncoder, imageops, ColorType, DynamicImage, GenericImageView};
use std::ops::Deref;
use webp::Encoder;

/// Re-encodes the image as a JPEG with the given quality, in the range `1..=100`.
///
/// The alpha channel is dropped, as JPEG can't carry it.
pub fn to_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
	if !(1..=100).contains(&quality) {
		return Err(Error::InvalidQuality(quality));
	}

	let rgb = img.to_rgb8();
	let mut out = Vec::new();
	JpegEncoder::new_with_quality(&mut out, quality).encode(
		rgb.as_raw(),
		rgb.width(),
		rgb.height(),
		ColorType::Rgb8,
	)?;

	Ok(out)
}

/// Downscales the image to at most `target_px` pixels, keeping its aspect ratio, and encodes it
/// as WebP. Images already under the pixel budget are only re-encoded.
#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
pub fn to_webp_thumbnail(img: &DynamicImage, target_px: f32, quality: f32) -> Result<Vec<u8>> {
	let (w, h) = img.dimensions();

	let thumbnail = if (w as f32) * (h as f32) > target_px {
		let (w_scaled, h_scaled) = scale_dimensions(w as f32, h as f32, target_px);
		DynamicImage::ImageRgba8(imageops::resize(
			img,
			w_scaled.max(1),
			h_scaled.max(1),
			imageops::FilterType::Triangle,
		))
	} else {
		DynamicImage::ImageRgba8(img.to_rgba8())
	};

	let encoder =
		Encoder::from_image(&thumbnail).map_err(|reason| Error::WebPEncoding(reason.to_string()))?;

	// Type `WebPMemory` is !Send, so we hand out an owned `Vec<u8>` instead
	Ok(encoder.encode(quality).deref().to_owned())
}
