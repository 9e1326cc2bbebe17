use std::num::TryFromIntError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("error while loading the image (via the `image` crate): {0}")]
	Image(#[from] image::ImageError),
	#[error("the image provided is unsupported")]
	Unsupported,
	#[error("the image provided is too large (over {0} bytes)")]
	TooLarge(u64),
	#[error("the image provided is empty")]
	Empty,
	#[error("received an invalid quality, expected range [1, 100], received: {0}")]
	InvalidQuality(u8),
	#[error("failed to encode webp: {0}")]
	WebPEncoding(String),
	#[error("error while parsing integers")]
	TryFromInt(#[from] TryFromIntError),
}
