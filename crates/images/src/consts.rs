use image::ImageFormat;

/// Encoded formats that the `image` crate can decode for us without extra system libraries.
pub const GENERIC_FORMATS: [ImageFormat; 7] = [
	ImageFormat::Jpeg,
	ImageFormat::Png,
	ImageFormat::Gif,
	ImageFormat::WebP,
	ImageFormat::Bmp,
	ImageFormat::Tiff,
	ImageFormat::Ico,
];

/// The maximum size that an encoded image can be in order to be decoded in memory.
///
/// This value is in MiB.
pub(crate) const GENERIC_MAXIMUM_FILE_SIZE: u64 = MIB * 48;

/// Quality used for previews when nobody asked for a specific one, it is a float between 0-100
/// and is treated as a percentage (so 30% in this case, or it's the same as multiplying by `0.3`).
pub const DEFAULT_WEBP_QUALITY: f32 = 30.0;

/// The size of 1MiB in bytes
const MIB: u64 = 1_048_576;
