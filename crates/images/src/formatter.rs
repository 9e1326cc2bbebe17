use crate::{
	consts,
	error::{Error, Result},
	generic::GenericHandler,
	ImageHandler,
};
use image::{DynamicImage, ImageFormat};

/// Decodes an encoded image held in memory, sniffing its format from the magic bytes.
pub fn format_image(data: &[u8]) -> Result<DynamicImage> {
	if data.is_empty() {
		return Err(Error::Empty);
	}

	let format = image::guess_format(data).map_err(|_| Error::Unsupported)?;
	match_to_handler(format)?.handle_image(data)
}

fn match_to_handler(format: ImageFormat) -> Result<Box<dyn ImageHandler>> {
	if consts::GENERIC_FORMATS.contains(&format) {
		Ok(Box::new(GenericHandler { format }))
	} else {
		Err(Error::Unsupported)
	}
}
