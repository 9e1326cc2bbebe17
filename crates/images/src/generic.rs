use crate::consts::GENERIC_MAXIMUM_FILE_SIZE;
pub use crate::error::Result;
use crate::ImageHandler;
use image::{DynamicImage, ImageFormat};

pub struct GenericHandler {
	pub format: ImageFormat,
}

impl ImageHandler for GenericHandler {
	fn maximum_size(&self) -> u64 {
		GENERIC_MAXIMUM_FILE_SIZE
	}

	fn handle_image(&self, data: &[u8]) -> Result<DynamicImage> {
		self.validate_size(data)?; // this makes sure the data isn't above the maximum size
		Ok(image::load_from_memory_with_format(data, self.format)?)
	}
}
