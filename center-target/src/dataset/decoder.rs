use super::ImageDecoder;
use crate::common::*;

/// Decodes JPEG and PNG files with the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn decode(&self, path: &Path) -> Result<Array3<u8>> {
        let image = ::image::open(path)?.into_rgb8();
        let (width, height) = image.dimensions();
        let rgb = Array3::from_shape_vec((height as usize, width as usize, 3), image.into_raw())?;
        Ok(rgb.slice(s![.., .., ..;-1]).as_standard_layout().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::image::{Rgb, RgbImage};

    #[test]
    fn decoded_channels_are_bgr() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pixel.png");
        let mut image = RgbImage::new(3, 2);
        image.put_pixel(2, 1, Rgb([10, 20, 30]));
        image.save(&path)?;

        let array = ImageCrateDecoder.decode(&path)?;
        assert_eq!(array.dim(), (2, 3, 3));
        assert_eq!(array.slice(s![1, 2, ..]).to_vec(), vec![30, 20, 10]);
        assert_eq!(array.slice(s![0, 0, ..]).to_vec(), vec![0, 0, 0]);
        Ok(())
    }
}
