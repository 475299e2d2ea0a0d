use fast_image_resize::images::Image;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::DynamicImage;
use ndarray::{Array3, ArrayD, Axis};
use rayon::prelude::*;

use crate::config::{ModelProfile, TensorLayout};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct Processor {
    pub profile: ModelProfile,
}

impl Processor {
    /// Create a new instance of the Processor struct
    pub fn new(profile: ModelProfile) -> Self {
        Self { profile }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(Error::InvalidImage("empty upload".into()));
        }
        image::load_from_memory(bytes).map_err(|e| Error::InvalidImage(e.to_string()))
    }

    /// Exact resize to the profile size, RGB8 interleaved.
    /// Aspect ratio is not preserved; training used a plain stretch as well.
    fn resize(&self, image: &DynamicImage) -> Result<Vec<u8>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::InvalidImage("image has zero width or height".into()));
        }
        let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
        let size = self.profile.input_size;
        let mut dst_image = Image::new(size, size, PixelType::U8x3);

        let options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear));
        let mut resizer = Resizer::new();
        resizer
            .resize(&rgb, &mut dst_image, Some(&options))
            .map_err(|e| Error::InvalidImage(format!("resize failed: {}", e)))?;
        Ok(dst_image.buffer().to_vec())
    }

    /// Normalize an interleaved RGB8 buffer into one image tensor, without
    /// the batch axis.
    fn normalize(&self, rgb: &[u8]) -> Array3<f32> {
        let s = self.profile.input_size as usize;
        let norm = self.profile.normalization;
        let at = |y: usize, x: usize, c: usize| norm.apply(rgb[(y * s + x) * 3 + c], c);
        match self.profile.layout {
            TensorLayout::Nhwc => Array3::from_shape_fn((s, s, 3), |(y, x, c)| at(y, x, c)),
            TensorLayout::Nchw => Array3::from_shape_fn((3, s, s), |(c, y, x)| at(y, x, c)),
        }
    }

    /// Decoded image to model-ready tensor.
    pub fn prepare_image(&self, image: &DynamicImage) -> Result<Array3<f32>> {
        let rgb = self.resize(image)?;
        Ok(self.normalize(&rgb))
    }

    /// Raw upload to model-ready tensor.
    pub fn prepare(&self, bytes: &[u8]) -> Result<Array3<f32>> {
        let image = self.decode(bytes)?;
        self.prepare_image(&image)
    }

    /// Prepare uploads in parallel. Each slot fails on its own.
    pub fn prepare_all<B>(&self, uploads: &[B]) -> Vec<Result<Array3<f32>>>
    where
        B: AsRef<[u8]> + Sync,
    {
        uploads.par_iter().map(|b| self.prepare(b.as_ref())).collect()
    }

    /// Stack prepared tensors along a new leading batch axis.
    pub fn stack(&self, tensors: &[Array3<f32>]) -> Result<ArrayD<f32>> {
        if tensors.is_empty() {
            return Err(Error::InvalidImage("no images in batch".into()));
        }
        let views: Vec<_> = tensors.iter().map(|arr| arr.view()).collect();
        let ys = ndarray::stack(Axis(0), &views)?.into_dyn();
        Ok(ys)
    }
}
