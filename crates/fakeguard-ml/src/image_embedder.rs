//! Image embedding with a headless ResNet-50.
//!
//! Provides [`ResnetImageEmbedder`], an [`ImageEmbedder`] that fetches a
//! product image, normalises it the way the ImageNet-pretrained network was
//! trained, and returns the 2048-dim globally pooled activation that precedes
//! the classification layer.
//!
//! Every failure (network, timeout, HTTP status, decode, inference, shape)
//! is logged and reported as `None`, so one broken listing never stops a
//! dataset build.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Func, VarBuilder};
use fakeguard_core::{
    FakeguardError, ImageEmbedder, ImageModelConfig, ImageVector, Result, IMAGE_EMBEDDING_DIM,
};
use image::imageops::FilterType;

use crate::hub::resolve_model_files;

/// Per-channel mean of the ImageNet training set (RGB).
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel standard deviation of the ImageNet training set (RGB).
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

// ---------------------------------------------------------------------------
// Image sources
// ---------------------------------------------------------------------------

/// Where the bytes of an image come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource<'a> {
    /// `http://` or `https://` URL.
    Remote(&'a str),
    /// Anything else is treated as a filesystem path.
    Local(&'a Path),
}

impl<'a> ImageSource<'a> {
    pub fn parse(location: &'a str) -> Self {
        let lower = location.trim_start().to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Remote(location)
        } else {
            Self::Local(Path::new(location))
        }
    }
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Decode `bytes` and build the network input tensor.
///
/// The image is converted to RGB, resized exactly to `size x size` (aspect
/// ratio is not preserved), scaled to `[0, 1]` and normalised with the
/// ImageNet channel statistics. Output shape is `[1, 3, size, size]`.
pub fn preprocess_image(bytes: &[u8], size: u32, device: &Device) -> Result<Tensor> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| FakeguardError::Embedding(format!("Failed to decode image: {e}")))?;
    let rgb = decoded
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb8();

    pixels_to_tensor(rgb.into_raw(), size as usize, device)
        .map_err(|e| FakeguardError::Embedding(format!("Failed to build image tensor: {e}")))
}

fn pixels_to_tensor(pixels: Vec<u8>, size: usize, device: &Device) -> candle_core::Result<Tensor> {
    // HWC u8 -> CHW f32 in [0, 1]
    let chw = Tensor::from_vec(pixels, (size, size, 3), device)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?;
    let scaled = (chw / 255.0)?;

    let mean = Tensor::new(&IMAGENET_MEAN, device)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&IMAGENET_STD, device)?.reshape((3, 1, 1))?;

    scaled
        .broadcast_sub(&mean)?
        .broadcast_div(&std)?
        .unsqueeze(0)?
        .contiguous()
}

// ---------------------------------------------------------------------------
// ResnetImageEmbedder
// ---------------------------------------------------------------------------

/// [`ImageEmbedder`] backed by ResNet-50 with the final fully-connected
/// layer removed.
pub struct ResnetImageEmbedder {
    model: Func<'static>,
    device: Device,
    client: reqwest::Client,
    image_size: u32,
}

impl ResnetImageEmbedder {
    /// Download (or locate) the ResNet-50 weights and build the network.
    ///
    /// The HTTP client is built with explicit connect and total timeouts; an
    /// expired timeout is an extraction failure like any other.
    ///
    /// # Errors
    ///
    /// Returns an error if the weights cannot be obtained or do not match
    /// the ResNet-50 architecture.
    pub async fn load(
        config: &ImageModelConfig,
        cache_dir: Option<&str>,
        device: &Device,
    ) -> Result<Self> {
        let paths =
            resolve_model_files(&config.model_id, &[config.weights_file.as_str()], cache_dir)
                .await?;

        // SAFETY: memory-mapping safetensors is the standard candle pattern.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&paths, DType::F32, device).map_err(|e| {
                FakeguardError::Embedding(format!("Failed to load ResNet weights: {e}"))
            })?
        };
        let model = candle_transformers::models::resnet::resnet50_no_final_layer(vb)
            .map_err(|e| FakeguardError::Embedding(format!("Failed to build ResNet-50: {e}")))?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.fetch_timeout_ms))
            .build()
            .map_err(|e| FakeguardError::Embedding(format!("Failed to build HTTP client: {e}")))?;

        tracing::info!(
            model_id = %config.model_id,
            weights = %config.weights_file,
            image_size = config.image_size,
            "Image embedding model loaded"
        );

        Ok(Self {
            model,
            device: device.clone(),
            client,
            image_size: config.image_size,
        })
    }

    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        match ImageSource::parse(location) {
            ImageSource::Remote(url) => {
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| FakeguardError::Embedding(format!("Image fetch failed: {e}")))?;
                let bytes = response.bytes().await.map_err(|e| {
                    FakeguardError::Embedding(format!("Image download failed: {e}"))
                })?;
                Ok(bytes.to_vec())
            }
            ImageSource::Local(path) => tokio::fs::read(path).await.map_err(|e| {
                FakeguardError::Embedding(format!(
                    "Failed to read image {}: {e}",
                    path.display()
                ))
            }),
        }
    }

    /// Run the network on already-fetched image bytes.
    pub fn embed_bytes(&self, bytes: &[u8]) -> Result<ImageVector> {
        let input = preprocess_image(bytes, self.image_size, &self.device)?;

        let output = candle_nn::Module::forward(&self.model, &input)
            .map_err(|e| FakeguardError::Embedding(format!("ResNet forward failed: {e}")))?;

        // [1, 2048] -> [2048]
        let values: Vec<f32> = output
            .flatten_all()
            .and_then(|t| t.to_dtype(DType::F32))
            .and_then(|t| t.to_vec1())
            .map_err(|e| FakeguardError::Embedding(format!("Failed to read image embedding: {e}")))?;

        if values.len() != IMAGE_EMBEDDING_DIM {
            return Err(FakeguardError::DimensionMismatch {
                expected: IMAGE_EMBEDDING_DIM,
                got: values.len(),
            });
        }
        ImageVector::new(values)
    }

    async fn try_embed(&self, location: &str) -> Result<ImageVector> {
        let bytes = self.fetch(location).await?;
        self.embed_bytes(&bytes)
    }
}

#[async_trait]
impl ImageEmbedder for ResnetImageEmbedder {
    async fn embed(&self, image_url: &str) -> Option<ImageVector> {
        match self.try_embed(image_url).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(image_url, error = %e, "Image feature extraction failed");
                None
            }
        }
    }

    fn name(&self) -> &'static str {
        "ResnetImageEmbedder"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, pixel: [u8; 3]) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(width, height, Rgb(pixel));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_image_source_parse() {
        assert_eq!(
            ImageSource::parse("https://cdn.example.com/a.jpg"),
            ImageSource::Remote("https://cdn.example.com/a.jpg")
        );
        assert_eq!(
            ImageSource::parse("HTTP://cdn.example.com/a.jpg"),
            ImageSource::Remote("HTTP://cdn.example.com/a.jpg")
        );
        assert_eq!(
            ImageSource::parse("data/images/a.jpg"),
            ImageSource::Local(Path::new("data/images/a.jpg"))
        );
    }

    #[test]
    fn test_preprocess_shape() {
        let bytes = png_bytes(40, 17, [255, 0, 128]);
        let tensor = preprocess_image(&bytes, 224, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 224, 224]);
        assert_eq!(tensor.dtype(), DType::F32);
    }

    #[test]
    fn test_preprocess_normalises_channels() {
        let bytes = png_bytes(8, 8, [255, 0, 128]);
        let tensor = preprocess_image(&bytes, 4, &Device::Cpu).unwrap();
        let values: Vec<f32> = tensor.flatten_all().unwrap().to_vec1().unwrap();

        // Layout is CHW, 16 pixels per channel.
        let red = values[0];
        let green = values[16];
        let blue = values[32];
        assert!((red - (1.0 - 0.485) / 0.229).abs() < 1e-4);
        assert!((green - (0.0 - 0.456) / 0.224).abs() < 1e-4);
        assert!((blue - (128.0 / 255.0 - 0.406) / 0.225).abs() < 1e-4);
    }

    #[test]
    fn test_preprocess_is_deterministic() {
        let bytes = png_bytes(31, 29, [12, 200, 99]);
        let a: Vec<f32> = preprocess_image(&bytes, 32, &Device::Cpu)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        let b: Vec<f32> = preprocess_image(&bytes, 32, &Device::Cpu)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_preprocess_rejects_garbage() {
        let result = preprocess_image(b"definitely not an image", 224, &Device::Cpu);
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore = "requires downloading ResNet-50 weights from the HuggingFace Hub"]
    async fn test_resnet_embedding_dim() {
        let embedder =
            ResnetImageEmbedder::load(&ImageModelConfig::default(), None, &Device::Cpu)
                .await
                .unwrap();
        let vector = embedder
            .embed_bytes(&png_bytes(64, 64, [10, 20, 30]))
            .unwrap();
        assert_eq!(vector.len(), IMAGE_EMBEDDING_DIM);
    }

    #[tokio::test]
    #[ignore = "requires downloading ResNet-50 weights from the HuggingFace Hub"]
    async fn test_missing_local_file_is_absence() {
        let embedder =
            ResnetImageEmbedder::load(&ImageModelConfig::default(), None, &Device::Cpu)
                .await
                .unwrap();
        assert!(embedder.embed("/nonexistent/product.jpg").await.is_none());
    }
}
