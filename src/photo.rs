//! Profile photo preparation.
//!
//! Uploads are decoded once, cropped to a square thumbnail and re-encoded as
//! JPEG so they fit the directory attribute limits.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use thiserror::Error;

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

const THUMBNAIL_QUALITIES: [u8; 2] = [85, 60];
const ORIGINAL_QUALITIES: [u8; 2] = [80, 60];

#[derive(Debug, Error)]
pub enum PhotoError {
    #[error("no image was uploaded")]
    Missing,
    #[error("only JPEG and PNG images are accepted")]
    UnsupportedFormat,
    #[error("upload exceeds {limit} bytes")]
    UploadTooLarge { limit: usize },
    #[error("encoded image is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("cannot process image: {0}")]
    Image(#[from] image::ImageError),
}

/// Size bounds applied to uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhotoLimits {
    /// Edge of the square thumbnail, in pixels.
    pub thumbnail_size: u32,
    pub thumbnail_max_bytes: usize,
    pub original_max_bytes: usize,
    pub upload_max_bytes: usize,
}

impl Default for PhotoLimits {
    fn default() -> Self {
        Self {
            thumbnail_size: 96,
            thumbnail_max_bytes: 100 * 1024,
            original_max_bytes: 1024 * 1024,
            upload_max_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Encodes uploads into directory-sized JPEGs.
pub trait ThumbnailEncoder: Send + Sync {
    /// Square thumbnail of at most `limits.thumbnail_max_bytes`.
    fn encode_thumbnail(
        &self,
        image: &DynamicImage,
        limits: &PhotoLimits,
    ) -> Result<Vec<u8>, PhotoError>;

    /// Full-size JPEG of at most `max_bytes`.
    fn encode_original(
        &self,
        image: &DynamicImage,
        max_bytes: usize,
    ) -> Result<Vec<u8>, PhotoError>;
}

/// [`ThumbnailEncoder`] backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageThumbnailEncoder;

impl ThumbnailEncoder for ImageThumbnailEncoder {
    fn encode_thumbnail(
        &self,
        image: &DynamicImage,
        limits: &PhotoLimits,
    ) -> Result<Vec<u8>, PhotoError> {
        let thumbnail = image.resize_to_fill(
            limits.thumbnail_size,
            limits.thumbnail_size,
            FilterType::Lanczos3,
        );
        encode_under(&thumbnail, &THUMBNAIL_QUALITIES, limits.thumbnail_max_bytes)
    }

    fn encode_original(
        &self,
        image: &DynamicImage,
        max_bytes: usize,
    ) -> Result<Vec<u8>, PhotoError> {
        encode_under(image, &ORIGINAL_QUALITIES, max_bytes)
    }
}

/// Encode with decreasing quality until the output fits.
fn encode_under(
    image: &DynamicImage,
    qualities: &[u8],
    max_bytes: usize,
) -> Result<Vec<u8>, PhotoError> {
    let mut size = 0;
    for quality in qualities {
        let encoded = encode_jpeg(image, *quality)?;
        if encoded.len() <= max_bytes {
            return Ok(encoded);
        }
        size = encoded.len();
    }

    Err(PhotoError::TooLarge {
        size,
        limit: max_bytes,
    })
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, PhotoError> {
    let mut output = Vec::new();
    JpegEncoder::new_with_quality(&mut output, quality)
        .encode_image(&image.to_rgb8())?;
    Ok(output)
}

/// Photo ready to be written to the directory.
#[derive(Clone, PartialEq, Eq)]
pub struct PreparedPhoto {
    pub thumbnail: Vec<u8>,
    pub original: Vec<u8>,
    pub content_type: &'static str,
}

impl PreparedPhoto {
    /// Thumbnail as a `data:` URI.
    pub fn data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            STANDARD.encode(&self.thumbnail)
        )
    }
}

/// Stored photo bytes as a `data:` URI. The type is sniffed, JPEG when
/// unknown.
pub fn data_uri(bytes: &[u8]) -> String {
    let content_type = image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or(JPEG_CONTENT_TYPE);
    format!("data:{content_type};base64,{}", STANDARD.encode(bytes))
}

impl std::fmt::Debug for PreparedPhoto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedPhoto")
            .field("thumbnail", &self.thumbnail.len())
            .field("original", &self.original.len())
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// Validate and encode an upload.
///
/// JPEG originals already under the bound are kept byte for byte.
pub fn prepare(
    upload: &[u8],
    encoder: &dyn ThumbnailEncoder,
    limits: &PhotoLimits,
) -> Result<PreparedPhoto, PhotoError> {
    if upload.len() > limits.upload_max_bytes {
        return Err(PhotoError::UploadTooLarge {
            limit: limits.upload_max_bytes,
        });
    }

    let format = match image::guess_format(upload) {
        Ok(format @ (ImageFormat::Jpeg | ImageFormat::Png)) => format,
        _ => return Err(PhotoError::UnsupportedFormat),
    };
    let image = image::ImageReader::with_format(Cursor::new(upload), format)
        .decode()?;

    let thumbnail = encoder.encode_thumbnail(&image, limits)?;
    let original = if format == ImageFormat::Jpeg
        && upload.len() <= limits.original_max_bytes
    {
        upload.to_vec()
    } else {
        encoder.encode_original(&image, limits.original_max_bytes)?
    };

    tracing::debug!(
        upload = upload.len(),
        thumbnail = thumbnail.len(),
        original = original.len(),
        "photo prepared"
    );

    Ok(PreparedPhoto {
        thumbnail,
        original,
        content_type: JPEG_CONTENT_TYPE,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    /// Gradient image encoded as `format`.
    pub fn sample(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let buffer = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut output = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(buffer)
            .write_to(&mut output, format)
            .unwrap();
        output.into_inner()
    }

    #[test]
    fn test_prepare_png() {
        let upload = sample(300, 200, ImageFormat::Png);
        let photo =
            prepare(&upload, &ImageThumbnailEncoder, &PhotoLimits::default())
                .unwrap();

        let thumbnail = image::load_from_memory(&photo.thumbnail).unwrap();
        assert_eq!((thumbnail.width(), thumbnail.height()), (96, 96));
        assert_eq!(
            image::guess_format(&photo.original).unwrap(),
            ImageFormat::Jpeg
        );
        assert!(photo.data_uri().starts_with("data:image/jpeg;base64,/9j/"));
    }

    #[test]
    fn test_stored_photo_data_uri() {
        let png = sample(8, 8, ImageFormat::Png);
        assert!(data_uri(&png).starts_with("data:image/png;base64,iVBOR"));
        assert_eq!(data_uri(b"\x00\x01"), "data:image/jpeg;base64,AAE=");
    }

    #[test]
    fn test_small_jpeg_original_is_kept() {
        let upload = sample(120, 120, ImageFormat::Jpeg);
        let photo =
            prepare(&upload, &ImageThumbnailEncoder, &PhotoLimits::default())
                .unwrap();
        assert_eq!(photo.original, upload);
    }

    #[test]
    fn test_unsupported_format() {
        let err = prepare(
            b"GIF89a\x01\x00\x01\x00",
            &ImageThumbnailEncoder,
            &PhotoLimits::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PhotoError::UnsupportedFormat));
    }

    #[test]
    fn test_upload_too_large() {
        let limits = PhotoLimits {
            upload_max_bytes: 16,
            ..Default::default()
        };
        let upload = sample(32, 32, ImageFormat::Png);
        let err = prepare(&upload, &ImageThumbnailEncoder, &limits).unwrap_err();
        assert!(matches!(err, PhotoError::UploadTooLarge { limit: 16 }));
    }

    #[test]
    fn test_thumbnail_over_bound() {
        let limits = PhotoLimits {
            thumbnail_max_bytes: 32,
            ..Default::default()
        };
        let upload = sample(200, 200, ImageFormat::Png);
        let err = prepare(&upload, &ImageThumbnailEncoder, &limits).unwrap_err();
        assert!(matches!(err, PhotoError::TooLarge { limit: 32, .. }));
    }
}
