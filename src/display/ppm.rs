//! Screendump decoding. QEMU writes binary netpbm: `P6` for colour
//! surfaces, `P5` for grayscale ones; only 8-bit samples are accepted.

use image::{DynamicImage, ImageFormat};

use super::{Geometry, PixelFormat};
use crate::error::RecordError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub geometry: Geometry,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

fn bad(msg: impl std::fmt::Display) -> RecordError {
    RecordError::Display(format!("malformed screendump: {msg}"))
}

pub fn decode(buf: &[u8]) -> Result<Image, RecordError> {
    let img = image::load_from_memory_with_format(buf, ImageFormat::Pnm).map_err(bad)?;
    let geometry = Geometry::new(img.width(), img.height());
    if geometry.width == 0 || geometry.height == 0 {
        return Err(bad("empty image"));
    }
    let (format, data) = match img {
        DynamicImage::ImageRgb8(rgb) => (PixelFormat::Rgb24, rgb.into_raw()),
        DynamicImage::ImageLuma8(gray) => (PixelFormat::Gray8, gray.into_raw()),
        other => return Err(bad(format!("{:?} samples (only 8-bit images are supported)", other.color()))),
    };
    Ok(Image {
        geometry,
        format,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pnm(header: &str, raster: &[u8]) -> Vec<u8> {
        let mut v = header.as_bytes().to_vec();
        v.extend_from_slice(raster);
        v
    }

    #[test]
    fn decodes_pixmap() {
        let raster: Vec<u8> = (0..2 * 2 * 3).collect();
        let img = decode(&pnm("P6\n2 2\n255\n", &raster)).unwrap();
        assert_eq!(img.geometry, Geometry::new(2, 2));
        assert_eq!(img.format, PixelFormat::Rgb24);
        assert_eq!(img.data, raster);
    }

    #[test]
    fn decodes_graymap_with_comment() {
        let raster = [10u8, 20, 30];
        let img = decode(&pnm("P5\n# CREATOR: qemu\n3 1\n255\n", &raster)).unwrap();
        assert_eq!(img.geometry, Geometry::new(3, 1));
        assert_eq!(img.format, PixelFormat::Gray8);
        assert_eq!(img.data, raster);
    }

    #[test]
    fn raster_may_start_with_whitespace_byte() {
        let raster = [b'\n', b' ', b'\t'];
        let img = decode(&pnm("P6\n1 1\n255\n", &raster)).unwrap();
        assert_eq!(img.data, raster);
    }

    #[test]
    fn rejects_short_raster() {
        let err = decode(&pnm("P6\n2 2\n255\n", &[0; 5])).unwrap_err();
        assert!(matches!(err, RecordError::Display(_)));
    }

    #[test]
    fn rejects_wide_samples() {
        let err = decode(&pnm("P6\n1 1\n65535\n", &[0; 6])).unwrap_err();
        assert!(err.to_string().contains("8-bit"), "{err}");
    }

    #[test]
    fn rejects_other_input() {
        assert!(decode(b"").is_err());
        assert!(decode(b"\x89PNG\r\n").is_err());
        assert!(decode(b"P6\nx 1\n255\n").is_err());
    }
}
