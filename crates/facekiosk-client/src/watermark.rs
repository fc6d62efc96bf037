//! Logo stamping for gallery photos handed to visitors.

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, ImageResult};
use std::io::Cursor;

/// Edge length of the square the logo is scaled to.
pub const LOGO_SIZE: u32 = 400;

/// Stamp `logo` (scaled to 400x400) over the centre of `photo`; returns PNG bytes.
///
/// Both inputs may be any format `image` can sniff. A photo smaller than the
/// logo is covered by the logo's centre.
pub fn watermark(photo: &[u8], logo: &[u8]) -> ImageResult<Vec<u8>> {
    let mut canvas = image::load_from_memory(photo)?.to_rgba8();
    let logo = image::load_from_memory(logo)?.to_rgba8();
    let logo = imageops::resize(&logo, LOGO_SIZE, LOGO_SIZE, FilterType::Triangle);

    let x = (i64::from(canvas.width()) - i64::from(LOGO_SIZE)) / 2;
    let y = (i64::from(canvas.height()) - i64::from(LOGO_SIZE)) / 2;
    imageops::overlay(&mut canvas, &logo, x, y);

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(canvas).write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    fn photo(width: u32, height: u32) -> Vec<u8> {
        encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([0, 0, 255]))),
            ImageFormat::Png,
        )
    }

    fn red_logo(size: u32) -> Vec<u8> {
        encode(
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(size, size, Rgba([255, 0, 0, 255]))),
            ImageFormat::Png,
        )
    }

    #[test]
    fn test_logo_is_centred_and_scaled() {
        let out = watermark(&photo(1000, 800), &red_logo(50)).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Png);

        let img = image::load_from_memory(&out).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (1000, 800));
        // Logo spans x 300..700, y 200..600.
        assert_eq!(img.get_pixel(500, 400), &Rgba([255, 0, 0, 255]));
        assert_eq!(img.get_pixel(305, 205), &Rgba([255, 0, 0, 255]));
        assert_eq!(img.get_pixel(290, 400), &Rgba([0, 0, 255, 255]));
        assert_eq!(img.get_pixel(500, 610), &Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_transparent_logo_keeps_photo() {
        let clear = encode(
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 0]))),
            ImageFormat::Png,
        );
        let out = watermark(&photo(600, 600), &clear).unwrap();
        let img = image::load_from_memory(&out).unwrap().to_rgba8();
        assert_eq!(img.get_pixel(300, 300), &Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_photo_smaller_than_logo() {
        let out = watermark(&photo(100, 100), &red_logo(8)).unwrap();
        let img = image::load_from_memory(&out).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (100, 100));
        assert_eq!(img.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_jpeg_photo_is_accepted() {
        let jpeg = encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(480, 480, Rgb([90, 90, 90]))),
            ImageFormat::Jpeg,
        );
        assert!(watermark(&jpeg, &red_logo(16)).is_ok());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(watermark(b"not an image", &red_logo(4)).is_err());
        assert!(watermark(&photo(10, 10), b"nope").is_err());
    }
}
