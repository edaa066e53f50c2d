//! Image decoding and scaling for the preload pipeline.

use std::path::Path;

use engine::{DecodeError, Decoder, PixelBuffer};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use paperconfig::DisplayMode;

/// Decoder backed by the `image` crate. Scaling happens here, on the worker
/// thread, so the uploaded texture always matches the surface exactly.
#[derive(Default)]
pub struct ImageDecoder;

impl Decoder for ImageDecoder {
    fn decode(
        &self,
        path: &Path,
        target: (u32, u32),
        mode: DisplayMode,
    ) -> Result<PixelBuffer, DecodeError> {
        let bytes = std::fs::read(path).map_err(|source| DecodeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|err| DecodeError::Malformed {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?
            .into_rgba8();

        let (width, height) = target;
        let scaled = scale_to_mode(&decoded, width.max(1), height.max(1), mode);
        Ok(PixelBuffer::new(
            scaled.width(),
            scaled.height(),
            scaled.into_raw(),
        ))
    }
}

/// Produces an image of exactly `target_width` x `target_height`.
fn scale_to_mode(
    source: &RgbaImage,
    target_width: u32,
    target_height: u32,
    mode: DisplayMode,
) -> RgbaImage {
    if source.width() == target_width && source.height() == target_height {
        return source.clone();
    }

    match mode {
        DisplayMode::Stretch => imageops::resize(
            source,
            target_width,
            target_height,
            FilterType::CatmullRom,
        ),
        DisplayMode::Fill => {
            let scale = f64::max(
                target_width as f64 / source.width() as f64,
                target_height as f64 / source.height() as f64,
            );
            let scaled_width = (source.width() as f64 * scale).ceil().max(1.0) as u32;
            let scaled_height = (source.height() as f64 * scale).ceil().max(1.0) as u32;
            let resized = imageops::resize(
                source,
                scaled_width,
                scaled_height,
                FilterType::CatmullRom,
            );
            center_crop(&resized, target_width, target_height)
        }
        DisplayMode::Fit => {
            let scale = f64::min(
                target_width as f64 / source.width() as f64,
                target_height as f64 / source.height() as f64,
            );
            let scaled_width = (source.width() as f64 * scale).floor().max(1.0) as u32;
            let scaled_height = (source.height() as f64 * scale).floor().max(1.0) as u32;
            let resized = imageops::resize(
                source,
                scaled_width,
                scaled_height,
                FilterType::CatmullRom,
            );
            center_pad(&resized, target_width, target_height)
        }
        DisplayMode::Center => {
            if source.width() >= target_width && source.height() >= target_height {
                center_crop(source, target_width, target_height)
            } else {
                center_pad(source, target_width, target_height)
            }
        }
        DisplayMode::Tile => {
            let mut canvas = RgbaImage::new(target_width, target_height);
            for tile_y in (0..target_height).step_by(source.height().max(1) as usize) {
                for tile_x in (0..target_width).step_by(source.width().max(1) as usize) {
                    imageops::overlay(&mut canvas, source, tile_x as i64, tile_y as i64);
                }
            }
            canvas
        }
    }
}

fn center_crop(source: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let x = source.width().saturating_sub(width) / 2;
    let y = source.height().saturating_sub(height) / 2;
    let crop_width = width.min(source.width());
    let crop_height = height.min(source.height());
    let cropped = imageops::crop_imm(source, x, y, crop_width, crop_height).to_image();
    if cropped.width() == width && cropped.height() == height {
        cropped
    } else {
        center_pad(&cropped, width, height)
    }
}

fn center_pad(source: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(width, height, image::Rgba([0, 0, 0, 255]));
    let x = (width.saturating_sub(source.width()) / 2) as i64;
    let y = (height.saturating_sub(source.height()) / 2) as i64;
    imageops::overlay(&mut canvas, source, x, y);
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn checker(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        })
    }

    #[test]
    fn every_mode_yields_target_dimensions() {
        let source = checker(64, 48);
        for mode in [
            DisplayMode::Fill,
            DisplayMode::Fit,
            DisplayMode::Stretch,
            DisplayMode::Center,
            DisplayMode::Tile,
        ] {
            for (width, height) in [(100, 100), (30, 90), (200, 20)] {
                let result = scale_to_mode(&source, width, height, mode);
                assert_eq!((result.width(), result.height()), (width, height), "{mode:?}");
            }
        }
    }

    #[test]
    fn fit_letterboxes_with_black_bars() {
        // A wide source into a square target leaves bars top and bottom.
        let source = RgbaImage::from_pixel(100, 50, Rgba([200, 10, 10, 255]));
        let result = scale_to_mode(&source, 100, 100, DisplayMode::Fit);
        assert_eq!(*result.get_pixel(50, 0), Rgba([0, 0, 0, 255]));
        assert_eq!(*result.get_pixel(50, 50), Rgba([200, 10, 10, 255]));
    }

    #[test]
    fn fill_covers_entire_target() {
        let source = RgbaImage::from_pixel(100, 50, Rgba([10, 200, 10, 255]));
        let result = scale_to_mode(&source, 100, 100, DisplayMode::Fill);
        assert_eq!(*result.get_pixel(0, 0), Rgba([10, 200, 10, 255]));
        assert_eq!(*result.get_pixel(99, 99), Rgba([10, 200, 10, 255]));
    }

    #[test]
    fn tile_repeats_source() {
        let source = RgbaImage::from_pixel(10, 10, Rgba([5, 5, 250, 255]));
        let result = scale_to_mode(&source, 25, 25, DisplayMode::Tile);
        assert_eq!(*result.get_pixel(24, 24), Rgba([5, 5, 250, 255]));
    }

    #[test]
    fn decoder_reports_missing_file() {
        let decoder = ImageDecoder;
        let err = decoder
            .decode(Path::new("/nonexistent/wall.png"), (64, 64), DisplayMode::Fill)
            .unwrap_err();
        assert!(matches!(err, DecodeError::Io { .. }));
    }

    #[test]
    fn decoder_round_trips_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wall.png");
        checker(32, 32).save(&path).unwrap();

        let decoder = ImageDecoder;
        let pixels = decoder
            .decode(&path, (16, 16), DisplayMode::Stretch)
            .unwrap();
        assert_eq!((pixels.width, pixels.height), (16, 16));
        assert_eq!(pixels.data.len(), 16 * 16 * 4);
    }

    #[test]
    fn decoder_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.png");
        std::fs::write(&path, b"not an image").unwrap();

        let decoder = ImageDecoder;
        let err = decoder
            .decode(&path, (16, 16), DisplayMode::Fill)
            .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }
}
