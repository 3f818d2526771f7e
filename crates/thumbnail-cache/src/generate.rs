//! Fit-and-pad transform and WebP encoding
//!
//! Images are scaled uniformly to fit the policy's box, centred on a canvas
//! of exactly that size and optionally blurred. The result is encoded as
//! lossless WebP so identical inputs always produce identical bytes.

use crate::error::{Result, ThumbnailError};
use crate::{PadMode, ThumbnailPolicy};
use image::codecs::webp::WebPEncoder;
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgba, Rgba32FImage, RgbaImage};

/// Output format of every generated thumbnail
pub const THUMBNAIL_FORMAT: ImageFormat = ImageFormat::WebP;

/// MIME type matching [`THUMBNAIL_FORMAT`]
pub const THUMBNAIL_MIME: &str = "image/webp";

/// Size of `source` once scaled to fit `target` without distortion
pub fn fit_dimensions(source: (u32, u32), target: (u32, u32)) -> Result<(u32, u32)> {
    let (width, height) = source;
    let (box_width, box_height) = target;
    if width == 0 || height == 0 {
        return Err(ThumbnailError::InvalidImage { width, height });
    }
    if box_width == 0 || box_height == 0 {
        return Err(ThumbnailError::InvalidImage {
            width: box_width,
            height: box_height,
        });
    }

    let ratio = (box_width as f64 / width as f64).min(box_height as f64 / height as f64);
    let fitted_width = ((width as f64 * ratio).round() as u32).clamp(1, box_width);
    let fitted_height = ((height as f64 * ratio).round() as u32).clamp(1, box_height);
    Ok((fitted_width, fitted_height))
}

/// Resize `img` into the policy box, pad the remainder and blur if asked
pub fn transform(img: &RgbaImage, policy: &ThumbnailPolicy, blur: bool) -> Result<RgbaImage> {
    let target = (policy.target_width, policy.target_height);
    let (fitted_width, fitted_height) = fit_dimensions(img.dimensions(), target)?;

    let resized = if (fitted_width, fitted_height) == img.dimensions() {
        img.clone()
    } else {
        imageops::resize(img, fitted_width, fitted_height, FilterType::Lanczos3)
    };

    let mut canvas = RgbaImage::from_pixel(target.0, target.1, pad_pixel(policy));
    let x = (target.0 - fitted_width) / 2;
    let y = (target.1 - fitted_height) / 2;
    imageops::overlay(&mut canvas, &resized, x as i64, y as i64);

    if blur && policy.blur_strength > 0.0 {
        canvas = blur_premultiplied(&canvas, policy.blur_strength);
    }

    Ok(canvas)
}

/// Gaussian blur on premultiplied alpha, so transparent padding does not
/// bleed its colour into the content edges
fn blur_premultiplied(img: &RgbaImage, sigma: f32) -> RgbaImage {
    let premultiplied = Rgba32FImage::from_fn(img.width(), img.height(), |x, y| {
        let [r, g, b, a] = img.get_pixel(x, y).0.map(|c| c as f32 / 255.0);
        Rgba([r * a, g * a, b * a, a])
    });

    let blurred = imageops::blur(&premultiplied, sigma);

    RgbaImage::from_fn(img.width(), img.height(), |x, y| {
        let [r, g, b, a] = blurred.get_pixel(x, y).0;
        let unpremultiply = |c: f32| if a > 0.0 { c / a } else { 0.0 };
        Rgba([
            to_channel(unpremultiply(r)),
            to_channel(unpremultiply(g)),
            to_channel(unpremultiply(b)),
            to_channel(a),
        ])
    })
}

fn to_channel(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

fn pad_pixel(policy: &ThumbnailPolicy) -> Rgba<u8> {
    match policy.pad_mode {
        PadMode::Transparent => Rgba([0, 0, 0, 0]),
        PadMode::Opaque => {
            let [r, g, b] = policy.pad_color;
            Rgba([r, g, b, 255])
        }
    }
}

/// Encode as lossless WebP
pub fn encode_webp(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    img.write_with_encoder(WebPEncoder::new_lossless(&mut buffer))?;
    Ok(buffer)
}

/// Decoded pixels → encoded thumbnail bytes
pub fn generate_thumbnail(img: &RgbaImage, policy: &ThumbnailPolicy, blur: bool) -> Result<Vec<u8>> {
    let canvas = transform(img, policy, blur)?;
    encode_webp(&canvas)
}

/// Flat neutral-grey thumbnail of the policy size, used as a stock placeholder
pub fn render_placeholder(policy: &ThumbnailPolicy) -> Result<Vec<u8>> {
    let swatch = RgbaImage::from_pixel(1, 1, Rgba([128, 128, 128, 255]));
    let mut flat = policy.clone();
    flat.pad_mode = PadMode::Opaque;
    flat.pad_color = [128, 128, 128];
    generate_thumbnail(&swatch, &flat, false)
}
