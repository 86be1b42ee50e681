//! Default [`ImageProcessor`]: decodes raster formats with `image`, rasterizes
//! SVG with `resvg`, maps the result onto the target box and re-encodes it.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageError, Rgb, RgbImage, Rgba, RgbaImage};
use resvg::{tiny_skia, usvg};
use tracing::debug;

use crate::config::ResizePolicy;
use crate::contract::{ImageProcessor, NormalizeError, NormalizeSpec};

/// Number of leading bytes inspected when sniffing for SVG markup.
const SVG_SNIFF_LEN: usize = 1024;

pub struct ImageNormalizer {
    filter: FilterType,
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }
}

impl ImageNormalizer {
    pub fn with_filter(filter: FilterType) -> Self {
        Self { filter }
    }
}

impl ImageProcessor for ImageNormalizer {
    fn normalize(
        &self,
        source: &[u8],
        content_type: Option<String>,
        spec: &NormalizeSpec,
    ) -> Result<Vec<u8>, NormalizeError> {
        let decoded = if is_svg(source, content_type.as_deref()) {
            rasterize_svg(source, spec)?
        } else {
            decode_raster(source, content_type)?
        };
        debug!(
            width = decoded.width(),
            height = decoded.height(),
            has_alpha = decoded.color().has_alpha(),
            target = %spec.size,
            "Decoded source image"
        );
        let fitted = fit(decoded, spec, self.filter);
        encode(fitted, spec)
    }
}

fn is_svg(source: &[u8], content_type: Option<&str>) -> bool {
    if content_type.is_some_and(|t| t.to_ascii_lowercase().contains("image/svg")) {
        return true;
    }
    let head = &source[..source.len().min(SVG_SNIFF_LEN)];
    let text = String::from_utf8_lossy(head);
    let text = text.trim_start_matches('\u{feff}').trim_start();
    text.starts_with("<svg") || (text.starts_with('<') && text.contains("<svg"))
}

fn decode_raster(
    source: &[u8],
    content_type: Option<String>,
) -> Result<DynamicImage, NormalizeError> {
    let format =
        image::guess_format(source).map_err(|_| NormalizeError::Unsupported(content_type.clone()))?;
    image::load_from_memory_with_format(source, format).map_err(|e| match e {
        ImageError::Unsupported(_) => NormalizeError::Unsupported(Some(format!("{format:?}"))),
        other => NormalizeError::Decode(other.to_string()),
    })
}

/// Rasterize at a scale that already matches the target box, so the raster
/// resize afterwards is close to a no-op and edges stay crisp.
fn rasterize_svg(source: &[u8], spec: &NormalizeSpec) -> Result<DynamicImage, NormalizeError> {
    let tree = usvg::Tree::from_data(source, &usvg::Options::default())
        .map_err(|e| NormalizeError::Decode(format!("invalid SVG: {e}")))?;
    let size = tree.size();
    let (sw, sh) = (size.width(), size.height());
    let (tw, th) = (spec.size.width as f32, spec.size.height as f32);
    let (sx, sy) = match spec.resize {
        ResizePolicy::Fit => {
            let s = (tw / sw).min(th / sh);
            (s, s)
        }
        ResizePolicy::Fill => {
            let s = (tw / sw).max(th / sh);
            (s, s)
        }
        ResizePolicy::Stretch => (tw / sw, th / sh),
    };
    let width = (sw * sx).round().max(1.0) as u32;
    let height = (sh * sy).round().max(1.0) as u32;
    let mut pixmap = tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| NormalizeError::Decode("SVG has an empty canvas".into()))?;
    resvg::render(
        &tree,
        tiny_skia::Transform::from_scale(sx, sy),
        &mut pixmap.as_mut(),
    );

    let mut rgba = RgbaImage::new(width, height);
    for (dst, px) in rgba.pixels_mut().zip(pixmap.pixels()) {
        let c = px.demultiply();
        *dst = Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
    }
    Ok(DynamicImage::ImageRgba8(rgba))
}

fn keeps_alpha(spec: &NormalizeSpec) -> bool {
    spec.preserve_transparency && spec.format.supports_alpha()
}

fn fit(image: DynamicImage, spec: &NormalizeSpec, filter: FilterType) -> DynamicImage {
    let (w, h) = (spec.size.width, spec.size.height);
    match spec.resize {
        ResizePolicy::Stretch => image.resize_exact(w, h, filter),
        ResizePolicy::Fill => image.resize_to_fill(w, h, filter),
        ResizePolicy::Fit => {
            let scaled = if (image.width() == w && image.height() <= h)
                || (image.height() == h && image.width() <= w)
            {
                image
            } else {
                image.resize(w, h, filter)
            };
            if scaled.width() == w && scaled.height() == h {
                return scaled;
            }
            let pad = if keeps_alpha(spec) {
                Rgba([0, 0, 0, 0])
            } else {
                Rgba([255, 255, 255, 255])
            };
            let mut canvas = RgbaImage::from_pixel(w, h, pad);
            let x = i64::from((w - scaled.width()) / 2);
            let y = i64::from((h - scaled.height()) / 2);
            imageops::overlay(&mut canvas, &scaled.to_rgba8(), x, y);
            DynamicImage::ImageRgba8(canvas)
        }
    }
}

fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (dst, src) in out.pixels_mut().zip(rgba.pixels()) {
        let a = u32::from(src[3]);
        let blend = |c: u8| ((u32::from(c) * a + 255 * (255 - a) + 127) / 255) as u8;
        *dst = Rgb([blend(src[0]), blend(src[1]), blend(src[2])]);
    }
    out
}

fn encode(image: DynamicImage, spec: &NormalizeSpec) -> Result<Vec<u8>, NormalizeError> {
    let prepared = if keeps_alpha(spec) && image.color().has_alpha() {
        DynamicImage::ImageRgba8(image.to_rgba8())
    } else if image.color().has_alpha() {
        DynamicImage::ImageRgb8(flatten_onto_white(&image))
    } else {
        DynamicImage::ImageRgb8(image.to_rgb8())
    };
    let mut out = Cursor::new(Vec::new());
    prepared
        .write_to(&mut out, spec.format.image_format())
        .map_err(|e| NormalizeError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}
