//! # rq-compose
//!
//! `CardComposer` implementation: decodes the uploaded photo, fits it into the
//! bounding box, rasterizes the SVG metadata panel and encodes the side-by-side
//! result as JPEG.

pub mod panel;

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Rgb, RgbImage};
use rq_core::models::{ComposedCard, QslRecord};
use rq_core::text::DEFAULT_WRAP_WIDTH;
use rq_core::traits::CardComposer;

/// Geometry and encoding knobs of the composite card.
#[derive(Debug, Clone, Copy)]
pub struct ComposeOptions {
    pub max_width: u32,
    pub max_height: u32,
    pub panel_width: u32,
    pub jpeg_quality: u8,
    pub wrap_width: usize,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            max_width: 1400,
            max_height: 900,
            panel_width: 350,
            jpeg_quality: 90,
            wrap_width: DEFAULT_WRAP_WIDTH,
        }
    }
}

pub struct SvgCardComposer {
    options: ComposeOptions,
    fontdb: Arc<usvg::fontdb::Database>,
}

impl SvgCardComposer {
    /// Loads system fonts, plus any `.ttf`/`.otf`/`.ttc` found in `font_dir`.
    pub fn new(options: ComposeOptions, font_dir: Option<&Path>) -> Self {
        let mut db = usvg::fontdb::Database::new();
        db.load_system_fonts();
        if let Some(dir) = font_dir {
            load_fonts_from_dir(&mut db, dir);
        }
        if db.is_empty() {
            tracing::warn!("no fonts found; qsl panels will render without text");
        } else {
            tracing::debug!(faces = db.len(), "panel fonts loaded");
        }
        Self::with_fontdb(options, Arc::new(db))
    }

    pub fn with_fontdb(options: ComposeOptions, fontdb: Arc<usvg::fontdb::Database>) -> Self {
        Self { options, fontdb }
    }

    fn rasterize_panel(&self, svg: &str, width: u32, height: u32) -> anyhow::Result<RgbImage> {
        let opts = usvg::Options {
            fontdb: Arc::clone(&self.fontdb),
            ..Default::default()
        };
        let tree = usvg::Tree::from_str(svg, &opts).context("parse panel svg")?;

        let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height)
            .ok_or_else(|| anyhow!("failed to allocate {width}x{height} panel pixmap"))?;
        resvg::render(&tree, resvg::tiny_skia::Transform::identity(), &mut pixmap.as_mut());

        let mut panel = RgbImage::new(width, height);
        for (src, dst) in pixmap.pixels().iter().zip(panel.pixels_mut()) {
            let c = src.demultiply();
            *dst = Rgb([c.red(), c.green(), c.blue()]);
        }
        Ok(panel)
    }
}

impl CardComposer for SvgCardComposer {
    fn compose(&self, photo: &[u8], record: &QslRecord) -> anyhow::Result<ComposedCard> {
        if photo.is_empty() {
            return Err(anyhow!("empty source image"));
        }

        let source = ImageReader::new(Cursor::new(photo))
            .with_guessed_format()
            .context("sniff image format")?
            .decode()
            .context("decode source image")?;

        let opts = &self.options;
        let (photo_w, photo_h) = fit_within(
            source.width(),
            source.height(),
            opts.max_width,
            opts.max_height,
        );
        let resized = if (photo_w, photo_h) == (source.width(), source.height()) {
            source
        } else {
            source.resize_exact(photo_w, photo_h, FilterType::Lanczos3)
        };

        let svg = panel::render_svg(record, opts.panel_width, photo_h, opts.wrap_width);
        let panel = self.rasterize_panel(&svg, opts.panel_width, photo_h)?;

        let width = photo_w + opts.panel_width;
        let mut canvas = RgbImage::new(width, photo_h);
        imageops::replace(&mut canvas, &resized.to_rgb8(), 0, 0);
        imageops::replace(&mut canvas, &panel, i64::from(photo_w), 0);

        let mut bytes = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut bytes, opts.jpeg_quality);
        DynamicImage::ImageRgb8(canvas)
            .write_with_encoder(encoder)
            .context("encode composite jpeg")?;

        tracing::debug!(width, height = photo_h, size = bytes.len(), "qsl card composed");

        Ok(ComposedCard {
            bytes,
            width,
            height: photo_h,
            content_type: "image/jpeg",
        })
    }
}

/// Scales `(width, height)` down to fit inside `(max_width, max_height)`,
/// preserving the aspect ratio. Never upscales.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let scale = f64::min(
        f64::from(max_width) / f64::from(width),
        f64::from(max_height) / f64::from(height),
    );
    let w = (f64::from(width) * scale).round() as u32;
    let h = (f64::from(height) * scale).round() as u32;
    (w.clamp(1, max_width), h.clamp(1, max_height))
}

fn load_fonts_from_dir(db: &mut usvg::fontdb::Database, dir: &Path) {
    let Ok(rd) = std::fs::read_dir(dir) else {
        tracing::warn!(dir = %dir.display(), "font directory not readable");
        return;
    };

    for path in rd.flatten().map(|entry| entry.path()) {
        let is_font = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "ttf" | "otf" | "ttc"))
            .unwrap_or(false);
        if path.is_file() && is_font {
            if let Err(err) = db.load_font_file(&path) {
                tracing::warn!(path = %path.display(), error = %err, "skipping font file");
            }
        }
    }
}
