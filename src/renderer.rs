use crate::config::{ExperimentConfig, Rgb};
use crate::error::{ExperimentError, Result};
use crate::screen::{DrawCommand, FixationType, Screen};
use ab_glyph::{point, Font, FontVec, Glyph, GlyphId, PxScale, PxScaleFont, ScaleFont};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tiny_skia::{
    Color, ColorU8, FillRule, Paint, PathBuilder, Pixmap, PixmapPaint, PremultipliedColorU8,
    Stroke, Transform,
};

/// Share of the display width a text line may take before it wraps.
const WRAP_FRACTION: f32 = 0.8;

/// Rasterises [`Screen`]s into tiny-skia pixmaps
pub struct ExperimentRenderer {
    width: u32,
    height: u32,
    center_x: f32,
    center_y: f32,
    bgc: Rgb,
    fgc: Rgb,
    default_font: String,
    fonts: FontBook,
    glyph_cache: HashMap<GlyphCacheKey, CachedGlyph>,
    images: HashMap<PathBuf, Arc<Pixmap>>,
}

#[derive(Clone)]
struct CachedGlyph {
    bitmap: Vec<u8>,
    width: u32,
    height: u32,
    bearing_x: i32,
    bearing_y: i32,
}

#[derive(Hash, Eq, PartialEq, Clone, Copy)]
struct GlyphCacheKey {
    font_slot: usize,
    glyph_id: u16,
    scale_bits: u32, // f32 bits for exact scale matching
}

/// Font faces resolved by family name, loaded on first use.
struct FontBook {
    db: Option<fontdb::Database>,
    faces: Vec<FontVec>,
    by_family: HashMap<String, Option<usize>>,
}

impl FontBook {
    fn new() -> Self {
        Self {
            db: None,
            faces: Vec::new(),
            by_family: HashMap::new(),
        }
    }

    fn insert(&mut self, family: &str, face: FontVec) -> usize {
        self.faces.push(face);
        let slot = self.faces.len() - 1;
        self.by_family.insert(family.to_string(), Some(slot));
        slot
    }

    fn resolve(&mut self, family: &str) -> Option<usize> {
        if let Some(slot) = self.by_family.get(family) {
            return *slot;
        }

        let db = self.db.get_or_insert_with(|| {
            let mut db = fontdb::Database::new();
            db.load_system_fonts();
            log::debug!("loaded {} system font faces", db.len());
            db
        });

        let families = [
            fontdb::Family::Name(family),
            fontdb::Family::Monospace,
            fontdb::Family::SansSerif,
        ];
        let query = fontdb::Query {
            families: &families,
            ..fontdb::Query::default()
        };
        let id = db.query(&query).or_else(|| db.faces().next().map(|f| f.id));

        let face = id.and_then(|id| {
            db.with_face_data(id, |data, index| {
                FontVec::try_from_vec_and_index(data.to_vec(), index).ok()
            })
            .flatten()
        });

        match face {
            Some(face) => {
                log::debug!("resolved font family `{}`", family);
                Some(self.insert(family, face))
            }
            None => {
                log::warn!("no usable font for `{}`; text will not be drawn", family);
                self.by_family.insert(family.to_string(), None);
                None
            }
        }
    }
}

impl ExperimentRenderer {
    pub fn new(width: u32, height: u32, config: &ExperimentConfig) -> Result<Self> {
        let mut fonts = FontBook::new();
        if let Some(path) = &config.font_path {
            let data = std::fs::read(path).map_err(|e| {
                ExperimentError::Config(format!("font {} is not readable: {}", path.display(), e))
            })?;
            let face = FontVec::try_from_vec(data).map_err(|e| {
                ExperimentError::Config(format!("font {} is not usable: {}", path.display(), e))
            })?;
            fonts.insert(&config.font, face);
        }

        Ok(Self {
            width,
            height,
            center_x: width as f32 / 2.0,
            center_y: height as f32 / 2.0,
            bgc: config.bgc,
            fgc: config.fgc,
            default_font: config.font.clone(),
            fonts,
            glyph_cache: HashMap::with_capacity(256),
            images: HashMap::new(),
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.center_x, self.center_y)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.center_x = width as f32 / 2.0;
        self.center_y = height as f32 / 2.0;
    }

    /// Draws `screen` over the whole of `pixmap`
    pub fn render_screen(&mut self, pixmap: &mut Pixmap, screen: &Screen) -> Result<()> {
        let [r, g, b] = screen.background().unwrap_or(self.bgc);
        pixmap.fill(Color::from_rgba8(r, g, b, 255));

        for command in screen.commands() {
            match command {
                DrawCommand::Text {
                    content,
                    position,
                    size,
                    color,
                    font,
                } => {
                    let family = font.clone().unwrap_or_else(|| self.default_font.clone());
                    let pos = position.unwrap_or(self.center());
                    let color = color.unwrap_or(self.fgc);
                    self.draw_text(pixmap, content, pos, *size, &family, color);
                }
                DrawCommand::Image { path, position } => {
                    let pos = position.unwrap_or(self.center());
                    self.draw_image(pixmap, path, pos)?;
                }
                DrawCommand::Fixation {
                    kind,
                    position,
                    diameter,
                    color,
                } => {
                    let pos = position.unwrap_or(self.center());
                    let color = color.unwrap_or(self.fgc);
                    self.draw_fixation(pixmap, *kind, pos, *diameter, color)?;
                }
            }
        }

        Ok(())
    }

    fn draw_fixation(
        &self,
        pixmap: &mut Pixmap,
        kind: FixationType,
        (x, y): (f32, f32),
        diameter: f32,
        color: Rgb,
    ) -> Result<()> {
        let mut paint = Paint::default();
        paint.set_color_rgba8(color[0], color[1], color[2], 255);
        paint.anti_alias = true;

        let half = diameter / 2.0;
        let mut path = PathBuilder::new();
        match kind {
            FixationType::Cross => {
                path.move_to(x - half, y);
                path.line_to(x + half, y);
                path.move_to(x, y - half);
                path.line_to(x, y + half);
            }
            FixationType::X => {
                path.move_to(x - half, y - half);
                path.line_to(x + half, y + half);
                path.move_to(x - half, y + half);
                path.line_to(x + half, y - half);
            }
            FixationType::Dot => {
                path.push_circle(x, y, half);
            }
        }
        let path = path
            .finish()
            .ok_or_else(|| ExperimentError::Display(format!("degenerate {kind:?} fixation")))?;

        if kind == FixationType::Dot {
            pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
        } else {
            let stroke = Stroke {
                width: (diameter / 10.0).max(2.0),
                ..Default::default()
            };
            pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
        }

        Ok(())
    }

    fn draw_image(&mut self, pixmap: &mut Pixmap, path: &Path, (x, y): (f32, f32)) -> Result<()> {
        let image = match self.images.get(path) {
            Some(image) => Arc::clone(image),
            None => {
                let image = Arc::new(load_image_pixmap(path)?);
                self.images.insert(path.to_path_buf(), Arc::clone(&image));
                image
            }
        };

        let left = (x - image.width() as f32 / 2.0).round() as i32;
        let top = (y - image.height() as f32 / 2.0).round() as i32;
        pixmap.draw_pixmap(
            left,
            top,
            (*image).as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
        Ok(())
    }

    /// Draws a block of text centered on `center`: explicit newlines are kept,
    /// long lines wrap at word boundaries.
    fn draw_text(
        &mut self,
        pixmap: &mut Pixmap,
        text: &str,
        center: (f32, f32),
        size: f32,
        family: &str,
        color: Rgb,
    ) {
        let Some(slot) = self.fonts.resolve(family) else {
            return;
        };
        let font = &self.fonts.faces[slot];
        let scale = PxScale::from(size);
        let max_width = self.width as f32 * WRAP_FRACTION;

        // Stage 1: layout and find cache misses
        let (glyphs_to_draw, misses) = {
            let scaled_font = font.as_scaled(scale);
            let lines = wrap_lines(&scaled_font, text, max_width);
            let line_height = scaled_font.ascent() - scaled_font.descent() + scaled_font.line_gap();
            let block_height = line_height * lines.len() as f32;
            let top = center.1 - block_height / 2.0;

            let mut glyphs = Vec::with_capacity(text.len());
            let mut misses: Vec<(GlyphId, GlyphCacheKey)> = Vec::new();

            for (i, (line, line_width)) in lines.iter().enumerate() {
                let baseline_y = top + scaled_font.ascent() + i as f32 * line_height;
                let mut pen_x = center.0 - line_width / 2.0;
                let mut prev = None;
                for ch in line.chars() {
                    let gid = scaled_font.glyph_id(ch);
                    if let Some(prev_gid) = prev {
                        pen_x += scaled_font.kern(prev_gid, gid);
                    }
                    let glyph = Glyph {
                        id: gid,
                        scale,
                        position: point(pen_x, baseline_y),
                    };
                    let key = GlyphCacheKey {
                        font_slot: slot,
                        glyph_id: gid.0,
                        scale_bits: size.to_bits(),
                    };
                    if !self.glyph_cache.contains_key(&key) && !misses.iter().any(|m| m.1 == key) {
                        misses.push((gid, key));
                    }
                    glyphs.push((glyph, key));
                    pen_x += scaled_font.h_advance(gid);
                    prev = Some(gid);
                }
            }

            (glyphs, misses)
        };

        // Stage 2: fill cache for misses
        if !misses.is_empty() {
            let scaled_font = font.as_scaled(scale);
            for (gid, key) in misses {
                let g = Glyph {
                    id: gid,
                    scale,
                    position: point(0.0, 0.0),
                };
                cache_glyph(&mut self.glyph_cache, &scaled_font, g, key);
            }
        }

        // Stage 3: blit cached glyphs
        let (w, h) = (pixmap.width(), pixmap.height());
        let pixels = pixmap.pixels_mut();
        for (glyph, key) in glyphs_to_draw {
            if let Some(cached) = self.glyph_cache.get(&key) {
                blit_cached_glyph(pixels, w, h, &glyph, cached, color);
            }
        }
    }
}

/// Splits `text` into lines no wider than `max_width`, returning each line
/// with its advance width.
fn wrap_lines(font: &PxScaleFont<&FontVec>, text: &str, max_width: f32) -> Vec<(String, f32)> {
    let measure = |s: &str| {
        let mut width = 0.0;
        let mut prev: Option<GlyphId> = None;
        for ch in s.chars() {
            let gid = font.glyph_id(ch);
            if let Some(p) = prev {
                width += font.kern(p, gid);
            }
            width += font.h_advance(gid);
            prev = Some(gid);
        }
        width
    };

    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut current = String::new();
        for word in paragraph.split(' ') {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{current} {word}")
            };
            if !current.is_empty() && measure(&candidate) > max_width {
                let width = measure(&current);
                lines.push((std::mem::replace(&mut current, word.to_string()), width));
            } else {
                current = candidate;
            }
        }
        let width = measure(&current);
        lines.push((current, width));
    }
    lines
}

fn cache_glyph(
    cache: &mut HashMap<GlyphCacheKey, CachedGlyph>,
    scaled_font: &PxScaleFont<&FontVec>,
    glyph: Glyph,
    key: GlyphCacheKey,
) {
    if let Some(outlined) = scaled_font.outline_glyph(glyph) {
        let bounds = outlined.px_bounds();
        let w = bounds.width().ceil() as u32;
        let h = bounds.height().ceil() as u32;
        if w == 0 || h == 0 {
            return;
        }
        let mut bitmap = vec![0u8; (w * h) as usize];
        outlined.draw(|x, y, cov| {
            if x < w && y < h {
                bitmap[(y * w + x) as usize] = (cov.clamp(0.0, 1.0) * 255.0) as u8;
            }
        });
        cache.insert(
            key,
            CachedGlyph {
                bitmap,
                width: w,
                height: h,
                bearing_x: bounds.min.x.floor() as i32,
                bearing_y: bounds.min.y.floor() as i32,
            },
        );
    }
}

#[inline]
fn blit_cached_glyph(
    pixels: &mut [PremultipliedColorU8],
    w: u32,
    h: u32,
    glyph: &Glyph,
    cached: &CachedGlyph,
    [cr, cg, cb]: Rgb,
) {
    let glyph_x = glyph.position.x as i32 + cached.bearing_x;
    let glyph_y = glyph.position.y as i32 + cached.bearing_y;

    let (wi, hi) = (w as i32, h as i32);

    for gy in 0..cached.height as i32 {
        let py = glyph_y + gy;
        if py < 0 || py >= hi {
            continue;
        }

        let src_row_start = (gy as u32 * cached.width) as usize;
        let dst_row_start = (py as u32 * w) as usize;

        for gx in 0..cached.width as i32 {
            let px = glyph_x + gx;
            if px < 0 || px >= wi {
                continue;
            }

            let coverage = cached.bitmap[src_row_start + gx as usize];
            if coverage == 0 {
                continue;
            }

            let dst_idx = dst_row_start + px as usize;
            let alpha = coverage as f32 / 255.0;
            let dst = pixels[dst_idx];

            // premultiplied "over"
            let inv = 1.0 - alpha;
            let out_a = (alpha * 255.0 + dst.alpha() as f32 * inv).round().min(255.0) as u8;
            let blend = |src: u8, dst: u8| {
                ((src as f32 * alpha + dst as f32 * inv).round() as u8).min(out_a)
            };
            let out = PremultipliedColorU8::from_rgba(
                blend(cr, dst.red()),
                blend(cg, dst.green()),
                blend(cb, dst.blue()),
                out_a,
            );
            if let Some(out) = out {
                pixels[dst_idx] = out;
            }
        }
    }
}

/// Decodes an image file into a premultiplied pixmap
pub fn load_image_pixmap(path: &Path) -> Result<Pixmap> {
    let image = image::open(path)
        .map_err(|source| ExperimentError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .into_rgba8();
    let (width, height) = image.dimensions();

    let mut pixmap = Pixmap::new(width, height).ok_or_else(|| {
        ExperimentError::Display(format!(
            "image {} has unusable size {}x{}",
            path.display(),
            width,
            height
        ))
    })?;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(image.pixels()) {
        let [r, g, b, a] = src.0;
        *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Ok(pixmap)
}
