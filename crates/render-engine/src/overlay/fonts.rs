//! Font discovery and rasterizer construction.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use fontdb::{Database, Family, Query, Stretch, Style, Weight};
use fontdue::{Font, FontSettings};
use subforge_common::config::FontConfig;
use subforge_common::error::{SubforgeError, SubforgeResult};
use subforge_cue_model::RenderStyle;

use super::raster::{FontdueRasterizer, TextRasterizer};

/// Indexed font faces from configured directories and, optionally, the system.
pub struct FontLibrary {
    db: Database,
}

impl FontLibrary {
    pub fn new(config: &FontConfig) -> Self {
        let mut db = Database::new();
        for dir in &config.dirs {
            if dir.is_dir() {
                db.load_fonts_dir(dir);
            } else {
                tracing::debug!(dir = %dir.display(), "Font directory does not exist");
            }
        }
        if config.load_system_fonts {
            db.load_system_fonts();
        }
        tracing::info!(faces = db.len(), "Font database loaded");
        Self { db }
    }

    /// Library containing exactly the given font files.
    pub fn from_files(paths: &[&Path]) -> SubforgeResult<Self> {
        let mut db = Database::new();
        for path in paths {
            db.load_font_file(path).map_err(|e| {
                SubforgeError::font_load(format!("failed to read {}: {e}", path.display()))
            })?;
        }
        Ok(Self { db })
    }

    pub fn face_count(&self) -> usize {
        self.db.len()
    }

    /// Sorted, de-duplicated family names.
    pub fn families(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .db
            .faces()
            .filter_map(|face| face.families.first().map(|(name, _)| name.clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Load the face closest to `weight` in `family`.
    ///
    /// `sans-serif`, `serif` and `monospace` select the generic families.
    pub fn load(&self, family: &str, weight: u16) -> SubforgeResult<Font> {
        let families = [match family.to_ascii_lowercase().as_str() {
            "sans-serif" => Family::SansSerif,
            "serif" => Family::Serif,
            "monospace" => Family::Monospace,
            _ => Family::Name(family),
        }];
        let query = Query {
            families: &families,
            weight: Weight(weight),
            stretch: Stretch::Normal,
            style: Style::Normal,
        };

        let id = self.db.query(&query).ok_or_else(|| {
            SubforgeError::font_load(format!(
                "no font found for family {family:?} at weight {weight}"
            ))
        })?;

        let parsed = self.db.with_face_data(id, |data, index| {
            Font::from_bytes(
                data,
                FontSettings {
                    collection_index: index,
                    ..FontSettings::default()
                },
            )
        });

        match parsed {
            Some(Ok(font)) => {
                tracing::debug!(family, weight, "Font loaded");
                Ok(font)
            }
            Some(Err(e)) => Err(SubforgeError::font_load(format!(
                "failed to parse font for {family:?}: {e}"
            ))),
            None => Err(SubforgeError::font_load(format!(
                "font data for {family:?} is unavailable"
            ))),
        }
    }
}

/// Builds the rasterizer for one render. Called while configuring, so font
/// failures surface before any frame is decoded.
pub trait RasterizerFactory: Send + Sync {
    fn create(&self, style: &RenderStyle) -> SubforgeResult<Box<dyn TextRasterizer>>;
}

/// Factory over a lazily built, process-shared [`FontLibrary`].
pub struct SystemFontFactory {
    config: FontConfig,
    library: OnceLock<Arc<FontLibrary>>,
}

impl SystemFontFactory {
    pub fn new(config: FontConfig) -> Self {
        Self {
            config,
            library: OnceLock::new(),
        }
    }

    pub fn library(&self) -> Arc<FontLibrary> {
        self.library
            .get_or_init(|| Arc::new(FontLibrary::new(&self.config)))
            .clone()
    }
}

impl RasterizerFactory for SystemFontFactory {
    fn create(&self, style: &RenderStyle) -> SubforgeResult<Box<dyn TextRasterizer>> {
        let mut rasterizer = FontdueRasterizer::new(self.library());
        rasterizer.preload(&style.font.family, style.font.weight)?;

        let override_weight = style
            .word_animation
            .as_ref()
            .and_then(|w| w.font_override.as_ref())
            .and_then(|o| o.weight);
        if let Some(weight) = override_weight {
            rasterizer.preload(&style.font.family, weight)?;
        }
        Ok(Box::new(rasterizer))
    }
}
