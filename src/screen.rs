// screen.rs

use crate::config::Rgb;
use std::path::PathBuf;

/// Fixation mark shapes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FixationType {
    Cross,
    X,
    Dot,
}

/// Draw commands, replayed in order by the renderer
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Text {
        content: String,
        /// Center of the text block; `None` means display center.
        position: Option<(f32, f32)>,
        size: f32,
        color: Option<Rgb>,
        font: Option<String>,
    },
    Image {
        path: PathBuf,
        position: Option<(f32, f32)>,
    },
    Fixation {
        kind: FixationType,
        position: Option<(f32, f32)>,
        diameter: f32,
        color: Option<Rgb>,
    },
}

/// Off-screen description of one display frame.
///
/// Nothing is rasterised until the screen is handed to
/// [`Display::fill`](crate::display::Display::fill). Colors left as `None`
/// fall back to the configured foreground/background.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Screen {
    bgc: Option<Rgb>,
    commands: Vec<DrawCommand>,
}

impl Screen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_background(bgc: Rgb) -> Self {
        Self {
            bgc: Some(bgc),
            commands: Vec::new(),
        }
    }

    pub fn background(&self) -> Option<Rgb> {
        self.bgc
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Removes all drawn content; the background color is kept.
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn draw_text(&mut self, content: impl Into<String>, size: f32) -> &mut Self {
        self.commands.push(DrawCommand::Text {
            content: content.into(),
            position: None,
            size,
            color: None,
            font: None,
        });
        self
    }

    pub fn draw_text_with(
        &mut self,
        content: impl Into<String>,
        size: f32,
        font: Option<&str>,
        color: Option<Rgb>,
        position: Option<(f32, f32)>,
    ) -> &mut Self {
        self.commands.push(DrawCommand::Text {
            content: content.into(),
            position,
            size,
            color,
            font: font.map(String::from),
        });
        self
    }

    pub fn draw_image(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.commands.push(DrawCommand::Image {
            path: path.into(),
            position: None,
        });
        self
    }

    pub fn draw_fixation(
        &mut self,
        kind: FixationType,
        position: Option<(f32, f32)>,
        diameter: f32,
        color: Option<Rgb>,
    ) -> &mut Self {
        self.commands.push(DrawCommand::Fixation {
            kind,
            position,
            diameter,
            color,
        });
        self
    }
}
