use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::state::{PageData, PublishingConfig};
use crate::utils::pagination::chapter_heading;

pub const PX_PER_INCH: f32 = 96.0;
pub const PT_PER_INCH: f32 = 72.0;

const HEADING_SCALE: f32 = 2.0;
const FOOTER_SCALE: f32 = 0.75;
const DROP_CAP_LINES: u32 = 3;
// Average glyph advance of a serif body face, as a fraction of its size.
const AVG_GLYPH_WIDTH: f32 = 0.5;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaperPreset {
    #[serde(rename = "5x8")]
    Pocket,
    #[serde(rename = "5.5x8.5")]
    Digest,
    #[default]
    #[serde(rename = "6x9")]
    Trade,
    #[serde(rename = "a5")]
    A5,
    #[serde(rename = "letter")]
    Letter,
}

impl PaperPreset {
    pub const ALL: [PaperPreset; 5] = [
        PaperPreset::Pocket,
        PaperPreset::Digest,
        PaperPreset::Trade,
        PaperPreset::A5,
        PaperPreset::Letter,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PaperPreset::Pocket => "5x8",
            PaperPreset::Digest => "5.5x8.5",
            PaperPreset::Trade => "6x9",
            PaperPreset::A5 => "a5",
            PaperPreset::Letter => "letter",
        }
    }

    /// Width and height in inches.
    pub fn dimensions_in(&self) -> (f32, f32) {
        match self {
            PaperPreset::Pocket => (5.0, 8.0),
            PaperPreset::Digest => (5.5, 8.5),
            PaperPreset::Trade => (6.0, 9.0),
            PaperPreset::A5 => (5.83, 8.27),
            PaperPreset::Letter => (8.5, 11.0),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|p| p.name() == name)
    }
}

impl fmt::Display for PaperPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions_in();
        write!(f, "{} ({}\" x {}\")", self.name(), w, h)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MarginPreset {
    Narrow,
    #[default]
    Normal,
    Wide,
}

impl MarginPreset {
    pub const ALL: [MarginPreset; 3] = [MarginPreset::Narrow, MarginPreset::Normal, MarginPreset::Wide];

    pub fn name(&self) -> &'static str {
        match self {
            MarginPreset::Narrow => "narrow",
            MarginPreset::Normal => "normal",
            MarginPreset::Wide => "wide",
        }
    }

    pub fn inches(&self) -> f32 {
        match self {
            MarginPreset::Narrow => 0.5,
            MarginPreset::Normal => 0.8,
            MarginPreset::Wide => 1.0,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|m| m.name() == name)
    }
}

impl fmt::Display for MarginPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}\")", self.name(), self.inches())
    }
}

/// How scene breaks are drawn. `MatchSource` picks the glyph that corresponds
/// to the divider token written in the text.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SceneDividerStyle {
    #[default]
    MatchSource,
    Asterisks,
    Fleuron,
    Dinkus,
    Rule,
}

impl SceneDividerStyle {
    pub fn glyph(&self) -> &'static str {
        match self {
            SceneDividerStyle::MatchSource | SceneDividerStyle::Asterisks => "* * *",
            SceneDividerStyle::Fleuron => "❦",
            SceneDividerStyle::Dinkus => "⁂",
            SceneDividerStyle::Rule => "———",
        }
    }
}

/// Recognizes a scene-break line and returns the style its token implies.
pub fn scene_divider(line: &str) -> Option<SceneDividerStyle> {
    match line.trim() {
        "***" | "* * *" => Some(SceneDividerStyle::Asterisks),
        "~~~" | "~ ~ ~" => Some(SceneDividerStyle::Fleuron),
        "#" | "# # #" => Some(SceneDividerStyle::Dinkus),
        "---" | "- - -" => Some(SceneDividerStyle::Rule),
        _ => None,
    }
}

pub fn inches_to_px(inches: f32, zoom: f32) -> f32 {
    inches * PX_PER_INCH * zoom
}

pub fn inches_to_pt(inches: f32) -> f32 {
    inches * PT_PER_INCH
}

pub fn pt_to_px(pt: f32, zoom: f32) -> f32 {
    pt * PX_PER_INCH / PT_PER_INCH * zoom
}

pub fn px_to_pt(px: f32, zoom: f32) -> f32 {
    px * PT_PER_INCH / (PX_PER_INCH * zoom)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub zoom: f32,
    pub page_width_px: f32,
    pub page_height_px: f32,
    pub margin_px: f32,
    pub content_width_px: f32,
    pub content_height_px: f32,
}

pub fn compute_geometry(paper: PaperPreset, margin: MarginPreset, zoom: f32) -> PageGeometry {
    let (w_in, h_in) = paper.dimensions_in();
    let page_width_px = inches_to_px(w_in, zoom);
    let page_height_px = inches_to_px(h_in, zoom);
    let margin_px = inches_to_px(margin.inches(), zoom);
    PageGeometry {
        zoom,
        page_width_px,
        page_height_px,
        margin_px,
        content_width_px: (page_width_px - 2.0 * margin_px).max(0.0),
        content_height_px: (page_height_px - 2.0 * margin_px).max(0.0),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    ChapterHeading { text: String, font_px: f32 },
    DropCap { letter: char, font_px: f32, lines: u32 },
    Paragraph { text: String, font_px: f32 },
    SceneDivider { glyph: &'static str, font_px: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewLayout {
    pub geometry: PageGeometry,
    pub body_font_px: f32,
    pub line_px: f32,
    pub header: Option<Region>,
    pub body: Region,
    pub footer: Option<Region>,
    pub header_text: Option<String>,
    pub footer_text: Option<String>,
    pub blocks: Vec<Block>,
}

/// Lays out one page of the print preview. Pure in (config, zoom, page).
pub fn layout_preview(config: &PublishingConfig, zoom: f32, page: &PageData) -> PreviewLayout {
    let geometry = compute_geometry(config.paper, config.margin, zoom);
    let body_font_px = pt_to_px(config.font_size_pt, zoom);
    let line_px = body_font_px * config.line_height;
    let footer_font_px = body_font_px * FOOTER_SCALE;

    let header_text = if config.show_header && !page.chapter_title.is_empty() {
        Some(page.chapter_title.clone())
    } else {
        None
    };
    let footer_text = footer_line(config, page.page_number);

    let mut y = geometry.margin_px;
    let mut bottom = geometry.margin_px + geometry.content_height_px;

    let header = header_text.as_ref().map(|_| {
        let region = Region {
            x: geometry.margin_px,
            y,
            width: geometry.content_width_px,
            height: footer_font_px * config.line_height * 2.0,
        };
        y += region.height;
        region
    });
    let footer = footer_text.as_ref().map(|_| {
        let height = footer_font_px * config.line_height * 2.0;
        bottom -= height;
        Region {
            x: geometry.margin_px,
            y: bottom,
            width: geometry.content_width_px,
            height,
        }
    });
    let body = Region {
        x: geometry.margin_px,
        y,
        width: geometry.content_width_px,
        height: (bottom - y).max(0.0),
    };

    PreviewLayout {
        geometry,
        body_font_px,
        line_px,
        header,
        body,
        footer,
        header_text,
        footer_text,
        blocks: layout_blocks(config, body_font_px, &page.content),
    }
}

fn footer_line(config: &PublishingConfig, page_number: usize) -> Option<String> {
    match (config.show_page_numbers, config.author.as_deref()) {
        (true, Some(author)) => Some(format!("{} · {}", author, page_number)),
        (true, None) => Some(page_number.to_string()),
        (false, Some(author)) => Some(author.to_string()),
        (false, None) => None,
    }
}

/// True when `content` contains a chapter heading.
pub fn opens_chapter(content: &str) -> bool {
    content.lines().any(|line| chapter_heading(line).is_some())
}

/// Turns source lines into typeset blocks. Blank lines separate nothing on
/// their own; every non-empty line is a paragraph. The drop cap is set only
/// on pages that open a chapter.
pub fn layout_blocks(config: &PublishingConfig, body_font_px: f32, content: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut drop_cap_pending = config.drop_cap && opens_chapter(content);

    for line in content.lines() {
        if let Some(style) = scene_divider(line) {
            let glyph = match config.scene_divider {
                SceneDividerStyle::MatchSource => style.glyph(),
                forced => forced.glyph(),
            };
            blocks.push(Block::SceneDivider { glyph, font_px: body_font_px });
            continue;
        }
        if let Some(title) = chapter_heading(line) {
            blocks.push(Block::ChapterHeading {
                text: title.to_string(),
                font_px: body_font_px * HEADING_SCALE,
            });
            continue;
        }

        let text = line.trim().trim_start_matches('#').trim();
        if text.is_empty() {
            continue;
        }

        if drop_cap_pending {
            drop_cap_pending = false;
            let mut chars = text.chars();
            if let Some(letter) = chars.next() {
                blocks.push(Block::DropCap {
                    letter,
                    font_px: body_font_px * config.line_height * DROP_CAP_LINES as f32,
                    lines: DROP_CAP_LINES,
                });
                blocks.push(Block::Paragraph {
                    text: chars.as_str().to_string(),
                    font_px: body_font_px,
                });
                continue;
            }
        }

        blocks.push(Block::Paragraph { text: text.to_string(), font_px: body_font_px });
    }

    blocks
}

/// Approximate number of characters that fit in the body box, for choosing a
/// pagination budget that matches the physical page.
pub fn estimate_page_budget(config: &PublishingConfig) -> usize {
    let geometry = compute_geometry(config.paper, config.margin, 1.0);
    let body_font_px = pt_to_px(config.font_size_pt, 1.0);
    let line_px = body_font_px * config.line_height;
    if body_font_px <= 0.0 || line_px <= 0.0 {
        return crate::utils::pagination::DEFAULT_PAGE_BUDGET;
    }
    let chars_per_line = (geometry.content_width_px / (body_font_px * AVG_GLYPH_WIDTH)).floor();
    // Reserve two lines for header and footer.
    let lines = ((geometry.content_height_px / line_px).floor() - 2.0).max(1.0);
    (chars_per_line * lines).max(1.0) as usize
}
