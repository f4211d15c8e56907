use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::print_layout::{MarginPreset, PaperPreset, SceneDividerStyle};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoryLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl StoryLength {
    pub fn word_target(&self) -> &'static str {
        match self {
            StoryLength::Short => "about 1,000 words",
            StoryLength::Medium => "about 3,000 words",
            StoryLength::Long => "about 6,000 words",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum LoreKind {
    Character,
    Location,
    Item,
    Rule,
}

impl fmt::Display for LoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoreKind::Character => "Character",
            LoreKind::Location => "Location",
            LoreKind::Item => "Item",
            LoreKind::Rule => "Rule",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LoreEntry {
    pub id: String,
    pub kind: LoreKind,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoryConfig {
    pub premise: String,
    #[serde(default = "default_genre")]
    pub genre: String,
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default = "default_style")]
    pub style: String,
    #[serde(default = "default_audience")]
    pub audience: String,
    #[serde(default)]
    pub length: StoryLength,
    #[serde(default = "default_chapter_count")]
    pub chapter_count: u32,
    #[serde(default)]
    pub constraints: String,
    #[serde(default)]
    pub existing_content: Option<String>,
    #[serde(default)]
    pub lore: Option<Vec<LoreEntry>>,
}

fn default_genre() -> String {
    "Fantasy".to_string()
}
fn default_tone() -> String {
    "Whimsical".to_string()
}
fn default_style() -> String {
    "Descriptive".to_string()
}
fn default_audience() -> String {
    "Adults".to_string()
}
fn default_chapter_count() -> u32 {
    3
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            premise: String::new(),
            genre: default_genre(),
            tone: default_tone(),
            style: default_style(),
            audience: default_audience(),
            length: StoryLength::default(),
            chapter_count: default_chapter_count(),
            constraints: String::new(),
            existing_content: None,
            lore: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublishingConfig {
    #[serde(default)]
    pub paper: PaperPreset,
    #[serde(default)]
    pub margin: MarginPreset,
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default = "default_font_size")]
    pub font_size_pt: f32,
    #[serde(default = "default_line_height")]
    pub line_height: f32,
    #[serde(default = "default_true")]
    pub drop_cap: bool,
    #[serde(default)]
    pub scene_divider: SceneDividerStyle,
    #[serde(default = "default_true")]
    pub show_header: bool,
    #[serde(default = "default_true")]
    pub show_page_numbers: bool,
    #[serde(default)]
    pub author: Option<String>,
}

fn default_font_family() -> String {
    "Times".to_string()
}
fn default_font_size() -> f32 {
    11.0
}
fn default_line_height() -> f32 {
    1.5
}
fn default_true() -> bool {
    true
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            paper: PaperPreset::default(),
            margin: MarginPreset::default(),
            font_family: default_font_family(),
            font_size_pt: default_font_size(),
            line_height: default_line_height(),
            drop_cap: true,
            scene_divider: SceneDividerStyle::default(),
            show_header: true,
            show_page_numbers: true,
            author: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: String,
    pub timestamp: i64,
    pub title: String,
    pub excerpt: String,
    pub content: String,
    pub config: StoryConfig,
    #[serde(default)]
    pub lore: Vec<LoreEntry>,
    #[serde(default)]
    pub publishing: Option<PublishingConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageMode {
    Create,
    Edit,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "9:16")]
    Tall,
    #[serde(rename = "16:9")]
    Wide,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Portrait,
        AspectRatio::Landscape,
        AspectRatio::Tall,
        AspectRatio::Wide,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "3:4",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Tall => "9:16",
            AspectRatio::Wide => "16:9",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == s.trim())
    }

    pub fn is_vertical(&self) -> bool {
        matches!(self, AspectRatio::Portrait | AspectRatio::Tall)
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageHistoryItem {
    pub id: String,
    pub timestamp: i64,
    pub prompt: String,
    /// `data:image/png;base64,...`
    pub image_data: String,
    pub mode: ImageMode,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TileStatus {
    #[default]
    Pending,
    Generating,
    Done,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartData {
    #[serde(default = "default_chart_kind")]
    pub kind: String,
    #[serde(default)]
    pub points: Vec<ChartPoint>,
}

fn default_chart_kind() -> String {
    "bar".to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct InfographicItem {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub visual_prompt: String,
    pub status: TileStatus,
    pub image_data: Option<String>,
    pub aspect_ratio: AspectRatio,
    pub chart: Option<ChartData>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageData {
    pub content: String,
    pub chapter_title: String,
    pub page_number: usize,
}

pub fn new_id() -> String {
    let suffix: u32 = rand::random();
    format!("{:x}-{:08x}", now_millis(), suffix)
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
