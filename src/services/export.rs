use anyhow::{Context, Result};
use log::info;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::path::{Path, PathBuf};

use crate::core::state::{HistoryItem, PublishingConfig};
use crate::utils::imaging::{wrap_words, MonospaceMeasure};
use crate::utils::pagination::{chapter_heading, paginate};
use crate::utils::print_layout::{
    estimate_page_budget, inches_to_pt, layout_blocks, scene_divider, Block, SceneDividerStyle,
};

// Times-Roman averages roughly half an em per glyph.
const TIMES_ADVANCE: f32 = 0.5;
const HEADER_SCALE: f32 = 0.75;

/// Maps text onto WinAnsiEncoding, the encoding of the built-in PDF fonts.
fn to_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{2026}' => 0x85,
            c if (c as u32) < 0x80 || (0xA0..=0xFF).contains(&(c as u32)) => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

fn encodable(text: &str) -> bool {
    !to_win_ansi(text).contains(&b'?') || text.contains('?')
}

fn safe_file_stem(title: &str) -> String {
    let stem: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        "story".to_string()
    } else {
        stem.to_string()
    }
}

/// Accumulates text operations for one PDF page.
struct PageWriter {
    ops: Vec<Operation>,
    cursor: f32,
}

impl PageWriter {
    fn new() -> Self {
        Self { ops: Vec::new(), cursor: 0.0 }
    }

    fn text(&mut self, x: f32, baseline: f32, size: f32, text: &str) {
        self.ops.push(Operation::new("BT", vec![]));
        self.ops.push(Operation::new("Tf", vec!["F1".into(), size.into()]));
        self.ops.push(Operation::new("Td", vec![x.into(), baseline.into()]));
        self.ops.push(Operation::new("Tj", vec![Object::string_literal(to_win_ansi(text))]));
        self.ops.push(Operation::new("ET", vec![]));
    }
}

struct PdfLayout {
    width: f32,
    height: f32,
    margin: f32,
    content_width: f32,
    font_size: f32,
    line: f32,
}

impl PdfLayout {
    fn new(config: &PublishingConfig) -> Self {
        let (w_in, h_in) = config.paper.dimensions_in();
        let margin = inches_to_pt(config.margin.inches());
        let width = inches_to_pt(w_in);
        Self {
            width,
            height: inches_to_pt(h_in),
            margin,
            content_width: (width - 2.0 * margin).max(1.0),
            font_size: config.font_size_pt,
            line: config.font_size_pt * config.line_height,
        }
    }

    fn body_top(&self) -> f32 {
        self.margin + self.line * 2.0
    }

    fn body_bottom(&self) -> f32 {
        self.height - self.margin - self.line * 2.0
    }

    fn centered_x(&self, text: &str, size: f32) -> f32 {
        let width = text.chars().count() as f32 * size * TIMES_ADVANCE;
        self.margin + ((self.content_width - width) / 2.0).max(0.0)
    }
}

/// Typesets `item` into a paginated PDF document.
pub fn build_pdf(item: &HistoryItem, config: &PublishingConfig) -> Result<Document> {
    let layout = PdfLayout::new(config);
    let measure = MonospaceMeasure { advance: TIMES_ADVANCE };
    let pages = paginate(&item.content, estimate_page_budget(config));

    let mut sheets: Vec<(PageWriter, String)> = Vec::new();
    for page in &pages {
        let mut writer = PageWriter::new();
        writer.cursor = layout.body_top();
        let mut indent_lines = 0u32;
        let mut indent = 0.0f32;

        for block in layout_blocks(config, layout.font_size, &page.content) {
            match block {
                Block::ChapterHeading { text, font_px } => {
                    writer.cursor += font_px;
                    for line in wrap_words(&text, layout.content_width, font_px, &measure) {
                        let x = layout.centered_x(&line, font_px);
                        writer.text(x, layout.height - writer.cursor, font_px, &line);
                        writer.cursor += font_px * 1.2;
                    }
                    writer.cursor += layout.line;
                }
                Block::SceneDivider { glyph, font_px } => {
                    let glyph = if encodable(glyph) { glyph } else { SceneDividerStyle::Asterisks.glyph() };
                    writer.cursor += layout.line;
                    writer.text(layout.centered_x(glyph, font_px), layout.height - writer.cursor, font_px, glyph);
                    writer.cursor += layout.line;
                }
                Block::DropCap { letter, font_px, lines } => {
                    let letter = letter.to_string();
                    let baseline = writer.cursor + layout.line * lines as f32;
                    writer.text(layout.margin, layout.height - baseline + layout.line * 0.2, font_px, &letter);
                    indent = font_px * 0.7;
                    indent_lines = lines;
                }
                Block::Paragraph { text, font_px } => {
                    let width = layout.content_width - if indent_lines > 0 { indent } else { 0.0 };
                    for line in wrap_words(&text, width, font_px, &measure) {
                        if writer.cursor + layout.line > layout.body_bottom() {
                            let full = std::mem::replace(&mut writer, PageWriter::new());
                            sheets.push((full, page.chapter_title.clone()));
                            writer.cursor = layout.body_top();
                        }
                        let x = layout.margin + if indent_lines > 0 { indent } else { 0.0 };
                        writer.cursor += layout.line;
                        writer.text(x, layout.height - writer.cursor, font_px, &line);
                        indent_lines = indent_lines.saturating_sub(1);
                    }
                    writer.cursor += layout.line * 0.25;
                }
            }
        }
        sheets.push((writer, page.chapter_title.clone()));
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Times-Roman",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let total = sheets.len();
    let mut kids: Vec<Object> = Vec::with_capacity(total);
    for (i, (mut sheet, title)) in sheets.into_iter().enumerate() {
        let number = i + 1;
        let footer_size = layout.font_size * HEADER_SCALE;
        if config.show_header && !title.is_empty() {
            let baseline = layout.height - layout.margin - footer_size;
            sheet.text(layout.centered_x(&title, footer_size), baseline, footer_size, &title);
        }
        let footer = match (config.show_page_numbers, config.author.as_deref()) {
            (true, Some(author)) => Some(format!("{} - {}", author, number)),
            (true, None) => Some(number.to_string()),
            (false, Some(author)) => Some(author.to_string()),
            (false, None) => None,
        };
        if let Some(footer) = footer {
            sheet.text(layout.centered_x(&footer, footer_size), layout.margin, footer_size, &footer);
        }

        let content = Content { operations: sheet.ops };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id: ObjectId = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => total as i64,
        "MediaBox" => vec![0.into(), 0.into(), layout.width.into(), layout.height.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(to_win_ansi(&item.title)),
        "Producer" => Object::string_literal("storyforge"),
    });
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);
    doc.compress();
    Ok(doc)
}

pub fn export_pdf(item: &HistoryItem, config: &PublishingConfig, folder: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(folder)?;
    let path = folder.join(format!("{}.pdf", safe_file_stem(&item.title)));
    let mut doc = build_pdf(item, config)?;
    doc.save(&path).with_context(|| format!("Failed to write {:?}", path))?;
    info!("Exported PDF {:?}", path);
    Ok(path)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Renders the whole story as one self-contained HTML page.
pub fn build_html(item: &HistoryItem, config: &PublishingConfig) -> String {
    let (w_in, h_in) = config.paper.dimensions_in();
    let mut body = String::new();
    let mut first_paragraph = config.drop_cap;
    for line in item.content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(style) = scene_divider(trimmed) {
            let glyph = match config.scene_divider {
                SceneDividerStyle::MatchSource => style.glyph(),
                forced => forced.glyph(),
            };
            body.push_str(&format!("<p class=\"divider\">{}</p>\n", glyph));
        } else if let Some(title) = chapter_heading(trimmed) {
            body.push_str(&format!("<h2>{}</h2>\n", escape_html(title)));
            first_paragraph = config.drop_cap;
        } else {
            let text = escape_html(trimmed.trim_start_matches('#').trim());
            if first_paragraph {
                body.push_str(&format!("<p class=\"opening\">{}</p>\n", text));
                first_paragraph = false;
            } else {
                body.push_str(&format!("<p>{}</p>\n", text));
            }
        }
    }

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n<style>\n\
@page {{ size: {w}in {h}in; margin: {m}in; }}\n\
body {{ font-family: {font}, serif; font-size: {size}pt; line-height: {lh}; max-width: {cw}in; margin: 0 auto; }}\n\
h1, h2 {{ text-align: center; }}\n\
p {{ text-indent: 1.5em; margin: 0; text-align: justify; }}\n\
p.divider {{ text-align: center; text-indent: 0; margin: 1em 0; }}\n\
p.opening::first-letter {{ float: left; font-size: {cap}em; line-height: 1; padding-right: 0.08em; }}\n\
</style>\n</head>\n<body>\n<h1>{title}</h1>\n{byline}{body}</body>\n</html>\n",
        title = escape_html(&item.title),
        w = w_in,
        h = h_in,
        m = config.margin.inches(),
        font = escape_html(&config.font_family),
        size = config.font_size_pt,
        lh = config.line_height,
        cw = w_in - 2.0 * config.margin.inches(),
        cap = config.line_height * 3.0,
        byline = config
            .author
            .as_deref()
            .map(|a| format!("<p class=\"divider\">{}</p>\n", escape_html(a)))
            .unwrap_or_default(),
        body = body,
    )
}

pub fn export_html(item: &HistoryItem, config: &PublishingConfig, folder: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(folder)?;
    let path = folder.join(format!("{}.html", safe_file_stem(&item.title)));
    std::fs::write(&path, build_html(item, config)).with_context(|| format!("Failed to write {:?}", path))?;
    info!("Exported HTML {:?}", path);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::StoryConfig;
    use crate::utils::print_layout::PaperPreset;

    fn story(content: &str) -> HistoryItem {
        HistoryItem {
            id: "s1".to_string(),
            timestamp: 0,
            title: "The Salt Road".to_string(),
            excerpt: String::new(),
            content: content.to_string(),
            config: StoryConfig::default(),
            lore: vec![],
            publishing: None,
        }
    }

    fn long_story() -> String {
        let para = "The caravan moved at dawn across the white flats, and nobody spoke of the night before. ";
        let mut s = String::from("# Chapter 1: Salt\n");
        for _ in 0..40 {
            s.push_str(&para.repeat(3));
            s.push('\n');
        }
        s.push_str("***\n# Chapter 2: Water\nRain, at last.\n");
        s
    }

    #[test]
    fn test_win_ansi_mapping() {
        assert_eq!(to_win_ansi("a\u{2014}b"), vec![b'a', 0x97, b'b']);
        assert_eq!(to_win_ansi("é"), vec![0xE9]);
        assert_eq!(to_win_ansi("❦"), vec![b'?']);
        assert!(!encodable("❦"));
        assert!(encodable("———"));
    }

    #[test]
    fn test_pdf_page_size_and_count() -> Result<()> {
        let config = PublishingConfig { paper: PaperPreset::Trade, ..Default::default() };
        let mut doc = build_pdf(&story(&long_story()), &config)?;
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)?;

        let loaded = Document::load_mem(&bytes)?;
        let pages = loaded.get_pages();
        assert!(pages.len() >= 3);

        let pages_id = loaded.catalog()?.get(b"Pages")?.as_reference()?;
        let media_box = loaded.get_object(pages_id)?.as_dict()?.get(b"MediaBox")?.as_array()?;
        assert_eq!(media_box[2].as_float()?, 432.0);
        assert_eq!(media_box[3].as_float()?, 648.0);
        Ok(())
    }

    #[test]
    fn test_empty_story_still_has_one_page() -> Result<()> {
        let doc = build_pdf(&story(""), &PublishingConfig::default())?;
        assert_eq!(doc.get_pages().len(), 1);
        Ok(())
    }

    #[test]
    fn test_html_export_structure() {
        let html = build_html(
            &story("# Chapter 1: A & B\nFirst <line>.\n~~~\nSecond."),
            &PublishingConfig::default(),
        );
        assert!(html.contains("<h1>The Salt Road</h1>"));
        assert!(html.contains("<h2>Chapter 1: A &amp; B</h2>"));
        assert!(html.contains("<p class=\"opening\">First &lt;line&gt;.</p>"));
        assert!(html.contains("<p class=\"divider\">❦</p>"));
        assert!(html.contains("<p>Second.</p>"));
        assert!(html.contains("size: 6in 9in"));
    }

    #[test]
    fn test_export_writes_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let item = story("# One\nHello.");
        let pdf = export_pdf(&item, &PublishingConfig::default(), dir.path())?;
        let html = export_html(&item, &PublishingConfig::default(), dir.path())?;
        assert!(pdf.ends_with("The_Salt_Road.pdf"));
        assert!(std::fs::read(&pdf)?.starts_with(b"%PDF-1.5"));
        assert!(html.exists());
        Ok(())
    }

    #[test]
    fn test_safe_file_stem() {
        assert_eq!(safe_file_stem("A/B: c?"), "A_B__c");
        assert_eq!(safe_file_stem("???"), "story");
    }
}
