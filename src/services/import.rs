use anyhow::{bail, Context, Result};
use log::{info, warn};
use lopdf::Document;
use std::path::Path;

/// Reads a manuscript to seed a story. `.txt` and `.md` are taken as UTF-8;
/// `.pdf` text is extracted page by page and joined with blank lines.
pub async fn import_text(path: &Path) -> Result<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let text = match ext.as_str() {
        "txt" | "md" | "markdown" => {
            let bytes = tokio::fs::read(path).await.with_context(|| format!("Failed to read {:?}", path))?;
            String::from_utf8(bytes).with_context(|| format!("{:?} is not valid UTF-8", path))?
        }
        "pdf" => {
            let bytes = tokio::fs::read(path).await.with_context(|| format!("Failed to read {:?}", path))?;
            extract_pdf_text(&bytes)?
        }
        other => bail!("Unsupported file type: .{}", other),
    };
    info!("Imported {} characters from {:?}", text.chars().count(), path);
    Ok(text)
}

pub fn extract_pdf_text(bytes: &[u8]) -> Result<String> {
    let doc = Document::load_mem(bytes).context("Failed to parse PDF")?;
    let mut pages = Vec::new();
    for number in doc.get_pages().keys() {
        match doc.extract_text(&[*number]) {
            Ok(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    pages.push(text.to_string());
                }
            }
            Err(e) => warn!("Skipping PDF page {}: {}", number, e),
        }
    }
    if pages.is_empty() {
        bail!("No extractable text in PDF");
    }
    Ok(pages.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{HistoryItem, PublishingConfig, StoryConfig};
    use crate::services::export::build_pdf;

    #[tokio::test]
    async fn test_import_markdown() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("draft.md");
        std::fs::write(&path, "# Chapter 1\nIt began.")?;
        assert_eq!(import_text(&path).await?, "# Chapter 1\nIt began.");
        Ok(())
    }

    #[tokio::test]
    async fn test_import_rejects_unknown_and_invalid() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let doc = dir.path().join("draft.docx");
        std::fs::write(&doc, "x")?;
        assert!(import_text(&doc).await.is_err());

        let bad = dir.path().join("bad.txt");
        std::fs::write(&bad, [0xff, 0xfe, 0x00])?;
        assert!(import_text(&bad).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_import_pdf_from_export() -> Result<()> {
        let item = HistoryItem {
            id: "p".to_string(),
            timestamp: 0,
            title: "Lanterns".to_string(),
            excerpt: String::new(),
            content: "# Chapter 1: Lanterns\nThe lanterns were lit at dusk.".to_string(),
            config: StoryConfig::default(),
            lore: vec![],
            publishing: None,
        };
        let config = PublishingConfig { drop_cap: false, ..Default::default() };
        let mut doc = build_pdf(&item, &config)?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("lanterns.pdf");
        doc.save(&path)?;

        let text = import_text(&path).await?;
        assert!(text.contains("lanterns were lit"));
        Ok(())
    }

    #[test]
    fn test_garbage_pdf_is_an_error() {
        assert!(extract_pdf_text(b"not a pdf").is_err());
    }
}
