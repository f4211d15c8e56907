use anyhow::{anyhow, bail, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};

use crate::core::repository::ImageRepository;
use crate::core::state::{new_id, now_millis, AspectRatio, ImageHistoryItem, ImageMode};
use crate::services::batch::settle_at_least_one;
use crate::services::llm::LlmClient;
use crate::services::prompt;
use crate::utils::imaging::{apply_filters_to_data_uri, bytes_to_data_uri, split_data_uri, FilterSettings};
use base64::{engine::general_purpose, Engine as _};

pub struct ImageService<'a> {
    llm: &'a dyn LlmClient,
}

impl<'a> ImageService<'a> {
    pub fn new(llm: &'a dyn LlmClient) -> Self {
        Self { llm }
    }

    /// Requests `count` variations of one prompt at once. Succeeds when at
    /// least one image came back; every image is added to history.
    pub async fn generate_variations(
        &self,
        repo: &mut ImageRepository,
        prompt_text: &str,
        style: Option<&str>,
        aspect: AspectRatio,
        count: usize,
    ) -> Result<Vec<ImageHistoryItem>> {
        if prompt_text.trim().is_empty() {
            bail!("Image prompt is empty");
        }
        let enhanced = prompt::enhance_image_prompt(prompt_text, style);
        let count = count.max(1);
        info!("Generating {} variation(s) at {}", count, aspect);

        let tasks = (0..count).map(|_| self.llm.generate_image(&enhanced, aspect));
        let images = settle_at_least_one(tasks).await?;
        if images.len() < count {
            warn!("{} of {} variations failed", count - images.len(), count);
        }

        let mut items = Vec::with_capacity(images.len());
        for image_data in images {
            let item = ImageHistoryItem {
                id: new_id(),
                timestamp: now_millis(),
                prompt: prompt_text.trim().to_string(),
                image_data,
                mode: ImageMode::Create,
                aspect_ratio: aspect,
            };
            repo.insert(item.clone()).await;
            items.push(item);
        }
        Ok(items)
    }

    /// Applies a natural-language edit to `source` (a data URI).
    pub async fn edit(
        &self,
        repo: &mut ImageRepository,
        source: &str,
        instruction: &str,
        aspect: AspectRatio,
    ) -> Result<ImageHistoryItem> {
        if instruction.trim().is_empty() {
            bail!("Edit instruction is empty");
        }
        let image_data = self
            .llm
            .edit_image(&prompt::build_edit_prompt(instruction), source, aspect)
            .await?;
        let item = ImageHistoryItem {
            id: new_id(),
            timestamp: now_millis(),
            prompt: instruction.trim().to_string(),
            image_data,
            mode: ImageMode::Edit,
            aspect_ratio: aspect,
        };
        repo.insert(item.clone()).await;
        Ok(item)
    }
}

/// Bakes filters into a stored image and saves the result as a new entry.
pub async fn save_filtered(
    repo: &mut ImageRepository,
    id: &str,
    settings: FilterSettings,
) -> Result<ImageHistoryItem> {
    let source = repo.get(id).cloned().ok_or_else(|| anyhow!("Image {} not found", id))?;
    let image_data = apply_filters_to_data_uri(&source.image_data, settings)?;
    let item = ImageHistoryItem {
        id: new_id(),
        timestamp: now_millis(),
        image_data,
        ..source
    };
    repo.insert(item.clone()).await;
    Ok(item)
}

/// Reads an image file into a data URI for editing.
pub async fn load_image_file(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    let mime = match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("png") => "image/png",
        other => bail!("Unsupported image type: {:?}", other),
    };
    Ok(bytes_to_data_uri(mime, &bytes))
}

/// Decodes `data_uri` and writes it as `<folder>/<stem>.<ext>`.
pub async fn write_data_uri(data_uri: &str, folder: &Path, stem: &str) -> Result<PathBuf> {
    let (mime, payload) = split_data_uri(data_uri).ok_or_else(|| anyhow!("{} is not a data URI", stem))?;
    let ext = match mime {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    };
    let bytes = general_purpose::STANDARD.decode(payload)?;
    tokio::fs::create_dir_all(folder).await?;
    let path = folder.join(format!("{}.{}", stem, ext));
    tokio::fs::write(&path, bytes).await?;
    info!("Saved {:?}", path);
    Ok(path)
}

pub async fn download(item: &ImageHistoryItem, folder: &Path) -> Result<PathBuf> {
    write_data_uri(&item.image_data, folder, &format!("image-{}", item.id)).await
}
