use anyhow::{anyhow, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::config::Config;
use crate::core::io::Storage;
use crate::core::repository::{ImageRepository, StoryRepository};
use crate::core::state::{AspectRatio, HistoryItem, ImageHistoryItem, InfographicItem, PageData, PublishingConfig, StoryConfig};
use crate::services::chat::ChatSession;
use crate::services::image::{self, ImageService};
use crate::services::infographic::{self, InfographicService};
use crate::services::llm::{LlmClient, OnChunk};
use crate::services::story::{self, StoryService};
use crate::services::export;
use crate::utils::imaging::{FilterSettings, FontRenderer};
use crate::utils::pagination::paginate;
use crate::utils::print_layout::{estimate_page_budget, layout_preview, PreviewLayout};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Home,
    StoryWizard,
    StoryReader { id: String },
    PrintPreview { id: String },
    ImageStudio,
    Infographic,
    Chat,
    History,
}

impl View {
    /// The story this view is showing, if any.
    pub fn story_id(&self) -> Option<&str> {
        match self {
            View::StoryReader { id } | View::PrintPreview { id } => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Pdf,
    Html,
}

/// Everything the front end renders. Owned by one `AppController`.
pub struct AppState {
    view: View,
    back_stack: Vec<View>,
    pub stories: StoryRepository,
    pub images: ImageRepository,
    pub tiles: Vec<InfographicItem>,
    pub chat: ChatSession,
    pub page_index: usize,
    pub zoom: f32,
}

impl AppState {
    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn can_go_back(&self) -> bool {
        !self.back_stack.is_empty()
    }
}

pub struct AppController {
    config: Config,
    llm: Box<dyn LlmClient>,
    caption_font: Option<FontRenderer>,
    state: AppState,
}

impl AppController {
    pub async fn new(config: Config, llm: Box<dyn LlmClient>, storage: Arc<dyn Storage>) -> Self {
        let caption_font = config.studio.font_path.as_deref().and_then(|path| {
            FontRenderer::from_file(Path::new(path))
                .map_err(|e| warn!("Caption font unavailable, tiles will have no overlay: {:#}", e))
                .ok()
        });
        let state = AppState {
            view: View::Home,
            back_stack: Vec::new(),
            stories: StoryRepository::stories(storage.clone()).await,
            images: ImageRepository::images(storage).await,
            tiles: Vec::new(),
            chat: ChatSession::new(),
            page_index: 0,
            zoom: 1.0,
        };
        Self { config, llm, caption_font, state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn view(&self) -> &View {
        &self.state.view
    }

    pub fn navigate(&mut self, view: View) {
        if view == self.state.view {
            return;
        }
        if view == View::Home {
            self.state.back_stack.clear();
        } else {
            let previous = std::mem::replace(&mut self.state.view, View::Home);
            self.state.back_stack.push(previous);
        }
        if view.story_id().is_some() {
            self.state.page_index = 0;
        }
        self.state.view = view;
    }

    /// Returns to the previous view. False when already at the root.
    pub fn back(&mut self) -> bool {
        match self.state.back_stack.pop() {
            Some(view) => {
                self.state.view = view;
                true
            }
            None => false,
        }
    }

    pub fn open_story(&mut self, id: &str) -> Result<()> {
        if self.state.stories.get(id).is_none() {
            return Err(anyhow!("Story {} not found", id));
        }
        self.navigate(View::StoryReader { id: id.to_string() });
        Ok(())
    }

    pub fn story(&self, id: &str) -> Result<&HistoryItem> {
        self.state.stories.get(id).ok_or_else(|| anyhow!("Story {} not found", id))
    }

    pub async fn create_story(
        &mut self,
        config: StoryConfig,
        on_chunk: &mut OnChunk<'_>,
    ) -> Result<HistoryItem> {
        let item = StoryService::new(self.llm.as_ref())
            .write_story(&mut self.state.stories, config, on_chunk)
            .await?;
        self.navigate(View::StoryReader { id: item.id.clone() });
        Ok(item)
    }

    pub async fn continue_story(
        &mut self,
        id: &str,
        direction: &str,
        on_chunk: &mut OnChunk<'_>,
    ) -> Result<HistoryItem> {
        StoryService::new(self.llm.as_ref())
            .continue_story(&mut self.state.stories, id, direction, on_chunk)
            .await
    }

    pub async fn rewrite_passage(&self, passage: &str, instruction: &str) -> String {
        StoryService::new(self.llm.as_ref()).rewrite_passage(passage, instruction).await
    }

    pub async fn save_story_text(&mut self, id: &str, content: String) -> Result<()> {
        story::save_edit(&mut self.state.stories, id, content).await
    }

    /// Removes a story. When it is on screen, or anywhere in the back stack,
    /// those views are dropped and the shell returns home.
    pub async fn delete_story(&mut self, id: &str) -> bool {
        if !self.state.stories.delete(id).await {
            return false;
        }
        self.state.back_stack.retain(|v| v.story_id() != Some(id));
        if self.state.view.story_id() == Some(id) {
            self.navigate(View::Home);
        }
        info!("Deleted story {}", id);
        true
    }

    /// Pages for on-screen reading, using the configured page budget.
    pub fn reader_pages(&self, id: &str) -> Result<Vec<PageData>> {
        Ok(paginate(&self.story(id)?.content, self.config.studio.page_budget))
    }

    pub fn publishing_for(&self, id: &str) -> Result<PublishingConfig> {
        let item = self.story(id)?;
        Ok(item.publishing.clone().unwrap_or_else(|| self.config.publishing.clone()))
    }

    pub async fn set_publishing(&mut self, id: &str, publishing: PublishingConfig) -> Result<()> {
        story::save_publishing(&mut self.state.stories, id, publishing).await
    }

    /// Pages sized to the story's paper, for the print preview and export.
    pub fn print_pages(&self, id: &str) -> Result<Vec<PageData>> {
        let publishing = self.publishing_for(id)?;
        Ok(paginate(&self.story(id)?.content, estimate_page_budget(&publishing)))
    }

    pub fn preview(&self, id: &str, page_index: usize) -> Result<PreviewLayout> {
        let publishing = self.publishing_for(id)?;
        let pages = self.print_pages(id)?;
        let last = pages.len().saturating_sub(1);
        let page = &pages[page_index.min(last)];
        Ok(layout_preview(&publishing, self.state.zoom, page))
    }

    pub fn set_page(&mut self, index: usize) {
        self.state.page_index = index;
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.state.zoom = zoom.clamp(0.25, 4.0);
    }

    pub fn export_story(&self, id: &str, format: ExportFormat) -> Result<PathBuf> {
        let item = self.story(id)?;
        let publishing = self.publishing_for(id)?;
        let folder = Path::new(&self.config.output_folder);
        match format {
            ExportFormat::Pdf => export::export_pdf(item, &publishing, folder),
            ExportFormat::Html => export::export_html(item, &publishing, folder),
        }
    }

    pub async fn generate_images(
        &mut self,
        prompt: &str,
        style: Option<&str>,
        aspect: AspectRatio,
    ) -> Result<Vec<ImageHistoryItem>> {
        let count = self.config.studio.image_variations;
        ImageService::new(self.llm.as_ref())
            .generate_variations(&mut self.state.images, prompt, style, aspect, count)
            .await
    }

    pub async fn edit_image(&mut self, source: &str, instruction: &str, aspect: AspectRatio) -> Result<ImageHistoryItem> {
        ImageService::new(self.llm.as_ref())
            .edit(&mut self.state.images, source, instruction, aspect)
            .await
    }

    pub async fn filter_image(&mut self, id: &str, settings: FilterSettings) -> Result<ImageHistoryItem> {
        image::save_filtered(&mut self.state.images, id, settings).await
    }

    pub async fn delete_image(&mut self, id: &str) -> bool {
        self.state.images.delete(id).await
    }

    pub async fn download_image(&self, id: &str) -> Result<PathBuf> {
        let item = self.state.images.get(id).ok_or_else(|| anyhow!("Image {} not found", id))?;
        image::download(item, Path::new(&self.config.output_folder)).await
    }

    /// Replaces the current tiles with a fresh set built from `source` and
    /// illustrates them. Returns how many tiles finished.
    pub async fn build_infographic(&mut self, source: &str, tile_count: usize, aspect: AspectRatio) -> Result<usize> {
        let service = InfographicService::new(self.llm.as_ref());
        self.state.tiles = service.extract_tiles(source, tile_count, aspect).await?;
        Ok(service.render_tiles(&mut self.state.tiles, self.caption_font.as_ref()).await)
    }

    /// Requests images again for tiles that are not done.
    pub async fn retry_tiles(&mut self) -> usize {
        InfographicService::new(self.llm.as_ref())
            .render_tiles(&mut self.state.tiles, self.caption_font.as_ref())
            .await
    }

    pub async fn save_tiles(&self) -> Result<Vec<PathBuf>> {
        infographic::save_tiles(&self.state.tiles, &Path::new(&self.config.output_folder).join("infographic")).await
    }

    pub async fn send_chat(&mut self, text: &str, on_chunk: &mut OnChunk<'_>) -> Result<String> {
        self.state.chat.send(self.llm.as_ref(), text, on_chunk).await
    }

    pub fn clear_chat(&mut self) {
        self.state.chat.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::MemoryStorage;
    use crate::core::state::TileStatus;
    use crate::utils::imaging::encode_png_data_uri;
    use async_trait::async_trait;
    use ::image::{Rgba, RgbaImage};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct MockLlmClient {
        calls: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn chat(&self, _system: &str, user: &str) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            if user.contains("Suggest one evocative title") {
                return Ok("Glass Harbor".to_string());
            }
            let mut story = String::from("# Chapter 1: Arrival\n");
            for i in 0..60 {
                story.push_str(&format!("Line {} of a long voyage across the glass harbor at night.\n", i));
            }
            Ok(story)
        }

        async fn generate_json(&self, _system: &str, _user: &str, _schema: &Value) -> Result<Value> {
            Ok(json!({ "tiles": [{ "title": "A", "summary": "B", "visualPrompt": "C" }] }))
        }

        async fn generate_image(&self, _prompt: &str, _aspect: AspectRatio) -> Result<String> {
            encode_png_data_uri(&RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255])))
        }
    }

    fn config(output: &Path) -> Config {
        let mut config = Config::from_yaml("llm:\n  provider: gemini\n").unwrap();
        config.output_folder = output.to_string_lossy().to_string();
        config.studio.image_variations = 2;
        config
    }

    async fn controller(output: &Path) -> AppController {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        AppController::new(config(output), Box::new(MockLlmClient::default()), storage).await
    }

    #[tokio::test]
    async fn test_navigation_stack() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = controller(dir.path()).await;
        assert_eq!(app.view(), &View::Home);
        assert!(!app.back());

        app.navigate(View::History);
        app.navigate(View::Chat);
        app.navigate(View::Chat);
        assert!(app.back());
        assert_eq!(app.view(), &View::History);
        assert!(app.back());
        assert_eq!(app.view(), &View::Home);

        app.navigate(View::ImageStudio);
        app.navigate(View::Home);
        assert!(!app.state().can_go_back());
    }

    #[tokio::test]
    async fn test_create_story_opens_reader_and_paginates() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut app = controller(dir.path()).await;
        app.navigate(View::StoryWizard);

        let item = app.create_story(StoryConfig::default(), &mut |_| {}).await?;
        assert_eq!(item.title, "Glass Harbor");
        assert_eq!(app.view(), &View::StoryReader { id: item.id.clone() });

        let pages = app.reader_pages(&item.id)?;
        assert!(pages.len() > 1);
        assert!(pages.iter().all(|p| p.chapter_title == "Chapter 1: Arrival"));

        let preview = app.preview(&item.id, 999)?;
        assert_eq!(preview.geometry.page_width_px, 576.0);
        assert_eq!(preview.footer_text.as_deref(), Some(app.print_pages(&item.id)?.len().to_string().as_str()));
        Ok(())
    }

    #[tokio::test]
    async fn test_deleting_viewed_story_returns_home() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut app = controller(dir.path()).await;
        let item = app.create_story(StoryConfig::default(), &mut |_| {}).await?;
        app.navigate(View::PrintPreview { id: item.id.clone() });

        assert!(app.delete_story(&item.id).await);
        assert_eq!(app.view(), &View::Home);
        assert!(!app.back());
        assert!(app.open_story(&item.id).is_err());
        assert!(!app.delete_story(&item.id).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_deleting_other_story_keeps_view() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut app = controller(dir.path()).await;
        let first = app.create_story(StoryConfig::default(), &mut |_| {}).await?;
        let second = app.create_story(StoryConfig::default(), &mut |_| {}).await?;

        assert!(app.delete_story(&first.id).await);
        assert_eq!(app.view(), &View::StoryReader { id: second.id.clone() });
        Ok(())
    }

    #[tokio::test]
    async fn test_publishing_override_and_export() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut app = controller(dir.path()).await;
        let item = app.create_story(StoryConfig::default(), &mut |_| {}).await?;

        let custom = PublishingConfig { author: Some("R. Vale".to_string()), ..Default::default() };
        app.set_publishing(&item.id, custom.clone()).await?;
        assert_eq!(app.publishing_for(&item.id)?, custom);

        let pdf = app.export_story(&item.id, ExportFormat::Pdf)?;
        let html = app.export_story(&item.id, ExportFormat::Html)?;
        assert!(pdf.exists() && html.exists());
        assert!(std::fs::read_to_string(html)?.contains("R. Vale"));
        Ok(())
    }

    #[tokio::test]
    async fn test_images_and_tiles() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut app = controller(dir.path()).await;

        let images = app.generate_images("a harbor", None, AspectRatio::Wide).await?;
        assert_eq!(images.len(), 2);
        assert_eq!(app.state().images.len(), 2);
        assert!(app.download_image(&images[0].id).await?.exists());
        assert!(app.delete_image(&images[0].id).await);

        let done = app.build_infographic("source text", 1, AspectRatio::Square).await?;
        assert_eq!(done, 1);
        assert_eq!(app.state().tiles[0].status, TileStatus::Done);
        assert_eq!(app.save_tiles().await?.len(), 1);
        Ok(())
    }
}
