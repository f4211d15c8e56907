use anyhow::{anyhow, bail, Result};
use log::{error, info, warn};

use crate::core::repository::StoryRepository;
use crate::core::state::{new_id, now_millis, HistoryItem, PublishingConfig, StoryConfig};
use crate::services::llm::{LlmClient, OnChunk};
use crate::services::prompt;
use crate::utils::pagination::chapter_heading;
use crate::utils::print_layout::scene_divider;

pub const EXCERPT_CHARS: usize = 150;
pub const UNTITLED: &str = "Untitled Story";

/// First prose of the story, skipping headings and scene breaks.
pub fn excerpt(content: &str) -> String {
    let body = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && scene_divider(l).is_none())
        .collect::<Vec<_>>()
        .join(" ");
    if body.chars().count() <= EXCERPT_CHARS {
        return body;
    }
    let cut: String = body.chars().take(EXCERPT_CHARS).collect();
    format!("{}...", cut.trim_end())
}

/// Cleans a model-suggested title: first line, no heading marks or quotes.
pub fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let title = line
        .trim_start_matches('#')
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '*')
        .trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

pub struct StoryService<'a> {
    llm: &'a dyn LlmClient,
}

impl<'a> StoryService<'a> {
    pub fn new(llm: &'a dyn LlmClient) -> Self {
        Self { llm }
    }

    /// Streams a new story from the wizard answers.
    pub async fn generate(&self, config: &StoryConfig, on_chunk: &mut OnChunk<'_>) -> Result<String> {
        let user = prompt::build_story_prompt(config);
        let content = self
            .llm
            .stream_chat(prompt::STORY_SYSTEM_PROMPT, &user, on_chunk)
            .await
            .map_err(|e| {
                error!("Story generation failed: {:#}", e);
                e
            })?;
        if content.trim().is_empty() {
            bail!("The model returned an empty story");
        }
        Ok(content)
    }

    /// Asks the model for a title, falling back to the first chapter heading.
    pub async fn suggest_title(&self, content: &str) -> String {
        match self.llm.chat(prompt::EDITOR_SYSTEM_PROMPT, &prompt::build_title_prompt(content)).await {
            Ok(raw) => {
                if let Some(title) = clean_title(&raw) {
                    return title;
                }
            }
            Err(e) => warn!("Title generation failed: {:#}", e),
        }
        content
            .lines()
            .find_map(chapter_heading)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| UNTITLED.to_string())
    }

    /// Generates a story and records it in history.
    pub async fn write_story(
        &self,
        repo: &mut StoryRepository,
        config: StoryConfig,
        on_chunk: &mut OnChunk<'_>,
    ) -> Result<HistoryItem> {
        let content = self.generate(&config, on_chunk).await?;
        let title = self.suggest_title(&content).await;
        let item = HistoryItem {
            id: new_id(),
            timestamp: now_millis(),
            title,
            excerpt: excerpt(&content),
            lore: config.lore.clone().unwrap_or_default(),
            content,
            config,
            publishing: None,
        };
        info!("Saved story '{}' ({})", item.title, item.id);
        repo.insert(item.clone()).await;
        Ok(item)
    }

    /// Streams the next chapter and appends it to the stored story in place.
    pub async fn continue_story(
        &self,
        repo: &mut StoryRepository,
        id: &str,
        direction: &str,
        on_chunk: &mut OnChunk<'_>,
    ) -> Result<HistoryItem> {
        let item = repo.get(id).cloned().ok_or_else(|| anyhow!("Story {} not found", id))?;
        let user = prompt::build_continuation_prompt(&item, direction);
        let addition = self
            .llm
            .stream_chat(prompt::STORY_SYSTEM_PROMPT, &user, on_chunk)
            .await
            .map_err(|e| {
                error!("Story continuation failed: {:#}", e);
                e
            })?;

        let mut updated = item;
        updated.content = format!("{}\n\n{}", updated.content.trim_end(), addition.trim());
        updated.excerpt = excerpt(&updated.content);
        updated.timestamp = now_millis();
        repo.upsert(updated.clone()).await;
        Ok(updated)
    }

    /// Rewrites `passage`; any failure returns the passage unchanged.
    pub async fn rewrite_passage(&self, passage: &str, instruction: &str) -> String {
        let user = prompt::build_rewrite_prompt(passage, instruction);
        match self.llm.chat(prompt::EDITOR_SYSTEM_PROMPT, &user).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!("Rewrite returned empty text; keeping original");
                passage.to_string()
            }
            Err(e) => {
                warn!("Rewrite failed: {:#}", e);
                passage.to_string()
            }
        }
    }
}

/// Replaces a story's text after a manual edit.
pub async fn save_edit(repo: &mut StoryRepository, id: &str, content: String) -> Result<()> {
    let found = repo
        .update(id, |item| {
            item.excerpt = excerpt(&content);
            item.content = content;
            item.timestamp = now_millis();
        })
        .await;
    if !found {
        bail!("Story {} not found", id);
    }
    Ok(())
}

pub async fn save_publishing(repo: &mut StoryRepository, id: &str, publishing: PublishingConfig) -> Result<()> {
    if !repo.update(id, |item| item.publishing = Some(publishing)).await {
        bail!("Story {} not found", id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::{MemoryStorage, Storage};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct MockLlmClient {
        calls: Arc<Mutex<Vec<String>>>,
        fail_chat: bool,
    }

    impl MockLlmClient {
        fn new(fail_chat: bool) -> Self {
            Self { calls: Arc::new(Mutex::new(Vec::new())), fail_chat }
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn chat(&self, _system: &str, user: &str) -> Result<String> {
            self.calls.lock().unwrap().push(user.to_string());
            if self.fail_chat {
                return Err(anyhow!("503 Service Unavailable"));
            }
            if user.contains("Suggest one evocative title") {
                return Ok("\"The Tidewright\"\n".to_string());
            }
            if user.contains("Rewrite the passage") {
                return Ok("A sharper sentence.".to_string());
            }
            Ok("# Chapter 1: Salt\nThe sea kept its secrets.\n***\nMorning came.".to_string())
        }

        async fn stream_chat(
            &self,
            system: &str,
            user: &str,
            on_chunk: &mut OnChunk<'_>,
        ) -> Result<String> {
            let text = "# Chapter 1: Salt\nThe sea kept its secrets.".to_string();
            let _ = system;
            self.calls.lock().unwrap().push(user.to_string());
            for piece in text.split_inclusive(' ') {
                on_chunk(piece);
            }
            Ok(text)
        }
    }

    #[test]
    fn test_excerpt_skips_headings_and_dividers() {
        let content = "# Chapter 1: Salt\n\nThe sea kept its secrets.\n***\nMorning came.";
        assert_eq!(excerpt(content), "The sea kept its secrets. Morning came.");
        let long = format!("# T\n{}", "word ".repeat(100));
        let e = excerpt(&long);
        assert!(e.ends_with("..."));
        assert!(e.chars().count() <= EXCERPT_CHARS + 3);
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("\n\"The Tidewright\"\nextra"), Some("The Tidewright".to_string()));
        assert_eq!(clean_title("# **Ashes**"), Some("Ashes".to_string()));
        assert_eq!(clean_title("   "), None);
    }

    #[tokio::test]
    async fn test_write_story_streams_and_saves() -> Result<()> {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut repo = StoryRepository::stories(storage).await;
        let llm = MockLlmClient::new(false);
        let service = StoryService::new(&llm);

        let mut streamed = String::new();
        let item = service
            .write_story(&mut repo, StoryConfig { premise: "sea".into(), ..Default::default() }, &mut |c| {
                streamed.push_str(c)
            })
            .await?;

        assert_eq!(streamed, item.content);
        assert_eq!(item.title, "The Tidewright");
        assert_eq!(item.excerpt, "The sea kept its secrets.");
        assert_eq!(repo.get(&item.id).unwrap().content, item.content);
        Ok(())
    }

    #[tokio::test]
    async fn test_title_falls_back_to_heading_when_model_fails() {
        let llm = MockLlmClient::new(true);
        let service = StoryService::new(&llm);
        assert_eq!(service.suggest_title("# Chapter 1: Salt\ntext").await, "Chapter 1: Salt");
        assert_eq!(service.suggest_title("no headings").await, UNTITLED);
    }

    #[tokio::test]
    async fn test_continue_story_appends_in_place() -> Result<()> {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut repo = StoryRepository::stories(storage).await;
        let llm = MockLlmClient::new(false);
        let service = StoryService::new(&llm);

        let first = service
            .write_story(&mut repo, StoryConfig::default(), &mut |_| {})
            .await?;
        let updated = service
            .continue_story(&mut repo, &first.id, "a storm arrives", &mut |_| {})
            .await?;

        assert_eq!(repo.len(), 1);
        assert!(updated.content.starts_with(&first.content));
        assert!(updated.content.len() > first.content.len());
        let calls = llm.calls.lock().unwrap();
        assert!(calls.last().unwrap().contains("Direction for what happens next: a storm arrives"));
        Ok(())
    }

    #[tokio::test]
    async fn test_continue_missing_story_errors() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut repo = StoryRepository::stories(storage).await;
        let llm = MockLlmClient::new(false);
        let result = StoryService::new(&llm).continue_story(&mut repo, "nope", "", &mut |_| {}).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_rewrite_falls_back_to_original() {
        let ok = MockLlmClient::new(false);
        assert_eq!(StoryService::new(&ok).rewrite_passage("Old.", "tighten").await, "A sharper sentence.");

        let failing = MockLlmClient::new(true);
        assert_eq!(StoryService::new(&failing).rewrite_passage("Old.", "tighten").await, "Old.");
    }

    #[tokio::test]
    async fn test_save_edit_and_publishing() -> Result<()> {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut repo = StoryRepository::stories(storage).await;
        let llm = MockLlmClient::new(false);
        let item = StoryService::new(&llm)
            .write_story(&mut repo, StoryConfig::default(), &mut |_| {})
            .await?;

        save_edit(&mut repo, &item.id, "# New\nFresh text.".to_string()).await?;
        assert_eq!(repo.get(&item.id).unwrap().excerpt, "Fresh text.");

        save_publishing(&mut repo, &item.id, PublishingConfig::default()).await?;
        assert!(repo.get(&item.id).unwrap().publishing.is_some());
        assert!(save_edit(&mut repo, "missing", String::new()).await.is_err());
        Ok(())
    }
}
