use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::state::{AspectRatio, PublishingConfig};
use crate::services::llm::LlmConfig;
use crate::utils::pagination::DEFAULT_PAGE_BUDGET;

pub const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_data")]
    pub data_folder: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    pub llm: LlmConfig,

    #[serde(default)]
    pub studio: StudioConfig,

    #[serde(default)]
    pub publishing: PublishingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StudioConfig {
    #[serde(default = "default_page_budget")]
    pub page_budget: usize,
    #[serde(default = "default_variations")]
    pub image_variations: usize,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    /// TrueType/OpenType font used for infographic captions.
    #[serde(default)]
    pub font_path: Option<String>,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            page_budget: default_page_budget(),
            image_variations: default_variations(),
            aspect_ratio: AspectRatio::default(),
            font_path: None,
        }
    }
}

fn default_data() -> String {
    "data".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_page_budget() -> usize {
    DEFAULT_PAGE_BUDGET
}
fn default_variations() -> usize {
    4
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(content)?)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(CONFIG_FILE, content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.data_folder)?;
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::print_layout::{MarginPreset, PaperPreset};

    #[test]
    fn test_minimal_config_gets_defaults() {
        let yaml = r#"
llm:
  provider: gemini
  gemini:
    api_key: "k"
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.data_folder, "data");
        assert_eq!(config.output_folder, "output");
        assert_eq!(config.studio.page_budget, DEFAULT_PAGE_BUDGET);
        assert_eq!(config.studio.image_variations, 4);
        assert_eq!(config.publishing.paper, PaperPreset::Trade);
        assert_eq!(config.publishing.margin, MarginPreset::Normal);
        let gemini = config.llm.gemini.unwrap();
        assert_eq!(gemini.api_key, "k");
        assert!(!gemini.text_model.is_empty());
    }

    #[test]
    fn test_publishing_section_overrides() {
        let yaml = r#"
llm:
  provider: openai
  openai:
    api_key: "k"
publishing:
  paper: "letter"
  margin: wide
  dropCap: false
studio:
  aspect_ratio: "16:9"
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.publishing.paper, PaperPreset::Letter);
        assert_eq!(config.publishing.margin, MarginPreset::Wide);
        assert!(!config.publishing.drop_cap);
        assert_eq!(config.studio.aspect_ratio, AspectRatio::Wide);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from(&dir.path().join("config.yml")).is_err());
    }
}
