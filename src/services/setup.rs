use anyhow::{anyhow, Result};
use inquire::{Confirm, CustomType, Password, Select, Text};
use log::info;
use std::path::Path;

use crate::core::config::Config;
use crate::core::state::{new_id, LoreEntry, LoreKind, PublishingConfig, StoryConfig, StoryLength};
use crate::services::import::import_text;
use crate::services::llm::{GeminiConfig, OpenAIConfig};
use crate::utils::print_layout::{MarginPreset, PaperPreset, SceneDividerStyle};

pub const GENRES: &[&str] = &[
    "Fantasy",
    "Science Fiction",
    "Mystery",
    "Romance",
    "Horror",
    "Historical",
    "Adventure",
    "Fairy Tale",
    "Literary",
];
pub const TONES: &[&str] = &["Whimsical", "Dark", "Hopeful", "Melancholic", "Humorous", "Suspenseful", "Epic"];
pub const STYLES: &[&str] = &["Descriptive", "Minimalist", "Lyrical", "Conversational", "Cinematic"];
pub const AUDIENCES: &[&str] = &["Children", "Young Adults", "Adults"];

const PROVIDERS: &[&str] = &["gemini", "openai"];

fn env_key(provider: &str) -> Option<String> {
    let var = match provider {
        "gemini" => "GEMINI_API_KEY",
        "openai" => "OPENAI_API_KEY",
        _ => return None,
    };
    std::env::var(var).ok().filter(|k| !k.trim().is_empty())
}

/// True when the selected provider has no usable credentials yet.
pub fn needs_setup(config: &Config) -> bool {
    match config.llm.provider.as_str() {
        "gemini" => config.llm.gemini.as_ref().map_or(true, |c| c.api_key.trim().is_empty()),
        "openai" => config.llm.openai.as_ref().map_or(true, |c| c.api_key.trim().is_empty()),
        _ => true,
    }
}

/// Fills in a missing provider section, from the environment when possible,
/// and saves the config.
pub fn run_setup(config: &mut Config) -> Result<()> {
    if !needs_setup(config) {
        return Ok(());
    }

    if !PROVIDERS.contains(&config.llm.provider.as_str()) {
        let provider = Select::new("Select AI provider:", PROVIDERS.to_vec()).prompt()?;
        config.llm.provider = provider.to_string();
    }
    let provider = config.llm.provider.clone();

    let api_key = match env_key(&provider) {
        Some(key) => {
            info!("Using API key from the environment for {}", provider);
            key
        }
        None => Password::new(&format!("{} API key:", provider))
            .without_confirmation()
            .prompt()?,
    };
    if api_key.trim().is_empty() {
        return Err(anyhow!("An API key is required"));
    }

    match provider.as_str() {
        "gemini" => {
            let mut cfg = config.llm.gemini.clone().unwrap_or_else(|| GeminiConfig::with_key(""));
            cfg.api_key = api_key;
            config.llm.gemini = Some(cfg);
        }
        _ => {
            let mut cfg = config.llm.openai.clone().unwrap_or_else(|| OpenAIConfig::with_key(""));
            cfg.api_key = api_key;
            config.llm.openai = Some(cfg);
        }
    }

    config.save()?;
    println!("Configuration saved.");
    Ok(())
}

fn cursor_of(options: &[&str], current: &str) -> usize {
    options.iter().position(|o| o.eq_ignore_ascii_case(current)).unwrap_or(0)
}

fn choose(prompt: &str, options: &[&str], current: &str) -> Result<String> {
    let choice = Select::new(prompt, options.to_vec())
        .with_starting_cursor(cursor_of(options, current))
        .prompt()?;
    Ok(choice.to_string())
}

fn optional_text(prompt: &str, current: &str) -> Result<String> {
    let answer = Text::new(prompt).with_initial_value(current).prompt()?;
    Ok(answer.trim().to_string())
}

/// Walks through the story wizard steps, starting from `defaults`.
pub async fn story_wizard(defaults: &StoryConfig) -> Result<StoryConfig> {
    let mut config = defaults.clone();

    loop {
        config.premise = Text::new("What is your story about?")
            .with_initial_value(&config.premise)
            .prompt()?
            .trim()
            .to_string();
        if !config.premise.is_empty() {
            break;
        }
        println!("A premise is required.");
    }

    config.genre = choose("Genre:", GENRES, &config.genre)?;
    config.tone = choose("Tone:", TONES, &config.tone)?;
    config.style = choose("Prose style:", STYLES, &config.style)?;
    config.audience = choose("Audience:", AUDIENCES, &config.audience)?;

    let lengths = vec![StoryLength::Short, StoryLength::Medium, StoryLength::Long];
    let start = lengths.iter().position(|l| *l == config.length).unwrap_or(1);
    let labels: Vec<String> = lengths.iter().map(|l| format!("{:?} ({})", l, l.word_target())).collect();
    let picked = Select::new("Length:", labels.clone()).with_starting_cursor(start).prompt()?;
    config.length = labels.iter().position(|l| *l == picked).map_or(config.length, |i| lengths[i]);

    config.chapter_count = CustomType::<u32>::new("Number of chapters:")
        .with_default(config.chapter_count.max(1))
        .with_error_message("Please enter a whole number")
        .prompt()?
        .clamp(1, 20);

    config.constraints = optional_text("Anything to include or avoid? (optional)", &config.constraints)?;

    let mut lore = config.lore.take().unwrap_or_default();
    while Confirm::new("Add a story bible entry?").with_default(false).prompt()? {
        lore.push(lore_entry()?);
    }
    config.lore = if lore.is_empty() { None } else { Some(lore) };

    if Confirm::new("Continue from an existing manuscript?").with_default(false).prompt()? {
        let path = Text::new("Path to a .txt, .md or .pdf file:").prompt()?;
        match import_text(Path::new(path.trim())).await {
            Ok(text) => config.existing_content = Some(text),
            Err(e) => println!("Could not import manuscript: {:#}", e),
        }
    }

    Ok(config)
}

fn lore_entry() -> Result<LoreEntry> {
    let kind = Select::new(
        "Entry type:",
        vec![LoreKind::Character, LoreKind::Location, LoreKind::Item, LoreKind::Rule],
    )
    .prompt()?;
    let name = Text::new("Name:").prompt()?.trim().to_string();
    let description = Text::new("Description:").prompt()?.trim().to_string();
    Ok(LoreEntry { id: new_id(), kind, name, description })
}

fn divider_label(style: SceneDividerStyle) -> String {
    match style {
        SceneDividerStyle::MatchSource => "Match source".to_string(),
        other => other.glyph().to_string(),
    }
}

/// Edits the print settings of one story.
pub fn publishing_wizard(current: &PublishingConfig) -> Result<PublishingConfig> {
    let mut config = current.clone();

    let papers = PaperPreset::ALL.to_vec();
    let start = papers.iter().position(|p| *p == config.paper).unwrap_or(0);
    config.paper = Select::new("Paper size:", papers).with_starting_cursor(start).prompt()?;

    let margins = MarginPreset::ALL.to_vec();
    let start = margins.iter().position(|m| *m == config.margin).unwrap_or(0);
    config.margin = Select::new("Margins:", margins).with_starting_cursor(start).prompt()?;

    config.font_size_pt = CustomType::<f32>::new("Body font size (pt):")
        .with_default(config.font_size_pt)
        .prompt()?
        .clamp(6.0, 24.0);
    config.line_height = CustomType::<f32>::new("Line height:")
        .with_default(config.line_height)
        .prompt()?
        .clamp(1.0, 3.0);
    config.drop_cap = Confirm::new("Drop cap on chapter openings?")
        .with_default(config.drop_cap)
        .prompt()?;

    let styles = [
        SceneDividerStyle::MatchSource,
        SceneDividerStyle::Asterisks,
        SceneDividerStyle::Fleuron,
        SceneDividerStyle::Dinkus,
        SceneDividerStyle::Rule,
    ];
    let labels: Vec<String> = styles.iter().map(|s| divider_label(*s)).collect();
    let start = styles.iter().position(|s| *s == config.scene_divider).unwrap_or(0);
    let picked = Select::new("Scene divider:", labels.clone()).with_starting_cursor(start).prompt()?;
    if let Some(i) = labels.iter().position(|l| *l == picked) {
        config.scene_divider = styles[i];
    }

    config.show_header = Confirm::new("Running chapter header?").with_default(config.show_header).prompt()?;
    config.show_page_numbers = Confirm::new("Page numbers?").with_default(config.show_page_numbers).prompt()?;
    let author = optional_text("Author name (optional):", config.author.as_deref().unwrap_or(""))?;
    config.author = if author.is_empty() { None } else { Some(author) };

    Ok(config)
}
