use serde_json::{json, Value};

use crate::core::state::{HistoryItem, LoreEntry, StoryConfig};

pub const STORY_SYSTEM_PROMPT: &str = "You are an award-winning novelist. Write vivid, original fiction in \
Markdown. Start every chapter with a single-level heading of the form '# Chapter N: Title'. Mark scene \
breaks inside a chapter with a line containing only '***'. Never add commentary before or after the story.";

pub const EDITOR_SYSTEM_PROMPT: &str = "You are a meticulous fiction editor. Return only the revised passage, \
with no preamble, quotes or explanation.";

pub const CHAT_SYSTEM_PROMPT: &str = "You are a friendly creative-writing assistant. Help the user brainstorm \
plots, characters, settings and imagery. Keep answers concise unless asked for detail.";

pub const INFOGRAPHIC_SYSTEM_PROMPT: &str = "You turn documents into infographic slides. Respond with JSON only.";

/// Maximum characters of prior text sent back as context when continuing.
const CONTINUATION_CONTEXT: usize = 6000;

pub fn build_lore_block(lore: &[LoreEntry]) -> Option<String> {
    if lore.is_empty() {
        return None;
    }
    let mut block = String::from("Story bible (keep every detail consistent):\n");
    for entry in lore {
        block.push_str(&format!("- [{}] {}: {}\n", entry.kind, entry.name, entry.description.trim()));
    }
    Some(block)
}

pub fn build_story_prompt(config: &StoryConfig) -> String {
    let mut prompt = format!(
        "Write a {genre} story for {audience}.\n\
         Premise: {premise}\n\
         Tone: {tone}\n\
         Prose style: {style}\n\
         Length: {length}, divided into {chapters} chapter(s).\n",
        genre = config.genre,
        audience = config.audience,
        premise = config.premise.trim(),
        tone = config.tone,
        style = config.style,
        length = config.length.word_target(),
        chapters = config.chapter_count.max(1),
    );

    if !config.constraints.trim().is_empty() {
        prompt.push_str(&format!("Constraints: {}\n", config.constraints.trim()));
    }
    if let Some(block) = config.lore.as_deref().and_then(build_lore_block) {
        prompt.push('\n');
        prompt.push_str(&block);
    }
    if let Some(existing) = config.existing_content.as_deref().filter(|s| !s.trim().is_empty()) {
        prompt.push_str(
            "\nThe author has already written the following. Continue seamlessly from where it ends, \
             matching voice and style, and do not repeat it:\n\n",
        );
        prompt.push_str(existing.trim());
        prompt.push('\n');
    }
    prompt
}

fn tail_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    let skip = count - max;
    let start = text.char_indices().nth(skip).map(|(i, _)| i).unwrap_or(0);
    &text[start..]
}

pub fn build_continuation_prompt(item: &HistoryItem, direction: &str) -> String {
    let mut prompt = format!(
        "Continue the {} story \"{}\" in the same voice ({} tone, {} style).\n",
        item.config.genre, item.title, item.config.tone, item.config.style
    );
    if let Some(block) = build_lore_block(&item.lore) {
        prompt.push_str(&block);
    }
    if !direction.trim().is_empty() {
        prompt.push_str(&format!("Direction for what happens next: {}\n", direction.trim()));
    }
    prompt.push_str(
        "Write the next chapter, starting with its '# Chapter N: Title' heading. The story so far ends with:\n\n",
    );
    prompt.push_str(tail_chars(&item.content, CONTINUATION_CONTEXT));
    prompt
}

pub fn build_rewrite_prompt(passage: &str, instruction: &str) -> String {
    format!(
        "Rewrite the passage below. Instruction: {}\n\nPassage:\n{}",
        instruction.trim(),
        passage
    )
}

pub fn build_title_prompt(content: &str) -> String {
    format!(
        "Suggest one evocative title for the story below. Reply with the title only.\n\n{}",
        tail_chars(content, 3000)
    )
}

pub fn enhance_image_prompt(prompt: &str, style: Option<&str>) -> String {
    match style.map(str::trim).filter(|s| !s.is_empty()) {
        Some(style) => format!("{}. Rendered in a {} style, high detail, cohesive composition.", prompt.trim(), style),
        None => prompt.trim().to_string(),
    }
}

pub fn build_edit_prompt(instruction: &str) -> String {
    format!(
        "Edit this image: {}. Keep everything else unchanged.",
        instruction.trim()
    )
}

pub fn build_infographic_prompt(source: &str, tile_count: usize) -> String {
    format!(
        "Read the text below and produce exactly {} infographic tiles that together summarize it. \
         For each tile give a short title, a one- or two-sentence summary, a detailed visual prompt for an \
         illustration with no text in it, and, when the text contains numbers worth charting, chart data.\n\n\
         Text:\n{}",
        tile_count.max(1),
        source.trim()
    )
}

pub fn infographic_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tiles": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "summary": { "type": "string" },
                        "visualPrompt": { "type": "string" },
                        "chart": {
                            "type": "object",
                            "properties": {
                                "kind": { "type": "string" },
                                "points": {
                                    "type": "array",
                                    "items": {
                                        "type": "object",
                                        "properties": {
                                            "label": { "type": "string" },
                                            "value": { "type": "number" }
                                        },
                                        "required": ["label", "value"]
                                    }
                                }
                            }
                        }
                    },
                    "required": ["title", "summary", "visualPrompt"]
                }
            }
        },
        "required": ["tiles"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{LoreKind, StoryLength};

    fn lore() -> Vec<LoreEntry> {
        vec![LoreEntry {
            id: "1".to_string(),
            kind: LoreKind::Character,
            name: "Mira".to_string(),
            description: "A cartographer who is afraid of the sea. ".to_string(),
        }]
    }

    #[test]
    fn test_story_prompt_includes_answers() {
        let config = StoryConfig {
            premise: "A map that redraws itself".to_string(),
            genre: "Mystery".to_string(),
            length: StoryLength::Short,
            chapter_count: 2,
            constraints: "No magic".to_string(),
            lore: Some(lore()),
            ..Default::default()
        };
        let prompt = build_story_prompt(&config);
        assert!(prompt.contains("Write a Mystery story for Adults."));
        assert!(prompt.contains("Premise: A map that redraws itself"));
        assert!(prompt.contains("about 1,000 words, divided into 2 chapter(s)"));
        assert!(prompt.contains("Constraints: No magic"));
        assert!(prompt.contains("- [Character] Mira: A cartographer who is afraid of the sea.\n"));
        assert!(!prompt.contains("already written"));
    }

    #[test]
    fn test_story_prompt_with_existing_content() {
        let config = StoryConfig {
            premise: "p".to_string(),
            existing_content: Some("It began at dawn.".to_string()),
            ..Default::default()
        };
        let prompt = build_story_prompt(&config);
        assert!(prompt.contains("already written"));
        assert!(prompt.trim_end().ends_with("It began at dawn."));
    }

    #[test]
    fn test_empty_lore_has_no_block() {
        assert!(build_lore_block(&[]).is_none());
    }

    #[test]
    fn test_tail_chars_respects_char_boundaries() {
        assert_eq!(tail_chars("héllo", 3), "llo");
        assert_eq!(tail_chars("日本語テキスト", 2), "スト");
        assert_eq!(tail_chars("abc", 10), "abc");
    }

    #[test]
    fn test_enhance_image_prompt() {
        assert_eq!(enhance_image_prompt(" a fox ", None), "a fox");
        assert_eq!(enhance_image_prompt("a fox", Some("  ")), "a fox");
        assert!(enhance_image_prompt("a fox", Some("watercolor")).contains("watercolor style"));
    }

    #[test]
    fn test_infographic_schema_requires_tiles() {
        let schema = infographic_schema();
        assert_eq!(schema["required"][0], "tiles");
        assert_eq!(schema["properties"]["tiles"]["items"]["required"][2], "visualPrompt");
    }
}
