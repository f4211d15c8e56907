use crate::core::state::PageData;
use crate::utils::print_layout::scene_divider;

pub const DEFAULT_PAGE_BUDGET: usize = 1500;

/// Returns the chapter title when `line` is a single-level heading (`# Title`).
/// Scene-divider tokens such as `# # #` are not headings.
pub fn chapter_heading(line: &str) -> Option<&str> {
    if scene_divider(line).is_some() {
        return None;
    }
    line.strip_prefix("# ").map(str::trim).filter(|title| !title.is_empty())
}

/// Splits `content` into book pages of roughly `budget` characters.
///
/// Lines are never split. A chapter heading closes the current page and opens
/// a new one carrying the heading's title; otherwise a page closes as soon as
/// its buffer grows past `budget`. Always yields at least one page.
pub fn paginate(content: &str, budget: usize) -> Vec<PageData> {
    let mut pages: Vec<PageData> = Vec::new();
    if content.is_empty() {
        pages.push(PageData {
            content: String::new(),
            chapter_title: String::new(),
            page_number: 1,
        });
        return pages;
    }

    let mut buffer = String::new();
    let mut buffer_chars = 0usize;
    let mut title = String::new();

    let mut flush = |buffer: &mut String, buffer_chars: &mut usize, title: &str| {
        if buffer.is_empty() {
            return;
        }
        let page_number = pages.len() + 1;
        pages.push(PageData {
            content: std::mem::take(buffer),
            chapter_title: title.to_string(),
            page_number,
        });
        *buffer_chars = 0;
    };

    for line in content.split('\n') {
        if let Some(heading) = chapter_heading(line) {
            flush(&mut buffer, &mut buffer_chars, &title);
            title = heading.to_string();
        }

        buffer.push_str(line);
        buffer.push('\n');
        buffer_chars += line.chars().count() + 1;

        if buffer_chars > budget {
            flush(&mut buffer, &mut buffer_chars, &title);
        }
    }
    flush(&mut buffer, &mut buffer_chars, &title);

    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(pages: &[PageData]) -> String {
        pages.iter().map(|p| p.content.as_str()).collect::<String>()
    }

    #[test]
    fn test_empty_content_yields_one_empty_page() {
        let pages = paginate("", 100);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].content, "");
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[0].chapter_title, "");
    }

    #[test]
    fn test_concatenation_reproduces_content() {
        let inputs = [
            "one line",
            "a\nb\nc\n",
            "# Chapter 1\nIt was dark.\n\n***\n\n# Chapter 2\nIt was light.",
            "\n\n\nx",
            "line that is fairly long\nshort\nanother fairly long line here\n# H\n",
        ];
        for input in inputs {
            for budget in [1, 5, 20, 1000] {
                let pages = paginate(input, budget);
                assert!(!pages.is_empty());
                assert_eq!(
                    joined(&pages).trim_end_matches('\n'),
                    input.trim_end_matches('\n'),
                    "budget {} input {:?}",
                    budget,
                    input
                );
            }
        }
    }

    #[test]
    fn test_heading_starts_new_page_and_carries_title() {
        let text = "Prologue text\n# The Storm\nRain fell.\nWind howled.\n# The Calm\nQuiet.";
        let pages = paginate(text, 15);

        assert_eq!(pages[0].content, "Prologue text\n");
        assert_eq!(pages[0].chapter_title, "");

        assert!(pages[1].content.starts_with("# The Storm\n"));
        assert_eq!(pages[1].chapter_title, "The Storm");

        let calm = pages
            .iter()
            .position(|p| p.content.starts_with("# The Calm"))
            .unwrap();
        for page in &pages[1..calm] {
            assert_eq!(page.chapter_title, "The Storm");
        }
        for page in &pages[calm..] {
            assert_eq!(page.chapter_title, "The Calm");
        }
    }

    #[test]
    fn test_page_numbers_are_sequential() {
        let text = (0..50).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let pages = paginate(&text, 30);
        assert!(pages.len() > 1);
        for (i, page) in pages.iter().enumerate() {
            assert_eq!(page.page_number, i + 1);
        }
    }

    #[test]
    fn test_oversized_line_forms_single_page() {
        let long = "x".repeat(500);
        let text = format!("short\n{}\nafter", long);
        let pages = paginate(&text, 100);
        assert!(pages.iter().any(|p| p.content.contains(&long)));
        assert!(pages.iter().all(|p| !p.content.contains('x') || p.content.contains(&long)));
    }

    #[test]
    fn test_subheading_is_not_a_chapter() {
        let pages = paginate("# Part One\n## Scene\ntext", 1000);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].chapter_title, "Part One");
    }

    #[test]
    fn test_dinkus_divider_is_not_a_chapter() {
        assert_eq!(chapter_heading("# # #"), None);
        assert_eq!(chapter_heading("#   "), None);
        assert_eq!(chapter_heading("# Chapter 1"), Some("Chapter 1"));

        let pages = paginate("# Chapter 1\nBefore.\n# # #\nAfter.", 1000);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].chapter_title, "Chapter 1");
    }

    #[test]
    fn test_leading_heading_does_not_emit_empty_page() {
        let pages = paginate("# Start\nbody", 1000);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_number, 1);
    }
}
