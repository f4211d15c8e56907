use anyhow::Result;
use inquire::error::{InquireError, InquireResult};
use inquire::{Confirm, CustomType, Select, Text};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use storyforge::core::app::{AppController, ExportFormat, View};
use storyforge::core::config::Config;
use storyforge::core::io::NativeStorage;
use storyforge::core::state::{AspectRatio, TileStatus};
use storyforge::services::image::load_image_file;
use storyforge::services::import::import_text;
use storyforge::services::llm::create_llm;
use storyforge::services::setup;
use storyforge::utils::imaging::FilterSettings;
use storyforge::utils::print_layout::Block;

/// Turns Esc on any prompt into `None`.
fn ask<T>(answer: InquireResult<T>) -> Result<Option<T>> {
    match answer {
        Ok(value) => Ok(Some(value)),
        Err(InquireError::OperationCanceled) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Shows a menu; Esc returns `None`.
fn menu<'a>(prompt: &str, options: Vec<&'a str>) -> Result<Option<&'a str>> {
    ask(Select::new(prompt, options).prompt())
}

fn print_chunk(chunk: &str) {
    print!("{}", chunk);
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with an `llm` section.");
            return Err(e);
        }
    };
    config.ensure_directories()?;
    setup::run_setup(&mut config)?;

    let llm = create_llm(&config)?;
    let storage = Arc::new(NativeStorage::new(&config.data_folder));
    let mut app = AppController::new(config, llm, storage).await;

    loop {
        let view = app.view().clone();
        let keep_going = match view {
            View::Home => home(&mut app)?,
            View::StoryWizard => story_wizard(&mut app).await?,
            View::StoryReader { id } => reader(&mut app, &id).await?,
            View::PrintPreview { id } => print_preview(&mut app, &id).await?,
            View::ImageStudio => image_studio(&mut app).await?,
            View::Infographic => infographic(&mut app).await?,
            View::Chat => chat(&mut app).await?,
            View::History => history(&mut app).await?,
        };
        if !keep_going {
            break;
        }
    }
    println!("Goodbye.");
    Ok(())
}

fn home(app: &mut AppController) -> Result<bool> {
    let choice = menu(
        "What would you like to make?",
        vec!["Write a story", "Story history", "Image studio", "Infographic", "Chat assistant", "Quit"],
    )?;
    match choice {
        Some("Write a story") => app.navigate(View::StoryWizard),
        Some("Story history") => app.navigate(View::History),
        Some("Image studio") => app.navigate(View::ImageStudio),
        Some("Infographic") => app.navigate(View::Infographic),
        Some("Chat assistant") => app.navigate(View::Chat),
        _ => return Ok(false),
    }
    Ok(true)
}

async fn story_wizard(app: &mut AppController) -> Result<bool> {
    let answers = match setup::story_wizard(&Default::default()).await {
        Ok(answers) => answers,
        Err(e) if is_cancel(&e) => {
            app.back();
            return Ok(true);
        }
        Err(e) => return Err(e),
    };
    println!();
    if let Err(e) = app.create_story(answers, &mut print_chunk).await {
        println!("\nStory generation failed: {:#}", e);
        app.back();
    }
    println!();
    Ok(true)
}

fn is_cancel(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<InquireError>(), Some(InquireError::OperationCanceled))
}

async fn reader(app: &mut AppController, id: &str) -> Result<bool> {
    let pages = app.reader_pages(id)?;
    let index = app.state().page_index.min(pages.len() - 1);
    let page = &pages[index];
    let title = app.story(id)?.title.clone();

    println!("\n=== {} ===", title);
    if !page.chapter_title.is_empty() {
        println!("--- {} ---", page.chapter_title);
    }
    println!("{}", page.content.trim_end());
    println!("[page {} of {}]", page.page_number, pages.len());

    let choice = menu(
        "Reader:",
        vec![
            "Next page",
            "Previous page",
            "Continue the story",
            "Rewrite a passage",
            "Print preview",
            "Delete story",
            "Back",
        ],
    )?;
    match choice {
        Some("Next page") => app.set_page((index + 1).min(pages.len() - 1)),
        Some("Previous page") => app.set_page(index.saturating_sub(1)),
        Some("Continue the story") => {
            let Some(direction) = ask(Text::new("What should happen next? (optional)").prompt())? else {
                return Ok(true);
            };
            println!();
            match app.continue_story(id, &direction, &mut print_chunk).await {
                Ok(_) => {
                    let last = app.reader_pages(id)?.len() - 1;
                    app.set_page(last);
                }
                Err(e) => println!("\nContinuation failed: {:#}", e),
            }
            println!();
        }
        Some("Rewrite a passage") => rewrite(app, id).await?,
        Some("Print preview") => app.navigate(View::PrintPreview { id: id.to_string() }),
        Some("Delete story") => {
            if ask(Confirm::new(&format!("Delete '{}'?", title)).with_default(false).prompt())? == Some(true) {
                app.delete_story(id).await;
            }
        }
        _ => {
            app.back();
        }
    }
    Ok(true)
}

async fn rewrite(app: &mut AppController, id: &str) -> Result<()> {
    let content = app.story(id)?.content.clone();
    let Some(passage) = ask(Text::new("Paste the exact passage to rewrite:").prompt())? else {
        return Ok(());
    };
    if passage.trim().is_empty() || !content.contains(passage.as_str()) {
        println!("That passage was not found in the story.");
        return Ok(());
    }
    let Some(instruction) = ask(Text::new("How should it change?").prompt())? else {
        return Ok(());
    };
    let revised = app.rewrite_passage(&passage, &instruction).await;
    println!("\n{}\n", revised);
    if revised != passage && ask(Confirm::new("Keep this version?").with_default(true).prompt())? == Some(true) {
        app.save_story_text(id, content.replacen(passage.as_str(), &revised, 1)).await?;
    }
    Ok(())
}

async fn print_preview(app: &mut AppController, id: &str) -> Result<bool> {
    let pages = app.print_pages(id)?;
    let index = app.state().page_index.min(pages.len() - 1);
    let layout = app.preview(id, index)?;
    let g = &layout.geometry;

    println!(
        "\n[{:.0} x {:.0} px, margin {:.0} px, zoom {:.0}%]",
        g.page_width_px,
        g.page_height_px,
        g.margin_px,
        g.zoom * 100.0
    );
    if let Some(header) = &layout.header_text {
        println!("{:^60}", header);
    }
    for block in &layout.blocks {
        match block {
            Block::ChapterHeading { text, .. } => println!("\n{:^60}\n", text.to_uppercase()),
            Block::DropCap { letter, .. } => print!("[{}]", letter),
            Block::Paragraph { text, .. } => println!("{}", text),
            Block::SceneDivider { glyph, .. } => println!("{:^60}", glyph),
        }
    }
    if let Some(footer) = &layout.footer_text {
        println!("{:^60}", footer);
    }

    let choice = menu(
        "Print preview:",
        vec!["Next page", "Previous page", "Zoom in", "Zoom out", "Publishing settings", "Export PDF", "Export HTML", "Back"],
    )?;
    match choice {
        Some("Next page") => app.set_page((index + 1).min(pages.len() - 1)),
        Some("Previous page") => app.set_page(index.saturating_sub(1)),
        Some("Zoom in") => app.set_zoom(app.state().zoom * 1.25),
        Some("Zoom out") => app.set_zoom(app.state().zoom / 1.25),
        Some("Publishing settings") => {
            let current = app.publishing_for(id)?;
            match setup::publishing_wizard(&current) {
                Ok(updated) => {
                    app.set_publishing(id, updated).await?;
                    app.set_page(0);
                }
                Err(e) if is_cancel(&e) => {}
                Err(e) => return Err(e),
            }
        }
        Some("Export PDF") => report_export(app.export_story(id, ExportFormat::Pdf)),
        Some("Export HTML") => report_export(app.export_story(id, ExportFormat::Html)),
        _ => {
            app.back();
        }
    }
    Ok(true)
}

fn report_export(result: Result<std::path::PathBuf>) {
    match result {
        Ok(path) => println!("Exported to {:?}", path),
        Err(e) => println!("Export failed: {:#}", e),
    }
}

fn pick_aspect(default: AspectRatio) -> Result<Option<AspectRatio>> {
    let start = AspectRatio::ALL.iter().position(|a| *a == default).unwrap_or(0);
    ask(Select::new("Aspect ratio:", AspectRatio::ALL.to_vec()).with_starting_cursor(start).prompt())
}

fn pick_image(app: &AppController) -> Result<Option<String>> {
    let images = app.state().images.items();
    if images.is_empty() {
        println!("No images yet.");
        return Ok(None);
    }
    let labels: Vec<String> = images
        .iter()
        .map(|i| format!("{} [{} {:?}] {}", i.id, i.aspect_ratio, i.mode, i.prompt))
        .collect();
    let choice = ask(Select::new("Image:", labels).prompt())?;
    Ok(choice.and_then(|c| c.split_whitespace().next().map(str::to_string)))
}

async fn image_studio(app: &mut AppController) -> Result<bool> {
    println!("\n{} image(s) in history.", app.state().images.len());
    let choice = menu(
        "Image studio:",
        vec!["Generate", "Edit an image", "Adjust filters", "Download", "Delete", "Back"],
    )?;
    match choice {
        Some("Generate") => {
            let Some(prompt) = ask(Text::new("Describe the image:").prompt())? else {
                return Ok(true);
            };
            let Some(style) = ask(Text::new("Style (optional):").prompt())? else {
                return Ok(true);
            };
            let Some(aspect) = pick_aspect(app.config().studio.aspect_ratio)? else {
                return Ok(true);
            };
            println!("Generating...");
            match app.generate_images(&prompt, Some(style.as_str()), aspect).await {
                Ok(items) => println!("{} variation(s) saved.", items.len()),
                Err(e) => println!("Generation failed: {:#}", e),
            }
        }
        Some("Edit an image") => {
            let Some(from_file) = ask(Confirm::new("Edit a file from disk?").with_default(false).prompt())? else {
                return Ok(true);
            };
            let source = if from_file {
                let Some(path) = ask(Text::new("Image path:").prompt())? else {
                    return Ok(true);
                };
                match load_image_file(Path::new(path.trim())).await {
                    Ok(data) => Some((data, app.config().studio.aspect_ratio)),
                    Err(e) => {
                        println!("Could not read image: {:#}", e);
                        None
                    }
                }
            } else {
                pick_image(app)?.and_then(|id| {
                    app.state().images.get(&id).map(|i| (i.image_data.clone(), i.aspect_ratio))
                })
            };
            if let Some((data, aspect)) = source {
                let Some(instruction) = ask(Text::new("What should change?").prompt())? else {
                    return Ok(true);
                };
                match app.edit_image(&data, &instruction, aspect).await {
                    Ok(item) => println!("Edited image saved as {}.", item.id),
                    Err(e) => println!("Edit failed: {:#}", e),
                }
            }
        }
        Some("Adjust filters") => {
            if let Some(id) = pick_image(app)? {
                let percent = |label: &str| ask(CustomType::<f32>::new(label).with_default(100.0).prompt());
                let Some(brightness) = percent("Brightness %:")? else {
                    return Ok(true);
                };
                let Some(contrast) = percent("Contrast %:")? else {
                    return Ok(true);
                };
                let Some(saturation) = percent("Saturation %:")? else {
                    return Ok(true);
                };
                let settings = FilterSettings { brightness, contrast, saturation };
                match app.filter_image(&id, settings).await {
                    Ok(item) => println!("Filtered copy saved as {}.", item.id),
                    Err(e) => println!("Filtering failed: {:#}", e),
                }
            }
        }
        Some("Download") => {
            if let Some(id) = pick_image(app)? {
                match app.download_image(&id).await {
                    Ok(path) => println!("Saved to {:?}", path),
                    Err(e) => println!("Download failed: {:#}", e),
                }
            }
        }
        Some("Delete") => {
            if let Some(id) = pick_image(app)? {
                app.delete_image(&id).await;
            }
        }
        _ => {
            app.back();
        }
    }
    Ok(true)
}

fn print_tiles(app: &AppController) {
    for (i, tile) in app.state().tiles.iter().enumerate() {
        let status = match tile.status {
            TileStatus::Pending => "pending",
            TileStatus::Generating => "generating",
            TileStatus::Done => "done",
            TileStatus::Failed => "failed",
        };
        println!("{:>2}. [{}] {} - {}", i + 1, status, tile.title, tile.summary);
        if let Some(chart) = &tile.chart {
            for point in &chart.points {
                println!("      {:<16} {}", point.label, point.value);
            }
        }
    }
}

async fn infographic(app: &mut AppController) -> Result<bool> {
    print_tiles(app);
    let choice = menu(
        "Infographic:",
        vec!["New from text", "New from file", "Retry failed tiles", "Save tiles", "Back"],
    )?;
    match choice {
        Some(kind @ ("New from text" | "New from file")) => {
            let source = if kind == "New from text" {
                let Some(text) = ask(Text::new("Paste the source text:").prompt())? else {
                    return Ok(true);
                };
                text
            } else {
                let Some(path) = ask(Text::new("Path to a .txt, .md or .pdf file:").prompt())? else {
                    return Ok(true);
                };
                match import_text(Path::new(path.trim())).await {
                    Ok(text) => text,
                    Err(e) => {
                        println!("Could not import: {:#}", e);
                        return Ok(true);
                    }
                }
            };
            let Some(count) = ask(
                CustomType::<usize>::new("Number of tiles:")
                    .with_default(storyforge::services::infographic::DEFAULT_TILE_COUNT)
                    .prompt(),
            )?
            else {
                return Ok(true);
            };
            let count = count.clamp(1, 12);
            let Some(aspect) = pick_aspect(app.config().studio.aspect_ratio)? else {
                return Ok(true);
            };
            match app.build_infographic(&source, count, aspect).await {
                Ok(done) => println!("{} of {} tiles ready.", done, app.state().tiles.len()),
                Err(e) => println!("Infographic failed: {:#}", e),
            }
        }
        Some("Retry failed tiles") => {
            let done = app.retry_tiles().await;
            println!("{} tile(s) finished.", done);
        }
        Some("Save tiles") => match app.save_tiles().await {
            Ok(paths) => println!("Saved {} tile(s).", paths.len()),
            Err(e) => println!("Save failed: {:#}", e),
        },
        _ => {
            app.back();
        }
    }
    Ok(true)
}

async fn chat(app: &mut AppController) -> Result<bool> {
    println!("\nChat with the assistant. Empty line to leave, /clear to start over.");
    loop {
        let text = ask(Text::new("You:").prompt())?.unwrap_or_default();
        let text = text.trim();
        if text.is_empty() {
            app.back();
            return Ok(true);
        }
        if text == "/clear" {
            app.clear_chat();
            continue;
        }
        print!("Assistant: ");
        if let Err(e) = app.send_chat(text, &mut print_chunk).await {
            print!("(generation failed: {:#})", e);
        }
        println!("\n");
    }
}

async fn history(app: &mut AppController) -> Result<bool> {
    let stories = app.state().stories.items();
    if stories.is_empty() {
        println!("\nNo stories yet.");
        app.back();
        return Ok(true);
    }
    let labels: Vec<String> = stories
        .iter()
        .map(|s| format!("{} | {} | {}", s.id, s.title, s.excerpt.chars().take(60).collect::<String>()))
        .collect();
    match ask(Select::new("Stories:", labels).prompt())? {
        Some(choice) => {
            if let Some(id) = choice.split(" | ").next() {
                app.open_story(id)?;
            }
        }
        None => {
            app.back();
        }
    }
    Ok(true)
}
