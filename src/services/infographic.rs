use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::core::state::{new_id, AspectRatio, ChartData, InfographicItem, TileStatus};
use crate::services::batch::settle_all;
use crate::services::image::write_data_uri;
use crate::services::llm::LlmClient;
use crate::services::prompt;
use crate::utils::imaging::{decode_data_uri, encode_png_data_uri, overlay_text, TextMeasure, TextPainter};

pub const DEFAULT_TILE_COUNT: usize = 4;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TileSpec {
    title: String,
    summary: String,
    visual_prompt: String,
    #[serde(default)]
    chart: Option<ChartData>,
}

#[derive(Debug, Deserialize)]
struct TileResponse {
    tiles: Vec<TileSpec>,
}

pub struct InfographicService<'a> {
    llm: &'a dyn LlmClient,
}

impl<'a> InfographicService<'a> {
    pub fn new(llm: &'a dyn LlmClient) -> Self {
        Self { llm }
    }

    /// Asks the model to split `source` into tiles. Every tile starts `Pending`.
    pub async fn extract_tiles(
        &self,
        source: &str,
        tile_count: usize,
        aspect: AspectRatio,
    ) -> Result<Vec<InfographicItem>> {
        if source.trim().is_empty() {
            bail!("Nothing to summarize");
        }
        let value = self
            .llm
            .generate_json(
                prompt::INFOGRAPHIC_SYSTEM_PROMPT,
                &prompt::build_infographic_prompt(source, tile_count),
                &prompt::infographic_schema(),
            )
            .await?;
        let response: TileResponse = serde_json::from_value(value).context("Malformed infographic response")?;
        if response.tiles.is_empty() {
            bail!("The model returned no tiles");
        }
        info!("Extracted {} tiles", response.tiles.len());

        Ok(response
            .tiles
            .into_iter()
            .map(|tile| InfographicItem {
                id: new_id(),
                title: tile.title,
                summary: tile.summary,
                visual_prompt: tile.visual_prompt,
                status: TileStatus::Pending,
                image_data: None,
                aspect_ratio: aspect,
                chart: tile.chart.filter(|c| !c.points.is_empty()),
            })
            .collect())
    }

    /// Illustrates every tile that is not already done, concurrently. A tile
    /// failure marks only that tile `Failed`. Returns how many tiles finished.
    pub async fn render_tiles<R>(&self, tiles: &mut [InfographicItem], caption: Option<&R>) -> usize
    where
        R: TextMeasure + TextPainter + Sync,
    {
        let pending: Vec<usize> = (0..tiles.len()).filter(|&i| tiles[i].status != TileStatus::Done).collect();
        for &i in &pending {
            tiles[i].status = TileStatus::Generating;
        }

        let pb = ProgressBar::new(pending.len() as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        let snapshot: &[InfographicItem] = tiles;
        let tasks = pending.iter().map(|&i| {
            let tile = &snapshot[i];
            let pb = pb.clone();
            async move {
                let result = self.render_tile(tile, caption).await;
                pb.inc(1);
                result
            }
        });
        let results = settle_all(tasks).await;
        pb.finish_and_clear();

        let mut done = 0;
        for (i, result) in pending.into_iter().zip(results) {
            match result {
                Ok(data) => {
                    tiles[i].image_data = Some(data);
                    tiles[i].status = TileStatus::Done;
                    done += 1;
                }
                Err(e) => {
                    warn!("Tile '{}' failed: {:#}", tiles[i].title, e);
                    tiles[i].status = TileStatus::Failed;
                }
            }
        }
        info!("{} of {} tiles rendered", done, tiles.len());
        done
    }

    async fn render_tile<R>(&self, tile: &InfographicItem, caption: Option<&R>) -> Result<String>
    where
        R: TextMeasure + TextPainter + Sync,
    {
        let data = self.llm.generate_image(&tile.visual_prompt, tile.aspect_ratio).await?;
        match caption {
            Some(renderer) => {
                let image = decode_data_uri(&data)?;
                let captioned = overlay_text(&image, &tile.title, &tile.summary, tile.aspect_ratio, renderer);
                encode_png_data_uri(&captioned)
            }
            None => Ok(data),
        }
    }
}

/// Writes each finished tile image to `folder` as `tile-NN.<ext>`.
pub async fn save_tiles(tiles: &[InfographicItem], folder: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for (i, tile) in tiles.iter().enumerate() {
        if let Some(data) = &tile.image_data {
            paths.push(write_data_uri(data, folder, &format!("tile-{:02}", i + 1)).await?);
        }
    }
    Ok(paths)
}
