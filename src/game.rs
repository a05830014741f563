//! Game orchestration: status, headline serving and play submission.

use chrono::NaiveDate;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{GameError, GameResult};
use crate::headline::{self, HeadlineFilter, SelectedArticle};
use crate::ledger::{
    DEFAULT_DAILY_CAP, HistoryFilter, NewPlay, PlayLedger, PlayOutcome, PlayRecord,
};
use crate::news::NewsSource;
use crate::store::Database;

#[derive(Debug, Clone, Copy)]
pub struct GameConfig {
    pub daily_cap: u32,
    pub headline_filter: HeadlineFilter,
    /// Whether preview requests may fall back to already-played headlines.
    pub preview_fallback: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            daily_cap: DEFAULT_DAILY_CAP,
            headline_filter: HeadlineFilter::default(),
            preview_fallback: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStatus {
    pub can_play: bool,
    pub plays_today: u32,
    pub max_daily: u32,
    pub streak: u32,
    pub first_play_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeadlineOutcome {
    Served(SelectedArticle),
    RateLimited { plays_today: u32, max_daily: u32 },
    NoContent,
}

/// Client-submitted result of a finished round.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaySubmission {
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub time_taken: f64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayReceipt {
    pub outcome: PlayOutcome,
    pub streak: u32,
}

#[derive(Clone)]
pub struct GameService {
    ledger: PlayLedger,
    news: Arc<dyn NewsSource>,
    config: GameConfig,
}

impl GameService {
    pub fn new(
        db: &Database,
        clock: Arc<dyn Clock>,
        news: Arc<dyn NewsSource>,
        config: GameConfig,
    ) -> Self {
        Self {
            ledger: PlayLedger::new(db.pool().clone(), clock, config.daily_cap),
            news,
            config,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub async fn status(&self, player_id: &str) -> GameResult<PlayerStatus> {
        let player = self.ledger.player(player_id);
        let plays_today = player.count_today().await?;
        Ok(PlayerStatus {
            can_play: plays_today < self.config.daily_cap,
            plays_today,
            max_daily: self.config.daily_cap,
            streak: player.streak().await?,
            first_play_date: player.first_play_date().await?,
        })
    }

    pub async fn headline(&self, player_id: &str, preview: bool) -> GameResult<HeadlineOutcome> {
        let player = self.ledger.player(player_id);
        let plays_today = player.count_today().await?;
        if plays_today >= self.config.daily_cap && !preview {
            return Ok(HeadlineOutcome::RateLimited {
                plays_today,
                max_daily: self.config.daily_cap,
            });
        }

        let candidates = self.news.fetch().await?;
        if candidates.is_empty() {
            info!("News source returned no articles; serving placeholder");
            return Ok(HeadlineOutcome::Served(SelectedArticle::unavailable()));
        }

        let excluded = player.completed_headlines().await?;
        let allow_fallback = preview && self.config.preview_fallback;
        let mut rng = SmallRng::from_entropy();
        let picked = headline::select(
            &candidates,
            &excluded,
            &self.config.headline_filter,
            allow_fallback,
            &mut rng,
        );
        match picked {
            Some(article) => {
                debug!(
                    player = player_id,
                    headline = %article.headline,
                    url = %article.url,
                    preview,
                    "Serving headline"
                );
                Ok(HeadlineOutcome::Served(article))
            }
            None => {
                debug!(
                    player = player_id,
                    candidates = candidates.len(),
                    excluded = excluded.len(),
                    "No unseen headline left"
                );
                Ok(HeadlineOutcome::NoContent)
            }
        }
    }

    pub async fn submit_play(
        &self,
        player_id: &str,
        submission: PlaySubmission,
    ) -> GameResult<PlayReceipt> {
        let play = validate_submission(submission)?;
        let player = self.ledger.player(player_id);
        let outcome = player.record_play(&play).await?;
        Ok(PlayReceipt {
            outcome,
            streak: player.streak().await?,
        })
    }

    pub async fn history(&self, player_id: &str) -> GameResult<Vec<PlayRecord>> {
        self.ledger.player(player_id).history().await
    }

    pub async fn history_matching(
        &self,
        player_id: &str,
        filter: &HistoryFilter,
    ) -> GameResult<Vec<PlayRecord>> {
        self.ledger.player(player_id).history_matching(filter).await
    }

    pub async fn clear_history(&self, player_id: &str) -> GameResult<u64> {
        self.ledger.player(player_id).clear_history().await
    }

    pub async fn completed(&self, player_id: &str) -> GameResult<Vec<String>> {
        let mut headlines: Vec<_> = self
            .ledger
            .player(player_id)
            .completed_headlines()
            .await?
            .into_iter()
            .collect();
        headlines.sort();
        Ok(headlines)
    }

    pub async fn streak(&self, player_id: &str) -> GameResult<u32> {
        self.ledger.player(player_id).streak().await
    }
}

fn validate_submission(submission: PlaySubmission) -> GameResult<NewPlay> {
    let headline = submission
        .headline
        .as_deref()
        .map(headline::clean)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| GameError::validation("headline is required"))?;
    if !submission.score.is_finite() || submission.score < 0.0 {
        return Err(GameError::validation("score must be a non-negative number"));
    }
    if !submission.time_taken.is_finite() || submission.time_taken < 0.0 {
        return Err(GameError::validation(
            "timeTaken must be a non-negative number",
        ));
    }
    Ok(NewPlay {
        headline,
        score: submission.score,
        time_taken: submission.time_taken,
        url: submission.url.unwrap_or_default(),
        source_name: submission.source_name.unwrap_or_default(),
        published_at: submission.published_at.unwrap_or_default(),
    })
}
