//! Persisted play records and the bookkeeping derived from them.
//!
//! Every query is scoped to a single player. The daily cap and the
//! one-record-per-headline rule are both enforced here.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{GameError, GameResult};

pub const DEFAULT_DAILY_CAP: u32 = 6;
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayRecord {
    pub id: i64,
    #[serde(skip)]
    pub player_id: String,
    pub headline: String,
    pub score: f64,
    pub time_taken: f64,
    pub date: NaiveDate,
    pub source_name: String,
    pub url: String,
    pub published_at: String,
    pub created_at: i64,
}

/// A completed play, already carrying the cleaned headline.
#[derive(Debug, Clone, Default)]
pub struct NewPlay {
    pub headline: String,
    pub score: f64,
    pub time_taken: f64,
    pub url: String,
    pub source_name: String,
    pub published_at: String,
}

/// Optional narrowing of a player's history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub date: Option<NaiveDate>,
    /// Case-insensitive substring of the cleaned headline.
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Created,
    AlreadyExists,
    DailyLimitReached { plays_today: u32, max_daily: u32 },
}

#[derive(Clone)]
pub struct PlayLedger {
    pool: Pool<Sqlite>,
    clock: Arc<dyn Clock>,
    daily_cap: u32,
}

impl PlayLedger {
    pub fn new(pool: Pool<Sqlite>, clock: Arc<dyn Clock>, daily_cap: u32) -> Self {
        Self {
            pool,
            clock,
            daily_cap,
        }
    }

    pub fn daily_cap(&self) -> u32 {
        self.daily_cap
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn player<'a>(&'a self, player_id: &'a str) -> PlayerLedger<'a> {
        PlayerLedger {
            ledger: self,
            player_id,
        }
    }
}

/// View of the ledger restricted to one player.
pub struct PlayerLedger<'a> {
    ledger: &'a PlayLedger,
    player_id: &'a str,
}

impl PlayerLedger<'_> {
    pub fn player_id(&self) -> &str {
        self.player_id
    }

    pub async fn count_today(&self) -> GameResult<u32> {
        let today = format_date(self.ledger.today());
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM plays WHERE player_id = ? AND played_on = ?")
                .bind(self.player_id)
                .bind(&today)
                .fetch_one(&self.ledger.pool)
                .await?;
        Ok(count.max(0) as u32)
    }

    /// Inserts the play unless the player is at the daily cap or already has
    /// this headline. The cap check and the insert run as one statement under
    /// a single write lock.
    pub async fn record_play(&self, play: &NewPlay) -> GameResult<PlayOutcome> {
        let today = format_date(self.ledger.today());
        let cap = self.ledger.daily_cap;
        let inserted = sqlx::query(
            "INSERT INTO plays (player_id, headline, score, time_taken, played_on, source_name, url, published_at, created_at)
             SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?
             WHERE (SELECT COUNT(*) FROM plays WHERE player_id = ? AND played_on = ?) < ?
             ON CONFLICT (player_id, headline) DO NOTHING",
        )
        .bind(self.player_id)
        .bind(&play.headline)
        .bind(play.score)
        .bind(play.time_taken)
        .bind(&today)
        .bind(&play.source_name)
        .bind(&play.url)
        .bind(&play.published_at)
        .bind(self.ledger.clock.now_ts())
        .bind(self.player_id)
        .bind(&today)
        .bind(i64::from(cap))
        .execute(&self.ledger.pool)
        .await?;

        if inserted.rows_affected() > 0 {
            info!(
                player = self.player_id,
                headline = %play.headline,
                date = %today,
                "Recorded play"
            );
            return Ok(PlayOutcome::Created);
        }

        let plays_today = self.count_today().await?;
        if plays_today >= cap {
            debug!(player = self.player_id, plays_today, "Daily cap reached");
            return Ok(PlayOutcome::DailyLimitReached {
                plays_today,
                max_daily: cap,
            });
        }
        Ok(PlayOutcome::AlreadyExists)
    }

    pub async fn streak(&self) -> GameResult<u32> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT played_on FROM plays WHERE player_id = ?")
                .bind(self.player_id)
                .fetch_all(&self.ledger.pool)
                .await?;
        let dates = rows
            .iter()
            .map(|(raw,)| parse_date(raw))
            .collect::<GameResult<HashSet<_>>>()?;
        Ok(streak_from_dates(&dates, self.ledger.today()))
    }

    pub async fn first_play_date(&self) -> GameResult<Option<NaiveDate>> {
        let (first,): (Option<String>,) =
            sqlx::query_as("SELECT MIN(played_on) FROM plays WHERE player_id = ?")
                .bind(self.player_id)
                .fetch_one(&self.ledger.pool)
                .await?;
        first.as_deref().map(parse_date).transpose()
    }

    pub async fn completed_headlines(&self) -> GameResult<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT headline FROM plays WHERE player_id = ?")
            .bind(self.player_id)
            .fetch_all(&self.ledger.pool)
            .await?;
        Ok(rows.into_iter().map(|(headline,)| headline).collect())
    }

    /// All records, most recent day first, later inserts first within a day.
    pub async fn history(&self) -> GameResult<Vec<PlayRecord>> {
        self.history_matching(&HistoryFilter::default()).await
    }

    /// Like [`history`](Self::history), restricted to one day and/or a
    /// headline substring.
    pub async fn history_matching(&self, filter: &HistoryFilter) -> GameResult<Vec<PlayRecord>> {
        let date = filter.date.map(format_date);
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_uppercase);
        let rows: Vec<PlayRow> = sqlx::query_as(
            "SELECT id, player_id, headline, score, time_taken, played_on, source_name, url, published_at, created_at
             FROM plays
             WHERE player_id = ?
               AND (? IS NULL OR played_on = ?)
               AND (? IS NULL OR instr(headline, ?) > 0)
             ORDER BY played_on DESC, id DESC",
        )
        .bind(self.player_id)
        .bind(&date)
        .bind(&date)
        .bind(&search)
        .bind(&search)
        .fetch_all(&self.ledger.pool)
        .await?;
        rows.into_iter().map(PlayRow::into_record).collect()
    }

    pub async fn clear_history(&self) -> GameResult<u64> {
        let result = sqlx::query("DELETE FROM plays WHERE player_id = ?")
            .bind(self.player_id)
            .execute(&self.ledger.pool)
            .await?;
        info!(
            player = self.player_id,
            removed = result.rows_affected(),
            "Cleared play history"
        );
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct PlayRow {
    id: i64,
    player_id: String,
    headline: String,
    score: f64,
    time_taken: f64,
    played_on: String,
    source_name: String,
    url: String,
    published_at: String,
    created_at: i64,
}

impl PlayRow {
    fn into_record(self) -> GameResult<PlayRecord> {
        Ok(PlayRecord {
            date: parse_date(&self.played_on)?,
            id: self.id,
            player_id: self.player_id,
            headline: self.headline,
            score: self.score,
            time_taken: self.time_taken,
            source_name: self.source_name,
            url: self.url,
            published_at: self.published_at,
            created_at: self.created_at,
        })
    }
}

/// Consecutive days ending at `today` that appear in `dates`.
pub fn streak_from_dates(dates: &HashSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut streak = 0;
    let mut day = today;
    while dates.contains(&day) {
        streak += 1;
        match day.pred_opt() {
            Some(previous) => day = previous,
            None => break,
        }
    }
    streak
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(raw: &str) -> GameResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| {
        GameError::Database(sqlx::Error::Decode(
            format!("invalid play date {raw:?}: {e}").into(),
        ))
    })
}
