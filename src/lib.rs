//! Newsle: a daily headline-guessing game.
//!
//! The server pulls top headlines from a news source, cleans them, and hands
//! one unseen headline at a time to the browser. Completed rounds are stored
//! per player so the game can enforce a daily cap, compute streaks, and avoid
//! repeating headlines.

pub mod clock;
pub mod error;
pub mod game;
pub mod headline;
pub mod identity;
pub mod ledger;
pub mod news;
pub mod store;
#[cfg(feature = "web")]
pub mod web;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{GameError, GameResult};
pub use game::{GameConfig, GameService, HeadlineOutcome, PlayReceipt, PlaySubmission, PlayerStatus};
pub use headline::{HeadlineFilter, RawArticle, SelectedArticle, clean, select};
pub use identity::{IdentityPolicy, IdentityResolver, ResolvedPlayer};
pub use ledger::{HistoryFilter, NewPlay, PlayLedger, PlayOutcome, PlayRecord, streak_from_dates};
pub use news::{NewsApiClient, NewsSource, StaticNewsSource};
pub use store::Database;
