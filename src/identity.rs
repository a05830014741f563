use rand::{Rng, distributions::Alphanumeric, thread_rng};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{GameError, GameResult};

const PLAYER_ID_LEN: usize = 24;
const MAX_TOKEN_LEN: usize = 64;

/// How client-presented identity tokens are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentityPolicy {
    /// Unknown tokens become players under that id.
    #[default]
    TrustClient,
    /// Only ids minted by this server are honoured.
    ServerMinted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlayer {
    pub id: String,
    /// A players row was inserted for this request.
    pub created: bool,
    /// The id was minted here and must be handed back to the client.
    pub issued: bool,
}

#[derive(Clone)]
pub struct IdentityResolver {
    pool: Pool<Sqlite>,
    clock: Arc<dyn Clock>,
    policy: IdentityPolicy,
}

impl IdentityResolver {
    pub fn new(pool: Pool<Sqlite>, clock: Arc<dyn Clock>, policy: IdentityPolicy) -> Self {
        Self {
            pool,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> IdentityPolicy {
        self.policy
    }

    pub async fn resolve(&self, token: Option<&str>) -> GameResult<ResolvedPlayer> {
        let Some(token) = token.map(str::trim).filter(|t| is_well_formed(t)) else {
            return self.mint().await;
        };
        if self.exists(token).await? {
            return Ok(ResolvedPlayer {
                id: token.to_string(),
                created: false,
                issued: false,
            });
        }
        match self.policy {
            IdentityPolicy::TrustClient => {
                let created = self.insert(token).await?;
                Ok(ResolvedPlayer {
                    id: token.to_string(),
                    created,
                    issued: false,
                })
            }
            IdentityPolicy::ServerMinted => {
                debug!(token, "Ignoring unrecognized player token");
                self.mint().await
            }
        }
    }

    /// Resolves an id named explicitly in a request path or body.
    pub async fn lookup(&self, player_id: &str) -> GameResult<String> {
        let player_id = player_id.trim();
        if !is_well_formed(player_id) {
            return Err(GameError::validation("player id is missing or malformed"));
        }
        if self.exists(player_id).await? {
            return Ok(player_id.to_string());
        }
        match self.policy {
            IdentityPolicy::TrustClient => {
                self.insert(player_id).await?;
                Ok(player_id.to_string())
            }
            IdentityPolicy::ServerMinted => Err(GameError::UnknownPlayer(player_id.to_string())),
        }
    }

    async fn exists(&self, player_id: &str) -> GameResult<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM players WHERE id = ?")
            .bind(player_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn insert(&self, player_id: &str) -> GameResult<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO players (id, created_at) VALUES (?, ?)")
            .bind(player_id)
            .bind(self.clock.now_ts())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mint(&self) -> GameResult<ResolvedPlayer> {
        loop {
            let id = generate_player_id();
            if self.insert(&id).await? {
                info!(player = %id, "Registered new player");
                return Ok(ResolvedPlayer {
                    id,
                    created: true,
                    issued: true,
                });
            }
        }
    }
}

pub fn generate_player_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PLAYER_ID_LEN)
        .map(char::from)
        .collect()
}

fn is_well_formed(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_TOKEN_LEN
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
