use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{GameError, GameResult};
use crate::headline::RawArticle;

pub const NEWS_API_URL: &str = "https://newsapi.org/v2/top-headlines";
pub const DEFAULT_PAGE_SIZE: u32 = 30;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const NEWS_LANGUAGE: &str = "en";

/// Where candidate headlines come from. One call per headline request.
#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Returns the current batch; an empty batch is a valid answer.
    async fn fetch(&self) -> GameResult<Vec<RawArticle>>;
}

#[derive(Debug, Deserialize)]
struct NewsApiResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Option<Vec<RawArticle>>,
}

/// NewsAPI `top-headlines` client.
pub struct NewsApiClient {
    client: Client,
    endpoint: String,
    api_key: String,
    page_size: u32,
}

impl NewsApiClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> GameResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("newsle-rs/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: NEWS_API_URL.to_string(),
            api_key: api_key.into(),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl NewsSource for NewsApiClient {
    async fn fetch(&self) -> GameResult<Vec<RawArticle>> {
        let page_size = self.page_size.to_string();
        let params = [
            ("language", NEWS_LANGUAGE),
            ("pageSize", page_size.as_str()),
            ("apiKey", self.api_key.as_str()),
        ];
        let response = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        let payload: NewsApiResponse = serde_json::from_slice(&body)?;

        if !status.is_success() || payload.status.as_deref() == Some("error") {
            warn!(
                %status,
                code = payload.code.as_deref().unwrap_or("unknown"),
                message = payload.message.as_deref().unwrap_or(""),
                "News API returned no articles"
            );
        }
        Ok(payload.articles.unwrap_or_default())
    }
}

/// Fixed article list, loaded from a fixture file or built in memory.
#[derive(Default)]
pub struct StaticNewsSource {
    articles: RwLock<Vec<RawArticle>>,
}

impl StaticNewsSource {
    pub fn new(articles: Vec<RawArticle>) -> Self {
        Self {
            articles: RwLock::new(articles),
        }
    }

    /// Reads either a bare JSON array of articles or a NewsAPI-shaped document.
    pub fn from_file(path: impl AsRef<Path>) -> GameResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let articles = match serde_json::from_slice::<Vec<RawArticle>>(&bytes) {
            Ok(articles) => articles,
            Err(_) => {
                let payload: NewsApiResponse = serde_json::from_slice(&bytes).map_err(|e| {
                    GameError::validation(format!("{}: {e}", path.display()))
                })?;
                payload.articles.unwrap_or_default()
            }
        };
        info!(path = %path.display(), count = articles.len(), "Loaded news fixture");
        Ok(Self::new(articles))
    }

    pub fn replace(&self, articles: Vec<RawArticle>) {
        *self.articles.write() = articles;
    }

    pub fn len(&self) -> usize {
        self.articles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.read().is_empty()
    }
}

#[async_trait]
impl NewsSource for StaticNewsSource {
    async fn fetch(&self) -> GameResult<Vec<RawArticle>> {
        Ok(self.articles.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_source_serves_its_batch() {
        let source = StaticNewsSource::new(vec![RawArticle::new("One", "https://example.com/1")]);
        assert_eq!(source.fetch().await.unwrap().len(), 1);
        source.replace(Vec::new());
        assert!(source.is_empty());
        assert!(source.fetch().await.unwrap().is_empty());
    }

    #[test]
    fn error_payload_has_no_articles() {
        let payload: NewsApiResponse = serde_json::from_str(
            r#"{"status":"error","code":"rateLimited","message":"Too many requests"}"#,
        )
        .unwrap();
        assert_eq!(payload.status.as_deref(), Some("error"));
        assert!(payload.articles.unwrap_or_default().is_empty());
    }

    #[test]
    fn fixture_accepts_both_shapes() {
        let dir = std::env::temp_dir().join(format!("newsle-fixture-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let bare = dir.join("bare.json");
        std::fs::write(&bare, r#"[{"title":"A","url":"https://example.com/a"}]"#).unwrap();
        assert_eq!(StaticNewsSource::from_file(&bare).unwrap().len(), 1);

        let wrapped = dir.join("wrapped.json");
        std::fs::write(
            &wrapped,
            r#"{"status":"ok","totalResults":2,"articles":[
                {"title":"A","url":"https://example.com/a"},
                {"title":"B","url":"https://example.com/b"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(StaticNewsSource::from_file(&wrapped).unwrap().len(), 2);

        let broken = dir.join("broken.json");
        std::fs::write(&broken, "not json").unwrap();
        assert!(matches!(
            StaticNewsSource::from_file(&broken),
            Err(GameError::Validation(_))
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

#[cfg(all(test, feature = "web"))]
mod upstream_tests {
    use super::*;
    use crate::{Database, GameConfig, GameService, HeadlineOutcome, ManualClock};
    use axum::{Json, Router, extract::Query, http::StatusCode, routing::get};
    use chrono::NaiveDate;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    const API_KEY: &str = "test-key";

    async fn top_headlines(
        Query(params): Query<HashMap<String, String>>,
    ) -> (StatusCode, Json<Value>) {
        if params.get("apiKey").map(String::as_str) != Some(API_KEY) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "status": "error",
                    "code": "apiKeyInvalid",
                    "message": "Your API key is invalid or incorrect.",
                })),
            );
        }
        assert_eq!(params.get("language").map(String::as_str), Some("en"));
        assert_eq!(params.get("pageSize").map(String::as_str), Some("30"));
        (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "totalResults": 2,
                "articles": [
                    {
                        "source": { "id": null, "name": "Harbor Daily" },
                        "title": "Harbor bridge opens - Harbor Daily",
                        "description": "The span opened at dawn.",
                        "url": "https://example.com/bridge",
                        "urlToImage": null,
                        "publishedAt": "2026-10-17T06:00:00Z"
                    },
                    { "title": "[Removed]", "url": null }
                ]
            })),
        )
    }

    async fn rate_limited() -> (StatusCode, Json<Value>) {
        (
            StatusCode::OK,
            Json(json!({
                "status": "error",
                "code": "rateLimited",
                "message": "You have made too many requests recently.",
            })),
        )
    }

    async fn maintenance_page() -> &'static str {
        "<html><body>Down for maintenance</body></html>"
    }

    async fn spawn_stub() -> SocketAddr {
        let router = Router::new()
            .route("/v2/top-headlines", get(top_headlines))
            .route("/rate-limited", get(rate_limited))
            .route("/maintenance", get(maintenance_page));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn client(api_key: &str, endpoint: String) -> NewsApiClient {
        NewsApiClient::new(api_key, Duration::from_secs(5))
            .unwrap()
            .with_endpoint(endpoint)
    }

    #[tokio::test]
    async fn fetches_top_headlines() {
        let addr = spawn_stub().await;
        let source = client(API_KEY, format!("http://{addr}/v2/top-headlines"));
        let articles = source.fetch().await.unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(
            articles[0].title.as_deref(),
            Some("Harbor bridge opens - Harbor Daily")
        );
        assert_eq!(
            articles[0].source.as_ref().and_then(|s| s.name.as_deref()),
            Some("Harbor Daily")
        );
    }

    #[tokio::test]
    async fn rejected_key_yields_no_articles() {
        let addr = spawn_stub().await;
        let source = client("wrong-key", format!("http://{addr}/v2/top-headlines"));
        assert!(source.fetch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn error_status_yields_no_articles() {
        let addr = spawn_stub().await;
        let source = client(API_KEY, format!("http://{addr}/rate-limited"));
        assert!(source.fetch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_body_is_an_upstream_error() {
        let addr = spawn_stub().await;
        let source = client(API_KEY, format!("http://{addr}/maintenance"));
        assert!(matches!(source.fetch().await, Err(GameError::Upstream(_))));
    }

    #[tokio::test]
    async fn unreachable_host_is_an_upstream_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let source = client(API_KEY, format!("http://{addr}/v2/top-headlines"));
        assert!(matches!(source.fetch().await, Err(GameError::Upstream(_))));
    }

    #[tokio::test]
    async fn rejected_key_serves_the_placeholder() {
        let addr = spawn_stub().await;
        let db = Database::in_memory().await.unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let news = Arc::new(client("wrong-key", format!("http://{addr}/v2/top-headlines")));
        let game = GameService::new(
            &db,
            Arc::new(ManualClock::new(today)),
            news,
            GameConfig::default(),
        );
        match game.headline("reader", false).await.unwrap() {
            HeadlineOutcome::Served(article) => assert!(article.is_unavailable()),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn served_headline_is_cleaned() {
        let addr = spawn_stub().await;
        let db = Database::in_memory().await.unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let news = Arc::new(client(API_KEY, format!("http://{addr}/v2/top-headlines")));
        let game = GameService::new(
            &db,
            Arc::new(ManualClock::new(today)),
            news,
            GameConfig::default(),
        );
        match game.headline("reader", false).await.unwrap() {
            HeadlineOutcome::Served(article) => {
                assert_eq!(article.headline, "HARBOR BRIDGE OPENS");
                assert_eq!(article.source_name, "Harbor Daily");
                assert_eq!(article.description, "The span opened at dawn.");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
