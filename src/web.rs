use crate::{
    GameError, GameService, HeadlineOutcome, HistoryFilter, IdentityResolver, PlayOutcome,
    PlaySubmission, ResolvedPlayer,
};
use askama::Template;
use chrono::NaiveDate;
use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use cookie::{Cookie, SameSite};
use include_dir::{Dir, include_dir};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn};

type SharedState = Arc<AppState>;
pub const PLAYER_COOKIE: &str = "player_id";
const COOKIE_MAX_AGE_DAYS: i64 = 3650;

static ASSETS: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/static");

#[derive(Clone)]
pub struct AppState {
    pub game: GameService,
    pub identity: IdentityResolver,
    pub secure_cookie: bool,
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    /// Also mount `/save`, `/history/{id}`, `/completed/{id}` and `/streak/{id}`.
    pub path_routes: bool,
    pub secure_cookie: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            path_routes: true,
            secure_cookie: false,
        }
    }
}

#[derive(Debug)]
pub enum WebError {
    Io(std::io::Error),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for WebError {}

impl From<std::io::Error> for WebError {
    fn from(value: std::io::Error) -> Self {
        WebError::Io(value)
    }
}

pub async fn serve(
    config: WebConfig,
    game: GameService,
    identity: IdentityResolver,
) -> Result<(), WebError> {
    let max_daily = game.config().daily_cap;
    let policy = identity.policy();
    let state = Arc::new(AppState {
        game,
        identity,
        secure_cookie: config.secure_cookie,
    });
    let router = build_router(state, config.path_routes);
    info!(
        %config.addr,
        path_routes = config.path_routes,
        max_daily,
        identity = ?policy,
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<GameError> for ApiError {
    fn from(err: GameError) -> Self {
        match err {
            GameError::Validation(message) => ApiError::bad_request(message),
            GameError::UnknownPlayer(id) => ApiError::not_found(format!("No player {id:?}")),
            GameError::Upstream(message) => {
                warn!(%message, "News source failed");
                ApiError {
                    status: StatusCode::BAD_GATEWAY,
                    message: "The news source is unavailable right now.".to_string(),
                }
            }
            other => {
                error!(error = %other, "Request failed");
                ApiError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "Internal server error".to_string(),
                }
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

fn build_router(state: SharedState, path_routes: bool) -> Router {
    let mut router = Router::new()
        .route("/", get(home))
        .route("/static/*path", get(static_asset))
        .route("/status", get(api_status))
        .route("/headline", get(api_headline))
        .route("/play", post(api_play))
        .route("/history", get(api_history).delete(api_clear_history))
        .route("/healthz", get(health));
    if path_routes {
        router = router
            .route("/save", post(api_save))
            .route("/history/:player_id", get(api_player_history))
            .route("/completed/:player_id", get(api_player_completed))
            .route("/streak/:player_id", get(api_player_streak));
    }
    router
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn player_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == PLAYER_COOKIE)
        .map(|cookie| cookie.value().to_string())
}

async fn identify(state: &AppState, headers: &HeaderMap) -> Result<ResolvedPlayer, ApiError> {
    let token = player_cookie(headers);
    Ok(state.identity.resolve(token.as_deref()).await?)
}

/// Hands a freshly minted id back to the browser.
fn with_player(state: &AppState, player: &ResolvedPlayer, response: impl IntoResponse) -> Response {
    let mut response = response.into_response();
    if player.issued {
        let cookie = Cookie::build((PLAYER_COOKIE, player.id.clone()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(state.secure_cookie)
            .max_age(cookie::time::Duration::days(COOKIE_MAX_AGE_DAYS))
            .build();
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(err) => warn!(error = %err, "Could not encode player cookie"),
        }
    }
    response
}

fn rate_limited(plays_today: u32, max_daily: u32) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "Daily limit reached",
            "playsToday": plays_today,
            "maxDaily": max_daily,
        })),
    )
        .into_response()
}

fn play_response(outcome: PlayOutcome, streak: u32) -> Response {
    match outcome {
        PlayOutcome::Created => Json(PlayResponse {
            status: "ok",
            streak,
        })
        .into_response(),
        PlayOutcome::AlreadyExists => Json(PlayResponse {
            status: "exists",
            streak,
        })
        .into_response(),
        PlayOutcome::DailyLimitReached {
            plays_today,
            max_daily,
        } => rate_limited(plays_today, max_daily),
    }
}

async fn home(State(state): State<SharedState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let player = identify(&state, &headers).await?;
    let template = IndexTemplate {
        max_daily: state.game.config().daily_cap,
        version: env!("CARGO_PKG_VERSION"),
    };
    let page = template.render().map(Html).map_err(|err| {
        error!(error = %err, "Failed to render index page");
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Failed to render page".to_string(),
        }
    });
    Ok(with_player(&state, &player, page))
}

async fn static_asset(Path(path): Path<String>) -> Response {
    let Some(file) = ASSETS.get_file(&path) else {
        return ApiError::not_found(format!("No asset {path:?}")).into_response();
    };
    let content_type = match path.rsplit('.').next() {
        Some("js") => mime::APPLICATION_JAVASCRIPT_UTF_8,
        Some("css") => mime::TEXT_CSS_UTF_8,
        Some("svg") => mime::IMAGE_SVG,
        _ => mime::APPLICATION_OCTET_STREAM,
    };
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
        ],
        file.contents(),
    )
        .into_response()
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "newsle-web" }))
}

async fn api_status(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let player = identify(&state, &headers).await?;
    let status = state.game.status(&player.id).await.map(Json);
    Ok(with_player(&state, &player, status.map_err(ApiError::from)))
}

async fn api_headline(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<HeadlineParams>,
) -> Result<Response, ApiError> {
    let player = identify(&state, &headers).await?;
    let preview = params.preview.as_deref().is_some_and(is_truthy);
    let response = state
        .game
        .headline(&player.id, preview)
        .await
        .map(|outcome| match outcome {
            HeadlineOutcome::Served(article) => Json(article).into_response(),
            HeadlineOutcome::RateLimited {
                plays_today,
                max_daily,
            } => rate_limited(plays_today, max_daily),
            HeadlineOutcome::NoContent => StatusCode::NO_CONTENT.into_response(),
        });
    Ok(with_player(&state, &player, response.map_err(ApiError::from)))
}

async fn api_play(
    State(state): State<SharedState>,
    headers: HeaderMap,
    payload: Result<Json<PlaySubmission>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(submission) = payload?;
    let player = identify(&state, &headers).await?;
    let response = state
        .game
        .submit_play(&player.id, submission)
        .await
        .map(|receipt| play_response(receipt.outcome, receipt.streak));
    Ok(with_player(&state, &player, response.map_err(ApiError::from)))
}

async fn api_history(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<Response, ApiError> {
    let player = identify(&state, &headers).await?;
    let response = match params.into_filter() {
        Ok(filter) => state
            .game
            .history_matching(&player.id, &filter)
            .await
            .map(Json)
            .map_err(ApiError::from),
        Err(err) => Err(err),
    };
    Ok(with_player(&state, &player, response))
}

async fn api_clear_history(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let player = identify(&state, &headers).await?;
    let response = state
        .game
        .clear_history(&player.id)
        .await
        .map(|removed| Json(json!({ "status": "cleared", "removed": removed })));
    Ok(with_player(&state, &player, response.map_err(ApiError::from)))
}

async fn api_save(
    State(state): State<SharedState>,
    payload: Result<Json<SaveRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let player_id = request
        .player_id
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("playerId is required"))?;
    let player_id = state.identity.lookup(player_id).await?;
    let receipt = state.game.submit_play(&player_id, request.play).await?;
    Ok(play_response(receipt.outcome, receipt.streak))
}

async fn api_player_history(
    State(state): State<SharedState>,
    Path(player_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Response, ApiError> {
    let filter = params.into_filter()?;
    let player_id = state.identity.lookup(&player_id).await?;
    let history = state.game.history_matching(&player_id, &filter).await?;
    Ok(Json(history).into_response())
}

async fn api_player_completed(
    State(state): State<SharedState>,
    Path(player_id): Path<String>,
) -> Result<Response, ApiError> {
    let player_id = state.identity.lookup(&player_id).await?;
    Ok(Json(state.game.completed(&player_id).await?).into_response())
}

async fn api_player_streak(
    State(state): State<SharedState>,
    Path(player_id): Path<String>,
) -> Result<Response, ApiError> {
    let player_id = state.identity.lookup(&player_id).await?;
    let streak = state.game.streak(&player_id).await?;
    Ok(Json(json!({ "playerId": player_id, "streak": streak })).into_response())
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[derive(Debug, Deserialize)]
struct HeadlineParams {
    preview: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    date: Option<String>,
    search: Option<String>,
}

impl HistoryParams {
    fn into_filter(self) -> Result<HistoryFilter, ApiError> {
        let date = match self.date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(raw) => Some(NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                ApiError::bad_request(format!("date must look like 2026-01-31, got {raw:?}"))
            })?),
            None => None,
        };
        Ok(HistoryFilter {
            date,
            search: self.search,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveRequest {
    #[serde(default)]
    player_id: Option<String>,
    #[serde(flatten)]
    play: PlaySubmission,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlayResponse {
    status: &'static str,
    streak: u32,
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Newsle • Guess today's headline</title>
    <link rel="stylesheet" href="/static/style.css" />
  </head>
  <body>
    <main class="page">
      <header class="masthead">
        <p class="eyebrow">Newsle v{{ version }}</p>
        <h1>Guess the headline</h1>
        <p class="lede">Reveal today's top stories one letter at a time. Up to {{ max_daily }} headlines a day.</p>
        <div id="streakDisplay" class="streak">0 day streak</div>
      </header>

      <section id="limitMessage" class="notice" hidden>All done! Come back tomorrow for more headlines to solve!</section>

      <section class="card">
        <img id="articleImage" class="article-image" alt="" hidden />
        <div id="board" class="board" aria-live="polite"></div>
        <div class="meta">
          <span>Misses left: <strong id="missesLeft">-</strong></span>
          <span>Time: <strong id="stopwatch">0.0</strong>s</span>
          <span>Score: <strong id="score">-</strong></span>
        </div>
        <div id="keyboard" class="keyboard"></div>
        <div id="reveal" class="reveal" hidden>
          <p id="sourceName" class="eyebrow"></p>
          <p id="synopsis"></p>
          <p id="publishedAt" class="muted"></p>
          <div class="actions">
            <a id="articleLink" class="button" target="_blank" rel="noopener">Read full article</a>
            <button id="nextArticle" class="button" type="button">Next article</button>
          </div>
        </div>
      </section>

      <section class="card">
        <div class="history-header">
          <h2>History</h2>
          <button id="clearHistory" class="button subtle" type="button">Clear</button>
        </div>
        <input id="historySearch" class="search" type="search" placeholder="Search past headlines" autocomplete="off" />
        <div class="calendar-nav">
          <button id="prevMonth" class="button subtle" type="button" aria-label="Previous month">&lsaquo;</button>
          <span id="monthTitle" class="month-title"></span>
          <button id="nextMonth" class="button subtle" type="button" aria-label="Next month">&rsaquo;</button>
        </div>
        <div id="calendar" class="calendar"></div>
        <p id="historyHeading" class="muted"></p>
        <ol id="historyList" class="history"></ol>
      </section>
    </main>
    <script src="/static/app.js" defer></script>
  </body>
</html>"#,
    ext = "html"
)]
struct IndexTemplate {
    max_daily: u32,
    version: &'static str,
}
