use std::error::Error;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use newsle_rs::headline::DEFAULT_MAX_HEADLINE_LEN;
use newsle_rs::ledger::DEFAULT_DAILY_CAP;
use newsle_rs::store::DEFAULT_DATABASE_URL;
use newsle_rs::{Database, HeadlineFilter, PlayLedger, PlayRecord, SystemClock, clean};
use serde_json::json;
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(name = "newsle-rs", about = "Guess today's news headlines", version)]
pub struct Cli {
    /// Emit JSON instead of human-readable tables.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the game server.
    #[cfg(feature = "web")]
    Serve(ServeArgs),
    /// Show how raw titles are cleaned and whether they are playable.
    Clean {
        /// One or more raw article titles.
        #[arg(required = true)]
        titles: Vec<String>,
        /// Longest cleaned headline that may be served.
        #[arg(long, default_value_t = DEFAULT_MAX_HEADLINE_LEN)]
        max_headline_len: usize,
        /// Accept headlines of any length.
        #[arg(long)]
        no_length_cap: bool,
    },
    /// Show today's play count, streak and first play date for a player.
    Status {
        #[command(flatten)]
        store: StoreArgs,
        /// Player id (the value of the player cookie).
        #[arg(long)]
        player: String,
    },
    /// List a player's recorded plays, newest first.
    History {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        player: String,
    },
    /// Delete every recorded play for a player.
    Clear {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        player: String,
    },
}

#[derive(Args, Debug, Clone)]
struct StoreArgs {
    /// SQLite database holding players and plays.
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    database_url: String,
    /// Completed plays allowed per player per day.
    #[arg(long, env = "NEWSLE_DAILY_CAP", default_value_t = DEFAULT_DAILY_CAP)]
    daily_cap: u32,
}

#[cfg(feature = "web")]
#[derive(Args, Debug, Clone)]
struct ServeArgs {
    /// Address to bind the HTTP listener to.
    #[arg(long, env = "NEWSLE_ADDR", default_value = "127.0.0.1:8080")]
    addr: std::net::SocketAddr,
    #[command(flatten)]
    store: StoreArgs,
    /// NewsAPI key used for top-headlines requests.
    #[arg(
        long,
        env = "NEWS_API_KEY",
        hide_env_values = true,
        required_unless_present = "news_fixture"
    )]
    news_api_key: Option<String>,
    /// Serve articles from a JSON file instead of NewsAPI.
    #[arg(long, env = "NEWSLE_FIXTURE")]
    news_fixture: Option<std::path::PathBuf>,
    /// Longest cleaned headline that may be served.
    #[arg(long, default_value_t = DEFAULT_MAX_HEADLINE_LEN)]
    max_headline_len: usize,
    /// Serve headlines of any length.
    #[arg(long)]
    no_length_cap: bool,
    /// Never fall back to already-played headlines on preview requests.
    #[arg(long)]
    no_preview_fallback: bool,
    /// Do not mount the player-id-in-path routes.
    #[arg(long)]
    no_path_routes: bool,
    /// Only honour player ids minted by this server.
    #[arg(long)]
    strict_identity: bool,
    /// Mark the player cookie Secure (use behind HTTPS).
    #[arg(long)]
    secure_cookie: bool,
    /// Upstream request timeout in seconds.
    #[arg(long, default_value_t = 10)]
    fetch_timeout_secs: u64,
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    match cli.command {
        #[cfg(feature = "web")]
        Command::Serve(args) => handle_serve(args),
        Command::Clean {
            titles,
            max_headline_len,
            no_length_cap,
        } => handle_clean(titles, headline_filter(max_headline_len, no_length_cap), cli.json),
        Command::Status { store, player } => handle_status(store, player, cli.json),
        Command::History { store, player } => handle_history(store, player, cli.json),
        Command::Clear { store, player } => handle_clear(store, player, cli.json),
    }
}

fn headline_filter(max_headline_len: usize, no_length_cap: bool) -> HeadlineFilter {
    if no_length_cap {
        HeadlineFilter::unlimited()
    } else {
        HeadlineFilter {
            max_len: Some(max_headline_len),
        }
    }
}

fn runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}

async fn open_ledger(store: &StoreArgs) -> Result<PlayLedger, Box<dyn Error>> {
    let db = Database::connect(&store.database_url).await?;
    Ok(PlayLedger::new(
        db.pool().clone(),
        Arc::new(SystemClock),
        store.daily_cap,
    ))
}

#[cfg(feature = "web")]
fn handle_serve(args: ServeArgs) -> Result<(), Box<dyn Error>> {
    use newsle_rs::web::{self, WebConfig};
    use newsle_rs::{
        GameConfig, GameService, IdentityPolicy, IdentityResolver, NewsApiClient, NewsSource,
        StaticNewsSource,
    };
    use std::time::Duration;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let news: Arc<dyn NewsSource> = match (&args.news_fixture, &args.news_api_key) {
        (Some(path), _) => Arc::new(StaticNewsSource::from_file(path)?),
        (None, Some(key)) => Arc::new(NewsApiClient::new(
            key.clone(),
            Duration::from_secs(args.fetch_timeout_secs.max(1)),
        )?),
        (None, None) => return Err("either --news-api-key or --news-fixture is required".into()),
    };
    let config = GameConfig {
        daily_cap: args.store.daily_cap,
        headline_filter: headline_filter(args.max_headline_len, args.no_length_cap),
        preview_fallback: !args.no_preview_fallback,
    };
    let policy = if args.strict_identity {
        IdentityPolicy::ServerMinted
    } else {
        IdentityPolicy::TrustClient
    };
    let web_config = WebConfig {
        addr: args.addr,
        path_routes: !args.no_path_routes,
        secure_cookie: args.secure_cookie,
    };

    runtime()?.block_on(async move {
        let db = Database::connect(&args.store.database_url).await?;
        let clock = Arc::new(SystemClock);
        let game = GameService::new(&db, clock.clone(), news, config);
        let identity = IdentityResolver::new(db.pool().clone(), clock, policy);
        web::serve(web_config, game, identity).await?;
        Ok::<(), Box<dyn Error>>(())
    })
}

fn handle_clean(
    titles: Vec<String>,
    filter: HeadlineFilter,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let rows: Vec<(String, String, bool)> = titles
        .into_iter()
        .map(|raw| {
            let cleaned = clean(&raw);
            let playable = filter.accepts(&cleaned);
            (raw, cleaned, playable)
        })
        .collect();

    if as_json {
        let payload: Vec<_> = rows
            .iter()
            .map(|(raw, cleaned, playable)| {
                json!({ "raw": raw, "headline": cleaned, "playable": playable })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_clean_table(&rows);
    }
    Ok(())
}

fn handle_status(store: StoreArgs, player: String, as_json: bool) -> Result<(), Box<dyn Error>> {
    let (plays_today, streak, first_play_date, max_daily) = runtime()?.block_on(async {
        let ledger = open_ledger(&store).await?;
        let view = ledger.player(&player);
        Ok::<_, Box<dyn Error>>((
            view.count_today().await?,
            view.streak().await?,
            view.first_play_date().await?,
            ledger.daily_cap(),
        ))
    })?;

    if as_json {
        let payload = json!({
            "playerId": player,
            "canPlay": plays_today < max_daily,
            "playsToday": plays_today,
            "maxDaily": max_daily,
            "streak": streak,
            "firstPlayDate": first_play_date,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Player:      {player}");
        println!("Plays today: {plays_today}/{max_daily}");
        println!("Streak:      {streak} day(s)");
        match first_play_date {
            Some(date) => println!("First play:  {date}"),
            None => println!("First play:  <never>"),
        }
    }
    Ok(())
}

fn handle_history(store: StoreArgs, player: String, as_json: bool) -> Result<(), Box<dyn Error>> {
    let records = runtime()?.block_on(async {
        let ledger = open_ledger(&store).await?;
        Ok::<_, Box<dyn Error>>(ledger.player(&player).history().await?)
    })?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        print_history_table(&player, &records);
    }
    Ok(())
}

fn handle_clear(store: StoreArgs, player: String, as_json: bool) -> Result<(), Box<dyn Error>> {
    let removed = runtime()?.block_on(async {
        let ledger = open_ledger(&store).await?;
        Ok::<_, Box<dyn Error>>(ledger.player(&player).clear_history().await?)
    })?;

    if as_json {
        let payload = json!({ "playerId": player, "status": "cleared", "removed": removed });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Removed {removed} play(s) for player {player}.");
    }
    Ok(())
}

fn print_clean_table(rows: &[(String, String, bool)]) {
    let width = rows
        .iter()
        .map(|(_, cleaned, _)| cleaned.chars().count())
        .max()
        .unwrap_or(8)
        .max("HEADLINE".len());
    println!("{:<width$}  {}", "HEADLINE", "PLAYABLE", width = width);
    println!("{:-<width$}  {}", "", "--------", width = width);
    for (_, cleaned, playable) in rows {
        let shown = if cleaned.is_empty() { "<empty>" } else { cleaned };
        let verdict = if *playable { "yes" } else { "no" };
        println!("{:<width$}  {}", shown, verdict, width = width);
    }
}

fn print_history_table(player: &str, records: &[PlayRecord]) {
    if records.is_empty() {
        println!("No plays recorded for player {player}.");
        return;
    }
    let width = records
        .iter()
        .map(|record| record.headline.chars().count())
        .max()
        .unwrap_or(8)
        .max("HEADLINE".len());
    println!(
        "{:<10}  {:<width$}  {:>8}  {:>8}",
        "DATE",
        "HEADLINE",
        "SCORE",
        "TIME",
        width = width
    );
    println!("{:-<10}  {:-<width$}  {:->8}  {:->8}", "", "", "", "", width = width);
    for record in records {
        println!(
            "{:<10}  {:<width$}  {:>8.1}  {:>7.1}s",
            record.date.to_string(),
            record.headline,
            record.score,
            record.time_taken,
            width = width
        );
    }
}
