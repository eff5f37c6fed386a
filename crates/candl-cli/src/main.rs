use std::sync::Arc;

use anyhow::{Context, Result};
use candl_core::{AnalysisError, ConsensusProvider, SentimentScorer};
use candl_orchestrator::{
    AnalysisOutcome, Collaborators, LocalStore, OrchestratorConfig, RequestCoordinator,
    SuggestionDebouncer,
};
use clap::Parser;
use finnhub_client::{ConsensusClient, FinnhubClient, SentimentClient};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

mod commands;
mod display;

use commands::{Command, HELP};

#[derive(Parser)]
#[command(name = "candl", about = "Live market snapshots for one symbol at a time")]
struct Cli {
    /// SQLite URL for the local store (overrides CANDL_DATABASE_URL).
    #[arg(long)]
    database: Option<String>,

    /// Symbol to analyze on start.
    #[arg(long)]
    symbol: Option<String>,

    /// Disable the periodic background refresh.
    #[arg(long, default_value_t = false)]
    no_refresh: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // Logs go to stderr so they don't interleave with snapshot output.
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let mut config = OrchestratorConfig::from_env()?;
    if let Some(url) = cli.database {
        config.database_url = url;
    }
    if cli.no_refresh {
        config.auto_refresh = false;
    }

    let api_key = config
        .finnhub_api_key
        .clone()
        .context("FINNHUB_API_KEY must be set")?;

    tracing::info!("Starting candl");
    tracing::info!("  Refresh: {} every {:?}", config.auto_refresh, config.refresh_interval);
    tracing::info!(
        "  Retry: {:?} doubling to {:?}, {} attempts",
        config.retry.base_delay,
        config.retry.max_delay,
        config.retry.max_attempts
    );

    // The store is best-effort: without it the session simply runs memory-only.
    let store = match LocalStore::connect(&config.database_url).await {
        Ok(store) => {
            tracing::info!("Local store at {}", config.database_url);
            Some(store)
        }
        Err(e) => {
            tracing::warn!("Local store unavailable ({}), running without persistence", e);
            None
        }
    };

    let finnhub = Arc::new(FinnhubClient::new(api_key, config.fetch_timeout));
    let consensus: Arc<dyn ConsensusProvider> = match &config.consensus_api_url {
        Some(url) => {
            tracing::info!("Consensus proxy: {}", url);
            Arc::new(ConsensusClient::new(url.as_str(), config.fetch_timeout))
        }
        None => finnhub.clone(),
    };
    let sentiment = config.sentiment_api_url.as_ref().map(|url| {
        tracing::info!("Sentiment scoring: {}", url);
        Arc::new(SentimentClient::new(url.as_str(), config.fetch_timeout)) as Arc<dyn SentimentScorer>
    });

    let coordinator = RequestCoordinator::new(
        config.clone(),
        Collaborators {
            market: finnhub.clone(),
            news: finnhub.clone(),
            consensus,
            sentiment,
        },
        store,
    )
    .await;

    let (mut debouncer, mut suggestions) =
        SuggestionDebouncer::new(finnhub.clone(), config.suggest_debounce);

    let mut events = coordinator.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = display::render_event(&event) {
                        println!("{}", line);
                    }
                }
                Err(RecvError::Lagged(n)) => tracing::warn!("Display lagged, skipped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });
    let suggester = tokio::spawn(async move {
        while let Some(s) = suggestions.recv().await {
            println!("{}", display::render_suggestions(&s));
        }
    });

    let app = coordinator.app_state().await;
    tracing::info!(
        "Theme {}, tips {}, {} watched",
        app.theme,
        if app.tips_visible { "on" } else { "off" },
        app.watchlist.len()
    );
    if app.tips_visible {
        println!("{}", HELP);
    }

    match cli.symbol {
        Some(symbol) => spawn_analysis(&coordinator, symbol),
        None => {
            coordinator.restore_last().await;
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("Failed to read stdin: {}", e);
                        break;
                    }
                };

                let command = match Command::parse(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(msg) => {
                        println!("{}", msg);
                        continue;
                    }
                };

                match command {
                    Command::Analyze(symbol) => spawn_analysis(&coordinator, symbol),
                    Command::Search(text) => debouncer.on_query_change(&text),
                    Command::WatchAdd(symbol) => match coordinator.add_watch(&symbol).await {
                        Ok(true) => println!("watching {}", symbol.trim().to_uppercase()),
                        Ok(false) => println!("already watching {}", symbol.trim().to_uppercase()),
                        Err(e) => println!("{}", e),
                    },
                    Command::WatchRemove(symbol) => match coordinator.remove_watch(&symbol).await {
                        Ok(true) => println!("removed {}", symbol.trim().to_uppercase()),
                        Ok(false) => println!("{} is not on the watchlist", symbol.trim().to_uppercase()),
                        Err(e) => println!("{}", e),
                    },
                    Command::Watchlist => {
                        let app = coordinator.app_state().await;
                        if app.watchlist.is_empty() {
                            println!("watchlist is empty");
                        } else {
                            let names: Vec<_> = app.watchlist.iter().map(|s| s.as_str()).collect();
                            println!("{}", names.join("  "));
                        }
                    }
                    Command::News => {
                        let news = coordinator.market_news().await;
                        if news.is_empty() {
                            println!("no market news available");
                        }
                        for item in &news {
                            println!("  • {}", display::render_headline(item));
                        }
                    }
                    Command::Theme(theme) => {
                        coordinator.set_theme(theme).await;
                        println!("theme set to {}", theme);
                    }
                    Command::Tips(visible) => coordinator.set_tips_visible(visible).await,
                    Command::Clear { purge } => coordinator.clear(purge).await,
                    Command::Help => println!("{}", HELP),
                    Command::Quit => break,
                }
            }
        }
    }

    debouncer.cancel();
    coordinator.shutdown().await;
    printer.abort();
    suggester.abort();
    tracing::info!("Session closed");

    Ok(())
}

/// Run an analysis without blocking input, so a newer command can preempt it.
/// Results arrive through the event stream; only validation errors print here.
fn spawn_analysis(coordinator: &RequestCoordinator, symbol: String) {
    let coordinator = coordinator.clone();
    tokio::spawn(async move {
        match coordinator.start_analysis(&symbol).await {
            Ok(AnalysisOutcome::Committed { .. }) | Ok(AnalysisOutcome::Superseded) => {}
            Err(AnalysisError::Validation(msg)) => println!("invalid symbol: {}", msg),
            Err(e) => tracing::debug!("Analysis of {} ended: {}", symbol, e),
        }
    });
}
