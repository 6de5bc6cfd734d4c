use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use newsdeck::config::{Config, API_KEY_ENV};
use newsdeck::content::download_reader_view;
use newsdeck::feed::{
    search_articles, Article, FeedCache, FeedFetcher, FetchOptions, RateLimiter, ALL_CATEGORY,
    CATEGORIES,
};
use newsdeck::speech::{Narrator, PlaybackState, ProcessDriver};
use newsdeck::storage::{JsonFileStore, KeyValueStore, SavedArticles};

/// Get the config directory path (~/.config/newsdeck/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("newsdeck");
    Ok(config_dir)
}

#[derive(Parser, Debug)]
#[command(name = "newsdeck", about = "Terminal news reader with spoken playback")]
struct Args {
    /// Path to the config file (default: ~/.config/newsdeck/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a page of headlines, falling back to the offline cache
    Fetch {
        /// Category to fetch (use "all" for the mixed feed)
        #[arg(long, default_value = ALL_CATEGORY)]
        category: String,

        /// Page number, starting at 1
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        page: u32,

        /// Keep only articles whose title contains this text
        #[arg(long, value_name = "QUERY")]
        search: Option<String>,
    },

    /// Show the saved-articles list
    Saved,

    /// Save one article from a fetched page
    Save {
        /// Category to fetch from
        #[arg(long, default_value = ALL_CATEGORY)]
        category: String,

        /// Page number, starting at 1
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        page: u32,

        /// 1-based position of the article within the page
        index: usize,
    },

    /// Remove a saved article by its id
    Unsave {
        /// Article id as shown by `saved`
        id: String,
    },

    /// Read articles aloud through the configured speech command
    Speak {
        /// Category to fetch from
        #[arg(long, default_value = ALL_CATEGORY)]
        category: String,

        /// Page number, starting at 1
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        page: u32,

        /// 1-based position to start from
        #[arg(long, default_value_t = 1)]
        from: usize,

        /// Queue the rest of the page after the first article
        #[arg(long)]
        queue: bool,

        /// Read the saved-articles list instead of a fetched page
        #[arg(long, conflicts_with_all = ["category", "page"])]
        saved: bool,
    },

    /// Download the reader view of an article
    Read {
        /// Article URL
        url: String,
    },

    /// Drop cached feed pages and any rate-limit marker
    ClearCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // Set up config directory
    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        println!("Created config directory: {}", config_dir.display());
    }

    // Directory holds the API key and saved articles; user-only access on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(&config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(&config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    let store: Arc<dyn KeyValueStore> = Arc::new(
        JsonFileStore::open(config_dir.join("state.json"))
            .await
            .context("Failed to open state store")?,
    );

    match args.command {
        Command::Fetch {
            category,
            page,
            search,
        } => {
            warn_unknown_category(&category);
            let fetcher = build_fetcher(&config, Arc::clone(&store))?;
            let articles = fetcher.fetch(page, &category).await;

            match search {
                Some(query) => {
                    let matches = search_articles(&articles, &query);
                    if matches.is_empty() {
                        println!("No articles matching \"{}\".", query);
                    } else {
                        print_article_refs(&matches);
                    }
                }
                None => {
                    if articles.is_empty() {
                        println!("No articles (offline with an empty cache, or past the last page).");
                    } else {
                        print_articles(&articles);
                        if articles.len() < config.page_size {
                            println!("(short page: likely the end of results)");
                        }
                    }
                }
            }
        }

        Command::Saved => {
            let saved = SavedArticles::new(store);
            let articles = saved.list().await;
            if articles.is_empty() {
                println!("No saved articles.");
            } else {
                print_articles(&articles);
            }
        }

        Command::Save {
            category,
            page,
            index,
        } => {
            let fetcher = build_fetcher(&config, Arc::clone(&store))?;
            let articles = fetcher.fetch(page, &category).await;
            let article = pick(&articles, index)?;

            let saved = SavedArticles::new(store);
            if saved.save(article).await {
                println!(
                    "Saved: {}",
                    article.display_title().unwrap_or("(untitled)")
                );
            } else {
                println!("Not saved (already in the list, or the store is unavailable).");
            }
        }

        Command::Unsave { id } => {
            let saved = SavedArticles::new(store);
            if saved.remove(&id).await {
                println!("Removed {}.", id);
            } else {
                println!("No saved article with id {}.", id);
            }
        }

        Command::Speak {
            category,
            page,
            from,
            queue,
            saved,
        } => {
            let articles = if saved {
                SavedArticles::new(Arc::clone(&store)).list().await
            } else {
                let fetcher = build_fetcher(&config, Arc::clone(&store))?;
                fetcher.fetch(page, &category).await
            };
            let first = pick(&articles, from)?.clone();

            let driver = ProcessDriver::new(
                config.speech.command.clone(),
                config.speech.args.clone(),
            );
            let mut narrator =
                Narrator::with_max_chars(Box::new(driver), config.speech.max_utterance_chars);

            println!(
                "Reading: {}",
                first.display_title().unwrap_or("(untitled)")
            );
            narrator.play(first);
            if queue {
                for article in articles.iter().skip(from) {
                    println!(
                        "Queued:  {}",
                        article.display_title().unwrap_or("(untitled)")
                    );
                    narrator.enqueue(article.clone());
                }
            }
            narrator.run_until_idle().await;
            if narrator.state() != PlaybackState::Idle {
                anyhow::bail!(
                    "Playback stopped early; is the speech command '{}' installed?",
                    config.speech.command
                );
            }
        }

        Command::Read { url } => {
            let client = http_client()?;
            let text = download_reader_view(&client, &url, config.request_timeout())
                .await
                .with_context(|| format!("No readable content at {}", url))?;
            println!("{}", text);
        }

        Command::ClearCache => {
            let cache = FeedCache::new(Arc::clone(&store), config.cache_ttl());
            cache
                .clear_all()
                .await
                .context("Failed to clear the feed cache")?;
            RateLimiter::new(store)
                .clear()
                .await
                .context("Failed to clear the rate-limit marker")?;
            println!("Cache cleared.");
        }
    }

    Ok(())
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("newsdeck/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

/// Wire the fetcher from config. Exits with guidance when no API key is set,
/// mirroring the first-run experience.
fn build_fetcher(config: &Config, store: Arc<dyn KeyValueStore>) -> Result<FeedFetcher> {
    let Some(api_key) = config.api_key() else {
        eprintln!("Error: No API key configured.");
        eprintln!();
        eprintln!("Set the {} environment variable, or add to", API_KEY_ENV);
        eprintln!("~/.config/newsdeck/config.toml:");
        eprintln!();
        eprintln!("  api_key = \"your-key\"");
        std::process::exit(1);
    };

    let cache = Arc::new(FeedCache::new(Arc::clone(&store), config.cache_ttl()));
    let limiter = Arc::new(RateLimiter::new(store));
    let options = FetchOptions {
        base_url: config.base_url.clone(),
        api_key,
        country: config.country.clone(),
        language: config.language.clone(),
        timeout: config.request_timeout(),
        default_retry_after: config.default_retry_after(),
        serve_stale_when_rate_limited: config.serve_stale_when_rate_limited,
    };
    Ok(FeedFetcher::new(http_client()?, cache, limiter, options))
}

fn warn_unknown_category(category: &str) {
    if !CATEGORIES.contains(&category) {
        eprintln!(
            "Note: \"{}\" is not a known category (known: {}); the API may ignore it.",
            category,
            CATEGORIES.join(", ")
        );
    }
}

/// 1-based index into a fetched page, with a friendly range error.
fn pick(articles: &[Article], index: usize) -> Result<&Article> {
    if articles.is_empty() {
        anyhow::bail!("No articles to pick from (offline with an empty cache?)");
    }
    index
        .checked_sub(1)
        .and_then(|i| articles.get(i))
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Index {} out of range (page has {} articles)",
                index,
                articles.len()
            )
        })
}

fn print_articles(articles: &[Article]) {
    for (i, article) in articles.iter().enumerate() {
        print_one(i + 1, article);
    }
}

fn print_article_refs(articles: &[&Article]) {
    for (i, article) in articles.iter().enumerate() {
        print_one(i + 1, article);
    }
}

fn print_one(position: usize, article: &Article) {
    println!(
        "{:3}. {}",
        position,
        article.display_title().unwrap_or("(untitled)")
    );
    if let Some(id) = article.identity() {
        println!("     id:  {}", id);
    }
    if let Some(description) = article.display_description() {
        println!("     {}", description);
    }
    if let Some(url) = article.display_url() {
        println!("     {}", url);
    }
}
