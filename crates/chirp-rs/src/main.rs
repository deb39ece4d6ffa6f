//! Search, watch and authorize against the Twitter API from the command line.
//!
//! Credentials come from `--credentials <file>` or the `CHIRP_CONSUMER_KEY`,
//! `CHIRP_CONSUMER_SECRET`, `CHIRP_ACCESS_TOKEN` and
//! `CHIRP_ACCESS_TOKEN_SECRET` environment variables. Logs go to stderr;
//! set `CHIRP_LOG` (e.g. `CHIRP_LOG=chirp_rs=debug`) to see them.
//!
//! # Examples
//!
//! ```sh
//! # Search English results, 100 per page
//! chirp search bitcoin --lang en
//!
//! # Watch a keyword; disconnect instead of reconnecting when throttled
//! chirp stream --track python --stop-on-rate-limit
//!
//! # Obtain and store a user credential
//! chirp auth --save ~/.config/chirp/credential.json
//! ```

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use chirp_rs::api::types::MAX_PAGE_SIZE;
use chirp_rs::auth::credential::{
    ENV_ACCESS_TOKEN, ENV_ACCESS_TOKEN_SECRET, ENV_CONSUMER_KEY, ENV_CONSUMER_SECRET,
};
use chirp_rs::prelude::*;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Column width for wrapped status text.
const WRAP_WIDTH: usize = 60;

#[derive(Parser)]
#[command(name = "chirp", version, about = "Resilient Twitter search and stream client")]
struct Cli {
    /// JSON credential file (defaults to the CHIRP_* environment variables)
    #[arg(long, global = true)]
    credentials: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a search and print every result
    Search {
        /// Search terms, joined with spaces
        #[arg(required = true)]
        terms: Vec<String>,

        /// Restrict results to a language code, e.g. "en"
        #[arg(long)]
        lang: Option<String>,

        /// Results per page (1 to 100)
        #[arg(long, default_value_t = MAX_PAGE_SIZE)]
        count: u32,

        /// Stop after this many results
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Watch the filtered stream
    Stream {
        /// Keyword to track (repeatable)
        #[arg(long)]
        track: Vec<String>,

        /// User id to follow (repeatable)
        #[arg(long)]
        follow: Vec<u64>,

        /// Idle window in seconds, or "none" to never time out
        #[arg(long, default_value = "90", value_parser = parse_timeout)]
        timeout: IdleTimeout,

        /// Disconnect on 420/429 instead of backing off and reconnecting
        #[arg(long)]
        stop_on_rate_limit: bool,

        /// Consecutive failed connections tolerated
        #[arg(long, default_value_t = 6)]
        max_reconnects: u32,
    },

    /// Obtain a user credential with the PIN flow
    Auth {
        /// Consumer key (defaults to CHIRP_CONSUMER_KEY)
        #[arg(long)]
        consumer_key: Option<String>,

        /// Consumer secret (defaults to CHIRP_CONSUMER_SECRET)
        #[arg(long)]
        consumer_secret: Option<String>,

        /// Write the credential to this file instead of printing it
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

/// `--timeout` value; `None` disables idle monitoring.
#[derive(Clone, Copy)]
struct IdleTimeout(Option<Duration>);

fn parse_timeout(s: &str) -> Result<IdleTimeout, String> {
    if s.eq_ignore_ascii_case("none") {
        return Ok(IdleTimeout(None));
    }
    s.parse::<u64>()
        .map(|secs| IdleTimeout(Some(Duration::from_secs(secs))))
        .map_err(|_| format!("expected seconds or \"none\", got '{s}'"))
}

fn load_credential(path: Option<&PathBuf>) -> ChirpResult<Credential> {
    match path {
        Some(path) => Credential::load(path),
        None => Credential::from_env(),
    }
}

async fn run_search(
    credential: &Credential,
    query: Query,
    limit: Option<usize>,
) -> ChirpResult<()> {
    let client = SearchClient::new(SearchConfig::default())?;
    let mut results = client.search(query, credential)?;
    let mut count = 0usize;

    while limit.is_none_or(|limit| count < limit) {
        let Some(record) = results.next().await? else {
            break;
        };
        count += 1;
        let mut out = io::stdout().lock();
        let _ = writeln!(
            out,
            "{{id: {}, screen_name: {}, message: {}}}",
            record.id, record.screen_name, record.message
        );
    }

    let _ = writeln!(io::stdout(), "{count} results");
    Ok(())
}

/// Prints statuses and reports everything else.
struct Watcher {
    stop_on_rate_limit: bool,
}

impl StreamHandler for Watcher {
    fn on_event(&mut self, event: &StreamEvent) -> Decision {
        let mut out = io::stdout().lock();
        match event {
            StreamEvent::Status(status) => {
                let created = status
                    .created_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                let _ = writeln!(out);
                for line in textwrap::wrap(&status.text, WRAP_WIDTH) {
                    let _ = writeln!(out, "  {line}");
                }
                let _ = writeln!(out, "{}  {created}  via {}", status.author, status.source);
            }
            StreamEvent::Timeout => {
                let _ = writeln!(out, "Snoozing...");
            }
            StreamEvent::Error { code } => {
                let _ = writeln!(out, "Stream error {code}");
                if self.stop_on_rate_limit && event.is_rate_limit() {
                    let _ = writeln!(out, "Rate limited, disconnecting");
                    return Decision::Stop;
                }
            }
        }
        Decision::Continue
    }
}

async fn run_stream(
    credential: Credential,
    filter: StreamFilter,
    config: StreamConfig,
    watcher: Watcher,
) -> ChirpResult<()> {
    let task = StreamSession::new(credential, config)?.spawn(filter, watcher);
    let handle = task.handle();

    tokio::select! {
        result = task.join() => result,
        _ = tokio::signal::ctrl_c() => {
            handle.close();
            let _ = writeln!(io::stderr(), "Interrupted after {} reconnects", handle.reconnects());
            Ok(())
        }
    }
}

async fn run_auth(
    consumer_key: String,
    consumer_secret: String,
    save: Option<PathBuf>,
) -> ChirpResult<()> {
    let mut flow = AuthorizationFlow::new()?;
    let url = flow.begin(&consumer_key, &consumer_secret).await?;
    println!("Open this URL and authorize the application:\n\n  {url}\n");
    print!("PIN (q to cancel): ");
    io::stdout().flush()?;

    let mut pin = String::new();
    io::stdin().lock().read_line(&mut pin)?;
    let credential = flow.complete(&pin).await?;

    match save {
        Some(path) => {
            credential.save(&path)?;
            println!("Credential saved to {}", path.display());
        }
        None => {
            println!("{ENV_CONSUMER_KEY}={}", credential.consumer_key());
            println!("{ENV_CONSUMER_SECRET}={}", credential.consumer_secret());
            println!("{ENV_ACCESS_TOKEN}={}", credential.access_token());
            println!("{ENV_ACCESS_TOKEN_SECRET}={}", credential.access_token_secret());
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> ChirpResult<()> {
    match cli.command {
        Command::Search {
            terms,
            lang,
            count,
            limit,
        } => {
            let credential = load_credential(cli.credentials.as_ref())?;
            let mut query = Query::new(terms).with_page_size(count);
            if let Some(lang) = lang {
                query = query.with_language(lang);
            }
            run_search(&credential, query, limit).await
        }
        Command::Stream {
            track,
            follow,
            timeout,
            stop_on_rate_limit,
            max_reconnects,
        } => {
            let credential = load_credential(cli.credentials.as_ref())?;
            let filter = StreamFilter::track(track).with_follow(follow);
            let config = StreamConfig::default()
                .with_idle_timeout(timeout.0)
                .with_max_reconnects(max_reconnects);
            run_stream(credential, filter, config, Watcher { stop_on_rate_limit }).await
        }
        Command::Auth {
            consumer_key,
            consumer_secret,
            save,
        } => {
            let key = consumer_key
                .or_else(|| std::env::var(ENV_CONSUMER_KEY).ok())
                .unwrap_or_default();
            let secret = consumer_secret
                .or_else(|| std::env::var(ENV_CONSUMER_SECRET).ok())
                .unwrap_or_default();
            run_auth(key, secret, save).await
        }
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_env(chirp_rs::LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        if e.needs_new_credentials() {
            eprintln!("Run `chirp auth` to obtain a new credential.");
        }
        process::exit(1);
    }
}
