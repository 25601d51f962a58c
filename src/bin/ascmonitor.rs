//! ascmonitor CLI: operator interface to the bibliography event log.

use anyhow::{Context, bail};
use ascmonitor_rs::codec;
use ascmonitor_rs::config::Config;
use ascmonitor_rs::config::secrets::ExposeSecret;
use ascmonitor_rs::db::Db;
use ascmonitor_rs::log::{EventFilter, EventLog, QueryResult};
use ascmonitor_rs::model::{DocumentRef, Event, EventKind, make_document_ref};
use ascmonitor_rs::telemetry::{TelemetryConfig, init_telemetry};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

#[derive(Parser)]
#[command(name = "ascmonitor", about = "Bibliography and announcement event log")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run database migrations and check connectivity
    Migrate,
    /// Event log operations
    Events {
        #[command(subcommand)]
        action: EventsAction,
    },
}

#[derive(Subcommand)]
enum EventsAction {
    /// Show the most recently recorded events
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// List events matching a filter, oldest first
    List {
        /// Filter by kind (e.g. post_failure)
        #[arg(long)]
        kind: Option<String>,
        /// Filter by document id
        #[arg(long)]
        document: Option<String>,
        /// Filter by posting channel
        #[arg(long)]
        channel: Option<String>,
        /// Only events at or after this RFC 3339 instant
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show failed posts on a channel that may be retried
    Retry {
        #[arg(long)]
        channel: String,
    },
    /// Record a new event
    Record {
        /// Event kind (e.g. new_document, post_start)
        kind: String,
        /// Document record as JSON; only id, title and slug are kept
        #[arg(long)]
        document: Option<String>,
        /// Posting channel (post events)
        #[arg(long)]
        channel: Option<String>,
        /// Error message (post_failure)
        #[arg(long)]
        error: Option<String>,
        /// Whether the failed post may be retried (post_failure)
        #[arg(long)]
        allow_retry: bool,
        /// Channel response as JSON (post_success)
        #[arg(long)]
        post: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "ascmonitor".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Db::connect_with(config.database_url.expose_secret(), config.max_connections).await?;
    db.migrate().await?;

    match cli.command {
        Command::Migrate => {
            db.health_check().await?;
            println!("Database is migrated and reachable");
            Ok(())
        }
        Command::Events { action } => {
            let log = EventLog::new(db).with_max_recent(config.max_recent);
            match action {
                EventsAction::Recent { limit } => print_result(log.recent(limit).await?),
                EventsAction::List {
                    kind,
                    document,
                    channel,
                    since,
                    limit,
                } => {
                    let mut filter = EventFilter::default();
                    if let Some(kind) = kind {
                        filter = filter.kind(kind.parse()?);
                    }
                    if let Some(document) = document {
                        filter = filter.document(document);
                    }
                    if let Some(channel) = channel {
                        filter = filter.channel(channel);
                    }
                    if let Some(since) = since {
                        filter = filter.since(since);
                    }
                    print_result(QueryResult::collect(log.query(filter, limit)).await?)
                }
                EventsAction::Retry { channel } => {
                    print_result(log.retry_candidates(&channel).await?)
                }
                EventsAction::Record {
                    kind,
                    document,
                    channel,
                    error,
                    allow_retry,
                    post,
                } => {
                    let event =
                        build_event(kind.parse()?, document, channel, error, allow_retry, post)?;
                    let id = log.append(&event).await?;
                    println!("Recorded {} as event {id}", event.kind());
                    Ok(())
                }
            }
        }
    }
}

fn build_event(
    kind: EventKind,
    document: Option<String>,
    channel: Option<String>,
    error: Option<String>,
    allow_retry: bool,
    post: Option<String>,
) -> anyhow::Result<Event> {
    let document = document
        .map(|json| parse_document(&json))
        .transpose()?;

    if !kind.is_post() {
        let Some(document) = document else {
            bail!("{kind} events require --document");
        };
        return Ok(match kind {
            EventKind::NewDocument => Event::new_document(document),
            EventKind::UpdatedDocument => Event::updated_document(document),
            _ => Event::deleted_document(document),
        });
    }

    let channel = channel.with_context(|| format!("{kind} events require --channel"))?;
    Ok(match kind {
        EventKind::PostStart => Event::post_start(document, channel),
        EventKind::PostSuccess => {
            let post = match post {
                Some(json) => parse_object(&json, "--post")?,
                None => Map::new(),
            };
            Event::post_success(document, channel, post)
        }
        _ => {
            let error = error.context("post_failure events require --error")?;
            Event::post_failure(document, channel, error, allow_retry)
        }
    })
}

fn parse_document(json: &str) -> anyhow::Result<DocumentRef> {
    Ok(make_document_ref(&parse_object(json, "--document")?)?)
}

fn parse_object(json: &str, flag: &str) -> anyhow::Result<Map<String, Value>> {
    match serde_json::from_str(json).with_context(|| format!("{flag} is not valid JSON"))? {
        Value::Object(map) => Ok(map),
        _ => bail!("{flag} must be a JSON object"),
    }
}

fn print_result(result: QueryResult) -> anyhow::Result<()> {
    for logged in &result.events {
        let mut record = codec::encode(&logged.event);
        record.insert("storage_identity".into(), Value::from(logged.id.0));
        println!("{}", serde_json::to_string(&record)?);
    }
    for corrupt in &result.corrupt {
        eprintln!("corrupt record {}: {}", corrupt.id, corrupt.error);
    }
    Ok(())
}
