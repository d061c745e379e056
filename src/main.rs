//! modelstore - a small notes store on the flat-file backend.
//!
//! Each note is one JSON file under `<data-dir>/notes/`.

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use modelstore::error::DecodeError;
use modelstore::{
    CacheConfig, Field, FileBackend, Model, ModelMetadata, Record, StorageService, TypeMap,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Default, PartialEq)]
struct Note {
    id: i64,
    title: String,
    body: String,
    tags: Vec<String>,
    created_at: DateTime<Utc>,
}

impl Model for Note {
    fn metadata() -> Option<ModelMetadata> {
        Some(
            ModelMetadata::new("notes")
                .field(Field::of::<i64>("id").auto_generated())
                .field(Field::of::<String>("title"))
                .field(Field::of::<String>("body"))
                .field(Field::json("tags"))
                .field(Field::of::<DateTime<Utc>>("created_at")),
        )
    }

    fn to_record(&self) -> modelstore::Result<Record> {
        Record::new()
            .with("id", self.id)
            .with("title", self.title.clone())
            .with("body", self.body.clone())
            .with("created_at", self.created_at)
            .with_json("tags", &self.tags)
    }

    fn from_record(mut record: Record) -> Result<Self, DecodeError> {
        Ok(Self {
            id: record.take("id")?,
            title: record.take("title")?,
            body: record.take("body")?,
            tags: record.take_json::<Option<Vec<String>>>("tags")?.unwrap_or_default(),
            created_at: record.take("created_at")?,
        })
    }
}

/// What to do with the store.
enum Command {
    Add {
        title: String,
        body: String,
        tags: Vec<String>,
    },
    Get(i64),
    List,
    Remove(i64),
}

/// CLI configuration
struct Config {
    /// Directory holding one folder per model
    data_dir: PathBuf,
    /// Cache entry lifetime; zero keeps entries for the whole run
    cache_ttl: Duration,
    command: Command,
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> anyhow::Result<Self> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let mut data_dir = PathBuf::from("data");
        let mut cache_ttl = Duration::ZERO;

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--data-dir" | "-d" => {
                    let value = args.get(i + 1).context("--data-dir requires a value")?;
                    data_dir = PathBuf::from(value);
                    i += 2;
                }
                "--cache-ttl-ms" => {
                    let value = args.get(i + 1).context("--cache-ttl-ms requires a value")?;
                    let millis: u64 = value
                        .parse()
                        .with_context(|| format!("invalid cache TTL: {}", value))?;
                    cache_ttl = Duration::from_millis(millis);
                    i += 2;
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("modelstore version {}", modelstore::VERSION);
                    std::process::exit(0);
                }
                flag if flag.starts_with('-') => bail!("unknown option: {}", flag),
                _ => break,
            }
        }

        let command = parse_command(&args[i..])?;
        Ok(Self {
            data_dir,
            cache_ttl,
            command,
        })
    }
}

fn parse_command(args: &[String]) -> anyhow::Result<Command> {
    let parse_id = |arg: Option<&String>| -> anyhow::Result<i64> {
        let arg = arg.context("missing note id")?;
        arg.parse().with_context(|| format!("invalid note id: {}", arg))
    };

    match args.first().map(String::as_str) {
        Some("add") => {
            let title = args.get(1).context("add requires a title")?.clone();
            let body = args.get(2).context("add requires a body")?.clone();
            Ok(Command::Add {
                title,
                body,
                tags: args[3..].to_vec(),
            })
        }
        Some("get") => Ok(Command::Get(parse_id(args.get(1))?)),
        Some("list") => Ok(Command::List),
        Some("remove") => Ok(Command::Remove(parse_id(args.get(1))?)),
        Some(other) => bail!("unknown command: {}", other),
        None => {
            print_help();
            bail!("no command given")
        }
    }
}

fn print_help() {
    println!(
        r#"
modelstore - notes kept as one JSON file per note

USAGE:
    modelstore [OPTIONS] <COMMAND>

COMMANDS:
    add <title> <body> [tags...]   Store a new note and print its id
    get <id>                       Print one note
    list                           Print every note
    remove <id>                    Delete a note

OPTIONS:
    -d, --data-dir <DIR>       Data directory (default: ./data)
        --cache-ttl-ms <MS>    Cache entry lifetime, 0 = never expire (default: 0)
    -v, --version              Print version information
    -h, --help                 Print this help message

LOGGING:
    Set RUST_LOG (e.g. RUST_LOG=debug) to change the log level.
"#
    );
}

fn print_note(note: &Note) {
    println!("#{} {}", note.id, note.title);
    println!("  {}", note.body);
    if !note.tags.is_empty() {
        println!("  tags: {}", note.tags.join(", "));
    }
    println!("  created: {}", note.created_at.to_rfc3339());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_args()?;
    debug!(data_dir = %config.data_dir.display(), "Configuration loaded");

    let backend = FileBackend::<Note>::new(&config.data_dir, TypeMap::default())?;
    let notes = Arc::new(StorageService::new(
        backend,
        CacheConfig::expiring(config.cache_ttl),
    ));
    notes.startup()?;

    match config.command {
        Command::Add { title, body, tags } => {
            let note = Note {
                title,
                body,
                tags,
                created_at: Utc::now(),
                ..Default::default()
            };
            let stored = notes.upsert_async(note).await?;
            info!(id = stored.id, "Note stored");
            println!("{}", stored.id);
        }
        Command::Get(id) => match notes.find_async(id).await? {
            Some(note) => print_note(&note),
            None => bail!("note {} not found", id),
        },
        Command::List => {
            let all = notes.find_all_async().await?;
            if all.is_empty() {
                println!("(no notes)");
            }
            for note in &all {
                print_note(note);
            }
        }
        Command::Remove(id) => {
            let note = notes
                .find_async(id)
                .await?
                .with_context(|| format!("note {} not found", id))?;
            notes.delete_async(note).await?;
            info!(id, "Note removed");
        }
    }

    notes.shutdown()?;
    Ok(())
}
