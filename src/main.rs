use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use msgboard::config::{self, AppConfig};
use msgboard::storage::{
    self, KeyValueStore, MemoryStore, MessageUpdate, RawMessage, RawReply, SqliteStore,
};
use msgboard::{
    BackupScheduler, BoardError, BoardResult, LifecycleEvent, MessageRepository, MessageStatus,
    RosterClient,
};

type Repository = MessageRepository<Box<dyn KeyValueStore>>;

#[derive(Parser)]
#[command(
    name = "msgboard",
    version,
    about = "Student message board with guarded local persistence"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print messages, newest first
    List {
        /// Only `pending` or `answered`
        #[arg(long)]
        status: Option<String>,
        /// Keep insertion order instead of sorting by timestamp
        #[arg(long)]
        unsorted: bool,
    },
    /// Post a new message
    Add {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        student_id: Option<String>,
        #[arg(long)]
        class: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: String,
        /// Reject the message unless name + student id are on the roster
        #[arg(long)]
        verify_roster: bool,
    },
    /// Edit fields of an existing message
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        timestamp: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        student_id: Option<String>,
        #[arg(long)]
        class: Option<String>,
        /// Raw JSON object of fields; merged under the flags above
        #[arg(long, value_name = "JSON")]
        fields: Option<String>,
    },
    /// Answer a message
    Reply {
        id: String,
        content: String,
        #[arg(long)]
        author: Option<String>,
    },
    Delete {
        id: String,
    },
    /// Remove every message and stop default content from coming back
    Clear {
        /// Reset to the configured seed messages instead of emptying
        #[arg(long)]
        keep_seed: bool,
    },
    /// Snapshot the current collection into the backup slot
    Backup,
    /// Replace the current collection with the backup slot
    Restore,
    Status,
    /// Look a student up in the roster
    VerifyStudent {
        name: String,
        student_id: String,
    },
    /// Run the auto-backup loop; reads `hide`, `unload` or `focus` lines from stdin
    Watch,
    /// Write the effective configuration to the `--config` path
    InitConfig {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config);

    let result = match cli.command {
        Command::InitConfig { force } => init_config(&cli.config, &app_config, force),
        command => run(command, app_config).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let report = json!({ "error": err.kind().as_str(), "message": err.to_string() });
            eprintln!("{report}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: AppConfig) -> BoardResult<()> {
    let mut repo = MessageRepository::open(open_backend(&config), &config);

    match command {
        Command::List { status, unsorted } => {
            let filter = match status.as_deref() {
                Some(raw) => Some(MessageStatus::parse(raw).ok_or_else(|| {
                    BoardError::Validation(format!("unknown status `{raw}`"))
                })?),
                None => None,
            };
            print_json(&repo.list(filter, !unsorted))
        }
        Command::Add {
            name,
            student_id,
            class,
            title,
            content,
            verify_roster,
        } => {
            if verify_roster {
                let (Some(name), Some(student_id)) = (name.as_deref(), student_id.as_deref())
                else {
                    return Err(BoardError::Validation(
                        "--verify-roster needs --name and --student-id".to_string(),
                    ));
                };
                let roster = RosterClient::from_config(&config.roster)?;
                if roster.validate_student(name, student_id).await?.is_none() {
                    return Err(BoardError::Validation(format!(
                        "{name} ({student_id}) is not on the roster"
                    )));
                }
            }
            let raw = RawMessage {
                student_name: name.map(Value::from),
                student_id: student_id.map(Value::from),
                class_name: class.map(Value::from),
                title: title.map(Value::from),
                content: Some(Value::from(content)),
                ..RawMessage::default()
            };
            print_json(&repo.add(raw)?)
        }
        Command::Update {
            id,
            title,
            content,
            timestamp,
            name,
            student_id,
            class,
            fields,
        } => {
            let mut map = match fields {
                Some(raw) => match serde_json::from_str::<Value>(&raw)? {
                    Value::Object(map) => map,
                    _ => {
                        return Err(BoardError::Validation(
                            "--fields must be a JSON object".to_string(),
                        ));
                    }
                },
                None => Map::new(),
            };
            let flags = [
                ("title", title),
                ("content", content),
                ("timestamp", timestamp),
                ("studentName", name),
                ("studentId", student_id),
                ("className", class),
            ];
            for (key, value) in flags {
                if let Some(value) = value {
                    map.insert(key.to_string(), Value::from(value));
                }
            }
            let update = MessageUpdate::from_value(Value::Object(map))?;
            print_json(&repo.update(&id, update)?)
        }
        Command::Reply {
            id,
            content,
            author,
        } => print_json(&repo.add_reply(&id, RawReply::new(author.as_deref(), &content))?),
        Command::Delete { id } => print_json(&repo.delete(&id)?),
        Command::Clear { keep_seed } => {
            let report = repo.clear(keep_seed)?;
            print_json(&json!({ "before": report.before, "after": report.after }))
        }
        Command::Backup => {
            repo.backup()?;
            print_json(&json!({ "backedUp": repo.count() }))
        }
        Command::Restore => {
            let restored = repo.restore_from_backup()?;
            print_json(&json!({ "restored": restored }))
        }
        Command::Status => {
            repo.recheck_storage();
            print_status(&repo)
        }
        Command::VerifyStudent { name, student_id } => {
            let roster = RosterClient::from_config(&config.roster)?;
            log::debug!("Roster source: {:?}", roster.location());
            let student = roster.validate_student(&name, &student_id).await?;
            print_json(&json!({ "valid": student.is_some(), "student": student }))
        }
        Command::Watch => watch(repo, &config).await,
        // dispatched in `main` before storage opens
        Command::InitConfig { .. } => Ok(()),
    }
}

fn init_config(path: &str, config: &AppConfig, force: bool) -> BoardResult<()> {
    let written = config::write_config(path, config, force)
        .map_err(|err| BoardError::PersistenceFailure(format!("{path}: {err}")))?;
    print_json(&json!({ "path": path, "written": written }))
}

fn open_backend(config: &AppConfig) -> Box<dyn KeyValueStore> {
    if let Err(err) = storage::ensure_data_dir(&config.database_path) {
        log::warn!("Could not create data directory: {err}");
    }
    match SqliteStore::with_path(&config.database_path) {
        Ok(store) => Box::new(store.with_quota(config.quota_bytes)),
        Err(err) => {
            log::error!(
                "Failed to open {}: {err}; running memory-only",
                config.database_path
            );
            Box::new(MemoryStore::new())
        }
    }
}

async fn watch(repo: Repository, config: &AppConfig) -> BoardResult<()> {
    let shared = repo.into_shared();
    let (event_tx, event_rx) = mpsc::channel(16);
    let interval = Duration::from_secs(config.backup_interval_secs);
    let scheduler = tokio::spawn(BackupScheduler::new(shared, interval, event_rx).run());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match LifecycleEvent::parse(&line) {
                Some(event) => {
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                }
                None => log::warn!("Unknown lifecycle event `{}`", line.trim()),
            },
            Ok(None) => break,
            Err(err) => {
                log::error!("Failed to read stdin: {err}");
                break;
            }
        }
    }

    drop(event_tx);
    if let Err(err) = scheduler.await {
        log::error!("Backup scheduler terminated: {err}");
    }
    Ok(())
}

fn print_status(repo: &Repository) -> BoardResult<()> {
    let status = repo.status();
    print_json(&json!({
        "initialized": status.initialized,
        "storageAvailable": status.storage_available,
        "messageCount": status.message_count,
        "lastSync": status.last_sync.map(|time| time.to_rfc3339()),
        "provenance": status.provenance,
    }))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> BoardResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
