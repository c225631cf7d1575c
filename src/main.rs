mod app;
mod config;
mod event;
mod logging;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use kcsync::api::types::{
  AssignModuleRequest, CompleteAssignmentRequest, CreateModuleRequest, UpdateModuleRequest,
};
use kcsync::api::Dispatch;
use kcsync::cache::{CacheResult, CacheSource};
use kcsync::snapshot::CacheSnapshot;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "kcsync")]
#[command(about = "Offline sync client for KitchenCoach")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/kcsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Server root, overrides api.base_url
  #[arg(long)]
  base_url: Option<String>,

  /// Treat the network as unavailable
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pending count, connectivity and snapshot age
  Status,
  /// Inspect queued requests
  #[command(subcommand)]
  Queue(QueueCommand),
  /// Replay queued requests now
  Sync,
  /// Probe connectivity and replay on reconnect until interrupted
  Run,
  /// Manage the cache snapshot
  #[command(subcommand)]
  Snapshot(SnapshotCommand),
  /// Training modules and assignments
  #[command(subcommand)]
  Training(TrainingCommand),
  /// Checklist runs
  #[command(subcommand)]
  Checklist(ChecklistCommand),
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
  /// List queued requests, oldest first
  List,
  /// Remove a queued request without sending it
  Drop { id: String },
}

#[derive(Subcommand, Debug)]
enum SnapshotCommand {
  /// Show the stored snapshot
  Show,
  /// Delete the stored snapshot
  Clear,
  /// Store the contents of FILE as the snapshot
  Save { file: PathBuf },
}

#[derive(Subcommand, Debug)]
enum TrainingCommand {
  /// Create a training module
  Create {
    title: String,
    #[arg(long)]
    description: Option<String>,
    /// Minutes
    #[arg(long)]
    duration: Option<u32>,
  },
  /// Update a training module
  Update {
    id: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    duration: Option<u32>,
  },
  /// Delete a training module
  Delete { id: String },
  /// Assign a module to users
  Assign {
    module_id: String,
    #[arg(required = true)]
    users: Vec<String>,
    #[arg(long)]
    due: Option<String>,
  },
  /// Start an assignment
  Start { assignment_id: String },
  /// Complete an assignment
  Complete {
    assignment_id: String,
    #[arg(long)]
    score: Option<u32>,
  },
  /// List training modules
  List,
  /// List my assignments
  Assignments,
}

#[derive(Subcommand, Debug)]
enum ChecklistCommand {
  /// Start a checklist run
  Start { checklist_id: String },
  /// Complete a checklist run
  Complete {
    run_id: String,
    #[arg(long)]
    notes: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;
  if let Some(base_url) = args.base_url {
    config.api.base_url = base_url;
  }

  let _log_guard = logging::init(&config.logging)?;

  let app = app::App::new(config, args.offline)?;

  match args.command {
    Command::Status => {
      app.connect().await;
      let status = app.status()?;
      println!("online:   {}", status.online);
      println!("pending:  {}", status.pending);
      match status.snapshot_persisted_at {
        Some(at) => println!("snapshot: {}", at.to_rfc3339()),
        None => println!("snapshot: none"),
      }
    }
    Command::Queue(QueueCommand::List) => {
      for request in app.queue().pending()? {
        println!(
          "{}  {}  {:<6} {}",
          request.id,
          request.enqueued_at.to_rfc3339(),
          request.method,
          request.url
        );
      }
    }
    Command::Queue(QueueCommand::Drop { id }) => {
      app.queue().remove(&id)?;
    }
    Command::Sync => {
      app.connect().await;
      let report = app.sync_once().await;
      println!(
        "{:?}: attempted {}, succeeded {}, failed {}, remaining {}",
        report.outcome, report.attempted, report.succeeded, report.failed, report.remaining
      );
    }
    Command::Run => app.run().await?,
    Command::Snapshot(command) => snapshot(&app, command)?,
    Command::Training(command) => {
      app.connect().await;
      training(&app, command).await?;
    }
    Command::Checklist(command) => {
      app.connect().await;
      let client = app.client()?;
      let dispatch = match command {
        ChecklistCommand::Start { checklist_id } => client.start_run(&checklist_id).await?,
        ChecklistCommand::Complete { run_id, notes } => client.complete_run(&run_id, notes).await?,
      };
      print_dispatch(&dispatch)?;
    }
  }

  Ok(())
}

fn snapshot(app: &app::App, command: SnapshotCommand) -> Result<()> {
  match command {
    SnapshotCommand::Show => match app.stored_snapshot()? {
      Some(snapshot) => {
        println!("persisted_at: {}", snapshot.persisted_at.to_rfc3339());
        println!("buster:       {:?}", snapshot.buster);
        println!("bytes:        {}", snapshot.payload.len());
        println!("digest:       {}", snapshot.digest());
      }
      None => println!("no snapshot"),
    },
    SnapshotCommand::Clear => app.bridge().remove()?,
    SnapshotCommand::Save { file } => {
      let payload = std::fs::read(&file)
        .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
      app.bridge().persist(&CacheSnapshot::new(payload))?;
    }
  }
  Ok(())
}

async fn training(app: &app::App, command: TrainingCommand) -> Result<()> {
  let client = app.client()?;

  let dispatch = match command {
    TrainingCommand::Create {
      title,
      description,
      duration,
    } => {
      let module = CreateModuleRequest {
        description,
        estimated_duration: duration,
        ..CreateModuleRequest::new(title)
      };
      client.create_module(&module).await?
    }
    TrainingCommand::Update {
      id,
      title,
      description,
      duration,
    } => {
      let changes = UpdateModuleRequest {
        title,
        description,
        content: None,
        estimated_duration: duration,
      };
      if changes.is_empty() {
        return Err(eyre!("Nothing to update; pass --title, --description or --duration"));
      }
      client.update_module(&id, &changes).await?
    }
    TrainingCommand::Delete { id } => client.delete_module(&id).await?,
    TrainingCommand::Assign {
      module_id,
      users,
      due,
    } => {
      let assignment = AssignModuleRequest {
        module_id,
        assigned_to: users,
        due_date: due,
      };
      client.assign_module(&assignment).await?
    }
    TrainingCommand::Start { assignment_id } => client.start_assignment(&assignment_id).await?,
    TrainingCommand::Complete {
      assignment_id,
      score,
    } => {
      client
        .complete_assignment(&assignment_id, &CompleteAssignmentRequest { score })
        .await?
    }
    TrainingCommand::List => return print_query(client.list_modules().await?),
    TrainingCommand::Assignments => return print_query(client.my_assignments().await?),
  };

  print_dispatch(&dispatch)
}

fn print_dispatch(dispatch: &Dispatch) -> Result<()> {
  match dispatch {
    Dispatch::Sent(data) => println!("{}", serde_json::to_string_pretty(data)?),
    Dispatch::Queued { id } => println!("offline: queued as {}", id),
  }
  Ok(())
}

fn print_query(result: CacheResult<Value>) -> Result<()> {
  if result.source == CacheSource::Offline {
    eprintln!(
      "offline: showing data fetched at {}",
      result.fetched_at.to_rfc3339()
    );
  }
  println!("{}", serde_json::to_string_pretty(&result.data)?);
  Ok(())
}
