//! punch: time-tracking CLI
//!
//! Reads go through the response cache; mutations go straight to the
//! service and invalidate what they affect.

use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use punchclock::cache::{epoch_millis, store};
use punchclock::client::{NewTimeEntry, User};
use punchclock::{
    CachePolicy, CachedClient, FileCache, HttpApi, MemoryCache, PunchclockError, Settings,
    TimeTrackingApi,
};

/// Punchclock CLI
#[derive(Parser)]
#[command(name = "punch")]
#[command(version = punchclock::PKG_VERSION)]
#[command(about = "Time tracking from the terminal")]
struct Args {
    /// Config file (default: <config dir>/punchclock/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API key
    #[arg(long, env = "PUNCHCLOCK_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Workspace ID (default: the user's active workspace)
    #[arg(short, long, env = "PUNCHCLOCK_WORKSPACE")]
    workspace: Option<String>,

    /// Bypass the cache for this invocation
    #[arg(long)]
    no_cache: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the authenticated user
    Whoami,

    /// List workspaces
    Workspaces,

    /// List projects in the workspace
    Projects,

    /// List clients in the workspace
    Clients,

    /// List tags in the workspace
    Tags,

    /// List tasks of a project
    Tasks {
        /// Project ID
        project: String,
    },

    /// List favorite entries
    Favorites,

    /// Show the running timer
    Running,

    /// Start a timer
    Start {
        /// Entry description
        #[arg(default_value = "")]
        description: String,
        /// Project ID
        #[arg(short, long)]
        project: Option<String>,
        /// Task ID
        #[arg(short, long)]
        task: Option<String>,
    },

    /// Stop the running timer
    Stop,

    /// Inspect or reset the cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show cache location and entry counts
    Stats,
    /// Remove every cached entry
    Clear,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref())?;

    let file_cache = match settings.file_cache_config()? {
        Some(config) if !args.no_cache => Some(FileCache::new(config)),
        _ => None,
    };

    // Cache maintenance needs no API key
    if let Command::Cache { action } = &args.command {
        return run_cache(action, file_cache).await;
    }

    let api_key = args.api_key.ok_or_else(|| {
        PunchclockError::Configuration("no API key; set PUNCHCLOCK_API_KEY".into())
    })?;
    let api = HttpApi::with_base_url(api_key, &settings.api.base_url)?;

    let policy = if args.no_cache {
        CachePolicy::disabled()
    } else {
        settings.cache_policy()
    };
    let mut client = CachedClient::new(api)
        .with_memory_cache(MemoryCache::new(settings.memory_cache_config()))
        .with_policy(policy);
    if let Some(file) = file_cache {
        client = client.with_file_cache(file);
    }

    let user = client.current_user().await?;
    let workspace = || resolve_workspace(args.workspace.as_deref(), &user);

    match args.command {
        Command::Whoami => {
            println!("{} ({})", user.name, user.id);
            if let Some(email) = &user.email {
                println!("email: {email}");
            }
            if let Some(ws) = &user.active_workspace {
                println!("workspace: {ws}");
            }
        }

        Command::Workspaces => {
            for ws in client.workspaces().await? {
                println!("{}  {}", ws.id, ws.name);
            }
        }

        Command::Projects => {
            for project in client.projects(workspace()?).await? {
                let client_name = project.client_name.as_deref().unwrap_or("-");
                println!("{}  {}  [{}]", project.id, project.name, client_name);
            }
        }

        Command::Clients => {
            for c in client.clients(workspace()?).await? {
                println!("{}  {}", c.id, c.name);
            }
        }

        Command::Tags => {
            for tag in client.tags(workspace()?).await? {
                println!("{}  {}", tag.id, tag.name);
            }
        }

        Command::Tasks { project } => {
            for task in client.tasks(workspace()?, &project).await? {
                println!("{}  {}", task.id, task.name);
            }
        }

        Command::Favorites => {
            for fav in client.favorites(workspace()?).await? {
                println!("{}  {}", fav.id, fav.description);
            }
        }

        Command::Running => match client.running_entry(workspace()?, &user.id).await? {
            Some(entry) => {
                let elapsed = Utc::now() - entry.time_interval.start;
                println!(
                    "{}  {}  ({}m)",
                    entry.id,
                    entry.description,
                    elapsed.num_minutes()
                );
            }
            None => println!("no timer running"),
        },

        Command::Start {
            description,
            project,
            task,
        } => {
            let mut entry = NewTimeEntry::starting_at(Utc::now(), description);
            if let Some(project) = project {
                entry = entry.project(project);
            }
            if let Some(task) = task {
                entry = entry.task(task);
            }
            let started = client.start_entry(workspace()?, &entry).await?;
            println!("started {}", started.id);
        }

        Command::Stop => {
            let stopped = client
                .stop_entry(workspace()?, &user.id, Utc::now())
                .await?;
            println!("stopped {}", stopped.id);
        }

        Command::Cache { .. } => {}
    }

    Ok(())
}

async fn run_cache(
    action: &CacheAction,
    file_cache: Option<FileCache>,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(file) = file_cache else {
        println!("file cache disabled");
        return Ok(());
    };
    match action {
        CacheAction::Stats => {
            let store = store::load(file.path())?;
            let now = epoch_millis();
            let live = store.values().filter(|e| e.is_valid(now)).count();
            let bytes = std::fs::metadata(file.path()).map(|m| m.len()).unwrap_or(0);
            println!("path: {}", file.path().display());
            println!("entries: {} ({} expired)", store.len(), store.len() - live);
            println!("size: {bytes} bytes");
        }
        CacheAction::Clear => {
            file.clear().await?;
            println!("cleared {}", file.path().display());
        }
    }
    Ok(())
}

fn resolve_workspace<'a>(explicit: Option<&'a str>, user: &'a User) -> punchclock::Result<&'a str> {
    explicit
        .or(user.active_workspace.as_deref())
        .or(user.default_workspace.as_deref())
        .ok_or_else(|| {
            PunchclockError::InvalidInput("no workspace; pass --workspace".into())
        })
}
