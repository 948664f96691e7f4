use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reelfeed::app::{App, AppEvent};
use reelfeed::config::Config;
use reelfeed::feed::DecoratedItem;
use reelfeed::navigation::LogNavigator;
use reelfeed::remote::{build_client, ContentKind, HttpContentStore, HttpMediaStorage};
use reelfeed::session::SessionStore;
use reelfeed::storage::{Database, DatabaseError, KeyValueStore};
use reelfeed::upload::LocalMediaHandle;
use reelfeed::util::{single_line, truncate_to_width};

/// Width of the description column when listing items
const DESCRIPTION_WIDTH: usize = 48;

/// Get the config directory path (~/.config/reelfeed/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("reelfeed"))
}

#[derive(Parser, Debug)]
#[command(name = "reelfeed", about = "Photo and reel feeds from the command line")]
struct Args {
    /// Config file (default: ~/.config/reelfeed/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List reels with their like flags
    Reels,
    /// List photo posts with their like flags
    Posts,
    /// Search loaded posts and reels by author or description
    Search { query: String },
    /// Toggle the like on an item
    Like {
        id: String,
        /// The item is a photo post (likes stay on this device)
        #[arg(long)]
        post: bool,
    },
    /// Upload a video and add it to the reels feed
    Upload { path: PathBuf },
    /// Show your profile, optionally replacing the profile image
    Profile {
        #[arg(long, value_name = "FILE")]
        image: Option<PathBuf>,
    },
    /// Replay scroll offsets and taps (`tap:<index>`) through the reel player.
    /// Consecutive offsets form one gesture; only where it ends counts.
    Scroll {
        #[arg(required = true, allow_hyphen_values = true)]
        steps: Vec<String>,
        /// Override the configured item height
        #[arg(long)]
        height: Option<f64>,
    },
    /// Open an item's detail screen
    Open { id: String },
    /// Store a session token (read from stdin if omitted)
    Login {
        #[arg(long)]
        token: Option<String>,
    },
    /// Clear the stored session token
    Logout,
}

fn kind_of(post: bool) -> ContentKind {
    if post {
        ContentKind::Post
    } else {
        ContentKind::Reel
    }
}

fn copy_secret(secret: &Option<SecretString>) -> Option<SecretString> {
    secret
        .as_ref()
        .map(|s| SecretString::from(s.expose_secret().to_string()))
}

async fn open_database(path: &std::path::Path) -> Result<Database> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Database::open(path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of reelfeed appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

/// Refreshes one feed and waits for the result.
async fn refresh(app: &mut App, kind: ContentKind) -> Result<()> {
    let generation = app.spawn_refresh(kind);
    loop {
        let event = app
            .next_event()
            .await
            .context("Event channel closed during refresh")?;
        let done = matches!(
            &event,
            AppEvent::RefreshCompleted { kind: k, generation: g, .. } if *k == kind && *g == generation
        );
        app.handle_event(event).await;
        if done {
            break;
        }
    }
    match app.status.take() {
        Some(message) => anyhow::bail!(message),
        None => Ok(()),
    }
}

fn print_items(items: &[DecoratedItem]) {
    if items.is_empty() {
        println!("(no items)");
        return;
    }
    for (index, entry) in items.iter().enumerate() {
        let description = single_line(&entry.item.description);
        println!(
            "{:>3}  {}  {:<24} {:<16} {}",
            index,
            if entry.liked { "♥" } else { "·" },
            entry.item.id,
            truncate_to_width(&single_line(&entry.item.author_name), 16),
            truncate_to_width(&description, DESCRIPTION_WIDTH),
        );
    }
}

fn resolve_media(path: PathBuf) -> Result<LocalMediaHandle> {
    let path = path
        .canonicalize()
        .with_context(|| format!("Failed to resolve upload file: {}", path.display()))?;
    Ok(LocalMediaHandle::new(path))
}

async fn upload(app: &mut App, path: PathBuf) -> Result<()> {
    let mut progress = app.spawn_upload(resolve_media(path)?);
    let mut progress_open = true;

    loop {
        tokio::select! {
            changed = progress.changed(), if progress_open => {
                if changed.is_ok() {
                    let p = *progress.borrow_and_update();
                    eprint!("\r{:<16} {}/{} bytes", p.stage, p.transferred, p.total);
                } else {
                    progress_open = false;
                }
            }
            event = app.next_event() => {
                let event = event.context("Event channel closed during upload")?;
                let outcome = match &event {
                    AppEvent::UploadFinished { result, .. } => Some(
                        result
                            .as_ref()
                            .map(|item| item.id.clone())
                            .map_err(|e| e.to_string()),
                    ),
                    _ => None,
                };
                app.handle_event(event).await;
                if let Some(outcome) = outcome {
                    eprintln!();
                    return match outcome {
                        Ok(id) => {
                            println!("Uploaded reel {id}");
                            Ok(())
                        }
                        Err(e) => anyhow::bail!(e),
                    };
                }
            }
        }
    }
}

/// Waits until a published scroll burst has been applied.
async fn settle_scroll(app: &mut App) -> Result<()> {
    let before = app.playback.active_index();
    loop {
        let event = app
            .next_event()
            .await
            .context("Event channel closed during scroll")?;
        let offset = match &event {
            AppEvent::Scrolled { offset } => Some(*offset),
            _ => None,
        };
        app.handle_event(event).await;
        if let Some(offset) = offset {
            match (before, app.playback.active_index()) {
                (Some(from), Some(to)) if from != to => println!("scroll {offset}: {from} -> {to}"),
                (None, Some(to)) => println!("scroll {offset}: -> {to}"),
                _ => println!("scroll {offset}: no change"),
            }
            return Ok(());
        }
    }
}

async fn scroll(app: &mut App, steps: &[String]) -> Result<()> {
    let publisher = app.scroll_publisher();
    let mut gesture = false;
    for step in steps {
        if let Some(index) = step.strip_prefix("tap:") {
            if std::mem::take(&mut gesture) {
                settle_scroll(app).await?;
            }
            let index: usize = index
                .parse()
                .with_context(|| format!("Invalid tap index: {step}"))?;
            match app.toggle_play(index) {
                Some(state) => println!("tap {index}: {state:?}"),
                None => println!("tap {index}: ignored (not the active item)"),
            }
        } else {
            let offset: f64 = step
                .parse()
                .with_context(|| format!("Invalid scroll offset: {step}"))?;
            if !offset.is_finite() {
                println!("scroll {offset}: ignored");
                continue;
            }
            publisher.publish(offset);
            gesture = true;
        }
    }
    if gesture {
        settle_scroll(app).await?;
    }

    let state = app.playback.snapshot();
    match state.active_index {
        Some(index) => println!(
            "active: {index} ({})",
            if state.playing.get(&index).copied().unwrap_or(false) {
                "playing"
            } else {
                "paused"
            }
        ),
        None => println!("active: none"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    // User-only access to the token database
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db = open_database(&config_dir.join("reelfeed.db")).await?;
    let store: Arc<dyn KeyValueStore> = Arc::new(db);

    let token = match SessionStore::new(Arc::clone(&store)).token().await {
        Ok(token) => token,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read session token");
            None
        }
    };
    let api_key = config.api_key.clone().map(SecretString::from);

    let client = build_client().context("Failed to build HTTP client")?;
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let remote = HttpContentStore::new(client.clone(), &config.backend_url, timeout)
        .context("Invalid backend_url")?
        .with_token(copy_secret(&token))
        .with_api_key(copy_secret(&api_key));
    let media = HttpMediaStorage::new(client, &config.storage_url, timeout)
        .context("Invalid storage_url")?
        .with_token(token)
        .with_api_key(api_key);

    let mut app = App::new(
        config,
        store,
        Arc::new(remote),
        Arc::new(media),
        Box::new(LogNavigator::default()),
    )
    .context("Failed to create application")?;

    let signed_in = app.start().await;
    let needs_session = !matches!(args.command, Command::Login { .. } | Command::Logout);
    if needs_session && !signed_in {
        eprintln!("Warning: not signed in. Run `reelfeed login --token <TOKEN>` first.");
    }

    match args.command {
        Command::Reels => {
            refresh(&mut app, ContentKind::Reel).await?;
            print_items(&app.decorated(ContentKind::Reel));
        }
        Command::Posts => {
            refresh(&mut app, ContentKind::Post).await?;
            print_items(&app.decorated(ContentKind::Post));
        }
        Command::Search { query } => {
            refresh(&mut app, ContentKind::Post).await?;
            refresh(&mut app, ContentKind::Reel).await?;
            print_items(&app.search(&query));
        }
        Command::Like { id, post } => {
            let kind = kind_of(post);
            let liked = app.toggle_like(kind, &id).await;
            app.flush_likes().await;
            println!("{} {kind} {id}", if liked { "Liked" } else { "Unliked" });
        }
        Command::Upload { path } => {
            upload(&mut app, path).await?;
        }
        Command::Profile { image } => {
            if let Some(path) = image {
                let url = app
                    .update_profile_image(&resolve_media(path)?, None)
                    .await
                    .context("Failed to update profile image")?;
                println!("Profile image: {url}");
            }
            match app.open_profile().await.context("Failed to load profile")? {
                Some(profile) => {
                    println!("{}", single_line(profile.name()));
                    if let Some(email) = &profile.email {
                        println!("{}", single_line(email));
                    }
                    if let Some(image) = &profile.profile_image {
                        println!("image: {image}");
                    }
                }
                None => println!("No profile found"),
            }
        }
        Command::Scroll { steps, height } => {
            if let Some(height) = height {
                app.playback
                    .set_item_height(height)
                    .context("Invalid --height")?;
            }
            refresh(&mut app, ContentKind::Reel).await?;
            scroll(&mut app, &steps).await?;
        }
        Command::Open { id } => {
            refresh(&mut app, ContentKind::Post).await?;
            refresh(&mut app, ContentKind::Reel).await?;
            if !app.open_item(&id) {
                anyhow::bail!("No post or reel with id {id}");
            }
        }
        Command::Login { token } => {
            let token = match token {
                Some(token) => token,
                None => {
                    let mut line = String::new();
                    std::io::stdin()
                        .lock()
                        .read_line(&mut line)
                        .context("Failed to read token from stdin")?;
                    line
                }
            };
            if token.trim().is_empty() {
                anyhow::bail!("Empty session token");
            }
            app.login(&SecretString::from(token))
                .await
                .context("Failed to store session token")?;
            println!("Signed in.");
        }
        Command::Logout => {
            app.logout().await.context("Failed to clear session token")?;
            println!("Signed out.");
        }
    }

    Ok(())
}
