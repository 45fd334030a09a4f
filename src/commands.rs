use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use thiserror::Error;
use uuid::Uuid;

use second_brain::config::{AppConfig, ConfigError};
use second_brain::core::account::{Credentials, Session, validate_password_change};
use second_brain::core::blobs::BlobLifecycle;
use second_brain::core::cache::EntityCache;
use second_brain::core::entity::Entity;
use second_brain::core::error::{CacheError, GatewayError, ValidationError};
use second_brain::core::export;
use second_brain::core::note::Note;
use second_brain::core::projector::{self, MonthGrid};
use second_brain::core::task::{Category, Task, TaskDraft, TaskPatch};
use second_brain::sync::rest::RestClient;
use second_brain::sync::{AuthGateway, BlobStore, EntityGateway, calendar, keyring};

use crate::display;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("{}", .0.user_message())]
    Cache(#[from] CacheError),
    #[error("not signed in, run `second-brain login <email> <password>` first")]
    NotSignedIn,
    #[error("{0}")]
    Keyring(String),
    #[error("no {kind} id starts with '{prefix}'")]
    NoMatch { kind: &'static str, prefix: String },
    #[error("'{prefix}' matches more than one {kind}, use more characters")]
    Ambiguous { kind: &'static str, prefix: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "second-brain")]
#[command(about = "Tasks, notes and a month calendar backed by a hosted Second Brain account")]
#[command(version)]
#[command(after_help = "Task and note ids may be shortened to any unique prefix.")]
pub struct Cli {
    /// Log at debug level for this run
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(flatten)]
    Account(AccountCommand),
    #[command(flatten)]
    Session(SessionCommand),
}

/// Commands that run without a stored session.
#[derive(Subcommand, Debug)]
pub enum AccountCommand {
    /// Sign in and remember the session
    Login { email: String, password: String },
    /// Create an account
    Signup { email: String, password: String },
    /// Sign out and forget the session
    Logout,
}

/// Commands that need a signed-in session.
#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// Change the password
    Passwd { new_password: String, confirm: String },
    /// Tasks due today, undated tasks, and the rest
    Today,
    /// Calendar grid for a month (default: this month)
    Month {
        /// Month as YYYY-MM
        #[arg(value_parser = parse_year_month)]
        month: Option<YearMonth>,
    },
    /// List every task
    Tasks,
    /// Add a task
    Add {
        /// Task title
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,
        #[arg(short, long, default_value_t)]
        category: Category,
        /// Due date (YYYY-MM-DD)
        #[arg(short, long)]
        due: Option<NaiveDate>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Change a task's title, category, due date or description
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(short, long)]
        category: Option<Category>,
        /// Due date (YYYY-MM-DD)
        #[arg(short, long, conflicts_with = "no_due")]
        due: Option<NaiveDate>,
        /// Clear the due date
        #[arg(long)]
        no_due: bool,
        #[arg(long, conflicts_with = "no_description")]
        description: Option<String>,
        /// Clear the description
        #[arg(long)]
        no_description: bool,
    },
    /// Toggle a task done
    Done { id: String },
    /// Delete a task
    Rm { id: String },
    /// Write an .ics file for a dated task and print a Google Calendar link
    Ics { id: String },
    /// List every note
    Notes,
    /// Create an untitled note
    NewNote,
    /// Replace a note's title and content (HTML read from a file)
    EditNote {
        id: String,
        title: String,
        content_file: PathBuf,
    },
    /// Upload an image and append it to a note
    Attach { id: String, image: PathBuf },
    /// Toggle a note's favorite flag
    Fav { id: String },
    /// Delete a note and the images only it uses
    RmNote { id: String },
    /// Write a JSON backup of all tasks and notes
    Export { path: Option<PathBuf> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

/// "2024-06" -> 2024, June
fn parse_year_month(s: &str) -> Result<YearMonth, String> {
    let bad = || format!("expected YYYY-MM, got '{}'", s);
    let (year, month) = s.split_once('-').ok_or_else(bad)?;
    let year: i32 = year.parse().map_err(|_| bad())?;
    let month: u32 = month.parse().map_err(|_| bad())?;
    if !(1..=12).contains(&month) {
        return Err(bad());
    }
    Ok(YearMonth { year, month })
}

/// Build the patch for `edit`. An edit that changes nothing is a usage error.
fn task_edit_patch(
    title: Option<String>,
    category: Option<Category>,
    due: Option<NaiveDate>,
    no_due: bool,
    description: Option<String>,
    no_description: bool,
) -> Result<TaskPatch, CliError> {
    let patch = TaskPatch {
        title,
        category,
        due_date: if no_due { Some(None) } else { due.map(Some) },
        description: if no_description {
            Some(None)
        } else {
            description.map(Some)
        },
        ..TaskPatch::default()
    };
    if patch == TaskPatch::default() {
        return Err(CliError::Usage(
            "nothing to change, pass --title, --category, --due, --no-due, --description or --no-description".to_string(),
        ));
    }
    Ok(patch)
}

pub async fn run(command: Command, config: &AppConfig) -> Result<(), CliError> {
    let client = RestClient::new(config.require_backend()?, &config.api_key, &config.image_bucket)?;

    match command {
        Command::Account(command) => account(command, &client).await,
        Command::Session(command) => {
            let session = resume(&client).await?;
            let workspace = Workspace::open(client, session);
            let result = workspace.run(command, config).await;
            workspace.close();
            result
        }
    }
}

async fn account(command: AccountCommand, client: &RestClient) -> Result<(), CliError> {
    match command {
        AccountCommand::Login { email, password } => {
            let credentials = Credentials::new(email, password)?;
            let session = client.sign_in(&credentials).await?;
            remember(client, &session).await?;
            println!("Signed in as {}", session.owner_label());
        }
        AccountCommand::Signup { email, password } => {
            let credentials = Credentials::new(email, password)?;
            match client.sign_up(&credentials).await? {
                Some(session) => {
                    remember(client, &session).await?;
                    println!("Account created, signed in as {}", session.owner_label());
                }
                None => println!("Check your inbox to confirm the account, then run `second-brain login`."),
            }
        }
        AccountCommand::Logout => {
            match resume(client).await {
                Ok(session) => {
                    if let Err(e) = client.sign_out(&session).await {
                        log::warn!("Sign out request failed: {}", e);
                    }
                }
                Err(CliError::NotSignedIn) => {}
                Err(e) => log::warn!("Could not resume session for sign out: {}", e),
            }
            keyring::delete_refresh_token(client.base_url())
                .await
                .map_err(CliError::Keyring)?;
            println!("Signed out");
        }
    }
    Ok(())
}

async fn remember(client: &RestClient, session: &Session) -> Result<(), CliError> {
    keyring::store_refresh_token(client.base_url(), &session.refresh_token)
        .await
        .map_err(CliError::Keyring)
}

/// Trade the stored refresh token for a fresh session. The backend rotates
/// refresh tokens, so the new one replaces the stored one.
async fn resume(client: &RestClient) -> Result<Session, CliError> {
    let token = keyring::load_refresh_token(client.base_url())
        .await
        .map_err(CliError::Keyring)?
        .ok_or(CliError::NotSignedIn)?;
    let session = match client.refresh(&token).await {
        Ok(session) => session,
        Err(e @ GatewayError::Transport(_)) => return Err(e.into()),
        Err(e) => {
            log::info!("Stored session rejected: {}", e);
            return Err(CliError::NotSignedIn);
        }
    };
    remember(client, &session).await?;
    log::debug!("Resumed session for {}", session.user.id);
    Ok(session)
}

/// Everything a signed-in command works against.
struct Workspace {
    session: Session,
    client: Arc<RestClient>,
    tasks: Arc<EntityCache<Task>>,
    notes: Arc<EntityCache<Note>>,
    lifecycle: BlobLifecycle,
}

impl Workspace {
    fn open(client: RestClient, session: Session) -> Self {
        let client = Arc::new(client.with_session(&session));
        let owner = session.user.id;

        let task_gateway: Arc<dyn EntityGateway<Task>> = client.clone();
        let note_gateway: Arc<dyn EntityGateway<Note>> = client.clone();
        let blobs: Arc<dyn BlobStore> = client.clone();

        let tasks = Arc::new(EntityCache::new(owner, task_gateway));
        let notes = Arc::new(EntityCache::new(owner, note_gateway));
        let lifecycle = BlobLifecycle::new(notes.clone(), blobs);

        Self {
            session,
            client,
            tasks,
            notes,
            lifecycle,
        }
    }

    fn close(&self) {
        self.tasks.dispose();
        self.notes.dispose();
    }

    async fn run(&self, command: SessionCommand, config: &AppConfig) -> Result<(), CliError> {
        let today = Local::now().date_naive();

        match command {
            SessionCommand::Passwd {
                new_password,
                confirm,
            } => {
                validate_password_change(&new_password, &confirm)?;
                self.client
                    .update_password(&self.session, &new_password)
                    .await?;
                println!("Password updated");
            }
            SessionCommand::Today => {
                self.tasks.init().await?;
                let buckets = projector::bucket_by_today(&self.tasks.snapshot(), today);
                print!("{}", display::render_today(&buckets, today));
            }
            SessionCommand::Month { month } => {
                let grid = match month {
                    Some(YearMonth { year, month }) => MonthGrid::new(year, month, config.week_start)
                        .ok_or_else(|| CliError::Usage(format!("no such month {}-{:02}", year, month)))?,
                    None => MonthGrid::containing(today, config.week_start),
                };
                self.tasks.init().await?;
                let days = projector::bucket_by_month(&self.tasks.snapshot(), grid.year(), grid.month());
                print!("{}", display::render_month(&grid, &days, today));
            }
            SessionCommand::Tasks => {
                self.tasks.init().await?;
                if self.tasks.is_empty() {
                    println!("No tasks yet");
                }
                for task in self.tasks.snapshot() {
                    println!("{}", display::task_line(&task));
                }
            }
            SessionCommand::Add {
                title,
                category,
                due,
                description,
            } => {
                let mut draft = TaskDraft::new(title.join(" "), category);
                draft.due_date = due;
                draft.description = description;
                let task = self.tasks.create(draft).await?;
                println!("{}", display::task_line(&task));
            }
            SessionCommand::Edit {
                id,
                title,
                category,
                due,
                no_due,
                description,
                no_description,
            } => {
                let patch = task_edit_patch(title, category, due, no_due, description, no_description)?;
                self.tasks.init().await?;
                let id = resolve(&self.tasks, "task", &id)?;
                let task = self.tasks.patch(id, patch).await?;
                println!("{}", display::task_line(&task));
            }
            SessionCommand::Done { id } => {
                self.tasks.init().await?;
                let id = resolve(&self.tasks, "task", &id)?;
                let task = self.tasks.toggle_done(id).await?;
                println!("{}", display::task_line(&task));
            }
            SessionCommand::Rm { id } => {
                self.tasks.init().await?;
                let id = resolve(&self.tasks, "task", &id)?;
                self.tasks.remove(id).await?;
                println!("Deleted");
            }
            SessionCommand::Ics { id } => {
                self.tasks.init().await?;
                let id = resolve(&self.tasks, "task", &id)?;
                let task = self
                    .tasks
                    .get(id)
                    .ok_or(CacheError::UnknownEntity { id })?;
                let ics = calendar::task_to_vcalendar(&task, Utc::now())?;
                let path = config.export_directory.join(calendar::ics_file_name(&task));
                std::fs::write(&path, ics)?;
                println!("Wrote {}", path.display());
                println!("Google Calendar: {}", calendar::google_calendar_url(&task)?);
            }
            SessionCommand::Notes => {
                self.notes.init().await?;
                if self.notes.is_empty() {
                    println!("No notes yet");
                }
                for note in self.notes.snapshot() {
                    println!("{}", display::note_line(&note));
                }
            }
            SessionCommand::NewNote => {
                let note = self.lifecycle.create_note().await?;
                println!("{}", display::note_line(&note));
            }
            SessionCommand::EditNote {
                id,
                title,
                content_file,
            } => {
                self.notes.init().await?;
                let id = resolve(&self.notes, "note", &id)?;
                let content = std::fs::read_to_string(&content_file)?;
                let note = self.lifecycle.save(id, title, content).await?;
                println!("{}", display::note_line(&note));
            }
            SessionCommand::Attach { id, image } => {
                self.notes.init().await?;
                let id = resolve(&self.notes, "note", &id)?;
                let note = self.notes.get(id).ok_or(CacheError::UnknownEntity { id })?;
                let url = self.upload(&image).await?;
                let content = format!("{}<p><img src=\"{}\"></p>", note.content, url);
                let note = self.lifecycle.save(id, note.title, content).await?;
                println!("{}", display::note_line(&note));
            }
            SessionCommand::Fav { id } => {
                self.notes.init().await?;
                let id = resolve(&self.notes, "note", &id)?;
                let note = self.notes.toggle_favorite(id).await?;
                println!("{}", display::note_line(&note));
            }
            SessionCommand::RmNote { id } => {
                self.notes.init().await?;
                let id = resolve(&self.notes, "note", &id)?;
                self.lifecycle.delete(id).await?;
                println!("Deleted");
            }
            SessionCommand::Export { path } => {
                let backup = export::fetch_backup(
                    self.client.as_ref(),
                    self.client.as_ref(),
                    self.session.user.id,
                    self.session.owner_label(),
                )
                .await?;
                let path = path.unwrap_or_else(|| export::default_path(&config.export_directory, today));
                backup.write_to(&path)?;
                println!(
                    "Exported {} tasks and {} notes to {}",
                    backup.tasks.len(),
                    backup.notes.len(),
                    path.display()
                );
            }
        }
        Ok(())
    }

    async fn upload(&self, image: &Path) -> Result<String, CliError> {
        let bytes = std::fs::read(image)?;
        let file_name = image
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("image");
        Ok(self.lifecycle.upload_image(file_name, bytes).await?)
    }
}

/// A full id, or a unique prefix of one currently in the cache.
fn resolve<E: Entity>(cache: &EntityCache<E>, kind: &'static str, arg: &str) -> Result<Uuid, CliError> {
    if let Ok(id) = Uuid::parse_str(arg) {
        return Ok(id);
    }
    let prefix = arg.trim().to_ascii_lowercase();
    let matches: Vec<Uuid> = cache
        .snapshot()
        .iter()
        .map(|e| e.id())
        .filter(|id| !prefix.is_empty() && id.to_string().starts_with(&prefix))
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(CliError::NoMatch { kind, prefix }),
        _ => Err(CliError::Ambiguous { kind, prefix }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use second_brain::sync::memory::MemoryStore;

    fn parse(line: &str) -> Result<Command, clap::Error> {
        Cli::try_parse_from(std::iter::once("second-brain").chain(line.split_whitespace()))
            .map(|cli| cli.command)
    }

    fn session(line: &str) -> SessionCommand {
        match parse(line).unwrap() {
            Command::Session(command) => command,
            other => panic!("expected a session command, got {:?}", other),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn account_commands_skip_the_session() {
        assert!(matches!(
            parse("login me@example.com hunter22").unwrap(),
            Command::Account(AccountCommand::Login { .. })
        ));
        assert!(matches!(parse("logout").unwrap(), Command::Account(AccountCommand::Logout)));
        assert!(matches!(parse("today").unwrap(), Command::Session(SessionCommand::Today)));
    }

    #[test]
    fn add_collects_title_and_flags() {
        let SessionCommand::Add {
            title,
            category,
            due,
            description,
        } = session("add Pay the rent --category finance --due 2024-06-30")
        else {
            panic!("expected add");
        };
        assert_eq!(title.join(" "), "Pay the rent");
        assert_eq!(category, Category::Finance);
        assert_eq!(due, NaiveDate::from_ymd_opt(2024, 6, 30));
        assert_eq!(description, None);
    }

    #[test]
    fn add_defaults_to_work_and_accepts_legacy_personal() {
        assert!(matches!(
            session("add Thing"),
            SessionCommand::Add { category: Category::Work, .. }
        ));
        assert!(matches!(
            session("add Thing -c personal"),
            SessionCommand::Add { category: Category::Home, .. }
        ));
    }

    #[test]
    fn add_rejects_unknown_category_bad_date_and_missing_title() {
        assert!(parse("add Thing --category chores").is_err());
        assert!(parse("add Thing --due 30/06/2024").is_err());
        assert!(parse("add").is_err());
    }

    #[test]
    fn month_argument_is_checked() {
        assert!(matches!(
            session("month 2024-02"),
            SessionCommand::Month {
                month: Some(YearMonth { year: 2024, month: 2 })
            }
        ));
        assert!(matches!(session("month"), SessionCommand::Month { month: None }));
        assert!(parse("month 2024-13").is_err());
        assert!(parse("month June").is_err());
    }

    #[test]
    fn edit_builds_field_patch() {
        let SessionCommand::Edit {
            id,
            title,
            category,
            due,
            no_due,
            description,
            no_description,
        } = session("edit 1a2b --title Renamed -c health --no-due --description later")
        else {
            panic!("expected edit");
        };
        assert_eq!(id, "1a2b");
        let patch = task_edit_patch(title, category, due, no_due, description, no_description).unwrap();
        assert_eq!(patch.title.as_deref(), Some("Renamed"));
        assert_eq!(patch.category, Some(Category::Health));
        assert_eq!(patch.due_date, Some(None));
        assert_eq!(patch.description, Some(Some("later".to_string())));
        assert_eq!(patch.is_done, None);
    }

    #[test]
    fn edit_needs_a_change_and_rejects_conflicting_flags() {
        assert!(matches!(
            task_edit_patch(None, None, None, false, None, false),
            Err(CliError::Usage(_))
        ));
        assert!(parse("edit 1a2b --due 2024-06-30 --no-due").is_err());
        assert!(parse("edit 1a2b --description x --no-description").is_err());
    }

    #[test]
    fn missing_arguments_are_rejected() {
        assert!(parse("done").is_err());
        assert!(parse("login me@example.com").is_err());
        assert!(parse("frobnicate").is_err());
        assert!(matches!(session("rm-note abc"), SessionCommand::RmNote { .. }));
    }

    #[tokio::test]
    async fn edit_patch_reaches_the_cache() {
        let owner = Uuid::new_v4();
        let store = Arc::new(MemoryStore::<Task>::new(owner));
        let cache = EntityCache::new(owner, store.clone() as Arc<dyn EntityGateway<Task>>);
        let task = cache
            .create(TaskDraft::new("Draft", Category::Work).due(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()))
            .await
            .unwrap();

        let patch = task_edit_patch(Some("Final".into()), Some(Category::Ideas), None, true, None, false).unwrap();
        let edited = cache.patch(task.id, patch).await.unwrap();
        assert_eq!(edited.title, "Final");
        assert_eq!(edited.category, Category::Ideas);
        assert_eq!(edited.due(), None);
        assert_eq!(store.rows()[0].title, "Final");
    }

    #[tokio::test]
    async fn ids_resolve_by_unique_prefix() {
        let owner = Uuid::new_v4();
        let store = Arc::new(MemoryStore::<Task>::new(owner));
        let cache = EntityCache::new(owner, store.clone() as Arc<dyn EntityGateway<Task>>);
        let task = cache.create(TaskDraft::new("One", Category::Work)).await.unwrap();

        let full = task.id.to_string();
        assert_eq!(resolve(&cache, "task", &full).unwrap(), task.id);
        assert_eq!(resolve(&cache, "task", &full[..6]).unwrap(), task.id);
        assert!(matches!(
            resolve(&cache, "task", "zzzz"),
            Err(CliError::NoMatch { kind: "task", .. })
        ));
        assert!(matches!(resolve(&cache, "task", ""), Err(CliError::NoMatch { .. })));
    }

    #[test]
    fn cache_errors_print_user_wording() {
        let err = CliError::from(CacheError::Denied { id: Uuid::nil() });
        assert_eq!(
            err.to_string(),
            "You don't have permission, or the item no longer exists."
        );
    }
}
