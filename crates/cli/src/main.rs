use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use shelf_app::books::models::{Book, BookStatus, StatusFilter};
use shelf_cli::{
    client::{is_unauthorized, BooksApi, BooksClient, ClientError},
    dashboard::Dashboard,
    session::{self, StoredSession},
};
use shelf_db::{BackendClient, SignUp};
use shelf_events::ChangeEvent;
use shelf_kernel::settings::{BackendMode, Settings};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "shelf", version, about = "Track the books you read")]
struct Cli {
    /// Base URL of a running shelf server.
    #[arg(long, env = "SHELF_API_URL", default_value = "http://127.0.0.1:8080", global = true)]
    api_url: String,

    /// Where the signed-in session is kept.
    #[arg(long, env = "SHELF_SESSION", default_value = session::DEFAULT_PATH, global = true)]
    session: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service.
    Serve,
    /// Print the schema migrations for the hosted backend.
    Migrations,
    /// Sign in with email and password.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "SHELF_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account.
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, env = "SHELF_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored session.
    Logout,
    /// List your books.
    List {
        #[arg(long, value_parser = parse_filter, default_value = "all")]
        status: StatusFilter,
        /// Case-insensitive title search.
        #[arg(long, default_value = "")]
        search: String,
    },
    /// Add a book.
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        author: String,
        #[arg(long, default_value = "reading")]
        status: BookStatus,
    },
    /// Replace a book's title, author and status.
    Edit {
        id: Uuid,
        #[arg(long)]
        title: String,
        #[arg(long)]
        author: String,
        #[arg(long)]
        status: BookStatus,
    },
    /// Change only a book's status.
    Status { id: Uuid, status: BookStatus },
    /// Delete a book.
    Delete { id: Uuid },
    /// Follow the change feed and reprint the list on every change.
    Watch {
        #[arg(long, value_parser = parse_filter, default_value = "all")]
        status: StatusFilter,
    },
}

fn parse_filter(raw: &str) -> Result<StatusFilter, String> {
    StatusFilter::parse(Some(raw)).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load().with_context(|| "failed to load shelf settings")?;

    if matches!(cli.command, Command::Serve) {
        shelf_telemetry::init(&settings.telemetry);
    } else {
        // Client commands keep stdout for their output.
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .try_init()
            .ok();
    }

    let session_path = cli.session.as_path();
    let api_url = cli.api_url.as_str();

    let result = match cli.command {
        Command::Serve => {
            tracing::info!(
                env = ?settings.environment,
                backend = ?settings.backend.mode,
                "shelf server starting"
            );
            return shelf_app::run(settings).await;
        }
        Command::Migrations => return print_migrations(settings),
        Command::Login { email, password } => {
            return login(&settings, session_path, &email, &password).await
        }
        Command::Register { email, password } => {
            return register(&settings, session_path, &email, &password).await
        }
        Command::Logout => {
            StoredSession::clear(session_path)?;
            println!("Signed out.");
            return Ok(());
        }
        Command::List { status, search } => {
            let (client, user_id) = connect(api_url, session_path)?;
            list(client, user_id, status, &search).await
        }
        Command::Add {
            title,
            author,
            status,
        } => {
            let (client, user_id) = connect(api_url, session_path)?;
            let mut dashboard = Dashboard::new(client, Some(user_id), StatusFilter::All);
            dashboard
                .add(&title, &author, status)
                .await
                .map(|book| println!("Added {}", format_book(book)))
                .map_err(anyhow::Error::from)
        }
        Command::Edit {
            id,
            title,
            author,
            status,
        } => {
            let (client, user_id) = connect(api_url, session_path)?;
            let mut dashboard = Dashboard::new(client, Some(user_id), StatusFilter::All);
            dashboard
                .edit(id, &title, &author, status)
                .await
                .map(|book| println!("Updated {}", format_book(&book)))
                .map_err(anyhow::Error::from)
        }
        Command::Status { id, status } => {
            let (client, user_id) = connect(api_url, session_path)?;
            let mut dashboard = Dashboard::new(client, Some(user_id), StatusFilter::All);
            dashboard
                .set_status(id, status)
                .await
                .map(|book| println!("Updated {}", format_book(&book)))
                .map_err(anyhow::Error::from)
        }
        Command::Delete { id } => {
            let (client, user_id) = connect(api_url, session_path)?;
            let mut dashboard = Dashboard::new(client, Some(user_id), StatusFilter::All);
            dashboard
                .remove(id)
                .await
                .map(|()| println!("Deleted {id}"))
                .map_err(anyhow::Error::from)
        }
        Command::Watch { status } => {
            let (client, user_id) = connect(api_url, session_path)?;
            watch(client, user_id, status).await
        }
    };

    result.map_err(explain)
}

fn connect(api_url: &str, session_path: &Path) -> anyhow::Result<(BooksClient, Uuid)> {
    let stored = StoredSession::load(session_path)?;
    Ok((BooksClient::new(api_url, stored.access_token), stored.user_id))
}

fn print_migrations(mut settings: Settings) -> anyhow::Result<()> {
    // Only the SQL is needed; skip hosted credential checks.
    settings.backend.mode = BackendMode::Memory;
    let registry = shelf_app::build_registry(&settings)?;

    for (module, migration) in registry.collect_migrations() {
        println!("-- {}/{}", module, migration.id);
        println!("{}", migration.up.trim());
        println!();
    }
    Ok(())
}

fn auth_client(settings: &Settings) -> anyhow::Result<BackendClient> {
    let (url, anon_key) = settings.backend.public_credentials()?;
    BackendClient::new(url, anon_key)
}

async fn login(
    settings: &Settings,
    path: &Path,
    email: &str,
    password: &str,
) -> anyhow::Result<()> {
    let session = auth_client(settings)?
        .sign_in_with_password(email, password)
        .await
        .map_err(|e| anyhow!(e.message()))?;

    let stored = StoredSession::from(session);
    stored.save(path)?;
    println!("Signed in as {}.", stored.email.as_deref().unwrap_or(email));
    Ok(())
}

async fn register(
    settings: &Settings,
    path: &Path,
    email: &str,
    password: &str,
) -> anyhow::Result<()> {
    let outcome = auth_client(settings)?
        .sign_up(email, password)
        .await
        .map_err(|e| anyhow!(e.message()))?;

    match outcome {
        SignUp::Session(session) => {
            StoredSession::from(session).save(path)?;
            println!("Account created; signed in as {email}.");
        }
        SignUp::ConfirmationPending { .. } => {
            println!("Check your email to confirm your account, then run `shelf login`.");
        }
    }
    Ok(())
}

fn explain(err: anyhow::Error) -> anyhow::Error {
    match err.downcast_ref::<ClientError>() {
        Some(client_err) if is_unauthorized(client_err) => {
            anyhow!("session rejected by the server; run `shelf login` again")
        }
        _ => err,
    }
}

async fn list(
    client: BooksClient,
    user_id: Uuid,
    filter: StatusFilter,
    search: &str,
) -> anyhow::Result<()> {
    let mut dashboard = Dashboard::new(client, Some(user_id), filter);
    if !dashboard.refresh().await {
        bail!("Failed to fetch books");
    }
    print_dashboard(&dashboard, search);
    Ok(())
}

async fn watch(client: BooksClient, user_id: Uuid, filter: StatusFilter) -> anyhow::Result<()> {
    let mut feed = client.changes().await?;
    let mut dashboard = Dashboard::new(client, Some(user_id), filter);
    dashboard.refresh().await;
    print_dashboard(&dashboard, "");

    loop {
        let next = tokio::select! {
            next = feed.next_event() => next?,
            _ = tokio::signal::ctrl_c() => return Ok(()),
        };
        let Some(event) = next else {
            println!("Change feed closed by the server.");
            return Ok(());
        };

        match event.event.as_str() {
            "change" => match serde_json::from_str::<ChangeEvent>(&event.data) {
                Ok(change) => {
                    tracing::debug!(kind = ?change.kind, id = %change.record_id, "change received")
                }
                Err(e) => tracing::warn!(error = %e, "undecodable change event"),
            },
            "lagged" => tracing::warn!("change feed lagged; refetching"),
            _ => continue,
        }

        if dashboard.refresh().await {
            println!();
            print_dashboard(&dashboard, "");
        }
    }
}

fn format_book(book: &Book) -> String {
    format!(
        "{}  [{:<9}]  {} by {}",
        book.id,
        book.status.as_str(),
        book.title,
        book.author
    )
}

fn print_dashboard<A: BooksApi>(dashboard: &Dashboard<A>, search: &str) {
    let visible = dashboard.visible(search);
    if visible.is_empty() {
        println!("No books.");
    }
    for book in visible {
        println!("{}", format_book(book));
    }

    let stats = dashboard.stats();
    println!(
        "filter: {}  reading: {}  completed: {}  wishlist: {}  total: {}",
        dashboard.filter(),
        stats.reading,
        stats.completed,
        stats.wishlist,
        stats.total
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_defaults_to_reading() {
        let cli = Cli::try_parse_from(["shelf", "add", "--title", "Dune", "--author", "Herbert"])
            .unwrap();
        match cli.command {
            Command::Add { status, title, .. } => {
                assert_eq!(status, BookStatus::Reading);
                assert_eq!(title, "Dune");
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn list_filter_accepts_all_and_statuses() {
        let cli = Cli::try_parse_from(["shelf", "list", "--status", "wishlist"]).unwrap();
        match cli.command {
            Command::List { status, .. } => {
                assert_eq!(status, StatusFilter::Only(BookStatus::Wishlist))
            }
            _ => panic!("expected list"),
        }
    }
}
