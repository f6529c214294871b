use anyhow::Context;
use clap::{Parser, Subcommand};
use courier_config::load as load_config;
use courier_gateway::{build_router, AppState};
use courier_runtime::{telemetry, CoreServices};
use sqlx::Row;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "courier-server")]
#[command(about = "Courier message delivery backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default)
    Serve,
    /// Dump stored messages from the database
    DumpMessages,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server().await,
        Commands::DumpMessages => dump_messages().await,
    }
}

async fn run_server() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise tracing")?;

    info!("starting Courier backend");

    let config = load_config().context("failed to load configuration")?;

    let services = CoreServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    let state = AppState::new(services.db_pool.clone(), config.channel.clone());
    let app = build_router(state);

    let address = format!("{}:{}", config.http.address, config.http.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(courier_runtime::shutdown_signal())
        .await
        .context("http server error")?;

    info!("backend shut down");
    Ok(())
}

async fn dump_messages() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise tracing")?;

    let config = load_config().context("failed to load configuration")?;

    let services = CoreServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    let messages = sqlx::query(
        r#"
        SELECT public_id, conversation_id, sender, recipient, content, content_type,
               is_read, edited, created_at
        FROM private_messages
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .fetch_all(&services.db_pool)
    .await
    .context("failed to fetch messages")?;

    if messages.is_empty() {
        println!("No messages found in database");
        return Ok(());
    }

    println!("Found {} messages:", messages.len());
    println!(
        "{:<26} {:<24} {:<14} {:<14} {:<8} {:<6} {:<6} {:<25}",
        "Public ID", "Conversation", "Sender", "Recipient", "Type", "Read", "Edited", "Created At"
    );
    println!("{}", "-".repeat(130));

    for message in messages {
        let public_id: String = message.get("public_id");
        let conversation_id: String = message.get("conversation_id");
        let sender: String = message.get("sender");
        let recipient: String = message.get("recipient");
        let content: String = message.get("content");
        let content_type: String = message.get("content_type");
        let is_read: bool = message.get("is_read");
        let edited: bool = message.get("edited");
        let created_at: String = message.get("created_at");

        println!(
            "{:<26} {:<24} {:<14} {:<14} {:<8} {:<6} {:<6} {:<25}",
            public_id, conversation_id, sender, recipient, content_type, is_read, edited, created_at
        );

        let content_display = if content.chars().count() > 60 {
            let truncated: String = content.chars().take(57).collect();
            format!("{truncated}...")
        } else {
            content
        };
        println!("    {content_display}");
    }

    Ok(())
}
