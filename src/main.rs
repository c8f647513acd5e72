use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use ticket_messaging::{AppError, ClientConfig, TicketSession, TicketState};

const USAGE: &str = "usage: ticket-chat <ticket_id>";
const HELP: &str = "commands: <text> | /edit <id> <text> | /delete <id> | /unsend <id> [all] | \
                    /react <id> <emoji> | /unreact <id> <emoji> | /typing | /reconnect | /quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ticket_messaging=debug,ticket_chat=debug".into()),
        )
        .init();

    let ticket_id = std::env::args().nth(1).context(USAGE)?;
    let config = ClientConfig::from_env()
        .context("Failed to load configuration (copy .env.example to .env)")?;

    // ── Session ───────────────────────────────────────────────────────────────
    let session = TicketSession::new(&config, ticket_id)?;
    let history = session.load_messages().await?;
    info!("Loaded {} messages for ticket {}", history.len(), session.ticket_id());
    for message in &history {
        print_message(message);
    }
    session.connect()?;

    // Print every state change as it lands.
    let mut updates = session.subscribe();
    let mut printed = history.len();
    let watcher = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            printed = report(&state, printed);
        }
    });

    // ── Input loop ────────────────────────────────────────────────────────────
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        match run_command(&session, line).await {
            Ok(()) => {}
            Err(e) if e.is_transport() => error!("{e} (the service may be unreachable)"),
            Err(e) if e.is_validation() => println!("  ! {e}"),
            Err(e) => error!("{e}"),
        }
    }

    watcher.abort();
    session.shutdown().await;
    Ok(())
}

async fn run_command(session: &TicketSession, line: &str) -> Result<(), AppError> {
    let mut parts = line.splitn(3, ' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("/edit"), Some(id), Some(text)) => session.edit_message(id, text).await.map(drop),
        (Some("/delete"), Some(id), None) => session.delete_message(id).await,
        (Some("/unsend"), Some(id), scope) => {
            session.unsend_message(id, scope == Some("all")).await.map(drop)
        }
        (Some("/react"), Some(id), Some(emoji)) => session.add_reaction(id, emoji).await.map(drop),
        (Some("/unreact"), Some(id), Some(emoji)) => {
            session.remove_reaction(id, emoji).await.map(drop)
        }
        (Some("/typing"), None, None) => session.start_typing(),
        (Some("/reconnect"), None, None) => session.reconnect(),
        (Some(cmd), _, _) if cmd.starts_with('/') => {
            println!("{HELP}");
            Ok(())
        }
        _ => session.send_message(Some(line), Vec::new()).await.map(drop),
    }
}

fn report(state: &TicketState, printed: usize) -> usize {
    for message in state.messages.iter().skip(printed) {
        print_message(message);
    }
    let typing: Vec<&str> = state.typing_users.iter().map(String::as_str).collect();
    if !typing.is_empty() {
        println!("  … {} typing", typing.join(", "));
    }
    println!(
        "  [{}] online: {}{}",
        state.connection,
        state.online_users.len(),
        state.error.as_deref().map(|e| format!(" | error: {e}")).unwrap_or_default()
    );
    state.messages.len()
}

fn print_message(message: &ticket_messaging::Message) {
    let body = if message.is_unsent {
        "(unsent)".to_string()
    } else {
        let attachments = message.attachments.len();
        message.body.clone().unwrap_or_else(|| format!("({attachments} attachment(s))"))
    };
    let edited = if message.is_edited { " (edited)" } else { "" };
    println!("#{} {}: {}{}", message.id, message.sender, body, edited);
}
