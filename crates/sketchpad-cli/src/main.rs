mod render;
mod session_file;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sketchpad_core::ChatError;
use sketchpad_core::controllers::{
    ChatController, ComposerController, ExchangeOutcome, NavigationMode, event_channel,
};
use sketchpad_core::models::{Attachment, ChatDetail, Role, Visibility};
use sketchpad_core::services::{ChatApi, HandoffRelay, HttpChatApi};
use tracing::debug;

use render::{TerminalNavigator, print_events};
use session_file::{SavedSession, SessionFile};

#[derive(Parser)]
#[command(name = "sketchpad")]
#[command(about = "Generate and iterate on UI code from the terminal")]
struct Cli {
    /// Base URL of the sketchpad server
    #[arg(long, env = "SKETCHPAD_SERVER", default_value = "http://127.0.0.1:3000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and remember the session
    Signin {
        #[arg(long)]
        email: String,
        #[arg(long, env = "SKETCHPAD_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and remember the session
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long, env = "SKETCHPAD_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the session
    Signout,
    /// Start a new chat from a prompt
    Prompt {
        text: String,
        /// Image URL or data URL to attach (repeatable)
        #[arg(long = "attach")]
        attachments: Vec<String>,
        /// Keep streaming in the composer instead of handing off to the chat view
        #[arg(long)]
        in_place: bool,
    },
    /// Continue an existing chat
    Send {
        chat_id: String,
        text: String,
        #[arg(long = "attach")]
        attachments: Vec<String>,
    },
    /// Print a chat's transcript
    Show { chat_id: String },
    /// List your chats
    List,
    /// Delete a chat
    Delete { chat_id: String },
    /// Copy a chat into a new private one
    Fork { chat_id: String },
    /// Change who can see a chat
    Visibility {
        chat_id: String,
        /// public, private, team, team-edit or unlisted
        visibility: Visibility,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so they never mix with reply text.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let sessions = SessionFile::new()?;
    let server = cli.server.trim_end_matches('/').to_string();
    let token = sessions.load(&server).await?;
    let api = HttpChatApi::new(server)
        .map_err(user_facing)?
        .with_session(token);

    match cli.command {
        Commands::Signin { email, password } => {
            api.sign_in(&email, &password).await.map_err(user_facing)?;
            remember(&sessions, &api).await?;
            println!("Signed in as {email}");
        }
        Commands::Signup { email, password } => {
            api.sign_up(&email, &password).await.map_err(user_facing)?;
            remember(&sessions, &api).await?;
            println!("Signed up as {email}");
        }
        Commands::Signout => {
            if let Err(e) = api.sign_out().await {
                debug!(error = %e, "Server sign-out failed, clearing local session anyway");
            }
            sessions.clear().await?;
            println!("Signed out");
        }
        Commands::Prompt {
            text,
            attachments,
            in_place,
        } => {
            let mode = if in_place {
                NavigationMode::InPlace
            } else {
                NavigationMode::Handoff
            };
            prompt(Arc::new(api), &text, &to_attachments(attachments), mode).await?;
        }
        Commands::Send {
            chat_id,
            text,
            attachments,
        } => {
            send(Arc::new(api), &chat_id, &text, &to_attachments(attachments)).await?;
        }
        Commands::Show { chat_id } => {
            let detail = api.get_chat(&chat_id).await.map_err(user_facing)?;
            show(&detail);
        }
        Commands::List => {
            let chats = api.list_chats().await.map_err(user_facing)?;
            if chats.is_empty() {
                println!("No chats yet");
            }
            for chat in &chats {
                println!("{}", summary_line(chat));
            }
        }
        Commands::Delete { chat_id } => {
            api.delete_chat(&chat_id).await.map_err(user_facing)?;
            println!("Deleted {chat_id}");
        }
        Commands::Fork { chat_id } => {
            let fork = api.fork_chat(&chat_id).await.map_err(user_facing)?;
            println!("Forked {chat_id} into {}", fork.id);
        }
        Commands::Visibility {
            chat_id,
            visibility,
        } => {
            api.set_visibility(&chat_id, visibility)
                .await
                .map_err(user_facing)?;
            println!("{chat_id} is now {}", visibility.as_str());
        }
    }

    Ok(())
}

/// Run the composer, then follow it into the chat view when it hands off.
async fn prompt(
    api: Arc<dyn ChatApi>,
    text: &str,
    attachments: &[Attachment],
    mode: NavigationMode,
) -> Result<()> {
    let relay = HandoffRelay::new();
    let navigator = Arc::new(TerminalNavigator::new());
    let (events, receiver) = event_channel();
    let printer = tokio::spawn(print_events(receiver));

    let mut composer = ComposerController::new(api.clone(), navigator.clone(), relay.clone(), mode)
        .with_events(events.clone());
    let outcome = composer.submit(text, attachments).await?;
    composer.wait_for_background().await;
    drop(composer);

    let result = match outcome {
        ExchangeOutcome::HandedOff { .. } => {
            let Some(path) = navigator.destination() else {
                bail!("The chat view was never opened");
            };
            let chat_id = path.rsplit('/').next().unwrap_or_default().to_string();
            let mut view = ChatController::new(api, relay).with_events(events);
            view.mount(&chat_id).await.map_err(user_facing)?;
            let resumed = view.resume().await;
            view.wait_for_background().await;
            drop(view);
            match resumed {
                Some(outcome) => finish(outcome),
                None => Ok(()),
            }
        }
        other => {
            drop(events);
            finish(other)
        }
    };

    let _ = printer.await;
    result
}

async fn send(
    api: Arc<dyn ChatApi>,
    chat_id: &str,
    text: &str,
    attachments: &[Attachment],
) -> Result<()> {
    let (events, receiver) = event_channel();
    let printer = tokio::spawn(print_events(receiver));

    let mut view = ChatController::new(api, HandoffRelay::new()).with_events(events);
    view.mount(chat_id).await.map_err(user_facing)?;
    let outcome = view.send_message(text, attachments).await?;
    view.wait_for_background().await;
    drop(view);

    let _ = printer.await;
    finish(outcome)
}

fn finish(outcome: ExchangeOutcome) -> Result<()> {
    match outcome {
        // Already shown by the event printer.
        ExchangeOutcome::Failed(_) => bail!("The reply did not complete"),
        ExchangeOutcome::Settled { .. } | ExchangeOutcome::HandedOff { .. } => Ok(()),
    }
}

async fn remember(sessions: &SessionFile, api: &HttpChatApi) -> Result<()> {
    let token = api
        .session_token()
        .context("The server did not return a session")?;
    sessions
        .save(&SavedSession {
            server: api.base_url().to_string(),
            token,
        })
        .await
        .context("Failed to save the session")
}

fn show(detail: &ChatDetail) {
    for message in &detail.messages {
        let speaker = match message.role {
            Role::User => "you",
            Role::Assistant => "v0",
        };
        println!("{speaker}: {}\n", message.content().plain_text());
    }
    if let Some(url) = detail
        .latest_version
        .as_ref()
        .and_then(|v| v.demo_url.as_deref())
    {
        println!("Preview: {url}");
    }
}

fn summary_line(chat: &ChatDetail) -> String {
    let name = chat
        .extra
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("(untitled)");
    match chat.privacy.as_deref() {
        Some(privacy) => format!("{}  {name}  [{privacy}]", chat.id),
        None => format!("{}  {name}", chat.id),
    }
}

fn to_attachments(urls: Vec<String>) -> Vec<Attachment> {
    urls.into_iter().map(Attachment::new).collect()
}

/// Report a server error by its user-facing wording.
fn user_facing(error: ChatError) -> anyhow::Error {
    anyhow::anyhow!(error.user_message())
}
