use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use bazaar_db::Database;
use bazaar_db::models::NewProfile;
use bazaar_messaging::{
    ConversationView, LocalBackend, MessagingConfig, MessagingContext, Outcome, Session, SessionStore,
};
use bazaar_types::api::SendMessageRequest;
use bazaar_types::models::{Conversation, Message, Role};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "bazaar")]
#[command(about = "Buyer/seller messaging against a local database")]
struct Cli {
    /// SQLite database file
    #[arg(long, env = "BAZAAR_DB_PATH", default_value = "bazaar.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Identity {
    /// Account to act as
    #[arg(long = "as", env = "BAZAAR_USER")]
    user: Uuid,

    /// Side of the conversation: customer or business
    #[arg(long, default_value = "customer")]
    role: Role,
}

#[derive(Subcommand)]
enum Commands {
    /// Create demo accounts with a couple of conversations
    Seed,

    /// List conversations, most recent first
    Inbox {
        #[command(flatten)]
        who: Identity,
    },

    /// Show a thread and mark it read
    Thread {
        #[command(flatten)]
        who: Identity,
        conversation: Uuid,
        /// Also load this many older pages
        #[arg(long, default_value_t = 0)]
        older: u32,
    },

    /// Send a message in a thread
    Send {
        #[command(flatten)]
        who: Identity,
        conversation: Uuid,
        body: String,
    },

    /// Mark a thread read
    Read {
        #[command(flatten)]
        who: Identity,
        conversation: Uuid,
    },

    /// Total unread across all conversations
    Unread {
        #[command(flatten)]
        who: Identity,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bazaar=debug,bazaar_messaging=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db = Database::open(&cli.db).with_context(|| format!("opening {}", cli.db.display()))?;
    let backend = Arc::new(LocalBackend::new(db));
    let config = MessagingConfig::from_env();

    match cli.command {
        Commands::Seed => seed(&backend, &config).await,
        Commands::Inbox { who } => inbox(&client(&backend, &config, who.user), &who).await,
        Commands::Thread {
            who,
            conversation,
            older,
        } => thread(&client(&backend, &config, who.user), &who, conversation, older).await,
        Commands::Send {
            who,
            conversation,
            body,
        } => send(&client(&backend, &config, who.user), &who, conversation, body).await,
        Commands::Read { who, conversation } => {
            let report = client(&backend, &config, who.user)
                .receipts(who.role)
                .mark_read(conversation)
                .await?;
            println!("marked read ({:?}), {} still unread", report.path, report.unread);
            Ok(())
        }
        Commands::Unread { who } => {
            let total = client(&backend, &config, who.user)
                .directory()
                .unread_total(who.user, who.role)
                .await?;
            println!("{}", total);
            Ok(())
        }
    }
}

fn client(backend: &Arc<LocalBackend>, config: &MessagingConfig, user: Uuid) -> MessagingContext {
    let session = SessionStore::signed_in(Session {
        user_id: user,
        access_token: "local".into(),
    });
    MessagingContext::new(backend.clone(), session, config.clone())
}

fn settle<T>(outcome: Outcome<T>) -> anyhow::Result<T> {
    match outcome {
        Outcome::Ok(value) => Ok(value),
        Outcome::Failed(e) => Err(e.into()),
        Outcome::Aborted => bail!("request was superseded"),
    }
}

async fn find(ctx: &MessagingContext, conversation_id: Uuid) -> anyhow::Result<Conversation> {
    ctx.directory()
        .get(conversation_id)
        .await?
        .with_context(|| format!("conversation {} not found", conversation_id))
}

async fn seed(backend: &Arc<LocalBackend>, config: &MessagingConfig) -> anyhow::Result<()> {
    let customer = Uuid::new_v4();
    let businesses = [
        (Uuid::new_v4(), "Sam Ortiz", "Corner Bakery"),
        (Uuid::new_v4(), "Ana Lima", "Petal & Stem"),
    ];

    let db = backend.database();
    let customer_key = customer.to_string();
    db.upsert_profile(&NewProfile {
        id: &customer_key,
        full_name: Some("Dana Reyes"),
        business_name: None,
        avatar_url: None,
    })?;
    println!("customer      {}  Dana Reyes", customer);

    let shopper = client(backend, config, customer);
    for (business, owner, shop) in businesses {
        let key = business.to_string();
        db.upsert_profile(&NewProfile {
            id: &key,
            full_name: Some(owner),
            business_name: Some(shop),
            avatar_url: None,
        })?;

        let conversation_id = shopper.directory().open_conversation(customer, business).await?;
        shopper
            .outbox()
            .send(SendMessageRequest {
                conversation_id,
                recipient_id: business,
                body: format!("Hi {}, are you open this weekend?", shop),
            })
            .await?;
        client(backend, config, business)
            .outbox()
            .send(SendMessageRequest {
                conversation_id,
                recipient_id: customer,
                body: "Yes, 9 to 5 both days.".into(),
            })
            .await?;

        println!("business      {}  {}", business, shop);
        println!("conversation  {}", conversation_id);
    }

    info!("Seeded demo data into the local database");
    Ok(())
}

async fn inbox(ctx: &MessagingContext, who: &Identity) -> anyhow::Result<()> {
    let summaries = ctx.directory().list(who.user, who.role).await?;
    if summaries.is_empty() {
        println!("no conversations");
    }
    for summary in summaries {
        println!(
            "{}  {:<24} {:>3}  {}",
            summary.conversation.id,
            summary.counterpart.display_name,
            summary.unread_count,
            summary.conversation.last_message_preview.unwrap_or_default()
        );
    }
    Ok(())
}

async fn thread(ctx: &MessagingContext, who: &Identity, conversation_id: Uuid, older: u32) -> anyhow::Result<()> {
    let conversation = find(ctx, conversation_id).await?;
    let view = ConversationView::new(ctx.clone(), who.role);
    settle(view.open(&conversation).await)?;
    for _ in 0..older {
        if settle(view.load_older().await)? == 0 {
            break;
        }
    }
    // Mark read explicitly: the view's own receipt is best effort
    ctx.receipts(who.role).mark_read(conversation_id).await?;

    let snapshot = view.snapshot();
    if snapshot.has_more {
        println!("(older messages available, use --older)");
    }
    for message in &snapshot.messages {
        print_message(message, who.user);
    }
    Ok(())
}

async fn send(ctx: &MessagingContext, who: &Identity, conversation_id: Uuid, body: String) -> anyhow::Result<()> {
    let conversation = find(ctx, conversation_id).await?;
    let view = ConversationView::new(ctx.clone(), who.role);
    settle(view.open(&conversation).await)?;
    let message = settle(view.send(&body).await)?;
    print_message(&message, who.user);
    Ok(())
}

fn print_message(message: &Message, viewer: Uuid) {
    let who = if message.sender_id == viewer { "you" } else { "them" };
    let seen = if message.read_at.is_some() { "" } else { " *" };
    println!(
        "[{}] {:>4}: {}{}",
        message.created_at.format("%Y-%m-%d %H:%M"),
        who,
        message.body,
        seen
    );
}
