//! `webpush` - operator CLI for the web push delivery engine.
//!
//! Generates VAPID keys, registers browser subscriptions in the local store
//! file, and sends notifications to users.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use webpush_delivery::config::DEFAULT_CONTACT;
use webpush_delivery::notifications::{ece, vapid};
use webpush_delivery::{
    MemorySubscriptionStore, NotificationPayload, PushConfig, PushDispatcher, SigningIdentity,
    Subscription, SubscriptionStore,
};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "webpush")]
#[command(about = "Send VAPID-signed, end-to-end encrypted web push notifications", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a VAPID key pair and print it as a config fragment
    Keygen {
        /// Contact URI for the token `sub` claim
        #[arg(long, default_value = DEFAULT_CONTACT)]
        contact: String,
    },
    /// Print the published VAPID public key (the browser's applicationServerKey)
    PublicKey,
    /// Register a browser PushSubscription JSON document for a user
    Subscribe {
        /// Owning user id
        #[arg(long)]
        user: String,
        /// File containing the browser's `PushSubscription.toJSON()` output
        #[arg(long)]
        file: PathBuf,
    },
    /// Send a notification to one or more users
    Send {
        /// Recipient user id (repeatable)
        #[arg(long = "user", required = true)]
        users: Vec<String>,
        /// Notification title
        #[arg(long)]
        title: String,
        /// Notification body
        #[arg(long)]
        body: String,
        /// Page to open on click
        #[arg(long)]
        url: Option<String>,
        /// Collapse tag
        #[arg(long)]
        tag: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen { contact } => keygen(&contact)?,
        Commands::PublicKey => {
            let config = PushConfig::load()?;
            let identity =
                SigningIdentity::from_config(&config).context("Push is not configured")?;
            println!("{}", identity.public_key_base64url());
        }
        Commands::Subscribe { user, file } => subscribe(&user, &file).await?,
        Commands::Send {
            users,
            title,
            body,
            url,
            tag,
        } => {
            let mut payload = NotificationPayload::new(title, body);
            if let Some(url) = url {
                payload = payload.with_url(url);
            }
            if let Some(tag) = tag {
                payload = payload.with_tag(tag);
            }
            send(&users, &payload).await?;
        }
    }

    Ok(())
}

fn keygen(contact: &str) -> Result<()> {
    let identity = SigningIdentity::generate(contact)?;
    let fragment = PushConfig::key_fragment(
        &identity.private_key_pkcs8_base64url()?,
        identity.public_key_base64url(),
        identity.contact_uri(),
    );
    println!("{}", serde_json::to_string_pretty(&fragment)?);
    Ok(())
}

async fn subscribe(user: &str, file: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let mut subscription: Subscription =
        serde_json::from_str(&content).context("Not a PushSubscription JSON document")?;

    let p256dh = subscription.keys.p256dh_bytes()?;
    let auth = subscription.keys.auth_bytes()?;
    anyhow::ensure!(
        p256dh.len() == vapid::PUBLIC_KEY_LEN && p256dh[0] == 0x04,
        "p256dh must be a 65-byte uncompressed P-256 point, got {} bytes",
        p256dh.len()
    );
    anyhow::ensure!(
        auth.len() == ece::AUTH_SECRET_LEN,
        "auth secret must be {} bytes, got {}",
        ece::AUTH_SECRET_LEN,
        auth.len()
    );
    vapid::audience(&subscription.endpoint)?;

    subscription.user_id = user.to_string();

    let config = PushConfig::load()?;
    let path = config.subscriptions_path()?;
    let store = MemorySubscriptionStore::load(&path).await?;
    store.upsert(subscription).await;
    store.save(&path).await?;

    println!("Registered subscription for {user} ({} total)", store.len().await);
    Ok(())
}

async fn send(users: &[String], payload: &NotificationPayload) -> Result<()> {
    let config = PushConfig::load()?;
    let path = config.subscriptions_path()?;
    let store = Arc::new(MemorySubscriptionStore::load(&path).await?);

    let shared = Arc::clone(&store) as Arc<dyn SubscriptionStore>;
    let dispatcher = PushDispatcher::from_config(&config, shared)?;
    let report = dispatcher
        .send_to_users(users, payload)
        .await
        .context("Push is disabled")?;

    // Persist health counters and deletions of gone endpoints
    store.save(&path).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
