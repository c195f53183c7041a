//! Welcome seeder: greets a list of contacts once at startup.
//!
//! A contact is addressed by username. Chat networks that need a numeric chat
//! id resolve it from the optional `chat_id` column, or from a chat the user
//! has already had with the bot.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info};

use crate::channels::ChatClient;
use crate::store::DeliveryStatusStore;

/// A row of the contacts file.
#[derive(Debug, Clone, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub chat_id: Option<i64>,
}

/// Counts from one seeding run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Read contacts from a JSON array file.
pub async fn load_contacts(path: &Path) -> anyhow::Result<Vec<Contact>> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

/// Substitute the contact name into the welcome template.
pub fn render_welcome(template: &str, name: &str) -> String {
    template.replace("{name}", name)
}

/// Send the welcome message to every contact and register the successful
/// ones in the status store. Per-contact failures are logged and skipped.
pub async fn seed_contacts(
    contacts: &[Contact],
    template: &str,
    chat: &dyn ChatClient,
    status: &dyn DeliveryStatusStore,
) -> SeedReport {
    let mut report = SeedReport::default();

    for contact in contacts {
        let username = contact.username.trim();
        let name = contact.name.trim();
        if username.is_empty() || name.is_empty() {
            report.skipped += 1;
            continue;
        }

        if let Some(chat_id) = contact.chat_id {
            chat.register_recipient(username, chat_id).await;
        }

        let message = render_welcome(template, name);
        if let Err(e) = chat.send_message(username, &message).await {
            error!(username, error = %e, "Failed to send welcome message");
            report.failed += 1;
            continue;
        }
        info!(username, "Welcome message sent");

        if let Err(e) = status.register_sent(username).await {
            error!(username, error = %e, "Failed to register contact");
        }
        report.sent += 1;
    }

    report
}

/// Spawn the one-shot seeding task for a contacts file.
pub fn spawn_welcome(
    path: impl AsRef<Path> + Send + 'static,
    template: String,
    chat: Arc<dyn ChatClient>,
    status: Arc<dyn DeliveryStatusStore>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let path = path.as_ref();
        let contacts = match load_contacts(path).await {
            Ok(c) => c,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to load contacts");
                return;
            }
        };

        let report = seed_contacts(&contacts, &template, chat.as_ref(), status.as_ref()).await;
        info!(
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            "Welcome seeding finished"
        );
    })
}
