use super::confirm;
use crate::context::Context;
use crate::google::gmail::{
    MessageFormat, MessageSummary, OutgoingMessage, decode_base64url, header, plain_text_body,
};
use crate::google::Gmail;
use crate::output::{OutputFormat, print_record, print_rows, relative_time, wrap_text};
use anyhow::{Context as _, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use tabled::Tabled;

#[derive(Debug, Args)]
pub struct MailCommand {
    #[command(subcommand)]
    command: MailCommands,
}

#[derive(Debug, Subcommand)]
enum MailCommands {
    /// List recent messages (INBOX unless labels are given)
    List {
        /// Label name or id to filter by; repeatable
        #[arg(short, long = "label", value_name = "LABEL")]
        labels: Vec<String>,

        /// Only unread messages
        #[arg(long)]
        unread: bool,

        /// Maximum number of messages
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Search messages with Gmail query syntax (e.g. "from:ana is:unread")
    Search {
        query: String,

        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Show one message
    Get {
        id: String,

        /// Print the original RFC 2822 source
        #[arg(long)]
        raw: bool,
    },

    /// Send a plain-text message
    Send {
        /// Recipient; repeatable
        #[arg(long, required = true)]
        to: Vec<String>,

        #[arg(long)]
        cc: Vec<String>,

        #[arg(long)]
        bcc: Vec<String>,

        #[arg(short, long)]
        subject: String,

        /// Message body
        #[arg(short, long, conflicts_with = "body_file")]
        body: Option<String>,

        /// Read the message body from a file
        #[arg(long)]
        body_file: Option<PathBuf>,
    },

    /// Add or remove labels on a message
    Modify {
        id: String,

        /// Label to add; repeatable
        #[arg(long = "add", value_name = "LABEL")]
        add: Vec<String>,

        /// Label to remove; repeatable
        #[arg(long = "remove", value_name = "LABEL")]
        remove: Vec<String>,
    },

    /// Move a message to the trash
    Trash { id: String },

    /// Restore a message from the trash
    Untrash { id: String },

    /// Permanently delete a message, bypassing the trash
    Delete {
        id: String,

        #[arg(short, long)]
        yes: bool,
    },

    /// Conversation threads
    #[command(subcommand)]
    Thread(ThreadCommands),

    /// Labels
    #[command(subcommand)]
    Label(LabelCommands),
}

#[derive(Debug, Subcommand)]
enum ThreadCommands {
    /// List threads, optionally matching a query
    List {
        query: Option<String>,

        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Show the messages of a thread
    Get { id: String },

    /// Move a whole thread to the trash
    Trash { id: String },
}

#[derive(Debug, Subcommand)]
enum LabelCommands {
    /// List labels
    List,

    /// Create a user label
    Create { name: String },

    /// Delete a user label
    Delete {
        /// Label name or id
        label: String,

        #[arg(short, long)]
        yes: bool,
    },
}

/// Table row for message lists
#[derive(Tabled, Serialize)]
struct MessageRow {
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(skip)]
    thread_id: String,
    #[tabled(rename = "From")]
    from: String,
    #[tabled(rename = "Subject")]
    subject: String,
    #[tabled(rename = "Received")]
    received: String,
    #[tabled(skip)]
    snippet: String,
    #[tabled(skip)]
    unread: bool,
    #[tabled(skip)]
    labels: Vec<String>,
}

impl MessageRow {
    fn new(summary: MessageSummary, now: DateTime<Utc>) -> Self {
        let mut subject = summary.subject.clone();
        if summary.is_unread() {
            subject.insert_str(0, "* ");
        }
        Self {
            received: summary
                .received
                .map(|at| relative_time(at, now))
                .unwrap_or_default(),
            unread: summary.is_unread(),
            id: summary.id,
            thread_id: summary.thread_id,
            from: summary.from,
            subject,
            snippet: summary.snippet,
            labels: summary.labels,
        }
    }
}

#[derive(Tabled, Serialize)]
struct ThreadRow {
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Snippet")]
    snippet: String,
}

#[derive(Tabled, Serialize)]
struct LabelRow {
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Map label names to ids; system labels and raw ids match as given
fn match_label_ids(labels: &[Value], wanted: &[String]) -> Result<Vec<String>> {
    wanted
        .iter()
        .map(|want| {
            labels
                .iter()
                .find(|label| {
                    str_field(label, "id") == *want
                        || str_field(label, "name").eq_ignore_ascii_case(want)
                })
                .map(|label| str_field(label, "id"))
                .ok_or_else(|| anyhow!("Unknown label '{}'. Run 'gwcli mail label list'.", want))
        })
        .collect()
}

async fn label_ids(gmail: &Gmail<'_>, wanted: &[String]) -> Result<Vec<String>> {
    if wanted.is_empty() {
        return Ok(Vec::new());
    }
    let labels = gmail.list_labels().await?;
    match_label_ids(&labels, wanted)
}

fn print_messages(summaries: Vec<MessageSummary>, format: OutputFormat) -> Result<()> {
    let now = Utc::now();
    let rows: Vec<MessageRow> = summaries
        .into_iter()
        .map(|summary| MessageRow::new(summary, now))
        .collect();
    print_rows(&rows, format)
}

impl MailCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        let manager = ctx.account_manager()?;
        let gmail = Gmail::new(ctx.google_client(&manager)?);

        match self.command {
            MailCommands::List {
                labels,
                unread,
                limit,
            } => {
                let mut wanted = if labels.is_empty() {
                    vec!["INBOX".to_string()]
                } else {
                    labels
                };
                if unread {
                    wanted.push("UNREAD".to_string());
                }
                let ids = label_ids(&gmail, &wanted).await?;
                let summaries = gmail.message_summaries(&ids, None, limit).await?;
                print_messages(summaries, ctx.output)?;
            }
            MailCommands::Search { query, limit } => {
                let summaries = gmail.message_summaries(&[], Some(&query), limit).await?;
                print_messages(summaries, ctx.output)?;
            }
            MailCommands::Get { id, raw: true } => {
                let message = gmail.get_message(&id, MessageFormat::Raw).await?;
                let data = message
                    .get("raw")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow!("Message {} has no raw content", id))?;
                let source = decode_base64url(data)?;
                println!("{}", String::from_utf8_lossy(&source));
            }
            MailCommands::Get { id, raw: false } => {
                let message = gmail.get_message(&id, MessageFormat::Full).await?;
                let header_or_empty = |name: &str| header(&message, name).unwrap_or_default().to_string();
                let fields = [
                    ("From", header_or_empty("From")),
                    ("To", header_or_empty("To")),
                    ("Subject", header_or_empty("Subject")),
                    ("Date", header_or_empty("Date")),
                    ("Labels", MessageSummary::from_json(&message).labels.join(", ")),
                ];
                print_record(&fields, &message, ctx.output)?;

                if ctx.output != OutputFormat::Json {
                    let body = plain_text_body(&message)
                        .unwrap_or_else(|| "(no plain-text body)".to_string());
                    println!("\n{}", wrap_text(&body));
                }
            }
            MailCommands::Send {
                to,
                cc,
                bcc,
                subject,
                body,
                body_file,
            } => {
                let body = match (body, body_file) {
                    (Some(body), _) => body,
                    (None, Some(path)) => std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?,
                    (None, None) => bail!("Provide the message with --body or --body-file"),
                };
                let message = OutgoingMessage {
                    to,
                    cc,
                    bcc,
                    subject,
                    body,
                };
                let sent = gmail.send_message(&message).await?;
                println!("Message sent (id: {})", str_field(&sent, "id"));
            }
            MailCommands::Modify { id, add, remove } => {
                if add.is_empty() && remove.is_empty() {
                    bail!("Nothing to change: pass --add and/or --remove");
                }
                let add_ids = label_ids(&gmail, &add).await?;
                let remove_ids = label_ids(&gmail, &remove).await?;
                let updated = gmail.modify_message(&id, &add_ids, &remove_ids).await?;
                let labels = MessageSummary::from_json(&updated).labels;
                println!("Labels on {}: {}", id, labels.join(", "));
            }
            MailCommands::Trash { id } => {
                gmail.trash_message(&id).await?;
                println!("Moved {} to trash", id);
            }
            MailCommands::Untrash { id } => {
                gmail.untrash_message(&id).await?;
                println!("Restored {} from trash", id);
            }
            MailCommands::Delete { id, yes } => {
                if !confirm(
                    &format!("Permanently delete message {}?", id),
                    "This bypasses the trash and cannot be undone",
                    yes,
                ) {
                    println!("Operation cancelled. No changes made.");
                    return Ok(());
                }
                gmail.delete_message(&id).await?;
                println!("Deleted {}", id);
            }
            MailCommands::Thread(ThreadCommands::List { query, limit }) => {
                let threads = gmail.list_threads(&[], query.as_deref(), limit).await?;
                let rows: Vec<ThreadRow> = threads
                    .iter()
                    .map(|thread| ThreadRow {
                        id: str_field(thread, "id"),
                        snippet: str_field(thread, "snippet"),
                    })
                    .collect();
                print_rows(&rows, ctx.output)?;
            }
            MailCommands::Thread(ThreadCommands::Get { id }) => {
                let thread = gmail.get_thread(&id).await?;
                if ctx.output == OutputFormat::Json {
                    println!("{}", serde_json::to_string_pretty(&thread)?);
                } else {
                    let summaries: Vec<MessageSummary> = thread
                        .get("messages")
                        .and_then(Value::as_array)
                        .map(|messages| messages.iter().map(MessageSummary::from_json).collect())
                        .unwrap_or_default();
                    print_messages(summaries, ctx.output)?;
                }
            }
            MailCommands::Thread(ThreadCommands::Trash { id }) => {
                gmail.trash_thread(&id).await?;
                println!("Moved thread {} to trash", id);
            }
            MailCommands::Label(LabelCommands::List) => {
                let labels = gmail.list_labels().await?;
                let mut rows: Vec<LabelRow> = labels
                    .iter()
                    .map(|label| LabelRow {
                        id: str_field(label, "id"),
                        name: str_field(label, "name"),
                        kind: str_field(label, "type"),
                    })
                    .collect();
                rows.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
                print_rows(&rows, ctx.output)?;
            }
            MailCommands::Label(LabelCommands::Create { name }) => {
                let label = gmail.create_label(&name).await?;
                println!("Created label '{}' (id: {})", name, str_field(&label, "id"));
            }
            MailCommands::Label(LabelCommands::Delete { label, yes }) => {
                let labels = gmail.list_labels().await?;
                let ids = match_label_ids(&labels, std::slice::from_ref(&label))?;
                if !confirm(
                    &format!("Delete label '{}'?", label),
                    "Messages keep existing; only the label is removed",
                    yes,
                ) {
                    println!("Operation cancelled. No changes made.");
                    return Ok(());
                }
                for id in ids {
                    gmail.delete_label(&id).await?;
                }
                println!("Deleted label '{}'", label);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_match_label_ids_by_name_or_id() {
        let labels = vec![
            json!({"id": "INBOX", "name": "INBOX", "type": "system"}),
            json!({"id": "Label_7", "name": "Receipts", "type": "user"}),
        ];
        let ids = match_label_ids(
            &labels,
            &["inbox".to_string(), "receipts".to_string(), "Label_7".to_string()],
        )
        .unwrap();
        assert_eq!(ids, vec!["INBOX", "Label_7", "Label_7"]);

        let err = match_label_ids(&labels, &["Travel".to_string()]).unwrap_err();
        assert!(err.to_string().contains("Unknown label 'Travel'"));
    }

    #[test]
    fn test_message_row_marks_unread() {
        let now = Utc::now();
        let summary = MessageSummary {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            from: "ana@example.com".to_string(),
            subject: "Lunch?".to_string(),
            received: Some(now - Duration::hours(2)),
            snippet: String::new(),
            labels: vec!["INBOX".to_string(), "UNREAD".to_string()],
        };
        let row = MessageRow::new(summary, now);
        assert_eq!(row.subject, "* Lunch?");
        assert_eq!(row.received, "2 hours ago");
        assert!(row.unread);
    }
}
