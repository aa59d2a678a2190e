use super::confirm;
use crate::context::Context;
use crate::google::Calendar;
use crate::google::calendar::{
    AclScope, EventDraft, EventSummary, EventTime, default_end, parse_time_arg, range_bound,
};
use crate::output::{OutputFormat, print_record, print_rows, wrap_text};
use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Duration, Utc};
use clap::{Args, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

const PRIMARY: &str = "primary";

#[derive(Debug, Args)]
pub struct CalendarCommand {
    #[command(subcommand)]
    command: CalendarCommands,
}

#[derive(Debug, Subcommand)]
enum CalendarCommands {
    /// List the calendars on the account's calendar list
    Calendars {
        #[arg(short = 'n', long, default_value_t = 100)]
        limit: usize,
    },

    /// List upcoming events
    Events {
        #[arg(short, long, default_value = PRIMARY)]
        calendar: String,

        #[command(flatten)]
        window: WindowArgs,

        /// Free-text search
        #[arg(short, long)]
        query: Option<String>,

        #[arg(short = 'n', long, default_value_t = 25)]
        limit: usize,
    },

    /// Single events
    #[command(subcommand)]
    Event(EventCommands),

    /// Sharing rules
    #[command(subcommand)]
    Acl(AclCommands),

    /// Busy times for one or more calendars
    Freebusy {
        /// Calendar id or email; repeatable, defaults to the primary calendar
        #[arg(short, long = "calendar", value_name = "CALENDAR")]
        calendars: Vec<String>,

        #[command(flatten)]
        window: WindowArgs,
    },
}

/// Time window shared by `events` and `freebusy`
#[derive(Debug, Args)]
struct WindowArgs {
    /// Start of the window (RFC 3339 or YYYY-MM-DD); defaults to now
    #[arg(long)]
    from: Option<String>,

    /// End of the window (RFC 3339 or YYYY-MM-DD)
    #[arg(long, conflicts_with = "within")]
    to: Option<String>,

    /// Window length instead of --to, e.g. "3d" or "12h"
    #[arg(long)]
    within: Option<String>,
}

#[derive(Debug, Args)]
struct EventFields {
    /// Title
    #[arg(long)]
    summary: Option<String>,

    /// Start (RFC 3339, or YYYY-MM-DD for an all-day event)
    #[arg(long)]
    start: Option<String>,

    /// End; defaults to one hour after a timed start or the next day
    #[arg(long, conflicts_with = "duration")]
    end: Option<String>,

    /// Length instead of --end, e.g. "30m"
    #[arg(long)]
    duration: Option<String>,

    #[arg(long)]
    description: Option<String>,

    #[arg(long)]
    location: Option<String>,

    /// Attendee email; repeatable
    #[arg(long = "attendee", value_name = "EMAIL")]
    attendees: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum EventCommands {
    /// Show one event
    Get {
        id: String,

        #[arg(short, long, default_value = PRIMARY)]
        calendar: String,
    },

    /// Create an event
    Create {
        #[arg(short, long, default_value = PRIMARY)]
        calendar: String,

        #[command(flatten)]
        fields: EventFields,
    },

    /// Change fields of an existing event
    Update {
        id: String,

        #[arg(short, long, default_value = PRIMARY)]
        calendar: String,

        #[command(flatten)]
        fields: EventFields,
    },

    /// Delete an event
    Delete {
        id: String,

        #[arg(short, long, default_value = PRIMARY)]
        calendar: String,

        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AclRole {
    FreeBusyReader,
    Reader,
    Writer,
    Owner,
}

impl AclRole {
    fn as_api(self) -> &'static str {
        match self {
            AclRole::FreeBusyReader => "freeBusyReader",
            AclRole::Reader => "reader",
            AclRole::Writer => "writer",
            AclRole::Owner => "owner",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScopeType {
    User,
    Group,
    Domain,
    /// Anyone, no value
    Default,
}

/// Combine `--scope-type` with the optional positional value
fn acl_scope(kind: ScopeType, value: Option<String>) -> Result<AclScope> {
    match (kind, value) {
        (ScopeType::Default, None) => Ok(AclScope::Default),
        (ScopeType::Default, Some(value)) => {
            bail!("--scope-type default shares with everyone; drop '{}'", value)
        }
        (ScopeType::User, Some(email)) => Ok(AclScope::User(email)),
        (ScopeType::Group, Some(email)) => Ok(AclScope::Group(email)),
        (ScopeType::Domain, Some(domain)) => Ok(AclScope::Domain(domain)),
        (_, None) => bail!("An email address or domain is required for this scope type"),
    }
}

fn describe_scope(scope: &AclScope) -> String {
    match scope {
        AclScope::User(value) | AclScope::Group(value) | AclScope::Domain(value) => value.clone(),
        AclScope::Default => "everyone".to_string(),
    }
}

#[derive(Debug, Subcommand)]
enum AclCommands {
    /// List sharing rules
    List {
        #[arg(short, long, default_value = PRIMARY)]
        calendar: String,
    },

    /// Share the calendar with a user, group, domain or everyone
    Add {
        /// Email (user, group) or domain; omitted for --scope-type default
        value: Option<String>,

        #[arg(long, value_enum, default_value = "user")]
        scope_type: ScopeType,

        #[arg(long, value_enum, default_value = "reader")]
        role: AclRole,

        #[arg(short, long, default_value = PRIMARY)]
        calendar: String,
    },

    /// Remove a sharing rule by id (see `acl list`)
    Remove {
        rule_id: String,

        #[arg(short, long, default_value = PRIMARY)]
        calendar: String,
    },
}

#[derive(Tabled, Serialize)]
struct CalendarRow {
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Access")]
    access: String,
    #[tabled(rename = "Primary")]
    primary: bool,
}

#[derive(Tabled, Serialize)]
struct EventRow {
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Start")]
    start: String,
    #[tabled(rename = "End")]
    end: String,
    #[tabled(rename = "Summary")]
    summary: String,
    #[tabled(rename = "Location")]
    location: String,
}

impl From<EventSummary> for EventRow {
    fn from(event: EventSummary) -> Self {
        let show = |t: Option<EventTime>| t.map(|t| t.display()).unwrap_or_default();
        Self {
            id: event.id,
            start: show(event.start),
            end: show(event.end),
            summary: event.summary,
            location: event.location,
        }
    }
}

#[derive(Tabled, Serialize)]
struct AclRow {
    #[tabled(rename = "Rule")]
    id: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Scope")]
    scope: String,
}

#[derive(Tabled, Serialize)]
struct BusyRow {
    #[tabled(rename = "Calendar")]
    calendar: String,
    #[tabled(rename = "Busy from")]
    start: String,
    #[tabled(rename = "Until")]
    end: String,
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_duration(input: &str) -> Result<Duration> {
    let std = humantime::parse_duration(input)
        .map_err(|e| anyhow!("Invalid duration '{}': {}", input, e))?;
    Duration::from_std(std).map_err(|_| anyhow!("Duration '{}' is too large", input))
}

/// `at` moved forward by a user-supplied duration, failing instead of overflowing
fn add_duration(at: DateTime<Utc>, input: &str) -> Result<DateTime<Utc>> {
    at.checked_add_signed(parse_duration(input)?)
        .ok_or_else(|| anyhow!("Duration '{}' is too large", input))
}

/// Resolve `--from/--to/--within` into a window starting at `now` by default
fn time_window(
    window: &WindowArgs,
    now: DateTime<Utc>,
    default_length: Option<Duration>,
) -> Result<(DateTime<Utc>, Option<DateTime<Utc>>)> {
    let from = match &window.from {
        Some(from) => range_bound(from)?,
        None => now,
    };
    let to = match (&window.to, &window.within) {
        (Some(to), _) => Some(range_bound(to)?),
        (None, Some(within)) => Some(add_duration(from, within)?),
        (None, None) => default_length.map(|length| from + length),
    };
    if let Some(to) = to {
        if to <= from {
            bail!("The end of the window must be after its start");
        }
    }
    Ok((from, to))
}

impl EventFields {
    /// Draft for `create`: summary and start are required, end is derived
    fn create_draft(&self) -> Result<EventDraft> {
        let summary = self
            .summary
            .clone()
            .ok_or_else(|| anyhow!("--summary is required"))?;
        let start = parse_time_arg(
            self.start
                .as_deref()
                .ok_or_else(|| anyhow!("--start is required"))?,
        )?;
        let end = match self.end_time(&start)? {
            Some(end) => end,
            None => default_end(&start),
        };

        Ok(EventDraft {
            summary: Some(summary),
            start: Some(start),
            end: Some(end),
            ..self.common_draft()
        })
    }

    /// Draft for `update`: only the given fields
    fn update_draft(&self) -> Result<EventDraft> {
        let start = self.start.as_deref().map(parse_time_arg).transpose()?;
        let end = match &start {
            Some(start) => self.end_time(start)?,
            None if self.duration.is_some() => bail!("--duration needs --start"),
            None => self.end.as_deref().map(parse_time_arg).transpose()?,
        };

        let draft = EventDraft {
            summary: self.summary.clone(),
            start,
            end,
            ..self.common_draft()
        };
        if draft.is_empty() {
            bail!("Nothing to change: pass at least one field to update");
        }
        Ok(draft)
    }

    fn end_time(&self, start: &EventTime) -> Result<Option<EventTime>> {
        if let Some(end) = &self.end {
            return parse_time_arg(end).map(Some);
        }
        match (&self.duration, start) {
            (Some(duration), EventTime::At(at)) => {
                Ok(Some(EventTime::At(add_duration(*at, duration)?)))
            }
            (Some(_), EventTime::AllDay(_)) => {
                bail!("--duration applies to timed events; use --end for all-day events")
            }
            (None, _) => Ok(None),
        }
    }

    fn common_draft(&self) -> EventDraft {
        EventDraft {
            description: self.description.clone(),
            location: self.location.clone(),
            attendees: self.attendees.clone(),
            ..Default::default()
        }
    }
}

fn print_event(event: &Value, format: OutputFormat) -> Result<()> {
    let summary = EventSummary::from_json(event);
    let show = |t: &Option<EventTime>| t.as_ref().map(EventTime::display).unwrap_or_default();
    let attendees: Vec<String> = event
        .get("attendees")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|a| str_field(a, "email"))
        .collect();
    let fields = [
        ("Id", summary.id.clone()),
        ("Summary", summary.summary.clone()),
        ("Start", show(&summary.start)),
        ("End", show(&summary.end)),
        ("Location", summary.location.clone()),
        ("Status", summary.status.clone()),
        ("Attendees", attendees.join(", ")),
        ("Link", str_field(event, "htmlLink")),
    ];
    print_record(&fields, event, format)?;

    let description = str_field(event, "description");
    if format == OutputFormat::Table && !description.is_empty() {
        println!("\n{}", wrap_text(&description));
    }
    Ok(())
}

impl CalendarCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        let manager = ctx.account_manager()?;
        let calendar = Calendar::new(ctx.google_client(&manager)?);

        match self.command {
            CalendarCommands::Calendars { limit } => {
                let calendars = calendar.list_calendars(limit).await?;
                let rows: Vec<CalendarRow> = calendars
                    .iter()
                    .map(|entry| CalendarRow {
                        id: str_field(entry, "id"),
                        name: str_field(entry, "summary"),
                        access: str_field(entry, "accessRole"),
                        primary: entry
                            .get("primary")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                    })
                    .collect();
                print_rows(&rows, ctx.output)?;
            }
            CalendarCommands::Events {
                calendar: calendar_id,
                window,
                query,
                limit,
            } => {
                let (from, to) = time_window(&window, Utc::now(), None)?;
                let events = calendar
                    .list_events(&calendar_id, Some(from), to, query.as_deref(), limit)
                    .await?;
                let rows: Vec<EventRow> = events
                    .iter()
                    .map(|event| EventRow::from(EventSummary::from_json(event)))
                    .collect();
                print_rows(&rows, ctx.output)?;
            }
            CalendarCommands::Event(EventCommands::Get {
                id,
                calendar: calendar_id,
            }) => {
                let event = calendar.get_event(&calendar_id, &id).await?;
                print_event(&event, ctx.output)?;
            }
            CalendarCommands::Event(EventCommands::Create {
                calendar: calendar_id,
                fields,
            }) => {
                let draft = fields.create_draft()?;
                let event = calendar.create_event(&calendar_id, &draft).await?;
                println!("Created event {}", str_field(&event, "id"));
                let link = str_field(&event, "htmlLink");
                if !link.is_empty() {
                    println!("{}", link);
                }
            }
            CalendarCommands::Event(EventCommands::Update {
                id,
                calendar: calendar_id,
                fields,
            }) => {
                let draft = fields.update_draft()?;
                let event = calendar.update_event(&calendar_id, &id, &draft).await?;
                print_event(&event, ctx.output)?;
            }
            CalendarCommands::Event(EventCommands::Delete {
                id,
                calendar: calendar_id,
                yes,
            }) => {
                if !confirm(
                    &format!("Delete event {}?", id),
                    "Attendees are not notified",
                    yes,
                ) {
                    println!("Operation cancelled. No changes made.");
                    return Ok(());
                }
                calendar.delete_event(&calendar_id, &id).await?;
                println!("Deleted event {}", id);
            }
            CalendarCommands::Acl(AclCommands::List {
                calendar: calendar_id,
            }) => {
                let rules = calendar.list_acl(&calendar_id).await?;
                let rows: Vec<AclRow> = rules
                    .iter()
                    .map(|rule| {
                        let scope = rule.get("scope").cloned().unwrap_or_default();
                        AclRow {
                            id: str_field(rule, "id"),
                            role: str_field(rule, "role"),
                            scope: match str_field(&scope, "value") {
                                value if value.is_empty() => str_field(&scope, "type"),
                                value => format!("{}:{}", str_field(&scope, "type"), value),
                            },
                        }
                    })
                    .collect();
                print_rows(&rows, ctx.output)?;
            }
            CalendarCommands::Acl(AclCommands::Add {
                value,
                scope_type,
                role,
                calendar: calendar_id,
            }) => {
                let scope = acl_scope(scope_type, value)?;
                let rule = calendar
                    .insert_acl(&calendar_id, &scope, role.as_api())
                    .await?;
                println!(
                    "Shared {} with {} as {} (rule {})",
                    calendar_id,
                    describe_scope(&scope),
                    role.as_api(),
                    str_field(&rule, "id")
                );
            }
            CalendarCommands::Acl(AclCommands::Remove {
                rule_id,
                calendar: calendar_id,
            }) => {
                calendar.delete_acl(&calendar_id, &rule_id).await?;
                println!("Removed rule {} from {}", rule_id, calendar_id);
            }
            CalendarCommands::Freebusy { calendars, window } => {
                let calendars = if calendars.is_empty() {
                    vec![PRIMARY.to_string()]
                } else {
                    calendars
                };
                let (from, to) = time_window(&window, Utc::now(), Some(Duration::days(7)))?;
                let to = to.unwrap_or(from + Duration::days(7));
                let slots = calendar.free_busy(&calendars, from, to).await?;
                let rows: Vec<BusyRow> = slots
                    .into_iter()
                    .map(|slot| BusyRow {
                        calendar: slot.calendar,
                        start: EventTime::At(slot.start).display(),
                        end: EventTime::At(slot.end).display(),
                    })
                    .collect();
                print_rows(&rows, ctx.output)?;
            }
        }

        Ok(())
    }
}
