//! Google Calendar API v3.

use super::client::{GoogleClient, endpoint};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Start or end of an event: all-day events carry `date`, timed ones `dateTime`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTime {
    AllDay(NaiveDate),
    At(DateTime<Utc>),
}

impl EventTime {
    pub fn from_json(value: &Value) -> Option<Self> {
        if let Some(dt) = value.get("dateTime").and_then(Value::as_str) {
            return DateTime::parse_from_rfc3339(dt)
                .ok()
                .map(|dt| EventTime::At(dt.with_timezone(&Utc)));
        }
        value
            .get("date")
            .and_then(Value::as_str)
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .map(EventTime::AllDay)
    }

    pub fn to_json(&self) -> Value {
        match self {
            EventTime::AllDay(date) => json!({ "date": date.format("%Y-%m-%d").to_string() }),
            EventTime::At(at) => {
                json!({ "dateTime": at.to_rfc3339_opts(SecondsFormat::Secs, true) })
            }
        }
    }

    pub fn display(&self) -> String {
        match self {
            EventTime::AllDay(date) => date.format("%Y-%m-%d").to_string(),
            EventTime::At(at) => at.format("%Y-%m-%d %H:%M UTC").to_string(),
        }
    }
}

/// Parse a command-line time: RFC 3339 or a bare `YYYY-MM-DD` date
pub fn parse_time_arg(input: &str) -> Result<EventTime> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(EventTime::At(dt.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map(EventTime::AllDay)
        .map_err(|_| {
            anyhow!(
                "Invalid time '{}': use RFC 3339 (2024-05-01T09:00:00Z) or YYYY-MM-DD",
                input
            )
        })
}

/// A point in time for range queries; bare dates mean midnight UTC
pub fn range_bound(input: &str) -> Result<DateTime<Utc>> {
    Ok(match parse_time_arg(input)? {
        EventTime::At(at) => at,
        EventTime::AllDay(date) => Utc.from_utc_datetime(&date.and_time(NaiveTime::default())),
    })
}

/// Default end for a new event: one hour after a timed start, next day for all-day
pub fn default_end(start: &EventTime) -> EventTime {
    match start {
        EventTime::At(at) => EventTime::At(*at + Duration::hours(1)),
        EventTime::AllDay(date) => EventTime::AllDay(date.succ_opt().unwrap_or(*date)),
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Fields shown when listing events
#[derive(Debug, Clone, PartialEq)]
pub struct EventSummary {
    pub id: String,
    pub summary: String,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    pub location: String,
    pub status: String,
}

impl EventSummary {
    pub fn from_json(event: &Value) -> Self {
        let text = |key: &str| {
            event
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let summary = event
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or("(No title)")
            .to_string();
        Self {
            id: text("id"),
            summary,
            start: event.get("start").and_then(EventTime::from_json),
            end: event.get("end").and_then(EventTime::from_json),
            location: text("location"),
            status: text("status"),
        }
    }
}

/// Fields for creating or patching an event; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct EventDraft {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    pub attendees: Vec<String>,
}

impl EventDraft {
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        if let Some(summary) = &self.summary {
            body.insert("summary".into(), json!(summary));
        }
        if let Some(description) = &self.description {
            body.insert("description".into(), json!(description));
        }
        if let Some(location) = &self.location {
            body.insert("location".into(), json!(location));
        }
        if let Some(start) = &self.start {
            body.insert("start".into(), start.to_json());
        }
        if let Some(end) = &self.end {
            body.insert("end".into(), end.to_json());
        }
        if !self.attendees.is_empty() {
            let attendees: Vec<Value> = self
                .attendees
                .iter()
                .map(|email| json!({ "email": email }))
                .collect();
            body.insert("attendees".into(), Value::Array(attendees));
        }
        Value::Object(body)
    }

    pub fn is_empty(&self) -> bool {
        self.to_json().as_object().is_none_or(Map::is_empty)
    }
}

/// Who an ACL rule applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclScope {
    User(String),
    Group(String),
    Domain(String),
    /// Anyone (public sharing)
    Default,
}

impl AclScope {
    pub fn to_json(&self) -> Value {
        match self {
            AclScope::User(email) => json!({ "type": "user", "value": email }),
            AclScope::Group(email) => json!({ "type": "group", "value": email }),
            AclScope::Domain(domain) => json!({ "type": "domain", "value": domain }),
            AclScope::Default => json!({ "type": "default" }),
        }
    }
}

/// Request body for `acl.insert`
pub fn acl_rule(role: &str, scope: &AclScope) -> Value {
    json!({ "role": role, "scope": scope.to_json() })
}

/// One busy interval from a free/busy query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusySlot {
    pub calendar: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Flatten a `freeBusy` response into busy slots ordered by calendar then start
pub fn busy_slots(response: &Value) -> Result<Vec<BusySlot>> {
    let mut slots = Vec::new();
    let Some(calendars) = response.get("calendars").and_then(Value::as_object) else {
        return Ok(slots);
    };

    for (calendar, entry) in calendars {
        if let Some(errors) = entry.get("errors").and_then(Value::as_array) {
            if let Some(reason) = errors
                .first()
                .and_then(|e| e.get("reason"))
                .and_then(Value::as_str)
            {
                return Err(anyhow!("Free/busy lookup failed for {}: {}", calendar, reason));
            }
        }
        for busy in entry
            .get("busy")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let bound = |key: &str| -> Result<DateTime<Utc>> {
                let raw = busy
                    .get(key)
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow!("busy slot missing {}", key))?;
                Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
            };
            slots.push(BusySlot {
                calendar: calendar.clone(),
                start: bound("start")?,
                end: bound("end")?,
            });
        }
    }

    slots.sort_by(|a, b| a.calendar.cmp(&b.calendar).then(a.start.cmp(&b.start)));
    Ok(slots)
}

/// Calendar API client bound to one account
pub struct Calendar<'a> {
    client: GoogleClient<'a>,
}

impl<'a> Calendar<'a> {
    pub fn new(client: GoogleClient<'a>) -> Self {
        Self { client }
    }

    pub async fn list_calendars(&self, limit: usize) -> Result<Vec<Value>> {
        let url = endpoint(CALENDAR_API_BASE, &["users", "me", "calendarList"])?;
        self.client.get_paginated(url, &[], "items", limit).await
    }

    /// Events between `time_min` and `time_max`, expanded and ordered by start
    pub async fn list_events(
        &self,
        calendar_id: &str,
        time_min: Option<DateTime<Utc>>,
        time_max: Option<DateTime<Utc>>,
        query: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Value>> {
        info!(account = self.client.alias(), calendar_id, "listing events");
        let mut params = vec![
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
        ];
        if let Some(min) = time_min {
            params.push(("timeMin", rfc3339(min)));
        }
        if let Some(max) = time_max {
            params.push(("timeMax", rfc3339(max)));
        }
        if let Some(q) = query {
            params.push(("q", q.to_string()));
        }

        let url = endpoint(CALENDAR_API_BASE, &["calendars", calendar_id, "events"])?;
        let events = self.client.get_paginated(url, &params, "items", limit).await?;
        debug!("Retrieved {} events", events.len());
        Ok(events)
    }

    pub async fn get_event(&self, calendar_id: &str, event_id: &str) -> Result<Value> {
        let url = endpoint(
            CALENDAR_API_BASE,
            &["calendars", calendar_id, "events", event_id],
        )?;
        self.client.get(url, &[]).await
    }

    pub async fn create_event(&self, calendar_id: &str, draft: &EventDraft) -> Result<Value> {
        info!(account = self.client.alias(), calendar_id, "creating event");
        let url = endpoint(CALENDAR_API_BASE, &["calendars", calendar_id, "events"])?;
        self.client.post(url, &draft.to_json()).await
    }

    /// PATCH semantics: only fields set in the draft change
    pub async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        draft: &EventDraft,
    ) -> Result<Value> {
        let url = endpoint(
            CALENDAR_API_BASE,
            &["calendars", calendar_id, "events", event_id],
        )?;
        self.client.patch(url, &draft.to_json()).await
    }

    pub async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<()> {
        info!(account = self.client.alias(), calendar_id, event_id, "deleting event");
        let url = endpoint(
            CALENDAR_API_BASE,
            &["calendars", calendar_id, "events", event_id],
        )?;
        self.client.delete(url).await
    }

    pub async fn list_acl(&self, calendar_id: &str) -> Result<Vec<Value>> {
        let url = endpoint(CALENDAR_API_BASE, &["calendars", calendar_id, "acl"])?;
        self.client.get_paginated(url, &[], "items", usize::MAX).await
    }

    /// Share a calendar (`role` is reader, writer, owner or freeBusyReader)
    pub async fn insert_acl(
        &self,
        calendar_id: &str,
        scope: &AclScope,
        role: &str,
    ) -> Result<Value> {
        let url = endpoint(CALENDAR_API_BASE, &["calendars", calendar_id, "acl"])?;
        self.client.post(url, &acl_rule(role, scope)).await
    }

    pub async fn delete_acl(&self, calendar_id: &str, rule_id: &str) -> Result<()> {
        let url = endpoint(
            CALENDAR_API_BASE,
            &["calendars", calendar_id, "acl", rule_id],
        )?;
        self.client.delete(url).await
    }

    pub async fn free_busy(
        &self,
        calendar_ids: &[String],
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<BusySlot>> {
        let url = endpoint(CALENDAR_API_BASE, &["freeBusy"])?;
        let items: Vec<Value> = calendar_ids.iter().map(|id| json!({ "id": id })).collect();
        let body = json!({
            "timeMin": rfc3339(time_min),
            "timeMax": rfc3339(time_max),
            "items": items,
        });
        let response = self.client.post(url, &body).await?;
        busy_slots(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_time_date_vs_datetime() {
        let all_day = EventTime::from_json(&json!({"date": "2024-05-01"})).unwrap();
        assert_eq!(
            all_day,
            EventTime::AllDay(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
        );

        let timed =
            EventTime::from_json(&json!({"dateTime": "2024-05-01T09:30:00+02:00"})).unwrap();
        assert_eq!(
            timed,
            EventTime::At(Utc.with_ymd_and_hms(2024, 5, 1, 7, 30, 0).unwrap())
        );
        assert_eq!(timed.display(), "2024-05-01 07:30 UTC");
        assert!(EventTime::from_json(&json!({})).is_none());
    }

    #[test]
    fn test_parse_time_arg() {
        assert!(matches!(
            parse_time_arg("2024-05-01").unwrap(),
            EventTime::AllDay(_)
        ));
        assert_eq!(
            range_bound("2024-05-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
        );
        let err = parse_time_arg("tomorrow").unwrap_err();
        assert!(err.to_string().contains("YYYY-MM-DD"));
    }

    #[test]
    fn test_default_end() {
        let start = parse_time_arg("2024-05-01T09:00:00Z").unwrap();
        assert_eq!(
            default_end(&start).to_json(),
            json!({"dateTime": "2024-05-01T10:00:00Z"})
        );
        let day = parse_time_arg("2024-12-31").unwrap();
        assert_eq!(default_end(&day).to_json(), json!({"date": "2025-01-01"}));
    }

    #[test]
    fn test_draft_only_serializes_set_fields() {
        let draft = EventDraft {
            summary: Some("Standup".to_string()),
            attendees: vec!["bo@example.com".to_string()],
            ..Default::default()
        };
        assert_eq!(
            draft.to_json(),
            json!({"summary": "Standup", "attendees": [{"email": "bo@example.com"}]})
        );
        assert!(EventDraft::default().is_empty());
        assert!(!draft.is_empty());
    }

    #[test]
    fn test_event_summary_defaults() {
        let summary = EventSummary::from_json(&json!({
            "id": "ev1",
            "start": {"date": "2024-05-01"},
            "status": "confirmed"
        }));
        assert_eq!(summary.summary, "(No title)");
        assert_eq!(summary.status, "confirmed");
        assert!(summary.end.is_none());
    }

    #[test]
    fn test_acl_rule_body() {
        assert_eq!(
            acl_rule("reader", &AclScope::User("bo@example.com".to_string())),
            json!({"role": "reader", "scope": {"type": "user", "value": "bo@example.com"}})
        );
        assert_eq!(
            acl_rule("writer", &AclScope::Domain("example.com".to_string())),
            json!({"role": "writer", "scope": {"type": "domain", "value": "example.com"}})
        );
        assert_eq!(
            acl_rule("freeBusyReader", &AclScope::Default),
            json!({"role": "freeBusyReader", "scope": {"type": "default"}})
        );
    }

    #[test]
    fn test_busy_slots_sorted() {
        let response = json!({
            "calendars": {
                "primary": {"busy": [
                    {"start": "2024-05-01T15:00:00Z", "end": "2024-05-01T16:00:00Z"},
                    {"start": "2024-05-01T09:00:00Z", "end": "2024-05-01T10:00:00Z"}
                ]},
                "empty@example.com": {"busy": []}
            }
        });
        let slots = busy_slots(&response).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].start, Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        assert!(slots.iter().all(|s| s.calendar == "primary"));
    }

    #[test]
    fn test_busy_slots_reports_calendar_errors() {
        let response = json!({
            "calendars": {"nobody@example.com": {"errors": [{"domain": "global", "reason": "notFound"}]}}
        });
        let err = busy_slots(&response).unwrap_err();
        assert!(err.to_string().contains("notFound"));
    }
}
