use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Subcommand};
use std::io::{self, Write};
use std::str::FromStr;

use pomotrack::models::{EventKind, TimedEvent};
use pomotrack::sync::{LocalStore, SummaryCache};

use super::{format_duration, format_time, OutputFormat};

#[derive(Args)]
pub struct EventCommand {
    #[command(subcommand)]
    pub command: EventSubcommand,
}

#[derive(Subcommand)]
pub enum EventSubcommand {
    /// Record a finished timer run
    Add {
        /// What you were doing
        title: String,

        /// Event type: pomodoro, rest, count_up or custom
        #[arg(long, default_value = "pomodoro")]
        kind: String,

        /// Length in minutes, counted back from the end time
        #[arg(long, default_value_t = 25)]
        minutes: i64,

        /// End time as RFC 3339 (defaults to now)
        #[arg(long)]
        end: Option<DateTime<Utc>>,

        /// Record the run as abandoned instead of completed
        #[arg(long)]
        incomplete: bool,
    },

    /// List events
    List {
        /// Only this calendar day (UTC), e.g. 2026-08-23
        #[arg(long)]
        day: Option<NaiveDate>,

        /// Maximum rows when no day is given
        #[arg(long, default_value_t = 20)]
        limit: i64,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one event
    Show {
        /// Event UUID
        uuid: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Update an existing event
    Edit {
        /// Event UUID
        uuid: String,

        /// New title
        #[arg(long)]
        title: Option<String>,

        /// New event type: pomodoro, rest, count_up or custom
        #[arg(long)]
        kind: Option<String>,

        /// Mark as completed (true) or abandoned (false)
        #[arg(long)]
        completed: Option<bool>,
    },

    /// Mark an event completed
    Complete {
        /// Event UUID
        uuid: String,
    },

    /// Delete an event
    Delete {
        /// Event UUID
        uuid: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },

    /// Show aggregates for one day
    Summary {
        /// Day to summarize (UTC); defaults to today
        #[arg(long)]
        day: Option<NaiveDate>,
    },
}

impl EventCommand {
    pub async fn run(&self, store: &LocalStore) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            EventSubcommand::Add {
                title,
                kind,
                minutes,
                end,
                incomplete,
            } => {
                if title.trim().is_empty() {
                    return Err("Event title cannot be empty".into());
                }
                if *minutes <= 0 {
                    return Err("Minutes must be a positive number".into());
                }
                let kind = EventKind::from_str(kind)?;

                let end_ms = end.unwrap_or_else(Utc::now).timestamp_millis();
                let start_ms = end_ms - minutes * 60_000;
                let event =
                    TimedEvent::new(title.trim(), kind, start_ms, end_ms).with_completed(!incomplete);

                store.record_event(&event).await?;
                println!("Recorded: {}", event);
                println!("  uuid: {}", event.uuid);
                Ok(())
            }

            EventSubcommand::List { day, limit, format } => {
                let events = match day {
                    Some(day) => store.events_for_day(*day).await?,
                    None => store.recent_events(*limit).await?,
                };

                if events.is_empty() {
                    println!("No events found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&events)?);
                    }
                    OutputFormat::Text => {
                        println!(
                            "{:<36}  {:<8}  {:<16}  {:>7}  TITLE",
                            "UUID", "KIND", "START", "LENGTH"
                        );
                        println!("{}", "-".repeat(92));
                        for event in &events {
                            let kind = event.kind.to_string();
                            println!(
                                "{:<36}  {:<8}  {:<16}  {:>7}  {}{}",
                                event.uuid,
                                kind,
                                format_time(event.start_time),
                                format_duration(event.duration_ms()),
                                event.title,
                                if event.completed { " ✓" } else { "" }
                            );
                        }
                        println!("\nTotal: {} event(s)", events.len());
                    }
                }
                Ok(())
            }

            EventSubcommand::Show { uuid, format } => match store.get_event(uuid).await? {
                Some(event) => {
                    match format {
                        OutputFormat::Json => {
                            println!("{}", serde_json::to_string_pretty(&event)?);
                        }
                        OutputFormat::Text => {
                            println!("{}", event);
                            println!("  uuid:    {}", event.uuid);
                            println!("  start:   {}", format_time(event.start_time));
                            println!("  end:     {}", format_time(event.end_time));
                            println!("  updated: {}", format_time(event.updated_at));
                        }
                    }
                    Ok(())
                }
                None => Err(format!("Event not found: {}", uuid).into()),
            },

            EventSubcommand::Edit {
                uuid,
                title,
                kind,
                completed,
            } => {
                if title.is_none() && kind.is_none() && completed.is_none() {
                    return Err("Nothing to update. Provide at least one option.".into());
                }

                let mut event = match store.get_event(uuid).await? {
                    Some(event) => event,
                    None => return Err(format!("Event not found: {}", uuid).into()),
                };

                if let Some(new_title) = title {
                    if new_title.trim().is_empty() {
                        return Err("Event title cannot be empty".into());
                    }
                    event.title = new_title.trim().to_string();
                }
                if let Some(new_kind) = kind {
                    event.kind = EventKind::from_str(new_kind)?;
                }
                if let Some(new_completed) = completed {
                    event.completed = *new_completed;
                }

                let updated = store.update_event(&event).await?;
                println!("Updated: {}", updated);
                Ok(())
            }

            EventSubcommand::Complete { uuid } => {
                let mut event = match store.get_event(uuid).await? {
                    Some(event) => event,
                    None => return Err(format!("Event not found: {}", uuid).into()),
                };

                if event.completed {
                    println!("Already completed: {}", event);
                    return Ok(());
                }

                event.completed = true;
                let updated = store.update_event(&event).await?;
                println!("Completed: {}", updated);
                Ok(())
            }

            EventSubcommand::Delete { uuid, force } => {
                let event = match store.get_event(uuid).await? {
                    Some(event) => event,
                    None => return Err(format!("Event not found: {}", uuid).into()),
                };

                if !force {
                    print!("Delete event '{}'? [y/N] ", event.title);
                    io::stdout().flush()?;

                    let mut input = String::new();
                    io::stdin().read_line(&mut input)?;

                    if !input.trim().eq_ignore_ascii_case("y") {
                        println!("Deletion cancelled.");
                        return Ok(());
                    }
                }

                store.delete_event(uuid).await?;
                println!("Deleted event: {}", event.title);
                Ok(())
            }

            EventSubcommand::Summary { day } => {
                let day = day.unwrap_or_else(|| Utc::now().date_naive());
                let cache = SummaryCache::new(store.clone());
                let summary = cache.summary_for(day).await?;

                println!("Summary for {}", day);
                println!("  Events:              {}", summary.events);
                println!("  Completed pomodoros: {}", summary.completed_pomodoros);
                println!("  Focus time:          {}", format_duration(summary.focus_ms));
                println!("  Rest time:           {}", format_duration(summary.rest_ms));
                Ok(())
            }
        }
    }
}

