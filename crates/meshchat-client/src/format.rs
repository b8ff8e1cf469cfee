//! Render-ready strings for the chat view.

use chrono::{DateTime, Local, TimeZone};

use meshchat_store::ConversationEntry;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `"YYYY-MM-DD HH:MM:SS | name > text"`, in local time.
pub fn format_entry(entry: &ConversationEntry, sender_name: &str) -> String {
    render_entry(&entry.received_at.with_timezone(&Local), sender_name, &entry.text)
}

/// Current local time padded to a fixed width, for status lines.
pub fn status_time_prefix() -> String {
    time_prefix(&Local::now())
}

/// A status message with the time prefix applied.
pub fn status_line(message: &str) -> String {
    format!("{}| {message}", status_time_prefix())
}

fn render_entry<Tz: TimeZone>(at: &DateTime<Tz>, sender_name: &str, text: &str) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{} | {sender_name} > {text}", at.format(TIME_FORMAT))
}

fn time_prefix<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{:<20}", at.format(TIME_FORMAT).to_string())
}
