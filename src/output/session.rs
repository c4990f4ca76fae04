use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color};
use serde_json::{Value, json};

use crate::auth::Session;
use crate::utils::Timezone;

use super::format::{create_styled_table, header_cell, styled_cell};

pub(crate) struct SessionTableOptions {
    pub(crate) use_color: bool,
    pub(crate) timezone: Timezone,
    pub(crate) now: DateTime<Utc>,
}

fn claim_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Human-friendly remaining lifetime, e.g. `59m 40s`
fn format_remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (expires_at - now).num_seconds();
    if secs <= 0 {
        return "expired".to_string();
    }
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m}m")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

pub(crate) fn output_session_json(session: Option<&Session>, options: &SessionTableOptions) -> String {
    let value = match session {
        None => json!({ "authenticated": false }),
        Some(session) => {
            let expires_at = session.claims.expires_at();
            json!({
                "authenticated": true,
                "username": session.username,
                "role": session.role,
                "issuer": session.claims.iss,
                "audience": claim_text(session.claims.aud.as_ref()),
                "expires_at": expires_at.map(|at| options.timezone.to_fixed_offset(at).to_rfc3339()),
                "expires_in_secs": expires_at.map(|at| (at - options.now).num_seconds().max(0)),
            })
        }
    };
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
}

pub(crate) fn print_session_table(session: Option<&Session>, options: &SessionTableOptions) {
    let Some(session) = session else {
        println!("Not logged in.");
        return;
    };

    let use_color = options.use_color;
    let mut table = create_styled_table();
    table.set_header(vec![
        header_cell("Session", use_color),
        header_cell("", use_color),
    ]);

    let green = if use_color { Some(Color::Green) } else { None };
    let dash = || "-".to_string();

    table.add_row(vec![
        Cell::new("User"),
        styled_cell(&session.username.clone().unwrap_or_else(dash), green, true),
    ]);
    table.add_row(vec![
        Cell::new("Role"),
        Cell::new(session.role.clone().unwrap_or_else(dash)),
    ]);
    table.add_row(vec![
        Cell::new("Issuer"),
        Cell::new(session.claims.iss.clone().unwrap_or_else(dash)),
    ]);
    table.add_row(vec![
        Cell::new("Audience"),
        Cell::new(claim_text(session.claims.aud.as_ref()).unwrap_or_else(dash)),
    ]);

    let expiry = match session.claims.expires_at() {
        Some(at) => format!(
            "{} ({})",
            options
                .timezone
                .to_fixed_offset(at)
                .format("%Y-%m-%d %H:%M:%S %:z"),
            format_remaining(at, options.now)
        ),
        None => dash(),
    };
    table.add_row(vec![Cell::new("Expires"), Cell::new(expiry)]);

    println!("{table}");
}
