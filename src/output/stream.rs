use comfy_table::{Cell, Color};
use serde_json::{Value, json};

use crate::stream::{LoadStatus, StreamBatch};

use super::format::{
    NumberFormat, create_styled_table, format_elapsed, format_number, header_cell, right_cell,
    styled_cell,
};

pub(crate) struct StreamTableOptions<'a> {
    pub(crate) use_color: bool,
    pub(crate) number_format: NumberFormat,
    pub(crate) source: &'a str,
}

/// Loader status as shown to the user, with locale-aware counts.
pub(crate) fn status_text(status: LoadStatus, format: NumberFormat) -> String {
    match status {
        LoadStatus::Processed(n) => format!("Processed {} records...", format_number(n, format)),
        other => other.to_string(),
    }
}

/// Records as a JSON array, the way they arrived.
pub(crate) fn output_records_json(batch: &StreamBatch) -> String {
    serde_json::to_string_pretty(&batch.records).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn output_groups_json(field: &str, groups: &[(Option<String>, u64)]) -> String {
    let rows: Vec<Value> = groups
        .iter()
        .map(|(value, count)| json!({ field: value, "count": count }))
        .collect();
    serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn print_stream_summary(batch: &StreamBatch, options: &StreamTableOptions<'_>) {
    let use_color = options.use_color;
    let fmt = options.number_format;

    let mut table = create_styled_table();
    table.set_header(vec![
        header_cell("Source", use_color),
        header_cell("Records", use_color),
        header_cell("Skipped", use_color),
        header_cell("Batches", use_color),
        header_cell("Progress", use_color),
        header_cell("Elapsed", use_color),
        header_cell("Status", use_color),
    ]);

    let status_color = if !use_color {
        None
    } else if batch.completed {
        Some(Color::Green)
    } else if batch.error.is_some() {
        Some(Color::Red)
    } else {
        Some(Color::Yellow)
    };
    let skipped_color = if use_color && batch.skipped > 0 {
        Some(Color::Yellow)
    } else {
        None
    };

    table.add_row(vec![
        Cell::new(options.source),
        right_cell(&format_number(batch.count, fmt), None, true),
        right_cell(&format_number(batch.skipped, fmt), skipped_color, false),
        right_cell(&format_number(batch.batches, fmt), None, false),
        right_cell(&format!("{}%", batch.progress), None, false),
        right_cell(&format_elapsed(batch.elapsed, fmt), None, false),
        styled_cell(&status_text(batch.status, fmt), status_color, true),
    ]);

    println!("{table}");
}

pub(crate) fn print_group_table(
    field: &str,
    groups: &[(Option<String>, u64)],
    options: &StreamTableOptions<'_>,
) {
    let use_color = options.use_color;
    let mut table = create_styled_table();
    table.set_header(vec![
        header_cell(field, use_color),
        header_cell("Records", use_color),
    ]);

    let dim = if use_color { Some(Color::DarkGrey) } else { None };
    for (value, count) in groups {
        let label = match value {
            Some(v) => Cell::new(v),
            None => styled_cell("(missing)", dim, false),
        };
        table.add_row(vec![
            label,
            right_cell(&format_number(*count, options.number_format), None, false),
        ]);
    }

    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_json_uses_field_name() {
        let out = output_groups_json(
            "cultivo",
            &[(Some("Palta".to_string()), 2), (None, 1)],
        );
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(
            value,
            json!([{"cultivo": "Palta", "count": 2}, {"cultivo": null, "count": 1}])
        );
    }

    #[test]
    fn milestone_text_follows_locale() {
        let es = NumberFormat::from_locale(Some("es")).unwrap();
        assert_eq!(
            status_text(LoadStatus::Processed(4000), es),
            "Processed 4.000 records..."
        );
        assert_eq!(
            status_text(LoadStatus::Loaded, NumberFormat::default()),
            "Records loaded"
        );
    }

    #[test]
    fn records_json_keeps_order() {
        let batch = StreamBatch {
            records: vec![json!({"id": 2}), json!({"id": 1})],
            count: 2,
            ..StreamBatch::default()
        };
        let value: Value = serde_json::from_str(&output_records_json(&batch)).unwrap();
        assert_eq!(value, json!([{"id": 2}, {"id": 1}]));
    }
}
