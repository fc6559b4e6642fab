//! Result-set serialization for report exports.
//!
//! CSV headers are the declared column names humanized (underscores to
//! spaces, title case); every field is quoted with doubled-quote escaping.
//! Values that parse as dates are reformatted to `YYYY-MM-DD HH:MM:SS` in
//! both formats.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Serialize rows as CSV with a humanized header.
pub fn to_csv(columns: &[String], rows: &[Vec<Value>]) -> String {
    let mut out = String::new();

    let header: Vec<String> = columns.iter().map(|c| csv_quote(&humanize_column(c))).collect();
    out.push_str(&header.join(","));
    out.push('\n');

    for row in rows {
        let fields: Vec<String> = (0..columns.len())
            .map(|i| csv_quote(&format_cell(row.get(i).unwrap_or(&Value::Null))))
            .collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }

    out
}

/// Serialize rows as a pretty-printed JSON array of objects keyed by the
/// declared column names.
pub fn to_json(columns: &[String], rows: &[Vec<Value>]) -> String {
    let objects: Vec<Value> = rows
        .iter()
        .map(|row| {
            let mut object = serde_json::Map::new();
            for (i, column) in columns.iter().enumerate() {
                let value = row.get(i).cloned().unwrap_or(Value::Null);
                object.insert(column.clone(), reformat_json_value(value));
            }
            Value::Object(object)
        })
        .collect();
    serde_json::to_string_pretty(&objects).unwrap_or_else(|_| "[]".to_string())
}

/// "created_at" -> "Created At".
fn humanize_column(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn csv_quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn format_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => reformat_date(s).unwrap_or_else(|| s.clone()),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn reformat_json_value(value: Value) -> Value {
    match value {
        Value::String(s) => match reformat_date(&s) {
            Some(formatted) => Value::String(formatted),
            None => Value::String(s),
        },
        other => other,
    }
}

/// Try the timestamp shapes that show up in stored rows; `None` when the
/// value is not a date.
fn reformat_date(s: &str) -> Option<String> {
    const OUT: &str = "%Y-%m-%d %H:%M:%S";

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc().format(OUT).to_string());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.format(OUT).to_string());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.format(OUT).to_string());
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d.and_hms_opt(0, 0, 0)?.format(OUT).to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_csv_header_humanized() {
        let csv = to_csv(&cols(&["ticket_id", "created_at", "agent_name"]), &[]);
        assert_eq!(csv, "\"Ticket Id\",\"Created At\",\"Agent Name\"\n");
    }

    #[test]
    fn test_csv_quoting_and_escaping() {
        let rows = vec![vec![json!("say \"hi\""), json!(3), json!(null)]];
        let csv = to_csv(&cols(&["note", "count", "missing"]), &rows);
        let mut lines = csv.lines();
        lines.next();
        assert_eq!(lines.next().unwrap(), "\"say \"\"hi\"\"\",\"3\",\"\"");
    }

    #[test]
    fn test_csv_date_reformatted() {
        let rows = vec![vec![json!("2026-02-04T09:30:00+00:00"), json!("2026-02-04")]];
        let csv = to_csv(&cols(&["opened_at", "due_date"]), &rows);
        let mut lines = csv.lines();
        lines.next();
        assert_eq!(
            lines.next().unwrap(),
            "\"2026-02-04 09:30:00\",\"2026-02-04 00:00:00\""
        );
    }

    #[test]
    fn test_non_dates_untouched() {
        assert_eq!(reformat_date("hello"), None);
        assert_eq!(reformat_date("123"), None);
        assert_eq!(reformat_date(""), None);
    }

    #[test]
    fn test_json_objects_keyed_by_columns() {
        let rows = vec![
            vec![json!(1), json!("Printer broken")],
            vec![json!(2), json!("VPN down")],
        ];
        let out = to_json(&cols(&["id", "subject"]), &rows);
        let parsed: Vec<serde_json::Map<String, Value>> = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["id"], json!(1));
        assert_eq!(parsed[1]["subject"], json!("VPN down"));
    }

    #[test]
    fn test_json_dates_reformatted() {
        let rows = vec![vec![json!("2026-02-04T09:30:00Z")]];
        let out = to_json(&cols(&["created_at"]), &rows);
        let parsed: Vec<serde_json::Map<String, Value>> = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["created_at"], json!("2026-02-04 09:30:00"));
    }

    #[test]
    fn test_short_row_padded_with_nulls() {
        let rows = vec![vec![json!(1)]];
        let csv = to_csv(&cols(&["id", "subject"]), &rows);
        let mut lines = csv.lines();
        lines.next();
        assert_eq!(lines.next().unwrap(), "\"1\",\"\"");
    }
}
