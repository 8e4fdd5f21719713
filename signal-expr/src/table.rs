//! Signal description tables
//!
//! Each [`TableRow`] describes one signal (or one per pulse when the row lists
//! several pulses). Rows are parsed into [`ParsedRow`]s against a set of
//! [`TableDefaults`] before the context registers them.

use crate::signal::{AxisExpressions, SignalParams};
use crate::types::{ProcessingError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A table cell that may hold a number, a float, text or a list of integers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<i64>),
}

impl Cell {
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Text(text) => text.trim().is_empty(),
            Cell::List(items) => items.is_empty(),
            _ => false,
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Cell::Int(v) => v.to_string(),
            Cell::Float(v) => v.to_string(),
            Cell::Text(text) => text.trim().to_string(),
            Cell::List(items) => items.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(","),
        }
    }

    /// Pulse numbers held by the cell; text is a comma separated list
    pub fn pulses(&self) -> Result<Vec<i64>> {
        match self {
            Cell::Int(v) => Ok(vec![*v]),
            Cell::List(items) => Ok(items.clone()),
            Cell::Float(v) => Err(ProcessingError::InvalidTable(format!("pulse number {} is not an integer", v))),
            Cell::Text(text) => text
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<i64>()
                        .map_err(|_| ProcessingError::InvalidTable(format!("invalid pulse number '{}'", s)))
                })
                .collect(),
        }
    }

    /// Timestamp in integer nanoseconds since the epoch
    pub fn timestamp_ns(&self) -> Result<i64> {
        match self {
            Cell::Int(v) => Ok(*v),
            Cell::Text(text) => parse_timestamp(text),
            other => Err(ProcessingError::InvalidTable(format!(
                "'{}' is not a timestamp",
                other.to_text()
            ))),
        }
    }
}

/// Parse an integer or ISO-8601 timestamp into nanoseconds since the epoch
///
/// Naive date-times are taken as UTC.
pub fn parse_timestamp(text: &str) -> Result<i64> {
    let text = text.trim();
    if let Ok(ns) = text.parse::<i64>() {
        return Ok(ns);
    }

    let parsed = DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.naive_utc())
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .map_err(|e| ProcessingError::InvalidTable(format!("invalid timestamp '{}': {}", text, e)))?;

    parsed
        .and_utc()
        .timestamp_nanos_opt()
        .ok_or_else(|| ProcessingError::InvalidTable(format!("timestamp '{}' is out of range", text)))
}

fn non_blank(cell: &Option<Cell>) -> Option<&Cell> {
    cell.as_ref().filter(|c| !c.is_blank())
}

/// One row of a signal table, with the column names used in table files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    #[serde(rename = "DS", default)]
    pub source: String,

    #[serde(rename = "Variable", default)]
    pub variable: String,

    #[serde(rename = "Alias", default)]
    pub alias: String,

    #[serde(default)]
    pub x: String,

    #[serde(default)]
    pub y: String,

    #[serde(default)]
    pub z: String,

    /// Layout position as `col.row.stack`
    #[serde(rename = "Stack", default)]
    pub stack: Option<Cell>,

    #[serde(rename = "Row span", default)]
    pub row_span: Option<u32>,

    #[serde(rename = "Col span", default)]
    pub col_span: Option<u32>,

    #[serde(rename = "PulseNumber", default)]
    pub pulse_number: Option<Cell>,

    #[serde(rename = "StartTime", default)]
    pub start_time: Option<Cell>,

    #[serde(rename = "EndTime", default)]
    pub end_time: Option<Cell>,

    #[serde(rename = "DecSamples", default)]
    pub dec_samples: Option<i64>,
}

impl TableRow {
    pub fn new(source: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            variable: variable.into(),
            ..Self::default()
        }
    }

    /// Builder method: set the alias
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    /// Builder method: set the axis expressions
    pub fn with_axes(mut self, x: &str, y: &str, z: &str) -> Self {
        self.x = x.to_string();
        self.y = y.to_string();
        self.z = z.to_string();
        self
    }

    /// Builder method: set the `col.row.stack` position
    pub fn with_stack(mut self, stack: &str) -> Self {
        self.stack = Some(Cell::Text(stack.to_string()));
        self
    }

    /// Builder method: set the pulse cell
    pub fn with_pulses(mut self, pulses: Cell) -> Self {
        self.pulse_number = Some(pulses);
        self
    }

    /// Builder method: set the time window cells
    pub fn with_time_range(mut self, start: Cell, end: Cell) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    /// Builder method: set the decimation
    pub fn with_dec_samples(mut self, dec_samples: i64) -> Self {
        self.dec_samples = Some(dec_samples);
        self
    }
}

/// Global values used for rows that leave pulse and time window blank
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDefaults {
    #[serde(default)]
    pub pulse_nb: Option<i64>,
    #[serde(default)]
    pub ts_start: Option<Cell>,
    #[serde(default)]
    pub ts_end: Option<Cell>,
    #[serde(default)]
    pub dec_samples: Option<i64>,
}

/// Position of a signal in a plot layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackPosition {
    pub col: u32,
    pub row: u32,
    pub stack: u32,
}

impl Default for StackPosition {
    fn default() -> Self {
        Self { col: 0, row: 0, stack: 1 }
    }
}

impl StackPosition {
    /// Parse `col.row.stack`; missing parts default to 0, 0 and 1
    pub fn parse(text: &str) -> Result<Self> {
        let mut position = StackPosition::default();
        let parts: Vec<&str> = text.trim().split('.').collect();
        let field = |idx: usize| -> Result<Option<u32>> {
            match parts.get(idx).map(|p| p.trim()) {
                Some(part) if !part.is_empty() => part
                    .parse::<u32>()
                    .map(Some)
                    .map_err(|_| ProcessingError::InvalidTable(format!("invalid stack '{}'", text))),
                _ => Ok(None),
            }
        };
        if let Some(col) = field(0)? {
            position.col = col;
        }
        if let Some(row) = field(1)? {
            position.row = row;
        }
        if let Some(stack) = field(2)? {
            position.stack = stack;
        }
        Ok(position)
    }
}

/// A table row resolved against the defaults, one per pulse
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub source: String,
    pub name: String,
    pub alias: String,
    pub params: SignalParams,
    pub axes: AxisExpressions,
    pub position: StackPosition,
    pub row_span: u32,
    pub col_span: u32,
}

/// Layout information handed out once per imported row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDescription {
    /// Identifiers of the signals the row registered
    pub signals: Vec<String>,
    pub col_num: u32,
    pub row_num: u32,
    pub stack_num: u32,
    pub row_span: u32,
    pub col_span: u32,
    pub pulse_nb: Option<i64>,
    pub ts_start: Option<i64>,
    pub ts_end: Option<i64>,
}

/// Resolve a row against the defaults
///
/// Pulse number and time window form one group: if the row sets any of them,
/// the row's values replace all three defaults. A pulse list expands into one
/// parsed row per pulse.
pub fn parse_row(row: &TableRow, defaults: &TableDefaults) -> Result<Vec<ParsedRow>> {
    let overrides = non_blank(&row.pulse_number).is_some()
        || non_blank(&row.start_time).is_some()
        || non_blank(&row.end_time).is_some();

    let (pulses, ts_start, ts_end) = if overrides {
        (
            non_blank(&row.pulse_number).map(Cell::pulses).transpose()?.unwrap_or_default(),
            non_blank(&row.start_time).map(Cell::timestamp_ns).transpose()?,
            non_blank(&row.end_time).map(Cell::timestamp_ns).transpose()?,
        )
    } else {
        (
            defaults.pulse_nb.into_iter().collect(),
            non_blank(&defaults.ts_start).map(Cell::timestamp_ns).transpose()?,
            non_blank(&defaults.ts_end).map(Cell::timestamp_ns).transpose()?,
        )
    };

    let position = match non_blank(&row.stack) {
        Some(cell) => StackPosition::parse(&cell.to_text())?,
        None => StackPosition::default(),
    };

    let make = |pulse_nb: Option<i64>| ParsedRow {
        source: row.source.trim().to_string(),
        name: row.variable.trim().to_string(),
        alias: row.alias.trim().to_string(),
        params: SignalParams {
            pulse_nb,
            ts_start,
            ts_end,
            dec_samples: row.dec_samples.or(defaults.dec_samples),
        },
        axes: AxisExpressions::from_cells(Some(&row.x), Some(&row.y), Some(&row.z)),
        position,
        row_span: row.row_span.unwrap_or(1),
        col_span: row.col_span.unwrap_or(1),
    };

    if pulses.is_empty() {
        Ok(vec![make(None)])
    } else {
        Ok(pulses.into_iter().map(|p| make(Some(p))).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_parsing() {
        assert_eq!(StackPosition::parse("1.2.3").unwrap(), StackPosition { col: 1, row: 2, stack: 3 });
        assert_eq!(StackPosition::parse("1.1").unwrap(), StackPosition { col: 1, row: 1, stack: 1 });
        assert_eq!(StackPosition::parse("").unwrap(), StackPosition::default());
        assert_eq!(StackPosition::parse("2..4").unwrap(), StackPosition { col: 2, row: 0, stack: 4 });
        assert!(StackPosition::parse("a.b").is_err());
    }

    #[test]
    fn test_timestamps() {
        assert_eq!(parse_timestamp("1700000000000000000").unwrap(), 1_700_000_000_000_000_000);
        assert_eq!(parse_timestamp("1970-01-01T00:00:01").unwrap(), 1_000_000_000);
        assert_eq!(parse_timestamp("1970-01-01T00:00:00.5Z").unwrap(), 500_000_000);
        assert_eq!(parse_timestamp("1970-01-01T01:00:00+01:00").unwrap(), 0);
        assert_eq!(parse_timestamp("1970-01-02").unwrap(), 86_400_000_000_000);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_defaults_apply_to_blank_rows() {
        let defaults = TableDefaults {
            pulse_nb: Some(7),
            ts_start: Some(Cell::Int(100)),
            ts_end: Some(Cell::Int(200)),
            dec_samples: Some(1000),
        };
        let rows = parse_row(&TableRow::new("ds", "v"), &defaults).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].params, SignalParams::new().with_pulse(7).with_time_range(100, 200).with_dec_samples(1000));
        assert_eq!(rows[0].row_span, 1);
        assert_eq!(rows[0].axes, AxisExpressions::default());
    }

    #[test]
    fn test_override_group() {
        let defaults = TableDefaults {
            pulse_nb: Some(7),
            ts_start: Some(Cell::Int(100)),
            ts_end: Some(Cell::Int(200)),
            dec_samples: None,
        };
        // setting only the pulse drops the default window as well
        let row = TableRow::new("ds", "v").with_pulses(Cell::Int(9));
        let rows = parse_row(&row, &defaults).unwrap();
        assert_eq!(rows[0].params.pulse_nb, Some(9));
        assert_eq!(rows[0].params.ts_start, None);
        assert_eq!(rows[0].params.ts_end, None);

        let row = TableRow::new("ds", "v").with_pulses(Cell::Text("  ".into()));
        let rows = parse_row(&row, &defaults).unwrap();
        assert_eq!(rows[0].params.pulse_nb, Some(7));
    }

    #[test]
    fn test_pulse_list_expansion() {
        let row = TableRow::new("ds", "v").with_alias("v1").with_pulses(Cell::Text("1, 2,3".into()));
        let rows = parse_row(&row, &TableDefaults::default()).unwrap();
        let pulses: Vec<_> = rows.iter().map(|r| r.params.pulse_nb).collect();
        assert_eq!(pulses, vec![Some(1), Some(2), Some(3)]);
        assert!(rows.iter().all(|r| r.alias == "v1"));

        let row = TableRow::new("ds", "v").with_pulses(Cell::Text("1, x".into()));
        assert!(parse_row(&row, &TableDefaults::default()).is_err());
    }

    #[test]
    fn test_rows_deserialize_from_json() {
        let row: TableRow = serde_json::from_str(
            r#"{"DS": "emulated", "Variable": "ML0002", "Alias": "cws2", "Stack": "1.1",
                "Row span": 2, "PulseNumber": [1, 2], "StartTime": "2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(row.source, "emulated");
        assert_eq!(row.stack, Some(Cell::Text("1.1".into())));
        assert_eq!(row.row_span, Some(2));
        assert_eq!(row.pulse_number, Some(Cell::List(vec![1, 2])));
        assert!(row.x.is_empty());

        let rows = parse_row(&row, &TableDefaults::default()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].position, StackPosition { col: 1, row: 1, stack: 1 });
        assert_eq!(rows[0].params.ts_start, Some(1_704_067_200_000_000_000));
    }
}
