//! Evaluation summary
//!
//! Collects what the CLI imported and evaluated, and renders it either as
//! plain text or as JSON.

use serde::Serialize;
use signal_expr::{Buffer, SignalDescription, Value};
use std::fmt::Write as _;

/// First/last values of a buffer with its unit and shape
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferSummary {
    pub unit: String,
    pub shape: Vec<usize>,
    pub first: Option<f64>,
    pub last: Option<f64>,
}

impl From<&Buffer> for BufferSummary {
    fn from(buffer: &Buffer) -> Self {
        let values = buffer.to_f64_vec();
        Self {
            unit: buffer.unit().to_string(),
            shape: buffer.shape().to_vec(),
            first: values.first().copied(),
            last: values.last().copied(),
        }
    }
}

impl BufferSummary {
    fn describe(&self) -> String {
        match (self.first, self.last) {
            (Some(first), Some(last)) => format!(
                "{:?} [{}] {} .. {}",
                self.shape,
                display_unit(&self.unit),
                first,
                last
            ),
            _ => "empty".to_string(),
        }
    }
}

fn display_unit(unit: &str) -> &str {
    if unit.is_empty() {
        "-"
    } else {
        unit
    }
}

/// Shape of an evaluated value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ValueSummary {
    Int {
        value: i64,
    },
    Float {
        value: f64,
    },
    Duration {
        value: String,
    },
    Buffer(BufferSummary),
    Signal {
        name: String,
        time: BufferSummary,
        data: BufferSummary,
        data_secondary: BufferSummary,
    },
}

impl From<&Value> for ValueSummary {
    fn from(value: &Value) -> Self {
        match value {
            Value::Int(v) => ValueSummary::Int { value: *v },
            Value::Float(v) => ValueSummary::Float { value: *v },
            Value::Duration(d) => ValueSummary::Duration { value: d.to_string() },
            Value::Buffer(b) => ValueSummary::Buffer(b.into()),
            Value::Signal(s) => ValueSummary::Signal {
                name: s.name.clone(),
                time: s.time().into(),
                data: s.data_primary().into(),
                data_secondary: s.data_secondary().into(),
            },
        }
    }
}

impl ValueSummary {
    fn describe(&self) -> String {
        match self {
            ValueSummary::Int { value } => value.to_string(),
            ValueSummary::Float { value } => value.to_string(),
            ValueSummary::Duration { value } => value.clone(),
            ValueSummary::Buffer(b) => b.describe(),
            ValueSummary::Signal { name, time, data, .. } => {
                format!("signal {} time {} data {}", name, time.describe(), data.describe())
            }
        }
    }
}

/// Result of one evaluated expression
#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    pub label: String,
    pub expr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ValueSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryReport {
    pub fn new(label: &str, expr: &str, outcome: signal_expr::Result<Value>) -> Self {
        let (result, error) = match outcome {
            Ok(value) => (Some(ValueSummary::from(&value)), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            label: label.to_string(),
            expr: expr.to_string(),
            result,
            error,
        }
    }
}

/// Axis data of one registered signal
#[derive(Debug, Clone, Serialize)]
pub struct SignalReport {
    pub uid: String,
    pub source: String,
    pub name: String,
    pub expression: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub axes: Vec<ValueSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything the CLI produced in one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub version: String,
    pub layouts: Vec<SignalDescription>,
    pub signals: Vec<SignalReport>,
    pub queries: Vec<QueryReport>,
}

impl Report {
    pub fn new() -> Self {
        Self {
            version: signal_expr::VERSION.to_string(),
            ..Default::default()
        }
    }

    /// Number of signals and queries that failed
    pub fn failures(&self) -> usize {
        self.signals.iter().filter(|s| s.error.is_some()).count()
            + self.queries.iter().filter(|q| q.error.is_some()).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Signal expression summary (v{})", self.version);

        let _ = writeln!(out, "\nLayout ({} plots):", self.layouts.len());
        for layout in &self.layouts {
            let _ = writeln!(
                out,
                "  col {} row {} stack {} span {}x{}: {} signal(s)",
                layout.col_num,
                layout.row_num,
                layout.stack_num,
                layout.col_span,
                layout.row_span,
                layout.signals.len()
            );
        }

        let _ = writeln!(out, "\nSignals ({}):", self.signals.len());
        for signal in &self.signals {
            let _ = writeln!(out, "  {}:{} [{}]", signal.source, signal.name, short_uid(&signal.uid));
            if let Some(error) = &signal.error {
                let _ = writeln!(out, "    error: {}", error);
                continue;
            }
            for (axis, summary) in ["x", "y", "z"].iter().zip(&signal.axes) {
                let _ = writeln!(out, "    {}: {}", axis, summary.describe());
            }
        }

        if !self.queries.is_empty() {
            let _ = writeln!(out, "\nQueries ({}):", self.queries.len());
            for query in &self.queries {
                match (&query.result, &query.error) {
                    (_, Some(error)) => {
                        let _ = writeln!(out, "  {} => error: {}", query.label, error);
                    }
                    (Some(result), None) => {
                        let _ = writeln!(out, "  {} => {}", query.label, result.describe());
                    }
                    (None, None) => {
                        let _ = writeln!(out, "  {} => (none)", query.label);
                    }
                }
            }
        }

        out
    }
}

fn short_uid(uid: &str) -> &str {
    uid.get(..12).unwrap_or(uid)
}
