//! Signal Expression Library
//!
//! Evaluates derived telemetry signals written as small arithmetic expressions
//! over `${name}` placeholders, e.g. `${ip1} + ${ip2} * 2`.
//!
//! # Architecture
//!
//! - [`parser`] turns placeholder text into a validated expression tree and
//!   evaluates it against an allow-listed namespace
//! - [`Environment`] maps content-derived identifiers to signals and aliases
//!   to identifiers
//! - [`Signal`] couples time with primary/secondary data; arithmetic between
//!   signals aligns them on a common time grid first ([`alignment`])
//! - [`Context`] imports signal tables, builds composite expressions and
//!   evaluates queries, fetching data on demand through a [`DataAccess`]
//!
//! The library does NOT:
//! - Plot or lay out signals (layouts are handed to a caller callback)
//! - Cache data beyond a per-signal staleness check
//! - Accept anything resembling a general-purpose language (no loops,
//!   conditionals, assignments or user-defined functions)
//!
//! # Example Usage
//!
//! ```no_run
//! use signal_expr::{Context, ContextConfig, EmulatedDataAccess, TableDefaults, TableRow};
//!
//! let mut ctx = Context::new(ContextConfig::default())
//!     .with_data_access(EmulatedDataAccess::new());
//!
//! let rows = vec![TableRow::new("emulated", "CWS-SCSU-HR00:ML0004-LT-XI").with_alias("ml0004")];
//! ctx.import_rows(&rows, &TableDefaults::default()).unwrap();
//! ctx.build().unwrap();
//!
//! let shifted = ctx.evaluate("${ml0004}.time + 20000 * 365D").unwrap();
//! println!("{}", shifted);
//! ```

// Public modules
pub mod access;
pub mod alignment;
pub mod buffer;
pub mod config;
pub mod context;
pub mod environment;
pub mod parser;
pub mod signal;
pub mod table;
pub mod types;
pub mod units;
pub mod value;

// Re-export main types for convenience
pub use access::{DataAccess, EmulatedDataAccess, RawSamples, SamplesTranslator, Translator};
pub use alignment::{align, AlignmentMode, InterpolationKind};
pub use buffer::{BinaryOp, Buffer, Values};
pub use config::{ContextConfig, EvalLimits};
pub use context::{Context, EvalOptions, UnboundHandler};
pub use environment::{Entry, Environment, RegistrationRecord};
pub use parser::Parser;
pub use signal::{AxisExpressions, Signal, SignalParams};
pub use table::{Cell, SignalDescription, StackPosition, TableDefaults, TableRow};
pub use types::{ExpressionErrorKind, ProcessingError, Result};
pub use units::{coarsest_time_unit, finest_time_unit, TimeUnit};
pub use value::{Duration, Value};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: text without placeholders is not a query
        let mut ctx = Context::default();
        assert!(ctx.env().is_empty());
        assert!(!VERSION.is_empty());
        assert!(ctx.evaluate("1 + 2").is_err());
    }
}
