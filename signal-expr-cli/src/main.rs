//! Signal Expression CLI Application
//!
//! Command-line front end for the signal-expr library. It:
//! - Loads a signal table and context settings from a TOML file
//! - Imports the table against the emulated data source
//! - Evaluates every signal's axis expressions and the configured queries
//! - Prints a text or JSON summary

use anyhow::{bail, Result};
use clap::Parser;
use signal_expr::{Context, EmulatedDataAccess};
use std::path::PathBuf;

mod config;
mod report;

use config::{AppConfig, QueryConfig};
use report::{QueryReport, Report, SignalReport, ValueSummary};

/// Signal Expression - Evaluate derived signals from a signal table
#[derive(Parser, Debug)]
#[command(name = "signal-expr-cli")]
#[command(about = "Import a signal table and evaluate signal expressions", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (signals.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Expression to evaluate after import (can be repeated)
    #[arg(short, long, value_name = "EXPR")]
    eval: Vec<String>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Skip evaluating the axis expressions of every imported signal
    #[arg(long)]
    no_signals: bool,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("Signal Expression CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using signal-expr library v{}", signal_expr::VERSION);

    let mut app_config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            let config = config::load_config(path)?;
            log::debug!("Configuration loaded successfully");
            config
        }
        None if args.eval.is_empty() => {
            println!("Signal Expression - No input specified");
            println!("\nQuick Start:");
            println!("  signal-expr-cli --config signals.toml");
            println!("  signal-expr-cli --config signals.toml --eval '${{cws2}}.time + 2s'");
            println!("\nUse --help for more options");
            return Ok(());
        }
        None => AppConfig::default(),
    };

    app_config.queries.extend(args.eval.iter().map(|expr| QueryConfig {
        expr: expr.clone(),
        name: None,
    }));

    let report = run(&app_config, !args.no_signals)?;

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_text());
    }

    let failures = report.failures();
    if failures > 0 {
        bail!("{} evaluation(s) failed", failures);
    }
    Ok(())
}

/// Import, build and evaluate everything the configuration describes
fn run(app_config: &AppConfig, with_signals: bool) -> Result<Report> {
    let access = EmulatedDataAccess::new().with_secret(app_config.emulator.secret);
    let mut ctx = Context::new(app_config.context.clone()).with_data_access(access);
    let mut report = Report::new();

    ctx.import_table(&app_config.signals, &app_config.defaults, |description| {
        log::debug!(
            "Plot at col {} row {} stack {}: {} signal(s)",
            description.col_num,
            description.row_num,
            description.stack_num,
            description.signals.len()
        );
        report.layouts.push(description.clone());
    })?;
    ctx.build()?;
    log::info!("Context holds {} entries", ctx.env().len());

    if with_signals {
        for uid in ctx.env().signal_uids() {
            report.signals.push(signal_report(&mut ctx, &uid));
        }
    }

    for query in &app_config.queries {
        let outcome = ctx.evaluate(&query.expr);
        if let Err(e) = &outcome {
            log::warn!("Query '{}' failed: {}", query.label(), e);
        }
        report.queries.push(QueryReport::new(query.label(), &query.expr, outcome));
    }

    Ok(report)
}

fn signal_report(ctx: &mut Context, uid: &str) -> SignalReport {
    let (source, name, expression) = match ctx.env().signal(uid) {
        Some(signal) => (
            signal.source.clone(),
            signal.name.clone(),
            signal.expression().to_string(),
        ),
        None => Default::default(),
    };

    let (axes, error) = match ctx.get_data(uid) {
        Ok(values) => (values.iter().map(ValueSummary::from).collect(), None),
        Err(e) => {
            log::warn!("Signal {} failed: {}", uid, e);
            (Vec::new(), Some(e.to_string()))
        }
    };

    SignalReport {
        uid: uid.to_string(),
        source,
        name,
        expression,
        axes,
        error,
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_expr::TableRow;

    fn sample_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.emulator.secret = 1000;
        config.signals = vec![
            TableRow::new("emulated", "CWS-SCSU-HR00:ML0002-LT-XI")
                .with_alias("cws2")
                .with_stack("1.1"),
            TableRow::new("emulated", "CWS-SCSU-HR00:ML0004-LT-XI")
                .with_alias("cws4")
                .with_stack("1.1"),
            TableRow::new("emulated", "${cws2} + ${cws4}").with_stack("1.2"),
        ];
        config.queries = vec![QueryConfig {
            expr: "${cws2}.time + 2s".to_string(),
            name: Some("shifted".to_string()),
        }];
        config
    }

    #[test]
    fn test_run_produces_layouts_signals_and_queries() {
        let report = run(&sample_config(), true).unwrap();
        assert_eq!(report.layouts.len(), 3);
        // cws2, cws4 and the composite
        assert_eq!(report.signals.len(), 3);
        assert_eq!(report.queries.len(), 1);
        assert_eq!(report.failures(), 0);

        let seed = EmulatedDataAccess::new()
            .with_secret(1000)
            .seed("emulated", "CWS-SCSU-HR00:ML0002-LT-XI");
        match &report.queries[0].result {
            Some(ValueSummary::Buffer(b)) => {
                assert_eq!(b.unit, "ms");
                assert_eq!(b.first, Some((seed - 16 + 2000) as f64));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_run_reports_failed_queries() {
        let mut config = sample_config();
        config.queries.push(QueryConfig {
            expr: "${cws2}.data.__class__".to_string(),
            name: None,
        });
        let report = run(&config, false).unwrap();
        assert!(report.signals.is_empty());
        assert_eq!(report.failures(), 1);
        assert!(report.queries[1].error.is_some());
    }

    #[test]
    fn test_run_counts_unknown_names_as_failures() {
        let mut config = sample_config();
        config.queries.push(QueryConfig {
            expr: "${typo}.data".to_string(),
            name: Some("typo".to_string()),
        });
        let report = run(&config, false).unwrap();
        assert_eq!(report.failures(), 1);
        let failed = &report.queries[1];
        assert!(failed.result.is_none());
        assert!(failed.error.as_deref().unwrap_or_default().contains("typo"));
    }
}
