//! End-to-end flow: import a table, build, evaluate queries

use signal_expr::{
    Buffer, Cell, Context, ContextConfig, EmulatedDataAccess, Environment, EvalOptions, ProcessingError, RawSamples,
    Result, SignalParams, TableDefaults, TableRow, Value,
};
use std::rc::Rc;

fn counting_context(calls: Rc<std::cell::Cell<usize>>) -> Context {
    let access = move |_: &str, _: &str, _: &SignalParams| -> Result<RawSamples> {
        calls.set(calls.get() + 1);
        Ok(RawSamples::new(
            Buffer::from_i64(vec![0, 1, 2]),
            "s",
            Buffer::from_f64(vec![1.0, 2.0, 3.0]),
            "V",
        ))
    };
    Context::new(ContextConfig::default()).with_data_access(access)
}

fn rows() -> Vec<TableRow> {
    vec![
        TableRow::new("ds", "volts").with_alias("v").with_stack("1.1"),
        TableRow::new("ds", "amps").with_stack("1.2"),
    ]
}

#[test]
fn test_fetch_happens_once_per_signal() {
    let calls = Rc::new(std::cell::Cell::new(0));
    let mut ctx = counting_context(calls.clone());
    ctx.import_rows(&rows(), &TableDefaults::default()).unwrap();
    ctx.build().unwrap();

    let first = ctx.evaluate("${v}").unwrap();
    let second = ctx.evaluate("${v}").unwrap();
    assert_eq!(first, second);
    assert_eq!(calls.get(), 1);

    let signal = first.as_signal().unwrap();
    assert_eq!(signal.data_primary().to_f64_vec(), vec![1.0, 2.0, 3.0]);
    assert_eq!(signal.data_primary_unit(), "V");
}

#[test]
fn test_scaled_signal_keeps_units() {
    let calls = Rc::new(std::cell::Cell::new(0));
    let mut ctx = counting_context(calls);
    ctx.import_rows(&rows(), &TableDefaults::default()).unwrap();

    let doubled = ctx.evaluate("${v} * 2").unwrap();
    let signal = doubled.as_signal().unwrap();
    assert_eq!(signal.data_primary().to_f64_vec(), vec![2.0, 4.0, 6.0]);
    assert_eq!(signal.data_primary_unit(), "V");
    assert_eq!(signal.time_unit(), "s");
}

#[test]
fn test_duration_arithmetic_on_time() {
    let calls = Rc::new(std::cell::Cell::new(0));
    let mut ctx = counting_context(calls);
    ctx.import_rows(&rows(), &TableDefaults::default()).unwrap();

    let shifted = ctx.evaluate("${v}.time + 2s").unwrap();
    let buffer = shifted.as_buffer().unwrap();
    assert_eq!(buffer.to_i64_vec().unwrap(), vec![2, 3, 4]);
    assert_eq!(buffer.unit(), "s");
}

#[test]
fn test_names_fall_back_to_source() {
    let calls = Rc::new(std::cell::Cell::new(0));
    let mut ctx = counting_context(calls);
    ctx.import_rows(&rows(), &TableDefaults::default()).unwrap();

    // "amps" has no alias; it resolves through the data source
    assert!(matches!(
        ctx.evaluate("${amps}"),
        Err(ProcessingError::InvalidVariable { .. })
    ));
    let options = EvalOptions::new().with_source("ds", SignalParams::new());
    let value = ctx.evaluate_expr("${amps}", &options, &mut |_| None).unwrap();
    assert_eq!(value.as_signal().unwrap().name, "amps");
}

#[test]
fn test_unbound_placeholders_go_to_handler() {
    let mut ctx = Context::default();
    let mut seen = Vec::new();
    let mut handler = |e: &ProcessingError| {
        seen.push(e.to_string());
        Some(Value::Int(40))
    };
    let value = ctx
        .evaluate_expr("${missing} + 2", &EvalOptions::default(), &mut handler)
        .unwrap();
    assert_eq!(value, Value::Int(42));
    assert_eq!(seen.len(), 1);

    // Without a substitute the missing name is reported
    let err = ctx
        .evaluate_expr("${missing} + 2", &EvalOptions::default(), &mut |_| None)
        .unwrap_err();
    assert!(matches!(err, ProcessingError::InvalidVariable { .. }));
}

#[test]
fn test_emulated_composite_query() {
    let mut ctx = Context::new(ContextConfig::default()).with_data_access(EmulatedDataAccess::new());
    let rows = vec![
        TableRow::new("emulated", "CWS-SCSU-HR00:ML0002-LT-XI").with_alias("cws2"),
        TableRow::new("emulated", "CWS-SCSU-HR00:ML0004-LT-XI").with_alias("cws4"),
        TableRow::new("emulated", "${cws2} - ${cws4}")
            .with_alias("diff")
            .with_pulses(Cell::Int(7)),
    ];
    let layouts = ctx.import_rows(&rows, &TableDefaults::default()).unwrap();
    assert_eq!(layouts.len(), 3);
    assert_eq!(layouts[2].pulse_nb, Some(7));

    let diff = ctx.evaluate("${diff}").unwrap();
    let signal = diff.as_signal().unwrap();
    assert_eq!(signal.data_primary_unit(), "C");
    assert_eq!(signal.time_unit(), "ms");
    assert!(!signal.time().is_empty());
}

#[test]
fn test_identifiers_depend_on_every_field() {
    let params = SignalParams::new().with_pulse(1);
    let uid = Environment::construct_uid("ds", "x", &params);
    assert_eq!(uid, Environment::construct_uid("ds", "x", &params));
    assert_eq!(uid.len(), 64);
    assert_ne!(uid, Environment::construct_uid("ds", "x", &SignalParams::new().with_pulse(2)));
    assert_ne!(uid, Environment::construct_uid("dsx", "", &params));
}
