//! Behaviour that must hold regardless of the data source

use signal_expr::{
    align, AlignmentMode, Buffer, Environment, ExpressionErrorKind, InterpolationKind, Parser, ProcessingError,
    Signal, SignalParams, Value,
};

fn signal(name: &str, time: Vec<i64>, data: Vec<f64>) -> Signal {
    let mut sig = Signal::new("ds", name);
    sig.set_time(Buffer::from_i64(time).with_unit("ms"));
    sig.set_data_primary(Buffer::from_f64(data).with_unit("V"));
    sig
}

#[test]
fn test_only_placeholder_text_is_an_expression() {
    assert!(Parser::is_expression("${a} + 1"));
    assert!(!Parser::is_expression("CWS-SCSU-HR00:ML0004-LT-XI"));

    let mut parser = Parser::new();
    for bad in ["${a}; ${b}", "lambda: ${a}", "${a} if ${b} else 0", "[${a} for _ in ${b}]"] {
        let err = parser.set_expression(bad).unwrap_err();
        assert!(err.is_invalid_expression(), "{}", bad);
        assert_ne!(err.expression_kind(), Some(ExpressionErrorKind::Evaluation), "{}", bad);
    }
}

#[test]
fn test_every_missing_name_is_reported() {
    let mut parser = Parser::new();
    parser.set_expression("${a} + ${b} * ${c}").unwrap();
    parser.bind("b", Value::Int(1));
    match parser.eval_expr() {
        Err(ProcessingError::InvalidVariable { missing }) => {
            let missing: Vec<&str> = missing.iter().map(String::as_str).collect();
            assert_eq!(missing, vec!["a", "c"]);
        }
        other => panic!("expected missing variables, got {:?}", other.map(|p| p.expression().to_string())),
    }
}

#[test]
fn test_aligned_signals_share_time() {
    let mut signals = vec![
        signal("a", vec![0, 10, 20, 30], vec![0.0, 1.0, 2.0, 3.0]),
        signal("b", vec![5, 15, 25], vec![5.0, 15.0, 25.0]),
    ];
    align(&mut signals, AlignmentMode::Intersection, InterpolationKind::Linear).unwrap();
    assert_eq!(signals[0].time(), signals[1].time());
    assert_eq!(signals[0].time().len(), signals[0].data_primary().len());

    let mut signals = vec![
        signal("a", vec![0, 10, 20, 30], vec![0.0, 1.0, 2.0, 3.0]),
        signal("b", vec![5, 15, 25], vec![5.0, 15.0, 25.0]),
    ];
    align(&mut signals, AlignmentMode::Union, InterpolationKind::Linear).unwrap();
    let grid = signals[0].time().to_f64_vec();
    assert_eq!(grid.first(), Some(&0.0));
    assert_eq!(grid.last(), Some(&30.0));
    assert_eq!(signals[1].time().to_f64_vec(), grid);
}

#[test]
fn test_signal_arithmetic_aligns_first() {
    let a = signal("a", vec![0, 10, 20, 30], vec![0.0, 1.0, 2.0, 3.0]);
    let b = signal("b", vec![0, 10, 20, 30], vec![1.0, 1.0, 1.0, 1.0]);
    let sum = Value::from(a).binary(signal_expr::BinaryOp::Add, &Value::from(b)).unwrap();
    let sum = sum.as_signal().unwrap();
    assert_eq!(sum.data_primary().len(), sum.time().len());
    assert_eq!(sum.data_primary_unit(), "V");
}

#[test]
fn test_alias_chains_reach_the_signal() {
    let mut env = Environment::new();
    let (uid, _) = env.add_signal("ds", "x", &SignalParams::new()).unwrap();
    env.add_alias("first", "second");
    env.add_alias("second", &uid);

    let (resolved, sig) = env.resolve_key("first").unwrap();
    assert_eq!(resolved, uid);
    assert_eq!(sig.name, "x");

    env.add_alias("loop_a", "loop_b");
    env.add_alias("loop_b", "loop_a");
    assert!(matches!(env.resolve_key("loop_a"), Err(ProcessingError::AliasCycle(_))));
}
