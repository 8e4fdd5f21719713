//! Evaluation context
//!
//! A [`Context`] owns the [`Environment`], the data access layer and the
//! configuration. It imports signal tables, rewrites composite expressions
//! onto identifiers ([`Context::build`]) and evaluates queries, fetching base
//! signals on demand.
//!
//! # Example
//!
//! ```no_run
//! use signal_expr::{Context, ContextConfig, EmulatedDataAccess, TableDefaults, TableRow};
//!
//! let mut ctx = Context::new(ContextConfig::default()).with_data_access(EmulatedDataAccess::new());
//! let rows = vec![
//!     TableRow::new("emulated", "CWS-SCSU-HR00:ML0002-LT-XI").with_alias("cws2"),
//!     TableRow::new("emulated", "CWS-SCSU-HR00:ML0004-LT-XI").with_alias("cws4"),
//! ];
//! ctx.import_rows(&rows, &TableDefaults::default()).unwrap();
//! let value = ctx.evaluate("${cws2}.data + ${cws4}.data * 2").unwrap();
//! println!("{:?}", value);
//! ```

use crate::access::{DataAccess, SamplesTranslator, Translator};
use crate::buffer::Buffer;
use crate::config::ContextConfig;
use crate::environment::Environment;
use crate::parser::{Parser, MARKER_IN, MARKER_OUT};
use crate::signal::SignalParams;
use crate::table::{parse_row, ParsedRow, SignalDescription, TableDefaults, TableRow};
use crate::types::{ProcessingError, Result};
use crate::value::Value;
use std::collections::HashSet;

/// Called for every placeholder that does not resolve to a signal
///
/// A returned value is bound in place of the missing signal.
pub type UnboundHandler<'h> = dyn FnMut(&ProcessingError) -> Option<Value> + 'h;

/// Reserved placeholder name of the signal under evaluation
pub const SELF_NAME: &str = "self";

fn placeholder(name: &str) -> String {
    format!("{}{}{}", MARKER_IN, name, MARKER_OUT)
}

/// Per-query options for [`Context::evaluate_expr`]
#[derive(Debug, Clone, Default)]
pub struct EvalOptions {
    /// Identifier bound to `${self}`
    pub self_uid: Option<String>,
    /// Source used to resolve placeholders that are not registry keys
    pub source: Option<String>,
    /// Identity parameters used together with `source`
    pub params: SignalParams,
    /// Parameters overriding those of every fetched signal
    pub overrides: SignalParams,
    /// Overrides the context's fetch-on-demand setting
    pub fetch_on_demand: Option<bool>,
}

impl EvalOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: bind `${self}`
    pub fn with_self(mut self, uid: impl Into<String>) -> Self {
        self.self_uid = Some(uid.into());
        self
    }

    /// Builder method: resolve bare names against a source
    pub fn with_source(mut self, source: impl Into<String>, params: SignalParams) -> Self {
        self.source = Some(source.into());
        self.params = params;
        self
    }

    /// Builder method: override fetch parameters
    pub fn with_overrides(mut self, overrides: SignalParams) -> Self {
        self.overrides = overrides;
        self
    }

    /// Builder method: enable or disable fetching for this query
    pub fn with_fetch_on_demand(mut self, enabled: bool) -> Self {
        self.fetch_on_demand = Some(enabled);
        self
    }
}

pub struct Context {
    env: Environment,
    config: ContextConfig,
    access: Option<Box<dyn DataAccess>>,
    translator: SamplesTranslator,
    built_revision: Option<u64>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

impl Context {
    pub fn new(config: ContextConfig) -> Self {
        let env = Environment::new()
            .with_max_alias_hops(config.max_alias_hops)
            .with_alignment(config.alignment, config.interpolation);
        Self {
            env,
            config,
            access: None,
            translator: SamplesTranslator,
            built_revision: None,
        }
    }

    /// Builder method: set the data access layer
    pub fn with_data_access(mut self, access: impl DataAccess + 'static) -> Self {
        self.set_data_access(access);
        self
    }

    pub fn set_data_access(&mut self, access: impl DataAccess + 'static) {
        self.access = Some(Box::new(access));
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Drop every registered signal and alias
    pub fn reset(&mut self) -> &mut Self {
        self.env.clear();
        self.built_revision = None;
        self
    }

    /// Import table rows, handing each row's layout to `assort`
    ///
    /// Aliases of all rows are registered before any signal so that composite
    /// rows may refer to aliases declared further down the table.
    pub fn import_table<F>(&mut self, rows: &[TableRow], defaults: &TableDefaults, mut assort: F) -> Result<&mut Self>
    where
        F: FnMut(&SignalDescription),
    {
        log::info!("Importing {} table rows", rows.len());
        let parsed = rows
            .iter()
            .map(|row| parse_row(row, defaults))
            .collect::<Result<Vec<Vec<ParsedRow>>>>()?;

        log::info!("Registering aliases");
        for row in parsed.iter().flatten() {
            let uid = Environment::construct_uid(&row.source, &row.name, &row.params);
            self.env.add_alias(&row.alias, &uid);
        }

        log::info!("Registering signals");
        for (idx, group) in parsed.iter().enumerate() {
            log::debug!("Row: {}", idx);
            let Some(last) = group.last() else {
                continue;
            };
            if last.name.is_empty() {
                log::warn!("Skipping row {}: no variable name", idx);
                continue;
            }

            let mut signals = Vec::with_capacity(group.len());
            for row in group {
                let (uid, _) = self.env.add_signal(&row.source, &row.name, &row.params)?;
                if let Some(signal) = self.env.signal_mut(&uid) {
                    signal.axes = row.axes.clone();
                }
                signals.push(uid);
            }

            assort(&SignalDescription {
                signals,
                col_num: last.position.col,
                row_num: last.position.row,
                stack_num: last.position.stack,
                row_span: last.row_span,
                col_span: last.col_span,
                pulse_nb: last.params.pulse_nb,
                ts_start: last.params.ts_start,
                ts_end: last.params.ts_end,
            });
        }

        Ok(self)
    }

    /// Import table rows and collect their layouts
    pub fn import_rows(&mut self, rows: &[TableRow], defaults: &TableDefaults) -> Result<Vec<SignalDescription>> {
        let mut descriptions = Vec::new();
        self.import_table(rows, defaults, |d| descriptions.push(d.clone()))?;
        Ok(descriptions)
    }

    /// Rewrite every constituent placeholder onto the identifier it resolves to
    ///
    /// Skipped when the environment has not changed since the last build.
    /// Constituents that do not resolve yet keep their name.
    pub fn build(&mut self) -> Result<&mut Self> {
        if self.built_revision == Some(self.env.revision()) {
            log::debug!("Context map is up to date");
            return Ok(self);
        }

        log::info!("Building context map");
        for uid in self.env.signal_uids() {
            let Some(signal) = self.env.signal(&uid) else {
                continue;
            };
            let mut expression = signal.expression().to_string();
            for var_name in signal.var_names() {
                match self.env.resolve(&signal.source, var_name, &signal.params).map(|(k, _)| k) {
                    Ok(target) => {
                        expression = expression.replace(&placeholder(var_name), &placeholder(&target));
                        log::debug!("|==> replaced {} with {}", var_name, target);
                    }
                    Err(e) if e.is_unbound() => log::warn!("{}: constituent {} left unresolved ({})", uid, var_name, e),
                    Err(e) => return Err(e),
                }
            }
            if let Some(signal) = self.env.signal_mut(&uid) {
                signal.set_expression(expression);
            }
        }

        self.built_revision = Some(self.env.revision());
        Ok(self)
    }

    /// Fetch a base signal through the data access layer if it is stale
    ///
    /// Returns whether data was fetched. Without a data access layer this is
    /// a no-op.
    pub fn fetch(&mut self, uid: &str) -> Result<bool> {
        let Some(access) = self.access.as_mut() else {
            return Ok(false);
        };
        let signal = self
            .env
            .signal_mut(uid)
            .ok_or_else(|| ProcessingError::UnboundSignal(uid.to_string()))?;
        if !signal.needs_refresh() {
            return Ok(false);
        }

        let translator = &self.translator;
        let outcome = access
            .fetch(&signal.source, &signal.name, &signal.params)
            .and_then(|raw| translator.translate(raw, signal));
        match outcome {
            Ok(()) => Ok(true),
            Err(e) => {
                signal.mark_stale();
                Err(e)
            }
        }
    }

    /// Evaluate a registered signal and store the result in its buffers
    ///
    /// Constituents are evaluated first. `overrides` replace the parameters
    /// used for fetching while the evaluation runs; the stored parameters are
    /// restored afterwards. Expression failures are logged and leave the
    /// buffers untouched.
    pub fn evaluate_signal(
        &mut self,
        uid: &str,
        overrides: &SignalParams,
        handler: &mut UnboundHandler<'_>,
    ) -> Result<&mut Self> {
        self.build()?;
        log::info!("Evaluating signal: {}", uid);
        let fetch = self.config.fetch_on_demand;
        self.evaluate_uid(uid, overrides, fetch, handler, &mut HashSet::new())?;
        Ok(self)
    }

    fn evaluate_uid(
        &mut self,
        uid: &str,
        overrides: &SignalParams,
        fetch: bool,
        handler: &mut UnboundHandler<'_>,
        visiting: &mut HashSet<String>,
    ) -> Result<()> {
        if visiting.contains(uid) {
            return Err(ProcessingError::CyclicDefinition(uid.to_string()));
        }
        let signal = self
            .env
            .signal_mut(uid)
            .ok_or_else(|| ProcessingError::UnboundSignal(uid.to_string()))?;
        let identity = signal.params.clone();
        signal.params = identity.overlaid(overrides);

        visiting.insert(uid.to_string());
        let result = self.refresh_signal(uid, &identity, overrides, fetch, handler, visiting);
        visiting.remove(uid);

        if let Some(signal) = self.env.signal_mut(uid) {
            signal.params = identity;
        }
        result
    }

    fn refresh_signal(
        &mut self,
        uid: &str,
        identity: &SignalParams,
        overrides: &SignalParams,
        fetch: bool,
        handler: &mut UnboundHandler<'_>,
        visiting: &mut HashSet<String>,
    ) -> Result<()> {
        let (source, var_names, derived, expression) = {
            let signal = self
                .env
                .signal(uid)
                .ok_or_else(|| ProcessingError::UnboundSignal(uid.to_string()))?;
            (
                signal.source.clone(),
                signal.var_names().to_vec(),
                signal.is_composite() || signal.is_expression(),
                signal.expression().to_string(),
            )
        };

        let mut fallbacks = Vec::new();
        if derived {
            for var_name in var_names {
                match self.env.resolve(&source, &var_name, identity).map(|(k, _)| k) {
                    Ok(target) => self.evaluate_uid(&target, overrides, fetch, handler, visiting)?,
                    Err(e) if e.is_unbound() => {
                        log::warn!("{}", e);
                        if let Some(value) = handler(&e) {
                            fallbacks.push((var_name, value));
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        } else if fetch {
            self.fetch(uid)?;
        }

        if expression == placeholder(uid) {
            return Ok(());
        }

        let mut parser = Parser::with_limits(self.config.limits.clone());
        let outcome = parser.set_expression(&expression).and_then(|parser| {
            let names: Vec<String> = parser.var_names().map(str::to_string).collect();
            let mut bindings = Vec::with_capacity(names.len());
            for name in names {
                let key = if name == SELF_NAME { uid } else { name.as_str() };
                match self.env.resolve_key(key) {
                    Ok((_, signal)) => bindings.push((name, Value::from(signal.clone()))),
                    Err(e) if e.is_unbound() => {
                        if let Some(pos) = fallbacks.iter().position(|(n, _)| *n == name) {
                            let (n, value) = fallbacks.swap_remove(pos);
                            bindings.push((n, value));
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
            parser.substitute_var(bindings).eval_expr()?;
            Ok(parser.take_result())
        });

        match outcome {
            Ok(Some(Value::Signal(result))) => {
                if let Some(signal) = self.env.signal_mut(uid) {
                    result.copy_buffers_to(signal);
                }
            }
            Ok(Some(other)) => log::debug!("{} evaluated to a {}, buffers left untouched", uid, other.type_name()),
            Ok(None) => {}
            Err(e) if e.is_invalid_expression() || matches!(e, ProcessingError::InvalidVariable { .. }) => {
                log::error!("Failed to evaluate {}: {}", uid, e);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn lookup_placeholder(&self, name: &str, options: &EvalOptions) -> Result<String> {
        match self.env.resolve_key(name).map(|(k, _)| k) {
            Err(e) if e.is_unbound() => match &options.source {
                Some(source) => self.env.resolve(source, name, &options.params).map(|(k, _)| k),
                None => Err(e),
            },
            other => other,
        }
    }

    /// Evaluate a query expression
    ///
    /// Placeholders resolve as registry keys (identifiers or aliases, chased
    /// to the signal), then as names under `options.source`. Unresolved ones
    /// go to `handler`; those it does not substitute surface as
    /// [`ProcessingError::InvalidVariable`]. Parse and evaluation errors
    /// propagate, so an empty buffer always means a signal without data. The
    /// one exception is `${self}` without a valid self identifier, which
    /// yields an empty buffer.
    pub fn evaluate_expr(
        &mut self,
        expr: &str,
        options: &EvalOptions,
        handler: &mut UnboundHandler<'_>,
    ) -> Result<Value> {
        self.build()?;
        let fetch = options.fetch_on_demand.unwrap_or(self.config.fetch_on_demand);
        let self_hash = options.self_uid.as_deref().unwrap_or("");
        log::info!(
            "Evaluating '{}', self_signal_hash='{}', fetch_on_demand={}",
            expr,
            self_hash,
            fetch
        );

        let mut parser = Parser::with_limits(self.config.limits.clone());
        parser.set_expression(expr)?;
        if !parser.is_valid() {
            return Err(ProcessingError::malformed(format!(
                "Expression: {} is not a valid expression",
                expr
            )));
        }

        let self_uid = options
            .self_uid
            .as_deref()
            .filter(|uid| self.env.signal(uid).is_some())
            .map(str::to_string);
        if parser.key_of(SELF_NAME).is_some() && self_uid.is_none() {
            log::warn!(
                "The expression:'{}' uses 'self' but self_signal_hash:'{}' is invalid.",
                expr,
                self_hash
            );
            return Ok(Value::Buffer(Buffer::empty()));
        }

        let names: Vec<String> = parser.var_names().map(str::to_string).collect();
        let mut bindings = Vec::with_capacity(names.len());
        for name in names {
            log::debug!("var_name: {}", name);
            let is_self = name == SELF_NAME;
            let uid = match &self_uid {
                Some(uid) if is_self => uid.clone(),
                _ => match self.lookup_placeholder(&name, options) {
                    Ok(uid) => uid,
                    Err(e) if e.is_unbound() => {
                        log::warn!("{}", e);
                        if let Some(value) = handler(&e) {
                            bindings.push((name, value));
                        }
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            };

            if fetch {
                self.evaluate_uid(&uid, &options.overrides, fetch, handler, &mut HashSet::new())?;
            }
            if let Some(signal) = self.env.signal(&uid) {
                log::debug!("k: {} found!", uid);
                for line in signal.log_lines() {
                    log::trace!("{}", line);
                }
                bindings.push((name, Value::from(signal.clone())));
            }
        }

        parser.substitute_var(bindings);
        match parser.eval_expr() {
            Ok(parser) => Ok(parser.take_result().unwrap_or_else(|| Value::Buffer(Buffer::empty()))),
            Err(e) => {
                log::error!("Failed to evaluate '{}': {}", expr, e);
                Err(e)
            }
        }
    }

    /// Evaluate a query with default options and no unbound handler
    pub fn evaluate(&mut self, expr: &str) -> Result<Value> {
        self.evaluate_expr(expr, &EvalOptions::default(), &mut |_| None)
    }

    /// Evaluate a signal's x, y and z axis expressions with `self` bound to it
    pub fn get_data(&mut self, uid: &str) -> Result<[Value; 3]> {
        let (axes, options) = {
            let signal = self
                .env
                .signal(uid)
                .ok_or_else(|| ProcessingError::UnboundSignal(uid.to_string()))?;
            let options = EvalOptions::new()
                .with_self(uid)
                .with_source(signal.source.clone(), signal.params.clone());
            (signal.axes.clone(), options)
        };

        let mut no_handler = |_: &ProcessingError| None;
        let x = self.evaluate_expr(&axes.x, &options, &mut no_handler)?;
        let y = self.evaluate_expr(&axes.y, &options, &mut no_handler)?;
        let z = self.evaluate_expr(&axes.z, &options, &mut no_handler)?;
        Ok([x, y, z])
    }
}
