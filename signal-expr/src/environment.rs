//! Signal registry
//!
//! The [`Environment`] maps content-derived identifiers to signals and alias
//! names to other keys. Identifiers are SHA-256 digests of the identity tuple
//! `(source, name, pulse_nb, ts_start, ts_end, dec_samples)`, so the same
//! description always lands on the same entry.

use crate::alignment::{AlignmentMode, InterpolationKind};
use crate::parser::{Parser, MARKER_IN, MARKER_OUT};
use crate::signal::{Signal, SignalParams};
use crate::types::{ProcessingError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Default limit on alias hops before a chain is considered cyclic
pub const DEFAULT_MAX_ALIAS_HOPS: usize = 64;

/// A registry value: either a signal or the key it stands for
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Signal(Signal),
    Alias(String),
}

impl Entry {
    pub fn as_signal(&self) -> Option<&Signal> {
        match self {
            Entry::Signal(s) => Some(s),
            Entry::Alias(_) => None,
        }
    }

    pub fn as_alias(&self) -> Option<&str> {
        match self {
            Entry::Alias(target) => Some(target),
            Entry::Signal(_) => None,
        }
    }
}

/// One row of the registration table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    pub uid: String,
    pub source: String,
    pub name: String,
    #[serde(flatten)]
    pub params: SignalParams,
}

#[derive(Debug, Clone)]
pub struct Environment {
    entries: HashMap<String, Entry>,
    records: Vec<RegistrationRecord>,
    revision: u64,
    max_alias_hops: usize,
    alignment: AlignmentMode,
    interpolation: InterpolationKind,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            records: Vec::new(),
            revision: 0,
            max_alias_hops: DEFAULT_MAX_ALIAS_HOPS,
            alignment: AlignmentMode::default(),
            interpolation: InterpolationKind::default(),
        }
    }
}

fn feed(hasher: &mut Sha256, field: &[u8]) {
    hasher.update((field.len() as u64).to_le_bytes());
    hasher.update(field);
}

fn feed_opt(hasher: &mut Sha256, field: Option<i64>) {
    match field {
        Some(v) => {
            hasher.update([1u8]);
            hasher.update(v.to_le_bytes());
        }
        None => hasher.update([0u8]),
    }
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: limit the number of alias hops followed while resolving
    pub fn with_max_alias_hops(mut self, hops: usize) -> Self {
        self.max_alias_hops = hops;
        self
    }

    /// Builder method: alignment given to newly registered signals
    pub fn with_alignment(mut self, mode: AlignmentMode, kind: InterpolationKind) -> Self {
        self.alignment = mode;
        self.interpolation = kind;
        self
    }

    /// Deterministic identifier of a signal description
    ///
    /// Each field is length-prefixed (or tagged, for optional parameters) so
    /// that no two distinct tuples feed the hasher the same bytes.
    pub fn construct_uid(source: &str, name: &str, params: &SignalParams) -> String {
        let mut hasher = Sha256::new();
        feed(&mut hasher, source.as_bytes());
        feed(&mut hasher, name.as_bytes());
        feed_opt(&mut hasher, params.pulse_nb);
        feed_opt(&mut hasher, params.ts_start);
        feed_opt(&mut hasher, params.ts_end);
        feed_opt(&mut hasher, params.dec_samples);
        hex::encode(hasher.finalize())
    }

    /// Identifier of an existing signal, computed from its identity fields
    pub fn construct_uid_from_signal(signal: &Signal) -> String {
        Self::construct_uid(&signal.source, &signal.name, &signal.params)
    }

    /// Register a signal description, returning its identifier and signal
    ///
    /// An existing binding (direct or through aliases) wins. Names containing
    /// placeholders also register one base signal per constituent.
    pub fn add_signal(&mut self, source: &str, name: &str, params: &SignalParams) -> Result<(String, &Signal)> {
        let uid = self.register(source, name, params)?;
        let signal = self.signal(&uid).ok_or_else(|| ProcessingError::UnboundSignal(uid.clone()))?;
        Ok((uid, signal))
    }

    fn register(&mut self, source: &str, name: &str, params: &SignalParams) -> Result<String> {
        let mut parser = Parser::new();
        let name_is_expression = parser.set_expression(name).map(|p| p.is_valid()).unwrap_or(false);
        let expression = if name_is_expression || name.is_empty() {
            name.to_string()
        } else {
            let wrapped = format!("{}{}{}", MARKER_IN, name, MARKER_OUT);
            if !parser.set_expression(&wrapped)?.is_valid() {
                return Err(ProcessingError::malformed(format!("'{}' cannot be used as a variable name", name)));
            }
            wrapped
        };

        match self.resolve(source, name, params) {
            Ok((uid, _)) => return Ok(uid),
            Err(e) if e.is_unbound() => {}
            Err(e) => return Err(e),
        }

        // The signal is bound before its constituents, and constituent names
        // never contain placeholders, so registration is one level deep.
        // Composites that reach themselves through aliases are caught when
        // evaluated.
        let uid = Self::construct_uid(source, name, params);
        let mut signal = self.blank_signal(source, name, params);
        signal.set_expression(expression);
        if !name.is_empty() {
            signal.set_var_names(parser.var_names());
        }
        let var_names = signal.var_names().to_vec();
        let composite = signal.is_composite();
        self.finalize(uid.clone(), signal);

        self.register_constituents(source, params, &var_names, composite, name_is_expression)?;
        Ok(uid)
    }

    fn register_constituents(
        &mut self,
        source: &str,
        params: &SignalParams,
        var_names: &[String],
        composite: bool,
        name_is_expression: bool,
    ) -> Result<()> {
        for var_name in var_names {
            if self.is_alias(var_name) {
                continue;
            }
            if composite {
                self.register(source, var_name, params)?;
            } else if name_is_expression {
                // `${X}` stands for X itself
                let uid = Self::construct_uid(source, var_name, params);
                if self.signal(&uid).is_none() {
                    let mut inner = self.blank_signal(source, var_name, params);
                    inner.set_expression(format!("{}{}{}", MARKER_IN, var_name, MARKER_OUT));
                    inner.push_var_name(var_name.as_str());
                    self.finalize(uid, inner);
                }
                break;
            }
        }
        Ok(())
    }

    fn blank_signal(&self, source: &str, name: &str, params: &SignalParams) -> Signal {
        Signal::new(source, name)
            .with_params(params.clone())
            .with_alignment(self.alignment, self.interpolation)
    }

    fn finalize(&mut self, uid: String, signal: Signal) {
        log::debug!("Registered hash={} => {}", uid, signal);
        self.records.push(RegistrationRecord {
            uid: uid.clone(),
            source: signal.source.clone(),
            name: signal.name.clone(),
            params: signal.params.clone(),
        });
        self.entries.insert(uid, Entry::Signal(signal));
        self.revision += 1;
    }

    /// Map `alias` to `target`; empty aliases are ignored
    ///
    /// Redefining an alias, or aliasing a key that holds a signal, warns and
    /// overwrites it.
    pub fn add_alias(&mut self, alias: &str, target: &str) {
        if alias.is_empty() {
            return;
        }
        match self.entries.get(alias) {
            Some(Entry::Signal(signal)) => {
                log::warn!("Redefined {}. Loss of existing signal {}", alias, signal.name);
            }
            Some(Entry::Alias(existing)) if existing == target => return,
            Some(Entry::Alias(existing)) => {
                log::warn!("Redefined {}. Loss of existing {} => {}", alias, alias, existing);
            }
            None => log::debug!("Registered alias={} => uid={}", alias, target),
        }
        self.entries.insert(alias.to_string(), Entry::Alias(target.to_string()));
        self.revision += 1;
    }

    /// Follow alias entries from `start`, returning the terminal key and the hop count
    fn chase(&self, start: &str) -> Result<(String, usize)> {
        let mut key = start.to_string();
        let mut seen = HashSet::new();
        while let Some(Entry::Alias(target)) = self.entries.get(&key) {
            if !seen.insert(key.clone()) || seen.len() > self.max_alias_hops {
                return Err(ProcessingError::AliasCycle(start.to_string()));
            }
            log::trace!("{} -> {}", key, target);
            key = target.clone();
        }
        Ok((key, seen.len()))
    }

    /// Identifier a description resolves to
    ///
    /// The computed identifier wins when it is bound to a signal. Otherwise
    /// `name` is treated as a registry key and its aliases are followed.
    pub fn get_uid(&self, source: &str, name: &str, params: &SignalParams) -> Result<String> {
        let uid = Self::construct_uid(source, name, params);
        if matches!(self.entries.get(&uid), Some(Entry::Signal(_))) {
            return Ok(uid);
        }
        let (terminal, hops) = self.chase(name)?;
        Ok(if hops > 0 { terminal } else { uid })
    }

    /// Resolve a description to its bound signal
    pub fn resolve(&self, source: &str, name: &str, params: &SignalParams) -> Result<(String, &Signal)> {
        let uid = self.get_uid(source, name, params)?;
        match self.entries.get(&uid) {
            Some(Entry::Signal(signal)) => Ok((uid, signal)),
            _ => Err(ProcessingError::UnboundSignal(uid)),
        }
    }

    /// Resolve a registry key (identifier or alias) to its bound signal
    pub fn resolve_key(&self, key: &str) -> Result<(String, &Signal)> {
        let (terminal, _) = self.chase(key)?;
        match self.entries.get(&terminal) {
            Some(Entry::Signal(signal)) => Ok((terminal, signal)),
            _ => Err(ProcessingError::UnboundSignal(terminal)),
        }
    }

    /// Raw entry, without following aliases
    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn signal(&self, uid: &str) -> Option<&Signal> {
        self.entries.get(uid).and_then(Entry::as_signal)
    }

    pub fn signal_mut(&mut self, uid: &str) -> Option<&mut Signal> {
        match self.entries.get_mut(uid) {
            Some(Entry::Signal(signal)) => Some(signal),
            _ => None,
        }
    }

    pub fn is_alias(&self, key: &str) -> bool {
        matches!(self.entries.get(key), Some(Entry::Alias(_)))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Identifiers of every registered signal, sorted
    pub fn signal_uids(&self) -> Vec<String> {
        let mut uids: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.as_signal().is_some())
            .map(|(key, _)| key.clone())
            .collect();
        uids.sort();
        uids
    }

    /// Registration table, in registration order
    pub fn records(&self) -> &[RegistrationRecord] {
        &self.records
    }

    /// Counter bumped by every registration, alias change and clear
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.records.clear();
        self.revision += 1;
    }
}
