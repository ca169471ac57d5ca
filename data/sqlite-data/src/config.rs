///
/// Connection configuration.
///
/// Holds the pragma options applied every time a connection opens and the
/// user-defined routines replayed onto every fresh native handle. Pragma
/// options are `Option`s: `None` leaves the engine default untouched.
///
/// The pragma half can be loaded from TOML:
///
/// ```toml
/// foreign_keys = true
/// journal_mode = "wal"
/// synchronous = "normal"
/// ```
///
/// Routines are keyed by name (collations) or by name and arity (functions
/// and aggregates), compared case-insensitively. Registering an existing key
/// replaces the earlier entry and moves it to the end of the replay order.
///

use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::Result;
use crate::functions::{AggregateFunction, Arguments, Collation, FunctionFlags, NativeRoutine, ScalarFunction};
use crate::value::ToSql;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    Wal,
    Off,
}

impl JournalMode {
    pub fn keyword(&self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Persist => "PERSIST",
            JournalMode::Memory => "MEMORY",
            JournalMode::Wal => "WAL",
            JournalMode::Off => "OFF",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynchronousMode {
    Off,
    Normal,
    Full,
    Extra,
}

impl SynchronousMode {
    pub fn keyword(&self) -> &'static str {
        match self {
            SynchronousMode::Off => "OFF",
            SynchronousMode::Normal => "NORMAL",
            SynchronousMode::Full => "FULL",
            SynchronousMode::Extra => "EXTRA",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoVacuumMode {
    None,
    Full,
    Incremental,
}

impl AutoVacuumMode {
    pub fn keyword(&self) -> &'static str {
        match self {
            AutoVacuumMode::None => "NONE",
            AutoVacuumMode::Full => "FULL",
            AutoVacuumMode::Incremental => "INCREMENTAL",
        }
    }
}

pub(crate) fn foreign_keys_pragma(enabled: bool) -> String {
    format!("PRAGMA foreign_keys = {};", i32::from(enabled))
}

pub(crate) fn synchronous_pragma(mode: SynchronousMode) -> String {
    format!("PRAGMA synchronous = {};", mode.keyword())
}

pub(crate) fn auto_vacuum_pragma(mode: AutoVacuumMode) -> String {
    format!("PRAGMA auto_vacuum = {};", mode.keyword())
}

type RoutineKey = (String, i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Scalar,
    Aggregate,
}

/// Scalar functions and aggregates share the engine's `(name, arity)`
/// namespace, so both live in one map and the last registration wins.
#[derive(Clone)]
struct RegisteredFunction {
    kind: FunctionKind,
    routine: Rc<dyn NativeRoutine>,
}

#[derive(Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    pub foreign_keys: Option<bool>,
    pub recursive_triggers: Option<bool>,
    pub journal_mode: Option<JournalMode>,
    pub synchronous: Option<SynchronousMode>,
    pub auto_vacuum: Option<AutoVacuumMode>,
    pub automatic_index: Option<bool>,

    #[serde(skip)]
    collations: IndexMap<String, Rc<dyn NativeRoutine>>,
    #[serde(skip)]
    functions: IndexMap<RoutineKey, RegisteredFunction>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// The pragma statements applied on open, in application order.
    pub fn pragma_statements(&self) -> Vec<String> {
        let mut statements = Vec::new();
        if let Some(enabled) = self.foreign_keys {
            statements.push(foreign_keys_pragma(enabled));
        }
        if let Some(enabled) = self.recursive_triggers {
            statements.push(format!("PRAGMA recursive_triggers = {};", i32::from(enabled)));
        }
        if let Some(mode) = self.journal_mode {
            statements.push(format!("PRAGMA journal_mode = {};", mode.keyword()));
        }
        if let Some(mode) = self.synchronous {
            statements.push(synchronous_pragma(mode));
        }
        if let Some(mode) = self.auto_vacuum {
            statements.push(auto_vacuum_pragma(mode));
        }
        if let Some(enabled) = self.automatic_index {
            statements.push(format!("PRAGMA automatic_index = {};", i32::from(enabled)));
        }
        statements
    }

    pub fn add_collation<F>(&mut self, name: &str, compare: F)
    where
        F: Fn(&str, &str) -> Ordering + 'static,
    {
        self.add_collation_with_state(name, (), move |_, a, b| compare(a, b));
    }

    pub fn add_collation_with_state<S, F>(&mut self, name: &str, state: S, compare: F)
    where
        S: 'static,
        F: Fn(&S, &str, &str) -> Ordering + 'static,
    {
        let key = name.to_lowercase();
        self.collations.shift_remove(&key);
        let routine = Collation::new(name, move |a, b| compare(&state, a, b));
        self.collations.insert(key, Rc::new(routine));
    }

    pub fn remove_collation(&mut self, name: &str) -> bool {
        self.collations.shift_remove(&name.to_lowercase()).is_some()
    }

    pub fn add_function<S, R, F>(&mut self, name: &str, arity: i32, flags: FunctionFlags, state: S, function: F)
    where
        S: 'static,
        R: ToSql,
        F: Fn(&S, &Arguments<'_>) -> Result<R> + 'static,
    {
        let routine = ScalarFunction::new(name, arity, flags, state, function);
        self.register(name, arity, FunctionKind::Scalar, Rc::new(routine));
    }

    fn register(&mut self, name: &str, arity: i32, kind: FunctionKind, routine: Rc<dyn NativeRoutine>) {
        let key = (name.to_lowercase(), arity);
        self.functions.shift_remove(&key);
        self.functions.insert(key, RegisteredFunction { kind, routine });
    }

    /// Removes whatever routine is registered under `(name, arity)`, scalar
    /// or aggregate, as the engine does.
    pub fn remove_function(&mut self, name: &str, arity: i32) -> bool {
        self.functions
            .shift_remove(&(name.to_lowercase(), arity))
            .is_some()
    }

    pub fn add_aggregate<A, R, S, F>(
        &mut self,
        name: &str,
        arity: i32,
        flags: FunctionFlags,
        seed: A,
        step: S,
        finalize: F,
    ) where
        A: Clone + 'static,
        R: ToSql,
        S: Fn(A, &Arguments<'_>) -> Result<A> + 'static,
        F: Fn(A) -> Result<R> + 'static,
    {
        let routine = AggregateFunction::new(name, arity, flags, seed, step, finalize);
        self.register(name, arity, FunctionKind::Aggregate, Rc::new(routine));
    }

    pub fn remove_aggregate(&mut self, name: &str, arity: i32) -> bool {
        self.remove_function(name, arity)
    }

    pub fn collation_names(&self) -> Vec<&str> {
        self.collations.values().map(|routine| routine.name()).collect()
    }

    fn names_of(&self, kind: FunctionKind) -> Vec<(&str, i32)> {
        self.functions
            .iter()
            .filter(|(_, registered)| registered.kind == kind)
            .map(|((_, arity), registered)| (registered.routine.name(), *arity))
            .collect()
    }

    pub fn function_names(&self) -> Vec<(&str, i32)> {
        self.names_of(FunctionKind::Scalar)
    }

    pub fn aggregate_names(&self) -> Vec<(&str, i32)> {
        self.names_of(FunctionKind::Aggregate)
    }

    pub(crate) fn collation(&self, name: &str) -> Option<Rc<dyn NativeRoutine>> {
        self.collations.get(&name.to_lowercase()).cloned()
    }

    /// The scalar function or aggregate registered under `(name, arity)`.
    pub(crate) fn function(&self, name: &str, arity: i32) -> Option<Rc<dyn NativeRoutine>> {
        self.functions
            .get(&(name.to_lowercase(), arity))
            .map(|registered| Rc::clone(&registered.routine))
    }

    /// Every registered routine in replay order: collations, then functions
    /// and aggregates in registration order.
    pub(crate) fn routines(&self) -> Vec<Rc<dyn NativeRoutine>> {
        self.collations
            .values()
            .cloned()
            .chain(self.functions.values().map(|registered| Rc::clone(&registered.routine)))
            .collect()
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("foreign_keys", &self.foreign_keys)
            .field("recursive_triggers", &self.recursive_triggers)
            .field("journal_mode", &self.journal_mode)
            .field("synchronous", &self.synchronous)
            .field("auto_vacuum", &self.auto_vacuum)
            .field("automatic_index", &self.automatic_index)
            .field("collations", &self.collation_names())
            .field("functions", &self.function_names())
            .field("aggregates", &self.aggregate_names())
            .finish()
    }
}
