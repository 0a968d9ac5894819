//! Iteration recording.
//!
//! Solvers hand a snapshot of the model to every attached [`Recorder`]
//! after each iteration. Recorders only observe; nothing they do feeds back
//! into a solve.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::Model;

/// State of the model at one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSnapshot {
    /// Who recorded it, e.g. `root.nonlinear_solver` or `problem`.
    pub source: String,
    /// Global record counter.
    pub counter: usize,
    pub iteration: usize,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub success: bool,
    pub msg: String,
    pub abs_err: f64,
    pub rel_err: f64,
    pub input: BTreeMap<String, Vec<f64>>,
    pub output: BTreeMap<String, Vec<f64>>,
    pub residual: BTreeMap<String, Vec<f64>>,
}

/// Iteration metadata passed alongside the model.
#[derive(Debug, Clone)]
pub struct CaseInfo<'a> {
    pub source: &'a str,
    pub iteration: usize,
    pub abs_err: f64,
    pub rel_err: f64,
    pub success: bool,
    pub msg: &'a str,
}

impl IterationSnapshot {
    pub fn capture(model: &Model, counter: usize, info: &CaseInfo<'_>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            source: info.source.to_string(),
            counter,
            iteration: info.iteration,
            timestamp,
            success: info.success,
            msg: info.msg.to_string(),
            abs_err: info.abs_err,
            rel_err: info.rel_err,
            input: model.input_map(),
            output: model.output_map(),
            residual: model.residual_map(),
        }
    }
}

/// Sink for iteration snapshots.
pub trait Recorder: Send {
    fn record(&mut self, snapshot: &IterationSnapshot) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Keeps snapshots in memory. Clones share the same storage, so a handle
/// kept by the caller sees what the solver recorded.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    cases: Arc<Mutex<Vec<IterationSnapshot>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cases(&self) -> Vec<IterationSnapshot> {
        self.cases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.cases.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<IterationSnapshot> {
        self.cases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl Recorder for MemoryRecorder {
    fn record(&mut self, snapshot: &IterationSnapshot) -> Result<()> {
        self.cases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(snapshot.clone());
        Ok(())
    }
}

/// Writes one JSON object per snapshot and line.
#[derive(Debug)]
pub struct JsonLinesRecorder<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesRecorder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> Recorder for JsonLinesRecorder<W> {
    fn record(&mut self, snapshot: &IterationSnapshot) -> Result<()> {
        serde_json::to_writer(&mut self.writer, snapshot)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// The recorders attached to a problem.
#[derive(Default)]
pub struct Recorders {
    recorders: Vec<Box<dyn Recorder>>,
    counter: usize,
}

impl std::fmt::Debug for Recorders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorders")
            .field("len", &self.recorders.len())
            .field("counter", &self.counter)
            .finish()
    }
}

impl Recorders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, recorder: impl Recorder + 'static) {
        self.recorders.push(Box::new(recorder));
    }

    pub fn is_empty(&self) -> bool {
        self.recorders.is_empty()
    }

    /// Number of snapshots taken so far.
    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn record(&mut self, model: &Model, info: &CaseInfo<'_>) -> Result<()> {
        if self.recorders.is_empty() {
            return Ok(());
        }
        self.counter += 1;
        let snapshot = IterationSnapshot::capture(model, self.counter, info);
        for recorder in &mut self.recorders {
            recorder.record(&snapshot)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        for recorder in &mut self.recorders {
            recorder.flush()?;
        }
        Ok(())
    }
}
