//! Event emission for the generation phase.
//!
//! During generation every evaluated sample is offered to an
//! [`EventSampler`], which decides by hit-or-miss against the recorded
//! maximum sampling weight whether the sample becomes an event. Accepted
//! events are handed to an [`EventSink`], whose implementation owns the
//! output format.

use crate::core::{AuxDiagnostics, RunStatistics};
use crate::error::SinkFault;
use std::sync::Mutex;

/// A single generated event.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// The sample point in region coordinates.
    pub x: Vec<f64>,
    /// The total weight of the sample. `1.0` for every accepted event in
    /// unweighted mode.
    pub weight: f64,
}

/// What an [`EventSink`] did with an offered event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EmitOutcome {
    /// The event was written and counts toward the generation target.
    Accepted,
    /// The sink rejected the event on its own validation and it does not
    /// count toward the target.
    RejectedValidation,
    /// The sink has already received its target number of events. The
    /// associated trial is retracted from the statistics.
    AlreadyComplete,
}

/// What became of a sample offered to an [`EventSampler`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrialOutcome {
    /// The sample became an event.
    Accepted,
    /// The sample failed the hit-or-miss test or its diagnostics. Nothing
    /// reached the sink.
    Miss,
    /// The sink rejected the event on its own validation; it does not count
    /// toward the target.
    RejectedValidation,
    /// The generation target had already been reached and the trial was
    /// retracted.
    AlreadyComplete,
}

/// Consumer of generated events.
///
/// `emit` is called under a lock, one event at a time, so implementations do
/// not need their own synchronization.
pub trait EventSink: Send + Sync {
    /// Offer one event to the sink.
    ///
    /// # Errors
    ///
    /// A [`SinkFault`] aborts the generation run.
    fn emit(&mut self, event: Event) -> Result<EmitOutcome, SinkFault>;
}

/// Sink that keeps all accepted events in memory.
#[derive(Debug, Default)]
pub struct VecSink {
    events: Vec<Event>,
}

impl VecSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// The accepted events, in acceptance order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Consume the sink, returning the accepted events.
    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

impl EventSink for VecSink {
    fn emit(&mut self, event: Event) -> Result<EmitOutcome, SinkFault> {
        self.events.push(event);
        Ok(EmitOutcome::Accepted)
    }
}

/// Shared hit-or-miss acceptance state for one generation run.
pub struct EventSampler<'a, S> {
    weighted: bool,
    target: u64,
    statistics: &'a Mutex<RunStatistics>,
    sink: &'a Mutex<S>,
}

impl<'a, S: EventSink> EventSampler<'a, S> {
    /// Create a sampler emitting at most `target` events into `sink`.
    pub fn new(
        weighted: bool,
        target: u64,
        statistics: &'a Mutex<RunStatistics>,
        sink: &'a Mutex<S>,
    ) -> Self {
        Self {
            weighted,
            target,
            statistics,
            sink,
        }
    }

    /// `true` once the sink has received its target number of events.
    pub fn complete(&self) -> bool {
        self.statistics.lock().unwrap().generated >= self.target
    }

    /// Offer one evaluated sample. `u` is the uniform acceptance draw in
    /// $[0, 1)$ belonging to this sample.
    ///
    /// Every call counts as a trial. In unweighted mode the sample is a hit
    /// when `u` falls below the ratio of its weight to the recorded maximum
    /// sampling weight; a weight above the maximum is counted as an overflow
    /// and the sample is dropped. In weighted mode every valid sample is
    /// accepted with its weight. A sample whose diagnostics force acceptance
    /// bypasses the hit-or-miss test.
    ///
    /// # Errors
    ///
    /// Propagates a [`SinkFault`] from the sink unchanged.
    pub fn offer(
        &self,
        x: &[f64],
        weight: f64,
        diagnostics: AuxDiagnostics,
        u: f64,
    ) -> Result<TrialOutcome, SinkFault> {
        let hit = {
            let mut statistics = self.statistics.lock().unwrap();
            statistics.trials += 1;

            let max = statistics.max_sampling_weight;
            let mut hit = u < (weight / max);

            if !self.weighted && weight > max {
                statistics.overflow += 1;
                hit = false;
            }

            hit
        };

        let valid = diagnostics.valid();
        let accept = (hit && valid) || (self.weighted && valid) || diagnostics.forced_accept;

        if !accept {
            return Ok(TrialOutcome::Miss);
        }

        let event = Event {
            x: x.to_vec(),
            weight: if self.weighted { weight } else { 1.0 },
        };

        // Sink before statistics, always in this order. The completeness
        // check and the emission must be one atomic step, otherwise two
        // workers could both push the final event.
        let mut sink = self.sink.lock().unwrap();

        {
            let mut statistics = self.statistics.lock().unwrap();

            if statistics.generated >= self.target {
                // this trial came too late, retract it
                statistics.trials -= 1;
                return Ok(TrialOutcome::AlreadyComplete);
            }
        }

        let outcome = sink.emit(event)?;

        let mut statistics = self.statistics.lock().unwrap();

        Ok(match outcome {
            EmitOutcome::Accepted => {
                statistics.generated += 1;
                TrialOutcome::Accepted
            }
            EmitOutcome::RejectedValidation => TrialOutcome::RejectedValidation,
            EmitOutcome::AlreadyComplete => {
                statistics.trials -= 1;
                TrialOutcome::AlreadyComplete
            }
        })
    }
}
