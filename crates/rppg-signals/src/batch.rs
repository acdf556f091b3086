//! Batch processing over many sequences
//!
//! Sequences are independent: each one is a rayon task with its own frame
//! source, region state and deadline, reading a shared configuration.
//! Per-sequence failures never stop the batch; they become a
//! [`SequenceOutcome::Skipped`] or [`SequenceOutcome::Abandoned`] entry
//! according to [`RppgError::disposition`]. Configuration problems are
//! checked once before any sequence starts and abort the run.
//!
//! The Li pipeline without a configured motion threshold runs in two
//! phases: every sequence is brought to its illumination-rectified trace,
//! the threshold is estimated on the segment deviations of the whole
//! corpus, then every sequence is finished with it.

use ndarray::Array1;
use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::dsp::{estimate_threshold, BandpassFilter};
use crate::error::{Disposition, Result, RppgError};
use crate::pipeline::{
    estimate_heart_rate, run_sequence, Algorithm, Deadline, SequenceInput, SequenceResult,
};
use crate::rppg::{LiPulse, SsrPulse};

/// What happened to one sequence of a batch
#[derive(Debug, Clone)]
pub enum SequenceOutcome {
    Completed(SequenceResult),
    /// Not processed, or stopped by a recoverable condition
    Skipped { id: String, reason: String },
    /// Processing failed, no usable output
    Abandoned { id: String, reason: String },
}

impl SequenceOutcome {
    pub fn id(&self) -> &str {
        match self {
            SequenceOutcome::Completed(result) => &result.id,
            SequenceOutcome::Skipped { id, .. } | SequenceOutcome::Abandoned { id, .. } => id,
        }
    }

    /// Heart rate, for completed sequences
    pub fn bpm(&self) -> Option<f64> {
        match self {
            SequenceOutcome::Completed(result) => Some(result.bpm),
            _ => None,
        }
    }
}

/// Outcomes of a batch, in input order
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub outcomes: Vec<SequenceOutcome>,
    /// Motion threshold used by the Li pipeline, configured or estimated
    pub threshold: Option<f64>,
}

impl BatchReport {
    pub fn completed(&self) -> impl Iterator<Item = &SequenceResult> {
        self.outcomes.iter().filter_map(|o| match o {
            SequenceOutcome::Completed(result) => Some(result),
            _ => None,
        })
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, SequenceOutcome::Skipped { .. }))
            .count()
    }

    pub fn abandoned(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, SequenceOutcome::Abandoned { .. }))
            .count()
    }

    /// `(id, bpm)` for every sequence, `None` where there is no estimate
    pub fn estimates(&self) -> Vec<(String, Option<f64>)> {
        self.outcomes
            .iter()
            .map(|o| (o.id().to_string(), o.bpm()))
            .collect()
    }
}

/// Process `inputs` in parallel with the configured algorithm.
pub fn run_batch(config: &PipelineConfig, inputs: Vec<SequenceInput>) -> Result<BatchReport> {
    config.validate()?;
    preflight(config)?;

    match config.batch.threads {
        Some(threads) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| RppgError::InvalidParameter(format!("thread pool: {e}")))?;
            pool.install(|| dispatch(config, inputs))
        }
        None => dispatch(config, inputs),
    }
}

/// Surface parameter errors that only show up when an algorithm is built
fn preflight(config: &PipelineConfig) -> Result<()> {
    BandpassFilter::design_band(
        config.framerate,
        config.filter.order,
        config.filter.min_freq,
        config.filter.max_freq,
    )?;
    if config.algorithm == Algorithm::Ssr {
        SsrPulse::new(config)?;
    }
    Ok(())
}

fn dispatch(config: &PipelineConfig, inputs: Vec<SequenceInput>) -> Result<BatchReport> {
    log::info!(
        "processing {} sequences with {:?}",
        inputs.len(),
        config.algorithm
    );
    if config.algorithm == Algorithm::Li && config.li.threshold.is_none() {
        return run_li_corpus(config, inputs);
    }

    let outcomes = inputs
        .into_par_iter()
        .map(|mut input| {
            if let Some(skipped) = skip_existing(config, &input) {
                return Ok(skipped);
            }
            let result = run_sequence(config, &mut input);
            settle(&input.id, result.map(SequenceOutcome::Completed))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(BatchReport {
        outcomes,
        threshold: config.li.threshold.filter(|_| config.algorithm == Algorithm::Li),
    })
}

fn skip_existing(config: &PipelineConfig, input: &SequenceInput) -> Option<SequenceOutcome> {
    if input.output_exists && !config.batch.overwrite {
        log::info!("{}: output exists, skipping", input.id);
        return Some(SequenceOutcome::Skipped {
            id: input.id.clone(),
            reason: "output exists".to_string(),
        });
    }
    None
}

/// Turn a per-sequence failure into an outcome; fatal errors propagate.
fn settle(id: &str, result: Result<SequenceOutcome>) -> Result<SequenceOutcome> {
    let err = match result {
        Ok(outcome) => return Ok(outcome),
        Err(err) => err,
    };
    match err.disposition() {
        Disposition::Fatal => Err(err),
        Disposition::Skip => {
            log::warn!("{id}: skipped: {err}");
            Ok(SequenceOutcome::Skipped {
                id: id.to_string(),
                reason: err.to_string(),
            })
        }
        Disposition::AbandonSequence => {
            log::warn!("{id}: abandoned: {err}");
            Ok(SequenceOutcome::Abandoned {
                id: id.to_string(),
                reason: err.to_string(),
            })
        }
    }
}

/// A Li sequence stopped after illumination rectification
struct RectifiedTrace {
    id: String,
    rectified: Array1<f64>,
    stds: Array1<f64>,
    first_frame: usize,
    frames: usize,
    deadline: Deadline,
}

enum Phase {
    Done(SequenceOutcome),
    Pending(RectifiedTrace),
}

fn rectify(config: &PipelineConfig, input: &mut SequenceInput) -> Result<RectifiedTrace> {
    let deadline = Deadline::from_config(&config.batch);
    let li = LiPulse::new(config)?.with_deadline(deadline);
    let (start, end) = input.resolve_range(&config.range)?;
    let rectified = li.rectified_trace(input)?;
    if rectified.iter().any(|v| !v.is_finite()) {
        return Err(RppgError::NanInSignal(input.id.clone()));
    }
    let stds = li.segment_stds(&rectified)?;
    Ok(RectifiedTrace {
        id: input.id.clone(),
        rectified,
        stds,
        first_frame: start,
        frames: end - start,
        deadline,
    })
}

fn finish(config: &PipelineConfig, trace: &RectifiedTrace, threshold: f64) -> Result<SequenceResult> {
    let li = LiPulse::new(config)?.with_deadline(trace.deadline);
    let pulse = li.finish(
        &trace.id,
        &trace.rectified,
        threshold,
        trace.first_frame,
        trace.frames,
    )?;
    let bpm = estimate_heart_rate(config, &pulse.samples)?;
    log::info!("{}: heart rate {bpm:.1} BPM", trace.id);
    Ok(SequenceResult {
        id: trace.id.clone(),
        pulse,
        bpm,
    })
}

fn run_li_corpus(config: &PipelineConfig, inputs: Vec<SequenceInput>) -> Result<BatchReport> {
    let phases = inputs
        .into_par_iter()
        .map(|mut input| {
            if let Some(skipped) = skip_existing(config, &input) {
                return Ok(Phase::Done(skipped));
            }
            match rectify(config, &mut input) {
                Ok(trace) => Ok(Phase::Pending(trace)),
                Err(err) => settle(&input.id, Err(err)).map(Phase::Done),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let stds: Vec<f64> = phases
        .iter()
        .filter_map(|p| match p {
            Phase::Pending(trace) => Some(trace.stds.iter().copied()),
            Phase::Done(_) => None,
        })
        .flatten()
        .collect();
    let threshold = estimate_threshold(&stds, config.li.cutoff);
    match threshold {
        Some(t) => log::info!(
            "motion threshold {t:.4} from {} segments (cutoff {})",
            stds.len(),
            config.li.cutoff
        ),
        None => log::warn!("no segment deviations to estimate the motion threshold from"),
    }

    let outcomes = phases
        .into_par_iter()
        .map(|phase| match phase {
            Phase::Done(outcome) => Ok(outcome),
            Phase::Pending(trace) => {
                let result = match threshold {
                    Some(t) => finish(config, &trace, t),
                    None => Err(RppgError::NanInSignal(trace.id.clone())),
                };
                settle(&trace.id, result.map(SequenceOutcome::Completed))
            }
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(BatchReport {
        outcomes,
        threshold,
    })
}
