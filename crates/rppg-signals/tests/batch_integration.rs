mod common;

use common::{config, sequence, PULSE_BPM};
use rppg_signals::{run_batch, Algorithm, PerformanceSummary, SequenceOutcome};

#[test]
fn test_li_batch_estimates_corpus_threshold() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut config = config(Algorithm::Li);
    config.batch.threads = Some(2);
    let inputs = vec![sequence("a", 300), sequence("b", 360)];

    let report = run_batch(&config, inputs).unwrap();
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.completed().count(), 2);
    let threshold = report.threshold.unwrap();
    assert!(threshold.is_finite() && threshold > 0.0);
    assert_eq!(report.outcomes[0].id(), "a");
    assert_eq!(report.outcomes[1].id(), "b");
}

#[test]
fn test_li_batch_keeps_configured_threshold() {
    let mut config = config(Algorithm::Li);
    config.li.threshold = Some(1e6);
    let report = run_batch(&config, vec![sequence("a", 300)]).unwrap();
    assert_eq!(report.threshold, Some(1e6));
    let result = report.completed().next().unwrap();
    // nothing pruned: ten full segments
    assert_eq!(result.pulse.len(), 300);
}

#[test]
fn test_failures_are_isolated() {
    let config = config(Algorithm::Chrom);
    let mut done = sequence("done", 300);
    done.output_exists = true;
    let inputs = vec![
        sequence("ok", 300),
        sequence("short", 50),
        done,
        sequence("ok-2", 300),
    ];

    let report = run_batch(&config, inputs).unwrap();
    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.completed().count(), 2);
    assert_eq!(report.skipped(), 2);
    assert_eq!(report.abandoned(), 0);
    assert!(matches!(
        &report.outcomes[1],
        SequenceOutcome::Skipped { id, .. } if id == "short"
    ));

    let pairs: Vec<(Option<f64>, f64)> = report
        .estimates()
        .into_iter()
        .map(|(_, bpm)| (bpm, PULSE_BPM))
        .collect();
    let summary = PerformanceSummary::compute(pairs).unwrap();
    assert_eq!(summary.count, 2);
    assert_eq!(summary.excluded, 2);
    assert!(summary.rmse < 5.0);
    assert!(summary.mean_error_rate < 0.07);
}

#[test]
fn test_overwrite_processes_existing_outputs() {
    let mut config = config(Algorithm::Chrom);
    config.batch.overwrite = true;
    let mut input = sequence("again", 300);
    input.output_exists = true;
    let report = run_batch(&config, vec![input]).unwrap();
    assert_eq!(report.completed().count(), 1);
}

#[test]
fn test_zero_timeout_abandons() {
    let mut config = config(Algorithm::Ssr);
    config.batch.timeout_ms = Some(0);
    let report = run_batch(&config, vec![sequence("slow", 300)]).unwrap();
    assert_eq!(report.abandoned(), 1);
}
