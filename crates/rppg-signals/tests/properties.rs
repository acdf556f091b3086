use ndarray::Array1;
use proptest::prelude::*;
use rppg_signals::dsp::{
    detrend, eliminate_motion, estimate_threshold, moving_average, CollageStrategy,
};
use rppg_signals::rppg::{chrominance_pulse, overlap_add_pulse};

fn signal(max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-100.0f64..100.0, 2..max_len)
}

proptest! {
    #[test]
    fn prop_detrend_keeps_length_and_removes_lines(
        slope in -5.0f64..5.0,
        offset in -50.0f64..50.0,
        n in 10usize..200,
    ) {
        let line: Array1<f64> = (0..n).map(|i| offset + slope * i as f64).collect();
        let out = detrend(&line, 300.0);
        prop_assert_eq!(out.len(), n);
        for v in out.iter() {
            prop_assert!(v.abs() < 1e-6 * (1.0 + slope.abs() * n as f64 + offset.abs()));
        }
    }

    #[test]
    fn prop_moving_average_stays_within_range(values in signal(200), window in 1usize..30) {
        let x = Array1::from(values.clone());
        let out = moving_average(&x, window);
        prop_assert_eq!(out.len(), x.len());
        // samples before the start count as zero
        let lo = values.iter().cloned().fold(0.0, f64::min);
        let hi = values.iter().cloned().fold(0.0, f64::max);
        for v in out.iter() {
            prop_assert!(*v >= lo - 1e-9 && *v <= hi + 1e-9);
        }
    }

    #[test]
    fn prop_threshold_is_one_of_the_inputs(
        stds in prop::collection::vec(0.0f64..10.0, 1..100),
        cutoff in 0.01f64..0.9,
    ) {
        let t = estimate_threshold(&stds, cutoff).unwrap();
        prop_assert!(stds.contains(&t));
    }

    #[test]
    fn prop_motion_elimination_output_is_whole_segments(
        values in signal(300),
        length in 2usize..20,
        threshold in 0.0f64..80.0,
    ) {
        let x = Array1::from(values);
        match eliminate_motion(&x, length, threshold, CollageStrategy::Corrected) {
            Ok(out) => {
                prop_assert_eq!(out.len() % length, 0);
                prop_assert!(out.len() <= x.len());
            }
            Err(_) => {}
        }
    }

    #[test]
    fn prop_chrominance_pulse_is_finite(x in signal(100), y in signal(100)) {
        let n = x.len().min(y.len());
        let x = Array1::from(x[..n].to_vec());
        let y = Array1::from(y[..n].to_vec());
        let pulse = chrominance_pulse(&x, &y);
        prop_assert_eq!(pulse.len(), n);
        prop_assert!(pulse.iter().all(|v| v.is_finite()));
        prop_assert_eq!(overlap_add_pulse(&x, &y, 8).len(), n);
    }
}
