use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::models::Session;

/// One labeled time series, ready for the renderer. Points keep the
/// repository's timestamp-ascending order.
#[derive(Debug, Clone)]
pub struct LabeledSeries {
    pub label: String,
    pub points: Vec<(DateTime<Utc>, f64)>,
}

impl LabeledSeries {
    pub fn new(label: &str, points: Vec<(DateTime<Utc>, f64)>) -> Self {
        Self {
            label: label.to_string(),
            points,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryStats {
    pub min: f64,
    pub mean: f64,
    pub max: f64,
}

/// Arithmetic mean of one extracted column per session. Sessions with no
/// rows are absent from the result, never zero-filled; rows with an unknown
/// session code are skipped. The BTreeMap iterates in the fixed
/// morning/day/evening order.
pub fn session_means<T>(
    rows: &[T],
    session_of: impl Fn(&T) -> i16,
    value_of: impl Fn(&T) -> f64,
) -> BTreeMap<Session, f64> {
    let mut sums: BTreeMap<Session, (f64, usize)> = BTreeMap::new();

    for row in rows {
        let Some(session) = Session::from_code(session_of(row)) else {
            continue;
        };
        let entry = sums.entry(session).or_insert((0.0, 0));
        entry.0 += value_of(row);
        entry.1 += 1;
    }

    sums.into_iter()
        .map(|(session, (sum, count))| (session, sum / count as f64))
        .collect()
}

/// Convert (epoch-ms, value) rows into chart-ready points, preserving input
/// order. Timestamps outside chrono's representable range are skipped.
pub fn time_points<T>(
    rows: &[T],
    timestamp_of: impl Fn(&T) -> i64,
    value_of: impl Fn(&T) -> f64,
) -> Vec<(DateTime<Utc>, f64)> {
    rows.iter()
        .filter_map(|row| {
            DateTime::<Utc>::from_timestamp_millis(timestamp_of(row))
                .map(|at| (at, value_of(row)))
        })
        .collect()
}

/// Overlay assembly for the two-source views: each non-empty candidate
/// contributes one labeled series, so one empty source degrades to a
/// single-series chart. `None` when every source is empty — the caller
/// reports not-found instead of rendering.
pub fn overlay_sources(candidates: Vec<LabeledSeries>) -> Option<Vec<LabeledSeries>> {
    let kept: Vec<LabeledSeries> = candidates
        .into_iter()
        .filter(|series| !series.points.is_empty())
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept)
    }
}

pub fn summary_stats(values: &[f64]) -> Option<SummaryStats> {
    if values.is_empty() {
        return None;
    }

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    for &value in values {
        min = min.min(value);
        max = max.max(value);
        sum += value;
    }

    Some(SummaryStats {
        min,
        mean: sum / values.len() as f64,
        max,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NlpRow;

    fn nlp_row(session: i16, timestamp: i64, alpha: f64) -> NlpRow {
        NlpRow {
            individual_number: "P-001".to_string(),
            expedition_id: Some(1),
            session,
            timestamp,
            alpha,
            beta: 0.0,
            theta: 0.0,
            delta: 0.0,
            smr: 0.0,
        }
    }

    #[test]
    fn means_average_within_sessions_and_omit_missing_ones() {
        let rows = vec![
            nlp_row(1, 10, 2.0),
            nlp_row(1, 20, 4.0),
            nlp_row(2, 30, 10.0),
        ];

        let means = session_means(&rows, |r| r.session, |r| r.alpha);
        assert_eq!(means.get(&Session::Morning), Some(&3.0));
        assert_eq!(means.get(&Session::Day), Some(&10.0));
        // evening is absent, not zero
        assert_eq!(means.get(&Session::Evening), None);
        assert_eq!(means.len(), 2);
    }

    #[test]
    fn means_do_not_depend_on_row_order() {
        let forward = vec![
            nlp_row(3, 10, 1.0),
            nlp_row(1, 20, 5.0),
            nlp_row(2, 30, 9.0),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let a = session_means(&forward, |r| r.session, |r| r.alpha);
        let b = session_means(&reversed, |r| r.session, |r| r.alpha);
        assert_eq!(a, b);
    }

    #[test]
    fn means_iterate_in_fixed_session_order() {
        let rows = vec![
            nlp_row(3, 10, 1.0),
            nlp_row(1, 20, 2.0),
            nlp_row(2, 30, 3.0),
        ];

        let means = session_means(&rows, |r| r.session, |r| r.alpha);
        let order: Vec<Session> = means.keys().copied().collect();
        assert_eq!(order, vec![Session::Morning, Session::Day, Session::Evening]);
    }

    #[test]
    fn unknown_session_codes_are_skipped() {
        let rows = vec![nlp_row(1, 10, 2.0), nlp_row(9, 20, 100.0)];
        let means = session_means(&rows, |r| r.session, |r| r.alpha);
        assert_eq!(means.get(&Session::Morning), Some(&2.0));
        assert_eq!(means.len(), 1);
    }

    #[test]
    fn time_points_preserve_order() {
        let rows = vec![
            nlp_row(1, 1_000, 1.0),
            nlp_row(1, 2_000, 2.0),
            nlp_row(1, 3_000, 3.0),
        ];

        let points = time_points(&rows, |r| r.timestamp, |r| r.alpha);
        assert_eq!(points.len(), 3);
        assert!(points.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(points[0].1, 1.0);
        assert_eq!(points[2].1, 3.0);
    }

    #[test]
    fn overlay_with_both_sources_empty_is_none() {
        let candidates = vec![
            LabeledSeries::new("Fatigue (physiological)", vec![]),
            LabeledSeries::new("Fatigue (productivity)", vec![]),
        ];
        assert!(overlay_sources(candidates).is_none());
    }

    #[test]
    fn overlay_keeps_only_the_first_source_when_second_is_empty() {
        let rows = vec![nlp_row(1, 1_000, 0.4)];
        let candidates = vec![
            LabeledSeries::new(
                "Fatigue (physiological)",
                time_points(&rows, |r| r.timestamp, |r| r.alpha),
            ),
            LabeledSeries::new("Fatigue (productivity)", vec![]),
        ];

        let kept = overlay_sources(candidates).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].label, "Fatigue (physiological)");
    }

    #[test]
    fn overlay_keeps_only_the_second_source_when_first_is_empty() {
        let rows = vec![nlp_row(2, 2_000, 0.6)];
        let candidates = vec![
            LabeledSeries::new("Fatigue (physiological)", vec![]),
            LabeledSeries::new(
                "Fatigue (productivity)",
                time_points(&rows, |r| r.timestamp, |r| r.alpha),
            ),
        ];

        let kept = overlay_sources(candidates).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].label, "Fatigue (productivity)");
    }

    #[test]
    fn overlay_keeps_both_sources_in_order() {
        let rows = vec![nlp_row(1, 1_000, 0.4)];
        let points = time_points(&rows, |r| r.timestamp, |r| r.alpha);
        let candidates = vec![
            LabeledSeries::new("Concentration (physiological)", points.clone()),
            LabeledSeries::new("Concentration (productivity)", points),
        ];

        let kept = overlay_sources(candidates).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].label, "Concentration (physiological)");
        assert_eq!(kept[1].label, "Concentration (productivity)");
    }

    #[test]
    fn summary_stats_match_heart_rate_example() {
        let stats = summary_stats(&[58.0, 72.0, 110.0]).unwrap();
        assert_eq!(stats.min, 58.0);
        assert_eq!(stats.mean, 80.0);
        assert_eq!(stats.max, 110.0);
    }

    #[test]
    fn summary_stats_empty_input_is_none() {
        assert_eq!(summary_stats(&[]), None);
    }
}
