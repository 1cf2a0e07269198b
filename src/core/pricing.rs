use crate::models::{
    CandidateProperty, PpsfBandCounts, PricingSummary, Strategy, SubjectComparison, SubjectProperty, ValueStats,
};

/// Minimum PPSF sample size before outlier trimming is attempted
const TRIM_MIN_COUNT: usize = 4;

/// Tukey fence multiplier
const TRIM_FENCE: f64 = 1.5;

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn sorted_finite(values: impl IntoIterator<Item = f64>) -> Vec<f64> {
    let mut values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    values.sort_by(f64::total_cmp);
    values
}

/// Percentile of an ascending series, linearly interpolated between
/// order statistics. `p` is in [0, 1].
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

pub fn median(sorted: &[f64]) -> Option<f64> {
    percentile(sorted, 0.5)
}

/// Percent difference of `value` from `base`; `None` when `base` is zero
pub fn percent_deviation(value: f64, base: f64) -> Option<f64> {
    if base == 0.0 || !base.is_finite() {
        return None;
    }
    Some((value - base) / base * 100.0)
}

/// Descriptive statistics for a series (any order)
pub fn value_stats(values: &[f64]) -> ValueStats {
    let sorted = sorted_finite(values.iter().copied());
    let n = sorted.len();
    if n == 0 {
        return ValueStats::default();
    }

    let mean = sorted.iter().sum::<f64>() / n as f64;
    let variance = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
    let std_dev = variance.sqrt();
    let p25 = percentile(&sorted, 0.25);
    let p75 = percentile(&sorted, 0.75);
    let min = sorted[0];
    let max = sorted[n - 1];

    ValueStats {
        count: n,
        mean: Some(round2(mean)),
        median: median(&sorted).map(round2),
        min: Some(round2(min)),
        max: Some(round2(max)),
        p25: p25.map(round2),
        p75: p75.map(round2),
        iqr: p25.zip(p75).map(|(lo, hi)| round2(hi - lo)),
        range: Some(round2(max - min)),
        std_dev: Some(round2(std_dev)),
        cv: if mean != 0.0 { Some((std_dev / mean * 1000.0).round() / 1000.0) } else { None },
    }
}

fn compare_subject(value: Option<f64>, stats: &ValueStats) -> Option<SubjectComparison> {
    let value = value?;
    if stats.count == 0 {
        return None;
    }

    Some(SubjectComparison {
        diff_vs_median: stats.median.map(|m| round2(value - m)),
        pct_vs_median: stats.median.and_then(|m| percent_deviation(value, m)).map(round2),
        diff_vs_mean: stats.mean.map(|m| round2(value - m)),
        pct_vs_mean: stats.mean.and_then(|m| percent_deviation(value, m)).map(round2),
    })
}

/// Percent of comps (with a known flag) whose flag equals the subject's
fn match_rate(subject: Option<bool>, comps: impl Iterator<Item = Option<bool>>) -> Option<f64> {
    let subject = subject?;
    let known: Vec<bool> = comps.flatten().collect();
    if known.is_empty() {
        return None;
    }
    let matching = known.iter().filter(|flag| **flag == subject).count();
    Some(round2(matching as f64 / known.len() as f64 * 100.0))
}

/// Median PPSF after dropping values outside the Tukey fences, when that drops anything
fn trimmed_median(ppsf: &[f64], stats: &ValueStats) -> Option<f64> {
    if stats.count < TRIM_MIN_COUNT {
        return None;
    }
    let sorted = sorted_finite(ppsf.iter().copied());
    let q1 = percentile(&sorted, 0.25)?;
    let q3 = percentile(&sorted, 0.75)?;
    let fence = TRIM_FENCE * (q3 - q1);

    let trimmed: Vec<f64> = sorted.iter().copied().filter(|x| *x >= q1 - fence && *x <= q3 + fence).collect();
    if trimmed.is_empty() || trimmed.len() == sorted.len() {
        return None;
    }
    median(&trimmed).map(round2)
}

/// Pricing statistics over the ranked comparables.
///
/// Comps without a value under `strategy` are skipped. With no usable
/// values, the summary carries `count = 0` and no median or deviation.
pub fn summarize<'a, I>(subject: &SubjectProperty, comps: I, strategy: Strategy) -> PricingSummary
where
    I: IntoIterator<Item = &'a CandidateProperty>,
{
    let comps: Vec<&CandidateProperty> = comps.into_iter().collect();

    let values: Vec<f64> = comps.iter().filter_map(|c| c.value(strategy)).collect();
    let ppsf: Vec<f64> = comps.iter().filter_map(|c| c.value_per_sqft(strategy)).collect();

    let ppsf_stats = value_stats(&ppsf);
    let values_summary = value_stats(&values);

    let subject_value = subject.value(strategy);
    let subject_ppsf = subject.value_per_sqft(strategy).map(round2);

    let subject_deviation_pct = match (subject_value, values_summary.median) {
        (Some(value), Some(median)) => percent_deviation(value, median).map(round2),
        _ => None,
    };

    let ppsf_band_counts = subject_ppsf.filter(|_| !ppsf.is_empty()).map(|base| {
        let within = |pct: f64| {
            let (lo, hi) = (base * (1.0 - pct), base * (1.0 + pct));
            ppsf.iter().filter(|x| **x >= lo && **x <= hi).count()
        };
        PpsfBandCounts {
            within_5pct: within(0.05),
            within_10pct: within(0.10),
            within_15pct: within(0.15),
        }
    });

    PricingSummary {
        strategy,
        count: values_summary.count,
        median: values_summary.median,
        p25: values_summary.p25,
        p75: values_summary.p75,
        subject_value,
        subject_deviation_pct,
        subject_ppsf,
        subject_vs_value: compare_subject(subject_value, &values_summary),
        subject_vs_ppsf: compare_subject(subject_ppsf, &ppsf_stats),
        ppsf_band_counts,
        pool_match_rate: match_rate(subject.has_pool, comps.iter().map(|c| c.has_pool)),
        garage_match_rate: match_rate(subject.has_garage(), comps.iter().map(|c| c.has_garage())),
        trimmed_ppsf_median: trimmed_median(&ppsf, &ppsf_stats),
        value_stats: values_summary,
        ppsf_stats,
    }
}
