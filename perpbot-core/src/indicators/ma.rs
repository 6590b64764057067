//! Moving-average building blocks over raw `f64` series.
//!
//! Used by composed indicators (TVA, CVD). NaN-padded like the rest of the
//! numeric internals; conversion to `Option` happens at the `Indicator` edge.

/// Rolling simple mean. First valid value at index `period - 1`.
/// A window containing NaN yields NaN.
pub fn sma_of_series(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];

    if period == 0 || n < period {
        return result;
    }

    for i in (period - 1)..n {
        let window = &values[(i + 1 - period)..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        result[i] = window.iter().sum::<f64>() / period as f64;
    }

    result
}

/// Linearly weighted mean, newest value weighted `period`, oldest weighted 1.
pub fn wma_of_series(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];

    if period == 0 || n < period {
        return result;
    }

    let weight_sum = (period * (period + 1)) as f64 / 2.0;

    for i in (period - 1)..n {
        let window = &values[(i + 1 - period)..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        let weighted: f64 = window
            .iter()
            .enumerate()
            .map(|(k, v)| (k + 1) as f64 * v)
            .sum();
        result[i] = weighted / weight_sum;
    }

    result
}

/// Exponential smoothing with `alpha = 2 / (span + 1)`, seeded with the first
/// value. Every output is defined from index 0; callers mask the warm-up.
/// NaN input taints the rest of the series.
pub fn ema_by_span(values: &[f64], span: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];

    if n == 0 || span == 0 {
        return result;
    }

    let alpha = 2.0 / (span as f64 + 1.0);
    let mut prev = values[0];
    if prev.is_nan() {
        return result;
    }
    result[0] = prev;

    for i in 1..n {
        if values[i].is_nan() {
            return result;
        }
        let ema = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = ema;
        prev = ema;
    }

    result
}
