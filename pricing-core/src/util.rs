/// Rounds to two decimal places, the precision of every monetary and percent
/// field in the response contract.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Produces `n` linearly spaced values over the closed interval
/// `[start, stop]`. The last value is pinned to `stop` so accumulated float
/// error never shortens the interval.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            let mut values: Vec<f64> = (0..n).map(|i| start + step * i as f64).collect();
            values[n - 1] = stop;
            values
        }
    }
}
