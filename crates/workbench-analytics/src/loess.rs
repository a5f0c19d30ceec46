//! Locally weighted linear regression over equally spaced samples.
//!
//! Samples sit at x = 0, 1, ..., n-1. Fits may be evaluated outside that
//! range, which the STL cycle-subseries step uses to extrapolate one period
//! at each end.

/// LOESS smoother with a fixed neighbourhood size.
#[derive(Debug, Clone, Copy)]
pub struct Loess {
    window: usize,
    jump: usize,
}

impl Loess {
    /// Create a smoother using the `window` nearest points per fit.
    ///
    /// Fits are computed every `jump` samples and linearly interpolated in
    /// between; `jump = 1` fits every point.
    pub fn new(window: usize, jump: usize) -> Self {
        Self {
            window: window.max(1),
            jump: jump.max(1),
        }
    }

    /// Default jump used by STL: a tenth of the window, rounded up.
    pub fn with_default_jump(window: usize) -> Self {
        Self::new(window, window.div_ceil(10))
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Smooth `y` in place of every sample, optionally with robustness weights.
    pub fn smooth(&self, y: &[f64], robustness: Option<&[f64]>) -> Vec<f64> {
        let n = y.len();
        if n < 2 {
            return y.to_vec();
        }

        let jump = self.jump.min(n - 1);
        let mut anchors: Vec<usize> = (0..n).step_by(jump).collect();
        if anchors.last() != Some(&(n - 1)) {
            anchors.push(n - 1);
        }

        let mut out = vec![0.0; n];
        for &i in &anchors {
            out[i] = self.fit_at(y, i as f64, robustness).unwrap_or(y[i]);
        }

        for pair in anchors.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if b - a < 2 {
                continue;
            }
            let slope = (out[b] - out[a]) / (b - a) as f64;
            for i in (a + 1)..b {
                out[i] = out[a] + slope * (i - a) as f64;
            }
        }

        out
    }

    /// Evaluate the local linear fit at `x0`.
    ///
    /// Returns `None` when every neighbour carries zero weight.
    pub fn fit_at(&self, y: &[f64], x0: f64, robustness: Option<&[f64]>) -> Option<f64> {
        let n = y.len();
        if n == 0 {
            return None;
        }
        let q = self.window.min(n);
        let last = (n - 1) as f64;

        let left = if x0 <= 0.0 {
            0
        } else if x0 >= last {
            n - q
        } else {
            let center = x0.round() as usize;
            center.saturating_sub(q / 2).min(n - q)
        };
        let right = left + q - 1;

        let mut h = (x0 - left as f64).abs().max((right as f64 - x0).abs());
        if self.window > n {
            h += ((self.window - n) / 2) as f64;
        }
        let h_hi = 0.999 * h;
        let h_lo = 0.001 * h;

        let mut weights = Vec::with_capacity(q);
        let mut total = 0.0;
        for j in left..=right {
            let r = (j as f64 - x0).abs();
            let mut w = if r <= h_lo {
                1.0
            } else if r <= h_hi {
                let u = r / h;
                (1.0 - u * u * u).powi(3)
            } else {
                0.0
            };
            if let Some(rw) = robustness {
                w *= rw[j];
            }
            total += w;
            weights.push(w);
        }

        if total <= 0.0 {
            return None;
        }
        for w in weights.iter_mut() {
            *w /= total;
        }

        if h > 0.0 {
            let mean_x: f64 = weights
                .iter()
                .enumerate()
                .map(|(k, w)| w * (left + k) as f64)
                .sum();
            let spread: f64 = weights
                .iter()
                .enumerate()
                .map(|(k, w)| {
                    let d = (left + k) as f64 - mean_x;
                    w * d * d
                })
                .sum();
            if spread.sqrt() > 0.001 * last {
                let b = (x0 - mean_x) / spread;
                for (k, w) in weights.iter_mut().enumerate() {
                    *w *= b * ((left + k) as f64 - mean_x) + 1.0;
                }
            }
        }

        Some(
            weights
                .iter()
                .enumerate()
                .map(|(k, w)| w * y[left + k])
                .sum(),
        )
    }
}

/// Trailing moving average; output has `len - window + 1` samples.
pub(crate) fn moving_average(data: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || data.len() < window {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len() - window + 1);
    let window_f64 = window as f64;

    let mut sum: f64 = data[..window].iter().sum();
    result.push(sum / window_f64);

    for i in window..data.len() {
        sum = sum - data[i - window] + data[i];
        result.push(sum / window_f64);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_data_is_reproduced() {
        let y: Vec<f64> = (0..50).map(|i| 2.0 + 0.5 * i as f64).collect();
        let smoothed = Loess::new(7, 1).smooth(&y, None);
        for (a, b) in y.iter().zip(&smoothed) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_extrapolation_follows_line() {
        let y: Vec<f64> = (0..10).map(|i| 1.0 + i as f64).collect();
        let loess = Loess::new(5, 1);
        let before = loess.fit_at(&y, -1.0, None).unwrap();
        let after = loess.fit_at(&y, 10.0, None).unwrap();
        assert!((before - 0.0).abs() < 1e-9);
        assert!((after - 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_jump_interpolation_close_to_full_fit() {
        let y: Vec<f64> = (0..200).map(|i| (i as f64 * 0.05).sin()).collect();
        let full = Loess::new(31, 1).smooth(&y, None);
        let jumped = Loess::new(31, 4).smooth(&y, None);
        for (i, (a, b)) in full.iter().zip(&jumped).enumerate() {
            if i % 4 == 0 || i == y.len() - 1 {
                assert_eq!(a, b);
            }
            // chord error over a 4-sample gap on sin(0.05 i) stays near 5e-3
            assert!((a - b).abs() < 1e-2, "index {}: {} vs {}", i, a, b);
        }
    }

    #[test]
    fn test_zero_weights_yield_none() {
        let y = vec![1.0, 2.0, 3.0];
        let rw = vec![0.0, 0.0, 0.0];
        assert!(Loess::new(3, 1).fit_at(&y, 1.0, Some(&rw)).is_none());
    }

    #[test]
    fn test_moving_average() {
        let ma = moving_average(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(ma, vec![2.0, 3.0, 4.0]);
        assert!(moving_average(&[1.0], 3).is_empty());
    }
}
