//! Seasonal-Trend decomposition using LOESS.
//!
//! Follows Cleveland, Cleveland, McRae & Terpenning (1990): an inner loop
//! alternating cycle-subseries smoothing and trend smoothing, wrapped in an
//! outer loop that downweights outliers with bisquare robustness weights.

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median};
use workbench_core::{WorkbenchError, WorkbenchResult};

use crate::loess::{moving_average, Loess};

/// Fewest samples a decomposition is attempted on.
pub const MIN_SAMPLES: usize = 12;

/// Smallest season length accepted.
pub const MIN_PERIOD: usize = 3;

/// Season length actually used for `n` samples.
///
/// The requested period is capped at half the sample count so every
/// cycle-subseries holds at least two points.
pub fn effective_period(base: usize, n: usize) -> usize {
    base.min(n / 2).max(MIN_PERIOD)
}

/// Decomposition parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StlParams {
    pub period: usize,
    pub seasonal: usize,
    pub trend: usize,
    pub low_pass: usize,
    pub inner_iterations: usize,
    pub outer_iterations: usize,
}

/// Smallest odd integer `>= x`.
fn next_odd(x: f64) -> usize {
    let v = x.ceil().max(1.0) as usize;
    if v % 2 == 0 {
        v + 1
    } else {
        v
    }
}

impl StlParams {
    /// Defaults for a season length, robust fitting on.
    pub fn new(period: usize) -> Self {
        let seasonal = 7;
        let trend = next_odd(1.5 * period as f64 / (1.0 - 1.5 / seasonal as f64)).max(3);
        let low_pass = next_odd(period as f64 + 1.0).max(3);
        Self {
            period,
            seasonal,
            trend,
            low_pass,
            inner_iterations: 2,
            outer_iterations: 15,
        }
    }

    /// Turn robust fitting on or off.
    pub fn robust(mut self, robust: bool) -> Self {
        if robust {
            self.inner_iterations = 2;
            self.outer_iterations = 15;
        } else {
            self.inner_iterations = 5;
            self.outer_iterations = 0;
        }
        self
    }

    pub fn seasonal_window(mut self, window: usize) -> Self {
        self.seasonal = next_odd(window.max(3) as f64);
        self
    }
}

/// Components of a decomposition, each as long as the input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StlOutput {
    pub trend: Vec<f64>,
    pub seasonal: Vec<f64>,
    pub resid: Vec<f64>,
    /// Final robustness weights, all 1.0 for a non-robust fit
    pub weights: Vec<f64>,
}

impl StlOutput {
    pub fn len(&self) -> usize {
        self.trend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trend.is_empty()
    }
}

/// STL decomposer.
#[derive(Debug, Clone)]
pub struct Stl {
    params: StlParams,
}

impl Stl {
    /// Robust STL with default windows for `period`.
    pub fn new(period: usize) -> Self {
        Self {
            params: StlParams::new(period),
        }
    }

    pub fn with_params(params: StlParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &StlParams {
        &self.params
    }

    /// Decompose `y` into trend, seasonal and residual parts.
    pub fn fit(&self, y: &[f64]) -> WorkbenchResult<StlOutput> {
        let n = y.len();
        let np = self.params.period;

        if np < MIN_PERIOD {
            return Err(WorkbenchError::InvalidArgument(format!(
                "period must be >= {}, got {}",
                MIN_PERIOD, np
            )));
        }
        if n < MIN_SAMPLES.max(2 * np) {
            return Err(WorkbenchError::Insufficient {
                required: MIN_SAMPLES.max(2 * np),
                available: n,
            });
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(WorkbenchError::InvalidArgument(
                "series contains non-finite values".to_string(),
            ));
        }

        let robust = self.params.outer_iterations > 0;
        let mut weights = vec![1.0; n];
        let mut trend = vec![0.0; n];
        let mut seasonal = vec![0.0; n];

        let passes = self.params.outer_iterations + 1;
        for pass in 0..passes {
            let rw = if pass == 0 { None } else { Some(weights.as_slice()) };
            for _ in 0..self.params.inner_iterations.max(1) {
                self.inner_step(y, rw, &mut trend, &mut seasonal);
            }
            if robust {
                let resid: Vec<f64> = (0..n).map(|i| y[i] - trend[i] - seasonal[i]).collect();
                weights = robustness_weights(&resid);
            }
        }

        let resid = (0..n).map(|i| y[i] - trend[i] - seasonal[i]).collect();
        Ok(StlOutput {
            trend,
            seasonal,
            resid,
            weights,
        })
    }

    fn inner_step(&self, y: &[f64], rw: Option<&[f64]>, trend: &mut [f64], seasonal: &mut [f64]) {
        let n = y.len();
        let np = self.params.period;

        let detrended: Vec<f64> = y.iter().zip(trend.iter()).map(|(v, t)| v - t).collect();

        // Cycle-subseries smoothing, extended one period at each end.
        let cycle = self.smooth_subseries(&detrended, rw);

        // Low-pass filter of the cycle series.
        let ma = moving_average(&cycle, np);
        let ma = moving_average(&ma, np);
        let ma = moving_average(&ma, 3);
        let low = Loess::with_default_jump(self.params.low_pass).smooth(&ma, None);

        for i in 0..n {
            seasonal[i] = cycle[np + i] - low[i];
        }

        let deseasonalized: Vec<f64> = y.iter().zip(seasonal.iter()).map(|(v, s)| v - s).collect();
        let smoothed = Loess::with_default_jump(self.params.trend).smooth(&deseasonalized, rw);
        trend.copy_from_slice(&smoothed);
    }

    /// Returns a series of length `n + 2 * period`.
    fn smooth_subseries(&self, detrended: &[f64], rw: Option<&[f64]>) -> Vec<f64> {
        let n = detrended.len();
        let np = self.params.period;
        let loess = Loess::with_default_jump(self.params.seasonal);
        let mut cycle = vec![0.0; n + 2 * np];

        for j in 0..np {
            let sub: Vec<f64> = detrended.iter().skip(j).step_by(np).copied().collect();
            if sub.is_empty() {
                continue;
            }
            let sub_w: Option<Vec<f64>> =
                rw.map(|w| w.iter().skip(j).step_by(np).copied().collect());
            let sub_w = sub_w.as_deref();
            let k = sub.len();

            let smoothed = loess.smooth(&sub, sub_w);
            let before = loess.fit_at(&sub, -1.0, sub_w).unwrap_or(smoothed[0]);
            let after = loess.fit_at(&sub, k as f64, sub_w).unwrap_or(smoothed[k - 1]);

            cycle[j] = before;
            for (m, v) in smoothed.iter().enumerate() {
                cycle[(m + 1) * np + j] = *v;
            }
            cycle[(k + 1) * np + j] = after;
        }

        cycle
    }
}

/// Bisquare weights on residuals scaled by six median absolute residuals.
fn robustness_weights(resid: &[f64]) -> Vec<f64> {
    let abs: Vec<f64> = resid.iter().map(|r| r.abs()).collect();
    let h = 6.0 * Data::new(abs.clone()).median();
    if !h.is_finite() || h <= 0.0 {
        return vec![1.0; resid.len()];
    }

    let lo = 0.001 * h;
    let hi = 0.999 * h;
    abs.iter()
        .map(|&r| {
            if r <= lo {
                1.0
            } else if r <= hi {
                let u = r / h;
                (1.0 - u * u).powi(2)
            } else {
                0.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn seasonal_series(n: usize, period: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let t = i as f64;
                10.0 + 0.01 * t + (2.0 * PI * t / period as f64).sin()
            })
            .collect()
    }

    #[test]
    fn test_default_windows() {
        let p = StlParams::new(12);
        assert_eq!(p.seasonal, 7);
        assert_eq!(p.trend, 23);
        assert_eq!(p.low_pass, 13);

        let p = StlParams::new(24);
        assert_eq!(p.low_pass, 25);
        assert_eq!(p.trend % 2, 1);
    }

    #[test]
    fn test_effective_period() {
        assert_eq!(effective_period(24, 500), 24);
        assert_eq!(effective_period(24, 30), 15);
        assert_eq!(effective_period(1440, 12), 6);
        assert_eq!(effective_period(2, 100), 3);
        assert_eq!(effective_period(10, 5), 3);
    }

    #[test]
    fn test_components_reconstruct_input() {
        let y = seasonal_series(120, 12);
        let out = Stl::new(12).fit(&y).unwrap();
        assert_eq!(out.len(), 120);
        for i in 0..y.len() {
            let sum = out.trend[i] + out.seasonal[i] + out.resid[i];
            assert!((sum - y[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_recovers_seasonal_shape() {
        let period = 12;
        let y = seasonal_series(144, period);
        let out = Stl::new(period).fit(&y).unwrap();

        for i in 24..120 {
            let expected = (2.0 * PI * i as f64 / period as f64).sin();
            assert!(
                (out.seasonal[i] - expected).abs() < 0.15,
                "seasonal[{}] = {} expected {}",
                i,
                out.seasonal[i],
                expected
            );
            let expected_trend = 10.0 + 0.01 * i as f64;
            assert!((out.trend[i] - expected_trend).abs() < 0.15);
        }
    }

    #[test]
    fn test_robust_isolates_outlier() {
        let mut y = seasonal_series(144, 12);
        y[72] += 10.0;
        let out = Stl::new(12).fit(&y).unwrap();

        assert!(out.resid[72] > 7.0);
        assert!(out.weights[72] < 0.01);
        assert!(out.resid[71].abs() < 1.0);
        assert!(out.resid[73].abs() < 1.0);
    }

    #[test]
    fn test_non_robust_weights_are_unit() {
        let y = seasonal_series(60, 6);
        let stl = Stl::with_params(StlParams::new(6).robust(false));
        let out = stl.fit(&y).unwrap();
        assert!(out.weights.iter().all(|w| *w == 1.0));
    }

    #[test]
    fn test_rejects_short_series() {
        let y = seasonal_series(11, 3);
        match Stl::new(3).fit(&y) {
            Err(WorkbenchError::Insufficient { required, available }) => {
                assert_eq!(required, 12);
                assert_eq!(available, 11);
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let y = seasonal_series(40, 24);
        assert!(Stl::new(24).fit(&y).is_err());
    }

    #[test]
    fn test_rejects_non_finite() {
        let mut y = seasonal_series(48, 12);
        y[5] = f64::NAN;
        assert!(matches!(
            Stl::new(12).fit(&y),
            Err(WorkbenchError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_constant_series() {
        let y = vec![5.0; 48];
        let out = Stl::new(12).fit(&y).unwrap();
        for i in 0..48 {
            assert!((out.trend[i] - 5.0).abs() < 1e-9);
            assert!(out.seasonal[i].abs() < 1e-9);
        }
    }
}
