use crate::errors::CanopyError;
use serde::{Deserialize, Serialize};

// Validation
pub fn validate_positive_float_parameter(value: f64, parameter: &str) -> Result<(), CanopyError> {
    validate_float_parameter(value, 0.0, f64::INFINITY, parameter)
}

pub fn validate_float_parameter(value: f64, min: f64, max: f64, parameter: &str) -> Result<(), CanopyError> {
    if value.is_nan() || value < min || max < value {
        let ex_msg = format!("real value within range {} and {}", min, max);
        Err(CanopyError::IncorrectParameter(
            parameter.to_string(),
            ex_msg,
            value.to_string(),
        ))
    } else {
        Ok(())
    }
}

pub fn validate_min_parameter(value: usize, min: usize, parameter: &str) -> Result<(), CanopyError> {
    if value < min {
        Err(CanopyError::incorrect_parameter(
            parameter,
            format!("a value of at least {}", min),
            value,
        ))
    } else {
        Ok(())
    }
}

/// Index of the largest value, the first one wins ties.
#[inline]
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// Check a float label is an integral class id below `n_classes`.
pub fn class_label(value: f64, n_classes: usize) -> Option<usize> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && (value as usize) < n_classes {
        Some(value as usize)
    } else {
        None
    }
}

/// Online mean and variance, using Welford's update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    pub count: usize,
    pub mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        RunningStats::default()
    }

    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Sample variance, zero with fewer than two observations.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }
}

#[inline]
pub fn precision_round(n: f64, precision: i32) -> f64 {
    let p = (10.0_f64).powi(precision);
    (n * p).round() / p
}
