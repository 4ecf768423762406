//! Linear warmup followed by cosine decay to zero.

use std::f64::consts::PI;

use crate::config::OptimizerConfig;

/// Learning rate as a function of the optimizer step.
///
/// `lr(step) = base * step / warmup` for `step < warmup`, then
/// `base * 0.5 * (1 + cos(pi * progress))` with `progress` running from 0
/// at the end of warmup to 1 at `total_steps`.
#[derive(Debug, Clone, PartialEq)]
pub struct CosineWarmup {
    base_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
    current_step: usize,
}

impl CosineWarmup {
    pub fn new(base_lr: f64, warmup_steps: usize, total_steps: usize) -> Self {
        Self {
            base_lr,
            warmup_steps,
            total_steps,
            current_step: 0,
        }
    }

    /// Schedule over `epochs * steps_per_epoch` steps, warming up for the
    /// configured fraction of them.
    pub fn from_config(config: &OptimizerConfig, epochs: usize, steps_per_epoch: usize) -> Self {
        let total = epochs * steps_per_epoch;
        // Floor, tolerating the rounding error of fractions like 1/6.
        let warmup = (total as f64 * config.warmup_fraction + 1e-9) as usize;
        Self::new(config.lr, warmup, total)
    }

    pub fn lr(&self) -> f64 {
        self.lr_at(self.current_step)
    }

    pub fn lr_at(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            return self.base_lr * step as f64 / self.warmup_steps.max(1) as f64;
        }
        let progress = (step - self.warmup_steps) as f64
            / self.total_steps.saturating_sub(self.warmup_steps).max(1) as f64;
        let decay = 0.5 * (1.0 + (PI * progress.min(1.0)).cos());
        self.base_lr * decay.max(0.0)
    }

    /// Advance one optimizer step.
    pub fn step(&mut self) {
        self.current_step += 1;
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn warmup_steps(&self) -> usize {
        self.warmup_steps
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }
}
