//! Bounded threshold search
//!
//! Perturb one parameter a step at a time until a predicate holds or the step
//! budget runs out. Linear only: no backtracking, no bisection. The predicate
//! is assumed monotonic along the perturbation; with `confirm_steps > 0` the
//! driver checks that assumption by stepping past the first hit.

use alloy_primitives::U256;
use risk_model::scale::{scale_by_wad, wad_pow};
use risk_model::{ScaleError, Wad};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_STEPS: u32 = 120;

/// Steps between progress lines at info level
const PROGRESS_EVERY: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdSearch {
    pub max_steps: u32,
    pub confirm_steps: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome<S> {
    /// Predicate first held at `step` (0 when it held before any perturbation)
    Triggered {
        step: u32,
        confirmed_through: u32,
        state: S,
    },
    /// Budget spent without the predicate holding
    Exhausted { steps: u32, state: S },
    /// Predicate held at `triggered_at` and stopped holding at `flipped_at`
    NonMonotonic {
        triggered_at: u32,
        flipped_at: u32,
        state: S,
    },
}

impl<S> SearchOutcome<S> {
    pub fn state(&self) -> &S {
        match self {
            SearchOutcome::Triggered { state, .. }
            | SearchOutcome::Exhausted { state, .. }
            | SearchOutcome::NonMonotonic { state, .. } => state,
        }
    }
}

impl Default for ThresholdSearch {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            confirm_steps: 0,
        }
    }
}

impl ThresholdSearch {
    pub fn new(max_steps: u32) -> Self {
        Self {
            max_steps,
            confirm_steps: 0,
        }
    }

    pub fn with_confirmation(mut self, confirm_steps: u32) -> Self {
        self.confirm_steps = confirm_steps;
        self
    }

    /// Evaluate `done` on `initial`, then alternate `step` and `done`
    ///
    /// `step(i, state)` produces the state after the i-th perturbation
    /// (1-based); `done(i, state)` is evaluated on it. Errors from either
    /// closure end the search immediately.
    pub fn run<S, E>(
        &self,
        initial: S,
        mut step: impl FnMut(u32, &S) -> Result<S, E>,
        mut done: impl FnMut(u32, &S) -> Result<bool, E>,
    ) -> Result<SearchOutcome<S>, E> {
        let mut state = initial;
        let mut triggered = None;

        if done(0, &state)? {
            if self.confirm_steps == 0 {
                log::info!("Predicate holds before any perturbation");
                return Ok(SearchOutcome::Triggered {
                    step: 0,
                    confirmed_through: 0,
                    state,
                });
            }
            triggered = Some(0);
        }

        for i in 1..=self.max_steps {
            state = step(i, &state)?;
            let hit = done(i, &state)?;

            if i % PROGRESS_EVERY == 0 {
                log::info!("Search step {}/{}: predicate {}", i, self.max_steps, hit);
            } else {
                log::debug!("Search step {}/{}: predicate {}", i, self.max_steps, hit);
            }

            match triggered {
                None if hit => {
                    if self.confirm_steps == 0 {
                        log::info!("Predicate holds after {} steps", i);
                        return Ok(SearchOutcome::Triggered {
                            step: i,
                            confirmed_through: i,
                            state,
                        });
                    }
                    triggered = Some(i);
                }
                None => {}
                Some(first) if !hit => {
                    log::warn!("Predicate held at step {} but not at step {}", first, i);
                    return Ok(SearchOutcome::NonMonotonic {
                        triggered_at: first,
                        flipped_at: i,
                        state,
                    });
                }
                Some(first) if i - first >= self.confirm_steps => {
                    log::info!("Predicate holds after {} steps (confirmed through {})", first, i);
                    return Ok(SearchOutcome::Triggered {
                        step: first,
                        confirmed_through: i,
                        state,
                    });
                }
                Some(_) => {}
            }
        }

        Ok(match triggered {
            // Budget ran out mid-confirmation; every evaluation after the hit agreed
            Some(first) => SearchOutcome::Triggered {
                step: first,
                confirmed_through: self.max_steps,
                state,
            },
            None => {
                log::info!("Search exhausted after {} steps", self.max_steps);
                SearchOutcome::Exhausted {
                    steps: self.max_steps,
                    state,
                }
            }
        })
    }
}

/// `price_0 * decay^i`, computed from the starting price every time
pub fn decayed_price(price_0: U256, decay: Wad, i: u32) -> Result<U256, ScaleError> {
    scale_by_wad(price_0, wad_pow(decay, i)?)
}
