//! Frame-by-frame timing for the crossfade slideshow, independent of any
//! window. Each call to [`Timeline::advance`] is one rendered frame.

use std::time::Duration;

use crate::error::SlideshowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// `index` is fully on screen and about to dwell.
    Loaded(usize),
    /// `frame` of `steps` blend frames from `from` towards `to` have been shown.
    Transitioning { from: usize, to: usize, frame: u32 },
}

/// What to put on screen for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// Show `index` unblended and keep it for `duration`.
    Hold { index: usize, duration: Duration },
    /// Show `from * (1 - t) + to * t`.
    Blend { from: usize, to: usize, t: f32 },
}

/// Current image index and crossfade progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlideshowState {
    pub index: usize,
    pub progress: f32,
}

#[derive(Debug, Clone)]
pub struct Timeline {
    len: usize,
    steps: u32,
    dwell: Duration,
    phase: Phase,
}

impl Timeline {
    /// A timeline over `len` images with `steps` blend frames per transition.
    ///
    /// With a single image every transition blends it into itself, which
    /// renders identical frames.
    pub fn new(len: usize, steps: u32, dwell: Duration) -> Result<Self, SlideshowError> {
        if len == 0 {
            return Err(SlideshowError::EmptyImageSet);
        }
        Ok(Self {
            len,
            steps: steps.max(1),
            dwell,
            phase: Phase::Loaded(0),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> SlideshowState {
        match self.phase {
            Phase::Loaded(index) => SlideshowState {
                index,
                progress: 0.0,
            },
            Phase::Transitioning { from, frame, .. } => SlideshowState {
                index: from,
                progress: frame as f32 / self.steps as f32,
            },
        }
    }

    pub fn advance(&mut self) -> Step {
        match self.phase {
            Phase::Loaded(index) => {
                self.phase = Phase::Transitioning {
                    from: index,
                    to: (index + 1) % self.len,
                    frame: 0,
                };
                Step::Hold {
                    index,
                    duration: self.dwell,
                }
            }
            Phase::Transitioning { from, to, frame } => {
                let frame = (frame + 1).min(self.steps);
                let t = frame as f32 / self.steps as f32;
                self.phase = if frame >= self.steps {
                    Phase::Loaded(to)
                } else {
                    Phase::Transitioning { from, to, frame }
                };
                Step::Blend { from, to, t }
            }
        }
    }
}
