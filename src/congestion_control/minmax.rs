// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A windowed max estimator based on Kathleen Nichols' algorithm.
//! Refer to <https://groups.google.com/g/bbr-dev/c/3RTgkzi5ZD8>.
//!
//! Three samples are kept: the best, 2nd best and 3rd best max in the
//! window, with the measurement time of the n'th best >= the n-1'th best.
//! A new max makes every earlier sample worthless, so the estimator restarts
//! from it. When the best sample ages out of the window the 2nd best is
//! promoted, and so on. Space and time per update are constant.
//!
//! Time is an abstract counter (estimation rounds), not wall-clock time.

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
struct Sample {
    /// Round count at which the sample was taken.
    time: u32,

    /// Sample value.
    value: u64,
}

/// Running maximum of a value over a trailing window of rounds.
#[derive(Debug, Default)]
pub struct WindowedMax {
    /// Best, 2nd best and 3rd best samples.
    samples: [Sample; 3],
}

impl WindowedMax {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every sample and restart from the given one.
    pub fn reset(&mut self, time: u32, value: u64) -> u64 {
        self.samples = [Sample { time, value }; 3];
        value
    }

    /// Feed a sample taken at `time` and return the max over the trailing
    /// `window` rounds.
    pub fn running_max(&mut self, window: u32, time: u32, value: u64) -> u64 {
        if time < self.samples[2].time {
            // Stale sample.
            return self.get();
        }

        let sample = Sample { time, value };

        if value >= self.samples[0].value || time - self.samples[2].time > window {
            // New max, or nothing left in the window.
            return self.reset(time, value);
        }

        if value >= self.samples[1].value {
            self.samples[1] = sample;
            self.samples[2] = sample;
        } else if value >= self.samples[2].value {
            self.samples[2] = sample;
        }

        self.age(window, sample)
    }

    /// Promote younger choices as the older ones leave the window.
    fn age(&mut self, window: u32, sample: Sample) -> u64 {
        let dt = sample.time - self.samples[0].time;

        if dt > window {
            // The best choice expired: shift, and shift again if the 2nd
            // choice turns out to be expired too.
            self.samples[0] = self.samples[1];
            self.samples[1] = self.samples[2];
            self.samples[2] = sample;
            if sample.time - self.samples[0].time > window {
                self.samples[0] = self.samples[1];
                self.samples[1] = self.samples[2];
                self.samples[2] = sample;
            }
        } else if self.samples[1] == self.samples[0] && dt > window / 4 {
            // A quarter of the window passed without a new 2nd choice.
            self.samples[1] = sample;
            self.samples[2] = sample;
        } else if self.samples[2] == self.samples[1] && dt > window / 2 {
            // Half the window passed without a new 3rd choice.
            self.samples[2] = sample;
        }

        self.get()
    }

    /// Current windowed max.
    pub fn get(&self) -> u64 {
        self.samples[0].value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIN: u32 = 10;

    #[test]
    fn windowed_max_reset() {
        let mut f = WindowedMax::new();
        assert_eq!(f.get(), 0);

        assert_eq!(f.reset(3, 42), 42);
        assert_eq!(f.get(), 42);
        assert_eq!(f.samples, [Sample { time: 3, value: 42 }; 3]);

        assert_eq!(f.reset(0, 0), 0);
        assert_eq!(f.get(), 0);
    }

    #[test]
    fn windowed_max_within_window() {
        let mut f = WindowedMax::new();
        let values = [120, 80, 150, 90, 149, 10];
        let mut max = 0;
        for (i, v) in values.iter().enumerate() {
            max = max.max(*v);
            assert_eq!(f.running_max(WIN, i as u32 + 1, *v), max);
        }
        assert_eq!(f.get(), 150);
    }

    #[test]
    fn windowed_max_stale_sample() {
        let mut f = WindowedMax::new();
        f.running_max(WIN, 5, 100);
        f.running_max(WIN, 8, 50);

        // Older than the 3rd choice, ignored even though it is larger.
        assert_eq!(f.running_max(WIN, 4, 500), 100);
        assert_eq!(f.get(), 100);
    }

    #[test]
    fn windowed_max_expires() {
        let mut f = WindowedMax::new();
        assert_eq!(f.running_max(WIN, 1, 200), 200);
        // Within the first quarter, recorded nowhere.
        assert_eq!(f.running_max(WIN, 2, 150), 200);
        // Second quarter: becomes 2nd and 3rd choice.
        assert_eq!(f.running_max(WIN, 4, 150), 200);
        assert_eq!(f.samples[1].value, 150);
        // Second half: becomes 3rd choice.
        assert_eq!(f.running_max(WIN, 7, 120), 200);
        assert_eq!(f.samples[2].value, 120);

        // The 200 sample leaves the window, 150 is promoted.
        assert_eq!(f.running_max(WIN, 12, 100), 150);
        // The 150 sample leaves too, 120 remains.
        assert_eq!(f.running_max(WIN, 15, 90), 120);
    }

    #[test]
    fn windowed_max_nothing_left_in_window() {
        let mut f = WindowedMax::new();
        f.running_max(WIN, 1, 300);
        f.running_max(WIN, 3, 200);

        // Every recorded sample is older than the window.
        assert_eq!(f.running_max(WIN, 20, 10), 10);
        assert_eq!(f.samples, [Sample { time: 20, value: 10 }; 3]);
    }
}
