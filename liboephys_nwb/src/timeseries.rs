/// A regularly sampled time series as read back from an NWB file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeriesData {
    pub data: Vec<f64>,
    pub starting_time: f64,
    pub rate: f64,
    pub unit: String,
}

impl TimeSeriesData {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn min_t(&self) -> f64 {
        self.starting_time
    }

    /// Time of the last sample
    pub fn max_t(&self) -> f64 {
        if self.data.is_empty() || self.rate <= 0.0 {
            return self.starting_time;
        }
        self.starting_time + (self.data.len() - 1) as f64 / self.rate
    }

    pub fn time_at(&self, index: usize) -> f64 {
        self.starting_time + index as f64 / self.rate
    }

    /// Index of the first sample at or after time t, clamped to [0, len]
    pub fn time_to_index(&self, t: f64) -> usize {
        if self.rate <= 0.0 || t <= self.starting_time {
            return 0;
        }
        let idx = ((t - self.starting_time) * self.rate).ceil() as usize;
        idx.min(self.data.len())
    }

    /// Samples within [t0, t1), as (times, values)
    pub fn window(&self, t0: f64, t1: f64) -> (Vec<f64>, Vec<f64>) {
        let start = self.time_to_index(t0);
        let stop = self.time_to_index(t1).max(start);
        let times = (start..stop).map(|i| self.time_at(i)).collect();
        (times, self.data[start..stop].to_vec())
    }
}

/// Spike times strictly inside (t0, t1)
pub fn spikes_in_window(spike_times: &[f64], t0: f64, t1: f64) -> Vec<f64> {
    spike_times
        .iter()
        .copied()
        .filter(|t| *t > t0 && *t < t1)
        .collect()
}

/// The imaging frame shown for a position in time
pub fn frame_for_time(pos: f64, rate: f64) -> usize {
    if pos <= 0.0 || rate <= 0.0 {
        0
    } else {
        (pos * rate) as usize
    }
}
