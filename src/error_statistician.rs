//! Derives total-count and frequency statistics from raw error-counter registers (spec §4.8).
//!
//! Each observation of a raw counter (e.g. `FrameErrorCounterPort1` going from 4 to 7) updates
//! four [`ErrorStatistic`] histories: the per-slave total, the per-slave frequency, and the same
//! two rolled up across every slave (`*Global`). Frequency is a decaying moving average over
//! events-per-second, not a raw derivative, so a single noisy sample can't make the displayed rate
//! spike and immediately vanish.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::data_object::{AbstractDataPoint, ErrorStatistic, ErrorStatisticType, GLOBAL_SLAVE};
use crate::data_types::EtherCATDataType;
use crate::register::RegisterAddress;
use crate::search_list::{SearchList, View};
use crate::time::{TimeSeries, TimeStamp};

/// Weight given to the newest rate sample when blending into the running frequency average.
/// Smaller means smoother (slower to react); this is a fixed constant rather than a tunable,
/// matching the original design's lack of a configuration knob for it.
const DECAY_ALPHA: f64 = 0.3;

struct RawState {
    last_count: u64,
    last_time: Option<TimeStamp>,
    freq: f64,
}

impl Default for RawState {
    fn default() -> Self {
        Self {
            last_count: 0,
            last_time: None,
            freq: 0.0,
        }
    }
}

fn unsigned_point(value: u64, time: TimeStamp) -> AbstractDataPoint {
    AbstractDataPoint::Unsigned {
        value,
        data_type: EtherCATDataType::Unsigned(32),
        time,
    }
}

fn float_point(value: f64, time: TimeStamp) -> AbstractDataPoint {
    AbstractDataPoint::Float { value, time }
}

/// Background derivation of error statistics from raw counter-register samples.
pub struct ErrorStatistician {
    raw: Mutex<HashMap<(RegisterAddress, u32), RawState>>,
    histories: Mutex<HashMap<ErrorStatistic, Arc<SearchList<AbstractDataPoint>>>>,
}

impl Default for ErrorStatistician {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorStatistician {
    pub fn new() -> Self {
        Self {
            raw: Mutex::new(HashMap::new()),
            histories: Mutex::new(HashMap::new()),
        }
    }

    fn history_for(&self, stat: ErrorStatistic) -> Arc<SearchList<AbstractDataPoint>> {
        self.histories
            .lock()
            .expect("error statistician history map poisoned")
            .entry(stat)
            .or_insert_with(|| Arc::new(SearchList::new()))
            .clone()
    }

    /// Record a freshly sampled raw counter value for one slave's register, deriving and
    /// appending all four associated statistics.
    pub fn observe(&self, register: RegisterAddress, slave: u32, counter_value: u64, time: TimeStamp) {
        let delta = {
            let mut raw = self.raw.lock().expect("error statistician raw-state map poisoned");
            let state = raw.entry((register, slave)).or_default();

            // Counters are narrow (typically 8 bits) and wrap; treat a decrease as a wrap rather
            // than a reset, so a single dropped sample doesn't erase the running total.
            let delta = if counter_value >= state.last_count {
                counter_value - state.last_count
            } else {
                counter_value
            };

            let rate = match state.last_time {
                Some(last) => match time.checked_duration_since(last) {
                    Some(dt) if dt.as_nanos() > 0 => {
                        (delta as f64) / (dt.as_nanos() as f64 / 1_000_000_000.0)
                    }
                    _ => state.freq,
                },
                None => 0.0,
            };

            state.freq = state.freq * (1.0 - DECAY_ALPHA) + rate * DECAY_ALPHA;
            state.last_count = counter_value;
            state.last_time = Some(time);

            delta
        };

        let slave_total = self.history_for(ErrorStatistic {
            stat_type: ErrorStatisticType::TotalSlave,
            source: register,
            slave,
        });
        let global_total = self.history_for(ErrorStatistic {
            stat_type: ErrorStatisticType::TotalGlobal,
            source: register,
            slave: GLOBAL_SLAVE,
        });
        let slave_freq = self.history_for(ErrorStatistic {
            stat_type: ErrorStatisticType::FreqSlave,
            source: register,
            slave,
        });
        let global_freq = self.history_for(ErrorStatistic {
            stat_type: ErrorStatisticType::FreqGlobal,
            source: register,
            slave: GLOBAL_SLAVE,
        });

        let new_slave_total = self.raw.lock().expect("error statistician raw-state map poisoned")
            [&(register, slave)]
            .last_count;
        let new_global_total = self.running_global_total(register);
        let freq = self.raw.lock().expect("error statistician raw-state map poisoned")[&(register, slave)].freq;

        slave_total.append(unsigned_point(new_slave_total, time), time);
        global_total.append(unsigned_point(new_global_total, time), time);
        slave_freq.append(float_point(freq, time), time);
        global_freq.append(float_point(self.running_global_freq(register), time), time);

        let _ = delta;
    }

    fn running_global_total(&self, register: RegisterAddress) -> u64 {
        self.raw
            .lock()
            .expect("error statistician raw-state map poisoned")
            .iter()
            .filter(|((reg, _), _)| *reg == register)
            .map(|(_, state)| state.last_count)
            .sum()
    }

    fn running_global_freq(&self, register: RegisterAddress) -> f64 {
        self.raw
            .lock()
            .expect("error statistician raw-state map poisoned")
            .iter()
            .filter(|((reg, _), _)| *reg == register)
            .map(|(_, state)| state.freq)
            .sum()
    }

    /// A view over one statistic's history, starting from `series.start_time`.
    pub fn get_view(&self, stat: ErrorStatistic, series: TimeSeries) -> View<AbstractDataPoint> {
        self.history_for(stat).get_view(series)
    }

    /// Zero the running state for a slave's register, mirroring a register-reset request (spec
    /// §4.8 "resetting error registers also resets the derived statistics").
    pub fn reset(&self, register: RegisterAddress, slave: u32) {
        if let Some(state) = self
            .raw
            .lock()
            .expect("error statistician raw-state map poisoned")
            .get_mut(&(register, slave))
        {
            state.last_count = 0;
            state.freq = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_accumulates_and_frequency_tracks_rate() {
        let stats = ErrorStatistician::new();

        stats.observe(RegisterAddress::FrameErrorCounterPort1, 1, 2, TimeStamp::from_nanos(0));
        stats.observe(
            RegisterAddress::FrameErrorCounterPort1,
            1,
            5,
            TimeStamp::from_nanos(1_000_000_000),
        );

        let mut view = stats.get_view(
            ErrorStatistic {
                stat_type: ErrorStatisticType::TotalSlave,
                source: RegisterAddress::FrameErrorCounterPort1,
                slave: 1,
            },
            TimeSeries::every_sample(TimeStamp::from_nanos(0)),
        );

        let mut last = None;
        while let Some((point, _)) = view.next() {
            if let AbstractDataPoint::Unsigned { value, .. } = point {
                last = Some(value);
            }
        }

        assert_eq!(last, Some(5));
    }

    #[test]
    fn global_total_sums_across_slaves() {
        let stats = ErrorStatistician::new();

        stats.observe(RegisterAddress::FrameErrorCounterPort1, 1, 3, TimeStamp::from_nanos(0));
        stats.observe(RegisterAddress::FrameErrorCounterPort1, 2, 4, TimeStamp::from_nanos(1));

        let mut view = stats.get_view(
            ErrorStatistic {
                stat_type: ErrorStatisticType::TotalGlobal,
                source: RegisterAddress::FrameErrorCounterPort1,
                slave: GLOBAL_SLAVE,
            },
            TimeSeries::every_sample(TimeStamp::from_nanos(0)),
        );

        let mut last = None;
        while let Some((point, _)) = view.next() {
            if let AbstractDataPoint::Unsigned { value, .. } = point {
                last = Some(value);
            }
        }

        assert_eq!(last, Some(7));
    }

    #[test]
    fn reset_zeroes_running_state() {
        let stats = ErrorStatistician::new();

        stats.observe(RegisterAddress::FrameErrorCounterPort1, 1, 9, TimeStamp::from_nanos(0));
        stats.reset(RegisterAddress::FrameErrorCounterPort1, 1);
        stats.observe(RegisterAddress::FrameErrorCounterPort1, 1, 2, TimeStamp::from_nanos(1));

        let mut view = stats.get_view(
            ErrorStatistic {
                stat_type: ErrorStatisticType::TotalSlave,
                source: RegisterAddress::FrameErrorCounterPort1,
                slave: 1,
            },
            TimeSeries::every_sample(TimeStamp::from_nanos(0)),
        );

        let mut values = Vec::new();
        while let Some((point, _)) = view.next() {
            if let AbstractDataPoint::Unsigned { value, .. } = point {
                values.push(value);
            }
        }

        assert_eq!(values, vec![9, 2]);
    }
}
