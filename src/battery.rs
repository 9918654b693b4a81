//! Battery voltage sampling and smoothing.
//!
//! Stateless consumer of ADC reads, invoked on demand by the runtime
//! monitor. Keeps only a smoothing accumulator and a calibration flag for
//! the lifetime of the process; nothing is persisted.

use tracing::debug;

/// Fully charged cell voltage in volts.
pub const VOLTAGE_FULL: f32 = 4.2;
/// Empty cell voltage in volts.
pub const VOLTAGE_EMPTY: f32 = 3.5;

const DIVIDER_R1: f32 = 10_000.0;
const DIVIDER_R2: f32 = 10_000.0;
const SAMPLE_COUNT: u32 = 4;

/// Seam over the ADC channel wired to the battery voltage divider.
pub trait AdcReader: Send {
    /// One-time characterization, performed lazily on the first read.
    fn calibrate(&mut self);

    /// Raw millivolts at the divider tap.
    fn read_millivolts(&mut self) -> f32;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BatteryState {
    /// Battery voltage, never clamped.
    pub millivolts: i32,
    /// Charge estimate clamped to 0..=100.
    pub percentage: i32,
}

pub struct BatteryMonitor {
    adc: Box<dyn AdcReader>,
    smoothed_volts: f32,
    calibrated: bool,
}

impl BatteryMonitor {
    pub fn new(adc: Box<dyn AdcReader>) -> Self {
        Self {
            adc,
            smoothed_volts: 0.0,
            calibrated: false,
        }
    }

    /// Samples the divider and returns the smoothed battery state.
    ///
    /// Averages four raw samples per call, then folds the result into an
    /// exponential accumulator (`acc = (acc + new) / 2`) so consecutive
    /// reads don't jitter the displayed charge.
    pub fn read(&mut self) -> BatteryState {
        if !self.calibrated {
            self.adc.calibrate();
            self.calibrated = true;
            debug!("battery ADC calibrated");
        }

        let mut sample = 0.0f32;
        for _ in 0..SAMPLE_COUNT {
            sample += self.adc.read_millivolts() * 0.001;
        }
        sample /= SAMPLE_COUNT as f32;

        if self.smoothed_volts == 0.0 {
            self.smoothed_volts = sample;
        } else {
            self.smoothed_volts = (self.smoothed_volts + sample) / 2.0;
        }

        let vs = self.smoothed_volts / DIVIDER_R2 * (DIVIDER_R1 + DIVIDER_R2);
        let vclamped = vs.clamp(VOLTAGE_EMPTY, VOLTAGE_FULL);

        BatteryState {
            millivolts: (vs * 1000.0) as i32,
            percentage: ((vclamped - VOLTAGE_EMPTY) / (VOLTAGE_FULL - VOLTAGE_EMPTY) * 100.0)
                as i32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FixedAdc {
        millivolts: f32,
        calibrations: Arc<AtomicU32>,
    }

    impl AdcReader for FixedAdc {
        fn calibrate(&mut self) {
            self.calibrations.fetch_add(1, Ordering::Relaxed);
        }

        fn read_millivolts(&mut self) -> f32 {
            self.millivolts
        }
    }

    fn monitor(millivolts: f32) -> (BatteryMonitor, Arc<AtomicU32>) {
        let calibrations = Arc::new(AtomicU32::new(0));
        let adc = FixedAdc {
            millivolts,
            calibrations: calibrations.clone(),
        };
        (BatteryMonitor::new(Box::new(adc)), calibrations)
    }

    #[test]
    fn calibrates_exactly_once() {
        let (mut monitor, calibrations) = monitor(1900.0);
        monitor.read();
        monitor.read();
        monitor.read();
        assert_eq!(calibrations.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn nominal_voltage_maps_through_divider() {
        // 1.9 V at the tap, doubled by the 10k/10k divider: 3.8 V.
        let (mut monitor, _) = monitor(1900.0);
        let state = monitor.read();
        assert!((3790..=3810).contains(&state.millivolts), "{state:?}");
        // (3.8 - 3.5) / 0.7 ~= 42%.
        assert!((41..=43).contains(&state.percentage), "{state:?}");
    }

    #[test]
    fn below_empty_clamps_percentage_not_millivolts() {
        let (mut monitor, _) = monitor(1500.0); // 3.0 V
        let state = monitor.read();
        assert_eq!(state.percentage, 0);
        assert!((2990..=3010).contains(&state.millivolts), "{state:?}");
    }

    #[test]
    fn above_full_clamps_percentage_not_millivolts() {
        let (mut monitor, _) = monitor(2250.0); // 4.5 V
        let state = monitor.read();
        assert_eq!(state.percentage, 100);
        assert!((4490..=4510).contains(&state.millivolts), "{state:?}");
    }

    #[test]
    fn smoothing_halves_toward_new_reading() {
        let calibrations = Arc::new(AtomicU32::new(0));
        let mut monitor = BatteryMonitor::new(Box::new(FixedAdc {
            millivolts: 2100.0, // 4.2 V through the divider
            calibrations: calibrations.clone(),
        }));
        let first = monitor.read();
        assert!((4190..=4210).contains(&first.millivolts));

        // Swap in a lower reading; the accumulator moves halfway.
        monitor.adc = Box::new(FixedAdc {
            millivolts: 1900.0, // 3.8 V
            calibrations,
        });
        let second = monitor.read();
        assert!((3990..=4010).contains(&second.millivolts), "{second:?}");
    }
}
