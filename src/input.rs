//! Debounced sampling of the physical controls.
//!
//! A background task reads the raw control lines every 10 ms, runs each
//! button through a two-sample debounce filter and publishes the resulting
//! [`InputSnapshot`] on a watch channel. Readers always get a whole frame,
//! never a partially updated one, and every read stamps a freshness
//! timestamp that the runtime monitor uses as its liveness signal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use statum::{machine, state};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::clock::Clock;

/// Sampling period of the background task.
pub const SAMPLE_PERIOD: Duration = Duration::from_millis(10);

/// Raw analog band above which the stick reads as Left/Up (12-bit ADC).
pub const ANALOG_BAND_HIGH: u16 = 2048 + 1024;
/// Raw analog band above which the stick reads as Right/Down.
pub const ANALOG_BAND_LOW: u16 = 1024;

pub const BUTTON_COUNT: usize = 10;

/// Logical buttons of the handheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Up,
    Down,
    Left,
    Right,
    Select,
    Start,
    A,
    B,
    Menu,
    Volume,
}

impl Button {
    pub const ALL: [Button; BUTTON_COUNT] = [
        Button::Up,
        Button::Down,
        Button::Left,
        Button::Right,
        Button::Select,
        Button::Start,
        Button::A,
        Button::B,
        Button::Menu,
        Button::Volume,
    ];

    pub fn index(self) -> usize {
        match self {
            Button::Up => 0,
            Button::Down => 1,
            Button::Left => 2,
            Button::Right => 3,
            Button::Select => 4,
            Button::Start => 5,
            Button::A => 6,
            Button::B => 7,
            Button::Menu => 8,
            Button::Volume => 9,
        }
    }
}

/// Instantaneous state of the physical lines, before debouncing.
///
/// The two stick axes share one ADC ladder per axis: idle reads near zero,
/// one direction pulls the line to the middle band and the opposite
/// direction to the top band.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawLines {
    pub axis_x: u16,
    pub axis_y: u16,
    pub select: bool,
    pub start: bool,
    pub a: bool,
    pub b: bool,
    pub menu: bool,
    pub volume: bool,
}

/// Hardware seam for the control lines. Implemented over GPIO/ADC on the
/// device (see the `rpi` feature) and scripted in tests.
pub trait ControlLines: Send {
    fn read_raw(&mut self) -> RawLines;
}

/// Debounced, consistent view of all buttons plus a packed bitmask.
///
/// Copied out by value on every read; no caller ever holds a lock into the
/// sampler's state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputSnapshot {
    pressed: [bool; BUTTON_COUNT],
    bitmask: u16,
}

impl InputSnapshot {
    pub fn pressed(&self, button: Button) -> bool {
        self.pressed[button.index()]
    }

    pub fn any_pressed(&self) -> bool {
        self.pressed.iter().any(|&p| p)
    }

    /// Bits set for buttons that resolved to pressed this cycle, indexed by
    /// [`Button::index`].
    pub fn bitmask(&self) -> u16 {
        self.bitmask
    }
}

/// Two-sample majority debounce over all buttons.
///
/// Each button keeps an 8-bit shift register of raw samples. The low two
/// bits decide the published state: `00` released, `11` pressed, anything
/// mixed holds the previous value. Registers start at `0xFF` so a button
/// physically held at power-on reports pressed on the very first cycle,
/// which the app registry relies on for its crash-recovery check.
#[derive(Debug)]
pub struct DebounceFilter {
    history: [u8; BUTTON_COUNT],
    snapshot: InputSnapshot,
}

impl DebounceFilter {
    pub fn new() -> Self {
        Self {
            history: [0xFF; BUTTON_COUNT],
            snapshot: InputSnapshot::default(),
        }
    }

    /// Feeds one raw sample and returns the updated snapshot.
    pub fn feed(&mut self, raw: &RawLines) -> InputSnapshot {
        let instant = decode_lines(raw);
        let mut bitmask = 0u16;

        for (i, &asserted) in instant.iter().enumerate() {
            self.history[i] = (self.history[i] << 1) | u8::from(asserted);
            match self.history[i] & 0x03 {
                0x00 => self.snapshot.pressed[i] = false,
                0x03 => {
                    self.snapshot.pressed[i] = true;
                    bitmask |= 1 << i;
                }
                // Bouncing: hold the previous published state.
                _ => {}
            }
        }

        self.snapshot.bitmask = bitmask;
        self.snapshot
    }
}

impl Default for DebounceFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Thresholds the analog axes into directional booleans and collects the
/// digital lines, ordered by [`Button::index`].
fn decode_lines(raw: &RawLines) -> [bool; BUTTON_COUNT] {
    let mut lines = [false; BUTTON_COUNT];

    if raw.axis_y > ANALOG_BAND_HIGH {
        lines[Button::Up.index()] = true;
    } else if raw.axis_y > ANALOG_BAND_LOW {
        lines[Button::Down.index()] = true;
    }

    if raw.axis_x > ANALOG_BAND_HIGH {
        lines[Button::Left.index()] = true;
    } else if raw.axis_x > ANALOG_BAND_LOW {
        lines[Button::Right.index()] = true;
    }

    lines[Button::Select.index()] = raw.select;
    lines[Button::Start.index()] = raw.start;
    lines[Button::A.index()] = raw.a;
    lines[Button::B.index()] = raw.b;
    lines[Button::Menu.index()] = raw.menu;
    lines[Button::Volume.index()] = raw.volume;

    lines
}

#[derive(Debug, Default)]
struct InputShared {
    /// Elapsed micros at the most recent snapshot read; 0 means never read.
    last_read_micros: AtomicU64,
    running: AtomicBool,
}

#[state]
#[derive(Debug, Clone)]
pub enum SamplerState {
    Initializing,
    Sampling,
}

#[machine]
pub struct InputSampler<S: SamplerState> {
    lines: Box<dyn ControlLines>,
    filter: DebounceFilter,
    snapshot_tx: watch::Sender<InputSnapshot>,
    shared: Arc<InputShared>,
}

impl InputSampler<Initializing> {
    fn create(
        lines: Box<dyn ControlLines>,
        snapshot_tx: watch::Sender<InputSnapshot>,
        shared: Arc<InputShared>,
    ) -> Self {
        Self::new(lines, DebounceFilter::new(), snapshot_tx, shared)
    }

    fn initialize(self) -> InputSampler<Sampling> {
        self.shared.running.store(true, Ordering::Release);
        info!("input sampler initialized, transitioning to Sampling");
        self.transition()
    }
}

impl InputSampler<Sampling> {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(SAMPLE_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while self.shared.running.load(Ordering::Acquire) {
            ticker.tick().await;
            let raw = self.lines.read_raw();
            let snapshot = self.filter.feed(&raw);
            // Publishes the whole frame at once; receivers only ever see a
            // complete snapshot.
            self.snapshot_tx.send_replace(snapshot);
        }

        debug!("input sampler stopped");
    }
}

/// Handle to the running sampler task. Cheap to clone; any task may read.
#[derive(Clone)]
pub struct InputHandle {
    snapshot_rx: watch::Receiver<InputSnapshot>,
    shared: Arc<InputShared>,
    clock: Clock,
}

impl InputHandle {
    /// Starts the 10 ms background sampler and returns the read handle.
    pub fn spawn(lines: Box<dyn ControlLines>, clock: Clock) -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(InputSnapshot::default());
        let shared = Arc::new(InputShared::default());

        let sampler = InputSampler::create(lines, snapshot_tx, shared.clone());
        let sampling = sampler.initialize();
        tokio::spawn(sampling.run());

        Self {
            snapshot_rx,
            shared,
            clock,
        }
    }

    /// Returns a copy of the current snapshot and stamps the freshness
    /// timestamp the watchdog monitors.
    ///
    /// # Panics
    ///
    /// Input is safety-relevant for the watchdog, so reading after the
    /// sampler has been terminated is a contract violation.
    pub fn read(&self) -> InputSnapshot {
        assert!(
            self.shared.running.load(Ordering::Acquire),
            "input sampler is not running"
        );
        let snapshot = *self.snapshot_rx.borrow();
        self.shared
            .last_read_micros
            .store(self.clock.elapsed_micros().max(1), Ordering::Release);
        snapshot
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.read().pressed(button)
    }

    pub fn any_pressed(&self) -> bool {
        self.read().any_pressed()
    }

    /// Waits until `button` reports the requested pressed state.
    ///
    /// Wakes on every published sample (one sample period resolution), so a
    /// task parked here still counts as polling input for the watchdog.
    pub async fn wait_for(&self, button: Button, pressed: bool) {
        let mut rx = self.snapshot_rx.clone();
        loop {
            if self.read().pressed(button) == pressed {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Microseconds since the last snapshot read, or 0 if never read.
    pub fn last_polled_micros(&self) -> u64 {
        let last = self.shared.last_read_micros.load(Ordering::Acquire);
        if last == 0 {
            return 0;
        }
        self.clock.elapsed_micros().saturating_sub(last)
    }

    /// Stops the sampler task after its current cycle.
    pub fn terminate(&self) {
        self.shared.running.store(false, Ordering::Release);
    }
}
