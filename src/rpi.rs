//! Raspberry Pi GPIO backend for the control lines.
//!
//! Buttons are wired active-low between their GPIO pin and ground, with the
//! internal pull-ups enabled. The Pi header carries no ADC, so the analog
//! stick axes read as idle; directional input comes from the digital pads.

use rppal::gpio::{Gpio, InputPin};
use tracing::info;

use crate::input::{ControlLines, RawLines};

/// BCM pin assignment for the digital buttons.
#[derive(Debug, Clone, Copy)]
pub struct PinMap {
    pub select: u8,
    pub start: u8,
    pub a: u8,
    pub b: u8,
    pub menu: u8,
    pub volume: u8,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            select: 17,
            start: 27,
            a: 22,
            b: 23,
            menu: 24,
            volume: 25,
        }
    }
}

pub struct GpioLines {
    select: InputPin,
    start: InputPin,
    a: InputPin,
    b: InputPin,
    menu: InputPin,
    volume: InputPin,
}

impl GpioLines {
    pub fn new(map: PinMap) -> Result<Self, rppal::gpio::Error> {
        let gpio = Gpio::new()?;
        info!("GPIO control lines initialized: {map:?}");
        Ok(Self {
            select: gpio.get(map.select)?.into_input_pullup(),
            start: gpio.get(map.start)?.into_input_pullup(),
            a: gpio.get(map.a)?.into_input_pullup(),
            b: gpio.get(map.b)?.into_input_pullup(),
            menu: gpio.get(map.menu)?.into_input_pullup(),
            volume: gpio.get(map.volume)?.into_input_pullup(),
        })
    }
}

impl ControlLines for GpioLines {
    fn read_raw(&mut self) -> RawLines {
        RawLines {
            axis_x: 0,
            axis_y: 0,
            select: self.select.is_low(),
            start: self.start.is_low(),
            a: self.a.is_low(),
            b: self.b.is_low(),
            menu: self.menu.is_low(),
            volume: self.volume.is_low(),
        }
    }
}
