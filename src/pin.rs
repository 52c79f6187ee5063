//! Borrowed per-pin handles compatible with `embedded-hal` digital traits.

use core::convert::Infallible;

use embedded_hal::digital::v2::{InputPin, OutputPin};

use crate::facade::Gpio;
use crate::registry::Direction;

/// A single pin borrowed from a [`Gpio`]. Handles implement the
/// `embedded-hal` `InputPin` and `OutputPin` traits, so drivers written
/// against those traits (indicator LEDs, relays, keyers) can sit on top of
/// the facade without knowing about it.
///
/// Handles are cheap and plentiful: any number may exist for the same pin,
/// and all of them share the facade's locking and batching. The trait impls
/// are infallible because facade operations never fail; they degrade to
/// no-ops and report through the error handler instead.
pub struct PinHandle<'g> {
    gpio: &'g Gpio,
    pin: u8,
}

impl<'g> PinHandle<'g> {
    pub(crate) fn new(gpio: &'g Gpio, pin: u8) -> Self {
        Self { gpio, pin }
    }

    /// The application-numbered index of this pin.
    pub fn index(&self) -> u8 {
        self.pin
    }

    /// Declare this pin's direction.
    pub fn set_direction(&self, direction: Direction) {
        self.gpio.set_direction(self.pin, direction);
    }

    /// The current level of this pin.
    pub fn read(&self) -> bool {
        self.gpio.read(self.pin)
    }

    /// Drive this pin, if it is configured as an output.
    pub fn write(&self, value: bool) {
        self.gpio.write(self.pin, value);
    }

    /// Invert this pin's current level.
    pub fn toggle(&self) {
        self.gpio.write(self.pin, !self.gpio.read(self.pin));
    }
}

impl OutputPin for PinHandle<'_> {
    type Error = Infallible;

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.gpio.write(self.pin, true);
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.gpio.write(self.pin, false);
        Ok(())
    }
}

impl InputPin for PinHandle<'_> {
    type Error = Infallible;

    fn is_high(&self) -> Result<bool, Self::Error> {
        Ok(self.gpio.read(self.pin))
    }

    fn is_low(&self) -> Result<bool, Self::Error> {
        Ok(!self.gpio.read(self.pin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_spy::SpyBackend;

    #[test]
    fn handle_round_trips_through_the_facade() {
        let spy = SpyBackend::new();
        let gpio = Gpio::with_backend(Box::new(spy.split()));
        let lamp = gpio.pin(6);
        lamp.set_direction(Direction::Output);
        lamp.write(true);
        assert!(lamp.read());
        assert_eq!(spy.writes(), vec![(6, true)]);
    }

    #[test]
    fn hal_traits_drive_and_sample() {
        let spy = SpyBackend::new();
        let gpio = Gpio::with_backend(Box::new(spy.split()));
        let mut lamp = gpio.pin(3);
        lamp.set_direction(Direction::Output);
        assert!(lamp.set_high().is_ok());
        assert_eq!(lamp.is_high(), Ok(true));

        let sense = gpio.pin(4);
        sense.set_direction(Direction::Input);
        spy.set_level(4, true);
        assert_eq!(sense.is_low(), Ok(false));
    }

    #[test]
    fn toggle_inverts_the_driven_level() {
        let spy = SpyBackend::new();
        let gpio = Gpio::with_backend(Box::new(spy.split()));
        let lamp = gpio.pin(2);
        lamp.set_direction(Direction::Output);
        lamp.write(true);
        lamp.toggle();
        assert!(!lamp.read());
        assert_eq!(spy.writes(), vec![(2, true), (2, false)]);
    }

    #[test]
    #[should_panic]
    fn nonexistent_pin_handles_cannot_be_created() {
        let gpio = Gpio::with_backend(Box::new(SpyBackend::new()));
        gpio.pin(64);
    }
}
