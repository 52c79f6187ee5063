//! The character-device backend drives pins through the Linux GPIO
//! character device (`/dev/gpiochipN`), using one batched line request per
//! direction group. Rebuilding a request is one ioctl per group no matter
//! how many pins it covers, and reads and writes are one ioctl each against
//! the group's handle.

use std::io;
use std::path::{Path, PathBuf};

use gpio_cdev::{Chip, LineRequestFlags, MultiLineHandle};

use super::{Backend, BatchOutcome, Error};
use crate::registry::Direction;

const DEFAULT_CHIP: &str = "/dev/gpiochip0";

/// Consumer label the kernel shows in `gpioinfo` for lines we hold.
const CONSUMER: &str = "pinbank";

fn cvt(err: gpio_cdev::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

/// Request defaults for a group: one byte per line, in line order.
fn group_defaults(pins: &[u8], levels: u64) -> Vec<u8> {
    pins.iter().map(|&p| ((levels >> p) & 1) as u8).collect()
}

fn group_mask(pins: &[u8]) -> u64 {
    pins.iter().fold(0u64, |mask, &p| mask | (1 << p))
}

/// One live kernel line request covering a direction group.
struct GroupRequest {
    handle: MultiLineHandle,
    pins: Vec<u8>,
}

impl GroupRequest {
    fn slot_of(&self, pin: u8) -> Option<usize> {
        self.pins.iter().position(|&p| p == pin)
    }
}

/// Backend for the modern Linux GPIO character device.
///
/// Pin indices map directly to line offsets on the selected chip.
pub struct CdevBackend {
    path: PathBuf,
    chip: Option<Chip>,
    inputs: Option<GroupRequest>,
    outputs: Option<GroupRequest>,
    // Last level driven per output pin. Continuing outputs are re-requested
    // with this as their default so an unrelated rebuild does not glitch
    // them; bits of pins that leave the output group are cleared.
    levels: u64,
}

impl CdevBackend {
    /// A backend against the given chip device node. Nothing is opened
    /// until the first facade access.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            chip: None,
            inputs: None,
            outputs: None,
            levels: 0,
        }
    }

    /// A backend against `/dev/gpiochip0` if that node exists.
    pub fn probe() -> Option<Self> {
        if Path::new(DEFAULT_CHIP).exists() {
            Some(Self::new(DEFAULT_CHIP))
        } else {
            None
        }
    }

    fn request_group(
        chip: &mut Chip,
        pins: Vec<u8>,
        direction: Direction,
        levels: u64,
    ) -> Result<Option<GroupRequest>, Error> {
        if pins.is_empty() {
            return Ok(None);
        }
        let offsets: Vec<u32> = pins.iter().map(|&p| u32::from(p)).collect();
        let defaults = group_defaults(&pins, levels);
        let flags = match direction {
            Direction::Input => LineRequestFlags::INPUT,
            Direction::Output => LineRequestFlags::OUTPUT,
        };
        let handle = chip
            .get_lines(&offsets)
            .and_then(|lines| lines.request(flags, &defaults, CONSUMER))
            .map_err(|e| Error::Config {
                direction,
                source: cvt(e),
            })?;
        Ok(Some(GroupRequest { handle, pins }))
    }

    fn group_of(&self, pin: u8) -> Option<(&GroupRequest, usize)> {
        for group in [self.inputs.as_ref(), self.outputs.as_ref()].into_iter().flatten() {
            if let Some(slot) = group.slot_of(pin) {
                return Some((group, slot));
            }
        }
        None
    }
}

impl Backend for CdevBackend {
    fn open(&mut self) -> Result<(), Error> {
        let chip = Chip::new(&self.path).map_err(|e| Error::Open { source: cvt(e) })?;
        self.chip = Some(chip);
        Ok(())
    }

    fn configure_batch(&mut self, pins: &[(u8, Direction)]) -> BatchOutcome {
        // The kernel holds requested lines exclusively; the old requests
        // must be released before new ones covering the same lines are
        // granted.
        self.inputs = None;
        self.outputs = None;

        let chip = match self.chip.as_mut() {
            Some(chip) => chip,
            None => {
                let gone = |direction| Error::Config {
                    direction,
                    source: io::Error::new(io::ErrorKind::NotConnected, "backend not open"),
                };
                return BatchOutcome {
                    inputs: Err(gone(Direction::Input)),
                    outputs: Err(gone(Direction::Output)),
                };
            }
        };

        let split = |wanted: Direction| -> Vec<u8> {
            pins.iter()
                .filter(|&&(_, d)| d == wanted)
                .map(|&(p, _)| p)
                .collect()
        };
        let input_pins = split(Direction::Input);
        let output_pins = split(Direction::Output);

        // Pins leaving the output group forget their driven level, so a pin
        // that later returns to the group starts low like any new output.
        self.levels &= group_mask(&output_pins);

        let inputs = Self::request_group(chip, input_pins, Direction::Input, 0);
        let outputs = Self::request_group(chip, output_pins, Direction::Output, self.levels);

        BatchOutcome {
            inputs: inputs.map(|group| self.inputs = group),
            outputs: outputs.map(|group| self.outputs = group),
        }
    }

    fn read(&self, pin: u8) -> Result<bool, Error> {
        let (group, slot) = self.group_of(pin).ok_or_else(|| Error::Io {
            pin,
            source: io::Error::new(io::ErrorKind::NotFound, "pin not in the active request"),
        })?;
        let values = group.handle.get_values().map_err(|e| Error::Io {
            pin,
            source: cvt(e),
        })?;
        Ok(values.get(slot).copied().unwrap_or(0) != 0)
    }

    fn write(&mut self, pin: u8, value: bool) -> Result<(), Error> {
        let desired = if value {
            self.levels | (1 << pin)
        } else {
            self.levels & !(1 << pin)
        };
        let group = self
            .outputs
            .as_ref()
            .filter(|group| group.slot_of(pin).is_some())
            .ok_or_else(|| Error::Io {
                pin,
                source: io::Error::new(io::ErrorKind::NotFound, "pin not in the output request"),
            })?;
        // set_values covers the whole group in one ioctl; every other
        // output keeps its shadowed level.
        let values = group_defaults(&group.pins, desired);
        group.handle.set_values(&values).map_err(|e| Error::Io {
            pin,
            source: cvt(e),
        })?;
        self.levels = desired;
        Ok(())
    }

    fn close(&mut self) {
        self.inputs = None;
        self.outputs = None;
        self.chip = None;
    }
}
