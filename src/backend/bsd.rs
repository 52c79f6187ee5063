//! The BSD backend drives pins through the FreeBSD GPIO controller device
//! (`/dev/gpiocN`) and its per-pin ioctl API. The host interface has no
//! batched request, so `configure_batch` loops over the group; the layer
//! above still guarantees that loop runs at most once per registry change.

use std::fs::{File, OpenOptions};
use std::io;
use std::mem;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use super::{Backend, BatchOutcome, Error};
use crate::registry::Direction;

const DEFAULT_CTRL: &str = "/dev/gpioc0";

const GPIO_PIN_INPUT: u32 = 0x0001;
const GPIO_PIN_OUTPUT: u32 = 0x0002;
const GPIO_MAX_NAME: usize = 64;

#[repr(C)]
struct GpioPinConfig {
    gp_pin: u32,
    gp_name: [u8; GPIO_MAX_NAME],
    gp_caps: u32,
    gp_flags: u32,
}

#[repr(C)]
struct GpioReq {
    gp_pin: u32,
    gp_value: u32,
}

// FreeBSD ioctl request encoding (sys/ioccom.h): direction bits, parameter
// length, group character, command number.
const IOC_IN: libc::c_ulong = 0x8000_0000;
const IOC_OUT: libc::c_ulong = 0x4000_0000;
const IOCPARM_MASK: libc::c_ulong = 0x1fff;

const fn ioc(inout: libc::c_ulong, num: libc::c_ulong, len: usize) -> libc::c_ulong {
    inout | ((len as libc::c_ulong & IOCPARM_MASK) << 16) | ((b'G' as libc::c_ulong) << 8) | num
}

const GPIOSETCONFIG: libc::c_ulong = ioc(IOC_IN, 2, mem::size_of::<GpioPinConfig>());
const GPIOGET: libc::c_ulong = ioc(IOC_IN | IOC_OUT, 3, mem::size_of::<GpioReq>());
const GPIOSET: libc::c_ulong = ioc(IOC_IN, 4, mem::size_of::<GpioReq>());

/// Backend for the FreeBSD libgpio-style controller device.
pub struct BsdBackend {
    path: PathBuf,
    dev: Option<File>,
    // Last level driven per output pin; re-driven after reconfiguration.
    levels: u64,
}

impl BsdBackend {
    /// A backend against the given controller node. Nothing is opened until
    /// the first facade access.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            dev: None,
            levels: 0,
        }
    }

    /// A backend against `/dev/gpioc0` if that node exists.
    pub fn probe() -> Option<Self> {
        if Path::new(DEFAULT_CTRL).exists() {
            Some(Self::new(DEFAULT_CTRL))
        } else {
            None
        }
    }

    fn set_config(dev: &File, pin: u8, direction: Direction) -> io::Result<()> {
        let mut config = GpioPinConfig {
            gp_pin: u32::from(pin),
            gp_name: [0; GPIO_MAX_NAME],
            gp_caps: 0,
            gp_flags: match direction {
                Direction::Input => GPIO_PIN_INPUT,
                Direction::Output => GPIO_PIN_OUTPUT,
            },
        };
        // SAFETY: GPIOSETCONFIG reads a GpioPinConfig from the passed
        // pointer; config outlives the call.
        let rc = unsafe { libc::ioctl(dev.as_raw_fd(), GPIOSETCONFIG, &mut config) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn set_value(dev: &File, pin: u8, value: bool) -> io::Result<()> {
        let mut req = GpioReq {
            gp_pin: u32::from(pin),
            gp_value: u32::from(value),
        };
        // SAFETY: GPIOSET reads a GpioReq from the passed pointer.
        let rc = unsafe { libc::ioctl(dev.as_raw_fd(), GPIOSET, &mut req) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl Backend for BsdBackend {
    fn open(&mut self) -> Result<(), Error> {
        let dev = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|source| Error::Open { source })?;
        self.dev = Some(dev);
        Ok(())
    }

    fn configure_batch(&mut self, pins: &[(u8, Direction)]) -> BatchOutcome {
        let dev = match self.dev.as_ref() {
            Some(dev) => dev,
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

        let output_mask = pins
            .iter()
            .filter(|&&(_, d)| d == Direction::Output)
            .fold(0u64, |mask, &(p, _)| mask | (1 << p));
        self.levels &= output_mask;

        let mut outcome = BatchOutcome::ok();
        for &(pin, direction) in pins {
            let group = match direction {
                Direction::Input => &mut outcome.inputs,
                Direction::Output => &mut outcome.outputs,
            };
            // First failure marks the whole group inert; the rest of that
            // group is skipped rather than half-configured.
            if group.is_err() {
                continue;
            }
            let configured = Self::set_config(dev, pin, direction).and_then(|()| {
                if direction == Direction::Output {
                    Self::set_value(dev, pin, self.levels & (1 << pin) != 0)
                } else {
                    Ok(())
                }
            });
            if let Err(source) = configured {
                *group = Err(Error::Config { direction, source });
            }
        }
        outcome
    }

    fn read(&self, pin: u8) -> Result<bool, Error> {
        let dev = self.dev.as_ref().ok_or_else(|| Error::Io {
            pin,
            source: io::Error::new(io::ErrorKind::NotConnected, "backend not open"),
        })?;
        let mut req = GpioReq {
            gp_pin: u32::from(pin),
            gp_value: 0,
        };
        // SAFETY: GPIOGET writes the sampled value back into req.
        let rc = unsafe { libc::ioctl(dev.as_raw_fd(), GPIOGET, &mut req) };
        if rc < 0 {
            return Err(Error::Io {
                pin,
                source: io::Error::last_os_error(),
            });
        }
        Ok(req.gp_value != 0)
    }

    fn write(&mut self, pin: u8, value: bool) -> Result<(), Error> {
        let dev = self.dev.as_ref().ok_or_else(|| Error::Io {
            pin,
            source: io::Error::new(io::ErrorKind::NotConnected, "backend not open"),
        })?;
        Self::set_value(dev, pin, value).map_err(|source| Error::Io { pin, source })?;
        if value {
            self.levels |= 1 << pin;
        } else {
            self.levels &= !(1 << pin);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.dev = None;
    }
}
