//! The memory-mapped backend drives pins through a directly mapped
//! BCM-style GPIO register window (`/dev/gpiomem` on older Linux images).
//! After `open` there are no system calls at all: direction changes are
//! function-select register writes, and reads and writes are single
//! volatile word accesses.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;

use super::{Backend, BatchOutcome, Error};
use crate::registry::Direction;

const DEFAULT_MEM: &str = "/dev/gpiomem";

// Word offsets into the register window.
const GPFSEL0: usize = 0x00 / 4;
const GPSET0: usize = 0x1C / 4;
const GPCLR0: usize = 0x28 / 4;
const GPLEV0: usize = 0x34 / 4;

const PAGE_SIZE: usize = 4096;

// The function-select registers cover 54 lines; past that the window holds
// reserved and set/clear registers that must not be written through this
// path.
const WINDOW_PINS: u8 = 54;

struct Mapping {
    base: *mut u32,
}

// SAFETY: the mapping points at device registers, accessed exclusively with
// volatile word operations; the facade lock serializes all mutation.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    fn read_reg(&self, index: usize) -> u32 {
        debug_assert!(index < PAGE_SIZE / 4);
        // SAFETY: index stays inside the mapped page.
        unsafe { ptr::read_volatile(self.base.add(index)) }
    }

    fn write_reg(&self, index: usize, value: u32) {
        debug_assert!(index < PAGE_SIZE / 4);
        // SAFETY: index stays inside the mapped page.
        unsafe { ptr::write_volatile(self.base.add(index), value) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: base came from a successful mmap of PAGE_SIZE bytes.
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, PAGE_SIZE);
        }
    }
}

/// Backend for hosts exposing the GPIO controller as a mapped register
/// window. Pin indices map directly to controller lines; only indices below
/// the 54-line window are accepted.
pub struct MmapBackend {
    path: PathBuf,
    map: Option<Mapping>,
    // Last level driven per output pin, so a rebuild re-drives continuing
    // outputs instead of glitching them low.
    levels: u64,
}

impl MmapBackend {
    /// A backend against the given memory device node. Nothing is opened or
    /// mapped until the first facade access.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            map: None,
            levels: 0,
        }
    }

    /// A backend against `/dev/gpiomem` if that node exists.
    pub fn probe() -> Option<Self> {
        if Path::new(DEFAULT_MEM).exists() {
            Some(Self::new(DEFAULT_MEM))
        } else {
            None
        }
    }

    fn not_open(direction: Direction) -> Error {
        Error::Config {
            direction,
            source: io::Error::new(io::ErrorKind::NotConnected, "backend not open"),
        }
    }

    fn set_function(map: &Mapping, pin: u8, output: bool) {
        let reg = GPFSEL0 + usize::from(pin) / 10;
        let shift = (usize::from(pin) % 10) * 3;
        let mut fsel = map.read_reg(reg);
        fsel &= !(0b111 << shift);
        if output {
            fsel |= 0b001 << shift;
        }
        map.write_reg(reg, fsel);
    }

    fn drive_banks(map: &Mapping, set_mask: u64, clear_mask: u64) {
        for bank in 0..2 {
            let set = (set_mask >> (bank * 32)) as u32;
            let clear = (clear_mask >> (bank * 32)) as u32;
            if set != 0 {
                map.write_reg(GPSET0 + bank, set);
            }
            if clear != 0 {
                map.write_reg(GPCLR0 + bank, clear);
            }
        }
    }
}

impl Backend for MmapBackend {
    fn open(&mut self) -> Result<(), Error> {
        let path = CString::new(self.path.as_os_str().as_bytes()).map_err(|_| Error::Open {
            source: io::Error::new(io::ErrorKind::InvalidInput, "device path contains NUL"),
        })?;
        // SAFETY: path is a valid NUL-terminated string.
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR | libc::O_SYNC | libc::O_CLOEXEC) };
        if fd < 0 {
            return Err(Error::Open {
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: fd is a freshly opened descriptor; the mapping outlives
        // the descriptor, which can be closed once mmap returns.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                PAGE_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        let mmap_err = io::Error::last_os_error();
        // SAFETY: fd came from open above.
        unsafe { libc::close(fd) };
        if base == libc::MAP_FAILED {
            return Err(Error::Open { source: mmap_err });
        }
        self.map = Some(Mapping {
            base: base as *mut u32,
        });
        Ok(())
    }

    fn configure_batch(&mut self, pins: &[(u8, Direction)]) -> BatchOutcome {
        let map = match self.map.as_ref() {
            Some(map) => map,
            None => {
                return BatchOutcome {
                    inputs: Err(Self::not_open(Direction::Input)),
                    outputs: Err(Self::not_open(Direction::Output)),
                }
            }
        };

        let mut outcome = BatchOutcome::ok();
        let mut output_mask = 0u64;
        for &(pin, direction) in pins {
            if pin >= WINDOW_PINS {
                let err = Err(Error::Config {
                    direction,
                    source: io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("pin {} is outside the {}-line register window", pin, WINDOW_PINS),
                    ),
                });
                match direction {
                    Direction::Input => outcome.inputs = err,
                    Direction::Output => outcome.outputs = err,
                }
            } else if direction == Direction::Output {
                output_mask |= 1 << pin;
            }
        }

        for &(pin, direction) in pins {
            if pin >= WINDOW_PINS {
                continue;
            }
            let group_ok = match direction {
                Direction::Input => outcome.inputs.is_ok(),
                Direction::Output => outcome.outputs.is_ok(),
            };
            if group_ok {
                Self::set_function(map, pin, direction == Direction::Output);
            }
        }

        if outcome.outputs.is_ok() {
            // Pins leaving the output group forget their driven level; the
            // rest are re-driven so continuing outputs hold steady and new
            // ones start low.
            self.levels &= output_mask;
            Self::drive_banks(map, self.levels & output_mask, !self.levels & output_mask);
        }
        outcome
    }

    fn read(&self, pin: u8) -> Result<bool, Error> {
        let map = self.map.as_ref().filter(|_| pin < WINDOW_PINS).ok_or_else(|| Error::Io {
            pin,
            source: io::Error::new(io::ErrorKind::NotConnected, "pin not mapped"),
        })?;
        let level = map.read_reg(GPLEV0 + usize::from(pin) / 32);
        Ok(level & (1 << (pin % 32)) != 0)
    }

    fn write(&mut self, pin: u8, value: bool) -> Result<(), Error> {
        let map = self.map.as_ref().filter(|_| pin < WINDOW_PINS).ok_or_else(|| Error::Io {
            pin,
            source: io::Error::new(io::ErrorKind::NotConnected, "pin not mapped"),
        })?;
        let bit = 1u64 << pin;
        if value {
            map.write_reg(GPSET0 + usize::from(pin) / 32, 1 << (pin % 32));
            self.levels |= bit;
        } else {
            map.write_reg(GPCLR0 + usize::from(pin) / 32, 1 << (pin % 32));
            self.levels &= !bit;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.map = None;
    }
}
