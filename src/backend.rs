//! The platform-specific implementations that turn logical pin operations
//! into host system calls. This is the seam between the request coordinator
//! and whatever the host actually offers: a character-device line-request
//! API, a memory-mapped register window, a BSD pin ioctl API, or nothing.

use std::io;

use thiserror::Error as ThisError;

use crate::registry::Direction;

#[cfg(target_os = "freebsd")]
pub mod bsd;
#[cfg(target_os = "linux")]
pub mod cdev;
#[cfg(target_os = "linux")]
pub mod mmap;

/// The union of failures a backend can produce. Nothing here is fatal: the
/// facade maps `Open` to permanent unavailability, `Config` to an inert
/// direction group, and `Io` to a reported-and-ignored single operation.
#[derive(Debug, ThisError)]
pub enum Error {
    /// The platform resource (device node, memory mapping) could not be
    /// acquired. Typical causes are a missing device or insufficient
    /// permissions.
    #[error("failed to open GPIO backend: {source}")]
    Open {
        #[source]
        source: io::Error,
    },

    /// The host rejected the batched request for one direction group.
    #[error("{direction} line request rejected: {source}")]
    Config {
        direction: Direction,
        #[source]
        source: io::Error,
    },

    /// A single read or write failed after successful configuration.
    #[error("I/O failed on pin {pin}: {source}")]
    Io {
        pin: u8,
        #[source]
        source: io::Error,
    },
}

/// Per-direction-group results of a [`configure_batch`] call.
///
/// The two groups are requested independently, so the host can reject one
/// while the other stays live; the coordinator degrades only the rejected
/// group.
///
/// [`configure_batch`]: Backend::configure_batch
#[derive(Debug)]
pub struct BatchOutcome {
    pub inputs: Result<(), Error>,
    pub outputs: Result<(), Error>,
}

impl BatchOutcome {
    /// Both groups accepted.
    pub fn ok() -> Self {
        Self {
            inputs: Ok(()),
            outputs: Ok(()),
        }
    }
}

/// A host interface for digital pins.
///
/// One implementation exists per platform variant; the rest of the layer is
/// generic over this trait and never branches on the concrete backend.
///
/// The receiver types encode the locking model: `read` takes `&self` so any
/// number of threads may sample pins concurrently under the shared side of
/// the facade lock, while `open`, `configure_batch`, `write` and `close`
/// take `&mut self` and only ever run under exclusive access.
pub trait Backend: Send + Sync {
    /// Acquire the platform resource. Called once, lazily, on the first
    /// facade access; failure degrades the facade permanently and must not
    /// terminate the process.
    fn open(&mut self) -> Result<(), Error>;

    /// Replace any existing hardware request with one covering exactly
    /// `pins`, the complete current configured set in ascending index order.
    ///
    /// Where the host API permits it, this costs at most two system calls
    /// per direction group regardless of pin count. A pin newly configured
    /// (or re-configured) as an output drives low until the first `write`;
    /// a pin that remains an output keeps its previously driven level.
    fn configure_batch(&mut self, pins: &[(u8, Direction)]) -> BatchOutcome;

    /// Sample the current level of a pin included in the last batch.
    fn read(&self, pin: u8) -> Result<bool, Error>;

    /// Drive the level of a pin included in the last batch as an output.
    fn write(&mut self, pin: u8, value: bool) -> Result<(), Error>;

    /// Release all handles. Idempotent.
    fn close(&mut self);
}

pub mod null {
    //! The no-hardware variant: every operation succeeds and does nothing.

    use super::{Backend, BatchOutcome, Error};
    use crate::registry::Direction;

    /// Backend for hosts without GPIO hardware. Opens successfully, accepts
    /// any configuration, reads low. Useful as the probe-chain fallback and
    /// in tests and doctests.
    #[derive(Debug, Default)]
    pub struct NullBackend;

    impl Backend for NullBackend {
        fn open(&mut self) -> Result<(), Error> {
            Ok(())
        }
        fn configure_batch(&mut self, _pins: &[(u8, Direction)]) -> BatchOutcome {
            BatchOutcome::ok()
        }
        fn read(&self, _pin: u8) -> Result<bool, Error> {
            Ok(false)
        }
        fn write(&mut self, _pin: u8, _value: bool) -> Result<(), Error> {
            Ok(())
        }
        fn close(&mut self) {}
    }
}

#[cfg(test)]
pub(crate) mod test_spy {
    //! A backend for unit tests that records every call made to it and can
    //! inject failures and delays.

    use std::io;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use super::{Backend, BatchOutcome, Error};
    use crate::registry::Direction;

    fn injected(what: &str) -> io::Error {
        io::Error::new(io::ErrorKind::Other, format!("injected {} failure", what))
    }

    #[derive(Default)]
    struct SpyState {
        open_calls: usize,
        close_calls: usize,
        configure_calls: Vec<Vec<(u8, Direction)>>,
        reads: Vec<u8>,
        writes: Vec<(u8, bool)>,
        levels: u64,
        fail_open: bool,
        fail_inputs: bool,
        fail_outputs: bool,
        fail_reads: bool,
        read_delay: Option<Duration>,
    }

    pub struct SpyBackend {
        state: Arc<Mutex<SpyState>>,
    }

    impl SpyBackend {
        pub fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(SpyState::default())),
            }
        }

        /// Another handle onto the same recorded state, for keeping a view
        /// after the backend itself is moved into a facade.
        pub fn split(&self) -> Self {
            Self {
                state: self.state.clone(),
            }
        }

        pub fn open_calls(&self) -> usize {
            self.state.lock().unwrap().open_calls
        }
        pub fn close_calls(&self) -> usize {
            self.state.lock().unwrap().close_calls
        }
        pub fn configure_calls(&self) -> Vec<Vec<(u8, Direction)>> {
            self.state.lock().unwrap().configure_calls.clone()
        }
        pub fn reads(&self) -> Vec<u8> {
            self.state.lock().unwrap().reads.clone()
        }
        pub fn writes(&self) -> Vec<(u8, bool)> {
            self.state.lock().unwrap().writes.clone()
        }

        /// Set the level an input pin will sample as.
        pub fn set_level(&self, pin: u8, value: bool) {
            let mut state = self.state.lock().unwrap();
            if value {
                state.levels |= 1 << pin;
            } else {
                state.levels &= !(1 << pin);
            }
        }
        pub fn fail_open(&self) {
            self.state.lock().unwrap().fail_open = true;
        }
        pub fn fail_inputs(&self) {
            self.state.lock().unwrap().fail_inputs = true;
        }
        pub fn fail_outputs(&self) {
            self.state.lock().unwrap().fail_outputs = true;
        }
        pub fn fail_reads(&self, fail: bool) {
            self.state.lock().unwrap().fail_reads = fail;
        }
        pub fn set_read_delay(&self, delay: Duration) {
            self.state.lock().unwrap().read_delay = Some(delay);
        }
    }

    impl Backend for SpyBackend {
        fn open(&mut self) -> Result<(), Error> {
            let mut state = self.state.lock().unwrap();
            state.open_calls += 1;
            if state.fail_open {
                Err(Error::Open {
                    source: injected("open"),
                })
            } else {
                Ok(())
            }
        }

        fn configure_batch(&mut self, pins: &[(u8, Direction)]) -> BatchOutcome {
            let mut state = self.state.lock().unwrap();
            state.configure_calls.push(pins.to_vec());
            let has = |wanted: Direction| pins.iter().any(|&(_, d)| d == wanted);
            let group = |failing: bool, direction: Direction| {
                if failing && has(direction) {
                    Err(Error::Config {
                        direction,
                        source: injected("configure"),
                    })
                } else {
                    Ok(())
                }
            };
            BatchOutcome {
                inputs: group(state.fail_inputs, Direction::Input),
                outputs: group(state.fail_outputs, Direction::Output),
            }
        }

        fn read(&self, pin: u8) -> Result<bool, Error> {
            // Sleep before taking the spy's own lock, so two facade-level
            // concurrent reads stay concurrent here too.
            let delay = self.state.lock().unwrap().read_delay;
            if let Some(delay) = delay {
                thread::sleep(delay);
            }
            let mut state = self.state.lock().unwrap();
            if state.fail_reads {
                return Err(Error::Io {
                    pin,
                    source: injected("read"),
                });
            }
            state.reads.push(pin);
            Ok(state.levels & (1 << pin) != 0)
        }

        fn write(&mut self, pin: u8, value: bool) -> Result<(), Error> {
            let mut state = self.state.lock().unwrap();
            state.writes.push((pin, value));
            if value {
                state.levels |= 1 << pin;
            } else {
                state.levels &= !(1 << pin);
            }
            Ok(())
        }

        fn close(&mut self) {
            self.state.lock().unwrap().close_calls += 1;
        }
    }
}
