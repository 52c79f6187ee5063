//! The single shared entry point for pin access.

use std::sync::{Mutex, RwLock};

use crate::backend::null::NullBackend;
use crate::backend::{Backend, Error};
use crate::cache::StateCache;
use crate::coordinator::RequestCoordinator;
use crate::pin::PinHandle;
use crate::registry::{valid_pin, Direction, PinRegistry, MAX_PINS};

/// Replaceable callback invoked with a human-readable description of every
/// backend failure. Installed with [`Gpio::set_error_handler`]; when none is
/// installed, failures go to a `log::warn!` line.
pub type ErrorHandler = fn(&str);

struct Inner {
    registry: PinRegistry,
    cache: StateCache,
    coordinator: RequestCoordinator,
}

impl Inner {
    fn sync(&mut self, errors: &mut Vec<Error>) {
        self.coordinator.sync(&self.registry, &self.cache, errors);
    }

    fn read_pin(&self, pin: u8, errors: &mut Vec<Error>) -> bool {
        if !self.coordinator.is_ready() {
            return false;
        }
        let direction = match self.registry.direction_of(pin) {
            Some(direction) => direction,
            None => {
                log::debug!("read of unconfigured pin {} returns low", pin);
                return false;
            }
        };
        // Output pins are answered from the cache, coherent with the last
        // write; input pins are driven externally and re-sample every time.
        if let Some(value) = self.cache.read_cached(pin) {
            return value;
        }
        if !self.coordinator.group_ok(direction) {
            return false;
        }
        match self.coordinator.read(pin) {
            Ok(value) => {
                self.cache.note(pin, value);
                value
            }
            Err(err) => {
                errors.push(err);
                false
            }
        }
    }

    fn write_pin(&mut self, pin: u8, value: bool, errors: &mut Vec<Error>) {
        if !self.coordinator.is_ready() {
            return;
        }
        if self.registry.direction_of(pin) != Some(Direction::Output) {
            log::debug!("write to non-output pin {} ignored", pin);
            return;
        }
        if !self.coordinator.group_ok(Direction::Output) {
            return;
        }
        match self.coordinator.write(pin, value) {
            Ok(()) => self.cache.note(pin, value),
            Err(err) => errors.push(err),
        }
    }
}

/// Uniform, thread-safe access to a bank of digital pins.
///
/// One instance serves the whole process: construct it in your startup code
/// and share it by reference (`&Gpio` or `Arc<Gpio>`). All methods are
/// callable from any thread; pin queries run concurrently under a shared
/// lock while configuration and writes are exclusive.
///
/// The backend is opened lazily on the first access and the facade then
/// settles into one of two states for the rest of the process: ready, or
/// (if the hardware is absent or inaccessible) unavailable, in which every
/// operation is a safe no-op and `read` returns `false`. A clock that can
/// drive a front-panel indicator must keep perfect time without one.
pub struct Gpio {
    inner: RwLock<Inner>,
    // Kept beside the RwLock, not inside it, so it can be snapshotted and
    // invoked after the inner guard is released.
    handler: Mutex<Option<ErrorHandler>>,
}

impl Gpio {
    /// Select a backend by probing the host: the GPIO character device
    /// first, then a memory-mapped register window, then the null backend.
    /// Probing only checks for device nodes; opening stays lazy.
    pub fn new() -> Gpio {
        Self::with_backend(probe_backend())
    }

    /// Use a specific backend, for startup-time selection by the
    /// integrator or for injecting a test double.
    pub fn with_backend(backend: Box<dyn Backend>) -> Gpio {
        Gpio {
            inner: RwLock::new(Inner {
                registry: PinRegistry::new(),
                cache: StateCache::new(),
                coordinator: RequestCoordinator::new(backend),
            }),
            handler: Mutex::new(None),
        }
    }

    /// Whether the backend opened successfully. The first call (like any
    /// first access) performs the one-time open.
    pub fn is_ready(&self) -> bool {
        let mut errors = Vec::new();
        let ready = {
            let inner = self.inner.read().unwrap();
            if inner.coordinator.needs_exclusive() {
                drop(inner);
                let mut inner = self.inner.write().unwrap();
                inner.sync(&mut errors);
                inner.coordinator.is_ready()
            } else {
                inner.coordinator.is_ready()
            }
        };
        self.report(&errors);
        ready
    }

    /// Declare the direction of `pin`. Touches no pin hardware: the
    /// batched reconfiguration happens on the next `read` or `write`, so
    /// configuring fifty pins costs one request rebuild, not fifty.
    pub fn set_direction(&self, pin: u8, direction: Direction) {
        if pin >= MAX_PINS {
            log::debug!("set_direction on nonexistent pin {} ignored", pin);
            return;
        }
        let mut errors = Vec::new();
        {
            let mut inner = self.inner.write().unwrap();
            inner.coordinator.ensure_open(&mut errors);
            if inner.coordinator.is_ready() {
                inner.registry.set_direction(pin, direction);
                inner.coordinator.mark_dirty();
                inner.cache.invalidate();
            }
        }
        self.report(&errors);
    }

    /// Drive an output pin. A no-op unless `pin` is currently configured
    /// as an output and its direction group is live.
    pub fn write(&self, pin: u8, value: bool) {
        if pin >= MAX_PINS {
            log::debug!("write to nonexistent pin {} ignored", pin);
            return;
        }
        let mut errors = Vec::new();
        {
            let mut inner = self.inner.write().unwrap();
            inner.sync(&mut errors);
            inner.write_pin(pin, value, &mut errors);
        }
        self.report(&errors);
    }

    /// The current level of `pin`. Returns `false` for unconfigured or
    /// nonexistent pins, for an unavailable facade, and on I/O failure
    /// (which is reported through the error handler).
    pub fn read(&self, pin: u8) -> bool {
        if pin >= MAX_PINS {
            log::debug!("read of nonexistent pin {} returns low", pin);
            return false;
        }
        let mut errors = Vec::new();
        let value = {
            let inner = self.inner.read().unwrap();
            if inner.coordinator.needs_exclusive() {
                // Promote by release-then-reacquire. RwLock has no upgrade,
                // and upgrading in place deadlocks against other readers;
                // sync() re-checks, so losing the race to another thread is
                // harmless.
                drop(inner);
                let mut inner = self.inner.write().unwrap();
                inner.sync(&mut errors);
                inner.read_pin(pin, &mut errors)
            } else {
                inner.read_pin(pin, &mut errors)
            }
        };
        self.report(&errors);
        value
    }

    /// Install (or with `None`, remove) the failure callback. The callback
    /// runs with no facade lock held, so it may call back into the facade.
    pub fn set_error_handler(&self, handler: Option<ErrorHandler>) {
        *self.handler.lock().unwrap() = handler;
    }

    /// A borrowed handle to one pin, usable with `embedded-hal` digital
    /// traits. Panics if `pin` cannot exist (see [`MAX_PINS`]).
    pub fn pin(&self, pin: u8) -> PinHandle<'_> {
        PinHandle::new(self, valid_pin(pin))
    }

    fn report(&self, errors: &[Error]) {
        if errors.is_empty() {
            return;
        }
        let handler = *self.handler.lock().unwrap();
        for error in errors {
            match handler {
                Some(handler) => handler(&error.to_string()),
                None => log::warn!("{}", error),
            }
        }
    }
}

impl Default for Gpio {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Gpio {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.coordinator.shutdown();
    }
}

fn probe_backend() -> Box<dyn Backend> {
    #[cfg(target_os = "linux")]
    {
        if let Some(backend) = crate::backend::cdev::CdevBackend::probe() {
            return Box::new(backend);
        }
        if let Some(backend) = crate::backend::mmap::MmapBackend::probe() {
            return Box::new(backend);
        }
    }
    #[cfg(target_os = "freebsd")]
    {
        if let Some(backend) = crate::backend::bsd::BsdBackend::probe() {
            return Box::new(backend);
        }
    }
    Box::new(NullBackend)
}
