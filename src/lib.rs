//! Uniform, thread-safe access layer for banks of host GPIO pins.
//!
//! Desktop and embedded-Linux applications that drive a handful of
//! indicator or peripheral pins face a zoo of mutually incompatible host
//! interfaces: modern kernels expose a character-device line-request API,
//! older images a memory-mappable register window, the BSDs a per-pin ioctl
//! API, and plenty of machines have no GPIO at all. This crate puts one
//! contract (declare a direction, read, write) in front of all of them,
//! and keeps the host traffic minimal, the locking safe, and the failure
//! mode boring: an application built on it keeps running, pins silently
//! inert, on hosts where the hardware is absent or inaccessible.
//!
//! # Construction
//!
//! Construct a single [`Gpio`] in your startup code and share it by
//! reference. [`Gpio::new`] probes the host (character device, then memory
//! map, then the null backend); [`Gpio::with_backend`] pins the choice:
//!
//! ```
//! use pinbank::{Direction, Gpio, NullBackend};
//!
//! let gpio = Gpio::with_backend(Box::new(NullBackend));
//! gpio.set_direction(4, Direction::Output);
//! gpio.write(4, true);
//! assert!(gpio.is_ready());
//! assert!(gpio.read(4));
//! ```
//!
//! Nothing is opened at construction time. The backend opens on the first
//! access, and the facade then stays either ready or, after an open
//! failure, permanently unavailable, where every operation is a safe
//! no-op and reads return low.
//!
//! # Batching and laziness
//!
//! Declaring directions is free: [`Gpio::set_direction`] records the wish
//! and marks the configuration dirty. The hardware request is rebuilt
//! lazily, on the next read or write, covering every configured pin at
//! once: configuring fifty outputs and then touching one of them costs
//! a single batched request, not fifty calls. On hosts whose API can batch
//! (the Linux character device), that is one system call per direction
//! group.
//!
//! Output levels are cached: reading back a pin you drive costs nothing.
//! Input pins are re-sampled on every read, since their level is driven
//! from outside.
//!
//! # Concurrency
//!
//! All methods are callable from any thread. Pin reads run concurrently
//! under the shared side of a reader-writer lock; configuration and writes
//! are exclusive. A reader that finds the configuration dirty releases its
//! shared access and reacquires exclusively to rebuild the request, never
//! upgrading in place, which is the classic self-deadlock.
//!
//! # Failure reporting
//!
//! Backend failures never panic and never propagate as `Result`s through
//! the pin API; they funnel through a single replaceable handler
//! ([`Gpio::set_error_handler`]), which defaults to a `log::warn!` line.
//! The handler runs with no lock held, so it may call back into the
//! facade. An open failure makes the facade unavailable; a rejected
//! request degrades only the affected direction group; a failed individual
//! read or write is reported and ignored.
//!
//! # HAL interop
//!
//! [`Gpio::pin`] hands out borrowed [`PinHandle`]s implementing the
//! `embedded-hal` digital traits, so existing driver crates can sit on top
//! of the facade:
//!
//! ```
//! use embedded_hal::digital::v2::OutputPin;
//! use pinbank::{Direction, Gpio, NullBackend};
//!
//! let gpio = Gpio::with_backend(Box::new(NullBackend));
//! let mut lamp = gpio.pin(17);
//! lamp.set_direction(Direction::Output);
//! lamp.set_high().unwrap();
//! ```
//!
//! # Scope
//!
//! The layer models binary input/output on a single bank of up to
//! [`MAX_PINS`] application-numbered pins. Edge-triggered events, multiple
//! chips, and alternate pin functions are out of scope; polling is the
//! model. Mapping header/connector numbers to pin indices belongs to the
//! caller.

pub mod backend;
pub mod cache;
mod coordinator;
pub mod facade;
pub mod pin;
pub mod registry;

pub use backend::null::NullBackend;
pub use backend::{Backend, BatchOutcome, Error};
pub use cache::StateCache;
pub use facade::{ErrorHandler, Gpio};
pub use pin::PinHandle;
pub use registry::{Direction, PinRegistry, MAX_PINS};
