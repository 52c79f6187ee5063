//! Decides when to pay the cost of reconfiguring the hardware request.

use crate::backend::{Backend, Error};
use crate::cache::StateCache;
use crate::registry::{Direction, PinRegistry};

/// The facade-level availability state machine. The transition out of
/// `Uninitialized` happens exactly once, on first access, and `Unavailable`
/// is terminal for the process lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Availability {
    Uninitialized,
    Ready,
    Unavailable,
}

/// Owner of the backend handle. Tracks whether the registry has changed
/// since the last hardware request (`dirty`) and rebuilds the request at
/// most once per change, batching every configured pin into the rebuild.
///
/// Failures are accumulated into the caller's error list instead of being
/// reported here: the reporter callback must only ever run outside the
/// facade lock, and the coordinator always runs inside it.
pub(crate) struct RequestCoordinator {
    backend: Box<dyn Backend>,
    state: Availability,
    dirty: bool,
    inputs_ok: bool,
    outputs_ok: bool,
}

impl RequestCoordinator {
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            state: Availability::Uninitialized,
            dirty: false,
            inputs_ok: true,
            outputs_ok: true,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == Availability::Ready
    }

    /// Whether the next access must hold exclusive access first: either the
    /// one-time open is still pending, or the registry is dirty.
    pub fn needs_exclusive(&self) -> bool {
        match self.state {
            Availability::Uninitialized => true,
            Availability::Ready => self.dirty,
            Availability::Unavailable => false,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Perform the one-time lazy open. Touches no pins; configuration stays
    /// pending until a pin is actually accessed.
    pub fn ensure_open(&mut self, errors: &mut Vec<Error>) {
        if self.state != Availability::Uninitialized {
            return;
        }
        match self.backend.open() {
            Ok(()) => self.state = Availability::Ready,
            Err(err) => {
                self.state = Availability::Unavailable;
                errors.push(err);
            }
        }
    }

    /// Open if still pending, then rebuild the hardware request if the
    /// registry changed. The rebuild covers the entire configured set in
    /// one `configure_batch` call; a rejected direction group goes inert
    /// and is not retried until the registry is dirtied again.
    pub fn sync(&mut self, registry: &PinRegistry, cache: &StateCache, errors: &mut Vec<Error>) {
        self.ensure_open(errors);
        if self.state != Availability::Ready || !self.dirty {
            return;
        }
        let pins = registry.snapshot();
        let outcome = self.backend.configure_batch(&pins);
        self.dirty = false;
        self.inputs_ok = outcome.inputs.is_ok();
        self.outputs_ok = outcome.outputs.is_ok();
        errors.extend(outcome.inputs.err());
        errors.extend(outcome.outputs.err());
        let output_mask = if self.outputs_ok {
            registry.output_mask()
        } else {
            0
        };
        cache.rebuild(output_mask);
    }

    pub fn group_ok(&self, direction: Direction) -> bool {
        match direction {
            Direction::Input => self.inputs_ok,
            Direction::Output => self.outputs_ok,
        }
    }

    pub fn read(&self, pin: u8) -> Result<bool, Error> {
        self.backend.read(pin)
    }

    pub fn write(&mut self, pin: u8, value: bool) -> Result<(), Error> {
        self.backend.write(pin, value)
    }

    pub fn shutdown(&mut self) {
        self.backend.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_spy::SpyBackend;

    fn coordinator(spy: &SpyBackend) -> (RequestCoordinator, PinRegistry, StateCache) {
        (
            RequestCoordinator::new(Box::new(spy.split())),
            PinRegistry::new(),
            StateCache::new(),
        )
    }

    #[test]
    fn open_happens_once() {
        let spy = SpyBackend::new();
        let (mut coord, registry, cache) = coordinator(&spy);
        let mut errors = Vec::new();
        coord.sync(&registry, &cache, &mut errors);
        coord.sync(&registry, &cache, &mut errors);
        assert_eq!(spy.open_calls(), 1);
        assert!(coord.is_ready());
        assert!(errors.is_empty());
    }

    #[test]
    fn open_failure_is_terminal() {
        let spy = SpyBackend::new();
        spy.fail_open();
        let (mut coord, registry, cache) = coordinator(&spy);
        let mut errors = Vec::new();
        coord.sync(&registry, &cache, &mut errors);
        assert!(!coord.is_ready());
        assert_eq!(errors.len(), 1);
        // Never retried.
        coord.sync(&registry, &cache, &mut errors);
        assert_eq!(spy.open_calls(), 1);
        assert!(!coord.needs_exclusive());
    }

    #[test]
    fn reconfigures_at_most_once_per_dirtying() {
        let spy = SpyBackend::new();
        let (mut coord, mut registry, cache) = coordinator(&spy);
        let mut errors = Vec::new();
        registry.set_direction(1, Direction::Output);
        registry.set_direction(2, Direction::Output);
        coord.mark_dirty();
        coord.sync(&registry, &cache, &mut errors);
        coord.sync(&registry, &cache, &mut errors);
        assert_eq!(spy.configure_calls().len(), 1);
        assert_eq!(
            spy.configure_calls()[0],
            vec![(1, Direction::Output), (2, Direction::Output)]
        );
    }

    #[test]
    fn failed_group_goes_inert_until_next_dirtying() {
        let spy = SpyBackend::new();
        spy.fail_outputs();
        let (mut coord, mut registry, cache) = coordinator(&spy);
        let mut errors = Vec::new();
        registry.set_direction(0, Direction::Output);
        registry.set_direction(1, Direction::Input);
        coord.mark_dirty();
        coord.sync(&registry, &cache, &mut errors);
        assert_eq!(errors.len(), 1);
        assert!(!coord.group_ok(Direction::Output));
        assert!(coord.group_ok(Direction::Input));
        // No retry storm: further syncs without dirtying do nothing.
        coord.sync(&registry, &cache, &mut errors);
        assert_eq!(spy.configure_calls().len(), 1);
        // Dirtying the registry retries once.
        coord.mark_dirty();
        coord.sync(&registry, &cache, &mut errors);
        assert_eq!(spy.configure_calls().len(), 2);
    }
}
