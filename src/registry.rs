use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::error::{Result, TimerError};
use crate::id::TimerId;
use crate::options::{GetterOptions, TimerOptions};
use crate::timer::Timer;

/// Identifier to timer map shared by every timer created against it.
///
/// Cloning yields another handle on the same map. Iteration order is the
/// identifier order: numbers ascending, then names.
#[derive(Clone, Default)]
pub struct Registry {
    timers: Arc<Mutex<BTreeMap<TimerId, Timer>>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry, created on first use.
    ///
    /// It lives until the process exits; call [`Registry::destroy_all`] to
    /// tear it down between unrelated uses.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    /// Look a timer up, creating it when absent and `options.create_one`.
    ///
    /// # Errors
    ///
    /// `InvalidIdentifier` for an empty name or zero, or any construction
    /// error when a timer has to be created.
    pub fn get_by_id(
        &self,
        id: impl Into<TimerId>,
        options: GetterOptions,
    ) -> Result<Option<Timer>> {
        let id = id.into();
        id.validate()?;

        if !options.create_one {
            return Ok(self.timers.lock().get(&id).cloned());
        }

        let GetterOptions {
            duration, timer, ..
        } = options;
        let options = TimerOptions {
            id: Some(id),
            ..timer
        };
        Timer::find_or_new(self, duration, options).map(Some)
    }

    /// Every registered timer, in identifier order.
    #[must_use]
    pub fn get_all(&self) -> Vec<Timer> {
        self.timers.lock().values().cloned().collect()
    }

    /// Destroy every registered timer.
    ///
    /// With `force`, each timer is aborted first, so running timers fire
    /// their callbacks and become destroyable. Without it, running timers
    /// refuse destruction and stay registered.
    pub fn destroy_all(&self, force: bool) {
        for timer in self.get_all() {
            if force {
                timer.abort(&[]);
            }
            if let Err(err) = timer.destroy() {
                log::debug!("Registry kept timer: {}", err);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.lock().is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &TimerId) -> bool {
        self.timers.lock().contains_key(id)
    }

    /// Resolve the identifier for a new timer and build it, registering it
    /// when `persist`. Runs under the registry lock so two concurrent
    /// constructions can never claim the same identifier.
    ///
    /// With `reuse`, a timer already registered under the requested
    /// identifier is returned as `Admitted::Existing` instead of failing.
    pub(crate) fn admit(
        &self,
        requested: Option<TimerId>,
        force_create: bool,
        persist: bool,
        reuse: bool,
        build: impl FnOnce(TimerId) -> Timer,
    ) -> Result<Admitted> {
        let mut timers = self.timers.lock();

        if reuse {
            if let Some(timer) = requested.as_ref().and_then(|id| timers.get(id)) {
                return Ok(Admitted::Existing(timer.clone()));
            }
        }

        let id = match requested {
            None => Self::next_free(&timers),
            Some(id) => match Self::claimable(&timers, id) {
                Ok(id) => id,
                Err(_) if force_create => Self::next_free(&timers),
                Err(err) => return Err(err),
            },
        };

        let timer = build(id.clone());
        if persist {
            timers.insert(id, timer.clone());
        }
        Ok(Admitted::Created(timer))
    }

    /// Drop `timer`'s entry, but only if the entry is that very timer.
    pub(crate) fn remove(&self, id: &TimerId, timer: &Timer) {
        let mut timers = self.timers.lock();
        if timers.get(id).is_some_and(|t| Timer::ptr_eq(t, timer)) {
            timers.remove(id);
        }
    }

    fn claimable(timers: &BTreeMap<TimerId, Timer>, id: TimerId) -> Result<TimerId> {
        id.validate()?;
        if timers.contains_key(&id) {
            return Err(TimerError::DuplicateIdentifier(id));
        }
        Ok(id)
    }

    fn next_free(timers: &BTreeMap<TimerId, Timer>) -> TimerId {
        // numeric keys come first and ascending, so the first gap is the answer
        let mut next = 1;
        for n in timers.keys().map_while(TimerId::as_num) {
            if n != next {
                break;
            }
            next += 1;
        }
        TimerId::Num(next)
    }
}

/// Result of [`Registry::admit`].
pub(crate) enum Admitted {
    Created(Timer),
    Existing(Timer),
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.timers.lock().keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    fn ids(registry: &Registry) -> Vec<TimerId> {
        registry
            .get_all()
            .iter()
            .filter_map(Timer::id)
            .collect()
    }

    #[test]
    fn test_auto_ids_ascend_and_reuse_gaps() {
        let registry = Registry::new();
        let timers: Vec<Timer> = (0..3)
            .map(|_| Timer::new(&registry, Some(1000), TimerOptions::default()).unwrap())
            .collect();
        assert_eq!(
            ids(&registry),
            vec![TimerId::Num(1), TimerId::Num(2), TimerId::Num(3)]
        );

        timers[1].destroy().unwrap();
        let refill = Timer::new(&registry, Some(1000), TimerOptions::default()).unwrap();
        assert_eq!(refill.id(), Some(TimerId::Num(2)));

        let next = Timer::new(&registry, Some(1000), TimerOptions::default()).unwrap();
        assert_eq!(next.id(), Some(TimerId::Num(4)));
    }

    #[test]
    fn test_names_do_not_consume_numbers() {
        let registry = Registry::new();
        Timer::new(&registry, None, TimerOptions::new().id("alpha")).unwrap();
        let timer = Timer::new(&registry, None, TimerOptions::default()).unwrap();
        assert_eq!(timer.id(), Some(TimerId::Num(1)));
    }

    #[test]
    fn test_get_by_id_creates_then_finds() {
        let registry = Registry::new();
        assert!(registry
            .get_by_id("worker", GetterOptions::existing())
            .unwrap()
            .is_none());

        let created = registry
            .get_by_id("worker", GetterOptions::default().duration(750))
            .unwrap()
            .unwrap();
        assert_eq!(created.duration().as_millis(), 750);

        let found = registry
            .get_by_id("worker", GetterOptions::existing())
            .unwrap()
            .unwrap();
        assert!(Timer::ptr_eq(&created, &found));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_by_id_rejects_invalid_ids() {
        let registry = Registry::new();
        assert!(matches!(
            registry.get_by_id(0_u64, GetterOptions::default()),
            Err(TimerError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            registry.get_by_id("", GetterOptions::default()),
            Err(TimerError::InvalidIdentifier(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregistered_timer_does_not_evict_namesake() {
        let registry = Registry::new();
        let loose = Timer::new(&registry, None, TimerOptions::new().id("job").persist(false))
            .unwrap();
        let kept = Timer::new(&registry, None, TimerOptions::new().id("job")).unwrap();

        loose.destroy().unwrap();
        assert!(registry.contains(&TimerId::from("job")));
        assert!(kept.id().is_some());
    }

    #[tokio::test]
    async fn test_destroy_all_spares_running_unless_forced() {
        let registry = Registry::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let idle = Timer::new(&registry, Some(1000), TimerOptions::default()).unwrap();
        let busy = Timer::new(&registry, Some(1000), TimerOptions::default()).unwrap();
        let counter = fired.clone();
        busy.launch_timer(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            &[],
        )
        .unwrap();

        registry.destroy_all(false);
        assert!(idle.is_destroyed());
        assert!(!busy.is_destroyed());
        assert_eq!(registry.len(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        registry.destroy_all(true);
        assert!(busy.is_destroyed());
        assert!(registry.is_empty());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_get_by_id_shares_one_timer() {
        let registry = Registry::new();
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry
                        .get_by_id("shared", GetterOptions::default().duration(500))
                        .unwrap()
                        .unwrap()
                })
            })
            .collect();
        let timers: Vec<Timer> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(registry.len(), 1);
        assert!(timers.iter().all(|t| Timer::ptr_eq(t, &timers[0])));
    }

    #[test]
    fn test_find_or_new_keeps_existing_duration() {
        let registry = Registry::new();
        let first = Timer::find_or_new(
            &registry,
            Some(300),
            TimerOptions::new().id("stable"),
        )
        .unwrap();
        let again = Timer::find_or_new(
            &registry,
            Some(9000),
            TimerOptions::new().id("stable"),
        )
        .unwrap();

        assert!(Timer::ptr_eq(&first, &again));
        assert_eq!(again.duration().as_millis(), 300);
    }

    #[test]
    fn test_global_is_shared() {
        assert!(std::ptr::eq(Registry::global(), Registry::global()));
    }
}
