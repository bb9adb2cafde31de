// SPDX-License-Identifier: MIT
#![allow(unsafe_code)]
//
// Event loop — signals, timers, and descriptor readiness as callbacks.
//
// Everything runs on the thread that calls `run`. There is no parallelism:
// the loop blocks in `poll(2)` until the nearest timer deadline or until a
// watched descriptor (or the signal wake pipe) becomes readable, then
// invokes each ready callback in turn and goes back to waiting.
//
// # Sources
//
//   Signal   — the OS handler only flips a bit (see `signal.rs`); the
//              callback runs here, in normal context, on the next wake.
//   Timer    — one-shot or repeating. A repeating timer's next deadline is
//              `deadline + interval`, never `now + interval`, so lateness
//              does not accumulate into drift. A repeating timer whose
//              next deadline is past what `Instant` can hold runs once
//              more and is then retired.
//   Readable — invoked once per wake while the descriptor has data. How
//              much to read is the callback's business.
//
// # Ordering
//
// Within one wake: signals first, then due timers (earliest deadline
// first, registration order on ties), then readable descriptors
// (registration order). Across wakes a timer never fires before its
// deadline but may fire later under load.
//
// # Cancellation
//
// `Registry::cancel` removes a source immediately. Liveness is checked
// again right before each invocation, so cancelling a source that is
// already queued in the current wake stops its callback from running.
//
// # Failure
//
// A callback that returns `Err` or panics is logged and the loop carries
// on. Only a failure of `poll` itself, or a watched descriptor that is not
// open (POLLNVAL), ends `run` with an error.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use crate::device::poll_timeout_ms;
use crate::error::{Error, Result};
use crate::signal::{self, SavedAction};

/// What a callback returns. Errors are logged, never propagated.
pub type CallbackResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Callback = Box<dyn FnMut(&mut Registry) -> CallbackResult>;

/// Handle to a registered event source, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a source waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Delivery of a signal.
    Signal(libc::c_int),
    /// A deadline, optionally repeating every `interval`.
    Timer {
        deadline: Instant,
        interval: Option<Duration>,
    },
    /// Data available on a descriptor.
    Readable(RawFd),
}

struct Source {
    kind: SourceKind,
    /// `None` only while the callback itself is running.
    callback: Option<Callback>,
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// The set of live event sources.
///
/// Callbacks receive `&mut Registry`, so they can register new sources,
/// cancel existing ones (including themselves), or stop the loop.
pub struct Registry {
    next_id: u64,
    sources: BTreeMap<SourceId, Source>,
    /// Dispositions to put back when the last callback for a signal goes.
    saved_actions: HashMap<libc::c_int, SavedAction>,
    quit: bool,
}

impl Registry {
    fn new() -> Self {
        Self {
            next_id: 1,
            sources: BTreeMap::new(),
            saved_actions: HashMap::new(),
            quit: false,
        }
    }

    fn insert(&mut self, kind: SourceKind, callback: Callback) -> SourceId {
        let id = SourceId(self.next_id);
        self.next_id += 1;
        log::debug!("registered {id}: {kind:?}");
        self.sources.insert(
            id,
            Source {
                kind,
                callback: Some(callback),
            },
        );
        id
    }

    /// Run `callback` whenever `signo` is delivered.
    ///
    /// Several callbacks may share one signal; each runs once per wake in
    /// which the signal was seen.
    ///
    /// # Errors
    ///
    /// [`Error::Registration`] for a signal that cannot be caught,
    /// [`Error::Io`] if the handler cannot be installed.
    pub fn add_signal<F>(&mut self, signo: libc::c_int, callback: F) -> Result<SourceId>
    where
        F: FnMut(&mut Self) -> CallbackResult + 'static,
    {
        signal::validate(signo)?;
        if !self.saved_actions.contains_key(&signo) {
            let saved = signal::install(signo)?;
            self.saved_actions.insert(signo, saved);
        }
        Ok(self.insert(SourceKind::Signal(signo), Box::new(callback)))
    }

    /// Run `callback` once, `delay` from now.
    ///
    /// # Errors
    ///
    /// See [`add_timer_at`](Self::add_timer_at).
    pub fn add_timeout<F>(&mut self, delay: Duration, callback: F) -> Result<SourceId>
    where
        F: FnMut(&mut Self) -> CallbackResult + 'static,
    {
        self.add_timer(delay, None, callback)
    }

    /// Run `callback` every `interval`, starting one interval from now.
    ///
    /// # Errors
    ///
    /// See [`add_timer_at`](Self::add_timer_at).
    pub fn add_interval<F>(&mut self, interval: Duration, callback: F) -> Result<SourceId>
    where
        F: FnMut(&mut Self) -> CallbackResult + 'static,
    {
        self.add_timer(interval, Some(interval), callback)
    }

    /// Run `callback` after `delay`, then every `interval` if given.
    ///
    /// # Errors
    ///
    /// See [`add_timer_at`](Self::add_timer_at).
    pub fn add_timer<F>(
        &mut self,
        delay: Duration,
        interval: Option<Duration>,
        callback: F,
    ) -> Result<SourceId>
    where
        F: FnMut(&mut Self) -> CallbackResult + 'static,
    {
        let deadline = Instant::now()
            .checked_add(delay)
            .ok_or_else(|| Error::Registration(format!("timer delay {delay:?} overflows")))?;
        self.add_timer_at(deadline, interval, callback)
    }

    /// Run `callback` at `deadline`, then every `interval` if given.
    ///
    /// # Errors
    ///
    /// [`Error::Registration`] for a zero interval, which would never let
    /// the loop sleep, or for one too large to add to `deadline`.
    pub fn add_timer_at<F>(
        &mut self,
        deadline: Instant,
        interval: Option<Duration>,
        callback: F,
    ) -> Result<SourceId>
    where
        F: FnMut(&mut Self) -> CallbackResult + 'static,
    {
        if let Some(interval) = interval {
            if interval.is_zero() {
                return Err(Error::Registration("timer interval must be positive".into()));
            }
            if deadline.checked_add(interval).is_none() {
                return Err(Error::Registration(format!("timer interval {interval:?} overflows")));
            }
        }
        Ok(self.insert(SourceKind::Timer { deadline, interval }, Box::new(callback)))
    }

    /// Run `callback` whenever `fd` has data to read.
    ///
    /// # Errors
    ///
    /// [`Error::Registration`] for a negative descriptor or one that is
    /// already watched.
    pub fn add_readable<F>(&mut self, fd: RawFd, callback: F) -> Result<SourceId>
    where
        F: FnMut(&mut Self) -> CallbackResult + 'static,
    {
        if fd < 0 {
            return Err(Error::Registration(format!("invalid descriptor {fd}")));
        }
        if self.watches_fd(fd) {
            return Err(Error::Registration(format!("descriptor {fd} is already watched")));
        }
        Ok(self.insert(SourceKind::Readable(fd), Box::new(callback)))
    }

    /// Remove a source. Its callback will not run again, even if it is
    /// already queued in the current wake.
    ///
    /// # Errors
    ///
    /// [`Error::Registration`] if `id` is not registered.
    pub fn cancel(&mut self, id: SourceId) -> Result<()> {
        let Some(source) = self.sources.remove(&id) else {
            return Err(Error::Registration(format!("no source {id}")));
        };
        log::debug!("cancelled {id}: {:?}", source.kind);

        if let SourceKind::Signal(signo) = source.kind {
            if !self.watches_signal(signo) {
                self.release_signal(signo);
            }
        }
        Ok(())
    }

    /// Ask [`EventLoop::run`] to return once the current callback finishes.
    /// Callbacks still queued in this wake are skipped.
    pub fn quit(&mut self) {
        self.quit = true;
    }

    #[inline]
    #[must_use]
    pub const fn quit_requested(&self) -> bool {
        self.quit
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, id: SourceId) -> bool {
        self.sources.contains_key(&id)
    }

    /// What `id` waits for, if it is still registered.
    #[must_use]
    pub fn kind(&self, id: SourceId) -> Option<SourceKind> {
        self.sources.get(&id).map(|s| s.kind)
    }

    /// The next deadline of timer `id`.
    #[must_use]
    pub fn deadline(&self, id: SourceId) -> Option<Instant> {
        match self.kind(id)? {
            SourceKind::Timer { deadline, .. } => Some(deadline),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// The earliest deadline across all timers.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sources
            .values()
            .filter_map(|s| match s.kind {
                SourceKind::Timer { deadline, .. } => Some(deadline),
                _ => None,
            })
            .min()
    }

    fn watches_signal(&self, signo: libc::c_int) -> bool {
        self.sources.values().any(|s| s.kind == SourceKind::Signal(signo))
    }

    fn watches_fd(&self, fd: RawFd) -> bool {
        self.sources.values().any(|s| s.kind == SourceKind::Readable(fd))
    }

    /// Bitmask of every signal with at least one callback.
    fn signal_mask(&self) -> u64 {
        self.sources.values().fold(0, |mask, s| match s.kind {
            SourceKind::Signal(signo) => mask | signal::signal_bit(signo),
            _ => mask,
        })
    }

    fn release_signal(&mut self, signo: libc::c_int) {
        if let Some(saved) = self.saved_actions.remove(&signo) {
            if let Err(e) = signal::restore(signo, &saved) {
                log::warn!("could not restore disposition of signal {signo}: {e}");
            }
        }
        // Drop a delivery nobody will claim now.
        signal::take_pending(signal::signal_bit(signo));
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let signals: Vec<libc::c_int> = self.saved_actions.keys().copied().collect();
        for signo in signals {
            self.release_signal(signo);
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("sources", &self.sources.len())
            .field("signals", &self.saved_actions.len())
            .field("quit", &self.quit)
            .finish()
    }
}

// ─── EventLoop ───────────────────────────────────────────────────────────────

/// Single-threaded dispatcher for signals, timers, and readable descriptors.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use rawcon_term::EventLoop;
///
/// let mut event_loop = EventLoop::new();
/// event_loop.registry().add_interval(Duration::from_secs(1), |_| {
///     println!("tick");
///     Ok(())
/// })?;
/// event_loop.registry().add_signal(libc::SIGINT, |registry| {
///     registry.quit();
///     Ok(())
/// })?;
/// event_loop.run()?;
/// # Ok::<(), rawcon_term::Error>(())
/// ```
#[derive(Debug)]
pub struct EventLoop {
    registry: Registry,
}

impl EventLoop {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
        }
    }

    /// Register and cancel sources.
    #[inline]
    pub fn registry(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Dispatch until a callback calls [`Registry::quit`] or no sources
    /// remain.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if `poll` fails or a watched descriptor is not open.
    /// Callback failures never end the loop.
    pub fn run(&mut self) -> Result<()> {
        self.registry.quit = false;
        log::debug!("event loop started with {} source(s)", self.registry.len());

        while !self.registry.quit && !self.registry.is_empty() {
            self.run_once()?;
        }

        log::debug!(
            "event loop stopped ({})",
            if self.registry.quit { "quit" } else { "no sources left" }
        );
        Ok(())
    }

    /// Wait for one wake and dispatch everything that became ready.
    /// Returns how many callbacks ran.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub fn run_once(&mut self) -> Result<usize> {
        let signal_mask = self.registry.signal_mask();
        let wake = if signal_mask == 0 {
            None
        } else {
            Some(signal::wake_fd()?)
        };

        let mut timeout = self
            .registry
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));
        if signal::peek_pending(signal_mask) != 0 {
            timeout = Some(Duration::ZERO);
        }

        let mut pollfds = Vec::with_capacity(self.registry.len() + 1);
        let mut watched = Vec::new();
        if let Some(fd) = wake {
            pollfds.push(libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            });
        }
        for (&id, source) in &self.registry.sources {
            if let SourceKind::Readable(fd) = source.kind {
                pollfds.push(libc::pollfd {
                    fd,
                    events: libc::POLLIN,
                    revents: 0,
                });
                watched.push(id);
            }
        }

        log::trace!(
            "waiting on {} descriptor(s), timeout {timeout:?}",
            pollfds.len()
        );
        let nfds = libc::nfds_t::try_from(pollfds.len())
            .map_err(|_| Error::Registration("too many descriptors to poll".into()))?;
        let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), nfds, poll_timeout_ms(timeout)) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            // EINTR: a signal landed mid-wait. Its bit is pending; carry on.
            if err.kind() != io::ErrorKind::Interrupted {
                log::error!("poll failed: {err}");
                return Err(err.into());
            }
        }

        let mut ready = Vec::new();

        // 1. Signals.
        if let Some(fd) = wake {
            signal::drain_wake(fd);
        }
        let fired = signal::take_pending(signal_mask);
        if fired != 0 {
            for (&id, source) in &self.registry.sources {
                if let SourceKind::Signal(signo) = source.kind {
                    if fired & signal::signal_bit(signo) != 0 {
                        ready.push(id);
                    }
                }
            }
        }

        // 2. Timers.
        let now = Instant::now();
        let mut due: Vec<(Instant, SourceId)> = self
            .registry
            .sources
            .iter()
            .filter_map(|(&id, source)| match source.kind {
                SourceKind::Timer { deadline, .. } if deadline <= now => Some((deadline, id)),
                _ => None,
            })
            .collect();
        due.sort_unstable();
        ready.extend(due.into_iter().map(|(_, id)| id));

        // 3. Descriptors.
        let offset = usize::from(wake.is_some());
        for (pfd, &id) in pollfds[offset..].iter().zip(&watched) {
            if pfd.revents & libc::POLLNVAL != 0 {
                log::error!("{id}: descriptor {} is not open", pfd.fd);
                return Err(io::Error::from_raw_os_error(libc::EBADF).into());
            }
            if pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
                ready.push(id);
            }
        }

        let mut invoked = 0;
        for id in ready {
            if self.registry.quit {
                break;
            }
            if self.dispatch(id) {
                invoked += 1;
            }
        }
        Ok(invoked)
    }

    /// Invoke one ready source. Returns whether a callback ran.
    fn dispatch(&mut self, id: SourceId) -> bool {
        // Checked now, not when queued: an earlier callback in this wake
        // may have cancelled `id`.
        let Some(source) = self.registry.sources.get_mut(&id) else {
            return false;
        };

        let kind = source.kind;
        let callback = match kind {
            SourceKind::Timer {
                deadline,
                interval: Some(interval),
            } => {
                if let Some(next) = deadline.checked_add(interval) {
                    source.kind = SourceKind::Timer {
                        deadline: next,
                        interval: Some(interval),
                    };
                    source.callback.take()
                } else {
                    log::warn!("timer {id} cannot be rescheduled by {interval:?}, retiring it");
                    self.registry.sources.remove(&id).and_then(|s| s.callback)
                }
            }
            SourceKind::Timer { interval: None, .. } => {
                self.registry.sources.remove(&id).and_then(|s| s.callback)
            }
            SourceKind::Signal(_) | SourceKind::Readable(_) => source.callback.take(),
        };
        let Some(mut callback) = callback else {
            return false;
        };

        log::trace!("dispatching {id}: {kind:?}");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&mut self.registry)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("callback {id} failed: {e}"),
            Err(payload) => log::error!("callback {id} panicked: {}", panic_message(&*payload)),
        }

        // Put it back unless the callback cancelled its own source.
        if let Some(source) = self.registry.sources.get_mut(&id) {
            source.callback = Some(callback);
        }
        true
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

// ─── Tests ───────────────────────────────────────────────────────────────────
