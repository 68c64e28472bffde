// Copyright 2021 Jonas Platte
// Copyright 2022 Famedly GmbH
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fan-out of session events to [`SessionListener`]s.
//!
//! ### How it works
//!
//! Every `dispatch_*` call snapshots the registered listeners and spawns a
//! single task on the dispatcher's task group. That task calls the matching
//! callback of each listener in registration order. A listener that returns
//! an error or panics is logged and skipped, it neither stops the remaining
//! listeners nor reaches the caller of the dispatch method.
//!
//! Since each dispatch call is a task of its own, two dispatch calls made one
//! after the other may reach a listener in any order.

use std::{
    any::Any,
    fmt,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, RwLock,
    },
};

use futures_util::FutureExt;
use ruma::{OwnedRoomId, RoomId};
use tokio::{runtime::Handle, sync::Notify, task::JoinSet};
use tracing::{instrument, trace, warn};

use crate::{
    config::DispatcherConfig,
    types::{DecryptionError, DecryptionResult, Event, ToDeviceEvent},
    ListenerError,
};

mod listener;

pub use listener::SessionListener;

/// A single dispatch call, owned by the task that delivers it.
#[derive(Debug)]
enum Dispatch {
    Live { room_id: OwnedRoomId, event: Event },
    Paginated { room_id: OwnedRoomId, event: Event },
    Decrypted { event_id: String, room_id: String, result: DecryptionResult },
    DecryptionFailed { event_id: String, room_id: String, error: DecryptionError },
    ToDevice(ToDeviceEvent),
}

impl Dispatch {
    fn callback(&self) -> &'static str {
        match self {
            Dispatch::Live { .. } => "on_live_event",
            Dispatch::Paginated { .. } => "on_paginated_event",
            Dispatch::Decrypted { .. } => "on_event_decrypted",
            Dispatch::DecryptionFailed { .. } => "on_event_decryption_error",
            Dispatch::ToDevice(_) => "on_live_to_device_event",
        }
    }

    async fn deliver(&self, listener: &dyn SessionListener) -> Result<(), ListenerError> {
        match self {
            Dispatch::Live { room_id, event } => listener.on_live_event(room_id, event).await,
            Dispatch::Paginated { room_id, event } => {
                listener.on_paginated_event(room_id, event).await
            }
            Dispatch::Decrypted { event_id, room_id, result } => {
                listener.on_event_decrypted(event_id, room_id, result).await
            }
            Dispatch::DecryptionFailed { event_id, room_id, error } => {
                listener.on_event_decryption_error(event_id, room_id, error).await
            }
            Dispatch::ToDevice(event) => listener.on_live_to_device_event(event).await,
        }
    }

    #[instrument(skip_all, fields(callback = self.callback(), amount = listeners.len()))]
    async fn notify(self, listeners: Vec<Arc<dyn SessionListener>>) {
        for listener in &listeners {
            let result = AssertUnwindSafe(self.deliver(listener.as_ref()))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(ListenerError::Panicked(panic_message(&*panic))));

            if let Err(error) = result {
                warn!(?error, "A session listener failed to handle an event");
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// The number of dispatch tasks that didn't finish yet.
#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Owned by a dispatch task, dropped when the task finishes or gets aborted.
struct InFlightGuard(Arc<InFlight>);

impl InFlightGuard {
    fn new(in_flight: Arc<InFlight>) -> Self {
        in_flight.count.fetch_add(1, Ordering::SeqCst);
        Self(in_flight)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

struct DispatcherInner {
    listeners: RwLock<Vec<Arc<dyn SessionListener>>>,
    tasks: Mutex<JoinSet<()>>,
    // Shared with the tasks on its own, they must not keep the task set alive.
    in_flight: Arc<InFlight>,
    runtime: Handle,
}

/// Fans out live, paginated, decrypted, undecryptable and to-device events to
/// a set of [`SessionListener`]s.
///
/// Dispatching never blocks and never fails: each call schedules the
/// notifications on a task and returns immediately. Listeners are notified in
/// the order they were added, no order is kept between different dispatch
/// calls.
///
/// The dispatcher owns the tasks it spawns. [`EventDispatcher::drain()`] waits
/// for them, [`EventDispatcher::shutdown()`] aborts them, and dropping the last
/// clone of the dispatcher aborts whatever is still running.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher").field("listeners", &self.listener_count()).finish()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    /// Create a new dispatcher with the default configuration.
    ///
    /// # Panics
    ///
    /// This will panic if called outside the context of a Tokio runtime.
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    /// Create a new dispatcher using the given configuration.
    ///
    /// # Panics
    ///
    /// This will panic if the configuration doesn't contain a runtime and the
    /// method is called outside the context of a Tokio runtime.
    pub fn with_config(config: DispatcherConfig) -> Self {
        let runtime = config.runtime.unwrap_or_else(Handle::current);

        Self {
            inner: DispatcherInner {
                listeners: Default::default(),
                tasks: Default::default(),
                in_flight: Default::default(),
                runtime,
            }
            .into(),
        }
    }

    /// Register a listener.
    ///
    /// The listener is notified by every dispatch call that starts after this
    /// method returns. Adding the same listener twice makes it receive every
    /// event twice.
    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.inner.listeners.write().unwrap().push(listener);
    }

    /// Remove one registration of the given listener.
    ///
    /// Listeners are compared by identity. Returns `false` if the listener
    /// wasn't registered.
    pub fn remove_listener(&self, listener: &Arc<dyn SessionListener>) -> bool {
        let mut listeners = self.inner.listeners.write().unwrap();

        if let Some(position) =
            listeners.iter().position(|l| std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)))
        {
            listeners.remove(position);
            true
        } else {
            false
        }
    }

    /// The number of registered listeners, duplicates included.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().unwrap().len()
    }

    /// Dispatch an event that arrived through sync.
    ///
    /// Events of the initial sync are not dispatched.
    pub fn dispatch_live(&self, event: Event, room_id: &RoomId, initial_sync: bool) {
        if initial_sync {
            trace!(?room_id, "Not dispatching an event of the initial sync");
            return;
        }

        self.schedule(Dispatch::Live { room_id: room_id.to_owned(), event });
    }

    /// Dispatch an event that was loaded by back-pagination.
    pub fn dispatch_paginated(&self, event: Event, room_id: &RoomId) {
        self.schedule(Dispatch::Paginated { room_id: room_id.to_owned(), event });
    }

    /// Dispatch the result of decrypting the given event.
    pub fn dispatch_decrypted(&self, event: &Event, result: DecryptionResult) {
        let (event_id, room_id) = ids_or_empty(event);
        self.schedule(Dispatch::Decrypted { event_id, room_id, result });
    }

    /// Dispatch the reason the given event couldn't be decrypted.
    pub fn dispatch_decryption_failed(&self, event: &Event, error: DecryptionError) {
        let (event_id, room_id) = ids_or_empty(event);
        self.schedule(Dispatch::DecryptionFailed { event_id, room_id, error });
    }

    /// Dispatch a to-device event that arrived through sync.
    pub fn dispatch_to_device(&self, event: ToDeviceEvent) {
        self.schedule(Dispatch::ToDevice(event));
    }

    /// Wait until no dispatch is in flight anymore.
    ///
    /// Dispatches scheduled while waiting are waited for as well. Dispatches
    /// aborted by [`EventDispatcher::shutdown()`] count as finished, so a
    /// pending drain returns once a shutdown happened.
    pub async fn drain(&self) {
        let in_flight = &self.inner.in_flight;

        loop {
            // Created before the check, a task finishing in between still
            // wakes us up.
            let idle = in_flight.idle.notified();

            if in_flight.count.load(Ordering::SeqCst) == 0 {
                return;
            }

            idle.await;
        }
    }

    /// Abort every dispatch that is still in flight, including the ones a
    /// concurrent [`EventDispatcher::drain()`] waits for.
    ///
    /// Listeners that didn't get notified yet won't be.
    pub fn shutdown(&self) {
        self.inner.tasks.lock().unwrap().abort_all();
    }

    fn schedule(&self, dispatch: Dispatch) {
        let listeners = self.inner.listeners.read().unwrap().clone();

        if listeners.is_empty() {
            return;
        }

        trace!(callback = dispatch.callback(), amount = listeners.len(), "Scheduling a dispatch");

        let mut tasks = self.inner.tasks.lock().unwrap();
        // Reap the dispatches that are already done so the set doesn't grow.
        while tasks.try_join_next().is_some() {}
        let guard = InFlightGuard::new(self.inner.in_flight.clone());
        tasks.spawn_on(
            async move {
                dispatch.notify(listeners).await;
                drop(guard);
            },
            &self.inner.runtime,
        );
    }
}

fn ids_or_empty(event: &Event) -> (String, String) {
    (
        event.event_id().map(ToString::to_string).unwrap_or_default(),
        event.room_id().map(ToString::to_string).unwrap_or_default(),
    )
}
