use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use matrix_sdk_trust::{
    config::DispatcherConfig,
    types::{DecryptionError, Event, ToDeviceEvent},
    EventDispatcher, ListenerError, SessionListener,
};
use ruma::{room_id, user_id, RoomId};
use serde_json::json;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

struct ChannelListener(UnboundedSender<String>);

#[async_trait::async_trait]
impl SessionListener for ChannelListener {
    async fn on_live_event(&self, room_id: &RoomId, event: &Event) -> Result<(), ListenerError> {
        self.0.send(format!("{room_id} {}", event.content["n"])).map_err(anyhow::Error::from)?;
        Ok(())
    }

    async fn on_event_decryption_error(
        &self,
        event_id: &str,
        _: &str,
        error: &DecryptionError,
    ) -> Result<(), ListenerError> {
        self.0.send(format!("{event_id} {error}")).map_err(anyhow::Error::from)?;
        Ok(())
    }

    async fn on_live_to_device_event(&self, event: &ToDeviceEvent) -> Result<(), ListenerError> {
        self.0.send(event.sender.to_string()).map_err(anyhow::Error::from)?;
        Ok(())
    }
}

#[derive(Default)]
struct ThreadRecorder(Mutex<Vec<Option<String>>>);

#[async_trait::async_trait]
impl SessionListener for ThreadRecorder {
    async fn on_paginated_event(&self, _: &RoomId, _: &Event) -> Result<(), ListenerError> {
        self.0.lock().unwrap().push(std::thread::current().name().map(ToOwned::to_owned));
        Ok(())
    }
}

#[derive(Default)]
struct SlowListener(Mutex<usize>);

#[async_trait::async_trait]
impl SessionListener for SlowListener {
    async fn on_live_event(&self, _: &RoomId, _: &Event) -> Result<(), ListenerError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        *self.0.lock().unwrap() += 1;
        Ok(())
    }
}

fn event(n: usize) -> Event {
    Event::from_json(json!({
        "event_id": format!("$event{n}:example.org"),
        "room_id": "!abc:example.org",
        "type": "m.room.message",
        "content": { "n": n },
    }))
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers() {
    let dispatcher = EventDispatcher::new();
    let (sender, mut receiver) = unbounded_channel();
    dispatcher.add_listener(Arc::new(ChannelListener(sender)));

    let producers: Vec<_> = (0..4)
        .map(|producer| {
            let dispatcher = dispatcher.clone();

            tokio::spawn(async move {
                for n in 0..25 {
                    dispatcher.dispatch_live(
                        event(producer * 25 + n),
                        room_id!("!abc:example.org"),
                        false,
                    );
                }
            })
        })
        .collect();

    for producer in producers {
        producer.await.unwrap();
    }
    dispatcher.drain().await;

    let mut received = HashSet::new();
    while let Ok(line) = receiver.try_recv() {
        assert!(received.insert(line), "An event was delivered twice");
    }

    let expected: HashSet<_> = (0..100).map(|n| format!("!abc:example.org {n}")).collect();
    assert_eq!(received, expected);
}

#[tokio::test]
async fn test_categories_reach_the_matching_callback() {
    let dispatcher = EventDispatcher::new();
    let (sender, mut receiver) = unbounded_channel();
    dispatcher.add_listener(Arc::new(ChannelListener(sender)));

    dispatcher.dispatch_live(event(1), room_id!("!abc:example.org"), true);
    dispatcher.dispatch_paginated(event(2), room_id!("!abc:example.org"));
    dispatcher.dispatch_decryption_failed(
        &event(3),
        DecryptionError::MissingRoomKey {
            error: "no room key".to_owned(),
            withheld_code: Some("m.unverified".to_owned()),
        },
    );
    dispatcher.dispatch_to_device(ToDeviceEvent {
        sender: user_id!("@bob:example.org").to_owned(),
        event_type: "m.room_key_request".to_owned(),
        content: json!({}),
    });
    dispatcher.drain().await;

    let mut received = Vec::new();
    while let Ok(line) = receiver.try_recv() {
        received.push(line);
    }
    received.sort();

    // Neither the initial sync event nor the paginated one has a callback that
    // reports into the channel.
    assert_eq!(received, ["$event3:example.org no room key", "@bob:example.org"]);
}

#[test]
fn test_dispatching_on_a_custom_runtime() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("session-dispatch")
        .enable_all()
        .build()
        .unwrap();

    let dispatcher =
        EventDispatcher::with_config(DispatcherConfig::new().runtime(runtime.handle().clone()));
    let recorder = Arc::new(ThreadRecorder::default());
    dispatcher.add_listener(recorder.clone());

    for n in 0..5 {
        dispatcher.dispatch_paginated(event(n), room_id!("!abc:example.org"));
    }
    runtime.block_on(dispatcher.drain());

    let threads = recorder.0.lock().unwrap();
    assert_eq!(threads.len(), 5);
    assert!(threads.iter().all(|name| name.as_deref() == Some("session-dispatch")));
}

#[tokio::test]
async fn test_shutdown_aborts_pending_dispatches() {
    let dispatcher = EventDispatcher::new();
    let listener = Arc::new(SlowListener::default());
    dispatcher.add_listener(listener.clone());

    dispatcher.dispatch_live(event(1), room_id!("!abc:example.org"), false);
    tokio::task::yield_now().await;

    dispatcher.shutdown();
    tokio::time::timeout(Duration::from_secs(5), dispatcher.drain()).await.unwrap();

    assert_eq!(*listener.0.lock().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_ends_a_pending_drain() {
    let dispatcher = EventDispatcher::new();
    let listener = Arc::new(SlowListener::default());
    dispatcher.add_listener(listener.clone());

    dispatcher.dispatch_live(event(1), room_id!("!abc:example.org"), false);

    let drain = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.drain().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!drain.is_finished());

    dispatcher.shutdown();
    tokio::time::timeout(Duration::from_secs(5), drain).await.unwrap().unwrap();

    assert_eq!(*listener.0.lock().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_drains_wait_for_the_same_dispatches() {
    let dispatcher = EventDispatcher::new();
    let (sender, mut receiver) = unbounded_channel();
    dispatcher.add_listener(Arc::new(ChannelListener(sender)));

    for n in 0..10 {
        dispatcher.dispatch_live(event(n), room_id!("!abc:example.org"), false);
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(dispatcher.drain(), dispatcher.drain());
    })
    .await
    .unwrap();

    let mut received = 0;
    while receiver.try_recv().is_ok() {
        received += 1;
    }
    assert_eq!(received, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropping_the_dispatcher_aborts_pending_dispatches() {
    let dispatcher = EventDispatcher::new();
    let listener = Arc::new(SlowListener::default());
    dispatcher.add_listener(listener.clone());

    dispatcher.dispatch_live(event(1), room_id!("!abc:example.org"), false);
    drop(dispatcher);

    // The aborted task drops its snapshot of the listeners.
    tokio::time::timeout(Duration::from_secs(5), async {
        while Arc::strong_count(&listener) > 1 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    assert_eq!(*listener.0.lock().unwrap(), 0);
}
