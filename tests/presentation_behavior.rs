//! Behavior-driven tests for presentation coordination
//!
//! These tests verify what a publisher observes when showing ads against a
//! host UI whose containers start, resume and get destroyed.

use std::sync::atomic::{AtomicU32, Ordering};

use apexmed_core::{
    ContainerId, ContainerRegistry, FeatureFlags, HostParts, HttpError, LifecycleEvent,
    MediationRuntime, MemoryStore, PresentationError, RemoteConfigBundle, RenderAction,
    RenderRequest, RuntimeSettings, ScriptedHttpClient, UiThread,
};
use apexmed_tests::*;

struct Host {
    runtime: Arc<MediationRuntime>,
    containers: Arc<ContainerRegistry>,
    _ui: Arc<UiThread>,
}

fn host() -> Host {
    let containers = Arc::new(ContainerRegistry::new());
    let ui = Arc::new(UiThread::spawn("apexmed-ui-behavior").expect("ui thread"));
    let parts = HostParts::new(
        Arc::new(MemoryStore::new()),
        Arc::new(ScriptedHttpClient::new(Err(HttpError::connect("offline")))),
        containers.clone(),
        ui.clone(),
    );
    Host {
        runtime: Arc::new(MediationRuntime::init(RuntimeSettings::default(), parts).expect("init")),
        containers,
        _ui: ui,
    }
}

fn counting_render(renders: Arc<AtomicU32>) -> RenderAction {
    Box::new(move |request: RenderRequest| {
        renders.fetch_add(1, Ordering::SeqCst);
        request.completion.complete();
    })
}

#[tokio::test]
async fn when_show_is_pending_then_second_show_is_rejected_without_dispatch() {
    // Given: A cached bid and a container that has not resumed yet
    let host = host();
    host.runtime
        .cache()
        .store(cached_bid("interstitial", "bid-1", 600))
        .await
        .expect("cached");
    let game = ContainerId::from("game");
    host.containers.register(game.clone());
    let renders = Arc::new(AtomicU32::new(0));

    let runtime = Arc::clone(&host.runtime);
    let first_render = counting_render(renders.clone());
    let first_target = game.clone();
    let first = tokio::spawn(async move {
        runtime
            .show(Some(&first_target), &placement("interstitial"), first_render)
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // When: A second show is issued while the first waits
    let second = host
        .runtime
        .show(Some(&game), &placement("interstitial"), counting_render(renders.clone()))
        .await;

    // Then: It is rejected immediately
    assert_eq!(second, Err(PresentationError::AlreadyPresenting));
    assert_eq!(renders.load(Ordering::SeqCst), 0);

    // When: The container comes to the foreground and resumes
    host.containers.emit(&game, LifecycleEvent::Started);
    host.containers.emit(&game, LifecycleEvent::Resumed);

    // Then: The first show completes with exactly one render
    let receipt = first.await.expect("joins").expect("first show completes");
    assert_eq!(receipt.bid_id, "bid-1");
    assert_eq!(renders.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn when_container_is_destroyed_while_waiting_then_show_fails_and_slot_frees() {
    // Given: A show waiting on a started but not resumed container
    let host = host();
    host.runtime
        .cache()
        .store(cached_bid("rewarded", "bid-2", 600))
        .await
        .expect("cached");
    let game = ContainerId::from("game");
    host.containers.register(game.clone());
    host.containers.emit(&game, LifecycleEvent::Started);
    let renders = Arc::new(AtomicU32::new(0));

    let runtime = Arc::clone(&host.runtime);
    let render = counting_render(renders.clone());
    let pending = tokio::spawn(async move {
        runtime.show(None, &placement("rewarded"), render).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // When: The container is destroyed
    host.containers.emit(&game, LifecycleEvent::Destroyed);

    // Then: The attempt fails with a reason and nothing rendered
    let result = pending.await.expect("joins");
    assert_eq!(result.map_err(|e| e.reason()), Err("activity_destroyed"));
    assert_eq!(renders.load(Ordering::SeqCst), 0);
    assert!(!host.runtime.presentation().is_presenting());
}

#[tokio::test]
async fn when_shows_are_disabled_remotely_then_show_is_blocked() {
    // Given: An adopted bundle disabling shows, and a ready bid
    let host = host();
    host.runtime
        .config()
        .offer(RemoteConfigBundle::new(1, 100).with_features(FeatureFlags {
            disable_show: true,
            ..FeatureFlags::default()
        }))
        .expect("offer");
    host.runtime
        .cache()
        .store(cached_bid("banner", "bid-3", 600))
        .await
        .expect("cached");
    let renders = Arc::new(AtomicU32::new(0));

    // When: The publisher shows
    let result = host
        .runtime
        .show(None, &placement("banner"), counting_render(renders.clone()))
        .await;

    // Then: It is blocked and the bid stays cached
    assert_eq!(result.map_err(|e| e.reason()), Err("show_disabled"));
    assert!(host.runtime.is_ready(&placement("banner")).await);
    assert_eq!(renders.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn when_a_render_panics_then_later_shows_still_render() {
    // Given: Two cached bids and a resumed container
    let host = host();
    let game = ContainerId::from("game");
    host.containers.register(game.clone());
    host.containers.emit(&game, LifecycleEvent::Started);
    host.containers.emit(&game, LifecycleEvent::Resumed);
    host.runtime
        .cache()
        .store(cached_bid("interstitial", "bid-4", 600))
        .await
        .expect("cached");

    // When: The host render callback panics
    let first = host
        .runtime
        .show(
            Some(&game),
            &placement("interstitial"),
            Box::new(|_request: RenderRequest| panic!("creative crashed")),
        )
        .await;

    // Then: Only that attempt fails
    assert_eq!(first.map_err(|e| e.reason()), Err("render_failed"));

    // When: A new bid is loaded and shown
    host.runtime
        .cache()
        .store(cached_bid("interstitial", "bid-5", 600))
        .await
        .expect("cached");
    let renders = Arc::new(AtomicU32::new(0));
    let second = host
        .runtime
        .show(Some(&game), &placement("interstitial"), counting_render(renders.clone()))
        .await;

    // Then: The UI thread is still serving renders
    assert_eq!(second.expect("second show completes").bid_id, "bid-5");
    assert_eq!(renders.load(Ordering::SeqCst), 1);
}
