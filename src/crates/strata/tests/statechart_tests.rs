//! End-to-end statechart scenarios through the public API

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};
use strata::{
    visualize, ChartError, Design, Handler, HandlerItem, StateConfig, TaskConfig,
    VisualizationOptions,
};

fn bump(data: &mut Value, key: &str) {
    data[key] = (data[key].as_i64().unwrap_or(0) + 1).into();
}

#[tokio::test]
async fn counter_counts_and_notifies_per_event() {
    let machine = Design::new()
        .data(json!({ "count": 0 }))
        .on("INCR", Handler::action(|d, _, _| bump(d, "count")))
        .compile()
        .unwrap();
    machine.start().await.unwrap();

    let notifications = Arc::new(AtomicUsize::new(0));
    let seen = notifications.clone();
    let _sub = machine.on_update(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    machine.send("INCR").await.unwrap();
    machine.send("INCR").await.unwrap();
    machine.send("INCR").await.unwrap();

    assert_eq!(machine.data()["count"], 3);
    assert_eq!(notifications.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn toggle_branch_alternates() {
    let machine = Design::new()
        .initial("low")
        .state("low", StateConfig::new().on("T", HandlerItem::new().to("high")))
        .state("high", StateConfig::new().on("T", HandlerItem::new().to("low")))
        .compile()
        .unwrap();
    machine.start().await.unwrap();

    assert!(machine.active().iter().any(|p| p.ends_with(".root.low")));
    assert!(!machine.is_in(["high"]));

    machine.send("T").await.unwrap();
    assert!(machine.is_in(["high"]));

    machine.send("T").await.unwrap();
    assert!(machine.is_in(["low"]));
    assert!(!machine.is_in(["high"]));
}

#[tokio::test]
async fn parallel_regions_stay_independent() {
    let machine = Design::new()
        .state(
            "a",
            StateConfig::new()
                .initial("x")
                .state("x", StateConfig::new())
                .state("y", StateConfig::new()),
        )
        .state(
            "b",
            StateConfig::new()
                .initial("m")
                .state("m", StateConfig::new())
                .state("n", StateConfig::new()),
        )
        .on("SWITCH", HandlerItem::new().to("y"))
        .compile()
        .unwrap();
    machine.start().await.unwrap();

    assert!(machine.is_in(["a.x", "b.m"]));

    machine.send("SWITCH").await.unwrap();
    assert!(machine.is_in(["a.y"]));
    assert!(machine.is_in(["b.m"]), "the untouched region keeps its child");
    assert!(!machine.is_in_any(["a.x"]));
}

#[tokio::test]
async fn previous_reenters_the_last_active_child() {
    let machine = Design::new()
        .initial("light")
        .state(
            "light",
            StateConfig::new()
                .initial("red")
                .state("red", StateConfig::new())
                .state("green", StateConfig::new())
                .state("blue", StateConfig::new()),
        )
        .state("off", StateConfig::new())
        .on("GO_GREEN", HandlerItem::new().to("green"))
        .on("SHUT_DOWN", HandlerItem::new().to("off"))
        .on("RESUME", HandlerItem::new().to("light.previous"))
        .compile()
        .unwrap();
    machine.start().await.unwrap();
    assert!(machine.is_in(["light.red"]));

    machine.send("GO_GREEN").await.unwrap();
    machine.send("SHUT_DOWN").await.unwrap();
    assert!(machine.is_in(["off"]));

    machine.send("RESUME").await.unwrap();
    assert!(machine.is_in(["light.green"]), "previous beats initial");
}

#[tokio::test]
async fn mutual_entry_transitions_trip_the_loop_guard() {
    let machine = Design::new()
        .initial("ping")
        .state("ping", StateConfig::new().on_enter(HandlerItem::new().to("pong")))
        .state("pong", StateConfig::new().on_enter(HandlerItem::new().to("ping")))
        .compile()
        .unwrap();

    let err = machine.start().await.unwrap_err();
    match err {
        ChartError::LoopDetected { limit, .. } => assert_eq!(limit, strata::DEFAULT_TRANSITION_LIMIT),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn async_task_resolves_into_data() {
    let machine = Design::new()
        .data(json!({ "value": null }))
        .invoke(
            TaskConfig::run(|_, _, _| Box::pin(async { Ok(json!(42)) }))
                .on_resolve(Handler::action(|d, _, result| d["value"] = result.clone())),
        )
        .compile()
        .unwrap();

    let mut updates = machine.updates();
    machine.start().await.unwrap();

    let update = updates.next().await.expect("resolve handler notifies");
    assert_eq!(update.data["value"], 42);
    assert_eq!(machine.data()["value"], 42);
}

#[tokio::test]
async fn async_rejection_routes_to_the_reject_handler() {
    let machine = Design::new()
        .data(json!({ "error": null }))
        .invoke(
            TaskConfig::run(|_, _, _| Box::pin(async { Err(json!("boom")) }))
                .on_resolve(Handler::action(|_, _, _| panic!("must not resolve")))
                .on_reject(Handler::action(|d, _, result| d["error"] = result.clone())),
        )
        .compile()
        .unwrap();

    let mut updates = machine.updates();
    machine.start().await.unwrap();

    let update = updates.next().await.expect("reject handler notifies");
    assert_eq!(update.data["error"], "boom");
}

#[tokio::test(start_paused = true)]
async fn async_rejection_without_handler_is_dropped() {
    let machine = Design::new()
        .data(json!({ "value": null }))
        .invoke(
            TaskConfig::run(|_, _, _| Box::pin(async { Err(json!("boom")) }))
                .on_resolve(Handler::action(|d, _, result| d["value"] = result.clone())),
        )
        .compile()
        .unwrap();
    machine.start().await.unwrap();

    // Give the completion task room to run; nothing may change.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(machine.data()["value"], Value::Null);
}

#[tokio::test]
async fn stale_async_completions_are_ignored() {
    let machine = Design::new()
        .data(json!({ "value": null }))
        .initial("loading")
        .state(
            "loading",
            StateConfig::new()
                .invoke(
                    TaskConfig::run(|_, _, _| {
                        Box::pin(async {
                            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                            Ok(json!("late"))
                        })
                    })
                    .on_resolve(Handler::action(|d, _, result| d["value"] = result.clone())),
                )
                .on("CANCEL", HandlerItem::new().to("idle")),
        )
        .state("idle", StateConfig::new())
        .compile()
        .unwrap();
    machine.start().await.unwrap();

    machine.send("CANCEL").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert_eq!(machine.data()["value"], Value::Null, "owning state exited first");
}

#[tokio::test]
async fn fork_replays_to_identical_state() {
    fn build() -> Design {
        Design::new()
            .data(json!({ "count": 0 }))
            .value("parity", |d| json!(d["count"].as_i64().unwrap_or(0) % 2))
            .initial("a")
            .state(
                "a",
                StateConfig::new().on(
                    "STEP",
                    HandlerItem::new().then(|d, _, _| bump(d, "count")).to("b"),
                ),
            )
            .state(
                "b",
                StateConfig::new().on(
                    "STEP",
                    HandlerItem::new().then(|d, _, _| bump(d, "count")).to("a"),
                ),
            )
    }

    let original = build().compile().unwrap();
    original.start().await.unwrap();
    let fork = original.fork().unwrap();
    fork.start().await.unwrap();

    for _ in 0..5 {
        original.send("STEP").await.unwrap();
        fork.send("STEP").await.unwrap();
    }

    assert_eq!(*original.data(), *fork.data());
    assert_eq!(original.values(), fork.values());
    let strip = |m: &strata::Statechart| -> Vec<String> {
        m.active().into_iter().map(|p| p.replace(m.id(), "")).collect()
    };
    assert_eq!(strip(&original), strip(&fork));
}

#[tokio::test]
async fn subscription_cancel_stops_callbacks() {
    let machine = Design::new()
        .data(json!({ "count": 0 }))
        .on("INCR", Handler::action(|d, _, _| bump(d, "count")))
        .compile()
        .unwrap();
    machine.start().await.unwrap();

    let notifications = Arc::new(AtomicUsize::new(0));
    let seen = notifications.clone();
    let subscription = machine.on_update(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    machine.send("INCR").await.unwrap();
    subscription.cancel();
    machine.send("INCR").await.unwrap();

    assert_eq!(notifications.load(Ordering::SeqCst), 1);
    assert_eq!(machine.data()["count"], 2);
}

#[tokio::test]
async fn get_update_sees_the_current_snapshot() {
    let machine = Design::new()
        .id("snap")
        .data(json!({ "ready": true }))
        .initial("waiting")
        .state("waiting", StateConfig::new())
        .compile()
        .unwrap();
    machine.start().await.unwrap();

    let mut observed = None;
    machine.get_update(|update| {
        observed = Some((update.id.clone(), update.active.clone(), update.data.clone()));
    });
    let (id, active, data) = observed.unwrap();
    assert_eq!(id, "#snap");
    assert!(active.contains(&"#snap.root.waiting".to_string()));
    assert_eq!(data["ready"], true);
}

#[tokio::test]
async fn update_stream_delivers_each_notification() {
    let machine = Design::new()
        .data(json!({ "count": 0 }))
        .on("INCR", Handler::action(|d, _, _| bump(d, "count")))
        .compile()
        .unwrap();
    machine.start().await.unwrap();

    let mut updates = machine.updates();
    machine.send("INCR").await.unwrap();
    machine.send("INCR").await.unwrap();

    assert_eq!(updates.next().await.unwrap().data["count"], 1);
    assert_eq!(updates.next().await.unwrap().data["count"], 2);
}

#[tokio::test]
async fn sends_from_concurrent_tasks_serialize() {
    let machine = Design::new()
        .data(json!({ "count": 0 }))
        .on("INCR", Handler::action(|d, _, _| bump(d, "count")))
        .compile()
        .unwrap();
    machine.start().await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let m = machine.clone();
        handles.push(tokio::spawn(async move {
            m.send("INCR").await.map(|_| ())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Every increment observed its predecessor's commit.
    assert_eq!(machine.data()["count"], 8);
}

#[tokio::test]
async fn state_summary_and_visualization_reflect_the_tree() {
    let machine = Design::new()
        .id("doc")
        .initial("draft")
        .state("draft", StateConfig::new().on("PUBLISH", HandlerItem::new().to("live")))
        .state("live", StateConfig::new())
        .compile()
        .unwrap();
    machine.start().await.unwrap();

    let summary = machine.state_summary();
    assert_eq!(summary.name, "root");
    assert!(summary.active);
    let draft = summary.children.iter().find(|c| c.name == "draft").unwrap();
    assert!(draft.active);

    machine.send("PUBLISH").await.unwrap();
    let summary = machine.state_summary();
    let draft = summary.children.iter().find(|c| c.name == "draft").unwrap();
    let live = summary.children.iter().find(|c| c.name == "live").unwrap();
    assert!(!draft.active);
    assert!(live.active);

    let rendered = visualize(&machine, &VisualizationOptions::ascii().with_active());
    assert!(rendered.contains("live (leaf) *"));

    // Summaries serialize for external consumers.
    let as_json = serde_json::to_value(&summary).unwrap();
    assert_eq!(as_json["kind"], "branch");
}

#[tokio::test]
async fn get_config_round_trips_through_compile() {
    let machine = Design::new()
        .id("rt")
        .data(json!({ "n": 1 }))
        .initial("only")
        .state("only", StateConfig::new())
        .compile()
        .unwrap();
    machine.start().await.unwrap();

    let rebuilt = machine.get_config().compile().unwrap();
    rebuilt.start().await.unwrap();

    assert_eq!(rebuilt.id(), machine.id());
    assert_eq!(*rebuilt.data(), *machine.data());
}
