//! Property-based tests for the event bus
//!
//! - Every current handler runs exactly once, in registration order, even
//!   when earlier handlers fail
//! - Removed handlers are never invoked

use super::*;
use proptest::prelude::*;
use serde_json::json;

/// How a generated handler behaves when invoked
#[derive(Debug, Clone, Copy)]
enum Behavior {
    Succeed,
    Fail,
    Panic,
}

fn arb_behavior() -> impl Strategy<Value = Behavior> {
    prop_oneof![
        4 => Just(Behavior::Succeed),
        1 => Just(Behavior::Fail),
        1 => Just(Behavior::Panic),
    ]
}

fn tracking_handler(index: usize, behavior: Behavior, log: &Arc<Mutex<Vec<usize>>>) -> Handler {
    let log = Arc::clone(log);
    Arc::new(move |_payload: &Value| {
        log.lock().unwrap().push(index);
        match behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(format!("handler {index} failed").into()),
            Behavior::Panic => panic!("handler {index} panicked"),
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_publish_reaches_all_handlers_in_order(
        behaviors in proptest::collection::vec(arb_behavior(), 0..12)
    ) {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for (i, behavior) in behaviors.iter().enumerate() {
            bus.subscribe_handler("tide", tracking_handler(i, *behavior, &log)).unwrap();
        }

        let delivered = bus.publish("tide", &json!({ "n": behaviors.len() }));

        prop_assert_eq!(delivered, behaviors.len());
        let expected: Vec<usize> = (0..behaviors.len()).collect();
        prop_assert_eq!(log.lock().unwrap().clone(), expected);
    }

    #[test]
    fn prop_removed_handlers_never_run(
        removals in proptest::collection::vec(any::<bool>(), 1..12)
    ) {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut subscriptions = Vec::new();
        for i in 0..removals.len() {
            let sub = bus
                .subscribe_handler("tide", tracking_handler(i, Behavior::Succeed, &log))
                .unwrap();
            subscriptions.push(sub);
        }

        for (sub, remove) in subscriptions.into_iter().zip(&removals) {
            if *remove {
                prop_assert!(sub.unsubscribe());
            }
        }

        bus.publish("tide", &Value::Null);

        let expected: Vec<usize> = removals
            .iter()
            .enumerate()
            .filter(|(_, removed)| !**removed)
            .map(|(i, _)| i)
            .collect();
        prop_assert_eq!(bus.listener_count("tide"), expected.len());
        prop_assert_eq!(log.lock().unwrap().clone(), expected);
    }
}
