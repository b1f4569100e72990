use std::collections::HashMap;
use std::time::Duration;

use proptest::collection::{hash_set, vec};
use proptest::prelude::*;
use proptest::test_runner::Config;

use kassa::services::reservations::MemoryReservations;

const EVENT: i64 = 1;

#[derive(Debug, Clone)]
enum Op {
    Reserve { resource_id: i64, holder_id: i64 },
    Release { resource_id: i64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0_i64..6, 0_i64..4).prop_map(|(resource_id, holder_id)| Op::Reserve {
            resource_id,
            holder_id,
        }),
        (0_i64..6).prop_map(|resource_id| Op::Release { resource_id }),
    ]
}

proptest! {
    #![proptest_config(Config::with_cases(256))]

    // Хранилище ведёт себя как наивная модель «ресурс -> держатель»:
    // reserve выигрывает только на свободном или своём ресурсе.
    #[test]
    fn holds_match_a_naive_model(ops in vec(op_strategy(), 1..60)) {
        let store = MemoryReservations::new();
        let mut model: HashMap<i64, i64> = HashMap::new();
        let ttl = Duration::from_secs(3600);

        for op in ops {
            match op {
                Op::Reserve { resource_id, holder_id } => {
                    let granted = store.reserve(EVENT, resource_id, holder_id, ttl);
                    let expected = match model.get(&resource_id) {
                        None => true,
                        Some(&owner) => owner == holder_id,
                    };
                    prop_assert_eq!(granted, expected);
                    if granted {
                        model.insert(resource_id, holder_id);
                    }
                }
                Op::Release { resource_id } => {
                    store.release(EVENT, resource_id);
                    model.remove(&resource_id);
                }
            }
        }

        let mut held: Vec<i64> = model.keys().copied().collect();
        held.sort_unstable();
        prop_assert_eq!(store.reserved_for_event(EVENT, None), held);
    }

    // Истёкший hold неотличим от отсутствующего: не виден в is_reserved,
    // не мешает новому держателю и вычищается sweep-ом без следа.
    #[test]
    fn expired_holds_are_invisible(resource_ids in hash_set(0_i64..20, 1..10)) {
        let store = MemoryReservations::new();
        for &rid in &resource_ids {
            store.reserve(EVENT, rid, 9, Duration::ZERO);
        }

        for &rid in &resource_ids {
            prop_assert!(!store.is_reserved(EVENT, rid, None));
            prop_assert!(!store.is_held_by(EVENT, rid, 9));
            prop_assert!(store.reserve(EVENT, rid, 10, Duration::from_secs(60)));
        }

        // Все ключи перезаняты живыми hold-ами, sweep ничего не находит.
        prop_assert_eq!(store.sweep(), 0);
    }

    // Фильтр по держателю отдаёт ровно его ресурсы.
    #[test]
    fn listing_filters_by_holder(
        mine in vec(0_i64..50, 1..8),
        theirs in vec(50_i64..100, 1..8),
    ) {
        let store = MemoryReservations::new();
        let ttl = Duration::from_secs(600);
        for &rid in &mine {
            store.reserve(EVENT, rid, 1, ttl);
        }
        for &rid in &theirs {
            store.reserve(EVENT, rid, 2, ttl);
        }

        let mut expected: Vec<i64> = mine.clone();
        expected.sort_unstable();
        expected.dedup();
        prop_assert_eq!(store.reserved_for_event(EVENT, Some(1)), expected);
    }
}
