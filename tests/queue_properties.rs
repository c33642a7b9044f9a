//! Property tests for queue ordering, ranking and matching invariants

mod fixtures;

use counsel_match::store::Store;
use counsel_match::types::QueueKind;
use fixtures::build_system;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone)]
enum Op {
    Join(usize),
    Cancel(usize),
    Promote(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..8usize).prop_map(Op::Join),
        1 => (0..8usize).prop_map(Op::Cancel),
        1 => (0..8usize).prop_map(Op::Promote),
    ]
}

fn customer(i: usize) -> String {
    format!("cust-{}", i)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn joins_are_ranked_first_come_first_served(count in 1..20usize) {
        tokio_test::block_on(async {
            let t = build_system();
            for i in 0..count {
                let receipt = t.join(&customer(i)).await;
                prop_assert_eq!(receipt.rank, i as u64 + 1);
                prop_assert_eq!(receipt.estimated_wait_minutes, (i as u64 + 1) * 5);
            }

            let expected: Vec<String> = (0..count).map(customer).collect();
            prop_assert_eq!(t.waiting().await, expected);
            Ok(())
        })?;
    }

    #[test]
    fn rank_is_priority_position_then_normal_position(
        count in 1..15usize,
        promoted in proptest::collection::btree_set(0..15usize, 0..6),
    ) {
        tokio_test::block_on(async {
            let t = build_system();
            for i in 0..count {
                t.join(&customer(i)).await;
            }
            let promoted: BTreeSet<usize> = promoted.into_iter().filter(|i| *i < count).collect();
            for i in &promoted {
                prop_assert!(t.system.queue.promote(&customer(*i)).await.unwrap());
            }

            // Promotion keeps the original score, so both queues stay in join order
            let mut expected: Vec<String> = promoted.iter().map(|i| customer(*i)).collect();
            expected.extend((0..count).filter(|i| !promoted.contains(i)).map(customer));

            for (position, customer_id) in expected.iter().enumerate() {
                let status = t.system.queue_service.queue_status(customer_id).await.unwrap();
                prop_assert_eq!(status.rank, position as u64 + 1);
                prop_assert_eq!(status.estimated_wait_minutes, (position as u64 + 1) * 5);
            }
            prop_assert_eq!(t.waiting().await, expected);
            Ok(())
        })?;
    }

    #[test]
    fn customer_is_never_in_both_queues(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        tokio_test::block_on(async {
            let t = build_system();
            let mut queued: HashSet<usize> = HashSet::new();

            for op in ops {
                match op {
                    Op::Join(i) => {
                        t.join(&customer(i)).await;
                        queued.insert(i);
                    }
                    Op::Cancel(i) => {
                        let removed = t.system.queue_service.cancel(&customer(i)).await;
                        prop_assert_eq!(removed, queued.remove(&i));
                    }
                    Op::Promote(i) => {
                        t.system.queue.promote(&customer(i)).await.unwrap();
                    }
                }

                for i in 0..8 {
                    let id = customer(i);
                    let in_priority = t
                        .system
                        .store
                        .zscore(QueueKind::Priority.store_key(), &id)
                        .await
                        .unwrap()
                        .is_some();
                    let in_normal = t
                        .system
                        .store
                        .zscore(QueueKind::Normal.store_key(), &id)
                        .await
                        .unwrap()
                        .is_some();
                    prop_assert!(!(in_priority && in_normal), "{} is in both queues", id);
                    prop_assert_eq!(in_priority || in_normal, queued.contains(&i));
                }
            }

            let sizes = t.system.queue.sizes().await.unwrap();
            prop_assert_eq!(sizes.total(), queued.len());
            Ok(())
        })?;
    }

    #[test]
    fn tick_conserves_customers_and_counselors(
        count in 1..12usize,
        counselors in 1..4u64,
        blocked in proptest::collection::vec(proptest::collection::btree_set(1..4u64, 0..3), 12),
        ghosts in proptest::collection::btree_set(0..12usize, 0..4),
    ) {
        tokio_test::block_on(async {
            let t = build_system();
            for i in 0..count {
                t.join(&customer(i)).await;
                for counselor in &blocked[i] {
                    t.system.blacklist.block(&customer(i), *counselor).unwrap();
                }
                if ghosts.contains(&i) {
                    t.system.leases.delete_by_customer(&customer(i)).await.unwrap();
                }
            }
            for counselor in 1..=counselors {
                t.counselor_online(counselor).await;
            }

            let report = t.system.scheduler.run_tick().await.unwrap();
            let waiting = t.waiting().await;

            prop_assert_eq!(report.matches.len() + report.evicted + waiting.len(), count);
            prop_assert!(report.matches.len() as u64 <= counselors);

            let matched_counselors: HashSet<u64> =
                report.matches.iter().map(|m| m.counselor_id).collect();
            prop_assert_eq!(matched_counselors.len(), report.matches.len());

            for formed in &report.matches {
                let i: usize = formed.customer_id["cust-".len()..].parse().unwrap();
                prop_assert!(!ghosts.contains(&i));
                prop_assert!(!blocked[i].contains(&formed.counselor_id));
                prop_assert!(!waiting.contains(&formed.customer_id));
                prop_assert!(!t.system.availability.is_available(formed.counselor_id).await.unwrap());
            }
            Ok(())
        })?;
    }
}
