//! Integration tests for the counsel-match service
//!
//! These drive the complete in-memory system through the customer-facing
//! surface and the scheduler tick:
//! - matching, promotion and ghost eviction across both queues
//! - counselor scoring with consultation history
//! - lease renewal and expiry handling
//! - emitted events

mod fixtures;

use counsel_match::store::Store;
use counsel_match::types::{QueueEvent, QueueKind};
use fixtures::build_system;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

fn match_events(events: &[QueueEvent]) -> Vec<(String, u64)> {
    events
        .iter()
        .filter_map(|event| match event {
            QueueEvent::MatchFormed(m) => Some((m.customer_id.clone(), m.counselor_id)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_complete_match_flow() {
    let mut t = build_system();

    let first = t.join("alice").await;
    let second = t.join("bob").await;
    assert_eq!(first.rank, 1);
    assert_eq!(second.rank, 2);
    assert_eq!(second.estimated_wait_minutes, 10);

    t.counselor_online(7).await;
    t.drain_events();

    let report = t.system.scheduler.run_tick().await.unwrap();
    assert_eq!(report.matches.len(), 1);

    let formed = &report.matches[0];
    assert_eq!(formed.customer_id, "alice");
    assert_eq!(formed.counselor_id, 7);
    assert!(formed.session_token.starts_with("room-alice-7-"));

    // Matched customer leaves the queue and loses the lease
    assert_eq!(t.waiting().await, vec!["bob".to_string()]);
    assert!(!t.system.leases.is_alive("alice").await.unwrap());
    assert!(
        !t.system
            .queue_service
            .heartbeat(&first.lease_ticket)
            .await
            .alive
    );

    // Counselor is taken out of the pool
    assert!(!t.system.availability.is_available(7).await.unwrap());

    let events = t.drain_events();
    assert_eq!(match_events(&events), vec![("alice".to_string(), 7)]);
    assert!(events.iter().any(|e| matches!(
        e,
        QueueEvent::RankChanged(r) if r.customer_id == "bob" && r.rank == 1
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        QueueEvent::QueueSizeChanged(s) if s.total_waiting == 1
    )));
}

#[tokio::test]
async fn test_one_match_per_counselor_per_tick() {
    let t = build_system();
    for customer in ["a", "b", "c"] {
        t.join(customer).await;
    }
    t.counselor_online(1).await;
    t.counselor_online(2).await;

    let report = t.system.scheduler.run_tick().await.unwrap();

    let matched: Vec<(String, u64)> = report
        .matches
        .iter()
        .map(|m| (m.customer_id.clone(), m.counselor_id))
        .collect();
    assert_eq!(matched, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    assert_eq!(t.waiting().await, vec!["c".to_string()]);
    assert_eq!(t.system.availability.available_count().await.unwrap(), 0);

    // Nobody left to serve c
    let report = t.system.scheduler.run_tick().await.unwrap();
    assert!(report.matches.is_empty());
    assert_eq!(report.scans, 0);
}

#[tokio::test]
async fn test_blocked_customer_is_promoted_and_next_customer_matched() {
    let t = build_system();
    t.join("picky").await;
    t.join("easy").await;
    t.system.blacklist.block("picky", 7).unwrap();
    t.counselor_online(7).await;

    let report = t.system.scheduler.run_tick().await.unwrap();

    assert_eq!(report.matches.len(), 1);
    assert_eq!(report.matches[0].customer_id, "easy");
    assert_eq!(report.moved, 1);
    assert_eq!(t.kind_of("picky").await, Some(QueueKind::Priority));
}

#[tokio::test]
async fn test_promoted_customer_is_served_before_newcomers() {
    let t = build_system();
    t.join("picky").await;
    t.join("easy").await;
    t.system.blacklist.block("picky", 7).unwrap();
    t.counselor_online(7).await;
    t.system.scheduler.run_tick().await.unwrap();

    t.join("newcomer").await;
    t.counselor_online(8).await;

    let status = t.system.queue_service.queue_status("newcomer").await.unwrap();
    assert_eq!(status.rank, 2);
    assert_eq!(status.queue_kind, QueueKind::Normal);

    let report = t.system.scheduler.run_tick().await.unwrap();
    assert_eq!(report.matches.len(), 1);
    assert_eq!(report.matches[0].customer_id, "picky");
    assert_eq!(report.matches[0].counselor_id, 8);
    assert_eq!(t.waiting().await, vec!["newcomer".to_string()]);
}

#[tokio::test]
async fn test_customer_with_dead_lease_is_evicted_during_scan() {
    let t = build_system();
    t.join("ghost").await;
    t.join("real").await;
    t.system.leases.delete_by_customer("ghost").await.unwrap();
    t.counselor_online(3).await;

    let report = t.system.scheduler.run_tick().await.unwrap();

    assert_eq!(report.evicted, 1);
    assert_eq!(report.matches.len(), 1);
    assert_eq!(report.matches[0].customer_id, "real");
    assert!(t.waiting().await.is_empty());
}

#[tokio::test]
async fn test_stale_entry_is_evicted_despite_live_lease() {
    let t = build_system();
    t.join_aged("forgotten", QueueKind::Normal, 400).await;
    t.join("fresh").await;
    t.counselor_online(3).await;

    assert!(t.system.leases.is_alive("forgotten").await.unwrap());

    let report = t.system.scheduler.run_tick().await.unwrap();

    assert_eq!(report.evicted, 1);
    assert_eq!(report.matches[0].customer_id, "fresh");
    assert!(!t.system.leases.is_alive("forgotten").await.unwrap());
}

#[tokio::test]
async fn test_scorer_prefers_counselor_with_best_history() {
    let t = build_system();
    t.join("returning").await;
    for counselor in [1, 2, 3] {
        t.counselor_online(counselor).await;
    }

    // Counselor 2: (5.0 - 3.0) * 10 = 20; counselor 3: 2 * 3 = 6
    t.system
        .history
        .record_consultation(2, "returning", Some(5.0), None)
        .unwrap();
    t.system
        .history
        .record_consultation(3, "someone-else", None, Some("anxiety"))
        .unwrap();
    t.system
        .history
        .record_consultation(3, "another", None, Some("anxiety"))
        .unwrap();
    t.system
        .history
        .set_latest_category("returning", "anxiety")
        .unwrap();

    let report = t.system.scheduler.run_tick().await.unwrap();
    assert_eq!(report.matches[0].counselor_id, 2);
}

#[tokio::test]
async fn test_badly_rated_counselor_loses_to_unknown_one() {
    let t = build_system();
    t.join("unhappy").await;
    t.counselor_online(1).await;
    t.counselor_online(2).await;

    // (1.0 - 3.0) * 10 = -20 for counselor 1, 0 for counselor 2
    t.system
        .history
        .record_consultation(1, "unhappy", Some(1.0), None)
        .unwrap();

    let report = t.system.scheduler.run_tick().await.unwrap();
    assert_eq!(report.matches[0].counselor_id, 2);
}

#[tokio::test]
async fn test_tie_goes_to_lowest_counselor_id() {
    let t = build_system();
    t.join("anyone").await;
    for counselor in [9, 5, 3] {
        t.counselor_online(counselor).await;
    }

    let report = t.system.scheduler.run_tick().await.unwrap();
    assert_eq!(report.matches[0].counselor_id, 3);
}

#[tokio::test]
async fn test_empty_pool_leaves_queue_untouched() {
    let mut t = build_system();
    t.join("a").await;
    t.join("b").await;
    t.drain_events();

    let report = t.system.scheduler.run_tick().await.unwrap();

    assert!(report.matches.is_empty());
    assert_eq!(report.scans, 0);
    assert_eq!(t.waiting().await, vec!["a".to_string(), "b".to_string()]);
    assert!(t.drain_events().is_empty());
}

#[tokio::test]
async fn test_available_counselor_without_heartbeat_is_not_matched() {
    let t = build_system();
    t.join("a").await;
    t.system.availability.set_available(4).await.unwrap();

    let report = t.system.scheduler.run_tick().await.unwrap();
    assert!(report.matches.is_empty());
    assert_eq!(t.waiting().await, vec!["a".to_string()]);
}

#[tokio::test]
async fn test_customers_are_conserved_across_a_tick() {
    let t = build_system();
    for customer in ["c0", "c1", "c2", "c3", "c4"] {
        t.join(customer).await;
    }
    t.system.blacklist.block("c0", 1).unwrap();
    t.system.blacklist.block("c0", 2).unwrap();
    t.system.leases.delete_by_customer("c1").await.unwrap();
    t.counselor_online(1).await;
    t.counselor_online(2).await;

    let report = t.system.scheduler.run_tick().await.unwrap();
    let waiting = t.waiting().await;

    let matched: Vec<(String, u64)> = report
        .matches
        .iter()
        .map(|m| (m.customer_id.clone(), m.counselor_id))
        .collect();
    assert_eq!(matched, vec![("c2".to_string(), 1), ("c3".to_string(), 2)]);
    assert_eq!(report.evicted, 1);
    assert_eq!(waiting, vec!["c0".to_string(), "c4".to_string()]);
    assert_eq!(report.matches.len() + report.evicted + waiting.len(), 5);
    assert_eq!(t.kind_of("c0").await, Some(QueueKind::Priority));
}

#[tokio::test]
async fn test_cancel_fans_out_rank_changes() {
    let mut t = build_system();
    for customer in ["a", "b", "c"] {
        t.join(customer).await;
    }
    t.drain_events();

    assert!(t.system.queue_service.cancel("b").await);
    assert!(!t.system.queue_service.cancel("b").await);

    let events = t.drain_events();
    let ranks: Vec<(String, u64)> = events
        .iter()
        .filter_map(|e| match e {
            QueueEvent::RankChanged(r) => Some((r.customer_id.clone(), r.rank)),
            _ => None,
        })
        .collect();
    assert_eq!(ranks, vec![("c".to_string(), 2)]);
    assert!(events.iter().any(|e| matches!(
        e,
        QueueEvent::QueueSizeChanged(s) if s.normal_size == 2 && s.priority_size == 0
    )));
}

#[tokio::test]
async fn test_duplicate_enqueue_keeps_rank_and_rotates_ticket() {
    let t = build_system();
    let original = t.join("a").await;
    t.join("b").await;

    let again = t.join("a").await;
    assert!(again.already_queued);
    assert_eq!(again.rank, 1);
    assert_ne!(again.lease_ticket, original.lease_ticket);

    let stale = t.system.queue_service.heartbeat(&original.lease_ticket).await;
    assert!(!stale.alive);
    let fresh = t.system.queue_service.heartbeat(&again.lease_ticket).await;
    assert!(fresh.alive);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_keep_a_customer_queued() {
    let t = build_system();
    let receipt = t.join("patient").await;

    for _ in 0..5 {
        tokio::time::advance(Duration::from_secs(30)).await;
        let status = t.system.queue_service.heartbeat(&receipt.lease_ticket).await;
        assert!(status.alive);
        assert_eq!(status.remaining_ttl_seconds, 40);
    }

    tokio::time::advance(Duration::from_secs(41)).await;
    let status = t.system.queue_service.heartbeat(&receipt.lease_ticket).await;
    assert!(!status.alive);
    assert_eq!(status.remaining_ttl_seconds, 0);
}

#[tokio::test(start_paused = true)]
async fn test_expired_lease_and_heartbeat_are_reaped() {
    let t = build_system();
    let listener = t
        .system
        .expiration_listener()
        .spawn(t.system.store.subscribe_expirations());

    t.join("silent").await;
    let chatty_ticket = t.join("chatty").await.lease_ticket;
    t.counselor_online(7).await;

    tokio::time::advance(Duration::from_secs(25)).await;
    t.system.queue_service.heartbeat(&chatty_ticket).await;
    tokio::time::advance(Duration::from_secs(16)).await;

    // silent's lease (40s) and the counselor heartbeat (30s) are gone
    assert!(t.system.store.purge_expired().unwrap() > 0);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(t.waiting().await, vec!["chatty".to_string()]);
    assert!(!t.system.availability.is_available(7).await.unwrap());

    listener.abort();
}

#[tokio::test]
async fn test_scheduler_loop_matches_in_background() {
    let t = build_system();
    let is_running = Arc::new(RwLock::new(true));
    let handle = t.system.scheduler.clone().start(is_running.clone());

    t.join("a").await;
    t.counselor_online(1).await;

    let mut matched = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if t.waiting().await.is_empty() {
            matched = true;
            break;
        }
    }
    assert!(matched, "scheduler never matched the waiting customer");
    assert!(!t.system.availability.is_available(1).await.unwrap());

    *is_running.write().await = false;
    handle.abort();
}
