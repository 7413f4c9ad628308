//! Raft integration test: election, replication through any replica, identical state

mod common;

use common::{join, Cluster, REPLICAS};
use fedcoord::common::LocalModel;
use fedcoord::coordinator::{Event, Outcome};
use std::time::Duration;

#[tokio::test]
async fn test_raft_election_and_replication() {
    let cluster = Cluster::start(5_000);
    cluster.handle(2).campaign().await.unwrap();
    let leader = cluster.wait_for_leader(&[]).await;

    let leaders = {
        let mut count = 0;
        for handle in cluster.handles() {
            if handle.status().await.unwrap().is_leader() {
                count += 1;
            }
        }
        count
    };
    assert_eq!(leaders, 1);

    // a follower accepts the request and answers once it has applied it
    let follower = cluster.follower_of(leader, &[]);
    match join(cluster.handle(follower), "A").await {
        Outcome::Joined { node, .. } => assert_eq!(node, 0),
        other => panic!("unexpected outcome {:?}", other),
    }
    join(cluster.handle(leader), "B").await;
    cluster.wait_for_nodes(&REPLICAS, 2).await;

    cluster.stop();
}

#[tokio::test]
async fn test_replicas_reach_identical_state() {
    let cluster = Cluster::start(5_000);
    let leader = cluster.wait_for_leader(&[]).await;
    let follower = cluster.follower_of(leader, &[]);

    join(cluster.handle(1), "A").await;
    join(cluster.handle(2), "B").await;
    join(cluster.handle(3), "C").await;

    let outcome = cluster
        .handle(follower)
        .propose(Event::Commit {
            name: "A".into(),
            model: LocalModel::new("weights", 100.0, 0.1),
        })
        .await
        .into_result()
        .unwrap();
    let Outcome::Committed { commit, fan_out, .. } = outcome else {
        panic!("commit rejected");
    };
    assert_eq!(commit, 0);
    assert_eq!(fan_out.len(), 2);

    for (name, size, error) in [("B", 40.0, 0.2), ("C", 80.0, 0.15)] {
        let outcome = cluster
            .handle(leader)
            .propose(Event::TestComplete {
                name: name.into(),
                commit: 0,
                error,
                size,
            })
            .await
            .into_result()
            .unwrap();
        assert!(matches!(outcome, Outcome::TestAccepted { .. }));
    }

    // every replica's own aggregation engine promotes the model
    for replica in &cluster.replicas {
        let mut promoted = false;
        for _ in 0..200 {
            let committed = replica.aggregation.committed().await.unwrap();
            if let Some(aggregate) = committed.get(&0) {
                if aggregate.total_validated_size == 220.0 {
                    promoted = true;
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(promoted, "replica {} never promoted the model", replica.handle.id());
    }

    let mut views = Vec::new();
    for handle in cluster.handles() {
        views.push(
            handle
                .read(|s| {
                    (
                        s.registry().len(),
                        s.ledger().commit_count(),
                        s.ledger().pending(0).cloned(),
                        s.obligations().outstanding(1),
                    )
                })
                .await
                .unwrap(),
        );
    }
    assert!(views.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(views[0].0, 3);
    assert_eq!(views[0].1, 1);

    cluster.stop();
}

#[tokio::test]
async fn test_rejected_events_are_replicated_but_change_nothing() {
    let cluster = Cluster::start(5_000);
    cluster.wait_for_leader(&[]).await;

    let outcome = cluster
        .handle(2)
        .propose(Event::TestComplete {
            name: "nobody".into(),
            commit: 0,
            error: 0.1,
            size: 1.0,
        })
        .await
        .into_result()
        .unwrap();
    assert!(matches!(outcome, Outcome::Rejected(_)));

    for handle in cluster.handles() {
        assert_eq!(handle.read(|s| s.registry().len()).await.unwrap(), 0);
    }
    cluster.stop();
}
