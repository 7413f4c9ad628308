//! Split-brain simulation: an isolated leader cannot apply anything

mod common;

use common::{join, Cluster, REPLICAS};
use fedcoord::coordinator::proposal::ProposalOutcome;
use fedcoord::coordinator::Event;

#[tokio::test]
async fn test_split_brain_simulation() {
    let cluster = Cluster::start(1_000);
    let old_leader = cluster.wait_for_leader(&[]).await;
    join(cluster.handle(old_leader), "A").await;
    cluster.wait_for_nodes(&REPLICAS, 1).await;

    // Partition: the old leader is alone on its side
    cluster.router.isolate(old_leader);

    let outcome = cluster
        .handle(old_leader)
        .propose(Event::Join {
            name: "lost".into(),
            address: "lost:9000".into(),
        })
        .await;
    assert!(matches!(outcome, ProposalOutcome::TimedOut));

    // The majority side elects a new leader and keeps going
    let new_leader = cluster.wait_for_leader(&[old_leader]).await;
    assert_ne!(new_leader, old_leader);
    let majority: Vec<u64> = REPLICAS
        .iter()
        .copied()
        .filter(|id| *id != old_leader)
        .collect();
    join(cluster.handle(new_leader), "B").await;
    cluster.wait_for_nodes(&majority, 2).await;

    // Heal: the old leader steps down and its unreplicated entry is discarded
    cluster.router.heal(old_leader);
    cluster.wait_for_leader(&[]).await;
    cluster.wait_for_nodes(&REPLICAS, 2).await;

    for handle in cluster.handles() {
        let lost = handle
            .read(|s| s.registry().id_of("lost"))
            .await
            .unwrap();
        assert_eq!(lost, None, "replica {} applied the lost join", handle.id());
        let b = handle.read(|s| s.registry().id_of("B")).await.unwrap();
        assert_eq!(b, Some(1));
    }

    cluster.stop();
}
