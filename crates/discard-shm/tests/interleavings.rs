use discard_shm::{
    AnonRegion, DiscardableOptions, DiscardableRegion, FakeClock, LockResult, Timestamp,
};
use proptest::prelude::*;
use proptest::test_runner::TestCaseResult;
use std::sync::Arc;
use std::time::Duration;

type Region = DiscardableRegion<AnonRegion>;

const PEERS: usize = 3;
const MAX_OPS: usize = 64;

#[derive(Debug, Clone)]
enum Op {
    Lock(usize),
    Unlock(usize),
    Purge { peer: usize, at_secs: u64 },
    Tick,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..PEERS).prop_map(Op::Lock),
        3 => (0..PEERS).prop_map(Op::Unlock),
        2 => ((0..PEERS), 0u64..8).prop_map(|(peer, at_secs)| Op::Purge { peer, at_secs }),
        1 => Just(Op::Tick),
    ]
}

/// Every peer starts attached and fully unlocked.
fn setup(clock: &Arc<FakeClock>) -> Vec<Region> {
    let options = DiscardableOptions {
        validate_pages: true,
    };
    let mut owner = Region::create_and_map_with(1, options)
        .unwrap()
        .with_clock(clock.clone());
    owner.unlock(0, 0);

    let mut peers = vec![];
    for _ in 1..PEERS {
        let mut peer = Region::from_region_with(owner.share().unwrap(), options)
            .with_clock(clock.clone());
        peer.map(0).unwrap();
        peer.unlock(0, 0);
        peers.push(peer);
    }
    peers.insert(0, owner);
    peers
}

fn run(ops: Vec<Op>) -> TestCaseResult {
    let clock = Arc::new(FakeClock::new(Timestamp::from_secs(1)));
    let mut peers = setup(&clock);
    let mut purged = false;

    for op in ops {
        let holder = peers.iter().position(|p| p.locked_page_count() > 0);
        match op {
            Op::Lock(i) => {
                if peers[i].locked_page_count() > 0 {
                    continue;
                }
                let result = peers[i].lock(0, 0);
                if result != LockResult::Failed {
                    prop_assert!(holder.is_none(), "peer {i} locked while {holder:?} holds");
                    prop_assert!(!purged, "purged memory was relocked");
                }
            }
            Op::Unlock(i) => {
                if peers[i].locked_page_count() == 0 {
                    continue;
                }
                peers[i].unlock(0, 0);
                prop_assert!(!peers[i].is_memory_locked());
            }
            Op::Purge { peer, at_secs } => {
                let won = peers[peer].purge(Timestamp::from_secs(at_secs));
                if holder.is_some() {
                    prop_assert!(!won, "purged while peer {holder:?} holds the lock");
                }
                purged |= won;
            }
            Op::Tick => clock.advance(Duration::from_secs(1)),
        }

        let holders = peers.iter().filter(|p| p.locked_page_count() > 0).count();
        prop_assert!(holders <= 1);
        prop_assert_eq!(peers[0].is_memory_locked(), holders == 1);
        prop_assert_eq!(peers[0].is_memory_resident(), !purged);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

    #[test]
    fn peers_never_share_the_lock(ops in prop::collection::vec(op_strategy(), 1..MAX_OPS)) {
        run(ops)?;
    }
}
