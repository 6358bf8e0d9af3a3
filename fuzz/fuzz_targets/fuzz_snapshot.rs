#![no_main]

use fairmocracy_client::protocol::GameSnapshot;
use fairmocracy_client::{EventCounterPolicy, GameStateMirror};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(snapshot) = serde_json::from_slice::<GameSnapshot>(data) else {
        return;
    };

    // Merging any decodable snapshot must not panic, and applying it a
    // second time must leave the mirror unchanged.
    let mut mirror = GameStateMirror::new(EventCounterPolicy::ResetPerRound);
    mirror.apply(snapshot.clone());
    let once = mirror.clone();
    let mut again = snapshot;
    again.seq = None;
    mirror.apply(again);
    assert_eq!(mirror.frontend_round_n, once.frontend_round_n);
    assert_eq!(mirror.frontend_event_n, once.frontend_event_n);
    let _ = mirror.reward_table();
});
