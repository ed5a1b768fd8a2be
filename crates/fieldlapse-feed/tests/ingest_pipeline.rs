use fieldlapse_feed::normalize_page;
use fieldlapse_storage::HistoryStore;
use serde_json::{Value, json};

fn capture_record(id: &str, timestamp_ms: i64, guid: &str) -> Value {
    json!([id, timestamp_ms, { "plext": {
        "text": format!("alice captured Portal {guid}"),
        "markup": [
            ["PLAYER", { "plain": "alice", "team": "RESISTANCE" }],
            ["TEXT", { "plain": " captured " }],
            ["PORTAL", { "guid": guid, "latE6": 51_500_000, "lngE6": -130_000,
                         "name": format!("Portal {guid}"), "address": "Bridge",
                         "team": "RESISTANCE" }],
        ],
    }}])
}

fn attack_record(id: &str, timestamp_ms: i64) -> Value {
    json!([id, timestamp_ms, { "plext": {
        "text": "Portal X is under attack by bob",
        "markup": [],
    }}])
}

#[test]
fn overlapping_windows_ingest_idempotently() {
    // Two fetch windows sharing a page boundary: the overlap commits once.
    let window_a = vec![
        capture_record("ev3", 3_000, "p3.16"),
        capture_record("ev2", 2_000, "p2.16"),
    ];
    let window_b = vec![
        capture_record("ev2", 2_000, "p2.16"),
        capture_record("ev1", 1_000, "p1.16"),
    ];

    let mut once = HistoryStore::open_in_memory().expect("store");
    let union = vec![
        capture_record("ev3", 3_000, "p3.16"),
        capture_record("ev2", 2_000, "p2.16"),
        capture_record("ev1", 1_000, "p1.16"),
    ];
    let page = normalize_page(&union);
    once.insert_page(&page.portals, &page.actions).expect("union page");

    let mut twice = HistoryStore::open_in_memory().expect("store");
    for window in [&window_a, &window_b, &window_a] {
        let page = normalize_page(window);
        twice.insert_page(&page.portals, &page.actions).expect("window page");
    }

    assert_eq!(
        once.action_count().expect("count"),
        twice.action_count().expect("count")
    );
    assert_eq!(
        once.portal_count().expect("count"),
        twice.portal_count().expect("count")
    );
    assert_eq!(
        once.load_actions().expect("actions"),
        twice.load_actions().expect("actions")
    );
}

#[test]
fn dropped_chatter_never_reaches_the_store() {
    let records = vec![
        attack_record("ev9", 9_000),
        capture_record("ev8", 8_000, "p8.16"),
        attack_record("ev7", 7_000),
    ];
    let page = normalize_page(&records);
    assert_eq!(page.dropped, 2);

    let mut store = HistoryStore::open_in_memory().expect("store");
    store.insert_page(&page.portals, &page.actions).expect("page");
    assert_eq!(store.action_count().expect("count"), 1);

    let actions = store.load_actions().expect("actions");
    assert_eq!(actions[0].id, "ev8");
}
