use criterion::{Criterion, black_box, criterion_group, criterion_main};
use fieldlapse_core::{Action, ActionKind, ActionVerb, Faction, PortalRecord, WorldSim};

/// Portals on a jittered grid, captures plus a dense mesh of links.
fn synthetic_history(side: usize) -> (Vec<PortalRecord>, Vec<Action>) {
    let mut portals = Vec::new();
    for row in 0..side {
        for col in 0..side {
            let id = format!("p{row:02}x{col:02}");
            // Deterministic jitter keeps triples out of collinearity.
            let jitter = ((row * 31 + col * 17) % 13) as f64 * 1e-5;
            portals.push(PortalRecord {
                id,
                lat: row as f64 * 1e-3 + jitter,
                lng: col as f64 * 1e-3 - jitter,
                name: String::new(),
                address: String::new(),
                team: Faction::Neutral,
            });
        }
    }

    let mut actions = Vec::new();
    let mut seq = 0i64;
    let mut push = |verb: ActionVerb, kind: ActionKind, p1: &str, p2: Option<&str>, seq: &mut i64| {
        *seq += 1;
        actions.push(Action {
            id: format!("ev{seq:06}"),
            timestamp_ms: *seq * 1_000,
            kind,
            verb,
            portal_id: Some(p1.to_string()),
            target_portal_id: p2.map(str::to_string),
        });
    };

    for row in 0..side {
        for col in 0..side {
            let id = format!("p{row:02}x{col:02}");
            let team = if (row + col) % 2 == 0 {
                Faction::Enl
            } else {
                Faction::Res
            };
            push(ActionVerb::Captured(team), ActionKind::Portal, &id, None, &mut seq);
        }
    }
    for row in 0..side {
        for col in 0..side {
            let id = format!("p{row:02}x{col:02}");
            let team = if (row + col) % 2 == 0 {
                Faction::Enl
            } else {
                Faction::Res
            };
            if col + 1 < side {
                let right = format!("p{row:02}x{:02}", col + 1);
                push(ActionVerb::Link(team), ActionKind::Link, &id, Some(right.as_str()), &mut seq);
            }
            if row + 1 < side {
                let down = format!("p{:02}x{col:02}", row + 1);
                push(ActionVerb::Link(team), ActionKind::Link, &id, Some(down.as_str()), &mut seq);
            }
            if col + 1 < side && row + 1 < side {
                let diag = format!("p{:02}x{:02}", row + 1, col + 1);
                push(ActionVerb::Link(team), ActionKind::Link, &id, Some(diag.as_str()), &mut seq);
            }
        }
    }
    (portals, actions)
}

fn bench_replay(c: &mut Criterion) {
    let (portals, actions) = synthetic_history(12);
    c.bench_function("replay_dense_mesh", |b| {
        b.iter(|| {
            let mut sim = WorldSim::new(portals.clone());
            let mut visible = 0usize;
            for action in &actions {
                visible += usize::from(sim.process_action(black_box(action)));
            }
            black_box(visible)
        });
    });
}

criterion_group!(benches, bench_replay);
criterion_main!(benches);
