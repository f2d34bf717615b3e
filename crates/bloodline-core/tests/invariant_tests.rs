//! Property tests: random operation sequences never break store invariants.

use chrono::{Duration, Utc};
use proptest::prelude::*;

use bloodline_core::allocation::AllocationEngine;
use bloodline_core::config::EngineConfig;
use bloodline_core::db::Database;
use bloodline_core::models::{BloodGroup, NewRequest, RequestStatus, UrgencyLevel};

const HOSPITALS: [&str; 2] = ["h-1", "h-2"];
const GROUPS: [BloodGroup; 2] = [BloodGroup::OPositive, BloodGroup::ANegative];

#[derive(Debug, Clone)]
enum Op {
    Create { group: usize, units: u32 },
    Accept { request: usize, hospital: usize },
    Fulfill { request: usize, hospital: usize },
    Cancel { request: usize },
    Restock { hospital: usize, group: usize, units: u32 },
    Withdraw { hospital: usize, group: usize, units: u32 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..GROUPS.len(), 1u32..5).prop_map(|(group, units)| Op::Create { group, units }),
        (0..8usize, 0..HOSPITALS.len())
            .prop_map(|(request, hospital)| Op::Accept { request, hospital }),
        (0..8usize, 0..HOSPITALS.len())
            .prop_map(|(request, hospital)| Op::Fulfill { request, hospital }),
        (0..8usize).prop_map(|request| Op::Cancel { request }),
        (0..HOSPITALS.len(), 0..GROUPS.len(), 1u32..6)
            .prop_map(|(hospital, group, units)| Op::Restock { hospital, group, units }),
        (0..HOSPITALS.len(), 0..GROUPS.len(), 1u32..4)
            .prop_map(|(hospital, group, units)| Op::Withdraw { hospital, group, units }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_invariants_hold(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let engine = AllocationEngine::new(&db, &config);
        let expiry = Utc::now() + Duration::days(30);

        let mut ids: Vec<String> = Vec::new();
        let mut fulfilled_units = 0u64;
        let mut stocked_units = 0u64;
        let mut withdrawn_units = 0u64;

        for op in ops {
            match op {
                Op::Create { group, units } => {
                    let input = NewRequest::new(GROUPS[group], units, "Metro", UrgencyLevel::Medium);
                    ids.push(engine.create_request("donor-1", input).unwrap().id);
                }
                Op::Accept { request, hospital } => {
                    if let Some(id) = ids.get(request) {
                        let _ = engine.accept(id, HOSPITALS[hospital]);
                    }
                }
                Op::Fulfill { request, hospital } => {
                    if let Some(id) = ids.get(request) {
                        if let Ok(done) = engine.fulfill(id, HOSPITALS[hospital]) {
                            prop_assert_eq!(done.accepted_hospital_id.as_deref(), Some(HOSPITALS[hospital]));
                            fulfilled_units += u64::from(done.units);
                        }
                    }
                }
                Op::Cancel { request } => {
                    if let Some(id) = ids.get(request) {
                        let _ = engine.cancel(id, "donor-1");
                    }
                }
                Op::Restock { hospital, group, units } => {
                    engine.restock(HOSPITALS[hospital], GROUPS[group], units, expiry).unwrap();
                    stocked_units += u64::from(units);
                }
                Op::Withdraw { hospital, group, units } => {
                    if engine.withdraw(HOSPITALS[hospital], GROUPS[group], units).is_ok() {
                        withdrawn_units += u64::from(units);
                    }
                }
            }
        }

        for request in db.list_all_requests().unwrap() {
            prop_assert!(request.is_consistent(), "inconsistent request {:?}", request);
        }

        let mut on_hand = 0u64;
        for hospital in HOSPITALS {
            for row in db.list_inventory(hospital).unwrap() {
                on_hand += u64::from(row.units);
            }
        }
        prop_assert_eq!(on_hand, stocked_units - withdrawn_units - fulfilled_units);

        // Every fulfilled request was debited exactly once
        let fulfilled: u64 = db
            .list_all_requests()
            .unwrap()
            .into_iter()
            .filter(|r| r.status == RequestStatus::Fulfilled)
            .map(|r| u64::from(r.units))
            .sum();
        prop_assert_eq!(fulfilled, fulfilled_units);

        prop_assert!(db.verify_transition_log().unwrap().is_intact());
    }
}
