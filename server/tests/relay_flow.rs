//! End-to-end: register oracles against the simulated ledger, run the relay
//! on its request stream, and check what reaches the ledger.

use std::sync::Arc;
use std::time::Duration;

use flightsurety_oracles::ledger::simulated::SimulatedLedger;
use flightsurety_oracles::ledger::LedgerClient;
use flightsurety_oracles::models::{Index, StatusRequest, StatusVerdict};
use flightsurety_oracles::services::{
    ConsensusRelay, DepartureTimePolicy, OracleRegistry, RegistrationMode, RegistryOptions,
    RelayOptions, RelayStats,
};

fn flight_request(index: u8, timestamp: u64) -> StatusRequest {
    StatusRequest {
        index: Index(index),
        airline: SimulatedLedger::account(10),
        flight: "ND1309".to_string(),
        timestamp,
    }
}

async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn registered_oracles_answer_requests_until_the_contract_settles() {
    let index_sets = [[1, 2, 3], [3, 4, 5], [3, 6, 7], [0, 8, 9]];
    let mut ledger = SimulatedLedger::new(index_sets.len());
    for (position, indexes) in index_sets.iter().enumerate() {
        ledger = ledger.with_indexes(&SimulatedLedger::account(position), *indexes);
    }
    let ledger = Arc::new(ledger);

    let mut registry = OracleRegistry::new();
    let failures = registry
        .register_all(
            ledger.as_ref(),
            &RegistryOptions {
                target: index_sets.len(),
                account_offset: 0,
                fee: None,
                mode: RegistrationMode::Reconcile,
            },
        )
        .await
        .unwrap();
    assert!(failures.is_empty());
    let snapshot = registry.freeze();
    assert_eq!(snapshot.len(), 4);

    let stats = Arc::new(RelayStats::default());
    let mut relay = ConsensusRelay::new(
        Arc::clone(&ledger) as Arc<dyn LedgerClient>,
        snapshot,
        Arc::new(DepartureTimePolicy),
        RelayOptions::default(),
        Arc::clone(&stats),
    );
    let relay_task = tokio::spawn(async move { relay.run().await });

    // index 3 is held by three oracles: enough for the contract's majority
    ledger.request_status(flight_request(3, 1_500_000_000)).await;
    // nobody holds index 5 except the second oracle; one vote is not a majority
    ledger.request_status(flight_request(5, 1_500_000_000)).await;

    let observer = Arc::clone(&ledger);
    wait_for(|| {
        let observer = Arc::clone(&observer);
        async move { observer.accepted_responses().await.len() == 4 }
    })
    .await;
    relay_task.abort();

    let outcomes = ledger.outcomes().await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].request, flight_request(3, 1_500_000_000));
    assert_eq!(outcomes[0].verdict, StatusVerdict::LateAirline);

    let accepted = ledger.accepted_responses().await;
    let index_three: Vec<_> = accepted
        .iter()
        .filter(|response| response.request.index == Index(3))
        .collect();
    assert_eq!(index_three.len(), 3);
    assert!(index_three.iter().all(|response| response.quorum_size == 3));

    let counters = stats.snapshot();
    assert_eq!(counters.requests_received, 2);
    assert_eq!(counters.submissions_confirmed, 4);
    assert_eq!(counters.submissions_failed, 0);
}

#[tokio::test]
async fn a_relay_without_identities_observes_but_never_submits() {
    let ledger = Arc::new(SimulatedLedger::new(2).with_fee(u128::MAX));

    let mut registry = OracleRegistry::new();
    let failures = registry
        .register_all(
            ledger.as_ref(),
            &RegistryOptions {
                target: 2,
                account_offset: 0,
                fee: Some(1),
                mode: RegistrationMode::Fresh,
            },
        )
        .await
        .unwrap();
    assert_eq!(failures.len(), 2);

    let stats = Arc::new(RelayStats::default());
    let mut relay = ConsensusRelay::new(
        Arc::clone(&ledger) as Arc<dyn LedgerClient>,
        registry.freeze(),
        Arc::new(DepartureTimePolicy),
        RelayOptions::default(),
        Arc::clone(&stats),
    );
    let relay_task = tokio::spawn(async move { relay.run().await });

    ledger.request_status(flight_request(3, 1_500_000_000)).await;

    let counters = Arc::clone(&stats);
    wait_for(|| {
        let counters = Arc::clone(&counters);
        async move { counters.snapshot().requests_without_identities == 1 }
    })
    .await;
    relay_task.abort();

    assert!(ledger.accepted_responses().await.is_empty());
    assert_eq!(stats.snapshot().zero_match_requests, 0);
}
