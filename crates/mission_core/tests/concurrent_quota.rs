use mission_core::{
    open_db, Action, CapabilitySet, CompleteListQuery, Mission, MissionError, MissionService,
    Window,
};
use serde_json::{json, Map};
use std::sync::Barrier;

#[test]
fn parallel_attempts_never_exceed_the_allowance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quota.db");
    let service = MissionService::with_defaults().unwrap();

    let setup = open_db(&path).unwrap();
    let mut mission = Mission::new("daily", "single use");
    mission.prerequisites = vec![json!({"type": "quota", "allowance": 1})];
    let id = service
        .create_mission(&setup, &CapabilitySet::new(1, [Action::ManageMission]), mission)
        .unwrap()
        .id;

    let barrier = Barrier::new(2);
    let outcomes: Vec<Result<i64, MissionError>> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let mut conn = open_db(&path).unwrap();
                let service = &service;
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    service
                        .complete_mission(&mut conn, &CapabilitySet::member(7), id, &Map::new(), None)
                        .map(|complete| complete.id)
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect()
    });

    let succeeded = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(succeeded, 1, "outcomes: {outcomes:?}");
    assert!(outcomes
        .iter()
        .any(|outcome| matches!(outcome, Err(MissionError::NoQuota(_)))));

    let stored = service
        .list_completes(
            &setup,
            &CompleteListQuery {
                mission_ids: vec![id],
                uid: Some(7),
                statuses: Vec::new(),
                window: Window::unbounded(),
                exclude_id: None,
            },
        )
        .unwrap();
    assert_eq!(stored.len(), 1);
}
