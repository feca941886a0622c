use chrono::{DateTime, TimeZone, Utc};
use mission_core::{
    open_db_in_memory, Action, CapabilitySet, CompleteListQuery, CompleteStatus, Mission,
    MissionError, MissionQuery, MissionService, MissionStatus, Window,
};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

fn at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap()
}

fn admin() -> CapabilitySet {
    CapabilitySet::new(
        1,
        [
            Action::ViewMission,
            Action::CompleteMission,
            Action::ReviewMission,
            Action::RevertComplete,
            Action::ManageMission,
        ],
    )
}

fn create(
    service: &MissionService,
    conn: &Connection,
    prerequisites: Vec<Value>,
    completes: Vec<Value>,
) -> i64 {
    let mut mission = Mission::new("daily", "mission");
    mission.prerequisites = prerequisites;
    mission.completes = completes;
    service.create_mission(conn, &admin(), mission).unwrap().id
}

fn input(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn completes_of(service: &MissionService, conn: &Connection, mission_id: i64) -> Vec<mission_core::Complete> {
    service
        .list_completes(
            conn,
            &CompleteListQuery {
                mission_ids: vec![mission_id],
                uid: None,
                statuses: Vec::new(),
                window: Window::unbounded(),
                exclude_id: None,
            },
        )
        .unwrap()
}

#[test]
fn zero_allowance_fails_with_no_quota_and_writes_nothing() {
    let mut conn = open_db_in_memory().unwrap();
    let service = MissionService::with_defaults().unwrap();
    let id = create(
        &service,
        &conn,
        vec![json!({"type": "quota", "allowance": 0})],
        Vec::new(),
    );

    let err = service
        .complete_mission(&mut conn, &CapabilitySet::member(7), id, &Map::new(), Some(at()))
        .unwrap_err();
    assert!(matches!(err, MissionError::NoQuota(mission_id) if mission_id == id));
    assert!(completes_of(&service, &conn, id).is_empty());
}

#[test]
fn allowance_is_consumed_per_user() {
    let mut conn = open_db_in_memory().unwrap();
    let service = MissionService::with_defaults().unwrap();
    let id = create(
        &service,
        &conn,
        vec![json!({"type": "quota", "allowance": 1})],
        Vec::new(),
    );

    let first = service
        .complete_mission(&mut conn, &CapabilitySet::member(7), id, &Map::new(), Some(at()))
        .unwrap();
    assert_eq!(first.status, CompleteStatus::Final);
    assert_eq!(first.uid, 7);
    assert_eq!(first.section, "all time");

    let err = service
        .complete_mission(&mut conn, &CapabilitySet::member(7), id, &Map::new(), Some(at()))
        .unwrap_err();
    assert!(matches!(err, MissionError::NoQuota(_)));

    service
        .complete_mission(&mut conn, &CapabilitySet::member(8), id, &Map::new(), Some(at()))
        .unwrap();
    assert_eq!(completes_of(&service, &conn, id).len(), 2);
}

#[test]
fn global_allowance_is_shared_by_all_users() {
    let mut conn = open_db_in_memory().unwrap();
    let service = MissionService::with_defaults().unwrap();
    let id = create(
        &service,
        &conn,
        vec![json!({"type": "quota", "allowance": 1, "isGlobal": true})],
        Vec::new(),
    );

    service
        .complete_mission(&mut conn, &CapabilitySet::member(7), id, &Map::new(), Some(at()))
        .unwrap();
    let err = service
        .complete_mission(&mut conn, &CapabilitySet::member(8), id, &Map::new(), Some(at()))
        .unwrap_err();
    assert!(matches!(err, MissionError::NoQuota(_)));
}

#[test]
fn completion_requires_complete_action() {
    let mut conn = open_db_in_memory().unwrap();
    let service = MissionService::with_defaults().unwrap();
    let id = create(
        &service,
        &conn,
        vec![json!({"type": "quota", "allowance": 1})],
        Vec::new(),
    );

    let viewer = CapabilitySet::new(7, [Action::ViewMission]);
    let err = service
        .complete_mission(&mut conn, &viewer, id, &Map::new(), Some(at()))
        .unwrap_err();
    assert!(matches!(err, MissionError::Unauthorized(Action::CompleteMission)));
}

#[test]
fn missions_outside_bounds_are_not_available() {
    let mut conn = open_db_in_memory().unwrap();
    let service = MissionService::with_defaults().unwrap();
    let mut mission = Mission::new("daily", "later");
    mission.begin_time = Some(Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap());
    mission.prerequisites = vec![json!({"type": "quota", "allowance": 1})];
    let id = service.create_mission(&conn, &admin(), mission).unwrap().id;

    let err = service
        .complete_mission(&mut conn, &CapabilitySet::member(7), id, &Map::new(), Some(at()))
        .unwrap_err();
    assert!(matches!(err, MissionError::NotAvailable(_)));

    let missing = service
        .complete_mission(&mut conn, &CapabilitySet::member(7), 999, &Map::new(), Some(at()))
        .unwrap_err();
    assert!(matches!(missing, MissionError::MissionNotFound(999)));
}

#[test]
fn form_validation_failure_rolls_back_the_attempt() {
    let mut conn = open_db_in_memory().unwrap();
    let service = MissionService::with_defaults().unwrap();
    let id = create(
        &service,
        &conn,
        Vec::new(),
        vec![json!({
            "type": "form",
            "fields": [{"name": "answer", "required": true, "maxText": 5}]
        })],
    );

    let err = service
        .complete_mission(
            &mut conn,
            &CapabilitySet::member(7),
            id,
            &input(json!({"form_0": {"answer": {"text": "too long answer"}}})),
            Some(at()),
        )
        .unwrap_err();
    assert!(matches!(err, MissionError::Validation(_)));
    assert!(completes_of(&service, &conn, id).is_empty());

    let complete = service
        .complete_mission(
            &mut conn,
            &CapabilitySet::member(7),
            id,
            &input(json!({"form_0": {"answer": {"text": "yes"}}})),
            Some(at()),
        )
        .unwrap();
    assert_eq!(complete.result.get("form_0"), Some(&json!({"answer": {"text": "yes"}})));
    let stored = service.get_complete(&conn, complete.id).unwrap();
    assert_eq!(stored, complete);
}

#[test]
fn revert_frees_quota_and_is_idempotent() {
    let mut conn = open_db_in_memory().unwrap();
    let service = MissionService::with_defaults().unwrap();
    let id = create(
        &service,
        &conn,
        vec![json!({"type": "quota", "allowance": 1})],
        Vec::new(),
    );
    let member = CapabilitySet::member(7);
    let complete = service
        .complete_mission(&mut conn, &member, id, &Map::new(), Some(at()))
        .unwrap();

    let err = service
        .revert_mission_complete(&mut conn, &member, complete.id)
        .unwrap_err();
    assert!(matches!(err, MissionError::Unauthorized(Action::RevertComplete)));

    service
        .revert_mission_complete(&mut conn, &admin(), complete.id)
        .unwrap();
    service
        .revert_mission_complete(&mut conn, &admin(), complete.id)
        .unwrap();
    assert_eq!(
        service.get_complete(&conn, complete.id).unwrap().status,
        CompleteStatus::Revert
    );

    service
        .complete_mission(&mut conn, &member, id, &Map::new(), Some(at()))
        .unwrap();

    let missing = service
        .revert_mission_complete(&mut conn, &admin(), 999)
        .unwrap_err();
    assert!(matches!(missing, MissionError::CompleteNotFound(999)));
}

#[test]
fn stages_advance_until_the_last_one_finalizes() {
    let mut conn = open_db_in_memory().unwrap();
    let service = MissionService::with_defaults().unwrap();
    let id = create(
        &service,
        &conn,
        Vec::new(),
        vec![json!({"type": "stage", "stageCount": 3})],
    );
    let member = CapabilitySet::member(7);

    let first = service
        .complete_mission(&mut conn, &member, id, &Map::new(), Some(at()))
        .unwrap();
    assert_eq!(first.status, CompleteStatus::Pending);
    assert_eq!(first.result.get("stage_0"), Some(&json!(1)));

    let second = service
        .complete_mission(&mut conn, &member, id, &Map::new(), Some(at()))
        .unwrap();
    assert_eq!(second.status, CompleteStatus::Pending);
    assert_eq!(second.result.get("stage_0"), Some(&json!(2)));

    let third = service
        .complete_mission(&mut conn, &member, id, &Map::new(), Some(at()))
        .unwrap();
    assert_eq!(third.status, CompleteStatus::Final);
    assert_eq!(third.result.get("stage_0"), Some(&json!(3)));

    let err = service
        .complete_mission(&mut conn, &member, id, &input(json!({"stage_0": 5})), Some(at()))
        .unwrap_err();
    assert!(matches!(err, MissionError::Validation(_)));
    assert_eq!(completes_of(&service, &conn, id).len(), 3);
}

#[test]
fn stage_can_skip_ahead_but_not_back() {
    let mut conn = open_db_in_memory().unwrap();
    let service = MissionService::with_defaults().unwrap();
    let id = create(
        &service,
        &conn,
        Vec::new(),
        vec![json!({"type": "stage", "stageCount": 4})],
    );
    let member = CapabilitySet::member(7);

    let jumped = service
        .complete_mission(&mut conn, &member, id, &input(json!({"stage_0": 3})), Some(at()))
        .unwrap();
    assert_eq!(jumped.status, CompleteStatus::Pending);

    let err = service
        .complete_mission(&mut conn, &member, id, &input(json!({"stage_0": 2})), Some(at()))
        .unwrap_err();
    assert!(matches!(err, MissionError::Validation(_)));
}

#[test]
fn random_mission_completes_a_weighted_candidate() {
    let mut conn = open_db_in_memory().unwrap();
    let service = MissionService::with_defaults().unwrap();
    let quota = || vec![json!({"type": "quota", "allowance": 5})];
    let first = create(&service, &conn, quota(), Vec::new());
    let second = create(&service, &conn, quota(), Vec::new());
    let random = create(
        &service,
        &conn,
        Vec::new(),
        vec![json!({
            "type": "randomMission",
            "possibility": {first.to_string(): 1, second.to_string(): 0}
        })],
    );
    let member = CapabilitySet::member(7);

    let complete = service
        .complete_mission(&mut conn, &member, random, &Map::new(), Some(at()))
        .unwrap();
    assert_eq!(
        complete.ext.get("randomMission_0").and_then(|ext| ext.get("missionID")),
        Some(&json!(first))
    );
    assert_eq!(completes_of(&service, &conn, first).len(), 1);
    assert!(completes_of(&service, &conn, second).is_empty());

    service
        .revert_mission_complete(&mut conn, &admin(), complete.id)
        .unwrap();
    let delegated = &completes_of(&service, &conn, first)[0];
    assert_eq!(delegated.status, CompleteStatus::Revert);
}

#[test]
fn random_mission_without_candidates_is_not_available() {
    let mut conn = open_db_in_memory().unwrap();
    let service = MissionService::with_defaults().unwrap();
    let exhausted = create(
        &service,
        &conn,
        vec![json!({"type": "quota", "allowance": 0})],
        Vec::new(),
    );
    let random = create(
        &service,
        &conn,
        Vec::new(),
        vec![json!({"type": "randomMission", "possibility": {exhausted.to_string(): 3}})],
    );

    let err = service
        .complete_mission(&mut conn, &CapabilitySet::member(7), random, &Map::new(), Some(at()))
        .unwrap_err();
    assert!(matches!(err, MissionError::NotAvailable(_)));
    assert!(completes_of(&service, &conn, random).is_empty());
}

#[test]
fn review_sets_a_terminal_mission_status() {
    let mut conn = open_db_in_memory().unwrap();
    let service = MissionService::with_defaults().unwrap();
    let id = create(&service, &conn, Vec::new(), vec![json!({"type": "review"})]);

    let reviewer = CapabilitySet::new(9, [Action::CompleteMission, Action::ReviewMission]);
    let bad = service
        .complete_mission(&mut conn, &reviewer, id, &input(json!({"review_0": "OPEN"})), Some(at()))
        .unwrap_err();
    assert!(matches!(bad, MissionError::Validation(_)));

    let complete = service
        .complete_mission(
            &mut conn,
            &reviewer,
            id,
            &input(json!({"review_0": {"status": "SUCCESS"}})),
            Some(at()),
        )
        .unwrap();
    assert_eq!(
        service.get_mission(&conn, id).unwrap().status,
        MissionStatus::Success
    );

    let err = service
        .complete_mission(&mut conn, &reviewer, id, &input(json!({"review_0": "FAILED"})), Some(at()))
        .unwrap_err();
    assert!(matches!(err, MissionError::NotAvailable(_)));

    service
        .revert_mission_complete(&mut conn, &admin(), complete.id)
        .unwrap();
    assert_eq!(
        service.get_mission(&conn, id).unwrap().status,
        MissionStatus::Open
    );
}

#[test]
fn members_submit_review_missions_without_settling_them() {
    let mut conn = open_db_in_memory().unwrap();
    let service = MissionService::with_defaults().unwrap();
    let id = create(
        &service,
        &conn,
        vec![json!({"type": "quota", "allowance": 5})],
        vec![
            json!({"type": "form", "fields": [{"name": "answer", "required": true}]}),
            json!({"type": "review"}),
        ],
    );

    let submitted = service
        .complete_mission(
            &mut conn,
            &CapabilitySet::member(7),
            id,
            &input(json!({
                "form_0": {"answer": {"text": "done"}},
                "review_1": "SUCCESS"
            })),
            Some(at()),
        )
        .unwrap();
    assert_eq!(submitted.status, CompleteStatus::Final);
    assert!(submitted.result.get("review_1").is_none());
    assert!(submitted.ext.get("review_1").is_none());
    assert_eq!(
        service.get_mission(&conn, id).unwrap().status,
        MissionStatus::Open
    );

    service
        .revert_mission_complete(&mut conn, &admin(), submitted.id)
        .unwrap();
    assert_eq!(
        service.get_mission(&conn, id).unwrap().status,
        MissionStatus::Open
    );
    assert_eq!(
        service.get_complete(&conn, submitted.id).unwrap().status,
        CompleteStatus::Revert
    );
}

#[test]
fn listing_reflects_consumed_quota() {
    let mut conn = open_db_in_memory().unwrap();
    let service = MissionService::with_defaults().unwrap();
    let id = create(
        &service,
        &conn,
        vec![json!({"type": "quota", "allowance": 2})],
        Vec::new(),
    );
    let member = CapabilitySet::member(7);
    service
        .complete_mission(&mut conn, &member, id, &Map::new(), Some(at()))
        .unwrap();

    let query = MissionQuery {
        caps: Some(&member),
        target_time: Some(at()),
        ..MissionQuery::default()
    };
    let (missions, _) = service.get_missions(&conn, &query).unwrap();
    assert_eq!(missions[0].status, MissionStatus::Active);
    assert_eq!(missions[0].quota, Some(2));
    assert_eq!(missions[0].complete_count, Some(1));

    service
        .complete_mission(&mut conn, &member, id, &Map::new(), Some(at()))
        .unwrap();
    let (missions, _) = service.get_missions(&conn, &query).unwrap();
    assert_eq!(missions[0].status, MissionStatus::Inactive);
    assert_eq!(missions[0].complete_count, Some(2));
}
