use chrono::{Duration, Utc};
use mission_core::{
    open_db_in_memory, Action, CalendarIntervals, CapabilitySet, EngineConfig, Mission,
    MissionError, MissionService, MissionStatus, RuleRegistry,
};
use serde_json::json;
use std::sync::Arc;

fn manager() -> CapabilitySet {
    CapabilitySet::new(1, [Action::ManageMission])
}

fn service_with_templates() -> MissionService {
    let config = EngineConfig::from_json(
        r#"{
            "templates": {
                "checkin": {
                    "prerequisites": [{"type": "quota", "allowance": 1}],
                    "completes": [{"type": "form", "fields": []}]
                }
            }
        }"#,
    )
    .unwrap();
    MissionService::new(
        Arc::new(RuleRegistry::with_builtin().unwrap()),
        Arc::new(CalendarIntervals::default()),
        config,
    )
}

#[test]
fn completion_ids_are_assigned_and_stored() {
    let conn = open_db_in_memory().unwrap();
    let service = MissionService::with_defaults().unwrap();
    let mut mission = Mission::new("daily", "  Check in  ");
    mission.completes = vec![
        json!({"type": "form"}),
        json!({"type": "form"}),
        json!({"type": "review", "ID": "approval"}),
    ];

    let stored = service.create_mission(&conn, &manager(), mission).unwrap();
    assert_eq!(stored.name, "Check in");
    let ids: Vec<&str> = stored
        .completes
        .iter()
        .filter_map(|raw| raw.get("ID").and_then(|id| id.as_str()))
        .collect();
    assert_eq!(ids, vec!["form_0", "form_1", "approval"]);
    assert_eq!(service.get_mission(&conn, stored.id).unwrap(), stored);
}

#[test]
fn duplicate_explicit_ids_are_rejected() {
    let conn = open_db_in_memory().unwrap();
    let service = MissionService::with_defaults().unwrap();
    let mut mission = Mission::new("daily", "dup");
    mission.completes = vec![
        json!({"type": "form", "ID": "same"}),
        json!({"type": "review", "ID": "same"}),
    ];

    let err = service.create_mission(&conn, &manager(), mission).unwrap_err();
    assert!(matches!(err, MissionError::Validation(_)));
}

#[test]
fn definitions_are_validated() {
    let conn = open_db_in_memory().unwrap();
    let service = MissionService::with_defaults().unwrap();
    let quota = || vec![json!({"type": "quota", "allowance": 1})];

    let mut unnamed = Mission::new("daily", "   ");
    unnamed.prerequisites = quota();
    let mut untyped = Mission::new(" ", "name");
    untyped.prerequisites = quota();
    let mut backwards = Mission::new("daily", "backwards");
    backwards.prerequisites = quota();
    backwards.begin_time = Some(Utc::now());
    backwards.end_time = Some(Utc::now() - Duration::days(1));
    let mut unknown_interval = Mission::new("daily", "interval");
    unknown_interval.prerequisites = quota();
    unknown_interval.section_interval = Some("fortnightly".to_string());
    let mut unknown_rule = Mission::new("daily", "rule");
    unknown_rule.prerequisites = vec![json!({"type": "moonPhase"})];
    let mut bad_config = Mission::new("daily", "config");
    bad_config.prerequisites = vec![json!({"type": "quota", "allowance": -1})];
    let rule_less = Mission::new("daily", "empty");

    for mission in [
        unnamed,
        untyped,
        backwards,
        unknown_interval,
        unknown_rule,
        bad_config,
        rule_less,
    ] {
        let name = mission.name.clone();
        let err = service.create_mission(&conn, &manager(), mission).unwrap_err();
        assert!(
            matches!(err, MissionError::Validation(_)),
            "mission `{name}` gave {err:?}"
        );
    }
}

#[test]
fn templates_fill_rule_less_definitions() {
    let conn = open_db_in_memory().unwrap();
    let service = service_with_templates();

    let stored = service
        .create_mission(&conn, &manager(), Mission::new("checkin", "Morning"))
        .unwrap();
    assert_eq!(stored.prerequisites, vec![json!({"type": "quota", "allowance": 1})]);
    assert_eq!(stored.completes[0].get("ID"), Some(&json!("form_0")));

    let err = service
        .create_mission(&conn, &manager(), Mission::new("unknown", "Evening"))
        .unwrap_err();
    assert!(matches!(err, MissionError::Validation(_)));
}

#[test]
fn management_requires_manage_action() {
    let conn = open_db_in_memory().unwrap();
    let service = service_with_templates();
    let member = CapabilitySet::member(7);

    let err = service
        .create_mission(&conn, &member, Mission::new("checkin", "Morning"))
        .unwrap_err();
    assert!(matches!(err, MissionError::Unauthorized(Action::ManageMission)));

    let stored = service
        .create_mission(&conn, &manager(), Mission::new("checkin", "Morning"))
        .unwrap();
    assert!(matches!(
        service.delete_mission(&conn, &member, stored.id).unwrap_err(),
        MissionError::Unauthorized(_)
    ));
    assert!(matches!(
        service
            .set_mission_categories(&conn, &member, stored.id, &[1])
            .unwrap_err(),
        MissionError::Unauthorized(_)
    ));
}

#[test]
fn updates_replace_definitions_and_store_live_status_as_open() {
    let conn = open_db_in_memory().unwrap();
    let service = service_with_templates();
    let mut stored = service
        .create_mission(&conn, &manager(), Mission::new("checkin", "Morning"))
        .unwrap();

    stored.name = "Early morning".to_string();
    stored.status = MissionStatus::Active;
    stored.prerequisites = vec![json!({"type": "quota", "allowance": 3})];
    let updated = service.update_mission(&conn, &manager(), stored).unwrap();
    assert_eq!(updated.name, "Early morning");
    assert_eq!(updated.status, MissionStatus::Open);
    assert_eq!(updated.prerequisites[0].get("allowance"), Some(&json!(3)));

    let mut missing = updated.clone();
    missing.id = 999;
    assert!(matches!(
        service.update_mission(&conn, &manager(), missing).unwrap_err(),
        MissionError::MissionNotFound(999)
    ));
}

#[test]
fn categories_reject_non_positive_ids() {
    let conn = open_db_in_memory().unwrap();
    let service = service_with_templates();
    let stored = service
        .create_mission(&conn, &manager(), Mission::new("checkin", "Morning"))
        .unwrap();

    assert!(matches!(
        service
            .set_mission_categories(&conn, &manager(), stored.id, &[3, 0])
            .unwrap_err(),
        MissionError::Validation(_)
    ));
    service
        .set_mission_categories(&conn, &manager(), stored.id, &[3, 4])
        .unwrap();
}
