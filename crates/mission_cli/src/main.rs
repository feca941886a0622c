//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `mission_core` linkage.
//! - Optionally list the missions of a database as JSON at the current time.
//!
//! Usage: `mission_cli [DB_PATH]`

use mission_core::{open_db, MissionQuery, MissionService};
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("mission_core ping={}", mission_core::ping());
    println!("mission_core version={}", mission_core::core_version());

    let Some(db_path) = std::env::args().nth(1) else {
        return ExitCode::SUCCESS;
    };
    match list_missions(&db_path) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn list_missions(db_path: &str) -> Result<String, Box<dyn std::error::Error>> {
    let conn = open_db(db_path)?;
    let service = MissionService::with_defaults()?;
    let (missions, total) = service.get_missions(
        &conn,
        &MissionQuery {
            target_time: Some(chrono::Utc::now()),
            ..MissionQuery::default()
        },
    )?;
    Ok(serde_json::to_string_pretty(&serde_json::json!({
        "total": total,
        "missions": missions,
    }))?)
}
