// Integration test for IPC protocol serialization

use chrono::Utc;
use mlinzi::alert::{Alert, AlertLevel};
use mlinzi::health::{ComponentKind, HealthRecord};
use mlinzi::ipc::{Command, DaemonCommand, DaemonStatus, Request, Response, ResponseData};
use mlinzi::update::{ConfigPatch, UpdateOutcome};
use std::collections::HashMap;

#[test]
fn test_request_round_trip() {
    let commands = vec![
        Command::Workers,
        Command::Scan,
        Command::Restart {
            name: "prices".to_string(),
        },
        Command::Alerts {
            include_resolved: true,
        },
        Command::ResolveAlert { id: 7 },
        Command::Daemon(DaemonCommand::Stop),
    ];

    for (id, command) in commands.into_iter().enumerate() {
        let request = Request::new(id as u64, command.clone());
        let json = serde_json::to_string(&request).expect("Failed to serialize request");
        let decoded: Request = serde_json::from_str(&json).expect("Failed to deserialize request");

        assert_eq!(decoded.id, id as u64);
        assert_eq!(decoded.command, command);
    }
}

#[test]
fn test_update_patch_omits_unset_fields() {
    let patch = ConfigPatch {
        args: Some(vec!["--once".to_string()]),
        env_set: HashMap::from([("FEED".to_string(), "prices".to_string())]),
        ..Default::default()
    };
    let request = Request::new(
        3,
        Command::Update {
            name: "prices".to_string(),
            patch,
        },
    );

    let json = serde_json::to_string(&request).unwrap();
    assert!(json.contains("\"args\""));
    assert!(!json.contains("script"));
    assert!(!json.contains("max_memory"));

    let decoded: Request = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded.command, request.command);
}

#[test]
fn test_update_outcome_is_tagged() {
    let response = Response::success(
        1,
        ResponseData::Update(UpdateOutcome::RolledBack {
            reason: "not healthy within 30s".to_string(),
            recovered: true,
        }),
    );

    let json = serde_json::to_string(&response).unwrap();
    assert!(json.contains("\"outcome\":\"rolled_back\""));

    let decoded: Response = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded.result, response.result);
}

#[test]
fn test_error_response() {
    let response = Response::error(9, "Worker not found: ghost".to_string());
    let json = serde_json::to_string(&response).unwrap();
    let decoded: Response = serde_json::from_str(&json).unwrap();

    assert_eq!(decoded.id, 9);
    assert_eq!(decoded.result, Err("Worker not found: ghost".to_string()));
}

#[test]
fn test_health_and_alert_payloads() {
    let record = HealthRecord::unknown("store", ComponentKind::Dependency);
    let alert = Alert {
        id: 1,
        level: AlertLevel::Critical,
        component: "store".to_string(),
        message: "dependency unhealthy".to_string(),
        timestamp: Utc::now(),
        resolved: false,
        resolved_at: None,
    };

    for data in [
        ResponseData::Health(vec![record]),
        ResponseData::AlertResolved(alert),
        ResponseData::DaemonStatus(DaemonStatus {
            pid: 42,
            version: "0.1.0".to_string(),
            started_at: Utc::now(),
            uptime_secs: 10,
            workers: 3,
            pending_restarts: 1,
        }),
    ] {
        let response = Response::success(2, data);
        let json = serde_json::to_string(&response).unwrap();
        let decoded: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.result, response.result);
    }
}
