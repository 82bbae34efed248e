use std::io::Write;
use std::sync::Mutex;

use tempfile::Builder;

use exam_proctor::ProctordConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PROCTOR_CONFIG",
        "PROCTOR_DB_PATH",
        "PROCTOR_TEST_ID",
        "PROCTOR_STUDENT_ID",
        "PROCTOR_MAX_VIOLATIONS",
        "PROCTOR_WARNING_MS",
        "PROCTOR_FULLSCREEN",
        "PROCTOR_SINK_CAPACITY",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ProctordConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "proctor.db");
    assert_eq!(cfg.test_id, None);
    assert_eq!(cfg.proctoring.max_violations, 3);
    assert_eq!(cfg.sink_capacity, 256);
    assert_eq!(cfg.poll_interval_ms, 100);
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    let json = r#"{
        "db_path": "proctor_prod.db",
        "test_id": "midterm-2024",
        "student_id": "s-100",
        "proctoring": {
            "max_violations": 5,
            "enable_fullscreen": true,
            "prevent_right_click": false
        },
        "sink": { "capacity": 64 },
        "poll_interval_ms": 250
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("PROCTOR_CONFIG", file.path());
    std::env::set_var("PROCTOR_STUDENT_ID", "s-200");
    std::env::set_var("PROCTOR_WARNING_MS", "8000");
    std::env::set_var("PROCTOR_FULLSCREEN", "off");

    let cfg = ProctordConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "proctor_prod.db");
    assert_eq!(cfg.test_id.as_deref(), Some("midterm-2024"));
    assert_eq!(cfg.student_id.as_deref(), Some("s-200"));
    assert_eq!(cfg.proctoring.max_violations, 5);
    assert_eq!(cfg.proctoring.warning_duration_ms, 8000);
    assert!(!cfg.proctoring.enable_fullscreen);
    assert!(!cfg.proctoring.prevent_right_click);
    assert!(cfg.proctoring.prevent_copy_paste);
    assert_eq!(cfg.sink_capacity, 64);
    assert_eq!(cfg.poll_interval_ms, 250);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
db_path = "exam.db"
test_id = "quiz-1"

[proctoring]
max_violations = 2
track_time_away = false
resume_from_log = true
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = ProctordConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.db_path, "exam.db");
    assert_eq!(cfg.proctoring.max_violations, 2);
    assert!(!cfg.proctoring.track_time_away);
    assert!(cfg.proctoring.resume_from_log);
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PROCTOR_MAX_VIOLATIONS", "three");
    assert!(ProctordConfig::load().is_err());
    clear_env();

    std::env::set_var("PROCTOR_TEST_ID", "bad id with spaces");
    assert!(ProctordConfig::load().is_err());
    clear_env();

    std::env::set_var("PROCTOR_WARNING_MS", "0");
    assert!(ProctordConfig::load().is_err());
    clear_env();

    std::env::set_var("PROCTOR_SINK_CAPACITY", "0");
    assert!(ProctordConfig::load().is_err());
    clear_env();
}
