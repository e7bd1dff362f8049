//! Commands against real stores in a temp data directory.

use pretty_assertions::assert_eq;
use wellflow_cli::{App, AppConfig, AutoPolicy, ConsoleOperator, DriveOutcome};
use wellflow_core::{ModelKey, ModelStateStore, ModelStatus};
use wellflow_test_utils::write_sample_data;

fn app() -> (tempfile::TempDir, App) {
    let dir = tempfile::tempdir().unwrap();
    write_sample_data(dir.path()).unwrap();
    let config = AppConfig::default().with_data_dir(dir.path()).immediate();
    let app = App::open(config).unwrap();
    (dir, app)
}

fn text(out: Vec<u8>) -> String {
    String::from_utf8(out).unwrap()
}

/// Scenario: "七月的风险预测" with the save policy, then a manager review.
#[tokio::test]
async fn risk_run_is_saved_queued_and_reviewed() {
    let (_dir, app) = app();
    let mut out = Vec::<u8>::new();
    let summary = app
        .run("user", "七月的风险预测", &mut AutoPolicy::Save, &mut out)
        .await
        .unwrap();
    assert_eq!(summary.outcome, DriveOutcome::Finished);
    let printed = text(out);
    assert!(printed.contains("收到指令。已为您规划 **风险预测** 流程"));
    assert!(printed.contains("📊 **核心结论**: 扫描发现 2 口井存在潜在风险"));

    let stores = app.stores();
    assert_eq!(
        stores.users.model_status("user", ModelKey::Risk).unwrap(),
        ModelStatus::Private
    );
    let history = stores.history.list("user").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(Some(&history[0].id), summary.history_id.as_ref());

    let pending = stores.reports.pending().unwrap();
    assert_eq!(pending.len(), 1);
    let id = pending[0].id.clone();

    let mut out = Vec::<u8>::new();
    assert!(app.approve("user", "123", &id, &mut out).is_err());
    assert!(app.approve("mr.gong", "wrong", &id, &mut out).is_err());
    app.reject("mr.gong", "123456", &id, Some("请补充数据"), &mut out)
        .unwrap();

    let mut out = Vec::<u8>::new();
    app.inbox("user", true, &mut out).unwrap();
    let printed = text(out);
    assert!(printed.contains("🔔 您有 1 条驳回通知"));
    assert!(printed.contains("请补充数据"));
    assert!(stores.reports.rejected_for("user").unwrap().is_empty());
}

#[tokio::test]
async fn private_model_runs_directly_on_second_request() {
    let (_dir, app) = app();
    let mut sink = Vec::<u8>::new();
    app.run("user", "7月注水", &mut AutoPolicy::Save, &mut sink)
        .await
        .unwrap();

    let mut out = Vec::<u8>::new();
    let summary = app
        .run("user", "7月注水", &mut AutoPolicy::Direct, &mut out)
        .await
        .unwrap();
    assert_eq!(summary.outcome, DriveOutcome::Finished);
    assert_eq!(app.stores().reports.list().unwrap().len(), 2);
    assert_eq!(
        app.stores().users.model_version("user", ModelKey::Water).unwrap(),
        0
    );
}

#[tokio::test]
async fn console_cancel_archives_session() {
    let (_dir, app) = app();
    let mut console = ConsoleOperator::new("q\n".as_bytes(), Vec::<u8>::new());
    let mut out = Vec::<u8>::new();
    let summary = app
        .run("user", "8月产量", &mut console, &mut out)
        .await
        .unwrap();
    assert_eq!(summary.outcome, DriveOutcome::Cancelled { index: 0 });

    let entries = app.stores().history.list("user").unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].file_path.is_empty());
    assert!(entries[0].title.ends_with("| 产量预测"));
    assert!(app.stores().reports.list().unwrap().is_empty());
}

#[tokio::test]
async fn history_show_replays_saved_output() {
    let (_dir, app) = app();
    let mut sink = Vec::<u8>::new();
    let summary = app
        .run("user", "7月产量", &mut AutoPolicy::Once, &mut sink)
        .await
        .unwrap();
    let id = summary.history_id.unwrap();

    let mut out = Vec::<u8>::new();
    app.history_show("user", &id, &mut out).unwrap();
    let printed = text(out);
    assert!(printed.starts_with("> 7月产量"));
    assert!(printed.contains("49.8~52.4"));
    assert!(app.history_show("user", "missing", &mut Vec::<u8>::new()).is_err());
}

#[tokio::test]
async fn unknown_user_cannot_run() {
    let (_dir, app) = app();
    let err = app
        .run("ghost", "7月产量", &mut AutoPolicy::Once, &mut Vec::<u8>::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown user"));
}

#[tokio::test]
async fn tuning_bumps_version() {
    let (_dir, app) = app();
    let mut out = Vec::<u8>::new();
    let version = app
        .models_tune("user", ModelKey::Trend, "calib.csv", &mut out)
        .await
        .unwrap();
    assert_eq!(version, 1);
    let printed = text(out);
    assert!(printed.contains("[7]"));
    assert!(printed.contains("当前版本 V1"));
}

#[test]
fn register_login_and_library() {
    let (_dir, app) = app();
    let mut out = Vec::<u8>::new();
    app.register("alice", "pw", &mut out).unwrap();
    assert!(app.register("superadmin", "pw", &mut out).is_err());
    assert_eq!(
        app.login("alice", "pw", &mut out).unwrap(),
        wellflow_store::Role::User
    );

    app.stores().users.save_private("alice", ModelKey::Risk).unwrap();
    let mut out = Vec::<u8>::new();
    app.models_list("alice", None, &mut out).unwrap();
    let printed = text(out);
    assert!(printed.contains("🌐 公有模型 (9)"));
    assert!(printed.contains("🔒 私有模型 (1)"));
}
