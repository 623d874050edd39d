mod common;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::tempdir;

use botrun_core::engine::{BridgeHandle, PRODUCED_FILES_KEY};
use botrun_core::steps::DownloadRecord;
use botrun_core::{
    BrowserError, BrowserResult, Context, DefaultsSection, DelegatedScript, DialogKind, Driver,
    ElementSnapshot, EngineError, JsDialog, StepOutcome, StepRegistry, StepSpec,
};

use common::{build, MockDriver};

fn login_spec() -> StepSpec {
    StepSpec::new("authenticate")
        .named("login")
        .with_param("username", "alice")
        .with_param("password", "hunter2")
        .with_param("username_locator", "#user")
        .with_param("password_locator", "#pass")
        .with_param("submit_locator", "#submit")
        .with_param("success_indicator", ".dashboard")
        .with_param("verification_timeout_seconds", 0)
}

#[tokio::test]
async fn navigate_records_url_and_dom() {
    let driver = MockDriver::new().with_page_source("<html>portal</html>");
    let step = build(
        StepSpec::new("navigate")
            .named("home")
            .with_param("url", "https://portal.example.com/start")
            .with_param("save_dom", true),
    );
    let mut ctx = Context::new();
    let outcome = step.step().execute(&driver, &mut ctx).await.unwrap();
    assert_eq!(outcome, StepOutcome::Success);
    assert_eq!(
        ctx.get("current_url"),
        Some(&json!("https://portal.example.com/start"))
    );
    assert_eq!(ctx.get("home_dom"), Some(&json!("<html>portal</html>")));
}

#[test]
fn navigate_rejects_invalid_url() {
    let err = StepRegistry::with_builtins()
        .instantiate(
            &StepSpec::new("navigate").with_param("url", "not a url"),
            &DefaultsSection::immediate(),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidParameter { .. }));
}

#[tokio::test]
async fn authenticate_establishes_session() {
    let driver = MockDriver::new()
        .with_present("#user")
        .with_present("#pass")
        .with_present("#submit")
        .with_reveal("#submit", ".dashboard")
        .with_cookie("sid", "abc123");
    let step = build(login_spec());
    let mut ctx = Context::new();

    let outcome = step.step().execute(&driver, &mut ctx).await.unwrap();

    assert_eq!(outcome, StepOutcome::Success);
    assert!(ctx.flag("logged_in"));
    assert!(ctx.session_active);
    assert_eq!(ctx.cookies.get("sid").map(String::as_str), Some("abc123"));
    assert_eq!(
        driver.typed(),
        vec![
            ("#user".to_string(), "alice".to_string()),
            ("#pass".to_string(), "hunter2".to_string())
        ]
    );
    assert!(!step.describe().contains("hunter2"));
}

#[tokio::test]
async fn authenticate_recovers_with_refresh() {
    let driver = MockDriver::new()
        .with_present("#user")
        .with_present("#pass")
        .with_present("#submit")
        .with_present_after_reload(".dashboard");
    let step = build(login_spec());
    let mut ctx = Context::new();

    let outcome = step.step().execute(&driver, &mut ctx).await.unwrap();

    assert_eq!(outcome, StepOutcome::Success);
    assert!(driver.state().calls.contains(&"reload".to_string()));
    assert_eq!(driver.clicks(), vec!["#submit".to_string()]);
}

#[tokio::test]
async fn authenticate_without_indicator_fails() {
    let driver = MockDriver::new()
        .with_present("#user")
        .with_present("#pass")
        .with_present("#submit");
    let step = build(login_spec().with_param("retry_with_refresh", false));
    let mut ctx = Context::new();

    let outcome = step.step().execute(&driver, &mut ctx).await.unwrap();

    assert!(matches!(outcome, StepOutcome::Failure(reason) if reason.contains(".dashboard")));
    assert!(!ctx.session_active);
    assert!(!ctx.contains("logged_in"));
}

#[tokio::test]
async fn extract_collects_attributes() {
    let mut first = ElementSnapshot::with_text("Q1");
    first
        .attributes
        .insert("href".into(), "/reports/q1.pdf".into());
    let mut second = ElementSnapshot::with_text("Q2");
    second
        .attributes
        .insert("href".into(), "/reports/q2.pdf".into());
    let driver = MockDriver::new().with_elements("a.report", vec![first, second]);
    let step = build(
        StepSpec::new("scrape")
            .with_param("locator", "a.report")
            .with_param("attribute", "href")
            .with_param("context_key", "links"),
    );
    let mut ctx = Context::new();

    step.step().execute(&driver, &mut ctx).await.unwrap();

    assert_eq!(
        ctx.get("links"),
        Some(&json!(["/reports/q1.pdf", "/reports/q2.pdf"]))
    );
}

#[tokio::test]
async fn extract_with_no_match_stores_empty_list() {
    let driver = MockDriver::new();
    let step = build(
        StepSpec::new("extract")
            .named("headlines")
            .with_param("locator", "h2.headline"),
    );
    let mut ctx = Context::new();

    let outcome = step.step().execute(&driver, &mut ctx).await.unwrap();

    assert_eq!(outcome, StepOutcome::Success);
    assert_eq!(ctx.get("headlines"), Some(&json!([])));
}

#[tokio::test]
async fn fetch_file_records_download_once() {
    let dir = tempdir().unwrap();
    let driver = MockDriver::new().with_download("#export", "report.csv", b"a,b\n1,2\n");
    let step = build(
        StepSpec::new("download")
            .named("export")
            .with_param("locator", "#export")
            .with_param("download_dir", dir.path().to_string_lossy().into_owned())
            .with_param("file_pattern", "*.csv")
            .with_param("timeout_seconds", 0),
    );
    let mut ctx = Context::new();

    let outcome = step.step().execute(&driver, &mut ctx).await.unwrap();
    assert_eq!(outcome, StepOutcome::Success);

    let record: DownloadRecord = ctx.get_as("last_download").unwrap();
    assert_eq!(record.filename, "report.csv");
    assert_eq!(record.size_bytes, 8);
    assert!(record.sha256.is_some());
    assert_eq!(ctx.get_as::<u64>("download_count"), Some(1));

    step.step().execute(&driver, &mut ctx).await.unwrap();
    assert_eq!(driver.clicks().len(), 1);
    assert_eq!(ctx.get_as::<u64>("download_count"), Some(1));
}

#[tokio::test]
async fn fetch_file_without_trigger_fails() {
    let dir = tempdir().unwrap();
    let step = build(
        StepSpec::new("fetch-file")
            .with_param("locator", "#missing")
            .with_param("download_dir", dir.path().to_string_lossy().into_owned()),
    );
    let mut ctx = Context::new();
    let outcome = step.step().execute(&MockDriver::new(), &mut ctx).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Failure(reason) if reason.contains("#missing")));
}

#[tokio::test]
async fn batch_succeeds_when_any_file_arrives_and_skips_done_triggers() {
    let dir = tempdir().unwrap();
    let driver = MockDriver::new()
        .with_download("#jan", "jan.pdf", b"%PDF-jan")
        .with_present("#feb");
    let step = build(
        StepSpec::new("download_multiple")
            .named("monthly")
            .with_param("locators", json!(["#jan", "#feb"]))
            .with_param("download_dir", dir.path().to_string_lossy().into_owned())
            .with_param("timeout_seconds", 0),
    );
    let mut ctx = Context::new();

    let outcome = step.step().execute(&driver, &mut ctx).await.unwrap();
    assert_eq!(outcome, StepOutcome::Success);
    assert_eq!(ctx.get_as::<u64>("download_count"), Some(1));
    assert_eq!(ctx.get("monthly.fetched"), Some(&json!([0])));

    step.step().execute(&driver, &mut ctx).await.unwrap();
    assert_eq!(
        driver.clicks(),
        vec!["#jan".to_string(), "#feb".to_string(), "#feb".to_string()]
    );
}

#[tokio::test]
async fn batch_with_nothing_downloaded_fails() {
    let dir = tempdir().unwrap();
    let step = build(
        StepSpec::new("fetch-files-batch")
            .with_param("locators", json!(["#a", "#b"]))
            .with_param("download_dir", dir.path().to_string_lossy().into_owned())
            .with_param("timeout_seconds", 0),
    );
    let mut ctx = Context::new();
    let outcome = step.step().execute(&MockDriver::new(), &mut ctx).await.unwrap();
    assert!(!outcome.is_success());
}

#[tokio::test]
async fn submit_form_fills_fields_and_never_resubmits() {
    let driver = MockDriver::new()
        .with_present("#email")
        .with_present("#secret")
        .with_present("#terms")
        .with_present("#newsletter")
        .with_present("#send")
        .with_reveal("#send", ".thanks");
    let step = build(
        StepSpec::new("submit_form")
            .named("signup")
            .with_param(
                "fields",
                json!([
                    {"locator": "#email", "value": "a@example.com", "type": "email"},
                    {"locator": "#secret", "value": "pw", "type": "password"},
                    {"locator": "#terms", "value": true, "type": "checkbox"},
                    {"locator": "#newsletter", "value": "no", "type": "checkbox"}
                ]),
            )
            .with_param("submit_locator", "#send")
            .with_param("success_indicator", ".thanks"),
    );
    let mut ctx = Context::new();

    let outcome = step.step().execute(&driver, &mut ctx).await.unwrap();
    assert_eq!(outcome, StepOutcome::Success);
    assert_eq!(driver.clicks(), vec!["#terms".to_string(), "#send".to_string()]);
    assert!(ctx.flag("form_submitted"));
    let data = ctx.get("form_data").cloned().unwrap_or(Value::Null);
    assert_eq!(data["#email"], "a@example.com");
    assert!(data.get("#secret").is_none());

    step.step().execute(&driver, &mut ctx).await.unwrap();
    assert_eq!(driver.clicks().len(), 2);
}

#[tokio::test]
async fn unconfirmed_submission_waits_the_verification_default() {
    let driver = MockDriver::new().with_present("#email").with_present("#send");
    let step = build(
        StepSpec::new("submit-form")
            .named("contact")
            .with_param("fields", json!([{"locator": "#email", "value": "a@example.com"}]))
            .with_param("submit_locator", "#send")
            .with_param("success_indicator", ".thanks"),
    );
    let mut ctx = Context::new();

    let outcome = step.step().execute(&driver, &mut ctx).await.unwrap();
    let expected = format!(
        "absent after {}s",
        DefaultsSection::immediate().verification_timeout_seconds
    );
    assert!(
        matches!(&outcome, StepOutcome::Failure(reason) if reason.contains(&expected)),
        "{outcome:?}"
    );
    assert!(!ctx.flag("form_submitted"));
}

#[tokio::test]
async fn end_session_always_deactivates() {
    let step = build(StepSpec::new("logout").with_param("logout_locator", "#logout"));
    let mut ctx = Context::new();
    ctx.session_active = true;
    ctx.set("logged_in", true);
    ctx.cookies.insert("sid".into(), "abc".into());

    let outcome = step.step().execute(&MockDriver::new(), &mut ctx).await.unwrap();

    assert!(!outcome.is_success());
    assert!(!ctx.session_active);
    assert_eq!(ctx.get("logged_in"), Some(&json!(false)));
    assert!(ctx.cookies.is_empty());
}

#[tokio::test]
async fn end_session_via_url() {
    let driver = MockDriver::new();
    let step = build(StepSpec::new("end-session").with_param("logout_url", "https://x.test/logout"));
    let mut ctx = Context::new();
    ctx.session_active = true;
    let outcome = step.step().execute(&driver, &mut ctx).await.unwrap();
    assert!(outcome.is_success());
    assert!(!ctx.session_active);
    assert_eq!(
        driver.state().current_url.as_deref(),
        Some("https://x.test/logout")
    );
}

struct ExportScript;

#[async_trait]
impl DelegatedScript for ExportScript {
    async fn run(
        &self,
        _driver: &dyn Driver,
        config: &Value,
        bridge: BridgeHandle,
    ) -> BrowserResult<()> {
        let pages = config["pages"].as_u64().unwrap_or(0);
        for _ in 0..pages {
            bridge.report_progress(1);
        }
        bridge.report_file("/exports/ledger.xlsx");
        if config["fail"].as_bool().unwrap_or(false) {
            return Err(BrowserError::Script("portal closed the export".into()));
        }
        Ok(())
    }
}

fn script_registry() -> StepRegistry {
    let mut registry = StepRegistry::with_builtins();
    registry.register_script("export", Arc::new(ExportScript));
    registry
}

#[tokio::test]
async fn script_step_reports_through_bridge() {
    let step = script_registry()
        .instantiate(
            &StepSpec::new("script")
                .with_param("name", "export")
                .with_param("config", json!({"pages": 3})),
            &DefaultsSection::immediate(),
        )
        .unwrap();
    let mut ctx = Context::new();

    let outcome = step.step().execute(&MockDriver::new(), &mut ctx).await.unwrap();
    assert!(outcome.is_success());

    let report = ctx.drain_bridge();
    assert_eq!(report.progress, 3);
    assert_eq!(ctx.get(PRODUCED_FILES_KEY), Some(&json!(["/exports/ledger.xlsx"])));
}

#[tokio::test]
async fn script_error_becomes_failure() {
    let step = script_registry()
        .instantiate(
            &StepSpec::new("script")
                .with_param("name", "export")
                .with_param("config", json!({"fail": true})),
            &DefaultsSection::immediate(),
        )
        .unwrap();
    let mut ctx = Context::new();
    let outcome = step.step().execute(&MockDriver::new(), &mut ctx).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Failure(reason) if reason.contains("portal closed")));
}

#[test]
fn unknown_script_fails_at_build_time() {
    let err = StepRegistry::with_builtins()
        .instantiate(
            &StepSpec::new("script").with_param("name", "ghost"),
            &DefaultsSection::immediate(),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownScript { name } if name == "ghost"));
}

#[cfg(unix)]
#[tokio::test]
async fn command_forwards_protocol_lines() {
    let step = build(
        StepSpec::new("command")
            .with_param("program", "sh")
            .with_param(
                "args",
                json!(["-c", "echo '::progress 2'; echo hello; echo '::file /tmp/out.csv'"]),
            ),
    );
    assert_eq!(step.policy().retry_count, 1);
    let mut ctx = Context::new();

    let outcome = step.step().execute(&MockDriver::new(), &mut ctx).await.unwrap();
    assert!(outcome.is_success());
    let report = ctx.drain_bridge();
    assert_eq!(report.progress, 2);
    assert_eq!(ctx.get(PRODUCED_FILES_KEY), Some(&json!(["/tmp/out.csv"])));
}

#[cfg(unix)]
#[tokio::test]
async fn command_exit_status_is_a_failure() {
    let step = build(
        StepSpec::new("command")
            .with_param("program", "sh")
            .with_param("args", json!(["-c", "echo broken >&2; exit 3"])),
    );
    let mut ctx = Context::new();
    let outcome = step.step().execute(&MockDriver::new(), &mut ctx).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Failure(reason) if reason.contains("broken")));
}

#[cfg(unix)]
#[tokio::test]
async fn command_timeout_is_a_failure() {
    let step = build(
        StepSpec::new("command")
            .with_param("program", "sleep")
            .with_param("args", json!(["5"]))
            .with_param("timeout_seconds", 0),
    );
    let mut ctx = Context::new();
    let outcome = step.step().execute(&MockDriver::new(), &mut ctx).await.unwrap();
    assert!(!outcome.is_success());
}

#[tokio::test]
async fn alert_accepts_and_records_the_dialog() {
    let driver = MockDriver::new().with_dialog(JsDialog::new(DialogKind::Confirm, "Leave this page?"));
    let step = build(
        StepSpec::new("alert")
            .with_param("expected_text", "Leave")
            .with_param("store_text_in_context", "confirm_text"),
    );
    let mut ctx = Context::new();
    let outcome = step.step().execute(&driver, &mut ctx).await.unwrap();
    assert_eq!(outcome, StepOutcome::Success);
    assert_eq!(driver.handled_dialogs(), vec![(true, None)]);
    assert_eq!(ctx.get("confirm_text"), Some(&json!("Leave this page?")));
    assert_eq!(
        ctx.get("last_alert_handled"),
        Some(&json!({"text": "Leave this page?", "action": "accept"}))
    );
}

#[tokio::test]
async fn alert_send_keys_fills_the_prompt() {
    let driver = MockDriver::new().with_dialog(JsDialog::new(DialogKind::Prompt, "Your name?"));
    let step = build(
        StepSpec::new("dialog")
            .with_param("action", "send_keys")
            .with_param("text_to_send", "alice"),
    );
    let mut ctx = Context::new();
    let outcome = step.step().execute(&driver, &mut ctx).await.unwrap();
    assert_eq!(outcome, StepOutcome::Success);
    assert_eq!(driver.handled_dialogs(), vec![(true, Some("alice".to_string()))]);
    assert_eq!(ctx.get("last_alert_handled").unwrap()["action"], json!("send_keys"));
}

#[tokio::test]
async fn alert_dismiss_declines() {
    let driver = MockDriver::new().with_dialog(JsDialog::new(DialogKind::Confirm, "Delete?"));
    let step = build(StepSpec::new("alert").with_param("action", "dismiss"));
    let outcome = step.step().execute(&driver, &mut Context::new()).await.unwrap();
    assert_eq!(outcome, StepOutcome::Success);
    assert_eq!(driver.handled_dialogs(), vec![(false, None)]);
}

#[tokio::test]
async fn alert_get_text_leaves_dialog_open() {
    let driver = MockDriver::new().with_dialog(JsDialog::new(DialogKind::Alert, "Saved"));
    let step = build(
        StepSpec::new("alert")
            .with_param("action", "get_text")
            .with_param("context_key", "notice"),
    );
    let mut ctx = Context::new();
    let outcome = step.step().execute(&driver, &mut ctx).await.unwrap();
    assert_eq!(outcome, StepOutcome::Success);
    assert_eq!(ctx.get("notice"), Some(&json!("Saved")));
    assert!(driver.open_dialog().is_some());
    assert!(driver.handled_dialogs().is_empty());
    assert_eq!(ctx.get("last_alert_handled"), None);
}

#[tokio::test]
async fn alert_with_unexpected_text_fails_without_closing() {
    let driver = MockDriver::new().with_dialog(JsDialog::new(DialogKind::Alert, "Session expired"));
    let step = build(StepSpec::new("alert").with_param("expected_text", "Saved"));
    let outcome = step.step().execute(&driver, &mut Context::new()).await.unwrap();
    assert!(outcome.failure_reason().unwrap().contains("Session expired"));
    assert!(driver.open_dialog().is_some());
}

#[tokio::test(start_paused = true)]
async fn alert_fails_when_no_dialog_appears() {
    let driver = MockDriver::new();
    let step = build(StepSpec::new("alert").with_param("timeout_seconds", 2));
    let outcome = step.step().execute(&driver, &mut Context::new()).await.unwrap();
    assert!(outcome.failure_reason().unwrap().contains("within 2s"));

    let step = build(StepSpec::new("alert").with_param("wait_for_alert", false));
    let outcome = step.step().execute(&driver, &mut Context::new()).await.unwrap();
    assert_eq!(outcome.failure_reason(), Some("no dialog is open"));
}

#[test]
fn alert_send_keys_requires_text() {
    let err = StepRegistry::with_builtins()
        .instantiate(
            &StepSpec::new("alert").with_param("action", "send_keys"),
            &DefaultsSection::immediate(),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidParameter { .. }));

    let err = StepRegistry::with_builtins()
        .instantiate(
            &StepSpec::new("alert").with_param("button", "ok"),
            &DefaultsSection::immediate(),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidParameters { .. }));
}
