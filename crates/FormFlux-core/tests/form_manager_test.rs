use async_trait::async_trait;
use formflux_core::config::{CyclePolicy, EngineConfig, ValidationMode};
use formflux_core::error::{ImportError, StateError};
use formflux_core::manager::{FormManager, SubmitHandler};
use formflux_core::schema_loader::load_schema_from_str;
use formflux_core::state::FieldStatus;
use formflux_core::validation::{
    AsyncValidator, CrossFieldRule, NamedRule, RuleOutcome, RuleRegistry, ValidationContext, ValueBag,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const SHIPPING: &str = r#"{
  "id": "shipping",
  "title": "Shipping",
  "sections": [{
    "id": "address",
    "title": "Address",
    "fields": [
      { "id": "f1", "type": "select", "name": "country", "label": "Country", "required": true,
        "options": [{ "label": "United States", "value": "US" }, { "label": "Canada", "value": "CA" }] },
      { "id": "f2", "type": "text", "name": "state", "label": "State", "required": true,
        "dependency": { "field": "country", "operator": "equals", "value": "US" } },
      { "id": "f3", "type": "text", "name": "notes", "label": "Notes", "defaultValue": "none" }
    ]
  }]
}"#;

const SIGNUP: &str = r#"{
  "id": "signup",
  "title": "Sign up",
  "sections": [{
    "id": "account",
    "title": "Account",
    "fields": [
      { "id": "f1", "type": "text", "name": "username", "label": "Username" },
      { "id": "f2", "type": "password", "name": "password", "label": "Password",
        "rules": [{ "type": "minLength", "value": 8 }] },
      { "id": "f3", "type": "password", "name": "confirmPassword", "label": "Confirm password" }
    ]
  }],
  "crossFieldRules": [
    { "rule": "fields_match", "fields": ["confirmPassword", "password"], "message": "Passwords must match" }
  ]
}"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn config(mode: ValidationMode, debounce_ms: u64) -> EngineConfig {
    EngineConfig {
        validation_mode: mode,
        debounce_ms,
        ..EngineConfig::default()
    }
}

fn manager(json: &str, config: EngineConfig) -> FormManager {
    FormManager::builder()
        .with_config(config)
        .with_registry(Arc::new(RuleRegistry::with_builtins()))
        .build_from_json(json)
        .expect("schema loads")
}

#[derive(Default)]
struct Recorder {
    payloads: Mutex<Vec<ValueBag>>,
}

#[async_trait]
impl SubmitHandler for Recorder {
    async fn submit(&self, values: &ValueBag) -> anyhow::Result<()> {
        self.payloads.lock().unwrap().push(values.clone());
        Ok(())
    }
}

struct Refuses;

#[async_trait]
impl SubmitHandler for Refuses {
    async fn submit(&self, _values: &ValueBag) -> anyhow::Result<()> {
        anyhow::bail!("backend unavailable")
    }
}

#[tokio::test]
async fn test_hidden_required_field_does_not_block_submit() {
    let recorder = Arc::new(Recorder::default());
    let form = FormManager::builder()
        .with_config(config(ValidationMode::OnChange, 0))
        .with_submit_handler(recorder.clone())
        .build_from_json(SHIPPING)
        .unwrap();

    form.set_value("country", json!("CA")).await.unwrap();
    let state = form.snapshot().await;
    assert!(!state.is_visible("state"));

    let result = form.submit().await;
    assert!(result.success, "unexpected errors: {:?}", result.errors);
    assert!(!result.values.contains_key("state"));
    assert_eq!(result.values["notes"], json!("none"));

    let payloads = recorder.payloads.lock().unwrap();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["country"], json!("CA"));
}

#[tokio::test]
async fn test_visible_required_field_blocks_submit() {
    let recorder = Arc::new(Recorder::default());
    let form = FormManager::builder()
        .with_config(config(ValidationMode::OnChange, 0))
        .with_submit_handler(recorder.clone())
        .build_from_json(SHIPPING)
        .unwrap();

    form.set_value("country", json!("US")).await.unwrap();
    let result = form.submit().await;
    assert!(!result.success);
    assert_eq!(result.errors["state"], vec!["This field is required".to_string()]);
    assert!(recorder.payloads.lock().unwrap().is_empty());

    let state = form.snapshot().await;
    assert_eq!(state.status("state"), FieldStatus::Invalid);
}

#[tokio::test]
async fn test_hiding_a_field_clears_its_errors() {
    let form = manager(SHIPPING, config(ValidationMode::OnChange, 0));
    form.set_value("country", json!("US")).await.unwrap();
    form.submit().await;
    assert!(form.snapshot().await.errors.contains_key("state"));

    form.set_value("country", json!("CA")).await.unwrap();
    form.settle().await;
    let state = form.snapshot().await;
    assert!(!state.errors.contains_key("state"));
    assert!(state.is_valid());
}

#[tokio::test]
async fn test_newly_shown_touched_field_is_revalidated() {
    let form = manager(SHIPPING, config(ValidationMode::OnChange, 0));
    form.set_touched("state").await.unwrap();
    form.set_value("country", json!("US")).await.unwrap();
    form.settle().await;

    let state = form.snapshot().await;
    assert_eq!(state.first_error("state"), Some("This field is required"));
}

#[tokio::test]
async fn test_password_rules_and_cross_field_match() {
    init_tracing();
    let form = manager(SIGNUP, config(ValidationMode::OnChange, 0));

    form.set_value("password", json!("abc")).await.unwrap();
    form.set_value("confirmPassword", json!("abc")).await.unwrap();
    form.settle().await;
    let state = form.snapshot().await;
    assert_eq!(
        state.errors.get("password"),
        Some(&vec!["Must be at least 8 characters".to_string()])
    );
    assert!(!state.errors.contains_key("confirmPassword"));

    form.set_value("confirmPassword", json!("abd")).await.unwrap();
    form.settle().await;
    let state = form.snapshot().await;
    assert_eq!(state.first_error("confirmPassword"), Some("Passwords must match"));

    // Editing the other side of the rule revisits the owner
    form.set_value("password", json!("abd")).await.unwrap();
    form.settle().await;
    let state = form.snapshot().await;
    assert!(!state.errors.contains_key("confirmPassword"));
    assert!(state.errors.contains_key("password"));
}

/// Async rule whose latency depends on the value it checks.
struct SlowForSome;

#[async_trait]
impl AsyncValidator for SlowForSome {
    async fn validate(&self, value: &Value, _ctx: &ValidationContext) -> anyhow::Result<RuleOutcome> {
        if value == "slow" {
            tokio::time::sleep(Duration::from_millis(150)).await;
            return Ok(RuleOutcome::error("taken", "Stale verdict"));
        }
        Ok(RuleOutcome::valid())
    }
}

#[tokio::test]
async fn test_stale_async_result_is_discarded() {
    init_tracing();
    let form = manager(SIGNUP, config(ValidationMode::OnChange, 0));
    form.register_rule("username", vec![NamedRule::asynchronous("unique", SlowForSome)]);

    form.set_value("username", json!("slow")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(form.snapshot().await.is_validating("username"));

    form.set_value("username", json!("fast")).await.unwrap();
    form.settle().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let state = form.snapshot().await;
    assert!(!state.errors.contains_key("username"));
    assert!(!state.is_validating("username"));
    assert_eq!(state.status("username"), FieldStatus::Valid);
}

#[tokio::test]
async fn test_on_change_validation_is_debounced() {
    let form = manager(SIGNUP, config(ValidationMode::OnChange, 40));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    form.register_rule(
        "username",
        vec![NamedRule::from_fn("count", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(RuleOutcome::valid())
        })],
    );

    for text in ["a", "ad", "ada"] {
        form.set_value("username", json!(text)).await.unwrap();
    }
    form.settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_on_blur_mode_waits_for_touch() {
    let form = manager(SIGNUP, config(ValidationMode::OnBlur, 0));
    form.set_value("password", json!("abc")).await.unwrap();
    form.settle().await;
    assert!(form.snapshot().await.errors.is_empty());

    form.set_touched("password").await.unwrap();
    form.settle().await;
    let state = form.snapshot().await;
    assert_eq!(state.first_error("password"), Some("Must be at least 8 characters"));
    assert!(state.is_touched("password"));
}

#[tokio::test]
async fn test_on_submit_mode_validates_only_on_submit() {
    let form = manager(SIGNUP, config(ValidationMode::OnSubmit, 0));
    form.set_value("password", json!("abc")).await.unwrap();
    form.set_touched("password").await.unwrap();
    form.settle().await;
    assert!(form.snapshot().await.errors.is_empty());

    let result = form.submit().await;
    assert!(!result.success);
    assert!(result.errors.contains_key("password"));
}

#[tokio::test]
async fn test_schema_mode_overrides_config() {
    let json = SIGNUP.replacen(r#""title": "Sign up","#, r#""title": "Sign up", "validationMode": "onSubmit","#, 1);
    let form = manager(&json, config(ValidationMode::OnChange, 0));
    assert_eq!(form.validation_mode(), ValidationMode::OnSubmit);
}

#[tokio::test]
async fn test_unknown_field_is_rejected_without_change() {
    let form = manager(SIGNUP, config(ValidationMode::OnChange, 0));
    let before = form.snapshot().await;

    let err = form.set_value("nickname", json!("x")).await.unwrap_err();
    assert_eq!(err, StateError::UnknownField("nickname".to_string()));
    assert!(form.set_touched("nickname").await.is_err());

    let after = form.snapshot().await;
    assert_eq!(before.values, after.values);
    assert_eq!(before.touched, after.touched);
}

#[tokio::test]
async fn test_handler_failure_is_reported() {
    let form = FormManager::builder()
        .with_config(config(ValidationMode::OnChange, 0))
        .with_submit_handler(Arc::new(Refuses))
        .build_from_json(SHIPPING)
        .unwrap();
    form.set_value("country", json!("CA")).await.unwrap();

    let result = form.submit().await;
    assert!(!result.success);
    assert!(result.errors.is_empty());
    assert_eq!(result.failure.as_deref(), Some("backend unavailable"));
}

#[tokio::test]
async fn test_reset_restores_defaults() {
    let form = manager(SHIPPING, config(ValidationMode::OnChange, 0));
    form.set_value("notes", json!("leave at door")).await.unwrap();
    form.set_value("country", json!("US")).await.unwrap();
    form.set_touched("country").await.unwrap();
    form.submit().await;

    form.reset().await;
    let state = form.snapshot().await;
    assert_eq!(state.values["notes"], json!("none"));
    assert_eq!(state.values["country"], Value::Null);
    assert!(state.errors.is_empty());
    assert!(!state.is_touched("country"));
    assert!(!state.is_visible("state"));
}

#[tokio::test]
async fn test_failed_import_leaves_session_untouched() {
    let form = manager(SHIPPING, config(ValidationMode::OnChange, 0));
    form.set_value("country", json!("US")).await.unwrap();
    let before = form.snapshot().await;

    let err = form.replace_schema("{ \"id\": ").await.unwrap_err();
    assert!(matches!(err, ImportError::Malformed(_)));
    let err = form
        .replace_schema(&SHIPPING.replace(r#""type": "text""#, r#""type": "color""#))
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::Schema(_)));

    let after = form.snapshot().await;
    assert_eq!(before.values, after.values);
    assert_eq!(form.schema().id, "shipping");
}

#[tokio::test]
async fn test_replace_schema_prunes_and_adds_fields() {
    let form = manager(SHIPPING, config(ValidationMode::OnChange, 0));
    form.set_value("country", json!("CA")).await.unwrap();

    let next = r#"{
      "id": "shipping_v2", "title": "Shipping",
      "sections": [{ "id": "address", "title": "Address", "fields": [
        { "id": "f1", "type": "text", "name": "country", "label": "Country" },
        { "id": "f4", "type": "text", "name": "postcode", "label": "Postcode", "defaultValue": "" }
      ]}]
    }"#;
    form.replace_schema(next).await.unwrap();

    let state = form.snapshot().await;
    assert_eq!(state.values["country"], json!("CA"));
    assert_eq!(state.values["postcode"], json!(""));
    assert!(!state.contains("state"));
    assert!(!state.visible.contains_key("notes"));
    assert_eq!(form.schema().id, "shipping_v2");
}

#[tokio::test]
async fn test_replace_schema_drops_cross_rules_of_removed_fields() {
    let json = r#"{
      "id": "pair", "title": "Pair",
      "sections": [{ "id": "main", "title": "Main", "fields": [
        { "id": "f1", "type": "text", "name": "a", "label": "A" },
        { "id": "f2", "type": "text", "name": "b", "label": "B" }
      ]}]
    }"#;
    let form = manager(json, config(ValidationMode::OnSubmit, 0));
    form.register_cross_field_rule(CrossFieldRule::from_fn(
        "b_set",
        vec!["a".to_string(), "b".to_string()],
        |values: &ValueBag, _fields: &[String]| {
            Ok(match values.get("b") {
                Some(Value::Null) | None => RuleOutcome::error("b_set", "b must be set"),
                Some(_) => RuleOutcome::valid(),
            })
        },
    ));
    assert!(!form.submit().await.success);

    let next = r#"{
      "id": "single", "title": "Single",
      "sections": [{ "id": "main", "title": "Main", "fields": [
        { "id": "f1", "type": "text", "name": "a", "label": "A" }
      ]}]
    }"#;
    form.replace_schema(next).await.unwrap();
    assert!(form.engine().cross_field_rules().is_empty());

    let result = form.submit().await;
    assert!(result.success, "unexpected errors: {:?}", result.errors);
    assert!(result.errors.is_empty());
}

/// Async rule that takes a while on every value.
struct Sluggish;

#[async_trait]
impl AsyncValidator for Sluggish {
    async fn validate(&self, _value: &Value, _ctx: &ValidationContext) -> anyhow::Result<RuleOutcome> {
        tokio::time::sleep(Duration::from_millis(400)).await;
        Ok(RuleOutcome::valid())
    }
}

#[tokio::test]
async fn test_edits_proceed_while_submit_validates() {
    let form = manager(SIGNUP, config(ValidationMode::OnSubmit, 0));
    form.register_rule("username", vec![NamedRule::asynchronous("slow_lookup", Sluggish)]);
    form.set_value("username", json!("ada")).await.unwrap();

    // 1. Submit in the background
    let submitting = {
        let form = form.clone();
        tokio::spawn(async move { form.submit().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // 2. Edit an unrelated field while the async rule runs
    let started = Instant::now();
    form.set_value("password", json!("longenough1")).await.unwrap();
    let _ = form.snapshot().await;
    assert!(
        started.elapsed() < Duration::from_millis(200),
        "edit waited {:?} for submit",
        started.elapsed()
    );

    // 3. Submit still completes on its snapshot
    let result = submitting.await.unwrap();
    assert!(result.success, "unexpected errors: {:?}", result.errors);
    assert_eq!(result.values["username"], json!("ada"));
    assert_eq!(form.snapshot().await.values["password"], json!("longenough1"));
}

fn large_conditional_schema(count: usize) -> String {
    let mut fields = vec![json!({ "id": "plan", "type": "text", "name": "plan", "label": "Plan" })];
    for i in 0..count {
        let dependency = match i % 3 {
            0 => json!({ "field": "plan", "operator": "equals", "value": "pro" }),
            1 => json!({ "field": format!("q{}", i - 1), "operator": "not_equals", "value": "skip" }),
            _ => json!({ "field": "plan", "operator": "not_equals", "value": "pro", "effect": "enable" }),
        };
        fields.push(json!({
            "id": format!("f{i}"),
            "type": "text",
            "name": format!("q{i}"),
            "label": format!("Question {i}"),
            "dependency": dependency
        }));
    }
    json!({
        "id": "large",
        "title": "Large",
        "sections": [{ "id": "main", "title": "Main", "fields": fields }]
    })
    .to_string()
}

#[tokio::test]
async fn test_large_form_targeted_recompute_matches_full() {
    let json = large_conditional_schema(150);
    let form = manager(&json, config(ValidationMode::OnChange, 0));
    assert!(form.schema().field_count() > form.config().virtualization_threshold);
    let reference = load_schema_from_str(&json, CyclePolicy::Reject).unwrap();

    let edits = [
        ("plan", json!("pro")),
        ("q0", json!("skip")),
        ("q3", json!("keep")),
        ("plan", json!("free")),
        ("plan", json!("pro")),
    ];
    for (name, value) in edits {
        form.set_value(name, value).await.unwrap();
        let state = form.snapshot().await;
        let full = reference.evaluator.recompute_visibility(&state.values);
        assert_eq!(state.visible, full.visible, "visible flags diverged after editing {name}");
        assert_eq!(state.disabled, full.disabled, "disabled flags diverged after editing {name}");
    }
    form.settle().await;

    let state = form.snapshot().await;
    assert!(state.is_visible("q0"));
    assert!(!state.is_visible("q1"), "hidden by q0 = skip");
    assert!(state.is_visible("q4"));
    assert!(state.is_disabled("q2"));
}
