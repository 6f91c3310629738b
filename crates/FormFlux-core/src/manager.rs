//! # Form Manager
//!
//! One form session: a loaded schema, its [`FormState`], and the validation
//! engine that feeds it. Hosts call the operations here in response to user
//! interaction and render from [`FormManager::snapshot`].
//!
//! Every value change bumps the field's generation. Validation tasks remember the
//! generation they started at and drop their result when it no longer matches.

use crate::condition::VisibilityMap;
use crate::config::{EngineConfig, ValidationMode};
use crate::error::{ImportError, StateError};
use crate::schema::FormSchema;
use crate::schema_loader::{LoadedSchema, load_schema_from_str};
use crate::state::{FormState, VisibilityChange};
use crate::validation::{
    CrossFieldRule, NamedRule, RuleRegistry, ValidationContext, ValidationEngine, ValueBag,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Receives the payload of a valid submission.
#[async_trait]
pub trait SubmitHandler: Send + Sync {
    async fn submit(&self, values: &ValueBag) -> anyhow::Result<()>;
}

/// What `submit()` resolves with.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub success: bool,
    /// Values of visible, enabled fields only.
    pub values: ValueBag,
    pub errors: HashMap<String, Vec<String>>,
    pub warnings: HashMap<String, Vec<String>>,
    /// Set when the handler itself failed.
    pub failure: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

pub struct FormManagerBuilder {
    config: Option<EngineConfig>,
    handler: Option<Arc<dyn SubmitHandler>>,
    registry: Option<Arc<RuleRegistry>>,
}

impl Default for FormManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FormManagerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            handler: None,
            registry: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_submit_handler(mut self, handler: Arc<dyn SubmitHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Resolves named rules against `registry` instead of the process-wide one.
    pub fn with_registry(mut self, registry: Arc<RuleRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Imports a JSON schema and starts a session on it.
    pub fn build_from_json(self, json: &str) -> Result<FormManager, ImportError> {
        let policy = self.config.as_ref().map(|c| c.cycle_policy).unwrap_or_default();
        let loaded = load_schema_from_str(json, policy)?;
        Ok(self.build(loaded))
    }

    pub fn build(self, loaded: LoadedSchema) -> FormManager {
        let config = self.config.unwrap_or_else(EngineConfig::from_env);
        let registry = self.registry.unwrap_or_else(RuleRegistry::global);
        tracing::debug!(
            rules = ?registry.list_rules(),
            cross_rules = ?registry.list_cross_rules(),
            "Resolving named rules"
        );
        let engine = ValidationEngine::with_registry(config.max_concurrent_async, registry);
        engine.install_schema(&loaded);

        let mut state = FormState::new(&loaded.schema);
        let visibility = loaded.evaluator.recompute_visibility(&state.values);
        state.apply_visibility(&visibility);

        let session_id = Uuid::new_v4();
        tracing::info!(session = %session_id, schema_id = %loaded.schema.id, "Form session started");

        FormManager {
            inner: Arc::new(Inner {
                session_id,
                config,
                loaded: RwLock::new(loaded),
                state: tokio::sync::Mutex::new(state),
                engine,
                tasks: Mutex::new(HashMap::new()),
                handler: self.handler,
            }),
        }
    }
}

struct Inner {
    session_id: Uuid,
    config: EngineConfig,
    loaded: RwLock<LoadedSchema>,
    state: tokio::sync::Mutex<FormState>,
    engine: ValidationEngine,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    handler: Option<Arc<dyn SubmitHandler>>,
}

/// A form session. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct FormManager {
    inner: Arc<Inner>,
}

impl FormManager {
    pub fn builder() -> FormManagerBuilder {
        FormManagerBuilder::new()
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn schema(&self) -> Arc<FormSchema> {
        self.inner.loaded().schema
    }

    /// The schema's own mode if it sets one, otherwise the configured default.
    pub fn validation_mode(&self) -> ValidationMode {
        self.schema()
            .validation_mode
            .unwrap_or(self.inner.config.validation_mode)
    }

    pub fn engine(&self) -> &ValidationEngine {
        &self.inner.engine
    }

    /// Adds host rules for a field; see [`ValidationEngine::register_rule`].
    pub fn register_rule(&self, field: impl Into<String>, rules: Vec<NamedRule>) {
        self.inner.engine.register_rule(field, rules);
    }

    pub fn register_cross_field_rule(&self, rule: CrossFieldRule) {
        self.inner.engine.register_cross_field_rule(rule);
    }

    /// A copy of the current state.
    pub async fn snapshot(&self) -> FormState {
        self.inner.state.lock().await.clone()
    }

    /// Stores a new value and brings visibility and validation up to date.
    ///
    /// Visibility is recomputed before any validation is scheduled.
    #[tracing::instrument(skip(self, value), fields(session = %self.inner.session_id))]
    pub async fn set_value(&self, name: &str, value: Value) -> Result<(), StateError> {
        let loaded = self.inner.loaded();
        if loaded.schema.field_by_name(name).is_none() {
            return Err(StateError::UnknownField(name.to_string()));
        }
        let mode = self.validation_mode();

        let mut state = self.inner.state.lock().await;

        // 1. Value, optimistic clear, new generation
        let generation = state.record_edit(name, value);

        // 2. Visibility
        let change = self.inner.refresh_visibility(&loaded, &mut state, Some(name));
        self.inner.invalidate(&mut state, &change.deactivated);

        // 3. Validation, scheduled under the state lock so tasks replace each other in order
        if mode == ValidationMode::OnChange && state.is_active(name) {
            self.inner.schedule(name, generation, self.inner.config.debounce());
        }
        for field in &change.activated {
            if field != name && (state.is_touched(field) || state.submitted) {
                self.inner.schedule(field, state.generation(field), Duration::ZERO);
            }
        }
        Ok(())
    }

    /// Marks a field touched. In `OnBlur` mode this validates it.
    #[tracing::instrument(skip(self), fields(session = %self.inner.session_id))]
    pub async fn set_touched(&self, name: &str) -> Result<(), StateError> {
        let loaded = self.inner.loaded();
        if loaded.schema.field_by_name(name).is_none() {
            return Err(StateError::UnknownField(name.to_string()));
        }

        let mut state = self.inner.state.lock().await;
        state.touched.insert(name.to_string(), true);
        if self.validation_mode() == ValidationMode::OnBlur && state.is_active(name) {
            self.inner.schedule(name, state.generation(name), Duration::ZERO);
        }
        Ok(())
    }

    /// Back to defaults. Anything still in flight becomes stale.
    #[tracing::instrument(skip(self), fields(session = %self.inner.session_id))]
    pub async fn reset(&self) {
        self.inner.abort_all();
        let loaded = self.inner.loaded();

        let mut state = self.inner.state.lock().await;
        let previous = std::mem::take(&mut state.generations);
        *state = FormState::new(&loaded.schema);
        for (name, generation) in previous {
            if state.contains(&name) {
                state.generations.insert(name, generation + 1);
            }
        }
        self.inner.refresh_visibility(&loaded, &mut state, None);
        tracing::info!("Form reset");
    }

    /// Cancels pending validation, validates the whole form, and calls the submit
    /// handler when it is valid.
    ///
    /// The state lock is released while validators run, so edits made in the
    /// meantime go through; their fields keep the newer messages.
    #[tracing::instrument(skip(self), fields(session = %self.inner.session_id))]
    pub async fn submit(&self) -> SubmissionResult {
        self.inner.abort_all();
        let loaded = self.inner.loaded();

        // 1. Snapshot under the lock
        let (values, visibility, started) = {
            let mut state = self.inner.state.lock().await;
            state.submitted = true;
            let names: Vec<String> = state.generations.keys().cloned().collect();
            for name in &names {
                state.bump_generation(name);
            }
            (
                Arc::new(state.values.clone()),
                state.visibility(),
                state.generations.clone(),
            )
        };

        // 2. Validate without holding it
        let validation = self
            .inner
            .engine
            .validate_form(&loaded.schema, &visibility, values.clone())
            .await;

        // 3. Apply to fields nobody edited meanwhile
        let payload = {
            let mut state = self.inner.state.lock().await;
            state.apply_form_validation(&validation, &started);
            FormState::active_subset(&values, &visibility)
        };

        let mut result = SubmissionResult {
            success: validation.is_valid,
            values: payload,
            errors: validation.errors,
            warnings: validation.warnings,
            failure: None,
            submitted_at: Utc::now(),
        };

        if !result.success {
            tracing::info!(errors = result.errors.len(), "Submission blocked by validation");
            return result;
        }

        if let Some(handler) = &self.inner.handler
            && let Err(e) = handler.submit(&result.values).await
        {
            tracing::error!(error = %e, "Submit handler failed");
            result.success = false;
            result.failure = Some(e.to_string());
        }
        result
    }

    /// Swaps in a new schema mid-session. On failure nothing changes.
    ///
    /// Values of fields that survive are kept; removed fields are pruned and new
    /// fields start at their defaults.
    #[tracing::instrument(skip(self, json), fields(session = %self.inner.session_id))]
    pub async fn replace_schema(&self, json: &str) -> Result<(), ImportError> {
        let loaded = load_schema_from_str(json, self.inner.config.cycle_policy)?;
        self.inner.engine.install_schema(&loaded);

        self.inner.abort_all();
        let mut state = self.inner.state.lock().await;
        state.prune(&loaded.schema);
        state.add_missing(&loaded.schema);
        let names: Vec<String> = state.generations.keys().cloned().collect();
        for name in &names {
            state.bump_generation(name);
            state.validating.insert(name.clone(), false);
        }
        self.inner.refresh_visibility(&loaded, &mut state, None);

        let keep = loaded.schema.field_names();
        self.inner.engine.retain_fields(|name| keep.iter().any(|k| k == name));
        *self.inner.loaded.write().unwrap_or_else(|e| e.into_inner()) = loaded;
        tracing::info!("Schema replaced");
        Ok(())
    }

    /// Waits until no validation task is in flight.
    pub async fn settle(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = {
                let mut tasks = self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
                tasks.drain().map(|(_, h)| h).collect()
            };
            if handles.is_empty() {
                return;
            }
            join_all(handles).await;
        }
    }
}

impl Inner {
    fn loaded(&self) -> LoadedSchema {
        self.loaded.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Full recompute for small forms and resets; targeted recompute otherwise.
    fn refresh_visibility(
        &self,
        loaded: &LoadedSchema,
        state: &mut FormState,
        changed: Option<&str>,
    ) -> VisibilityChange {
        let map: VisibilityMap = match changed {
            Some(field) if loaded.schema.field_count() > self.config.virtualization_threshold => {
                let mut map = state.visibility();
                loaded.evaluator.recompute_from(field, &state.values, &mut map);
                map
            }
            _ => loaded.evaluator.recompute_visibility(&state.values),
        };
        state.apply_visibility(&map)
    }

    /// Makes in-flight work on `fields` stale and stops it.
    fn invalidate(&self, state: &mut FormState, fields: &[String]) {
        if fields.is_empty() {
            return;
        }
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for field in fields {
            state.bump_generation(field);
            if let Some(handle) = tasks.remove(field) {
                handle.abort();
            }
        }
    }

    fn abort_all(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }

    /// Starts a validation task for `field`, replacing any older one.
    fn schedule(self: &Arc<Self>, field: &str, generation: u64, delay: Duration) {
        let inner = Arc::clone(self);
        let name = field.to_string();
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            inner.run_validation(&name, generation).await;
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = tasks.insert(field.to_string(), handle) {
            previous.abort();
        }
    }

    /// Validates `field` and any touched owner of a cross-field rule that reads it.
    async fn run_validation(&self, field: &str, generation: u64) {
        // 1. Snapshot under the lock
        let (values, visibility, targets) = {
            let mut state = self.state.lock().await;
            if state.generation(field) != generation || !state.is_active(field) {
                return;
            }

            let mut targets = vec![(field.to_string(), generation)];
            for owner in self.engine.cross_field_owners(field) {
                let revisit = state.is_touched(&owner) || state.is_dirty(&owner) || state.submitted;
                if revisit && state.is_active(&owner) {
                    targets.push((owner.clone(), state.generation(&owner)));
                }
            }
            state.validating.insert(field.to_string(), true);
            (Arc::new(state.values.clone()), state.visibility(), targets)
        };

        // 2. Validate without holding the lock
        let contexts: Vec<ValidationContext> = targets
            .iter()
            .map(|(name, _)| ValidationContext::new(name.as_str(), values.clone()))
            .collect();
        let results = join_all(contexts.iter().map(|ctx| self.engine.validate_owned(ctx, &visibility))).await;

        // 3. Apply whatever is still current
        let mut state = self.state.lock().await;
        for ((name, started_at), result) in targets.iter().zip(results) {
            if state.generation(name) != *started_at || !state.is_active(name) {
                tracing::debug!(field = %name, "Discarding stale validation result");
                continue;
            }
            state.apply_field_result(name, &result);
        }
    }
}
