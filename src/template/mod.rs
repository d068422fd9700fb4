//! Named, reusable fingerprint templates.
//!
//! A template wraps a private, identity-stripped copy of a profile. Applying
//! it produces an independent profile for an account; later edits to or
//! deletion of the template never reach profiles already produced from it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ki_fingerprint::profile::FingerprintProfile;
//! use ki_fingerprint::template::{CreateTemplate, FileStore, TemplateManager};
//!
//! # async fn demo() -> Result<(), ki_fingerprint::template::TemplateError> {
//! let manager = TemplateManager::new(Arc::new(FileStore::new("templates")));
//! manager.load().await?;
//!
//! let template = manager
//!     .create_template(CreateTemplate::new("Office laptop", FingerprintProfile::default()))
//!     .await?;
//! let profile = manager.apply_template(&template.id, "account-42")?;
//! assert_eq!(profile.account_id.as_deref(), Some("account-42"));
//! # Ok(())
//! # }
//! ```

mod store;

pub use store::{FileStore, MemoryStore, StoreError, TemplateStore};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::profile::{ConsistencyValidator, FingerprintProfile, ValidationReport};
use crate::seed::{generate_secure_seed, NoiseSeed, SeedError, SeedManager};

/// Current template document version.
pub const TEMPLATE_VERSION: u32 = 1;

/// Version stamped on exported documents.
pub const EXPORT_VERSION: u32 = 1;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 500;

const EXPORT_METADATA: [&str; 2] = ["exportedAt", "exportVersion"];

/// Errors raised by the template manager.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Invalid template name: {0}")]
    InvalidName(String),

    #[error("Invalid template description: {0}")]
    InvalidDescription(String),

    /// The embedded profile failed validation.
    #[error("Invalid template configuration: {}", .0.messages().join("; "))]
    InvalidConfig(ValidationReport),

    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Template already exists: {0}")]
    Duplicate(String),

    /// The document could not be parsed or serialized.
    #[error("Failed to parse template: {0}")]
    Parse(String),

    #[error(transparent)]
    Persistence(#[from] StoreError),

    /// A fresh seed could not be sealed for the account.
    #[error(transparent)]
    Seed(#[from] SeedError),
}

impl From<serde_json::Error> for TemplateError {
    fn from(e: serde_json::Error) -> Self {
        TemplateError::Parse(e.to_string())
    }
}

/// A named profile that can be instantiated for any number of accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintTemplate {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u32,
    pub config: FingerprintProfile,
}

/// Input for [`TemplateManager::create_template`].
#[derive(Debug, Clone)]
pub struct CreateTemplate {
    pub name: String,
    pub description: Option<String>,
    pub config: FingerprintProfile,
    pub tags: Vec<String>,
}

impl CreateTemplate {
    pub fn new(name: impl Into<String>, config: FingerprintProfile) -> Self {
        Self {
            name: name.into(),
            description: None,
            config,
            tags: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Partial update for [`TemplateManager::update_template`].
///
/// `description: Some(None)` clears the description.
#[derive(Debug, Clone, Default)]
pub struct TemplateUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub config: Option<FingerprintProfile>,
}

/// Options for [`TemplateManager::export_template`].
#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    pub include_noise_seed: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_noise_seed: true,
        }
    }
}

/// Options for [`TemplateManager::import_template`].
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub generate_new_id: bool,
    pub new_name: Option<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            generate_new_id: true,
            new_name: None,
        }
    }
}

/// CRUD over templates backed by a [`TemplateStore`].
///
/// The in-memory map is the source of truth for reads; writes go to the
/// store first and only touch the map once persisted.
pub struct TemplateManager {
    store: Arc<dyn TemplateStore>,
    templates: RwLock<HashMap<String, FingerprintTemplate>>,
    seeds: Option<Arc<SeedManager>>,
    validator: ConsistencyValidator,
}

impl TemplateManager {
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self {
            store,
            templates: RwLock::new(HashMap::new()),
            seeds: None,
            validator: ConsistencyValidator::new(),
        }
    }

    /// Seeds of applied templates are encrypted for the target account.
    pub fn with_seed_manager(mut self, seeds: Arc<SeedManager>) -> Self {
        self.seeds = Some(seeds);
        self
    }

    pub fn with_validator(mut self, validator: ConsistencyValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Reads every stored template, skipping unreadable or invalid ones.
    ///
    /// Returns the number of templates loaded.
    pub async fn load(&self) -> Result<usize, TemplateError> {
        let ids = self.store.list_ids().await?;
        let documents = join_all(ids.iter().map(|id| self.store.read(id))).await;
        let mut loaded = Vec::with_capacity(ids.len());

        for (id, document) in ids.into_iter().zip(documents) {
            let document = match document {
                Ok(document) => document,
                Err(e) => {
                    warn!(template = %id, error = %e, "Skipping unreadable template");
                    continue;
                }
            };
            match serde_json::from_str::<FingerprintTemplate>(&document) {
                Ok(template) if template.id == id => loaded.push(template),
                Ok(template) => {
                    warn!(template = %id, stored_id = %template.id, "Skipping template with mismatched id");
                }
                Err(e) => {
                    warn!(template = %id, error = %e, "Skipping corrupt template");
                }
            }
        }

        let count = loaded.len();
        let mut templates = self.templates.write();
        for template in loaded {
            templates.insert(template.id.clone(), template);
        }
        info!(count, "Loaded fingerprint templates");
        Ok(count)
    }

    /// Creates and persists a template from a profile.
    pub async fn create_template(
        &self,
        input: CreateTemplate,
    ) -> Result<FingerprintTemplate, TemplateError> {
        let name = validate_name(&input.name)?;
        validate_description(input.description.as_deref())?;

        let config = strip_identity(&input.config);
        self.check_config(&config)?;

        let now = Utc::now();
        let template = FingerprintTemplate {
            id: Uuid::new_v4().to_string(),
            name,
            description: input.description,
            tags: input.tags,
            created_at: now,
            updated_at: now,
            version: TEMPLATE_VERSION,
            config,
        };

        self.persist(&template).await?;
        self.templates
            .write()
            .insert(template.id.clone(), template.clone());
        info!(template = %template.id, name = %template.name, "Created fingerprint template");
        Ok(template)
    }

    pub fn get_template(&self, id: &str) -> Option<FingerprintTemplate> {
        self.templates.read().get(id).cloned()
    }

    /// Every template, sorted by name.
    pub fn list_templates(&self) -> Vec<FingerprintTemplate> {
        let mut templates: Vec<_> = self.templates.read().values().cloned().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        templates
    }

    pub fn len(&self) -> usize {
        self.templates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.read().is_empty()
    }

    /// Applies a partial update, re-validating a replaced config.
    pub async fn update_template(
        &self,
        id: &str,
        update: TemplateUpdate,
    ) -> Result<FingerprintTemplate, TemplateError> {
        let mut template = self
            .get_template(id)
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))?;

        if let Some(name) = update.name {
            template.name = validate_name(&name)?;
        }
        if let Some(description) = update.description {
            validate_description(description.as_deref())?;
            template.description = description;
        }
        if let Some(tags) = update.tags {
            template.tags = tags;
        }
        if let Some(config) = update.config {
            let config = strip_identity(&config);
            self.check_config(&config)?;
            template.config = config;
        }
        template.updated_at = Utc::now();

        self.persist(&template).await?;
        self.templates
            .write()
            .insert(template.id.clone(), template.clone());
        debug!(template = %id, "Updated fingerprint template");
        Ok(template)
    }

    /// Deletes a template. Profiles already produced from it are unaffected.
    pub async fn delete_template(&self, id: &str) -> Result<(), TemplateError> {
        if !self.templates.read().contains_key(id) {
            return Err(TemplateError::NotFound(id.to_string()));
        }
        self.store.remove(id).await?;
        self.templates.write().remove(id);
        info!(template = %id, "Deleted fingerprint template");
        Ok(())
    }

    /// Produces an independent profile for `account_id` from a template.
    pub fn apply_template(
        &self,
        id: &str,
        account_id: &str,
    ) -> Result<FingerprintProfile, TemplateError> {
        let mut profile = self
            .templates
            .read()
            .get(id)
            .map(|t| t.config.clone())
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))?;

        profile.reidentify(Some(account_id.to_string()));
        let seed = generate_secure_seed();
        profile.noise_seed = Some(match &self.seeds {
            Some(seeds) => seeds.seal(seed, account_id)?,
            None => NoiseSeed::plain(seed),
        });
        profile.seed_rotated_at = None;

        debug!(template = %id, account = %account_id, profile = %profile.id, "Applied fingerprint template");
        Ok(profile)
    }

    /// Serializes a template with export metadata.
    pub fn export_template(&self, id: &str, options: ExportOptions) -> Result<Value, TemplateError> {
        let template = self
            .get_template(id)
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))?;

        let mut value = serde_json::to_value(&template)?;
        if !options.include_noise_seed {
            if let Some(config) = value.get_mut("config").and_then(Value::as_object_mut) {
                config.remove("noiseSeed");
            }
        }
        if let Some(object) = value.as_object_mut() {
            object.insert("exportedAt".to_string(), Value::String(Utc::now().to_rfc3339()));
            object.insert("exportVersion".to_string(), Value::from(EXPORT_VERSION));
        }
        Ok(value)
    }

    /// Imports an exported template document.
    ///
    /// Invalid documents are rejected; nothing is coerced into shape.
    pub async fn import_template(
        &self,
        json: &str,
        options: ImportOptions,
    ) -> Result<FingerprintTemplate, TemplateError> {
        let mut value: Value = serde_json::from_str(json)?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| TemplateError::Parse("template document must be a JSON object".to_string()))?;
        for key in EXPORT_METADATA {
            object.remove(key);
        }

        let mut template: FingerprintTemplate = serde_json::from_value(value)?;

        if options.generate_new_id {
            let now = Utc::now();
            template.id = Uuid::new_v4().to_string();
            template.created_at = now;
            template.updated_at = now;
        } else if self.templates.read().contains_key(&template.id) {
            return Err(TemplateError::Duplicate(template.id));
        }
        if let Some(name) = options.new_name {
            template.name = name;
        }

        template.name = validate_name(&template.name)?;
        validate_description(template.description.as_deref())?;
        template.config = strip_identity(&template.config);
        self.check_config(&template.config)?;

        self.persist(&template).await?;
        self.templates
            .write()
            .insert(template.id.clone(), template.clone());
        info!(template = %template.id, name = %template.name, "Imported fingerprint template");
        Ok(template)
    }

    fn check_config(&self, config: &FingerprintProfile) -> Result<(), TemplateError> {
        let report = self.validator.validate(config);
        if report.valid {
            Ok(())
        } else {
            Err(TemplateError::InvalidConfig(report))
        }
    }

    async fn persist(&self, template: &FingerprintTemplate) -> Result<(), TemplateError> {
        let document = serde_json::to_string_pretty(template)?;
        self.store.write(&template.id, &document).await?;
        Ok(())
    }
}

/// Removes the account binding. An encrypted seed is bound to that account
/// and cannot be opened afterwards, so it is dropped; a plain seed is kept.
fn strip_identity(profile: &FingerprintProfile) -> FingerprintProfile {
    let mut config = profile.clone();
    config.account_id = None;
    config.seed_rotated_at = None;
    if config.noise_seed.as_ref().is_some_and(|s| s.encrypted) {
        config.noise_seed = None;
    }
    config
}

fn validate_name(name: &str) -> Result<String, TemplateError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TemplateError::InvalidName("name cannot be empty".to_string()));
    }
    let len = trimmed.chars().count();
    if len > MAX_NAME_LEN {
        return Err(TemplateError::InvalidName(format!(
            "name is {} characters, maximum is {}",
            len, MAX_NAME_LEN
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_description(description: Option<&str>) -> Result<(), TemplateError> {
    if let Some(description) = description {
        let len = description.chars().count();
        if len > MAX_DESCRIPTION_LEN {
            return Err(TemplateError::InvalidDescription(format!(
                "description is {} characters, maximum is {}",
                len, MAX_DESCRIPTION_LEN
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TemplateManager {
        TemplateManager::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_create_strips_account() {
        let manager = manager();
        let mut profile = FingerprintProfile::default();
        profile.account_id = Some("acct".to_string());
        profile.noise_seed = Some(NoiseSeed::plain(5));

        let template = manager
            .create_template(CreateTemplate::new("  Work  ", profile).with_tags(["office"]))
            .await
            .unwrap();
        assert_eq!(template.name, "Work");
        assert_eq!(template.config.account_id, None);
        assert_eq!(template.config.plain_seed(), Some(5));
        assert_eq!(template.tags, vec!["office".to_string()]);
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_name_and_description_limits() {
        let manager = manager();
        let profile = FingerprintProfile::default();

        let err = manager
            .create_template(CreateTemplate::new("   ", profile.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::InvalidName(_)));

        let err = manager
            .create_template(CreateTemplate::new("x".repeat(101), profile.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::InvalidName(_)));

        let err = manager
            .create_template(CreateTemplate::new("ok", profile.clone()).with_description("d".repeat(501)))
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::InvalidDescription(_)));

        manager
            .create_template(CreateTemplate::new("x".repeat(100), profile).with_description("d".repeat(500)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let manager = manager();
        let mut profile = FingerprintProfile::default();
        profile.os.platform = "MacIntel".to_string();
        let err = manager
            .create_template(CreateTemplate::new("bad", profile))
            .await
            .unwrap_err();
        match err {
            TemplateError::InvalidConfig(report) => assert!(report.error_for("os.platform").is_some()),
            other => panic!("unexpected error: {other}"),
        }
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_apply_is_independent_of_template() {
        let manager = manager();
        let template = manager
            .create_template(CreateTemplate::new("t", FingerprintProfile::default()))
            .await
            .unwrap();

        let a = manager.apply_template(&template.id, "acct-a").unwrap();
        let b = manager.apply_template(&template.id, "acct-b").unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.id, template.config.id);
        assert_eq!(a.account_id.as_deref(), Some("acct-a"));
        assert!(a.plain_seed().is_some());

        manager.delete_template(&template.id).await.unwrap();
        assert_eq!(a.account_id.as_deref(), Some("acct-a"));
        assert!(matches!(
            manager.apply_template(&template.id, "acct-c"),
            Err(TemplateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_apply_seals_seed_with_manager() {
        let seeds = Arc::new(SeedManager::random());
        let manager = manager().with_seed_manager(seeds.clone());
        let template = manager
            .create_template(CreateTemplate::new("t", FingerprintProfile::default()))
            .await
            .unwrap();
        let profile = manager.apply_template(&template.id, "acct").unwrap();
        let seed = profile.noise_seed.as_ref().unwrap();
        assert!(seed.encrypted);
        assert!(seeds.open(seed, "acct").is_ok());
    }

    #[tokio::test]
    async fn test_update_template() {
        let manager = manager();
        let template = manager
            .create_template(CreateTemplate::new("old", FingerprintProfile::default()).with_description("d"))
            .await
            .unwrap();

        let updated = manager
            .update_template(
                &template.id,
                TemplateUpdate {
                    name: Some("new".to_string()),
                    description: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "new");
        assert_eq!(updated.description, None);
        assert!(updated.updated_at >= template.updated_at);

        let mut bad = FingerprintProfile::default();
        bad.hardware.cpu_cores = 0;
        let err = manager
            .update_template(
                &template.id,
                TemplateUpdate {
                    config: Some(bad),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::InvalidConfig(_)));
        assert_eq!(manager.get_template(&template.id).unwrap().config.hardware.cpu_cores, 8);
    }

    #[tokio::test]
    async fn test_list_sorted_by_name() {
        let manager = manager();
        for name in ["gamma", "alpha", "beta"] {
            manager
                .create_template(CreateTemplate::new(name, FingerprintProfile::default()))
                .await
                .unwrap();
        }
        let names: Vec<_> = manager.list_templates().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let manager = manager();
        let mut profile = FingerprintProfile::default();
        profile.noise_seed = Some(NoiseSeed::plain(777));
        let template = manager
            .create_template(CreateTemplate::new("rt", profile))
            .await
            .unwrap();

        let exported = manager.export_template(&template.id, ExportOptions::default()).unwrap();
        assert!(exported.get("exportedAt").is_some());
        assert_eq!(exported["exportVersion"], EXPORT_VERSION);

        let other = TemplateManager::new(Arc::new(MemoryStore::new()));
        let imported = other
            .import_template(
                &exported.to_string(),
                ImportOptions {
                    generate_new_id: false,
                    new_name: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(imported, template);
        assert_eq!(imported.config.plain_seed(), Some(777));

        let stripped = manager
            .export_template(&template.id, ExportOptions { include_noise_seed: false })
            .unwrap();
        assert!(stripped["config"].get("noiseSeed").is_none());
        let renamed = other
            .import_template(
                &stripped.to_string(),
                ImportOptions {
                    generate_new_id: true,
                    new_name: Some("copy".to_string()),
                },
            )
            .await
            .unwrap();
        assert_ne!(renamed.id, template.id);
        assert_eq!(renamed.name, "copy");
        assert!(renamed.config.noise_seed.is_none());
        let json = serde_json::to_value(&renamed).unwrap();
        assert!(json["config"].get("noiseSeed").is_none());
    }

    #[tokio::test]
    async fn test_import_rejects_bad_documents() {
        let manager = manager();
        assert!(matches!(
            manager.import_template("[1,2]", ImportOptions::default()).await,
            Err(TemplateError::Parse(_))
        ));

        let template = manager
            .create_template(CreateTemplate::new("t", FingerprintProfile::default()))
            .await
            .unwrap();
        let mut exported = manager.export_template(&template.id, ExportOptions::default()).unwrap();

        let err = manager
            .import_template(
                &exported.to_string(),
                ImportOptions {
                    generate_new_id: false,
                    new_name: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::Duplicate(_)));

        exported["config"]["hardware"]["cpuCores"] = serde_json::json!("eight");
        assert!(matches!(
            manager.import_template(&exported.to_string(), ImportOptions::default()).await,
            Err(TemplateError::Parse(_))
        ));

        exported["config"]["hardware"]["cpuCores"] = serde_json::json!(500);
        assert!(matches!(
            manager.import_template(&exported.to_string(), ImportOptions::default()).await,
            Err(TemplateError::InvalidConfig(_))
        ));
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_load_skips_corrupt_documents() {
        let store = Arc::new(MemoryStore::new());
        let seeding = TemplateManager::new(store.clone());
        let template = seeding
            .create_template(CreateTemplate::new("good", FingerprintProfile::default()))
            .await
            .unwrap();
        store.insert_raw("broken", "{not json");

        let manager = TemplateManager::new(store);
        assert_eq!(manager.load().await.unwrap(), 1);
        assert!(manager.get_template(&template.id).is_some());
    }
}
