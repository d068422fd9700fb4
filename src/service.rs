//! Per-account fingerprint management.
//!
//! [`FingerprintService`] ties the pieces together: it generates a profile
//! per account, seals its noise seed, keeps it in memory, hands out
//! injectors and applies templates.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::FingerprintSettings;
use crate::corpus::{BuiltinCorpus, CorpusError, ProfileCorpus};
use crate::generator::{FingerprintGenerator, GenerateOptions};
use crate::injector::{Injector, InjectorError, InjectorOptions};
use crate::profile::{ConsistencyValidator, FingerprintProfile, ProfileError, ValidationReport};
use crate::seed::{RotateOptions, SeedError, SeedManager, SeedRotation};
use crate::template::{FileStore, TemplateError, TemplateManager, TemplateStore};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error(transparent)]
    Injector(#[from] InjectorError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("Profile failed validation: {}", .0.messages().join("; "))]
    InvalidProfile(ValidationReport),

    #[error("No profile for account {0}")]
    UnknownAccount(String),
}

/// Owns every account's profile.
pub struct FingerprintService {
    corpus: Arc<dyn ProfileCorpus>,
    generator: FingerprintGenerator,
    validator: ConsistencyValidator,
    seeds: Arc<SeedManager>,
    templates: TemplateManager,
    injector_options: InjectorOptions,
    profiles: RwLock<HashMap<String, FingerprintProfile>>,
}

impl FingerprintService {
    pub fn new(
        corpus: Arc<dyn ProfileCorpus>,
        store: Arc<dyn TemplateStore>,
        seeds: Arc<SeedManager>,
    ) -> Self {
        Self::assemble(
            corpus,
            store,
            seeds,
            ConsistencyValidator::new(),
            FingerprintGenerator::new,
            InjectorOptions::default(),
        )
    }

    fn assemble(
        corpus: Arc<dyn ProfileCorpus>,
        store: Arc<dyn TemplateStore>,
        seeds: Arc<SeedManager>,
        validator: ConsistencyValidator,
        generator: impl FnOnce(Arc<dyn ProfileCorpus>) -> FingerprintGenerator,
        injector_options: InjectorOptions,
    ) -> Self {
        Self {
            generator: generator(Arc::clone(&corpus)),
            templates: TemplateManager::new(store)
                .with_seed_manager(Arc::clone(&seeds))
                .with_validator(validator.clone()),
            corpus,
            validator,
            seeds,
            injector_options,
            profiles: RwLock::new(HashMap::new()),
        }
    }

    /// Builds a service over the built-in corpus and a file-backed template
    /// store at `settings.template_dir`.
    pub fn from_settings(settings: &FingerprintSettings) -> Result<Self, ServiceError> {
        let seeds = match &settings.seed_secret {
            Some(secret) => SeedManager::from_secret(secret)?,
            None => {
                warn!("No seed secret configured; sealed seeds will not survive a restart");
                SeedManager::random()
            }
        };
        let noise_level = settings.default_noise_level;
        Ok(Self::assemble(
            Arc::new(BuiltinCorpus::new()),
            Arc::new(FileStore::new(&settings.template_dir)),
            Arc::new(seeds),
            ConsistencyValidator::new().with_strict(settings.strict_validation),
            move |corpus| FingerprintGenerator::new(corpus).with_noise_level(noise_level),
            settings.injector_options(),
        ))
    }

    /// Loads the corpus and the stored templates.
    pub async fn initialize(&self) -> Result<usize, ServiceError> {
        self.corpus.initialize().await?;
        let templates = self.templates.load().await?;
        info!(templates, "Fingerprint service initialized");
        Ok(templates)
    }

    pub fn generator(&self) -> &FingerprintGenerator {
        &self.generator
    }

    pub fn templates(&self) -> &TemplateManager {
        &self.templates
    }

    pub fn seeds(&self) -> &Arc<SeedManager> {
        &self.seeds
    }

    pub fn validator(&self) -> &ConsistencyValidator {
        &self.validator
    }

    /// Account ids with a profile, sorted.
    pub fn accounts(&self) -> Vec<String> {
        let mut accounts: Vec<String> = self.profiles.read().keys().cloned().collect();
        accounts.sort();
        accounts
    }

    pub fn profile_for(&self, account_id: &str) -> Option<FingerprintProfile> {
        self.profiles.read().get(account_id).cloned()
    }

    /// Generates and stores a new profile for `account_id`, replacing any
    /// existing one. Generation failures fall back to the default profile.
    pub fn generate_for_account(&self, account_id: &str, options: GenerateOptions) -> FingerprintProfile {
        let options = GenerateOptions {
            account_id: Some(account_id.to_string()),
            ..options
        };
        let mut profile = self.generator.generate_or_default(options);
        self.seal(&mut profile);

        self.profiles
            .write()
            .insert(account_id.to_string(), profile.clone());
        info!(account = %account_id, profile = %profile.id, label = %profile.label(), "Assigned fingerprint profile");
        profile
    }

    fn seal(&self, profile: &mut FingerprintProfile) {
        if let Err(e) = self.seeds.seal_profile_seed(profile) {
            error!(profile = %profile.id, error = %e, "Failed to seal noise seed");
        }
    }

    /// Stores a caller-supplied profile after validation.
    pub fn set_profile(&self, account_id: &str, mut profile: FingerprintProfile) -> Result<(), ServiceError> {
        profile.account_id = Some(account_id.to_string());
        let report = self.validator.validate(&profile);
        if !report.valid {
            return Err(ServiceError::InvalidProfile(report));
        }
        self.seal(&mut profile);
        self.profiles.write().insert(account_id.to_string(), profile);
        Ok(())
    }

    pub fn remove_profile(&self, account_id: &str) -> Option<FingerprintProfile> {
        let removed = self.profiles.write().remove(account_id);
        if removed.is_some() {
            info!(account = %account_id, "Removed fingerprint profile");
        }
        removed
    }

    /// Replaces the account's noise seed. The new seed is sealed; only a
    /// hash of the old one is returned.
    pub fn rotate_seed(&self, account_id: &str, reason: Option<String>) -> Result<SeedRotation, ServiceError> {
        let mut profiles = self.profiles.write();
        let profile = profiles
            .get_mut(account_id)
            .ok_or_else(|| ServiceError::UnknownAccount(account_id.to_string()))?;

        let old_seed = self.seeds.open_profile_seed(profile)?.unwrap_or_default();
        let rotation = self
            .seeds
            .rotate_seed(account_id, old_seed, RotateOptions { reason });
        profile.noise_seed = Some(self.seeds.seal(rotation.new_seed, account_id)?);
        profile.seed_version += 1;
        profile.seed_rotated_at = Some(rotation.rotated_at);
        profile.updated_at = rotation.rotated_at;
        Ok(rotation)
    }

    /// An injector for the account's profile that can open its sealed seed.
    pub fn injector_for(&self, account_id: &str, options: Option<InjectorOptions>) -> Result<Injector, ServiceError> {
        let profile = self
            .profile_for(account_id)
            .ok_or_else(|| ServiceError::UnknownAccount(account_id.to_string()))?;
        let options = options.unwrap_or_else(|| self.injector_options.clone());
        Ok(Injector::new(&profile.to_value()?, options)?
            .with_seed_manager(Arc::clone(&self.seeds))
            .with_validator(self.validator.clone()))
    }

    /// Derives a profile for `account_id` from a template and stores it.
    pub fn apply_template(&self, template_id: &str, account_id: &str) -> Result<FingerprintProfile, ServiceError> {
        let profile = self.templates.apply_template(template_id, account_id)?;
        self.profiles
            .write()
            .insert(account_id.to_string(), profile.clone());
        info!(template = %template_id, account = %account_id, "Assigned profile from template");
        Ok(profile)
    }
}
