//! Versioned entity storage.
//!
//! Every mutation writes the entity document and bumps its version counter
//! in the same [`WriteBatch`], so a reader comparing versions never sees a
//! changed entity behind an unchanged version.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tollgate_core::{Application, ApplicationId, ResolutionError, Service, ServiceId, User};
use tollgate_state::{StateStore, WriteBatch};

use crate::error::TransactorError;
use crate::keys;

/// Identity an OAuth access token stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCredentials {
    pub application_id: ApplicationId,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Loads and saves services, applications, users and access tokens.
#[derive(Clone)]
pub struct EntityRepository {
    store: Arc<dyn StateStore>,
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, TransactorError> {
    Ok(serde_json::from_str(raw)?)
}

fn parse_version(raw: Option<&str>) -> u64 {
    raw.and_then(|v| v.parse().ok()).unwrap_or(0)
}

impl EntityRepository {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Store a service and bump its version.
    ///
    /// The service becomes the provider's default service unless the
    /// provider already has a different one.
    pub async fn save_service(&self, service: &Service) -> Result<(), TransactorError> {
        let doc = serde_json::to_string(service)?;
        let mut batch = WriteBatch::new()
            .set(keys::service(&service.id), doc, None)
            .increment(keys::service_version(&service.id), 1);

        let current_default = self.default_service_id(&service.provider_key).await?;
        if current_default.is_none_or(|id| id == service.id) {
            batch = batch.set(
                keys::provider_service_id(&service.provider_key),
                service.id.as_str(),
                None,
            );
        }

        self.store.execute(batch).await?;
        debug!(service_id = %service.id, "service saved");
        Ok(())
    }

    pub async fn service_by_id(&self, service_id: &str) -> Result<Option<Service>, TransactorError> {
        let sid = ServiceId::new(service_id);
        let values = self
            .store
            .get_many(&[keys::service(&sid), keys::service_version(service_id)])
            .await?;
        let Some(raw) = values[0].as_deref() else {
            return Ok(None);
        };
        let mut service: Service = decode(raw)?;
        service.version = parse_version(values[1].as_deref());
        Ok(Some(service))
    }

    /// The default service of a provider key.
    pub async fn default_service_id(
        &self,
        provider_key: &str,
    ) -> Result<Option<ServiceId>, TransactorError> {
        Ok(self
            .store
            .get(&keys::provider_service_id(provider_key))
            .await?
            .map(ServiceId::new))
    }

    /// Resolve the service a request addresses and check that it belongs to
    /// the provider.
    ///
    /// Without an explicit service id the provider's default service is used.
    pub async fn resolve_service(
        &self,
        provider_key: &str,
        service_id: Option<&str>,
    ) -> Result<Service, TransactorError> {
        let id = match service_id {
            Some(id) => id.to_owned(),
            None => self
                .default_service_id(provider_key)
                .await?
                .ok_or_else(|| ResolutionError::ProviderKeyInvalid(provider_key.to_owned()))?
                .to_string(),
        };

        let service = self
            .service_by_id(&id)
            .await?
            .ok_or_else(|| ResolutionError::ServiceIdInvalid(id.clone()))?;

        if service.provider_key != provider_key {
            // An unknown provider key is reported as such before the mismatch.
            if self.default_service_id(provider_key).await?.is_none() {
                return Err(ResolutionError::ProviderKeyInvalid(provider_key.to_owned()).into());
            }
            return Err(ResolutionError::ServiceIdInvalid(id).into());
        }

        Ok(service)
    }

    /// Store an application and bump its versions.
    ///
    /// Both the id version and the version of its user key index are bumped.
    /// When the user key changes, the old index is removed and its version
    /// bumped too, so cached decisions addressed through it go stale.
    pub async fn save_application(&self, application: &Application) -> Result<(), TransactorError> {
        let sid = &application.service_id;
        let previous = self.application_by_id(sid, &application.id).await?;
        let previous_user_key = previous.and_then(|app| app.user_key);

        let doc = serde_json::to_string(application)?;
        let mut batch = WriteBatch::new()
            .set(keys::application(sid, &application.id), doc, None)
            .increment(keys::application_version(sid, &application.id), 1);

        if let Some(user_key) = application.user_key.as_deref() {
            batch = batch
                .set(
                    keys::user_key_index(sid, user_key),
                    application.id.as_str(),
                    None,
                )
                .increment(keys::user_key_version(sid, user_key), 1);
        }

        if let Some(old) = previous_user_key
            && application.user_key.as_deref() != Some(old.as_str())
        {
            batch = batch
                .delete(keys::user_key_index(sid, &old))
                .increment(keys::user_key_version(sid, &old), 1);
        }

        self.store.execute(batch).await?;
        debug!(service_id = %sid, application_id = %application.id, "application saved");
        Ok(())
    }

    pub async fn application_by_id(
        &self,
        service_id: &ServiceId,
        application_id: &str,
    ) -> Result<Option<Application>, TransactorError> {
        let values = self
            .store
            .get_many(&[
                keys::application(service_id, application_id),
                keys::application_version(service_id, application_id),
            ])
            .await?;
        let Some(raw) = values[0].as_deref() else {
            return Ok(None);
        };
        let mut application: Application = decode(raw)?;
        application.version = parse_version(values[1].as_deref());
        Ok(Some(application))
    }

    /// Load an application by id, or through its user key when no id is
    /// given.
    pub async fn application_by_id_or_user_key(
        &self,
        service_id: &ServiceId,
        application_id: Option<&str>,
        user_key: Option<&str>,
    ) -> Result<Application, TransactorError> {
        if let Some(id) = application_id {
            return self
                .application_by_id(service_id, id)
                .await?
                .ok_or_else(|| ResolutionError::ApplicationNotFound(Some(id.to_owned())).into());
        }

        let Some(user_key) = user_key else {
            return Err(ResolutionError::ApplicationNotFound(None).into());
        };

        let id = self
            .store
            .get(&keys::user_key_index(service_id, user_key))
            .await?
            .ok_or_else(|| ResolutionError::UserKeyInvalid(user_key.to_owned()))?;

        self.application_by_id(service_id, &id)
            .await?
            .ok_or_else(|| ResolutionError::UserKeyInvalid(user_key.to_owned()).into())
    }

    /// Store a user and bump its version.
    pub async fn save_user(&self, user: &User) -> Result<(), TransactorError> {
        let doc = serde_json::to_string(user)?;
        let batch = WriteBatch::new()
            .set(keys::user(&user.service_id, &user.username), doc, None)
            .increment(keys::user_version(&user.service_id, &user.username), 1);
        self.store.execute(batch).await?;
        debug!(service_id = %user.service_id, username = %user.username, "user saved");
        Ok(())
    }

    pub async fn user(
        &self,
        service_id: &ServiceId,
        username: &str,
    ) -> Result<Option<User>, TransactorError> {
        let values = self
            .store
            .get_many(&[
                keys::user(service_id, username),
                keys::user_version(service_id, username),
            ])
            .await?;
        let Some(raw) = values[0].as_deref() else {
            return Ok(None);
        };
        let mut user: User = decode(raw)?;
        user.version = parse_version(values[1].as_deref());
        Ok(Some(user))
    }

    /// Load a user, creating it with the service's default limits on first
    /// sight.
    ///
    /// Returns `None` when the user is unknown and the service requires
    /// users to be registered beforehand.
    pub async fn user_load_or_create(
        &self,
        service: &Service,
        username: &str,
    ) -> Result<Option<User>, TransactorError> {
        if let Some(user) = self.user(&service.id, username).await? {
            return Ok(Some(user));
        }
        if service.user_registration_required {
            return Ok(None);
        }

        let mut user = User::new(service.id.clone(), username);
        user.usage_limits.clone_from(&service.default_user_limits);
        let doc = serde_json::to_string(&user)?;

        // Concurrent first requests race here; only one document is kept.
        let created = self
            .store
            .check_and_set(&keys::user(&service.id, username), &doc, None)
            .await?;
        if created {
            self.store
                .increment(&keys::user_version(&service.id, username), 1, None)
                .await?;
            debug!(service_id = %service.id, %username, "user created on first use");
        }

        self.user(&service.id, username).await
    }

    /// Store the credentials an access token stands for.
    pub async fn save_access_token(
        &self,
        service_id: &ServiceId,
        token: &str,
        credentials: &TokenCredentials,
        ttl: Option<Duration>,
    ) -> Result<(), TransactorError> {
        let doc = serde_json::to_string(credentials)?;
        self.store
            .set(&keys::access_token(service_id, token), &doc, ttl)
            .await?;
        Ok(())
    }

    /// Look up the credentials of an access token.
    pub async fn access_token_credentials(
        &self,
        service_id: &ServiceId,
        token: &str,
    ) -> Result<TokenCredentials, TransactorError> {
        let raw = self
            .store
            .get(&keys::access_token(service_id, token))
            .await?
            .ok_or_else(|| ResolutionError::AccessTokenInvalid(token.to_owned()))?;
        decode(&raw)
    }
}
