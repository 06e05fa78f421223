//! Version-gated memo of request combinations.
//!
//! A combination is the set of entities one request touches. After a full
//! validation the current versions of those entities are recorded under the
//! request's signature. A later request with the same signature is "known"
//! when the recorded versions still match, which makes its cached status
//! documents trustworthy.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use tollgate_core::{AuthAction, AuthParams, ServiceId, StatusDocument};
use tollgate_state::{KeyKind, StateKey, StateStore, WriteBatch};

use crate::entities::EntityRepository;
use crate::error::TransactorError;
use crate::keys;
use crate::service_cache::ServiceIdCache;
use crate::status_cache::oauth_identity;

/// Result of looking up a request combination.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinationCheck {
    /// The recorded version vector matches the current one.
    pub known: bool,
    pub service_id: Option<ServiceId>,
    /// Signature key of the request; `None` when it cannot be cached.
    pub signature: Option<StateKey>,
    /// Version vector computed from the current entity versions.
    pub version_vector: Option<String>,
    pub application_document: Option<StatusDocument>,
    pub user_document: Option<StatusDocument>,
    /// Keys the documents were read from.
    pub application_status_key: Option<StateKey>,
    pub user_status_key: Option<StateKey>,
    /// Store-wide caching toggle.
    pub caching_enabled: bool,
}

impl CombinationCheck {
    fn unknown() -> Self {
        Self {
            known: false,
            service_id: None,
            signature: None,
            version_vector: None,
            application_document: None,
            user_document: None,
            application_status_key: None,
            user_status_key: None,
            caching_enabled: true,
        }
    }
}

/// Compute the signature key of a request.
///
/// Covers every cache-relevant parameter and the names, not the values, of
/// the requested usage. Empty parameters count as absent.
pub fn signature(action: AuthAction, provider_key: &str, params: &AuthParams) -> StateKey {
    let fields = [
        ("provider_key", Some(provider_key)),
        ("service_id", params.service_id()),
        ("app_id", params.app_id()),
        ("app_key", params.app_key()),
        ("user_key", params.user_key()),
        ("user_id", params.user_id()),
        ("referrer", params.referrer()),
        ("redirect_url", params.redirect_url()),
    ];

    let mut canonical = String::new();
    for (label, value) in fields {
        let _ = write!(canonical, "{label}:{}/", value.unwrap_or_default());
    }
    match &params.usage {
        Some(usage) => {
            for name in usage.keys() {
                let _ = write!(canonical, "usage:{name}:");
            }
        }
        None => canonical.push_str("usage:/"),
    }

    let digest = Sha256::digest(canonical.as_bytes());
    StateKey::new(
        KeyKind::Combination,
        format!("{action}/{}", hex::encode(digest)),
    )
}

/// Identity of the cached application document a request addresses:
/// `{app_id or user_key}:{app_key}:{referrer}`, or the application's OAuth
/// identity for token-authenticated actions.
pub fn requested_identity(action: AuthAction, params: &AuthParams) -> String {
    if action.is_oauth() {
        return oauth_identity(params.app_id().unwrap_or_default());
    }
    format!(
        "{}:{}:{}",
        params.app_id().or(params.user_key()).unwrap_or_default(),
        params.app_key().unwrap_or_default(),
        params.referrer().unwrap_or_default(),
    )
}

fn decode_document(key: &StateKey, raw: Option<&str>) -> Option<StatusDocument> {
    let raw = raw?;
    match serde_json::from_str(raw) {
        Ok(doc) => Some(doc),
        Err(e) => {
            warn!(key = %key, error = %e, "ignoring undecodable cached status");
            None
        }
    }
}

pub struct CombinationCache {
    store: Arc<dyn StateStore>,
    entities: EntityRepository,
    service_ids: ServiceIdCache,
    ttl: Duration,
}

impl CombinationCache {
    pub fn new(
        store: Arc<dyn StateStore>,
        entities: EntityRepository,
        service_ids: ServiceIdCache,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            entities,
            service_ids,
            ttl,
        }
    }

    async fn service_id(
        &self,
        provider_key: &str,
        params: &AuthParams,
    ) -> Result<Option<ServiceId>, TransactorError> {
        if let Some(id) = params.service_id() {
            return Ok(Some(ServiceId::new(id)));
        }
        if let Some(id) = self.service_ids.lookup(provider_key) {
            return Ok(Some(id));
        }
        let found = self.entities.default_service_id(provider_key).await?;
        if let Some(id) = &found {
            self.service_ids.store(provider_key, id.clone());
        }
        Ok(found)
    }

    /// Determine whether the request's combination is known and fetch its
    /// cached documents, all in one snapshot read.
    pub async fn check_combination(
        &self,
        action: AuthAction,
        provider_key: &str,
        params: &AuthParams,
    ) -> Result<CombinationCheck, TransactorError> {
        // Token-identified requests carry identity outside the signature.
        if action.is_oauth() && params.app_id().is_none() {
            return Ok(CombinationCheck::unknown());
        }

        let Some(service_id) = self.service_id(provider_key, params).await? else {
            return Ok(CombinationCheck::unknown());
        };

        let signature = signature(action, provider_key, params);
        let application_version = match (params.app_id(), params.user_key()) {
            (Some(id), _) => keys::application_version(&service_id, id),
            (None, Some(user_key)) => keys::user_key_version(&service_id, user_key),
            (None, None) => keys::application_version(&service_id, ""),
        };
        let application_status =
            keys::application_status(&service_id, &requested_identity(action, params));
        let user = params.user_id();

        let mut read = vec![
            signature.clone(),
            keys::service_version(&service_id),
            application_version,
        ];
        if let Some(username) = user {
            read.push(keys::user_version(&service_id, username));
        }
        read.push(application_status.clone());
        let user_status = user.map(|username| keys::user_status(&service_id, username));
        if let Some(key) = &user_status {
            read.push(key.clone());
        }
        read.push(keys::caching_enabled());

        let mut values = self.store.get_many(&read).await?.into_iter();
        let mut next = || values.next().flatten();

        let recorded = next();
        let service_version = next().unwrap_or_default();
        let application_version = next().unwrap_or_default();
        let mut version_vector = format!("s:{service_version}/a:{application_version}");
        if user.is_some() {
            let user_version = next().unwrap_or_default();
            let _ = write!(version_vector, "/u:{user_version}");
        }
        let application_document = decode_document(&application_status, next().as_deref());
        let user_document = match &user_status {
            Some(key) => decode_document(key, next().as_deref()),
            None => None,
        };
        let caching_enabled = next().as_deref() != Some("0");

        let known = recorded.as_deref() == Some(version_vector.as_str());
        debug!(signature = %signature, %version_vector, known, "combination checked");

        Ok(CombinationCheck {
            known,
            service_id: Some(service_id),
            signature: Some(signature),
            version_vector: Some(version_vector),
            application_document,
            user_document,
            application_status_key: Some(application_status),
            user_status_key: user_status,
            caching_enabled,
        })
    }

    /// Remember the version vector of a fully validated combination.
    /// Does nothing unless both parts are present.
    pub async fn record_combination(
        &self,
        signature: Option<&StateKey>,
        version_vector: Option<&str>,
    ) -> Result<(), TransactorError> {
        let (Some(signature), Some(vector)) = (signature, version_vector) else {
            return Ok(());
        };
        self.store
            .execute(WriteBatch::new().set(signature.clone(), vector, Some(self.ttl)))
            .await?;
        Ok(())
    }

    pub async fn enable_caching(&self) -> Result<(), TransactorError> {
        self.store.set(&keys::caching_enabled(), "1", None).await?;
        Ok(())
    }

    pub async fn disable_caching(&self) -> Result<(), TransactorError> {
        self.store.set(&keys::caching_enabled(), "0", None).await?;
        Ok(())
    }

    /// Enabled unless explicitly switched off.
    pub async fn caching_enabled(&self) -> Result<bool, TransactorError> {
        let value = self.store.get(&keys::caching_enabled()).await?;
        Ok(value.as_deref() != Some("0"))
    }
}
