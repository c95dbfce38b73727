//! Registration lifecycle orchestration across the registry store and messaging sink.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Level};

use crate::backend::{
    DeleteCondition, MessagingSink, PutMode, RegistrationRecord, RegistryStore,
};
use crate::clock::{to_chrono, Clock};
use crate::error::{RegistryCode, RegistryError};
use crate::metadata::Metadata;
use crate::observability::events;
use crate::runtime::retry::{retry_transient, RetryPolicy};
use crate::schema::IdentitySchema;

const COMPONENT: &str = "registration_lifecycle";

/// One registration call.
#[derive(Clone, Debug, PartialEq)]
pub struct RegisterRequest {
    pub identity: String,
    pub metadata: Metadata,
    /// `None` falls back to the namespace default TTL, which may itself be unset.
    pub ttl: Option<Duration>,
    pub replace: bool,
    /// Optimistic check against the live record's version. Implies `replace`.
    pub expected_version: Option<u64>,
}

impl RegisterRequest {
    pub fn new(identity: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            identity: identity.into(),
            metadata,
            ttl: None,
            replace: false,
            expected_version: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn replacing(mut self) -> Self {
        self.replace = true;
        self
    }

    pub fn expecting_version(mut self, version: u64) -> Self {
        self.replace = true;
        self.expected_version = Some(version);
        self
    }

    fn put_mode(&self) -> PutMode {
        if self.replace || self.expected_version.is_some() {
            PutMode::Replace {
                expected_version: self.expected_version,
            }
        } else {
            PutMode::Create
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RegisterResult {
    pub identity: String,
    pub registered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub version: u64,
    /// `true` when a live registration was overwritten.
    pub replaced: bool,
}

impl From<&RegistrationRecord> for RegisterResult {
    fn from(record: &RegistrationRecord) -> Self {
        Self {
            identity: record.identity.clone(),
            registered_at: record.registered_at,
            expires_at: record.expires_at,
            version: record.version,
            replaced: false,
        }
    }
}

/// Failures for registration orchestration.
#[derive(Debug)]
pub(crate) enum RegisterError {
    Rejected(RegistryError),
    QuotaExceeded { limit: usize },
    SubscriptionFailed(RegistryError),
}

impl Display for RegisterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterError::Rejected(err) => write!(f, "{}", err.message),
            RegisterError::QuotaExceeded { limit } => {
                write!(f, "namespace registration quota of {limit} identities reached")
            }
            RegisterError::SubscriptionFailed(err) => {
                write!(f, "failed to subscribe identity on messaging sink: {err}")
            }
        }
    }
}

impl Error for RegisterError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RegisterError::Rejected(err) | RegisterError::SubscriptionFailed(err) => Some(err),
            RegisterError::QuotaExceeded { .. } => None,
        }
    }
}

impl From<RegistryError> for RegisterError {
    fn from(err: RegistryError) -> Self {
        RegisterError::Rejected(err)
    }
}

impl From<RegisterError> for RegistryError {
    fn from(err: RegisterError) -> Self {
        match err {
            RegisterError::Rejected(err) => err,
            RegisterError::QuotaExceeded { .. } => {
                RegistryError::fail_with_code(RegistryCode::QuotaExceeded, err.to_string())
            }
            RegisterError::SubscriptionFailed(_) => {
                RegistryError::fail_with_code(RegistryCode::BackendUnavailable, err.to_string())
            }
        }
    }
}

/// Namespace-level lifecycle settings.
#[derive(Clone, Debug, Default)]
pub(crate) struct LifecycleSettings {
    pub(crate) schema: Option<Arc<IdentitySchema>>,
    pub(crate) default_ttl: Option<Duration>,
    /// `0` is unlimited.
    pub(crate) max_identities: usize,
    pub(crate) store_retry: RetryPolicy,
}

/// Orchestrates identity transitions across the registry store and messaging sink.
pub(crate) struct RegistrationLifecycle {
    namespace: String,
    store: Arc<dyn RegistryStore>,
    messaging: Arc<dyn MessagingSink>,
    clock: Arc<dyn Clock>,
    settings: LifecycleSettings,
}

impl RegistrationLifecycle {
    pub(crate) fn new(
        namespace: &str,
        store: Arc<dyn RegistryStore>,
        messaging: Arc<dyn MessagingSink>,
        clock: Arc<dyn Clock>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            store,
            messaging,
            clock,
            settings,
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn store_retry(&self) -> &RetryPolicy {
        &self.settings.store_retry
    }

    /// Validates and writes a registration, subscribing new identities when the sink
    /// needs it. A failed subscription rolls the write back.
    pub(crate) async fn register(
        &self,
        request: RegisterRequest,
    ) -> Result<RegisterResult, RegisterError> {
        let identity = request.identity.clone();
        let result = self.try_register(request).await;
        if let Err(err) = &result {
            warn!(
                event = events::REGISTER_REJECTED,
                component = COMPONENT,
                namespace = self.namespace.as_str(),
                identity = identity.as_str(),
                err = %err,
                "registration rejected"
            );
        }
        result
    }

    async fn try_register(
        &self,
        mut request: RegisterRequest,
    ) -> Result<RegisterResult, RegisterError> {
        if request.identity.is_empty() {
            return Err(RegistryError::invalid_argument("identity must not be empty").into());
        }
        if request.ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(RegistryError::invalid_argument("ttl must be positive").into());
        }
        let ttl = request.ttl.or(self.settings.default_ttl);

        if let Some(schema) = &self.settings.schema {
            schema.validate(&mut request.metadata)?;
        }
        self.check_quota(&request.identity).await?;

        let mode = request.put_mode();
        let now = self.clock.now();
        let mut record = RegistrationRecord::new(&request.identity, request.metadata, now);
        if let Some(ttl) = ttl {
            let expires_at = now
                .checked_add_signed(to_chrono(ttl))
                .ok_or_else(|| RegistryError::invalid_argument("ttl is out of range"))?;
            record = record.with_expiry(ttl, expires_at);
        }

        let outcome = self.store.put(record, mode).await?;
        let stored = outcome.record;

        if !outcome.replaced && self.messaging.requires_subscription() {
            if let Err(err) = self.messaging.subscribe(&stored.identity).await {
                self.roll_back(&stored, &err).await;
                return Err(RegisterError::SubscriptionFailed(err));
            }
        }

        info!(
            event = events::REGISTER_OK,
            component = COMPONENT,
            namespace = self.namespace.as_str(),
            identity = stored.identity.as_str(),
            version = stored.version,
            replaced = outcome.replaced,
            ttl_ms = ttl.map(|ttl| ttl.as_millis() as u64),
            "identity registered"
        );

        Ok(RegisterResult {
            replaced: outcome.replaced,
            ..RegisterResult::from(&stored)
        })
    }

    /// Count-based quota. Replacing a live identity never counts against it.
    async fn check_quota(&self, identity: &str) -> Result<(), RegisterError> {
        let limit = self.settings.max_identities;
        if limit == 0 {
            return Ok(());
        }
        if self.store.count().await? < limit {
            return Ok(());
        }
        match self.store.get(identity).await {
            Ok(_) => Ok(()),
            Err(err) if err.code == RegistryCode::NotFound => {
                Err(RegisterError::QuotaExceeded { limit })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn roll_back(&self, stored: &RegistrationRecord, cause: &RegistryError) {
        match self
            .store
            .delete(&stored.identity, DeleteCondition::Version(stored.version))
            .await
        {
            Ok(_) => warn!(
                event = events::REGISTER_ROLLBACK,
                component = COMPONENT,
                namespace = self.namespace.as_str(),
                identity = stored.identity.as_str(),
                version = stored.version,
                reason = %cause,
                "subscription failed; registration rolled back"
            ),
            Err(err) => warn!(
                event = events::REGISTER_ROLLBACK_FAILED,
                component = COMPONENT,
                namespace = self.namespace.as_str(),
                identity = stored.identity.as_str(),
                version = stored.version,
                reason = %cause,
                err = %err,
                "subscription failed and rollback delete failed"
            ),
        }
    }

    /// Removes the identity and tears down its subscription. Returns whether a live
    /// registration existed; absence is not an error.
    pub(crate) async fn unregister(&self, identity: &str) -> Result<bool, RegistryError> {
        if identity.is_empty() {
            return Err(RegistryError::invalid_argument("identity must not be empty"));
        }
        let found = self.store.delete(identity, DeleteCondition::Always).await?;
        self.tear_down(identity).await;

        info!(
            event = events::UNREGISTER_OK,
            component = COMPONENT,
            namespace = self.namespace.as_str(),
            identity,
            found,
            "identity unregistered"
        );
        Ok(found)
    }

    /// Removes the identity only if it is still expired as of `now`.
    pub(crate) async fn expire(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RegistryError> {
        let removed = self
            .store
            .delete(identity, DeleteCondition::ExpiredBy(now))
            .await?;
        if !removed {
            if tracing::enabled!(Level::DEBUG) {
                debug!(
                    event = events::EXPIRE_SKIPPED_RENEWED,
                    component = COMPONENT,
                    namespace = self.namespace.as_str(),
                    identity,
                    "expiry skipped; identity renewed or already gone"
                );
            }
            return Ok(false);
        }

        self.tear_down(identity).await;
        info!(
            event = events::EXPIRE_OK,
            component = COMPONENT,
            namespace = self.namespace.as_str(),
            identity,
            "identity expired"
        );
        Ok(true)
    }

    /// Renews the identity's expiry. Without an explicit TTL the registration TTL is
    /// reused; identities registered without one stay non-expiring.
    pub(crate) async fn heartbeat(
        &self,
        identity: &str,
        ttl: Option<Duration>,
    ) -> Result<RegistrationRecord, RegistryError> {
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(RegistryError::invalid_argument("ttl must be positive"));
        }
        let ttl = match ttl {
            Some(ttl) => ttl,
            None => {
                let record =
                    retry_transient(&self.settings.store_retry, "get", || self.store.get(identity))
                        .await?;
                match record.ttl {
                    Some(ttl) => ttl,
                    None => return Ok(record),
                }
            }
        };

        let record = self.store.renew_expiry(identity, ttl).await?;
        if tracing::enabled!(Level::DEBUG) {
            debug!(
                event = events::HEARTBEAT_OK,
                component = COMPONENT,
                namespace = self.namespace.as_str(),
                identity,
                ttl_ms = ttl.as_millis() as u64,
                "identity renewed"
            );
        }
        Ok(record)
    }

    /// Drops the identity's messaging state. A registration that raced in while the
    /// unsubscribe was in flight gets its subscription back, since the new
    /// incarnation's own subscribe may have landed before our unsubscribe.
    async fn tear_down(&self, identity: &str) {
        if let Err(err) = self.messaging.unsubscribe(identity).await {
            warn!(
                event = events::UNSUBSCRIBE_FAILED,
                component = COMPONENT,
                namespace = self.namespace.as_str(),
                identity,
                err = %err,
                "failed to remove messaging subscription"
            );
        }
        if !self.messaging.requires_subscription() {
            return;
        }

        let record = match self.store.get(identity).await {
            Ok(record) => record,
            Err(err) if err.code == RegistryCode::NotFound => return,
            Err(err) => {
                warn!(
                    event = events::SUBSCRIPTION_RESTORE_FAILED,
                    component = COMPONENT,
                    namespace = self.namespace.as_str(),
                    identity,
                    err = %err,
                    "could not check for a re-registration after teardown"
                );
                return;
            }
        };
        match self.messaging.subscribe(identity).await {
            Ok(()) => info!(
                event = events::SUBSCRIPTION_RESTORED,
                component = COMPONENT,
                namespace = self.namespace.as_str(),
                identity,
                version = record.version,
                "re-subscribed an identity registered during teardown"
            ),
            Err(err) => warn!(
                event = events::SUBSCRIPTION_RESTORE_FAILED,
                component = COMPONENT,
                namespace = self.namespace.as_str(),
                identity,
                version = record.version,
                err = %err,
                "failed to restore subscription after teardown"
            ),
        }
    }
}
