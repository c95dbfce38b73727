//! Target resolution: which records a filter selects, under native or engine-side
//! evaluation.

use std::sync::Arc;
use tracing::debug;

use crate::backend::page::paginate;
use crate::backend::{
    FilterSupport, PageRequest, RegistrationRecord, RegistryStore, ScanPage, ScanRequest, SortKey,
};
use crate::config::FilterEvaluation;
use crate::error::RegistryError;
use crate::filter::{self, Filter};
use crate::observability::{events, fields};
use crate::runtime::retry::{retry_transient, RetryPolicy};

const COMPONENT: &str = "target_resolver";

/// Where a resolver evaluates filters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EvaluationStrategy {
    /// The store receives the filter and returns matching records.
    Native,
    /// The store returns full scans and [`Filter::matches`] selects in-process.
    EngineSide,
}

impl EvaluationStrategy {
    /// Native only when configured `auto` and the store can evaluate filters itself.
    pub fn select(mode: FilterEvaluation, support: FilterSupport) -> Self {
        match (mode, support) {
            (FilterEvaluation::Auto, FilterSupport::Native) => EvaluationStrategy::Native,
            _ => EvaluationStrategy::EngineSide,
        }
    }
}

/// Reads matching records from a store, retrying transient failures.
pub(crate) struct TargetResolver {
    store: Arc<dyn RegistryStore>,
    strategy: EvaluationStrategy,
    retry: RetryPolicy,
    page_size: usize,
}

impl TargetResolver {
    pub(crate) fn new(
        store: Arc<dyn RegistryStore>,
        mode: FilterEvaluation,
        retry: RetryPolicy,
        page_size: usize,
    ) -> Self {
        let strategy = EvaluationStrategy::select(mode, store.filter_support());
        Self {
            store,
            strategy,
            retry,
            page_size: page_size.max(1),
        }
    }

    pub(crate) fn strategy(&self) -> EvaluationStrategy {
        self.strategy
    }

    /// Point read with retries.
    pub(crate) async fn get(&self, identity: &str) -> Result<RegistrationRecord, RegistryError> {
        retry_transient(&self.retry, "get", || self.store.get(identity)).await
    }

    /// One page of records matching `filter` in `sort` order.
    pub(crate) async fn scan_page(
        &self,
        filter: Option<&Filter>,
        page: PageRequest,
        sort: SortKey,
    ) -> Result<ScanPage, RegistryError> {
        match self.strategy {
            EvaluationStrategy::Native => {
                self.scan_with_retry(ScanRequest {
                    filter: filter.cloned(),
                    page,
                    sort,
                })
                .await
            }
            EvaluationStrategy::EngineSide => {
                let matching = self.engine_side_matches(filter).await?;
                paginate(matching, &page, sort)
            }
        }
    }

    /// Every record matching `filter`, as one snapshot.
    pub(crate) async fn resolve_all(
        &self,
        filter: Option<&Filter>,
    ) -> Result<Vec<RegistrationRecord>, RegistryError> {
        let records = match self.strategy {
            EvaluationStrategy::Native => self.scan_all(filter).await?,
            EvaluationStrategy::EngineSide => self.engine_side_matches(filter).await?,
        };

        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                event = events::TARGETS_RESOLVED,
                component = COMPONENT,
                strategy = ?self.strategy,
                filter = %fields::format_filter(filter),
                target_count = records.len(),
                "resolved multicast targets"
            );
        }
        Ok(records)
    }

    async fn engine_side_matches(
        &self,
        filter: Option<&Filter>,
    ) -> Result<Vec<RegistrationRecord>, RegistryError> {
        let mut records = self.scan_all(None).await?;
        records.retain(|record| filter::matches(filter, &record.metadata));
        Ok(records)
    }

    async fn scan_all(
        &self,
        filter: Option<&Filter>,
    ) -> Result<Vec<RegistrationRecord>, RegistryError> {
        let mut records = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .scan_with_retry(ScanRequest {
                    filter: filter.cloned(),
                    page: PageRequest {
                        cursor: cursor.take(),
                        limit: Some(self.page_size),
                    },
                    sort: SortKey::Identity,
                })
                .await?;
            records.extend(page.records);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(records)
    }

    async fn scan_with_retry(&self, request: ScanRequest) -> Result<ScanPage, RegistryError> {
        retry_transient(&self.retry, "scan", || self.store.scan(request.clone())).await
    }
}
