//! Charge-gated, cache-aside generation.
//!
//! Per request: authorize, look up the cache, and only on a miss estimate the
//! cost, charge it, call the provider, respond, then queue the write-back.
//! A charge is never reversed; a provider failure after charging is surfaced
//! as-is.

use axum::http::StatusCode;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::billing::{Authorization, BillingGate, CallerContext, ChargeRequest};
use crate::cache::{CacheEntry, CacheKey, CacheStore, DEFAULT_CACHE_CONTROL};
use crate::error::AppError;
use crate::metrics::{record_charge, record_outcome};
use crate::models::GenerationRequest;
use crate::persist::{PersistJob, PersistWorker};
use crate::pricing::{CostBreakdown, CostCalculator};
use crate::providers::GenerationProvider;

/// Result of one successful pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub request_id: String,
    pub key: CacheKey,
    pub artifact: CacheEntry,
    pub cache_hit: bool,
    pub charged_cents: i64,
    /// Keys of the additional images when more than one was generated
    pub extra_keys: Vec<CacheKey>,
}

/// Which collaborators a pipeline was built with
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineBackends {
    pub billing: String,
    pub cache: String,
    pub provider: String,
    pub coalesce_in_flight: bool,
}

type InFlightSlot = Arc<Mutex<Option<CacheEntry>>>;

pub struct GenerationPipeline {
    billing: Arc<dyn BillingGate>,
    cache: Arc<dyn CacheStore>,
    provider: Arc<dyn GenerationProvider>,
    costs: Arc<CostCalculator>,
    persist: PersistWorker,
    cache_control: String,
    in_flight: Option<DashMap<CacheKey, InFlightSlot>>,
}

impl GenerationPipeline {
    pub fn new(
        billing: Arc<dyn BillingGate>,
        cache: Arc<dyn CacheStore>,
        provider: Arc<dyn GenerationProvider>,
        costs: Arc<CostCalculator>,
        persist: PersistWorker,
    ) -> Self {
        Self {
            billing,
            cache,
            provider,
            costs,
            persist,
            cache_control: DEFAULT_CACHE_CONTROL.to_string(),
            in_flight: None,
        }
    }

    pub fn with_cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = cache_control.into();
        self
    }

    /// Serialize concurrent misses on the same key; followers get the leader's artifact for free
    pub fn with_coalescing(mut self, enabled: bool) -> Self {
        self.in_flight = enabled.then(DashMap::new);
        self
    }

    pub fn costs(&self) -> &Arc<CostCalculator> {
        &self.costs
    }

    pub fn persist(&self) -> &PersistWorker {
        &self.persist
    }

    pub fn backends(&self) -> PipelineBackends {
        PipelineBackends {
            billing: self.billing.backend().to_string(),
            cache: self.cache.backend().to_string(),
            provider: self.provider.provider_type().to_string(),
            coalesce_in_flight: self.in_flight.is_some(),
        }
    }

    /// Price a request without authorizing, charging or generating
    pub fn quote(&self, request: &GenerationRequest) -> CostBreakdown {
        self.costs.estimate_cost(request)
    }

    pub async fn authorize(&self, caller: &CallerContext) -> Result<Authorization, AppError> {
        self.billing.authorize(caller).await
    }

    /// Serve a stored artifact by key. Never charges and never generates.
    pub async fn lookup_artifact(
        &self,
        key: &CacheKey,
        caller: &CallerContext,
    ) -> Result<CacheEntry, AppError> {
        self.require_spender(caller).await?;
        self.cache
            .get(key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No artifact stored under {}", key)))
    }

    /// Run the full pipeline for one request.
    ///
    /// The body runs on its own task so a dropped caller cannot interrupt a
    /// charge or provider call that is already underway.
    pub async fn handle(
        self: &Arc<Self>,
        request: &GenerationRequest,
        caller: &CallerContext,
    ) -> Result<GenerationOutcome, AppError> {
        let request_id = Uuid::new_v4().to_string();
        let key = request.cache_key();
        let span = info_span!(
            "generation",
            request_id = %request_id,
            caller = %caller.log_label(),
            key = %key,
        );

        let pipeline = self.clone();
        let request = request.clone();
        let caller = caller.clone();
        let task = tokio::spawn(
            async move { pipeline.run(request_id, key, &request, &caller).await }.instrument(span),
        );

        match task.await {
            Ok(result) => result,
            Err(e) => {
                record_outcome("internal_error");
                Err(AppError::Internal(format!("Generation task failed: {}", e)))
            }
        }
    }

    async fn run(
        &self,
        request_id: String,
        key: CacheKey,
        request: &GenerationRequest,
        caller: &CallerContext,
    ) -> Result<GenerationOutcome, AppError> {
        if let Err(e) = self.require_spender(caller).await {
            record_outcome(match &e {
                AppError::PaymentRequired(_) => "payment_required",
                _ => "internal_error",
            });
            return Err(e);
        }

        if let Some(artifact) = self.cached(&key).await {
            return Ok(self.hit(request_id, key, artifact));
        }

        let Some(in_flight) = &self.in_flight else {
            return self.generate(request_id, key, request, caller).await;
        };

        let slot = in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();
        let mut guard = slot.lock().await;

        // Another request for this key may have finished while we waited
        let ready = match guard.as_ref() {
            Some(artifact) => Some(artifact.clone()),
            None => self.cached(&key).await,
        };
        let result = match ready {
            Some(artifact) => {
                debug!("Served from a coalesced generation");
                Ok(self.hit(request_id, key.clone(), artifact))
            }
            None => {
                let result = self.generate(request_id, key.clone(), request, caller).await;
                if let Ok(outcome) = &result {
                    *guard = Some(outcome.artifact.clone());
                }
                result
            }
        };
        drop(guard);

        in_flight.remove_if(&key, |_, current| Arc::ptr_eq(current, &slot));
        result
    }

    async fn require_spender(&self, caller: &CallerContext) -> Result<Authorization, AppError> {
        let authorization = self.billing.authorize(caller).await?;
        if !authorization.registered {
            return Err(AppError::PaymentRequired(
                "A registered API key is required".to_string(),
            ));
        }
        if !authorization.can_spend() {
            return Err(AppError::PaymentRequired(
                "Account balance must be positive".to_string(),
            ));
        }
        Ok(authorization)
    }

    /// Cache read; errors degrade to a miss
    async fn cached(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.cache.get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(
                    backend = self.cache.backend(),
                    error = %e,
                    "Cache read failed, treating as miss"
                );
                None
            }
        }
    }

    fn hit(&self, request_id: String, key: CacheKey, artifact: CacheEntry) -> GenerationOutcome {
        record_outcome("cache_hit");
        info!(size = artifact.bytes.len(), "Cache hit");
        GenerationOutcome {
            request_id,
            key,
            artifact,
            cache_hit: true,
            charged_cents: 0,
            extra_keys: Vec::new(),
        }
    }

    async fn generate(
        &self,
        request_id: String,
        key: CacheKey,
        request: &GenerationRequest,
        caller: &CallerContext,
    ) -> Result<GenerationOutcome, AppError> {
        let cost = self.costs.estimate_cost(request);
        let charge = ChargeRequest {
            amount_cents: cost.total_charge_cents,
            allow_negative: false,
            idempotency_key: request_id.clone(),
            description: key.to_string(),
        };

        let outcome = self.billing.charge(caller, &charge).await.map_err(|e| {
            record_outcome("internal_error");
            e
        })?;
        if !outcome.charged {
            record_outcome("charge_declined");
            let message = outcome
                .message
                .unwrap_or_else(|| "Charge declined".to_string());
            info!(amount_cents = cost.total_charge_cents, reason = %message, "Charge declined");
            return Err(AppError::ChargeDeclined(message));
        }
        record_charge(cost.total_charge_cents);
        info!(amount_cents = cost.total_charge_cents, "Charged");

        let images = match self.provider.generate(request).await {
            Ok(images) if !images.is_empty() => images,
            Ok(_) => {
                return Err(self.provider_failed_after_charge(
                    cost.total_charge_cents,
                    AppError::ProviderFailure {
                        status: StatusCode::BAD_GATEWAY,
                        details: "Provider returned no images".to_string(),
                    },
                ))
            }
            Err(e) => return Err(self.provider_failed_after_charge(cost.total_charge_cents, e)),
        };

        let mut entries = images.into_iter().enumerate().map(|(index, image)| {
            (
                key.variant(index),
                CacheEntry::new(image.bytes, image.content_type)
                    .with_cache_control(self.cache_control.clone()),
            )
        });
        // Non-empty was checked above
        let Some((_, artifact)) = entries.next() else {
            return Err(AppError::Internal("Provider returned no images".to_string()));
        };
        let extras: Vec<(CacheKey, CacheEntry)> = entries.collect();
        let extra_keys: Vec<CacheKey> = extras.iter().map(|(k, _)| k.clone()).collect();

        let generated = GenerationOutcome {
            request_id: request_id.clone(),
            key: key.clone(),
            artifact: artifact.clone(),
            cache_hit: false,
            charged_cents: cost.total_charge_cents,
            extra_keys,
        };

        self.persist.submit(PersistJob {
            request_id: request_id.clone(),
            key,
            entry: artifact,
        });
        for (extra_key, entry) in extras {
            self.persist.submit(PersistJob {
                request_id: request_id.clone(),
                key: extra_key,
                entry,
            });
        }

        record_outcome("generated");
        info!(
            images = 1 + generated.extra_keys.len(),
            charged_cents = generated.charged_cents,
            "Generated"
        );
        Ok(generated)
    }

    fn provider_failed_after_charge(&self, charged_cents: i64, error: AppError) -> AppError {
        record_outcome("provider_failure");
        warn!(
            provider = self.provider.provider_type(),
            charged_cents,
            error = %error,
            "Provider failed after charge; charge stands"
        );
        error
    }
}
