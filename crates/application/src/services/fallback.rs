//! Fallback chain runner shared by the STT and TTS managers
//!
//! Walks the priority-ordered chain of one category and returns the first
//! success. Every provider that was tried ends up in the aggregated
//! [`ApplicationError::AllProvidersFailed`] with its last error.

use std::future::Future;

use domain::{ProviderCategory, ProviderIdentity};
use tracing::{debug, warn};

use crate::{
    error::{ApplicationError, ProviderAttempt},
    ports::{ProviderError, ProviderHandle},
    resilience::ProviderSession,
    services::ProviderManager,
};

/// Value produced by the provider that answered
#[derive(Debug)]
pub(crate) struct Answered<T> {
    pub value: T,
    pub provider: ProviderIdentity,
}

/// Try each available provider of `category` in order until one succeeds
///
/// Providers whose circuit is open when the walk starts are filtered out; an
/// empty chain fails with [`ApplicationError::NoProvidersAvailable`] before
/// any provider is touched.
pub(crate) async fn run_chain<T, F, Fut>(
    providers: &ProviderManager,
    category: ProviderCategory,
    preferred: Option<&str>,
    invoke: F,
) -> Result<Answered<T>, ApplicationError>
where
    F: Fn(ProviderHandle, ProviderSession) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let chain: Vec<_> = providers
        .chain(category, preferred)
        .into_iter()
        .filter(|identity| {
            let available = providers.is_available(identity);
            if !available {
                debug!(provider = %identity, "Skipping provider with open circuit");
            }
            available
        })
        .collect();

    if chain.is_empty() {
        warn!(%category, "No providers available");
        return Err(ApplicationError::NoProvidersAvailable { category });
    }

    let mut attempts = Vec::with_capacity(chain.len());

    for identity in chain {
        let Some(handle) = providers.get_provider(&identity).await else {
            attempts.push(ProviderAttempt::new(
                identity.name(),
                "provider could not be constructed",
            ));
            continue;
        };

        let result = providers
            .connections()
            .execute(&identity, |session| invoke(handle.clone(), session))
            .await;

        match result {
            Ok(value) => {
                return Ok(Answered {
                    value,
                    provider: identity,
                });
            },
            Err(e) => {
                warn!(provider = %identity, error = %e, "Provider failed, trying next");
                attempts.push(ProviderAttempt::new(identity.name(), &e));
            },
        }
    }

    Err(ApplicationError::AllProvidersFailed { category, attempts })
}
