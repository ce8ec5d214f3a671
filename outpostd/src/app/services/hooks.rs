// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Configuration points that are either a constant or computed per workload.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::app::errors::{AppError, AppResult};
use crate::app::types::WorkloadView;

#[async_trait]
pub trait Resolve<T: Send>: Send + Sync {
    async fn resolve(&self, workload: &WorkloadView) -> AppResult<T>;
}

pub enum Hook<T: Send> {
    Value(T),
    Resolver(Arc<dyn Resolve<T>>),
}

impl<T: Clone + Send + Sync + 'static> Hook<T> {
    pub fn value(value: T) -> Self {
        Hook::Value(value)
    }

    pub fn resolver(resolver: impl Resolve<T> + 'static) -> Self {
        Hook::Resolver(Arc::new(resolver))
    }

    /// Synchronous resolver built from a closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&WorkloadView) -> AppResult<T> + Send + Sync + 'static,
    {
        Hook::Resolver(Arc::new(FnResolver(f)))
    }

    pub async fn resolve(&self, workload: &WorkloadView) -> AppResult<T> {
        match self {
            Hook::Value(value) => Ok(value.clone()),
            Hook::Resolver(resolver) => resolver.resolve(workload).await,
        }
    }
}

impl<T: Clone + Send> Clone for Hook<T> {
    fn clone(&self) -> Self {
        match self {
            Hook::Value(value) => Hook::Value(value.clone()),
            Hook::Resolver(resolver) => Hook::Resolver(Arc::clone(resolver)),
        }
    }
}

impl<T: Default + Send> Default for Hook<T> {
    fn default() -> Self {
        Hook::Value(T::default())
    }
}

impl<T: fmt::Debug + Send> fmt::Debug for Hook<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Hook::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

struct FnResolver<F>(F);

#[async_trait]
impl<T, F> Resolve<T> for FnResolver<F>
where
    T: Send + 'static,
    F: Fn(&WorkloadView) -> AppResult<T> + Send + Sync,
{
    async fn resolve(&self, workload: &WorkloadView) -> AppResult<T> {
        (self.0)(workload)
    }
}

/// Last chance to refuse a start before anything is sent to the outpost.
#[async_trait]
pub trait StartGuard: Send + Sync {
    async fn check(&self, workload: &WorkloadView) -> AppResult<()>;
}

/// Called after the start request to the outpost failed.
#[async_trait]
pub trait StartFailureHook: Send + Sync {
    async fn on_failure(&self, workload: &WorkloadView, error: &AppError);
}

/// Called after the outpost confirmed a start, with its parsed response.
#[async_trait]
pub trait PostStartHook: Send + Sync {
    async fn on_started(&self, workload: &WorkloadView, response: Option<&Value>) -> AppResult<()>;
}

/// Runs before a job's start request; an error ends the job without any
/// remote call.
#[async_trait]
pub trait JobPrepareHook: Send + Sync {
    async fn prepare(&self, workload: &WorkloadView) -> AppResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::errors::invalid_argument;
    use crate::app::types::{Owner, Workload, WorkloadConfig};

    struct PrefixResolver;

    #[async_trait]
    impl Resolve<String> for PrefixResolver {
        async fn resolve(&self, workload: &WorkloadView) -> AppResult<String> {
            tokio::task::yield_now().await;
            Ok(format!("https://outpost.example/{}", workload.owner.name))
        }
    }

    fn view() -> WorkloadView {
        Workload::new("abc", Owner::new(7, "alice"), WorkloadConfig::default()).view()
    }

    #[tokio::test]
    async fn value_hook_returns_constant() {
        let hook = Hook::value(8080u16);
        assert_eq!(hook.resolve(&view()).await.unwrap(), 8080);
    }

    #[tokio::test]
    async fn async_resolver_sees_workload_view() {
        let hook = Hook::resolver(PrefixResolver);
        assert_eq!(
            hook.resolve(&view()).await.unwrap(),
            "https://outpost.example/alice"
        );
    }

    #[tokio::test]
    async fn closure_resolver_can_fail() {
        let hook: Hook<u16> = Hook::from_fn(|workload| {
            if workload.user_options.contains_key("system") {
                Ok(9000)
            } else {
                Err(invalid_argument("system is required"))
            }
        });
        let err = hook.resolve(&view()).await.unwrap_err();
        assert_eq!(err.message(), "system is required");
    }
}
