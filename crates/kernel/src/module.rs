use async_trait::async_trait;
use axum::Router;

use crate::settings::Settings;

/// Handed to every lifecycle hook.
pub struct InitCtx<'a> {
    pub settings: &'a Settings,
}

/// SQL migration contributed by a module.
///
/// The hosted store applies these with its own tooling; the kernel only
/// collects and orders them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub id: &'static str,
    pub up: &'static str,
}

/// A feature area of the service: its routes, docs, schema and lifecycle.
///
/// Routes are mounted under `/api/{name}`. Lifecycle hooks run in
/// registration order, `stop` in reverse.
#[async_trait]
pub trait Module: Sync + Send {
    fn name(&self) -> &'static str;

    fn routes(&self) -> Router;

    async fn init(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// OpenAPI fragment with module-relative paths; merged at router build.
    fn openapi(&self) -> Option<serde_json::Value> {
        None
    }

    /// In application order.
    fn migrations(&self) -> Vec<Migration> {
        Vec::new()
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
