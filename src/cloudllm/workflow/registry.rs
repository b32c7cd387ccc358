//! Agent Registry (§3.2, §4.8): resolves the agents visible to a given
//! `(tenant_id, role, department_id)`, applying the role-based tool
//! visibility filter, and caches the result for a configurable TTL.
//!
//! Backed by a `HashMap<String, AgentDescriptor>` plus an insertion-ordered
//! `Vec<String>` of agent ids, the same shape the base crate's
//! `Orchestration`/`Council` registries use for deterministic iteration.

use super::types::{AccessScope, AgentDescriptor, UserRole};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Source of truth for agent definitions within one tenant. The real
/// implementation is an out-of-scope external collaborator (§6.5); this
/// trait is the seam the engine depends on.
#[async_trait]
pub trait AgentSource: Send + Sync {
    /// All agents registered for `tenant_id`, before visibility filtering.
    async fn list_tenant_agents(&self, tenant_id: &str) -> Vec<AgentDescriptor>;
}

/// In-process agent directory: a `list_tenant_agents` backend plus
/// `(tenant_id, role, department_id)`-keyed visibility caching.
pub struct AgentRegistry {
    source: Box<dyn AgentSource>,
    ttl: Duration,
    cache: RwLock<HashMap<CacheKey, (Instant, Vec<AgentDescriptor>)>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    tenant_id: String,
    role: String,
    department_id: Option<String>,
}

impl AgentRegistry {
    /// `ttl` should be at least 5 minutes per §6.5; the engine never enforces
    /// a minimum, it only documents the expectation.
    pub fn new(source: Box<dyn AgentSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Visible agents for this user context, applying §3.2's filter:
    /// - ADMIN sees every agent in the tenant.
    /// - DEPT_* sees its own department plus tools tagged `{public, both}`.
    /// - USER sees only tools tagged `{public, both}` or unset.
    pub async fn get_visible_agents(
        &self,
        tenant_id: &str,
        role: UserRole,
        department_id: Option<&str>,
    ) -> Vec<AgentDescriptor> {
        let key = CacheKey {
            tenant_id: tenant_id.to_string(),
            role: format!("{:?}", role),
            department_id: department_id.map(String::from),
        };

        if let Some((stamped_at, cached)) = self.cache.read().await.get(&key) {
            if stamped_at.elapsed() < self.ttl {
                return cached.clone();
            }
        }

        let all = self.source.list_tenant_agents(tenant_id).await;
        let visible = filter_visible(all, role, department_id);

        self.cache
            .write()
            .await
            .insert(key, (Instant::now(), visible.clone()));
        visible
    }
}

fn filter_visible(
    agents: Vec<AgentDescriptor>,
    role: UserRole,
    department_id: Option<&str>,
) -> Vec<AgentDescriptor> {
    match role {
        UserRole::Maintainer | UserRole::Admin => agents,
        UserRole::DeptAdmin | UserRole::DeptManager => agents
            .into_iter()
            .filter_map(|mut agent| {
                let same_department = department_id
                    .map(|d| agent.department_name == d)
                    .unwrap_or(false);
                if same_department {
                    Some(agent)
                } else {
                    agent.tools.retain(|t| is_publicly_visible(t.access_level));
                    if agent.tools.is_empty() {
                        None
                    } else {
                        Some(agent)
                    }
                }
            })
            .collect(),
        UserRole::User => agents
            .into_iter()
            .filter_map(|mut agent| {
                agent.tools.retain(|t| is_publicly_visible(t.access_level));
                if agent.tools.is_empty() {
                    None
                } else {
                    Some(agent)
                }
            })
            .collect(),
    }
}

fn is_publicly_visible(access_level: Option<AccessScope>) -> bool {
    matches!(
        access_level,
        None | Some(AccessScope::Public) | Some(AccessScope::Both)
    )
}
