use crate::cache::ReferenceCache;
use crate::config::DEFAULT_SENTINEL_CODE;
use crate::index::ReferenceIndex;
use crate::models::{Level, Outcome, Resolution};
use crate::normalize::{normalize, normalize_opt};
use crate::stats::{AuditSnapshot, ResolutionStats};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Returned for municipality names that match nothing
    pub sentinel_code: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            sentinel_code: DEFAULT_SENTINEL_CODE.to_string(),
        }
    }
}

/// Resolves free-text place names to administrative codes against the cache's
/// current index. Safe to share across threads; every call reads one snapshot.
pub struct CodeResolver {
    cache: Arc<ReferenceCache>,
    config: ResolverConfig,
    stats: ResolutionStats,
}

impl CodeResolver {
    pub fn new(cache: Arc<ReferenceCache>) -> Self {
        Self::with_config(cache, ResolverConfig::default())
    }

    pub fn with_config(cache: Arc<ReferenceCache>, config: ResolverConfig) -> Self {
        Self {
            cache,
            config,
            stats: ResolutionStats::new(),
        }
    }

    pub fn cache(&self) -> &ReferenceCache {
        &self.cache
    }

    pub fn stats(&self) -> &ResolutionStats {
        &self.stats
    }

    pub fn audit(&self) -> AuditSnapshot {
        self.stats.snapshot()
    }

    /// Invalidates the cache explicitly. True if a new index was published.
    pub fn force_reload(&self) -> bool {
        self.cache.force_reload()
    }

    /// Resolves `raw_name` at `level`, using `parent_context` (a municipality
    /// name) to disambiguate townships and urban centers.
    ///
    /// Unresolved names are a normal outcome: the returned [`Resolution`] has no
    /// code. Without reference data every call is unresolved.
    pub fn resolve(&self, level: Level, raw_name: &str, parent_context: Option<&str>) -> Resolution {
        let resolution = match self.cache.get_index(false) {
            Some(index) => self.match_in(&index, level, raw_name, parent_context),
            None => Resolution::unresolved(),
        };
        self.audit_call(level, raw_name, &resolution);
        resolution
    }

    /// Same lookup chain against a caller-supplied index, bypassing the cache.
    pub fn resolve_with(
        &self,
        index: &ReferenceIndex,
        level: Level,
        raw_name: &str,
        parent_context: Option<&str>,
    ) -> Resolution {
        let resolution = self.match_in(index, level, raw_name, parent_context);
        self.audit_call(level, raw_name, &resolution);
        resolution
    }

    fn match_in(
        &self,
        index: &ReferenceIndex,
        level: Level,
        raw_name: &str,
        parent_context: Option<&str>,
    ) -> Resolution {
        let Some(name) = normalize(raw_name) else {
            return Resolution::unresolved();
        };
        let parent = normalize_opt(parent_context);

        if let Some((code, outcome)) = lookup(index, level, &name, parent.as_deref()) {
            return Resolution::matched(code, outcome);
        }

        match level {
            Level::Municipality => {
                Resolution::matched(self.config.sentinel_code.as_str(), Outcome::Sentinel)
            }
            _ => Resolution::unresolved(),
        }
    }

    fn audit_call(&self, level: Level, raw_name: &str, resolution: &Resolution) {
        self.stats.record(resolution.outcome);
        match resolution.outcome {
            Outcome::Exact | Outcome::Context => trace!(
                target: "divipola::audit",
                level = %level,
                query = raw_name,
                outcome = %resolution.outcome,
                code = resolution.code().unwrap_or_default(),
                "Resolved"
            ),
            _ => debug!(
                target: "divipola::audit",
                level = %level,
                query = raw_name,
                outcome = %resolution.outcome,
                code = resolution.code().unwrap_or_default(),
                "Resolved by fallback"
            ),
        }
    }
}

/// The matching part of the chain: context-scoped exact, global exact, then the
/// first containment match in file order. `name` and `parent` must be normalized.
pub fn lookup<'a>(
    index: &'a ReferenceIndex,
    level: Level,
    name: &str,
    parent: Option<&str>,
) -> Option<(&'a str, Outcome)> {
    if level.is_parent_qualified() {
        if let Some(code) = parent.and_then(|p| index.child_code(p, name)) {
            return Some((code, Outcome::Context));
        }
    }

    if let Some(code) = index.code_for(name) {
        return Some((code, Outcome::Exact));
    }

    index
        .records(level)
        .iter()
        .find(|candidate| candidate.name.contains(name) || name.contains(candidate.name.as_str()))
        .map(|candidate| (candidate.code.as_str(), Outcome::Fuzzy))
}
