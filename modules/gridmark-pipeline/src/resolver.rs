use std::sync::Arc;

use crate::registry::{fold, CanonicalRegistry};
use crate::types::EntityId;

/// Which tier of the matching policy produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Exact,
    Alias,
    Partial,
}

impl MatchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchTier::Exact => "exact",
            MatchTier::Alias => "alias",
            MatchTier::Partial => "partial",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub id: EntityId,
    pub tier: MatchTier,
}

/// Maps free-text names to canonical entity ids.
///
/// Tiers are tried in order, first match wins:
/// 1. case-insensitive equality with a primary name
/// 2. case-insensitive equality with any alias
/// 3. the name contains, or is contained by, a primary name; the longest
///    primary name wins, lowest id on a tie
///
/// Empty or whitespace-only names never match.
#[derive(Debug, Clone)]
pub struct Resolver {
    registry: Arc<CanonicalRegistry>,
    partial: bool,
}

impl Resolver {
    pub fn new(registry: Arc<CanonicalRegistry>) -> Self {
        Self {
            registry,
            partial: true,
        }
    }

    /// Disable substring matching. For registries keyed by identifiers.
    pub fn without_partial(mut self) -> Self {
        self.partial = false;
        self
    }

    pub fn registry(&self) -> &CanonicalRegistry {
        &self.registry
    }

    pub fn resolve(&self, raw_name: &str) -> Option<EntityId> {
        self.resolve_with_tier(raw_name).map(|r| r.id)
    }

    pub fn resolve_with_tier(&self, raw_name: &str) -> Option<Resolution> {
        let name = fold(raw_name);
        if name.is_empty() {
            return None;
        }

        if let Some(id) = self.registry.exact(&name) {
            return Some(Resolution {
                id,
                tier: MatchTier::Exact,
            });
        }

        if let Some(id) = self.registry.alias(&name) {
            return Some(Resolution {
                id,
                tier: MatchTier::Alias,
            });
        }

        if !self.partial {
            return None;
        }

        // Folded entries are in ascending id order, so a strict `>` keeps the
        // lowest id among equally long names.
        let mut best: Option<(usize, EntityId)> = None;
        for entry in self.registry.folded() {
            if !(name.contains(entry.name.as_str()) || entry.name.contains(name.as_str())) {
                continue;
            }
            match best {
                Some((len, _)) if entry.name_chars <= len => {}
                _ => best = Some((entry.name_chars, entry.id)),
            }
        }

        best.map(|(_, id)| Resolution {
            id,
            tier: MatchTier::Partial,
        })
    }
}
