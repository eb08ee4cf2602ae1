use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::types::EntityId;

/// An authoritative record names are resolved against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CanonicalEntity {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Lowercased, trimmed view of one entity, precomputed once.
#[derive(Debug, Clone)]
pub(crate) struct Folded {
    pub id: EntityId,
    pub name: String,
    pub name_chars: usize,
}

/// Read-only snapshot of canonical entities.
///
/// Built once per run and shared behind an `Arc`; nothing in the pipeline
/// mutates it.
#[derive(Debug, Clone, Default)]
pub struct CanonicalRegistry {
    entities: Vec<CanonicalEntity>,
    folded: Vec<Folded>,
    by_name: HashMap<String, EntityId>,
    by_alias: HashMap<String, EntityId>,
}

pub(crate) fn fold(s: &str) -> String {
    s.trim().to_lowercase()
}

impl CanonicalRegistry {
    pub fn new(mut entities: Vec<CanonicalEntity>) -> Self {
        // Lowest id first so duplicate names and shared aliases go to the oldest entity.
        entities.sort_by_key(|e| e.id);

        let mut folded = Vec::with_capacity(entities.len());
        let mut by_name = HashMap::new();
        let mut by_alias = HashMap::new();

        for entity in &entities {
            let name = fold(&entity.name);
            if !name.is_empty() {
                by_name.entry(name.clone()).or_insert(entity.id);
                folded.push(Folded {
                    id: entity.id,
                    name_chars: name.chars().count(),
                    name,
                });
            }
            for alias in &entity.aliases {
                let alias = fold(alias);
                if !alias.is_empty() {
                    by_alias.entry(alias).or_insert(entity.id);
                }
            }
        }

        Self {
            entities,
            folded,
            by_name,
            by_alias,
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> &[CanonicalEntity] {
        &self.entities
    }

    pub fn get(&self, id: EntityId) -> Option<&CanonicalEntity> {
        self.entities
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|i| &self.entities[i])
    }

    pub(crate) fn exact(&self, folded: &str) -> Option<EntityId> {
        self.by_name.get(folded).copied()
    }

    pub(crate) fn alias(&self, folded: &str) -> Option<EntityId> {
        self.by_alias.get(folded).copied()
    }

    pub(crate) fn folded(&self) -> &[Folded] {
        &self.folded
    }

    /// GPU models from the `gpu` table.
    pub async fn load_gpus(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let rows = sqlx::query_as::<_, CanonicalEntity>(
            "SELECT id, name, aliases FROM gpu ORDER BY id",
        )
        .fetch_all(pool)
        .await?;

        tracing::info!(entities = rows.len(), "Loaded GPU registry");
        Ok(Self::new(rows))
    }

    /// Power plants keyed by EIA plant code, with `"<name> (<state>)"` as alias.
    pub async fn load_power_plants(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let rows = sqlx::query_as::<_, (EntityId, String, String, Option<String>)>(
            "SELECT id, api_plant_id, name, state FROM eia_power_plants ORDER BY id",
        )
        .fetch_all(pool)
        .await?;

        let entities: Vec<CanonicalEntity> = rows
            .into_iter()
            .map(|(id, plant_code, name, state)| CanonicalEntity {
                id,
                name: plant_code,
                aliases: vec![plant_alias(&name, state.as_deref())],
            })
            .collect();

        tracing::info!(entities = entities.len(), "Loaded power plant registry");
        Ok(Self::new(entities))
    }

    /// Offline registry from a JSON array of `{id, name, aliases}`.
    pub fn from_json_file(path: &Path) -> Result<Self, RegistryFileError> {
        let content = std::fs::read_to_string(path).map_err(|source| RegistryFileError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let entities: Vec<CanonicalEntity> =
            serde_json::from_str(&content).map_err(|source| RegistryFileError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self::new(entities))
    }
}

/// Alias under which a plant is matched when a row carries no plant code.
pub fn plant_alias(name: &str, state: Option<&str>) -> String {
    match state {
        Some(state) if !state.trim().is_empty() => format!("{} ({})", name.trim(), state.trim()),
        _ => name.trim().to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryFileError {
    #[error("failed to read registry file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse registry file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
