//! Template Registry - Store and reuse mappings and rules
//!
//! A template is a named mapping set plus its transformation rules, stored as
//! JSON through a [`Persistence`] backend and matched to new sources by their
//! column names.

pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PersistenceError, PersistenceResult};
use crate::models::MappingSet;
use crate::transform::TransformationRule;

pub use store::{FileStore, MemoryStore, Persistence};

/// Lowest column overlap for a template to count as compatible
const MIN_COMPATIBILITY: f64 = 0.5;

/// Weight of the newest run in the success-rate moving average
const SUCCESS_SMOOTHING: f64 = 0.1;

/// A stored mapping with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingTemplate {
    /// Unique identifier, also the storage key
    pub id: String,
    /// Human-readable name
    pub name: String,
    pub mapping: MappingSet,
    pub rules: Vec<TransformationRule>,
    /// Source columns the template was created for
    pub source_fields: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub use_count: u32,
    /// Smoothed fraction of successfully transformed rows (0.0 to 1.0)
    pub success_rate: f64,
}

/// Registry of templates over a persistence backend
#[derive(Clone)]
pub struct TemplateRegistry {
    store: Arc<dyn Persistence>,
}

impl std::fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRegistry").finish_non_exhaustive()
    }
}

impl TemplateRegistry {
    pub fn new(store: Arc<dyn Persistence>) -> Self {
        Self { store }
    }

    /// Registry backed by a [`MemoryStore`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Save a new template and return it
    pub fn save(
        &self,
        name: &str,
        mapping: MappingSet,
        rules: Vec<TransformationRule>,
        source_fields: Vec<String>,
    ) -> PersistenceResult<MappingTemplate> {
        let template = MappingTemplate {
            id: generate_id(name),
            name: name.to_string(),
            mapping,
            rules,
            source_fields,
            created_at: Utc::now(),
            last_used: None,
            use_count: 0,
            success_rate: 1.0,
        };
        self.write(&template)?;
        tracing::info!(id = %template.id, name, "saved template");
        Ok(template)
    }

    /// Get a template by id
    pub fn get(&self, id: &str) -> PersistenceResult<MappingTemplate> {
        match self.store.load(id)? {
            Some(blob) => Ok(serde_json::from_slice(&blob)?),
            None => Err(PersistenceError::NotFound(id.to_string())),
        }
    }

    /// All templates, ordered by id. Entries that fail to decode are skipped.
    pub fn list(&self) -> PersistenceResult<Vec<MappingTemplate>> {
        let mut templates = Vec::new();
        for key in self.store.keys()? {
            match self.get(&key) {
                Ok(template) => templates.push(template),
                Err(e) => tracing::warn!(key, error = %e, "skipping unreadable template"),
            }
        }
        Ok(templates)
    }

    /// Delete a template
    pub fn delete(&self, id: &str) -> PersistenceResult<()> {
        if self.store.delete(id)? {
            Ok(())
        } else {
            Err(PersistenceError::NotFound(id.to_string()))
        }
    }

    /// Find templates compatible with the given columns.
    ///
    /// Returns templates whose stored columns overlap more than half,
    /// sorted by overlap times success rate (descending).
    pub fn find_compatible(&self, columns: &[String]) -> PersistenceResult<Vec<(MappingTemplate, f64)>> {
        let mut compatible: Vec<_> = self
            .list()?
            .into_iter()
            .filter_map(|t| {
                let score = compatibility(&t.source_fields, columns);
                (score > MIN_COMPATIBILITY).then_some((t, score))
            })
            .collect();

        compatible.sort_by(|a, b| {
            let score_a = a.1 * a.0.success_rate;
            let score_b = b.1 * b.0.success_rate;
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });

        Ok(compatible)
    }

    /// Update statistics after a run with the given success fraction
    pub fn record_use(&self, id: &str, success: f64) -> PersistenceResult<MappingTemplate> {
        let mut template = self.get(id)?;
        let success = if success.is_finite() { success.clamp(0.0, 1.0) } else { 0.0 };
        // Exponential moving average
        template.success_rate = template.success_rate * (1.0 - SUCCESS_SMOOTHING) + success * SUCCESS_SMOOTHING;
        template.last_used = Some(Utc::now());
        template.use_count += 1;
        self.write(&template)?;
        Ok(template)
    }

    fn write(&self, template: &MappingTemplate) -> PersistenceResult<()> {
        let blob = serde_json::to_vec_pretty(template)?;
        self.store.save(&template.id, &blob)
    }
}

/// Fraction of stored columns present (case-insensitively) in `columns`
fn compatibility(stored: &[String], columns: &[String]) -> f64 {
    if stored.is_empty() {
        return 0.0;
    }

    let lower: Vec<String> = columns.iter().map(|c| c.to_lowercase()).collect();
    let match_count = stored
        .iter()
        .filter(|col| lower.contains(&col.to_lowercase()))
        .count();

    match_count as f64 / stored.len() as f64
}

/// Slug of the name plus a random suffix
fn generate_id(name: &str) -> String {
    let slug = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let slug = if slug.is_empty() { "template".to_string() } else { slug };

    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", slug, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StructureDescriptor;
    use tempfile::tempdir;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn save(registry: &TemplateRegistry, name: &str, fields: &[&str]) -> MappingTemplate {
        let input = StructureDescriptor::from_names(fields);
        let mapping = MappingSet::empty(&input, &input);
        let rules = fields.iter().map(|f| TransformationRule::direct(*f)).collect();
        registry.save(name, mapping, rules, columns(fields)).unwrap()
    }

    #[test]
    fn test_compatibility_score() {
        let score = compatibility(&columns(&["ISWC", "Title", "Role"]), &columns(&["ISWC", "Title", "Creator"]));
        assert!((score - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_case_insensitive_match() {
        let score = compatibility(&columns(&["iswc", "TITLE"]), &columns(&["ISWC", "title"]));
        assert!((score - 1.0).abs() < 0.01);
        assert_eq!(compatibility(&[], &columns(&["a"])), 0.0);
    }

    #[test]
    fn test_generate_id() {
        let id = generate_id("Monthly Export (v2)");
        assert!(id.starts_with("monthly-export-v2-"));
        assert!(generate_id("???").starts_with("template-"));
        assert_ne!(generate_id("x"), generate_id("x"));
    }

    #[test]
    fn test_save_get_list_delete() {
        let dir = tempdir().unwrap();
        let registry = TemplateRegistry::new(Arc::new(FileStore::new(dir.path())));

        let saved = save(&registry, "customers", &["name", "email"]);
        assert_eq!(registry.get(&saved.id).unwrap(), saved);
        assert_eq!(registry.list().unwrap().len(), 1);

        // A second registry over the same directory sees the template
        let reopened = TemplateRegistry::new(Arc::new(FileStore::new(dir.path())));
        assert_eq!(reopened.get(&saved.id).unwrap().rules.len(), 2);

        registry.delete(&saved.id).unwrap();
        assert!(matches!(registry.get(&saved.id), Err(PersistenceError::NotFound(_))));
        assert!(matches!(registry.delete(&saved.id), Err(PersistenceError::NotFound(_))));
    }

    #[test]
    fn test_find_compatible_ranks_by_overlap_and_success() {
        let registry = TemplateRegistry::in_memory();
        let full = save(&registry, "full", &["name", "email", "phone"]);
        let partial = save(&registry, "partial", &["name", "email", "city", "zip"]);
        save(&registry, "other", &["sku", "price"]);

        let found = registry.find_compatible(&columns(&["Name", "EMAIL", "phone"])).unwrap();
        let ids: Vec<&str> = found.iter().map(|(t, _)| t.id.as_str()).collect();
        // "partial" overlaps exactly 0.5, which is not enough
        assert_eq!(ids, vec![full.id.as_str()]);

        let found = registry.find_compatible(&columns(&["name", "email", "city"])).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0.id, partial.id);
        assert!((found[0].1 - 0.75).abs() < 1e-9);
        assert_eq!(found[1].0.id, full.id);

        // A poor track record pushes a better overlap down
        for _ in 0..5 {
            registry.record_use(&partial.id, 0.0).unwrap();
        }
        let found = registry.find_compatible(&columns(&["name", "email", "city"])).unwrap();
        assert_eq!(found[0].0.id, full.id);
    }

    #[test]
    fn test_record_use_moving_average() {
        let registry = TemplateRegistry::in_memory();
        let saved = save(&registry, "t", &["a"]);

        let updated = registry.record_use(&saved.id, 0.0).unwrap();
        assert!((updated.success_rate - 0.9).abs() < 1e-9);
        assert_eq!(updated.use_count, 1);
        assert!(updated.last_used.is_some());

        let updated = registry.record_use(&saved.id, 1.0).unwrap();
        assert!((updated.success_rate - 0.91).abs() < 1e-9);
        assert_eq!(registry.get(&saved.id).unwrap().use_count, 2);
    }
}
