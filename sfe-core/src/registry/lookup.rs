//! Compatibility lookup
//!
//! `find_compatible` answers "which stored filters turn X into Y". The type
//! patterns are matched against the group descriptors in SQL; an optional
//! sample value then narrows the candidates to filters that accept it (as
//! input) or could have produced it (as output).
//!
//! Both steps are cached on the registry: pattern pair → candidate ids, and
//! pattern pair + sample type signature + direction → matching ids. Results
//! are always freshly loaded filters, so callers own what they get back.

use super::PersistableFilterRegistry;
use crate::db;
use crate::error::Result;
use crate::filter::{Filter, FilterId};
use crate::value::Value;
use tracing::debug;

/// Which end of the filter the sample is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleDirection {
    Input,
    Output,
}

pub(super) type GlobKey = (String, String);
pub(super) type SampleKey = (String, String, String, SampleDirection);

/// `*` as a wildcard for SQL `LIKE` (`%` and `_` pass through)
fn glob_to_like(glob: &str) -> String {
    glob.replace('*', "%")
}

impl PersistableFilterRegistry {
    /// Non-template top-level filters whose group types match the patterns
    ///
    /// Patterns are case-insensitive; `*` and `%` match any run of
    /// characters. Filters whose runtime requirements are not met in this
    /// registry's environment are left out.
    pub async fn find_compatible(
        &self,
        input_glob: &str,
        output_glob: &str,
        sample: Option<(&Value, SampleDirection)>,
    ) -> Result<Vec<Filter>> {
        let glob_key: GlobKey = (input_glob.to_string(), output_glob.to_string());
        let candidates = self.candidates(&glob_key).await?;

        let ids = match sample {
            None => candidates,
            Some((value, direction)) => {
                let key: SampleKey = (
                    glob_key.0.clone(),
                    glob_key.1.clone(),
                    value.type_signature(),
                    direction,
                );
                self.sample_matches(key, &candidates, value, direction).await?
            }
        };

        let mut compatible = Vec::with_capacity(ids.len());
        for id in ids {
            let mut filter = self.load(id).await?;
            if filter.is_compatible_with_environment() {
                compatible.push(filter);
            } else {
                debug!("Filter {} skipped: runtime requirements not met", id);
            }
        }
        Ok(compatible)
    }

    async fn candidates(&self, key: &GlobKey) -> Result<Vec<FilterId>> {
        if let Some(ids) = self.glob_cache.read().await.get(key) {
            return Ok(ids.clone());
        }

        let ids =
            db::find_filter_ids_by_types(&self.pool, &glob_to_like(&key.0), &glob_to_like(&key.1))
                .await?;
        debug!("Type lookup {} => {}: {} candidate(s)", key.0, key.1, ids.len());
        self.glob_cache
            .write()
            .await
            .insert(key.clone(), ids.clone());
        Ok(ids)
    }

    async fn sample_matches(
        &self,
        key: SampleKey,
        candidates: &[FilterId],
        sample: &Value,
        direction: SampleDirection,
    ) -> Result<Vec<FilterId>> {
        if let Some(ids) = self.sample_cache.read().await.get(&key) {
            return Ok(ids.clone());
        }

        let mut ids = Vec::new();
        for id in candidates {
            let filter = self.load(*id).await?;
            let accepted = match direction {
                SampleDirection::Input => filter.input_type().matches(sample),
                SampleDirection::Output => filter.output_type().matches(sample),
            };
            if accepted {
                ids.push(*id);
            }
        }
        self.sample_cache.write().await.insert(key, ids.clone());
        Ok(ids)
    }

    /// Number of cached entries (pattern level, sample level)
    pub async fn cache_sizes(&self) -> (usize, usize) {
        (
            self.glob_cache.read().await.len(),
            self.sample_cache.read().await.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_to_like() {
        assert_eq!(glob_to_like("class::*Submission"), "class::%Submission");
        assert_eq!(glob_to_like("primitive::%"), "primitive::%");
    }
}
