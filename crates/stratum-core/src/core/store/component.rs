//! Language components per layer.

use anyhow::Context;
use rusqlite::{params, OptionalExtension};
use stratum_domain::Component;

use crate::core::errors::Result;

use super::Store;

/// Components observed at one layer of a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerComponents {
    pub layer: String,
    pub components: Vec<Component>,
}

impl Store {
    /// Idempotently records the language components and removed paths of a
    /// layer. The layer row must already exist.
    pub fn insert_layer_components(
        &self,
        name: &str,
        lineage: &str,
        components: &[Component],
        removed_paths: &[String],
    ) -> Result<()> {
        let encoded_components =
            serde_json::to_string(components).context("encoding components")?;
        let encoded_removed =
            serde_json::to_string(removed_paths).context("encoding removed paths")?;
        self.with_immediate_tx(|tx| {
            let layer_id = self.layer_id(tx, name, lineage)?;
            tx.execute(
                "INSERT INTO layer_components(layer_id, components, removed_paths)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(layer_id) DO UPDATE SET components = ?2, removed_paths = ?3",
                params![layer_id, encoded_components, encoded_removed],
            )
            .context("upserting layer components")?;
            Ok(())
        })
    }

    /// Components of the layer's whole ancestor chain, root first.
    ///
    /// A component disappears when any later layer removes its outermost
    /// location (exactly, or as a directory prefix).
    pub fn get_layer_language_components(
        &self,
        name: &str,
        lineage: &str,
    ) -> Result<Vec<LayerComponents>> {
        let conn = self.connection()?;
        let chain = self.chain_of(&conn, name, lineage)?;

        let mut per_layer: Vec<(String, Vec<Component>, Vec<String>)> = Vec::new();
        for row in &chain {
            let loaded: Option<(String, String)> = conn
                .query_row(
                    "SELECT components, removed_paths FROM layer_components WHERE layer_id = ?1",
                    params![row.id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()
                .context("querying layer components")?;
            let (components, removed) = match loaded {
                Some((components, removed)) => (
                    serde_json::from_str(&components).context("decoding components")?,
                    serde_json::from_str(&removed).context("decoding removed paths")?,
                ),
                None => (Vec::new(), Vec::new()),
            };
            per_layer.push((row.name.clone(), components, removed));
        }

        let mut result = Vec::new();
        for (index, (layer, components, _)) in per_layer.iter().enumerate() {
            let surviving: Vec<Component> = components
                .iter()
                .filter(|component| {
                    !per_layer[index + 1..].iter().any(|(_, _, removed)| {
                        removed
                            .iter()
                            .any(|path| removes_location(path, component.outermost_location()))
                    })
                })
                .cloned()
                .collect();
            if !surviving.is_empty() {
                result.push(LayerComponents {
                    layer: layer.clone(),
                    components: surviving,
                });
            }
        }
        Ok(result)
    }
}

fn removes_location(removed_path: &str, location: &str) -> bool {
    location == removed_path
        || location
            .strip_prefix(removed_path)
            .is_some_and(|rest| rest.starts_with('/'))
}
