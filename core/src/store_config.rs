//! Store config registry (§6): on-disk JSON documents keyed by `chain_id`,
//! with a single-hop `extends` relation so sibling layouts (e.g. the two
//! Costco US variants) share a base document and override only what
//! differs.

use crate::regions::RegionMarkers;
use receipt_shared::ReceiptError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

/// The closed set of layout families a store config may select. Adding a
/// sixth chain means adding a variant here, not a stringly-typed lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutFamily {
    CostcoCaDigital,
    CostcoUsDigital,
    CostcoUsPhysical,
    TtSupermarket,
    TraderJoes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Identification {
    pub primary_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default)]
    pub skew_correction: bool,
    #[serde(default = "default_epsilon")]
    pub row_epsilon: f64,
    #[serde(default)]
    pub split_on_second_amount: bool,
}

fn default_epsilon() -> f64 {
    0.01
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemsLayout {
    #[serde(default)]
    pub amount_suffixes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Items {
    #[serde(default)]
    pub section_headers: Vec<String>,
    #[serde(default)]
    pub layout: ItemsLayout,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WashData {
    #[serde(default)]
    pub fee_row_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tolerances {
    #[serde(default = "default_math_tolerance")]
    pub math_tolerance: f64,
    #[serde(default = "default_sum_tolerance")]
    pub sum_tolerance: f64,
}

fn default_math_tolerance() -> f64 {
    receipt_shared::money::MATH_TOLERANCE
}

fn default_sum_tolerance() -> f64 {
    receipt_shared::money::SUM_TOLERANCE
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            math_tolerance: default_math_tolerance(),
            sum_tolerance: default_sum_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Validation {
    #[serde(default)]
    pub tolerances: Tolerances,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionMarkerPatterns {
    pub member: Option<String>,
    pub subtotal: Option<String>,
    pub tax: Option<String>,
    pub total: Option<String>,
    pub items_sold: Option<String>,
}

/// One store's on-disk configuration, after resolving its `extends` chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub chain_id: String,
    pub layout_family: LayoutFamily,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub identification: Identification,
    #[serde(default)]
    pub pipeline: Pipeline,
    #[serde(default)]
    pub items: Items,
    #[serde(default)]
    pub wash_data: WashData,
    #[serde(default)]
    pub validation: Validation,
    #[serde(default)]
    pub region_markers: RegionMarkerPatterns,
}

impl StoreConfig {
    /// Compiles this config's marker overrides on top of the defaults.
    pub fn compile_markers(&self) -> Result<RegionMarkers, ReceiptError> {
        let defaults = RegionMarkers::default_markers();
        let compile = |pattern: &Option<String>, fallback: &Regex| -> Result<Regex, ReceiptError> {
            match pattern {
                Some(p) => Regex::new(p).map_err(|e| ReceiptError::StoreConfig(e.to_string())),
                None => Ok(fallback.clone()),
            }
        };
        Ok(RegionMarkers {
            member: compile(&self.region_markers.member, &defaults.member)?,
            subtotal: compile(&self.region_markers.subtotal, &defaults.subtotal)?,
            tax: compile(&self.region_markers.tax, &defaults.tax)?,
            total: compile(&self.region_markers.total, &defaults.total)?,
            items_sold: compile(&self.region_markers.items_sold, &defaults.items_sold)?,
        })
    }
}

/// In-memory registry of store configs, loaded from a directory of JSON
/// documents. Access is synchronized so `reload()` can swap the whole table
/// without callers observing a half-updated state.
pub struct StoreConfigRegistry {
    configs: RwLock<HashMap<String, StoreConfig>>,
    source_dir: std::path::PathBuf,
}

impl StoreConfigRegistry {
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self, ReceiptError> {
        let dir = dir.as_ref().to_path_buf();
        let configs = load_all(&dir)?;
        Ok(Self {
            configs: RwLock::new(configs),
            source_dir: dir,
        })
    }

    /// Looks up a resolved config by chain id.
    pub fn get(&self, chain_id: &str) -> Option<StoreConfig> {
        self.configs.read().expect("store config lock poisoned").get(chain_id).cloned()
    }

    /// Looks up a config by matching `merchant_name` (case-insensitively)
    /// against `identification.primary_name` or any alias. Used when a
    /// receipt's OCR output carries a merchant name but no chain id.
    pub fn resolve_by_merchant_name(&self, merchant_name: &str) -> Option<StoreConfig> {
        let needle = merchant_name.to_lowercase();
        self.configs
            .read()
            .expect("store config lock poisoned")
            .values()
            .find(|config| {
                config.identification.primary_name.to_lowercase() == needle
                    || config.identification.aliases.iter().any(|alias| alias.to_lowercase() == needle)
            })
            .cloned()
    }

    /// Re-reads every document under the source directory, replacing the
    /// table atomically. Leaves the previous table in place on error.
    pub fn reload(&self) -> Result<(), ReceiptError> {
        let fresh = load_all(&self.source_dir)?;
        *self.configs.write().expect("store config lock poisoned") = fresh;
        Ok(())
    }
}

fn load_all(dir: &Path) -> Result<HashMap<String, StoreConfig>, ReceiptError> {
    let mut raw_docs: HashMap<String, Value> = HashMap::new();

    let entries = std::fs::read_dir(dir).map_err(|e| ReceiptError::StoreConfig(format!("{}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| ReceiptError::StoreConfig(e.to_string()))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let text = std::fs::read_to_string(&path).map_err(|e| ReceiptError::StoreConfig(format!("{}: {e}", path.display())))?;
        let doc: Value = serde_json::from_str(&text).map_err(|e| ReceiptError::StoreConfig(format!("{}: {e}", path.display())))?;
        let chain_id = doc
            .get("chain_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ReceiptError::StoreConfig(format!("{}: missing chain_id", path.display())))?
            .to_string();
        raw_docs.insert(chain_id, doc);
    }

    let mut resolved = HashMap::new();
    for (chain_id, doc) in &raw_docs {
        let merged = resolve_extends(doc, &raw_docs)?;
        let config: StoreConfig = serde_json::from_value(merged).map_err(|e| ReceiptError::StoreConfig(format!("{chain_id}: {e}")))?;
        resolved.insert(chain_id.clone(), config);
    }
    Ok(resolved)
}

/// Resolves a single-hop `extends`: the base document's fields are
/// shallow-merged under the child's, so the child wins on every key it
/// sets. `extends` is documented as single-hop — a base naming its own
/// `extends` is an error, not a chain to walk further.
fn resolve_extends(doc: &Value, all: &HashMap<String, Value>) -> Result<Value, ReceiptError> {
    let Some(base_id) = doc.get("extends").and_then(Value::as_str) else {
        return Ok(doc.clone());
    };
    let base = all
        .get(base_id)
        .ok_or_else(|| ReceiptError::StoreConfig(format!("extends target '{base_id}' not found")))?;
    if base.get("extends").and_then(Value::as_str).is_some() {
        return Err(ReceiptError::StoreConfig(format!("'{base_id}' cannot itself extend another config (single-hop only)")));
    }
    Ok(merge_shallow(base.clone(), doc.clone()))
}

fn merge_shallow(mut base: Value, overlay: Value) -> Value {
    if let (Some(base_map), Some(overlay_map)) = (base.as_object_mut(), overlay.as_object()) {
        for (k, v) in overlay_map {
            base_map.insert(k.clone(), v.clone());
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_shallow_overlay_wins() {
        let base = json!({"a": 1, "b": 2});
        let overlay = json!({"b": 3, "c": 4});
        let merged = merge_shallow(base, overlay);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 3);
        assert_eq!(merged["c"], 4);
    }

    #[test]
    fn test_resolve_extends_rejects_double_hop() {
        let mut all = HashMap::new();
        all.insert("grandparent".to_string(), json!({"chain_id": "grandparent"}));
        all.insert("parent".to_string(), json!({"chain_id": "parent", "extends": "grandparent"}));
        let child = json!({"chain_id": "child", "extends": "parent"});
        let err = resolve_extends(&child, &all).unwrap_err();
        assert!(matches!(err, ReceiptError::StoreConfig(_)));
    }

    #[test]
    fn test_compile_markers_falls_back_to_defaults_when_unset() {
        let config = StoreConfig {
            chain_id: "test".to_string(),
            layout_family: LayoutFamily::TraderJoes,
            extends: None,
            identification: Identification::default(),
            pipeline: Pipeline::default(),
            items: Items::default(),
            wash_data: WashData::default(),
            validation: Validation::default(),
            region_markers: RegionMarkerPatterns::default(),
        };
        let markers = config.compile_markers().unwrap();
        assert!(markers.member.is_match("MEMBER 123"));
    }

    #[test]
    fn test_resolve_by_merchant_name_matches_alias_case_insensitively() {
        let registry = StoreConfigRegistry {
            configs: RwLock::new(HashMap::from([(
                "trader_joes".to_string(),
                StoreConfig {
                    chain_id: "trader_joes".to_string(),
                    layout_family: LayoutFamily::TraderJoes,
                    extends: None,
                    identification: Identification {
                        primary_name: "TRADER JOE'S".to_string(),
                        aliases: vec!["Trader Joes".to_string()],
                    },
                    pipeline: Pipeline::default(),
                    items: Items::default(),
                    wash_data: WashData::default(),
                    validation: Validation::default(),
                    region_markers: RegionMarkerPatterns::default(),
                },
            )])),
            source_dir: std::path::PathBuf::new(),
        };
        let found = registry.resolve_by_merchant_name("trader joes").unwrap();
        assert_eq!(found.chain_id, "trader_joes");
        assert!(registry.resolve_by_merchant_name("costco").is_none());
    }
}
