// 🏷️ Category (Siefore) - 11 canonical fund classifications
//
// Historical exports label the same fund in many ways:
//   "Basica 55-59", "Básica 55-59", "SB 55-59", "Siefore Básica de Pensiones"
// All of them collapse to one canonical label before deduplication, so an
// aliased record and a canonical record with the same key collide.

use crate::text::fold;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// CATEGORY
// ============================================================================

/// Canonical Siefore label. Declaration order is the canonical sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Pensiones")]
    Pensiones,
    #[serde(rename = "Inicial")]
    Inicial,
    #[serde(rename = "55-59")]
    Gen55_59,
    #[serde(rename = "60-64")]
    Gen60_64,
    #[serde(rename = "65-69")]
    Gen65_69,
    #[serde(rename = "70-74")]
    Gen70_74,
    #[serde(rename = "75-79")]
    Gen75_79,
    #[serde(rename = "80-84")]
    Gen80_84,
    #[serde(rename = "85-89")]
    Gen85_89,
    #[serde(rename = "90-94")]
    Gen90_94,
    #[serde(rename = "95-99")]
    Gen95_99,
}

impl Category {
    pub const ALL: [Category; 11] = [
        Category::Pensiones,
        Category::Inicial,
        Category::Gen55_59,
        Category::Gen60_64,
        Category::Gen65_69,
        Category::Gen70_74,
        Category::Gen75_79,
        Category::Gen80_84,
        Category::Gen85_89,
        Category::Gen90_94,
        Category::Gen95_99,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Pensiones => "Pensiones",
            Category::Inicial => "Inicial",
            Category::Gen55_59 => "55-59",
            Category::Gen60_64 => "60-64",
            Category::Gen65_69 => "65-69",
            Category::Gen70_74 => "70-74",
            Category::Gen75_79 => "75-79",
            Category::Gen80_84 => "80-84",
            Category::Gen85_89 => "85-89",
            Category::Gen90_94 => "90-94",
            Category::Gen95_99 => "95-99",
        }
    }

    /// Exact match on the canonical label (case and accents ignored)
    pub fn from_canonical(label: &str) -> Option<Category> {
        let folded = compact_ranges(&fold(label));
        Category::ALL
            .iter()
            .copied()
            .find(|c| fold(c.as_str()) == folded)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ALIAS RESOLUTION
// ============================================================================

/// Deprecated prefixes, longest first, stripped before the canonical lookup
static DEPRECATED_PREFIXES: &[&str] = &[
    "siefore basica de ",
    "siefore basica ",
    "siefore ",
    "basica de ",
    "basica ",
    "sb ",
];

/// "55 - 59" → "55-59"
fn compact_ranges(folded: &str) -> String {
    folded.replace(" - ", "-").replace("- ", "-").replace(" -", "-")
}

/// Resolves raw labels to canonical categories.
///
/// Built-in rules cover the deprecated prefix forms; extra one-off aliases can
/// be registered (e.g. from configuration).
pub struct CategoryRegistry {
    /// folded alias → category
    aliases: HashMap<String, Category>,
}

impl CategoryRegistry {
    /// Create registry with no extra aliases
    pub fn new() -> Self {
        CategoryRegistry {
            aliases: HashMap::new(),
        }
    }

    /// Create registry with the historical aliases that cannot be derived by
    /// prefix stripping
    pub fn with_defaults() -> Self {
        let mut registry = CategoryRegistry::new();
        registry.register_alias("SB Pensiones", Category::Pensiones);
        registry.register_alias("SB0", Category::Pensiones);
        registry.register_alias("Basica Inicial", Category::Inicial);
        registry.register_alias("SB Inicial", Category::Inicial);
        registry
    }

    pub fn register_alias(&mut self, alias: &str, category: Category) {
        self.aliases.insert(compact_ranges(&fold(alias)), category);
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    /// Resolve a raw label; `None` means the label needs manual review
    pub fn resolve(&self, label: &str) -> Option<Category> {
        let folded = compact_ranges(&fold(label));
        if folded.is_empty() {
            return None;
        }

        if let Some(category) = self.aliases.get(&folded) {
            return Some(*category);
        }

        if let Some(category) = Category::from_canonical(&folded) {
            return Some(category);
        }

        DEPRECATED_PREFIXES
            .iter()
            .find_map(|prefix| folded.strip_prefix(prefix))
            .and_then(Category::from_canonical)
    }
}

impl Default for CategoryRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
