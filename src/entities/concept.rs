// 📑 Concept - the 4 investment-type rows extracted from every report

use crate::text::fold;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Concept {
    #[serde(rename = "Total de Activo")]
    TotalAssets,
    #[serde(rename = "Inversiones Tercerizadas")]
    OutsourcedInvestments,
    #[serde(rename = "Inversion en Titulos Fiduciarios")]
    TrustSecurities,
    #[serde(rename = "Inversion en Fondos Mutuos")]
    MutualFunds,
}

impl Concept {
    pub const ALL: [Concept; 4] = [
        Concept::TotalAssets,
        Concept::OutsourcedInvestments,
        Concept::TrustSecurities,
        Concept::MutualFunds,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Concept::TotalAssets => "Total de Activo",
            Concept::OutsourcedInvestments => "Inversiones Tercerizadas",
            Concept::TrustSecurities => "Inversion en Titulos Fiduciarios",
            Concept::MutualFunds => "Inversion en Fondos Mutuos",
        }
    }

    /// Folded fragment that identifies the concept's label row in a report.
    /// Fragments avoid the accented words that exports often mangle.
    pub fn search_term(&self) -> &'static str {
        match self {
            Concept::TotalAssets => "total de activo",
            Concept::OutsourcedInvestments => "tercerizadas",
            Concept::TrustSecurities => "fiduciarios",
            Concept::MutualFunds => "fondos mutuos",
        }
    }

    /// Concept whose search term appears in a sheet label
    pub fn find_in_label(label: &str) -> Option<Concept> {
        let folded = fold(label);
        Concept::ALL
            .iter()
            .copied()
            .find(|c| folded.contains(c.search_term()))
    }

    /// Resolve a stored label ("Inversión en Títulos Fiduciarios" included)
    pub fn from_label(label: &str) -> Option<Concept> {
        let folded = fold(label);
        Concept::ALL
            .iter()
            .copied()
            .find(|c| fold(c.as_str()) == folded)
            .or_else(|| Concept::find_in_label(label))
    }
}

impl fmt::Display for Concept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
