// 🗂️ Report identifiers - one spreadsheet per category
//
// Reporte-16.xlsx → Pensiones ... Reporte-26.xlsx → 95-99

use super::Category;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Report-number → category map (static configuration)
static REPORT_MAP: &[(u32, Category)] = &[
    (16, Category::Pensiones),
    (17, Category::Inicial),
    (18, Category::Gen55_59),
    (19, Category::Gen60_64),
    (20, Category::Gen65_69),
    (21, Category::Gen70_74),
    (22, Category::Gen75_79),
    (23, Category::Gen80_84),
    (24, Category::Gen85_89),
    (25, Category::Gen90_94),
    (26, Category::Gen95_99),
];

/// A mapped report number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReportId(u32);

impl ReportId {
    /// Mapped report number, or `None` if the number has no category
    pub fn new(number: u32) -> Option<ReportId> {
        REPORT_MAP
            .iter()
            .any(|(n, _)| *n == number)
            .then_some(ReportId(number))
    }

    /// All mapped reports in ascending order
    pub fn all() -> Vec<ReportId> {
        REPORT_MAP.iter().map(|(n, _)| ReportId(*n)).collect()
    }

    pub fn number(&self) -> u32 {
        self.0
    }

    pub fn category(&self) -> Category {
        REPORT_MAP
            .iter()
            .find(|(n, _)| *n == self.0)
            .map(|(_, c)| *c)
            .unwrap_or(Category::Pensiones)
    }

    /// Conventional file name, e.g. `Reporte-18.xlsx`
    pub fn file_name(&self) -> String {
        format!("Reporte-{}.xlsx", self.0)
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reporte-{}", self.0)
    }
}

/// Report number embedded in a file name such as `Reporte-18.xlsx` or
/// `reporte_18.XLSX`. Unmapped numbers still come back here so the caller can
/// name them in a diagnostic.
pub fn report_number_from_path(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?.to_lowercase();
    let rest = stem.strip_prefix("reporte")?;
    let digits = rest.trim_start_matches(|c| c == '-' || c == '_' || c == ' ');
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_map_covers_all_categories() {
        let categories: Vec<Category> = ReportId::all().iter().map(|r| r.category()).collect();
        assert_eq!(categories, Category::ALL.to_vec());
    }

    #[test]
    fn test_unmapped_numbers() {
        assert!(ReportId::new(15).is_none());
        assert!(ReportId::new(27).is_none());
        assert_eq!(ReportId::new(18).map(|r| r.category()), Some(Category::Gen55_59));
    }

    #[test]
    fn test_number_from_path() {
        assert_eq!(report_number_from_path(Path::new("/data/Reporte-18.xlsx")), Some(18));
        assert_eq!(report_number_from_path(Path::new("reporte_26.XLSX")), Some(26));
        assert_eq!(report_number_from_path(Path::new("Reporte-99.xlsx")), Some(99));
        assert_eq!(report_number_from_path(Path::new("summary.xlsx")), None);
    }
}
