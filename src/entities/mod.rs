// Closed vocabularies of the holdings dataset
//
// Every canonical record is labelled from these three tables:
// - Category (Siefore): 11 fund classifications, plus historical aliases
// - Concept: 4 investment-type rows extracted from each report
// - ReportId: static report-number → category map

pub mod category;
pub mod concept;
pub mod report;

pub use category::{Category, CategoryRegistry};
pub use concept::Concept;
pub use report::ReportId;
