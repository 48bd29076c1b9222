//! Query formula step insertion
//!
//! Pure text transformations over query formulas: naming a new step,
//! cleaning up a model-produced fragment and splicing it into a formula.
//! No I/O happens in this crate.

pub mod cleanup;
pub mod formula;
pub mod fragment;
pub mod patch;
pub mod step_name;

pub use fragment::{normalize_fragment, FragmentError};
pub use patch::{patch, PatchError, PatchOutcome, PatchReport, PatchStatus};
pub use step_name::{derive, DerivedNames, StepName};
