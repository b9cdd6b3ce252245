//! Process specification: typed models, YAML loader, validators and the
//! mixed-space encoder.

pub mod encoder;
pub mod loader;
pub mod models;
pub mod validators;

pub use encoder::MixedSpaceEncoder;
pub use loader::{load_process_spec, load_process_spec_from_file};
pub use models::{
    ConstraintsSpec, Direction, InputConstraintSpec, InputSpec, ObjectiveSpec,
    OutcomeConstraintSpec, PreferenceKind, PreferenceSpec, ProcessSpec, StrategySpec,
};
pub use validators::validate_process_spec;
