mod registry;
mod selectors;

pub use registry::{ImageModel, ModelRegistry, ModelSpec};
pub use selectors::{ModelSelection, ModelSelector};
