// Modules
pub mod arena;
pub mod binning;
pub mod boosting;
pub mod builder;
pub mod config;
pub mod constants;
pub mod criterion;
pub mod data;
pub mod ensemble;
pub mod errors;
pub mod forest;
pub mod grower;
pub mod histogram;
pub mod node;
pub mod oob;
pub mod partition;
pub mod sampler;
pub mod splitter;
pub mod tree;
pub mod utils;

// Individual classes, and functions
pub use boosting::{BoostingConfig, GradientBoostedTrees};
pub use builder::ModelBuilder;
pub use config::{ForestConfig, ModelIO, VariableImportanceMode};
pub use data::Matrix;
pub use ensemble::{ModelVersion, Task, TreeEnsemble};
pub use errors::CanopyError;
pub use forest::RandomForest;
