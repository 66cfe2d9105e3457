pub mod engine;
pub mod error;
pub mod invariants;
pub mod model;
pub mod resolver;
pub mod synthesizer;

pub use engine::{CommandEngine, CommandPhase, CreateVirtualHost, EngineTimeouts, UpdateMapping};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use invariants::{CascadeSet, InvariantValidator};
pub use resolver::MappingResolver;
pub use synthesizer::{ArtifactSet, ConfigArtifact, ConfigSynthesizer};
