//! Evolves feed-forward-network agents to play grid snake with a genetic
//! algorithm. The game simulation produces the fitness signal; the engine
//! runs the evaluate -> rank -> reproduce cycle; the trainer wraps the
//! engine in a background worker with a pause/stop control surface.

pub mod agent;
pub mod engine;
pub mod game;
pub mod net;
pub mod pos;
pub mod store;
pub mod trainer;

pub use agent::Agent;
pub use engine::{CycleStats, Engine, EngineConfig, FitnessRecord, evaluate_agent};
pub use game::Game;
pub use net::Network;
pub use pos::{Dir, Pos};
pub use trainer::{ProgressSnapshot, Trainer};
