pub mod simulation;
pub mod configuration;
pub mod network;
pub mod benchmark;

pub use simulation::states::{Body, BodyId, BodyKind, BodySpec, IntegratorMode, NVec3, SessionId};
pub use simulation::params::{CollisionMode, SimConfig, SolverKind};
pub use simulation::error::{SimError, SimResult};
pub use simulation::rng::DeterministicRng;
pub use simulation::world::{SimulationWorld, StepReport};
pub use simulation::checkpoint::Checkpoint;
pub use simulation::events::SimEvent;
pub use simulation::scenario::{Preset, Scenario};

pub use configuration::config::{BodyConfig, ConfigError, ScenarioConfig, ServerConfig};

pub use network::protocol::{ClientMessage, ProtocolError, ServerMessage, PROTOCOL_VERSION};
pub use network::codec::{decode_positions, encode_positions, PositionFrame};
pub use network::server::AuthoritativeServer;

pub use benchmark::benchmark::{bench_gravity, bench_step, bench_step_curve};
