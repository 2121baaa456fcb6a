pub mod states;
pub mod params;
pub mod error;
pub mod rng;
pub mod barnes_hut;
pub mod forces;
pub mod integrator;
pub mod encounter;
pub mod collision;
pub mod events;
pub mod diagnostics;
pub mod checkpoint;
pub mod world;
pub mod scenario;
