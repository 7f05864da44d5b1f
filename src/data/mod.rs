pub mod models;
pub mod symbol_map;
pub mod series;
pub mod provider;
pub mod simulator;
pub mod downstream;

pub use models::InstrumentSnapshot;
pub use provider::{Feed, ValueProvider};
pub use simulator::{RandomWalk, SimulatedProvider};
pub use downstream::DownstreamProvider;
