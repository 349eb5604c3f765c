pub mod machine;
pub mod model;

pub use machine::{ChargeSession, ChargeStep, DischargeSession, DischargeStep};
pub use model::{ChargeStage, ConfigError, CyclePhase, SessionConfig};
