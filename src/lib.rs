pub mod config;
pub mod journal;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod notify;
pub mod observability;
pub mod repo;
pub mod scheduler;
pub mod store;
pub mod validator;
pub mod wire;

pub use config::{Config, SchedulingPolicy};
pub use repo::{DayScope, RepoError, Repository};
pub use scheduler::Scheduler;
pub use store::InMemoryStore;
pub use validator::{EngineError, Validator};
