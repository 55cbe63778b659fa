//! Node agent: shared state, registration and the composition of the
//! node's scheduled components.

mod node;
mod registrar;
mod state;

pub use node::NodeAgent;
pub use registrar::{REGISTRATION_RETRY_INTERVAL, Registrar, Registration};
pub use state::{Eligibility, NodeState};
