mod app_state;
mod history_store;
mod session;

pub use app_state::{AgentPhase, AgentState};
pub use history_store::HistoryStore;
pub use session::{resolve_session, SessionId};
