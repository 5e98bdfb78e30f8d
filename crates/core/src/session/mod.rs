pub mod infrastructure;
pub mod session_engine;
pub mod session_logger;
pub mod session_message;
pub mod session_state;
