pub mod coordinator;
pub mod fanout;
pub mod state_machine;
