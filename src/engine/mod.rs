pub mod locate;
pub mod locate_fsm;
pub mod monitor;
pub mod replication;
