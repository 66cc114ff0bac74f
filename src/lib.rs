pub mod agents;
pub mod config;
pub mod doctor;
pub mod procs;
pub mod scheduler;
pub mod supervisor;
pub mod tmux;
pub mod workspace;
