pub mod cleanup;
pub mod collect;
pub mod repro;
pub mod run;
pub mod summarize;
pub mod watch;
