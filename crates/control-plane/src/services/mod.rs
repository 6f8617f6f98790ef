pub mod backups;
pub mod lifecycle;
pub mod pipeline;
pub mod reaper;
