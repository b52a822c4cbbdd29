pub mod backup_scheduler;
pub mod backups;
pub mod catalog;
pub mod dumper;
pub mod restore;
pub mod retention;
pub mod tool;
