pub mod backup_record;
pub mod notification;
