//! Taskpush worker: consumes the database change feed and fires push
//! notifications.

pub mod listener;
