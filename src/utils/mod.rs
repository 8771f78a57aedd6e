pub mod db_logger;
pub mod self_log;
