pub mod assignment_service;
pub mod channel_service;
pub mod grading_service;
pub mod monitor_service;
pub mod proctor_log_service;
pub mod signaling_service;
pub mod storage_service;
