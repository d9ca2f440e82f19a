pub mod email_job;
pub mod email_log;
pub mod email_template;
pub mod email_unsubscribe;
