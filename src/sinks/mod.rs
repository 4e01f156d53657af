pub mod cloudwatch_logs;
pub mod s3;
