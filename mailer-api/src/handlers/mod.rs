pub mod jobs;
pub mod send_email;
