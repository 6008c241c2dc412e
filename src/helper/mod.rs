pub mod auth_helpers;
pub mod mailer;
pub mod media_helpers;
