use crate::config::Config;

/// Outbound mail sender.
///
/// Delivery is fire-and-forget from the caller's point of view: requests
/// that trigger a message never fail because the message could not be
/// sent. The current transport writes the message to the application log,
/// which is enough for local development and keeps the call sites honest.
#[derive(Clone)]
pub struct Mailer {
    from_address: String,
}

impl Mailer {
    pub fn new(from_address: &str) -> Self {
        Mailer {
            from_address: from_address.to_string(),
        }
    }

    pub fn send(&self, to: &str, subject: &str, body: &str) {
        log::info!(
            "Outbound mail from={} to={} subject={:?}\n{}",
            self.from_address,
            to,
            subject,
            body
        );
    }

    pub fn send_verification_email(&self, config: &Config, to: &str, token: &str) {
        let (subject, body) = compose_verification_email(&config.public_base_url, token);
        self.send(to, &subject, &body);
    }
}

fn compose_verification_email(base_url: &str, token: &str) -> (String, String) {
    let link = format!("{}/verify-email?token={}", base_url.trim_end_matches('/'), token);
    let subject = "Verify your email address".to_string();
    let body = format!(
        "Welcome! Please confirm your email address by opening the link below.\n\n\
         {}\n\n\
         The link expires in one hour. If you did not create an account you \
         can ignore this message.",
        link
    );
    (subject, body)
}
