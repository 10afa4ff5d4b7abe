use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{DraftEmail, Restaurant, SendOutcome};

const SMTP_PORT: u16 = 587;
const SMTP_TIMEOUT: Duration = Duration::from_secs(30);
const APP_PASSWORD_URL: &str = "https://myaccount.google.com/apppasswords";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailProvider {
    Gmail,
    Outlook,
    Yahoo,
}

impl EmailProvider {
    pub fn all() -> [EmailProvider; 3] {
        [EmailProvider::Gmail, EmailProvider::Outlook, EmailProvider::Yahoo]
    }

    pub fn key(self) -> &'static str {
        match self {
            EmailProvider::Gmail => "gmail",
            EmailProvider::Outlook => "outlook",
            EmailProvider::Yahoo => "yahoo",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EmailProvider::Gmail => "Gmail",
            EmailProvider::Outlook => "Outlook / Office 365",
            EmailProvider::Yahoo => "Yahoo Mail",
        }
    }

    pub fn host(self) -> &'static str {
        match self {
            EmailProvider::Gmail => "smtp.gmail.com",
            EmailProvider::Outlook => "smtp.office365.com",
            EmailProvider::Yahoo => "smtp.mail.yahoo.com",
        }
    }
}

impl fmt::Display for EmailProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for EmailProvider {
    type Err = MailError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_lowercase();
        EmailProvider::all()
            .into_iter()
            .find(|provider| provider.key() == wanted)
            .ok_or_else(|| MailError::UnsupportedProvider(value.trim().to_string()))
    }
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("{0} required")]
    MissingFields(&'static str),
    #[error("invalid email address format: {0}")]
    InvalidAddress(String),
    #[error("unsupported email provider: {0}. Supported: gmail, outlook, yahoo")]
    UnsupportedProvider(String),
    #[error("{}", auth_message(.provider, .detail))]
    AuthFailed {
        provider: EmailProvider,
        detail: String,
    },
    #[error("recipient address '{recipient}' was refused by the server: {detail}")]
    RecipientRefused { recipient: String, detail: String },
    #[error("connection timeout, check your internet connection and try again")]
    Timeout,
    #[error("failed to send email: {0}")]
    Transport(String),
}

fn auth_message(provider: &EmailProvider, detail: &str) -> String {
    match provider {
        EmailProvider::Gmail => format!(
            "Gmail authentication failed. Use an App Password, not your regular password: enable 2FA, then generate one at {APP_PASSWORD_URL} ({detail})"
        ),
        other => format!(
            "authentication failed for {}. Check your email and password ({detail})",
            other.label()
        ),
    }
}

/// Removes the characters that copy-pasting from web pages tends to bring
/// along: NBSP becomes a space, zero-width marks and BOM are dropped.
pub fn sanitize_input(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .chars()
        .filter(|c| !matches!(c, '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{feff}'))
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn sanitize_ascii(text: &str) -> String {
    sanitize_input(text)
        .chars()
        .filter(char::is_ascii)
        .collect::<String>()
        .trim()
        .to_string()
}

#[derive(Clone)]
pub struct SenderConfig {
    pub email: String,
    pub password: String,
    pub provider: EmailProvider,
}

impl fmt::Debug for SenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderConfig")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("provider", &self.provider)
            .finish()
    }
}

impl SenderConfig {
    pub fn new(email: &str, password: &str, provider: &str) -> Result<Self, MailError> {
        let email = sanitize_ascii(email);
        let password = sanitize_ascii(password);
        if email.is_empty() || password.is_empty() {
            return Err(MailError::MissingFields("email and password are"));
        }
        parse_mailbox(&email)?;
        let provider = provider.parse()?;
        Ok(Self {
            email,
            password,
            provider,
        })
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    if !address.contains('@') {
        return Err(MailError::InvalidAddress(address.to_string()));
    }
    address
        .parse::<Mailbox>()
        .map_err(|_| MailError::InvalidAddress(address.to_string()))
}

pub fn prepare_message(
    sender: &SenderConfig,
    recipient: &str,
    subject: &str,
    body: &str,
) -> Result<Message, MailError> {
    let recipient = sanitize_ascii(recipient);
    if sender.email.is_empty() || sender.password.is_empty() || recipient.is_empty() {
        return Err(MailError::MissingFields("email, password, and recipient are"));
    }
    let from = parse_mailbox(&sender.email)?;
    let to = parse_mailbox(&recipient)?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(sanitize_input(subject))
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|err| MailError::Transport(err.to_string()))
}

/// Seam between message handling and the network.
pub trait MailTransport {
    fn send(&self, message: &Message) -> Result<(), MailError>;
    fn check(&self) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    transport: SmtpTransport,
    provider: EmailProvider,
}

impl SmtpMailer {
    pub fn connect(sender: &SenderConfig) -> Result<Self, MailError> {
        let transport = SmtpTransport::starttls_relay(sender.provider.host())
            .map_err(|err| MailError::Transport(err.to_string()))?
            .port(SMTP_PORT)
            .credentials(Credentials::new(sender.email.clone(), sender.password.clone()))
            .timeout(Some(SMTP_TIMEOUT))
            .build();
        Ok(Self {
            transport,
            provider: sender.provider,
        })
    }

    fn classify(&self, err: lettre::transport::smtp::Error, recipient: Option<String>) -> MailError {
        if err.is_timeout() {
            return MailError::Timeout;
        }
        let code = err.status().map(|code| code.to_string()).unwrap_or_default();
        let detail = err.to_string();
        if code.starts_with("53") || detail.to_lowercase().contains("authentication") {
            return MailError::AuthFailed {
                provider: self.provider,
                detail,
            };
        }
        match recipient {
            Some(recipient) if code.starts_with("55") => MailError::RecipientRefused { recipient, detail },
            _ => MailError::Transport(detail),
        }
    }
}

impl MailTransport for SmtpMailer {
    fn send(&self, message: &Message) -> Result<(), MailError> {
        let recipient = message
            .envelope()
            .to()
            .first()
            .map(|address| address.to_string());
        self.transport
            .send(message)
            .map(|_| ())
            .map_err(|err| self.classify(err, recipient))
    }

    fn check(&self) -> Result<(), MailError> {
        match self.transport.test_connection() {
            Ok(true) => Ok(()),
            Ok(false) => Err(MailError::Transport("server did not accept the connection".to_string())),
            Err(err) => Err(self.classify(err, None)),
        }
    }
}

pub fn send_email(
    transport: &dyn MailTransport,
    sender: &SenderConfig,
    recipient: &str,
    subject: &str,
    body: &str,
) -> Result<String, MailError> {
    let message = prepare_message(sender, recipient, subject, body)?;
    transport.send(&message)?;
    Ok(format!("Email sent successfully to {}", sanitize_ascii(recipient)))
}

pub fn send_batch(
    transport: &dyn MailTransport,
    sender: &SenderConfig,
    drafts: &[DraftEmail],
    restaurants: &[Restaurant],
) -> Vec<SendOutcome> {
    drafts
        .iter()
        .enumerate()
        .filter(|(_, draft)| draft.has_recipient())
        .map(|(position, draft)| {
            let restaurant = restaurants
                .get(draft.restaurant_index)
                .map(|r| r.display_name().to_string())
                .unwrap_or_else(|| format!("Restaurant {}", position + 1));
            send_draft(transport, sender, draft, restaurant)
        })
        .collect()
}

pub fn send_draft(
    transport: &dyn MailTransport,
    sender: &SenderConfig,
    draft: &DraftEmail,
    restaurant: String,
) -> SendOutcome {
    let Some(recipient) = draft
        .recipient
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
    else {
        return SendOutcome {
            restaurant,
            recipient: None,
            success: false,
            message: "No email address found for restaurant. Please contact them directly.".to_string(),
        };
    };

    let result = send_email(transport, sender, recipient, &draft.subject, &draft.body);
    match result {
        Ok(message) => {
            tracing::info!(%restaurant, "booking email sent");
            SendOutcome {
                restaurant,
                recipient: Some(recipient.to_string()),
                success: true,
                message,
            }
        }
        Err(err) => {
            tracing::warn!(%restaurant, error = %err, "booking email failed");
            SendOutcome {
                restaurant,
                recipient: Some(recipient.to_string()),
                success: false,
                message: err.to_string(),
            }
        }
    }
}

pub fn validate_config(transport: &dyn MailTransport) -> Result<String, MailError> {
    transport.check()?;
    Ok("Email configuration is valid!".to_string())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[derive(Default)]
    struct RecordingTransport {
        sent: RefCell<Vec<String>>,
        refuse: Option<&'static str>,
    }

    impl MailTransport for RecordingTransport {
        fn send(&self, message: &Message) -> Result<(), MailError> {
            let to = message.envelope().to()[0].to_string();
            if self.refuse == Some(to.as_str()) {
                return Err(MailError::RecipientRefused {
                    recipient: to,
                    detail: "550 mailbox unavailable".to_string(),
                });
            }
            self.sent.borrow_mut().push(to);
            Ok(())
        }

        fn check(&self) -> Result<(), MailError> {
            Ok(())
        }
    }

    fn sender() -> SenderConfig {
        SenderConfig::new("planner@example.org", "app-pass", "gmail").expect("valid sender")
    }

    fn draft(index: usize, recipient: Option<&str>) -> DraftEmail {
        DraftEmail {
            restaurant_index: index,
            subject: "Table for 4".to_string(),
            body: "Dear team,\nA table please.".to_string(),
            recipient: recipient.map(str::to_string),
            recipient_edited: false,
        }
    }

    #[test]
    fn sanitizes_pasted_input() {
        assert_eq!(sanitize_input("\u{feff} Table\u{a0}for\u{200b} 4 "), "Table for 4");
        assert_eq!(sanitize_ascii(" me\u{200d}@exämple.org\u{a0}"), "me@exmple.org");
    }

    #[test]
    fn parses_providers() {
        assert_eq!("Gmail".parse::<EmailProvider>().ok(), Some(EmailProvider::Gmail));
        assert_eq!(EmailProvider::Outlook.host(), "smtp.office365.com");
        assert!(matches!(
            "aol".parse::<EmailProvider>(),
            Err(MailError::UnsupportedProvider(p)) if p == "aol"
        ));
    }

    #[test]
    fn rejects_malformed_sender() {
        assert!(matches!(
            SenderConfig::new("", "secret", "gmail"),
            Err(MailError::MissingFields(_))
        ));
        assert!(matches!(
            SenderConfig::new("me@example.org", "\u{200b}", "gmail"),
            Err(MailError::MissingFields(_))
        ));
        assert!(matches!(
            SenderConfig::new("not-an-address", "secret", "gmail"),
            Err(MailError::InvalidAddress(_))
        ));
        assert!(matches!(
            SenderConfig::new("me@example.org", "secret", "hotmail"),
            Err(MailError::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn rejects_malformed_recipient_before_sending() {
        let transport = RecordingTransport::default();
        let err = send_email(&transport, &sender(), "bistro.example.com", "Hi", "Body")
            .expect_err("invalid");
        assert!(matches!(err, MailError::InvalidAddress(_)));
        let err = send_email(&transport, &sender(), "  ", "Hi", "Body").expect_err("missing");
        assert!(matches!(err, MailError::MissingFields(_)));
        assert!(transport.sent.borrow().is_empty());
    }

    #[test]
    fn prepares_plain_text_message() {
        let message = prepare_message(&sender(), "book@bistro.example", "Table\u{a0}for 4", "Hello")
            .expect("message");
        let raw = String::from_utf8(message.formatted()).expect("utf8");
        assert!(raw.contains("Subject: Table for 4"));
        assert!(raw.contains("To: book@bistro.example"));
        assert!(raw.contains("text/plain"));
    }

    #[test]
    fn batch_reports_each_recipient() {
        let transport = RecordingTransport {
            refuse: Some("closed@bistro.example"),
            ..RecordingTransport::default()
        };
        let restaurants = vec![
            Restaurant { name: "Bistro".to_string(), ..Restaurant::default() },
            Restaurant { name: "Closed Cafe".to_string(), ..Restaurant::default() },
            Restaurant { name: "Phone Only".to_string(), ..Restaurant::default() },
        ];
        let drafts = vec![
            draft(0, Some("book@bistro.example")),
            draft(1, Some("closed@bistro.example")),
            draft(2, None),
        ];
        let outcomes = send_batch(&transport, &sender(), &drafts, &restaurants);

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].success);
        assert_eq!(outcomes[0].restaurant, "Bistro");
        assert!(!outcomes[1].success);
        assert!(outcomes[1].message.contains("refused"));
        assert_eq!(*transport.sent.borrow(), vec!["book@bistro.example".to_string()]);
    }

    #[test]
    fn batch_skips_drafts_without_recipient() {
        let transport = RecordingTransport::default();
        let restaurants = vec![
            Restaurant { name: "Bistro".to_string(), ..Restaurant::default() },
            Restaurant { name: "Phone Only".to_string(), ..Restaurant::default() },
        ];
        let drafts = vec![draft(0, Some("book@bistro.example")), draft(1, Some("  "))];
        let outcomes = send_batch(&transport, &sender(), &drafts, &restaurants);

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes.iter().all(|o| o.success));
        assert_eq!(outcomes[0].restaurant, "Bistro");
    }

    #[test]
    fn single_send_without_recipient_is_reported() {
        let transport = RecordingTransport::default();
        let outcome = send_draft(&transport, &sender(), &draft(0, None), "Phone Only".to_string());
        assert!(!outcome.success);
        assert!(outcome.message.contains("No email address"));
        assert!(transport.sent.borrow().is_empty());
    }

    #[test]
    fn gmail_auth_failure_mentions_app_password() {
        let err = MailError::AuthFailed {
            provider: EmailProvider::Gmail,
            detail: "535 5.7.8 Username and Password not accepted".to_string(),
        };
        assert!(err.to_string().contains("App Password"));
        let err = MailError::AuthFailed {
            provider: EmailProvider::Yahoo,
            detail: "535".to_string(),
        };
        assert!(err.to_string().contains("Yahoo Mail"));
    }
}
