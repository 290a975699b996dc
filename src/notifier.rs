/// Alert delivery: the fixed message and the single configured sink.
use crate::config::{DeliveryMethod, MailSettings, SmtpAuthentication, SmtpSettings};
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use lettre::{Message, SmtpTransport, Transport};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

const BODY: &str = "No table row counts changed between consecutive checks. \
The database does not appear to be receiving writes.";

/// The alert sent on every inactive tick. Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
}

impl AlertMessage {
    pub fn from_settings(mail: &MailSettings) -> Self {
        Self {
            to: mail.to.clone(),
            from: mail.from.clone(),
            subject: mail.subject.clone(),
        }
    }

    /// Render as an RFC 5322 message stamped with `date`.
    pub fn render(&self, date: DateTime<Utc>) -> String {
        format!(
            "To: {}\r\nFrom: {}\r\nSubject: {}\r\nDate: {}\r\n\r\n{BODY}\r\n",
            self.to,
            self.from,
            self.subject,
            date.to_rfc2822()
        )
    }
}

/// Sink for alert messages.
pub trait Notifier {
    /// Short transport name for logs ("sendmail", "smtp", "log").
    fn name(&self) -> &'static str;

    fn deliver(&self, message: &AlertMessage) -> Result<(), DeliveryError>;
}

/// Pipes the rendered message into a sendmail-compatible binary.
#[derive(Debug, Clone)]
pub struct SendmailNotifier {
    location: PathBuf,
    arguments: Vec<String>,
}

impl SendmailNotifier {
    pub fn new(location: impl Into<PathBuf>, arguments: Vec<String>) -> Self {
        Self {
            location: location.into(),
            arguments,
        }
    }

    fn command_label(&self) -> String {
        self.location.display().to_string()
    }
}

impl Notifier for SendmailNotifier {
    fn name(&self) -> &'static str {
        "sendmail"
    }

    fn deliver(&self, message: &AlertMessage) -> Result<(), DeliveryError> {
        tracing::info!(
            to = %message.to,
            command = %self.location.display(),
            "sending notification"
        );

        let mut child = Command::new(&self.location)
            .args(&self.arguments)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DeliveryError::Spawn {
                command: self.command_label(),
                source: e,
            })?;

        let rendered = message.render(Utc::now());
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(rendered.as_bytes())
                .map_err(|e| DeliveryError::Io { source: e })?;
            // stdin drops here so the transport sees EOF
        }

        let output = child
            .wait_with_output()
            .map_err(|e| DeliveryError::Io { source: e })?;
        if !output.status.success() {
            return Err(DeliveryError::Rejected {
                command: self.command_label(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Writes the alert to the log instead of sending it anywhere.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn deliver(&self, message: &AlertMessage) -> Result<(), DeliveryError> {
        tracing::warn!(
            to = %message.to,
            from = %message.from,
            subject = %message.subject,
            "alert (log delivery)"
        );
        Ok(())
    }
}

/// Sends through an SMTP relay, upgrading with STARTTLS when configured.
///
/// The transport connects lazily, so building one never touches the network.
pub struct SmtpNotifier {
    transport: SmtpTransport,
    relay: String,
}

impl SmtpNotifier {
    pub fn new(smtp: &SmtpSettings) -> Result<Self, DeliveryError> {
        let relay = format!("{}:{}", smtp.address, smtp.port);
        let mut builder = SmtpTransport::builder_dangerous(smtp.address.as_str()).port(smtp.port);

        if smtp.enable_starttls_auto {
            let tls = TlsParameters::new(smtp.address.clone()).map_err(|e| DeliveryError::Smtp {
                relay: relay.clone(),
                source: e,
            })?;
            builder = builder.tls(Tls::Opportunistic(tls));
        }
        if let Some(domain) = &smtp.domain {
            builder = builder.hello_name(ClientId::Domain(domain.clone()));
        }
        if let (Some(user), Some(password)) = (&smtp.user_name, &smtp.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }
        if let Some(auth) = smtp.authentication {
            builder = builder.authentication(vec![mechanism(auth)]);
        }

        Ok(Self {
            transport: builder.build(),
            relay,
        })
    }
}

fn mechanism(auth: SmtpAuthentication) -> Mechanism {
    match auth {
        SmtpAuthentication::Plain => Mechanism::Plain,
        SmtpAuthentication::Login => Mechanism::Login,
    }
}

fn parse_mailbox(value: &str) -> Result<Mailbox, DeliveryError> {
    value.parse().map_err(|e| DeliveryError::Address {
        value: value.to_string(),
        source: e,
    })
}

/// Build the lettre message for an alert, dated now.
fn build_email(message: &AlertMessage) -> Result<Message, DeliveryError> {
    Message::builder()
        .from(parse_mailbox(&message.from)?)
        .to(parse_mailbox(&message.to)?)
        .subject(message.subject.clone())
        .date_now()
        .header(ContentType::TEXT_PLAIN)
        .body(BODY.to_string())
        .map_err(|e| DeliveryError::Build { source: e })
}

impl Notifier for SmtpNotifier {
    fn name(&self) -> &'static str {
        "smtp"
    }

    fn deliver(&self, message: &AlertMessage) -> Result<(), DeliveryError> {
        tracing::info!(to = %message.to, relay = %self.relay, "sending notification");
        let email = build_email(message)?;
        self.transport
            .send(&email)
            .map_err(|e| DeliveryError::Smtp {
                relay: self.relay.clone(),
                source: e,
            })?;
        Ok(())
    }
}

/// Build the sink named by `delivery_method`.
///
/// Sender and recipient are checked here so a bad address fails at startup.
pub fn build_notifier(mail: &MailSettings) -> Result<Box<dyn Notifier>, DeliveryError> {
    match mail.delivery_method {
        DeliveryMethod::Sendmail => Ok(Box::new(SendmailNotifier::new(
            mail.sendmail_location.clone(),
            mail.sendmail_arguments.clone(),
        ))),
        DeliveryMethod::Smtp => {
            parse_mailbox(&mail.from)?;
            parse_mailbox(&mail.to)?;
            Ok(Box::new(SmtpNotifier::new(&mail.smtp)?))
        }
        DeliveryMethod::Log => Ok(Box::new(LogNotifier)),
    }
}

/// Errors from alert delivery. Always fatal.
#[derive(Debug)]
pub enum DeliveryError {
    /// The transport binary could not be started.
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// Writing the message or collecting the transport's exit failed.
    Io { source: std::io::Error },
    /// The transport exited unsuccessfully.
    Rejected {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    /// A sender or recipient is not a valid mailbox.
    Address {
        value: String,
        source: lettre::address::AddressError,
    },
    /// The message could not be assembled.
    Build { source: lettre::error::Error },
    /// The SMTP relay could not be set up, reached, or refused the message.
    Smtp {
        relay: String,
        source: lettre::transport::smtp::Error,
    },
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Spawn { command, source } => {
                write!(f, "failed to start mail transport '{command}': {source}")
            }
            DeliveryError::Io { source } => {
                write!(f, "I/O error while sending notification: {source}")
            }
            DeliveryError::Rejected {
                command,
                status,
                stderr,
            } => {
                write!(f, "mail transport '{command}' rejected the message ({status})")?;
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
            DeliveryError::Address { value, source } => {
                write!(f, "invalid mail address '{value}': {source}")
            }
            DeliveryError::Build { source } => {
                write!(f, "failed to build notification: {source}")
            }
            DeliveryError::Smtp { relay, source } => {
                write!(f, "SMTP delivery via {relay} failed: {source}")
            }
        }
    }
}

impl std::error::Error for DeliveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeliveryError::Spawn { source, .. } => Some(source),
            DeliveryError::Io { source } => Some(source),
            DeliveryError::Rejected { .. } => None,
            DeliveryError::Address { source, .. } => Some(source),
            DeliveryError::Build { source } => Some(source),
            DeliveryError::Smtp { source, .. } => Some(source),
        }
    }
}
