use crate::domain::ContactSubmission;

const NOTIFICATION_SUBJECT_PREFIX: &str = "New Contact Form Submission: ";
const CONFIRMATION_SUBJECT: &str = "Thank you for contacting us";

/// One outbound HTML email, ready for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

impl MailMessage {
    /// The owner-facing summary of a submission, addressed to `recipient`.
    pub fn notification(submission: &ContactSubmission, recipient: &str) -> Self {
        let html_body = format!(
            "<html>\n\
             <body>\n\
             <h2>New Contact Form Submission</h2>\n\
             <p><strong>Name:</strong> {name}</p>\n\
             <p><strong>Email:</strong> {email}</p>\n\
             <p><strong>Subject:</strong> {subject}</p>\n\
             <p><strong>Message:</strong></p>\n\
             <p>{message}</p>\n\
             </body>\n\
             </html>\n",
            name = escape_html(submission.name()),
            email = escape_html(submission.email()),
            subject = escape_html(submission.subject()),
            message = escape_html(submission.message()),
        );
        Self {
            to: recipient.to_string(),
            subject: header_safe(&format!(
                "{}{}",
                NOTIFICATION_SUBJECT_PREFIX,
                submission.subject()
            )),
            html_body,
        }
    }

    /// The courtesy copy sent back to the submitter.
    pub fn confirmation(submission: &ContactSubmission) -> Self {
        let html_body = format!(
            "<html>\n\
             <body>\n\
             <h2>Thank you for your message, {name}!</h2>\n\
             <p>We have received your contact form submission and will get back to you as soon as possible.</p>\n\
             <hr>\n\
             <p><strong>Your message:</strong></p>\n\
             <p>{message}</p>\n\
             <hr>\n\
             <p>Best regards</p>\n\
             </body>\n\
             </html>\n",
            name = escape_html(submission.name()),
            message = escape_html(submission.message()),
        );
        Self {
            to: submission.email().to_string(),
            subject: CONFIRMATION_SUBJECT.to_string(),
            html_body,
        }
    }
}

/// Escape markup and turn line breaks into `<br>`.
fn escape_html(text: &str) -> String {
    htmlescape::encode_minimal(&text.replace("\r\n", "\n")).replace('\n', "<br>")
}

/// Control characters (CR/LF included) become spaces so user input can't
/// start a new header.
fn header_safe(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}
