mod contact_submission;
mod mail_message;

pub use contact_submission::ContactSubmission;
pub use mail_message::MailMessage;
