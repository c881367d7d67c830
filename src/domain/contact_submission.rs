/// A contact-form payload whose required fields are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactSubmission {
    name: String,
    email: String,
    subject: String,
    message: String,
}

impl ContactSubmission {
    /// Only emptiness is checked: whitespace-only values and unusual
    /// addresses are accepted here. An undeliverable `email` surfaces later,
    /// when the confirmation is dispatched.
    pub fn parse(
        name: String,
        email: String,
        subject: String,
        message: String,
    ) -> Result<ContactSubmission, String> {
        if name.is_empty() || email.is_empty() || message.is_empty() {
            return Err("Name, email, and message are required".into());
        }
        Ok(Self {
            name,
            email,
            subject,
            message,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
