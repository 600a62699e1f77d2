use crate::errors::BlogError;
use async_trait::async_trait;
use std::collections::HashMap;

pub struct EmailTemplate {
    pub name: &'static str,
    pub subject: &'static str,
    pub body: &'static str,
}

const TEMPLATES: &[EmailTemplate] = &[
    EmailTemplate {
        name: "confirm_email",
        subject: "Please confirm your email address",
        body: "\
Hello {username}!

To finish adding this email address to your commit--blog account, please click here to confirm:

{confirm_url}


Thanks!

PS. If you didn't just sign up as {username} on commit--blog.com, ignore this message and we'll never email you again.
",
    },
    EmailTemplate {
        name: "login_email",
        subject: "Your login code",
        body: "\
Hello {username},

Here is the code to finish logging in:

{token}

This code will expire in 10 minutes. Thanks!
",
    },
];

pub fn template(name: &str) -> Option<&'static EmailTemplate> {
    TEMPLATES.iter().find(|t| t.name == name)
}

/// Substitute `{key}` placeholders from the task's variables map.
pub fn render(template: &EmailTemplate, variables: &HashMap<String, String>) -> String {
    let mut body = template.body.to_string();
    for (key, value) in variables {
        body = body.replace(&format!("{{{}}}", key), value);
    }
    body
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        subject: &str,
        sender: &str,
        recipients: &[String],
        body: &str,
    ) -> Result<(), BlogError>;
}

/// Dev/test delivery: write the message to the log instead of the wire.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(
        &self,
        subject: &str,
        sender: &str,
        recipients: &[String],
        body: &str,
    ) -> Result<(), BlogError> {
        tracing::info!(
            subject,
            sender,
            recipients = %recipients.join(", "),
            "delivering mail:\n{}",
            body
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_lookup() {
        assert!(template("confirm_email").is_some());
        assert!(template("login_email").is_some());
        assert!(template("nonexistent").is_none());
    }

    #[test]
    fn test_render_substitutes_variables() {
        let tmpl = template("confirm_email").unwrap();
        let mut vars = HashMap::new();
        vars.insert("username".to_string(), "defred".to_string());
        vars.insert(
            "confirm_url".to_string(),
            "https://commit--blog.com/account/email/confirm?token=abc".to_string(),
        );

        let body = render(tmpl, &vars);
        assert!(body.contains("Hello defred!"));
        assert!(body.contains("confirm?token=abc"));
        assert!(!body.contains("{username}"));
        assert!(!body.contains("{confirm_url}"));
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let tmpl = template("login_email").unwrap();
        let vars = HashMap::new();

        // nothing to substitute; placeholders stay visible for the operator
        let body = render(tmpl, &vars);
        assert!(body.contains("{username}"));
        assert!(body.contains("{token}"));
    }
}
