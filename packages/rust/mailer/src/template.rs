//! Opt-out message rendering.
//!
//! Subject and body come from the `[message]` config section. Two
//! placeholders are substituted: `{organization}` and `{sender_name}`.
//! The HTML alternative is derived from the text body: blank lines separate
//! paragraphs, single newlines become `<br>`.

use optout_shared::{MessageConfig, OutgoingMessage};

const ORGANIZATION: &str = "{organization}";
const SENDER_NAME: &str = "{sender_name}";

/// Subject and body templates plus the sender name to fill in.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    subject: String,
    body: String,
    sender_name: String,
}

impl MessageTemplate {
    pub fn from_config(config: &MessageConfig) -> Self {
        Self {
            subject: config.subject.clone(),
            body: config.body.clone(),
            sender_name: config.sender_name.clone(),
        }
    }

    /// Render the message addressed to `to` for `org_name`.
    pub fn render(&self, org_name: &str, to: &str) -> OutgoingMessage {
        let subject = self.fill(&self.subject, org_name);
        // Header values must stay on one line.
        let subject = subject.split_whitespace().collect::<Vec<_>>().join(" ");
        let body_text = self.fill(&self.body, org_name).replace("\r\n", "\n");
        let body_html = text_to_html(&body_text);

        OutgoingMessage {
            to: to.to_string(),
            subject,
            body_text,
            body_html,
        }
    }

    fn fill(&self, template: &str, org_name: &str) -> String {
        template
            .replace(ORGANIZATION, org_name)
            .replace(SENDER_NAME, &self.sender_name)
    }
}

/// Wrap plain text in `<p>` paragraphs, escaping HTML.
pub fn text_to_html(text: &str) -> String {
    let mut html = String::new();
    let mut paragraph: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            flush_paragraph(&mut paragraph, &mut html);
        } else {
            paragraph.push(line.trim_end());
        }
    }
    flush_paragraph(&mut paragraph, &mut html);

    html
}

fn flush_paragraph(paragraph: &mut Vec<&str>, html: &mut String) {
    if paragraph.is_empty() {
        return;
    }
    let lines: Vec<String> = paragraph.iter().map(|l| escape_html(l)).collect();
    html.push_str("<p>");
    html.push_str(&lines.join("<br>\n"));
    html.push_str("</p>\n");
    paragraph.clear();
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(subject: &str, body: &str) -> MessageTemplate {
        MessageTemplate::from_config(&MessageConfig {
            sender_name: "Jane Doe".into(),
            subject: subject.into(),
            body: body.into(),
        })
    }

    #[test]
    fn placeholders_are_substituted_everywhere() {
        let t = template(
            "Opt out: {organization}",
            "Hello {organization},\n\nRemove me.\n{sender_name}\n{sender_name}",
        );
        let msg = t.render("Acme Org", "info@acme.org");

        assert_eq!(msg.to, "info@acme.org");
        assert_eq!(msg.subject, "Opt out: Acme Org");
        assert_eq!(
            msg.body_text,
            "Hello Acme Org,\n\nRemove me.\nJane Doe\nJane Doe"
        );
        assert_eq!(
            msg.body_html,
            "<p>Hello Acme Org,</p>\n<p>Remove me.<br>\nJane Doe<br>\nJane Doe</p>\n"
        );
    }

    #[test]
    fn default_message_mentions_organization_and_sender() {
        let t = MessageTemplate::from_config(&MessageConfig {
            sender_name: "Jane Doe".into(),
            ..MessageConfig::default()
        });
        let msg = t.render("Acme Org", "info@acme.org");
        assert!(msg.subject.contains("Acme Org"));
        assert!(msg.body_text.contains("Hello Acme Org team"));
        assert!(msg.body_text.ends_with("Jane Doe"));
        assert!(!msg.body_text.contains('{'));
    }

    #[test]
    fn subject_is_kept_on_one_line() {
        let t = template("Opt out\r\n from {organization}", "x");
        assert_eq!(t.render("Acme", "a@acme.org").subject, "Opt out from Acme");
    }

    #[test]
    fn html_is_escaped() {
        let html = text_to_html("Tom & Jerry <3 \"quotes\"\n\n\n  \nBye");
        assert_eq!(
            html,
            "<p>Tom &amp; Jerry &lt;3 &quot;quotes&quot;</p>\n<p>Bye</p>\n"
        );
    }

    #[test]
    fn empty_text_renders_nothing() {
        assert_eq!(text_to_html(""), "");
        assert_eq!(text_to_html("\n\n"), "");
    }

    #[test]
    fn organization_names_are_escaped_in_html_only() {
        let t = template("{organization}", "Dear {organization}");
        let msg = t.render("Smith & Sons", "a@smith.com");
        assert_eq!(msg.body_text, "Dear Smith & Sons");
        assert_eq!(msg.body_html, "<p>Dear Smith &amp; Sons</p>\n");
    }
}
