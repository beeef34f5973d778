//! Channel selection: turn what a contact page offers into one channel.

use optout_shared::{ContactChannel, ContactType, ExtractedContacts};
use serde::Serialize;

/// Mailbox prefixes most likely to reach a person who can act on a request,
/// in priority order.
const PRIORITY_PREFIXES: &[&str] = &["info@", "contact@", "support@", "help@", "hello@"];

/// Result of [`select_channel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSelection {
    pub contact_type: ContactType,
    pub email: Option<String>,
    pub form_url: Option<String>,
}

impl ChannelSelection {
    /// The channel to persist: the best email when there is one, else the form.
    pub fn channel(&self) -> Option<ContactChannel> {
        match self.contact_type {
            ContactType::None => None,
            ContactType::Email | ContactType::Both => self
                .email
                .as_deref()
                .and_then(|e| ContactChannel::new(self.contact_type, e)),
            ContactType::Form => self
                .form_url
                .as_deref()
                .and_then(|u| ContactChannel::new(ContactType::Form, u)),
        }
    }
}

/// Decide the contact channel for an organization from its contact page.
///
/// The contact type depends only on whether a usable (non-blank) email was
/// found and whether the page has a contact form. A form without an explicit action URL is
/// reached through the contact page itself.
pub fn select_channel(
    org_name: &str,
    contact_url: &str,
    extracted: &ExtractedContacts,
) -> ChannelSelection {
    let email = best_email(&extracted.emails).map(str::to_string);
    let contact_type = ContactType::from_presence(email.is_some(), extracted.has_form);

    let form_url = if extracted.has_form {
        Some(
            extracted
                .form_url
                .clone()
                .unwrap_or_else(|| contact_url.to_string()),
        )
    } else {
        None
    };

    tracing::debug!(org = org_name, %contact_type, ?email, ?form_url, "channel selected");

    ChannelSelection {
        contact_type,
        email,
        form_url,
    }
}

/// Pick the email most likely to be read.
///
/// Candidates are trimmed and blanks ignored. Priority prefixes are tried in
/// order across all candidates (case-insensitive); without a match the first
/// candidate wins.
pub fn best_email(emails: &[String]) -> Option<&str> {
    let mut candidates = emails.iter().map(|e| e.trim()).filter(|e| !e.is_empty());
    PRIORITY_PREFIXES
        .iter()
        .find_map(|prefix| {
            candidates
                .clone()
                .find(|e| e.to_lowercase().starts_with(prefix))
        })
        .or_else(|| candidates.next())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contacts(emails: &[&str], has_form: bool, form_url: Option<&str>) -> ExtractedContacts {
        ExtractedContacts {
            emails: emails.iter().map(|e| e.to_string()).collect(),
            has_form,
            form_url: form_url.map(str::to_string),
        }
    }

    const CONTACT_URL: &str = "https://acme.org/contact";

    #[test]
    fn contact_type_table() {
        let cases = [
            (&["a@acme.org"][..], true, ContactType::Both),
            (&["a@acme.org"][..], false, ContactType::Email),
            (&[][..], true, ContactType::Form),
            (&[][..], false, ContactType::None),
        ];
        for (emails, has_form, expected) in cases {
            let sel = select_channel("Acme", CONTACT_URL, &contacts(emails, has_form, None));
            assert_eq!(sel.contact_type, expected, "emails={emails:?} has_form={has_form}");
        }
    }

    #[test]
    fn priority_prefix_beats_list_order() {
        let emails = vec!["jane@org.org".to_string(), "info@org.org".to_string()];
        assert_eq!(best_email(&emails), Some("info@org.org"));
    }

    #[test]
    fn priority_follows_prefix_order_not_list_order() {
        let emails = vec![
            "help@org.org".to_string(),
            "Contact@org.org".to_string(),
        ];
        assert_eq!(best_email(&emails), Some("Contact@org.org"));
    }

    #[test]
    fn first_email_without_priority_match() {
        let emails = vec!["jane@org.org".to_string(), "bob@org.org".to_string()];
        assert_eq!(best_email(&emails), Some("jane@org.org"));
        assert_eq!(best_email(&[]), None);
    }

    #[test]
    fn form_falls_back_to_contact_url() {
        let sel = select_channel("Acme", CONTACT_URL, &contacts(&[], true, None));
        assert_eq!(sel.form_url.as_deref(), Some(CONTACT_URL));

        let channel = sel.channel().unwrap();
        assert_eq!(channel.contact_type(), ContactType::Form);
        assert_eq!(channel.value(), CONTACT_URL);
    }

    #[test]
    fn explicit_form_action_is_kept() {
        let sel = select_channel(
            "Acme",
            CONTACT_URL,
            &contacts(&[], true, Some("https://acme.org/send")),
        );
        assert_eq!(sel.form_url.as_deref(), Some("https://acme.org/send"));
    }

    #[test]
    fn both_persists_best_email() {
        let sel = select_channel(
            "Acme",
            CONTACT_URL,
            &contacts(&["jane@acme.org", "support@acme.org"], true, None),
        );
        let channel = sel.channel().unwrap();
        assert_eq!(channel.contact_type(), ContactType::Both);
        assert_eq!(channel.value(), "support@acme.org");
        assert_eq!(sel.form_url.as_deref(), Some(CONTACT_URL));
    }

    #[test]
    fn no_form_means_no_form_url() {
        let sel = select_channel(
            "Acme",
            CONTACT_URL,
            &contacts(&["jane@acme.org"], false, Some("https://acme.org/ignored")),
        );
        assert_eq!(sel.form_url, None);
        assert_eq!(sel.channel().unwrap().value(), "jane@acme.org");
    }

    #[test]
    fn blank_candidates_are_ignored() {
        let sel = select_channel("Acme", CONTACT_URL, &contacts(&[" ", "jane@org.org"], false, None));
        assert_eq!(sel.contact_type, ContactType::Email);
        assert_eq!(sel.email.as_deref(), Some("jane@org.org"));
        assert_eq!(sel.channel().unwrap().value(), "jane@org.org");

        let sel = select_channel("Acme", CONTACT_URL, &contacts(&["", "  "], true, None));
        assert_eq!(sel.contact_type, ContactType::Form);
        assert_eq!(sel.email, None);

        let sel = select_channel("Acme", CONTACT_URL, &contacts(&["\t"], false, None));
        assert_eq!(sel.contact_type, ContactType::None);
    }

    #[test]
    fn candidates_are_trimmed() {
        let emails = vec![" jane@org.org".to_string(), " Info@org.org \n".to_string()];
        assert_eq!(best_email(&emails), Some("Info@org.org"));
    }

    #[test]
    fn nothing_found_has_no_channel() {
        let sel = select_channel("Acme", CONTACT_URL, &contacts(&[], false, None));
        assert_eq!(sel.channel(), None);
        assert_eq!(sel.email, None);
    }
}
