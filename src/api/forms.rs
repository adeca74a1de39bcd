//! Request field parsing and input policy: length limits, escaping,
//! email shape
use serde::Deserialize;

use crate::error::Result;
use crate::model::{Address, Node, PgpId, Status};

pub const MAX_FIELD_LEN: usize = 255;
pub const MAX_MESSAGE_LEN: usize = 1000;

/// Escape the five HTML-special characters.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&#34;"),
            c => out.push(c),
        }
    }
    out
}

/// `local@label.label.tld`, ASCII only.
pub fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    let local_ok = !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c));
    let labels: Vec<&str> = domain.split('.').collect();
    let domain_ok = labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
        && labels
            .last()
            .map_or(false, |tld| tld.chars().all(|c| c.is_ascii_alphabetic()));
    local_ok && domain_ok
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(validation_error!("{}Absent", field)),
    }
}

fn escaped_within(value: Option<&str>, max: usize, too_long: &str) -> Result<String> {
    let escaped = escape_html(value.unwrap_or_default());
    if escaped.len() > max {
        return Err(validation_error!("{}", too_long));
    }
    Ok(escaped)
}

fn coordinate(value: &Option<String>, field: &str, bound: f64) -> Result<f64> {
    let parsed: f64 = required(value, field)?
        .trim()
        .parse()
        .map_err(|_| validation_error!("{}Invalid", field))?;
    if !parsed.is_finite() || parsed.abs() > bound {
        return Err(validation_error!("{}Invalid", field));
    }
    Ok(parsed)
}

pub fn parse_address(value: &Option<String>) -> Result<Address> {
    Address::parse(required(value, "address").map_err(|_| validation_error!("addressInvalid"))?)
}

/// Tokens are echoed back as decimal integers.
pub fn parse_token(value: &Option<String>) -> Option<u32> {
    value.as_deref().and_then(|v| v.trim().parse().ok())
}

#[derive(Debug, Default, Deserialize)]
pub struct AddressQuery {
    pub address: Option<String>,
    pub geojson: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AllQuery {
    pub since: Option<String>,
    pub geojson: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyQuery {
    pub id: Option<String>,
}

/// Fields of a registration or update submission.
#[derive(Debug, Default, Deserialize)]
pub struct NodeForm {
    pub address: Option<String>,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub contact: Option<String>,
    pub details: Option<String>,
    pub pgp: Option<String>,
    pub status: Option<String>,
    pub token: Option<String>,
}

impl NodeForm {
    /// Build a node from the submission. The owner email is only read
    /// for new registrations.
    pub fn to_node(&self, with_email: bool) -> Result<Node> {
        let addr = parse_address(&self.address)?;
        let latitude = coordinate(&self.latitude, "latitude", 90.0)?;
        let longitude = coordinate(&self.longitude, "longitude", 180.0)?;
        let mut node = Node::new(addr, latitude, longitude);

        node.owner_name = escape_html(required(&self.name, "name")?);
        if node.owner_name.len() > MAX_FIELD_LEN {
            return Err(validation_error!("ownerNameTooLong"));
        }
        if with_email {
            let email = required(&self.email, "email")?;
            if !is_email(email) {
                return Err(validation_error!("emailInvalid"));
            }
            node.owner_email = email.to_string();
        }
        node.contact = escaped_within(self.contact.as_deref(), MAX_FIELD_LEN, "contactTooLong")?;
        node.details = escaped_within(self.details.as_deref(), MAX_FIELD_LEN, "detailsTooLong")?;
        node.pgp = PgpId::decode(self.pgp.as_deref().unwrap_or_default())?;
        node.status = match self.status.as_deref().filter(|s| !s.is_empty()) {
            Some(s) => Status::from_bits(
                s.trim()
                    .parse()
                    .map_err(|_| validation_error!("statusInvalid"))?,
            ),
            None => Status::empty(),
        };
        Ok(node)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageForm {
    pub address: Option<String>,
    pub from: Option<String>,
    pub message: Option<String>,
    pub captcha: Option<String>,
    pub token: Option<String>,
}

impl MessageForm {
    pub fn reply_to(&self) -> Result<&str> {
        let from = required(&self.from, "from")?;
        if !is_email(from) {
            return Err(validation_error!("fromInvalid"));
        }
        Ok(from)
    }

    pub fn message(&self) -> Result<String> {
        escaped_within(
            Some(required(&self.message, "message")?),
            MAX_MESSAGE_LEN,
            "messageTooLong",
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteForm {
    pub address: Option<String>,
    pub token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AtlasError;

    fn form() -> NodeForm {
        NodeForm {
            address: Some("fc00::1".to_string()),
            latitude: Some("45.5".to_string()),
            longitude: Some("-122.6".to_string()),
            name: Some("Alice <3".to_string()),
            email: Some("alice@example.org".to_string()),
            ..NodeForm::default()
        }
    }

    fn rejected(form: &NodeForm) -> String {
        match form.to_node(true) {
            Err(AtlasError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&#34;x&#34;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_is_email() {
        assert!(is_email("alice@example.org"));
        assert!(is_email("a.b+tag@mail.example.co.uk"));
        assert!(!is_email("alice"));
        assert!(!is_email("alice@localhost"));
        assert!(!is_email("@example.org"));
        assert!(!is_email("alice@example.org1"));
        assert!(!is_email("al ice@example.org"));
    }

    #[test]
    fn test_valid_node_form() {
        let node = form().to_node(true).unwrap();
        assert_eq!(node.owner_name, "Alice &lt;3");
        assert_eq!(node.owner_email, "alice@example.org");
        assert!(node.pgp.is_empty());
        assert_eq!(node.status, Status::empty());
    }

    #[test]
    fn test_field_limits_apply_after_escaping() {
        let mut f = form();
        f.contact = Some("<".repeat(64));
        assert_eq!(rejected(&f), "contactTooLong");

        let mut f = form();
        f.details = Some("x".repeat(256));
        assert_eq!(rejected(&f), "detailsTooLong");

        let mut f = form();
        f.name = Some("x".repeat(256));
        assert_eq!(rejected(&f), "ownerNameTooLong");

        let mut f = form();
        f.contact = Some("x".repeat(255));
        f.to_node(true).unwrap();
    }

    #[test]
    fn test_bad_fields() {
        let mut f = form();
        f.address = Some("fc00::zz".to_string());
        assert_eq!(rejected(&f), "addressInvalid");

        let mut f = form();
        f.pgp = Some("abc".to_string());
        assert_eq!(rejected(&f), "pgpInvalid");

        let mut f = form();
        f.latitude = Some("91".to_string());
        assert_eq!(rejected(&f), "latitudeInvalid");

        let mut f = form();
        f.email = Some("nope".to_string());
        assert_eq!(rejected(&f), "emailInvalid");

        let mut f = form();
        f.email = None;
        assert!(f.to_node(false).is_ok());
    }

    #[test]
    fn test_message_limit() {
        let mut f = MessageForm {
            message: Some("x".repeat(1000)),
            ..MessageForm::default()
        };
        assert_eq!(f.message().unwrap().len(), 1000);
        f.message = Some("x".repeat(1001));
        assert!(f.message().is_err());
    }
}
