use super::session::{Location, Vibe};

pub const MAX_TAGS: usize = 10;
pub const MAX_TAG_LENGTH: usize = 50;
pub const MAX_CONTACT_LENGTH: usize = 200;

/// Rejection of onboarding or profile input. Happens at the HTTP edge; the
/// engine never sees unvalidated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    InvalidVibe,
    TooManyTags,
    TagTooLong,
    InvalidLocation,
    InvalidEmergencyContact,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::InvalidVibe => "invalid_vibe",
            ValidationError::TooManyTags => "too_many_tags",
            ValidationError::TagTooLong => "tag_too_long",
            ValidationError::InvalidLocation => "invalid_location",
            ValidationError::InvalidEmergencyContact => "invalid_emergency_contact",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ValidationError::InvalidVibe => "Unknown vibe",
            ValidationError::TooManyTags => "Too many tags",
            ValidationError::TagTooLong => "Tag too long",
            ValidationError::InvalidLocation => "Invalid coordinates",
            ValidationError::InvalidEmergencyContact => "Emergency contact must be a phone number or email",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

pub fn validate_vibe(raw: &str) -> Result<Vibe, ValidationError> {
    Vibe::parse(raw).ok_or(ValidationError::InvalidVibe)
}

/// Strip markup, trim, and drop empty tags, then enforce count and length
/// caps on what remains.
pub fn validate_tags(raw: &[String]) -> Result<Vec<String>, ValidationError> {
    let tags: Vec<String> = raw
        .iter()
        .map(|t| strip_markup(t))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    if tags.len() > MAX_TAGS {
        return Err(ValidationError::TooManyTags);
    }
    if tags.iter().any(|t| t.chars().count() > MAX_TAG_LENGTH) {
        return Err(ValidationError::TagTooLong);
    }
    Ok(tags)
}

/// Coordinates must be finite and inside the valid lat/lng envelope.
pub fn validate_location(lat: f64, lng: f64) -> Result<Location, ValidationError> {
    if !lat.is_finite() || !lng.is_finite() || lat.abs() > 90.0 || lng.abs() > 180.0 {
        return Err(ValidationError::InvalidLocation);
    }
    Ok(Location { lat, lng })
}

/// Accepts an email shape (one `@` with non-empty sides) or a phone shape
/// (at least 7 digits, only digits and common separators).
pub fn validate_emergency_contact(raw: &str) -> Result<String, ValidationError> {
    let contact = raw.trim();
    if contact.is_empty() || contact.chars().count() > MAX_CONTACT_LENGTH {
        return Err(ValidationError::InvalidEmergencyContact);
    }

    if looks_like_email(contact) || looks_like_phone(contact) {
        Ok(contact.to_string())
    } else {
        Err(ValidationError::InvalidEmergencyContact)
    }
}

/// Drop anything that looks like an HTML/XML tag. Tags are displayed raw on
/// other people's radars, so markup never survives validation.
fn strip_markup(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn looks_like_email(s: &str) -> bool {
    let mut parts = s.splitn(2, '@');
    match (parts.next(), parts.next()) {
        (Some(local), Some(domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        _ => false,
    }
}

fn looks_like_phone(s: &str) -> bool {
    let digits = s.chars().filter(|c| c.is_ascii_digit()).count();
    digits >= 7
        && s.chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vibe() {
        assert_eq!(validate_vibe("banter"), Ok(Vibe::Banter));
        assert_eq!(validate_vibe("rage"), Err(ValidationError::InvalidVibe));
    }

    #[test]
    fn test_tags_trimmed_and_filtered() {
        let raw = vec!["  Tech curious ".into(), "".into(), "   ".into(), "music".into()];
        assert_eq!(
            validate_tags(&raw).unwrap(),
            vec!["Tech curious".to_string(), "music".to_string()]
        );
    }

    #[test]
    fn test_tags_markup_stripped() {
        let raw = vec!["<script>alert(1)</script>music".into(), "<b></b>".into()];
        assert_eq!(
            validate_tags(&raw).unwrap(),
            vec!["alert(1)music".to_string()]
        );
    }

    #[test]
    fn test_tag_caps() {
        let many: Vec<String> = (0..11).map(|i| format!("t{i}")).collect();
        assert_eq!(validate_tags(&many), Err(ValidationError::TooManyTags));

        let long = vec!["x".repeat(51)];
        assert_eq!(validate_tags(&long), Err(ValidationError::TagTooLong));
        assert!(validate_tags(&["x".repeat(50)]).is_ok());
    }

    #[test]
    fn test_location_bounds() {
        assert!(validate_location(45.0, -122.0).is_ok());
        assert_eq!(
            validate_location(91.0, 0.0),
            Err(ValidationError::InvalidLocation)
        );
        assert_eq!(
            validate_location(0.0, 180.5),
            Err(ValidationError::InvalidLocation)
        );
        assert_eq!(
            validate_location(f64::NAN, 0.0),
            Err(ValidationError::InvalidLocation)
        );
    }

    #[test]
    fn test_emergency_contact_shapes() {
        assert!(validate_emergency_contact("a@b.com").is_ok());
        assert!(validate_emergency_contact("+1 (555) 123-4567").is_ok());
        assert_eq!(
            validate_emergency_contact("  7735551234  ").unwrap(),
            "7735551234"
        );
        assert!(validate_emergency_contact("not a contact").is_err());
        assert!(validate_emergency_contact("@nodomain").is_err());
        assert!(validate_emergency_contact("123").is_err());
        assert!(validate_emergency_contact("").is_err());
    }
}
