//! Field-level rules shared by every writable entity kind

use steward_model::{Entity, WriteAction, WriteError, WriteResult};

/// Maximum name length in code points
pub const MAX_NAME_LENGTH: usize = 128;

/// Maximum description length in code points
pub const MAX_DESCRIPTION_LENGTH: usize = 1024;

#[inline]
fn is_name_character(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == ' ' || c == '-'
}

/// `name`: required, bounded, letters/digits/space/hyphen only
pub fn validate_name(name: &str) -> WriteResult<()> {
    if name.is_empty() {
        return Err(WriteError::missing("name", "name is required"));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(WriteError::invalid(
            "name",
            Some(name.to_string()),
            format!("name must be at most {MAX_NAME_LENGTH} characters"),
        ));
    }
    if !name.chars().all(is_name_character) {
        return Err(WriteError::invalid_character("name", name));
    }
    Ok(())
}

/// `description`: required and bounded
pub fn validate_description(description: &str) -> WriteResult<()> {
    if description.is_empty() {
        return Err(WriteError::missing("description", "description is required"));
    }
    if description.chars().count() > MAX_DESCRIPTION_LENGTH {
        return Err(WriteError::invalid(
            "description",
            Some(description.to_string()),
            format!("description must be at most {MAX_DESCRIPTION_LENGTH} characters"),
        ));
    }
    Ok(())
}

/// Generic entity validation applied before kind-specific rules
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityRuleValidator;

impl EntityRuleValidator {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Header rules, then name and description for named kinds
    ///
    /// Tracking details are server-owned. A create must not carry an id or
    /// token; an update must carry both.
    pub fn validate<T: Entity>(&self, action: WriteAction, entity: &T) -> WriteResult<()> {
        let header = entity.header();
        property_should_not_be_set(header.tracking_details.as_ref(), "trackingDetails")?;

        match action {
            WriteAction::Create => {
                property_should_not_be_set(header.id.as_ref(), "id")?;
                property_should_not_be_set(header.e_tag.as_ref(), "eTag")?;
            }
            WriteAction::Update => {
                property_required(header.e_tag.as_ref(), "eTag")?;
                property_required(header.id.as_ref(), "id")?;
            }
            WriteAction::SoftDelete => {}
        }

        if let Some(name) = entity.name() {
            validate_name(name)?;
        }
        if let Some(description) = entity.description() {
            validate_description(description)?;
        }
        Ok(())
    }
}

/// `MissingProperty` when absent
pub fn property_required<T>(value: Option<T>, target: &str) -> WriteResult<T> {
    value.ok_or_else(|| WriteError::missing(target, format!("{target} is required")))
}

/// `InvalidProperty` when present
pub fn property_should_not_be_set<T: std::fmt::Debug>(
    value: Option<T>,
    target: &str,
) -> WriteResult<()> {
    match value {
        Some(v) => Err(WriteError::invalid(
            target,
            Some(format!("{v:?}")),
            format!("{target} must not be set"),
        )),
        None => Ok(()),
    }
}
