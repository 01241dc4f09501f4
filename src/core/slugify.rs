use heck::{ToKebabCase, ToUpperCamelCase};

use crate::error::Error;
use crate::Result;

/// Identifier fragment for a stage name, used in generated code
/// (`provide<Fragment>Stack`). Characters outside `[A-Za-z0-9]` separate
/// words; every word is title-cased.
pub fn sanitize_stage_name(name: &str) -> String {
    let spaced: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();

    spaced
        .split_whitespace()
        .map(|word| word.to_upper_camel_case())
        .collect()
}

/// Kebab-case slug used for npm package names.
pub(crate) fn package_slug(value: &str) -> String {
    value.to_kebab_case()
}

/// Stage name with whitespace runs collapsed to `-`, safe for stack ids,
/// file names and artifact names once `/` is rejected.
pub fn file_slug(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join("-")
}

pub(crate) fn validate_stage_name(name: &str, field: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::config_invalid_value(
            field,
            Some(name.to_string()),
            "Stage name cannot be empty",
        ));
    }

    if name.chars().any(|c| c.is_control() || c == '\'' || c == '"' || c == '`') {
        return Err(Error::config_invalid_value(
            field,
            Some(name.to_string()),
            "Stage name contains control or quote characters",
        ));
    }

    // Stage names end up in stack ids, file names and artifact names.
    if name.contains('/') {
        return Err(Error::config_invalid_value(
            field,
            Some(name.to_string()),
            "Stage name cannot contain '/'",
        ));
    }

    if sanitize_stage_name(name).is_empty() {
        return Err(Error::config_invalid_value(
            field,
            Some(name.to_string()),
            "Stage name must contain at least one letter or number",
        ));
    }

    Ok(())
}
