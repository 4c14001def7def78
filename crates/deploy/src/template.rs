//! `{{placeholder}}` substitution for the bundled assets.

use anyhow::Result;

/// Replace every `{{key}}` with its value.
///
/// Fails when the output still holds a placeholder, so an asset and its
/// variables cannot drift apart silently. `${{ expr }}` expressions are left
/// alone since they contain spaces.
pub(crate) fn fill(template: &str, vars: &[(&str, &str)]) -> Result<String> {
    let mut rendered = template.to_string();
    for (key, value) in vars {
        rendered = rendered.replace(&format!("{{{{{}}}}}", key), value);
    }

    let missing = placeholders(&rendered);
    if !missing.is_empty() {
        anyhow::bail!("Unreplaced template placeholders: {}", missing.join(", "));
    }
    Ok(rendered)
}

/// Names of the `{{placeholder}}` markers left in `text`.
pub(crate) fn placeholders(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        let name = &after[..end];
        if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            found.push(name.to_string());
        }
        rest = &after[end + 2..];
    }
    found
}
