/// Owner and repository names double as path segments under the
/// repository root, so they follow the gateway's locator rules.
pub fn validate_name(name: &str) -> anyhow::Result<()> {
    let is_valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with(".git")
        && !name.ends_with(".wiki")
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'));

    if is_valid {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "name must be lowercase letters, digits, '-', '_' or '.', and may not start with '.' or end in .git/.wiki"
        ))
    }
}

/// Splits `<owner>/<name>` and validates both halves.
pub fn parse_full_name(full_name: &str) -> anyhow::Result<(&str, &str)> {
    let (owner, name) = full_name
        .split_once('/')
        .ok_or_else(|| anyhow::anyhow!("expected <owner>/<name>, got {full_name}"))?;
    validate_name(owner)?;
    validate_name(name)?;
    Ok((owner, name))
}
