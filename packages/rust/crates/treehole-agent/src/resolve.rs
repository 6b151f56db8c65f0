//! Value resolution with precedence: environment > settings > default.

pub(crate) fn resolve_string(env_name: &str, settings_value: Option<&str>, default: &str) -> String {
    if let Ok(value) = std::env::var(env_name)
        && !value.trim().is_empty()
    {
        return value.trim().to_string();
    }
    if let Some(value) = settings_value
        && !value.trim().is_empty()
    {
        return value.trim().to_string();
    }
    default.to_string()
}

pub(crate) fn resolve_optional_string(
    env_name: &str,
    settings_value: Option<&str>,
) -> Option<String> {
    if let Ok(value) = std::env::var(env_name)
        && !value.trim().is_empty()
    {
        return Some(value.trim().to_string());
    }
    settings_value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

pub(crate) fn resolve_positive_u64(env_name: &str, settings_value: Option<u64>, default: u64) -> u64 {
    if let Some(value) = parse_positive_u64_from_env(env_name) {
        return value;
    }
    if let Some(value) = settings_value
        && value > 0
    {
        return value;
    }
    default
}

pub(crate) fn resolve_positive_usize(
    env_name: &str,
    settings_value: Option<usize>,
    default: usize,
) -> usize {
    if let Some(value) = parse_positive_usize_from_env(env_name) {
        return value;
    }
    if let Some(value) = settings_value
        && value > 0
    {
        return value;
    }
    default
}

/// Zero is a valid value here (it disables the delay).
pub(crate) fn resolve_u64(env_name: &str, settings_value: Option<u64>, default: u64) -> u64 {
    if let Ok(raw) = std::env::var(env_name) {
        match raw.trim().parse::<u64>() {
            Ok(value) => return value,
            Err(_) => {
                tracing::warn!(env_var = %env_name, value = %raw, "invalid integer env value");
            }
        }
    }
    settings_value.unwrap_or(default)
}

pub(crate) fn resolve_bool(env_name: &str, settings_value: Option<bool>, default: bool) -> bool {
    parse_bool_from_env(env_name)
        .or(settings_value)
        .unwrap_or(default)
}

pub(crate) fn parse_positive_usize_from_env(name: &str) -> Option<usize> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            tracing::warn!(env_var = %name, value = %raw, "invalid positive integer env value");
            None
        }
    }
}

pub(crate) fn parse_positive_u64_from_env(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            tracing::warn!(env_var = %name, value = %raw, "invalid positive integer env value");
            None
        }
    }
}

pub(crate) fn parse_bool_from_env(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(
                env_var = %name,
                value = %raw,
                "invalid boolean env value"
            );
            None
        }
    }
}
