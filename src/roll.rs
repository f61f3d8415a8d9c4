//! Roll numbers are entered as a class-code prefix plus a numeric suffix and
//! stored recombined as `PREFIX-SUFFIX` (e.g. `2CS-07`). The prefix set is
//! fixed by the school's class codes; the suffix keeps its leading zeros.

pub const ROLL_PREFIXES: [&str; 9] = [
    "1CST", "2CS", "2CT", "3CS", "3CT", "4CS", "4CT", "5CS", "5CT",
];

/// Uppercase and check the prefix against the known class codes.
pub fn normalize_prefix(raw: &str) -> Result<String, String> {
    let upper = raw.trim().to_ascii_uppercase();
    if ROLL_PREFIXES.contains(&upper.as_str()) {
        Ok(upper)
    } else {
        Err(format!(
            "roll number prefix must be one of {}",
            ROLL_PREFIXES.join(",")
        ))
    }
}

/// The suffix must parse as a positive integer; the original text (leading
/// zeros included) is what gets combined.
pub fn validate_suffix(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    match trimmed.parse::<u64>() {
        Ok(n) if n > 0 => Ok(trimmed.to_string()),
        _ => Err("roll number suffix must be a positive integer".to_string()),
    }
}

pub fn combine(prefix: &str, suffix: &str) -> Result<String, String> {
    let prefix = normalize_prefix(prefix)?;
    let suffix = validate_suffix(suffix)?;
    Ok(format!("{prefix}-{suffix}"))
}

/// Split a stored roll number back into (prefix, suffix). Used by the sheet
/// exporter and the public search normalizer.
pub fn split(roll: &str) -> Option<(String, String)> {
    let (prefix, suffix) = roll.trim().split_once('-')?;
    Some((prefix.to_ascii_uppercase(), suffix.to_string()))
}

/// Normalize a user-supplied roll number for search: uppercase the prefix,
/// leave the suffix text alone.
pub fn normalize(roll: &str) -> String {
    match split(roll) {
        Some((prefix, suffix)) => format!("{prefix}-{suffix}"),
        None => roll.trim().to_ascii_uppercase(),
    }
}

/// Department key used to pick a transcript template from a class code or
/// roll prefix: CST beats CS/CT, anything unknown falls back to "default".
pub fn department_code(code: &str) -> &'static str {
    let upper = code.trim().to_ascii_uppercase();
    if upper.ends_with("CST") {
        "CST"
    } else if upper.ends_with("CS") {
        "CS"
    } else if upper.ends_with("CT") {
        "CT"
    } else {
        "default"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_uppercases_prefix_and_keeps_suffix_zeros() {
        assert_eq!(combine("2cs", "07").unwrap(), "2CS-07");
        assert_eq!(combine(" 1cst ", "112").unwrap(), "1CST-112");
    }

    #[test]
    fn combine_rejects_unknown_prefix_and_bad_suffix() {
        assert!(combine("6CS", "1").is_err());
        assert!(combine("2CS", "0").is_err());
        assert!(combine("2CS", "abc").is_err());
        assert!(combine("2CS", "-3").is_err());
    }

    #[test]
    fn split_and_normalize() {
        assert_eq!(split("2cs-07"), Some(("2CS".into(), "07".into())));
        assert_eq!(split("no dash"), None);
        assert_eq!(normalize(" 2cs-07 "), "2CS-07");
    }

    #[test]
    fn department_codes() {
        assert_eq!(department_code("1CST"), "CST");
        assert_eq!(department_code("4cs"), "CS");
        assert_eq!(department_code("3CT"), "CT");
        assert_eq!(department_code("ENG"), "default");
    }
}
