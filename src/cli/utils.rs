use simple_error::{SimpleResult, bail};

/// Check a required input filename
///
/// Assumes no logger has been configured yet
///
pub fn check_required_filename(filename: &str, label: &str) -> SimpleResult<()> {
    if filename.is_empty() {
        bail!("Must specify {label} file");
    }
    let path = std::path::Path::new(&filename);
    if !path.exists() {
        bail!("Can't find specified {label} file: '{filename}'");
    }
    if !path.is_file() {
        bail!("Specified {label} file path does not appear to be a file: '{filename}'");
    }
    Ok(())
}

/// Parse a non-negative integer with an optional 'k', 'm' or 'g' suffix, such as '100k'
///
/// Suffixes are decimal multipliers and are not case sensitive.
///
pub fn parse_size(value: &str) -> Result<i64, String> {
    let value = value.trim();
    let (digits, multiplier) = match value.chars().last().map(|x| x.to_ascii_lowercase()) {
        Some('k') => (&value[..value.len() - 1], 1_000),
        Some('m') => (&value[..value.len() - 1], 1_000_000),
        Some('g') => (&value[..value.len() - 1], 1_000_000_000),
        _ => (value, 1),
    };
    let size = digits
        .parse::<i64>()
        .map_err(|_| format!("Invalid size value: '{value}'"))?;
    if size < 0 {
        return Err(format!("Size value can't be negative: '{value}'"));
    }
    size.checked_mul(multiplier)
        .ok_or_else(|| format!("Size value is too large: '{value}'"))
}
