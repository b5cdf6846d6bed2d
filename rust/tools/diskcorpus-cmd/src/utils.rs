//! Common utilities for diskcorpus-cmd

use anyhow::Result;
use std::path::Path;

/// Checks if a file exists and is readable
pub fn validate_file_exists(path: &str) -> Result<()> {
    let file_path = Path::new(path);
    if !file_path.exists() {
        anyhow::bail!("File does not exist: {}", path);
    }
    if !file_path.is_file() {
        anyhow::bail!("Path is not a file: {}", path);
    }
    Ok(())
}

/// Formats file size in human-readable format
pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Parses a hit given as `id` or `id:score`; a missing score defaults to 0.
pub fn parse_hit(hit: &str) -> Result<(u64, f32)> {
    let (id, score) = match hit.split_once(':') {
        Some((id, score)) => (id, Some(score)),
        None => (hit, None),
    };
    let id = id
        .trim()
        .parse::<u64>()
        .map_err(|e| anyhow::anyhow!("Invalid document id in '{hit}': {e}"))?;
    let score = match score {
        Some(score) => score
            .trim()
            .parse::<f32>()
            .map_err(|e| anyhow::anyhow!("Invalid score in '{hit}': {e}"))?,
        None => 0.0,
    };
    Ok((id, score))
}

#[cfg(test)]
mod tests {
    use super::{format_size, parse_hit};

    #[test]
    fn test_parse_hit() {
        assert_eq!(parse_hit("2500").unwrap(), (2500, 0.0));
        assert_eq!(parse_hit("17:0.75").unwrap(), (17, 0.75));
        assert!(parse_hit("x:1").is_err());
        assert!(parse_hit("3:high").is_err());
        assert!(parse_hit("-1").is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.50 KB");
    }
}
