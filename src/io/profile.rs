//! Read/write `.gr` profile files.
//!
//! A `.gr` file is a text table of `r  G(r)` pairs, optionally preceded by a
//! free-form header and followed by extra columns (uncertainties), which are
//! ignored. Any line whose first two fields are not numbers is treated as
//! header or comment text.

use std::fs;
use std::path::Path;

use crate::error::AppError;
use crate::model::Profile;

/// Parse profile text. `origin` is only used in error messages.
pub fn parse_profile(text: &str, origin: &str) -> Result<Profile, AppError> {
    let mut r = Vec::new();
    let mut g = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(x), Some(y)) = (fields.next(), fields.next()) else {
            continue;
        };
        let (Ok(x), Ok(y)) = (x.parse::<f64>(), y.parse::<f64>()) else {
            continue;
        };
        if !(x.is_finite() && y.is_finite()) {
            return Err(AppError::Validation(format!(
                "{origin}: non-finite value at r={x}"
            )));
        }
        if let Some(&prev) = r.last() {
            if x <= prev {
                return Err(AppError::Validation(format!(
                    "{origin}: r must be strictly increasing ({x} after {prev})"
                )));
            }
        }
        r.push(x);
        g.push(y);
    }

    if r.len() < 2 {
        return Err(AppError::Validation(format!(
            "{origin}: expected at least two data rows, found {}",
            r.len()
        )));
    }
    Ok(Profile { r, g })
}

pub fn read_profile(path: &Path) -> Result<Profile, AppError> {
    let text = fs::read_to_string(path).map_err(|e| AppError::io(path, e))?;
    parse_profile(&text, &path.display().to_string())
}

/// Write a profile with `#`-prefixed header lines.
pub fn write_profile(path: &Path, profile: &Profile, header: &[String]) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| AppError::io(parent, e))?;
    }
    let mut out = String::new();
    for line in header {
        out.push_str(&format!("# {line}\n"));
    }
    for (x, y) in profile.r.iter().zip(&profile.g) {
        out.push_str(&format!("{x:.6} {y:.8}\n"));
    }
    fs::write(path, out).map_err(|e| AppError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_header_and_extra_columns() {
        let text = "\
[DEFAULT]
version = 3.0
#### start data
#L r(A) G(A^-2)
1.00 0.5 0.01
1.50 -0.25 0.01

2.00 1.0
";
        let profile = parse_profile(text, "ni.gr").unwrap();
        assert_eq!(profile.r, vec![1.0, 1.5, 2.0]);
        assert_eq!(profile.g, vec![0.5, -0.25, 1.0]);
    }

    #[test]
    fn rejects_unsorted_or_short_tables() {
        let err = parse_profile("1.0 0.0\n0.5 0.0\n", "bad.gr").unwrap_err();
        assert!(err.to_string().contains("strictly increasing"), "{err}");
        let err = parse_profile("# nothing\n1.0 0.0\n", "short.gr").unwrap_err();
        assert!(err.to_string().contains("at least two"), "{err}");
    }

    #[test]
    fn write_then_read_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("sim_300K.gr");
        let profile = Profile {
            r: vec![1.0, 1.01, 1.02],
            g: vec![0.125, -0.5, 2.0],
        };
        write_profile(&path, &profile, &["simulated".to_string()]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# simulated\n"));
        assert_eq!(read_profile(&path).unwrap(), profile);
    }
}
