//! Encoding of logical RSC paths and server function ids into request paths.
//!
//! An RSC path may be empty or start or end with `/`. Those cases are made
//! explicit with a `_` marker, so RSC paths themselves must not start or end
//! with `_`. Every encoded path ends with `.txt`.

use crate::error::RscError;

const RSC_PATH_SUFFIX: &str = ".txt";
const FUNC_PREFIX: &str = "F/";

pub fn encode_rsc_path(rsc_path: &str) -> Result<String, RscError> {
    if rsc_path.starts_with('_') {
        return Err(RscError::InvalidRscPath(format!(
            "rscPath must not start with `_`: {rsc_path}"
        )));
    }
    if rsc_path.ends_with('_') {
        return Err(RscError::InvalidRscPath(format!(
            "rscPath must not end with `_`: {rsc_path}"
        )));
    }
    let mut encoded = if rsc_path.is_empty() {
        "_".to_string()
    } else {
        rsc_path.to_string()
    };
    if encoded.starts_with('/') {
        encoded.insert(0, '_');
    }
    if encoded.ends_with('/') {
        encoded.push('_');
    }
    encoded.push_str(RSC_PATH_SUFFIX);
    Ok(encoded)
}

pub fn decode_rsc_path(encoded: &str) -> Result<String, RscError> {
    let Some(rsc_path) = encoded.strip_suffix(RSC_PATH_SUFFIX) else {
        return Err(RscError::InvalidRscPath(format!(
            "Invalid encoded rscPath: {encoded}"
        )));
    };
    let rsc_path = rsc_path.strip_prefix('_').unwrap_or(rsc_path);
    let rsc_path = rsc_path.strip_suffix('_').unwrap_or(rsc_path);
    Ok(rsc_path.to_string())
}

/// `file#name` to `F/<file>/<name>`. Absolute files keep their leading `/`
/// behind a `_` marker.
pub fn encode_func_id(func_id: &str) -> Result<String, RscError> {
    let Some((file, name)) = func_id.split_once('#') else {
        return Err(RscError::InvalidFuncId(format!(
            "Function id must contain `#`: {func_id}"
        )));
    };
    if name.contains('/') {
        return Err(RscError::InvalidFuncId(format!(
            "Function name must not include `/`: {name}"
        )));
    }
    if file.starts_with('_') {
        return Err(RscError::InvalidFuncId(format!(
            "File must not start with `_`: {file}"
        )));
    }
    if file.starts_with('/') {
        Ok(format!("{FUNC_PREFIX}_{file}/{name}"))
    } else {
        Ok(format!("{FUNC_PREFIX}{file}/{name}"))
    }
}

/// Inverse of [`encode_func_id`]. Returns `None` for paths that are not
/// function paths.
pub fn decode_func_id(encoded: &str) -> Option<String> {
    let rest = encoded.strip_prefix(FUNC_PREFIX)?;
    let (file, name) = rest.rsplit_once('/')?;
    let file = file.strip_prefix('_').unwrap_or(file);
    Some(format!("{file}#{name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_rsc_path() {
        assert_eq!(encode_rsc_path("").unwrap(), "_.txt");
        assert_eq!(encode_rsc_path("foo").unwrap(), "foo.txt");
        assert_eq!(encode_rsc_path("/foo").unwrap(), "_/foo.txt");
        assert_eq!(encode_rsc_path("foo/").unwrap(), "foo/_.txt");
        assert_eq!(encode_rsc_path("/").unwrap(), "_/_.txt");
        assert!(matches!(
            encode_rsc_path("_foo"),
            Err(RscError::InvalidRscPath(..))
        ));
        assert!(encode_rsc_path("foo_").is_err());
    }

    #[test]
    fn test_decode_rsc_path() {
        for rsc_path in ["", "foo", "/foo", "foo/", "/", "R/about"] {
            let encoded = encode_rsc_path(rsc_path).unwrap();
            assert_eq!(decode_rsc_path(&encoded).unwrap(), rsc_path);
        }
        assert_eq!(
            decode_rsc_path("foo").unwrap_err().to_string(),
            "Invalid RSC path: Invalid encoded rscPath: foo"
        );
    }

    #[test]
    fn test_func_id() {
        assert_eq!(
            encode_func_id("/src/actions.js#save").unwrap(),
            "F/_/src/actions.js/save"
        );
        assert_eq!(encode_func_id("rsf0#default").unwrap(), "F/rsf0/default");
        assert_eq!(
            decode_func_id("F/_/src/actions.js/save").as_deref(),
            Some("/src/actions.js#save")
        );
        assert_eq!(decode_func_id("R/about"), None);
        assert!(encode_func_id("file#a/b").is_err());
        assert!(encode_func_id("_file#a").is_err());
        assert!(encode_func_id("no-hash").is_err());
    }
}
