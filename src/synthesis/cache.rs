//! On-disk cache for synthesized realizations.
//!
//! Purpose
//! -------
//! Synthesis runs are expensive; realizations are persisted as CSV under a
//! directory keyed by a fingerprint of the run configuration, so repeated
//! calls with the same target and options reuse earlier draws. Each worker
//! writes its own file with exclusive creation, which keeps parallel runs
//! from clobbering one another.
//!
//! Format
//! ------
//! One file per realization, one CSV row per channel, `T` values per row.
//! Values are written with `Display` so they round-trip exactly through
//! `f64::from_str`.
use std::{
    collections::hash_map::DefaultHasher,
    fs::{self, OpenOptions},
    hash::{Hash, Hasher},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use ndarray::Array2;
use rand::Rng;

use crate::synthesis::errors::{SynthResult, SynthesisError};

/// Stable fingerprint over the strings describing a synthesis run.
///
/// Callers pass whatever identifies the run (model configuration, target
/// hash, tolerances); any change yields a fresh cache directory.
pub fn fingerprint<S: AsRef<str>>(parts: &[S]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for part in parts {
        part.as_ref().hash(&mut hasher);
    }
    hasher.finish()
}

/// Directory holding all realizations for one fingerprint.
pub fn run_dirpath(base: &Path, fp: u64) -> PathBuf {
    base.join(format!("scatcov_{fp:016x}"))
}

/// Persist one realization, returning the path written.
///
/// The filename carries a random suffix; if another worker happened to draw
/// the same one the write fails with [`SynthesisError::CacheCollision`]
/// rather than overwriting.
pub fn save_realization<R: Rng>(
    dir: &Path, x_hat: &Array2<f64>, rng: &mut R,
) -> SynthResult<PathBuf> {
    fs::create_dir_all(dir)
        .map_err(|err| SynthesisError::Io { path: dir.display().to_string(), text: err.to_string() })?;
    let suffix: u32 = rng.gen();
    let path = dir.join(format!("synth_{suffix:08x}.csv"));
    let mut file = OpenOptions::new().write(true).create_new(true).open(&path).map_err(|err| {
        if err.kind() == ErrorKind::AlreadyExists {
            SynthesisError::CacheCollision { path: path.display().to_string() }
        } else {
            SynthesisError::Io { path: path.display().to_string(), text: err.to_string() }
        }
    })?;
    let mut buf = String::new();
    for row in x_hat.rows() {
        let mut first = true;
        for &v in row {
            if !first {
                buf.push(',');
            }
            buf.push_str(&v.to_string());
            first = false;
        }
        buf.push('\n');
    }
    file.write_all(buf.as_bytes())
        .map_err(|err| SynthesisError::Io { path: path.display().to_string(), text: err.to_string() })?;
    Ok(path)
}

/// Read one realization back as `(N, T)`.
pub fn load_realization(path: &Path) -> SynthResult<Array2<f64>> {
    let text = fs::read_to_string(path)
        .map_err(|err| SynthesisError::Io { path: path.display().to_string(), text: err.to_string() })?;
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        let row = line
            .split(',')
            .map(|field| {
                field.trim().parse::<f64>().map_err(|err| SynthesisError::CacheFormat {
                    path: path.display().to_string(),
                    text: err.to_string(),
                })
            })
            .collect::<SynthResult<Vec<f64>>>()?;
        rows.push(row);
    }
    let n = rows.len();
    let t = rows.first().map_or(0, Vec::len);
    if n == 0 || t == 0 || rows.iter().any(|row| row.len() != t) {
        return Err(SynthesisError::CacheFormat {
            path: path.display().to_string(),
            text: "rows are empty or ragged".to_string(),
        });
    }
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((n, t), flat).map_err(|err| SynthesisError::CacheFormat {
        path: path.display().to_string(),
        text: err.to_string(),
    })
}

/// Load every realization cached under `dir`, in filename order.
///
/// A missing directory is an empty cache, not an error.
pub fn load_cached(dir: &Path) -> SynthResult<Vec<Array2<f64>>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(SynthesisError::Io {
                path: dir.display().to_string(),
                text: err.to_string(),
            });
        }
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    paths.sort();
    paths.iter().map(|p| load_realization(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Fingerprint stability and sensitivity to each part.
    // - Exact round trip of a realization through CSV.
    // - Collision detection under a rigged filename draw.
    // - Empty-cache behavior on a missing directory.
    // -------------------------------------------------------------------------

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("scatcov_cache_test_{tag}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        let a = fingerprint(&["cov", "J=8", "tol=1e-12"]);
        let b = fingerprint(&["cov", "J=8", "tol=1e-12"]);
        let c = fingerprint(&["cov", "J=9", "tol=1e-12"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn realizations_round_trip_exactly() {
        let dir = temp_dir("roundtrip");
        let x = Array2::from_shape_fn((2, 5), |(n, t)| {
            (n as f64 + 1.0) * (t as f64 - 2.3) / 7.0
        });
        let mut rng = StdRng::seed_from_u64(3);
        let path = save_realization(&dir, &x, &mut rng).expect("write");
        let back = load_realization(&path).expect("read");
        assert_eq!(back, x);

        let all = load_cached(&dir).expect("list");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], x);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn duplicate_filenames_collide_instead_of_overwriting() {
        let dir = temp_dir("collide");
        let x = Array2::zeros((1, 4));
        // identical seeds draw identical suffixes
        let mut rng1 = StdRng::seed_from_u64(7);
        let mut rng2 = StdRng::seed_from_u64(7);
        save_realization(&dir, &x, &mut rng1).expect("first write");
        let second = save_realization(&dir, &x, &mut rng2);
        assert!(matches!(second, Err(SynthesisError::CacheCollision { .. })));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_directory_is_an_empty_cache() {
        let dir = temp_dir("missing");
        assert!(load_cached(&dir).expect("empty").is_empty());
    }
}
