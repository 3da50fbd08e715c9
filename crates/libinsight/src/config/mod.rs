use std::path::{Component, Path, PathBuf};

use anyhow::{Result, bail};

use crate::store::DEFAULT_DB_FILE_NAME;

pub const DEFAULT_DATA_DIR_NAME: &str = ".libinsight";
pub const OUTPUT_DIR_NAME: &str = "output";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub home_dir: PathBuf,
    pub cwd: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub out_dir: PathBuf,
}

/// User-supplied locations; each may be relative to `cwd` or start with `~`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathOverrides<'a> {
    pub data_dir: Option<&'a Path>,
    pub db_path: Option<&'a Path>,
    pub out_dir: Option<&'a Path>,
}

pub fn resolve_runtime_paths(
    home_dir: &Path,
    cwd: &Path,
    overrides: PathOverrides<'_>,
) -> Result<RuntimePaths> {
    if !home_dir.is_absolute() {
        bail!("home_dir must be absolute: {}", home_dir.display());
    }
    if !cwd.is_absolute() {
        bail!("cwd must be absolute: {}", cwd.display());
    }

    let home_dir = normalize_lexical(home_dir);
    let cwd = normalize_lexical(cwd);
    let data_dir = match overrides.data_dir {
        Some(path) => resolve_user_path(path, &home_dir, &cwd)?,
        None => home_dir.join(DEFAULT_DATA_DIR_NAME),
    };
    let db_path = match overrides.db_path {
        Some(path) => resolve_user_path(path, &home_dir, &cwd)?,
        None => data_dir.join(DEFAULT_DB_FILE_NAME),
    };
    let out_dir = match overrides.out_dir {
        Some(path) => resolve_user_path(path, &home_dir, &cwd)?,
        None => data_dir.join(OUTPUT_DIR_NAME),
    };

    Ok(RuntimePaths {
        home_dir,
        cwd,
        data_dir: normalize_lexical(&data_dir),
        db_path: normalize_lexical(&db_path),
        out_dir: normalize_lexical(&out_dir),
    })
}

pub fn resolve_user_path(path: &Path, home_dir: &Path, cwd: &Path) -> Result<PathBuf> {
    let expanded = expand_tilde(path, home_dir)?;
    let resolved = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };

    Ok(normalize_lexical(&resolved))
}

/// `~` and `~/...` expand to the home directory; `~user` forms are refused.
fn expand_tilde(path: &Path, home_dir: &Path) -> Result<PathBuf> {
    if let Ok(rest) = path.strip_prefix("~") {
        return Ok(home_dir.join(rest));
    }

    let leading = path.components().next().and_then(|component| match component {
        Component::Normal(segment) => segment.to_str(),
        _ => None,
    });
    if leading.is_some_and(|segment| segment.starts_with('~')) {
        bail!(
            "only `~` and `~/...` expand to the home directory: {}",
            path.display()
        );
    }
    Ok(path.to_path_buf())
}

fn normalize_lexical(path: &Path) -> PathBuf {
    path.components()
        .fold(PathBuf::new(), |mut normalized, component| {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        normalized.push("..");
                    }
                }
                other => normalized.push(other.as_os_str()),
            }
            normalized
        })
}

#[cfg(test)]
mod tests {
    use super::{PathOverrides, resolve_runtime_paths};
    use std::path::Path;

    #[test]
    fn defaults_live_under_the_data_dir() {
        let paths = resolve_runtime_paths(
            Path::new("/home/tester"),
            Path::new("/work/repo"),
            PathOverrides::default(),
        )
        .expect("paths should resolve");

        assert_eq!(paths.home_dir, Path::new("/home/tester"));
        assert_eq!(paths.cwd, Path::new("/work/repo"));
        assert_eq!(paths.data_dir, Path::new("/home/tester/.libinsight"));
        assert_eq!(
            paths.db_path,
            Path::new("/home/tester/.libinsight/CatDewey.db")
        );
        assert_eq!(paths.out_dir, Path::new("/home/tester/.libinsight/output"));
    }

    #[test]
    fn data_dir_override_moves_db_and_output() {
        let paths = resolve_runtime_paths(
            Path::new("/home/tester"),
            Path::new("/work/repo"),
            PathOverrides {
                data_dir: Some(Path::new("~/library-data")),
                ..PathOverrides::default()
            },
        )
        .expect("tilde override should resolve");

        assert_eq!(paths.db_path, Path::new("/home/tester/library-data/CatDewey.db"));
        assert_eq!(paths.out_dir, Path::new("/home/tester/library-data/output"));
    }

    #[test]
    fn resolves_relative_db_path_against_cwd() {
        let paths = resolve_runtime_paths(
            Path::new("/home/tester"),
            Path::new("/work/repo"),
            PathOverrides {
                db_path: Some(Path::new("./data/../data/CatDewey.db")),
                ..PathOverrides::default()
            },
        )
        .expect("relative override should resolve");

        assert_eq!(paths.db_path, Path::new("/work/repo/data/CatDewey.db"));
        assert_eq!(paths.out_dir, Path::new("/home/tester/.libinsight/output"));
    }

    #[test]
    fn rejects_non_absolute_home_dir() {
        let err = resolve_runtime_paths(
            Path::new("home/tester"),
            Path::new("/work/repo"),
            PathOverrides::default(),
        )
        .expect_err("relative home dir must fail");

        assert!(
            err.to_string().contains("home_dir must be absolute"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn rejects_tilde_username_syntax() {
        let err = resolve_runtime_paths(
            Path::new("/home/tester"),
            Path::new("/work/repo"),
            PathOverrides {
                out_dir: Some(Path::new("~someone/out")),
                ..PathOverrides::default()
            },
        )
        .expect_err("~username syntax must fail");

        assert!(
            err.to_string().contains("expand to the home directory"),
            "unexpected error: {err}"
        );
    }
}
