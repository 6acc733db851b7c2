use std::{collections::HashMap, path::Path, sync::OnceLock};

use log::{debug, warn};
use regex_lite::Regex;
use thiserror::Error;

use super::{GitError, GitRunner};

const GITMODULES: &str = ".gitmodules";

/// One `.gitmodules` entry of a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submodule {
    /// Name of the entry in `.gitmodules`
    pub config_key: String,
    /// Where the submodule is checked out, relative to the repository root
    pub relative_path: String,
    /// Remote repository url, already resolved against `origin`
    pub remote_url: String,
}

#[derive(Error, Debug)]
pub enum SubmoduleError {
    #[error("Git error: {0}")]
    Git(#[from] GitError),
    #[error("could not parse git config output line '{0}'")]
    MalformedLine(String),
    #[error("could not parse git config submodule line '{0}'")]
    MalformedKey(String),
    #[error("submodule '{config_key}' has no {attribute} configured")]
    MissingAttribute {
        config_key: String,
        attribute: &'static str,
    },
    #[error("submodule '{config_key}' uses relative url '{url}' but the repository has no origin remote")]
    MissingOrigin { config_key: String, url: String },
    #[error("can not resolve relative url '{url}' against '{origin}'")]
    UnresolvableUrl { url: String, origin: String },
}

/// Lists the submodules of the repository at `repo_path` that point at a
/// committed object, in the order they appear in `.gitmodules`.
///
/// Relative remote urls are resolved against the `origin` remote of the
/// repository. Entries that are not recorded as a commit in `HEAD` are
/// skipped.
pub async fn enumerate<R: GitRunner>(
    runner: &R,
    repo_path: &Path,
) -> Result<Vec<Submodule>, SubmoduleError> {
    if !repo_path.join(GITMODULES).is_file() {
        debug!("No {} in {}", GITMODULES, repo_path.display());
        return Ok(Vec::new());
    }

    let args = [
        "config",
        "--file",
        GITMODULES,
        "--get-regexp",
        "submodule\\.",
    ]
    .map(String::from);
    let output = match runner.run(repo_path, &args).await {
        Ok(output) => output,
        // git config exits with 1 when nothing matches
        Err(error) if error.exit_code() == Some(1) => String::new(),
        Err(error) => return Err(error.into()),
    };

    let mut submodules = parse_submodule_config(&output)?;
    if submodules.is_empty() {
        return Ok(submodules);
    }

    resolve_relative_urls(runner, repo_path, &mut submodules).await?;
    retain_commits(runner, repo_path, submodules).await
}

/// Parses `git config --get-regexp submodule\.` output such as
///
/// ```text
/// submodule.<config-key>.path <path-in-repo>
/// submodule.<config-key>.url <remote-url>
/// ```
///
/// Attributes other than `path` and `url` are ignored.
pub fn parse_submodule_config(output: &str) -> Result<Vec<Submodule>, SubmoduleError> {
    let mut order: Vec<String> = Vec::new();
    let mut entries: HashMap<String, (Option<String>, Option<String>)> = HashMap::new();

    for line in output.lines().filter(|line| !line.trim().is_empty()) {
        let (key, value) = line
            .split_once(' ')
            .ok_or_else(|| SubmoduleError::MalformedLine(line.to_owned()))?;
        let captures = submodule_key_regex()
            .captures(key)
            .ok_or_else(|| SubmoduleError::MalformedKey(line.to_owned()))?;
        let config_key = &captures["name"];

        let entry = entries.entry(config_key.to_owned()).or_insert_with(|| {
            order.push(config_key.to_owned());
            (None, None)
        });
        match &captures["attribute"] {
            "path" => entry.0 = Some(value.to_owned()),
            "url" => entry.1 = Some(value.to_owned()),
            _ => {}
        }
    }

    order
        .into_iter()
        .map(|config_key| {
            let (path, url) = entries.remove(&config_key).unwrap_or_default();
            let relative_path = path.ok_or_else(|| SubmoduleError::MissingAttribute {
                config_key: config_key.clone(),
                attribute: "path",
            })?;
            let remote_url = url.ok_or_else(|| SubmoduleError::MissingAttribute {
                config_key: config_key.clone(),
                attribute: "url",
            })?;
            Ok(Submodule {
                config_key,
                relative_path,
                remote_url,
            })
        })
        .collect()
}

fn submodule_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Subsection names may contain dots, the attribute never does.
    RE.get_or_init(|| {
        Regex::new(r"^submodule\.(?P<name>.+)\.(?P<attribute>[^.]+)$")
            .expect("submodule key pattern is valid")
    })
}

pub fn is_relative_url(url: &str) -> bool {
    url.starts_with("./") || url.starts_with("../")
}

/// Resolves a `./` or `../` submodule url against the superproject's origin
/// url the way `git submodule` does.
pub fn resolve_relative_url(origin: &str, url: &str) -> Result<String, SubmoduleError> {
    let unresolvable = || SubmoduleError::UnresolvableUrl {
        url: url.to_owned(),
        origin: origin.to_owned(),
    };

    let mut base = origin.trim_end_matches('/').to_owned();
    let mut rest = url;
    loop {
        if let Some(stripped) = rest.strip_prefix("./") {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix("../") {
            rest = stripped;
            base = parent_url(&base).ok_or_else(unresolvable)?;
        } else if rest == ".." {
            rest = "";
            base = parent_url(&base).ok_or_else(unresolvable)?;
        } else if rest == "." {
            rest = "";
        } else {
            break;
        }
    }

    if rest.is_empty() {
        Ok(base)
    } else if base.ends_with(':') {
        Ok(format!("{base}{rest}"))
    } else {
        Ok(format!("{base}/{rest}"))
    }
}

/// Drops the last path component of a url. For scp-like urls
/// (`host:path`) the `:` is kept.
fn parent_url(url: &str) -> Option<String> {
    let floor = url.find("://").map(|i| i + 3).unwrap_or(0);
    let tail = &url[floor..];
    let separator = tail.rfind(['/', ':'])?;
    let absolute = floor + separator;
    if url[absolute..].starts_with(':') {
        Some(url[..=absolute].to_owned())
    } else {
        Some(url[..absolute].to_owned())
    }
}

async fn resolve_relative_urls<R: GitRunner>(
    runner: &R,
    repo_path: &Path,
    submodules: &mut [Submodule],
) -> Result<(), SubmoduleError> {
    if !submodules.iter().any(|s| is_relative_url(&s.remote_url)) {
        return Ok(());
    }

    let args = ["config", "--get", "remote.origin.url"].map(String::from);
    let origin = match runner.run(repo_path, &args).await {
        Ok(output) => Some(output.trim().to_owned()).filter(|origin| !origin.is_empty()),
        Err(error) if error.exit_code() == Some(1) => None,
        Err(error) => return Err(error.into()),
    };

    for submodule in submodules
        .iter_mut()
        .filter(|s| is_relative_url(&s.remote_url))
    {
        let origin = origin
            .as_deref()
            .ok_or_else(|| SubmoduleError::MissingOrigin {
                config_key: submodule.config_key.clone(),
                url: submodule.remote_url.clone(),
            })?;
        let resolved = resolve_relative_url(origin, &submodule.remote_url)?;
        debug!(
            "Resolved submodule url {} to {}",
            submodule.remote_url, resolved
        );
        submodule.remote_url = resolved;
    }

    Ok(())
}

/// Keeps only the submodules whose path is recorded as a commit object in
/// `HEAD`.
async fn retain_commits<R: GitRunner>(
    runner: &R,
    repo_path: &Path,
    submodules: Vec<Submodule>,
) -> Result<Vec<Submodule>, SubmoduleError> {
    // -z keeps paths unquoted, so they compare equal to the .gitmodules ones
    let mut args = [
        "ls-tree",
        "-z",
        "-d",
        "--format=%(objecttype) %(path)",
        "HEAD",
    ]
    .map(String::from)
    .to_vec();
    args.extend(submodules.iter().map(|s| s.relative_path.clone()));

    let output = runner.run(repo_path, &args).await?;
    let object_types: HashMap<&str, &str> = output
        .split('\0')
        .filter_map(|record| record.split_once(' '))
        .map(|(object_type, path)| (path, object_type))
        .collect();

    Ok(submodules
        .into_iter()
        .filter(|submodule| {
            match object_types.get(submodule.relative_path.as_str()) {
                Some(&"commit") => true,
                Some(object_type) => {
                    warn!(
                        "Skipping submodule {}: {} is a {}, not a commit",
                        submodule.config_key, submodule.relative_path, object_type
                    );
                    false
                }
                None => {
                    warn!(
                        "Skipping submodule {}: {} is not recorded in HEAD",
                        submodule.config_key, submodule.relative_path
                    );
                    false
                }
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::git::{fake::FakeGit, GitCli};

    fn submodule(config_key: &str, relative_path: &str, remote_url: &str) -> Submodule {
        Submodule {
            config_key: config_key.to_owned(),
            relative_path: relative_path.to_owned(),
            remote_url: remote_url.to_owned(),
        }
    }

    #[test]
    fn parse_keeps_declaration_order() {
        let output = "\
submodule.zeta.path libs/zeta
submodule.zeta.url https://example.com/zeta.git
submodule.alpha.path libs/alpha
submodule.alpha.branch main
submodule.alpha.url git@example.com:org/alpha.git
";
        assert_eq!(
            parse_submodule_config(output).unwrap(),
            vec![
                submodule("zeta", "libs/zeta", "https://example.com/zeta.git"),
                submodule("alpha", "libs/alpha", "git@example.com:org/alpha.git"),
            ]
        );
    }

    #[test]
    fn parse_accepts_dotted_names_and_spaces_in_paths() {
        let output = "\
submodule.vendor.lib.v2.path vendor/my lib
submodule.vendor.lib.v2.url ../lib.git
";
        assert_eq!(
            parse_submodule_config(output).unwrap(),
            vec![submodule("vendor.lib.v2", "vendor/my lib", "../lib.git")]
        );
    }

    #[test]
    fn parse_rejects_malformed_lines() {
        assert!(matches!(
            parse_submodule_config("submodule.a.path"),
            Err(SubmoduleError::MalformedLine(_))
        ));
        assert!(matches!(
            parse_submodule_config("core.bare false"),
            Err(SubmoduleError::MalformedKey(_))
        ));
    }

    #[test]
    fn parse_requires_path_and_url() {
        let error = parse_submodule_config("submodule.a.path a").unwrap_err();
        assert_eq!(
            error.to_string(),
            "submodule 'a' has no url configured".to_string()
        );
    }

    #[test]
    fn relative_urls() {
        let cases = [
            ("https://example.com/org/repo.git", "../other.git", "https://example.com/org/other.git"),
            ("https://example.com/org/repo/", "./child", "https://example.com/org/repo/child"),
            ("https://example.com/org/repo", "../../x/y.git", "https://example.com/x/y.git"),
            ("git@example.com:org/repo.git", "../lib.git", "git@example.com:org/lib.git"),
            ("git@example.com:repo.git", "../lib.git", "git@example.com:lib.git"),
            ("/srv/git/repo", "../lib", "/srv/git/lib"),
        ];
        for (origin, url, expected) in cases {
            assert_eq!(resolve_relative_url(origin, url).unwrap(), expected, "{origin} + {url}");
        }
    }

    #[test]
    fn relative_url_beyond_root() {
        assert!(matches!(
            resolve_relative_url("repo", "../lib"),
            Err(SubmoduleError::UnresolvableUrl { .. })
        ));
    }

    #[tokio::test]
    async fn enumerate_resolves_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::new();
        git.add_repo(
            dir.path(),
            "https://example.com/org/root.git",
            &[
                ("a", "deps/a", "../a.git", "commit"),
                ("docs", "docs", "https://example.com/docs.git", "tree"),
                ("b", "deps/b", "https://example.com/b.git", "commit"),
            ],
        );

        let submodules = enumerate(&git, dir.path()).await.unwrap();

        assert_eq!(
            submodules,
            vec![
                submodule("a", "deps/a", "https://example.com/org/a.git"),
                submodule("b", "deps/b", "https://example.com/b.git"),
            ]
        );
    }

    #[tokio::test]
    async fn enumerate_keeps_non_ascii_paths() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::new();
        git.add_repo(
            dir.path(),
            "",
            &[
                ("dép", "dép", "https://example.com/dep.git", "commit"),
                ("plain", "plain", "https://example.com/plain.git", "commit"),
            ],
        );

        let submodules = enumerate(&git, dir.path()).await.unwrap();

        assert_eq!(
            submodules,
            vec![
                submodule("dép", "dép", "https://example.com/dep.git"),
                submodule("plain", "plain", "https://example.com/plain.git"),
            ]
        );
    }

    async fn git(dir: &Path, args: &[&str]) -> String {
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        GitCli::default().run(dir, &args).await.unwrap()
    }

    #[tokio::test]
    async fn enumerate_with_git_keeps_non_ascii_paths() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path();
        // Gitlink targets are never looked up, any id will do.
        let commit = "0123456789abcdef0123456789abcdef01234567";

        git(repo, &["init", "-q"]).await;
        for (name, url) in [
            ("dép", "https://example.com/dep.git"),
            ("plain", "https://example.com/plain.git"),
        ] {
            let path_key = format!("submodule.{name}.path");
            let url_key = format!("submodule.{name}.url");
            let cacheinfo = format!("160000,{commit},{name}");
            git(repo, &["config", "--file", ".gitmodules", &path_key, name]).await;
            git(repo, &["config", "--file", ".gitmodules", &url_key, url]).await;
            git(repo, &["update-index", "--add", "--cacheinfo", &cacheinfo]).await;
        }
        git(repo, &["add", ".gitmodules"]).await;
        git(
            repo,
            &[
                "-c",
                "user.name=submirror",
                "-c",
                "user.email=submirror@example.com",
                "-c",
                "commit.gpgsign=false",
                "commit",
                "-q",
                "-m",
                "add submodules",
            ],
        )
        .await;

        let paths: Vec<String> = enumerate(&GitCli::default(), repo)
            .await
            .unwrap()
            .into_iter()
            .map(|submodule| submodule.relative_path)
            .collect();

        assert_eq!(paths, vec!["dép", "plain"]);
    }

    #[tokio::test]
    async fn enumerate_without_gitmodules() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::new();

        assert_eq!(enumerate(&git, dir.path()).await.unwrap(), vec![]);
        assert!(git.calls().is_empty());
    }
}
