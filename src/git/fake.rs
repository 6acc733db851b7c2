//! Scripted in-memory git used by the pipeline tests.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use super::{render_command, GitError, GitRunner};

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub dir: PathBuf,
    pub args: Vec<String>,
    pub started: u64,
    pub finished: u64,
}

impl Call {
    pub fn is(&self, subcommand: &str) -> bool {
        self.args.first().map(String::as_str) == Some(subcommand)
    }

    fn overlaps(&self, other: &Call) -> bool {
        self.started < other.finished && other.started < self.finished
    }
}

struct FakeRepo {
    origin: String,
    // (config key, path, url, object type)
    entries: Vec<(String, String, String, String)>,
}

#[derive(Default)]
struct State {
    repos: HashMap<PathBuf, FakeRepo>,
    bare: HashSet<PathBuf>,
    failing_urls: HashSet<String>,
    calls: Vec<Call>,
    clock: u64,
}

#[derive(Default)]
pub(crate) struct FakeGit {
    state: Mutex<State>,
    delay: Duration,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every clone, fetch and submodule update takes `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        FakeGit {
            delay,
            ..Self::default()
        }
    }

    /// Registers a repository with `(config key, path, url, object type)`
    /// submodule entries and writes its `.gitmodules` marker to disk.
    pub fn add_repo(&self, path: &Path, origin: &str, entries: &[(&str, &str, &str, &str)]) {
        std::fs::create_dir_all(path).unwrap();
        if !entries.is_empty() {
            std::fs::write(path.join(".gitmodules"), "").unwrap();
        }
        let repo = FakeRepo {
            origin: origin.to_owned(),
            entries: entries
                .iter()
                .map(|(key, path, url, kind)| {
                    (
                        key.to_string(),
                        path.to_string(),
                        url.to_string(),
                        kind.to_string(),
                    )
                })
                .collect(),
        };
        self.state.lock().unwrap().repos.insert(path.to_owned(), repo);
    }

    pub fn fail_url(&self, url: &str) {
        self.state.lock().unwrap().failing_urls.insert(url.to_owned());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_of(&self, subcommand: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.is(subcommand)).collect()
    }

    /// Number of clone and fetch invocations targeting `mirror_dir`.
    pub fn mirror_operations(&self, mirror_dir: &Path) -> usize {
        self.calls()
            .iter()
            .filter(|c| {
                (c.is("clone") && c.args.last().map(PathBuf::from).as_deref() == Some(mirror_dir))
                    || (c.is("fetch") && c.dir == mirror_dir)
            })
            .count()
    }

    /// Asserts that no two `submodule update` calls in the same repository
    /// overlapped in time.
    pub fn assert_updates_sequential(&self) {
        let updates = self.calls_of("submodule");
        for (i, a) in updates.iter().enumerate() {
            for b in &updates[i + 1..] {
                assert!(
                    a.dir != b.dir || !a.overlaps(b),
                    "overlapping updates in {}: {:?} and {:?}",
                    a.dir.display(),
                    a.args,
                    b.args
                );
            }
        }
    }

    fn begin(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.clock += 1;
        state.clock
    }

    fn finish(&self, dir: &Path, args: &[String], started: u64) -> Result<String, GitError> {
        let mut state = self.state.lock().unwrap();
        state.clock += 1;
        let finished = state.clock;
        state.calls.push(Call {
            dir: dir.to_owned(),
            args: args.to_vec(),
            started,
            finished,
        });
        state.respond(dir, args)
    }
}

impl State {
    fn respond(&mut self, dir: &Path, args: &[String]) -> Result<String, GitError> {
        let fail = |code: i32| GitError::Failed {
            command: render_command(dir, args),
            status: format!("exit status: {code}"),
            code: Some(code),
            output: "fatal: scripted failure".to_owned(),
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        match args.as_slice() {
            ["config", "--file", _, "--get-regexp", _] => {
                let repo = self.repos.get(dir).ok_or_else(|| fail(1))?;
                let mut output = String::new();
                for (key, path, url, _) in &repo.entries {
                    output.push_str(&format!("submodule.{key}.path {path}\n"));
                    output.push_str(&format!("submodule.{key}.url {url}\n"));
                }
                Ok(output)
            }
            ["config", "--get", "remote.origin.url"] => match self.repos.get(dir) {
                Some(repo) if !repo.origin.is_empty() => Ok(format!("{}\n", repo.origin)),
                _ => Err(fail(1)),
            },
            ["ls-tree", "-z", "-d", _, "HEAD", paths @ ..] => {
                let repo = self.repos.get(dir).ok_or_else(|| fail(128))?;
                let mut output = String::new();
                for (_, path, _, kind) in &repo.entries {
                    if paths.contains(&path.as_str()) && kind != "missing" {
                        output.push_str(&format!("{kind} {path}\0"));
                    }
                }
                Ok(output)
            }
            ["submodule", "update", ..] => Ok(String::new()),
            ["rev-parse", "--is-bare-repository"] => {
                if self.bare.contains(dir) {
                    Ok("true\n".to_owned())
                } else {
                    Err(fail(128))
                }
            }
            ["clone", "--mirror", "--", url, mirror_dir] => {
                if self.failing_urls.contains(*url) {
                    return Err(fail(128));
                }
                self.bare.insert(PathBuf::from(*mirror_dir));
                Ok(String::new())
            }
            ["fetch", "--no-recurse-submodules", "origin"] => {
                if self.bare.contains(dir) {
                    Ok(String::new())
                } else {
                    Err(fail(128))
                }
            }
            _ => Err(fail(129)),
        }
    }
}

impl GitRunner for FakeGit {
    async fn run(&self, dir: &Path, args: &[String]) -> Result<String, GitError> {
        let started = self.begin();
        let slow = matches!(
            args.first().map(String::as_str),
            Some("clone" | "fetch" | "submodule")
        );
        if slow && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.finish(dir, args, started)
    }
}
