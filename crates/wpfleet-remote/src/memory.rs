//! In-memory host for tests.
//!
//! [`MemoryHost`] keeps a file map and understands the handful of shell
//! commands the store emits (`cat`, `test`, `cp`, `mv`, `ls`, heredoc
//! writes, `&&` chains). Anything else must be scripted with [`MemoryHost::on`];
//! unscripted commands exit 127.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use wpfleet_core::HostTarget;

use crate::error::TransportError;
use crate::transport::{BoxFuture, CommandOutput, Connection, Transport};

/// A canned command result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Response {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn fail(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

struct Rule {
    prefix: String,
    responses: Vec<Response>,
    next: usize,
}

impl Rule {
    /// Responses are consumed in order; the last one repeats.
    fn take(&mut self) -> Response {
        let idx = self.next.min(self.responses.len().saturating_sub(1));
        self.next += 1;
        self.responses[idx].clone()
    }
}

#[derive(Default)]
struct State {
    files: BTreeMap<String, String>,
    rules: Vec<Rule>,
    log: Vec<String>,
    closed: bool,
}

/// A fake host: files in a map, scripted command responses.
pub struct MemoryHost {
    host: String,
    latency: Option<Duration>,
    state: Mutex<State>,
}

impl MemoryHost {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            latency: None,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.put_file(path, content);
        self
    }

    /// Every command sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state().files.get(path).cloned()
    }

    pub fn put_file(&self, path: &str, content: &str) {
        self.state()
            .files
            .insert(path.to_string(), content.to_string());
    }

    pub fn paths(&self) -> Vec<String> {
        self.state().files.keys().cloned().collect()
    }

    /// Answer commands starting with `prefix`. Later rules win.
    pub fn on(&self, prefix: &str, response: Response) {
        self.on_sequence(prefix, vec![response]);
    }

    /// Answer successive matching commands from `responses`.
    pub fn on_sequence(&self, prefix: &str, responses: Vec<Response>) {
        if responses.is_empty() {
            return;
        }
        self.state().rules.push(Rule {
            prefix: prefix.to_string(),
            responses,
            next: 0,
        });
    }

    /// Every command executed so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the state from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn run(&self, command: &str) -> Response {
        let mut state = self.state();
        state.log.push(command.to_string());
        if let Some(rule) = state
            .rules
            .iter_mut()
            .rev()
            .find(|r| command.starts_with(&r.prefix))
        {
            return rule.take();
        }
        run_script(&mut state.files, command)
    }
}

impl Connection for MemoryHost {
    fn host(&self) -> &str {
        &self.host
    }

    fn execute<'a>(
        &'a self,
        command: &'a str,
    ) -> BoxFuture<'a, Result<CommandOutput, TransportError>> {
        Box::pin(async move {
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            let response = self.run(command);
            if response.status == 0 {
                Ok(CommandOutput {
                    stdout: response.stdout,
                    stderr: response.stderr,
                })
            } else {
                Err(TransportError::CommandFailed {
                    status: response.status,
                    stderr: response.stderr,
                })
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.state().closed = true;
        })
    }
}

/// Hands out connections to registered [`MemoryHost`]s and tracks how many
/// are open at once.
#[derive(Default)]
pub struct MemoryTransport {
    hosts: BTreeMap<String, Arc<MemoryHost>>,
    open: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: Arc<MemoryHost>) -> Self {
        self.hosts.insert(host.host.clone(), host);
        self
    }

    pub fn host(&self, name: &str) -> Option<Arc<MemoryHost>> {
        self.hosts.get(name).cloned()
    }

    /// Highest number of simultaneously open connections seen.
    pub fn peak_open(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn open_now(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    fn connect<'a>(
        &'a self,
        target: &'a HostTarget,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>, TransportError>> {
        Box::pin(async move {
            let host = self
                .hosts
                .get(target.host())
                .cloned()
                .ok_or_else(|| TransportError::Connect {
                    host: target.host().to_string(),
                    reason: "no route to host".to_string(),
                })?;
            let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            Ok(Box::new(MemoryConnection {
                host,
                open: Arc::clone(&self.open),
            }) as Box<dyn Connection>)
        })
    }
}

struct MemoryConnection {
    host: Arc<MemoryHost>,
    open: Arc<AtomicUsize>,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Connection for MemoryConnection {
    fn host(&self) -> &str {
        self.host.host()
    }

    fn execute<'a>(
        &'a self,
        command: &'a str,
    ) -> BoxFuture<'a, Result<CommandOutput, TransportError>> {
        self.host.execute(command)
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        self.host.close()
    }
}

// ---- shell interpretation ---------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Word {
    Lit(String),
    And,
}

/// Run a script: newline-separated statements, each an `&&` chain. A line
/// carrying `<<DELIM` takes the following lines up to `DELIM` as stdin.
fn run_script(files: &mut BTreeMap<String, String>, script: &str) -> Response {
    let mut lines = script.lines();
    let mut last = Response::ok("");
    let mut stdout = String::new();

    while let Some(line) = lines.next() {
        if line.trim().is_empty() {
            continue;
        }
        let words = match tokenize(line) {
            Some(words) => words,
            None => return Response::fail(2, "syntax error: unterminated quote"),
        };

        let mut stdin = None;
        let heredoc = words.iter().find_map(|w| match w {
            Word::Lit(s) => s.strip_prefix("<<").map(str::to_string),
            Word::And => None,
        });
        if let Some(delim) = heredoc {
            let mut body = String::new();
            let mut terminated = false;
            for body_line in lines.by_ref() {
                if body_line == delim {
                    terminated = true;
                    break;
                }
                body.push_str(body_line);
                body.push('\n');
            }
            if !terminated {
                return Response::fail(2, "syntax error: unterminated here-document");
            }
            stdin = Some(body);
        }

        for cmd in words.split(|w| *w == Word::And) {
            let args: Vec<&str> = cmd
                .iter()
                .filter_map(|w| match w {
                    Word::Lit(s) if !s.starts_with("<<") => Some(s.as_str()),
                    _ => None,
                })
                .collect();
            last = run_command(files, &args, stdin.take());
            stdout.push_str(&last.stdout);
            if last.status != 0 {
                break;
            }
        }
    }

    Response { stdout, ..last }
}

fn run_command(
    files: &mut BTreeMap<String, String>,
    args: &[&str],
    stdin: Option<String>,
) -> Response {
    let Some((&program, rest)) = args.split_first() else {
        return Response::ok("");
    };
    let operands: Vec<&str> = rest
        .iter()
        .copied()
        .filter(|a| !a.starts_with('-') || *a == "-")
        .collect();
    let missing = |p: &str| Response::fail(1, format!("{program}: {p}: No such file or directory"));

    match (program, rest.first().copied(), operands.as_slice()) {
        ("cat", Some(">"), [_, path]) => {
            files.insert(path.to_string(), stdin.unwrap_or_default());
            Response::ok("")
        }
        ("cat", _, [path]) => match files.get(*path) {
            Some(content) => Response::ok(content.clone()),
            None => missing(path),
        },
        ("test", Some("-f") | Some("-r"), [path]) => {
            if files.contains_key(*path) {
                Response::ok("")
            } else {
                Response::fail(1, "")
            }
        }
        ("cp", _, [src, dst]) => match files.get(*src).cloned() {
            Some(content) => {
                files.insert(dst.to_string(), content);
                Response::ok("")
            }
            None => missing(src),
        },
        ("mv", _, [src, dst]) => match files.remove(*src) {
            Some(content) => {
                files.insert(dst.to_string(), content);
                Response::ok("")
            }
            None => missing(src),
        },
        ("ls", _, [dir]) => {
            let prefix = if dir.ends_with('/') {
                dir.to_string()
            } else {
                format!("{dir}/")
            };
            let names: Vec<&str> = files
                .keys()
                .filter_map(|p| p.strip_prefix(&prefix))
                .filter(|name| !name.contains('/'))
                .collect();
            if names.is_empty() && !files.keys().any(|p| p.starts_with(&prefix)) {
                return missing(dir);
            }
            Response::ok(names.iter().map(|n| format!("{n}\n")).collect::<String>())
        }
        _ => Response::fail(127, format!("{program}: command not found")),
    }
}

/// Split a line into words: single quotes are literal, `\x` escapes one
/// character outside quotes, an unquoted `&&` separates commands.
fn tokenize(line: &str) -> Option<Vec<Word>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return None,
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(ch) = chars.next() {
                    current.push(ch);
                }
            }
            '&' if !in_word && chars.peek() == Some(&'&') => {
                chars.next();
                words.push(Word::And);
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(Word::Lit(std::mem::take(&mut current)));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(Word::Lit(current));
    }
    Some(words)
}
